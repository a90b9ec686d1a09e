use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A config field failed validation against the spec.
    #[snafu(display("invalid config: {reason}"))]
    InvalidConfig { reason: String },

    /// Strict normalization rejected entries for axes the spec never
    /// registered.
    #[snafu(display("config references unknown axes: {table} has {got} entries, spec registered {registered}"))]
    UnknownAxis { table: &'static str, got: usize, registered: usize },

    /// A loop-order entry is not a permutation of its block group.
    #[snafu(display("loop order {order:?} is not a permutation of 0..{len}"))]
    NotAPermutation { order: Vec<usize>, len: usize },

    /// Flat decode received a value outside its axis domain.
    #[snafu(display("axis `{name}`: value does not fit domain"))]
    AxisDomainMismatch { name: String },
}
