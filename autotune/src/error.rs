use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Restricting a kernel to an explicit config list only makes sense
    /// with at least two candidates; one config needs no search at all.
    #[snafu(display("finite search needs at least 2 configs, got {got}"))]
    NotEnoughConfigs { got: usize },

    /// Every evaluated candidate failed to compile or run.
    #[snafu(display("autotuning failed: all {tried} candidate configs failed"))]
    AllCandidatesFailed { tried: usize },

    #[snafu(display("config error: {source}"))]
    Config { source: tessel_config::Error },
}
