use snafu::Snafu;
use tessel_ir::origin::Loc;
use tessel_ir::program::BlockId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between tracing a kernel body and emitting
/// its source. Each variant that stems from a specific call site carries the
/// caller's location so diagnostics point at user code.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A tile or grid group was created but never driven by `for_each`.
    #[snafu(display("loop group created at {loc} was never passed to for_each"))]
    LoopFunctionNotInFor { loc: Loc },

    /// Host work is not allowed between two top-level device loops; it would
    /// have to run in the middle of a single kernel launch.
    #[snafu(display("host statement at {loc} appears between top-level device loops"))]
    TopLevelStatementBetweenLoops { loc: Loc },

    /// A later top-level loop reads a tensor an earlier one wrote. The loops
    /// share one launch and may run concurrently.
    #[snafu(display(
        "device loop at {loc} reads `{tensor}`, which an earlier top-level loop writes; \
         split the kernel or merge the loops"
    ))]
    LoopDependency { tensor: String, loc: Loc },

    /// Two nested loops claim the same block dimension.
    #[snafu(display("nested device loops at {loc} conflict over block dimension {}", block_id.0))]
    NestedDeviceLoopsConflict { block_id: BlockId, loc: Loc },

    /// A tile was subscripted into a tensor outside the loop that owns it.
    #[snafu(display("tile for block dimension {} used at {loc} outside its loop", block_id.0))]
    IncorrectTileUsage { block_id: BlockId, loc: Loc },

    /// Two kernel parameters share a name.
    #[snafu(display("parameter name `{name}` is already taken"))]
    NamingConflict { name: String },

    /// Subscript arity does not match tensor rank.
    #[snafu(display("tensor `{tensor}` has rank {rank} but was subscripted with {got} indices at {loc}"))]
    RankMismatch { tensor: String, rank: usize, got: usize, loc: Loc },

    #[snafu(display("dtype mismatch at {loc}: {lhs} vs {rhs}"))]
    DTypeMismatch { lhs: tessel_ir::DType, rhs: tessel_ir::DType, loc: Loc },

    /// Operand tiles span different block dimensions.
    #[snafu(display("tile shape mismatch at {loc}: {lhs:?} vs {rhs:?}"))]
    TileShapeMismatch { lhs: Vec<BlockId>, rhs: Vec<BlockId>, loc: Loc },

    /// An allocation's shape depends on a data-dependent or specializing
    /// size, so every distinct input would force a recompile.
    #[snafu(display("allocation at {loc} would specialize the kernel on `{size}`"))]
    ShapeSpecializingAllocation { size: String, loc: Loc },

    /// Gather index tile must be an integer dtype.
    #[snafu(display("gather index at {loc} has dtype {dtype}, expected an integer"))]
    GatherIndexNotInteger { dtype: tessel_ir::DType, loc: Loc },

    /// An argument was declared with the wrong kind or after the actual
    /// argument list was exhausted.
    #[snafu(display("argument `{name}`: {reason}"))]
    ArgumentMismatch { name: String, reason: String },

    /// Reduction axis out of range for the source tile.
    #[snafu(display("reduce axis {axis} out of range for a {rank}-d tile at {loc}"))]
    ReduceAxisOutOfRange { axis: usize, rank: usize, loc: Loc },

    #[snafu(display("program has no top-level device loop"))]
    NoDeviceLoop,

    #[snafu(display("config error: {source}"))]
    Config { source: tessel_config::Error },
}
