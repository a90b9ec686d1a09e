//! The per-compilation environment: symbolic shapes, block dimensions, and
//! the configuration space accumulated while tracing.

use tessel_config::spec::{
    BlockSizeSpec, ConfigSpec, FlattenLoopSpec, L2GroupingSpec, LoopOrderSpec, RangeSpec,
    ReductionLoopSpec, DEFAULT_STATIC_RANGE_LIMIT,
};
use tessel_ir::origin::Origin;
use tessel_ir::program::BlockId;
use tessel_ir::sym::{next_power_of_two, ShapeEnv, SymInt};
use tessel_ir::{DType, FakeTensor};

/// Trace-time policy knobs. The runtime settings layer builds one of these
/// from its richer user-facing configuration.
#[derive(Debug, Clone)]
pub struct TraceSettings {
    /// Specialize on exact shapes: every size is a compile-time constant and
    /// any shape change recompiles.
    pub static_shapes: bool,
    /// Upper bound on the trip count of a nested loop before full static
    /// unrolling stops being offered as a tunable choice.
    pub static_range_limit: i64,
    pub suppress_warnings: Vec<WarningKind>,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            static_shapes: false,
            static_range_limit: DEFAULT_STATIC_RANGE_LIMIT,
            suppress_warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A flattenable tile group was disabled by an access pattern the
    /// linearized form cannot express.
    FlattenDisabled,
    /// A persistent reduction pads its dimension up to a power of two.
    PowerOfTwoPadding,
    /// A tunable knob was requested on a dimension where it has no effect.
    InertTunable,
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Where a block dimension's size comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSizeSource {
    /// User-fixed constant; not tunable.
    Fixed(i64),
    /// A tiled loop; autotunable block size.
    Loop,
    /// A reduction dimension; tunable between persistent and looped.
    ReductionLoop,
    /// One element per program; block size is always 1.
    Grid,
}

/// One block dimension: its iteration extent, the symbol standing for its
/// block size, and its provenance.
#[derive(Debug, Clone)]
pub struct BlockSizeInfo {
    pub block_id: BlockId,
    /// Number of elements the dimension iterates over.
    pub size: SymInt,
    /// The block size itself: a symbol for tunable dimensions, a constant
    /// for fixed and grid dimensions.
    pub var: SymInt,
    pub source: BlockSizeSource,
}

impl BlockSizeInfo {
    pub fn is_tunable(&self) -> bool {
        matches!(self.source, BlockSizeSource::Loop | BlockSizeSource::ReductionLoop)
    }
}

#[derive(Debug)]
pub struct Environment {
    pub shape_env: ShapeEnv,
    settings: TraceSettings,
    block_sizes: Vec<BlockSizeInfo>,
    spec: ConfigSpec,
    /// Parallel to `spec.flatten_loops`: the member ids of each group.
    flatten_groups: Vec<Vec<BlockId>>,
    warnings: Vec<Warning>,
}

impl Environment {
    pub fn new(settings: TraceSettings) -> Self {
        Self {
            shape_env: ShapeEnv::new(),
            settings,
            block_sizes: Vec::new(),
            spec: ConfigSpec::default(),
            flatten_groups: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn settings(&self) -> &TraceSettings {
        &self.settings
    }

    pub fn block_sizes(&self) -> &[BlockSizeInfo] {
        &self.block_sizes
    }

    pub fn block_info(&self, block_id: BlockId) -> &BlockSizeInfo {
        &self.block_sizes[block_id.0]
    }

    /// The symbol (or constant) standing for a dimension's block size.
    pub fn block_size_var(&self, block_id: BlockId) -> SymInt {
        self.block_sizes[block_id.0].var
    }

    fn next_block_id(&self) -> BlockId {
        BlockId(self.block_sizes.len())
    }

    /// Allocate an autotunable tiled dimension over `size` elements.
    pub fn allocate_loop_dimension(&mut self, size: SymInt) -> BlockId {
        let block_id = self.next_block_id();
        let hint = self.shape_env.size_hint(size).max(1);
        let default = next_power_of_two(hint.min(64));
        let var = self.shape_env.create_var(
            format!("_BLOCK_SIZE_{}", block_id.0),
            default,
            Origin::BlockSize { block_id: block_id.0 },
        );
        self.block_sizes.push(BlockSizeInfo { block_id, size, var, source: BlockSizeSource::Loop });
        self.spec.block_sizes.push(BlockSizeSpec::new(block_id, hint));
        block_id
    }

    /// Pre-allocate an autotunable dimension whose iteration extent is not
    /// known yet. The extent is filled in by [`resolve_registered_extent`]
    /// when a tile group first drives the dimension.
    ///
    /// [`resolve_registered_extent`]: Self::resolve_registered_extent
    pub fn allocate_registered_dimension(&mut self, min: i64, max: i64) -> BlockId {
        let block_id = self.next_block_id();
        let default = next_power_of_two(max.max(1).min(64));
        let var = self.shape_env.create_var(
            format!("_BLOCK_SIZE_{}", block_id.0),
            default,
            Origin::BlockSize { block_id: block_id.0 },
        );
        self.block_sizes.push(BlockSizeInfo {
            block_id,
            size: SymInt::Const(max),
            var,
            source: BlockSizeSource::Loop,
        });
        let mut spec = BlockSizeSpec::new(block_id, max);
        spec.update_min(next_power_of_two(min.max(1)));
        self.spec.block_sizes.push(spec);
        block_id
    }

    /// Bind the real iteration extent of a pre-registered dimension.
    pub fn resolve_registered_extent(&mut self, block_id: BlockId, size: SymInt) {
        self.block_sizes[block_id.0].size = size;
        self.mark_alternate_size(block_id, size);
    }

    /// Allocate a dimension with a user-fixed block size.
    pub fn allocate_fixed_dimension(&mut self, size: SymInt, block_size: i64) -> BlockId {
        let block_id = self.next_block_id();
        self.block_sizes.push(BlockSizeInfo {
            block_id,
            size,
            var: SymInt::Const(block_size),
            source: BlockSizeSource::Fixed(block_size),
        });
        block_id
    }

    /// Allocate a one-element-per-program grid dimension.
    pub fn allocate_grid_dimension(&mut self, size: SymInt) -> BlockId {
        let block_id = self.next_block_id();
        self.block_sizes.push(BlockSizeInfo {
            block_id,
            size,
            var: SymInt::Const(1),
            source: BlockSizeSource::Grid,
        });
        block_id
    }

    /// Allocate a reduction dimension. Its block size symbol covers the
    /// whole (power-of-two padded) extent when the chosen config runs the
    /// reduction persistently.
    pub fn allocate_reduction_dimension(&mut self, size: SymInt) -> BlockId {
        let block_id = self.next_block_id();
        let hint = self.shape_env.size_hint(size).max(1);
        let padded = next_power_of_two(hint);
        if padded != hint {
            self.warn(
                WarningKind::PowerOfTwoPadding,
                format!("reduction over {hint} elements pads to {padded} when persistent"),
            );
        }
        let var = self.shape_env.create_var(
            format!("_BLOCK_SIZE_{}", block_id.0),
            padded,
            Origin::BlockSize { block_id: block_id.0 },
        );
        self.block_sizes.push(BlockSizeInfo {
            block_id,
            size,
            var,
            source: BlockSizeSource::ReductionLoop,
        });
        self.spec.reduction_loops.push(ReductionLoopSpec { block_id, size_hint: hint });
        block_id
    }

    /// A dimension observed under a second extent. The spec keeps the
    /// smaller hint so defaults stay within every observed extent.
    pub fn mark_alternate_size(&mut self, block_id: BlockId, size: SymInt) {
        let hint = self.shape_env.size_hint(size).max(1);
        if let Some(i) = self.spec.block_id_to_index(block_id) {
            let spec = &mut self.spec.block_sizes[i];
            spec.size_hint = spec.size_hint.min(hint);
        }
    }

    /// Register a multi-dimensional top-level tile group: order permutation,
    /// flattening, and (for 2-d grids) L2 pid grouping.
    pub fn register_root_group(&mut self, block_ids: &[BlockId], zero_based: bool) {
        if block_ids.len() < 2 {
            return;
        }
        self.spec.loop_orders.push(LoopOrderSpec { block_ids: block_ids.to_vec() });
        let tunable = block_ids.iter().all(|&id| self.block_info(id).is_tunable());
        self.spec.flatten_loops.push(FlattenLoopSpec {
            block_ids: block_ids.to_vec(),
            allowed: zero_based && tunable,
        });
        self.flatten_groups.push(block_ids.to_vec());
        if let [a, b] = *block_ids {
            self.spec.l2_groupings.push(L2GroupingSpec { block_ids: [a, b] });
        }
    }

    /// Register a nested sequential loop dimension's range-policy axes.
    pub fn register_range(&mut self, block_id: BlockId) {
        if self.spec.range_index(block_id).is_some() {
            return;
        }
        let info = self.block_info(block_id);
        let static_allowed = match (info.size.as_const(), info.source) {
            // Static unrolling needs a trip count that is the same for every
            // config, so only fixed block sizes qualify.
            (Some(n), BlockSizeSource::Fixed(bs)) => {
                tessel_ir::sym::ceil_div(n, bs) <= self.settings.static_range_limit
            }
            (Some(n), BlockSizeSource::Grid) => n <= self.settings.static_range_limit,
            _ => false,
        };
        self.spec.ranges.push(RangeSpec { block_id, static_allowed });
    }

    /// Record the ordered tile dimensions of one tensor access and disable
    /// flattening for any group the pattern cannot linearize.
    pub fn observe_tile_access(&mut self, access: &[BlockId]) {
        for (group_idx, group) in self.flatten_groups.iter().enumerate() {
            if !self.spec.flatten_loops[group_idx].allowed {
                continue;
            }
            let mentioned = group.iter().filter(|id| access.contains(id)).count();
            if mentioned == 0 {
                continue;
            }
            // The linearized form only expresses accesses that are exactly
            // the group, in order, with nothing mixed in.
            let ok = mentioned == group.len() && access == group.as_slice();
            if !ok {
                self.spec.flatten_loops[group_idx].allowed = false;
                self.warnings.push(Warning {
                    kind: WarningKind::FlattenDisabled,
                    message: format!(
                        "access pattern {access:?} prevents flattening of {group:?}"
                    ),
                });
            }
        }
    }

    /// Convert an argument tensor's metadata into its symbolic twin. Sizes
    /// 0 and 1 specialize (they change broadcasting and emptiness); all
    /// other sizes stay symbolic unless `static_shapes` is set.
    pub fn to_fake(
        &mut self,
        name: &str,
        shape: &[usize],
        dtype: DType,
        device: tessel_ir::Device,
    ) -> FakeTensor {
        let dims = shape
            .iter()
            .enumerate()
            .map(|(dim, &s)| {
                if self.settings.static_shapes || s <= 1 {
                    SymInt::Const(s as i64)
                } else {
                    self.shape_env.create_var(
                        format!("{name}_size_{dim}"),
                        s as i64,
                        Origin::TensorSize { arg: name.to_owned(), dim },
                    )
                }
            })
            .collect();
        FakeTensor { shape: dims, dtype, device, origin: Origin::Argument { name: name.to_owned() } }
    }

    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        if self.settings.suppress_warnings.contains(&kind) {
            return;
        }
        let warning = Warning { kind, message: message.into() };
        tracing::warn!(target: "tessel::trace", "{warning}");
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Close the spec after tracing: decide x/y/z grid eligibility and drop
    /// duplicate registrations.
    pub fn finalize_spec(&mut self, root_dims: &[usize]) -> ConfigSpec {
        self.spec.allow_use_yz_grid =
            Some(root_dims.len() == 1 && (2..=3).contains(&root_dims[0]));
        self.spec.remove_duplicates();
        self.spec.clone()
    }

    pub fn spec(&self) -> &ConfigSpec {
        &self.spec
    }
}

