//! The declarative catalog of tunable axes for one traced program.
//!
//! Axes are appended in registration order while tracing; the resulting
//! tables give [`crate::Config`] fields their meaning. `normalize` is
//! idempotent: applying it twice yields the same config as applying it once.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tessel_ir::program::BlockId;
use tessel_ir::sym::next_power_of_two;

use crate::axis::{AxisDomain, AxisValue, TunableAxis};
use crate::config::{Config, IndexingStrategy, PidType};
use crate::error::{self, Result};

pub const MIN_BLOCK_SIZE: i64 = 1;
pub const MAX_BLOCK_SIZE: i64 = 8192;
/// Default trip-count cap below which a nested loop is offered for full
/// static unrolling while tracing.
pub const DEFAULT_STATIC_RANGE_LIMIT: i64 = 8;

/// One autotunable block size, sourced from a tiled device loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSizeSpec {
    pub block_id: BlockId,
    /// Hint taken from the iteration extent at trace time.
    pub size_hint: i64,
    pub min: i64,
    pub max: i64,
}

impl BlockSizeSpec {
    pub fn new(block_id: BlockId, size_hint: i64) -> Self {
        Self { block_id, size_hint, min: MIN_BLOCK_SIZE, max: MAX_BLOCK_SIZE }
    }

    /// Raise the lower bound (e.g. a `tl.dot` operand needs at least 16).
    pub fn update_min(&mut self, min: i64) {
        self.min = self.min.max(min);
        self.max = self.max.max(self.min);
    }

    pub fn update_hint(&mut self, hint: i64) {
        self.size_hint = self.size_hint.max(hint);
    }

    /// Default block size: next power of two of the hint, capped at 64 and
    /// clamped into `[min, max]`.
    pub fn default_value(&self) -> i64 {
        next_power_of_two(self.size_hint.min(64)).clamp(self.min, self.max)
    }

    fn domain(&self) -> AxisDomain {
        AxisDomain::Pow2 { min: self.min, max: self.max }
    }

    fn clamp(&self, value: i64) -> i64 {
        next_power_of_two(value.max(1)).clamp(self.min, self.max)
    }
}

/// One reduction dimension whose loop may be tiled or run persistently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionLoopSpec {
    pub block_id: BlockId,
    pub size_hint: i64,
}

impl ReductionLoopSpec {
    /// Candidate looped block sizes: powers of two below the hint's
    /// rounded-up extent. `None` (persistent) is always a member.
    fn max_loop_size(&self) -> i64 {
        next_power_of_two(self.size_hint).max(2)
    }

    fn clamp(&self, value: Option<i64>) -> Option<i64> {
        let v = value?;
        let v = next_power_of_two(v.max(1)).min(self.max_loop_size());
        // A loop covering the whole extent in one step is just persistent.
        if v >= next_power_of_two(self.size_hint) { None } else { Some(v) }
    }
}

/// A multi-dimensional tile group whose dimension order may be permuted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOrderSpec {
    pub block_ids: Vec<BlockId>,
}

/// A tile group that may be collapsed into a single linearized dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenLoopSpec {
    pub block_ids: Vec<BlockId>,
    /// Set to `false` once tracing observes an access pattern that the
    /// linearized form cannot express.
    pub allowed: bool,
}

/// A 2-d launch grid eligible for L2-friendly pid swizzling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2GroupingSpec {
    pub block_ids: [BlockId; 2],
}

/// Per nested-loop dimension range policies (unroll, staging, static).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub block_id: BlockId,
    /// Whether the trip count is known constant for every config, making
    /// full static unrolling a legal choice.
    pub static_allowed: bool,
}

/// Registration-ordered tables of every tunable axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    pub block_sizes: Vec<BlockSizeSpec>,
    pub reduction_loops: Vec<ReductionLoopSpec>,
    pub loop_orders: Vec<LoopOrderSpec>,
    pub flatten_loops: Vec<FlattenLoopSpec>,
    pub l2_groupings: Vec<L2GroupingSpec>,
    pub ranges: Vec<RangeSpec>,
    /// `Some(true)` once the grid shape is known compatible with x/y/z
    /// launch axes; `None` while undecided.
    pub allow_use_yz_grid: Option<bool>,
}

impl ConfigSpec {
    /// Index into `block_sizes` for a block id, if it is autotunable.
    pub fn block_id_to_index(&self, block_id: BlockId) -> Option<usize> {
        self.block_sizes.iter().position(|s| s.block_id == block_id)
    }

    pub fn reduction_index(&self, block_id: BlockId) -> Option<usize> {
        self.reduction_loops.iter().position(|s| s.block_id == block_id)
    }

    pub fn range_index(&self, block_id: BlockId) -> Option<usize> {
        self.ranges.iter().position(|s| s.block_id == block_id)
    }

    pub fn set_flatten_allowed(&mut self, group: usize, allowed: bool) {
        if let Some(spec) = self.flatten_loops.get_mut(group) {
            spec.allowed &= allowed;
        }
    }

    pub fn disable_flatten(&mut self) {
        for spec in &mut self.flatten_loops {
            spec.allowed = false;
        }
    }

    /// The config every compilation starts from when autotuning is off.
    pub fn default_config(&self) -> Config {
        let mut config = Config::default();
        self.normalize(&mut config, false)
            .unwrap_or_else(|e| unreachable!("lenient normalize of empty config: {e}"));
        config
    }

    /// Fill missing entries with defaults, clamp values into their domains,
    /// and validate structure. Idempotent. With `strict`, surplus entries
    /// are an error instead of being truncated.
    pub fn normalize(&self, config: &mut Config, strict: bool) -> Result<()> {
        if strict {
            check_len("block_sizes", config.block_sizes.len(), self.block_sizes.len())?;
            check_len("reduction_loops", config.reduction_loops.len(), self.reduction_loops.len())?;
            check_len("loop_orders", config.loop_orders.len(), self.loop_orders.len())?;
            check_len("flatten_loops", config.flatten_loops.len(), self.flatten_loops.len())?;
            check_len("l2_groupings", config.l2_groupings.len(), self.l2_groupings.len())?;
            check_len("range_unroll_factors", config.range_unroll_factors.len(), self.ranges.len())?;
            check_len("range_warp_specialize", config.range_warp_specialize.len(), self.ranges.len())?;
            check_len("range_num_stages", config.range_num_stages.len(), self.ranges.len())?;
            check_len("range_multi_buffers", config.range_multi_buffers.len(), self.ranges.len())?;
            check_len("static_ranges", config.static_ranges.len(), self.ranges.len())?;
        }

        config.block_sizes.truncate(self.block_sizes.len());
        for (i, spec) in self.block_sizes.iter().enumerate() {
            match config.block_sizes.get_mut(i) {
                Some(v) => *v = spec.clamp(*v),
                None => config.block_sizes.push(spec.default_value()),
            }
        }

        config.reduction_loops.truncate(self.reduction_loops.len());
        for (i, spec) in self.reduction_loops.iter().enumerate() {
            match config.reduction_loops.get_mut(i) {
                Some(v) => *v = spec.clamp(*v),
                None => config.reduction_loops.push(None),
            }
        }

        config.loop_orders.truncate(self.loop_orders.len());
        for (i, spec) in self.loop_orders.iter().enumerate() {
            let len = spec.block_ids.len();
            match config.loop_orders.get(i) {
                Some(order) => {
                    snafu::ensure!(
                        is_permutation(order, len),
                        error::NotAPermutationSnafu { order: order.clone(), len }
                    );
                }
                None => config.loop_orders.push((0..len).collect()),
            }
        }

        config.flatten_loops.truncate(self.flatten_loops.len());
        for (i, spec) in self.flatten_loops.iter().enumerate() {
            match config.flatten_loops.get_mut(i) {
                Some(v) => *v &= spec.allowed,
                None => config.flatten_loops.push(false),
            }
        }

        config.l2_groupings.truncate(self.l2_groupings.len());
        for i in 0..self.l2_groupings.len() {
            match config.l2_groupings.get_mut(i) {
                Some(v) => *v = next_power_of_two((*v).max(1)).min(64),
                None => config.l2_groupings.push(1),
            }
        }

        resize_clamped(&mut config.range_unroll_factors, self.ranges.len(), 0, |v| v.clamp(0, 8));
        resize_default(&mut config.range_warp_specialize, self.ranges.len());
        resize_clamped(&mut config.range_num_stages, self.ranges.len(), 0, |v| v.clamp(0, 8));
        resize_default(&mut config.range_multi_buffers, self.ranges.len());

        config.static_ranges.truncate(self.ranges.len());
        for (i, spec) in self.ranges.iter().enumerate() {
            match config.static_ranges.get_mut(i) {
                Some(v) => *v &= spec.static_allowed,
                None => config.static_ranges.push(false),
            }
        }
        // A static range is fully unrolled; the per-range knobs are inert.
        for i in 0..self.ranges.len() {
            if config.static_ranges[i] {
                config.range_unroll_factors[i] = 0;
                config.range_warp_specialize[i] = None;
                config.range_num_stages[i] = 0;
                config.range_multi_buffers[i] = None;
            }
        }

        if config.num_warps == 0 || !config.num_warps.is_power_of_two() || config.num_warps > 32 {
            snafu::ensure!(
                !strict,
                error::InvalidConfigSnafu {
                    reason: format!("num_warps must be a power of two in 1..=32, got {}", config.num_warps),
                }
            );
            config.num_warps = 4;
        }
        if config.num_stages == 0 || config.num_stages > 10 {
            snafu::ensure!(
                !strict,
                error::InvalidConfigSnafu {
                    reason: format!("num_stages must be in 1..=10, got {}", config.num_stages),
                }
            );
            config.num_stages = 3;
        }

        if config.pid_type == PidType::Xyz && self.allow_use_yz_grid != Some(true) {
            snafu::ensure!(
                !strict,
                error::InvalidConfigSnafu {
                    reason: "pid_type=Xyz is not available for this grid".to_string(),
                }
            );
            config.pid_type = PidType::Flat;
        }
        // L2 swizzling reorders the flat pid space only.
        if config.pid_type == PidType::Xyz {
            for v in &mut config.l2_groupings {
                *v = 1;
            }
        }

        Ok(())
    }

    /// Drop later block-size specs covering the same block id, keeping the
    /// first registration.
    pub fn remove_duplicates(&mut self) {
        let mut seen = Vec::new();
        self.block_sizes.retain(|s| {
            let fresh = !seen.contains(&s.block_id);
            if fresh {
                seen.push(s.block_id);
            }
            fresh
        });
    }

    /// The flat axis list the evolutionary search mutates. Order is fixed
    /// and mirrors [`Self::encode`] / [`Self::decode`].
    pub fn flat_axes(&self) -> Vec<TunableAxis> {
        let mut axes = Vec::new();
        for spec in &self.block_sizes {
            axes.push(TunableAxis {
                name: format!("block_size_{}", spec.block_id.0),
                domain: spec.domain(),
                default: AxisValue::Int(spec.default_value()),
            });
        }
        for spec in &self.reduction_loops {
            axes.push(TunableAxis {
                name: format!("reduction_loop_{}", spec.block_id.0),
                domain: AxisDomain::OptPow2 { min: 2, max: spec.max_loop_size() },
                default: AxisValue::OptInt(None),
            });
        }
        for (i, spec) in self.loop_orders.iter().enumerate() {
            axes.push(TunableAxis {
                name: format!("loop_order_{i}"),
                domain: AxisDomain::Permutation { len: spec.block_ids.len() },
                default: AxisValue::Perm((0..spec.block_ids.len()).collect()),
            });
        }
        for (i, spec) in self.flatten_loops.iter().enumerate() {
            axes.push(TunableAxis {
                name: format!("flatten_loop_{i}"),
                domain: if spec.allowed { AxisDomain::Bool } else { AxisDomain::Choice { n: 1 } },
                default: if spec.allowed { AxisValue::Bool(false) } else { AxisValue::Choice(0) },
            });
        }
        for (i, _) in self.l2_groupings.iter().enumerate() {
            axes.push(TunableAxis {
                name: format!("l2_grouping_{i}"),
                domain: AxisDomain::Pow2 { min: 1, max: 64 },
                default: AxisValue::Int(1),
            });
        }
        for spec in &self.ranges {
            axes.push(TunableAxis {
                name: format!("range_unroll_{}", spec.block_id.0),
                domain: AxisDomain::Int { min: 0, max: 4 },
                default: AxisValue::Int(0),
            });
            axes.push(TunableAxis {
                name: format!("range_warp_specialize_{}", spec.block_id.0),
                domain: AxisDomain::OptBool,
                default: AxisValue::OptBool(None),
            });
            axes.push(TunableAxis {
                name: format!("range_num_stages_{}", spec.block_id.0),
                domain: AxisDomain::Int { min: 0, max: 4 },
                default: AxisValue::Int(0),
            });
            axes.push(TunableAxis {
                name: format!("range_multi_buffer_{}", spec.block_id.0),
                domain: AxisDomain::OptBool,
                default: AxisValue::OptBool(None),
            });
            axes.push(TunableAxis {
                name: format!("static_range_{}", spec.block_id.0),
                domain: if spec.static_allowed { AxisDomain::Bool } else { AxisDomain::Choice { n: 1 } },
                default: if spec.static_allowed { AxisValue::Bool(false) } else { AxisValue::Choice(0) },
            });
        }
        axes.push(TunableAxis {
            name: "num_warps".into(),
            domain: AxisDomain::Pow2 { min: 1, max: 32 },
            default: AxisValue::Int(4),
        });
        axes.push(TunableAxis {
            name: "num_stages".into(),
            domain: AxisDomain::Int { min: 1, max: 8 },
            default: AxisValue::Int(3),
        });
        axes.push(TunableAxis {
            name: "indexing".into(),
            domain: AxisDomain::Choice { n: IndexingStrategy::ALL.len() },
            default: AxisValue::Choice(0),
        });
        axes.push(TunableAxis {
            name: "pid_type".into(),
            domain: AxisDomain::Choice {
                n: if self.allow_use_yz_grid == Some(true) { PidType::ALL.len() } else { 2 },
            },
            default: AxisValue::Choice(0),
        });
        axes
    }

    /// Project a config onto the flat axis vector. The config must be
    /// normalized.
    pub fn encode(&self, config: &Config) -> Vec<AxisValue> {
        let mut out = Vec::new();
        out.extend(config.block_sizes.iter().map(|&v| AxisValue::Int(v)));
        out.extend(config.reduction_loops.iter().map(|&v| AxisValue::OptInt(v)));
        out.extend(config.loop_orders.iter().map(|o| AxisValue::Perm(o.clone())));
        for (spec, &v) in self.flatten_loops.iter().zip(&config.flatten_loops) {
            out.push(if spec.allowed { AxisValue::Bool(v) } else { AxisValue::Choice(0) });
        }
        out.extend(config.l2_groupings.iter().map(|&v| AxisValue::Int(v)));
        for (i, spec) in self.ranges.iter().enumerate() {
            out.push(AxisValue::Int(config.range_unroll_factors[i]));
            out.push(AxisValue::OptBool(config.range_warp_specialize[i]));
            out.push(AxisValue::Int(config.range_num_stages[i]));
            out.push(AxisValue::OptBool(config.range_multi_buffers[i]));
            out.push(if spec.static_allowed {
                AxisValue::Bool(config.static_ranges[i])
            } else {
                AxisValue::Choice(0)
            });
        }
        out.push(AxisValue::Int(config.num_warps as i64));
        out.push(AxisValue::Int(config.num_stages as i64));
        out.push(AxisValue::Choice(
            IndexingStrategy::ALL.iter().position(|&s| s == config.indexing).unwrap_or(0),
        ));
        out.push(AxisValue::Choice(
            PidType::ALL.iter().position(|&p| p == config.pid_type).unwrap_or(0),
        ));
        out
    }

    /// Rebuild a config from a flat axis vector and normalize it.
    pub fn decode(&self, values: &[AxisValue]) -> Result<Config> {
        let expected = self.flat_axes().len();
        snafu::ensure!(
            values.len() == expected,
            error::InvalidConfigSnafu {
                reason: format!("flat encoding has {} values, expected {expected}", values.len()),
            }
        );
        let mut it = values.iter();
        let mut next = |name: &str| -> Result<&AxisValue> {
            it.next().ok_or_else(|| {
                error::AxisDomainMismatchSnafu { name: name.to_owned() }.build()
            })
        };

        let mut config = Config::default();
        for _ in &self.block_sizes {
            config.block_sizes.push(as_int(next("block_size")?, "block_size")?);
        }
        for _ in &self.reduction_loops {
            config.reduction_loops.push(as_opt_int(next("reduction_loop")?, "reduction_loop")?);
        }
        for _ in &self.loop_orders {
            config.loop_orders.push(as_perm(next("loop_order")?, "loop_order")?);
        }
        for spec in &self.flatten_loops {
            // Placeholder axes still occupy a slot in the flat vector.
            let v = next("flatten_loop")?;
            config.flatten_loops.push(if spec.allowed { as_bool(v, "flatten_loop")? } else { false });
        }
        for _ in &self.l2_groupings {
            config.l2_groupings.push(as_int(next("l2_grouping")?, "l2_grouping")?);
        }
        for spec in &self.ranges {
            config.range_unroll_factors.push(as_int(next("range_unroll")?, "range_unroll")?);
            config
                .range_warp_specialize
                .push(as_opt_bool(next("range_warp_specialize")?, "range_warp_specialize")?);
            config.range_num_stages.push(as_int(next("range_num_stages")?, "range_num_stages")?);
            config
                .range_multi_buffers
                .push(as_opt_bool(next("range_multi_buffer")?, "range_multi_buffer")?);
            let v = next("static_range")?;
            config
                .static_ranges
                .push(if spec.static_allowed { as_bool(v, "static_range")? } else { false });
        }
        config.num_warps = as_int(next("num_warps")?, "num_warps")?.max(1) as u32;
        config.num_stages = as_int(next("num_stages")?, "num_stages")?.max(1) as u32;
        config.indexing = IndexingStrategy::ALL
            [as_choice(next("indexing")?, "indexing")?.min(IndexingStrategy::ALL.len() - 1)];
        config.pid_type =
            PidType::ALL[as_choice(next("pid_type")?, "pid_type")?.min(PidType::ALL.len() - 1)];

        self.normalize(&mut config, false)?;
        Ok(config)
    }
}

fn check_len(table: &'static str, got: usize, registered: usize) -> Result<()> {
    snafu::ensure!(got <= registered, error::UnknownAxisSnafu { table, got, registered });
    Ok(())
}

fn is_permutation(order: &[usize], len: usize) -> bool {
    order.len() == len && order.iter().sorted().eq((0..len).collect_vec().iter())
}

fn resize_clamped(v: &mut Vec<i64>, len: usize, default: i64, clamp: impl Fn(i64) -> i64) {
    v.truncate(len);
    for entry in v.iter_mut() {
        *entry = clamp(*entry);
    }
    v.resize(len, default);
}

fn resize_default<T: Default + Clone>(v: &mut Vec<T>, len: usize) {
    v.truncate(len);
    v.resize(len, T::default());
}

fn as_int(value: &AxisValue, name: &str) -> Result<i64> {
    match value {
        AxisValue::Int(v) => Ok(*v),
        _ => error::AxisDomainMismatchSnafu { name: name.to_owned() }.fail(),
    }
}

fn as_opt_int(value: &AxisValue, name: &str) -> Result<Option<i64>> {
    match value {
        AxisValue::OptInt(v) => Ok(*v),
        _ => error::AxisDomainMismatchSnafu { name: name.to_owned() }.fail(),
    }
}

fn as_bool(value: &AxisValue, name: &str) -> Result<bool> {
    match value {
        AxisValue::Bool(v) => Ok(*v),
        _ => error::AxisDomainMismatchSnafu { name: name.to_owned() }.fail(),
    }
}

fn as_opt_bool(value: &AxisValue, name: &str) -> Result<Option<bool>> {
    match value {
        AxisValue::OptBool(v) => Ok(*v),
        _ => error::AxisDomainMismatchSnafu { name: name.to_owned() }.fail(),
    }
}

fn as_perm(value: &AxisValue, name: &str) -> Result<Vec<usize>> {
    match value {
        AxisValue::Perm(v) => Ok(v.clone()),
        _ => error::AxisDomainMismatchSnafu { name: name.to_owned() }.fail(),
    }
}

fn as_choice(value: &AxisValue, name: &str) -> Result<usize> {
    match value {
        AxisValue::Choice(v) => Ok(*v),
        _ => error::AxisDomainMismatchSnafu { name: name.to_owned() }.fail(),
    }
}
