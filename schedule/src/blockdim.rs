//! Core partition ("block dim") decision.
//!
//! Before any per-core tiling, the whole problem is split across the AI
//! cores. [`decide`] first picks the split layout (flattened M when its L1
//! minimum and instruction limits allow it, split H/W otherwise), then
//! enumerates every combination of per-axis core counts drawn from factor
//! lattices and keeps the cheapest under a traffic plus compute cost model.
//!
//! Ties on cost prefer higher utilization, then larger batch dims.

use snafu::ensure;
use tracing::{debug, instrument};

use cubetile_dtype::{C0_SIZE, ConvFormat, CubeShape};

use crate::context::{C04_CIN_SIZE, OutputOrder, TilingContext};
use crate::driver::{Conv2dTiler, OptGroupInfo, OriGroupInfo};
use crate::error::*;
use crate::math::{Lattice, align_up, ceil_div, comm_factors, merge_sorted};
use crate::tiling::LOAD3DV2_HIN_WIN_LIMIT;
use crate::validate::{self, CheckScope, MAX_32_BIT_NUM, MAX_40_BIT_NUM};

/// L2 bytes moved per cycle, the traffic divisor of the cost model.
pub const MIN_L2_BAND_WIDTH: u64 = 128;
pub const BW_COEFF: u64 = 1;
/// Weight traffic weight when the weight goes through UB.
pub const BW_COEFF_UB: u64 = 5;
pub const BW_COEFF_C04: u64 = 10;
/// Batches this many times the core count split on the core lattice alone.
pub const BATCH_AICORE_COF: u64 = 2;
const C04_CI1_SIZE: u64 = 1;

/// Chosen core counts per axis. `m_dim` is used by the flattened layout,
/// `ho_dim`/`wo_dim` by the split layout; the unused ones stay 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockDimDecision {
    pub split_mode: OutputOrder,
    pub batch_dim: u64,
    pub m_dim: u64,
    pub ho_dim: u64,
    pub wo_dim: u64,
    pub n_dim: u64,
    pub group_dim: u64,
    pub min_cost: u64,
}

impl BlockDimDecision {
    fn unit(split_mode: OutputOrder) -> Self {
        Self { split_mode, batch_dim: 1, m_dim: 1, ho_dim: 1, wo_dim: 1, n_dim: 1, group_dim: 1, min_cost: 0 }
    }

    /// Cores the decision occupies.
    pub fn block_dim(&self) -> u64 {
        self.batch_dim * self.m_dim * self.ho_dim * self.wo_dim * self.n_dim * self.group_dim
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Normal,
    Original,
    Optimized(OptGroupInfo),
}

/// Problem view of the decision.
#[derive(Debug)]
struct Decider<'a> {
    ctx: &'a TilingContext,
    aicore: u64,
    batch: u64,
    kind: GroupKind,
    /// Input and output channels per group the cores see.
    ci: u64,
    co: u64,
    groups: u64,
}

#[derive(Debug, Default)]
struct Ranges {
    batch: Lattice,
    m: Lattice,
    ho: Lattice,
    ho_spare: Lattice,
    wo: Lattice,
    n: Lattice,
    group: Lattice,
}

/// Picks the split layout and the core count of every axis.
#[instrument(skip_all)]
pub fn decide(tiler: &Conv2dTiler) -> Result<BlockDimDecision> {
    let mut ctx = tiler.build_context()?;
    validate::check_params(&mut ctx, CheckScope::BeforeCoreBind)?;
    let batch = ctx.shape.org_batch;
    ensure!(batch > 0, InvalidShapeSnafu { name: "batch", value: batch });

    let s = &ctx.shape;
    let groups = ctx.attr.group_count();
    let kind = if ctx.flags.opt_group {
        let opt = tiler.calc_opt_group_params(OriGroupInfo {
            groups: ctx.attr.groups,
            ci_per_group: (s.org_ci / groups) as i64,
            co_per_group: (s.org_co / groups) as i64,
            weight_dtype: ctx.desc.weight.dtype,
        })?;
        GroupKind::Optimized(opt)
    } else if groups > 1 {
        GroupKind::Original
    } else {
        GroupKind::Normal
    };
    let (ci, co, cur_groups) = match kind {
        GroupKind::Normal => (s.org_ci, s.org_co, groups),
        GroupKind::Original => (s.org_ci / groups, s.org_co / groups, groups),
        GroupKind::Optimized(opt) => (opt.cin_opt, opt.cout_opt, opt.group_opt),
    };
    let d = Decider { ctx: &ctx, aicore: ctx.platform.aicore_num, batch, kind, ci, co, groups: cur_groups };

    let decision = if d.m_split_fits() {
        d.decide_m_split()
    } else {
        d.check_hw_split()?;
        d.decide_hw_split()
    };
    debug!(
        split = %decision.split_mode,
        batch_dim = decision.batch_dim,
        m_dim = decision.m_dim,
        ho_dim = decision.ho_dim,
        n_dim = decision.n_dim,
        group_dim = decision.group_dim,
        min_cost = decision.min_cost,
        "block dim decision"
    );
    Ok(decision)
}

/// `range` plus the values of `mix` not above `dim`.
fn factor_mix(dim: u64, range: &mut Lattice, mix: &[u64]) {
    let extra: Lattice = mix.iter().copied().filter(|&v| v <= dim).collect();
    merge_sorted(range, &extra);
}

impl Decider<'_> {
    fn cube(&self) -> CubeShape {
        self.ctx.cube
    }

    fn side_l1(&self) -> u64 {
        let n0 = self.cube().n0;
        let bias = if self.ctx.flags.has_bias { align_up(n0 * self.ctx.bias_bytes(), C0_SIZE) } else { 0 };
        bias + align_up(self.ctx.fixp_l1(n0), C0_SIZE)
    }

    fn weight_min_l1(&self) -> u64 {
        let CubeShape { k0, n0, .. } = self.cube();
        let s = &self.ctx.shape;
        align_up(s.org_kh * s.org_kw * k0 * n0 * self.ctx.weight_bytes(), C0_SIZE)
    }

    fn m_split_fits(&self) -> bool {
        let CubeShape { m0, k0, .. } = self.cube();
        let s = &self.ctx.shape;
        let ho_min = (m0 / s.org_wo + 2).min(s.org_ho);
        let fmap = align_up(self.ctx.infer_hi_l1(ho_min) * s.org_wi * k0 * self.ctx.fmap_bytes(), C0_SIZE);
        let required = self.side_l1() + self.weight_min_l1() + fmap;
        if required > self.ctx.platform.l1_size || s.org_wi > LOAD3DV2_HIN_WIN_LIMIT {
            debug!(required, org_wi = s.org_wi, "flattened split does not fit");
            return false;
        }
        if self.ctx.desc.fmap.format == ConvFormat::Nhwc && s.org_ci * s.org_hi * s.org_wi > MAX_40_BIT_NUM {
            debug!("flattened split exceeds the ND to NZ stride");
            return false;
        }
        true
    }

    fn check_hw_split(&self) -> Result<()> {
        let s = &self.ctx.shape;
        if !self.ctx.is_dma {
            let CubeShape { m0, k0, .. } = self.cube();
            let wi_min = self.ctx.infer_wi_l1(m0);
            let ho_min = if s.org_wo < m0 { ceil_div(m0, s.org_wo) } else { 1 }.min(s.org_ho);
            let fmap =
                align_up(self.ctx.infer_hi_l1(ho_min) * wi_min * k0 * self.ctx.fmap_bytes(), C0_SIZE);
            let required = self.side_l1() + self.weight_min_l1() + fmap;
            ensure!(
                required <= self.ctx.platform.l1_size,
                L1CapacitySnafu { required, capacity: self.ctx.platform.l1_size }
            );
        }
        if self.ctx.desc.fmap.format == ConvFormat::Nhwc {
            ensure!(
                s.org_wo * s.org_co <= MAX_32_BIT_NUM,
                InstructionLimitSnafu { reason: "Wo*Co exceeds the fixpipe stride" }
            );
        }
        Ok(())
    }

    fn ranges(&self) -> Ranges {
        let n0 = self.cube().n0;
        let aic = comm_factors(self.aicore, self.aicore);
        let mut r = Ranges::default();

        r.batch = comm_factors(self.batch, self.aicore);
        if self.batch >= BATCH_AICORE_COF * self.aicore {
            r.batch = aic.clone();
        } else {
            factor_mix(self.batch, &mut r.batch, &aic);
        }
        let co1 = ceil_div(self.co, n0);
        r.n = comm_factors(co1, self.aicore);
        factor_mix(co1, &mut r.n, &aic);
        r.group = comm_factors(self.groups, self.aicore);
        factor_mix(self.groups, &mut r.group, &aic);

        let s = &self.ctx.shape;
        let m1 = ceil_div(s.org_ho * s.org_wo, self.cube().m0);
        r.m = comm_factors(m1, self.aicore);
        factor_mix(m1, &mut r.m, &aic);

        r.ho = comm_factors(s.org_ho, self.aicore);
        factor_mix(s.org_ho, &mut r.ho, &aic);
        r.wo = Lattice::from_slice(&[1]);
        let min_burst = MIN_L2_BAND_WIDTH / self.ctx.fmap_bytes();
        if s.org_wo < min_burst {
            let min_ho = min_burst / s.org_wo;
            let first = r.ho.iter().position(|&h| ceil_div(s.org_ho, h) >= min_ho).unwrap_or(r.ho.len());
            r.ho_spare = r.ho[..first].iter().copied().collect();
            r.ho = r.ho[first..].iter().copied().collect();
        }
        r
    }

    fn bw_coeff(&self) -> u64 {
        let d = &self.ctx.desc;
        if d.fmap.format == ConvFormat::Nchw {
            if matches!(d.weight.format, ConvFormat::FractalZ | ConvFormat::FractalZC04) {
                return BW_COEFF_UB;
            }
            if !matches!(self.kind, GroupKind::Optimized(_)) {
                return BW_COEFF;
            }
        }
        if self.ctx.flags.c04 && d.fmap.format == ConvFormat::Nhwc {
            return BW_COEFF_C04;
        }
        BW_COEFF_UB
    }

    /// Weight is fully loaded along N through UB for optimized groups.
    fn weight_n_factor(&self, n_dim: u64) -> u64 {
        match self.kind {
            GroupKind::Optimized(_) => 1,
            _ => ceil_div(ceil_div(self.co, self.cube().n0) * self.cube().n0, n_dim),
        }
    }

    fn cost_m(&self, batch_dim: u64, m_dim: u64, n_dim: u64, group_dim: u64) -> u64 {
        let CubeShape { m0, k0, n0 } = self.cube();
        let s = &self.ctx.shape;
        let ci1 = ceil_div(self.ci, k0);
        let co1 = ceil_div(self.co, n0);
        let b = ceil_div(self.batch, batch_dim);
        let g = ceil_div(self.groups, group_dim);

        let fmap = b * g * ceil_div(align_up(s.org_hi * s.org_wi, m0), m_dim) * ci1 * k0;
        let weight = g * ci1 * s.org_kh * s.org_kw * k0 * b * self.weight_n_factor(n_dim);
        let out = b * g * ceil_div(co1 * n0, n_dim) * ceil_div(align_up(s.org_ho * s.org_wo, m0), m_dim);
        let cube = b * g * ceil_div(co1, n_dim) * ci1 * s.org_kh * s.org_kw
            * ceil_div(ceil_div(s.org_ho * s.org_wo, m0), m_dim);
        (fmap + weight * self.bw_coeff() + out) / MIN_L2_BAND_WIDTH + cube
    }

    fn cost_hw(&self, batch_dim: u64, ho_dim: u64, wo_dim: u64, n_dim: u64, group_dim: u64) -> u64 {
        let CubeShape { m0, k0, n0 } = self.cube();
        let s = &self.ctx.shape;
        let co1 = ceil_div(self.co, n0);
        let (ci1, ci0) = if self.ctx.flags.c04 { (C04_CI1_SIZE, C04_CIN_SIZE) } else { (ceil_div(self.ci, k0), k0) };
        let b = ceil_div(self.batch, batch_dim);
        let g = ceil_div(self.groups, group_dim);

        let fmap = b * g * ci1 * ceil_div(s.org_hi, ho_dim) * ceil_div(s.org_wi, wo_dim) * ci0;
        let weight_k = if self.ctx.flags.c04 {
            align_up(ci1 * s.org_kh * s.org_kw, k0)
        } else {
            ci1 * s.org_kh * s.org_kw * k0
        };
        let weight = b * g * weight_k * self.weight_n_factor(n_dim);
        let out = b * g * ceil_div(co1 * n0, n_dim) * ceil_div(s.org_ho, ho_dim) * ceil_div(s.org_wo, wo_dim);
        let cube = b * g * ceil_div(co1, n_dim) * ci1 * s.org_kh * s.org_kw
            * ceil_div(ceil_div(s.org_ho, ho_dim) * ceil_div(s.org_wo, wo_dim), m0);
        (fmap + weight * self.bw_coeff() + out) / MIN_L2_BAND_WIDTH + cube
    }

    /// Equal cost: keep the candidate that occupies more of the cores, then
    /// the one with the larger batch dim.
    fn prefer_on_tie(&self, cand: &BlockDimDecision, best: &BlockDimDecision) -> bool {
        let cur = cand.block_dim() / self.aicore;
        let kept = best.block_dim() / self.aicore;
        match cur.cmp(&kept) {
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => cand.batch_dim > best.batch_dim,
            std::cmp::Ordering::Greater => true,
        }
    }

    fn consider(&self, cand: BlockDimDecision, best: &mut BlockDimDecision) {
        if cand.block_dim() > self.aicore {
            return;
        }
        let better =
            cand.min_cost < best.min_cost || (cand.min_cost == best.min_cost && self.prefer_on_tie(&cand, best));
        if better {
            *best = cand;
        }
    }

    fn decide_m_split(&self) -> BlockDimDecision {
        let r = self.ranges();
        let mut best = BlockDimDecision::unit(OutputOrder::M);
        best.min_cost = self.cost_m(1, 1, 1, 1);
        for &batch_dim in &r.batch {
            for &m_dim in &r.m {
                for &n_dim in &r.n {
                    for &group_dim in &r.group {
                        let cand = BlockDimDecision {
                            batch_dim,
                            m_dim,
                            n_dim,
                            group_dim,
                            min_cost: self.cost_m(batch_dim, m_dim, n_dim, group_dim),
                            ..BlockDimDecision::unit(OutputOrder::M)
                        };
                        self.consider(cand, &mut best);
                    }
                }
            }
        }
        best
    }

    fn decide_hw_split(&self) -> BlockDimDecision {
        let r = self.ranges();
        let ho_range: Lattice = if r.ho.is_empty() { Lattice::from_slice(&[1]) } else { r.ho.clone() };
        let mut best = BlockDimDecision::unit(OutputOrder::Hw);
        best.min_cost = self.cost_hw(1, 1, 1, 1, 1);
        for &batch_dim in &r.batch {
            for &ho_dim in &ho_range {
                for &wo_dim in &r.wo {
                    for &n_dim in &r.n {
                        for &group_dim in &r.group {
                            let cand = BlockDimDecision {
                                batch_dim,
                                ho_dim,
                                wo_dim,
                                n_dim,
                                group_dim,
                                min_cost: self.cost_hw(batch_dim, ho_dim, wo_dim, n_dim, group_dim),
                                ..BlockDimDecision::unit(OutputOrder::Hw)
                            };
                            self.consider(cand, &mut best);
                        }
                    }
                }
            }
        }
        self.use_spare_cores(&mut best, &r.ho_spare);
        best
    }

    /// Spends idle cores on the output rows the burst rule held back.
    fn use_spare_cores(&self, best: &mut BlockDimDecision, spare: &[u64]) {
        let others = best.batch_dim * best.n_dim * best.group_dim;
        if others * best.ho_dim == self.aicore {
            return;
        }
        for &ho_dim in spare {
            if others * ho_dim <= self.aicore {
                best.ho_dim = best.ho_dim.max(ho_dim);
            }
        }
    }
}
