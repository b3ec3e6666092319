//! UB staging steps written to the tiling record.
//!
//! Three layouts use the vector buffer between global memory and L1: the DMA
//! datapath stages kernel-window slices, C04 stages packed weights, and
//! NCHW half-float weights may be transposed through UB. At most one applies.

use tracing::debug;

use cubetile_device::SocVersion;
use cubetile_dtype::{ConvDType, ConvFormat, CubeShape};

use crate::context::{C04_CIN_SIZE, TilingContext};
use crate::math::{align_up, ceil_div, comm_factors};
use crate::tiling::{DOUBLE_BUFFER_NUM, TilingOutcome, VEC_NUM_PER_CUBE, walk_up};

/// Bytes reserved for the gather index register.
pub const VGATHER_REGISTER_SIZE: u64 = 256;
/// Kernel windows that are a multiple of this gather fast enough without UB.
pub const VGATHER_PERF_LIMIT: u64 = 16;
const WEIGHT_UB_BUFF_NUM: u64 = 2;
const C04_VEC_USE_BUFF_NUM: u64 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UbSteps {
    pub kh_ub: u64,
    pub kw_ub: u64,
    pub b_ub_n_step: u64,
    pub b_ub_k_step: u64,
}

/// Picks the UB steps for the chosen L1 tiling.
pub fn ub_steps(ctx: &TilingContext, outcome: &TilingOutcome) -> UbSteps {
    if ctx.is_dma {
        let (kh_ub, kw_ub) = dma_steps(ctx, outcome);
        return UbSteps { kh_ub, kw_ub, ..Default::default() };
    }
    if ctx.flags.c04 {
        return UbSteps { b_ub_n_step: c04_n_step(ctx, outcome), ..Default::default() };
    }
    if weight_ub_eligible(ctx, outcome) {
        let (b_ub_n_step, b_ub_k_step) = weight_ub_steps(ctx, outcome);
        return UbSteps { b_ub_n_step, b_ub_k_step, ..Default::default() };
    }
    UbSteps::default()
}

/// Largest lattice value reached before the first one that overflows UB;
/// the smallest value when even it overflows.
fn walk_factors(total: u64, fits: impl FnMut(u64) -> bool) -> u64 {
    let lattice = comm_factors(total, total);
    if lattice.is_empty() {
        return 0;
    }
    lattice[walk_up(&lattice, 0, fits)]
}

fn dma_steps(ctx: &TilingContext, outcome: &TilingOutcome) -> (u64, u64) {
    let l1 = &outcome.l1;
    let plane = l1.ho_al1 * l1.wo_al1 * ctx.cube.k0 * ctx.fmap_bytes();
    let ub = ctx.platform.ub_size;
    let kw_ub = walk_factors(l1.kw_l1, |kw| plane * kw <= ub);
    let kh_ub = walk_factors(l1.kh_l1, |kh| plane * kh * kw_ub <= ub);
    debug!(kh_ub, kw_ub, "dma ub steps");
    (kh_ub, kw_ub)
}

fn c04_n_step(ctx: &TilingContext, outcome: &TilingOutcome) -> u64 {
    let CubeShape { k0, n0, .. } = ctx.cube;
    let s = &ctx.shape;
    let n_bl1 = outcome.l1.n_bl1;
    if n_bl1 < n0 {
        debug!(n_bl1, "C04 weight tile smaller than one block");
        return 0;
    }
    let full_k = align_up(s.org_kh * s.org_kw * C04_CIN_SIZE, k0);
    let budget = ctx.platform.ub_size.saturating_sub(VGATHER_REGISTER_SIZE);
    let n_max = budget / full_k / C04_VEC_USE_BUFF_NUM / ctx.weight_bytes() / n0 * n0;
    if outcome.db.pb_bl1 == 1 {
        return n_bl1.min(n_max);
    }
    let vec_num = match ctx.platform.soc_version {
        SocVersion::Ascend950 => VEC_NUM_PER_CUBE,
        _ => {
            debug!(soc = %ctx.platform.soc_version, "no vector count for this part");
            return 0;
        }
    };
    (ceil_div(n_bl1 / n0, vec_num) * n0).min(n_max)
}

fn weight_ub_bytes(ctx: &TilingContext, ci1: u64, co1: u64) -> u64 {
    let CubeShape { k0, n0, .. } = ctx.cube;
    ci1 * ctx.khkw() * k0 * co1 * n0 * WEIGHT_UB_BUFF_NUM * ctx.weight_bytes() + VGATHER_REGISTER_SIZE
}

fn weight_ub_eligible(ctx: &TilingContext, outcome: &TilingOutcome) -> bool {
    let CubeShape { k0, n0, .. } = ctx.cube;
    let s = &ctx.shape;
    let khkw = s.org_kh * s.org_kw;
    let weight = ctx.desc.weight;
    let half = matches!(weight.dtype, ConvDType::Float16 | ConvDType::BFloat16) || ctx.flags.hf32_enable;
    let size_ok = khkw * k0 * n0 * VEC_NUM_PER_CUBE * ctx.weight_bytes()
        <= ctx.platform.ub_size.saturating_sub(VGATHER_REGISTER_SIZE);
    ctx.config.weight_ub
        && !ctx.flags.extend_conv2d
        && ctx.attr.groups == 1
        && weight.format == ConvFormat::Nchw
        && half
        && khkw != 1
        && khkw % VGATHER_PERF_LIMIT != 0
        && outcome.l1.k_bl1 != align_up(s.org_ci, k0) * khkw
        && outcome.db.pb_bl1 == DOUBLE_BUFFER_NUM
        && size_ok
}

fn weight_ub_steps(ctx: &TilingContext, outcome: &TilingOutcome) -> (u64, u64) {
    let CubeShape { k0, n0, .. } = ctx.cube;
    let ub = ctx.platform.ub_size;
    let co1 = walk_factors(outcome.l1.n_bl1 / n0, |co1| weight_ub_bytes(ctx, 1, co1) <= ub);
    let ci1_total = outcome.l1.k_bl1 / ctx.khkw() / k0;
    let ci1 = walk_factors(ci1_total, |ci1| weight_ub_bytes(ctx, ci1, co1) <= ub);
    debug!(co1, ci1, "weight ub steps");
    (co1 * n0, ci1 * ctx.khkw() * k0)
}
