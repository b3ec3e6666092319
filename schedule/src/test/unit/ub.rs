use cubetile_device::PlatformInfo;

use crate::context::TilingContext;
use crate::test::helpers::*;
use crate::tiling::{DoubleBuffer, L1TilingRes, TilingOutcome};
use crate::ub::{UbSteps, ub_steps};

fn context(platform: PlatformInfo) -> TilingContext {
    validated(&Conv::new(64, 56, 56, 64, 3, 1).m_tiler(platform))
}

fn outcome(l1: L1TilingRes, pb_bl1: u64) -> TilingOutcome {
    TilingOutcome { l1, db: DoubleBuffer { pb_bl1, ..Default::default() }, inner_batch: 1, ..Default::default() }
}

fn weight_tile() -> L1TilingRes {
    L1TilingRes { k_al1: 144, k_bl1: 144, m_al1: 256, n_bl1: 64, ..Default::default() }
}

#[test]
fn weight_staged_through_ub() {
    let ctx = context(default_platform());
    let steps = ub_steps(&ctx, &outcome(weight_tile(), 2));
    assert_eq!(steps, UbSteps { b_ub_n_step: 64, b_ub_k_step: 144, ..Default::default() });
}

#[test]
fn weight_staging_needs_double_buffered_weight() {
    let ctx = context(default_platform());
    assert_eq!(ub_steps(&ctx, &outcome(weight_tile(), 1)), UbSteps::default());
}

#[test]
fn weight_staging_can_be_disabled() {
    let mut ctx = context(default_platform());
    ctx.config.weight_ub = false;
    assert_eq!(ub_steps(&ctx, &outcome(weight_tile(), 2)), UbSteps::default());
}

#[test]
fn dma_kernel_window_steps() {
    let mut ctx = context(default_platform());
    ctx.is_dma = true;
    let l1 = L1TilingRes { ho_al1: 2, wo_al1: 16, kh_l1: 3, kw_l1: 3, ..weight_tile() };
    let steps = ub_steps(&ctx, &outcome(l1, 2));
    assert_eq!((steps.kh_ub, steps.kw_ub), (3, 3));
    assert_eq!((steps.b_ub_n_step, steps.b_ub_k_step), (0, 0));

    // One 2x16 plane is 1 KiB; a 2 KiB UB holds neither three columns nor three rows.
    ctx.platform.ub_size = 2048;
    let steps = ub_steps(&ctx, &outcome(l1, 2));
    assert_eq!((steps.kh_ub, steps.kw_ub), (1, 1));
}

#[test]
fn c04_weight_steps() {
    let mut ctx = context(default_platform());
    ctx.flags.c04 = true;
    assert_eq!(ub_steps(&ctx, &outcome(weight_tile(), 1)).b_ub_n_step, 64);
    // Double buffered: the tile is split over the vector cores.
    assert_eq!(ub_steps(&ctx, &outcome(weight_tile(), 2)).b_ub_n_step, 32);
    let narrow = L1TilingRes { n_bl1: 8, ..weight_tile() };
    assert_eq!(ub_steps(&ctx, &outcome(narrow, 2)), UbSteps::default());
}
