use crate::TilingAlgorithm;
use crate::buffer::BufferModel;
use crate::test::helpers::*;
use crate::tiling::hwmode::HwTiling;

#[test]
#[tracing_test::traced_test]
fn small_problem_loads_whole_rows() {
    let record = Conv::new(16, 8, 8, 16, 1, 0).hw_tiler(default_platform()).plan().unwrap();
    assert_eq!((record.single_core_ho, record.single_core_wo), (8, 8));
    assert_eq!((record.ho_l1, record.wo_l1), (8, 16));
    assert_eq!((record.ho_l0, record.wo_l0), (8, 16));
    assert_eq!((record.k_l0, record.n_l0, record.n_bl1), (16, 16, 16));
    assert_eq!(record.p_buffer_flag, 0b000100);
    assert!(record.al1_full_load);
    assert!(record.bl1_full_load);
    assert_eq!(record.m_step, 128);
    assert_eq!(record.a_l1_space_size, 2048);
}

#[test]
fn standard_layer_respects_l0() {
    let tiler = Conv::new(64, 56, 56, 64, 3, 1).hw_tiler(default_platform());
    let ctx = validated(&tiler);
    let outcome = HwTiling::new(&ctx).process().unwrap();
    let (l0, l1) = (&outcome.l0, &outcome.l1);

    let buf = BufferModel::new(&ctx);
    assert!(buf.feasible(l0.ho_l0 * l0.wo_l0, l0.k_l0, l0.n_l0, &outcome.db));
    assert_eq!(l1.k_al1 % l0.k_l0, 0);
    assert_eq!(l1.k_bl1 % l0.k_l0, 0);
    assert!(l1.ho_al1 >= l0.ho_l0);
    assert!(l1.n_bl1 >= l0.n_l0);
    assert!(!ctx.is_dma);
}

#[test]
fn record_matches_variant_outcome() {
    let tiler = Conv::new(32, 28, 28, 48, 3, 1).hw_tiler(default_platform());
    let ctx = validated(&tiler);
    let outcome = HwTiling::new(&ctx).process().unwrap();
    let record = tiler.plan().unwrap();
    assert_eq!((record.ho_l1, record.wo_l1), (outcome.l1.ho_al1, outcome.l1.wo_al1));
    assert_eq!((record.ho_l0, record.wo_l0), (outcome.l0.ho_l0, outcome.l0.wo_l0));
    assert_eq!(record.p_buffer_flag, outcome.db.pbuffer_flag());
}
