use test_case::test_case;

use crate::driver::Conv2dTiler;
use crate::test::helpers::*;
use crate::tiling::IterateOrder;
use crate::{BasicBlockInfo, Error, TilingRecord};

fn info(
    batch: u64,
    f_dim: u64,
    n_dim: u64,
    (m_tile, n_tile): (u64, u64),
    (m_cut, n_cut): (u64, u64),
    m_in: u64,
) -> BasicBlockInfo {
    BasicBlockInfo {
        aicore_num: 32,
        f_dim,
        n_dim,
        group_dim: 1,
        batch,
        m_tile,
        n_tile,
        m_cut,
        n_cut,
        m_in,
        ..Default::default()
    }
}

/// 64 channels of 64x64 input, 3x3 kernel with 128 outputs, one batch per core.
fn wide_layer() -> Conv2dTiler {
    let mut tiler = Conv::new(64, 64, 64, 128, 3, 1).m_tiler(default_platform());
    tiler.set_single_output_shape_m(128, 1024, 1);
    tiler
}

#[test_case(3136, 64 => (1024, 64); "few channels")]
#[test_case(3136, 128 => (512, 128); "medium channels")]
#[test_case(64, 256 => (64, 1024); "tiny plane")]
#[test_case(100, 256 => (128, 512); "small plane")]
#[test_case(3136, 256 => (256, 256); "square")]
fn initial_tiles(howo: u64, cout: u64) -> (u64, u64) {
    BasicBlockInfo::initial_mn(howo, cout)
}

#[test]
#[tracing_test::traced_test]
fn core_binding_grows_m_tile_with_inner_batch() {
    let mut tiler = Conv::new(16, 32, 32, 80, 1, 0).m_tiler(default_platform());
    tiler.set_single_weight_shape(16, 1, 1).set_inner_batch(2);
    let mut bb = info(9, 8, 4, (512, 16), (2, 5), 1024);

    assert!(tiler.core_binding_decision(&mut bb));
    assert_eq!(bb.m_tile, 1024);
    assert_eq!(bb.m_cut, 1);
    assert_eq!(bb.f_active, 5);
    assert!(bb.f_active < bb.f_dim);
    assert_eq!(bb.n_tile, 16);
    assert_eq!(bb.n_active, 3);
    assert!(bb.n_active < bb.n_dim);
    assert!((bb.core_utilization - 15.0 / 32.0).abs() < 1e-6);
}

#[test]
#[tracing_test::traced_test]
fn core_binding_then_tiling() {
    let tiler = wide_layer();
    let mut bb = info(8, 32, 1, (512, 128), (8, 1), 768);

    assert!(tiler.core_binding_decision(&mut bb));
    assert_eq!((bb.m_tile, bb.n_tile, bb.m_in), (512, 128, 768));
    assert!(bb.k_al1_full_load && bb.k_bl1_full_load);
    assert_eq!(bb.iterate_order, IterateOrder::MFirst);
    assert_eq!((bb.f_active, bb.n_active), (32, 1));
    assert!((bb.core_utilization - 1.0).abs() < 1e-6);
    assert!(bb.l1_load_score > 5.0);

    bb.batch_dim = 8;
    bb.m_dim = 4;
    let mut record = TilingRecord::default();
    assert!(tiler.get_tiling_bb(&mut bb, &mut record));
    assert_eq!((record.ho_l1, record.ho_l0), (1024, 512));
    assert_eq!((record.k_al1, record.k_bl1, record.k_l0), (576, 576, 32));
    assert_eq!((record.n_bl1, record.n_l0), (128, 128));
    assert!(record.al1_full_load && record.bl1_full_load);
    assert_eq!(record.p_buffer_flag, 0b000011);
    assert_eq!(record.iterate_mn_order, 0);
    assert_eq!(record.inner_batch, 1);
    assert_eq!(bb.k_tile, 32);
}

#[test]
fn zero_dim_is_rejected() {
    let tiler = wide_layer();
    let mut bb = info(8, 0, 1, (512, 128), (8, 1), 768);
    assert!(!tiler.core_binding_decision(&mut bb));
    let err = tiler.try_core_binding_decision(&mut bb).unwrap_err();
    assert!(matches!(err, Error::InvalidBasicBlock { reason: "fDim" }), "{err}");
}

#[test]
fn invalid_order_is_rejected() {
    let tiler = wide_layer();
    let mut bb = info(8, 32, 1, (512, 128), (8, 1), 768);
    bb.batch_dim = 8;
    bb.m_dim = 4;
    bb.iterate_order = IterateOrder::Invalid;
    let mut record = TilingRecord::default();
    assert!(!tiler.get_tiling_bb(&mut bb, &mut record));
    assert_eq!(record, TilingRecord::default());
}

#[test]
fn too_few_blocks_for_the_cores() {
    let tiler = wide_layer();
    let mut bb = info(1, 32, 1, (512, 128), (8, 1), 768);
    let err = tiler.try_core_binding_decision(&mut bb).unwrap_err();
    assert!(matches!(err, Error::BasicBlockLimit { .. }), "{err}");
}
