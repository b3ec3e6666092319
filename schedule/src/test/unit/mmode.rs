use cubetile_dtype::{ConvDType, ConvFormat};

use crate::config::{InnerBatchPolicy, PlannerConfig};
use crate::test::helpers::*;
use crate::{Error, TilingRecord};

fn pointwise() -> Conv {
    Conv::new(16, 8, 8, 16, 1, 0)
}

#[test]
#[tracing_test::traced_test]
fn small_problem_keeps_both_operands_resident() {
    let tiler = pointwise().m_tiler(default_platform());
    let mut record = TilingRecord::default();
    assert_eq!(tiler.get_tiling(&mut record), 0);

    assert!(record.al1_full_load);
    assert!(record.bl1_full_load);
    // Resident operands are never ping-ponged in L1.
    assert_eq!(record.p_buffer_flag & 0b011000, 0);
    assert_eq!(record.p_buffer_flag, 0b000100);
    assert_eq!((record.ho_l1, record.ho_l0), (64, 64));
    assert_eq!((record.k_al1, record.k_bl1, record.k_l0), (16, 16, 16));
    assert_eq!((record.n_bl1, record.n_l0, record.multi_n_bl1), (16, 16, 1));
    assert_eq!(record.iterate_mn_order, 0);
    assert_eq!(record.inner_batch, 1);
}

#[test]
#[tracing_test::traced_test]
fn tiny_l1_fails_with_status() {
    let platform = cubetile_device::PlatformInfo::builder().l1_size(1024).build();
    let tiler = Conv::new(64, 56, 56, 64, 3, 1).m_tiler(platform);

    let err = tiler.plan().unwrap_err();
    assert!(matches!(err, Error::L1Capacity { capacity: 1024, .. }), "{err}");

    let mut record = TilingRecord::default();
    assert_eq!(tiler.get_tiling(&mut record), -1);
    assert_eq!(record, TilingRecord::default());
}

#[test]
fn batches_fold_into_one_pass() {
    let conv = Conv { batch: 4, ..pointwise() };
    let record = conv.m_tiler(default_platform()).plan().unwrap();
    assert_eq!(record.inner_batch, 4);
    assert_eq!(record.single_core_batch, 4);
    assert_eq!(record.a_l1_space_size, 2048 * 4);
    assert!(record.al1_full_load);
}

#[test]
fn inner_batch_policy_disabled() {
    let conv = Conv { batch: 4, ..pointwise() };
    let mut tiler = conv.m_tiler(default_platform());
    tiler.set_config(PlannerConfig::builder().inner_batch(InnerBatchPolicy::Disabled).build());
    let record = tiler.plan().unwrap();
    assert_eq!(record.inner_batch, 1);
    assert_eq!(record.a_l1_space_size, 2048);
}

#[test]
fn bias_resident_when_it_fits() {
    let mut tiler = pointwise().m_tiler(default_platform());
    tiler.set_bias_type(ConvFormat::Nd, ConvDType::Float16);
    let record = tiler.plan().unwrap();
    assert!(record.has_bias);
    assert!(record.bias_full_load);
}

#[test]
fn standard_layer_divides_k() {
    let record = Conv::new(64, 56, 56, 64, 3, 1).m_tiler(default_platform()).plan().unwrap();
    assert_eq!(record.k_al1 % record.k_l0, 0);
    assert_eq!(record.k_bl1 % record.k_l0, 0);
    assert_eq!(record.k_l0 % 16, 0);
    assert_eq!(record.kernel_hxw, 9);
}
