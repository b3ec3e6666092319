use cubetile_device::PlatformInfo;

use crate::context::OutputOrder;
use crate::test::helpers::*;
use crate::Error;

fn resnet_block() -> Conv {
    Conv::new(64, 56, 56, 64, 3, 1)
}

#[test]
fn single_core_keeps_every_dim_at_one() {
    let platform = PlatformInfo::builder().aicore_num(1).build();
    let decision = resnet_block().m_tiler(platform).decide_block_dim().unwrap();
    assert_eq!(decision.split_mode, OutputOrder::M);
    assert_eq!(decision.block_dim(), 1);
}

#[test]
#[tracing_test::traced_test]
fn flattened_split_spreads_over_cores() {
    let decision = resnet_block().m_tiler(default_platform()).decide_block_dim().unwrap();
    assert_eq!(decision.split_mode, OutputOrder::M);
    assert!(decision.block_dim() > 1);
    assert!(decision.block_dim() <= 32);
    assert_eq!((decision.ho_dim, decision.wo_dim), (1, 1));
}

#[test]
fn large_batch_stays_within_cores() {
    let conv = Conv { batch: 128, ..resnet_block() };
    let decision = conv.m_tiler(default_platform()).decide_block_dim().unwrap();
    assert!(decision.block_dim() <= 32);
    assert!(decision.batch_dim >= 1);
}

#[test]
fn tiny_l1_falls_back_to_split_layout() {
    let platform = PlatformInfo::builder().l1_size(1024).build();
    let decision = resnet_block().m_tiler(platform).decide_block_dim().unwrap();
    assert_eq!(decision.split_mode, OutputOrder::Hw);
    assert_eq!(decision.m_dim, 1);
    assert!(decision.block_dim() <= 32);
}

#[test]
fn decision_is_deterministic() {
    let tiler = Conv { batch: 3, ..resnet_block() }.m_tiler(default_platform());
    assert_eq!(tiler.decide_block_dim().unwrap(), tiler.decide_block_dim().unwrap());
}

#[test]
fn empty_batch_is_rejected() {
    let conv = Conv { batch: 0, ..resnet_block() };
    let err = conv.m_tiler(default_platform()).decide_block_dim().unwrap_err();
    assert!(matches!(err, Error::InvalidShape { name: "batch", .. }), "{err}");
}
