use test_case::test_case;

use cubetile_device::PlatformInfo;
use cubetile_dtype::ConvDType;

use crate::test::helpers::*;
use crate::{Error, OptGroupInfo, OriGroupInfo, TilingRecord};

#[test]
#[tracing_test::traced_test]
fn grouped_c04_is_rejected() {
    let mut tiler = Conv::new(32, 16, 16, 32, 3, 1).m_tiler(default_platform());
    tiler.set_groups(2).set_single_weight_shape(16, 3, 3).set_c04(true);

    let err = tiler.plan().unwrap_err();
    assert!(matches!(err, Error::AlgorithmLimit { .. }), "{err}");

    let mut record = TilingRecord::default();
    assert_eq!(tiler.get_tiling(&mut record), -1);
    assert_eq!(record, TilingRecord::default());
}

#[test]
fn status_code_matches_plan() {
    let tiler = Conv::new(64, 56, 56, 64, 3, 1).m_tiler(default_platform());
    let mut record = TilingRecord::default();
    assert_eq!(tiler.get_tiling(&mut record), 0);
    assert_eq!(record, tiler.plan().unwrap());
}

#[test]
fn invalid_platform_is_reported() {
    let platform = PlatformInfo::builder().aicore_num(0).build();
    let err = Conv::new(16, 8, 8, 16, 1, 0).m_tiler(platform).plan().unwrap_err();
    assert!(matches!(err, Error::Platform { .. }), "{err}");
}

#[test]
fn inner_batch_setter_clamps_zero() {
    let mut tiler = Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform());
    tiler.set_inner_batch(0);
    assert_eq!(tiler.flags().inner_batch, 1);
}

#[test]
fn setters_do_not_validate() {
    let mut tiler = Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform());
    tiler.set_padding(-1, 0, 0, 0).set_stride(0, 0);
    assert_eq!(tiler.attr().pad_top, -1);
    assert!(tiler.plan().is_err());
}

#[test_case(8, 4, 4 => (4, 2, 16, 16); "folds to one block")]
#[test_case(3, 4, 4 => (3, 1, 12, 12); "capped by groups")]
#[test_case(4, 16, 16 => (1, 4, 16, 16); "already aligned")]
#[test_case(6, 8, 4 => (4, 2, 32, 16); "both sides fill whole blocks")]
#[test_case(12, 8, 2 => (8, 2, 64, 16); "factors combine by lcm")]
fn opt_group(groups: i64, ci_per_group: i64, co_per_group: i64) -> (u64, u64, u64, u64) {
    let tiler = Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform());
    let OptGroupInfo { enlarge, group_opt, cin_opt, cout_opt } = tiler
        .calc_opt_group_params(OriGroupInfo { groups, ci_per_group, co_per_group, weight_dtype: ConvDType::Float16 })
        .unwrap();
    (enlarge, group_opt, cin_opt, cout_opt)
}

#[test_case(0, 4, 4, "groups")]
#[test_case(2, 0, 4, "ciPerGroup")]
#[test_case(2, 4, -1, "coPerGroup")]
fn opt_group_rejects(groups: i64, ci_per_group: i64, co_per_group: i64, field: &str) {
    let tiler = Conv::new(16, 8, 8, 16, 1, 0).m_tiler(default_platform());
    let err = tiler
        .calc_opt_group_params(OriGroupInfo { groups, ci_per_group, co_per_group, weight_dtype: ConvDType::Float16 })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAttr { name, .. } if name == field), "{err}");
}
