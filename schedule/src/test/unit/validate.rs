use cubetile_device::PlatformInfo;
use cubetile_dtype::{ConvDType, ConvFormat};

use crate::context::{RoundMode, TilingContext};
use crate::driver::Conv2dTiler;
use crate::test::helpers::*;
use crate::tiling::{BasicBlockInfo, L0TilingRes, L1TilingRes, TilingOutcome};
use crate::validate::{self, CheckScope};
use crate::{Error, Result};

fn layer() -> Conv2dTiler {
    Conv::new(64, 56, 56, 64, 3, 1).m_tiler(default_platform())
}

fn check(tiler: &Conv2dTiler, scope: CheckScope) -> Result<TilingContext> {
    let mut ctx = tiler.build_context()?;
    validate::check_params(&mut ctx, scope)?;
    Ok(ctx)
}

#[test]
fn valid_layer_completes_the_context() {
    let ctx = check(&layer(), CheckScope::Full).unwrap();
    assert_eq!((ctx.shape.org_ho, ctx.shape.org_wo), (56, 56));
    assert_eq!((ctx.cube.m0, ctx.cube.k0, ctx.cube.n0), (16, 16, 16));
    assert!(!ctx.is_dma);
}

#[test]
fn negative_pad_is_rejected() {
    let mut tiler = layer();
    tiler.set_padding(-1, 0, 0, 0);
    let err = check(&tiler, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::InvalidAttr { name: "padTop", value: -1 }), "{err}");
}

#[test]
fn zero_stride_is_rejected() {
    let mut tiler = layer();
    tiler.set_stride(0, 1);
    let err = check(&tiler, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::InvalidAttr { name: "strideH", .. }), "{err}");
}

#[test]
fn group_channels_must_add_up() {
    let mut tiler = layer();
    tiler.set_groups(2);
    let err = check(&tiler, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::InvalidShape { name: "singleCi", .. }), "{err}");
}

#[test]
fn kernel_larger_than_padded_input() {
    let tiler = Conv::new(16, 2, 2, 16, 3, 0).m_tiler(default_platform());
    let err = check(&tiler, CheckScope::BeforeCoreBind).unwrap_err();
    assert!(matches!(err, Error::InvalidShape { name: "orgHo", .. }), "{err}");
}

#[test]
fn single_kernel_must_match() {
    let mut tiler = layer();
    tiler.set_single_weight_shape(64, 1, 3);
    let err = check(&tiler, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::InvalidShape { name: "singlekH", .. }), "{err}");
}

#[test]
fn empty_core_slice_only_fails_a_full_check() {
    let mut tiler = layer();
    tiler.set_single_output_shape_m(64, 0, 1);
    let err = check(&tiler, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::InvalidShape { name: "singleM", .. }), "{err}");
    assert!(check(&tiler, CheckScope::BeforeCoreBind).is_ok());
}

#[test]
fn unsupported_format_pair() {
    let mut tiler = layer();
    tiler.set_weight_type(ConvFormat::Hwcn, ConvDType::Float16);
    let err = check(&tiler, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat { .. }), "{err}");
}

#[test]
fn mixed_float_types() {
    let mut tiler = layer();
    tiler.set_weight_type(ConvFormat::Nchw, ConvDType::BFloat16);
    let err = check(&tiler, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDType { .. }), "{err}");
}

fn hifloat8() -> Conv2dTiler {
    let mut tiler = layer();
    tiler
        .set_fmap_type(ConvFormat::Nchw, ConvDType::HiFloat8)
        .set_weight_type(ConvFormat::Nchw, ConvDType::HiFloat8)
        .set_output_type(ConvFormat::Nchw, ConvDType::Float16)
        .set_round_mode(RoundMode::Round);
    tiler
}

#[test]
fn float8_quant_attributes() {
    let ctx = check(&hifloat8(), CheckScope::Full).unwrap();
    assert_eq!(ctx.cube.k0, 32);

    let mut offset = hifloat8();
    offset.set_offset_x(3);
    let err = check(&offset, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::InvalidQuantAttr { .. }), "{err}");
    assert!(check(&offset, CheckScope::BeforeCoreBind).is_ok());

    let mut rint = hifloat8();
    rint.set_round_mode(RoundMode::Rint);
    let err = check(&rint, CheckScope::Full).unwrap_err();
    assert!(matches!(err, Error::InvalidQuantAttr { .. }), "{err}");
}

#[test]
fn tiny_l1_switches_to_dma() {
    let tiler = Conv::new(64, 56, 56, 64, 3, 1).m_tiler(PlatformInfo::builder().l1_size(1024).build());
    let ctx = check(&tiler, CheckScope::Full).unwrap();
    assert!(ctx.is_dma);
    let err = validate::check_l1_size_limit(&ctx).unwrap_err();
    assert!(matches!(err, Error::L1Capacity { capacity: 1024, .. }), "{err}");
}

#[test]
fn tiling_result_checks() {
    let ctx = validated(&layer());
    let l1 = L1TilingRes { k_al1: 48, k_bl1: 96, m_al1: 64, n_bl1: 16, ..Default::default() };
    let l0 = L0TilingRes { m_l0: 64, k_l0: 16, n_l0: 16, ..Default::default() };
    let outcome = TilingOutcome { l0, l1, inner_batch: 1, ..Default::default() };
    assert!(validate::check_tiling_result(&ctx, &outcome).is_ok());

    let zero = TilingOutcome { l0: L0TilingRes { k_l0: 0, ..l0 }, ..outcome };
    let err = validate::check_tiling_result(&ctx, &zero).unwrap_err();
    assert!(matches!(err, Error::InvalidTilingResult { .. }), "{err}");

    let uneven = TilingOutcome { l0: L0TilingRes { k_l0: 32, ..l0 }, ..outcome };
    let err = validate::check_tiling_result(&ctx, &uneven).unwrap_err();
    assert!(matches!(err, Error::InvalidTilingResult { .. }), "{err}");
}

#[test]
fn bind_info_fields_must_be_set() {
    let info = BasicBlockInfo {
        aicore_num: 32,
        f_dim: 8,
        n_dim: 4,
        group_dim: 1,
        batch: 2,
        m_tile: 512,
        n_tile: 64,
        m_cut: 2,
        n_cut: 0,
        m_in: 768,
        ..Default::default()
    };
    let err = validate::check_bind_info(&info).unwrap_err();
    assert!(matches!(err, Error::InvalidBasicBlock { reason: "nCut" }), "{err}");
    assert!(validate::check_bind_info(&BasicBlockInfo { n_cut: 1, ..info }).is_ok());
}
