//! Problem validation run before any search.
//!
//! Checks run in a fixed order and stop at the first failure: algorithm
//! applicability, attributes, shapes, format pair, type combination and
//! instruction limits. Validation also completes the context: output extents,
//! cube granularity and the datapath choice are filled in here.
//!
//! The basic-block entry points add their own L1 minimum, block limits and
//! [`BasicBlockInfo`] checks on top.

use snafu::{OptionExt, ensure};
use tracing::debug;

use cubetile_dtype::{C0_SIZE, ConvDType, ConvFormat, CubeShape, TypeCombo, is_supported};

use crate::context::{OutputOrder, RoundMode, TilingContext};
use crate::error::*;
use crate::math::{align_up, ceil_div, conv_out};
use crate::tiling::{BasicBlockInfo, IterateOrder, MAX_16_BIT_NUM, TilingOutcome};

pub const MAX_31_BIT_NUM: u64 = (1 << 31) - 1;
pub const MAX_32_BIT_NUM: u64 = (1 << 32) - 1;
pub const MAX_40_BIT_NUM: u64 = (1 << 40) - 1;

/// Load-3D addressing limits.
pub const LOAD3D_MAX_STRIDE: u64 = 63;
pub const LOAD3D_MAX_DILATION: u64 = 255;
pub const LOAD3D_MAX_PAD: u64 = 255;
pub const LOAD3D_MAX_KERNEL: u64 = 511;

/// Output elements of the smallest M tile the basic-block L1 check assumes.
pub const MIN_M_L1_SIZE: u64 = 512;

static SUPPORTED_FORMATS: &[(ConvFormat, ConvFormat)] = &[
    (ConvFormat::Nchw, ConvFormat::Nchw),
    (ConvFormat::Nhwc, ConvFormat::Hwcn),
    (ConvFormat::Nchw, ConvFormat::FractalZ),
    (ConvFormat::Nchw, ConvFormat::FractalZC04),
    (ConvFormat::Nhwc, ConvFormat::FractalZ),
    (ConvFormat::Nhwc, ConvFormat::FractalZC04),
];

/// Which set of checks a call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckScope {
    /// Everything, for a tiling run.
    Full,
    /// No per-core shape or quantization checks: the core partition is not
    /// known yet.
    BeforeCoreBind,
}

/// Runs the full check sequence and completes `ctx`.
#[tracing::instrument(skip_all, fields(scope = ?scope))]
pub fn check_params(ctx: &mut TilingContext, scope: CheckScope) -> Result<()> {
    check_algorithm_limit(ctx)?;
    check_attr(ctx, scope)?;
    check_shape(ctx, scope)?;
    check_format(ctx)?;
    check_dtype(ctx)?;
    check_instruction_limits(ctx)?;
    Ok(())
}

pub fn check_algorithm_limit(ctx: &TilingContext) -> Result<()> {
    ensure!(
        !(ctx.attr.groups > 1 && ctx.flags.c04),
        AlgorithmLimitSnafu { reason: "C04 mode does not support grouped convolution" }
    );
    Ok(())
}

fn check_attr(ctx: &TilingContext, scope: CheckScope) -> Result<()> {
    let a = &ctx.attr;
    for (name, value) in
        [("padTop", a.pad_top), ("padBottom", a.pad_bottom), ("padLeft", a.pad_left), ("padRight", a.pad_right)]
    {
        ensure!(value >= 0, InvalidAttrSnafu { name, value });
    }
    for (name, value) in
        [("strideH", a.stride_h), ("strideW", a.stride_w), ("dilationH", a.dilation_h), ("dilationW", a.dilation_w)]
    {
        ensure!(value > 0, InvalidAttrSnafu { name, value });
    }
    if scope == CheckScope::Full {
        check_quant_attr(ctx)?;
    }
    ensure!(a.groups > 0, InvalidAttrSnafu { name: "groups", value: a.groups });
    if ctx.flags.opt_group {
        ensure!(ctx.shape.enlarge > 0, InvalidAttrSnafu { name: "enlarge", value: 0i64 });
    }
    Ok(())
}

/// 8-bit float feature maps carry a fixed rounding mode and no offset.
fn check_quant_attr(ctx: &TilingContext) -> Result<()> {
    let fmap = ctx.desc.fmap.dtype;
    if !fmap.is_float8() {
        return Ok(());
    }
    ensure!(ctx.attr.offset_x == 0, InvalidQuantAttrSnafu { reason: "offset_x must be 0 for 8-bit float input" });
    let expected = if fmap == ConvDType::HiFloat8 { RoundMode::Round } else { RoundMode::Rint };
    ensure!(
        ctx.attr.round_mode == expected,
        InvalidQuantAttrSnafu {
            reason: if fmap == ConvDType::HiFloat8 {
                "HiFloat8 input requires round mode Round"
            } else {
                "Float8E4M3 input requires round mode Rint"
            }
        }
    );
    Ok(())
}

fn in_31_bit(name: &'static str, value: u64) -> Result<()> {
    ensure!(value > 0 && value <= MAX_31_BIT_NUM, InvalidShapeSnafu { name, value });
    Ok(())
}

fn check_shape(ctx: &mut TilingContext, scope: CheckScope) -> Result<()> {
    let s = &ctx.shape;
    if scope == CheckScope::Full {
        match ctx.order {
            OutputOrder::Hw => {
                ensure!(s.single_ho > 0, InvalidShapeSnafu { name: "singleHo", value: s.single_ho });
                ensure!(s.single_wo > 0, InvalidShapeSnafu { name: "singleWo", value: s.single_wo });
            }
            OutputOrder::M => ensure!(s.single_m > 0, InvalidShapeSnafu { name: "singleM", value: s.single_m }),
        }
    }
    check_fmap_shape(ctx)?;

    let s = &ctx.shape;
    if scope == CheckScope::Full {
        in_31_bit("singleCo", s.single_co)?;
    }
    in_31_bit("kW", s.org_kw)?;
    in_31_bit("kH", s.org_kh)?;
    in_31_bit("orgCo", s.org_co)?;
    ensure!(s.single_kw == s.org_kw, InvalidShapeSnafu { name: "singlekW", value: s.single_kw });
    ensure!(s.single_kh == s.org_kh, InvalidShapeSnafu { name: "singlekH", value: s.single_kh });
    Ok(())
}

/// Input extents, group consistency and the derived output extents.
fn check_fmap_shape(ctx: &mut TilingContext) -> Result<()> {
    let s = &ctx.shape;
    ensure!(s.org_hi > 0, InvalidShapeSnafu { name: "orgHi", value: s.org_hi });
    ensure!(s.org_wi > 0, InvalidShapeSnafu { name: "orgWi", value: s.org_wi });
    in_31_bit("orgCi", s.org_ci)?;

    let ci_per_group = if ctx.flags.opt_group { s.single_ci / s.enlarge.max(1) } else { s.single_ci };
    ensure!(
        ci_per_group * ctx.attr.group_count() == s.org_ci,
        InvalidShapeSnafu { name: "singleCi", value: s.single_ci }
    );

    let a = &ctx.attr;
    let [top, bottom, left, right] = a.pads();
    let org_ho = conv_out(s.org_hi, top, bottom, s.org_kh, a.sh(), a.dh())
        .context(InvalidShapeSnafu { name: "orgHo", value: 0u64 })?;
    let org_wo = conv_out(s.org_wi, left, right, s.org_kw, a.sw(), a.dw())
        .context(InvalidShapeSnafu { name: "orgWo", value: 0u64 })?;
    debug!(org_ho, org_wo, "output extents");
    ctx.shape.org_ho = org_ho;
    ctx.shape.org_wo = org_wo;
    Ok(())
}

pub fn check_format(ctx: &TilingContext) -> Result<()> {
    let pair = (ctx.desc.fmap.format, ctx.desc.weight.format);
    ensure!(SUPPORTED_FORMATS.contains(&pair), UnsupportedFormatSnafu { fmap: pair.0, weight: pair.1 });
    Ok(())
}

pub fn check_dtype(ctx: &TilingContext) -> Result<()> {
    let d = &ctx.desc;
    let combo = TypeCombo {
        fmap: d.fmap.dtype,
        weight: d.weight.dtype,
        bias: if ctx.flags.has_bias { d.bias.map(|b| b.dtype) } else { None },
        output: d.output.dtype,
    };
    let quant = d.fmap.dtype.bytes() == 1;
    ensure!(
        is_supported(combo, quant),
        UnsupportedDTypeSnafu { fmap: combo.fmap, weight: combo.weight, bias: combo.bias, output: combo.output }
    );
    Ok(())
}

/// Load-3D addressing limits of the attributes and kernel.
pub fn load3d_fits(ctx: &TilingContext) -> bool {
    let a = &ctx.attr;
    let s = &ctx.shape;
    let fits = a.sh() <= LOAD3D_MAX_STRIDE
        && a.sw() <= LOAD3D_MAX_STRIDE
        && a.dh() <= LOAD3D_MAX_DILATION
        && a.dw() <= LOAD3D_MAX_DILATION
        && a.pads().iter().all(|&p| p <= LOAD3D_MAX_PAD)
        && s.org_kh <= LOAD3D_MAX_KERNEL
        && s.org_kw <= LOAD3D_MAX_KERNEL
        && s.org_kh * s.org_kw * ctx.cube.k0 <= MAX_16_BIT_NUM;
    if !fits {
        debug!(stride_h = a.sh(), stride_w = a.sw(), kh = s.org_kh, kw = s.org_kw, "load-3D limits exceeded");
    }
    fits
}

/// Bytes one n0 by k0 slice of the whole kernel window needs in L1, with
/// the smallest output row block.
pub fn kernel_full_load_min_l1(ctx: &TilingContext) -> u64 {
    let CubeShape { m0, k0, n0 } = ctx.cube;
    let s = &ctx.shape;
    let bias = if ctx.flags.has_bias { align_up(n0 * ctx.bias_bytes(), C0_SIZE) } else { 0 };
    let scale = align_up(ctx.fixp_l1(n0), C0_SIZE);
    let weight = align_up(k0 * s.org_kh * s.org_kw * n0 * ctx.weight_bytes(), C0_SIZE);
    let ho_min = if s.org_wo < m0 { ceil_div(m0, s.org_wo) } else { 1 };
    let hi_min = ctx.infer_hi_l1(ho_min);
    let wi_min = ctx.infer_wi_l1(m0);
    let fmap = align_up(hi_min * wi_min * k0 * ctx.fmap_bytes(), C0_SIZE) * ctx.preset_inner_batch();
    bias + scale + weight + fmap
}

fn check_dma_limits(ctx: &TilingContext) -> Result<()> {
    let s = &ctx.shape;
    ensure!(
        s.org_kh * s.org_kw <= MAX_16_BIT_NUM,
        InstructionLimitSnafu { reason: "kernel window too large for the DMA datapath" }
    );
    let a = &ctx.attr;
    let attrs = [a.pad_top, a.pad_bottom, a.pad_left, a.pad_right, a.stride_h, a.stride_w, a.dilation_h, a.dilation_w];
    ensure!(
        attrs.iter().all(|&v| i32::try_from(v).is_ok()),
        InstructionLimitSnafu { reason: "attribute not representable for the DMA datapath" }
    );
    Ok(())
}

/// Datapath choice, then the data-copy and fixpipe stride limits.
pub fn check_instruction_limits(ctx: &mut TilingContext) -> Result<()> {
    ctx.cube = CubeShape::for_fmap(ctx.desc.fmap.dtype);
    let min_l1 = kernel_full_load_min_l1(ctx);
    if !load3d_fits(ctx) || min_l1 > ctx.platform.l1_size {
        debug!(min_l1, l1 = ctx.platform.l1_size, "falling back to the DMA datapath");
        check_dma_limits(ctx)?;
        ctx.is_dma = true;
    }

    let s = &ctx.shape;
    let fmap_format = ctx.desc.fmap.format;
    if fmap_format == ConvFormat::Nchw {
        let stride = s
            .org_hi
            .checked_mul(s.org_wi)
            .and_then(|v| v.checked_mul(ctx.fmap_bytes()))
            .context(SizeOverflowSnafu { what: "data copy source stride" })?;
        ensure!(stride <= MAX_40_BIT_NUM, InstructionLimitSnafu { reason: "Hi*Wi*bytes exceeds the data copy stride" });
        let out = s.org_ho.checked_mul(s.org_wo).context(SizeOverflowSnafu { what: "fixpipe loop2 stride" })?;
        ensure!(out <= MAX_32_BIT_NUM, InstructionLimitSnafu { reason: "Ho*Wo exceeds the fixpipe stride" });
    }
    if fmap_format == ConvFormat::Nhwc && ctx.order == OutputOrder::Hw {
        let out = s.org_wo.checked_mul(s.org_co).context(SizeOverflowSnafu { what: "fixpipe loop3 stride" })?;
        ensure!(out <= MAX_32_BIT_NUM, InstructionLimitSnafu { reason: "Wo*Co exceeds the fixpipe stride" });
    }
    Ok(())
}

/// L1 minimum of the basic-block layout: a 512-element M tile, the whole
/// kernel for one n0 by k0 block, bias and scale.
pub fn check_l1_size_limit(ctx: &TilingContext) -> Result<()> {
    let CubeShape { k0, n0, .. } = ctx.cube;
    let s = &ctx.shape;
    let bias = if ctx.flags.has_bias { align_up(n0 * ctx.bias_bytes(), C0_SIZE) } else { 0 };
    let scale = if ctx.flags.has_scale {
        (ctx.fixpipe.channel_wise_coeff as f64 * (n0 * ctx.scale_dtype_bytes()) as f64) as u64
    } else {
        0
    };
    let weight = s.org_kh * s.org_kw * n0 * k0 * ctx.weight_bytes();
    let ho_min = (MIN_M_L1_SIZE / s.org_wo.max(1) + 2).min(s.org_ho);
    let hi_min = ctx.infer_hi_l1(ho_min);
    let fmap = hi_min * s.org_wi * k0 * ctx.fmap_bytes() * ctx.preset_inner_batch();
    let required = fmap + weight + bias + scale;
    debug!(required, l1 = ctx.platform.l1_size, "basic block L1 minimum");
    ensure!(required <= ctx.platform.l1_size, L1CapacitySnafu { required, capacity: ctx.platform.l1_size });
    Ok(())
}

/// Core binding inputs must be non-zero.
pub fn check_bind_info(info: &BasicBlockInfo) -> Result<()> {
    let fields = [
        ("fDim", info.f_dim),
        ("nDim", info.n_dim),
        ("groupDim", info.group_dim),
        ("aicoreNum", info.aicore_num),
        ("mIn", info.m_in),
        ("mTile", info.m_tile),
        ("nTile", info.n_tile),
        ("mCut", info.m_cut),
        ("nCut", info.n_cut),
        ("batch", info.batch),
    ];
    non_zero(&fields)
}

/// Tiling inputs must be non-zero and carry a valid order.
pub fn check_tiling_info(info: &BasicBlockInfo) -> Result<()> {
    let fields = [
        ("batchDim", info.batch_dim),
        ("mDim", info.m_dim),
        ("nDim", info.n_dim),
        ("mTile", info.m_tile),
        ("nTile", info.n_tile),
        ("mIn", info.m_in),
    ];
    non_zero(&fields)?;
    ensure!(info.iterate_order != IterateOrder::Invalid, InvalidBasicBlockSnafu { reason: "iterate order is invalid" });
    Ok(())
}

fn non_zero(fields: &[(&'static str, u64)]) -> Result<()> {
    if let Some((name, _)) = fields.iter().find(|(_, v)| *v == 0) {
        debug!(field = name, "basic block field is zero");
        return InvalidBasicBlockSnafu { reason: *name }.fail();
    }
    Ok(())
}

/// Whether the problem is large enough, and L1 roomy enough, for basic-block
/// tiling.
pub fn check_bb_limits(ctx: &TilingContext, info: &BasicBlockInfo) -> Result<()> {
    let s = &ctx.shape;
    let CubeShape { m0, k0, n0 } = ctx.cube;
    let groups = ctx.effective_groups();
    let inner_batch = ctx.preset_inner_batch();
    let hw_out = s.org_wo * s.org_ho;
    let n_blocks = ceil_div(s.org_co, info.n_tile);

    if inner_batch > 1 {
        let f_blocks = ceil_div(ceil_div(info.batch * ceil_div(hw_out, m0) * m0, info.m_tile), inner_batch);
        ensure!(
            !(f_blocks * n_blocks * groups <= info.aicore_num && ceil_div(info.batch, info.aicore_num) == 1),
            BasicBlockLimitSnafu { reason: "too few blocks to occupy the cores" }
        );
    } else {
        let blocks = ceil_div(hw_out, info.m_tile) * n_blocks * info.batch * groups;
        ensure!(blocks > info.aicore_num, BasicBlockLimitSnafu { reason: "too few blocks to occupy the cores" });
    }

    let bias = if ctx.flags.has_bias { (ctx.bias_bytes() * info.n_tile) as i64 } else { 0 };
    let scale = if ctx.flags.has_scale {
        (ctx.fixpipe.channel_wise_coeff as f64 * (ctx.scale_dtype_bytes() * info.n_tile) as f64) as i64
    } else {
        0
    };
    let available = ctx.platform.l1_size as i64 - bias - scale;
    let max_hi_wi = available / ctx.fmap_bytes() as i64 / 2 / k0 as i64 / inner_batch as i64;
    ensure!(max_hi_wi > 0, BasicBlockLimitSnafu { reason: "no L1 left for the feature map" });
    let max_hi = max_hi_wi / s.org_wi as i64;
    ensure!(max_hi > 2, BasicBlockLimitSnafu { reason: "fewer than three input rows fit L1" });
    ensure!(
        info.m_tile >= m0 && info.n_tile >= n0,
        BasicBlockLimitSnafu { reason: "tile smaller than one cube block" }
    );
    Ok(())
}

/// Rejects zero tiles and kL0 values that do not divide the L1 K extents.
pub fn check_tiling_result(ctx: &TilingContext, outcome: &TilingOutcome) -> Result<()> {
    let l0 = &outcome.l0;
    let l1 = &outcome.l1;
    let spatial: [(&'static str, u64); 2] = match ctx.order {
        OutputOrder::M => [("mAL1", l1.m_al1), ("mL0", l0.m_l0)],
        OutputOrder::Hw => [("hoL1", l1.ho_al1.min(l1.wo_al1)), ("hoL0", l0.ho_l0.min(l0.wo_l0))],
    };
    let tiles = [("kAL1", l1.k_al1), ("kBL1", l1.k_bl1), ("nBL1", l1.n_bl1), ("kL0", l0.k_l0), ("nL0", l0.n_l0)];
    if let Some((name, _)) = spatial.iter().chain(tiles.iter()).find(|(_, v)| *v == 0) {
        debug!(tile = name, "zero tile size");
        return InvalidTilingResultSnafu { reason: "zero tile size" }.fail();
    }
    ensure!(l1.k_al1 % l0.k_l0 == 0, InvalidTilingResultSnafu { reason: "kL0 does not divide kAL1" });
    ensure!(l1.k_bl1 % l0.k_l0 == 0, InvalidTilingResultSnafu { reason: "kL0 does not divide kBL1" });
    Ok(())
}
