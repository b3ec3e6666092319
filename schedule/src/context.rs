//! Problem description a tiling run works on.
//!
//! [`TilingContext`] is built fresh for every planning call from the setter
//! state of [`crate::Conv2dTiler`], completed by validation (output extents,
//! cube granularity, datapath choice, 5HD channel counts) and then borrowed
//! immutably by whichever variant runs.

use cubetile_device::PlatformInfo;
use cubetile_dtype::{ConvDType, ConvFormat, CubeShape};

use crate::config::PlannerConfig;
use crate::math::{ceil_div, infer_in_l1, kernel_dilated};

/// Bytes of one fixpipe parameter element.
pub const FP16_DTYPE_SIZE: u64 = 2;
/// Accumulator element width.
pub const MAD_DTYPE_SIZE: u64 = 4;
/// Input channels per C04 block.
pub const C04_CIN_SIZE: u64 = 4;

/// Output layout the variant iterates over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OutputOrder {
    /// Output height and width flattened into one axis.
    #[default]
    M,
    /// Output height and width tiled independently.
    Hw,
}

/// Rounding applied when the output is requantized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RoundMode {
    #[default]
    Unset,
    Rint,
    Round,
    Floor,
    Ceil,
    Trunc,
    Odd,
}

/// Full problem extents (`org_*`) and the slice one core works on (`single_*`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShapeInfo {
    /// Whole batch, read by the core partition decision only.
    pub org_batch: u64,
    pub org_ci: u64,
    pub org_hi: u64,
    pub org_wi: u64,
    pub org_co: u64,
    pub org_kh: u64,
    pub org_kw: u64,
    /// Derived during validation.
    pub org_ho: u64,
    /// Derived during validation.
    pub org_wo: u64,

    pub single_ci: u64,
    pub single_kh: u64,
    pub single_kw: u64,
    pub single_co: u64,
    pub single_ho: u64,
    pub single_wo: u64,
    pub single_m: u64,
    pub single_batch: u64,

    pub single_ci1: u64,
    pub single_co1: u64,
    pub single_m1: u64,

    pub enlarge: u64,
    pub single_groups: u64,
    pub single_group_opt: u64,
}

/// Raw convolution attributes as the caller set them.
///
/// Signed so that validation can reject negative values instead of the
/// setter silently wrapping them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttrInfo {
    pub pad_top: i64,
    pub pad_bottom: i64,
    pub pad_left: i64,
    pub pad_right: i64,
    pub stride_h: i64,
    pub stride_w: i64,
    pub dilation_h: i64,
    pub dilation_w: i64,
    pub groups: i64,
    pub offset_x: i64,
    pub round_mode: RoundMode,
}

impl Default for AttrInfo {
    fn default() -> Self {
        Self {
            pad_top: 0,
            pad_bottom: 0,
            pad_left: 0,
            pad_right: 0,
            stride_h: 1,
            stride_w: 1,
            dilation_h: 1,
            dilation_w: 1,
            groups: 1,
            offset_x: 0,
            round_mode: RoundMode::Unset,
        }
    }
}

fn non_negative(v: i64) -> u64 {
    v.max(0) as u64
}

impl AttrInfo {
    pub fn sh(&self) -> u64 {
        non_negative(self.stride_h)
    }
    pub fn sw(&self) -> u64 {
        non_negative(self.stride_w)
    }
    pub fn dh(&self) -> u64 {
        non_negative(self.dilation_h)
    }
    pub fn dw(&self) -> u64 {
        non_negative(self.dilation_w)
    }
    pub fn pads(&self) -> [u64; 4] {
        [self.pad_top, self.pad_bottom, self.pad_left, self.pad_right].map(non_negative)
    }
    pub fn group_count(&self) -> u64 {
        non_negative(self.groups)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TensorDesc {
    pub format: ConvFormat,
    pub dtype: ConvDType,
}

impl TensorDesc {
    pub const fn new(format: ConvFormat, dtype: ConvDType) -> Self {
        Self { format, dtype }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DescInfo {
    pub fmap: TensorDesc,
    pub weight: TensorDesc,
    pub bias: Option<TensorDesc>,
    pub output: TensorDesc,
    pub quant_scale: Option<ConvDType>,
}

impl Default for DescInfo {
    fn default() -> Self {
        let fp16 = TensorDesc::new(ConvFormat::Nchw, ConvDType::Float16);
        Self { fmap: fp16, weight: fp16, bias: None, output: fp16, quant_scale: None }
    }
}

/// Fixpipe post-processing parameters carried through to the record.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixpipeInfo {
    /// Fixpipe parameters per output channel; zero without a quant scale.
    pub channel_wise_coeff: f32,
    pub quant_mode: [u8; 2],
    pub relu_mode: [u8; 2],
    pub clip_mode: [u8; 2],
    pub dual_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvFlags {
    pub c04: bool,
    pub hf32_enable: bool,
    pub hf32_trans_mode: bool,
    pub has_bias: bool,
    pub has_scale: bool,
    pub opt_group: bool,
    pub scale_bias_in_ub: bool,
    pub extend_conv2d: bool,
    /// Batches folded into one basic block pass.
    pub inner_batch: u64,
}

impl Default for ConvFlags {
    fn default() -> Self {
        Self {
            c04: false,
            hf32_enable: false,
            hf32_trans_mode: false,
            has_bias: false,
            has_scale: false,
            opt_group: false,
            scale_bias_in_ub: false,
            extend_conv2d: false,
            inner_batch: 1,
        }
    }
}

/// Everything a variant reads. Immutable once validation completed it.
#[derive(Debug, Clone)]
pub struct TilingContext {
    pub shape: ShapeInfo,
    pub attr: AttrInfo,
    pub desc: DescInfo,
    pub fixpipe: FixpipeInfo,
    pub flags: ConvFlags,
    pub platform: PlatformInfo,
    pub config: PlannerConfig,
    pub order: OutputOrder,
    pub cube: CubeShape,
    /// Direct strided copy datapath instead of load-3D.
    pub is_dma: bool,
}

impl TilingContext {
    pub fn fmap_bytes(&self) -> u64 {
        self.desc.fmap.dtype.bytes()
    }

    pub fn weight_bytes(&self) -> u64 {
        self.desc.weight.dtype.bytes()
    }

    /// Bias element width, zero without bias.
    pub fn bias_bytes(&self) -> u64 {
        self.desc.bias.map_or(0, |b| b.dtype.bytes())
    }

    pub fn scale_dtype_bytes(&self) -> u64 {
        self.desc.quant_scale.map_or(0, |d| d.bytes())
    }

    /// L1 bytes of the bias for `n` output channels.
    pub fn bias_l1(&self, n: u64) -> u64 {
        if self.flags.has_bias { n * self.bias_bytes() } else { 0 }
    }

    /// L1 bytes of the fixpipe parameters for `n` output channels.
    pub fn fixp_l1(&self, n: u64) -> u64 {
        (self.fixpipe.channel_wise_coeff as f64 * n as f64 * FP16_DTYPE_SIZE as f64) as u64
    }

    pub fn kh_dilated(&self) -> u64 {
        kernel_dilated(self.shape.single_kh, self.attr.dh())
    }

    pub fn kw_dilated(&self) -> u64 {
        kernel_dilated(self.shape.single_kw, self.attr.dw())
    }

    pub fn khkw(&self) -> u64 {
        self.shape.single_kh * self.shape.single_kw
    }

    /// Input rows needed for `ho` output rows.
    pub fn infer_hi_l1(&self, ho: u64) -> u64 {
        infer_in_l1(ho, self.shape.single_kh, self.attr.sh(), self.attr.dh(), self.shape.org_hi)
    }

    /// Input columns needed for `wo` output columns.
    pub fn infer_wi_l1(&self, wo: u64) -> u64 {
        infer_in_l1(wo, self.shape.single_kw, self.attr.sw(), self.attr.dw(), self.shape.org_wi)
    }

    /// Output rows a flattened M tile spans, two extra rows for the partial
    /// first and last lines.
    pub fn ho_of_m(&self, m: u64) -> u64 {
        if self.shape.org_wo == 0 {
            return self.shape.org_ho;
        }
        (m / self.shape.org_wo + 2).min(self.shape.org_ho)
    }

    /// Fill 5HD channel counts from the single-core shape.
    pub fn infer_5hd(&mut self) {
        let CubeShape { m0, k0, n0 } = self.cube;
        self.shape.single_ci1 = if self.flags.c04 { 1 } else { ceil_div(self.shape.single_ci, k0) };
        self.shape.single_co1 = ceil_div(self.shape.single_co, n0);
        if self.order == OutputOrder::M {
            self.shape.single_m1 = ceil_div(self.shape.single_m, m0);
        }
    }

    /// Groups the cores see after channel enlargement.
    pub fn effective_groups(&self) -> u64 {
        if self.flags.opt_group { self.shape.single_group_opt } else { self.attr.group_count() }
    }

    /// Caller-provided inner batch when folding is allowed, else 1.
    pub fn preset_inner_batch(&self) -> u64 {
        if self.config.inner_batch.is_auto() && self.flags.inner_batch > 1 { self.flags.inner_batch } else { 1 }
    }

    /// Parts that cap the load-3D M start position.
    pub fn limits_m_start(&self) -> bool {
        self.config.load3d_m_limit || self.platform.soc_version.limits_load3d_m_start()
    }
}
