//! Problem fixtures shared by the unit and property tests.

use cubetile_device::PlatformInfo;
use cubetile_dtype::{ConvDType, ConvFormat};

use crate::context::{OutputOrder, TilingContext};
use crate::driver::Conv2dTiler;
use crate::math::conv_out;
use crate::validate::{self, CheckScope};

/// A dilation 1 convolution described by its input and kernel.
#[derive(Debug, Clone, Copy)]
pub struct Conv {
    pub batch: u64,
    pub ci: u64,
    pub hi: u64,
    pub wi: u64,
    pub co: u64,
    pub k: u64,
    pub pad: u64,
    pub stride: u64,
}

impl Conv {
    pub const fn new(ci: u64, hi: u64, wi: u64, co: u64, k: u64, pad: u64) -> Self {
        Self { batch: 1, ci, hi, wi, co, k, pad, stride: 1 }
    }

    pub fn ho(&self) -> u64 {
        conv_out(self.hi, self.pad, self.pad, self.k, self.stride, 1).unwrap_or(0)
    }

    pub fn wo(&self) -> u64 {
        conv_out(self.wi, self.pad, self.pad, self.k, self.stride, 1).unwrap_or(0)
    }

    fn base(&self, platform: PlatformInfo) -> Conv2dTiler {
        let pad = self.pad as i64;
        let mut tiler = Conv2dTiler::new(platform);
        tiler
            .set_org_batch(self.batch)
            .set_org_fmap_shape(self.ci, self.hi, self.wi)
            .set_org_weight_shape(self.co, self.k, self.k)
            .set_single_weight_shape(self.ci, self.k, self.k)
            .set_fmap_type(ConvFormat::Nchw, ConvDType::Float16)
            .set_weight_type(ConvFormat::Nchw, ConvDType::Float16)
            .set_output_type(ConvFormat::Nchw, ConvDType::Float16)
            .set_padding(pad, pad, pad, pad)
            .set_stride(self.stride as i64, self.stride as i64);
        tiler
    }

    /// fp16 NCHW tiler in the flattened layout, one core owning the output.
    pub fn m_tiler(&self, platform: PlatformInfo) -> Conv2dTiler {
        let mut tiler = self.base(platform);
        tiler.set_single_output_shape_m(self.co, self.ho() * self.wo(), self.batch);
        tiler
    }

    /// Same problem in the split layout.
    pub fn hw_tiler(&self, platform: PlatformInfo) -> Conv2dTiler {
        let mut tiler = self.base(platform);
        tiler
            .set_output_order(OutputOrder::Hw)
            .set_single_output_shape_hw(self.co, self.ho(), self.wo(), self.batch);
        tiler
    }
}

pub fn default_platform() -> PlatformInfo {
    PlatformInfo::builder().build()
}

/// Context after full validation and 5HD inference, ready for a variant.
pub fn validated(tiler: &Conv2dTiler) -> TilingContext {
    let mut ctx = tiler.build_context().expect("platform is valid");
    validate::check_params(&mut ctx, CheckScope::Full).expect("problem is valid");
    ctx.infer_5hd();
    ctx
}
