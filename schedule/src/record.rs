//! The flat tiling record the compute kernel consumes.
//!
//! Every field is a plain value derived from the context and the winning
//! [`TilingOutcome`]; nothing here searches. The derived scalar fields
//! (`cin_*`, `*_step`, `*_stride`, `a_l1_space_size`) spare the kernel the
//! same arithmetic on every iteration.

use tracing::debug;

use cubetile_dtype::{C0_SIZE, CubeShape};

use crate::context::{C04_CIN_SIZE, OutputOrder, RoundMode, TilingContext};
use crate::math::{align_up, ceil_div};
use crate::tiling::TilingOutcome;
use crate::ub::{UbSteps, ub_steps};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TilingRecord {
    // Shapes.
    pub org_hi: u64,
    pub org_wi: u64,
    pub org_ho: u64,
    pub org_wo: u64,
    pub org_ci: u64,
    pub org_co: u64,
    /// Flattened M extent in the M layout, output rows otherwise.
    pub single_core_ho: u64,
    pub single_core_wo: u64,
    pub single_core_batch: u64,
    pub single_core_ci: u64,
    pub single_core_co: u64,
    pub kernel_h: u64,
    pub kernel_w: u64,

    // L1 tiles.
    /// Flattened M tile in the M layout.
    pub ho_l1: u64,
    pub wo_l1: u64,
    pub k_al1: u64,
    pub k_bl1: u64,
    pub n_bl1: u64,
    pub kh_l1: u64,
    pub kw_l1: u64,
    pub multi_n_bl1: u64,

    // L0 tiles.
    pub ho_l0: u64,
    pub wo_l0: u64,
    pub k_l0: u64,
    pub n_l0: u64,

    // Attributes.
    pub stride_h: u64,
    pub stride_w: u64,
    pub dilation_h: u64,
    pub dilation_w: u64,
    pub pad_top: u64,
    pub pad_bottom: u64,
    pub pad_left: u64,
    pub pad_right: u64,
    pub groups: u64,
    pub single_core_groups: u64,
    pub single_core_group_opt: u64,
    pub enlarge: u64,
    pub offset_x: i64,
    pub round_mode: RoundMode,

    // Flags.
    pub p_buffer_flag: u64,
    pub hf32_enable: bool,
    pub hf32_trans_mode: bool,
    pub has_bias: bool,
    pub has_scale: bool,
    pub iterate_mn_order: u8,
    pub al1_full_load: bool,
    pub bl1_full_load: bool,
    pub bias_full_load: bool,
    pub fixp_params_full_load: bool,
    pub inner_batch: u64,

    // UB.
    pub kh_ub: u64,
    pub kw_ub: u64,
    pub b_ub_n_step: u64,
    pub b_ub_k_step: u64,
    pub m_ub: u64,
    pub n_ub: u64,

    // Derived scalars.
    pub kernel_hxw: u64,
    pub cin_a_in_core: u64,
    pub cin_a_tail_in_core: u64,
    pub cin_b_in_core: u64,
    pub cin_b_tail_in_core: u64,
    pub org_hixwi: u64,
    pub cin_offset_block_in_gm: u64,
    pub m_step: u64,
    pub fmap_k_stride: u64,
    pub n_step: u64,
    pub k_step: u64,
    pub weight_k_stride: u64,
    pub cout_offset_block: u64,
    pub n_l1_div_block_size: u64,
    pub a_l1_space_size: u64,

    // Fixpipe modes of the extended convolution.
    pub quant_mode0: u8,
    pub relu_mode0: u8,
    pub clip_mode0: u8,
    pub quant_mode1: u8,
    pub relu_mode1: u8,
    pub clip_mode1: u8,
    pub dual_output: bool,
}

impl TilingRecord {
    /// Fills a record from a validated context and a checked outcome.
    pub fn assemble(ctx: &TilingContext, outcome: &TilingOutcome) -> Self {
        let mut rec = Self::default();
        rec.set_tiles(ctx, outcome);
        rec.set_attrs(ctx);
        rec.set_flags(ctx, outcome);
        rec.set_ub(ub_steps(ctx, outcome), outcome);
        rec.set_scalar_params(ctx);
        rec.set_fixpipe_modes(ctx);
        debug!(
            ho_l1 = rec.ho_l1,
            k_al1 = rec.k_al1,
            k_bl1 = rec.k_bl1,
            n_bl1 = rec.n_bl1,
            k_l0 = rec.k_l0,
            n_l0 = rec.n_l0,
            p_buffer_flag = rec.p_buffer_flag,
            "tiling record"
        );
        rec
    }

    fn set_tiles(&mut self, ctx: &TilingContext, outcome: &TilingOutcome) {
        let s = &ctx.shape;
        let (l0, l1) = (&outcome.l0, &outcome.l1);
        match ctx.order {
            OutputOrder::M => {
                self.single_core_ho = s.single_m;
                self.ho_l1 = l1.m_al1;
                self.ho_l0 = l0.m_l0;
            }
            OutputOrder::Hw => {
                self.single_core_ho = s.single_ho;
                self.single_core_wo = s.single_wo;
                self.ho_l1 = l1.ho_al1;
                self.wo_l1 = l1.wo_al1;
                self.ho_l0 = l0.ho_l0;
                self.wo_l0 = l0.wo_l0;
            }
        }
        self.k_al1 = l1.k_al1;
        self.k_bl1 = l1.k_bl1;
        self.n_bl1 = l1.n_bl1;
        self.multi_n_bl1 = ceil_div(l1.n_bl1, l0.n_l0);
        self.k_l0 = l0.k_l0;
        self.n_l0 = l0.n_l0;
        self.kh_l1 = l1.kh_l1;
        self.kw_l1 = l1.kw_l1;

        self.org_hi = s.org_hi;
        self.org_wi = s.org_wi;
        self.org_ho = s.org_ho;
        self.org_wo = s.org_wo;
        self.single_core_batch = s.single_batch;
        self.org_ci = s.org_ci;
        self.org_co = s.org_co;
        self.single_core_ci = s.single_ci;
        self.single_core_co = s.single_co;
        self.kernel_h = s.org_kh;
        self.kernel_w = s.org_kw;
    }

    fn set_attrs(&mut self, ctx: &TilingContext) {
        let a = &ctx.attr;
        self.stride_h = a.sh();
        self.stride_w = a.sw();
        self.dilation_h = a.dh();
        self.dilation_w = a.dw();
        [self.pad_top, self.pad_bottom, self.pad_left, self.pad_right] = a.pads();
        self.groups = a.group_count();
        if ctx.flags.opt_group {
            self.single_core_groups = ctx.shape.single_groups;
            self.single_core_group_opt = ctx.shape.single_group_opt;
            self.enlarge = ctx.shape.enlarge;
        }
        self.offset_x = a.offset_x;
        self.round_mode = a.round_mode;
    }

    fn set_flags(&mut self, ctx: &TilingContext, outcome: &TilingOutcome) {
        let l1 = &outcome.l1;
        self.p_buffer_flag = outcome.db.pbuffer_flag();
        self.hf32_enable = ctx.flags.hf32_enable;
        self.hf32_trans_mode = ctx.flags.hf32_trans_mode;
        self.has_bias = ctx.flags.has_bias;
        self.has_scale = ctx.flags.has_scale;
        self.iterate_mn_order = l1.iterate_order.as_u8();
        self.al1_full_load = l1.al1_full_load;
        self.bl1_full_load = l1.bl1_full_load;
        self.bias_full_load = l1.bias_full_load;
        self.fixp_params_full_load = l1.fixp_full_load;
        self.inner_batch = outcome.inner_batch.max(1);
    }

    fn set_ub(&mut self, steps: UbSteps, outcome: &TilingOutcome) {
        self.kh_ub = steps.kh_ub;
        self.kw_ub = steps.kw_ub;
        self.b_ub_n_step = steps.b_ub_n_step;
        self.b_ub_k_step = steps.b_ub_k_step;
        self.m_ub = outcome.ub.m_ub;
        self.n_ub = outcome.ub.n_ub;
    }

    /// Loop strides and tails the kernel would otherwise recompute.
    fn set_scalar_params(&mut self, ctx: &TilingContext) {
        let CubeShape { m0, k0, n0 } = ctx.cube;
        let kernel_hxw = self.kernel_h * self.kernel_w;
        let k_value = if ctx.is_dma { self.kh_l1 * self.kw_l1 } else { kernel_hxw }.max(1);
        let k_total = self.single_core_ci * k_value;
        let tail = |k_l1: u64| match k_total % k_l1 {
            0 => k_l1,
            t => t,
        };
        let k_al1_tail = tail(self.k_al1);
        let k_bl1_tail = tail(self.k_bl1);

        self.kernel_hxw = kernel_hxw;
        self.cin_a_in_core = if ctx.flags.c04 { C04_CIN_SIZE } else { self.k_al1 / k_value };
        self.cin_a_tail_in_core = k_al1_tail / k_value;
        self.cin_b_in_core = self.k_bl1 / k_value;
        self.cin_b_tail_in_core = k_bl1_tail / k_value;
        self.org_hixwi = self.org_hi * self.org_wi;
        self.cin_offset_block_in_gm = self.k_al1 / k_value * self.org_hixwi;
        self.m_step = match ctx.order {
            OutputOrder::M => align_up(self.ho_l0, m0),
            OutputOrder::Hw => align_up(self.ho_l0 * self.wo_l0, m0),
        };
        self.fmap_k_stride = self.m_step / m0;
        self.n_step = ceil_div(self.n_l0, n0);
        self.k_step = self.k_l0 / k0;
        self.weight_k_stride = ceil_div(self.n_bl1, n0);
        self.cout_offset_block = self.org_ci / self.groups.max(1) * kernel_hxw;
        self.n_l1_div_block_size = self.n_bl1 / n0;
        self.a_l1_space_size = self.a_l1_space(ctx);
    }

    /// L1 bytes one feature-map load occupies.
    fn a_l1_space(&self, ctx: &TilingContext) -> u64 {
        let f = ctx.fmap_bytes();
        if ctx.is_dma {
            return self.ho_l1 * self.wo_l1 * self.k_al1 * f;
        }
        let elems = match ctx.order {
            OutputOrder::M => {
                let m_l1 = self.ho_l1.min(self.single_core_ho);
                let ho = (m_l1 / self.org_wo + 2).min(self.org_ho);
                self.cin_a_in_core * ctx.infer_hi_l1(ho) * self.org_wi
            }
            OutputOrder::Hw => {
                let hi = ctx.infer_hi_l1(self.ho_l1);
                if ctx.flags.c04 && self.org_wo == self.wo_l1 {
                    align_up(hi * self.org_wi, C0_SIZE / (f * C04_CIN_SIZE)) * C04_CIN_SIZE
                } else {
                    self.cin_a_in_core * hi * ctx.infer_wi_l1(self.wo_l1)
                }
            }
        };
        align_up(elems * f * self.inner_batch, C0_SIZE)
    }

    fn set_fixpipe_modes(&mut self, ctx: &TilingContext) {
        let fp = &ctx.fixpipe;
        [self.quant_mode0, self.quant_mode1] = fp.quant_mode;
        [self.relu_mode0, self.relu_mode1] = fp.relu_mode;
        [self.clip_mode0, self.clip_mode1] = fp.clip_mode;
        self.dual_output = fp.dual_output;
    }
}
