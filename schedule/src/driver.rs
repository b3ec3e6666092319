//! Setter-driven front end of the planner.
//!
//! [`Conv2dTiler`] collects the problem through setters without checking
//! anything. Each entry point builds a fresh [`TilingContext`], validates it,
//! runs the variant the output order selects and assembles the record.
//!
//! The status-code entry points ([`Conv2dTiler::get_tiling`],
//! [`Conv2dTiler::core_binding_decision`], [`Conv2dTiler::get_tiling_bb`])
//! log the error and collapse it to `-1` / `false`.

use snafu::{ResultExt, ensure};
use tracing::{debug, error};

use cubetile_device::PlatformInfo;
use cubetile_dtype::{ConvDType, ConvFormat, CubeShape, support::QUANT_SCALE_DTYPE};

use crate::blockdim::{self, BlockDimDecision};
use crate::config::PlannerConfig;
use crate::context::{
    AttrInfo, ConvFlags, DescInfo, FixpipeInfo, OutputOrder, RoundMode, ShapeInfo, TensorDesc, TilingContext,
};
use crate::error::*;
use crate::math::{ceil_div, lcm};
use crate::record::TilingRecord;
use crate::tiling::{BasicBlockInfo, BbTiling, HwTiling, MTiling, TilingAlgorithm, TilingOutcome};
use crate::validate::{self, CheckScope};

/// Group layout before channel enlargement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriGroupInfo {
    pub groups: i64,
    pub ci_per_group: i64,
    pub co_per_group: i64,
    pub weight_dtype: ConvDType,
}

/// Group layout after folding `enlarge` groups into one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptGroupInfo {
    pub enlarge: u64,
    pub group_opt: u64,
    pub cin_opt: u64,
    pub cout_opt: u64,
}

/// Problem description plus planner configuration.
#[derive(Debug, Clone)]
pub struct Conv2dTiler {
    platform: PlatformInfo,
    config: PlannerConfig,
    order: OutputOrder,
    shape: ShapeInfo,
    attr: AttrInfo,
    desc: DescInfo,
    fixpipe: FixpipeInfo,
    flags: ConvFlags,
}

impl Conv2dTiler {
    pub fn new(platform: PlatformInfo) -> Self {
        Self::with_config(platform, PlannerConfig::default())
    }

    pub fn with_config(platform: PlatformInfo, config: PlannerConfig) -> Self {
        Self {
            platform,
            config,
            order: OutputOrder::default(),
            shape: ShapeInfo::default(),
            attr: AttrInfo::default(),
            desc: DescInfo::default(),
            fixpipe: FixpipeInfo::default(),
            flags: ConvFlags::default(),
        }
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn shape(&self) -> &ShapeInfo {
        &self.shape
    }

    pub fn attr(&self) -> &AttrInfo {
        &self.attr
    }

    pub fn desc(&self) -> &DescInfo {
        &self.desc
    }

    pub fn flags(&self) -> &ConvFlags {
        &self.flags
    }

    // ------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------

    pub fn set_config(&mut self, config: PlannerConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn set_output_order(&mut self, order: OutputOrder) -> &mut Self {
        self.order = order;
        self
    }

    pub fn set_org_batch(&mut self, batch: u64) -> &mut Self {
        self.shape.org_batch = batch;
        self
    }

    pub fn set_org_weight_shape(&mut self, co: u64, kh: u64, kw: u64) -> &mut Self {
        self.shape.org_co = co;
        self.shape.org_kh = kh;
        self.shape.org_kw = kw;
        self
    }

    pub fn set_single_weight_shape(&mut self, ci: u64, kh: u64, kw: u64) -> &mut Self {
        self.shape.single_ci = ci;
        self.shape.single_kh = kh;
        self.shape.single_kw = kw;
        self
    }

    pub fn set_org_fmap_shape(&mut self, ci: u64, hi: u64, wi: u64) -> &mut Self {
        self.shape.org_ci = ci;
        self.shape.org_hi = hi;
        self.shape.org_wi = wi;
        self
    }

    /// Per-core output for the split layout.
    pub fn set_single_output_shape_hw(&mut self, co: u64, ho: u64, wo: u64, batch: u64) -> &mut Self {
        self.shape.single_co = co;
        self.shape.single_ho = ho;
        self.shape.single_wo = wo;
        self.shape.single_batch = batch;
        self
    }

    /// Per-core output for the flattened layout.
    pub fn set_single_output_shape_m(&mut self, co: u64, m: u64, batch: u64) -> &mut Self {
        self.shape.single_co = co;
        self.shape.single_m = m;
        self.shape.single_batch = batch;
        self
    }

    pub fn set_fmap_type(&mut self, format: ConvFormat, dtype: ConvDType) -> &mut Self {
        self.desc.fmap = TensorDesc::new(format, dtype);
        self
    }

    pub fn set_weight_type(&mut self, format: ConvFormat, dtype: ConvDType) -> &mut Self {
        self.desc.weight = TensorDesc::new(format, dtype);
        self
    }

    /// Also marks the problem as carrying a bias.
    pub fn set_bias_type(&mut self, format: ConvFormat, dtype: ConvDType) -> &mut Self {
        self.flags.has_bias = true;
        self.desc.bias = Some(TensorDesc::new(format, dtype));
        self
    }

    pub fn set_output_type(&mut self, format: ConvFormat, dtype: ConvDType) -> &mut Self {
        self.desc.output = TensorDesc::new(format, dtype);
        self
    }

    pub fn set_padding(&mut self, top: i64, bottom: i64, left: i64, right: i64) -> &mut Self {
        self.attr.pad_top = top;
        self.attr.pad_bottom = bottom;
        self.attr.pad_left = left;
        self.attr.pad_right = right;
        self
    }

    pub fn set_dilation(&mut self, h: i64, w: i64) -> &mut Self {
        self.attr.dilation_h = h;
        self.attr.dilation_w = w;
        self
    }

    pub fn set_stride(&mut self, h: i64, w: i64) -> &mut Self {
        self.attr.stride_h = h;
        self.attr.stride_w = w;
        self
    }

    pub fn set_groups(&mut self, groups: i64) -> &mut Self {
        self.attr.groups = groups;
        self
    }

    /// Marks the problem as optimized-group with the enlarged layout.
    pub fn set_opt_group_params(&mut self, enlarge: u64, single_groups: u64, single_group_opt: u64) -> &mut Self {
        self.flags.opt_group = true;
        self.shape.enlarge = enlarge;
        self.shape.single_groups = single_groups;
        self.shape.single_group_opt = single_group_opt;
        self
    }

    pub fn set_hf32(&mut self, enable: bool, trans_mode: bool) -> &mut Self {
        self.flags.hf32_enable = enable;
        self.flags.hf32_trans_mode = trans_mode;
        self
    }

    pub fn set_quant_scale(&mut self, has_scale: bool) -> &mut Self {
        self.flags.has_scale = has_scale;
        if has_scale {
            self.desc.quant_scale = Some(QUANT_SCALE_DTYPE);
        }
        self
    }

    pub fn set_extend_conv(&mut self, enable: bool) -> &mut Self {
        self.flags.extend_conv2d = enable;
        self
    }

    pub fn set_fixpipe_params(&mut self, fixpipe: FixpipeInfo) -> &mut Self {
        self.fixpipe = fixpipe;
        self
    }

    pub fn set_offset_x(&mut self, offset_x: i64) -> &mut Self {
        self.attr.offset_x = offset_x;
        self
    }

    pub fn set_round_mode(&mut self, mode: RoundMode) -> &mut Self {
        self.attr.round_mode = mode;
        self
    }

    pub fn set_c04(&mut self, enable: bool) -> &mut Self {
        self.flags.c04 = enable;
        self
    }

    pub fn set_scale_bias_in_ub(&mut self, enable: bool) -> &mut Self {
        self.flags.scale_bias_in_ub = enable;
        self
    }

    /// Batches a basic block folds into one pass.
    pub fn set_inner_batch(&mut self, inner_batch: u64) -> &mut Self {
        self.flags.inner_batch = inner_batch.max(1);
        self
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Snapshot of the setter state. Output extents, cube shape and the
    /// datapath are filled in by validation.
    pub fn build_context(&self) -> Result<TilingContext> {
        self.platform.validate().context(PlatformSnafu)?;
        Ok(TilingContext {
            shape: self.shape.clone(),
            attr: self.attr.clone(),
            desc: self.desc.clone(),
            fixpipe: self.fixpipe.clone(),
            flags: self.flags.clone(),
            platform: self.platform.clone(),
            config: self.config.clone(),
            order: self.order,
            cube: CubeShape::for_fmap(self.desc.fmap.dtype),
            is_dma: false,
        })
    }

    /// Validates and tiles with the variant the output order selects.
    #[tracing::instrument(skip_all, fields(order = %self.order))]
    pub fn plan(&self) -> Result<TilingRecord> {
        let mut ctx = self.build_context()?;
        validate::check_params(&mut ctx, CheckScope::Full)?;
        ctx.infer_5hd();
        debug!(order = %ctx.order, is_dma = ctx.is_dma, "dispatching");
        let outcome = match ctx.order {
            OutputOrder::M => MTiling::new(&ctx).process()?,
            OutputOrder::Hw => HwTiling::new(&ctx).process()?,
        };
        finish(&ctx, &outcome)
    }

    /// Writes the record and returns `0`, or `-1` on failure.
    pub fn get_tiling(&self, record: &mut TilingRecord) -> i64 {
        match self.plan() {
            Ok(r) => {
                *record = r;
                0
            }
            Err(e) => {
                error!(error = %e, "conv2d tiling failed");
                -1
            }
        }
    }

    /// Context for a basic-block phase: M layout, phase checks, L1 minimum,
    /// block info and block limits.
    pub(crate) fn bb_context(&self, info: &BasicBlockInfo, scope: CheckScope) -> Result<TilingContext> {
        let mut ctx = self.build_context()?;
        ctx.order = OutputOrder::M;
        validate::check_params(&mut ctx, scope)?;
        validate::check_l1_size_limit(&ctx)?;
        match scope {
            CheckScope::BeforeCoreBind => validate::check_bind_info(info)?,
            CheckScope::Full => validate::check_tiling_info(info)?,
        }
        validate::check_bb_limits(&ctx, info)?;
        ctx.infer_5hd();
        Ok(ctx)
    }

    /// Phase 1 as a `Result`: refines `info` in place.
    pub fn try_core_binding_decision(&self, info: &mut BasicBlockInfo) -> Result<()> {
        let ctx = self.bb_context(info, CheckScope::BeforeCoreBind)?;
        BbTiling::new(&ctx, info).decide_core_binding();
        Ok(())
    }

    /// Phase 2 as a `Result`.
    pub fn plan_bb(&self, info: &mut BasicBlockInfo) -> Result<TilingRecord> {
        let ctx = self.bb_context(info, CheckScope::Full)?;
        let outcome = BbTiling::new(&ctx, info).process()?;
        finish(&ctx, &outcome)
    }

    /// Basic-block phase 1: adjusts the tiles, scores the L1 strategies and
    /// reports core utilization through `info`.
    pub fn core_binding_decision(&self, info: &mut BasicBlockInfo) -> bool {
        self.try_core_binding_decision(info)
            .inspect_err(|e| error!(error = %e, "basic block core binding failed"))
            .is_ok()
    }

    /// Basic-block phase 2: full tiling of the block phase 1 chose.
    pub fn get_tiling_bb(&self, info: &mut BasicBlockInfo, record: &mut TilingRecord) -> bool {
        match self.plan_bb(info) {
            Ok(r) => {
                *record = r;
                true
            }
            Err(e) => {
                error!(error = %e, "basic block tiling failed");
                false
            }
        }
    }

    /// Splits the whole problem across the AI cores.
    pub fn decide_block_dim(&self) -> Result<BlockDimDecision> {
        blockdim::decide(self)
    }

    /// Folds groups so each folded group fills whole cube blocks.
    pub fn calc_opt_group_params(&self, ori: OriGroupInfo) -> Result<OptGroupInfo> {
        ensure!(ori.groups > 0, InvalidAttrSnafu { name: "groups", value: ori.groups });
        ensure!(ori.ci_per_group > 0, InvalidAttrSnafu { name: "ciPerGroup", value: ori.ci_per_group });
        ensure!(ori.co_per_group > 0, InvalidAttrSnafu { name: "coPerGroup", value: ori.co_per_group });
        let CubeShape { k0, n0, .. } = CubeShape::for_fmap(ori.weight_dtype);
        let (groups, ci, co) = (ori.groups as u64, ori.ci_per_group as u64, ori.co_per_group as u64);
        let enlarge = lcm(lcm(ci, k0) / ci, lcm(co, n0) / co).min(groups);
        Ok(OptGroupInfo {
            enlarge,
            group_opt: ceil_div(groups, enlarge),
            cin_opt: ci * enlarge,
            cout_opt: co * enlarge,
        })
    }
}

fn finish(ctx: &TilingContext, outcome: &TilingOutcome) -> Result<TilingRecord> {
    validate::check_tiling_result(ctx, outcome)?;
    Ok(TilingRecord::assemble(ctx, outcome))
}
