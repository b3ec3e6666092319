//! Multi-core basic-block tiling.
//!
//! Runs in two phases against a caller-owned [`BasicBlockInfo`]:
//!
//! 1. **Core binding**: [`BbTiling::adjust_m`] and [`BbTiling::adjust_n`]
//!    enlarge the proposed per-core tiles while the number of busy cores does
//!    not drop, then every applicable [`BbStrategy`] is scored and the best
//!    one's full-load flags are written back.
//! 2. **Tiling**: [`TilingAlgorithm::process`] turns the chosen strategy into
//!    L1 extents, picks kL0 and settles double buffering.
//!
//! Strategies are a closed enum; see [`strategy`] for the decision table.

pub mod strategy;

use tracing::{debug, error};

use cubetile_dtype::CubeShape;

use crate::buffer::BufferModel;
use crate::context::{FP16_DTYPE_SIZE, TilingContext};
use crate::error::*;
use crate::math::{ceil_div, comm_factors};
use crate::tiling::{
    DOUBLE_BUFFER_NUM, DoubleBuffer, IterateOrder, L0TilingRes, L1TilingRes, MAX_16_BIT_NUM, TilingAlgorithm,
    TilingOutcome, UbTilingRes,
};

pub use strategy::BbStrategy;

/// Basic-block description shared between the caller and both phases.
///
/// Phase 1 reads the dims, tiles and cuts and refines them; phase 2 reads the
/// refined values plus the full-load flags and order phase 1 chose.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BasicBlockInfo {
    pub aicore_num: u64,
    /// Cores along the flattened batch*M axis.
    pub f_dim: u64,
    pub n_dim: u64,
    pub m_dim: u64,
    pub batch_dim: u64,
    pub group_dim: u64,

    pub batch: u64,
    pub m_tile: u64,
    pub n_tile: u64,
    pub k_tile: u64,
    pub m_cut: u64,
    pub n_cut: u64,
    pub f_cut: u64,
    /// Input elements (rows times full width) one M tile reads.
    pub m_in: u64,

    /// Busy cores along F and N after adjustment.
    pub f_active: u64,
    pub n_active: u64,
    pub core_utilization: f32,
    pub l1_load_score: f64,

    pub k_al1_full_load: bool,
    pub k_bl1_full_load: bool,
    pub m_al1_full_load: bool,
    pub n_bl1_full_load: bool,
    pub bias_full_load: bool,
    pub fixp_full_load: bool,
    pub iterate_order: IterateOrder,
}

impl BasicBlockInfo {
    /// Seed `(m_tile, n_tile)` for an output plane of `howo` elements and
    /// `cout` channels.
    pub const fn initial_mn(howo: u64, cout: u64) -> (u64, u64) {
        if cout <= 64 {
            (1024, 64)
        } else if cout <= 128 {
            (512, 128)
        } else if howo <= 64 {
            (64, 1024)
        } else if howo <= 128 {
            (128, 512)
        } else {
            (256, 256)
        }
    }
}

/// Full-load flags a strategy proposes before it is scored.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PresetFlags {
    pub k_al1: bool,
    pub k_bl1: bool,
    pub bias: bool,
    pub fixp: bool,
}

/// L1 extents in BB units: `k_al1` excludes the kernel window, `m_al1` counts
/// input elements.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BbL1Params {
    pub k_al1: u64,
    pub k_bl1: u64,
    pub m_al1: u64,
    pub n_bl1: u64,
}

/// BB-mode state for one phase.
#[derive(Debug)]
pub struct BbTiling<'a> {
    pub(crate) ctx: &'a TilingContext,
    pub(crate) info: &'a mut BasicBlockInfo,
    buf: BufferModel<'a>,
    pub(crate) db: DoubleBuffer,
    pub(crate) preset: PresetFlags,
    pub(crate) available_l1: i64,
    pub(crate) fmap_full_size: i64,
    pub(crate) weight_full_size: i64,
    weight_coeff: u64,
    pub(crate) m_repeats: u64,
    pub(crate) n_repeats: u64,
    pub(crate) score_base: f64,
    pub(crate) params: BbL1Params,
    pub(crate) tmp: BbL1Params,
    pub(crate) multi_m: u64,
    pub(crate) multi_n: u64,
    pub(crate) al1_db_close: bool,
    pub(crate) bl1_db_close: bool,
    /// `single_ci1 * k0`.
    pub(crate) ci1_k0: u64,
    pub(crate) enable_inner_batch: bool,
    pub(crate) inner_batch: u64,
    l1: L1TilingRes,
    l0: L0TilingRes,
}

impl<'a> BbTiling<'a> {
    pub fn new(ctx: &'a TilingContext, info: &'a mut BasicBlockInfo) -> Self {
        let inner_batch = ctx.preset_inner_batch();
        let enable_inner_batch = inner_batch > 1;
        Self {
            ctx,
            info,
            buf: BufferModel::new(ctx),
            db: DoubleBuffer::default(),
            preset: PresetFlags::default(),
            available_l1: 0,
            fmap_full_size: 0,
            weight_full_size: 0,
            weight_coeff: 1,
            m_repeats: 0,
            n_repeats: 0,
            score_base: 0.0,
            params: BbL1Params::default(),
            tmp: BbL1Params::default(),
            multi_m: 1,
            multi_n: 1,
            al1_db_close: false,
            bl1_db_close: false,
            ci1_k0: ctx.shape.single_ci1 * ctx.cube.k0,
            enable_inner_batch,
            inner_batch,
            l1: L1TilingRes::default(),
            l0: L0TilingRes::default(),
        }
    }

    pub(crate) fn fmap_bytes(&self) -> i64 {
        self.ctx.fmap_bytes() as i64
    }

    pub(crate) fn weight_bytes(&self) -> i64 {
        self.ctx.weight_bytes() as i64
    }

    pub(crate) fn org_khkw(&self) -> u64 {
        self.ctx.shape.org_kh * self.ctx.shape.org_kw
    }

    fn hw_out(&self) -> u64 {
        self.ctx.shape.org_ho * self.ctx.shape.org_wo
    }

    /// Flattened-axis cut count with inner batch folding.
    fn inner_batch_cuts(&self, m_tile: u64) -> u64 {
        let m0 = self.ctx.cube.m0;
        let padded = self.info.batch * ceil_div(self.hw_out(), m0) * m0;
        ceil_div(ceil_div(padded, m_tile), self.inner_batch)
    }

    /// Number of M reloads when K is split.
    pub(crate) fn split_m_repeats(&self) -> u64 {
        if self.enable_inner_batch {
            self.inner_batch_cuts(self.info.m_tile)
        } else {
            self.info.batch * self.info.m_cut
        }
    }

    /// Input elements an M tile of `m_tile` output elements reads; the whole
    /// input width is always loaded.
    fn infer_m_in(&self, m_tile: u64) -> u64 {
        let s = &self.ctx.shape;
        let ho = if s.org_wo == 0 { 0 } else { m_tile / s.org_wo + 2 };
        self.ctx.infer_hi_l1(ho) * s.org_wi
    }

    fn bias_bytes(&self) -> i64 {
        self.ctx.bias_bytes() as i64
    }

    fn scale_bytes(&self, n: u64) -> i64 {
        (self.ctx.fixpipe.channel_wise_coeff as f64 * n as f64 * FP16_DTYPE_SIZE as f64) as i64
    }

    // ------------------------------------------------------------------
    // Phase 1
    // ------------------------------------------------------------------

    /// Tries the M tile that spreads the flattened axis evenly over `f_dim`.
    pub fn adjust_m(&mut self) {
        let m0 = self.ctx.cube.m0;
        let hw_out = self.hw_out();
        let f_cut = if self.enable_inner_batch {
            self.inner_batch_cuts(self.info.m_tile)
        } else {
            self.info.batch * ceil_div(hw_out, self.info.m_tile)
        };
        let f_mapped = ceil_div(f_cut, self.info.f_dim);
        let mut f_active = ceil_div(f_cut, f_mapped);

        let m_mapped = if self.enable_inner_batch {
            1
        } else if self.info.batch == 0 {
            0
        } else {
            self.info.f_dim * f_mapped / self.info.batch
        };
        let m_tile = ceil_div(hw_out, m0 * m_mapped) * m0;
        let m_cut = ceil_div(hw_out, m_tile);
        let f_cut_adjusted =
            if self.enable_inner_batch { self.inner_batch_cuts(m_tile) } else { self.info.batch * m_cut };
        let f_active_adjusted = ceil_div(f_cut_adjusted, ceil_div(f_cut_adjusted, self.info.f_dim));
        if f_active_adjusted >= f_active {
            self.info.m_tile = m_tile;
            self.info.m_cut = m_cut;
            self.info.m_in = self.infer_m_in(m_tile);
            f_active = f_active_adjusted;
        }
        self.info.f_active = f_active;
        debug!(
            f_active_adjusted,
            f_active,
            m_tile = self.info.m_tile,
            m_cut = self.info.m_cut,
            m_in = self.info.m_in,
            "adjust m"
        );
    }

    /// Caps an N tile by the fixpipe buffer and the bias table.
    fn cap_n_tile(&self, mut n_tile: u64) -> u64 {
        let p = &self.ctx.platform;
        let coeff = self.ctx.fixpipe.channel_wise_coeff;
        if coeff > 0.0 {
            let per_channel = (coeff * FP16_DTYPE_SIZE as f32) as u64;
            if per_channel > 0 {
                n_tile = n_tile.min(p.fb_size / per_channel);
            }
        }
        if self.ctx.flags.has_bias && self.ctx.bias_bytes() > 0 {
            n_tile = n_tile.min(p.bt_size / self.ctx.bias_bytes());
        }
        n_tile
    }

    /// Tries the N tile that spreads output channels evenly over `n_dim`.
    pub fn adjust_n(&mut self) {
        let n0 = self.ctx.cube.n0;
        let org_co = self.ctx.shape.org_co;
        let per_core = ceil_div(self.info.n_cut, self.info.n_dim);
        let mut n_active = ceil_div(self.info.n_cut, per_core);
        let n_tile = self.cap_n_tile(ceil_div(org_co, per_core * self.info.n_dim * n0) * n0);
        let n_cut = ceil_div(org_co, n_tile);
        let n_active_adjusted = ceil_div(n_cut, ceil_div(n_cut, self.info.n_dim));
        if n_active_adjusted >= n_active {
            self.info.n_tile = n_tile;
            n_active = n_active_adjusted;
        } else {
            self.info.n_tile = self.cap_n_tile(self.info.n_tile);
        }
        self.info.n_cut = n_cut;
        self.info.n_active = n_active;
        debug!(n_active_adjusted, n_active, n_tile = self.info.n_tile, n_cut = self.info.n_cut, "adjust n");
    }

    /// Busy cores over the cores one group may use.
    pub fn calc_core_utilization(&mut self) {
        let per_group = self.info.aicore_num as f32 / self.info.group_dim.max(1) as f32;
        self.info.core_utilization = self.info.f_active as f32 * self.info.n_active as f32 / per_group;
    }

    fn try_bias_scale_full_load(&mut self, left: i64) {
        self.preset.bias = false;
        self.preset.fixp = false;
        let extra_channels = self.ctx.shape.single_co as i64 - self.info.n_tile as i64;
        let bias_extra = if self.ctx.flags.has_bias { extra_channels * self.bias_bytes() } else { 0 };
        let scale_extra = (extra_channels as f64
            * self.ctx.fixpipe.channel_wise_coeff as f64
            * FP16_DTYPE_SIZE as f64) as i64;
        if left - bias_extra - scale_extra >= 0 {
            self.preset.bias = true;
            self.preset.fixp = true;
        }
        if self.ctx.flags.has_bias
            && self.ctx.shape.single_co * self.ctx.bias_bytes() > crate::tiling::DATACOPYPARAMS_BURSTLEN_MAX
        {
            self.preset.bias = false;
            self.preset.fixp = false;
        }
    }

    /// True when both operand sizes fit the L1 left after bias and scale;
    /// re-evaluates the bias and scale full-load proposal.
    pub(crate) fn check_l1_space(&mut self, used_a: i64, used_b: i64) -> bool {
        let left = self.available_l1 - used_a - used_b;
        if left < 0 {
            return false;
        }
        self.try_bias_scale_full_load(left);
        true
    }

    pub fn calc_mn_full_load(&mut self) {
        self.info.f_cut = if self.enable_inner_batch {
            self.inner_batch_cuts(self.info.m_tile)
        } else {
            self.info.m_cut * self.info.batch
        };
        self.info.m_al1_full_load = self.info.f_cut <= self.info.f_dim;
        self.info.n_bl1_full_load = self.info.n_cut <= self.info.n_dim;
    }

    /// Bias and scale bytes at full or per-tile width.
    fn side_l1(&self) -> i64 {
        let s = &self.ctx.shape;
        let n = if self.info.bias_full_load { s.single_co } else { self.info.n_tile };
        let bias = if self.ctx.flags.has_bias { n as i64 * self.bias_bytes() } else { 0 };
        let n = if self.info.fixp_full_load { s.single_co } else { self.info.n_tile };
        bias + self.scale_bytes(n)
    }

    /// Operand bytes of the chosen extents at their double buffer depth.
    fn operand_l1(&self) -> (u64, u64) {
        let p = &self.params;
        let fmap = p.k_al1 * p.m_al1 * self.db.pb_al1 * self.inner_batch * self.ctx.fmap_bytes();
        let weight = p.k_bl1 * p.n_bl1.min(self.ctx.shape.single_co) * self.db.pb_bl1 * self.ctx.weight_bytes();
        (fmap, weight)
    }

    /// L1 bytes the chosen extents occupy, both operands plus bias and scale.
    pub fn l1_bytes(&self) -> u64 {
        let (fmap, weight) = self.operand_l1();
        fmap + weight + self.side_l1().max(0) as u64
    }

    pub(crate) fn calc_available_l1(&mut self) {
        let s = &self.ctx.shape;
        self.available_l1 = self.ctx.platform.l1_size as i64 - self.side_l1();

        let f_dim = self.info.f_dim.max(1);
        let n_dim = self.info.n_dim.max(1);
        self.fmap_full_size =
            (s.org_hi * s.org_wi * s.org_ci * self.info.batch / f_dim * self.ctx.fmap_bytes()) as i64;
        self.weight_full_size = (self.org_khkw() * s.org_ci * s.org_co / n_dim * self.ctx.weight_bytes()) as i64;
    }

    /// Weight reload cost relative to the feature map.
    pub(crate) fn calc_weight_coeff(&mut self) {
        let khkw = self.org_khkw();
        self.weight_coeff = if self.ctx.flags.opt_group || khkw == 1 {
            1
        } else if khkw > 9 {
            6
        } else {
            4
        };
    }

    pub(crate) fn l1_load_score(&self) -> f64 {
        let s = &self.ctx.shape;
        let khkw = self.org_khkw().max(1);
        let a_effective = s.org_hi * s.org_wi * self.info.batch;
        let b_effective = s.org_co * self.org_khkw() * self.weight_coeff;
        let traffic = a_effective / khkw * self.m_repeats + b_effective * self.n_repeats;
        self.score_base + 1.0 / traffic as f64
    }

    /// Scores `strategy`; on a strictly better score its flags replace the
    /// recorded ones.
    fn update_strategy(&mut self, strategy: BbStrategy) -> bool {
        if !strategy.score_params(self) {
            debug!(%strategy, "strategy does not fit L1");
            return false;
        }
        let score = self.l1_load_score();
        if score > self.info.l1_load_score {
            debug!(%strategy, score, "strategy improves score");
            self.info.l1_load_score = score;
            self.info.k_al1_full_load = self.preset.k_al1;
            self.info.k_bl1_full_load = self.preset.k_bl1;
            self.info.bias_full_load = self.preset.bias;
            self.info.fixp_full_load = self.preset.fixp;
            return true;
        }
        false
    }

    fn order_by_full_size(&mut self) {
        self.info.iterate_order = if self.weight_full_size > self.fmap_full_size {
            IterateOrder::MFirst
        } else {
            IterateOrder::NFirst
        };
    }

    fn try_k_ab_full_load(&mut self) {
        self.preset.k_al1 = true;
        self.preset.k_bl1 = true;
        let strategy = if self.info.m_al1_full_load || self.info.n_bl1_full_load {
            BbStrategy::KAndMal1FullLoad
        } else {
            BbStrategy::KAndNoneFullLoad
        };
        if self.update_strategy(strategy) {
            self.order_by_full_size();
            self.params = self.tmp;
        }
    }

    fn try_n_first(&mut self) {
        self.preset.k_al1 = true;
        self.preset.k_bl1 = false;
        let strategy =
            if self.info.m_al1_full_load { BbStrategy::FmapFullLoad } else { BbStrategy::FmapKFullLoad };
        if self.update_strategy(strategy) {
            self.info.iterate_order = IterateOrder::NFirst;
            self.params = self.tmp;
        }
    }

    fn try_m_first(&mut self) {
        self.preset.k_al1 = false;
        self.preset.k_bl1 = true;
        let strategy = if self.info.n_bl1_full_load {
            BbStrategy::WeightFullLoad
        } else if self.info.k_bl1_full_load {
            BbStrategy::WeightKFullLoad
        } else {
            return;
        };
        if self.update_strategy(strategy) {
            self.info.iterate_order = IterateOrder::MFirst;
            self.params = self.tmp;
        }
    }

    fn try_k_all_split(&mut self) {
        self.preset = PresetFlags::default();
        if self.update_strategy(BbStrategy::KAllSplit) {
            self.order_by_full_size();
            self.params = self.tmp;
        }
    }

    /// Scores every applicable strategy in priority order and keeps the best.
    pub fn calc_best_l1_strategy(&mut self) {
        self.calc_mn_full_load();
        self.calc_available_l1();
        self.calc_weight_coeff();

        let s = &self.ctx.shape;
        if self.ci1_k0 * s.single_kh * s.single_kw <= MAX_16_BIT_NUM {
            self.try_k_ab_full_load();
            self.try_n_first();
        }
        self.try_m_first();
        self.try_k_all_split();
    }

    /// Phase 1: core binding and strategy scoring.
    #[tracing::instrument(skip_all, fields(f_dim = self.info.f_dim, n_dim = self.info.n_dim))]
    pub fn decide_core_binding(mut self) {
        self.adjust_m();
        self.adjust_n();
        self.calc_best_l1_strategy();
        self.calc_core_utilization();
    }

    // ------------------------------------------------------------------
    // Phase 2
    // ------------------------------------------------------------------

    fn init_ping_pong(&mut self) {
        self.db = DoubleBuffer {
            pb_al1: DOUBLE_BUFFER_NUM,
            pb_bl1: DOUBLE_BUFFER_NUM,
            pb_al0: DOUBLE_BUFFER_NUM,
            pb_bl0: DOUBLE_BUFFER_NUM,
            pb_cl0: 1,
            pb_ub: 1,
        };
    }

    /// Inner batch folding leaves fewer folded batches than the core holds.
    pub(crate) fn inner_batch_partial(&self) -> bool {
        self.enable_inner_batch && self.inner_batch < self.ctx.shape.single_batch
    }

    /// Picks the strategy for both K extents resident and sets the L1 double
    /// buffers that follow from it.
    fn k_ab_full_load_strategy(&mut self) -> BbStrategy {
        let s = &self.ctx.shape;
        let f_dim = self.info.f_dim.max(1);
        let fmap = ceil_div(s.org_hi * s.org_wi * self.info.batch, f_dim) * self.ci1_k0;
        let weight = self.org_khkw() * ceil_div(s.single_co, self.info.n_dim.max(1)) * self.ci1_k0;
        let a_pb = if self.inner_batch_partial() { DOUBLE_BUFFER_NUM } else { 1 };
        match (self.info.m_al1_full_load, self.info.n_bl1_full_load) {
            (true, true) => {
                self.info.iterate_order = IterateOrder::MFirst;
                self.db.pb_al1 = a_pb;
                self.db.pb_bl1 = 1;
                BbStrategy::KAndMal1FullLoad
            }
            (true, false) => {
                self.info.iterate_order = IterateOrder::NFirst;
                self.db.pb_al1 = a_pb;
                BbStrategy::KAndMal1FullLoad
            }
            (false, true) => {
                self.info.iterate_order = IterateOrder::MFirst;
                self.db.pb_bl1 = 1;
                BbStrategy::KAndNbl1FullLoad
            }
            (false, false) => {
                self.info.iterate_order =
                    if fmap > weight { IterateOrder::MFirst } else { IterateOrder::NFirst };
                BbStrategy::KAndNoneFullLoad
            }
        }
    }

    fn select_tiling_strategy(&mut self) -> BbStrategy {
        let info = &*self.info;
        if info.k_al1_full_load && info.k_bl1_full_load {
            return self.k_ab_full_load_strategy();
        }
        if info.iterate_order == IterateOrder::NFirst {
            if info.k_al1_full_load && info.m_al1_full_load {
                BbStrategy::FmapFullLoad
            } else if info.k_al1_full_load {
                BbStrategy::FmapKFullLoad
            } else {
                BbStrategy::NFirstKSplit
            }
        } else if info.k_bl1_full_load && info.n_bl1_full_load {
            BbStrategy::WeightFullLoad
        } else if info.k_bl1_full_load {
            BbStrategy::WeightKFullLoad
        } else {
            BbStrategy::MFirstKSplit
        }
    }

    fn update_final_full_load(&mut self) {
        let s = &self.ctx.shape;
        self.info.m_al1_full_load = if !self.enable_inner_batch {
            self.multi_m * self.info.m_tile >= s.single_m
        } else {
            self.inner_batch >= s.single_batch
        };
        self.info.n_bl1_full_load = self.multi_n * self.info.n_tile >= s.single_co;
        self.info.k_al1_full_load = self.params.k_al1 == self.ci1_k0;
        self.info.k_bl1_full_load = self.params.k_bl1 == self.ci1_k0 * self.org_khkw();

        let pb_a = if self.info.k_al1_full_load && self.info.m_al1_full_load { 1 } else { DOUBLE_BUFFER_NUM };
        let pb_b = if self.info.k_bl1_full_load && self.info.n_bl1_full_load { 1 } else { DOUBLE_BUFFER_NUM };
        self.db.pb_al1 = if self.al1_db_close { 1 } else { pb_a };
        self.db.pb_bl1 = if self.bl1_db_close { 1 } else { pb_b };
        self.settle_l1_double_buffer();

        match (self.db.pb_al1, self.db.pb_bl1) {
            (1, DOUBLE_BUFFER_NUM) => self.info.iterate_order = IterateOrder::NFirst,
            (DOUBLE_BUFFER_NUM, 1) => self.info.iterate_order = IterateOrder::MFirst,
            _ => {}
        }
        let a_resident = self.info.k_al1_full_load && self.info.m_al1_full_load;
        let b_resident = self.info.k_bl1_full_load && self.info.n_bl1_full_load;
        if a_resident && !b_resident {
            self.info.iterate_order = IterateOrder::NFirst;
        }
    }

    /// Closes operand double buffers, larger operand first, until the chosen
    /// extents fit L1.
    fn settle_l1_double_buffer(&mut self) {
        while self.l1_bytes() > self.ctx.platform.l1_size {
            let (fmap, weight) = self.operand_l1();
            if self.db.pb_al1 > 1 && (fmap >= weight || self.db.pb_bl1 == 1) {
                self.db.pb_al1 = 1;
                self.al1_db_close = true;
            } else if self.db.pb_bl1 > 1 {
                self.db.pb_bl1 = 1;
                self.bl1_db_close = true;
            } else {
                break;
            }
            debug!(pb_al1 = self.db.pb_al1, pb_bl1 = self.db.pb_bl1, "l1 double buffer closed");
        }
    }

    fn set_l1_result(&mut self) {
        let s = &self.ctx.shape;
        let CubeShape { m0, n0, .. } = self.ctx.cube;
        let info = &*self.info;
        self.l1 = L1TilingRes {
            k_al1: self.params.k_al1 * self.org_khkw(),
            k_bl1: self.params.k_bl1,
            m_al1: if info.m_al1_full_load { s.single_m1 * m0 } else { self.multi_m * info.m_tile },
            n_bl1: if info.n_bl1_full_load { s.single_co1 * n0 } else { self.multi_n * info.n_tile },
            iterate_order: info.iterate_order,
            al1_full_load: info.m_al1_full_load && info.k_al1_full_load,
            bl1_full_load: info.n_bl1_full_load && info.k_bl1_full_load,
            bias_full_load: info.bias_full_load,
            fixp_full_load: info.fixp_full_load,
            ..L1TilingRes::default()
        };
    }

    fn l1_tiling(&mut self) -> Result<()> {
        self.calc_available_l1();
        let s = &self.ctx.shape;
        self.fmap_full_size = (self.info.m_in * self.ci1_k0 * self.ctx.fmap_bytes() * self.inner_batch) as i64;
        self.weight_full_size = (self.org_khkw() * self.ci1_k0 * self.info.n_tile * self.ctx.weight_bytes()) as i64;

        self.params.m_al1 = self.info.m_in;
        self.params.n_bl1 = self.info.n_tile;
        if self.info.m_tile >= s.single_m {
            self.info.m_al1_full_load = true;
        }
        debug!(
            k_al1_full = self.info.k_al1_full_load,
            k_bl1_full = self.info.k_bl1_full_load,
            m_al1_full = self.info.m_al1_full_load,
            n_bl1_full = self.info.n_bl1_full_load,
            "bb l1 flags"
        );

        let strategy = self.select_tiling_strategy();
        debug!(%strategy, "bb l1 strategy");
        if !strategy.tiling_params(self) {
            error!(%strategy, "no basic block L1 tiling fits");
            return NoL1StrategySnafu.fail();
        }
        self.update_final_full_load();
        let required = self.l1_bytes();
        let capacity = self.ctx.platform.l1_size;
        if required > capacity {
            error!(required, capacity, "basic block tiling exceeds L1");
            return L1CapacitySnafu { required, capacity }.fail();
        }
        self.set_l1_result();
        Ok(())
    }

    fn k_l0(&mut self) -> Result<()> {
        let k0 = self.ctx.cube.k0;
        let p = &self.ctx.platform;
        let k_l1 = self.l1.k_al1.min(self.l1.k_bl1) / k0;
        let m_side =
            p.l0a_size / self.ctx.fmap_bytes() / DOUBLE_BUFFER_NUM / self.info.m_tile.max(1) / self.inner_batch;
        let n_side = p.l0b_size / self.ctx.weight_bytes() / DOUBLE_BUFFER_NUM / self.info.n_tile.max(1);
        let k_l0_max = m_side.min(n_side) / k0;
        let Some(&best) = comm_factors(k_l1, k_l0_max).last() else {
            error!(k_l1, k_l0_max, "no kL0 candidate in basic block mode");
            return EmptyLatticeSnafu { axis: "kL0" }.fail();
        };
        self.info.k_tile = best * k0;
        Ok(())
    }

    fn l0c_double_buffer(&mut self) {
        let s = &self.ctx.shape;
        let (m_l0, k_l0, n_l0) = (self.info.m_tile, self.info.k_tile, self.info.n_tile);
        if self.buf.cl0(m_l0, n_l0, &self.db) <= self.ctx.platform.l0c_size / DOUBLE_BUFFER_NUM {
            self.db.pb_cl0 = DOUBLE_BUFFER_NUM;
        }
        let k_full = k_l0 == s.single_ci1 * self.ctx.cube.k0 * s.single_kh * s.single_kw;
        if k_full && s.single_m <= m_l0 {
            self.db.pb_al0 = 1;
        }
        if k_full && s.single_co <= n_l0 {
            self.db.pb_bl0 = 1;
        }
        if self.db.pb_al0 == DOUBLE_BUFFER_NUM && self.db.pb_bl0 == DOUBLE_BUFFER_NUM && k_full {
            if self.l1.iterate_order == IterateOrder::MFirst {
                self.db.pb_bl0 = 1;
            } else {
                self.db.pb_al0 = 1;
            }
        }
        match (self.db.pb_al0, self.db.pb_bl0) {
            (DOUBLE_BUFFER_NUM, 1) => self.l1.iterate_order = IterateOrder::MFirst,
            (1, DOUBLE_BUFFER_NUM) => self.l1.iterate_order = IterateOrder::NFirst,
            _ => {}
        }
    }

    fn l0_tiling(&mut self) -> Result<()> {
        self.k_l0()?;
        self.l0c_double_buffer();
        self.l0 = L0TilingRes {
            m_l0: self.info.m_tile,
            k_l0: self.info.k_tile,
            n_l0: self.info.n_tile,
            ..Default::default()
        };
        Ok(())
    }
}

impl TilingAlgorithm for BbTiling<'_> {
    fn process(mut self) -> Result<TilingOutcome> {
        self.tile()
    }
}

impl BbTiling<'_> {
    /// Phase 2 in place, leaving the chosen extents readable through
    /// [`Self::l1_bytes`].
    #[tracing::instrument(skip_all, fields(m_tile = self.info.m_tile, n_tile = self.info.n_tile))]
    pub fn tile(&mut self) -> Result<TilingOutcome> {
        self.init_ping_pong();
        self.l1_tiling()?;
        self.l0_tiling()?;
        debug!(
            k_al1 = self.l1.k_al1,
            k_bl1 = self.l1.k_bl1,
            m_al1 = self.l1.m_al1,
            n_bl1 = self.l1.n_bl1,
            k_l0 = self.l0.k_l0,
            pbuffer = self.db.pbuffer_flag(),
            "basic block tiling done"
        );
        Ok(TilingOutcome {
            l0: self.l0,
            l1: self.l1,
            db: self.db,
            ub: UbTilingRes::default(),
            inner_batch: self.inner_batch,
        })
    }
}
