//! Flattened output tiling.
//!
//! Output height and width are collapsed into one axis M. L0 tiling walks the
//! M and N lattices together, L1 tiling picks a load mode (both operands,
//! one operand, or neither resident over K) and then grows the remaining
//! axes while L1 holds the working set.

use snafu::{OptionExt, ensure};
use tracing::{debug, trace};

use cubetile_dtype::{C0_SIZE, ConvDType, CubeShape};

use crate::buffer::BufferModel;
use crate::context::{C04_CIN_SIZE, FP16_DTYPE_SIZE, MAD_DTYPE_SIZE, TilingContext};
use crate::error::*;
use crate::math::{Lattice, align_up, ceil_div, comm_factors, comm_factors_pow2, gcd, scale};
use crate::tiling::{
    DATACOPYPARAMS_BURSTLEN_MAX, DOUBLE_BUFFER_NUM, DoubleBuffer, IterateOrder, L0TilingRes, L1LoadMode, L1TilingRes,
    LOAD3D_M_START_POS_LIMIT, MAX_16_BIT_NUM, POSTK_LIMIT, TilingAlgorithm, TilingOutcome, UbTilingRes,
    VEC_NUM_PER_CUBE,
};

/// Scale plus bias bytes per channel staged in UB, fp32 bias.
const TOTAL_SCALE_BIAS_32_TYPE_SIZE: u64 = 8;
/// Scale plus both bias copies per channel, half bias.
const TOTAL_SCALE_BIAS_16_TYPE_SIZE: u64 = 10;
const MAX_OUT_TYPE_SIZE: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    KA = 0,
    KB = 1,
    MA = 2,
    NB = 3,
}

/// Byte sizes derived once the L0 tile is known.
#[derive(Debug, Clone, Copy, Default)]
struct L1Calc {
    ci0_hk_wk: u64,
    c04_k_align: u64,
    k_al1_full: u64,
    k_bl1_full: u64,
    fmap_full: u64,
    weight_full: u64,
    fmap_min: u64,
    fmap_k_full: u64,
    weight_min: u64,
    weight_k_full: u64,
    bias_min: u64,
    fixp_min: u64,
}

/// Which operands can hold their whole K extent in L1.
#[derive(Debug, Clone, Copy, Default)]
struct KFullLoad {
    a: bool,
    b: bool,
    both: bool,
}

/// M-mode search state for one run.
#[derive(Debug)]
pub struct MTiling<'a> {
    ctx: &'a TilingContext,
    buf: BufferModel<'a>,
    db: DoubleBuffer,
    l0: L0TilingRes,
    inner_batch: u64,
    enable_inner_batch: bool,
    calc: L1Calc,
    ranges: [Lattice; 4],
    idx: [usize; 4],
    mode: L1LoadMode,
    order: IterateOrder,
    k_full: KFullLoad,
    bias_full: bool,
    fixp_full: bool,
    l1: L1TilingRes,
    ub: UbTilingRes,
}

impl<'a> MTiling<'a> {
    pub fn new(ctx: &'a TilingContext) -> Self {
        Self {
            ctx,
            buf: BufferModel::new(ctx),
            db: DoubleBuffer::default(),
            l0: L0TilingRes::default(),
            inner_batch: ctx.flags.inner_batch.max(1),
            enable_inner_batch: false,
            calc: L1Calc::default(),
            ranges: Default::default(),
            idx: [0; 4],
            mode: L1LoadMode::NoneFullLoad,
            order: IterateOrder::MFirst,
            k_full: KFullLoad::default(),
            bias_full: false,
            fixp_full: false,
            l1: L1TilingRes::default(),
            ub: UbTilingRes::default(),
        }
    }

    fn range(&self, axis: Axis) -> &Lattice {
        &self.ranges[axis as usize]
    }

    fn at(&self, axis: Axis) -> Option<u64> {
        self.ranges[axis as usize].get(self.idx[axis as usize]).copied()
    }

    fn last(&self, axis: Axis) -> usize {
        self.range(axis).len().saturating_sub(1)
    }

    // ------------------------------------------------------------------
    // L0
    // ------------------------------------------------------------------

    fn init_ping_pong(&mut self) {
        let CubeShape { m0, n0, .. } = self.ctx.cube;
        self.db.pb_al1 = DOUBLE_BUFFER_NUM;
        self.db.pb_bl1 = DOUBLE_BUFFER_NUM;
        let l1 = self.ctx.platform.l1_size;
        if self.l1_size_for_l0(m0, n0, self.ctx.platform.l0b_size) > l1 {
            self.db.pb_al1 = if self.l1_size_for_l0(m0, n0, 0) <= l1 { DOUBLE_BUFFER_NUM } else { 1 };
            self.db.pb_bl1 = 1;
        }
        self.db.pb_al0 = DOUBLE_BUFFER_NUM;
        self.db.pb_bl0 = DOUBLE_BUFFER_NUM;
        self.db.pb_cl0 = 1;
    }

    /// L1 bytes of the smallest L1 tile that feeds an `m_l0 x n_l0` L0 tile,
    /// with at least `reserve_weight` bytes set aside for operand B.
    fn l1_size_for_l0(&self, m_l0: u64, n_l0: u64, reserve_weight: u64) -> u64 {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let k0 = ctx.cube.k0;
        let (ka_min, kb_min) = if ctx.flags.c04 {
            (C04_CIN_SIZE, align_up(C04_CIN_SIZE * ctx.khkw(), k0))
        } else {
            (k0, ctx.khkw() * k0)
        };
        let ho = if s.org_wo == 0 { 0 } else { m_l0 / s.org_wo + 2 };
        let hi = ctx.infer_hi_l1(ho);
        let fmap = hi * s.org_wi * ka_min * ctx.fmap_bytes() * self.db.pb_al1;
        let weight = n_l0 * kb_min * ctx.weight_bytes() * self.db.pb_bl1;
        let mut used = fmap + weight.max(reserve_weight) + ctx.bias_l1(n_l0);
        if ctx.flags.has_scale {
            used += (ctx.fixpipe.channel_wise_coeff * (n_l0 * FP16_DTYPE_SIZE) as f32) as u64;
        }
        used
    }

    fn l0_candidate_fits(&self, m: u64, k: u64, n: u64) -> bool {
        self.buf.l0_fits(m, k, n, &self.db)
            && self.l1_size_for_l0(m, n, 0) <= self.ctx.platform.l1_size
            && self.buf.side_fits(n)
    }

    fn l0_tiling(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let p = &ctx.platform;
        let CubeShape { m0, k0, n0 } = ctx.cube;

        let n_max = (p.l0b_size / (k0 * self.db.pb_bl0 * ctx.weight_bytes()))
            .min(p.l0c_size / (m0 * self.db.pb_cl0 * MAD_DTYPE_SIZE));
        let mut n_range = comm_factors_pow2(ctx.shape.single_co1, n_max / n0);
        scale(&mut n_range, n0);

        let m_max = (p.l0a_size / (k0 * self.db.pb_al0 * ctx.fmap_bytes()))
            .min(p.l0c_size / (n0 * self.db.pb_cl0 * MAD_DTYPE_SIZE));
        let mut m_range = comm_factors_pow2(ceil_div(ctx.shape.single_m, m0), m_max / m0);
        scale(&mut m_range, m0);

        ensure!(!m_range.is_empty(), EmptyLatticeSnafu { axis: "mL0" });
        ensure!(!n_range.is_empty(), EmptyLatticeSnafu { axis: "nL0" });

        let (m_last, n_last) = (m_range.len() - 1, n_range.len() - 1);
        let (mut mi, mut ni) = (0, 0);
        let mut advance_m = false;
        let mut overflow = true;
        while self.l0_candidate_fits(m_range[mi], k0, n_range[ni]) {
            if mi == m_last && ni == n_last {
                overflow = false;
                break;
            }
            advance_m = if m_range[mi] <= n_range[ni] { mi != m_last } else { ni == n_last };
            if advance_m && mi < m_last {
                mi += 1;
            } else if !advance_m && ni < n_last {
                ni += 1;
            }
            if ctx.config.trace_candidates {
                trace!(m_l0 = m_range[mi], n_l0 = n_range[ni], "l0 candidate");
            }
        }
        if overflow {
            debug!(m_l0 = m_range[mi], n_l0 = n_range[ni], "l0 candidate exceeds buffers");
            if advance_m {
                mi = mi.saturating_sub(1);
            } else {
                ni = ni.saturating_sub(1);
            }
        }

        self.l0 = L0TilingRes { m_l0: m_range[mi], k_l0: k0, n_l0: n_range[ni], ..Default::default() };
        self.formulaic_inner_batch();
        Ok(())
    }

    /// Folds several batches into one pass when one core owns the whole
    /// output plane and L0/L1 leave room.
    fn formulaic_inner_batch(&mut self) {
        let ctx = self.ctx;
        let s = &ctx.shape;
        if !ctx.config.inner_batch.is_auto() || ctx.flags.c04 || ctx.attr.group_count() > 1 || ctx.is_dma {
            return;
        }
        let m_dim = ceil_div(s.org_wo * s.org_ho, s.single_m);
        if s.single_batch <= 1 || m_dim != 1 {
            return;
        }
        self.enable_inner_batch = true;

        let L0TilingRes { m_l0, k_l0, n_l0, .. } = self.l0;
        let p = &ctx.platform;
        let f = ctx.fmap_bytes();
        let w = ctx.weight_bytes();
        let div = |a: u64, b: u64| if b == 0 { 0 } else { a / b };
        let limit_l0a = div(p.l0a_size, 2 * f * m_l0 * k_l0);
        let limit_l0c = div(p.l0c_size, m_l0 * n_l0 * MAD_DTYPE_SIZE * 2);
        let weight = n_l0 * s.org_kh * s.org_kw * k_l0 * w * 2;
        let limit_l1 =
            div(p.l1_size.saturating_sub(ctx.bias_l1(n_l0)).saturating_sub(weight), s.org_wi * s.org_hi * k_l0 * f * 2);
        let limits = [limit_l0a, limit_l0c, limit_l1, s.single_batch];
        if limits.contains(&0) {
            self.enable_inner_batch = false;
            return;
        }
        let ib = limits.into_iter().min().unwrap_or(1);
        let ib = ib.min(ceil_div(s.single_batch, ceil_div(s.single_batch, ib)));
        self.inner_batch = ib;
        if ib == 1 {
            self.enable_inner_batch = false;
        }
        debug!(inner_batch = ib, enabled = self.enable_inner_batch, "formulaic inner batch");
    }

    // ------------------------------------------------------------------
    // L1
    // ------------------------------------------------------------------

    fn check_min_l1(&self) -> Result<()> {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let CubeShape { m0, k0, n0 } = ctx.cube;
        ensure!(s.org_wo != 0, InvalidShapeSnafu { name: "orgWo", value: 0u64 });
        let min_ho = (m0 / s.org_wo + 2).min(s.org_ho);
        let min_hi = ctx.infer_hi_l1(min_ho);
        let min_ka = if ctx.flags.c04 { C04_CIN_SIZE } else { k0 };
        let a = align_up(self.inner_batch * min_hi * s.org_wi * min_ka * ctx.fmap_bytes(), C0_SIZE);
        let min_kb = if ctx.flags.c04 { align_up(C04_CIN_SIZE * ctx.khkw(), k0) } else { ctx.khkw() * k0 };
        let b = align_up(min_kb * n0 * ctx.weight_bytes(), C0_SIZE);
        let bias = if ctx.flags.has_bias { align_up(n0 * ctx.bias_bytes(), C0_SIZE) } else { 0 };
        let mut required = a + b + bias;
        if ctx.flags.has_scale {
            required += (ctx.fixpipe.channel_wise_coeff * (n0 * FP16_DTYPE_SIZE) as f32) as u64;
        }
        let capacity = ctx.platform.l1_size;
        if required > capacity {
            tracing::error!(required, capacity, "minimum L1 load exceeds L1 with the kernel fully loaded");
            return L1CapacitySnafu { required, capacity }.fail();
        }
        Ok(())
    }

    fn init_l1_params(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let CubeShape { n0, k0, .. } = ctx.cube;
        let f = ctx.fmap_bytes();
        let w = ctx.weight_bytes();
        let c04 = ctx.flags.c04;

        let mut c = L1Calc {
            ci0_hk_wk: ctx.khkw() * k0,
            c04_k_align: align_up(C04_CIN_SIZE * ctx.khkw(), k0),
            ..Default::default()
        };
        c.k_bl1_full = if c04 { c.c04_k_align } else { s.single_ci1 * c.ci0_hk_wk };
        c.k_al1_full = if c04 { C04_CIN_SIZE } else { s.single_ci1 * k0 };

        let hi_full = ctx.infer_hi_l1(ctx.ho_of_m(s.single_m));
        let product = |terms: &[u64]| terms.iter().try_fold(1u64, |acc, &t| acc.checked_mul(t));

        product(&[s.single_ci1, hi_full, s.org_wi, k0, f]).context(SizeOverflowSnafu { what: "fmap full load" })?;
        c.fmap_full = product(&[c.k_al1_full, hi_full, s.org_wi, f, self.inner_batch])
            .context(SizeOverflowSnafu { what: "fmap full load" })?;
        product(&[s.single_ci1, c.ci0_hk_wk, s.single_co1, n0, w])
            .context(SizeOverflowSnafu { what: "weight full load" })?;
        c.weight_full = product(&[c.k_bl1_full, s.single_co1, n0, w])
            .context(SizeOverflowSnafu { what: "weight full load" })?;

        let n_l0 = self.l0.n_l0;
        let hi_min = ctx.infer_hi_l1(ctx.ho_of_m(self.l0.m_l0));
        let ka_min = if c04 { c.k_al1_full } else { k0 };
        let kb_min = if c04 { c.k_bl1_full } else { c.ci0_hk_wk };
        c.fmap_min = ka_min * hi_min * s.org_wi * f * self.db.pb_al1 * self.inner_batch;
        c.fmap_k_full = c.k_al1_full * hi_min * s.org_wi * self.db.pb_al1 * f * self.inner_batch;
        c.weight_min = (kb_min * n_l0 * self.db.pb_bl1 * w).max(ctx.platform.l0b_size);
        c.weight_k_full = c.k_bl1_full * n_l0 * self.db.pb_bl1 * w;
        c.bias_min = ctx.bias_l1(n_l0);
        c.fixp_min = ctx.fixp_l1(n_l0);
        self.calc = c;
        Ok(())
    }

    fn l1_ranges(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let CubeShape { m0, k0, n0 } = ctx.cube;
        let c = self.calc;

        let mut ka = comm_factors(s.single_ci1, s.single_ci1);
        let mut kb = ka.clone();
        let limit_ka = if c.ci0_hk_wk == 0 { 0 } else { (POSTK_LIMIT + k0) / c.ci0_hk_wk };
        ka.retain(|v| *v <= limit_ka);
        scale(&mut ka, c.ci0_hk_wk);
        scale(&mut kb, c.ci0_hk_wk);
        if ctx.flags.c04 {
            ka = Lattice::from_slice(&[c.c04_k_align]);
            kb = ka.clone();
        }
        ka.retain(|v| *v <= MAX_16_BIT_NUM);

        let multi_n = ceil_div(s.single_co1 * n0, self.l0.n_l0);
        let mut nb = comm_factors(multi_n, multi_n);
        scale(&mut nb, self.l0.n_l0);

        let multi_m = ceil_div(align_up(s.single_m, m0), self.l0.m_l0);
        let mut ma = comm_factors(multi_m, multi_m);
        scale(&mut ma, self.l0.m_l0);
        if ctx.limits_m_start() {
            ma.retain(|v| *v <= LOAD3D_M_START_POS_LIMIT);
        }

        ensure!(!ka.is_empty(), EmptyLatticeSnafu { axis: "kAL1" });
        ensure!(!kb.is_empty(), EmptyLatticeSnafu { axis: "kBL1" });
        ensure!(!ma.is_empty(), EmptyLatticeSnafu { axis: "mAL1" });
        ensure!(!nb.is_empty(), EmptyLatticeSnafu { axis: "nBL1" });
        self.ranges = [ka, kb, ma, nb];
        Ok(())
    }

    fn batch_loops(&self) -> bool {
        self.enable_inner_batch && ceil_div(self.ctx.shape.single_batch, self.inner_batch) > 1
    }

    fn init_l1_mode(&mut self) {
        let c = self.calc;
        let l1 = self.ctx.platform.l1_size;
        let m_exceeds = self.ctx.cube.m0 * self.ctx.shape.single_m1 > LOAD3D_M_START_POS_LIMIT;
        let side = c.bias_min + c.fixp_min;
        let all_possible = c.fmap_full + c.weight_full + side <= l1 && !m_exceeds;
        let weight_dominant = c.fmap_full <= c.weight_full * self.ctx.platform.bandwidth_coeff;
        let weight_possible = c.weight_full + c.fmap_min + side <= l1;
        let fmap_possible = c.weight_min + c.fmap_full + side <= l1 && !m_exceeds;

        self.mode = if all_possible {
            self.db.pb_al1 = 1;
            if self.batch_loops() {
                self.db.pb_al1 = DOUBLE_BUFFER_NUM;
                L1LoadMode::FullLoadB
            } else {
                L1LoadMode::AllFullLoad
            }
        } else if weight_dominant && weight_possible {
            L1LoadMode::FullLoadB
        } else if weight_dominant && fmap_possible {
            self.db.pb_al1 = 1;
            if self.batch_loops() {
                self.db.pb_al1 = DOUBLE_BUFFER_NUM;
                L1LoadMode::NoneFullLoad
            } else {
                L1LoadMode::FullLoadA
            }
        } else if fmap_possible {
            self.db.pb_al1 = 1;
            if self.batch_loops() {
                self.db.pb_al1 = DOUBLE_BUFFER_NUM;
                if weight_possible { L1LoadMode::FullLoadB } else { L1LoadMode::NoneFullLoad }
            } else {
                L1LoadMode::FullLoadA
            }
        } else if weight_possible {
            L1LoadMode::FullLoadB
        } else {
            L1LoadMode::NoneFullLoad
        };

        let (ka, kb, ma, nb) = (self.last(Axis::KA), self.last(Axis::KB), self.last(Axis::MA), self.last(Axis::NB));
        self.idx = match self.mode {
            L1LoadMode::NoneFullLoad => [0, 0, 0, 0],
            L1LoadMode::FullLoadA => [ka, 0, ma, 0],
            L1LoadMode::FullLoadB => [0, kb, 0, nb],
            L1LoadMode::AllFullLoad => [ka, kb, ma, nb],
        };
        debug!(mode = %self.mode, pb_al1 = self.db.pb_al1, "l1 load mode");
    }

    /// L1 bytes of the current candidate, `None` when an index is past its
    /// lattice.
    fn l1_used(&self) -> Option<u64> {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let c = self.calc;
        let n_full = s.single_co1 * ctx.cube.n0;
        let ho = ctx.ho_of_m(self.at(Axis::MA)?);
        let hi = ctx.infer_hi_l1(ho);
        let ka = self.at(Axis::KA)? / ctx.khkw().max(1);
        let mut fmap = ka * hi * s.org_wi * ctx.fmap_bytes() * self.db.pb_al1 * self.inner_batch;
        let mut weight = self.at(Axis::KB)? * self.db.pb_bl1 * self.at(Axis::NB)? * ctx.weight_bytes();
        let bias = ctx.bias_l1(if self.bias_full { n_full } else { self.l0.n_l0 });
        let fixp = ctx.fixp_l1(if self.fixp_full { n_full } else { self.l0.n_l0 });
        match self.mode {
            L1LoadMode::AllFullLoad => {
                fmap = c.fmap_full;
                weight = c.weight_full;
            }
            L1LoadMode::FullLoadA => fmap = c.fmap_full,
            L1LoadMode::FullLoadB => weight = c.weight_full,
            L1LoadMode::NoneFullLoad => {}
        }
        Some(fmap + weight + bias + fixp)
    }

    /// L1 bytes a finished outcome occupies, by the accounting the search
    /// uses: full-load operands at their whole-K size, the rest at their
    /// double buffer depth, bias and scale at full or per-tile width.
    pub fn l1_bytes(ctx: &'a TilingContext, outcome: &TilingOutcome) -> Result<u64> {
        let l1 = &outcome.l1;
        let mut sizer = Self {
            db: outcome.db,
            l0: outcome.l0,
            inner_batch: outcome.inner_batch,
            mode: match (l1.al1_full_load, l1.bl1_full_load) {
                (true, true) => L1LoadMode::AllFullLoad,
                (true, false) => L1LoadMode::FullLoadA,
                (false, true) => L1LoadMode::FullLoadB,
                (false, false) => L1LoadMode::NoneFullLoad,
            },
            bias_full: l1.bias_full_load,
            fixp_full: l1.fixp_full_load,
            ..Self::new(ctx)
        };
        sizer.init_l1_params()?;
        sizer.ranges = [l1.k_al1, l1.k_bl1, l1.m_al1, l1.n_bl1].map(|v| Lattice::from_slice(&[v]));
        sizer.l1_used().context(EmptyLatticeSnafu { axis: "mAL1" })
    }

    fn l1_fits(&self) -> bool {
        self.l1_used().is_some_and(|used| used <= self.ctx.platform.l1_size)
    }

    /// Advances one axis while the candidate fits, then steps back onto the
    /// last index that did.
    fn grow(&mut self, axis: Axis) {
        let a = axis as usize;
        while self.idx[a] < self.ranges[a].len() && self.l1_fits() {
            if self.ctx.config.trace_candidates {
                trace!(?axis, value = self.ranges[a][self.idx[a]], "l1 candidate fits");
            }
            self.idx[a] += 1;
        }
        if let Some(v) = self.ranges[a].get(self.idx[a]) {
            debug!(?axis, value = v, "l1 candidate exceeds L1");
        }
        self.idx[a] = self.idx[a].saturating_sub(1);
    }

    /// Like [`Self::grow`] but restores the axis and returns the index found.
    fn peek_grow(&mut self, axis: Axis) -> usize {
        let start = self.idx[axis as usize];
        self.grow(axis);
        std::mem::replace(&mut self.idx[axis as usize], start)
    }

    fn core_l1_decision(&mut self) {
        match self.mode {
            L1LoadMode::AllFullLoad => self.order = IterateOrder::MFirst,
            L1LoadMode::FullLoadA => {
                self.order = IterateOrder::NFirst;
                self.grow(Axis::KB);
                if self.idx[Axis::KB as usize] == self.last(Axis::KB) {
                    self.grow(Axis::NB);
                }
            }
            L1LoadMode::FullLoadB => {
                self.order = IterateOrder::MFirst;
                self.grow(Axis::KA);
                if self.idx[Axis::KA as usize] == self.last(Axis::KA) {
                    self.grow(Axis::MA);
                }
            }
            L1LoadMode::NoneFullLoad => {
                self.init_k_full_load();
                self.no_full_load_iter();
            }
        }
    }

    fn init_k_full_load(&mut self) {
        let c = self.calc;
        let l1 = self.ctx.platform.l1_size;
        let side = c.bias_min + c.fixp_min;
        if c.fmap_k_full + c.weight_k_full + side <= l1 {
            self.k_full = KFullLoad { a: true, b: true, both: true };
            return;
        }
        self.k_full.a = c.fmap_k_full + c.weight_min + side <= l1;
        self.k_full.b = c.fmap_min + c.weight_k_full + side <= l1;
    }

    fn k_a_full_iter(&mut self) {
        self.order = IterateOrder::NFirst;
        self.grow(Axis::KB);
        self.grow(Axis::MA);
    }

    fn k_b_full_iter(&mut self) {
        self.order = IterateOrder::MFirst;
        self.grow(Axis::KA);
        self.grow(Axis::NB);
    }

    /// Single-core traffic of the feature map and the weight when their K
    /// extent is resident.
    fn single_core_loads(&self) -> (u64, u64) {
        let ctx = self.ctx;
        let hi = ctx.infer_hi_l1(ctx.ho_of_m(ctx.shape.single_m));
        (self.calc.k_al1_full * hi * ctx.shape.org_wi, self.calc.weight_k_full)
    }

    fn no_full_load_iter(&mut self) {
        let KFullLoad { a, b, both } = self.k_full;
        let bw = self.ctx.platform.bandwidth_coeff;
        let s = &self.ctx.shape;
        if a && !b {
            self.idx[Axis::KA as usize] = self.last(Axis::KA);
            self.k_a_full_iter();
            return;
        }
        if b && !a {
            self.idx[Axis::KB as usize] = self.last(Axis::KB);
            self.k_b_full_iter();
            return;
        }
        let (fmap, weight) = self.single_core_loads();
        if (a || b) && !both {
            let only_a = fmap + weight * bw * ceil_div(s.single_m, self.l0.m_l0);
            let only_b = fmap * ceil_div(s.single_co, self.l0.n_l0) + weight * bw;
            if only_a < only_b {
                self.idx[Axis::KA as usize] = self.last(Axis::KA);
                self.k_a_full_iter();
            } else {
                self.idx[Axis::KB as usize] = self.last(Axis::KB);
                self.k_b_full_iter();
            }
            return;
        }
        if both {
            self.idx[Axis::KA as usize] = self.last(Axis::KA);
            self.idx[Axis::KB as usize] = self.last(Axis::KB);
            let m_idx = self.peek_grow(Axis::MA);
            let n_idx = self.peek_grow(Axis::NB);
            let m_al1 = self.range(Axis::MA)[m_idx];
            let n_bl1 = self.range(Axis::NB)[n_idx];
            let iter_n = fmap + weight * bw * ceil_div(s.single_m, m_al1);
            let iter_m = fmap * ceil_div(s.single_co, n_bl1) + weight * bw;
            if iter_n < iter_m {
                self.order = IterateOrder::NFirst;
                self.idx[Axis::MA as usize] = m_idx;
            } else {
                self.order = IterateOrder::MFirst;
                self.idx[Axis::NB as usize] = n_idx;
            }
            return;
        }
        let (ka, kb) = (Axis::KA as usize, Axis::KB as usize);
        while self.idx[ka] < self.ranges[ka].len() && self.l1_fits() {
            self.idx[ka] += 1;
            self.idx[kb] += 1;
        }
        self.order = IterateOrder::MFirst;
        self.idx[ka] = self.idx[ka].saturating_sub(1);
        self.idx[kb] = self.idx[kb].saturating_sub(1);
    }

    fn bias_l1_decision(&mut self) {
        let ctx = self.ctx;
        if !ctx.flags.has_bias && !ctx.flags.has_scale {
            return;
        }
        if self.bias_full && self.fixp_full {
            return;
        }
        let burst_checked = ctx.platform.soc_version.limits_burst_len();
        let n_full = ctx.shape.single_co1 * ctx.cube.n0;
        if !self.bias_full {
            self.bias_full = true;
            let exceeds = burst_checked && n_full * ctx.bias_bytes() > DATACOPYPARAMS_BURSTLEN_MAX;
            if !self.l1_fits() || exceeds {
                self.bias_full = false;
            }
        }
        if !self.fixp_full {
            self.fixp_full = true;
            let exceeds = burst_checked && n_full * ctx.scale_dtype_bytes() > DATACOPYPARAMS_BURSTLEN_MAX;
            if !self.l1_fits() || exceeds {
                self.fixp_full = false;
            }
        }
    }

    fn k_l0_decision(&mut self) -> Result<()> {
        let k0 = self.ctx.cube.k0;
        let ka = self.at(Axis::KA).context(EmptyLatticeSnafu { axis: "kAL1" })?;
        let kb = self.at(Axis::KB).context(EmptyLatticeSnafu { axis: "kBL1" })?;
        let g = gcd(ceil_div(ka, k0), ceil_div(kb, k0));
        let mut range = comm_factors(g, g);
        scale(&mut range, k0);
        ensure!(!range.is_empty(), EmptyLatticeSnafu { axis: "kL0" });

        let L0TilingRes { m_l0, n_l0, .. } = self.l0;
        let mut i = 0;
        while i < range.len() && self.buf.l0_fits(m_l0, range[i], n_l0, &self.db) {
            i += 1;
        }
        self.l0.k_l0 = range[i.saturating_sub(1)];
        Ok(())
    }

    fn update_l1_double_buffer(&mut self) {
        use L1LoadMode::*;
        if matches!(self.mode, AllFullLoad | FullLoadA) {
            self.db.pb_al1 = 1;
        }
        if !matches!(self.mode, FullLoadB | AllFullLoad) {
            self.db.pb_bl1 = DOUBLE_BUFFER_NUM;
            if !self.l1_fits() {
                self.db.pb_bl1 = 1;
            }
        }
        if matches!(self.mode, AllFullLoad | FullLoadB) {
            self.db.pb_bl1 = 1;
        }
    }

    fn set_l1_result(&mut self) -> Result<()> {
        let s = &self.ctx.shape;
        let CubeShape { m0, n0, .. } = self.ctx.cube;
        let missing = |axis| EmptyLatticeSnafu { axis };
        let mut l1 = L1TilingRes {
            k_al1: self.at(Axis::KA).context(missing("kAL1"))?,
            k_bl1: self.at(Axis::KB).context(missing("kBL1"))?,
            m_al1: self.at(Axis::MA).context(missing("mAL1"))?,
            n_bl1: self.at(Axis::NB).context(missing("nBL1"))?,
            iterate_order: self.order,
            bias_full_load: self.bias_full,
            fixp_full_load: self.fixp_full,
            ..Default::default()
        };
        let m_full = align_up(s.single_m, m0);
        let n_full = s.single_co1 * n0;
        match self.mode {
            L1LoadMode::FullLoadB => {
                l1.n_bl1 = n_full;
                l1.bl1_full_load = true;
            }
            L1LoadMode::FullLoadA => {
                l1.m_al1 = m_full;
                l1.al1_full_load = true;
            }
            L1LoadMode::AllFullLoad => {
                l1.n_bl1 = n_full;
                l1.m_al1 = m_full;
                l1.al1_full_load = true;
                l1.bl1_full_load = true;
            }
            L1LoadMode::NoneFullLoad => {}
        }
        self.l1 = l1;
        Ok(())
    }

    fn l0c_double_buffer(&mut self) {
        let s = &self.ctx.shape;
        let L0TilingRes { m_l0, k_l0, n_l0, .. } = self.l0;
        if self.buf.cl0(m_l0, n_l0, &self.db) <= self.ctx.platform.l0c_size / DOUBLE_BUFFER_NUM {
            self.db.pb_cl0 = DOUBLE_BUFFER_NUM;
        }
        let k_full = k_l0 == s.single_ci1 * self.calc.ci0_hk_wk;
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

    fn l1_tiling(&mut self) -> Result<()> {
        self.check_min_l1()?;
        self.init_l1_params()?;
        self.l1_ranges()?;
        self.init_l1_mode();
        self.core_l1_decision();
        self.bias_l1_decision();
        self.k_l0_decision()?;
        self.update_l1_double_buffer();
        self.set_l1_result()?;
        self.l0c_double_buffer();
        Ok(())
    }

    // ------------------------------------------------------------------
    // UB
    // ------------------------------------------------------------------

    fn scale_bias_ub(&mut self) {
        let ctx = self.ctx;
        let L0TilingRes { m_l0, n_l0, .. } = self.l0;
        if m_l0 == 0 || n_l0 == 0 || !ctx.flags.scale_bias_in_ub {
            return;
        }
        let per_channel = if ctx.desc.bias.is_some_and(|b| b.dtype == ConvDType::Float32) {
            TOTAL_SCALE_BIAS_32_TYPE_SIZE
        } else {
            TOTAL_SCALE_BIAS_16_TYPE_SIZE
        };
        let mut m_ub = comm_factors(m_l0, m_l0)
            .into_iter()
            .rev()
            .find(|m| n_l0 * (m * MAX_OUT_TYPE_SIZE + per_channel) <= ctx.platform.ub_size)
            .unwrap_or(0);
        if m_ub == m_l0 {
            m_ub = ceil_div(m_l0, VEC_NUM_PER_CUBE);
        }
        self.ub = UbTilingRes { m_ub, n_ub: n_l0 };
    }
}

impl TilingAlgorithm for MTiling<'_> {
    #[tracing::instrument(skip_all, fields(single_m = self.ctx.shape.single_m, single_co = self.ctx.shape.single_co))]
    fn process(mut self) -> Result<TilingOutcome> {
        self.init_ping_pong();
        self.l0_tiling()?;
        self.l1_tiling()?;
        self.scale_bias_ub();
        debug!(
            m_l0 = self.l0.m_l0,
            k_l0 = self.l0.k_l0,
            n_l0 = self.l0.n_l0,
            m_al1 = self.l1.m_al1,
            n_bl1 = self.l1.n_bl1,
            mode = %self.mode,
            "m-mode tiling done"
        );
        let outcome =
            TilingOutcome { l0: self.l0, l1: self.l1, db: self.db, ub: self.ub, inner_batch: self.inner_batch };
        let required = Self::l1_bytes(self.ctx, &outcome)?;
        let capacity = self.ctx.platform.l1_size;
        if required > capacity {
            tracing::error!(required, capacity, "m-mode tiling exceeds L1");
            return L1CapacitySnafu { required, capacity }.fail();
        }
        Ok(outcome)
    }
}
