//! Split output tiling.
//!
//! Output height and width stay independent axes. L0 tiling advances
//! whichever of (ho, wo, n) is furthest behind; L1 tiling chooses a load
//! mode from full-size estimates, then walks strict candidate lists that
//! start at the mode's initial tile. The direct copy datapath additionally
//! tiles the kernel window and stages rows through UB.

use snafu::ensure;
use tracing::{debug, trace};

use cubetile_dtype::{C0_SIZE, CubeShape};

use crate::buffer::BufferModel;
use crate::context::{C04_CIN_SIZE, MAD_DTYPE_SIZE, TilingContext};
use crate::error::*;
use crate::math::{Lattice, align_up, ceil_div, comm_factors, comm_factors_of_two, comm_factors_pow2, scale};
use crate::tiling::{
    DATACOPYPARAMS_BURSTLEN_MAX, DOUBLE_BUFFER_NUM, DoubleBuffer, IterateOrder, L0TilingRes, L1LoadMode, L1TilingRes,
    LOAD3D_M_START_POS_LIMIT, LOAD3DV2_HIN_WIN_LIMIT, MAX_16_BIT_NUM, TilingAlgorithm, TilingOutcome, UbTilingRes,
};

/// One L1 candidate. `k_al1` excludes the kernel window outside DMA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct L1Params {
    k_al1: u64,
    k_bl1: u64,
    ho_al1: u64,
    wo_al1: u64,
    n_bl1: u64,
}

impl L1Params {
    fn has_zero(&self) -> bool {
        [self.k_al1, self.k_bl1, self.ho_al1, self.wo_al1, self.n_bl1].contains(&0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct HwL1Calc {
    ci0_hk_wk: u64,
    ci0_khl1_kwl1: u64,
    c04_k_align: u64,
    kh_l1: u64,
    kw_l1: u64,
    ho_al1_min: u64,
    wo_al1_min: u64,
    k_al1_max: u64,
    k_bl1_max: u64,
    n_bl1_max: u64,
    a_l1_max: u64,
    b_l1_max: u64,
    bias_l1_max: u64,
    fixp_l1_max: u64,
    a_l1_min: u64,
    b_l1_min: u64,
    bias_l1_min: u64,
    fixp_l1_min: u64,
    ub_max: u64,
}

#[derive(Debug, Clone, Default)]
struct L1Ranges {
    k_al1: Lattice,
    k_bl1: Lattice,
    ho_al1: Lattice,
    wo_al1: Lattice,
    n_bl1: Lattice,
}

/// Elements of `range` not below `floor`, with `floor` itself in front.
fn restrict_range(range: &[u64], floor: u64) -> Lattice {
    let start = range.iter().position(|&v| v >= floor).unwrap_or(range.len());
    let mut strict = Lattice::from_slice(&range[start..]);
    if strict.first().is_none_or(|&first| floor < first) {
        strict.insert(0, floor);
    }
    strict
}

/// HW-mode search state for one run.
#[derive(Debug)]
pub struct HwTiling<'a> {
    ctx: &'a TilingContext,
    buf: BufferModel<'a>,
    db: DoubleBuffer,
    l0: L0TilingRes,
    l0_ranges: [Lattice; 3],
    l0_idx: [usize; 3],
    calc: HwL1Calc,
    ranges: L1Ranges,
    strict: L1Ranges,
    init: L1Params,
    params: L1Params,
    mode: L1LoadMode,
    order: IterateOrder,
    wo_must_full: bool,
    kernel_split: bool,
    bias_full: bool,
    fixp_full: bool,
    single_ci1: u64,
    single_co1: u64,
    l1: L1TilingRes,
}

const HO: usize = 0;
const WO: usize = 1;
const N: usize = 2;

impl<'a> HwTiling<'a> {
    pub fn new(ctx: &'a TilingContext) -> Self {
        Self {
            ctx,
            buf: BufferModel::new(ctx),
            db: DoubleBuffer::default(),
            l0: L0TilingRes::default(),
            l0_ranges: Default::default(),
            l0_idx: [0; 3],
            calc: HwL1Calc { kh_l1: 1, kw_l1: 1, ..Default::default() },
            ranges: L1Ranges::default(),
            strict: L1Ranges::default(),
            init: L1Params::default(),
            params: L1Params::default(),
            mode: L1LoadMode::NoneFullLoad,
            order: IterateOrder::MFirst,
            wo_must_full: false,
            kernel_split: false,
            bias_full: false,
            fixp_full: false,
            single_ci1: ctx.shape.single_ci1,
            single_co1: ctx.shape.single_co1,
            l1: L1TilingRes::default(),
        }
    }

    fn trace_on(&self) -> bool {
        self.ctx.config.trace_candidates
    }

    /// Input columns for `wo` output columns. C04 loads full rows once the
    /// whole single-core width is covered.
    fn infer_wi(&self, wo: u64) -> u64 {
        if self.ctx.flags.c04 && wo == self.ctx.shape.single_wo {
            return self.ctx.shape.org_wi;
        }
        self.ctx.infer_wi_l1(wo)
    }

    fn c04_fmap(&self, hi: u64, wi: u64) -> u64 {
        let f = self.ctx.fmap_bytes();
        align_up(hi * wi, C0_SIZE / (f * C04_CIN_SIZE)) * C04_CIN_SIZE * f
    }

    /// L1 bytes of one candidate with bias and fixpipe parameters for
    /// `bias_n` channels.
    fn cur_l1_size(&self, t: &L1Params, bias_n: u64) -> u64 {
        let ctx = self.ctx;
        let f = ctx.fmap_bytes();
        let w = ctx.weight_bytes();
        let bias = if ctx.flags.has_bias { align_up(bias_n * ctx.bias_bytes(), C0_SIZE) } else { 0 };
        let fixp = align_up(ctx.fixp_l1(bias_n), C0_SIZE);
        let hi = ctx.infer_hi_l1(t.ho_al1);
        let wi = self.infer_wi(t.wo_al1);
        let (fmap, weight) = if ctx.flags.c04 {
            (self.c04_fmap(hi, wi) * self.db.pb_al1, t.k_bl1 * t.n_bl1 * self.db.pb_bl1 * w)
        } else {
            let plane = if ctx.is_dma { t.ho_al1 * t.wo_al1 } else { hi * wi };
            (
                align_up(plane * t.k_al1 * f * self.db.pb_al1, C0_SIZE),
                align_up(t.n_bl1 * t.k_bl1 * w * self.db.pb_bl1, C0_SIZE),
            )
        };
        if self.trace_on() {
            trace!(?t, fmap, weight, bias, fixp, "l1 size");
        }
        fmap + weight + bias + fixp
    }

    /// L1 bytes a finished outcome occupies. Bias and scale count at full
    /// width when they are fully loaded, at the `nBL1` width otherwise.
    pub fn l1_bytes(ctx: &'a TilingContext, outcome: &TilingOutcome) -> u64 {
        let l1 = &outcome.l1;
        let k_al1 = if ctx.flags.c04 || ctx.is_dma { l1.k_al1 } else { l1.k_al1 / ctx.khkw().max(1) };
        let t = L1Params { k_al1, k_bl1: l1.k_bl1, ho_al1: l1.ho_al1, wo_al1: l1.wo_al1, n_bl1: l1.n_bl1 };
        let n_full = ceil_div(ctx.shape.single_co, ctx.cube.n0) * ctx.cube.n0;
        let bias_n = if l1.bias_full_load { n_full } else { l1.n_bl1 };
        Self { db: outcome.db, ..Self::new(ctx) }.cur_l1_size(&t, bias_n)
    }

    fn cur_ub_size(&self, ho: u64, wo: u64, kh: u64, kw: u64) -> u64 {
        if !self.ctx.is_dma {
            return 0;
        }
        ho * wo * kh * kw * self.ctx.cube.k0 * self.ctx.fmap_bytes()
    }

    fn fits_l1(&self, t: &L1Params, bias_n: u64) -> bool {
        self.cur_l1_size(t, bias_n) <= self.ctx.platform.l1_size
    }

    // ------------------------------------------------------------------
    // L0
    // ------------------------------------------------------------------

    fn init_ping_pong(&mut self) {
        let CubeShape { m0, k0, n0 } = self.ctx.cube;
        let pb = if self.ctx.is_dma { 1 } else { DOUBLE_BUFFER_NUM };
        self.db = DoubleBuffer {
            pb_al1: pb,
            pb_bl1: pb,
            pb_al0: DOUBLE_BUFFER_NUM,
            pb_bl0: DOUBLE_BUFFER_NUM,
            pb_cl0: 1,
            pb_ub: 1,
        };
        let smallest = L1Params { k_al1: k0, k_bl1: self.ctx.khkw() * k0, ho_al1: 1, wo_al1: m0, n_bl1: n0 };
        if !self.fits_l1(&smallest, n0) {
            self.db.pb_al1 = 1;
            self.db.pb_bl1 = 1;
        }
    }

    fn l1_size_for_l0(&self, ho: u64, wo: u64, n: u64) -> u64 {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let k0 = ctx.cube.k0;
        let f = ctx.fmap_bytes();
        let w = ctx.weight_bytes();
        let (mut hi, mut wi) = (0, 0);
        let mut a = if ctx.is_dma {
            k0 * wo * ho * f
        } else {
            hi = ctx.infer_hi_l1(ho);
            wi = self.infer_wi(wo);
            k0 * wi * hi * f
        };
        let mut b = if ctx.is_dma { k0 * n * w } else { s.org_kh * s.org_kw * k0 * n * w };
        if ctx.flags.c04 {
            if self.wo_must_full {
                wi = s.org_wi;
            }
            a = self.c04_fmap(hi, wi);
            b = align_up(s.org_kh * s.org_kw * C04_CIN_SIZE, k0) * n * w;
        }
        a + b + ctx.bias_l1(n) + ctx.fixp_l1(n)
    }

    fn l0_fits(&self, ho: u64, wo: u64, n: u64) -> bool {
        let p = &self.ctx.platform;
        self.buf.l0_fits(ho * wo, self.ctx.cube.k0, n, &self.db)
            && self.l1_size_for_l0(ho, wo, n) <= p.l1_size
            && self.buf.side_fits(n)
            && self.cur_ub_size(ho, wo, 1, 1) <= p.ub_size
    }

    fn l0_value(&self, axis: usize) -> u64 {
        self.l0_ranges[axis][self.l0_idx[axis]]
    }

    fn l0_ranges(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let p = &ctx.platform;
        let CubeShape { m0, k0, n0 } = ctx.cube;

        let m_max = (p.l0a_size / (k0 * self.db.pb_al0 * ctx.fmap_bytes()))
            .min(p.l0c_size / (n0 * self.db.pb_cl0 * MAD_DTYPE_SIZE));
        let ho_max = (m_max / s.single_wo.max(1)).min(s.single_ho).max(1);
        let ho = comm_factors_pow2(s.single_ho, ho_max);

        let wo_max = m_max.min(s.single_wo);
        let mut wo = comm_factors_pow2(ceil_div(s.single_wo, m0), ceil_div(wo_max, m0));
        scale(&mut wo, m0);

        let n_max = (p.l0b_size / (k0 * self.db.pb_bl0 * ctx.weight_bytes()))
            .min(p.l0c_size / (m0 * self.db.pb_cl0 * MAD_DTYPE_SIZE));
        let mut n = comm_factors_pow2(self.single_co1, n_max / n0);
        scale(&mut n, n0);

        ensure!(!ho.is_empty(), EmptyLatticeSnafu { axis: "hoL0" });
        ensure!(!wo.is_empty(), EmptyLatticeSnafu { axis: "woL0" });
        ensure!(!n.is_empty(), EmptyLatticeSnafu { axis: "nL0" });
        self.l0_ranges = [ho, wo, n];
        Ok(())
    }

    /// Moves the axis furthest from saturation one step; `false` once every
    /// axis is at its top.
    fn advance_l0(&mut self) -> bool {
        let (ho, wo, n) = (self.l0_value(HO), self.l0_value(WO), self.l0_value(N));
        let order = if n < ho * wo { [N, WO, HO] } else { [WO, HO, N] };
        for axis in order {
            if self.l0_idx[axis] + 1 < self.l0_ranges[axis].len() {
                self.l0_idx[axis] += 1;
                return true;
            }
        }
        false
    }

    fn l0_decision(&mut self) {
        self.l0_idx = [0; 3];
        let mut prev = self.l0_idx;
        let mut exhausted = false;
        while self.l0_fits(self.l0_value(HO), self.l0_value(WO), self.l0_value(N)) {
            prev = self.l0_idx;
            if !self.advance_l0() {
                exhausted = true;
                break;
            }
            if self.trace_on() {
                trace!(ho = self.l0_value(HO), wo = self.l0_value(WO), n = self.l0_value(N), "l0 candidate");
            }
        }
        if !exhausted {
            debug!(
                ho = self.l0_value(HO),
                wo = self.l0_value(WO),
                n = self.l0_value(N),
                "l0 candidate exceeds buffers"
            );
            self.l0_idx = prev;
        }
        self.l0 = L0TilingRes {
            ho_l0: self.l0_value(HO),
            wo_l0: self.l0_value(WO),
            n_l0: self.l0_value(N),
            k_l0: self.ctx.cube.k0,
            m_l0: 0,
        };
    }

    fn l0_tiling(&mut self) -> Result<()> {
        self.l0_ranges()?;
        self.l0_decision();
        self.db.pb_cl0 = DOUBLE_BUFFER_NUM;
        if self.buf.cl0(self.l0.ho_l0 * self.l0.wo_l0, self.l0.n_l0, &self.db) > self.ctx.platform.l0c_size {
            self.db.pb_cl0 = 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Kernel window (direct copy only)
    // ------------------------------------------------------------------

    /// Largest kernel-window factor along one axis whose candidate still fits,
    /// `None` when even the smallest does not.
    fn grow_kernel(&self, factors: &[u64], k_of: impl Fn(u64) -> u64) -> Option<u64> {
        let mut t =
            L1Params { ho_al1: self.l0.ho_l0, wo_al1: self.l0.wo_l0, n_bl1: self.l0.n_l0, ..Default::default() };
        let mut chosen = None;
        for &v in factors {
            t.k_al1 = k_of(v);
            t.k_bl1 = t.k_al1;
            if !self.fits_l1(&t, t.n_bl1) {
                break;
            }
            chosen = Some(v);
        }
        chosen
    }

    fn dma_l1_tiling(&mut self) -> Result<()> {
        if !self.ctx.is_dma {
            return Ok(());
        }
        let s = &self.ctx.shape;
        let k0 = self.ctx.cube.k0;
        let kw_range = comm_factors(s.single_kw, s.single_kw);
        let kh_range = comm_factors(s.single_kh, s.single_kh);
        let kw = self.grow_kernel(&kw_range, |kw| k0 * kw);
        let kh = kw.and_then(|kw| self.grow_kernel(&kh_range, |kh| k0 * kw * kh));
        let (Some(kw), Some(kh)) = (kw, kh) else {
            let t = L1Params {
                k_al1: k0,
                k_bl1: k0,
                ho_al1: self.l0.ho_l0,
                wo_al1: self.l0.wo_l0,
                n_bl1: self.l0.n_l0,
            };
            let required = self.cur_l1_size(&t, t.n_bl1);
            tracing::error!(required, "kernel window tile does not fit L1");
            return L1CapacitySnafu { required, capacity: self.ctx.platform.l1_size }.fail();
        };
        self.calc.kw_l1 = kw;
        self.calc.kh_l1 = kh;
        self.kernel_split = kw < s.single_kw || kh < s.single_kh;
        debug!(kh_l1 = kh, kw_l1 = kw, split = self.kernel_split, "kernel window tiling");
        Ok(())
    }

    // ------------------------------------------------------------------
    // L1
    // ------------------------------------------------------------------

    fn check_min_l1(&self) -> Result<()> {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let CubeShape { m0, k0, n0 } = ctx.cube;
        let (k_bl1, wo) = if ctx.flags.c04 {
            (align_up(C04_CIN_SIZE * ctx.khkw(), k0), if self.wo_must_full { s.single_wo } else { m0 })
        } else {
            (k0 * ctx.khkw(), s.single_wo.min(m0))
        };
        let ho = if s.single_wo < m0 { ceil_div(m0, s.single_wo) } else { 1 };
        let t = L1Params { k_al1: k0, k_bl1, ho_al1: ho, wo_al1: wo, n_bl1: n0 };
        let required = self.cur_l1_size(&t, n0);
        let capacity = ctx.platform.l1_size;
        if required > capacity {
            tracing::error!(required, capacity, "l1 minimum load exceeds L1");
            return L1CapacitySnafu { required, capacity }.fail();
        }
        Ok(())
    }

    fn init_l1_params(&mut self) {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let CubeShape { m0, k0, n0 } = ctx.cube;
        let f = ctx.fmap_bytes();
        let w = ctx.weight_bytes();
        let n_l0 = self.l0.n_l0;
        let pb_al1 = self.db.pb_al1;
        let pb_bl1 = self.db.pb_bl1;
        self.single_ci1 = ceil_div(s.single_ci, k0);
        self.single_co1 = ceil_div(s.single_co, n0);
        let (single_ci1, single_co1) = (self.single_ci1, self.single_co1);
        let c = &mut self.calc;
        c.ci0_hk_wk = ctx.khkw() * k0;
        c.ci0_khl1_kwl1 = k0 * c.kh_l1 * c.kw_l1;
        c.wo_al1_min = align_up(s.single_wo.min(self.l0.wo_l0), m0);
        c.ho_al1_min = s.single_ho.min(self.l0.ho_l0);
        c.k_bl1_max = single_ci1 * c.ci0_hk_wk;
        c.n_bl1_max = single_co1 * n0;
        c.b_l1_max = c.k_bl1_max * c.n_bl1_max * w;
        c.bias_l1_max = ctx.bias_l1(c.n_bl1_max);
        c.fixp_l1_max = ctx.fixp_l1(c.n_bl1_max);
        c.bias_l1_min = ctx.bias_l1(n_l0);
        c.fixp_l1_min = ctx.fixp_l1(n_l0);
        let wo_full = align_up(s.single_wo, m0);
        if ctx.is_dma {
            c.k_al1_max = single_ci1 * c.ci0_hk_wk;
            c.a_l1_max = s.single_ho * wo_full * ctx.khkw() * c.k_al1_max * f;
            c.a_l1_min = c.ho_al1_min * c.wo_al1_min * c.ci0_khl1_kwl1 * f * pb_al1;
            c.ub_max = s.single_ho * wo_full * k0 * f;
            c.b_l1_min = c.ci0_khl1_kwl1 * n_l0 * w * pb_bl1;
        } else {
            c.k_al1_max = single_ci1 * k0;
            let hi = ctx.infer_hi_l1(s.single_ho);
            c.a_l1_max = hi * ctx.infer_wi_l1(wo_full) * c.k_al1_max * f;
            c.a_l1_min = ctx.infer_wi_l1(c.wo_al1_min) * ctx.infer_hi_l1(c.ho_al1_min) * k0 * f * pb_al1;
            c.b_l1_min = c.ci0_hk_wk * n_l0 * w * pb_bl1;
        }
    }

    fn init_l1_params_c04(&mut self) {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let CubeShape { m0, k0, n0 } = ctx.cube;
        let w = ctx.weight_bytes();
        let n_l0 = self.l0.n_l0;

        self.single_ci1 = 1;
        self.single_co1 = ceil_div(s.single_co, n0);
        let mut c = self.calc;
        c.ci0_hk_wk = ctx.khkw() * k0;
        c.c04_k_align = align_up(C04_CIN_SIZE * ctx.khkw(), k0);
        let wo_min = if self.wo_must_full { s.single_wo } else { s.single_wo.min(self.l0.wo_l0) };
        c.wo_al1_min = align_up(wo_min, m0);
        c.ho_al1_min = s.single_ho.min(self.l0.ho_l0);
        c.k_al1_max = 1;
        c.k_bl1_max = c.c04_k_align;
        c.n_bl1_max = self.single_co1 * n0;

        let hi = ctx.infer_hi_l1(s.single_ho);
        let wi = if self.wo_must_full { s.org_wi } else { self.infer_wi(align_up(s.single_wo, m0)) };
        c.a_l1_max = self.c04_fmap(hi, wi);
        c.bias_l1_max = ctx.bias_l1(c.n_bl1_max);
        c.fixp_l1_max = ctx.fixp_l1(c.n_bl1_max);
        c.b_l1_max = c.k_bl1_max * c.n_bl1_max * w;
        c.b_l1_min = c.k_bl1_max * n_l0 * w * self.db.pb_bl1;
        c.bias_l1_min = ctx.bias_l1(n_l0);
        c.fixp_l1_min = ctx.fixp_l1(n_l0);
        let wi_min = if self.wo_must_full { s.org_wi } else { self.infer_wi(c.wo_al1_min) };
        c.a_l1_min = self.c04_fmap(ctx.infer_hi_l1(c.ho_al1_min), wi_min) * self.db.pb_al1;
        self.calc = c;
    }

    fn l1_ranges(&mut self) {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let CubeShape { m0, k0, .. } = ctx.cube;
        let c = self.calc;
        let ci1 = self.single_ci1;

        let (k_al1, k_bl1) = if ctx.flags.c04 {
            (Lattice::from_slice(&[c.k_al1_max]), Lattice::from_slice(&[c.k_bl1_max]))
        } else {
            let mut ka = comm_factors(ci1, ci1);
            scale(&mut ka, k0);
            if ctx.is_dma {
                scale(&mut ka, c.kw_l1 * c.kh_l1);
            } else {
                let khkw = ctx.khkw();
                ka.retain(|v| *v * khkw <= MAX_16_BIT_NUM);
            }
            let mut kb = comm_factors(ci1, ci1);
            scale(&mut kb, if ctx.is_dma { c.ci0_khl1_kwl1 } else { c.ci0_hk_wk });
            (ka, kb)
        };

        let multi_n = ceil_div(self.single_co1 * ctx.cube.n0, self.l0.n_l0);
        let mut n_bl1 = comm_factors(multi_n, multi_n);
        scale(&mut n_bl1, self.l0.n_l0);

        let mut wo_al1 = if ctx.flags.c04 && self.wo_must_full {
            Lattice::from_slice(&[align_up(s.single_wo, m0)])
        } else {
            let multi_wo = ceil_div(align_up(s.single_wo, m0), self.l0.wo_l0);
            let mut wo = comm_factors(multi_wo, multi_wo);
            scale(&mut wo, self.l0.wo_l0);
            wo
        };
        let multi_ho = if self.l0.ho_l0 == 0 { 0 } else { s.single_ho / self.l0.ho_l0 };
        let mut ho_al1 = comm_factors(multi_ho, multi_ho);
        scale(&mut ho_al1, self.l0.ho_l0);

        if !ctx.is_dma {
            ho_al1.retain(|ho| {
                let keep = ctx.infer_hi_l1(*ho) <= LOAD3DV2_HIN_WIN_LIMIT;
                if !keep {
                    debug!(ho_al1 = *ho, "input rows exceed load3d limit");
                }
                keep
            });
            let over: Vec<u64> =
                wo_al1.iter().copied().filter(|wo| self.infer_wi(*wo) > LOAD3DV2_HIN_WIN_LIMIT).collect();
            for wo in &over {
                debug!(wo_al1 = *wo, "input columns exceed load3d limit");
            }
            wo_al1.retain(|wo| !over.contains(wo));
        }
        self.ranges = L1Ranges { k_al1, k_bl1, ho_al1, wo_al1, n_bl1 };
    }

    fn load3d_m_over(&self) -> bool {
        let s = &self.ctx.shape;
        !self.ctx.is_dma && s.single_ho * align_up(s.single_wo, self.ctx.cube.m0) > LOAD3D_M_START_POS_LIMIT
    }

    fn dma_blocks_a(&self) -> bool {
        self.ctx.is_dma && (self.calc.ub_max > self.ctx.platform.ub_size || self.kernel_split)
    }

    fn check_b_full(&self) -> bool {
        let c = &self.calc;
        if self.ctx.is_dma && self.kernel_split {
            return false;
        }
        c.a_l1_min + c.b_l1_max + c.bias_l1_max + c.fixp_l1_max <= self.ctx.platform.l1_size
    }

    fn check_a_full(&self) -> bool {
        let c = &self.calc;
        if self.dma_blocks_a() || self.load3d_m_over() {
            return false;
        }
        if !self.ctx.is_dma && self.single_ci1 * self.ctx.khkw() * self.ctx.cube.k0 > MAX_16_BIT_NUM {
            return false;
        }
        c.a_l1_max + c.b_l1_min + c.bias_l1_min + c.fixp_l1_min <= self.ctx.platform.l1_size
    }

    fn check_ab_full(&self) -> bool {
        let c = &self.calc;
        if self.dma_blocks_a() || self.load3d_m_over() {
            return false;
        }
        c.a_l1_max + c.b_l1_max + c.bias_l1_max + c.fixp_l1_max <= self.ctx.platform.l1_size
    }

    fn init_l1_mode(&mut self) {
        let c = &self.calc;
        let bw = self.ctx.platform.bandwidth_coeff;
        let b_first = bw * c.b_l1_max + c.bias_l1_max + c.fixp_l1_max >= c.a_l1_max;
        self.mode = if self.check_ab_full() {
            L1LoadMode::AllFullLoad
        } else if b_first {
            if self.check_b_full() {
                L1LoadMode::FullLoadB
            } else if self.check_a_full() {
                L1LoadMode::FullLoadA
            } else {
                L1LoadMode::NoneFullLoad
            }
        } else if self.check_a_full() {
            L1LoadMode::FullLoadA
        } else if self.check_b_full() {
            L1LoadMode::FullLoadB
        } else {
            L1LoadMode::NoneFullLoad
        };
        debug!(mode = %self.mode, "l1 load mode");
    }

    fn c04_wo(&self) -> u64 {
        if self.ctx.flags.c04 && self.wo_must_full {
            align_up(self.ctx.shape.single_wo, self.ctx.cube.m0)
        } else {
            self.l0.wo_l0
        }
    }

    fn init_l1_tiling(&mut self) {
        let ctx = self.ctx;
        let s = &ctx.shape;
        let c = self.calc;
        let c04 = ctx.flags.c04;
        let split = L1Params {
            k_al1: if c04 {
                c.k_al1_max
            } else if ctx.is_dma {
                c.ci0_khl1_kwl1
            } else {
                ctx.cube.k0
            },
            k_bl1: if c04 {
                c.k_bl1_max
            } else if ctx.is_dma {
                c.ci0_khl1_kwl1
            } else {
                c.ci0_hk_wk
            },
            ho_al1: self.l0.ho_l0,
            wo_al1: self.c04_wo(),
            n_bl1: self.l0.n_l0,
        };
        let full = L1Params {
            k_al1: c.k_al1_max,
            k_bl1: c.k_bl1_max,
            ho_al1: s.single_ho,
            wo_al1: align_up(s.single_wo, ctx.cube.m0),
            n_bl1: ctx.cube.n0 * self.single_co1,
        };

        self.init_l1_mode();
        self.init = match self.mode {
            L1LoadMode::NoneFullLoad => split,
            L1LoadMode::FullLoadA => L1Params { k_al1: full.k_al1, ho_al1: full.ho_al1, wo_al1: full.wo_al1, ..split },
            L1LoadMode::FullLoadB => L1Params { k_bl1: full.k_bl1, n_bl1: full.n_bl1, ..split },
            L1LoadMode::AllFullLoad => full,
        };
        self.strict = L1Ranges {
            k_al1: restrict_range(&self.ranges.k_al1, self.init.k_al1),
            k_bl1: restrict_range(&self.ranges.k_bl1, self.init.k_bl1),
            ho_al1: restrict_range(&self.ranges.ho_al1, self.init.ho_al1),
            wo_al1: restrict_range(&self.ranges.wo_al1, self.init.wo_al1),
            n_bl1: restrict_range(&self.ranges.n_bl1, self.init.n_bl1),
        };
        if self.trace_on() {
            trace!(strict = ?self.strict, init = ?self.init, "strict l1 ranges");
        }
    }

    /// Walks `range` upward while `fits` holds. Returns the last fitting
    /// value, or 0 when the first one already fails.
    fn walk(range: &[u64], mut fits: impl FnMut(u64) -> bool) -> u64 {
        let mut cur = 0;
        for (i, &v) in range.iter().enumerate() {
            if !fits(v) {
                if i == 0 {
                    debug!(value = v, "smallest l1 candidate exceeds L1");
                }
                return if i == 0 { 0 } else { range[i - 1] };
            }
            cur = v;
        }
        cur
    }

    fn iter_k_al1(&self, mut t: L1Params) -> u64 {
        if self.ctx.flags.c04 {
            return self.init.k_al1;
        }
        Self::walk(&self.strict.k_al1, |k| {
            t.k_al1 = k;
            self.fits_l1(&t, t.n_bl1)
        })
    }

    fn iter_k_bl1(&self, mut t: L1Params) -> u64 {
        if self.ctx.flags.c04 {
            return self.init.k_bl1;
        }
        Self::walk(&self.strict.k_bl1, |k| {
            t.k_bl1 = k;
            self.fits_l1(&t, t.n_bl1)
        })
    }

    fn iter_n_bl1(&mut self, mut t: L1Params) -> u64 {
        let n = Self::walk(&self.strict.n_bl1, |n| {
            t.n_bl1 = n;
            self.fits_l1(&t, n)
        });
        if n != 0 && n == self.calc.n_bl1_max {
            self.bias_full = true;
            self.fixp_full = true;
        }
        n
    }

    /// Shared walk for the two spatial axes; the load-3D M limit and UB only
    /// stop growth after the first value.
    fn walk_spatial(&self, range: &[u64], mut t: L1Params, set: impl Fn(&mut L1Params, u64)) -> u64 {
        let p = &self.ctx.platform;
        let mut cur = 0;
        for (i, &v) in range.iter().enumerate() {
            set(&mut t, v);
            let l1_over = !self.fits_l1(&t, t.n_bl1);
            let ub_over = self.cur_ub_size(t.ho_al1, t.wo_al1, 1, 1) > p.ub_size;
            let instr_over = !self.ctx.is_dma && t.ho_al1 * t.wo_al1 > LOAD3D_M_START_POS_LIMIT;
            if i > 0 && (l1_over || instr_over || ub_over) {
                return range[i - 1];
            }
            if i == 0 && (l1_over || instr_over) {
                debug!(value = v, "smallest spatial candidate exceeds limits");
                return 0;
            }
            cur = v;
        }
        cur
    }

    /// Width first at the smallest height, then height at that width.
    fn iter_ho_wo(&self, k_al1: u64, k_bl1: u64, n_bl1: u64) -> (u64, u64) {
        let t = L1Params { k_al1, k_bl1, n_bl1, ho_al1: self.strict.ho_al1[0], wo_al1: 0 };
        let wo = self.walk_spatial(&self.strict.wo_al1, t, |t, v| t.wo_al1 = v);
        let ho = self.walk_spatial(&self.strict.ho_al1, L1Params { wo_al1: wo, ..t }, |t, v| t.ho_al1 = v);
        (ho, wo)
    }

    fn check_k_full(&self, k_al1: u64, k_bl1: u64) -> bool {
        if !self.ctx.is_dma && k_al1 * self.ctx.khkw() > MAX_16_BIT_NUM {
            debug!(k_al1, "k start position limit exceeded");
            return false;
        }
        let t = L1Params {
            k_al1,
            k_bl1,
            n_bl1: self.strict.n_bl1[0],
            ho_al1: self.strict.ho_al1[0],
            wo_al1: self.strict.wo_al1[0],
        };
        self.fits_l1(&t, t.n_bl1)
    }

    /// Grows both K extents alternately, operand B first.
    fn iter_k_ab(&self, base: L1Params) -> L1Params {
        let mut out = base;
        if self.ctx.flags.c04 {
            out.k_al1 = self.init.k_al1;
            out.k_bl1 = self.init.k_bl1;
            return out;
        }
        let (ka, kb) = (&self.strict.k_al1, &self.strict.k_bl1);
        let (mut i, mut j) = (0, 0);
        let mut grow_a = false;
        while i < ka.len() && j < kb.len() {
            let t = L1Params { k_al1: ka[i], k_bl1: kb[j], ..base };
            if !self.fits_l1(&t, base.n_bl1) {
                if i == 0 && j == 0 {
                    debug!("no K extent fits L1");
                }
                break;
            }
            out.k_al1 = ka[i];
            out.k_bl1 = kb[j];
            if grow_a {
                i += 1;
            } else {
                j += 1;
            }
            grow_a = !grow_a;
        }
        out
    }

    fn k_first_b_full(&mut self) -> L1Params {
        let c = self.calc;
        let mut t = L1Params::default();
        if self.check_k_full(self.strict.k_al1[0], c.k_bl1_max) {
            self.order = IterateOrder::MFirst;
            t.k_bl1 = c.k_bl1_max;
            t.ho_al1 = self.l0.ho_l0;
            t.wo_al1 = self.l0.wo_l0;
            t.k_al1 = self.iter_k_al1(L1Params { n_bl1: self.strict.n_bl1[0], ..t });
            t.n_bl1 = self.iter_n_bl1(t);
        } else if self.check_k_full(c.k_al1_max, self.strict.k_bl1[0]) {
            self.order = IterateOrder::NFirst;
            t.k_al1 = c.k_al1_max;
            t.n_bl1 = self.l0.n_l0;
            t.k_bl1 = self.iter_k_bl1(L1Params {
                ho_al1: self.strict.ho_al1[0],
                wo_al1: self.strict.wo_al1[0],
                n_bl1: self.strict.n_bl1[0],
                ..t
            });
            (t.ho_al1, t.wo_al1) = self.iter_ho_wo(t.k_al1, t.k_bl1, t.n_bl1);
        } else {
            self.order = IterateOrder::NFirst;
            t = self.iter_k_ab(L1Params { ho_al1: self.l0.ho_l0, wo_al1: self.c04_wo(), n_bl1: self.l0.n_l0, ..t });
        }
        t
    }

    fn k_first_a_full(&mut self) -> L1Params {
        let c = self.calc;
        let mut t = L1Params::default();
        if self.check_k_full(c.k_al1_max, self.strict.k_bl1[0]) {
            self.order = IterateOrder::NFirst;
            t.k_al1 = c.k_al1_max;
            t.n_bl1 = self.l0.n_l0;
            t.k_bl1 = self.iter_k_bl1(L1Params {
                ho_al1: self.strict.ho_al1[0],
                wo_al1: self.strict.wo_al1[0],
                ..t
            });
            (t.ho_al1, t.wo_al1) = self.iter_ho_wo(t.k_al1, t.k_bl1, t.n_bl1);
        } else if self.check_k_full(self.strict.k_al1[0], c.k_bl1_max) {
            self.order = IterateOrder::MFirst;
            t.k_bl1 = c.k_bl1_max;
            t.ho_al1 = self.l0.ho_l0;
            t.wo_al1 = self.l0.wo_l0;
            t.k_al1 = self.iter_k_al1(L1Params { n_bl1: self.strict.n_bl1[0], ..t });
            t.n_bl1 = self.iter_n_bl1(t);
        } else {
            self.order = IterateOrder::MFirst;
            t = self.iter_k_ab(L1Params { ho_al1: self.l0.ho_l0, wo_al1: self.c04_wo(), n_bl1: self.l0.n_l0, ..t });
        }
        t
    }

    fn a_is_full(&self, t: &L1Params) -> bool {
        let s = &self.ctx.shape;
        t.ho_al1 >= s.single_ho && t.wo_al1 >= s.single_wo && t.k_al1 >= self.calc.k_al1_max
    }

    fn b_is_full(&self, t: &L1Params) -> bool {
        t.n_bl1 >= self.ctx.shape.single_co && t.k_bl1 >= self.calc.k_bl1_max
    }

    fn none_full_load_decision(&mut self) {
        let c = self.calc;
        let mut t = if self.check_k_full(c.k_al1_max, c.k_bl1_max) {
            self.order = IterateOrder::MFirst;
            let mut t = L1Params { k_al1: c.k_al1_max, k_bl1: c.k_bl1_max, ..Default::default() };
            t.n_bl1 = self.iter_n_bl1(L1Params { ho_al1: self.l0.ho_l0, wo_al1: self.l0.wo_l0, ..t });
            (t.ho_al1, t.wo_al1) = self.iter_ho_wo(t.k_al1, t.k_bl1, t.n_bl1);
            t
        } else if self.ctx.platform.bandwidth_coeff * c.b_l1_max >= c.a_l1_max {
            self.k_first_b_full()
        } else {
            self.k_first_a_full()
        };

        if t.has_zero() || !self.fits_l1(&t, t.n_bl1) {
            debug!(?t, "fallback to single buffered K growth");
            self.db.pb_al1 = 1;
            self.db.pb_bl1 = 1;
            self.order = IterateOrder::MFirst;
            t = self.iter_k_ab(L1Params {
                ho_al1: self.l0.ho_l0,
                wo_al1: self.c04_wo(),
                n_bl1: self.l0.n_l0,
                ..t
            });
        }
        self.params = t;
        match (self.a_is_full(&t), self.b_is_full(&t)) {
            (true, false) => self.order = IterateOrder::NFirst,
            (false, true) => self.order = IterateOrder::MFirst,
            _ => {}
        }
        self.bias_full = false;
        self.fixp_full = false;
    }

    fn core_l1_decision(&mut self) {
        let init = self.init;
        match self.mode {
            L1LoadMode::AllFullLoad => {
                self.params = init;
                self.order = IterateOrder::MFirst;
                self.bias_full = true;
                self.fixp_full = true;
            }
            L1LoadMode::FullLoadB => {
                let first = L1Params { ho_al1: self.strict.ho_al1[0], wo_al1: self.strict.wo_al1[0], ..init };
                let k_al1 = self.iter_k_al1(first);
                let (ho_al1, wo_al1) = self.iter_ho_wo(k_al1, init.k_bl1, init.n_bl1);
                self.params = L1Params { k_al1, ho_al1, wo_al1, ..init };
                self.order = IterateOrder::MFirst;
                self.bias_full = true;
                self.fixp_full = true;
            }
            L1LoadMode::FullLoadA => {
                let k_bl1 = self.iter_k_bl1(L1Params { n_bl1: self.strict.n_bl1[0], ..init });
                let n_bl1 = self.iter_n_bl1(L1Params { k_bl1, ..init });
                self.params = L1Params { k_bl1, n_bl1, ..init };
                self.order = IterateOrder::NFirst;
                self.bias_full = false;
                self.fixp_full = false;
            }
            L1LoadMode::NoneFullLoad => self.none_full_load_decision(),
        }
    }

    fn update_l1_db_first(&mut self) {
        match self.mode {
            L1LoadMode::AllFullLoad => {
                self.db.pb_al1 = 1;
                self.db.pb_bl1 = 1;
            }
            L1LoadMode::FullLoadA => self.db.pb_al1 = 1,
            L1LoadMode::FullLoadB => self.db.pb_bl1 = 1,
            L1LoadMode::NoneFullLoad => {}
        }
    }

    fn update_l1_db_second(&mut self) {
        let s = &self.ctx.shape;
        let k_full = self.ctx.flags.c04 || self.params.k_al1 == self.calc.k_al1_max;
        if s.single_ho <= self.params.ho_al1 && s.single_wo <= self.params.wo_al1 && k_full {
            self.db.pb_al1 = 1;
        }
    }

    fn update_bias_fixp(&mut self) {
        let n_full = self.single_co1 * self.ctx.cube.n0;
        let l1 = self.ctx.platform.l1_size;
        let p = self.params;
        if self.cur_l1_size(&p, p.n_bl1) < l1
            && !self.bias_full
            && !self.fixp_full
            && self.cur_l1_size(&p, n_full) <= l1
        {
            self.bias_full = true;
            self.fixp_full = true;
        }
        if self.bias_full && self.fixp_full && n_full * self.ctx.bias_bytes() > DATACOPYPARAMS_BURSTLEN_MAX {
            self.bias_full = false;
            self.fixp_full = false;
        }
    }

    fn set_l1_result(&mut self) {
        let ctx = self.ctx;
        let p = self.params;
        let k_al1 = if ctx.flags.c04 {
            p.k_al1 * self.calc.c04_k_align
        } else if ctx.is_dma {
            p.k_al1
        } else {
            p.k_al1 * ctx.khkw()
        };
        self.l1 = L1TilingRes {
            k_al1,
            k_bl1: p.k_bl1,
            ho_al1: p.ho_al1,
            wo_al1: p.wo_al1,
            n_bl1: p.n_bl1,
            kh_l1: self.calc.kh_l1,
            kw_l1: self.calc.kw_l1,
            iterate_order: self.order,
            al1_full_load: matches!(self.mode, L1LoadMode::AllFullLoad | L1LoadMode::FullLoadA),
            bl1_full_load: matches!(self.mode, L1LoadMode::AllFullLoad | L1LoadMode::FullLoadB),
            bias_full_load: self.bias_full,
            fixp_full_load: self.fixp_full,
            m_al1: 0,
        };
    }

    fn l1_tiling(&mut self) -> Result<()> {
        if self.ctx.flags.c04 {
            self.wo_must_full = self.ctx.shape.org_hi != 1;
        }
        self.check_min_l1()?;
        if self.ctx.flags.c04 {
            self.init_l1_params_c04();
        } else {
            self.init_l1_params();
        }
        self.l1_ranges();
        self.init_l1_tiling();
        self.update_l1_db_first();
        self.core_l1_decision();
        self.update_l1_db_second();
        self.update_bias_fixp();
        self.set_l1_result();
        Ok(())
    }

    // ------------------------------------------------------------------
    // K in L0 and L0 double buffering
    // ------------------------------------------------------------------

    fn k_l0_tiling(&mut self) {
        let ctx = self.ctx;
        let k0 = ctx.cube.k0;
        let p = self.params;
        let ka = if ctx.is_dma { p.k_al1 } else { p.k_al1 * ctx.khkw() };
        let m = self.l0.ho_l0 * self.l0.wo_l0;
        let plat = &ctx.platform;
        let mut valid = 0;
        for k in comm_factors_of_two(ka, p.k_bl1) {
            if k % k0 != 0 {
                continue;
            }
            if self.buf.al0(m, k, &self.db) > plat.l0a_size || self.buf.bl0(k, self.l0.n_l0, &self.db) > plat.l0b_size {
                break;
            }
            valid = k;
        }
        self.l0.k_l0 = valid.max(k0);

        let s = &ctx.shape;
        let c = self.calc;
        let mn_full = s.single_ho <= self.l0.ho_l0
            && s.single_wo <= self.l0.wo_l0
            && self.single_co1 * ctx.cube.n0 <= self.l0.n_l0;
        let k_full = p.k_bl1 == c.k_bl1_max && p.k_al1 == c.k_al1_max;
        let l0_fits = self.buf.al0(m, c.k_bl1_max, &self.db) / self.db.pb_al0 <= plat.l0a_size
            && self.buf.bl0(c.k_bl1_max, self.l0.n_l0, &self.db) / self.db.pb_bl0 <= plat.l0b_size;
        if mn_full && k_full && l0_fits {
            self.l0.k_l0 = c.k_bl1_max;
        }
    }

    /// Grows nL0 over divisors of nBL1 until it covers the M tile.
    fn update_n_l0(&mut self) {
        let n_bl1 = self.l1.n_bl1;
        let range: Lattice =
            self.l0_ranges[N].iter().copied().filter(|&n| n <= n_bl1 && n_bl1 % n == 0).collect();
        let plat = &self.ctx.platform;
        let m = self.l0.ho_l0 * self.l0.wo_l0;
        for pair in range.windows(2) {
            let next = pair[1];
            if !self.buf.side_fits(next)
                || self.buf.bl0(self.l0.k_l0, next, &self.db) > plat.l0b_size
                || self.buf.cl0(m, next, &self.db) > plat.l0c_size
            {
                self.l0.n_l0 = pair[0];
                break;
            }
            self.l0.n_l0 = next;
            if next >= m {
                break;
            }
        }
    }

    /// Grows one spatial L0 axis over divisors of its L1 extent until the
    /// tile covers nL0.
    fn update_spatial_l0(&mut self, axis: usize, max: u64) {
        let range: Lattice = self.l0_ranges[axis].iter().copied().filter(|&v| v <= max && max % v == 0).collect();
        let plat = &self.ctx.platform;
        for pair in range.windows(2) {
            let next = pair[1];
            let (ho, wo) = if axis == HO { (next, self.l0.wo_l0) } else { (self.l0.ho_l0, next) };
            if self.buf.al0(ho * wo, self.l0.k_l0, &self.db) > plat.l0a_size
                || self.buf.cl0(ho * wo, self.l0.n_l0, &self.db) > plat.l0c_size
            {
                break;
            }
            if axis == HO {
                self.l0.ho_l0 = next;
            } else {
                self.l0.wo_l0 = next;
            }
            let other = if axis == HO { self.l0.wo_l0 } else { self.l0.ho_l0 };
            if next * other >= self.l0.n_l0 {
                break;
            }
        }
    }

    fn l0_double_buffer(&mut self) {
        let s = &self.ctx.shape;
        let c = self.calc;
        let k_full = self.l0.k_l0 == if self.ctx.flags.c04 { c.c04_k_align } else { c.k_bl1_max };
        if s.single_ho <= self.l0.ho_l0 && s.single_wo <= self.l0.wo_l0 && k_full {
            self.db.pb_al0 = 1;
        }
        if k_full && self.single_co1 * self.ctx.cube.n0 == self.l0.n_l0 {
            self.db.pb_bl0 = 1;
        }

        if self.db.pb_al0 == DOUBLE_BUFFER_NUM && self.db.pb_bl0 == DOUBLE_BUFFER_NUM && k_full {
            if self.l1.iterate_order == IterateOrder::MFirst {
                let before = self.l0.n_l0;
                self.update_n_l0();
                if self.l0.n_l0 > before {
                    self.db.pb_bl0 = 1;
                }
            } else {
                let (ho, wo) = (self.l0.ho_l0, self.l0.wo_l0);
                self.update_spatial_l0(WO, self.l1.wo_al1);
                self.update_spatial_l0(HO, self.l1.ho_al1);
                if ho < self.l0.ho_l0 || wo < self.l0.wo_l0 {
                    self.db.pb_al0 = 1;
                }
            }
        }

        if self.buf.cl0(self.l0.ho_l0 * self.l0.wo_l0, self.l0.n_l0, &DoubleBuffer { pb_cl0: 1, ..self.db })
            <= self.ctx.platform.l0c_size / DOUBLE_BUFFER_NUM
        {
            self.db.pb_cl0 = DOUBLE_BUFFER_NUM;
        }
        match (self.db.pb_al0, self.db.pb_bl0) {
            (DOUBLE_BUFFER_NUM, 1) => self.l1.iterate_order = IterateOrder::MFirst,
            (1, DOUBLE_BUFFER_NUM) => self.l1.iterate_order = IterateOrder::NFirst,
            _ => {}
        }
    }
}

impl TilingAlgorithm for HwTiling<'_> {
    #[tracing::instrument(skip_all, fields(single_ho = self.ctx.shape.single_ho, single_wo = self.ctx.shape.single_wo))]
    fn process(mut self) -> Result<TilingOutcome> {
        self.init_ping_pong();
        self.l0_tiling()?;
        self.dma_l1_tiling()?;
        self.l1_tiling()?;
        self.k_l0_tiling();
        self.l0_double_buffer();
        debug!(
            ho_l0 = self.l0.ho_l0,
            wo_l0 = self.l0.wo_l0,
            k_l0 = self.l0.k_l0,
            n_l0 = self.l0.n_l0,
            ho_al1 = self.l1.ho_al1,
            wo_al1 = self.l1.wo_al1,
            mode = %self.mode,
            "hw-mode tiling done"
        );
        let outcome =
            TilingOutcome { l0: self.l0, l1: self.l1, db: self.db, ub: UbTilingRes::default(), inner_batch: 1 };
        let required = Self::l1_bytes(self.ctx, &outcome);
        let capacity = self.ctx.platform.l1_size;
        if required > capacity {
            tracing::error!(required, capacity, "hw-mode tiling exceeds L1");
            return L1CapacitySnafu { required, capacity }.fail();
        }
        Ok(outcome)
    }
}
