//! L1 load strategies of the basic-block planner.
//!
//! Every strategy has two operations:
//!
//! | Strategy            | score (phase 1)               | tiling (phase 2)        |
//! |---------------------|-------------------------------|-------------------------|
//! | `KAndMal1FullLoad`  | both K resident, base 5       | K full load             |
//! | `KAndNbl1FullLoad`  | both K resident, base 5       | K full load             |
//! | `KAndNoneFullLoad`  | both K resident, base 5       | K full load             |
//! | `FmapFullLoad`      | fmap resident, base 4         | N first, fmap multi M   |
//! | `FmapKFullLoad`     | fmap K resident, base 3       | N first                 |
//! | `WeightFullLoad`    | weight resident, base 4       | M first, weight multi N |
//! | `WeightKFullLoad`   | weight K resident, base 3     | M first                 |
//! | `NFirstKSplit`      | K split, base 0               | K split                 |
//! | `MFirstKSplit`      | K split, base 0               | K split                 |
//! | `KAllSplit`         | K split, base 0               | K split                 |

use tracing::{debug, error};

use super::BbTiling;
use crate::math::{ceil_div, floor_align};
use crate::tiling::{DOUBLE_BUFFER_NUM, IterateOrder, MAX_16_BIT_NUM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BbStrategy {
    KAndMal1FullLoad,
    KAndNbl1FullLoad,
    KAndNoneFullLoad,
    FmapFullLoad,
    FmapKFullLoad,
    WeightFullLoad,
    WeightKFullLoad,
    NFirstKSplit,
    MFirstKSplit,
    KAllSplit,
}

const SCORE_BASE_5: f64 = 5.0;
const SCORE_BASE_4: f64 = 4.0;
const SCORE_BASE_3: f64 = 3.0;
const SCORE_BASE_0: f64 = 0.0;

impl BbStrategy {
    /// Proposes L1 usage for scoring. False when the proposal does not fit.
    pub(crate) fn score_params(self, t: &mut BbTiling<'_>) -> bool {
        let fits = match self {
            Self::KAndMal1FullLoad | Self::KAndNbl1FullLoad | Self::KAndNoneFullLoad => k_full_common(t),
            Self::FmapFullLoad | Self::FmapKFullLoad => {
                t.tmp.m_al1 = t.info.m_in;
                n_first_common(t)
            }
            Self::WeightFullLoad | Self::WeightKFullLoad => {
                t.tmp.n_bl1 = t.info.n_tile;
                m_first_common(t)
            }
            Self::NFirstKSplit | Self::MFirstKSplit | Self::KAllSplit => true,
        };
        if !fits {
            return false;
        }
        let info = &*t.info;
        let (m_repeats, n_repeats, base) = match self {
            Self::KAndMal1FullLoad | Self::KAndNbl1FullLoad => (info.n_dim, info.f_dim, SCORE_BASE_5),
            Self::KAndNoneFullLoad => (info.n_dim, t.split_m_repeats(), SCORE_BASE_5),
            Self::FmapFullLoad | Self::WeightFullLoad => (info.n_dim, info.f_dim, SCORE_BASE_4),
            Self::FmapKFullLoad => (info.n_dim, t.split_m_repeats(), SCORE_BASE_3),
            Self::WeightKFullLoad => (info.n_cut, info.f_dim, SCORE_BASE_3),
            Self::NFirstKSplit | Self::MFirstKSplit | Self::KAllSplit => {
                (info.n_cut, t.split_m_repeats(), SCORE_BASE_0)
            }
        };
        t.m_repeats = m_repeats;
        t.n_repeats = n_repeats;
        t.score_base = base;
        true
    }

    /// Fills the L1 tiling parameters. False when nothing fits.
    pub(crate) fn tiling_params(self, t: &mut BbTiling<'_>) -> bool {
        match self {
            Self::KAndMal1FullLoad | Self::KAndNbl1FullLoad | Self::KAndNoneFullLoad => k_full_tiling(t),
            Self::FmapFullLoad => {
                t.db.pb_al1 = if t.inner_batch_partial() { DOUBLE_BUFFER_NUM } else { 1 };
                t.multi_m = ceil_div(t.info.m_cut, t.info.m_dim);
                t.multi_n = 1;
                t.params.m_al1 = fmap_rows_cap(t, t.multi_m);
                t.params.n_bl1 = t.info.n_tile;
                n_first_tiling(t)
            }
            Self::FmapKFullLoad => {
                t.db.pb_al1 = DOUBLE_BUFFER_NUM;
                single_block(t);
                n_first_tiling(t)
            }
            Self::WeightFullLoad => {
                t.db.pb_bl1 = 1;
                t.multi_n = ceil_div(t.info.n_cut, t.info.n_dim);
                t.multi_m = 1;
                t.params.n_bl1 = (t.multi_n * t.info.n_tile).min(t.ctx.shape.single_co);
                t.params.m_al1 = t.info.m_in;
                m_first_tiling(t)
            }
            Self::WeightKFullLoad => {
                t.db.pb_bl1 = DOUBLE_BUFFER_NUM;
                single_block(t);
                m_first_tiling(t)
            }
            Self::NFirstKSplit | Self::MFirstKSplit | Self::KAllSplit => k_split_tiling(t),
        }
    }
}

fn preset_db(t: &BbTiling<'_>) -> (i64, i64) {
    let a = if t.info.m_al1_full_load && t.preset.k_al1 { 1 } else { DOUBLE_BUFFER_NUM as i64 };
    let b = if t.info.n_bl1_full_load && t.preset.k_bl1 { 1 } else { DOUBLE_BUFFER_NUM as i64 };
    (a, b)
}

fn k_full_common(t: &mut BbTiling<'_>) -> bool {
    let (db_a, db_b) = preset_db(t);
    t.tmp.k_al1 = t.ci1_k0;
    t.tmp.k_bl1 = t.ci1_k0 * t.org_khkw();
    let used_a = db_a * t.fmap_bytes() * (t.info.m_in * t.inner_batch * t.tmp.k_al1) as i64;
    let used_b = db_b * t.weight_bytes() * (t.info.n_tile * t.tmp.k_bl1) as i64;
    t.check_l1_space(used_a, used_b)
}

fn n_first_common(t: &mut BbTiling<'_>) -> bool {
    let (db_a, _) = preset_db(t);
    t.tmp.k_al1 = t.ci1_k0;
    let used_a = db_a * t.fmap_bytes() * (t.tmp.m_al1 * t.tmp.k_al1 * t.inner_batch) as i64;
    let reserve_b = t.info.n_tile * t.org_khkw() * t.ctx.cube.k0 * t.ctx.weight_bytes();
    let used_b = t.ctx.platform.l0b_size.max(reserve_b) as i64;
    t.check_l1_space(used_a, used_b)
}

fn m_first_common(t: &mut BbTiling<'_>) -> bool {
    let (_, db_b) = preset_db(t);
    t.tmp.k_bl1 = t.ci1_k0 * t.org_khkw();
    let reserve_a = t.info.m_in * t.inner_batch * t.ctx.cube.k0 * t.ctx.fmap_bytes();
    let used_a = t.ctx.platform.l0a_size.max(reserve_a) as i64;
    let used_b = db_b * t.weight_bytes() * (t.tmp.n_bl1 * t.tmp.k_bl1) as i64;
    t.check_l1_space(used_a, used_b)
}

fn single_block(t: &mut BbTiling<'_>) {
    t.multi_m = 1;
    t.multi_n = 1;
    t.params.m_al1 = t.info.m_in;
    t.params.n_bl1 = t.info.n_tile;
}

fn fmap_rows_cap(t: &BbTiling<'_>, multi_m: u64) -> u64 {
    let s = &t.ctx.shape;
    (multi_m * t.info.m_in).min(s.org_hi * s.org_wi)
}

fn k_full_tiling(t: &mut BbTiling<'_>) -> bool {
    let khkw = t.org_khkw();
    t.params.k_al1 = t.ci1_k0;
    t.params.k_bl1 = t.ci1_k0 * khkw;

    let single_co = t.ctx.shape.single_co;
    let max_n = ceil_div(t.info.n_cut, t.info.n_dim);
    let max_m = ceil_div(t.info.m_cut, t.info.m_dim);
    let weight_one = (t.info.n_tile.min(single_co) * t.ci1_k0 * khkw * t.ctx.weight_bytes()) as i64;
    let weight_all = ((max_n * t.info.n_tile).min(single_co) * t.ci1_k0 * khkw * t.ctx.weight_bytes()) as i64;
    let fmap_one = (t.info.m_in * t.ci1_k0 * t.ctx.fmap_bytes() * t.inner_batch) as i64;
    let fmap_all = max_m as i64 * fmap_one;
    let avail = t.available_l1;
    let db = DOUBLE_BUFFER_NUM as i64;
    debug!(fmap_all, weight_all, fmap_one, weight_one, avail, "k full load sizes");

    let batch_fits = if t.enable_inner_batch {
        ceil_div(t.info.batch, t.inner_batch) <= t.info.batch_dim
    } else {
        t.info.batch <= t.info.batch_dim
    };
    if batch_fits {
        if fmap_all + weight_all <= avail {
            t.info.iterate_order = IterateOrder::MFirst;
            t.multi_m = max_m;
            t.multi_n = max_n;
            t.params.m_al1 = fmap_rows_cap(t, max_m);
            t.params.n_bl1 = (max_n * t.info.n_tile).min(single_co);
            return true;
        }
        if fmap_all + weight_one * db <= avail {
            t.info.iterate_order = IterateOrder::NFirst;
            t.multi_m = max_m;
            t.multi_n = 1;
            t.params.m_al1 = fmap_rows_cap(t, max_m);
            t.params.n_bl1 = t.info.n_tile;
            return true;
        }
    }
    if fmap_one * db + weight_all <= avail {
        t.info.iterate_order = IterateOrder::MFirst;
        t.multi_m = 1;
        t.multi_n = max_n;
        t.params.m_al1 = t.info.m_in;
        t.params.n_bl1 = (max_n * t.info.n_tile).min(single_co);
        return true;
    }
    if fmap_one * db + weight_one * db <= avail {
        single_block(t);
        return true;
    }
    if fmap_one + weight_one <= avail {
        t.al1_db_close = true;
        t.bl1_db_close = true;
        single_block(t);
        return true;
    }
    false
}

fn n_first_tiling(t: &mut BbTiling<'_>) -> bool {
    let k0 = t.ctx.cube.k0 as i64;
    let khkw = t.org_khkw() as i64;
    let n_tile = t.info.n_tile as i64;
    let w = t.weight_bytes();
    t.params.k_al1 = t.ci1_k0;
    t.available_l1 -= (t.params.k_al1 * t.params.m_al1 * t.db.pb_al1 * t.inner_batch) as i64 * t.fmap_bytes();

    let full = t.ci1_k0 as i64;
    let per_cin = w * khkw * n_tile;
    let mut cin = (t.available_l1 / (per_cin * DOUBLE_BUFFER_NUM as i64)).min(full);
    if cin < k0 {
        t.db.pb_bl1 = 1;
        t.bl1_db_close = true;
        cin = (t.available_l1 / per_cin).min(full);
    }
    let cin = if cin <= 0 { 0 } else { floor_align(cin as u64, k0 as u64) };
    if cin == 0 {
        error!("N first load cannot generate an L1 tiling");
        return false;
    }
    t.params.k_bl1 = cin * t.org_khkw();
    multi_load_k_bl1(t)
}

fn m_first_tiling(t: &mut BbTiling<'_>) -> bool {
    let k0 = t.ctx.cube.k0 as i64;
    t.params.k_bl1 = t.ci1_k0 * t.org_khkw();
    t.available_l1 -= (t.params.k_bl1 * t.params.n_bl1 * t.db.pb_bl1) as i64 * t.weight_bytes();

    let full = t.ci1_k0 as i64;
    let per_cin = (t.info.m_in * t.inner_batch) as i64 * t.fmap_bytes();
    let mut cin = (t.available_l1 / (per_cin * DOUBLE_BUFFER_NUM as i64)).min(full);
    if cin < k0 {
        t.db.pb_al1 = 1;
        t.al1_db_close = true;
        cin = (t.available_l1 / per_cin).min(full);
    }
    let cin = if cin <= 0 { 0 } else { floor_align(cin as u64, k0 as u64) };
    if cin == 0 {
        error!("M first load cannot generate an L1 tiling");
        return false;
    }
    t.params.k_al1 = cin;
    multi_load_k_al1(t)
}

/// Largest multiplier of `base` staying within `limit`, zero when even one
/// does not fit.
fn max_multiple_under(base: i64, limit: i64) -> u64 {
    if base <= 0 || limit < base { 0 } else { (limit / base) as u64 }
}

/// Splits `value` into the fewest equal parts below `max`, each a multiple of
/// `align`.
fn divide_and_align(value: u64, max: u64, align: u64) -> u64 {
    if max == 0 {
        return value;
    }
    let parts = value / max + 1;
    floor_align(ceil_div(value, parts), align).max(align)
}

fn multi_load_k_al1(t: &mut BbTiling<'_>) -> bool {
    let kernel = t.ctx.shape.single_kh * t.ctx.shape.single_kw;
    let per_k = (t.params.m_al1 * t.inner_batch) as i64 * t.fmap_bytes();
    let mut used = t.params.k_al1 as i64 * per_k * t.db.pb_al1 as i64;
    let limit = t.available_l1.min(per_k * t.ci1_k0 as i64);
    if used > t.available_l1.min(t.fmap_full_size) {
        used /= t.db.pb_al1 as i64;
        t.db.pb_al1 = 1;
        t.al1_db_close = true;
        if t.params.k_al1 * kernel >= MAX_16_BIT_NUM {
            debug!(k_al1 = t.params.k_al1, "K start position limit exceeded");
            return false;
        }
        if max_multiple_under(used, limit) == 0 {
            error!("operand A does not fit L1 in basic block mode");
            return false;
        }
        return true;
    }
    // `mAL1` is `mIn` on every caller, so `limit` covers `used` and the
    // multiple is at least one.
    let multiple = max_multiple_under(used, limit).min(MAX_16_BIT_NUM / kernel.max(1));
    t.params.k_al1 *= multiple;
    true
}

fn multi_load_k_bl1(t: &mut BbTiling<'_>) -> bool {
    let per_k = t.params.n_bl1 as i64 * t.weight_bytes();
    let mut used = t.params.k_bl1 as i64 * per_k * t.db.pb_bl1 as i64;
    let limit = t.available_l1.min(per_k * (t.org_khkw() * t.ci1_k0) as i64);
    if used > t.available_l1.min(t.weight_full_size) {
        used /= t.db.pb_bl1 as i64;
        t.db.pb_bl1 = 1;
        t.bl1_db_close = true;
        if max_multiple_under(used, limit) == 0 {
            error!("operand B does not fit L1 in basic block mode");
            return false;
        }
        return true;
    }
    // `nBL1` is `nTile` on every caller, so `limit` covers `used` and the
    // multiple is at least one.
    t.params.k_bl1 *= max_multiple_under(used, limit);
    true
}

fn k_split_cin(t: &BbTiling<'_>) -> u64 {
    let per_cin = (t.info.m_in * t.db.pb_al1 * t.inner_batch) as i64 * t.fmap_bytes()
        + (t.info.n_tile * t.org_khkw() * t.db.pb_bl1) as i64 * t.weight_bytes();
    if per_cin <= 0 || t.available_l1 <= 0 {
        return 0;
    }
    floor_align((t.available_l1 / per_cin) as u64, t.ctx.cube.k0)
}

fn k_split_tiling(t: &mut BbTiling<'_>) -> bool {
    let k0 = t.ctx.cube.k0;
    single_block(t);
    if t.info.n_bl1_full_load {
        t.info.iterate_order = IterateOrder::MFirst;
    } else if t.info.m_al1_full_load {
        t.info.iterate_order = IterateOrder::NFirst;
    }

    let second = if t.info.iterate_order == IterateOrder::MFirst {
        (DOUBLE_BUFFER_NUM, 1)
    } else {
        (1, DOUBLE_BUFFER_NUM)
    };
    let mut cin = 0;
    for (pb_a, pb_b) in [(DOUBLE_BUFFER_NUM, DOUBLE_BUFFER_NUM), second, (1, 1)] {
        t.db.pb_al1 = pb_a;
        t.db.pb_bl1 = pb_b;
        cin = k_split_cin(t);
        if cin != 0 {
            break;
        }
    }
    t.al1_db_close = t.db.pb_al1 == 1;
    t.bl1_db_close = t.db.pb_bl1 == 1;
    if cin == 0 {
        error!("K split cannot generate an L1 tiling");
        return false;
    }

    let mut cin_tile = cin;
    while cin_tile >= k0 && t.ci1_k0 % cin_tile != 0 {
        cin_tile -= k0;
    }
    if cin_tile <= k0 || cin_tile == t.ci1_k0 {
        cin_tile = cin;
    }
    let kernel = t.ctx.shape.single_kh * t.ctx.shape.single_kw;
    let k_al1_max = MAX_16_BIT_NUM / kernel.max(1);
    if cin_tile >= k_al1_max {
        cin_tile = divide_and_align(cin_tile, k_al1_max, k0);
    }
    t.params.k_al1 = cin_tile;
    t.params.k_bl1 = cin_tile * t.org_khkw();

    let grow_a = if t.info.n_bl1_full_load {
        false
    } else if t.info.m_al1_full_load {
        true
    } else {
        t.info.n_tile <= t.info.m_tile
    };
    if grow_a {
        t.info.iterate_order = IterateOrder::NFirst;
        t.available_l1 -= (t.params.k_bl1 * t.params.n_bl1 * t.db.pb_bl1) as i64 * t.weight_bytes();
        multi_load_k_al1(t)
    } else {
        t.info.iterate_order = IterateOrder::MFirst;
        t.available_l1 -= (t.params.k_al1 * t.params.m_al1 * t.db.pb_al1 * t.inner_batch) as i64 * t.fmap_bytes();
        multi_load_k_bl1(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::helpers::*;
    use crate::tiling::BasicBlockInfo;

    /// 3x3 kernel over 64 channels: `ci1_k0` is 64, a K step of B is 144.
    fn weight_walk(available_l1: i64) -> (bool, u64, u64, bool) {
        let ctx = validated(&Conv::new(64, 16, 16, 64, 3, 1).m_tiler(default_platform()));
        let mut info = BasicBlockInfo { n_tile: 64, m_in: 256, ..Default::default() };
        let mut t = BbTiling::new(&ctx, &mut info);
        t.db.pb_bl1 = DOUBLE_BUFFER_NUM;
        t.params.k_bl1 = 16 * 9;
        t.params.n_bl1 = 64;
        t.weight_full_size = 9 * 64 * 64 * 2;
        t.available_l1 = available_l1;
        let fits = multi_load_k_bl1(&mut t);
        (fits, t.params.k_bl1, t.db.pb_bl1, t.bl1_db_close)
    }

    #[test]
    fn multiple_under_limit() {
        assert_eq!(max_multiple_under(0, 100), 0);
        assert_eq!(max_multiple_under(30, 20), 0);
        assert_eq!(max_multiple_under(30, 100), 3);
    }

    #[test]
    fn divide_and_align_stays_below_max() {
        let v = divide_and_align(8192, 7281, 16);
        assert!(v < 7281);
        assert_eq!(v % 16, 0);
        assert_eq!(divide_and_align(10, 100, 16), 16);
    }

    #[test]
    fn k_bl1_grows_by_whole_multiples() {
        assert_eq!(weight_walk(100_000), (true, 288, DOUBLE_BUFFER_NUM, false));
    }

    #[test]
    fn closed_weight_double_buffer_stays_closed() {
        assert_eq!(weight_walk(30_000), (true, 144, 1, true));
    }

    #[test]
    fn weight_step_larger_than_l1_fails() {
        assert!(!weight_walk(10_000).0);
    }
}
