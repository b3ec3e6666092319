//! Tiling result tree and the three search variants that fill it.
//!
//! A variant borrows the [`TilingContext`](crate::TilingContext), runs
//! L0 tiling, L1 tiling and the double-buffer decision, and hands back a
//! [`TilingOutcome`]. Results are plain values: created zeroed per run and
//! never shared between runs.

pub mod bbmode;
pub mod hwmode;
pub mod mmode;

use crate::error::Result;

pub use bbmode::{BasicBlockInfo, BbStrategy, BbTiling};
pub use hwmode::HwTiling;
pub use mmode::MTiling;

pub const DOUBLE_BUFFER_NUM: u64 = 2;

/// Load-3D M start position cap.
pub const LOAD3D_M_START_POS_LIMIT: u64 = 32767;
/// Load-3D v2 input height/width cap.
pub const LOAD3DV2_HIN_WIN_LIMIT: u64 = 32767;
/// Largest K start position representable by load-3D.
pub const MAX_16_BIT_NUM: u64 = 65535;
pub const POSTK_LIMIT: u64 = 65535;
/// Largest bias/scale burst a single data copy moves.
pub const DATACOPYPARAMS_BURSTLEN_MAX: u64 = 65535 * 32;
/// Vector units paired with one cube unit.
pub const VEC_NUM_PER_CUBE: u64 = 2;

/// Which operand the outer L1 loop walks first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IterateOrder {
    #[default]
    MFirst,
    NFirst,
    Invalid,
}

impl IterateOrder {
    /// Wire value in the tiling record.
    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::MFirst => 0,
            Self::NFirst => 1,
            Self::Invalid => 2,
        }
    }
}

/// Which operands stay resident in L1 for the whole K loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum L1LoadMode {
    AllFullLoad,
    FullLoadA,
    FullLoadB,
    #[default]
    NoneFullLoad,
}

/// Ping-pong multiplier per buffer role, each 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DoubleBuffer {
    pub pb_al1: u64,
    pub pb_bl1: u64,
    pub pb_al0: u64,
    pub pb_bl0: u64,
    pub pb_cl0: u64,
    pub pb_ub: u64,
}

impl Default for DoubleBuffer {
    fn default() -> Self {
        Self { pb_al1: 1, pb_bl1: 1, pb_al0: 1, pb_bl0: 1, pb_cl0: 1, pb_ub: 1 }
    }
}

impl DoubleBuffer {
    /// Packs (ub, bl1, al1, cl0, bl0, al0), most significant first; a bit is
    /// set when that role is double buffered.
    pub fn pbuffer_flag(&self) -> u64 {
        [self.pb_ub, self.pb_bl1, self.pb_al1, self.pb_cl0, self.pb_bl0, self.pb_al0]
            .iter()
            .fold(0, |acc, &pb| (acc << 1) | u64::from(pb == DOUBLE_BUFFER_NUM))
    }
}

/// Per L0 pass tile sizes. `m_l0` for the flattened layout, `ho_l0`/`wo_l0`
/// for the split layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct L0TilingRes {
    pub m_l0: u64,
    pub ho_l0: u64,
    pub wo_l0: u64,
    pub k_l0: u64,
    pub n_l0: u64,
}

/// Per L1 pass tile sizes and load flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct L1TilingRes {
    /// Operand A K extent, including the kernel window.
    pub k_al1: u64,
    pub k_bl1: u64,
    pub m_al1: u64,
    pub ho_al1: u64,
    pub wo_al1: u64,
    pub n_bl1: u64,
    pub kh_l1: u64,
    pub kw_l1: u64,
    pub iterate_order: IterateOrder,
    pub al1_full_load: bool,
    pub bl1_full_load: bool,
    pub bias_full_load: bool,
    pub fixp_full_load: bool,
}

impl Default for L1TilingRes {
    fn default() -> Self {
        Self {
            k_al1: 0,
            k_bl1: 0,
            m_al1: 0,
            ho_al1: 0,
            wo_al1: 0,
            n_bl1: 0,
            kh_l1: 1,
            kw_l1: 1,
            iterate_order: IterateOrder::MFirst,
            al1_full_load: false,
            bl1_full_load: false,
            bias_full_load: false,
            fixp_full_load: false,
        }
    }
}

/// Scale and bias staging through UB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UbTilingRes {
    pub m_ub: u64,
    pub n_ub: u64,
}

/// Everything one variant run decides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TilingOutcome {
    pub l0: L0TilingRes,
    pub l1: L1TilingRes,
    pub db: DoubleBuffer,
    pub ub: UbTilingRes,
    /// Batches folded into one pass, 1 when disabled.
    pub inner_batch: u64,
}

/// One search variant.
pub trait TilingAlgorithm {
    /// Runs L0 tiling, L1 tiling and the double buffer decision.
    fn process(self) -> Result<TilingOutcome>;
}

/// Walks `lattice` upward from `idx` while `fits` holds for the next value,
/// returning the last accepted index.
pub(crate) fn walk_up(lattice: &[u64], mut idx: usize, mut fits: impl FnMut(u64) -> bool) -> usize {
    while idx + 1 < lattice.len() && fits(lattice[idx + 1]) {
        idx += 1;
    }
    idx
}
