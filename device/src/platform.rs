use std::str::FromStr;

use bon::bon;
use tracing::debug;

use crate::error::{Error, NoCoresSnafu, Result, UnknownSocSnafu, ZeroBandwidthSnafu, ZeroCapacitySnafu};

/// On-chip buffers whose capacity bounds a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BufferKind {
    L1,
    /// Operand A (feature map) side of L0.
    L0A,
    /// Operand B (weight) side of L0.
    L0B,
    /// Accumulator side of L0.
    L0C,
    Ub,
    BiasTable,
    Fixpipe,
}

/// Known accelerator parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SocVersion {
    #[default]
    Ascend950,
    Ascend910_55,
    Mc62cm12a,
    /// Any other part; no SoC specific rules apply.
    Generic,
}

impl SocVersion {
    /// L1 fill cost of operand B relative to operand A.
    pub const fn bandwidth_coeff(&self) -> u64 {
        match self {
            Self::Ascend950 | Self::Mc62cm12a => 2,
            Self::Ascend910_55 | Self::Generic => 1,
        }
    }

    /// Parts whose load-3D instruction caps the M start position.
    pub const fn limits_load3d_m_start(&self) -> bool {
        matches!(self, Self::Ascend950 | Self::Mc62cm12a)
    }

    /// Parts whose data-copy instruction caps the burst length of a bias/scale load.
    pub const fn limits_burst_len(&self) -> bool {
        matches!(self, Self::Ascend950 | Self::Ascend910_55 | Self::Mc62cm12a)
    }
}

impl FromStr for SocVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "ASCEND950" => Ok(Self::Ascend950),
            "ASCEND910_55" => Ok(Self::Ascend910_55),
            "MC62CM12A" => Ok(Self::Mc62cm12a),
            "GENERIC" => Ok(Self::Generic),
            _ => UnknownSocSnafu { soc: s }.fail(),
        }
    }
}

/// Byte capacities and core count of one accelerator.
///
/// Immutable for the lifetime of a tiling run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlatformInfo {
    pub soc_version: SocVersion,
    pub l1_size: u64,
    pub l0a_size: u64,
    pub l0b_size: u64,
    pub l0c_size: u64,
    pub ub_size: u64,
    pub bt_size: u64,
    pub fb_size: u64,
    pub aicore_num: u64,
    /// Bandwidth coefficient comparing operand B reloads against operand A.
    pub bandwidth_coeff: u64,
}

#[bon]
impl PlatformInfo {
    #[builder]
    pub fn builder(
        #[builder(default)] soc_version: SocVersion,
        #[builder(default = 512 * 1024)] l1_size: u64,
        #[builder(default = 64 * 1024)] l0a_size: u64,
        #[builder(default = 64 * 1024)] l0b_size: u64,
        #[builder(default = 256 * 1024)] l0c_size: u64,
        #[builder(default = 256 * 1024)] ub_size: u64,
        #[builder(default = 4 * 1024)] bt_size: u64,
        #[builder(default = 4 * 1024)] fb_size: u64,
        #[builder(default = 32)] aicore_num: u64,
        bandwidth_coeff: Option<u64>,
    ) -> Self {
        Self {
            soc_version,
            l1_size,
            l0a_size,
            l0b_size,
            l0c_size,
            ub_size,
            bt_size,
            fb_size,
            aicore_num,
            bandwidth_coeff: bandwidth_coeff.unwrap_or(soc_version.bandwidth_coeff()),
        }
    }
}

impl PlatformInfo {
    /// Capacities of a known part.
    pub fn preset(soc: SocVersion) -> Self {
        match soc {
            SocVersion::Ascend950 => Self::builder().soc_version(soc).aicore_num(32).build(),
            SocVersion::Ascend910_55 => Self::builder().soc_version(soc).aicore_num(24).build(),
            SocVersion::Mc62cm12a => Self::builder()
                .soc_version(soc)
                .l1_size(256 * 1024)
                .l0c_size(128 * 1024)
                .ub_size(192 * 1024)
                .aicore_num(8)
                .build(),
            SocVersion::Generic => Self::builder().soc_version(soc).build(),
        }
    }

    pub const fn capacity(&self, buffer: BufferKind) -> u64 {
        match buffer {
            BufferKind::L1 => self.l1_size,
            BufferKind::L0A => self.l0a_size,
            BufferKind::L0B => self.l0b_size,
            BufferKind::L0C => self.l0c_size,
            BufferKind::Ub => self.ub_size,
            BufferKind::BiasTable => self.bt_size,
            BufferKind::Fixpipe => self.fb_size,
        }
    }

    /// Rejects descriptions the planner cannot divide by.
    pub fn validate(&self) -> Result<()> {
        use strum::IntoEnumIterator;

        for buffer in BufferKind::iter() {
            if self.capacity(buffer) == 0 {
                debug!(%buffer, "zero capacity buffer");
                return ZeroCapacitySnafu { buffer }.fail();
            }
        }
        if self.aicore_num == 0 {
            return NoCoresSnafu.fail();
        }
        if self.bandwidth_coeff == 0 {
            return ZeroBandwidthSnafu.fail();
        }
        Ok(())
    }
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self::preset(SocVersion::default())
    }
}
