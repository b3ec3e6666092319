//! Planner configuration types.
//!
//! Provides typed configuration for the tiling search with bon builders.
//! Supports both explicit configuration and environment variable fallbacks.

use bon::bon;

// ============================================================================
// INNER BATCH POLICY
// ============================================================================

/// Whether M-mode may fold several batches into one L0 pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InnerBatchPolicy {
    /// Derive the inner batch from L0/L1 headroom (default).
    #[default]
    Auto,

    /// Keep one batch per pass.
    Disabled,
}

impl InnerBatchPolicy {
    /// Read the policy from `CUBETILE_INNER_BATCH` (`auto` or `off`).
    pub fn from_env() -> Self {
        match std::env::var("CUBETILE_INNER_BATCH").as_deref() {
            Ok("off") | Ok("0") | Ok("disabled") => Self::Disabled,
            _ => Self::Auto,
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

// ============================================================================
// PLANNER CONFIGURATION
// ============================================================================

/// Knobs of the tiling search that are not part of the problem description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Inner batch folding for M-mode.
    pub inner_batch: InnerBatchPolicy,
    /// Allow staging the weight through UB when the layout qualifies.
    pub weight_ub: bool,
    /// Enforce the load-3D M start position limit on every part, not only the
    /// parts that are known to carry it.
    pub load3d_m_limit: bool,
    /// Emit a trace event for every lattice step.
    pub trace_candidates: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { inner_batch: InnerBatchPolicy::Auto, weight_ub: true, load3d_m_limit: true, trace_candidates: false }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    if let Ok(s) = std::env::var(name)
        && let Ok(v) = s.parse::<u8>()
        && v <= 1
    {
        return Some(v == 1);
    }
    None
}

#[bon]
impl PlannerConfig {
    /// Create a planner configuration with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default)] inner_batch: InnerBatchPolicy,
        #[builder(default = true)] weight_ub: bool,
        #[builder(default = true)] load3d_m_limit: bool,
        #[builder(default = false)] trace_candidates: bool,
    ) -> Self {
        Self { inner_batch, weight_ub, load3d_m_limit, trace_candidates }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `CUBETILE_INNER_BATCH` - `auto` (default) or `off`
    /// * `CUBETILE_WEIGHT_UB` - `0` disables weight staging through UB
    /// * `CUBETILE_TRACE` - `1` traces every lattice step
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inner_batch: InnerBatchPolicy::from_env(),
            weight_ub: env_flag("CUBETILE_WEIGHT_UB").unwrap_or(defaults.weight_ub),
            load3d_m_limit: defaults.load3d_m_limit,
            trace_candidates: env_flag("CUBETILE_TRACE").unwrap_or(defaults.trace_candidates),
        }
    }
}
