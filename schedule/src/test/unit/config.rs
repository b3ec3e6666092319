use crate::config::{InnerBatchPolicy, PlannerConfig};

#[test]
fn defaults() {
    let config = PlannerConfig::default();
    assert_eq!(config.inner_batch, InnerBatchPolicy::Auto);
    assert!(config.weight_ub);
    assert!(config.load3d_m_limit);
    assert!(!config.trace_candidates);
    assert_eq!(PlannerConfig::builder().build(), config);
}

#[test]
fn builder_overrides() {
    let config = PlannerConfig::builder()
        .inner_batch(InnerBatchPolicy::Disabled)
        .weight_ub(false)
        .trace_candidates(true)
        .build();
    assert!(!config.inner_batch.is_auto());
    assert!(!config.weight_ub);
    assert!(config.load3d_m_limit);
    assert!(config.trace_candidates);
}
