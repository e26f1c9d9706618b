//! Platform integration: core pinning and thermal management.
//!
//! Both are best effort. On systems without affinity support or without the
//! Linux sysfs nodes, the processor keeps running with the feature disabled.

pub mod affinity;
pub mod thermal;

pub use affinity::{AffinityManager, CpuSet, Placement, StageKind};
pub use thermal::{
    CpuGovernor, FixedSensor, SysfsThermalSensor, ThermalSampler, ThermalSensor, ThermalState,
};
