//! Cold backup and restore of TiDB clusters running on Kubernetes.
//!
//! [`core::LifecycleOrchestrator`] drives the fleet through stop, backup or
//! restore, and start; [`utils`] holds the role registry and configuration.

pub mod core;
pub mod utils;
