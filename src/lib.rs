//! Converge: Desired-State Reconciliation for Container Services
//!
//! This crate converges managed container services toward a declared
//! desired state: it creates services that are absent, updates the fields
//! that drifted, and drains-then-deletes services that should be gone.
//! All control-plane access goes through the [`controlplane::ControlPlane`]
//! trait, so the engine runs identically against HTTP and in-memory planes.

pub mod controlplane;
pub mod error;
pub mod reconcile;
pub mod spec;

pub use crate::error::{Error, Result};
pub use crate::reconcile::{ReconcileOptions, ReconcileOutcome, ServiceReconciler};
pub use crate::spec::{DesiredSpec, Mode};
