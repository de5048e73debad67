//! Control-plane collaborators
//!
//! The [`ControlPlane`] trait is the seam the reconciler works through.
//! Two implementations ship: an HTTP adapter for real control planes and a
//! deterministic in-memory plane for tests and hermetic embeddings.

pub mod api;
pub mod http;
pub mod memory;
pub mod types;

pub use api::ControlPlane;
pub use http::HttpControlPlane;
pub use memory::{MemoryControlPlane, RecordedCall};
pub use types::*;
