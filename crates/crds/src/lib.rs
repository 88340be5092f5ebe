//! HostOps CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the host lifecycle operator.

pub mod conditions;
pub mod host;
pub mod registry;

pub use conditions::*;
pub use host::*;
pub use registry::*;
