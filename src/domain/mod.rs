//! Domain layer: models, ports, and errors for the Argus control plane.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, ErrorCode};
