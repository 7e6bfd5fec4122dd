//! Mutant detector - flags ReplicaSets whose pods run diverging images
//!
//! Pods created from the same template should run the same image digests.
//! An in-place image edit on a single pod breaks that. This crate watches
//! ReplicaSets and their pods and records on every ReplicaSet whether its
//! pods agree.
//!
//! # Modules
//!
//! - [`mutant`] - Verdict computation over running container images
//! - [`controller`] - ReplicaSet reconciliation and pod ownership resolution
//! - [`telemetry`] - Tracing subscriber and OpenTelemetry export
//! - [`metrics`] - Reconciliation metrics
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod controller;
pub mod error;
pub mod metrics;
pub mod mutant;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace watched when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Name used as field manager and telemetry service name
pub const CONTROLLER_NAME: &str = "mutant-detector";
