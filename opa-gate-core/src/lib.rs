//! OPA Gate Core - policy decision queries and the policy engine client
//!
//! This crate turns request attributes into decision queries, sends them to
//! a remote policy decision point, and reports the verdict. It keeps engine
//! failures apart from denials so callers can fail closed without losing
//! track of which one happened.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod decision;
pub mod error;
pub mod query;

pub use client::{PolicyClient, PolicyClientConfig, PolicyEvaluator, DEFAULT_TIMEOUT};
pub use config::GateConfig;
pub use decision::{parse_decision, DecisionResult, MissingAllow, Verdict};
pub use error::{ConfigError, PolicyEngineError, Result};
pub use query::{decode_path, parse_roles, split_path, DecisionQuery, PolicyInput};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
