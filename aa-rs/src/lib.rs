//! Deploys a batch of artifacts through an ERC-4337 smart account by submitting a
//! single EIP-712 signed `PackedUserOperation` straight to `EntryPoint.handleOps`.
//!
//! The flow is [`pipeline::run_attempt`]: preflight, calldata, nonce, assembly,
//! typed-data digest, signature, simulation, submission, outcome decoding.

pub mod builder;
pub mod calls;
pub mod chain;
pub mod config;
pub mod eip712;
pub mod encoding;
pub mod entrypoint;
pub mod error;
pub mod outcome;
pub mod packing;
pub mod pipeline;
pub mod preflight;
pub mod scanner;
pub mod signer;
pub mod submitter;
pub mod types;

#[cfg(test)]
mod mock;

pub use error::{ConfigError, PreflightError, Result, UserOpError};
pub use pipeline::{run_attempt, AttemptConfig, AttemptReport};
pub use types::{Contracts, DeployedArtifact, DeploymentItem, GasConfig, PackedUserOperation};
