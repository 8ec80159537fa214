//! Error type for true internal/infra failures.
//!
//! Protocol-level outcomes — 404 for an unknown method, a malformed frame
//! from a peer, a transport that can't currently accept a write — are not
//! routed through `Result`/`Err` anywhere in the engine; they're reported as
//! ordinary response frames or silently dropped per §7. `RpcMuxError` is
//! reserved for configuration and credential-store failures that a host
//! needs to fail startup on, not for anything that happens mid-session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcMuxError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed configuration TOML: {0}")]
    Toml(#[from] toml::de::Error),
}
