//! Failure taxonomy for analysis runs.
//!
//! Every failure surfaces to the orchestrator's terminal `Failed` state with a
//! human-readable cause. Nothing here is converted into an empty result.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Missing or invalid zone set, trim bounds or run parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// Model weights missing or incompatible. Raised before any frame is processed.
    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    /// A single frame or batch call failed mid-run.
    #[error("engine inference failed: {0}")]
    EngineInference(String),

    /// Source video unreadable or corrupt.
    #[error("i/o error: {0}")]
    Io(String),

    /// A run is already active; runs are never queued.
    #[error("a run is already in progress")]
    RunInProgress,

    /// The run stopped at a cancellation checkpoint.
    #[error("run was cancelled")]
    Cancelled,

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

impl PipelineError {
    pub fn config(err: impl std::fmt::Display) -> Self {
        Self::Config(err.to_string())
    }

    /// Flattens an `anyhow` chain so the cause survives into the message.
    pub fn engine_init(err: anyhow::Error) -> Self {
        Self::EngineInit(format!("{err:#}"))
    }

    pub fn inference(err: anyhow::Error) -> Self {
        Self::EngineInference(format!("{err:#}"))
    }

    pub fn io(err: anyhow::Error) -> Self {
        Self::Io(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn anyhow_chain_is_preserved() {
        let err = std::fs::read("/definitely/not/here.mp4")
            .context("open source video")
            .unwrap_err();
        let mapped = PipelineError::io(err);
        let msg = mapped.to_string();
        assert!(msg.starts_with("i/o error: open source video"));
        assert!(msg.contains(':'));
    }
}
