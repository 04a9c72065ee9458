use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort startup. Component-level errors are folded into one of
/// these before they reach the application controller.
#[derive(Debug, Error)]
pub enum BootError {
    #[error(
        "port {port} is still in use after {attempts} attempts to reclaim it; please restart your computer"
    )]
    PortUnavailable { port: u16, attempts: u32 },

    #[error("static UI files were not found at {}", path.display())]
    FrontendMissing { path: PathBuf },

    #[error("failed to launch backend `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("backend did not become healthy within {timeout_ms} ms\n--- last backend output ---\n{log_tail}")]
    HealthTimeout { timeout_ms: u128, log_tail: String },

    #[error("backend exited before becoming healthy ({status})\n--- last backend output ---\n{log_tail}")]
    BackendExited { status: String, log_tail: String },

    #[error("local gateway failed: {0}")]
    Gateway(String),
}

impl BootError {
    pub fn log_tail(&self) -> Option<&str> {
        match self {
            Self::HealthTimeout { log_tail, .. } | Self::BackendExited { log_tail, .. } => {
                Some(log_tail)
            }
            _ => None,
        }
    }
}
