use thiserror::Error;

/// Failure taxonomy for probe checks.
///
/// A graceful-shutdown timeout is deliberately not represented here:
/// `probe::stop` downgrades it to a forced kill and reports the outcome
/// as a boolean instead of an error.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("service exited during the startup grace period ({status})\nstdout: {stdout}\nstderr: {stderr}")]
    Startup {
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("service exited unexpectedly after {elapsed_secs:.1}s ({status})")]
    UnexpectedExit { status: String, elapsed_secs: f64 },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("query returned status {status}: {body}")]
    Query { status: u16, body: String },
}
