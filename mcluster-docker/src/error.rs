//! Docker error types.

use thiserror::Error;

/// Errors from running the docker CLI.
#[derive(Debug, Error)]
pub enum DockerError {
    /// The docker binary could not be started.
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The daemon is not reachable from the CLI.
    #[error("docker daemon unavailable: {0}")]
    Daemon(String),

    /// docker exited with an error.
    #[error("docker {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    /// Output did not look like what was asked for.
    #[error("unexpected docker output: {0}")]
    Parse(String),
}

impl DockerError {
    /// Classify a failed invocation by its stderr.
    pub fn from_stderr(args: &[String], stderr: &str) -> Self {
        let stderr = stderr.trim();
        if stderr.contains("Cannot connect to the Docker daemon")
            || stderr.contains("error during connect")
            || stderr.contains("permission denied while trying to connect")
        {
            DockerError::Daemon(stderr.to_string())
        } else {
            DockerError::Command {
                args: args.join(" "),
                stderr: stderr.to_string(),
            }
        }
    }
}

impl From<DockerError> for mcluster_core::Error {
    fn from(e: DockerError) -> Self {
        match e {
            DockerError::Spawn { .. } | DockerError::Daemon(_) => {
                mcluster_core::Error::EnvironmentUnreachable(e.to_string())
            }
            DockerError::Command { .. } | DockerError::Parse(_) => {
                mcluster_core::Error::Environment(e.to_string())
            }
        }
    }
}
