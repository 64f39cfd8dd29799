//! Thin wrapper around the docker command line.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::DockerError;

/// Runs docker with the given arguments and returns its stdout.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, args: Vec<String>) -> Result<String, DockerError>;
}

/// [`Runner`] that shells out to the docker binary.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl Runner for DockerCli {
    async fn run(&self, args: Vec<String>) -> Result<String, DockerError> {
        debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|source| DockerError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DockerError::from_stderr(&args, &stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
