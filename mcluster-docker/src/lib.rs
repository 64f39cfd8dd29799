//! Docker environment for mcluster.
//!
//! Every replica of a resource runs as one privileged node container. The
//! containers carry labels naming their cluster, resource, role and replica
//! index, and the actual cluster state is rebuilt from those labels.

pub mod cli;
pub mod error;
pub mod node;
pub mod runtime;

pub use cli::{DockerCli, Runner};
pub use error::DockerError;
pub use runtime::DockerEnvironment;
