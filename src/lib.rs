pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod hooks;
pub mod notifications;

pub use error::NotifyError;
pub use notifications::{DeploymentFacts, Dispatcher};
