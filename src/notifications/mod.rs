//! Deployment notifications sent by email.
//!
//! [`compose`] turns the facts of one deploy into a subject and HTML/text
//! bodies; [`dispatch`] picks a delivery strategy for the configured
//! [`transport`] and hands the message off.

pub mod compose;
pub mod dispatch;
pub mod transport;

use chrono::{DateTime, FixedOffset};

pub use compose::{compose, ComposedMessage};
pub use dispatch::{DispatchReport, Dispatcher};
pub use transport::{build_transport, CapturedMail, MailTransport};

/// What was deployed, by whom and when.
///
/// Produced once per deploy by the host (or by [`crate::git`]) and only read here.
#[derive(Debug, Clone)]
pub struct DeploymentFacts {
    pub application: String,
    pub user_name: String,
    pub branch: String,
    pub stage: String,
    /// Host local time of the deploy, rendered with its offset
    pub timestamp: DateTime<FixedOffset>,
    /// `previous..current`, absent on a first deploy
    pub git_range: Option<String>,
    /// One commit per line, empty when there is no range
    pub git_log: String,
}
