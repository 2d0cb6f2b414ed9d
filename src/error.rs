//! Error type shared by the composer, dispatcher and transports.

use thiserror::Error;

/// Errors raised while composing or delivering a deployment notification.
///
/// None of these are retried. The hook surfaces them to the caller, which
/// decides whether the deploy as a whole counts as failed.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// A required option (`to`, `from`, link prefix source) is missing or invalid
    #[error("Notifier configuration error: {0}")]
    Configuration(String),

    /// The transport refused or failed to hand off the message
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    /// The message could not be assembled from the deployment facts
    #[error("Failed to render notification: {0}")]
    Render(String),
}

impl NotifyError {
    /// Whether the error came from resolving options rather than from the transport.
    ///
    /// Render failures count as configuration failures: both abort before
    /// anything reaches the transport.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Render(_))
    }
}
