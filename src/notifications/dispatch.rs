//! Delivery of a composed notification.
//!
//! The dispatcher reads its transport's capabilities once, when it is built,
//! and keeps the matching [`DeliveryStrategy`] for every message after that:
//!
//! - [`ModernStrategy`] sends one multipart/alternative message (text + HTML)
//! - [`LegacyStrategy`] composes a single-part HTML message, then sends it
//!
//! Sender, recipients and transport travel with each call in
//! [`DeliverySettings`]; nothing is stored in process-wide state, so two
//! notifications can be in flight at once.

use async_trait::async_trait;
use lettre::message::Mailbox;
use std::sync::Arc;

use crate::config::MailOptions;
use crate::error::NotifyError;

use super::compose::{compose, ComposedMessage};
use super::transport::{build_transport, CapturedMail, MailBody, MailCapabilities, MailTransport, OutgoingMail};
use super::DeploymentFacts;

/// Everything a strategy needs to deliver one message
pub struct DeliverySettings<'a> {
    pub transport: &'a dyn MailTransport,
    pub from: &'a Mailbox,
    pub to: &'a [Mailbox],
}

#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(
        &self,
        message: &ComposedMessage,
        settings: &DeliverySettings<'_>,
    ) -> Result<(), NotifyError>;
}

pub struct ModernStrategy;

#[async_trait]
impl DeliveryStrategy for ModernStrategy {
    fn name(&self) -> &'static str {
        "modern"
    }

    async fn deliver(
        &self,
        message: &ComposedMessage,
        settings: &DeliverySettings<'_>,
    ) -> Result<(), NotifyError> {
        let mail = OutgoingMail {
            from: settings.from.clone(),
            to: settings.to.to_vec(),
            subject: message.subject.clone(),
            body: MailBody::Alternative {
                text: message.text_body.clone(),
                html: message.html_body.clone(),
            },
        };

        settings.transport.send(&mail).await
    }
}

pub struct LegacyStrategy;

impl LegacyStrategy {
    fn compose_notice(message: &ComposedMessage, settings: &DeliverySettings<'_>) -> OutgoingMail {
        OutgoingMail {
            from: settings.from.clone(),
            to: settings.to.to_vec(),
            subject: message.subject.clone(),
            body: MailBody::Html(message.html_body.clone()),
        }
    }
}

#[async_trait]
impl DeliveryStrategy for LegacyStrategy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn deliver(
        &self,
        message: &ComposedMessage,
        settings: &DeliverySettings<'_>,
    ) -> Result<(), NotifyError> {
        let notice = Self::compose_notice(message, settings);
        settings.transport.send(&notice).await
    }
}

/// Pick the strategy for a transport's capabilities
pub fn select_strategy(capabilities: MailCapabilities) -> Box<dyn DeliveryStrategy> {
    if capabilities.multipart_alternative {
        Box::new(ModernStrategy)
    } else {
        Box::new(LegacyStrategy)
    }
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub strategy: &'static str,
    pub subject: String,
    pub recipients: usize,
    /// Messages held by the test transport; empty for real transports
    pub captured: Vec<CapturedMail>,
}

pub struct Dispatcher {
    options: MailOptions,
    transport: Arc<dyn MailTransport>,
    strategy: Box<dyn DeliveryStrategy>,
}

impl Dispatcher {
    /// Build the transport named by `options.method` and select a strategy for it
    pub fn new(options: MailOptions) -> Result<Self, NotifyError> {
        let transport = build_transport(&options)?;
        Ok(Self::with_transport(options, transport))
    }

    pub fn with_transport(options: MailOptions, transport: Arc<dyn MailTransport>) -> Self {
        let strategy = select_strategy(transport.capabilities());
        tracing::debug!(
            transport = transport.name(),
            strategy = strategy.name(),
            "Delivery strategy selected"
        );

        Self {
            options,
            transport,
            strategy,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Compose and deliver the notification for one deploy.
    ///
    /// Configuration is resolved before anything is composed; on any error
    /// nothing is handed to the transport.
    pub async fn dispatch(&self, facts: &DeploymentFacts) -> Result<DispatchReport, NotifyError> {
        let from = self.options.sender()?;
        let to = self.options.recipients()?;

        let message = compose(facts, &self.options);
        let settings = DeliverySettings {
            transport: self.transport.as_ref(),
            from: &from,
            to: &to,
        };

        if let Err(e) = self.strategy.deliver(&message, &settings).await {
            tracing::error!(
                transport = self.transport.name(),
                subject = %message.subject,
                error = %e,
                "Failed to deliver deployment notification"
            );
            return Err(e);
        }

        tracing::info!(
            transport = self.transport.name(),
            strategy = self.strategy.name(),
            recipients = to.len(),
            subject = %message.subject,
            "Deployment notification sent"
        );

        Ok(DispatchReport {
            strategy: self.strategy.name(),
            subject: message.subject,
            recipients: to.len(),
            captured: self.transport.deliveries().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeliveryMethod, Recipients};
    use crate::notifications::transport::TestMailTransport;
    use chrono::Utc;

    fn facts() -> DeploymentFacts {
        DeploymentFacts {
            application: "app".to_string(),
            user_name: "alice".to_string(),
            branch: "main".to_string(),
            stage: "production".to_string(),
            timestamp: Utc::now().into(),
            git_range: Some("aaaaaaa..bbbbbbb".to_string()),
            git_log: "aaaaaaa Fix X\nbbbbbbb Add Y".to_string(),
        }
    }

    fn options() -> MailOptions {
        MailOptions {
            from: Some("ci@x.com".to_string()),
            to: Recipients::One("ops@x.com".to_string()),
            method: DeliveryMethod::Test,
            github: Some("acme/app".to_string()),
            ..Default::default()
        }
    }

    /// Transport that always fails, to check error propagation
    struct RefusingTransport;

    #[async_trait]
    impl MailTransport for RefusingTransport {
        fn name(&self) -> &'static str {
            "refusing"
        }

        fn capabilities(&self) -> MailCapabilities {
            MailCapabilities {
                multipart_alternative: true,
            }
        }

        async fn send(&self, _mail: &OutgoingMail) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("connection refused".to_string()))
        }
    }

    #[test]
    fn test_select_strategy() {
        let modern = select_strategy(MailCapabilities {
            multipart_alternative: true,
        });
        let legacy = select_strategy(MailCapabilities {
            multipart_alternative: false,
        });
        assert_eq!(modern.name(), "modern");
        assert_eq!(legacy.name(), "legacy");
    }

    #[tokio::test]
    async fn test_end_to_end_test_capture() {
        let dispatcher = Dispatcher::new(options()).unwrap();
        let report = dispatcher.dispatch(&facts()).await.unwrap();

        assert_eq!(report.strategy, "modern");
        assert_eq!(report.recipients, 1);
        assert_eq!(report.captured.len(), 1);

        let mail = &report.captured[0];
        assert_eq!(mail.subject, "App branch main deployed to production");
        assert_eq!(mail.from, "ci@x.com");
        assert_eq!(mail.to, vec!["ops@x.com"]);

        let html = mail.html_body.as_deref().unwrap();
        assert_eq!(html.matches("/compare/aaaaaaa...bbbbbbb").count(), 1);
        assert_eq!(html.matches(">aaaaaaa..bbbbbbb</a>").count(), 1);
        assert_eq!(html.matches("/commit/").count(), 2);

        let text = mail.text_body.as_deref().unwrap();
        assert!(text.contains("https://github.com/acme/app/compare/aaaaaaa...bbbbbbb"));
    }

    #[tokio::test]
    async fn test_legacy_strategy_sends_single_part_html() {
        let transport = TestMailTransport::single_part();
        let dispatcher = Dispatcher::with_transport(options(), Arc::new(transport.clone()));
        assert_eq!(dispatcher.strategy_name(), "legacy");

        let report = dispatcher.dispatch(&facts()).await.unwrap();
        assert_eq!(report.strategy, "legacy");

        let captured = transport.deliveries().unwrap();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].text_body.is_none());
        assert!(captured[0]
            .html_body
            .as_deref()
            .unwrap()
            .contains("/commit/aaaaaaa"));
    }

    #[tokio::test]
    async fn test_list_of_recipients() {
        let options = MailOptions {
            to: Recipients::Many(vec!["ops@x.com".to_string(), "dev@x.com".to_string()]),
            ..options()
        };
        let report = Dispatcher::new(options).unwrap().dispatch(&facts()).await.unwrap();
        assert_eq!(report.recipients, 2);
        assert_eq!(report.captured[0].to, vec!["ops@x.com", "dev@x.com"]);
    }

    #[tokio::test]
    async fn test_missing_recipient_sends_nothing() {
        let transport = TestMailTransport::new();
        let options = MailOptions {
            to: Recipients::default(),
            ..options()
        };
        let dispatcher = Dispatcher::with_transport(options, Arc::new(transport.clone()));

        let err = dispatcher.dispatch(&facts()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Configuration(_)));
        assert!(transport.deliveries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sender_sends_nothing() {
        let transport = TestMailTransport::new();
        let options = MailOptions {
            from: None,
            ..options()
        };
        let dispatcher = Dispatcher::with_transport(options, Arc::new(transport.clone()));

        let err = dispatcher.dispatch(&facts()).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(transport.deliveries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_error_is_propagated() {
        let dispatcher = Dispatcher::with_transport(options(), Arc::new(RefusingTransport));
        let err = dispatcher.dispatch(&facts()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_without_link_prefix_still_delivers() {
        let options = MailOptions {
            github: None,
            ..options()
        };
        let report = Dispatcher::new(options).unwrap().dispatch(&facts()).await.unwrap();
        let html = report.captured[0].html_body.clone().unwrap();
        assert!(!html.contains("<a "));
    }
}
