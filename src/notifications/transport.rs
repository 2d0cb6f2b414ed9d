//! Mail transports: SMTP, local sendmail, and in-memory capture for `method = "test"`.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSendmailTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::config::{DeliveryMethod, MailOptions, SmtpSettings, SmtpTls};
use crate::error::NotifyError;

/// What a transport can carry, read once when the dispatcher is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailCapabilities {
    /// Accepts multipart/alternative messages (text + HTML in one send)
    pub multipart_alternative: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailBody {
    Alternative { text: String, html: String },
    Html(String),
}

/// A fully addressed message, ready for a transport
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
    pub subject: String,
    pub body: MailBody,
}

impl OutgoingMail {
    /// Build the RFC 5322 message
    pub fn to_message(&self) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.subject.clone());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        let message = match &self.body {
            MailBody::Alternative { text, html } => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            MailBody::Html(html) => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html.clone()),
            ),
        };

        message.map_err(|e| NotifyError::Render(format!("failed to build message: {}", e)))
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> MailCapabilities;

    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError>;

    /// Messages kept in memory instead of sent. Only the test transport has any.
    fn deliveries(&self) -> Option<Vec<CapturedMail>> {
        None
    }
}

/// Build the transport selected by `method`
pub fn build_transport(options: &MailOptions) -> Result<Arc<dyn MailTransport>, NotifyError> {
    let transport: Arc<dyn MailTransport> = match options.method {
        DeliveryMethod::Smtp => Arc::new(SmtpMailTransport::new(&options.smtp_settings)?),
        DeliveryMethod::Sendmail => Arc::new(SendmailMailTransport::new()),
        DeliveryMethod::Test => Arc::new(TestMailTransport::new()),
    };

    tracing::debug!(
        method = %options.method,
        transport = transport.name(),
        "Mail transport ready"
    );

    Ok(transport)
}

pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let host = settings.address.as_str();
        let smtp_error =
            |e: lettre::transport::smtp::Error| NotifyError::Configuration(format!("SMTP {}: {}", host, e));

        let mailer = match settings.tls {
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            SmtpTls::Opportunistic => {
                let params = TlsParameters::new(host.to_string()).map_err(smtp_error)?;
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                    .tls(Tls::Opportunistic(params))
            }
            SmtpTls::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(smtp_error)?
            }
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(smtp_error)?,
        }
        .port(settings.port);

        let mailer = if let (Some(username), Some(password)) =
            (&settings.user_name, &settings.password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        Ok(Self {
            transport: mailer.build(),
            host: host.to_string(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn capabilities(&self) -> MailCapabilities {
        MailCapabilities {
            multipart_alternative: true,
        }
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let message = mail.to_message()?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Delivery(format!("SMTP {}: {}", self.host, e)))?;
        Ok(())
    }
}

/// Pipes messages to the local `sendmail` binary.
///
/// Local sendmail wrappers often relay only the first body part, so this
/// transport takes single-part HTML messages.
pub struct SendmailMailTransport {
    transport: AsyncSendmailTransport<Tokio1Executor>,
}

impl SendmailMailTransport {
    pub fn new() -> Self {
        Self {
            transport: AsyncSendmailTransport::<Tokio1Executor>::new(),
        }
    }
}

impl Default for SendmailMailTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for SendmailMailTransport {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    fn capabilities(&self) -> MailCapabilities {
        MailCapabilities {
            multipart_alternative: false,
        }
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let message = mail.to_message()?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Delivery(format!("sendmail: {}", e)))?;
        Ok(())
    }
}

/// A message recorded by [`TestMailTransport`]
#[derive(Debug, Clone)]
pub struct CapturedMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    /// The formatted message as it would go over the wire
    pub raw: String,
}

impl fmt::Display for CapturedMail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Records messages in memory. Clones share the same delivery list.
#[derive(Clone)]
pub struct TestMailTransport {
    deliveries: Arc<Mutex<Vec<CapturedMail>>>,
    capabilities: MailCapabilities,
}

impl TestMailTransport {
    pub fn new() -> Self {
        Self::with_capabilities(MailCapabilities {
            multipart_alternative: true,
        })
    }

    /// A capture transport that only takes single-part messages
    pub fn single_part() -> Self {
        Self::with_capabilities(MailCapabilities {
            multipart_alternative: false,
        })
    }

    fn with_capabilities(capabilities: MailCapabilities) -> Self {
        Self {
            deliveries: Arc::new(Mutex::new(Vec::new())),
            capabilities,
        }
    }
}

impl Default for TestMailTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for TestMailTransport {
    fn name(&self) -> &'static str {
        "test"
    }

    fn capabilities(&self) -> MailCapabilities {
        self.capabilities
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let message = mail.to_message()?;
        let (text_body, html_body) = match &mail.body {
            MailBody::Alternative { text, html } => (Some(text.clone()), Some(html.clone())),
            MailBody::Html(html) => (None, Some(html.clone())),
        };

        self.deliveries.lock().push(CapturedMail {
            from: mail.from.to_string(),
            to: mail.to.iter().map(ToString::to_string).collect(),
            subject: mail.subject.clone(),
            text_body,
            html_body,
            raw: String::from_utf8_lossy(&message.formatted()).into_owned(),
        });

        Ok(())
    }

    fn deliveries(&self) -> Option<Vec<CapturedMail>> {
        Some(self.deliveries.lock().clone())
    }
}
