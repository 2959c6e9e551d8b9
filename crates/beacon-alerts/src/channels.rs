//! Notification channels for violation delivery.
//!
//! A channel is split in two layers. The notifier ([`EmailNotifier`],
//! [`WebhookNotifier`]) validates its target, formats the violation and drives
//! retries. The transport ([`MailTransport`], [`WebhookTransport`]) performs a
//! single delivery attempt over SMTP or HTTP.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::NotifyError;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::types::{AlertViolation, ViolationPayload};

/// A notification channel.
#[async_trait]
pub trait Notify: Send + Sync {
    /// Short channel name used in logs and errors.
    fn channel(&self) -> &'static str;

    /// Delivers a notification for the violation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any attempt if the target is invalid,
    /// [`NotifyError::Delivery`] once every attempt has failed, or
    /// [`NotifyError::Cancelled`] if `cancel` fires first.
    async fn notify(
        &self,
        violation: &AlertViolation,
        cancel: &CancellationToken,
    ) -> Result<(), NotifyError>;
}

// ============================================================================
// Email
// ============================================================================

/// A fully addressed plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// Sender.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Sends one email.
#[async_trait]
pub trait MailTransport: Send + Sync + fmt::Debug {
    /// Makes a single delivery attempt.
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Implicit TLS (SMTPS).
    Tls,
    /// Plain connection upgraded with STARTTLS.
    #[default]
    StartTls,
    /// Unencrypted. Only for local relays.
    None,
}

/// SMTP relay settings.
///
/// The password is read from configuration but never serialized or printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    /// Relay host name.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Username for authentication.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for authentication.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Connection security.
    #[serde(default)]
    pub security: SmtpSecurity,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_smtp_timeout_secs() -> u64 {
    10
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("security", &self.security)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SmtpSettings {
    /// Creates settings for a relay with STARTTLS and no credentials.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            security: SmtpSecurity::default(),
            timeout_secs: default_smtp_timeout_secs(),
        }
    }

    /// Sets login credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the connection security.
    #[must_use]
    pub const fn with_security(mut self, security: SmtpSecurity) -> Self {
        self.security = security;
        self
    }
}

/// [`MailTransport`] over an SMTP relay.
pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl fmt::Debug for SmtpMailTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailTransport")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl SmtpMailTransport {
    /// Builds a transport for the relay. No connection is made until the first send.
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let unavailable = |e: lettre::transport::smtp::Error| NotifyError::transport(format!(
            "smtp relay {}: {e}",
            settings.host
        ));

        let mut builder = match settings.security {
            SmtpSecurity::Tls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host).map_err(unavailable)?
            }
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                    .map_err(unavailable)?
            }
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            }
        };
        builder = builder
            .port(settings.port)
            .timeout(Some(Duration::from_secs(settings.timeout_secs)));

        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            host: settings.host.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(Mailbox::new(None, message.from.clone()))
            .to(Mailbox::new(None, message.to.clone()))
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| NotifyError::transport(format!("build email: {e}")))?;

        self.transport
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::transport(format!("smtp {}: {e}", self.host)))
    }
}

/// Parses an email address, mapping failures to [`NotifyError::InvalidRecipient`].
pub fn parse_address(address: &str) -> Result<Address, NotifyError> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|e| NotifyError::InvalidRecipient {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Emails a violation to one recipient.
#[derive(Debug, Clone)]
pub struct EmailNotifier {
    recipient: String,
    from: Address,
    transport: Arc<dyn MailTransport>,
    policy: RetryPolicy,
}

impl EmailNotifier {
    /// Creates a notifier. The recipient is validated on each [`Notify::notify`].
    pub fn new(
        recipient: impl Into<String>,
        from: Address,
        transport: Arc<dyn MailTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            from,
            transport,
            policy,
        }
    }

    /// The configured recipient.
    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }
}

#[async_trait]
impl Notify for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn notify(
        &self,
        violation: &AlertViolation,
        cancel: &CancellationToken,
    ) -> Result<(), NotifyError> {
        let to = parse_address(&self.recipient)?;
        let message = EmailMessage {
            from: self.from.clone(),
            to,
            subject: violation.subject(),
            body: violation.body(),
        };

        retry_with_backoff(&self.policy, cancel, self.channel(), |_| {
            self.transport.send(&message)
        })
        .await?;

        info!(
            service = %violation.service,
            level = %violation.level,
            recipient = %message.to,
            "sent alert email"
        );
        Ok(())
    }
}

// ============================================================================
// Webhook
// ============================================================================

/// Posts one webhook request.
#[async_trait]
pub trait WebhookTransport: Send + Sync + fmt::Debug {
    /// Makes a single delivery attempt. Non-2xx responses are transport errors.
    async fn post(&self, url: &Url, payload: &ViolationPayload) -> Result<(), NotifyError>;
}

/// [`WebhookTransport`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpWebhookTransport {
    client: reqwest::Client,
}

impl HttpWebhookTransport {
    /// Creates a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::transport(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post(&self, url: &Url, payload: &ViolationPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::transport(format!("POST {url}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, status = status.as_u16(), "webhook accepted");
            Ok(())
        } else {
            Err(NotifyError::transport(format!(
                "POST {url}: unexpected status {status}"
            )))
        }
    }
}

/// Parses a webhook URL, accepting only absolute http(s) URLs with a host.
pub fn parse_webhook_url(raw: &str) -> Result<Url, NotifyError> {
    let invalid = |reason: String| NotifyError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Posts a violation to one webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    transport: Arc<dyn WebhookTransport>,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    /// Creates a notifier. The URL is validated on each [`Notify::notify`].
    pub fn new(
        url: impl Into<String>,
        transport: Arc<dyn WebhookTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            url: url.into(),
            transport,
            policy,
        }
    }

    /// The configured URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    async fn notify(
        &self,
        violation: &AlertViolation,
        cancel: &CancellationToken,
    ) -> Result<(), NotifyError> {
        let url = parse_webhook_url(&self.url)?;
        let payload = violation.payload();

        retry_with_backoff(&self.policy, cancel, self.channel(), |_| {
            self.transport.post(&url, &payload)
        })
        .await?;

        info!(
            service = %violation.service,
            level = %violation.level,
            url = %url,
            "sent alert webhook"
        );
        Ok(())
    }
}

// ============================================================================
// Closed set of channels
// ============================================================================

/// Every notifier kind an [`AlertConfig`](crate::types::AlertConfig) can name.
#[derive(Debug, Clone)]
pub enum ChannelNotifier {
    /// Email delivery.
    Email(EmailNotifier),
    /// Webhook delivery.
    Webhook(WebhookNotifier),
}

#[async_trait]
impl Notify for ChannelNotifier {
    fn channel(&self) -> &'static str {
        match self {
            Self::Email(n) => n.channel(),
            Self::Webhook(n) => n.channel(),
        }
    }

    async fn notify(
        &self,
        violation: &AlertViolation,
        cancel: &CancellationToken,
    ) -> Result<(), NotifyError> {
        match self {
            Self::Email(n) => n.notify(violation, cancel).await,
            Self::Webhook(n) => n.notify(violation, cancel).await,
        }
    }
}

/// Test doubles shared by this crate's tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Records every attempt and answers from a scripted queue, succeeding once it runs out.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        pub script: Mutex<VecDeque<Result<(), NotifyError>>>,
        pub emails: Mutex<Vec<EmailMessage>>,
        pub posts: Mutex<Vec<(Url, ViolationPayload)>>,
    }

    impl ScriptedTransport {
        pub fn failing(times: usize) -> Self {
            let transport = Self::default();
            for _ in 0..times {
                transport
                    .script
                    .lock()
                    .push_back(Err(NotifyError::transport("503 service unavailable")));
            }
            transport
        }

        pub fn attempts(&self) -> usize {
            self.emails.lock().len() + self.posts.lock().len()
        }

        fn next(&self) -> Result<(), NotifyError> {
            self.script.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
            self.emails.lock().push(message.clone());
            self.next()
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn post(&self, url: &Url, payload: &ViolationPayload) -> Result<(), NotifyError> {
            self.posts.lock().push((url.clone(), payload.clone()));
            self.next()
        }
    }
}
