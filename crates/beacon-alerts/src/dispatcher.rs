//! Routes a violation to the channels its alert config names.

use std::sync::Arc;

use futures::future::join_all;
use lettre::Address;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::channels::{
    ChannelNotifier, EmailNotifier, MailTransport, Notify, WebhookNotifier, WebhookTransport,
};
use crate::error::NotifyError;
use crate::retry::RetryPolicy;
use crate::types::{AlertConfig, AlertViolation};

/// Outcome of delivering one violation across its channels.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Channels that accepted the notification.
    pub delivered: Vec<&'static str>,
    /// Channels that failed, with their errors.
    pub failed: Vec<(&'static str, NotifyError)>,
}

impl DispatchOutcome {
    /// True if no channel was attempted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }

    /// True if every attempted channel succeeded.
    #[must_use]
    pub fn all_delivered(&self) -> bool {
        !self.delivered.is_empty() && self.failed.is_empty()
    }

    /// True if any channel stopped because of cancellation.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.failed.iter().any(|(_, e)| e.is_cancelled())
    }

    /// Failures joined into one message, if any.
    #[must_use]
    pub fn error_summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        Some(
            self.failed
                .iter()
                .map(|(_, e)| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Builds notifiers for alert configs and runs them.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    mail: Option<(Arc<dyn MailTransport>, Address)>,
    webhook: Arc<dyn WebhookTransport>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    /// Creates a dispatcher with webhook delivery only.
    pub fn new(webhook: Arc<dyn WebhookTransport>, policy: RetryPolicy) -> Self {
        Self {
            mail: None,
            webhook,
            policy,
        }
    }

    /// Enables email delivery from the given sender.
    #[must_use]
    pub fn with_mail(mut self, transport: Arc<dyn MailTransport>, from: Address) -> Self {
        self.mail = Some((transport, from));
        self
    }

    /// The retry policy handed to every notifier.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Notifiers for every channel the config names.
    ///
    /// A config that names email while no mail transport is set up yields an
    /// error entry instead of a notifier.
    pub fn notifiers_for(
        &self,
        config: &AlertConfig,
    ) -> Vec<Result<ChannelNotifier, NotifyError>> {
        let mut notifiers = Vec::new();

        if let Some(recipient) = &config.alert_email {
            notifiers.push(match &self.mail {
                Some((transport, from)) => Ok(ChannelNotifier::Email(EmailNotifier::new(
                    recipient.clone(),
                    from.clone(),
                    Arc::clone(transport),
                    self.policy.clone(),
                ))),
                None => Err(NotifyError::ChannelUnavailable { channel: "email" }),
            });
        }

        if let Some(url) = &config.alert_webhook_url {
            notifiers.push(Ok(ChannelNotifier::Webhook(WebhookNotifier::new(
                url.clone(),
                Arc::clone(&self.webhook),
                self.policy.clone(),
            ))));
        }

        notifiers
    }

    /// Delivers the violation on every configured channel concurrently.
    pub async fn dispatch(
        &self,
        config: &AlertConfig,
        violation: &AlertViolation,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut notifiers = Vec::new();

        for notifier in self.notifiers_for(config) {
            match notifier {
                Ok(n) => notifiers.push(n),
                Err(e) => {
                    warn!(service = %violation.service, error = %e, "skipping channel");
                    outcome.failed.push(("email", e));
                }
            }
        }

        let results = join_all(notifiers.iter().map(|n| async move {
            (n.channel(), n.notify(violation, cancel).await)
        }))
        .await;

        for (channel, result) in results {
            match result {
                Ok(()) => outcome.delivered.push(channel),
                Err(e) => {
                    if e.is_config_error() {
                        warn!(
                            service = %violation.service,
                            channel,
                            error = %e,
                            "notification target misconfigured"
                        );
                    } else if !e.is_cancelled() {
                        error!(
                            service = %violation.service,
                            channel,
                            error = %e,
                            "notification delivery failed"
                        );
                    }
                    outcome.failed.push((channel, e));
                }
            }
        }

        outcome
    }
}
