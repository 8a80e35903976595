use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::delivery::{AttemptFailure, DeliveryDispatcher, DispatchError};
use crate::models::{Channel, Notification, RecipientClass};
use crate::preferences::{PreferenceResolver, ResolveError, StoreError};

// ============================================================================
// Notification Service - routes a notification to its recipient's channels
// ============================================================================
//
// Buyer:  Email only.
// Seller: Email and Push as two concurrent units. Both units always run to
//         completion; the first error to finish is the one returned.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{channel} delivery failed")]
    DeliveryFailed {
        channel: Channel,
        attempts: Vec<AttemptFailure>,
    },

    #[error("notification cancelled")]
    Cancelled,

    #[error("notification task failed: {0}")]
    TaskFailed(String),

    #[error("unsupported recipient '{0}'")]
    UnsupportedRecipient(String),
}

impl From<ResolveError> for NotifyError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Store(err) => NotifyError::Store(err),
            ResolveError::Cancelled => NotifyError::Cancelled,
        }
    }
}

impl NotifyError {
    fn from_dispatch(channel: Channel, err: DispatchError) -> Self {
        match err {
            DispatchError::DeliveryFailed { attempts } => NotifyError::DeliveryFailed { channel, attempts },
            DispatchError::Cancelled => NotifyError::Cancelled,
        }
    }
}

#[derive(Clone)]
pub struct NotificationService {
    resolver: Arc<PreferenceResolver>,
    dispatcher: Arc<DeliveryDispatcher>,
}

impl NotificationService {
    pub fn new(resolver: Arc<PreferenceResolver>, dispatcher: Arc<DeliveryDispatcher>) -> Self {
        Self { resolver, dispatcher }
    }

    pub async fn notify(
        &self,
        cancel: &CancellationToken,
        class: RecipientClass,
        notification: Notification,
    ) -> Result<(), NotifyError> {
        match class {
            RecipientClass::Buyer => self.notify_buyer(cancel, &notification).await,
            RecipientClass::Seller => self.notify_seller(cancel, notification).await,
        }
    }

    pub async fn notify_buyer(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        self.deliver(cancel, Channel::Email, notification).await
    }

    pub async fn notify_seller(
        &self,
        cancel: &CancellationToken,
        notification: Notification,
    ) -> Result<(), NotifyError> {
        let notification = Arc::new(notification);
        let mut units = JoinSet::new();

        for &channel in RecipientClass::Seller.channels() {
            let service = self.clone();
            let cancel = cancel.clone();
            let notification = notification.clone();
            units.spawn(async move { service.deliver(&cancel, channel, &notification).await });
        }

        let mut first_error = None;
        while let Some(joined) = units.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(NotifyError::TaskFailed(e.to_string())));
            if let Err(err) = outcome {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn deliver(
        &self,
        cancel: &CancellationToken,
        channel: Channel,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        let preferences = self.resolver.resolve(cancel, channel).await.map_err(|err| {
            tracing::error!(channel = %channel, error = %err, "Failed to resolve delivery preferences");
            NotifyError::from(err)
        })?;

        let report = self
            .dispatcher
            .send(cancel, preferences.endpoints(), notification)
            .await
            .map_err(|err| {
                let err = NotifyError::from_dispatch(channel, err);
                match &err {
                    NotifyError::DeliveryFailed { attempts, .. } => tracing::error!(
                        channel = %channel,
                        attempts = %describe_attempts(attempts),
                        "Failed to deliver notification"
                    ),
                    other => tracing::debug!(channel = %channel, error = %other, "Delivery stopped"),
                }
                err
            })?;

        tracing::debug!(
            channel = %channel,
            delivered_to = %report.delivered_to,
            failed_attempts = %describe_attempts(&report.failed_attempts),
            "Notification delivered"
        );
        Ok(())
    }
}

/// One-line summary of failed attempts for log fields
fn describe_attempts(attempts: &[AttemptFailure]) -> String {
    if attempts.is_empty() {
        return "none".to_string();
    }
    attempts
        .iter()
        .map(|attempt| format!("{} (priority {}): {}", attempt.url, attempt.priority, attempt.error))
        .collect::<Vec<_>>()
        .join("; ")
}
