use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::errors::ApiError;
use crate::models::{Notification, RecipientClass};
use crate::service::{NotificationService, NotifyError};

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub to: String,
    pub title: String,
    pub message: String,
}

impl NotifyRequest {
    fn into_notification(self) -> Result<Notification, ApiError> {
        for (field, value) in [("to", &self.to), ("title", &self.title), ("message", &self.message)] {
            if value.trim().is_empty() {
                return Err(ApiError::request(format!("field '{}' is required", field)));
            }
        }

        Ok(Notification {
            recipient: self.to,
            title: self.title,
            message: self.message,
        })
    }
}

/// Body deserialization failures become E101 instead of actix's plain 400
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| ApiError::request(err.to_string()).into())
}

/// POST /api/v1.0/recipient/{recipient}/notify
pub async fn notify_handler(
    path: web::Path<String>,
    body: web::Json<NotifyRequest>,
    service: web::Data<NotificationService>,
) -> Result<HttpResponse, ApiError> {
    let recipient = path.into_inner();
    let notification = body.into_inner().into_notification()?;

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("notify", request_id = %request_id, recipient = %recipient);

    async move {
        let class = RecipientClass::parse(&recipient)
            .ok_or_else(|| NotifyError::UnsupportedRecipient(recipient.clone()));

        // Dropping the handler future (client went away) cancels the work
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        let outcome = match class {
            Ok(class) => service.notify(&cancel, class, notification).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                tracing::info!("Notification sent");
                Ok(HttpResponse::Ok().json(json!({"message": "notification sent"})))
            }
            Err(err) => {
                tracing::warn!(error = %err, "Notification failed");
                Err(ApiError::internal(err.to_string()))
            }
        }
    }
    .instrument(span)
    .await
}
