use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Domain Models
// ============================================================================

/// Notification category. Each channel owns its own ordered endpoint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    /// Stable name used for cache keys, store lookups and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "Email",
            Channel::Push => "PushNotification",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an order event is addressed to. Decides which channels are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientClass {
    Buyer,
    Seller,
}

impl RecipientClass {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "buyer" => Some(RecipientClass::Buyer),
            "seller" => Some(RecipientClass::Seller),
            _ => None,
        }
    }

    pub fn channels(&self) -> &'static [Channel] {
        match self {
            RecipientClass::Buyer => &[Channel::Email],
            RecipientClass::Seller => &[Channel::Email, Channel::Push],
        }
    }
}

/// One place a notification for a channel can be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEndpoint {
    pub url: String,
    pub priority: i32,
    pub secret: String,
}

/// Ordered (ascending priority) endpoints for one channel.
///
/// Constructed only through [`PreferenceSet::new`], which rejects an empty
/// list, so a successfully resolved set always has at least one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceSet {
    endpoints: Vec<DeliveryEndpoint>,
}

impl PreferenceSet {
    /// Sorts by priority (stable, so equal priorities keep store order).
    pub fn new(mut endpoints: Vec<DeliveryEndpoint>) -> Option<Self> {
        if endpoints.is_empty() {
            return None;
        }
        endpoints.sort_by_key(|endpoint| endpoint.priority);
        Some(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[DeliveryEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Rough in-memory footprint, used as the cache cost of an entry.
    pub fn approximate_size(&self) -> u32 {
        let bytes: usize = self
            .endpoints
            .iter()
            .map(|e| e.url.len() + e.secret.len() + std::mem::size_of::<DeliveryEndpoint>())
            .sum();
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }
}

/// Validated inbound notification, before an endpoint secret is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub title: String,
    pub message: String,
}

/// Wire payload of one delivery attempt. The secret belongs to the endpoint
/// being attempted and is substituted per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub to: String,
    pub title: String,
    pub message: String,
    pub secret: String,
}

impl DeliveryRequest {
    pub fn for_endpoint(notification: &Notification, endpoint: &DeliveryEndpoint) -> Self {
        Self {
            to: notification.recipient.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            secret: endpoint.secret.clone(),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
