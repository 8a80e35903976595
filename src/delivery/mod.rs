// ============================================================================
// Delivery Module
// ============================================================================
//
// Sends one notification for one channel:
// - client/     - single HTTP POST attempt, 200 is the only success
// - registry/   - one circuit breaker per remote host
// - dispatcher/ - priority-ordered fallback across a channel's endpoints
//
// ============================================================================

mod client;
mod dispatcher;
mod registry;

pub use client::{DeliveryError, HttpDeliveryClient};
pub use dispatcher::{AttemptFailure, DeliveryDispatcher, DispatchError};
pub use registry::BreakerRegistry;
