//! Notification dispatch boundary.
//!
//! Fired triggers render their action templates against a [`TriggerContext`]
//! and hand the result to a [`Notifier`]. Delivery is at-least-once: a send
//! that times out after the remote accepted it may be repeated on the next
//! firing. The built-in destination is a webhook; other transports live
//! behind external notifier implementations.

pub mod context;
pub mod template;
pub mod webhook;


use anyhow::Result;
use async_trait::async_trait;
use querymon_common::types::UserSnapshot;

pub use context::TriggerContext;
pub use template::{PlaceholderTemplateEngine, TemplateEngine};
pub use webhook::WebhookNotifier;

/// A notification transport. `principal` is the monitor's stored owner; a
/// transport that enforces authorization applies it instead of any calling
/// identity.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        action_id: &str,
        destination_id: &str,
        subject: &str,
        body: &str,
        principal: Option<&UserSnapshot>,
    ) -> Result<()>;
}
