//! Webhook relay: acknowledges `POST /webhook` immediately, then after a fixed
//! delay reports a `pass`/`fail` status to the caller's `updateCallback` URL.

pub mod config;
pub mod http_server;
pub mod notifier;
pub mod types;

pub use config::Config;
pub use notifier::{Dispatch, Notifier};
pub use types::{BuildStatus, UpdatePayload, WebhookRequest};
