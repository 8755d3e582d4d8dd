//! Outbound notification adapters.

pub mod webhook;

pub use webhook::{WebhookAlertNotifier, WebhookJobNotifier};
