// File: src/platforms/heygen/mod.rs

pub mod client;
pub mod webhook;

pub use client::HeygenClient;
pub use webhook::{WebhookOutcome, WebhookReconciler, verify_webhook_signature};
