//! Payment-gateway webhook handling for the checkout core.
//!
//! - [`signature`]: SHA-512 callback signatures
//! - [`map_status`]: external status vocabulary to order transitions
//! - [`PaymentGateway`]: verification, deduplication and dispatch

pub mod error;
pub mod gateway;
pub mod mapping;
pub mod signature;

pub use error::WebhookError;
pub use gateway::{PaymentGateway, PaymentNotification, WebhookReceipt, signed_notification};
pub use mapping::{GatewayCommand, map_status};
