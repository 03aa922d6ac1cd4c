pub mod checkout;
pub mod orders;
pub mod stock;
pub mod system;
pub mod webhooks;
