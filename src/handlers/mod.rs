pub mod checkout;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod settings;
