pub mod checkout;
pub mod orders;
pub mod payments;
pub mod settings;
pub mod stock;
