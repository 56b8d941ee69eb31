pub mod order;
pub mod order_item;
pub mod product;
pub mod store_setting;

pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
pub use store_setting::Entity as StoreSetting;
