pub mod cart_items;
pub mod carts;
pub mod order_items;
pub mod order_status_history;
pub mod orders;
pub mod payment_webhook_logs;
pub mod payments;
pub mod products;

pub use cart_items::Entity as CartItems;
pub use carts::Entity as Carts;
pub use order_items::Entity as OrderItems;
pub use order_status_history::Entity as OrderStatusHistory;
pub use orders::Entity as Orders;
pub use payment_webhook_logs::Entity as PaymentWebhookLogs;
pub use payments::Entity as Payments;
pub use products::Entity as Products;
