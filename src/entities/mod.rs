//! Storefront entities
pub mod cart;
pub mod cart_item;
pub mod customer_address;
pub mod order;
pub mod order_item;
pub mod product;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use customer_address::{Entity as CustomerAddress, Model as CustomerAddressModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
