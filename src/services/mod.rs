//! Business logic layer. Handlers stay thin; everything that touches the
//! database or a payment provider lives here.

pub mod addresses;
pub mod cart;
pub mod orders;
pub mod stock;

pub use addresses::AddressService;
pub use cart::CartService;
pub use orders::{CaptureOutcome, OrderService};
