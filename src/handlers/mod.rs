//! HTTP layer: routers and request/response DTOs. Handlers validate input,
//! resolve the caller's identity, and delegate to the service layer.

pub mod addresses;
pub mod cart;
pub mod common;
pub mod orders;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    payments::PaymentRegistry,
    services::{AddressService, CartService, OrderService},
};
use std::sync::Arc;

/// Service container shared by all handlers through [`crate::AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub cart: CartService,
    pub orders: OrderService,
    pub addresses: AddressService,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        providers: Arc<PaymentRegistry>,
    ) -> Self {
        Self {
            cart: CartService::new(db.clone(), event_sender.clone(), config.clone()),
            orders: OrderService::new(db.clone(), event_sender, providers),
            addresses: AddressService::new(db, config),
        }
    }
}
