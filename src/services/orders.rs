use crate::{
    auth::Identity,
    entities::{
        order, order_item, CartItem, Order, OrderItemModel, OrderModel, OrderStatus,
        PaymentMethod, PaymentStatus,
    },
    entities::{cart, cart_item, Cart},
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{PaymentOutcome, PaymentRegistry},
    services::{cart::clear_owner_cart, stock},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Checkout orchestrator: turns a cart into an order, bridges to payment
/// providers, and finalizes captures.
///
/// Money amounts are always recomputed from live product rows at order
/// creation; cart line snapshots are display data only. Capture
/// finalization is guarded by a conditional UPDATE so its side effects
/// (stock decrement, cart clear) run at most once per order no matter how
/// many return-URL and webhook callbacks race in.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    providers: Arc<PaymentRegistry>,
}

/// Address snapshot embedded in the order at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub recipient: String,
    pub address: String,
    pub city: String,
    pub zipcode: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub payment_method: PaymentMethod,
    pub shipping: ShippingAddress,
    /// Shopper email, required by online payment providers
    pub email: Option<String>,
    /// Client-side total for cross-checking; a mismatch against the
    /// recomputed total rejects the checkout
    pub expected_total: Option<Decimal>,
    pub notes: Option<String>,
}

/// What the client needs after order creation: the order itself and, for
/// online payment methods, where to send the shopper.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: OrderModel,
    pub redirect_url: Option<String>,
}

/// Result of a capture attempt. `AlreadyFinalized` means another path
/// (webhook vs. return URL) won the race; no side effects were applied
/// twice.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Succeeded { order: OrderModel },
    AlreadyFinalized { order: OrderModel },
    Failed { order: OrderModel, reason: String },
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        providers: Arc<PaymentRegistry>,
    ) -> Self {
        Self {
            db,
            event_sender,
            providers,
        }
    }

    /// Creates an order from the identity's cart.
    ///
    /// Totals are recomputed from live product data; stock is validated per
    /// line. Cash-on-delivery orders reserve stock and clear the cart
    /// immediately. Online payment methods leave stock and cart untouched
    /// until capture, and return the provider redirect.
    #[instrument(skip(self, input), fields(payment_method = %input.payment_method))]
    pub async fn create_order(
        &self,
        identity: &Identity,
        input: CreateOrderInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let is_cod = input.payment_method == PaymentMethod::Cod;
        let email = input.email.clone();
        if !is_cod && email.is_none() {
            return Err(ServiceError::ValidationError(
                "Email is required for online payment".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = match identity {
            Identity::Customer(customer_id) => {
                Cart::find()
                    .filter(cart::Column::CustomerId.eq(*customer_id))
                    .one(&txn)
                    .await?
            }
            Identity::Guest(session_id) => {
                Cart::find()
                    .filter(cart::Column::SessionId.eq(session_id.as_str()))
                    .one(&txn)
                    .await?
            }
        }
        .ok_or_else(|| ServiceError::InvalidOperation("Cart is empty".to_string()))?;

        let lines = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }

        // Authoritative pricing: re-read every product, never trust the
        // cart snapshot for money
        let mut total = Decimal::ZERO;
        let mut priced_lines = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = stock::load_active_product(&txn, line.product_id).await?;
            stock::ensure_available(&product, line.quantity)?;
            let unit_price = product.effective_price();
            let line_total = unit_price * Decimal::from(line.quantity);
            total += line_total;
            priced_lines.push((product, line.quantity, unit_price, line_total));
        }

        if let Some(expected) = input.expected_total {
            if expected != total {
                return Err(ServiceError::Conflict(format!(
                    "Cart total changed: expected {}, now {}",
                    expected, total
                )));
            }
        }

        let shipping_json = serde_json::to_string(&input.shipping)
            .map_err(|e| ServiceError::InternalError(format!("Address snapshot: {}", e)))?;

        let order_id = Uuid::new_v4();
        let order_status = if is_cod {
            OrderStatus::Processing
        } else {
            OrderStatus::Pending
        };
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            customer_id: Set(identity.customer_id()),
            session_id: Set(identity.session_id().map(str::to_string)),
            currency: Set(cart.currency.clone()),
            total_amount: Set(total),
            payment_method: Set(input.payment_method.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            order_status: Set(order_status.to_string()),
            provider_ref: Set(None),
            shipping_address: Set(shipping_json),
            notes: Set(input.notes),
            paid_at: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        for (product, quantity, unit_price, line_total) in &priced_lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                title: Set(product.title.clone()),
                unit_price: Set(*unit_price),
                quantity: Set(*quantity),
                line_total: Set(*line_total),
                created_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await?;
        }

        if is_cod {
            // No capture step will run, so take the stock now; the
            // conditional decrement catches races the pre-check missed
            for (product, quantity, _, _) in &priced_lines {
                if !stock::reserve(&txn, product.id, *quantity).await? {
                    return Err(ServiceError::InsufficientStock(format!(
                        "\"{}\" sold out during checkout",
                        product.title
                    )));
                }
            }
            super::cart::delete_cart(&txn, cart.id).await?;
        }

        txn.commit().await?;
        if is_cod {
            self.event_sender
                .send_or_log(Event::CartCleared(cart.id))
                .await;
        }
        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;
        info!(%order_id, order_number = %order.order_number, "Order created");

        if is_cod {
            return Ok(CheckoutOutcome {
                order,
                redirect_url: None,
            });
        }

        let provider = self.providers.get(input.payment_method)?;
        let email = email.unwrap_or_default();
        let initiated = provider.initiate(&order, &email).await?;

        let mut active: order::ActiveModel = order.into();
        active.provider_ref = Set(Some(initiated.provider_ref.clone()));
        active.updated_at = Set(Utc::now());
        let order = active.update(&*self.db).await?;

        Ok(CheckoutOutcome {
            order,
            redirect_url: Some(initiated.redirect_url),
        })
    }

    /// Confirms payment with the provider and applies capture side effects
    /// exactly once.
    ///
    /// The paid transition is claimed with a conditional UPDATE; the loser
    /// of a return-URL/webhook race observes zero affected rows and gets
    /// `AlreadyFinalized` with no side effects. On provider-reported
    /// failure or an amount mismatch, the order is marked failed and left
    /// at its current fulfillment status.
    #[instrument(skip(self))]
    pub async fn finalize_capture(
        &self,
        order_id: Uuid,
        reference_override: Option<&str>,
    ) -> Result<CaptureOutcome, ServiceError> {
        let order = self.get_order(order_id).await?;

        if order.payment_status() == Some(PaymentStatus::Paid) {
            return Ok(CaptureOutcome::AlreadyFinalized { order });
        }

        let method = order.payment_method().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Order {} has unknown payment method {}",
                order.id, order.payment_method
            ))
        })?;
        if method == PaymentMethod::Cod {
            return Err(ServiceError::InvalidOperation(
                "Cash-on-delivery orders have no capture step".to_string(),
            ));
        }

        let provider_ref = reference_override
            .map(str::to_string)
            .or_else(|| order.provider_ref.clone())
            .ok_or_else(|| {
                ServiceError::InvalidOperation(format!(
                    "Order {} has no payment reference to verify",
                    order.id
                ))
            })?;

        let provider = self.providers.get(method)?;
        let verified = provider.verify(&provider_ref).await?;

        if verified.outcome == PaymentOutcome::Failed {
            return self
                .fail_capture(order, "payment was not successful".to_string())
                .await;
        }
        if let Some(amount) = verified.amount {
            if amount != order.total_amount {
                warn!(
                    %order_id,
                    expected = %order.total_amount,
                    captured = %amount,
                    "Captured amount does not match order total"
                );
                let reason = format!(
                    "captured amount {} does not match order total {}",
                    amount, order.total_amount
                );
                return self.fail_capture(order, reason).await;
            }
        }

        let paid_at = verified.paid_at.unwrap_or_else(Utc::now);
        let txn = self.db.begin().await?;

        // Single atomic claim of the paid transition
        let claim = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Paid.to_string()),
            )
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Processing.to_string()),
            )
            .col_expr(order::Column::ProviderRef, Expr::value(provider_ref.clone()))
            .col_expr(order::Column::PaidAt, Expr::value(paid_at))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid.to_string()))
            .exec(&txn)
            .await?;

        if claim.rows_affected == 0 {
            txn.commit().await?;
            let order = self.get_order(order_id).await?;
            return Ok(CaptureOutcome::AlreadyFinalized { order });
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        for item in &items {
            stock::decrement_floored(&txn, item.product_id, item.quantity).await?;
        }
        let cleared_cart =
            clear_owner_cart(&txn, order.customer_id, order.session_id.as_deref()).await?;

        txn.commit().await?;

        if let Some(cart_id) = cleared_cart {
            self.event_sender
                .send_or_log(Event::CartCleared(cart_id))
                .await;
        }
        self.event_sender
            .send_or_log(Event::PaymentCaptured(order_id))
            .await;
        info!(%order_id, "Payment captured and finalized");

        let order = self.get_order(order_id).await?;
        Ok(CaptureOutcome::Succeeded { order })
    }

    async fn fail_capture(
        &self,
        order: OrderModel,
        reason: String,
    ) -> Result<CaptureOutcome, ServiceError> {
        // Guarded so a late failure report cannot clobber a paid order
        let update = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid.to_string()))
            .exec(&*self.db)
            .await?;

        if update.rows_affected == 0 {
            // The order was paid before this failure report arrived
            let order = self.get_order(order.id).await?;
            return Ok(CaptureOutcome::AlreadyFinalized { order });
        }

        self.event_sender
            .send_or_log(Event::PaymentFailed(order.id))
            .await;
        warn!(order_id = %order.id, %reason, "Payment capture failed");

        let order = self.get_order(order.id).await?;
        Ok(CaptureOutcome::Failed { order, reason })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn get_order_items(
        &self,
        order: &OrderModel,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?)
    }

    pub async fn find_by_provider_ref(&self, reference: &str) -> Result<OrderModel, ServiceError> {
        Order::find()
            .filter(order::Column::ProviderRef.eq(reference))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order for payment reference {}", reference))
            })
    }

    /// Checks the identity may read this order. Admin callers bypass this
    /// at the handler layer.
    pub fn ensure_owned_by(
        &self,
        order: &OrderModel,
        identity: &Identity,
    ) -> Result<(), ServiceError> {
        let owned = match identity {
            Identity::Customer(customer_id) => order.customer_id == Some(*customer_id),
            Identity::Guest(session_id) => order.session_id.as_deref() == Some(session_id),
        };
        if owned {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "Order belongs to another customer".to_string(),
            ))
        }
    }

    pub async fn list_orders_for(
        &self,
        identity: &Identity,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let query = match identity {
            Identity::Customer(customer_id) => {
                Order::find().filter(order::Column::CustomerId.eq(*customer_id))
            }
            Identity::Guest(session_id) => {
                Order::find().filter(order::Column::SessionId.eq(session_id.as_str()))
            }
        };
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page).await?;
        Ok((orders, total))
    }

    pub async fn list_all_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page).await?;
        Ok((orders, total))
    }

    /// Admin-driven fulfillment transition. Delivered and rejected orders
    /// are terminal.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.get_order(order_id).await?;
        let current = order.order_status().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Order {} has unknown status {}",
                order.id, order.order_status
            ))
        })?;
        if current.is_terminal() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order is {} and cannot change status",
                current
            )));
        }

        let old_status = order.order_status.clone();
        let mut active: order::ActiveModel = order.into();
        active.order_status = Set(new_status.to_string());
        active.updated_at = Set(Utc::now());
        let order = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: new_status.to_string(),
            })
            .await;
        Ok(order)
    }
}

fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("SF-{}", &suffix[..10].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_numbers_are_prefixed_and_distinct() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert!(a.starts_with("SF-"));
        assert_eq!(a.len(), 13);
        assert_ne!(a, b);
    }

    async fn test_service() -> (OrderService, Arc<DatabaseConnection>) {
        let mut cfg = crate::config::AppConfig::new(
            "sqlite::memory:".to_string(),
            "a-test-secret-key-at-least-32-chars!".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        let pool = crate::db::establish_connection_from_app_config(&cfg)
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let db = Arc::new(pool);

        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let service = OrderService::new(
            db.clone(),
            Arc::new(EventSender::new(tx)),
            Arc::new(PaymentRegistry::new()),
        );
        (service, db)
    }

    #[tokio::test]
    async fn stale_failure_report_against_a_paid_order_is_already_finalized() {
        let (service, db) = test_service().await;

        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            customer_id: Set(Some(Uuid::new_v4())),
            session_id: Set(None),
            currency: Set("USD".to_string()),
            total_amount: Set(dec!(50.00)),
            payment_method: Set(PaymentMethod::Paypal.to_string()),
            payment_status: Set(PaymentStatus::Paid.to_string()),
            order_status: Set(OrderStatus::Processing.to_string()),
            provider_ref: Set(Some("ref-1".to_string())),
            shipping_address: Set("{}".to_string()),
            notes: Set(None),
            paid_at: Set(Some(Utc::now())),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*db)
        .await
        .unwrap();

        // Snapshot taken before the paid transition landed
        let mut stale = service.get_order(order_id).await.unwrap();
        stale.payment_status = PaymentStatus::Pending.to_string();

        let outcome = service
            .fail_capture(stale, "payment was not successful".to_string())
            .await
            .unwrap();

        match outcome {
            CaptureOutcome::AlreadyFinalized { order } => {
                assert_eq!(order.payment_status(), Some(PaymentStatus::Paid));
            }
            other => panic!("expected AlreadyFinalized, got {:?}", other),
        }
    }
}
