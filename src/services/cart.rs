use crate::{
    auth::Identity,
    config::AppConfig,
    entities::{cart, cart_item, Cart, CartItem, CartModel, Product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Shopping cart service.
///
/// Every mutation runs inside a transaction and re-checks stock against the
/// product row before touching the cart. Stock is never reserved here; the
/// checks are preconditions, and the checkout path re-validates everything
/// against live product data.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

/// Denormalized cart returned to clients: live product data joined onto the
/// stored lines at read time.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub cart_id: Option<Uuid>,
    pub currency: String,
    pub lines: Vec<CartLineView>,
    pub subtotal: Decimal,
    pub total_items: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub title: String,
    pub image_url: Option<String>,
    /// Current effective price; falls back to the add-time snapshot for
    /// unavailable lines
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub stock: i32,
    /// False when the product has been removed or deactivated since it was
    /// added; such lines contribute nothing to the subtotal
    pub available: bool,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Adds a product to the identity's cart, creating the cart on first
    /// use. Quantities for a product already in the cart accumulate, and
    /// stock is validated against the cumulative quantity.
    #[instrument(skip(self))]
    pub async fn add_line(
        &self,
        identity: &Identity,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = stock::load_active_product(&txn, product_id).await?;
        let cart = self.get_or_create_cart(&txn, identity).await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        let cumulative = existing
            .as_ref()
            .map_or(0, |line| line.quantity)
            .checked_add(quantity)
            .ok_or_else(|| {
                ServiceError::ValidationError("Cumulative quantity is too large".to_string())
            })?;
        stock::ensure_available(&product, cumulative)?;

        match existing {
            Some(line) => {
                let mut line: cart_item::ActiveModel = line.into();
                line.quantity = Set(cumulative);
                line.unit_price = Set(product.effective_price());
                line.updated_at = Set(Utc::now());
                line.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    unit_price: Set(product.effective_price()),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;
            }
        }

        touch_cart(&txn, cart.id).await?;
        let view = build_view(&txn, Some(&cart)).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id,
            })
            .await;

        info!(cart_id = %cart.id, %product_id, quantity, "Added cart line");
        Ok(view)
    }

    /// Sets the absolute quantity of an existing line, re-validating stock
    /// against the new quantity. The stored quantity is untouched on
    /// failure.
    #[instrument(skip(self))]
    pub async fn update_line_quantity(
        &self,
        identity: &Identity,
        product_id: Uuid,
        new_quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if new_quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = self
            .find_cart(&txn, identity)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let line = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        let product = stock::load_active_product(&txn, product_id).await?;
        stock::ensure_available(&product, new_quantity)?;

        let mut line: cart_item::ActiveModel = line.into();
        line.quantity = Set(new_quantity);
        line.unit_price = Set(product.effective_price());
        line.updated_at = Set(Utc::now());
        line.update(&txn).await?;

        touch_cart(&txn, cart.id).await?;
        let view = build_view(&txn, Some(&cart)).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id: cart.id,
                product_id,
            })
            .await;

        Ok(view)
    }

    /// Removes a line from the cart. No stock check.
    #[instrument(skip(self))]
    pub async fn remove_line(
        &self,
        identity: &Identity,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self
            .find_cart(&txn, identity)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let line = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        line.delete(&txn).await?;
        touch_cart(&txn, cart.id).await?;
        let view = build_view(&txn, Some(&cart)).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                product_id,
            })
            .await;

        Ok(view)
    }

    /// Returns the identity's cart with live product data joined in. An
    /// identity without a cart gets an empty view rather than an error.
    #[instrument(skip(self))]
    pub async fn fetch(&self, identity: &Identity) -> Result<CartView, ServiceError> {
        let cart = self.find_cart(&*self.db, identity).await?;
        match cart {
            Some(cart) => build_view(&*self.db, Some(&cart)).await,
            None => Ok(CartView {
                cart_id: None,
                currency: self.config.default_currency.clone(),
                lines: Vec::new(),
                subtotal: Decimal::ZERO,
                total_items: 0,
            }),
        }
    }

    /// Merges a guest session's cart into the signed-in customer's cart.
    ///
    /// Conflicting lines sum their quantities, capped at available stock
    /// rather than failing: the merge runs silently at sign-in and must
    /// never block it. The guest cart is deleted unconditionally, even when
    /// some lines could not be carried over.
    #[instrument(skip(self))]
    pub async fn merge_guest_into_customer(
        &self,
        session_id: &str,
        customer_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let guest_cart = Cart::find()
            .filter(cart::Column::SessionId.eq(session_id))
            .one(&txn)
            .await?;

        let Some(guest_cart) = guest_cart else {
            // Nothing to merge
            let customer_cart = self
                .find_cart(&txn, &Identity::Customer(customer_id))
                .await?;
            let view = build_view(&txn, customer_cart.as_ref()).await?;
            txn.commit().await?;
            return Ok(view);
        };

        let customer_cart = self
            .get_or_create_cart(&txn, &Identity::Customer(customer_id))
            .await?;
        let guest_lines = guest_cart.find_related(CartItem).all(&txn).await?;

        for guest_line in &guest_lines {
            let product = match stock::load_active_product(&txn, guest_line.product_id).await {
                Ok(product) => product,
                Err(ServiceError::NotFound(_)) => {
                    warn!(product_id = %guest_line.product_id, "Skipping merge of vanished product");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let existing = CartItem::find()
                .filter(cart_item::Column::CartId.eq(customer_cart.id))
                .filter(cart_item::Column::ProductId.eq(guest_line.product_id))
                .one(&txn)
                .await?;

            let summed = existing
                .as_ref()
                .map_or(0, |line| line.quantity)
                .saturating_add(guest_line.quantity);
            let capped = summed.min(product.stock.max(0));
            if capped < 1 {
                continue;
            }

            match existing {
                Some(line) => {
                    let mut line: cart_item::ActiveModel = line.into();
                    line.quantity = Set(capped);
                    line.unit_price = Set(product.effective_price());
                    line.updated_at = Set(Utc::now());
                    line.update(&txn).await?;
                }
                None => {
                    cart_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        cart_id: Set(customer_cart.id),
                        product_id: Set(guest_line.product_id),
                        quantity: Set(capped),
                        unit_price: Set(product.effective_price()),
                        created_at: Set(Utc::now()),
                        updated_at: Set(Utc::now()),
                    }
                    .insert(&txn)
                    .await?;
                }
            }
        }

        delete_cart(&txn, guest_cart.id).await?;
        touch_cart(&txn, customer_cart.id).await?;
        let view = build_view(&txn, Some(&customer_cart)).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartsMerged {
                guest_cart_id: guest_cart.id,
                customer_cart_id: customer_cart.id,
            })
            .await;

        info!(
            guest_cart_id = %guest_cart.id,
            customer_cart_id = %customer_cart.id,
            "Merged guest cart into customer cart"
        );
        Ok(view)
    }

    async fn find_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        identity: &Identity,
    ) -> Result<Option<CartModel>, ServiceError> {
        let query = match identity {
            Identity::Customer(customer_id) => {
                Cart::find().filter(cart::Column::CustomerId.eq(*customer_id))
            }
            Identity::Guest(session_id) => {
                Cart::find().filter(cart::Column::SessionId.eq(session_id.as_str()))
            }
        };
        Ok(query.one(conn).await?)
    }

    async fn get_or_create_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        identity: &Identity,
    ) -> Result<CartModel, ServiceError> {
        if let Some(cart) = self.find_cart(conn, identity).await? {
            return Ok(cart);
        }

        let cart_id = Uuid::new_v4();
        let cart = cart::ActiveModel {
            id: Set(cart_id),
            customer_id: Set(identity.customer_id()),
            session_id: Set(identity.session_id().map(str::to_string)),
            currency: Set(self.config.default_currency.clone()),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;
        Ok(cart)
    }
}

/// Deletes a cart and all of its lines.
pub async fn delete_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<(), ServiceError> {
    CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Cart::delete_many()
        .filter(cart::Column::Id.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Deletes the cart belonging to an order's owner, if one exists, returning
/// the id of the deleted cart. Used by capture finalization, which knows
/// only the order's stored identity.
pub async fn clear_owner_cart<C: ConnectionTrait>(
    conn: &C,
    customer_id: Option<Uuid>,
    session_id: Option<&str>,
) -> Result<Option<Uuid>, ServiceError> {
    let cart = match (customer_id, session_id) {
        (Some(customer_id), _) => {
            Cart::find()
                .filter(cart::Column::CustomerId.eq(customer_id))
                .one(conn)
                .await?
        }
        (None, Some(session_id)) => {
            Cart::find()
                .filter(cart::Column::SessionId.eq(session_id))
                .one(conn)
                .await?
        }
        (None, None) => None,
    };
    if let Some(cart) = cart {
        delete_cart(conn, cart.id).await?;
        return Ok(Some(cart.id));
    }
    Ok(None)
}

async fn touch_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<(), ServiceError> {
    cart::ActiveModel {
        id: Set(cart_id),
        updated_at: Set(Utc::now()),
        ..Default::default()
    }
    .update(conn)
    .await?;
    Ok(())
}

/// Joins live product data onto the stored lines. Lines whose product has
/// vanished render as unavailable placeholders and total at zero.
async fn build_view<C: ConnectionTrait>(
    conn: &C,
    cart: Option<&CartModel>,
) -> Result<CartView, ServiceError> {
    let Some(cart) = cart else {
        return Ok(CartView {
            cart_id: None,
            currency: "USD".to_string(),
            lines: Vec::new(),
            subtotal: Decimal::ZERO,
            total_items: 0,
        });
    };

    let stored_lines = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .all(conn)
        .await?;

    let mut lines = Vec::with_capacity(stored_lines.len());
    let mut subtotal = Decimal::ZERO;
    let mut total_items = 0;

    for stored in stored_lines {
        let product = Product::find_by_id(stored.product_id)
            .one(conn)
            .await?
            .filter(|p| p.is_active);

        let line = match product {
            Some(product) => {
                let unit_price = product.effective_price();
                let line_total = unit_price * Decimal::from(stored.quantity);
                subtotal += line_total;
                total_items += stored.quantity;
                CartLineView {
                    product_id: stored.product_id,
                    title: product.title,
                    image_url: product.image_url,
                    unit_price,
                    quantity: stored.quantity,
                    line_total,
                    stock: product.stock,
                    available: true,
                }
            }
            None => CartLineView {
                product_id: stored.product_id,
                title: "Product no longer available".to_string(),
                image_url: None,
                // Snapshot price is display-only here; the line contributes
                // nothing to the subtotal
                unit_price: stored.unit_price,
                quantity: stored.quantity,
                line_total: Decimal::ZERO,
                stock: 0,
                available: false,
            },
        };
        lines.push(line);
    }

    Ok(CartView {
        cart_id: Some(cart.id),
        currency: cart.currency.clone(),
        lines,
        subtotal,
        total_items,
    })
}
