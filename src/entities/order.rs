use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Order record. Created once at checkout; only payment_status,
/// order_status, provider_ref and paid_at mutate afterwards, and never by
/// anything other than capture finalization or admin status updates.
/// Orders are never deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    #[sea_orm(nullable)]
    pub customer_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub session_id: Option<String>,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    pub payment_method: String,
    pub payment_status: String,
    pub order_status: String,
    /// Provider-side reference (PayPal order id / Paystack reference)
    #[sea_orm(nullable)]
    pub provider_ref: Option<String>,
    /// Address snapshot serialized as JSON at order-creation time
    #[sea_orm(column_type = "Text")]
    pub shipping_address: String,
    #[sea_orm(nullable)]
    pub notes: Option<String>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Payment method selected at checkout.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString, utoipa::ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Paypal,
    Paystack,
}

/// Payment lifecycle. `Paid` is terminal for the capture path; the atomic
/// finalize claim transitions into it at most once per order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
    strum::Display, strum::EnumString, utoipa::ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

/// Fulfillment lifecycle, driven by admins independently of payment state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
    strum::Display, strum::EnumString, utoipa::ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Rejected,
}

impl OrderStatus {
    /// Delivered and rejected orders accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Rejected)
    }
}

impl Model {
    pub fn payment_method(&self) -> Option<PaymentMethod> {
        PaymentMethod::from_str(&self.payment_method).ok()
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_str(&self.payment_status).ok()
    }

    pub fn order_status(&self) -> Option<OrderStatus> {
        OrderStatus::from_str(&self.order_status).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(OrderStatus::OutForDelivery.to_string(), "out_for_delivery");
        assert_eq!(
            OrderStatus::from_str("out_for_delivery").unwrap(),
            OrderStatus::OutForDelivery
        );
        assert_eq!(PaymentStatus::Paid.to_string(), "paid");
        assert_eq!(PaymentMethod::from_str("cod").unwrap(), PaymentMethod::Cod);
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::OutForDelivery.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }
}
