//! Stock availability checks and atomic decrements.
//!
//! The product row's stock count is the single authority. Pre-checks here
//! are advisory (two concurrent adds can both pass); the conditional
//! UPDATE in [`reserve`] is what actually guarantees stock never goes
//! negative.

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use uuid::Uuid;

use crate::{
    entities::{product, Product, ProductModel},
    errors::ServiceError,
};

/// Loads a product that is still purchasable.
pub async fn load_active_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<ProductModel, ServiceError> {
    Product::find_by_id(product_id)
        .one(conn)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

/// Read-only availability check against the current stock count.
pub fn ensure_available(product: &ProductModel, requested: i32) -> Result<(), ServiceError> {
    if requested > product.stock {
        return Err(ServiceError::InsufficientStock(format!(
            "only {} unit(s) of \"{}\" available",
            product.stock.max(0),
            product.title
        )));
    }
    Ok(())
}

/// Decrements stock only if enough remains, in a single conditional UPDATE.
/// Returns false when the guard did not match (insufficient stock or
/// unknown product).
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = Product::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Decrement after funds have already moved: takes the full quantity if
/// available, otherwise drains whatever remains down to zero. Never fails
/// on insufficient stock.
pub async fn decrement_floored<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    if reserve(conn, product_id, quantity).await? {
        return Ok(());
    }
    Product::update_many()
        .col_expr(product::Column::Stock, Expr::value(0))
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gt(0))
        .exec(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(stock: i32) -> ProductModel {
        ProductModel {
            id: Uuid::new_v4(),
            title: "Test Product".to_string(),
            description: None,
            price: dec!(10.00),
            sale_price: None,
            stock,
            image_url: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn available_within_stock() {
        assert!(ensure_available(&product(5), 5).is_ok());
        assert!(ensure_available(&product(5), 1).is_ok());
    }

    #[test]
    fn insufficient_reports_available_count() {
        let err = ensure_available(&product(2), 3).unwrap_err();
        match err {
            ServiceError::InsufficientStock(msg) => {
                assert!(msg.contains("only 2 unit(s)"), "message was: {}", msg);
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }
    }

    #[test]
    fn negative_stock_reports_zero_available() {
        let err = ensure_available(&product(-1), 1).unwrap_err();
        match err {
            ServiceError::InsufficientStock(msg) => {
                assert!(msg.contains("only 0 unit(s)"), "message was: {}", msg);
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }
    }
}
