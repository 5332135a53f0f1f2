mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_api::{auth::Identity, errors::ServiceError};
use uuid::Uuid;

fn guest(id: &str) -> Identity {
    Identity::Guest(id.to_string())
}

#[tokio::test]
async fn sequential_adds_accumulate_and_validate_cumulative_quantity() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mug", dec!(9.50), 5).await;
    let cart = &app.state.services.cart;
    let identity = guest("sess-cumulative");

    let view = cart.add_line(&identity, product.id, 3).await.unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.lines[0].quantity, 3);

    // 3 already in the cart, so 3 more would need 6 of 5
    let err = cart.add_line(&identity, product.id, 3).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // The failed add must not have changed the stored line
    let view = cart.fetch(&identity).await.unwrap();
    assert_eq!(view.lines[0].quantity, 3);

    let view = cart.add_line(&identity, product.id, 2).await.unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.lines[0].quantity, 5);
    assert_eq!(view.subtotal, dec!(47.50));
}

#[tokio::test]
async fn add_line_rejects_unknown_product_and_bad_quantity() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let identity = guest("sess-bad-input");

    let err = cart.add_line(&identity, Uuid::new_v4(), 1).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let product = app.seed_product("Pen", dec!(1.20), 10).await;
    let err = cart.add_line(&identity, product.id, 0).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn cumulative_quantity_cannot_overflow() {
    let app = TestApp::new().await;
    let product = app.seed_product("Sticker", dec!(0.50), 5).await;
    let cart = &app.state.services.cart;
    let identity = guest("sess-overflow");

    cart.add_line(&identity, product.id, 1).await.unwrap();

    // The sum must not wrap negative and slip past the stock check
    let err = cart
        .add_line(&identity, product.id, i32::MAX)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let view = cart.fetch(&identity).await.unwrap();
    assert_eq!(view.lines[0].quantity, 1);
}

#[tokio::test]
async fn sale_price_wins_over_list_price() {
    let app = TestApp::new().await;
    let product = app.seed_product("Lamp", dec!(30.00), 5).await;
    {
        use sea_orm::{ActiveModelTrait, ActiveValue::Set, IntoActiveModel};
        let mut active = product.clone().into_active_model();
        active.sale_price = Set(Some(dec!(19.99)));
        active.update(&*app.state.db).await.unwrap();
    }

    let cart = &app.state.services.cart;
    let view = cart
        .add_line(&guest("sess-sale"), product.id, 2)
        .await
        .unwrap();
    assert_eq!(view.lines[0].unit_price, dec!(19.99));
    assert_eq!(view.subtotal, dec!(39.98));
}

#[tokio::test]
async fn update_over_stock_fails_and_leaves_quantity_unchanged() {
    let app = TestApp::new().await;
    let product = app.seed_product("Chair", dec!(45.00), 4).await;
    let cart = &app.state.services.cart;
    let identity = guest("sess-update");

    cart.add_line(&identity, product.id, 2).await.unwrap();

    let err = cart
        .update_line_quantity(&identity, product.id, 9)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let view = cart.fetch(&identity).await.unwrap();
    assert_eq!(view.lines[0].quantity, 2);

    let view = cart
        .update_line_quantity(&identity, product.id, 4)
        .await
        .unwrap();
    assert_eq!(view.lines[0].quantity, 4);
}

#[tokio::test]
async fn update_missing_line_is_not_found() {
    let app = TestApp::new().await;
    let product = app.seed_product("Desk", dec!(120.00), 3).await;
    let other = app.seed_product("Shelf", dec!(60.00), 3).await;
    let cart = &app.state.services.cart;
    let identity = guest("sess-missing-line");

    cart.add_line(&identity, product.id, 1).await.unwrap();

    let err = cart
        .update_line_quantity(&identity, other.id, 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn remove_line_empties_cart() {
    let app = TestApp::new().await;
    let product = app.seed_product("Plant", dec!(14.00), 6).await;
    let cart = &app.state.services.cart;
    let identity = guest("sess-remove");

    cart.add_line(&identity, product.id, 2).await.unwrap();
    let view = cart.remove_line(&identity, product.id).await.unwrap();
    assert!(view.lines.is_empty());
    assert_eq!(view.total_items, 0);

    let err = cart.remove_line(&identity, product.id).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn fetch_without_cart_returns_empty_view() {
    let app = TestApp::new().await;
    let view = app
        .state
        .services
        .cart
        .fetch(&guest("sess-nobody"))
        .await
        .unwrap();
    assert!(view.cart_id.is_none());
    assert!(view.lines.is_empty());
    assert_eq!(view.total_items, 0);
}

#[tokio::test]
async fn merge_sums_conflicting_lines_and_deletes_guest_cart() {
    let app = TestApp::new().await;
    let product_a = app.seed_product("Alpha", dec!(5.00), 10).await;
    let product_b = app.seed_product("Beta", dec!(7.00), 10).await;
    let cart = &app.state.services.cart;
    let customer = Identity::Customer(app.customer_id);
    let session = "sess-merge";

    // Guest has [(A, 2)]; customer has [(A, 1), (B, 1)]
    cart.add_line(&guest(session), product_a.id, 2).await.unwrap();
    cart.add_line(&customer, product_a.id, 1).await.unwrap();
    cart.add_line(&customer, product_b.id, 1).await.unwrap();

    let merged = cart
        .merge_guest_into_customer(session, app.customer_id)
        .await
        .unwrap();

    let mut quantities: Vec<(Uuid, i32)> = merged
        .lines
        .iter()
        .map(|line| (line.product_id, line.quantity))
        .collect();
    quantities.sort();
    let mut expected = vec![(product_a.id, 3), (product_b.id, 1)];
    expected.sort();
    assert_eq!(quantities, expected);

    // The guest cart is gone
    let guest_view = cart.fetch(&guest(session)).await.unwrap();
    assert!(guest_view.cart_id.is_none());
}

#[tokio::test]
async fn merge_caps_summed_quantity_at_available_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("Scarce", dec!(25.00), 3).await;
    let cart = &app.state.services.cart;
    let session = "sess-merge-cap";

    cart.add_line(&guest(session), product.id, 2).await.unwrap();
    cart.add_line(&Identity::Customer(app.customer_id), product.id, 2)
        .await
        .unwrap();

    // 2 + 2 exceeds the 3 in stock; the merge caps rather than failing
    let merged = cart
        .merge_guest_into_customer(session, app.customer_id)
        .await
        .unwrap();
    assert_eq!(merged.lines.len(), 1);
    assert_eq!(merged.lines[0].quantity, 3);
}

#[tokio::test]
async fn merge_without_guest_cart_is_a_no_op() {
    let app = TestApp::new().await;
    let product = app.seed_product("Solo", dec!(8.00), 5).await;
    let cart = &app.state.services.cart;

    cart.add_line(&Identity::Customer(app.customer_id), product.id, 1)
        .await
        .unwrap();

    let merged = cart
        .merge_guest_into_customer("sess-never-existed", app.customer_id)
        .await
        .unwrap();
    assert_eq!(merged.lines.len(), 1);
    assert_eq!(merged.lines[0].quantity, 1);
}

#[tokio::test]
async fn deactivated_product_renders_as_unavailable_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("Retired", dec!(10.00), 5).await;
    let cart = &app.state.services.cart;
    let identity = guest("sess-vanished");

    cart.add_line(&identity, product.id, 2).await.unwrap();

    {
        use sea_orm::{ActiveModelTrait, ActiveValue::Set, IntoActiveModel};
        let mut active = product.into_active_model();
        active.is_active = Set(false);
        active.update(&*app.state.db).await.unwrap();
    }

    let view = cart.fetch(&identity).await.unwrap();
    assert_eq!(view.lines.len(), 1);
    assert!(!view.lines[0].available);
    // Snapshot price is still shown, but the line contributes nothing
    assert_eq!(view.lines[0].unit_price, dec!(10.00));
    assert_eq!(view.lines[0].line_total, dec!(0));
    assert_eq!(view.subtotal, dec!(0));
}
