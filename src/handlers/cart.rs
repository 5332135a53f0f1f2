use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{auth::Identity, errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/add", post(add_to_cart))
        .route("/update-cart", put(update_cart_line))
        .route("/delete/:product_id", delete(remove_cart_line))
        .route("/fetch", get(fetch_cart))
        .route("/merge", post(merge_cart))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateCartLineRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MergeCartRequest {
    /// Guest session whose cart is folded into the caller's cart
    #[validate(length(min = 1))]
    pub session_id: String,
}

/// Add a product to the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/add",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Updated cart", body = crate::services::cart::CartView),
        (status = 404, description = "Product not found"),
        (status = 422, description = "Insufficient stock")
    ),
    tag = "cart"
)]
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<AddToCartRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .add_line(&identity, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Set the absolute quantity of a cart line
#[utoipa::path(
    put,
    path = "/api/v1/cart/update-cart",
    request_body = UpdateCartLineRequest,
    responses(
        (status = 200, description = "Updated cart", body = crate::services::cart::CartView),
        (status = 404, description = "Line not in cart"),
        (status = 422, description = "Insufficient stock")
    ),
    tag = "cart"
)]
pub async fn update_cart_line(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<UpdateCartLineRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .update_line_quantity(&identity, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove a product from the cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/delete/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product to remove")),
    responses(
        (status = 200, description = "Updated cart", body = crate::services::cart::CartView),
        (status = 404, description = "Line not in cart")
    ),
    tag = "cart"
)]
pub async fn remove_cart_line(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(product_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_line(&identity, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Fetch the caller's cart with live product data
#[utoipa::path(
    get,
    path = "/api/v1/cart/fetch",
    responses(
        (status = 200, description = "Current cart", body = crate::services::cart::CartView)
    ),
    tag = "cart"
)]
pub async fn fetch_cart(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .fetch(&identity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Merge a guest session's cart into the signed-in caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/merge",
    request_body = MergeCartRequest,
    responses(
        (status = 200, description = "Merged cart", body = crate::services::cart::CartView),
        (status = 401, description = "Caller is not signed in")
    ),
    tag = "cart"
)]
pub async fn merge_cart(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<MergeCartRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let customer_id = identity.require_customer().map_err(map_service_error)?;

    let cart = state
        .services
        .cart
        .merge_guest_into_customer(&payload.session_id, customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}
