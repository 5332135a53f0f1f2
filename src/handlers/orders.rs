use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, PaginatedResponse,
    PaginationParams,
};
use crate::{
    auth::{AuthUser, Identity},
    entities::{OrderItemModel, OrderModel, OrderStatus, PaymentMethod},
    errors::{ApiError, ServiceError},
    services::orders::{CaptureOutcome, CreateOrderInput, ShippingAddress},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for order endpoints
pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create", post(create_order))
        .route("/capture", post(capture_order))
        .route("/", get(list_orders))
        .route("/all", get(list_all_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ShippingAddressRequest {
    #[validate(length(min = 1))]
    pub recipient: String,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub zipcode: String,
    #[validate(length(min = 1))]
    pub phone: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub payment_method: PaymentMethod,
    #[validate]
    pub shipping: ShippingAddressRequest,
    /// Required for online payment methods
    #[validate(email)]
    pub email: Option<String>,
    /// Client-side total; rejected with 409 if the server's recomputed
    /// total differs
    pub expected_total: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub currency: String,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub payment_status: String,
    pub order_status: String,
    /// Where to send the shopper for approval; absent for cash on delivery
    pub redirect_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CaptureRequest {
    pub order_id: Uuid,
    /// Provider reference from the return URL, when the client has one
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub status: &'static str,
    pub order: OrderModel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Create an order from the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/orders/create",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = CheckoutResponse),
        (status = 400, description = "Empty cart or invalid input"),
        (status = 409, description = "Cart total changed"),
        (status = 422, description = "Insufficient stock")
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let input = CreateOrderInput {
        payment_method: payload.payment_method,
        shipping: ShippingAddress {
            recipient: payload.shipping.recipient,
            address: payload.shipping.address,
            city: payload.shipping.city,
            zipcode: payload.shipping.zipcode,
            phone: payload.shipping.phone,
            notes: payload.shipping.notes,
        },
        email: payload.email,
        expected_total: payload.expected_total,
        notes: payload.notes,
    };

    let outcome = state
        .services
        .orders
        .create_order(&identity, input)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(CheckoutResponse {
        order_id: outcome.order.id,
        order_number: outcome.order.order_number.clone(),
        currency: outcome.order.currency.clone(),
        total_amount: outcome.order.total_amount,
        payment_method: outcome.order.payment_method.clone(),
        payment_status: outcome.order.payment_status.clone(),
        order_status: outcome.order.order_status.clone(),
        redirect_url: outcome.redirect_url,
    }))
}

/// Finalize payment for an order after the shopper returns from the provider
#[utoipa::path(
    post,
    path = "/api/v1/orders/capture",
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Capture succeeded or was already finalized"),
        (status = 402, description = "Provider reported the payment failed"),
        (status = 404, description = "Order not found")
    ),
    tag = "orders"
)]
pub async fn capture_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<CaptureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(payload.order_id)
        .await
        .map_err(map_service_error)?;
    state
        .services
        .orders
        .ensure_owned_by(&order, &identity)
        .map_err(map_service_error)?;

    let outcome = state
        .services
        .orders
        .finalize_capture(payload.order_id, payload.reference.as_deref())
        .await
        .map_err(map_service_error)?;

    Ok(capture_response(outcome))
}

pub(crate) fn capture_response(outcome: CaptureOutcome) -> axum::response::Response {
    match outcome {
        CaptureOutcome::Succeeded { order } => success_response(CaptureResponse {
            status: "succeeded",
            order,
            reason: None,
        }),
        CaptureOutcome::AlreadyFinalized { order } => success_response(CaptureResponse {
            status: "already_finalized",
            order,
            reason: None,
        }),
        CaptureOutcome::Failed { order, reason } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(CaptureResponse {
                status: "failed",
                order,
                reason: Some(reason),
            }),
        )
            .into_response(),
    }
}

/// List the caller's orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses((status = 200, description = "Orders for the caller")),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders_for(&identity, params.page_index(), params.limit())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders, &params, total,
    )))
}

/// List every order, newest first (admin only)
#[utoipa::path(
    get,
    path = "/api/v1/orders/all",
    params(PaginationParams),
    responses(
        (status = 200, description = "All orders"),
        (status = 403, description = "Caller is not an admin")
    ),
    tag = "orders"
)]
pub async fn list_all_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    if !user.is_admin() {
        return Err(map_service_error(ServiceError::Forbidden(
            "Admin role required".to_string(),
        )));
    }

    let (orders, total) = state
        .services
        .orders
        .list_all_orders(params.page_index(), params.limit())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders, &params, total,
    )))
}

/// Get a single order with its line items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with line items"),
        (status = 403, description = "Order belongs to another caller"),
        (status = 404, description = "Order not found")
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(id)
        .await
        .map_err(map_service_error)?;
    state
        .services
        .orders
        .ensure_owned_by(&order, &identity)
        .map_err(map_service_error)?;

    let items = state
        .services
        .orders
        .get_order_items(&order)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(OrderDetail { order, items }))
}

/// Advance an order's fulfillment status (admin only)
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Updated order"),
        (status = 400, description = "Order is in a terminal status"),
        (status = 403, description = "Caller is not an admin")
    ),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !user.is_admin() {
        return Err(map_service_error(ServiceError::Forbidden(
            "Admin role required".to_string(),
        )));
    }

    let order = state
        .services
        .orders
        .update_order_status(id, payload.status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
