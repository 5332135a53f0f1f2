use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{auth::AuthUser, errors::ApiError, services::addresses::AddressInput, AppState};
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

/// Creates the router for saved-address endpoints. All routes require a
/// signed-in customer.
pub fn address_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_addresses))
        .route("/", post(create_address))
        .route("/:id", get(get_address))
        .route("/:id", put(update_address))
        .route("/:id", delete(delete_address))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddressRequest {
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

impl From<AddressRequest> for AddressInput {
    fn from(req: AddressRequest) -> Self {
        Self {
            recipient: req.recipient,
            address: req.address,
            city: req.city,
            zipcode: req.zipcode,
            phone: req.phone,
            notes: req.notes,
        }
    }
}

/// List the caller's saved addresses
#[utoipa::path(
    get,
    path = "/api/v1/addresses",
    responses((status = 200, description = "Saved addresses")),
    tag = "addresses"
)]
pub async fn list_addresses(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let addresses = state
        .services
        .addresses
        .list(user.customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(addresses))
}

/// Save a new address
#[utoipa::path(
    post,
    path = "/api/v1/addresses",
    request_body = AddressRequest,
    responses(
        (status = 201, description = "Address saved"),
        (status = 400, description = "Address book is full")
    ),
    tag = "addresses"
)]
pub async fn create_address(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<AddressRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let address = state
        .services
        .addresses
        .create(user.customer_id, payload.into())
        .await
        .map_err(map_service_error)?;

    Ok(created_response(address))
}

/// Get one saved address
#[utoipa::path(
    get,
    path = "/api/v1/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    responses(
        (status = 200, description = "Saved address"),
        (status = 404, description = "Address not found")
    ),
    tag = "addresses"
)]
pub async fn get_address(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .get(user.customer_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(address))
}

/// Update a saved address
#[utoipa::path(
    put,
    path = "/api/v1/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    request_body = AddressRequest,
    responses(
        (status = 200, description = "Updated address"),
        (status = 404, description = "Address not found")
    ),
    tag = "addresses"
)]
pub async fn update_address(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddressRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let address = state
        .services
        .addresses
        .update(user.customer_id, id, payload.into())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(address))
}

/// Delete a saved address
#[utoipa::path(
    delete,
    path = "/api/v1/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    responses(
        (status = 204, description = "Address deleted"),
        (status = 404, description = "Address not found")
    ),
    tag = "addresses"
)]
pub async fn delete_address(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .addresses
        .delete(user.customer_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}
