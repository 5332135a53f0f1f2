use crate::errors::{ApiError, ServiceError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use validator::Validate;

const MAX_PER_PAGE: u64 = 100;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Standard no content response
pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

/// One-based pagination query parameters.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, IntoParams)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    /// Zero-based page index for the database paginator.
    pub fn page_index(&self) -> u64 {
        self.page.saturating_sub(1)
    }

    /// Page size clamped to a sane range.
    pub fn limit(&self) -> u64 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }
}

/// List payload with pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, params: &PaginationParams, total: u64) -> Self {
        let per_page = params.limit();
        let total_pages = total.div_ceil(per_page);
        Self {
            data,
            page: params.page,
            per_page,
            total,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_index_is_zero_based() {
        let params = PaginationParams {
            page: 1,
            per_page: 20,
        };
        assert_eq!(params.page_index(), 0);
        assert_eq!(
            PaginationParams {
                page: 0,
                per_page: 20
            }
            .page_index(),
            0
        );
    }

    #[test]
    fn per_page_is_clamped() {
        assert_eq!(
            PaginationParams {
                page: 1,
                per_page: 10_000
            }
            .limit(),
            MAX_PER_PAGE
        );
        assert_eq!(
            PaginationParams {
                page: 1,
                per_page: 0
            }
            .limit(),
            1
        );
    }

    #[test]
    fn total_pages_rounds_up() {
        let params = PaginationParams {
            page: 1,
            per_page: 20,
        };
        let response = PaginatedResponse::new(vec![1, 2, 3], &params, 41);
        assert_eq!(response.total_pages, 3);
        let empty = PaginatedResponse::<i32>::new(vec![], &params, 0);
        assert_eq!(empty.total_pages, 0);
    }
}
