use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = env!("CARGO_PKG_VERSION"),
        description = r#"
# Storefront Cart and Checkout API

Backend for an e-commerce storefront covering the cart-to-payment flow.

## Features

- **Cart**: stock-validated add/update/remove, guest carts keyed by session
- **Cart Merge**: guest cart folded into the customer cart at sign-in
- **Checkout**: server-priced order creation with PayPal, Paystack, and cash on delivery
- **Capture**: idempotent payment finalization safe under webhook/return-URL races
- **Addresses**: saved shipping addresses, capped per customer

## Authentication

Signed-in customers send a JWT:

```
Authorization: Bearer <token>
```

Guests send a stable session identifier instead:

```
x-session-id: <opaque-session-id>
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    paths(
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::update_cart_line,
        crate::handlers::cart::remove_cart_line,
        crate::handlers::cart::fetch_cart,
        crate::handlers::cart::merge_cart,
        crate::handlers::orders::create_order,
        crate::handlers::orders::capture_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::list_all_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::payments::verify_transaction,
        crate::handlers::addresses::list_addresses,
        crate::handlers::addresses::get_address,
        crate::handlers::addresses::create_address,
        crate::handlers::addresses::update_address,
        crate::handlers::addresses::delete_address,
    ),
    components(schemas(
        crate::entities::order::PaymentMethod,
        crate::entities::order::PaymentStatus,
        crate::entities::order::OrderStatus,
        crate::errors::ErrorResponse,
        crate::services::cart::CartView,
        crate::services::cart::CartLineView,
        crate::services::orders::ShippingAddress,
        crate::handlers::cart::AddToCartRequest,
        crate::handlers::cart::UpdateCartLineRequest,
        crate::handlers::cart::MergeCartRequest,
        crate::handlers::orders::ShippingAddressRequest,
        crate::handlers::orders::CreateOrderRequest,
        crate::handlers::orders::CheckoutResponse,
        crate::handlers::orders::CaptureRequest,
        crate::handlers::orders::UpdateOrderStatusRequest,
        crate::handlers::addresses::AddressRequest,
    )),
    tags(
        (name = "cart", description = "Shopping cart"),
        (name = "orders", description = "Checkout and order management"),
        (name = "payments", description = "Payment provider callbacks"),
        (name = "addresses", description = "Saved shipping addresses"),
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at /docs, serving the spec at /api-docs/openapi.json.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_includes_core_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/cart/add"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/orders/create"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/orders/capture"));
        assert!(paths
            .iter()
            .any(|p| p.as_str() == "/api/v1/paystack/verify/{reference}"));
    }
}
