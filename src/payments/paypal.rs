//! PayPal Checkout (Orders v2) adapter.
//!
//! `initiate` creates a provider order with intent CAPTURE and returns the
//! approve link; `verify` captures the order and reports the outcome. The
//! OAuth client-credentials token is fetched per call rather than cached:
//! checkout traffic is low-frequency and a stale-token code path is worse
//! than an extra round trip.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::{
    entities::{OrderModel, PaymentMethod},
    errors::ServiceError,
};

use super::{InitiatedPayment, PaymentOutcome, PaymentProvider, VerifiedPayment};

pub struct PayPalProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    return_url: Option<String>,
    cancel_url: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct CreatedOrder {
    id: String,
    #[serde(default)]
    links: Vec<OrderLink>,
}

#[derive(Deserialize)]
struct OrderLink {
    rel: String,
    href: String,
}

#[derive(Deserialize)]
struct CaptureResponse {
    status: String,
    #[serde(default)]
    purchase_units: Vec<CapturedUnit>,
}

#[derive(Deserialize)]
struct CapturedUnit {
    #[serde(default)]
    payments: Option<CapturedPayments>,
}

#[derive(Deserialize)]
struct CapturedPayments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Deserialize)]
struct Capture {
    amount: CaptureAmount,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CaptureAmount {
    currency_code: String,
    value: String,
}

impl PayPalProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        api_base: String,
        return_url: Option<String>,
        cancel_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            client_id,
            client_secret,
            api_base,
            return_url,
            cancel_url,
        }
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("PayPal auth: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "PayPal auth returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("PayPal auth body: {}", e)))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Paypal
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn initiate(
        &self,
        order: &OrderModel,
        _email: &str,
    ) -> Result<InitiatedPayment, ServiceError> {
        let token = self.access_token().await?;

        let mut body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": order.id.to_string(),
                "amount": {
                    "currency_code": order.currency,
                    "value": format!("{:.2}", order.total_amount),
                },
            }],
        });
        if self.return_url.is_some() || self.cancel_url.is_some() {
            body["application_context"] = json!({
                "return_url": self.return_url,
                "cancel_url": self.cancel_url,
            });
        }

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("PayPal create order: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "PayPal create order returned {}",
                response.status()
            )));
        }

        let created: CreatedOrder = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("PayPal create order body: {}", e))
        })?;

        let approve_url = created
            .links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.clone())
            .ok_or_else(|| {
                ServiceError::ExternalServiceError(
                    "PayPal order has no approve link".to_string(),
                )
            })?;

        Ok(InitiatedPayment {
            provider_ref: created.id,
            redirect_url: approve_url,
        })
    }

    #[instrument(skip(self))]
    async fn verify(&self, provider_ref: &str) -> Result<VerifiedPayment, ServiceError> {
        let token = self.access_token().await?;

        let response = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.api_base, provider_ref
            ))
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("PayPal capture: {}", e)))?;

        // 422 means the order cannot be captured (declined, not approved,
        // or already captured elsewhere) — a verdict, not an outage
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(VerifiedPayment {
                outcome: PaymentOutcome::Failed,
                amount: None,
                currency: None,
                paid_at: None,
            });
        }
        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "PayPal capture returned {}",
                response.status()
            )));
        }

        let captured: CaptureResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("PayPal capture body: {}", e))
        })?;

        if captured.status != "COMPLETED" {
            warn!(status = %captured.status, "PayPal capture did not complete");
            return Ok(VerifiedPayment {
                outcome: PaymentOutcome::Failed,
                amount: None,
                currency: None,
                paid_at: None,
            });
        }

        let capture = captured
            .purchase_units
            .first()
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.first());

        let amount = capture.and_then(|c| Decimal::from_str(&c.amount.value).ok());
        let currency = capture.map(|c| c.amount.currency_code.clone());
        let paid_at = capture.and_then(|c| c.create_time);

        Ok(VerifiedPayment {
            outcome: PaymentOutcome::Succeeded,
            amount,
            currency,
            paid_at,
        })
    }
}
