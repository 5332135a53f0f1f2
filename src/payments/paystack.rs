//! Paystack adapter.
//!
//! Amounts cross the wire in minor units (kobo/cents). Webhook payloads are
//! authenticated with an HMAC-SHA512 of the raw body under the secret key,
//! carried in the `x-paystack-signature` header.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha512;
use std::time::Duration;
use tracing::instrument;

use crate::{
    entities::{OrderModel, PaymentMethod},
    errors::ServiceError,
};

use super::{InitiatedPayment, PaymentOutcome, PaymentProvider, VerifiedPayment};

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

type HmacSha512 = Hmac<Sha512>;

pub struct PaystackProvider {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
    callback_url: Option<String>,
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    /// Minor units
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
}

impl PaystackProvider {
    pub fn new(
        secret_key: String,
        api_base: String,
        callback_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            secret_key,
            api_base,
            callback_url,
        }
    }
}

/// Major units to Paystack minor units, rounding half away from zero.
fn to_minor_units(amount: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

fn from_minor_units(amount: i64) -> Decimal {
    Decimal::from(amount) / Decimal::from(100)
}

/// Checks an `x-paystack-signature` header value against the raw request
/// body. The comparison is constant-time via `Mac::verify_slice`.
pub fn verify_webhook_signature(secret_key: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Paystack
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn initiate(
        &self,
        order: &OrderModel,
        email: &str,
    ) -> Result<InitiatedPayment, ServiceError> {
        let mut body = json!({
            "email": email,
            "amount": to_minor_units(order.total_amount),
            "currency": order.currency,
            "metadata": { "order_id": order.id.to_string() },
        });
        if let Some(callback_url) = &self.callback_url {
            body["callback_url"] = json!(callback_url);
        }

        let response = self
            .http
            .post(format!("{}/transaction/initialize", self.api_base))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Paystack initialize: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "Paystack initialize returned {}",
                response.status()
            )));
        }

        let envelope: ApiEnvelope<InitializeData> = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Paystack initialize body: {}", e))
        })?;

        let data = match (envelope.status, envelope.data) {
            (true, Some(data)) => data,
            _ => {
                return Err(ServiceError::ExternalServiceError(format!(
                    "Paystack initialize failed: {}",
                    envelope.message
                )))
            }
        };

        Ok(InitiatedPayment {
            provider_ref: data.reference,
            redirect_url: data.authorization_url,
        })
    }

    #[instrument(skip(self))]
    async fn verify(&self, provider_ref: &str) -> Result<VerifiedPayment, ServiceError> {
        let response = self
            .http
            .get(format!(
                "{}/transaction/verify/{}",
                self.api_base, provider_ref
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("Paystack verify: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "Paystack verify returned {}",
                response.status()
            )));
        }

        let envelope: ApiEnvelope<VerifyData> = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Paystack verify body: {}", e))
        })?;

        let data = match (envelope.status, envelope.data) {
            (true, Some(data)) => data,
            _ => {
                return Err(ServiceError::ExternalServiceError(format!(
                    "Paystack verify failed: {}",
                    envelope.message
                )))
            }
        };

        let outcome = if data.status == "success" {
            PaymentOutcome::Succeeded
        } else {
            PaymentOutcome::Failed
        };

        Ok(VerifiedPayment {
            outcome,
            amount: Some(from_minor_units(data.amount)),
            currency: data.currency,
            paid_at: data.paid_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(12.34)), 1234);
        assert_eq!(to_minor_units(dec!(0.005)), 1);
        assert_eq!(from_minor_units(1234), dec!(12.34));
    }

    #[test]
    fn valid_signature_is_accepted() {
        let secret = "sk_test_secret";
        let body = br#"{"event":"charge.success"}"#;
        let signature = sign(secret, body);
        assert!(verify_webhook_signature(secret, body, &signature));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = sign("sk_other", body);
        assert!(!verify_webhook_signature("sk_test_secret", body, &signature));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let secret = "sk_test_secret";
        let signature = sign(secret, br#"{"event":"charge.success"}"#);
        assert!(!verify_webhook_signature(
            secret,
            br#"{"event":"charge.failed"}"#,
            &signature
        ));
    }

    #[test]
    fn non_hex_signature_is_rejected() {
        assert!(!verify_webhook_signature("sk", b"body", "not-hex!"));
    }
}
