/*!
 * Payment provider bridge.
 *
 * Each provider translates a uniform two-call surface — `initiate` to get
 * a redirect for the shopper, `verify` to confirm funds after they return —
 * onto the provider's HTTP API. No retries and no circuit breaking: a
 * provider timeout surfaces directly as an error to the caller.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::AppConfig,
    entities::{OrderModel, PaymentMethod},
    errors::ServiceError,
};

pub mod paypal;
pub mod paystack;

pub use paypal::PayPalProvider;
pub use paystack::PaystackProvider;

/// Result of starting a payment with a provider.
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    /// Provider-side reference (PayPal order id, Paystack reference)
    pub provider_ref: String,
    /// Where to send the shopper to approve the payment
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

/// Provider's answer when asked to confirm a payment.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub outcome: PaymentOutcome,
    /// Captured amount in major units, when the provider reports one
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Creates the provider-side transaction and returns the shopper
    /// redirect. `email` is required by some providers (Paystack keys
    /// transactions on it).
    async fn initiate(
        &self,
        order: &OrderModel,
        email: &str,
    ) -> Result<InitiatedPayment, ServiceError>;

    /// Confirms (and for PayPal, captures) the payment identified by
    /// `provider_ref`. A declined payment is an `Ok` with a `Failed`
    /// outcome; `Err` means the provider could not be consulted at all.
    async fn verify(&self, provider_ref: &str) -> Result<VerifiedPayment, ServiceError>;
}

/// Lookup table from payment method to its provider adapter.
#[derive(Clone, Default)]
pub struct PaymentRegistry {
    providers: HashMap<PaymentMethod, Arc<dyn PaymentProvider>>,
}

impl PaymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from configuration, registering only providers
    /// whose credentials are present.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        let timeout = Duration::from_secs(config.provider_timeout_secs);

        if let (Some(client_id), Some(client_secret)) =
            (&config.paypal_client_id, &config.paypal_client_secret)
        {
            registry.register(Arc::new(PayPalProvider::new(
                client_id.clone(),
                client_secret.clone(),
                config.paypal_api_base.clone(),
                config.paypal_return_url.clone(),
                config.paypal_cancel_url.clone(),
                timeout,
            )));
        }

        if let Some(secret_key) = &config.paystack_secret_key {
            registry.register(Arc::new(PaystackProvider::new(
                secret_key.clone(),
                config.paystack_api_base.clone(),
                config.paystack_callback_url.clone(),
                timeout,
            )));
        }

        registry
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.method(), provider);
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentProvider>, ServiceError> {
        self.providers.get(&method).cloned().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "Payment method {} is not available",
                method
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl std::fmt::Debug for dyn PaymentProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "PaymentProvider({})", self.method())
        }
    }

    struct NullProvider;

    #[async_trait]
    impl PaymentProvider for NullProvider {
        fn method(&self) -> PaymentMethod {
            PaymentMethod::Paypal
        }

        async fn initiate(
            &self,
            _order: &OrderModel,
            _email: &str,
        ) -> Result<InitiatedPayment, ServiceError> {
            Err(ServiceError::ExternalServiceError("unreachable".into()))
        }

        async fn verify(&self, _provider_ref: &str) -> Result<VerifiedPayment, ServiceError> {
            Err(ServiceError::ExternalServiceError("unreachable".into()))
        }
    }

    #[test]
    fn registry_resolves_registered_method() {
        let mut registry = PaymentRegistry::new();
        registry.register(Arc::new(NullProvider));
        assert!(registry.get(PaymentMethod::Paypal).is_ok());
    }

    #[test]
    fn registry_rejects_unregistered_method() {
        let registry = PaymentRegistry::new();
        let err = registry.get(PaymentMethod::Paystack).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));
    }

    #[test]
    fn empty_config_registers_no_providers() {
        let config = AppConfig::new(
            "sqlite::memory:".to_string(),
            "a-test-secret-key-at-least-32-chars!".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        let registry = PaymentRegistry::from_config(&config);
        assert!(registry.get(PaymentMethod::Paypal).is_err());
        assert!(registry.get(PaymentMethod::Paystack).is_err());
    }
}
