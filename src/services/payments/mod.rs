pub mod completion;
pub mod paypal;
pub mod provider;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::{PaymentsConfig, RetryConfig};
use crate::errors::ServiceError;

pub use provider::{
    CapturePaymentRequest, CapturePaymentResponse, CreatePaymentRequest, CreatePaymentResponse,
    PaymentError, PaymentErrorCode, PaymentProvider, PaymentSessionStatus, RefundRequest,
    RefundResponse, WebhookEvent, WebhookEventKind, WebhookSignature,
};

impl From<PaymentError> for ServiceError {
    fn from(err: PaymentError) -> Self {
        match err.code {
            PaymentErrorCode::ValidationError => ServiceError::ValidationError(err.message),
            PaymentErrorCode::ConfigurationError => ServiceError::ConfigError(err.message),
            _ => ServiceError::PaymentFailed(format!("{}: {}", err.code, err.message)),
        }
    }
}

/// Payment orchestration service.
///
/// Holds the registry of initialized providers and normalizes every
/// operation into the provider-agnostic request/response shapes. Constructed
/// once at startup and injected through application state.
pub struct PaymentService {
    providers: HashMap<String, Arc<dyn PaymentProvider>>,
    default_provider: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for PaymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentService")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("default_provider", &self.default_provider)
            .field("retry", &self.retry)
            .finish()
    }
}

impl PaymentService {
    /// Builds the provider registry from configuration. The registry is a
    /// static map from provider id to constructor; a missing or
    /// misconfigured default provider is a hard startup failure.
    pub fn from_config(cfg: &PaymentsConfig) -> Result<Self, PaymentError> {
        let mut providers: HashMap<String, Arc<dyn PaymentProvider>> = HashMap::new();

        if let Some(paypal_cfg) = &cfg.paypal {
            let provider = paypal::PayPalProvider::from_config(paypal_cfg)?;
            providers.insert(paypal::PROVIDER_ID.to_string(), Arc::new(provider));
            info!("payment provider initialized: {}", paypal::PROVIDER_ID);
        }

        Self::with_providers(providers, &cfg.default_provider, cfg.retry.clone())
    }

    /// Assembles a service over pre-built providers. Used by `from_config`
    /// and by tests injecting fakes.
    pub fn with_providers(
        providers: HashMap<String, Arc<dyn PaymentProvider>>,
        default_provider: &str,
        retry: RetryConfig,
    ) -> Result<Self, PaymentError> {
        if !providers.contains_key(default_provider) {
            return Err(PaymentError::configuration(format!(
                "default payment provider {:?} is not configured",
                default_provider
            )));
        }
        Ok(Self {
            providers,
            default_provider: default_provider.to_string(),
            retry,
        })
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn provider(&self, id: &str) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        self.providers.get(id).cloned().ok_or_else(|| {
            PaymentError::configuration(format!("unknown payment provider: {}", id))
        })
    }

    /// Provider selection: explicit id wins; otherwise the first provider
    /// (in id order, for determinism) supporting the currency; otherwise the
    /// configured default.
    fn select_provider(
        &self,
        explicit: Option<&str>,
        currency: &str,
    ) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        if let Some(id) = explicit {
            return self.provider(id);
        }

        for id in self.provider_ids() {
            let provider = &self.providers[&id];
            if provider
                .supported_currencies()
                .iter()
                .any(|c| c.eq_ignore_ascii_case(currency))
            {
                return Ok(provider.clone());
            }
        }

        self.provider(&self.default_provider)
    }

    fn validate_create(request: &CreatePaymentRequest) -> Result<(), PaymentError> {
        if request.amount <= 0 {
            return Err(PaymentError::validation("amount must be positive"));
        }
        if request.currency.trim().len() != 3 {
            return Err(PaymentError::validation(
                "currency must be a 3-letter ISO code",
            ));
        }
        if request.customer_name.trim().is_empty() {
            return Err(PaymentError::validation("customer name is required"));
        }
        if request.customer_email.trim().is_empty() || !request.customer_email.contains('@') {
            return Err(PaymentError::validation(
                "a valid customer email is required",
            ));
        }
        Ok(())
    }

    /// Creates a provider payment session for an order.
    ///
    /// All input validation, provider selection, and the currency-support
    /// check happen before any network call.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatePaymentResponse, PaymentError> {
        Self::validate_create(request)?;

        let provider = self.select_provider(request.provider_id.as_deref(), &request.currency)?;
        if !provider
            .supported_currencies()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&request.currency))
        {
            return Err(PaymentError::validation(format!(
                "provider {} does not support currency {}",
                provider.id(),
                request.currency
            )));
        }

        self.with_retry("create_payment", || provider.create_payment(request))
            .await
    }

    /// Captures an approved payment. Not retried here: a failed capture is
    /// handed to the bounded recovery poll instead, which tolerates the
    /// webhook completing the payment first.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn capture_payment(
        &self,
        request: &CapturePaymentRequest,
    ) -> Result<CapturePaymentResponse, PaymentError> {
        if request.provider_payment_id.trim().is_empty() {
            return Err(PaymentError::validation("provider payment id is required"));
        }
        let provider = self.resolve(request.provider_id.as_deref())?;
        provider.capture_payment(request).await
    }

    #[instrument(skip(self))]
    pub async fn get_payment_status(
        &self,
        provider_id: Option<&str>,
        provider_payment_id: &str,
    ) -> Result<PaymentSessionStatus, PaymentError> {
        if provider_payment_id.trim().is_empty() {
            return Err(PaymentError::validation("provider payment id is required"));
        }
        let provider = self.resolve(provider_id)?;
        provider.get_payment_status(provider_payment_id).await
    }

    #[instrument(skip(self, request))]
    pub async fn refund_payment(
        &self,
        request: &RefundRequest,
    ) -> Result<RefundResponse, PaymentError> {
        if request.amount <= 0 {
            return Err(PaymentError::validation("refund amount must be positive"));
        }
        if request.transaction_id.trim().is_empty() {
            return Err(PaymentError::validation("transaction id is required"));
        }
        let provider = self.resolve(request.provider_id.as_deref())?;
        self.with_retry("refund_payment", || provider.refund_payment(request))
            .await
    }

    /// Verifies and parses a webhook for the addressed provider.
    #[instrument(skip(self, payload, signature))]
    pub async fn process_webhook(
        &self,
        provider_id: &str,
        payload: &[u8],
        signature: &WebhookSignature,
    ) -> Result<WebhookEvent, PaymentError> {
        let provider = self.provider(provider_id)?;
        provider.process_webhook(payload, signature).await
    }

    fn resolve(&self, explicit: Option<&str>) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        match explicit {
            Some(id) => self.provider(id),
            None => self.provider(&self.default_provider),
        }
    }

    /// Bounded exponential backoff around retryable provider errors.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, PaymentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PaymentError>>,
    {
        let mut delay = Duration::from_millis(self.retry.initial_delay_ms);
        let max_delay = Duration::from_millis(self.retry.max_delay_ms);
        let mut attempt = 1u32;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt < self.retry.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        code = %err.code,
                        "retryable payment provider error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        delay.mul_f64(self.retry.backoff_multiplier.max(1.0)),
                        max_delay,
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Scripted in-process provider for orchestration tests.
    struct FakeProvider {
        id: String,
        currencies: Vec<String>,
        calls: AtomicUsize,
        fail_times: AtomicUsize,
    }

    impl FakeProvider {
        fn new(id: &str, currencies: &[&str]) -> Self {
            Self {
                id: id.to_string(),
                currencies: currencies.iter().map(|c| c.to_string()).collect(),
                calls: AtomicUsize::new(0),
                fail_times: AtomicUsize::new(0),
            }
        }

        fn failing_first(self, times: usize) -> Self {
            self.fail_times.store(times, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        fn id(&self) -> &str {
            &self.id
        }
        fn display_name(&self) -> &str {
            "Fake"
        }
        fn supported_currencies(&self) -> &[String] {
            &self.currencies
        }

        async fn create_payment(
            &self,
            request: &CreatePaymentRequest,
        ) -> Result<CreatePaymentResponse, PaymentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_times
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PaymentError::new(
                    PaymentErrorCode::NetworkError,
                    "scripted failure",
                ));
            }
            Ok(CreatePaymentResponse {
                provider_id: self.id.clone(),
                provider_payment_id: format!("{}-{}", self.id, request.order_id),
                status: PaymentSessionStatus::Created,
                approval_url: Some("https://example.test/approve".into()),
            })
        }

        async fn capture_payment(
            &self,
            request: &CapturePaymentRequest,
        ) -> Result<CapturePaymentResponse, PaymentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CapturePaymentResponse {
                transaction_id: format!("txn-{}", request.provider_payment_id),
                amount_captured: 1000,
                payer_email: None,
                status: PaymentSessionStatus::Completed,
            })
        }

        async fn get_payment_status(
            &self,
            _provider_payment_id: &str,
        ) -> Result<PaymentSessionStatus, PaymentError> {
            Ok(PaymentSessionStatus::Approved)
        }

        async fn refund_payment(
            &self,
            _request: &RefundRequest,
        ) -> Result<RefundResponse, PaymentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RefundResponse {
                refund_id: "refund-1".into(),
                status: PaymentSessionStatus::Refunded,
            })
        }

        async fn process_webhook(
            &self,
            _payload: &[u8],
            _signature: &WebhookSignature,
        ) -> Result<WebhookEvent, PaymentError> {
            Ok(WebhookEvent {
                kind: WebhookEventKind::Unhandled,
                order_id: None,
                provider_payment_id: None,
                transaction_id: None,
                amount: None,
                payer_email: None,
                event_type: "TEST".into(),
            })
        }
    }

    fn service_with(
        providers: Vec<FakeProvider>,
        default: &str,
    ) -> (PaymentService, Vec<Arc<FakeProvider>>) {
        let handles: Vec<Arc<FakeProvider>> = providers.into_iter().map(Arc::new).collect();
        let map: HashMap<String, Arc<dyn PaymentProvider>> = handles
            .iter()
            .map(|p| (p.id.clone(), p.clone() as Arc<dyn PaymentProvider>))
            .collect();
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        };
        let service = PaymentService::with_providers(map, default, retry).expect("service");
        (service, handles)
    }

    fn valid_request() -> CreatePaymentRequest {
        CreatePaymentRequest {
            order_id: Uuid::new_v4(),
            amount: 2500,
            currency: "USD".into(),
            customer_name: "Ada Lovelace".into(),
            customer_email: "ada@example.test".into(),
            provider_id: None,
            return_url: None,
            cancel_url: None,
            description: None,
        }
    }

    #[test]
    fn missing_default_provider_is_a_startup_error() {
        let err =
            PaymentService::with_providers(HashMap::new(), "paypal", RetryConfig::default())
                .unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::ConfigurationError);
    }

    #[tokio::test]
    async fn validation_rejects_before_any_provider_call() {
        let (service, handles) = service_with(vec![FakeProvider::new("alpha", &["USD"])], "alpha");

        let mut bad = valid_request();
        bad.amount = 0;
        let err = service.create_payment(&bad).await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::ValidationError);

        let mut bad = valid_request();
        bad.customer_email = "not-an-email".into();
        let err = service.create_payment(&bad).await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::ValidationError);

        assert_eq!(handles[0].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_currency_fails_without_network_call() {
        let (service, handles) = service_with(vec![FakeProvider::new("alpha", &["USD"])], "alpha");

        let mut request = valid_request();
        request.currency = "JPY".into();
        let err = service.create_payment(&request).await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::ValidationError);
        assert_eq!(handles[0].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn currency_auto_selection_prefers_matching_provider() {
        let (service, _handles) = service_with(
            vec![
                FakeProvider::new("alpha", &["USD"]),
                FakeProvider::new("beta", &["EUR"]),
            ],
            "alpha",
        );

        let mut request = valid_request();
        request.currency = "EUR".into();
        let response = service.create_payment(&request).await.unwrap();
        assert_eq!(response.provider_id, "beta");
    }

    #[tokio::test]
    async fn explicit_provider_wins_over_auto_selection() {
        let (service, _handles) = service_with(
            vec![
                FakeProvider::new("alpha", &["USD", "EUR"]),
                FakeProvider::new("beta", &["EUR"]),
            ],
            "alpha",
        );

        let mut request = valid_request();
        request.currency = "EUR".into();
        request.provider_id = Some("alpha".into());
        let response = service.create_payment(&request).await.unwrap();
        assert_eq!(response.provider_id, "alpha");
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_to_success() {
        let (service, handles) =
            service_with(vec![FakeProvider::new("alpha", &["USD"]).failing_first(2)], "alpha");

        let response = service.create_payment(&valid_request()).await.unwrap();
        assert_eq!(response.provider_id, "alpha");
        assert_eq!(handles[0].calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let (service, handles) =
            service_with(vec![FakeProvider::new("alpha", &["USD"]).failing_first(10)], "alpha");

        let err = service.create_payment(&valid_request()).await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::NetworkError);
        assert_eq!(handles[0].calls.load(Ordering::SeqCst), 3);
    }
}
