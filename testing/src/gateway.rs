//! Mock payment gateway.
//!
//! Callback bodies are plain JSON `{"signature": "mock", "result": {...}}`.
//! Anything with another signature is rejected, which lets tests exercise
//! the engine's handling of forged callbacks without real cryptography.

use keygate_core::{
    GatewayError, GatewayResult, Money, PaymentGateway, PaymentReference, PaymentResult,
    PurchaseId,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

const MOCK_SIGNATURE: &str = "mock";

/// Payment request the engine made
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Purchase being paid for
    pub purchase_id: PurchaseId,
    /// Amount requested
    pub amount: Money,
    /// Order reference
    pub reference: PaymentReference,
}

#[derive(Serialize, Deserialize)]
struct MockCallback {
    signature: String,
    result: PaymentResult,
}

/// Recording gateway double
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    requests: Arc<Mutex<Vec<PaymentRequest>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent payment URL requests fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every payment URL request so far
    #[must_use]
    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Signed callback body for an approved payment
    #[must_use]
    pub fn approved(reference: &PaymentReference, transaction_id: &str) -> Vec<u8> {
        Self::callback(&PaymentResult {
            reference: reference.clone(),
            transaction_id: transaction_id.to_string(),
            approved: true,
            response_code: "0000".to_string(),
            response_text: "APPROVED".to_string(),
        })
    }

    /// Signed callback body for a declined payment
    #[must_use]
    pub fn declined(reference: &PaymentReference, response_code: &str) -> Vec<u8> {
        Self::callback(&PaymentResult {
            reference: reference.clone(),
            transaction_id: String::new(),
            approved: false,
            response_code: response_code.to_string(),
            response_text: format!("Declined: {response_code}"),
        })
    }

    /// Signed callback body carrying `result`
    #[must_use]
    pub fn callback(result: &PaymentResult) -> Vec<u8> {
        Self::with_signature(result, MOCK_SIGNATURE)
    }

    /// Callback body with an arbitrary signature
    #[must_use]
    pub fn with_signature(result: &PaymentResult, signature: &str) -> Vec<u8> {
        serde_json::to_vec(&MockCallback {
            signature: signature.to_string(),
            result: result.clone(),
        })
        .unwrap_or_default()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn request_payment_url(
        &self,
        purchase_id: PurchaseId,
        amount: Money,
        reference: PaymentReference,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send + '_>> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(GatewayError::Unavailable("mock gateway is down".to_string()));
            }
            let url = format!(
                "https://pay.example.test/checkout?order={reference}&amount={}",
                amount.minor()
            );
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(PaymentRequest {
                    purchase_id,
                    amount,
                    reference,
                });
            Ok(url)
        })
    }

    fn verify_callback(&self, raw: &[u8]) -> GatewayResult<PaymentResult> {
        let callback: MockCallback = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
        if callback.signature != MOCK_SIGNATURE {
            return Err(GatewayError::InvalidSignature);
        }
        Ok(callback.result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn records_requests() {
        let gateway = MockPaymentGateway::new();
        let reference = fixtures::reference("1234ABCDEFGH");
        let url = gateway
            .request_payment_url(PurchaseId::new(), Money::from_minor(1500), reference.clone())
            .await
            .unwrap();

        assert!(url.contains("order=1234ABCDEFGH"));
        assert_eq!(gateway.requests().len(), 1);
        assert_eq!(gateway.requests()[0].reference, reference);
    }

    #[tokio::test]
    async fn unavailable_gateway_fails_requests() {
        let gateway = MockPaymentGateway::new();
        gateway.set_unavailable(true);
        let result = gateway
            .request_payment_url(PurchaseId::new(), Money::from_minor(1500), fixtures::reference("1234ABCDEFGH"))
            .await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }

    #[test]
    fn verifies_only_mock_signatures() {
        let gateway = MockPaymentGateway::new();
        let reference = fixtures::reference("1234ABCDEFGH");

        let result = gateway
            .verify_callback(&MockPaymentGateway::approved(&reference, "txn-1"))
            .unwrap();
        assert!(result.approved);
        assert_eq!(result.reference, reference);

        let forged = MockPaymentGateway::with_signature(&result, "forged");
        assert_eq!(gateway.verify_callback(&forged), Err(GatewayError::InvalidSignature));
        assert!(matches!(
            gateway.verify_callback(b"not json"),
            Err(GatewayError::MalformedPayload(_))
        ));
    }
}
