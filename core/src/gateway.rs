//! Payment gateway boundary.
//!
//! The engine asks the gateway for a redirect URL and later trusts only a
//! [`PaymentResult`] that came out of [`PaymentGateway::verify_callback`].

use crate::error::GatewayError;
use crate::types::{Money, PaymentReference, PurchaseId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Normalised, signature-verified gateway callback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// Order reference the payment was requested under
    pub reference: PaymentReference,
    /// Gateway transaction identifier
    pub transaction_id: String,
    /// Whether the payment was approved
    pub approved: bool,
    /// Gateway response code
    pub response_code: String,
    /// Gateway response text
    pub response_text: String,
}

/// Payment gateway trait
///
/// Abstraction over redirect-style card gateways.
pub trait PaymentGateway: Send + Sync {
    /// Build the URL the customer is redirected to for payment.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] if the gateway refuses the order.
    fn request_payment_url(
        &self,
        purchase_id: PurchaseId,
        amount: Money,
        reference: PaymentReference,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send + '_>>;

    /// Verify a raw callback body and normalise it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidSignature`] or
    /// [`GatewayError::MalformedPayload`] if the body cannot be trusted.
    fn verify_callback(&self, raw: &[u8]) -> GatewayResult<PaymentResult>;
}
