//! Signed-redirect payment gateway adapter.
//!
//! The customer is sent to the gateway's checkout page with the order
//! parameters and an HMAC-SHA256 signature over them. The gateway later posts
//! a callback:
//!
//! ```text
//! { "params": base64(json), "signature": base64(hmac_sha256(secret, params)) }
//! ```
//!
//! where the decoded `params` are `{order, transaction_id, response_code,
//! response_text}`. A numeric response code in `0..=99`, or the literal
//! `APPROVED`, means the payment went through.

use crate::config::GatewayConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use keygate_core::{
    GatewayError, GatewayResult, Money, PaymentGateway, PaymentReference, PaymentResult,
    PurchaseId,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::future::Future;
use std::pin::Pin;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct CallbackParams {
    order: String,
    transaction_id: String,
    response_code: String,
    #[serde(default)]
    response_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CallbackEnvelope {
    params: String,
    signature: String,
}

/// HMAC-signed redirect gateway
#[derive(Clone)]
pub struct SignedRedirectGateway {
    base_url: String,
    merchant_code: String,
    secret: Vec<u8>,
    return_url: String,
}

impl std::fmt::Debug for SignedRedirectGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedRedirectGateway")
            .field("base_url", &self.base_url)
            .field("merchant_code", &self.merchant_code)
            .field("return_url", &self.return_url)
            .finish_non_exhaustive()
    }
}

impl SignedRedirectGateway {
    /// Creates a gateway from configuration
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        if config.secret.is_empty() {
            tracing::warn!("GATEWAY_SECRET is empty; callbacks are signed with an empty key");
        }
        Self {
            base_url: config.base_url.clone(),
            merchant_code: config.merchant_code.clone(),
            secret: config.secret.as_bytes().to_vec(),
            return_url: config.return_url.clone(),
        }
    }

    fn sign(&self, data: &[u8]) -> GatewayResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| GatewayError::Unavailable(format!("invalid signing key: {e}")))?;
        mac.update(data);
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn payment_url(&self, amount: Money, reference: &PaymentReference) -> GatewayResult<String> {
        let amount = amount.minor().to_string();
        let canonical = serde_urlencoded::to_string([
            ("order", reference.as_str()),
            ("amount", amount.as_str()),
            ("merchant", self.merchant_code.as_str()),
            ("return", self.return_url.as_str()),
        ])
        .map_err(|e| GatewayError::Unavailable(format!("cannot encode order: {e}")))?;

        let signature = self.sign(canonical.as_bytes())?;
        let signature = serde_urlencoded::to_string([("signature", signature.as_str())])
            .map_err(|e| GatewayError::Unavailable(format!("cannot encode signature: {e}")))?;

        Ok(format!("{}?{canonical}&{signature}", self.base_url))
    }

    /// Produce a callback body the gateway would send for `result`.
    ///
    /// Used by tests and by recovery tooling replaying a known approval.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the payload cannot be encoded.
    pub fn sign_callback(&self, result: &PaymentResult) -> GatewayResult<Vec<u8>> {
        let params = CallbackParams {
            order: result.reference.as_str().to_string(),
            transaction_id: result.transaction_id.clone(),
            response_code: result.response_code.clone(),
            response_text: result.response_text.clone(),
        };
        let params = serde_json::to_vec(&params)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
        let params = STANDARD.encode(params);
        let signature = self.sign(params.as_bytes())?;

        serde_json::to_vec(&CallbackEnvelope { params, signature })
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))
    }
}

/// Whether a gateway response code means the payment was approved
#[must_use]
pub fn is_approved(response_code: &str) -> bool {
    let code = response_code.trim();
    code.eq_ignore_ascii_case("APPROVED") || code.parse::<u32>().is_ok_and(|n| n <= 99)
}

impl PaymentGateway for SignedRedirectGateway {
    fn request_payment_url(
        &self,
        purchase_id: PurchaseId,
        amount: Money,
        reference: PaymentReference,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send + '_>> {
        let url = self.payment_url(amount, &reference);
        if url.is_ok() {
            tracing::debug!(purchase_id = %purchase_id, reference = %reference, amount = amount.minor(), "Payment URL signed");
        }
        Box::pin(async move { url })
    }

    fn verify_callback(&self, raw: &[u8]) -> GatewayResult<PaymentResult> {
        let envelope: CallbackEnvelope = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        let expected = self.sign(envelope.params.as_bytes())?;
        if !constant_time_eq::constant_time_eq(expected.as_bytes(), envelope.signature.trim().as_bytes()) {
            return Err(GatewayError::InvalidSignature);
        }

        let decoded = STANDARD
            .decode(envelope.params.trim())
            .map_err(|e| GatewayError::MalformedPayload(format!("params are not base64: {e}")))?;
        let params: CallbackParams = serde_json::from_slice(&decoded)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
        let reference = PaymentReference::parse(&params.order)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        Ok(PaymentResult {
            reference,
            approved: is_approved(&params.response_code),
            transaction_id: params.transaction_id,
            response_code: params.response_code,
            response_text: params.response_text,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gateway() -> SignedRedirectGateway {
        SignedRedirectGateway::new(&GatewayConfig {
            base_url: "https://pay.example.com/checkout".to_string(),
            merchant_code: "M123".to_string(),
            secret: "shared-secret".to_string(),
            return_url: "https://tickets.example.com/return?x=1".to_string(),
            timeout_secs: 5,
        })
    }

    fn result(code: &str) -> PaymentResult {
        PaymentResult {
            reference: PaymentReference::parse("1234ABCDEFGH").unwrap(),
            transaction_id: "txn-42".to_string(),
            approved: is_approved(code),
            response_code: code.to_string(),
            response_text: "text".to_string(),
        }
    }

    #[tokio::test]
    async fn payment_url_carries_signed_order() {
        let gateway = gateway();
        let url = gateway
            .request_payment_url(
                PurchaseId::new(),
                Money::from_minor(1500),
                PaymentReference::parse("1234ABCDEFGH").unwrap(),
            )
            .await
            .unwrap();

        assert!(url.starts_with("https://pay.example.com/checkout?order=1234ABCDEFGH&amount=1500&merchant=M123"));
        assert!(url.contains("return=https%3A%2F%2Ftickets.example.com%2Freturn%3Fx%3D1"));

        let (canonical, signature) = url
            .split_once('?')
            .unwrap()
            .1
            .rsplit_once("&signature=")
            .unwrap();
        let signature: Vec<(String, String)> =
            serde_urlencoded::from_str(&format!("signature={signature}")).unwrap();
        assert_eq!(signature[0].1, gateway.sign(canonical.as_bytes()).unwrap());
    }

    #[test]
    fn signed_callback_verifies() {
        let gateway = gateway();
        let raw = gateway.sign_callback(&result("0000")).unwrap();

        let verified = gateway.verify_callback(&raw).unwrap();
        assert_eq!(verified, result("0000"));
        assert!(verified.approved);
    }

    #[test]
    fn declined_codes() {
        let gateway = gateway();
        let raw = gateway.sign_callback(&result("EXPIRED_CARD")).unwrap();
        let verified = gateway.verify_callback(&raw).unwrap();
        assert!(!verified.approved);
        assert_eq!(verified.response_code, "EXPIRED_CARD");

        assert!(is_approved("99"));
        assert!(is_approved("approved"));
        assert!(!is_approved("100"));
        assert!(!is_approved("-1"));
        assert!(!is_approved(""));
    }

    #[test]
    fn tampered_params_are_rejected() {
        let gateway = gateway();
        let raw = gateway.sign_callback(&result("190")).unwrap();
        let mut envelope: CallbackEnvelope = serde_json::from_slice(&raw).unwrap();

        let forged = CallbackParams {
            order: "1234ABCDEFGH".to_string(),
            transaction_id: "txn-42".to_string(),
            response_code: "0000".to_string(),
            response_text: String::new(),
        };
        envelope.params = STANDARD.encode(serde_json::to_vec(&forged).unwrap());
        let raw = serde_json::to_vec(&envelope).unwrap();

        assert_eq!(gateway.verify_callback(&raw), Err(GatewayError::InvalidSignature));
    }

    #[test]
    fn other_secret_is_rejected() {
        let mut other = gateway();
        other.secret = b"another-secret".to_vec();
        let raw = other.sign_callback(&result("0000")).unwrap();

        assert_eq!(gateway().verify_callback(&raw), Err(GatewayError::InvalidSignature));
    }

    #[test]
    fn malformed_payloads() {
        let gateway = gateway();
        assert!(matches!(
            gateway.verify_callback(b"not json"),
            Err(GatewayError::MalformedPayload(_))
        ));

        let params = STANDARD.encode(br#"{"order":"bad","transaction_id":"t","response_code":"0"}"#);
        let signature = gateway.sign(params.as_bytes()).unwrap();
        let raw = serde_json::to_vec(&CallbackEnvelope { params, signature }).unwrap();
        assert!(matches!(
            gateway.verify_callback(&raw),
            Err(GatewayError::MalformedPayload(_))
        ));
    }
}
