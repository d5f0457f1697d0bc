//! Injected dependencies: time and randomness.
//!
//! Services never call `Utc::now()` or a RNG directly; they receive these
//! through trait objects so tests can pin them.

use crate::types::{KeyCode, PaymentReference, KEY_CODE_ALPHABET, KEY_CODE_LEN, PAYMENT_REFERENCE_LEN};
use chrono::{DateTime, Utc};
use rand::Rng;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of fresh key codes and payment references.
///
/// Uniqueness is not the generator's job: the Key Store checks every
/// candidate against all historical codes and asks again on collision.
pub trait CodeGenerator: Send + Sync {
    /// Produce a candidate key code
    fn key_code(&self) -> KeyCode;

    /// Produce a candidate payment reference
    fn payment_reference(&self) -> PaymentReference;
}

/// Generator backed by the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn key_code(&self) -> KeyCode {
        let mut rng = rand::thread_rng();
        let compact: String = (0..KEY_CODE_LEN)
            .map(|_| char::from(KEY_CODE_ALPHABET[rng.gen_range(0..KEY_CODE_ALPHABET.len())]))
            .collect();
        KeyCode::from_compact(&compact)
    }

    fn payment_reference(&self) -> PaymentReference {
        const TAIL: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::thread_rng();
        let digits: String = (0..4).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect();
        let tail: String = (4..PAYMENT_REFERENCE_LEN)
            .map(|_| char::from(TAIL[rng.gen_range(0..TAIL.len())]))
            .collect();
        PaymentReference::from_generated(format!("{digits}{tail}"))
    }
}
