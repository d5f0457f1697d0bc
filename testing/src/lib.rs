//! # Keygate Testing
//!
//! Test doubles and helpers for the Keygate engine.
//!
//! This crate provides:
//! - Deterministic environment: [`FixedClock`], [`SequentialCodeGenerator`]
//! - [`InMemoryLedgerStore`], a transactional store with real rollback
//! - [`FaultInjectingStore`], which fails a chosen store call on demand
//! - [`MockPaymentGateway`], [`RecordingNotifier`] and [`FailingNotifier`]
//! - Fixtures and proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use keygate_testing::{fixtures, InMemoryLedgerStore};
//!
//! #[tokio::test]
//! async fn books_a_key() {
//!     let store = InMemoryLedgerStore::with_capacity(fixtures::capacity_state(0)).await;
//!     // build the engine against `store` ...
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod gateway;
pub mod memory;
pub mod notifier;

/// Mock implementations of environment traits.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use keygate_core::types::{KEY_CODE_ALPHABET, KEY_CODE_LEN};
    use keygate_core::{Clock, CodeGenerator, KeyCode, PaymentReference};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until a test moves it with [`FixedClock::advance`]
    /// or [`FixedClock::set`]. Clones share the same instant.
    ///
    /// # Example
    ///
    /// ```
    /// use keygate_testing::mocks::FixedClock;
    /// use keygate_core::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(Duration::days(1));
    /// assert_eq!(clock.now() - time1, Duration::days(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        millis: Arc<AtomicI64>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                millis: Arc::new(AtomicI64::new(time.timestamp_millis())),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        /// Jump to an absolute instant
        pub fn set(&self, time: DateTime<Utc>) {
            self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(crate::fixtures::epoch())
    }

    /// Predictable code generator.
    ///
    /// Hands out scripted codes first (useful for forcing collisions), then
    /// counts upwards through the key-code alphabet.
    #[derive(Debug, Default)]
    pub struct SequentialCodeGenerator {
        next: AtomicU64,
        scripted: Mutex<VecDeque<KeyCode>>,
    }

    impl SequentialCodeGenerator {
        /// Generator starting at `AAAA-AAAA` / `000000000000`
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Generator that returns `codes` before counting
        #[must_use]
        pub fn scripted(codes: impl IntoIterator<Item = KeyCode>) -> Self {
            Self {
                next: AtomicU64::new(0),
                scripted: Mutex::new(codes.into_iter().collect()),
            }
        }

        fn encode(mut n: u64) -> String {
            let base = KEY_CODE_ALPHABET.len() as u64;
            let mut chars = vec![KEY_CODE_ALPHABET[0]; KEY_CODE_LEN];
            for slot in chars.iter_mut().rev() {
                #[allow(clippy::cast_possible_truncation)]
                let digit = (n % base) as usize;
                *slot = KEY_CODE_ALPHABET[digit];
                n /= base;
            }
            chars.into_iter().map(char::from).collect()
        }
    }

    impl CodeGenerator for SequentialCodeGenerator {
        fn key_code(&self) -> KeyCode {
            let scripted = self
                .scripted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            if let Some(code) = scripted {
                return code;
            }
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            KeyCode::parse(&Self::encode(n)).unwrap_or_else(|_| crate::fixtures::code("AAAA-AAAA"))
        }

        fn payment_reference(&self) -> PaymentReference {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            PaymentReference::parse(&format!("{:04}{n:08}", n % 10_000))
                .unwrap_or_else(|_| crate::fixtures::reference("000000000000"))
        }
    }
}

/// Property-based testing strategies for domain types.
pub mod properties {
    use keygate_core::{Contact, KeyKind, Money};
    use proptest::prelude::*;

    /// Any key kind
    pub fn key_kind() -> impl Strategy<Value = KeyKind> {
        prop::sample::select(KeyKind::ALL.to_vec())
    }

    /// Key kinds an operator may issue directly
    pub fn issuable_kind() -> impl Strategy<Value = KeyKind> {
        key_kind().prop_filter("invitation keys come from the cascade", |kind| {
            *kind != KeyKind::Invitation
        })
    }

    /// A contact that passes validation
    pub fn valid_contact() -> impl Strategy<Value = Contact> {
        ("[A-Z][a-z]{2,10} [A-Z][a-z]{2,10}", "[a-z]{3,10}", "[0-9]{9}").prop_map(
            |(name, user, phone)| Contact::new(name, format!("{user}@example.com"), phone),
        )
    }

    /// Amounts small enough that sums never overflow
    pub fn money() -> impl Strategy<Value = Money> {
        (0u64..1_000_000).prop_map(Money::from_minor)
    }
}

// Re-export commonly used items
pub use faults::{FaultInjectingStore, FaultPoint};
pub use gateway::MockPaymentGateway;
pub use memory::InMemoryLedgerStore;
pub use mocks::{test_clock, FixedClock, SequentialCodeGenerator};
pub use notifier::{FailingNotifier, RecordingNotifier};
