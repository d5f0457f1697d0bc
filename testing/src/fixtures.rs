//! Canned values shared across test suites.
//!
//! The default event has three tiers (`early` 15.00 from 0, `late` 30.00
//! from 150, `very-late` 45.00 from 250), room for 300 attendees and an alert
//! at 270.

use chrono::{DateTime, Utc};
use keygate_core::{
    CapacitySettings, CapacityState, Contact, KeyCode, Money, OperatorId, PaymentReference,
    TierThreshold,
};

/// Start of time for deterministic tests (2025-01-01 00:00:00 UTC)
///
/// # Panics
///
/// Never in practice; the timestamp is hardcoded.
#[must_use]
#[allow(clippy::expect_used)]
pub fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .expect("hardcoded timestamp should always parse")
        .with_timezone(&Utc)
}

/// Default tier table
#[must_use]
pub fn tiers() -> Vec<TierThreshold> {
    vec![
        TierThreshold::new("early", 0, Money::from_minor(1500)),
        TierThreshold::new("late", 150, Money::from_minor(3000)),
        TierThreshold::new("very-late", 250, Money::from_minor(4500)),
    ]
}

/// Default capacity settings
#[must_use]
pub fn settings() -> CapacitySettings {
    CapacitySettings {
        target_capacity: 280,
        max_capacity: 300,
        alert_threshold: 270,
        tiers: tiers(),
    }
}

/// Capacity row with the default settings and `confirmed` attendees
#[must_use]
pub fn capacity_state(confirmed: u32) -> CapacityState {
    let mut state = CapacityState::new(settings(), epoch());
    state.confirmed = confirmed;
    state
}

/// A valid purchaser
#[must_use]
pub fn contact() -> Contact {
    Contact::new("Ada Lovelace", "ada@example.com", "+44 600 123 456")
}

/// The `n`th distinct valid purchaser
#[must_use]
pub fn contact_n(n: usize) -> Contact {
    Contact::new(
        format!("Guest {n}"),
        format!("guest{n}@example.com"),
        format!("600{n:06}"),
    )
}

/// Administrator used by operator-facing tests
///
/// # Panics
///
/// Never in practice; the identifier is hardcoded.
#[must_use]
#[allow(clippy::expect_used)]
pub fn admin() -> OperatorId {
    OperatorId::new("admin@example.com").expect("hardcoded operator id is not blank")
}

/// Parse a key code literal
///
/// # Panics
///
/// Panics if `code` is not a valid key code.
#[must_use]
#[allow(clippy::expect_used)]
pub fn code(code: &str) -> KeyCode {
    KeyCode::parse(code).expect("fixture key code should parse")
}

/// Parse a payment reference literal
///
/// # Panics
///
/// Panics if `reference` is not a valid payment reference.
#[must_use]
#[allow(clippy::expect_used)]
pub fn reference(reference: &str) -> PaymentReference {
    PaymentReference::parse(reference).expect("fixture payment reference should parse")
}
