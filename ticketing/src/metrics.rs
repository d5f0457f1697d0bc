//! Business metrics for the ticketing engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `keygate_bookings_total{outcome}` - Booking attempts by outcome
//! - `keygate_purchases_total{status}` - Purchase transitions (completed, failed)
//! - `keygate_revenue_minor_total` - Revenue from completed purchases in minor units
//! - `keygate_keys_issued_total{kind}` - Keys created by operators or the cascade
//! - `keygate_keys_cancelled_total` - Keys cancelled
//! - `keygate_invitations_minted_total` - Invitation keys minted by cascades
//! - `keygate_duplicate_callbacks_total` - Gateway callbacks discarded as already processed
//! - `keygate_rejected_callbacks_total` - Callbacks that failed verification or lookup
//! - `keygate_integrity_violations_total` - Completions refused because the key was not active
//! - `keygate_manual_fixes_total{outcome}` - Operator recovery runs by outcome
//! - `keygate_notification_failures_total{event}` - Notifications that could not be delivered
//!
//! ## Gauges
//! - `keygate_confirmed_attendees` - Current confirmed count

use keygate_core::{KeyKind, Money};
use metrics::{describe_counter, describe_gauge};

/// Initialize and register all business metrics descriptions.
///
/// Call once at startup, after the recorder is installed.
pub fn register_business_metrics() {
    describe_counter!(
        "keygate_bookings_total",
        "Booking attempts by outcome (pending, completed, key_invalid, sold_out, rejected)"
    );
    describe_counter!(
        "keygate_purchases_total",
        "Purchase transitions by resulting status"
    );
    describe_counter!(
        "keygate_revenue_minor_total",
        "Revenue from completed purchases in minor currency units"
    );
    describe_counter!("keygate_keys_issued_total", "Keys created, by kind");
    describe_counter!("keygate_keys_cancelled_total", "Keys cancelled");
    describe_counter!(
        "keygate_invitations_minted_total",
        "Invitation keys minted by completed purchases"
    );
    describe_counter!(
        "keygate_duplicate_callbacks_total",
        "Gateway callbacks discarded because the purchase was no longer pending"
    );
    describe_counter!(
        "keygate_rejected_callbacks_total",
        "Gateway callbacks that failed verification or referenced no purchase"
    );
    describe_counter!(
        "keygate_integrity_violations_total",
        "Completions refused because the purchase's key was not active"
    );
    describe_counter!(
        "keygate_manual_fixes_total",
        "Operator recovery runs by outcome"
    );
    describe_counter!(
        "keygate_notification_failures_total",
        "Engine events that could not be delivered"
    );
    describe_gauge!(
        "keygate_confirmed_attendees",
        "Attendees whose purchase has completed"
    );

    tracing::info!("Business metrics registered");
}

/// Record the outcome of a booking attempt.
pub fn record_booking(outcome: &'static str) {
    metrics::counter!("keygate_bookings_total", "outcome" => outcome).increment(1);
}

/// Record a completed purchase.
pub fn record_purchase_completed(amount: Money, confirmed: u32) {
    metrics::counter!("keygate_purchases_total", "status" => "completed").increment(1);
    metrics::counter!("keygate_revenue_minor_total").increment(amount.minor());
    metrics::gauge!("keygate_confirmed_attendees").set(f64::from(confirmed));
    tracing::debug!(amount = amount.minor(), confirmed, "Recorded purchase_completed metric");
}

/// Record a failed purchase.
pub fn record_purchase_failed() {
    metrics::counter!("keygate_purchases_total", "status" => "failed").increment(1);
}

/// Record issued keys.
pub fn record_keys_issued(kind: KeyKind, count: usize) {
    metrics::counter!("keygate_keys_issued_total", "kind" => kind.as_str()).increment(count as u64);
}

/// Record cancelled keys.
pub fn record_keys_cancelled(count: usize) {
    metrics::counter!("keygate_keys_cancelled_total").increment(count as u64);
}

/// Record an invitation cascade.
pub fn record_invitations_minted(count: usize) {
    metrics::counter!("keygate_invitations_minted_total").increment(count as u64);
    metrics::counter!("keygate_keys_issued_total", "kind" => KeyKind::Invitation.as_str())
        .increment(count as u64);
}

/// Record a discarded duplicate callback.
pub fn record_duplicate_callback() {
    metrics::counter!("keygate_duplicate_callbacks_total").increment(1);
}

/// Record a callback that could not be applied.
pub fn record_rejected_callback() {
    metrics::counter!("keygate_rejected_callbacks_total").increment(1);
}

/// Record a refused completion.
pub fn record_integrity_violation() {
    metrics::counter!("keygate_integrity_violations_total").increment(1);
}

/// Record an operator recovery run.
pub fn record_manual_fix(outcome: &'static str) {
    metrics::counter!("keygate_manual_fixes_total", "outcome" => outcome).increment(1);
}

/// Record an undeliverable notification.
pub fn record_notification_failure(event: &'static str) {
    metrics::counter!("keygate_notification_failures_total", "event" => event).increment(1);
}

/// Update the confirmed attendee gauge.
pub fn update_confirmed_attendees(confirmed: u32) {
    metrics::gauge!("keygate_confirmed_attendees").set(f64::from(confirmed));
}
