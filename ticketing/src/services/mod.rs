//! Engine services.
//!
//! Each service owns one slice of the ledger. Methods that end in `_in` take
//! the caller's open transaction so the reconciliation engine can compose
//! several of them into one atomic unit.

pub mod capacity;
pub mod key_store;
pub mod ledger;
pub mod pricing;

pub use capacity::CapacityTracker;
pub use key_store::{KeyStore, KeyValidation, CAPACITY_CANCEL_REASON, MAX_KEYS_PER_ISSUE};
pub use ledger::PurchaseLedger;
pub use pricing::{PricingResolver, Totals};
