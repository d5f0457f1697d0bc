//! # Keygate Core
//!
//! Domain model and contracts for an invitation-gated ticketing engine.
//!
//! A finite pool of single-use **keys** controls who may buy a ticket. Each
//! completed purchase mints a **cascade** of invitation keys, and the ticket
//! price follows a **tier** chosen by the live confirmed-attendee count.
//!
//! This crate holds everything that does not perform I/O:
//!
//! - **Entities**: [`Key`], [`Purchase`], [`CapacityState`] and their state transitions
//! - **Policy**: [`PricingPolicy`] (tier/fixed prices, add-ons, cascade sizes)
//! - **Contracts**: [`LedgerStore`], [`PaymentGateway`], [`Notifier`], [`Clock`], [`CodeGenerator`]
//! - **Errors**: [`EngineError`] and friends
//!
//! The services that orchestrate these live in `keygate-ticketing`; the
//! production store lives in `keygate-postgres`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod capacity;
pub mod environment;
pub mod error;
pub mod gateway;
pub mod key;
pub mod notify;
pub mod pricing;
pub mod purchase;
pub mod store;
pub mod types;

pub use audit::{AuditAction, AuditEntry};
pub use capacity::{
    CapacityIncrement, CapacitySettings, CapacityState, ImpactReport, PriceChange, SettingsError,
    TierThreshold,
};
pub use environment::{Clock, CodeGenerator, RandomCodeGenerator, SystemClock};
pub use error::{EngineError, EngineResult, GatewayError, KeyRejection, StoreError};
pub use gateway::{GatewayResult, PaymentGateway, PaymentResult};
pub use key::{Key, KeyKind, KeyStatus};
pub use notify::{EngineEvent, Notifier, NotifyError};
pub use pricing::{Addon, KindPolicy, PriceRule, PricingError, PricingPolicy, Resolution};
pub use purchase::{AddonLine, CompletionSource, PaymentStatus, PriceSnapshot, Purchase};
pub use store::{LedgerStore, LedgerTransaction, StoreFuture};
pub use types::{
    Contact, KeyCode, KeyId, Money, OperatorId, ParseError, PaymentReference, PurchaseId, TierName,
};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
