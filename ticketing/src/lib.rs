//! # Keygate Ticketing
//!
//! Invitation-gated ticketing: a finite pool of single-use keys controls who
//! may buy a ticket, every completed purchase mints a cascade of invitation
//! keys, and the price follows a tier chosen by the confirmed-attendee count.
//!
//! # Architecture
//!
//! ```text
//!            HTTP (axum)                       gateway webhook
//!                 │                                   │
//!                 ▼                                   ▼
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │                   ReconciliationEngine                       │
//!  │  ┌──────────┐ ┌──────────────┐ ┌───────────────┐ ┌─────────┐ │
//!  │  │ KeyStore │ │CapacityTracker│ │PurchaseLedger │ │ Pricing │ │
//!  │  └──────────┘ └──────────────┘ └───────────────┘ └─────────┘ │
//!  └──────────────────────────────────────────────────────────────┘
//!                 │                                   │
//!                 ▼                                   ▼
//!        LedgerStore (Postgres)              Notifier (after commit)
//! ```
//!
//! The services are constructed explicitly and share one transactional
//! store. The engine composes them into single units of work; see
//! [`engine`] for the completion sequence and lock order.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod metrics;
pub mod notify;
pub mod server;
pub mod services;

pub use config::{Config, ConfigError, EventPolicy};
pub use engine::{
    Booking, BookingRequest, CallbackAck, EngineConfig, EngineEnvironment, KeyView,
    ManualFixOutcome, ReconciliationEngine,
};
pub use gateway::SignedRedirectGateway;
pub use notify::LogNotifier;
