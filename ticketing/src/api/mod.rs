//! HTTP handlers.
//!
//! - [`keys`]: public key validation for the landing page
//! - [`bookings`]: booking start and status polling
//! - [`gateway`]: the payment gateway webhook
//! - [`admin`]: operator tooling behind [`keygate_web::AdminOperator`]

pub mod admin;
pub mod bookings;
pub mod gateway;
pub mod keys;
