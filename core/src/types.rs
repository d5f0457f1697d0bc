//! Value objects and identifiers shared by every part of the engine.
//!
//! Identifiers are UUID newtypes so a `KeyId` can never be passed where a
//! `PurchaseId` is expected. Human-facing tokens (`KeyCode`, `PaymentReference`)
//! validate their shape on construction and serialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(Uuid);

impl KeyId {
    /// Creates a new random `KeyId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `KeyId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for KeyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a purchase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(Uuid);

impl PurchaseId {
    /// Creates a new random `PurchaseId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PurchaseId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PurchaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Administrator identity recorded on operator-driven transitions
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(String);

impl OperatorId {
    /// Creates an `OperatorId`, rejecting blank identifiers
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Blank`] if the identifier is empty after trimming.
    pub fn new(id: impl Into<String>) -> Result<Self, ParseError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Blank("operator id"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Identity used for transitions performed by the engine itself
    #[must_use]
    pub fn system() -> Self {
        Self("system".to_string())
    }

    /// Borrow the identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// Errors raised when parsing value objects from untrusted input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A required value was empty
    #[error("{0} must not be blank")]
    Blank(&'static str),

    /// Key code had the wrong shape
    #[error("Invalid key code: {0}")]
    KeyCode(String),

    /// Payment reference had the wrong shape
    #[error("Invalid payment reference: {0}")]
    PaymentReference(String),
}

/// Characters used in key codes. Omits 0/O and 1/I so codes survive being read aloud.
pub const KEY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of significant characters in a key code
pub const KEY_CODE_LEN: usize = 8;

/// Human-typeable, opaque key code in the canonical `XXXX-XXXX` form
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCode(String);

impl KeyCode {
    /// Parse user input into a canonical code.
    ///
    /// Case, whitespace and the separating dash are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::KeyCode`] if the input does not contain exactly
    /// eight characters from [`KEY_CODE_ALPHABET`].
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let compact: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if compact.len() != KEY_CODE_LEN
            || !compact.bytes().all(|b| KEY_CODE_ALPHABET.contains(&b))
        {
            return Err(ParseError::KeyCode(input.to_string()));
        }

        Ok(Self::from_compact(&compact))
    }

    /// Build a code from eight alphabet characters without the dash.
    ///
    /// Callers must have validated the characters already.
    pub(crate) fn from_compact(compact: &str) -> Self {
        let (head, tail) = compact.split_at(KEY_CODE_LEN / 2);
        Self(format!("{head}-{tail}"))
    }

    /// Canonical string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeyCode {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyCode> for String {
    fn from(code: KeyCode) -> Self {
        code.0
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length of a payment reference
pub const PAYMENT_REFERENCE_LEN: usize = 12;

/// Order reference handed to the payment gateway.
///
/// Twelve characters, the first four numeric, as redirect gateways require.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Parse a reference received from the gateway
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::PaymentReference`] if the value has the wrong shape.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let valid = input.len() == PAYMENT_REFERENCE_LEN
            && input.bytes().take(4).all(|b| b.is_ascii_digit())
            && input.bytes().all(|b| b.is_ascii_alphanumeric());
        if valid {
            Ok(Self(input.to_string()))
        } else {
            Err(ParseError::PaymentReference(input.to_string()))
        }
    }

    pub(crate) const fn from_generated(reference: String) -> Self {
        Self(reference)
    }

    /// Borrow the reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PaymentReference {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PaymentReference> for String {
    fn from(reference: PaymentReference) -> Self {
        reference.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a pricing tier (e.g. `early`, `late`, `very-late`)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierName(String);

impl TierName {
    /// Creates a tier name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount in minor currency units (cents)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Contact
// ============================================================================

/// Purchaser contact details captured at booking time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Full name
    pub name: String,
    /// Email address (tickets are delivered here)
    pub email: String,
    /// Phone number
    pub phone: String,
}

impl Contact {
    /// Creates a contact with trimmed fields
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            email: email.into().trim().to_lowercase(),
            phone: phone.into().trim().to_string(),
        }
    }

    /// Returns the list of problems with this contact, empty when valid
    #[must_use]
    pub fn problems(&self) -> Vec<&'static str> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name is required");
        }

        let email_ok = self
            .email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'));
        if !email_ok {
            problems.push("a valid email is required");
        }

        if self.phone.chars().filter(char::is_ascii_digit).count() < 6 {
            problems.push("a valid phone number is required");
        }

        problems
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn key_code_parse_normalises_input() {
        let code = KeyCode::parse(" abcd efgh ").unwrap();
        assert_eq!(code.as_str(), "ABCD-EFGH");
        assert_eq!(KeyCode::parse("ABCD-EFGH").unwrap(), code);
    }

    #[test]
    fn key_code_rejects_ambiguous_characters() {
        assert!(KeyCode::parse("ABCD-EFG0").is_err());
        assert!(KeyCode::parse("ABCD-EFGI").is_err());
        assert!(KeyCode::parse("ABC").is_err());
    }

    #[test]
    fn key_code_deserializes_through_parse() {
        let code: KeyCode = serde_json::from_str("\"wxyz-2345\"").unwrap();
        assert_eq!(code.as_str(), "WXYZ-2345");
        assert!(serde_json::from_str::<KeyCode>("\"nope\"").is_err());
    }

    #[test]
    fn payment_reference_requires_numeric_prefix() {
        assert!(PaymentReference::parse("1234ABCDEFGH").is_ok());
        assert!(PaymentReference::parse("12X4ABCDEFGH").is_err());
        assert!(PaymentReference::parse("1234ABC").is_err());
    }

    #[test]
    fn contact_problems_are_reported() {
        let ok = Contact::new("Ada Lovelace", "ADA@example.com", "+44 600 123 456");
        assert!(ok.problems().is_empty());
        assert_eq!(ok.email, "ada@example.com");

        let bad = Contact::new(" ", "ada@example", "12");
        assert_eq!(bad.problems().len(), 3);
    }

    #[test]
    fn operator_id_rejects_blank() {
        assert!(OperatorId::new("  ").is_err());
        assert_eq!(OperatorId::new(" ops ").unwrap().as_str(), "ops");
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_minor(1500).to_string(), "15.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
    }
}
