//! Reconciliation Engine.
//!
//! Drives a purchase from booking to a terminal state and keeps key status,
//! purchase status and the confirmed count consistent with each other.
//!
//! # Completion
//!
//! There is exactly one completion path, `complete_pending`, used by free
//! bookings, approved gateway callbacks and operator recovery. Inside one
//! transaction it:
//!
//! 1. re-checks the purchase is still `pending`
//! 2. consumes the key with the purchaser's contact
//! 3. marks the purchase `completed`
//! 4. mints the invitation cascade
//! 5. sets `invitations_generated`
//! 6. increments the confirmed count
//!
//! Any failure drops the transaction, leaving the purchase `pending` and the
//! key `active` for a later retry.
//!
//! # Locking
//!
//! Every unit of work locks the capacity row first, then the purchase, then
//! keys. Events are dispatched only after commit.

use crate::metrics;
use crate::services::{CapacityTracker, KeyStore, PricingResolver, PurchaseLedger};
use chrono::Duration;
use keygate_core::{
    Addon, AuditAction, AuditEntry, CapacityIncrement, CapacitySettings, CapacityState, Clock,
    CodeGenerator, CompletionSource, Contact, DateTime, EngineError, EngineEvent, EngineResult,
    GatewayError, ImpactReport, Key, KeyCode, KeyId, KeyKind, KeyRejection, KeyStatus,
    LedgerStore, LedgerTransaction, Money, Notifier, OperatorId, PaymentGateway, PaymentReference,
    PaymentResult, PaymentStatus, PricingPolicy, Purchase, PurchaseId, TierName, Utc,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Collaborators injected into the engine
#[derive(Clone)]
pub struct EngineEnvironment {
    /// Transactional ledger
    pub store: Arc<dyn LedgerStore>,
    /// Payment gateway adapter
    pub gateway: Arc<dyn PaymentGateway>,
    /// Event sink
    pub notifier: Arc<dyn Notifier>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Key code and payment reference source
    pub codes: Arc<dyn CodeGenerator>,
}

/// Engine tuning
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Lifetime of minted invitation keys; `None` means they never expire
    pub invitation_ttl: Option<Duration>,
    /// Upper bound on the payment URL request
    pub gateway_timeout: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invitation_ttl: None,
            gateway_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// Booking request from the customer
#[derive(Clone, Debug, Deserialize)]
pub struct BookingRequest {
    /// Key code as typed
    pub code: String,
    /// Purchaser
    pub contact: Contact,
    /// Tier the customer was shown, if any
    #[serde(default)]
    pub tier: Option<String>,
    /// Selected add-on ids
    #[serde(default)]
    pub addons: Vec<String>,
}

/// Result of a booking
#[derive(Clone, Debug, Serialize)]
pub struct Booking {
    /// The purchase, `pending` or already `completed` for zero-amount bookings
    pub purchase: Purchase,
    /// Where to send the customer to pay; absent when nothing is owed
    pub payment_url: Option<String>,
    /// Cascade minted by a zero-amount booking
    pub invitation_keys: Vec<Key>,
}

/// What the landing page shows for a redeemable code
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyView {
    /// Canonical code
    pub code: KeyCode,
    /// Key kind
    pub kind: KeyKind,
    /// Tier a booking made now is priced at
    pub tier: TierName,
    /// Ticket price for this kind under that tier
    pub ticket_price: Money,
    /// Add-ons the customer may select
    pub eligible_addons: Vec<Addon>,
    /// Expiry, if any
    pub expires_at: Option<DateTime<Utc>>,
    /// Slots left before max capacity
    pub slots_remaining: u32,
}

/// Acknowledgement returned to the gateway for every callback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum CallbackAck {
    /// Approval applied; the purchase is complete
    Applied {
        /// Completed purchase
        purchase_id: PurchaseId,
    },
    /// Decline recorded; the purchase has failed
    Declined {
        /// Failed purchase
        purchase_id: PurchaseId,
    },
    /// Purchase was no longer pending; nothing changed
    Duplicate {
        /// Reference from the callback
        reference: PaymentReference,
    },
    /// Callback could not be trusted or applied; nothing changed
    Rejected {
        /// Why
        reason: String,
    },
}

/// Result of operator recovery
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ManualFixOutcome {
    /// Completion had already happened; nothing changed
    AlreadyComplete {
        /// The purchase as stored
        purchase: Purchase,
    },
    /// Recovery completed the purchase
    Completed {
        /// The completed purchase
        purchase: Purchase,
        /// Cascade minted by the completion
        invitation_keys: Vec<Key>,
    },
    /// The purchase cannot be completed from its current state
    NotPending {
        /// Current status
        status: PaymentStatus,
    },
}

/// State produced by one run of the completion path
struct Completion {
    purchase: Purchase,
    key: Key,
    invitations: Vec<Key>,
    increment: CapacityIncrement,
    alert_threshold: u32,
}

/// The reconciliation engine
pub struct ReconciliationEngine {
    keys: KeyStore,
    capacity: CapacityTracker,
    ledger: PurchaseLedger,
    pricing: PricingResolver,
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ReconciliationEngine {
    /// Wire the services over `env`
    #[must_use]
    pub fn new(env: EngineEnvironment, pricing: PricingPolicy, config: EngineConfig) -> Self {
        Self {
            keys: KeyStore::new(
                Arc::clone(&env.store),
                Arc::clone(&env.clock),
                Arc::clone(&env.codes),
            ),
            capacity: CapacityTracker::new(Arc::clone(&env.store), Arc::clone(&env.clock)),
            ledger: PurchaseLedger::new(Arc::clone(&env.store), env.codes),
            pricing: PricingResolver::new(pricing),
            store: env.store,
            gateway: env.gateway,
            notifier: env.notifier,
            clock: env.clock,
            config,
        }
    }

    /// Key Store
    #[must_use]
    pub const fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Capacity Tracker
    #[must_use]
    pub const fn capacity(&self) -> &CapacityTracker {
        &self.capacity
    }

    /// Purchase Ledger
    #[must_use]
    pub const fn ledger(&self) -> &PurchaseLedger {
        &self.ledger
    }

    /// Pricing Resolver
    #[must_use]
    pub const fn pricing(&self) -> &PricingResolver {
        &self.pricing
    }

    // ----- customer operations -----

    /// Check a code for the landing page.
    ///
    /// # Errors
    ///
    /// - [`EngineError::KeyInvalid`] if the code cannot be redeemed
    /// - [`EngineError::CapacityExhausted`] if the event is sold out
    pub async fn validate_key(&self, code: &str) -> EngineResult<KeyView> {
        let key = self.keys.validate(code).await?.into_key()?;
        let state = self.capacity.snapshot().await?;
        let held = self.store.pending_holds().await?;
        if !state.has_slot_for_booking(held) {
            return Err(sold_out(&state, held));
        }
        let tier = state
            .booking_tier(held)
            .cloned()
            .ok_or_else(|| EngineError::InvalidState("no pricing tier configured".to_string()))?;
        let resolution = self.pricing.resolve(key.kind, &tier);

        Ok(KeyView {
            code: key.code,
            kind: key.kind,
            tier: tier.name,
            ticket_price: resolution.ticket_price,
            eligible_addons: resolution.eligible_addons,
            expires_at: key.expires_at,
            slots_remaining: state.open_slots(held),
        })
    }

    /// Book a ticket with a key.
    ///
    /// Purchases still awaiting payment hold their slot: under the capacity
    /// lock the booking must fit alongside them, and the tier is resolved as
    /// if each had already confirmed. The price is frozen on the purchase. A zero total completes immediately; otherwise the purchase is
    /// left `pending` with a payment URL.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] for bad contact details, unknown add-ons
    ///   or a tier that moved since the customer saw it
    /// - [`EngineError::KeyInvalid`] if the key cannot be redeemed or another
    ///   booking holds it
    /// - [`EngineError::CapacityExhausted`] if the event is sold out
    /// - [`EngineError::Gateway`] if no payment URL could be obtained; nothing
    ///   is persisted then
    pub async fn start_booking(&self, request: BookingRequest) -> EngineResult<Booking> {
        let result = self.book(request).await;
        metrics::record_booking(booking_outcome(&result));
        if let Err(err) = &result {
            observe_failure(err);
        }
        result
    }

    async fn book(&self, request: BookingRequest) -> EngineResult<Booking> {
        let problems = request.contact.problems();
        if !problems.is_empty() {
            return Err(EngineError::Validation(format!(
                "invalid contact: {}",
                problems.join(", ")
            )));
        }
        let code = KeyCode::parse(&request.code)
            .map_err(|_| EngineError::KeyInvalid(KeyRejection::NotFound))?;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut state = tx.lock_capacity().await?;
        let held = tx.count_pending_holds().await?;
        if !state.has_slot_for_booking(held) {
            return Err(sold_out(&state, held));
        }

        let mut key = tx
            .lock_key_by_code(code)
            .await?
            .ok_or(EngineError::KeyInvalid(KeyRejection::NotFound))?;
        if self.keys.expire_in(tx.as_mut(), &mut key, now).await? {
            tx.commit().await?;
            return Err(EngineError::KeyInvalid(KeyRejection::Expired));
        }
        key.redeemable(now)?;
        if self.ledger.key_is_held_in(tx.as_mut(), key.id, None).await? {
            return Err(EngineError::KeyInvalid(KeyRejection::AlreadyUsed));
        }

        let tier = state
            .booking_tier(held)
            .cloned()
            .ok_or_else(|| EngineError::InvalidState("no pricing tier configured".to_string()))?;
        if let Some(shown) = request.tier.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            if shown != tier.name.as_str() {
                return Err(EngineError::Validation(format!(
                    "tier changed: bookings are now priced at {}",
                    tier.name
                )));
            }
        }
        let price = self.pricing.quote(key.kind, &tier, &request.addons)?;

        if price.total_amount.is_zero() {
            let purchase = self
                .ledger
                .create_pending_in(tx.as_mut(), &key, request.contact, price, None, now)
                .await?;
            let completion = self
                .complete_pending(
                    tx.as_mut(),
                    &mut state,
                    purchase,
                    None,
                    CompletionSource::Free,
                    &OperatorId::system(),
                    now,
                )
                .await?;
            tx.commit().await?;

            let booking = Booking {
                purchase: completion.purchase.clone(),
                payment_url: None,
                invitation_keys: completion.invitations.clone(),
            };
            self.after_completion(completion).await;
            return Ok(booking);
        }

        let reference = self.ledger.fresh_reference_in(tx.as_mut()).await?;
        let purchase = self
            .ledger
            .create_pending_in(tx.as_mut(), &key, request.contact, price, Some(reference.clone()), now)
            .await?;
        let payment_url = tokio::time::timeout(
            self.config.gateway_timeout,
            self.gateway
                .request_payment_url(purchase.id, purchase.total_amount(), reference.clone()),
        )
        .await
        .map_err(|_| GatewayError::Unavailable("payment URL request timed out".to_string()))??;
        tx.commit().await?;

        tracing::info!(
            purchase_id = %purchase.id,
            key_id = %key.id,
            reference = %reference,
            tier = %purchase.price.tier,
            total = purchase.total_amount().minor(),
            "Booking pending payment"
        );
        Ok(Booking {
            purchase,
            payment_url: Some(payment_url),
            invitation_keys: Vec::new(),
        })
    }

    /// Complete a pending zero-amount purchase.
    ///
    /// # Errors
    ///
    /// - [`EngineError::PurchaseNotFound`] if the purchase does not exist
    /// - [`EngineError::Validation`] if it has something to pay
    /// - [`EngineError::InvalidState`] if it is not pending
    /// - [`EngineError::IntegrityViolation`] if its key is no longer active
    pub async fn complete_free(&self, purchase_id: PurchaseId) -> EngineResult<Purchase> {
        let result = self.try_complete_free(purchase_id).await;
        if let Err(err) = &result {
            observe_failure(err);
        }
        result
    }

    async fn try_complete_free(&self, purchase_id: PurchaseId) -> EngineResult<Purchase> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut state = tx.lock_capacity().await?;
        let purchase = self.ledger.lock_in(tx.as_mut(), purchase_id).await?;
        if purchase.requires_payment() {
            return Err(EngineError::Validation(
                "purchase has an amount due and must be paid through the gateway".to_string(),
            ));
        }

        let completion = self
            .complete_pending(
                tx.as_mut(),
                &mut state,
                purchase,
                None,
                CompletionSource::Free,
                &OperatorId::system(),
                now,
            )
            .await?;
        tx.commit().await?;

        let purchase = completion.purchase.clone();
        self.after_completion(completion).await;
        Ok(purchase)
    }

    /// Current state of a purchase, for the return page.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PurchaseNotFound`] if it does not exist.
    pub async fn purchase_status(&self, purchase_id: PurchaseId) -> EngineResult<Purchase> {
        self.ledger.get(purchase_id).await
    }

    // ----- gateway -----

    /// Apply a raw gateway callback.
    ///
    /// Never fails: every outcome is an acknowledgement so the webhook can
    /// answer the gateway with success. Problems are logged and counted.
    pub async fn handle_gateway_callback(&self, raw: &[u8]) -> CallbackAck {
        let result = match self.gateway.verify_callback(raw) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "Rejected unverifiable gateway callback");
                metrics::record_rejected_callback();
                return CallbackAck::Rejected {
                    reason: err.to_string(),
                };
            }
        };

        match self.apply_payment_result(&result).await {
            Ok(ack) => ack,
            Err(EngineError::DuplicateCallback(reference)) => {
                tracing::warn!(
                    reference = %reference,
                    transaction_id = %result.transaction_id,
                    "Discarded duplicate gateway callback"
                );
                metrics::record_duplicate_callback();
                CallbackAck::Duplicate { reference }
            }
            Err(err) => {
                observe_failure(&err);
                if !matches!(err, EngineError::IntegrityViolation { .. }) {
                    tracing::error!(
                        reference = %result.reference,
                        error = %err,
                        "Gateway callback could not be applied"
                    );
                }
                metrics::record_rejected_callback();
                CallbackAck::Rejected {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn apply_payment_result(&self, result: &PaymentResult) -> EngineResult<CallbackAck> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut state = tx.lock_capacity().await?;

        let Some(mut purchase) = self
            .ledger
            .lock_by_reference_in(tx.as_mut(), &result.reference)
            .await?
        else {
            tracing::warn!(reference = %result.reference, "Callback for unknown payment reference");
            metrics::record_rejected_callback();
            return Ok(CallbackAck::Rejected {
                reason: format!("unknown payment reference {}", result.reference),
            });
        };
        if purchase.payment_status != PaymentStatus::Pending {
            return Err(EngineError::DuplicateCallback(result.reference.clone()));
        }
        let purchase_id = purchase.id;

        if result.approved {
            let completion = self
                .complete_pending(
                    tx.as_mut(),
                    &mut state,
                    purchase,
                    Some(result.transaction_id.clone()),
                    CompletionSource::Gateway,
                    &OperatorId::system(),
                    now,
                )
                .await?;
            tx.commit().await?;
            self.after_completion(completion).await;
            return Ok(CallbackAck::Applied { purchase_id });
        }

        let reason = if result.response_text.trim().is_empty() {
            result.response_code.clone()
        } else {
            result.response_text.clone()
        };
        self.ledger
            .fail_in(
                tx.as_mut(),
                &mut purchase,
                &result.response_code,
                &reason,
                &OperatorId::system(),
                now,
            )
            .await?;
        tx.commit().await?;

        let declined = EngineError::GatewayRejected {
            code: result.response_code.clone(),
            reason: reason.clone(),
        };
        tracing::info!(
            purchase_id = %purchase_id,
            key_id = %purchase.key_id,
            code = %result.response_code,
            "{declined}"
        );
        metrics::record_purchase_failed();
        self.dispatch(vec![EngineEvent::PurchaseFailed { purchase, reason }])
            .await;
        Ok(CallbackAck::Declined { purchase_id })
    }

    // ----- operator operations -----

    /// Recover a purchase whose callback never arrived.
    ///
    /// A completed purchase is reported as such without any change. A failed
    /// purchase is reopened only if its key is still active and free; it then
    /// goes through the same completion path as a gateway approval.
    ///
    /// # Errors
    ///
    /// - [`EngineError::PurchaseNotFound`] if the purchase does not exist
    /// - [`EngineError::IntegrityViolation`] if a pending purchase's key is no
    ///   longer active
    pub async fn manual_fix(
        &self,
        purchase_id: PurchaseId,
        operator: &OperatorId,
    ) -> EngineResult<ManualFixOutcome> {
        let result = self.try_manual_fix(purchase_id, operator).await;
        match &result {
            Ok(ManualFixOutcome::AlreadyComplete { .. }) => metrics::record_manual_fix("already_complete"),
            Ok(ManualFixOutcome::Completed { .. }) => metrics::record_manual_fix("completed"),
            Ok(ManualFixOutcome::NotPending { .. }) => metrics::record_manual_fix("not_pending"),
            Err(err) => {
                metrics::record_manual_fix("error");
                observe_failure(err);
            }
        }
        result
    }

    async fn try_manual_fix(
        &self,
        purchase_id: PurchaseId,
        operator: &OperatorId,
    ) -> EngineResult<ManualFixOutcome> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut state = tx.lock_capacity().await?;
        let mut purchase = self.ledger.lock_in(tx.as_mut(), purchase_id).await?;
        let previous_status = purchase.payment_status;

        match previous_status {
            PaymentStatus::Completed => {
                tracing::info!(purchase_id = %purchase_id, operator = %operator, "Manual fix found purchase already complete");
                return Ok(ManualFixOutcome::AlreadyComplete { purchase });
            }
            PaymentStatus::Failed => {
                let key_active = tx
                    .lock_key(purchase.key_id)
                    .await?
                    .is_some_and(|key| key.status == KeyStatus::Active);
                let key_taken = self
                    .ledger
                    .key_is_held_in(tx.as_mut(), purchase.key_id, Some(purchase.id))
                    .await?;
                if !key_active || key_taken {
                    tracing::warn!(
                        purchase_id = %purchase_id,
                        key_id = %purchase.key_id,
                        key_active,
                        key_taken,
                        "Manual fix refused for failed purchase"
                    );
                    return Ok(ManualFixOutcome::NotPending {
                        status: previous_status,
                    });
                }
                self.ledger
                    .reopen_in(tx.as_mut(), &mut purchase, operator, now)
                    .await?;
            }
            PaymentStatus::Pending => {}
        }

        tx.append_audit(
            AuditEntry::new(now, AuditAction::ManualFix, operator.clone())
                .key(purchase.key_id)
                .purchase(purchase.id)
                .detail(json!({ "previous_status": previous_status })),
        )
        .await?;
        let completion = self
            .complete_pending(
                tx.as_mut(),
                &mut state,
                purchase,
                None,
                CompletionSource::Operator(operator.clone()),
                operator,
                now,
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            purchase_id = %purchase_id,
            operator = %operator,
            previous_status = %previous_status,
            "Manual fix completed purchase"
        );
        let outcome = ManualFixOutcome::Completed {
            purchase: completion.purchase.clone(),
            invitation_keys: completion.invitations.clone(),
        };
        self.after_completion(completion).await;
        Ok(outcome)
    }

    /// Fail a pending purchase the customer walked away from, freeing its key.
    ///
    /// # Errors
    ///
    /// - [`EngineError::PurchaseNotFound`] if the purchase does not exist
    /// - [`EngineError::InvalidState`] if it is not pending
    pub async fn abandon_pending(
        &self,
        purchase_id: PurchaseId,
        operator: &OperatorId,
    ) -> EngineResult<Purchase> {
        const REASON: &str = "abandoned";

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut purchase = self.ledger.lock_in(tx.as_mut(), purchase_id).await?;
        self.ledger
            .fail_in(tx.as_mut(), &mut purchase, REASON, REASON, operator, now)
            .await?;
        tx.commit().await?;

        tracing::info!(purchase_id = %purchase_id, key_id = %purchase.key_id, operator = %operator, "Pending purchase abandoned");
        metrics::record_purchase_failed();
        self.dispatch(vec![EngineEvent::PurchaseFailed {
            purchase: purchase.clone(),
            reason: REASON.to_string(),
        }])
        .await;
        Ok(purchase)
    }

    /// Issue keys on behalf of an operator.
    ///
    /// # Errors
    ///
    /// See [`KeyStore::issue_keys`].
    pub async fn issue_keys(
        &self,
        kind: KeyKind,
        count: u32,
        expires_at: Option<DateTime<Utc>>,
        operator: &OperatorId,
    ) -> EngineResult<Vec<Key>> {
        let keys = self.keys.issue_keys(kind, count, expires_at, operator).await?;
        metrics::record_keys_issued(kind, keys.len());
        Ok(keys)
    }

    /// Cancel a key on behalf of an operator.
    ///
    /// # Errors
    ///
    /// See [`KeyStore::cancel`].
    pub async fn cancel_key(
        &self,
        key_id: KeyId,
        reason: &str,
        operator: &OperatorId,
    ) -> EngineResult<Key> {
        let key = self.keys.cancel(key_id, reason, operator).await?;
        metrics::record_keys_cancelled(1);
        self.dispatch(vec![EngineEvent::KeyCancelled {
            reason: key.cancellation_reason.clone().unwrap_or_default(),
            key: key.clone(),
        }])
        .await;
        Ok(key)
    }

    /// Cancel every active key once the event is full. Returns how many were cancelled.
    ///
    /// # Errors
    ///
    /// See [`KeyStore::bulk_cancel_unused_beyond_capacity`].
    pub async fn bulk_cancel_unused_beyond_capacity(
        &self,
        operator: &OperatorId,
    ) -> EngineResult<usize> {
        let cancelled = self.keys.bulk_cancel_unused_beyond_capacity(operator).await?;
        let count = cancelled.len();
        if count > 0 {
            metrics::record_keys_cancelled(count);
            let events = cancelled
                .into_iter()
                .map(|key| EngineEvent::KeyCancelled {
                    reason: key.cancellation_reason.clone().unwrap_or_default(),
                    key,
                })
                .collect();
            self.dispatch(events).await;
        }
        Ok(count)
    }

    /// Committed capacity row.
    ///
    /// # Errors
    ///
    /// See [`CapacityTracker::snapshot`].
    pub async fn capacity_snapshot(&self) -> EngineResult<CapacityState> {
        let state = self.capacity.snapshot().await?;
        metrics::update_confirmed_attendees(state.confirmed);
        Ok(state)
    }

    /// Preview a settings change without applying it.
    ///
    /// # Errors
    ///
    /// See [`CapacityTracker::preview_impact`].
    pub async fn preview_impact(&self, proposed: &CapacitySettings) -> EngineResult<ImpactReport> {
        self.capacity.preview_impact(proposed).await
    }

    /// Apply new capacity settings.
    ///
    /// # Errors
    ///
    /// See [`CapacityTracker::update_settings`].
    pub async fn update_capacity_settings(
        &self,
        settings: CapacitySettings,
        operator: &OperatorId,
    ) -> EngineResult<CapacityState> {
        self.capacity.update_settings(settings, operator).await
    }

    /// Invitation keys minted from `parent`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::KeyNotFound`] if `parent` does not exist
    pub async fn invitation_keys(&self, parent: KeyId) -> EngineResult<Vec<Key>> {
        self.keys.get(parent).await?;
        self.keys.invitation_keys(parent).await
    }

    /// Audit rows for a purchase.
    ///
    /// # Errors
    ///
    /// - [`EngineError::PurchaseNotFound`] if the purchase does not exist
    pub async fn audit_trail(&self, purchase_id: PurchaseId) -> EngineResult<Vec<AuditEntry>> {
        self.ledger.get(purchase_id).await?;
        self.ledger.audit_trail(purchase_id).await
    }

    // ----- completion -----

    /// The single completion path. See the module docs for the steps.
    #[allow(clippy::too_many_arguments)]
    async fn complete_pending(
        &self,
        tx: &mut dyn LedgerTransaction,
        state: &mut CapacityState,
        mut purchase: Purchase,
        transaction_id: Option<String>,
        source: CompletionSource,
        actor: &OperatorId,
        now: DateTime<Utc>,
    ) -> EngineResult<Completion> {
        if purchase.payment_status != PaymentStatus::Pending {
            return Err(EngineError::InvalidState(format!(
                "purchase is {}",
                purchase.payment_status
            )));
        }

        let key = self.keys.consume_in(tx, &purchase, actor, now).await?;
        purchase
            .complete(transaction_id, source, now)
            .map_err(|status| EngineError::InvalidState(format!("purchase is {status}")))?;

        let cascade = self.pricing.cascade_size(key.kind);
        let expires_at = self
            .config
            .invitation_ttl
            .and_then(|ttl| now.checked_add_signed(ttl));
        let invitations = self
            .keys
            .mint_invitations_in(tx, &key, cascade, now, expires_at)
            .await?;
        if !invitations.is_empty() {
            tx.append_audit(
                AuditEntry::new(now, AuditAction::InvitationsMinted, actor.clone())
                    .key(key.id)
                    .purchase(purchase.id)
                    .detail(json!({
                        "count": invitations.len(),
                        "codes": invitations.iter().map(|k| k.code.as_str()).collect::<Vec<_>>(),
                    })),
            )
            .await?;
        }
        purchase.invitations_generated = true;
        self.ledger
            .record_completion_in(tx, &purchase, actor, now)
            .await?;

        let increment = self
            .capacity
            .increment_in(tx, state, purchase.id, now)
            .await?;

        Ok(Completion {
            purchase,
            key,
            invitations,
            increment,
            alert_threshold: state.settings.alert_threshold,
        })
    }

    async fn after_completion(&self, completion: Completion) {
        let Completion {
            purchase,
            key,
            invitations,
            increment,
            alert_threshold,
        } = completion;

        tracing::info!(
            purchase_id = %purchase.id,
            key_id = %key.id,
            kind = %key.kind,
            total = purchase.total_amount().minor(),
            invitations = invitations.len(),
            confirmed = increment.current,
            "Purchase completed"
        );
        metrics::record_purchase_completed(purchase.total_amount(), increment.current);
        metrics::record_invitations_minted(invitations.len());

        let mut events = vec![EngineEvent::PurchaseCompleted {
            purchase,
            invitation_keys: invitations,
        }];
        if increment.crossed_alert {
            tracing::warn!(
                confirmed = increment.current,
                threshold = alert_threshold,
                "Capacity alert threshold crossed"
            );
            events.push(EngineEvent::CapacityAlert {
                confirmed: increment.current,
                threshold: alert_threshold,
            });
        }
        self.dispatch(events).await;
    }

    async fn dispatch(&self, events: Vec<EngineEvent>) {
        for event in events {
            let kind = event.kind();
            if let Err(err) = self.notifier.notify(event).await {
                tracing::warn!(event = kind, error = %err, "Notification delivery failed");
                metrics::record_notification_failure(kind);
            }
        }
    }
}

fn observe_failure(err: &EngineError) {
    if let EngineError::IntegrityViolation {
        purchase_id,
        key_id,
        detail,
    } = err
    {
        tracing::error!(
            purchase_id = %purchase_id,
            key_id = %key_id,
            detail = %detail,
            "Integrity violation: completion refused"
        );
        metrics::record_integrity_violation();
    }
}

fn sold_out(state: &CapacityState, pending: u32) -> EngineError {
    EngineError::CapacityExhausted {
        confirmed: state.confirmed,
        pending,
        max: state.settings.max_capacity,
    }
}

fn booking_outcome(result: &EngineResult<Booking>) -> &'static str {
    match result {
        Ok(booking) if booking.payment_url.is_some() => "pending",
        Ok(_) => "completed",
        Err(EngineError::KeyInvalid(_)) => "key_invalid",
        Err(EngineError::CapacityExhausted { .. }) => "sold_out",
        Err(_) => "rejected",
    }
}
