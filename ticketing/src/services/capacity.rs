//! Capacity Tracker: the confirmed-attendee count and the tier it selects.

use keygate_core::{
    AuditAction, AuditEntry, CapacityIncrement, CapacitySettings, CapacityState, Clock, DateTime,
    EngineError, EngineResult, ImpactReport, LedgerStore, LedgerTransaction, OperatorId,
    PurchaseId, StoreError, TierThreshold, Utc,
};
use serde_json::json;
use std::sync::Arc;

/// Reads and updates the singleton capacity row
#[derive(Clone)]
pub struct CapacityTracker {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl CapacityTracker {
    /// Creates a tracker over the shared ledger
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Committed capacity row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the row was never seeded.
    pub async fn snapshot(&self) -> EngineResult<CapacityState> {
        self.store
            .capacity_snapshot()
            .await?
            .ok_or_else(|| StoreError::NotFound("capacity state".to_string()).into())
    }

    /// Tier a booking made now would be priced at.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] if no tier covers the count.
    pub async fn current_tier(&self) -> EngineResult<TierThreshold> {
        let state = self.snapshot().await?;
        state
            .current_tier()
            .cloned()
            .ok_or_else(|| EngineError::InvalidState("no pricing tier configured".to_string()))
    }

    /// Describe what `proposed` would change without applying it.
    ///
    /// Malformed settings still produce a report; the reason
    /// [`update_settings`](Self::update_settings) would refuse them is in
    /// [`ImpactReport::validation_error`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the row was never seeded.
    pub async fn preview_impact(&self, proposed: &CapacitySettings) -> EngineResult<ImpactReport> {
        Ok(self.snapshot().await?.preview_impact(proposed))
    }

    /// Replace the capacity settings. The confirmed count is untouched.
    ///
    /// Purchases already pending keep the price they were quoted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if `settings` is malformed.
    pub async fn update_settings(
        &self,
        settings: CapacitySettings,
        by: &OperatorId,
    ) -> EngineResult<CapacityState> {
        settings
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut state = tx.lock_capacity().await?;
        let previous_tier = state.current_tier().map(|t| t.name.clone());

        state.settings = settings;
        state.updated_at = now;
        let current_tier = state.current_tier().map(|t| t.name.clone());

        tx.save_capacity(state.clone()).await?;
        tx.append_audit(
            AuditEntry::new(now, AuditAction::CapacitySettingsUpdated, by.clone()).detail(json!({
                "max_capacity": state.settings.max_capacity,
                "target_capacity": state.settings.target_capacity,
                "alert_threshold": state.settings.alert_threshold,
                "tiers": state.settings.tiers.len(),
            })),
        )
        .await?;
        tx.commit().await?;

        if previous_tier == current_tier {
            tracing::info!(operator = %by, max_capacity = state.settings.max_capacity, "Capacity settings updated");
        } else {
            tracing::warn!(
                operator = %by,
                previous_tier = ?previous_tier,
                current_tier = ?current_tier,
                "Capacity settings update changed the active tier"
            );
        }
        Ok(state)
    }

    /// Count one completed purchase against the row locked in `tx`.
    pub(crate) async fn increment_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        state: &mut CapacityState,
        purchase_id: PurchaseId,
        now: DateTime<Utc>,
    ) -> EngineResult<CapacityIncrement> {
        let increment = state.increment(now);
        tx.save_capacity(state.clone()).await?;
        tx.append_audit(
            AuditEntry::new(now, AuditAction::CapacityIncremented, OperatorId::system())
                .purchase(purchase_id)
                .detail(json!({ "previous": increment.previous, "current": increment.current })),
        )
        .await?;

        if increment.over_capacity {
            tracing::warn!(
                purchase_id = %purchase_id,
                confirmed = increment.current,
                max_capacity = state.settings.max_capacity,
                "Confirmed count exceeds max capacity"
            );
        }
        Ok(increment)
    }
}
