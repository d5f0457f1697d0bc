//! Confirmed-attendee counter and tier thresholds.
//!
//! The tier is a pure function of the confirmed count. Thresholds are
//! ascending lower bounds: with `early:0, late:150, very-late:250` a count of
//! 149 is `early` and the completion that makes it 150 switches new bookings
//! to `late`.

use crate::types::{Money, TierName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Problems with proposed capacity settings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// No tiers configured
    #[error("at least one tier is required")]
    NoTiers,

    /// The first tier must start at zero so every count resolves
    #[error("first tier must start at 0, found {0}")]
    FirstBoundNotZero(u32),

    /// Lower bounds must strictly increase
    #[error("tier {tier} starts at {bound}, not above the previous tier")]
    Unordered {
        /// Offending tier
        tier: TierName,
        /// Its lower bound
        bound: u32,
    },

    /// Tier names must be unique
    #[error("duplicate tier name {0}")]
    DuplicateTier(TierName),

    /// Target capacity above hard capacity
    #[error("target capacity {target} exceeds max capacity {max}")]
    TargetAboveMax {
        /// Target
        target: u32,
        /// Max
        max: u32,
    },

    /// Alert threshold above hard capacity
    #[error("alert threshold {alert} exceeds max capacity {max}")]
    AlertAboveMax {
        /// Alert threshold
        alert: u32,
        /// Max
        max: u32,
    },
}

/// One pricing bracket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThreshold {
    /// Tier name
    pub name: TierName,
    /// Confirmed count from which this tier applies
    pub lower_bound: u32,
    /// Ticket price in this tier
    pub price: Money,
}

impl TierThreshold {
    /// Creates a threshold
    #[must_use]
    pub fn new(name: impl Into<String>, lower_bound: u32, price: Money) -> Self {
        Self {
            name: TierName::new(name),
            lower_bound,
            price,
        }
    }
}

/// Operator-tunable capacity settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySettings {
    /// Attendance the organisers aim for
    pub target_capacity: u32,
    /// Hard limit; no bookings once reached
    pub max_capacity: u32,
    /// Confirmed count at which operators are alerted
    pub alert_threshold: u32,
    /// Ascending tier thresholds
    pub tiers: Vec<TierThreshold>,
}

impl CapacitySettings {
    /// Check the settings are internally consistent.
    ///
    /// # Errors
    ///
    /// Returns the first [`SettingsError`] found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let first = self.tiers.first().ok_or(SettingsError::NoTiers)?;
        if first.lower_bound != 0 {
            return Err(SettingsError::FirstBoundNotZero(first.lower_bound));
        }

        let mut names = HashSet::new();
        let mut previous: Option<u32> = None;
        for tier in &self.tiers {
            if !names.insert(&tier.name) {
                return Err(SettingsError::DuplicateTier(tier.name.clone()));
            }
            if previous.is_some_and(|bound| tier.lower_bound <= bound) {
                return Err(SettingsError::Unordered {
                    tier: tier.name.clone(),
                    bound: tier.lower_bound,
                });
            }
            previous = Some(tier.lower_bound);
        }

        if self.target_capacity > self.max_capacity {
            return Err(SettingsError::TargetAboveMax {
                target: self.target_capacity,
                max: self.max_capacity,
            });
        }
        if self.alert_threshold > self.max_capacity {
            return Err(SettingsError::AlertAboveMax {
                alert: self.alert_threshold,
                max: self.max_capacity,
            });
        }
        Ok(())
    }

    /// Tier active at `confirmed`.
    ///
    /// Scans ascending; the first threshold whose lower bound exceeds the
    /// count means the previous one is active. Returns `None` only for an
    /// empty tier table, which [`validate`](Self::validate) rejects.
    #[must_use]
    pub fn tier_for(&self, confirmed: u32) -> Option<&TierThreshold> {
        let mut active = None;
        for tier in &self.tiers {
            if tier.lower_bound > confirmed {
                break;
            }
            active = Some(tier);
        }
        active
    }

    /// Look up a tier by name
    #[must_use]
    pub fn tier_named(&self, name: &TierName) -> Option<&TierThreshold> {
        self.tiers.iter().find(|tier| &tier.name == name)
    }
}

/// Result of recording one more confirmed attendee
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityIncrement {
    /// Count before the increment
    pub previous: u32,
    /// Count after the increment
    pub current: u32,
    /// This increment reached the alert threshold
    pub crossed_alert: bool,
    /// Count is now above max capacity
    pub over_capacity: bool,
}

/// Singleton capacity row for the event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityState {
    /// Attendees whose purchase has completed
    pub confirmed: u32,
    /// Current settings
    pub settings: CapacitySettings,
    /// When the row last changed
    pub updated_at: DateTime<Utc>,
}

impl CapacityState {
    /// Creates a capacity row with zero confirmed attendees
    #[must_use]
    pub const fn new(settings: CapacitySettings, now: DateTime<Utc>) -> Self {
        Self {
            confirmed: 0,
            settings,
            updated_at: now,
        }
    }

    /// Tier that applies to a booking made now
    #[must_use]
    pub fn current_tier(&self) -> Option<&TierThreshold> {
        self.settings.tier_for(self.confirmed)
    }

    /// Whether another booking may be accepted
    #[must_use]
    pub const fn has_slot(&self) -> bool {
        self.confirmed < self.settings.max_capacity
    }

    /// Slots left before max capacity
    #[must_use]
    pub const fn slots_remaining(&self) -> u32 {
        self.settings.max_capacity.saturating_sub(self.confirmed)
    }

    /// Confirmed attendees plus `held` purchases still awaiting payment
    #[must_use]
    pub const fn spoken_for(&self, held: u32) -> u32 {
        self.confirmed.saturating_add(held)
    }

    /// Tier a new booking is priced at while `held` purchases await payment.
    ///
    /// Each hold counts as the attendee it will become, so the booking that
    /// takes the slot at a threshold pays the next tier.
    #[must_use]
    pub fn booking_tier(&self, held: u32) -> Option<&TierThreshold> {
        self.settings.tier_for(self.spoken_for(held))
    }

    /// Whether a new booking fits alongside `held` purchases awaiting payment
    #[must_use]
    pub const fn has_slot_for_booking(&self, held: u32) -> bool {
        self.spoken_for(held) < self.settings.max_capacity
    }

    /// Slots a new booking could still take while `held` purchases await payment
    #[must_use]
    pub const fn open_slots(&self, held: u32) -> u32 {
        self.settings.max_capacity.saturating_sub(self.spoken_for(held))
    }

    /// Record one completed purchase. Never fails; the count only grows.
    pub fn increment(&mut self, now: DateTime<Utc>) -> CapacityIncrement {
        let previous = self.confirmed;
        self.confirmed = self.confirmed.saturating_add(1);
        self.updated_at = now;

        CapacityIncrement {
            previous,
            current: self.confirmed,
            crossed_alert: previous < self.settings.alert_threshold
                && self.confirmed >= self.settings.alert_threshold,
            over_capacity: self.confirmed > self.settings.max_capacity,
        }
    }

    /// Describe what `proposed` would change, without applying it
    #[must_use]
    pub fn preview_impact(&self, proposed: &CapacitySettings) -> ImpactReport {
        let current_tier = self.current_tier().map(|tier| tier.name.clone());
        let proposed_tier = proposed.tier_for(self.confirmed).map(|tier| tier.name.clone());

        let mut price_changes = Vec::new();
        for tier in &self.settings.tiers {
            let new = proposed.tier_named(&tier.name).map(|t| t.price);
            if new != Some(tier.price) {
                price_changes.push(PriceChange {
                    tier: tier.name.clone(),
                    old: Some(tier.price),
                    new,
                });
            }
        }
        for tier in &proposed.tiers {
            if self.settings.tier_named(&tier.name).is_none() {
                price_changes.push(PriceChange {
                    tier: tier.name.clone(),
                    old: None,
                    new: Some(tier.price),
                });
            }
        }

        ImpactReport {
            confirmed: self.confirmed,
            tier_changes: current_tier != proposed_tier,
            current_tier,
            proposed_tier,
            price_changes,
            slots_remaining_now: self.slots_remaining(),
            slots_remaining_proposed: proposed.max_capacity.saturating_sub(self.confirmed),
            would_trigger_bulk_cancel: self.confirmed >= proposed.max_capacity,
            alert_would_fire: self.confirmed >= proposed.alert_threshold,
            validation_error: proposed.validate().err().map(|e| e.to_string()),
        }
    }
}

/// Price difference for one tier between current and proposed settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    /// Tier name
    pub tier: TierName,
    /// Price now (`None` if the tier is new)
    pub old: Option<Money>,
    /// Proposed price (`None` if the tier is removed)
    pub new: Option<Money>,
}

/// What a settings change would do, computed without mutation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    /// Confirmed count the preview was computed against
    pub confirmed: u32,
    /// Tier active now
    pub current_tier: Option<TierName>,
    /// Tier that would be active
    pub proposed_tier: Option<TierName>,
    /// Whether the active tier would change
    pub tier_changes: bool,
    /// Per-tier price differences
    pub price_changes: Vec<PriceChange>,
    /// Slots left under current settings
    pub slots_remaining_now: u32,
    /// Slots left under proposed settings
    pub slots_remaining_proposed: u32,
    /// Maintenance would start cancelling unused keys
    pub would_trigger_bulk_cancel: bool,
    /// Count is already at or past the proposed alert threshold
    pub alert_would_fire: bool,
    /// Why the proposed settings would be rejected, if they would
    pub validation_error: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn settings() -> CapacitySettings {
        CapacitySettings {
            target_capacity: 280,
            max_capacity: 300,
            alert_threshold: 270,
            tiers: vec![
                TierThreshold::new("early", 0, Money::from_minor(1500)),
                TierThreshold::new("late", 150, Money::from_minor(3000)),
                TierThreshold::new("very-late", 250, Money::from_minor(4500)),
            ],
        }
    }

    #[test]
    fn tier_switches_exactly_at_threshold() {
        let s = settings();
        assert_eq!(s.tier_for(0).unwrap().name.as_str(), "early");
        assert_eq!(s.tier_for(149).unwrap().name.as_str(), "early");
        assert_eq!(s.tier_for(150).unwrap().name.as_str(), "late");
        assert_eq!(s.tier_for(10_000).unwrap().name.as_str(), "very-late");
    }

    #[test]
    fn validate_rejects_bad_tables() {
        let mut s = settings();
        s.tiers[1].lower_bound = 0;
        assert!(matches!(s.validate(), Err(SettingsError::Unordered { .. })));

        let mut s = settings();
        s.tiers[0].lower_bound = 5;
        assert_eq!(s.validate(), Err(SettingsError::FirstBoundNotZero(5)));

        let mut s = settings();
        s.tiers.clear();
        assert_eq!(s.validate(), Err(SettingsError::NoTiers));

        let mut s = settings();
        s.target_capacity = 301;
        assert!(matches!(s.validate(), Err(SettingsError::TargetAboveMax { .. })));

        assert_eq!(settings().validate(), Ok(()));
    }

    #[test]
    fn increment_reports_alert_crossing_once() {
        let mut state = CapacityState::new(settings(), Utc::now());
        state.confirmed = 269;

        let first = state.increment(Utc::now());
        assert!(first.crossed_alert);
        let second = state.increment(Utc::now());
        assert!(!second.crossed_alert);
        assert_eq!(second.current, 271);
    }

    #[test]
    fn has_slot_until_max() {
        let mut state = CapacityState::new(settings(), Utc::now());
        state.confirmed = 299;
        assert!(state.has_slot());
        state.increment(Utc::now());
        assert!(!state.has_slot());
        assert_eq!(state.slots_remaining(), 0);
    }

    #[test]
    fn pending_holds_take_slots_and_move_the_tier() {
        let mut state = CapacityState::new(settings(), Utc::now());
        state.confirmed = 149;
        assert_eq!(state.booking_tier(0).unwrap().name.as_str(), "early");
        assert_eq!(state.booking_tier(1).unwrap().name.as_str(), "late");

        state.confirmed = 298;
        assert!(state.has_slot_for_booking(1));
        assert!(!state.has_slot_for_booking(2));
        assert_eq!(state.open_slots(1), 1);
        assert_eq!(state.open_slots(5), 0);
        assert!(state.has_slot());
    }

    #[test]
    fn preview_flags_invalid_settings() {
        let state = CapacityState::new(settings(), Utc::now());
        let mut proposed = settings();
        proposed.tiers[0].lower_bound = 10;

        let report = state.preview_impact(&proposed);
        assert_eq!(
            report.validation_error,
            Some(SettingsError::FirstBoundNotZero(10).to_string())
        );
    }

    #[test]
    fn preview_does_not_mutate() {
        let mut state = CapacityState::new(settings(), Utc::now());
        state.confirmed = 160;
        let before = state.clone();

        let mut proposed = settings();
        proposed.tiers[1].lower_bound = 200;
        proposed.tiers[1].price = Money::from_minor(2800);
        proposed.max_capacity = 160;
        proposed.target_capacity = 160;
        proposed.alert_threshold = 150;

        let report = state.preview_impact(&proposed);
        assert_eq!(state, before);
        assert_eq!(report.current_tier.unwrap().as_str(), "late");
        assert_eq!(report.proposed_tier.unwrap().as_str(), "early");
        assert!(report.tier_changes);
        assert_eq!(report.price_changes.len(), 1);
        assert!(report.would_trigger_bulk_cancel);
        assert!(report.alert_would_fire);
        assert_eq!(report.slots_remaining_proposed, 0);
        assert!(report.validation_error.is_none());
    }

    proptest! {
        #[test]
        fn tier_never_moves_backwards(a in 0u32..1000, b in 0u32..1000) {
            let s = settings();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let lo_bound = s.tier_for(lo).unwrap().lower_bound;
            let hi_bound = s.tier_for(hi).unwrap().lower_bound;
            prop_assert!(lo_bound <= hi_bound);
        }

        #[test]
        fn resolved_tier_bound_never_exceeds_count(count in 0u32..1000) {
            let s = settings();
            prop_assert!(s.tier_for(count).unwrap().lower_bound <= count);
        }
    }
}
