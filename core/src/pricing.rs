//! Pricing policy: ticket price per key kind, add-on catalog, cascade size.
//!
//! The per-kind table is a struct with one field per [`KeyKind`] and is read
//! through an exhaustive `match`, so adding a kind does not compile until it
//! has a policy.

use crate::capacity::TierThreshold;
use crate::key::KeyKind;
use crate::purchase::{AddonLine, PriceSnapshot};
use crate::types::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors computing a price
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// Add-on id not in the catalog
    #[error("unknown add-on {0}")]
    UnknownAddon(String),

    /// Add-on not offered for this key kind
    #[error("add-on {addon} is not available for {kind} keys")]
    IneligibleAddon {
        /// Add-on id
        addon: String,
        /// Key kind
        kind: KeyKind,
    },

    /// Total does not fit in the money type
    #[error("price overflow")]
    Overflow,
}

/// How the ticket price is determined
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "amount", rename_all = "snake_case")]
pub enum PriceRule {
    /// Price comes from the active tier
    Tier,
    /// Fixed price regardless of tier
    Fixed(Money),
}

/// Policy for one key kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Ticket price rule
    pub price: PriceRule,
    /// Invitation keys minted when a purchase with this kind completes
    pub invitations: u32,
}

impl KindPolicy {
    /// Tier-priced kind
    #[must_use]
    pub const fn tier(invitations: u32) -> Self {
        Self {
            price: PriceRule::Tier,
            invitations,
        }
    }

    /// Fixed-price kind
    #[must_use]
    pub const fn fixed(price: Money, invitations: u32) -> Self {
        Self {
            price: PriceRule::Fixed(price),
            invitations,
        }
    }
}

/// Optional extra sold with a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    /// Catalog identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Key kinds that cannot buy this add-on
    #[serde(default)]
    pub excluded_kinds: Vec<KeyKind>,
}

impl Addon {
    /// Whether a key of `kind` may buy this add-on
    #[must_use]
    pub fn available_for(&self, kind: KeyKind) -> bool {
        !self.excluded_kinds.contains(&kind)
    }
}

/// Ticket price and the add-ons a key may choose from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Ticket price
    pub ticket_price: Money,
    /// Add-ons offered to this key kind
    pub eligible_addons: Vec<Addon>,
}

/// Complete pricing policy for the event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Standard keys
    pub normal: KindPolicy,
    /// Complimentary keys
    pub free: KindPolicy,
    /// Sponsor keys
    pub sponsor: KindPolicy,
    /// Cascade-minted keys
    pub invitation: KindPolicy,
    /// Merchandise-bundled keys
    pub bundled: KindPolicy,
    /// Add-on catalog
    pub addons: Vec<Addon>,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            normal: KindPolicy::tier(5),
            free: KindPolicy::fixed(Money::ZERO, 5),
            sponsor: KindPolicy::fixed(Money::ZERO, 5),
            invitation: KindPolicy::tier(0),
            bundled: KindPolicy::fixed(Money::ZERO, 5),
            addons: vec![Addon {
                id: "polo".to_string(),
                name: "Polo shirt".to_string(),
                price: Money::from_minor(2500),
                excluded_kinds: vec![KeyKind::Bundled],
            }],
        }
    }
}

impl PricingPolicy {
    /// Policy for a key kind
    #[must_use]
    pub const fn for_kind(&self, kind: KeyKind) -> &KindPolicy {
        match kind {
            KeyKind::Normal => &self.normal,
            KeyKind::Free => &self.free,
            KeyKind::Sponsor => &self.sponsor,
            KeyKind::Invitation => &self.invitation,
            KeyKind::Bundled => &self.bundled,
        }
    }

    /// Number of invitation keys a completed purchase with `kind` mints
    #[must_use]
    pub const fn cascade_size(&self, kind: KeyKind) -> u32 {
        self.for_kind(kind).invitations
    }

    /// Ticket price and eligible add-ons for `kind` under `tier`
    #[must_use]
    pub fn resolve(&self, kind: KeyKind, tier: &TierThreshold) -> Resolution {
        let ticket_price = match self.for_kind(kind).price {
            PriceRule::Tier => tier.price,
            PriceRule::Fixed(price) => price,
        };
        Resolution {
            ticket_price,
            eligible_addons: self
                .addons
                .iter()
                .filter(|addon| addon.available_for(kind))
                .cloned()
                .collect(),
        }
    }

    /// Price the selected add-ons from the catalog and total them.
    ///
    /// Client-supplied prices are never consulted; ids are looked up here.
    /// Repeated ids are counted once.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError`] for unknown or ineligible add-ons, or overflow.
    pub fn compute_total(
        &self,
        kind: KeyKind,
        ticket_price: Money,
        selected: &[String],
    ) -> Result<(Vec<AddonLine>, Money, Money), PricingError> {
        let mut lines: Vec<AddonLine> = Vec::new();
        for id in selected {
            if lines.iter().any(|line| &line.id == id) {
                continue;
            }
            let addon = self
                .addons
                .iter()
                .find(|addon| &addon.id == id)
                .ok_or_else(|| PricingError::UnknownAddon(id.clone()))?;
            if !addon.available_for(kind) {
                return Err(PricingError::IneligibleAddon {
                    addon: id.clone(),
                    kind,
                });
            }
            lines.push(AddonLine {
                id: addon.id.clone(),
                name: addon.name.clone(),
                price: addon.price,
            });
        }

        let addon_total = lines
            .iter()
            .try_fold(Money::ZERO, |acc, line| acc.checked_add(line.price))
            .ok_or(PricingError::Overflow)?;
        let total = ticket_price
            .checked_add(addon_total)
            .ok_or(PricingError::Overflow)?;

        Ok((lines, addon_total, total))
    }

    /// Resolve and total in one step, producing the snapshot stored on the purchase.
    ///
    /// # Errors
    ///
    /// See [`compute_total`](Self::compute_total).
    pub fn quote(
        &self,
        kind: KeyKind,
        tier: &TierThreshold,
        selected: &[String],
    ) -> Result<PriceSnapshot, PricingError> {
        let resolution = self.resolve(kind, tier);
        let (addons, addon_total, total_amount) =
            self.compute_total(kind, resolution.ticket_price, selected)?;
        Ok(PriceSnapshot {
            tier: tier.name.clone(),
            ticket_price: resolution.ticket_price,
            addons,
            addon_total,
            total_amount,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn early() -> TierThreshold {
        TierThreshold::new("early", 0, Money::from_minor(1500))
    }

    fn policy() -> PricingPolicy {
        let mut policy = PricingPolicy::default();
        policy.addons.push(Addon {
            id: "dinner".to_string(),
            name: "Gala dinner".to_string(),
            price: Money::from_minor(4000),
            excluded_kinds: Vec::new(),
        });
        policy
    }

    #[test]
    fn normal_and_invitation_use_tier_price() {
        let policy = policy();
        assert_eq!(policy.resolve(KeyKind::Normal, &early()).ticket_price, Money::from_minor(1500));
        assert_eq!(policy.resolve(KeyKind::Invitation, &early()).ticket_price, Money::from_minor(1500));
    }

    #[test]
    fn fixed_kinds_bypass_tier() {
        let policy = policy();
        for kind in [KeyKind::Free, KeyKind::Sponsor, KeyKind::Bundled] {
            assert_eq!(policy.resolve(kind, &early()).ticket_price, Money::ZERO);
        }
    }

    #[test]
    fn bundled_keys_cannot_buy_polo() {
        let policy = policy();
        let eligible = policy.resolve(KeyKind::Bundled, &early()).eligible_addons;
        assert!(eligible.iter().all(|addon| addon.id != "polo"));

        let err = policy
            .compute_total(KeyKind::Bundled, Money::ZERO, &["polo".to_string()])
            .unwrap_err();
        assert!(matches!(err, PricingError::IneligibleAddon { .. }));
    }

    #[test]
    fn addons_are_priced_from_catalog_once() {
        let policy = policy();
        let selected = vec!["polo".to_string(), "dinner".to_string(), "polo".to_string()];
        let snapshot = policy.quote(KeyKind::Normal, &early(), &selected).unwrap();

        assert_eq!(snapshot.addons.len(), 2);
        assert_eq!(snapshot.addon_total, Money::from_minor(6500));
        assert_eq!(snapshot.total_amount, Money::from_minor(8000));
        assert_eq!(snapshot.tier.as_str(), "early");
    }

    #[test]
    fn unknown_addon_is_rejected() {
        let err = policy()
            .compute_total(KeyKind::Normal, Money::ZERO, &["yacht".to_string()])
            .unwrap_err();
        assert_eq!(err, PricingError::UnknownAddon("yacht".to_string()));
    }

    #[test]
    fn cascade_sizes_follow_kind() {
        let policy = PricingPolicy::default();
        assert_eq!(policy.cascade_size(KeyKind::Normal), 5);
        assert_eq!(policy.cascade_size(KeyKind::Invitation), 0);
    }

    proptest! {
        #[test]
        fn total_is_ticket_plus_addons(price in 0u64..1_000_000, pick_polo: bool, pick_dinner: bool) {
            let policy = policy();
            let mut selected = Vec::new();
            if pick_polo { selected.push("polo".to_string()); }
            if pick_dinner { selected.push("dinner".to_string()); }
            let (_, addon_total, total) = policy
                .compute_total(KeyKind::Normal, Money::from_minor(price), &selected)
                .unwrap();
            prop_assert_eq!(total.minor(), price + addon_total.minor());
        }
    }
}
