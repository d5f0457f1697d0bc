//! Pricing Resolver: ticket price, add-ons and cascade size for a booking.

use keygate_core::{
    AddonLine, EngineError, EngineResult, KeyKind, Money, PriceSnapshot, PricingError,
    PricingPolicy, Resolution, TierThreshold,
};

/// Add-on lines and totals for a selection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Totals {
    /// Priced add-on lines
    pub addons: Vec<AddonLine>,
    /// Sum of the add-on lines
    pub addon_total: Money,
    /// Ticket plus add-ons
    pub total_amount: Money,
}

/// Prices bookings from the configured [`PricingPolicy`]
#[derive(Clone, Debug)]
pub struct PricingResolver {
    policy: PricingPolicy,
}

impl PricingResolver {
    /// Creates a resolver for `policy`
    #[must_use]
    pub const fn new(policy: PricingPolicy) -> Self {
        Self { policy }
    }

    /// The policy in force
    #[must_use]
    pub const fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    /// Ticket price and eligible add-ons for `kind` under `tier`
    #[must_use]
    pub fn resolve(&self, kind: KeyKind, tier: &TierThreshold) -> Resolution {
        self.policy.resolve(kind, tier)
    }

    /// Total a selection of add-on ids on top of `ticket_price`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for unknown or ineligible add-ons.
    pub fn compute_total(
        &self,
        kind: KeyKind,
        ticket_price: Money,
        selected: &[String],
    ) -> EngineResult<Totals> {
        let (addons, addon_total, total_amount) = self
            .policy
            .compute_total(kind, ticket_price, selected)
            .map_err(pricing_error)?;
        Ok(Totals {
            addons,
            addon_total,
            total_amount,
        })
    }

    /// Price snapshot stored on a new purchase.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for unknown or ineligible add-ons.
    pub fn quote(
        &self,
        kind: KeyKind,
        tier: &TierThreshold,
        selected: &[String],
    ) -> EngineResult<PriceSnapshot> {
        self.policy.quote(kind, tier, selected).map_err(pricing_error)
    }

    /// Invitation keys a completed purchase of `kind` mints
    #[must_use]
    pub const fn cascade_size(&self, kind: KeyKind) -> u32 {
        self.policy.cascade_size(kind)
    }
}

fn pricing_error(err: PricingError) -> EngineError {
    EngineError::Validation(err.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn late() -> TierThreshold {
        TierThreshold::new("late", 150, Money::from_minor(3000))
    }

    #[test]
    fn tier_and_fixed_prices() {
        let resolver = PricingResolver::new(PricingPolicy::default());

        assert_eq!(resolver.resolve(KeyKind::Normal, &late()).ticket_price, Money::from_minor(3000));
        assert_eq!(resolver.resolve(KeyKind::Invitation, &late()).ticket_price, Money::from_minor(3000));
        assert_eq!(resolver.resolve(KeyKind::Free, &late()).ticket_price, Money::ZERO);
        assert_eq!(resolver.cascade_size(KeyKind::Normal), 5);
        assert_eq!(resolver.cascade_size(KeyKind::Invitation), 0);
    }

    #[test]
    fn bundled_keys_do_not_see_excluded_addons() {
        let resolver = PricingResolver::new(PricingPolicy::default());
        assert!(resolver.resolve(KeyKind::Bundled, &late()).eligible_addons.is_empty());
        assert_eq!(resolver.resolve(KeyKind::Normal, &late()).eligible_addons.len(), 1);

        let err = resolver
            .quote(KeyKind::Bundled, &late(), &["polo".to_string()])
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn totals_use_catalog_prices() {
        let resolver = PricingResolver::new(PricingPolicy::default());
        let totals = resolver
            .compute_total(KeyKind::Normal, Money::from_minor(3000), &["polo".to_string()])
            .unwrap();
        assert_eq!(totals.addon_total, Money::from_minor(2500));
        assert_eq!(totals.total_amount, Money::from_minor(5500));

        assert!(matches!(
            resolver.compute_total(KeyKind::Normal, Money::ZERO, &["hoodie".to_string()]),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn quote_snapshots_the_tier() {
        let resolver = PricingResolver::new(PricingPolicy::default());
        let snapshot = resolver.quote(KeyKind::Normal, &late(), &[]).unwrap();
        assert_eq!(snapshot.tier, late().name);
        assert_eq!(snapshot.total_amount, Money::from_minor(3000));
        assert!(snapshot.addons.is_empty());
    }
}
