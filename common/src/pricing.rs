//! Quantity-tiered unit pricing.
//!
//! A seller publishes a price schedule per variant: a list of tiers ordered by
//! `min_quantity`, non-overlapping, with the top tier unbounded. The resolver
//! never fails; an empty schedule yields a zero quote with no tier, which the
//! storefront shows as "pricing unavailable".

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::currency::{round_half_up, CurrencyCode};

/// Precision used by [`resolve_tier`] when the caller has no currency at hand.
pub const DEFAULT_MINOR_UNITS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierId(pub String);

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One quantity band of a price schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    pub id: TierId,
    pub min_quantity: u32,
    /// `None` means unbounded.
    pub max_quantity: Option<u32>,
    pub price_per_unit: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<Decimal>,
}

impl PriceTier {
    pub fn new(
        id: TierId,
        min_quantity: u32,
        max_quantity: Option<u32>,
        price_per_unit: Decimal,
    ) -> Self {
        Self {
            id,
            min_quantity,
            max_quantity,
            price_per_unit,
            discount_percentage: None,
        }
    }

    pub fn with_discount(mut self, percentage: Decimal) -> Self {
        self.discount_percentage = Some(percentage);
        self
    }

    pub fn contains(&self, quantity: u32) -> bool {
        quantity >= self.min_quantity && self.max_quantity.is_none_or(|max| quantity <= max)
    }
}

/// Result of pricing a quantity against a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierQuote {
    pub tier: Option<PriceTier>,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl TierQuote {
    pub fn unavailable() -> Self {
        Self {
            tier: None,
            unit_price: Decimal::ZERO,
            total_price: Decimal::ZERO,
        }
    }

    pub fn is_available(&self) -> bool {
        self.tier.is_some()
    }
}

/// Price `quantity` units, rounding the total to 2 decimal places.
pub fn resolve_tier(quantity: u32, tiers: &[PriceTier]) -> TierQuote {
    resolve_with_precision(quantity, tiers, DEFAULT_MINOR_UNITS)
}

/// Price `quantity` units, rounding the total to `currency`'s minor units.
pub fn resolve_tier_in(quantity: u32, tiers: &[PriceTier], currency: &CurrencyCode) -> TierQuote {
    resolve_with_precision(quantity, tiers, currency.minor_units())
}

fn resolve_with_precision(quantity: u32, tiers: &[PriceTier], decimals: u32) -> TierQuote {
    let mut ordered: Vec<&PriceTier> = tiers.iter().collect();
    ordered.sort_by_key(|t| t.min_quantity);

    let (Some(lowest), Some(highest)) = (ordered.first(), ordered.last()) else {
        return TierQuote::unavailable();
    };

    let tier = if quantity < lowest.min_quantity {
        *lowest
    } else {
        ordered
            .iter()
            .find(|t| t.contains(quantity))
            .copied()
            .unwrap_or(*highest)
    };

    let unit_price = tier.price_per_unit;
    let total = unit_price
        .checked_mul(Decimal::from(quantity))
        .unwrap_or_else(|| {
            tracing::warn!(tier = %tier.id, quantity, %unit_price, "quote total overflows, saturating");
            if unit_price.is_sign_negative() {
                Decimal::MIN
            } else {
                Decimal::MAX
            }
        });
    TierQuote {
        tier: Some(tier.clone()),
        unit_price,
        total_price: round_half_up(total, decimals),
    }
}

/// Reasons a seller's price schedule is rejected at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("price schedule has no tiers")]
    Empty,
    #[error("tier {0} has a non-positive unit price")]
    NonPositivePrice(TierId),
    #[error("tier {0} ends before it starts")]
    InvertedBounds(TierId),
    #[error("tier {0} is out of order or overlaps the previous tier")]
    Overlap(TierId),
    #[error("tier {0} is unbounded but is not the last tier")]
    UnboundedNotLast(TierId),
    #[error("last tier {0} must be unbounded")]
    BoundedTop(TierId),
}

/// Check that `tiers` form a valid schedule: ascending, non-overlapping,
/// positive prices, and only the last tier unbounded.
pub fn validate_schedule(tiers: &[PriceTier]) -> Result<(), ScheduleError> {
    let Some(last) = tiers.last() else {
        return Err(ScheduleError::Empty);
    };

    let mut previous_max: Option<u32> = None;
    for (i, tier) in tiers.iter().enumerate() {
        if tier.price_per_unit <= Decimal::ZERO {
            return Err(ScheduleError::NonPositivePrice(tier.id.clone()));
        }
        if tier.max_quantity.is_some_and(|max| max < tier.min_quantity) {
            return Err(ScheduleError::InvertedBounds(tier.id.clone()));
        }
        if i > 0 {
            match previous_max {
                Some(max) if tier.min_quantity > max => {}
                Some(_) => return Err(ScheduleError::Overlap(tier.id.clone())),
                None => return Err(ScheduleError::UnboundedNotLast(tiers[i - 1].id.clone())),
            }
        }
        previous_max = tier.max_quantity;
    }

    if last.max_quantity.is_some() {
        return Err(ScheduleError::BoundedTop(last.id.clone()));
    }
    Ok(())
}
