use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::CurrencyCode;
use crate::pricing::{resolve_tier_in, PriceTier, TierQuote};

/// A purchasable variant of a product (grade, pack size, ...). Price schedules hang off variants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub String);

impl std::fmt::Display for VariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One variant with its tiered price schedule.
///
/// The schedule is immutable per listing revision; a new revision bumps `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub name: String,
    /// Selling unit, e.g. "kg", "crate", "head".
    pub unit: String,
    /// Minimum order quantity.
    pub moq: u32,
    pub currency: CurrencyCode,
    pub price_tiers: Vec<PriceTier>,
    pub updated_at: DateTime<Utc>,
}

impl ProductVariant {
    /// Price `quantity` units at this variant's currency precision.
    pub fn quote(&self, quantity: u32) -> TierQuote {
        resolve_tier_in(quantity, &self.price_tiers, &self.currency)
    }

    pub fn meets_moq(&self, quantity: u32) -> bool {
        quantity >= self.moq.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::TierId;
    use rust_decimal::Decimal;

    fn maize() -> ProductVariant {
        ProductVariant {
            id: VariantId("maize-50kg".into()),
            name: "Yellow maize, 50kg bag".into(),
            unit: "bag".into(),
            moq: 10,
            currency: CurrencyCode::new("XAF"),
            price_tiers: vec![
                PriceTier::new(TierId("t1".into()), 1, Some(49), Decimal::new(15_250, 0)),
                PriceTier::new(TierId("t2".into()), 50, None, Decimal::new(14_000, 0)),
            ],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn variant_quote_uses_its_schedule() {
        let quote = maize().quote(60);
        assert_eq!(quote.unit_price, Decimal::new(14_000, 0));
        assert_eq!(quote.total_price, Decimal::new(840_000, 0));
    }

    #[test]
    fn moq_check() {
        let v = maize();
        assert!(!v.meets_moq(9));
        assert!(v.meets_moq(10));
    }

    #[test]
    fn zero_moq_still_requires_one_unit() {
        let mut v = maize();
        v.moq = 0;
        assert!(!v.meets_moq(0));
        assert!(v.meets_moq(1));
    }
}
