use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Precision used for converted amounts, whatever the target currency.
pub const CONVERSION_DECIMALS: u32 = 2;

/// ISO-4217-like currency code, normalised to upper case.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimal places in the currency's minor unit.
    pub fn minor_units(&self) -> u32 {
        match self.0.as_str() {
            "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
            | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
            "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }
}

impl From<String> for CurrencyCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<&str> for CurrencyCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An amount in a given currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: CurrencyCode,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<CurrencyCode>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Product prices must not be negative.
    pub fn is_valid_price(&self) -> bool {
        !self.amount.is_sign_negative()
    }
}

/// Multipliers from a single base currency, as fetched once per session from the rates endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateTable {
    pub base_currency: CurrencyCode,
    pub rates: BTreeMap<CurrencyCode, Decimal>,
    pub as_of: DateTime<Utc>,
}

impl ExchangeRateTable {
    /// Build a table, dropping non-positive multipliers and pinning the base rate to 1.
    pub fn new(
        base_currency: CurrencyCode,
        rates: impl IntoIterator<Item = (CurrencyCode, Decimal)>,
        as_of: DateTime<Utc>,
    ) -> Self {
        let mut table = BTreeMap::new();
        for (code, rate) in rates {
            if rate <= Decimal::ZERO {
                tracing::warn!(currency = %code, %rate, "dropping non-positive exchange rate");
                continue;
            }
            if code == base_currency && rate != Decimal::ONE {
                tracing::warn!(currency = %code, %rate, "base currency rate is not 1, pinning");
                table.insert(code, Decimal::ONE);
                continue;
            }
            table.insert(code, rate);
        }
        Self {
            base_currency,
            rates: table,
            as_of,
        }
    }

    pub fn rate(&self, code: &CurrencyCode) -> Option<Decimal> {
        self.rates.get(code).copied()
    }
}

/// Round to `decimals` places, ties away from zero (half-up for non-negative amounts).
pub fn round_half_up(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert `amount` into `to` using `rates`.
///
/// Same currency returns `amount` untouched. A missing target rate, or a product
/// too large for a `Decimal`, also returns `amount` untouched: callers show the
/// original value rather than a wrong one.
/// Rates are relative to the table's base; cross conversions between two
/// non-base currencies go through the base on the caller's side.
pub fn convert(
    amount: Decimal,
    from: &CurrencyCode,
    to: &CurrencyCode,
    rates: &ExchangeRateTable,
) -> Decimal {
    if from == to {
        return amount;
    }
    try_convert(amount, from, to, rates).unwrap_or(amount)
}

/// Like [`convert`], but `None` when the amount could not be converted.
pub fn try_convert(
    amount: Decimal,
    from: &CurrencyCode,
    to: &CurrencyCode,
    rates: &ExchangeRateTable,
) -> Option<Decimal> {
    if from == to {
        return None;
    }
    let Some(rate) = rates.rate(to) else {
        tracing::debug!(%from, %to, "no exchange rate, leaving amount unconverted");
        return None;
    };
    match amount.checked_mul(rate) {
        Some(converted) => Some(round_half_up(converted, CONVERSION_DECIMALS)),
        None => {
            tracing::warn!(%from, %to, %amount, %rate, "conversion overflows, leaving amount unconverted");
            None
        }
    }
}

/// Convert a [`Money`] value. Keeps the original currency when it cannot be converted.
pub fn convert_money(money: &Money, to: &CurrencyCode, rates: &ExchangeRateTable) -> Money {
    match try_convert(money.amount, &money.currency, to, rates) {
        Some(amount) => Money {
            amount,
            currency: to.clone(),
        },
        None => money.clone(),
    }
}

/// Format an amount for display at its currency's minor-unit precision.
pub fn format_amount(money: &Money) -> String {
    let decimals = money.currency.minor_units();
    let mut shown = round_half_up(money.amount, decimals);
    shown.rescale(decimals);
    format!("{shown} {}", money.currency)
}
