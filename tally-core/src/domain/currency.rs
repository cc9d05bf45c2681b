//! Currency conversion
//!
//! The only place amounts change currency. Callers pass both codes and the
//! rate table explicitly; there is no preferred-currency global.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange rates relative to a base currency
///
/// `rates[code]` is the value of one unit of `code` expressed in `base`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateTable {
    pub base_currency: String,
    #[serde(default)]
    pub rates: HashMap<String, Decimal>,
}

impl RateTable {
    pub fn new(base_currency: &str) -> Self {
        Self {
            base_currency: base_currency.trim().to_uppercase(),
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, code: &str, rate: Decimal) -> Self {
        self.rates.insert(code.trim().to_uppercase(), rate);
        self
    }

    /// Value of one unit of `code` in the base currency
    fn rate(&self, code: &str) -> Option<Decimal> {
        if code == self.base_currency {
            return Some(Decimal::ONE);
        }
        self.rates.get(code).copied().filter(|r| !r.is_zero())
    }
}

/// Convert `amount` from one currency to another
///
/// Returns `None` when either currency has no rate. Same-currency
/// conversions never consult the table.
pub fn convert(amount: Decimal, from: &str, to: &str, table: &RateTable) -> Option<Decimal> {
    let from = from.trim().to_uppercase();
    let to = to.trim().to_uppercase();
    if from == to {
        return Some(amount);
    }

    let from_rate = table.rate(&from)?;
    let to_rate = table.rate(&to)?;
    amount
        .checked_mul(from_rate)?
        .checked_div(to_rate)
        .map(|v| v.round_dp(2))
}
