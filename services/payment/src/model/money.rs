use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

// ISO-4217 currencies without minor unit, payment gateways express amounts of
// these currencies in whole units instead of cents
const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

const MINOR_UNIT_SCALE: u32 = 2;

#[derive(Debug, PartialEq)]
pub enum MoneyError {
    Overflow(Decimal),
}

pub fn is_zero_decimal(currency: &str) -> bool {
    let label = currency.trim().to_uppercase();
    ZERO_DECIMAL_CURRENCIES.contains(&label.as_str())
}

fn round_half_away(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts an amount into whole currency units, which is how every ledger
/// month stores its paid amount.
///
/// For zero-decimal currencies the amount is rounded to whole units right
/// away. For other currencies the amount is first scaled to minor units and
/// rounded there (same as what a gateway would charge), then brought back and
/// rounded to whole units.
pub fn to_whole_units(amount: Decimal, currency: &str) -> Result<i64, MoneyError> {
    let rounded = if is_zero_decimal(currency) {
        round_half_away(amount, 0)
    } else {
        let scale = Decimal::from(10i64.pow(MINOR_UNIT_SCALE));
        let scaled = amount
            .checked_mul(scale)
            .ok_or(MoneyError::Overflow(amount))?;
        let minor = round_half_away(scaled, 0);
        round_half_away(minor / scale, 0)
    };
    rounded.to_i64().ok_or(MoneyError::Overflow(amount))
}

/// amount received from gateway API (e.g. `amount_total` of a checkout
/// session) is expressed in the smallest currency unit
pub fn from_gateway_minor(amount: i64, currency: &str) -> Decimal {
    if is_zero_decimal(currency) {
        Decimal::from(amount)
    } else {
        Decimal::new(amount, MINOR_UNIT_SCALE)
    }
}

/// Splits `total` into `num_parts` shares, every share is `floor(total / n)`
/// except the last one which absorbs the remainder, so the shares always sum
/// up to `total`.
pub fn split_with_remainder(total: i64, num_parts: usize) -> Vec<i64> {
    if num_parts == 0 {
        return Vec::new();
    }
    let n = num_parts as i64;
    let base = total.div_euclid(n);
    let last = total - base * (n - 1);
    let mut out = vec![base; num_parts - 1];
    out.push(last);
    out
}

/// The only place deciding how much of a proposed allocation can be applied
/// to a month: the result never brings `already_paid` above `class_fee` and
/// is never negative.
pub fn clamp_allocation(already_paid: i64, class_fee: i64, proposed: i64) -> i64 {
    let room = class_fee.saturating_sub(already_paid).max(0);
    proposed.clamp(0, room)
}
