//! wei/second <-> USD/hour conversion and the order-price decision rule.

use rust_decimal::Decimal;

use crate::domain::{PriceHuman, PricingError};

const SECONDS_PER_HOUR: u64 = 3600;

/// `1e18`, expressed without float literals so the conversion stays exact.
fn wei_per_eth() -> Decimal {
    Decimal::from(1_000_000_000_000_000_000u128)
}

/// `wei_per_second * 3600 / 1e18 = USD/hour`.
pub fn wei_per_second_to_usd_per_hour(wei_per_second: u128) -> PriceHuman {
    let wei = Decimal::from(wei_per_second);
    let hour = wei * Decimal::from(SECONDS_PER_HOUR) / wei_per_eth();
    PriceHuman(hour.round_dp(4))
}

/// Inverse of [`wei_per_second_to_usd_per_hour`].
pub fn usd_per_hour_to_wei_per_second(usd_per_hour: Decimal) -> u128 {
    let wei = usd_per_hour * wei_per_eth() / Decimal::from(SECONDS_PER_HOUR);
    wei.round()
        .to_string()
        .parse()
        .expect("wei amount always fits in u128 for realistic USD/hour inputs")
}

/// The order-price decision rule: `P_desired = P_pred * (1 + coefficient/100)`
/// when a prediction is available, else `P_desired = max_price`; the final
/// price is `min(P_desired, max_price)` when a cap is configured, or
/// `P_desired` alone when it isn't. If neither a prediction nor a cap is
/// available, this tick cannot produce an order.
pub fn decide_order_price(
    tag: &str,
    predicted: Option<Decimal>,
    max_price: Option<Decimal>,
    coefficient_pct: i64,
) -> Result<Decimal, PricingError> {
    let markup = Decimal::ONE + Decimal::from(coefficient_pct) / Decimal::from(100);
    let desired = match (predicted, max_price) {
        (Some(p), _) => p * markup,
        (None, Some(cap)) => cap,
        (None, None) => return Err(PricingError::NoPriceAvailable(tag.to_string())),
    };

    Ok(match max_price {
        Some(cap) => desired.min(cap),
        None => desired,
    })
}
