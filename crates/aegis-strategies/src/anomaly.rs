//! Price-anomaly guard.
//!
//! Each accumulating strategy carries a rolling average of its realized
//! prices. When a new execution realizes a price deviating more than the
//! threshold from that average, the strategy auto-pauses: the committing
//! execution stands, the next one is prevented. The anomalous sample never
//! contaminates the average.
//!
//! All arithmetic is 18-fractional fixed point with truncating division;
//! the rounding mode is part of the contract and tests compare exact values.

use aegis_core::constants::{
    ANOMALY_THRESHOLD_BPS, EMA_KEEP_WEIGHT, EMA_SAMPLE_WEIGHT, EMA_WEIGHT_DENOM, PRICE_SCALE,
};
use aegis_core::types::{Amount, Price};

/// Result of assessing one realized price against the rolling average.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnomalyAssessment {
    pub deviation_bps: u128,
    pub anomalous: bool,
}

/// Realized price of a swap with the source token as the unit:
/// `amount_in · 10^18 / amount_out`.
pub fn realized_price(amount_in: Amount, amount_out: Amount) -> Price {
    if amount_out == 0 {
        return 0;
    }
    match amount_in.checked_mul(PRICE_SCALE) {
        Some(scaled) => scaled / amount_out,
        // Inputs large enough to overflow 128 bits lose sub-unit precision.
        None => (amount_in / amount_out).saturating_mul(PRICE_SCALE),
    }
}

/// Compare `realized` against `rolling_avg`. A deviation of exactly the
/// threshold does not trip; threshold + ε does.
pub fn assess(rolling_avg: Price, realized: Price) -> AnomalyAssessment {
    if rolling_avg == 0 {
        return AnomalyAssessment {
            deviation_bps: 0,
            anomalous: false,
        };
    }
    let diff = rolling_avg.abs_diff(realized);
    let deviation_bps = match diff.checked_mul(10_000) {
        Some(scaled) => scaled / rolling_avg,
        None => (diff / rolling_avg).saturating_mul(10_000),
    };
    AnomalyAssessment {
        deviation_bps,
        anomalous: deviation_bps > ANOMALY_THRESHOLD_BPS,
    }
}

/// Advance the rolling average: `avg ← (7·avg + 3·sample) / 10`.
pub fn ema(rolling_avg: Price, sample: Price) -> Price {
    (rolling_avg * EMA_KEEP_WEIGHT + sample * EMA_SAMPLE_WEIGHT) / EMA_WEIGHT_DENOM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realized_price_source_as_unit() {
        // 20e6 in, 10e18 out: each output unit cost 2e-12 source units.
        assert_eq!(realized_price(20_000_000, 10_000_000_000_000_000_000), 2_000_000);
        // Equal amounts realize exactly 1.0.
        assert_eq!(realized_price(5, 5), PRICE_SCALE);
        assert_eq!(realized_price(5, 0), 0);
    }

    #[test]
    fn threshold_is_exclusive() {
        // Exactly 20% deviation does not trip.
        let avg = PRICE_SCALE;
        let exactly = avg + avg / 5;
        let a = assess(avg, exactly);
        assert_eq!(a.deviation_bps, 2_000);
        assert!(!a.anomalous);

        // One over trips.
        let over = exactly + avg / 10_000;
        assert!(assess(avg, over).anomalous);
    }

    #[test]
    fn deviation_is_symmetric() {
        let avg = 10 * PRICE_SCALE;
        let down = assess(avg, 7 * PRICE_SCALE);
        assert_eq!(down.deviation_bps, 3_000);
        assert!(down.anomalous);
        let up = assess(avg, 13 * PRICE_SCALE);
        assert_eq!(up.deviation_bps, 3_000);
        assert!(up.anomalous);
    }

    #[test]
    fn hundred_percent_deviation() {
        let a = assess(PRICE_SCALE, 2 * PRICE_SCALE);
        assert_eq!(a.deviation_bps, 10_000);
        assert!(a.anomalous);
    }

    #[test]
    fn ema_truncates() {
        // (7·100 + 3·110) / 10 = 103
        assert_eq!(ema(100, 110), 103);
        // (7·100 + 3·101) / 10 = 1003 / 10 → 100 (truncating)
        assert_eq!(ema(100, 101), 100);
    }

    #[test]
    fn zero_average_never_anomalous() {
        assert!(!assess(0, 55 * PRICE_SCALE).anomalous);
    }
}
