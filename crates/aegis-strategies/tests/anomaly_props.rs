//! Property tests for the anomaly-guard arithmetic.
//!
//! Run with:
//!   cargo test -p aegis-strategies --test anomaly_props

use proptest::prelude::*;

use aegis_core::constants::{ANOMALY_THRESHOLD_BPS, PRICE_SCALE};
use aegis_strategies::anomaly::{assess, ema, realized_price};

proptest! {
    /// The EMA is a convex combination: the updated average always lies
    /// between the old average and the sample.
    #[test]
    fn ema_stays_between_inputs(
        avg in 1u128..1_000_000_000_000_000_000_000_000,
        sample in 1u128..1_000_000_000_000_000_000_000_000,
    ) {
        let next = ema(avg, sample);
        let lo = avg.min(sample);
        let hi = avg.max(sample);
        // Truncating division may undershoot the lower bound by at most 1.
        prop_assert!(next + 1 >= lo);
        prop_assert!(next <= hi);
    }

    /// Deviation is symmetric around the average.
    #[test]
    fn deviation_is_symmetric(
        avg in 1u128..1_000_000_000_000_000_000,
        delta in 0u128..1_000_000_000_000_000_000,
    ) {
        let up = assess(avg, avg + delta);
        let down = assess(avg, avg.saturating_sub(delta));
        if delta <= avg {
            prop_assert_eq!(up.deviation_bps, down.deviation_bps);
            prop_assert_eq!(up.anomalous, down.anomalous);
        }
    }

    /// The trip decision is exactly "strictly above the threshold".
    #[test]
    fn trip_matches_threshold(
        avg in 1_000_000u128..1_000_000_000_000_000_000,
        realized in 1u128..2_000_000_000_000_000_000,
    ) {
        let a = assess(avg, realized);
        prop_assert_eq!(a.anomalous, a.deviation_bps > ANOMALY_THRESHOLD_BPS);
    }

    /// Realized price is the exact fixed-point ratio for inputs that cannot
    /// overflow, and source-per-output scales linearly in the input amount.
    #[test]
    fn realized_price_ratio(
        amount_in in 1u128..1_000_000_000_000,
        amount_out in 1u128..1_000_000_000_000,
    ) {
        let px = realized_price(amount_in, amount_out);
        prop_assert_eq!(px, amount_in * PRICE_SCALE / amount_out);
        // Doubling the input doubles the realized price.
        let px2 = realized_price(2 * amount_in, amount_out);
        prop_assert!(px2 >= 2 * px);
        prop_assert!(px2 <= 2 * px + 1);
    }
}
