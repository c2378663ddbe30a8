//! Property tests for the spending policy.
//!
//! Run with:
//!   cargo test -p aegis-shield --test properties

use proptest::prelude::*;

use aegis_core::constants::DAY_SECS;
use aegis_core::types::{Address, Amount, Timestamp};
use aegis_shield::ShieldBook;

const T0: Timestamp = 1_700_000_000;
const DAILY: Amount = 1_000_000_000;
const SINGLE_TX: Amount = 100_000_000;

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 20])
}

fn book() -> (ShieldBook, Address, Address, Address) {
    let operator = addr(0xFF);
    let executor = addr(0xE0);
    let user = addr(1);
    let mut book = ShieldBook::new(operator);
    book.authorize_executor(operator, executor).unwrap();
    book.activate(user, DAILY, SINGLE_TX, T0).unwrap();
    (book, executor, user, addr(0xA0))
}

proptest! {
    /// No sequence of spends, whatever the amounts and time gaps, can push
    /// the in-bucket counter past the daily limit; rejected spends leave the
    /// counter untouched.
    #[test]
    fn spent_today_never_exceeds_daily_limit(
        steps in proptest::collection::vec(
            (1u128..200_000_000, 0i64..(2 * DAY_SECS)),
            1..60,
        )
    ) {
        let (mut book, executor, user, token) = book();
        let mut now = T0;
        for (amount, dt) in steps {
            now += dt;
            let before = book.snapshot(user).unwrap().spent_today;
            let result = book.record_spending(executor, user, token, amount, now);
            let after = book.snapshot(user).unwrap();

            prop_assert!(after.spent_today <= DAILY);
            match result {
                Ok(()) => {
                    // An accepted spend moved the counter by exactly `amount`
                    // within the bucket it landed in.
                    prop_assert!(after.spent_today >= amount);
                }
                Err(_) => {
                    // A rejected spend mutates nothing beyond the lazy
                    // rollover.
                    prop_assert!(after.spent_today == before || after.spent_today == 0);
                    prop_assert!(after.spent_today <= before || before == 0);
                }
            }
        }
    }

    /// The dry-run view agrees with the mutating path: whenever
    /// check_spending_allowed accepts, record_spending accepts too.
    #[test]
    fn dry_run_never_lies(
        steps in proptest::collection::vec(
            (1u128..150_000_000, 0i64..DAY_SECS),
            1..40,
        )
    ) {
        let (mut book, executor, user, token) = book();
        let mut now = T0;
        for (amount, dt) in steps {
            now += dt;
            let allowed = book
                .check_spending_allowed(executor, user, token, amount, now)
                .is_ok();
            let recorded = book
                .record_spending(executor, user, token, amount, now)
                .is_ok();
            prop_assert_eq!(allowed, recorded);
        }
    }

    /// remaining_daily is exactly what one more spend may take: a spend of
    /// min(remaining, single_tx) always lands, one unit more never does.
    #[test]
    fn remaining_daily_is_tight(
        spent_steps in proptest::collection::vec(1u128..90_000_000, 0..12)
    ) {
        let (mut book, executor, user, token) = book();
        for amount in spent_steps {
            let _ = book.record_spending(executor, user, token, amount, T0);
        }
        let remaining = book.remaining_daily(user, token, T0);
        prop_assert!(remaining <= DAILY);

        let probe = remaining.min(SINGLE_TX);
        if probe > 0 {
            prop_assert!(book
                .check_spending_allowed(executor, user, token, probe, T0)
                .is_ok());
        }
        if remaining < SINGLE_TX {
            prop_assert!(book
                .check_spending_allowed(executor, user, token, remaining + 1, T0)
                .is_err());
        }
    }
}
