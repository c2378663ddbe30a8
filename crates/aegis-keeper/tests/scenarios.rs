//! End-to-end scenarios driven through the platform command surface with a
//! manual clock: the daily-limit gate, the DCA cadence, the anomaly
//! auto-pause, the trailing stop, the emergency-withdraw timelock, and a
//! one-sided rebalance.
//!
//! Run with:
//!   cargo test -p aegis-keeper --test scenarios

use std::sync::Arc;
use std::time::Duration;

use aegis_adapters::{Clock, ManualClock, WalletAdapter};
use aegis_core::constants::PRICE_SCALE;
use aegis_core::error::AegisError;
use aegis_core::event::EventKind;
use aegis_core::types::{Address, StrategyId, StrategyStatus};
use aegis_keeper::{Command, Keeper, KeeperOptions, Platform, PlatformConfig};
use aegis_strategies::{
    DcaCreateParams, RebalanceCreateParams, StopLossCreateParams, StopLossTrigger,
};

const T0: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 20])
}

const OPERATOR: u8 = 0xFF;
const EXECUTOR: u8 = 0xE0;
const ALICE: u8 = 0x01;
const USDC: u8 = 0xA0;
const WETH: u8 = 0xB0;

fn open_platform(tag: &str, clock: Arc<ManualClock>) -> Platform {
    let path = std::env::temp_dir().join(format!("aegis_scenarios_{}_{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&path);
    Platform::open(
        &path,
        &PlatformConfig {
            operator: addr(OPERATOR),
            executor: addr(EXECUTOR),
            numeraire: addr(USDC),
            venue: addr(0xEE),
            fee_recipient: addr(0xFE),
        },
        clock,
    )
    .unwrap()
}

fn activate_shield(platform: &mut Platform, user: Address, daily: u128, single: u128) {
    platform
        .apply(Command::ActivateShield {
            user,
            daily_limit: daily,
            single_tx_limit: single,
        })
        .unwrap();
}

// ── Scenario 1: daily-limit gate ─────────────────────────────────────────────

#[test]
fn daily_limit_gate() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut platform = open_platform("limit_gate", Arc::clone(&clock));
    let alice = addr(ALICE);
    let usdc = addr(USDC);
    activate_shield(&mut platform, alice, 1_000_000_000, 100_000_000);

    // Ten spends of 100e6 fill the day exactly.
    let executor = platform.executor();
    for _ in 0..10 {
        platform
            .shield
            .record_spending(executor, alice, usdc, 100_000_000, clock.now())
            .unwrap();
    }
    assert_eq!(platform.shield.snapshot(alice).unwrap().spent_today, 1_000_000_000);

    // The eleventh spend of even 1e6 fails with zero remaining.
    let err = platform
        .shield
        .record_spending(executor, alice, usdc, 1_000_000, clock.now())
        .unwrap_err();
    assert_eq!(
        err,
        AegisError::ExceedsDaily {
            amount: 1_000_000,
            remaining: 0
        }
    );

    // A day later the bucket is fresh.
    clock.advance(DAY);
    platform
        .shield
        .record_spending(executor, alice, usdc, 100_000_000, clock.now())
        .unwrap();
    assert_eq!(platform.shield.snapshot(alice).unwrap().spent_today, 100_000_000);
}

// ── Scenario 2: DCA happy path ───────────────────────────────────────────────

fn create_dca(platform: &mut Platform, owner: Address) -> StrategyId {
    platform
        .apply(Command::CreateDca {
            owner,
            params: DcaCreateParams {
                source_token: addr(USDC),
                target_token: addr(WETH),
                amount_per_execution: 20_000_000,
                min_amount_out: 0,
                interval_s: DAY,
                total_executions: 30,
                pool_fee_bps: 30,
            },
        })
        .unwrap()
        .strategy_id
        .unwrap()
}

#[test]
fn dca_happy_path() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut platform = open_platform("dca_happy", Arc::clone(&clock));
    let alice = addr(ALICE);
    activate_shield(&mut platform, alice, 100_000 * PRICE_SCALE, 50_000 * PRICE_SCALE);
    platform.wallet().credit(alice, addr(USDC), 10_000_000_000);
    platform.exchange().set_rate(addr(USDC), addr(WETH), PRICE_SCALE);

    let id = create_dca(&mut platform, alice);

    // Execute at t = 0: immediately due.
    platform.apply(Command::ExecuteDca { id }).unwrap();
    let s = platform.dca.get(&id).unwrap();
    assert_eq!(s.executions_completed, 1);
    assert_eq!(s.next_execution_time, T0 + DAY);

    // t = 1: too early, with the due time in the error.
    clock.advance(1);
    let err = platform.apply(Command::ExecuteDca { id }).unwrap_err();
    assert_eq!(err, AegisError::ExecutionTooEarly { due_at: T0 + DAY });

    // At the interval boundary it runs again.
    clock.set(T0 + DAY);
    platform.apply(Command::ExecuteDca { id }).unwrap();
    assert_eq!(platform.dca.get(&id).unwrap().executions_completed, 2);
}

// ── Scenario 3: price anomaly auto-pause ─────────────────────────────────────

#[tokio::test]
async fn price_anomaly_auto_pause() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut platform = open_platform("anomaly", Arc::clone(&clock));
    let alice = addr(ALICE);
    activate_shield(&mut platform, alice, 100_000 * PRICE_SCALE, 50_000 * PRICE_SCALE);
    platform.wallet().credit(alice, addr(USDC), 10_000_000_000);
    platform.exchange().set_rate(addr(USDC), addr(WETH), PRICE_SCALE);

    let id = create_dca(&mut platform, alice);

    // First execution realizes price 1.0 and seeds the average.
    platform.apply(Command::ExecuteDca { id }).unwrap();
    assert_eq!(platform.dca.get(&id).unwrap().rolling_avg_price, PRICE_SCALE);

    // Second execution realizes price 2.0: 100% deviation.
    clock.advance(DAY);
    platform.exchange().force_next_output(10_000_000);
    let outcome = platform.apply(Command::ExecuteDca { id }).unwrap();

    // The execution commits; the pause is a post-condition.
    assert_eq!(outcome.amount_out, Some(10_000_000));
    let s = platform.dca.get(&id).unwrap();
    assert_eq!(s.status, StrategyStatus::Paused);
    assert_eq!(s.rolling_avg_price, PRICE_SCALE, "anomalous sample excluded");
    assert!(outcome.events.iter().any(|e| matches!(
        e.kind,
        EventKind::DcaAutoPaused {
            rolling_avg_price: avg,
            realized_price: cur,
            deviation_bps: 10_000,
            ..
        } if avg == PRICE_SCALE && cur == 2 * PRICE_SCALE
    )));

    // A subsequent scheduler tick does not select the paused strategy.
    clock.advance(DAY);
    let (mut keeper, _tx) = Keeper::new(
        platform,
        KeeperOptions {
            spacing: Duration::ZERO,
            ..KeeperOptions::default()
        },
    );
    let report = keeper.tick().await;
    assert_eq!(report.selected, 0);
}

// ── Scenario 4: trailing stop follows the peak ───────────────────────────────

#[test]
fn trailing_stop_follows_peak() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut platform = open_platform("trailing", Arc::clone(&clock));
    let alice = addr(ALICE);
    let weth = addr(WETH);
    let usdc = addr(USDC);
    activate_shield(&mut platform, alice, 100_000 * PRICE_SCALE, 50_000 * PRICE_SCALE);
    platform.wallet().credit(alice, weth, PRICE_SCALE);
    // 1 WETH (1e18 base units) settles for 2600 USDC (2.6e9 base units).
    platform.exchange().set_rate(weth, usdc, 2_600_000_000);
    platform.oracle().set_price(weth, 2_500 * PRICE_SCALE);

    let id = platform
        .apply(Command::CreateStopLoss {
            owner: alice,
            params: StopLossCreateParams {
                token_to_sell: weth,
                token_to_receive: usdc,
                amount: PRICE_SCALE,
                trigger: StopLossTrigger::TrailingStop { distance_bps: 1_000 },
                min_amount_out: 0,
                pool_fee_bps: 30,
            },
        })
        .unwrap()
        .strategy_id
        .unwrap();
    assert_eq!(platform.stop_loss.get(&id).unwrap().trigger_price, 2_250 * PRICE_SCALE);

    // Rally to 3000: the peak re-anchors, nothing fires.
    platform.oracle().set_price(weth, 3_000 * PRICE_SCALE);
    let oracle = Arc::clone(platform.oracle());
    let (fire, _) = platform.stop_loss.should_trigger(&id, oracle.as_ref()).unwrap();
    assert!(!fire);
    let s = platform.stop_loss.get(&id).unwrap();
    assert_eq!(s.highest_price, 3_000 * PRICE_SCALE);
    assert_eq!(s.trigger_price, 2_700 * PRICE_SCALE);

    // Drop to 2600: below the re-anchored trigger, the sale executes.
    platform.oracle().set_price(weth, 2_600 * PRICE_SCALE);
    let outcome = platform.apply(Command::ExecuteStopLoss { id }).unwrap();
    assert!(outcome.amount_out.unwrap() > 0);
    let s = platform.stop_loss.get(&id).unwrap();
    assert_eq!(s.status, StrategyStatus::Completed);
    assert_eq!(s.executed_amount, PRICE_SCALE);
}

// ── Scenario 5: emergency withdraw timelock ──────────────────────────────────

#[test]
fn emergency_withdraw_timelock() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut platform = open_platform("timelock", Arc::clone(&clock));
    let operator = addr(OPERATOR);
    let usdc = addr(USDC);
    let rescue = addr(0x0D);
    platform.wallet().credit_custody(usdc, 1_000_000_000);

    platform
        .apply(Command::ProposeEmergencyWithdraw {
            caller: operator,
            token: usdc,
            to: rescue,
            amount: 1_000_000_000,
        })
        .unwrap();

    // 47h59m59s after the proposal: still locked.
    clock.set(T0 + 48 * 3_600 - 1);
    let err = platform
        .apply(Command::ExecuteEmergencyWithdraw { caller: operator })
        .unwrap_err();
    assert_eq!(
        err,
        AegisError::TimelockNotExpired {
            execute_after: T0 + 48 * 3_600
        }
    );

    // Exactly 48h: the transfer clears and the slot empties.
    clock.set(T0 + 48 * 3_600);
    platform
        .apply(Command::ExecuteEmergencyWithdraw { caller: operator })
        .unwrap();
    assert_eq!(platform.wallet().balance_of(rescue, usdc), 1_000_000_000);

    let err = platform
        .apply(Command::ExecuteEmergencyWithdraw { caller: operator })
        .unwrap_err();
    assert_eq!(err, AegisError::NoPendingProposal);
}

// ── Scenario 6: one-sided rebalance ──────────────────────────────────────────

#[test]
fn rebalance_one_sided_sell() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut platform = open_platform("rebalance", Arc::clone(&clock));
    let alice = addr(ALICE);
    let usdc = addr(USDC);
    let weth = addr(WETH);
    activate_shield(&mut platform, alice, u128::MAX / 4, u128::MAX / 8);

    // 6000 USDC + 6 WETH; per-base-unit prices value them 6000 vs 15000,
    // so WETH is far overweight against a 60/40 USDC/WETH target.
    platform.wallet().credit(alice, usdc, 6_000_000_000);
    platform.wallet().credit(alice, weth, 6 * PRICE_SCALE);
    platform.oracle().set_price(usdc, 1_000_000_000_000);
    platform.oracle().set_price(weth, 2_500);
    platform.exchange().set_rate(weth, usdc, 2_500_000_000);

    let id = platform
        .apply(Command::CreateRebalance {
            owner: alice,
            params: RebalanceCreateParams {
                allocations: vec![(usdc, 6_000), (weth, 4_000)],
                rebalance_threshold_bps: 500,
                min_interval_s: 3_600,
                pool_fee_bps: 30,
            },
        })
        .unwrap()
        .strategy_id
        .unwrap();

    assert!(platform
        .rebalance
        .needs_rebalance(&id, platform.oracle().as_ref(), platform.wallet().as_ref(), clock.now())
        .unwrap());

    let outcome = platform.apply(Command::ExecuteRebalance { id }).unwrap();
    assert_eq!(outcome.amount_out, Some(1), "a single WETH sell leg");

    // The surplus sold into the hub; weights now sit on target.
    assert_eq!(platform.wallet().balance_of(alice, usdc), 12_600_000_000);
    assert_eq!(platform.wallet().balance_of(alice, weth), 3_360_000_000_000_000_000);
    let s = platform.rebalance.get(&id).unwrap();
    assert_eq!(s.total_rebalances, 1);
    assert_eq!(s.last_rebalance_time, clock.now());
    assert!(!platform
        .rebalance
        .needs_rebalance(
            &id,
            platform.oracle().as_ref(),
            platform.wallet().as_ref(),
            clock.now() + 7_200
        )
        .unwrap());
}

// ── Projection integrity across a full flow ──────────────────────────────────

#[tokio::test]
async fn full_flow_projection_refold_is_identical() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut platform = open_platform("refold", Arc::clone(&clock));
    let alice = addr(ALICE);
    activate_shield(&mut platform, alice, 100_000 * PRICE_SCALE, 50_000 * PRICE_SCALE);
    platform.wallet().credit(alice, addr(USDC), 10_000_000_000);
    platform.exchange().set_rate(addr(USDC), addr(WETH), PRICE_SCALE);
    create_dca(&mut platform, alice);

    let (mut keeper, _tx) = Keeper::new(
        platform,
        KeeperOptions {
            spacing: Duration::ZERO,
            ..KeeperOptions::default()
        },
    );
    for _ in 0..3 {
        keeper.tick().await;
        clock.advance(DAY);
    }

    let platform = keeper.platform_mut();
    let stats = platform.projection().db().global_stats().unwrap();
    assert_eq!(stats.dca.executions, 3);

    let before = platform.projection().db().fingerprint().unwrap();
    platform.refold_projection().unwrap();
    let after = platform.projection().db().fingerprint().unwrap();
    assert_eq!(before, after);
}
