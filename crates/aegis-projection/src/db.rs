//! Sled-backed projection store.
//!
//! Named trees, one per read-model table:
//!   user                 — address bytes            → bincode(UserRow)
//!   shield               — address bytes            → bincode(ShieldRow)
//!   dca_strategy         — id bytes                 → bincode(DcaStrategyRow)
//!   dca_execution        — txhash ‖ log_index BE    → bincode(DcaExecutionRow)
//!   stop_loss_strategy   — id bytes                 → bincode(StopLossRow)
//!   stop_loss_execution  — txhash ‖ log_index BE    → bincode(StopLossExecutionRow)
//!   rebalance_strategy   — id bytes                 → bincode(RebalanceRow)
//!   rebalance_allocation — id ‖ index BE            → bincode(RebalanceAllocationRow)
//!   rebalance_execution  — txhash ‖ log_index BE    → bincode(RebalanceExecutionRow)
//!   subscription         — id bytes                 → bincode(SubscriptionRow)
//!   payment              — txhash ‖ log_index BE    → bincode(PaymentRow)
//!   token                — address bytes            → bincode(TokenRow)
//!   whitelisted_contract — user ‖ target            → bincode(WhitelistedContractRow)
//!   spending_record      — txhash ‖ log_index BE    → bincode(SpendingRecordRow)
//!   activity_log         — txhash ‖ log_index BE    → bincode(ActivityRow)
//!   daily_stats          — user ‖ "YYYY-MM-DD"      → bincode(DailyStatsRow)
//!   meta                 — utf8 key                 → bincode(GlobalStats) et al.

use serde::de::DeserializeOwned;
use serde::Serialize;

use aegis_core::error::AegisError;
use aegis_core::types::{Address, StrategyId, TxHash};

use crate::tables::*;

fn storage_err(e: impl std::fmt::Display) -> AegisError {
    AegisError::Storage(e.to_string())
}

fn codec_err(e: impl std::fmt::Display) -> AegisError {
    AegisError::Serialization(e.to_string())
}

/// `tx_hash ‖ log_index BE` composite key for append-only rows.
pub fn event_key(tx_hash: &TxHash, log_index: u32) -> [u8; 36] {
    let mut k = [0u8; 36];
    k[..32].copy_from_slice(tx_hash.as_bytes());
    k[32..].copy_from_slice(&log_index.to_be_bytes());
    k
}

fn pair_key(a: &Address, b: &Address) -> [u8; 40] {
    let mut k = [0u8; 40];
    k[..20].copy_from_slice(a.as_bytes());
    k[20..].copy_from_slice(b.as_bytes());
    k
}

fn alloc_key(id: &StrategyId, index: u32) -> [u8; 36] {
    let mut k = [0u8; 36];
    k[..32].copy_from_slice(id.as_bytes());
    k[32..].copy_from_slice(&index.to_be_bytes());
    k
}

fn daily_key(user: &Address, date: &str) -> Vec<u8> {
    let mut k = user.as_bytes().to_vec();
    k.extend_from_slice(date.as_bytes());
    k
}

const GLOBAL_STATS_KEY: &str = "global_stats";

pub struct ProjectionDb {
    user: sled::Tree,
    shield: sled::Tree,
    dca_strategy: sled::Tree,
    dca_execution: sled::Tree,
    stop_loss_strategy: sled::Tree,
    stop_loss_execution: sled::Tree,
    rebalance_strategy: sled::Tree,
    rebalance_allocation: sled::Tree,
    rebalance_execution: sled::Tree,
    subscription: sled::Tree,
    payment: sled::Tree,
    token: sled::Tree,
    whitelisted_contract: sled::Tree,
    spending_record: sled::Tree,
    activity_log: sled::Tree,
    daily_stats: sled::Tree,
    meta: sled::Tree,
}

impl ProjectionDb {
    pub fn open(db: &sled::Db) -> Result<Self, AegisError> {
        let tree = |name: &str| db.open_tree(name).map_err(storage_err);
        Ok(Self {
            user: tree("user")?,
            shield: tree("shield")?,
            dca_strategy: tree("dca_strategy")?,
            dca_execution: tree("dca_execution")?,
            stop_loss_strategy: tree("stop_loss_strategy")?,
            stop_loss_execution: tree("stop_loss_execution")?,
            rebalance_strategy: tree("rebalance_strategy")?,
            rebalance_allocation: tree("rebalance_allocation")?,
            rebalance_execution: tree("rebalance_execution")?,
            subscription: tree("subscription")?,
            payment: tree("payment")?,
            token: tree("token")?,
            whitelisted_contract: tree("whitelisted_contract")?,
            spending_record: tree("spending_record")?,
            activity_log: tree("activity_log")?,
            daily_stats: tree("daily_stats")?,
            meta: tree("meta")?,
        })
    }

    // ── Generic row codecs ───────────────────────────────────────────────────

    fn read<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>, AegisError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(codec_err)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(tree: &sled::Tree, key: &[u8], row: &T) -> Result<(), AegisError> {
        let bytes = bincode::serialize(row).map_err(codec_err)?;
        tree.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, AegisError> {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(codec_err)?);
        }
        Ok(out)
    }

    // ── Users ────────────────────────────────────────────────────────────────

    pub fn get_user(&self, addr: &Address) -> Result<Option<UserRow>, AegisError> {
        Self::read(&self.user, addr.as_bytes())
    }

    pub fn put_user(&self, row: &UserRow) -> Result<(), AegisError> {
        Self::write(&self.user, row.address.as_bytes(), row)
    }

    pub fn count_users(&self) -> u64 {
        self.user.len() as u64
    }

    // ── Shields ──────────────────────────────────────────────────────────────

    pub fn get_shield(&self, user: &Address) -> Result<Option<ShieldRow>, AegisError> {
        Self::read(&self.shield, user.as_bytes())
    }

    pub fn put_shield(&self, row: &ShieldRow) -> Result<(), AegisError> {
        Self::write(&self.shield, row.user.as_bytes(), row)
    }

    // ── DCA ──────────────────────────────────────────────────────────────────

    pub fn get_dca(&self, id: &StrategyId) -> Result<Option<DcaStrategyRow>, AegisError> {
        Self::read(&self.dca_strategy, id.as_bytes())
    }

    pub fn put_dca(&self, row: &DcaStrategyRow) -> Result<(), AegisError> {
        Self::write(&self.dca_strategy, row.id.as_bytes(), row)
    }

    pub fn iter_dca(&self) -> Result<Vec<DcaStrategyRow>, AegisError> {
        Self::scan(&self.dca_strategy)
    }

    pub fn put_dca_execution(&self, row: &DcaExecutionRow) -> Result<(), AegisError> {
        Self::write(&self.dca_execution, &event_key(&row.tx_hash, row.log_index), row)
    }

    pub fn iter_dca_executions(&self) -> Result<Vec<DcaExecutionRow>, AegisError> {
        Self::scan(&self.dca_execution)
    }

    // ── Stop-loss ────────────────────────────────────────────────────────────

    pub fn get_stop_loss(&self, id: &StrategyId) -> Result<Option<StopLossRow>, AegisError> {
        Self::read(&self.stop_loss_strategy, id.as_bytes())
    }

    pub fn put_stop_loss(&self, row: &StopLossRow) -> Result<(), AegisError> {
        Self::write(&self.stop_loss_strategy, row.id.as_bytes(), row)
    }

    pub fn iter_stop_loss(&self) -> Result<Vec<StopLossRow>, AegisError> {
        Self::scan(&self.stop_loss_strategy)
    }

    pub fn put_stop_loss_execution(&self, row: &StopLossExecutionRow) -> Result<(), AegisError> {
        Self::write(
            &self.stop_loss_execution,
            &event_key(&row.tx_hash, row.log_index),
            row,
        )
    }

    // ── Rebalance ────────────────────────────────────────────────────────────

    pub fn get_rebalance(&self, id: &StrategyId) -> Result<Option<RebalanceRow>, AegisError> {
        Self::read(&self.rebalance_strategy, id.as_bytes())
    }

    pub fn put_rebalance(&self, row: &RebalanceRow) -> Result<(), AegisError> {
        Self::write(&self.rebalance_strategy, row.id.as_bytes(), row)
    }

    pub fn iter_rebalance(&self) -> Result<Vec<RebalanceRow>, AegisError> {
        Self::scan(&self.rebalance_strategy)
    }

    /// Replace every allocation row of `id` with the given set.
    pub fn replace_allocations(
        &self,
        id: &StrategyId,
        allocations: &[(Address, u32)],
    ) -> Result<(), AegisError> {
        let mut stale = Vec::new();
        for item in self.rebalance_allocation.scan_prefix(id.as_bytes()) {
            let (k, _) = item.map_err(storage_err)?;
            stale.push(k);
        }
        for k in stale {
            self.rebalance_allocation.remove(k).map_err(storage_err)?;
        }
        for (index, (token, weight)) in allocations.iter().enumerate() {
            let row = RebalanceAllocationRow {
                strategy_id: *id,
                index: index as u32,
                token: *token,
                target_weight_bps: *weight,
            };
            Self::write(&self.rebalance_allocation, &alloc_key(id, row.index), &row)?;
        }
        Ok(())
    }

    pub fn allocations_of(&self, id: &StrategyId) -> Result<Vec<RebalanceAllocationRow>, AegisError> {
        let mut out = Vec::new();
        for item in self.rebalance_allocation.scan_prefix(id.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(codec_err)?);
        }
        Ok(out)
    }

    pub fn put_rebalance_execution(&self, row: &RebalanceExecutionRow) -> Result<(), AegisError> {
        Self::write(
            &self.rebalance_execution,
            &event_key(&row.tx_hash, row.log_index),
            row,
        )
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    pub fn get_subscription(&self, id: &StrategyId) -> Result<Option<SubscriptionRow>, AegisError> {
        Self::read(&self.subscription, id.as_bytes())
    }

    pub fn put_subscription(&self, row: &SubscriptionRow) -> Result<(), AegisError> {
        Self::write(&self.subscription, row.id.as_bytes(), row)
    }

    pub fn iter_subscriptions(&self) -> Result<Vec<SubscriptionRow>, AegisError> {
        Self::scan(&self.subscription)
    }

    pub fn put_payment(&self, row: &PaymentRow) -> Result<(), AegisError> {
        Self::write(&self.payment, &event_key(&row.tx_hash, row.log_index), row)
    }

    // ── Tokens / whitelist / spending ────────────────────────────────────────

    pub fn get_token(&self, addr: &Address) -> Result<Option<TokenRow>, AegisError> {
        Self::read(&self.token, addr.as_bytes())
    }

    pub fn put_token(&self, row: &TokenRow) -> Result<(), AegisError> {
        Self::write(&self.token, row.address.as_bytes(), row)
    }

    pub fn get_whitelisted(
        &self,
        user: &Address,
        target: &Address,
    ) -> Result<Option<WhitelistedContractRow>, AegisError> {
        Self::read(&self.whitelisted_contract, &pair_key(user, target))
    }

    pub fn put_whitelisted(&self, row: &WhitelistedContractRow) -> Result<(), AegisError> {
        Self::write(
            &self.whitelisted_contract,
            &pair_key(&row.user, &row.target),
            row,
        )
    }

    pub fn put_spending_record(&self, row: &SpendingRecordRow) -> Result<(), AegisError> {
        Self::write(
            &self.spending_record,
            &event_key(&row.tx_hash, row.log_index),
            row,
        )
    }

    pub fn count_spending_records(&self) -> u64 {
        self.spending_record.len() as u64
    }

    // ── Activity & daily stats ───────────────────────────────────────────────

    pub fn put_activity(&self, row: &ActivityRow) -> Result<(), AegisError> {
        Self::write(&self.activity_log, &event_key(&row.tx_hash, row.log_index), row)
    }

    pub fn count_activity(&self) -> u64 {
        self.activity_log.len() as u64
    }

    pub fn get_daily_stats(
        &self,
        user: &Address,
        date: &str,
    ) -> Result<Option<DailyStatsRow>, AegisError> {
        Self::read(&self.daily_stats, &daily_key(user, date))
    }

    pub fn put_daily_stats(&self, row: &DailyStatsRow) -> Result<(), AegisError> {
        Self::write(&self.daily_stats, &daily_key(&row.user, &row.date), row)
    }

    // ── Global stats ─────────────────────────────────────────────────────────

    pub fn global_stats(&self) -> Result<GlobalStats, AegisError> {
        Ok(Self::read(&self.meta, GLOBAL_STATS_KEY.as_bytes())?.unwrap_or_default())
    }

    pub fn put_global_stats(&self, stats: &GlobalStats) -> Result<(), AegisError> {
        Self::write(&self.meta, GLOBAL_STATS_KEY.as_bytes(), stats)
    }

    // ── Reset & determinism ──────────────────────────────────────────────────

    fn all_trees(&self) -> [(&'static str, &sled::Tree); 17] {
        [
            ("user", &self.user),
            ("shield", &self.shield),
            ("dca_strategy", &self.dca_strategy),
            ("dca_execution", &self.dca_execution),
            ("stop_loss_strategy", &self.stop_loss_strategy),
            ("stop_loss_execution", &self.stop_loss_execution),
            ("rebalance_strategy", &self.rebalance_strategy),
            ("rebalance_allocation", &self.rebalance_allocation),
            ("rebalance_execution", &self.rebalance_execution),
            ("subscription", &self.subscription),
            ("payment", &self.payment),
            ("token", &self.token),
            ("whitelisted_contract", &self.whitelisted_contract),
            ("spending_record", &self.spending_record),
            ("activity_log", &self.activity_log),
            ("daily_stats", &self.daily_stats),
            ("meta", &self.meta),
        ]
    }

    /// Drop every row in every table. Re-folding the event log afterwards
    /// must restore identical state.
    pub fn clear_all(&self) -> Result<(), AegisError> {
        for (_, tree) in self.all_trees() {
            tree.clear().map_err(storage_err)?;
        }
        Ok(())
    }

    /// BLAKE3 digest over every (table, key, value) triple in deterministic
    /// order. Two byte-identical projections share a fingerprint.
    pub fn fingerprint(&self) -> Result<[u8; 32], AegisError> {
        let mut hasher = blake3::Hasher::new();
        for (name, tree) in self.all_trees() {
            hasher.update(name.as_bytes());
            for item in tree.iter() {
                let (k, v) = item.map_err(storage_err)?;
                hasher.update(&(k.len() as u64).to_be_bytes());
                hasher.update(&k);
                hasher.update(&(v.len() as u64).to_be_bytes());
                hasher.update(&v);
            }
        }
        Ok(*hasher.finalize().as_bytes())
    }
}
