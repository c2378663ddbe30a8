//! Append-only event log.
//!
//! Keys are `block_number (u64 BE) ‖ log_index (u32 BE)` so the sled
//! iteration order is the event total order. The custodial runtime stamps
//! one block per execution batch; log indexes count within the block.

use aegis_core::error::AegisError;
use aegis_core::event::{Event, EventKind};
use aegis_core::types::{Timestamp, TxHash};

fn storage_err(e: impl std::fmt::Display) -> AegisError {
    AegisError::Storage(e.to_string())
}

fn codec_err(e: impl std::fmt::Display) -> AegisError {
    AegisError::Serialization(e.to_string())
}

fn key(block: u64, log_index: u32) -> [u8; 12] {
    let mut k = [0u8; 12];
    k[..8].copy_from_slice(&block.to_be_bytes());
    k[8..].copy_from_slice(&log_index.to_be_bytes());
    k
}

/// Synthetic transaction hash for off-chain stamped events.
fn synth_tx_hash(block: u64, log_index: u32, kind: &EventKind) -> Result<TxHash, AegisError> {
    let payload = bincode::serialize(kind).map_err(codec_err)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&block.to_be_bytes());
    hasher.update(&log_index.to_be_bytes());
    hasher.update(&payload);
    Ok(TxHash::from_bytes(*hasher.finalize().as_bytes()))
}

pub struct EventLog {
    tree: sled::Tree,
    next_block: u64,
}

impl EventLog {
    /// Open the log tree, resuming the block counter from the last key.
    pub fn open(db: &sled::Db) -> Result<Self, AegisError> {
        let tree = db.open_tree("event_log").map_err(storage_err)?;
        let next_block = match tree.last().map_err(storage_err)? {
            Some((k, _)) => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&k[..8]);
                u64::from_be_bytes(arr) + 1
            }
            None => 1,
        };
        Ok(Self { tree, next_block })
    }

    /// Stamp and persist a batch of event kinds as one block. Returns the
    /// stamped events in log order.
    pub fn append_block(
        &mut self,
        kinds: Vec<EventKind>,
        timestamp: Timestamp,
    ) -> Result<Vec<Event>, AegisError> {
        if kinds.is_empty() {
            return Ok(vec![]);
        }
        let block = self.next_block;
        let mut stamped = Vec::with_capacity(kinds.len());
        for (i, kind) in kinds.into_iter().enumerate() {
            let log_index = i as u32;
            let tx_hash = synth_tx_hash(block, log_index, &kind)?;
            let event = Event {
                block_number: block,
                log_index,
                tx_hash,
                timestamp,
                kind,
            };
            let bytes = bincode::serialize(&event).map_err(codec_err)?;
            self.tree
                .insert(key(block, log_index), bytes)
                .map_err(storage_err)?;
            stamped.push(event);
        }
        self.next_block += 1;
        Ok(stamped)
    }

    /// Every event in `(block, log_index)` order.
    pub fn iter_all(&self) -> Result<Vec<Event>, AegisError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(codec_err)?);
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::types::Address;

    fn temp_db(tag: &str) -> sled::Db {
        let path = std::env::temp_dir().join(format!("aegis_log_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        sled::open(path).unwrap()
    }

    fn user_event(b: u8) -> EventKind {
        EventKind::EmergencyEnabled {
            user: Address::from_bytes([b; 20]),
        }
    }

    #[test]
    fn append_stamps_total_order() {
        let db = temp_db("order");
        let mut log = EventLog::open(&db).unwrap();

        let first = log
            .append_block(vec![user_event(1), user_event(2)], 100)
            .unwrap();
        assert_eq!(first[0].block_number, 1);
        assert_eq!(first[0].log_index, 0);
        assert_eq!(first[1].log_index, 1);

        let second = log.append_block(vec![user_event(3)], 200).unwrap();
        assert_eq!(second[0].block_number, 2);

        let all = log.iter_all().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| (w[0].block_number, w[0].log_index)
            < (w[1].block_number, w[1].log_index)));
    }

    #[test]
    fn block_counter_resumes_after_reopen() {
        let path = std::env::temp_dir().join(format!("aegis_log_resume_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        {
            let db = sled::open(&path).unwrap();
            let mut log = EventLog::open(&db).unwrap();
            log.append_block(vec![user_event(1)], 100).unwrap();
            log.append_block(vec![user_event(2)], 101).unwrap();
        }
        let db = sled::open(&path).unwrap();
        let log = EventLog::open(&db).unwrap();
        assert_eq!(log.next_block(), 3);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn tx_hashes_are_position_dependent() {
        let db = temp_db("hash");
        let mut log = EventLog::open(&db).unwrap();
        let events = log
            .append_block(vec![user_event(1), user_event(1)], 100)
            .unwrap();
        // Identical payloads at different positions hash differently.
        assert_ne!(events[0].tx_hash, events[1].tx_hash);
    }

    #[test]
    fn empty_batch_consumes_no_block() {
        let db = temp_db("empty");
        let mut log = EventLog::open(&db).unwrap();
        assert!(log.append_block(vec![], 100).unwrap().is_empty());
        assert_eq!(log.next_block(), 1);
    }
}
