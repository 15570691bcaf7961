//! Per-peer sequence counters, one record per direction.

use std::collections::BTreeMap;

use tracing::trace;

use crate::{
    error::{RelayError, Result},
    message::{ChainId, Direction},
    state::StateTx,
};

/// Peer -> last used sequence number. Zero (or absence) means no message has been assigned yet.
pub type Counters = BTreeMap<ChainId, u64>;

const OUTBOUND_COUNTERS: &str = "outer-meta";
const INBOUND_COUNTERS: &str = "inner-meta";

fn counters_key(direction: Direction) -> &'static str {
    match direction {
        Direction::Outbound => OUTBOUND_COUNTERS,
        Direction::Inbound => INBOUND_COUNTERS,
    }
}

/// The counters as seen through one transaction. Each direction's mapping is read, changed and written back whole;
/// the ledger's conflict detection serialises concurrent writers.
pub struct Sequences<'tx> {
    tx: &'tx mut StateTx,
}

impl<'tx> Sequences<'tx> {
    pub fn new(tx: &'tx mut StateTx) -> Self {
        Sequences { tx }
    }

    pub fn get(&mut self, direction: Direction) -> Result<Counters> {
        let Some(bytes) = self.tx.get(counters_key(direction))? else {
            return Ok(Counters::new());
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            RelayError::Storage(format!("malformed {direction} counter record: {e}"))
        })
    }

    pub fn put(&mut self, direction: Direction, counters: &Counters) -> Result<()> {
        let bytes = serde_json::to_vec(counters)
            .map_err(|e| RelayError::Storage(format!("cannot encode counters: {e}")))?;
        self.tx.put(counters_key(direction), bytes);
        Ok(())
    }

    /// The raw stored record, as handed to administrative callers. Empty if the record was never written.
    pub fn raw(&mut self, direction: Direction) -> Result<Vec<u8>> {
        Ok(self.tx.get(counters_key(direction))?.unwrap_or_default())
    }

    /// Write an empty mapping for `direction` if there is no record yet.
    pub fn ensure_initialized(&mut self, direction: Direction) -> Result<()> {
        if self.tx.get(counters_key(direction))?.is_none() {
            self.put(direction, &Counters::new())?;
        }
        Ok(())
    }

    pub fn current(&mut self, direction: Direction, peer: &ChainId) -> Result<u64> {
        Ok(self.get(direction)?.get(peer).copied().unwrap_or(0))
    }

    /// Increment the counter for `peer` and return the new value, which is the sequence number to use.
    pub fn next(&mut self, direction: Direction, peer: &ChainId) -> Result<u64> {
        let mut counters = self.get(direction)?;
        let counter = counters.entry(peer.clone()).or_insert(0);
        *counter = counter.checked_add(1).ok_or_else(|| {
            RelayError::Inconsistent(format!("{direction} sequence for {peer} is exhausted"))
        })?;
        let seq = *counter;
        self.put(direction, &counters)?;
        trace!(%direction, %peer, seq, "assigned sequence number");
        Ok(seq)
    }
}
