//! Catch-up for consumers of the notification path.
//!
//! A consumer which missed notifications tells us the last sequence number it saw for each peer. We walk the
//! outbound log from there up to the current counters and hand back every record we can still read. Records which
//! cannot be read or decoded are skipped and reported, so one bad record never blocks the rest of the backlog.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{
    error::{RelayError, Result},
    message::{ChainId, CrossChainRequest, Direction},
    message_log::{MessageLog, record_key},
    sequence::Sequences,
    serde_util::u64_lenient,
    state::{Ledger, StateTx},
};

/// Peer -> last sequence number the consumer has seen.
pub type Snapshot = BTreeMap<ChainId, u64>;

#[derive(Deserialize)]
#[serde(transparent)]
struct LastSeen(#[serde(deserialize_with = "u64_lenient::deserialize")] u64);

/// Parse the consumer's `{peer: lastSeen}` document. Sequence numbers may be JSON numbers or decimal strings.
pub fn parse_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    let raw: BTreeMap<ChainId, LastSeen> =
        serde_json::from_slice(bytes).map_err(|e| RelayError::decode("consumer snapshot", e))?;
    Ok(raw.into_iter().map(|(peer, seen)| (peer, seen.0)).collect())
}

/// A record which was due for delivery but could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub peer: ChainId,
    pub seq: u64,
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    pub peer: ChainId,
    pub seq: u64,
    pub request: CrossChainRequest,
}

struct PeerRange {
    peer: ChainId,
    next: u64,
    end: u64,
}

/// The undelivered outbound records for a consumer, produced lazily.
///
/// Peers are visited in key order and each peer's records in ascending sequence order. Every record is attempted at
/// most once per backlog.
pub struct Backlog {
    tx: StateTx,
    pending: VecDeque<PeerRange>,
    cursor: Snapshot,
    skipped: Vec<SkippedRecord>,
}

impl Backlog {
    pub fn new(ledger: &Ledger, snapshot: &Snapshot) -> Result<Backlog> {
        let mut tx = ledger.begin();
        let counters = Sequences::new(&mut tx).get(Direction::Outbound)?;

        let mut pending = VecDeque::new();
        let mut cursor = Snapshot::new();
        for (peer, end) in counters {
            let start = snapshot.get(&peer).copied().unwrap_or(0);
            if start > end {
                warn!(%peer, start, end, "consumer is ahead of the outbound counter");
            }
            cursor.insert(peer.clone(), start);
            if start < end {
                pending.push_back(PeerRange {
                    peer,
                    next: start + 1,
                    end,
                });
            }
        }

        Ok(Backlog {
            tx,
            pending,
            cursor,
            skipped: vec![],
        })
    }

    /// How far this backlog has got. Passing this as the snapshot of a new backlog resumes after the last record
    /// attempted, whether it was yielded or skipped.
    pub fn cursor(&self) -> &Snapshot {
        &self.cursor
    }

    pub fn skipped(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    pub fn into_skipped(self) -> Vec<SkippedRecord> {
        self.skipped
    }
}

impl Iterator for Backlog {
    type Item = BacklogEntry;

    fn next(&mut self) -> Option<BacklogEntry> {
        loop {
            let range = self.pending.front_mut()?;
            if range.next > range.end {
                self.pending.pop_front();
                continue;
            }
            let seq = range.next;
            range.next += 1;
            let peer = range.peer.clone();
            self.cursor.insert(peer.clone(), seq);

            match MessageLog::new(&mut self.tx).read(Direction::Outbound, &peer, seq) {
                Ok(request) => return Some(BacklogEntry { peer, seq, request }),
                Err(e) => {
                    let key = record_key(Direction::Outbound, &peer, seq);
                    if let RelayError::NotFound { .. } = e {
                        error!(
                            %key,
                            "record missing below the outbound counter, operator intervention required"
                        );
                    } else {
                        warn!(%key, error = %e, "skipping unreadable record");
                    }
                    self.skipped.push(SkippedRecord {
                        peer,
                        seq,
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub records: Vec<CrossChainRequest>,
    pub skipped: Vec<SkippedRecord>,
}

/// Collect every outbound record the consumer has not seen yet.
pub fn reconcile(ledger: &Ledger, snapshot: &Snapshot) -> Result<Reconciliation> {
    let mut backlog = Backlog::new(ledger, snapshot)?;
    let records = backlog.by_ref().map(|entry| entry.request).collect();
    Ok(Reconciliation {
        records,
        skipped: backlog.into_skipped(),
    })
}
