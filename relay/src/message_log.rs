//! The append-only log of every request this relay sent or received.

use tracing::error;

use crate::{
    error::{RelayError, Result},
    message::{ChainId, CrossChainRequest, Direction},
    state::StateTx,
};

/// The storage key of the record for `(direction, peer, seq)`.
///
/// The sequence number is written in canonical decimal and contains no `-`, so the last `-` in a key always
/// separates the peer from the sequence number and no two triples share a key. The direction prefixes cannot collide
/// with each other or with the counter and configuration keys.
pub fn record_key(direction: Direction, peer: &ChainId, seq: u64) -> String {
    match direction {
        Direction::Outbound => format!("out-msg-{peer}-{seq}"),
        Direction::Inbound => format!("in-msg-{peer}-{seq}"),
    }
}

pub struct MessageLog<'tx> {
    tx: &'tx mut StateTx,
}

impl<'tx> MessageLog<'tx> {
    pub fn new(tx: &'tx mut StateTx) -> Self {
        MessageLog { tx }
    }

    /// Write the record for `(direction, peer, seq)`. Records are write-once: finding one already there means the
    /// counter fell behind the log.
    pub fn append(
        &mut self,
        direction: Direction,
        peer: &ChainId,
        seq: u64,
        request: &CrossChainRequest,
    ) -> Result<()> {
        let key = record_key(direction, peer, seq);
        if self.tx.get(&key)?.is_some() {
            error!(%key, "record already exists, operator intervention required");
            return Err(RelayError::Inconsistent(format!(
                "{direction} record for {peer} at sequence {seq} already exists"
            )));
        }
        let body = request
            .canonical_bytes()
            .map_err(|e| RelayError::Storage(format!("cannot encode record {key}: {e}")))?;
        self.tx.put(&key, body);
        Ok(())
    }

    /// The stored bytes of a record, exactly as written.
    pub fn read_raw(&mut self, direction: Direction, peer: &ChainId, seq: u64) -> Result<Vec<u8>> {
        self.tx
            .get(&record_key(direction, peer, seq))?
            .ok_or_else(|| RelayError::NotFound {
                direction,
                peer: peer.clone(),
                seq,
            })
    }

    pub fn read(
        &mut self,
        direction: Direction,
        peer: &ChainId,
        seq: u64,
    ) -> Result<CrossChainRequest> {
        let bytes = self.read_raw(direction, peer, seq)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RelayError::decode(record_key(direction, peer, seq), e))
    }
}
