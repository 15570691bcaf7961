//! The relay itself: sequencing, logging and delivery of cross-chain requests, plus the local and administrative
//! operations the mediator uses.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::{
    contract::{self, LocalContract},
    error::{RelayError, Result},
    mediator::MediatorTransport,
    message::{ChainId, CrossChainRequest, Direction, OperationClass, SignedEnvelope},
    message_log::MessageLog,
    reconcile::{self, Snapshot},
    sequence::Sequences,
    signer::{self, RequestSignature, SecretKey},
    state::{Ledger, StateTx},
};

/// The topic on which modify-class requests are announced.
pub const INTERCHAIN_EVENT_NAME: &str = "interchain-event-name";

const PRIVATE_KEY: &str = "private-key";
const MEDIATOR_ADDRESS: &str = "mediator-address";

/// How a request leaves the relay once it has been sequenced and logged.
#[derive(Debug)]
pub enum Delivery {
    /// Signed and posted to the mediator; the caller waits for the answer.
    Query {
        endpoint: String,
        signature: RequestSignature,
    },
    /// Announced unsigned on [INTERCHAIN_EVENT_NAME] when the transaction commits; the caller does not wait.
    Notify,
}

pub struct Relay {
    ledger: Ledger,
    mediator: Arc<dyn MediatorTransport>,
    contract: Arc<dyn LocalContract>,
}

impl Relay {
    pub fn new(
        ledger: Ledger,
        mediator: Arc<dyn MediatorTransport>,
        contract: Arc<dyn LocalContract>,
    ) -> Self {
        Relay {
            ledger,
            mediator,
            contract,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Create empty counter records for both directions, if they don't exist yet.
    pub fn initialize(&self) -> Result<()> {
        self.ledger.transact(|tx| {
            let mut sequences = Sequences::new(tx);
            sequences.ensure_initialized(Direction::Outbound)?;
            sequences.ensure_initialized(Direction::Inbound)
        })
    }

    pub fn interchain_single_query(&self, dst: &ChainId, key: &str) -> Result<Vec<u8>> {
        self.query(CrossChainRequest::single_query(dst, key))
    }

    pub fn interchain_multi_query(&self, query_by: &str, query_key: &str) -> Result<Vec<u8>> {
        self.query(CrossChainRequest::multi_query(query_by, query_key))
    }

    pub fn interchain_single_modify(&self, dst: &ChainId, key: &str, value: &str) -> Result<()> {
        self.modify(CrossChainRequest::single_modify(dst, key, value))
    }

    pub fn interchain_double_modify(
        &self,
        dst: &ChainId,
        first: (&str, &str),
        second: (&str, &str),
    ) -> Result<()> {
        self.modify(CrossChainRequest::double_modify(dst, first, second))
    }

    /// Send a query-class request. Sequencing, logging and the mediator call form one transaction: if the mediator
    /// can't be reached nothing is recorded. The envelope carries no sequence number, so if the commit conflicts with
    /// a concurrent writer after the mediator has answered, the request is sequenced again against the new state
    /// rather than posted a second time.
    fn query(&self, request: CrossChainRequest) -> Result<Vec<u8>> {
        debug_assert_eq!(operation_class(&request), Some(OperationClass::Query));
        let mut tx = self.ledger.begin();
        let material = tx
            .get(PRIVATE_KEY)?
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RelayError::Config("no signing key has been set".to_owned()))?;
        let endpoint = mediator_address(&mut tx)?;
        let signature = signer::sign(&material, &request)?;

        let response = self.dispatch(
            &mut tx,
            request.clone(),
            Delivery::Query {
                endpoint,
                signature,
            },
        )?;
        if !self.ledger.try_commit(tx)? {
            let peer = &request.dst_chain_id;
            debug!(%peer, "query conflicted after delivery, sequencing it again");
            let seq = self
                .ledger
                .transact(|tx| record_outbound(tx, &request))
                .inspect_err(|e| error!(%peer, error = %e, "delivered query could not be logged"))?;
            info!(%peer, seq, "delivered query recorded");
        }
        Ok(response.unwrap_or_default())
    }

    /// Send a modify-class request. Nothing leaves the relay before commit, so conflicts are simply retried.
    fn modify(&self, request: CrossChainRequest) -> Result<()> {
        debug_assert_eq!(operation_class(&request), Some(OperationClass::Modify));
        self.ledger
            .transact(|tx| self.dispatch(tx, request.clone(), Delivery::Notify))?;
        Ok(())
    }

    /// Sequence and log the request, then deliver it. Returns the mediator's response for queries.
    fn dispatch(
        &self,
        tx: &mut StateTx,
        request: CrossChainRequest,
        delivery: Delivery,
    ) -> Result<Option<Vec<u8>>> {
        let peer = request.dst_chain_id.clone();
        let seq = record_outbound(tx, &request)?;

        match delivery {
            Delivery::Query {
                endpoint,
                signature,
            } => {
                let envelope = SignedEnvelope {
                    cc_request: request,
                    sig_r: signature.r,
                    sig_s: signature.s,
                };
                let body = encode_envelope(&envelope)?;
                let response = self.mediator.post(&endpoint, &body)?;
                info!(%peer, seq, func = %envelope.cc_request.func, "query answered by mediator");
                Ok(Some(response))
            }
            Delivery::Notify => {
                let envelope = SignedEnvelope::unsigned(request);
                tx.set_event(INTERCHAIN_EVENT_NAME, encode_envelope(&envelope)?);
                info!(
                    %peer,
                    seq,
                    func = %envelope.cc_request.func,
                    "modify request queued for notification"
                );
                Ok(None)
            }
        }
    }

    /// Store the key used to sign queries. The material is parsed first so a bad key is rejected up front.
    pub fn set_private_key(&self, material: &str) -> Result<()> {
        SecretKey::parse(material.as_bytes())?;
        self.ledger.transact(|tx| {
            tx.put(PRIVATE_KEY, material.as_bytes().to_vec());
            Ok(())
        })
    }

    pub fn set_mediator_address(&self, address: &str) -> Result<()> {
        if address.trim().is_empty() {
            return Err(RelayError::Validation(
                "mediator address must not be empty".to_owned(),
            ));
        }
        self.ledger.transact(|tx| {
            tx.put(MEDIATOR_ADDRESS, address.as_bytes().to_vec());
            Ok(())
        })
    }

    /// Whether a signing key and a mediator address are present.
    pub fn configured(&self) -> Result<(bool, bool)> {
        let mut tx = self.ledger.begin();
        let key = tx.get(PRIVATE_KEY)?.is_some_and(|k| !k.is_empty());
        let address = tx.get(MEDIATOR_ADDRESS)?.is_some_and(|a| !a.is_empty());
        Ok((key, address))
    }

    pub fn interchain_get(&self, key: &str) -> Result<Vec<u8>> {
        self.call_contract(vec!["interchainGet".to_owned(), key.to_owned()])
    }

    pub fn interchain_set(&self, key: &str, value: &str) -> Result<()> {
        self.call_contract(vec![
            "interchainSet".to_owned(),
            key.to_owned(),
            value.to_owned(),
        ])?;
        Ok(())
    }

    pub fn interchain_query_by_value(&self, value: &str) -> Result<Vec<u8>> {
        self.call_contract(vec!["queryByValue".to_owned(), value.to_owned()])
    }

    /// Forward an arbitrary call to the local contract. `args[0]` is the function name.
    pub fn interchain_func_call(&self, args: &[String]) -> Result<Vec<u8>> {
        if args.is_empty() {
            return Err(RelayError::Validation(
                "expected a function name".to_owned(),
            ));
        }
        self.call_contract(args.to_vec())
    }

    fn call_contract(&self, args: Vec<String>) -> Result<Vec<u8>> {
        contract::call(self.contract.as_ref(), &args)
    }

    /// Answer a consumer's catch-up request with the JSON array of outbound records it has not seen.
    pub fn polling_event(&self, snapshot: &[u8]) -> Result<Vec<u8>> {
        let snapshot = reconcile::parse_snapshot(snapshot)?;
        let reconciliation = self.reconcile(&snapshot)?;
        serde_json::to_vec(&reconciliation.records).map_err(|e| encode_failure("records", e))
    }

    pub fn reconcile(&self, snapshot: &Snapshot) -> Result<reconcile::Reconciliation> {
        let reconciliation = reconcile::reconcile(&self.ledger, snapshot)?;
        debug!(
            records = reconciliation.records.len(),
            skipped = reconciliation.skipped.len(),
            "reconciled consumer snapshot"
        );
        Ok(reconciliation)
    }

    /// Record a request delivered to us by `source`. The mediator must deliver each peer's messages in order: `seq`
    /// has to be exactly one past the last one received from that peer.
    pub fn receive(&self, source: &ChainId, seq: u64, request: &CrossChainRequest) -> Result<()> {
        self.ledger.transact(|tx| {
            let expected = Sequences::new(tx)
                .current(Direction::Inbound, source)?
                .saturating_add(1);
            if seq != expected {
                return Err(RelayError::Validation(format!(
                    "expected inbound sequence {expected} from {source}, got {seq}"
                )));
            }
            let seq = Sequences::new(tx).next(Direction::Inbound, source)?;
            MessageLog::new(tx).append(Direction::Inbound, source, seq, request)
        })?;
        info!(%source, seq, func = %request.func, "inbound request recorded");
        Ok(())
    }

    /// The raw counter record for a direction.
    pub fn counters_raw(&self, direction: Direction) -> Result<Vec<u8>> {
        Sequences::new(&mut self.ledger.begin()).raw(direction)
    }

    /// The raw stored bytes of one record.
    pub fn message_raw(&self, direction: Direction, peer: &ChainId, seq: u64) -> Result<Vec<u8>> {
        MessageLog::new(&mut self.ledger.begin()).read_raw(direction, peer, seq)
    }

    /// Check that every sequence number up to each counter has a record. A gap cannot be repaired automatically and
    /// is reported as [RelayError::Inconsistent].
    pub fn audit(&self) -> Result<()> {
        let mut tx = self.ledger.begin();
        let mut missing = vec![];
        for direction in [Direction::Outbound, Direction::Inbound] {
            let counters = Sequences::new(&mut tx).get(direction)?;
            for (peer, end) in counters {
                for seq in 1..=end {
                    match MessageLog::new(&mut tx).read_raw(direction, &peer, seq) {
                        Ok(_) => {}
                        Err(RelayError::NotFound { .. }) => {
                            error!(
                                %direction,
                                %peer,
                                seq,
                                "counter is ahead of the message log, operator intervention required"
                            );
                            missing.push(format!("{direction} {peer}#{seq}"));
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Inconsistent(format!(
                "missing records: {}",
                missing.join(", ")
            )))
        }
    }
}

fn mediator_address(tx: &mut StateTx) -> Result<String> {
    let address = tx
        .get(MEDIATOR_ADDRESS)?
        .filter(|a| !a.is_empty())
        .ok_or_else(|| RelayError::Config("no mediator address has been set".to_owned()))?;
    String::from_utf8(address).map_err(|e| RelayError::decode("mediator address", e))
}

/// Assign the next outbound sequence number for the request's destination and log the request under it.
fn record_outbound(tx: &mut StateTx, request: &CrossChainRequest) -> Result<u64> {
    let peer = &request.dst_chain_id;
    let seq = Sequences::new(tx).next(Direction::Outbound, peer)?;
    MessageLog::new(tx).append(Direction::Outbound, peer, seq, request)?;
    Ok(seq)
}

fn encode_failure(what: &str, e: serde_json::Error) -> RelayError {
    RelayError::Storage(format!("cannot encode {what}: {e}"))
}

fn encode_envelope(envelope: &SignedEnvelope) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|e| encode_failure("envelope", e))
}

fn operation_class(request: &CrossChainRequest) -> Option<OperationClass> {
    use crate::message::Operation::*;
    [SingleQuery, MultiQuery, SingleModify, DoubleModify]
        .into_iter()
        .find(|op| op.name() == request.func)
        .map(|op| op.class())
}
