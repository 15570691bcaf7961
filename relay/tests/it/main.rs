mod dispatch;
mod reconcile;

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use xchain_relay::{
    contract::KvContract,
    error::{RelayError, Result},
    mediator::MediatorTransport,
    message::SignedEnvelope,
    relay::Relay,
    state::{Ledger, MemoryBackend, StateBackend},
};

const KEY_HEX: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const MEDIATOR: &str = "http://mediator.test/relay";

/// A mediator which records every request and answers with a fixed body, or fails on demand.
#[derive(Default)]
struct MockMediator {
    calls: Mutex<Vec<(String, SignedEnvelope)>>,
    unreachable: Mutex<bool>,
    /// If set, every post waits here before answering.
    rendezvous: Mutex<Option<Arc<Barrier>>>,
}

impl MockMediator {
    fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    fn hold_posts_at(&self, barrier: Arc<Barrier>) {
        *self.rendezvous.lock() = Some(barrier);
    }

    fn calls(&self) -> Vec<(String, SignedEnvelope)> {
        self.calls.lock().clone()
    }
}

impl MediatorTransport for MockMediator {
    fn post(&self, endpoint: &str, body: &[u8]) -> Result<Vec<u8>> {
        if *self.unreachable.lock() {
            return Err(RelayError::Transport("connection refused".to_owned()));
        }
        let envelope: SignedEnvelope = serde_json::from_slice(body)
            .map_err(|e| RelayError::Transport(format!("bad request body: {e}")))?;
        self.calls.lock().push((endpoint.to_owned(), envelope));
        let rendezvous = self.rendezvous.lock().clone();
        if let Some(barrier) = rendezvous {
            barrier.wait();
        }
        Ok(b"mediator-answer".to_vec())
    }
}

struct TestRelay {
    relay: Relay,
    mediator: Arc<MockMediator>,
}

impl TestRelay {
    fn with_backend(backend: Arc<dyn StateBackend>, max_commit_attempts: u32) -> TestRelay {
        let ledger = Ledger::new(backend, 1024, max_commit_attempts);
        let mediator = Arc::new(MockMediator::default());
        let relay = Relay::new(
            ledger.clone(),
            mediator.clone(),
            Arc::new(KvContract::new(ledger)),
        );
        relay.initialize().unwrap();
        TestRelay { relay, mediator }
    }

    /// A relay with no signing key or mediator address.
    fn unconfigured() -> TestRelay {
        Self::with_backend(Arc::new(MemoryBackend::new()), 5)
    }

    fn new() -> TestRelay {
        let relay = Self::unconfigured();
        relay.configure();
        relay
    }

    fn configure(&self) {
        self.relay.set_private_key(KEY_HEX).unwrap();
        self.relay.set_mediator_address(MEDIATOR).unwrap();
    }
}
