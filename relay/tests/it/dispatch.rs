use std::{
    sync::{Arc, Barrier},
    thread,
};

use xchain_relay::{
    error::RelayError,
    message::{ChainId, CrossChainRequest, Direction, SignedEnvelope},
    relay::INTERCHAIN_EVENT_NAME,
    signer::{self, SecretKey},
    state::MemoryBackend,
};

use crate::{KEY_HEX, MEDIATOR, TestRelay};

fn counter(relay: &TestRelay, direction: Direction) -> serde_json::Value {
    serde_json::from_slice(&relay.relay.counters_raw(direction).unwrap()).unwrap()
}

#[test]
fn single_query_is_signed_sequenced_and_answered() {
    let relay = TestRelay::new();
    let b = ChainId::from("B");

    let response = relay.relay.interchain_single_query(&b, "foo").unwrap();
    assert_eq!(response, b"mediator-answer");

    assert_eq!(counter(&relay, Direction::Outbound), serde_json::json!({"B": 1}));
    assert_eq!(
        relay.relay.message_raw(Direction::Outbound, &b, 1).unwrap(),
        br#"{"dstChainID":"B","func":"InterchainSingleQuery","args":["B","foo"]}"#
    );

    let calls = relay.mediator.calls();
    assert_eq!(calls.len(), 1);
    let (endpoint, envelope) = &calls[0];
    assert_eq!(endpoint, MEDIATOR);
    assert_eq!(envelope.cc_request, CrossChainRequest::single_query(&b, "foo"));

    let signature = signer::RequestSignature {
        r: envelope.sig_r.clone(),
        s: envelope.sig_s.clone(),
    };
    let key = SecretKey::from_hex(KEY_HEX).unwrap();
    signer::verify(&key.verifying_key(), &envelope.cc_request, &signature).unwrap();
}

#[test]
fn multi_query_has_no_destination() {
    let relay = TestRelay::new();
    relay.relay.interchain_multi_query("region", "eu").unwrap();

    let (_, envelope) = &relay.mediator.calls()[0];
    assert!(envelope.cc_request.dst_chain_id.is_empty());
    assert_eq!(envelope.cc_request.args, vec!["region", "eu"]);
    assert_eq!(counter(&relay, Direction::Outbound), serde_json::json!({"": 1}));
}

#[test]
fn modifies_are_numbered_per_peer_and_announced() {
    let relay = TestRelay::new();
    let mut events = relay.relay.ledger().subscribe();
    let c = ChainId::from("C");

    relay.relay.interchain_single_modify(&c, "x", "1").unwrap();
    relay
        .relay
        .interchain_double_modify(&c, ("x", "2"), ("y", "3"))
        .unwrap();

    assert_eq!(counter(&relay, Direction::Outbound), serde_json::json!({"C": 2}));
    for seq in 1..=2 {
        let event = events.try_recv().unwrap();
        assert_eq!(event.name, INTERCHAIN_EVENT_NAME);
        let envelope: SignedEnvelope = serde_json::from_slice(&event.payload).unwrap();
        assert!(!envelope.is_signed());
        assert_eq!(
            serde_json::to_vec(&envelope.cc_request).unwrap(),
            relay.relay.message_raw(Direction::Outbound, &c, seq).unwrap()
        );
    }
    assert!(events.try_recv().is_err());
    // Notifications never go through the mediator.
    assert!(relay.mediator.calls().is_empty());
}

#[test]
fn modify_does_not_need_a_signing_key() {
    let relay = TestRelay::unconfigured();
    relay
        .relay
        .interchain_single_modify(&ChainId::from("C"), "x", "1")
        .unwrap();
    assert_eq!(counter(&relay, Direction::Outbound), serde_json::json!({"C": 1}));
}

#[test]
fn missing_configuration_changes_nothing() {
    let relay = TestRelay::unconfigured();
    let b = ChainId::from("B");
    assert!(matches!(
        relay.relay.interchain_single_query(&b, "foo"),
        Err(RelayError::Config(_))
    ));

    relay.relay.set_private_key(KEY_HEX).unwrap();
    assert!(matches!(
        relay.relay.interchain_single_query(&b, "foo"),
        Err(RelayError::Config(_))
    ));

    assert_eq!(counter(&relay, Direction::Outbound), serde_json::json!({}));
    assert!(relay.mediator.calls().is_empty());
}

#[test]
fn invalid_key_material_is_rejected_up_front() {
    let relay = TestRelay::unconfigured();
    assert!(matches!(
        relay.relay.set_private_key("not a key"),
        Err(RelayError::Signing(_))
    ));
    assert_eq!(relay.relay.configured().unwrap(), (false, false));
}

#[test]
fn unreachable_mediator_leaves_no_trace() {
    let relay = TestRelay::new();
    let b = ChainId::from("B");
    relay.relay.interchain_single_query(&b, "first").unwrap();

    relay.mediator.set_unreachable(true);
    assert!(matches!(
        relay.relay.interchain_single_query(&b, "second"),
        Err(RelayError::Transport(_))
    ));
    assert_eq!(counter(&relay, Direction::Outbound), serde_json::json!({"B": 1}));
    assert!(matches!(
        relay.relay.message_raw(Direction::Outbound, &b, 2),
        Err(RelayError::NotFound { seq: 2, .. })
    ));

    // The sequence number that failed is reused by the next successful query.
    relay.mediator.set_unreachable(false);
    relay.relay.interchain_single_query(&b, "third").unwrap();
    let record: CrossChainRequest =
        serde_json::from_slice(&relay.relay.message_raw(Direction::Outbound, &b, 2).unwrap())
            .unwrap();
    assert_eq!(record.args[1], "third");
}

#[test]
fn mixed_operations_share_one_sequence() {
    let relay = TestRelay::new();
    let b = ChainId::from("B");
    relay.relay.interchain_single_query(&b, "k").unwrap();
    relay.relay.interchain_single_modify(&b, "k", "v").unwrap();
    relay.relay.interchain_single_query(&b, "k").unwrap();
    relay.relay.interchain_single_modify(&ChainId::from("C"), "k", "v").unwrap();

    assert_eq!(
        counter(&relay, Direction::Outbound),
        serde_json::json!({"B": 3, "C": 1})
    );
    for seq in 1..=3 {
        relay.relay.message_raw(Direction::Outbound, &b, seq).unwrap();
    }
    relay.relay.audit().unwrap();
}

#[test]
fn concurrent_modifies_get_gap_free_numbers() {
    let relay = TestRelay::with_backend(Arc::new(MemoryBackend::new()), 10_000);
    let d = ChainId::from("D");
    const THREADS: usize = 4;
    const PER_THREAD: usize = 25;

    thread::scope(|s| {
        for t in 0..THREADS {
            let relay = &relay;
            let d = &d;
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    relay
                        .relay
                        .interchain_single_modify(d, &format!("t{t}-{i}"), "v")
                        .unwrap();
                }
            });
        }
    });

    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(
        counter(&relay, Direction::Outbound),
        serde_json::json!({"D": total})
    );
    let mut keys: Vec<String> = (1..=total)
        .map(|seq| {
            let record: CrossChainRequest = serde_json::from_slice(
                &relay.relay.message_raw(Direction::Outbound, &d, seq).unwrap(),
            )
            .unwrap();
            record.args[1].clone()
        })
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), THREADS * PER_THREAD);
}

#[test]
fn audit_reports_a_counter_ahead_of_the_log() {
    let relay = TestRelay::new();
    let b = ChainId::from("B");
    relay.relay.interchain_single_modify(&b, "k", "v").unwrap();

    let ledger = relay.relay.ledger();
    let mut tx = ledger.begin();
    tx.put("outer-meta", br#"{"B":2}"#.to_vec());
    ledger.commit(tx).unwrap();

    assert!(matches!(
        relay.relay.audit(),
        Err(RelayError::Inconsistent(_))
    ));
    // A record already sitting where the next number would go is never overwritten.
    let mut tx = ledger.begin();
    tx.put("outer-meta", br#"{"B":0}"#.to_vec());
    ledger.commit(tx).unwrap();
    assert!(matches!(
        relay.relay.interchain_single_modify(&b, "k2", "v2"),
        Err(RelayError::Inconsistent(_))
    ));
}

#[test]
fn concurrent_queries_are_all_logged() {
    let relay = TestRelay::new();
    let b = ChainId::from("B");
    // Both queries read the counter and reach the mediator before either commits.
    relay.mediator.hold_posts_at(Arc::new(Barrier::new(2)));

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|key| {
                let (relay, b) = (&relay, &b);
                s.spawn(move || relay.relay.interchain_single_query(b, key))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for result in results {
        assert_eq!(result.unwrap(), b"mediator-answer");
    }

    assert_eq!(relay.mediator.calls().len(), 2);
    assert_eq!(counter(&relay, Direction::Outbound), serde_json::json!({"B": 2}));
    let mut keys: Vec<String> = (1..=2)
        .map(|seq| {
            let record: CrossChainRequest = serde_json::from_slice(
                &relay.relay.message_raw(Direction::Outbound, &b, seq).unwrap(),
            )
            .unwrap();
            record.args[1].clone()
        })
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["first", "second"]);
    relay.relay.audit().unwrap();
}
