use xchain_relay::{
    message::{ChainId, CrossChainRequest, Direction},
    reconcile::{Backlog, Snapshot},
};

use crate::TestRelay;

fn modify_keys(records: &[CrossChainRequest]) -> Vec<&str> {
    records.iter().map(|r| r.args[1].as_str()).collect()
}

#[test]
fn consumer_catches_up_on_missed_notifications() {
    let relay = TestRelay::new();
    let b = ChainId::from("B");
    for key in ["a", "b", "c"] {
        relay.relay.interchain_single_modify(&b, key, "v").unwrap();
    }

    let response = relay.relay.polling_event(br#"{"B": 0}"#).unwrap();
    let records: Vec<CrossChainRequest> = serde_json::from_slice(&response).unwrap();
    assert_eq!(modify_keys(&records), vec!["a", "b", "c"]);

    let response = relay.relay.polling_event(br#"{"B": "2"}"#).unwrap();
    let records: Vec<CrossChainRequest> = serde_json::from_slice(&response).unwrap();
    assert_eq!(modify_keys(&records), vec!["c"]);

    assert_eq!(relay.relay.polling_event(br#"{"B": 3}"#).unwrap(), b"[]");
}

#[test]
fn queries_are_part_of_the_backlog() {
    let relay = TestRelay::new();
    let b = ChainId::from("B");
    let c = ChainId::from("C");
    relay.relay.interchain_single_query(&b, "q").unwrap();
    relay.relay.interchain_single_modify(&c, "m", "v").unwrap();

    let backlog = Backlog::new(relay.relay.ledger(), &Default::default()).unwrap();
    let seen: Vec<(ChainId, u64)> = backlog.map(|e| (e.peer, e.seq)).collect();
    assert_eq!(seen, vec![(b, 1), (c, 1)]);
}

#[test]
fn corrupted_record_does_not_block_the_backlog() {
    let relay = TestRelay::new();
    let b = ChainId::from("B");
    for key in ["a", "b", "c"] {
        relay.relay.interchain_single_modify(&b, key, "v").unwrap();
    }
    let ledger = relay.relay.ledger();
    let mut tx = ledger.begin();
    tx.put("out-msg-B-2", b"{\"dstChainID\":".to_vec());
    ledger.commit(tx).unwrap();

    let reconciliation = relay
        .relay
        .reconcile(&Snapshot::from([(b.clone(), 0)]))
        .unwrap();
    assert_eq!(modify_keys(&reconciliation.records), vec!["a", "c"]);
    assert_eq!(reconciliation.skipped.len(), 1);
    assert_eq!(reconciliation.skipped[0].seq, 2);

    // The raw bytes are still available to operators.
    assert_eq!(
        relay.relay.message_raw(Direction::Outbound, &b, 2).unwrap(),
        b"{\"dstChainID\":"
    );
}

#[test]
fn malformed_snapshot_is_rejected() {
    let relay = TestRelay::new();
    assert!(relay.relay.polling_event(b"not json").is_err());
    assert!(relay.relay.polling_event(br#"{"B": "x"}"#).is_err());
}
