//! The string-named entry point through which the mediator and operators drive a relay.
//!
//! Every function takes positional string arguments and returns a byte payload. Argument counts are checked before
//! anything else happens, so a malformed call never touches the ledger.

use tracing::debug;

use crate::{
    error::{RelayError, Result},
    message::{ChainId, CrossChainRequest, Direction},
    relay::Relay,
};

fn expect_args<'a, const N: usize>(function: &str, args: &'a [String]) -> Result<[&'a str; N]> {
    if args.len() != N {
        return Err(RelayError::Validation(format!(
            "{function} expects {N} argument(s), got {}",
            args.len()
        )));
    }
    Ok(std::array::from_fn(|i| args[i].as_str()))
}

fn parse_seq(function: &str, seq: &str) -> Result<u64> {
    seq.parse().map_err(|e| {
        RelayError::Validation(format!("{function}: invalid sequence number {seq:?}: {e}"))
    })
}

/// Run `function` with `args` against `relay`.
pub fn invoke(relay: &Relay, function: &str, args: &[String]) -> Result<Vec<u8>> {
    debug!(function, args = args.len(), "invoke");
    match function {
        "InterchainSingleQuery" => {
            let [dst, key] = expect_args(function, args)?;
            relay.interchain_single_query(&ChainId::from(dst), key)
        }
        "InterchainMultiQuery" => {
            let [query_by, query_key] = expect_args(function, args)?;
            relay.interchain_multi_query(query_by, query_key)
        }
        "InterchainSingleModify" => {
            let [dst, key, value] = expect_args(function, args)?;
            relay.interchain_single_modify(&ChainId::from(dst), key, value)?;
            Ok(vec![])
        }
        "InterchainDoubleModify" => {
            let [dst, k1, v1, k2, v2] = expect_args(function, args)?;
            relay.interchain_double_modify(&ChainId::from(dst), (k1, v1), (k2, v2))?;
            Ok(vec![])
        }
        "setPrivateKey" => {
            let [material] = expect_args(function, args)?;
            relay.set_private_key(material)?;
            Ok(vec![])
        }
        "modifyPAPPIP" => {
            let [address] = expect_args(function, args)?;
            relay.set_mediator_address(address)?;
            Ok(vec![])
        }
        "interchainGet" => {
            let [key] = expect_args(function, args)?;
            relay.interchain_get(key)
        }
        "interchainSet" => {
            let [key, value] = expect_args(function, args)?;
            relay.interchain_set(key, value)?;
            Ok(vec![])
        }
        "interchainQueryByValue" => {
            let [value] = expect_args(function, args)?;
            relay.interchain_query_by_value(value)
        }
        "interchainFuncCall" => relay.interchain_func_call(args),
        "pollingEvent" => {
            let [snapshot] = expect_args(function, args)?;
            relay.polling_event(snapshot.as_bytes())
        }
        "getOuterMeta" => {
            let [] = expect_args(function, args)?;
            relay.counters_raw(Direction::Outbound)
        }
        "getInnerMeta" => {
            let [] = expect_args(function, args)?;
            relay.counters_raw(Direction::Inbound)
        }
        "getOutMessage" => {
            let [peer, seq] = expect_args(function, args)?;
            relay.message_raw(Direction::Outbound, &ChainId::from(peer), parse_seq(function, seq)?)
        }
        "getInMessage" => {
            let [peer, seq] = expect_args(function, args)?;
            relay.message_raw(Direction::Inbound, &ChainId::from(peer), parse_seq(function, seq)?)
        }
        "interchainReceive" => {
            let [source, seq, request] = expect_args(function, args)?;
            let seq = parse_seq(function, seq)?;
            let request: CrossChainRequest = serde_json::from_str(request)
                .map_err(|e| RelayError::Validation(format!("{function}: invalid request: {e}")))?;
            relay.receive(&ChainId::from(source), seq, &request)?;
            Ok(vec![])
        }
        "audit" => {
            let [] = expect_args(function, args)?;
            relay.audit()?;
            Ok(vec![])
        }
        _ => Err(RelayError::Validation(format!(
            "unknown function {function:?}"
        ))),
    }
}
