//! The same-domain business contract the relay forwards local calls to.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    error::{RelayError, Result},
    state::{Ledger, StateTx},
};

/// Status reported by a contract call that succeeded.
pub const STATUS_OK: i32 = 200;
pub const STATUS_ERROR: i32 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractResponse {
    pub status: i32,
    pub message: String,
    pub payload: Vec<u8>,
}

impl ContractResponse {
    pub fn success(payload: Vec<u8>) -> Self {
        ContractResponse {
            status: STATUS_OK,
            message: String::new(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ContractResponse {
            status: STATUS_ERROR,
            message: message.into(),
            payload: vec![],
        }
    }
}

/// An RPC target on the local domain. `args[0]` is the function name, the rest are its arguments.
pub trait LocalContract: Send + Sync {
    fn invoke(&self, args: &[String]) -> ContractResponse;
}

/// Call `contract` and pass its payload through, turning a failure status into an error.
pub fn call(contract: &dyn LocalContract, args: &[String]) -> Result<Vec<u8>> {
    let response = contract.invoke(args);
    if response.status != STATUS_OK {
        debug!(status = response.status, function = ?args.first(), "local contract call failed");
        return Err(RelayError::RemoteCall {
            status: response.status,
            message: response.message,
        });
    }
    Ok(response.payload)
}

const KV_STATE: &str = "kv-contract-state";

/// A minimal key-value business contract kept in the relay's own ledger.
///
/// It understands `interchainGet key`, `interchainSet key value` and `queryByValue value`, which are the calls the
/// relay makes on behalf of the mediator.
#[derive(Debug, Clone)]
pub struct KvContract {
    ledger: Ledger,
}

impl KvContract {
    pub fn new(ledger: Ledger) -> Self {
        KvContract { ledger }
    }

    fn load(tx: &mut StateTx) -> Result<BTreeMap<String, String>> {
        match tx.get(KV_STATE)? {
            None => Ok(BTreeMap::new()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| RelayError::Storage(format!("malformed contract state: {e}"))),
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(Self::load(&mut self.ledger.begin())?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ledger.transact(|tx| {
            let mut state = Self::load(tx)?;
            state.insert(key.to_owned(), value.to_owned());
            let bytes = serde_json::to_vec(&state)
                .map_err(|e| RelayError::Storage(format!("cannot encode contract state: {e}")))?;
            tx.put(KV_STATE, bytes);
            Ok(())
        })
    }

    fn keys_with_value(&self, value: &str) -> Result<Vec<String>> {
        Ok(Self::load(&mut self.ledger.begin())?
            .into_iter()
            .filter(|(_, v)| v == value)
            .map(|(k, _)| k)
            .collect())
    }
}

impl LocalContract for KvContract {
    fn invoke(&self, args: &[String]) -> ContractResponse {
        let result = match args {
            [function, key] if function == "interchainGet" => match self.get(key) {
                Ok(Some(value)) => Ok(value.into_bytes()),
                Ok(None) => return ContractResponse::error(format!("no value for key {key}")),
                Err(e) => Err(e),
            },
            [function, key, value] if function == "interchainSet" => {
                self.set(key, value).map(|()| vec![])
            }
            [function, value] if function == "queryByValue" => self
                .keys_with_value(value)
                .and_then(|keys| {
                    serde_json::to_vec(&keys)
                        .map_err(|e| RelayError::Storage(format!("cannot encode keys: {e}")))
                }),
            _ => {
                return ContractResponse::error(format!(
                    "unsupported call: {}",
                    args.join(",")
                ));
            }
        };
        match result {
            Ok(payload) => ContractResponse::success(payload),
            Err(e) => ContractResponse::error(e.to_string()),
        }
    }
}
