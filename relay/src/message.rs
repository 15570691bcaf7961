//! The messages exchanged with the mediator and stored in the message log.

use std::{
    borrow::Borrow,
    fmt::{self, Display, Formatter},
};

use serde::{Deserialize, Serialize};

use crate::serde_util::base64_bytes;

/// Identifies a peer ledger domain. No internal structure is assumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ChainId {
    fn from(id: &str) -> Self {
        ChainId(id.to_owned())
    }
}

impl From<String> for ChainId {
    fn from(id: String) -> Self {
        ChainId(id)
    }
}

impl Borrow<str> for ChainId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which way a message travelled relative to this relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by this relay to a peer.
    Outbound,
    /// Received by this relay from a peer.
    Inbound,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str("outbound"),
            Direction::Inbound => f.write_str("inbound"),
        }
    }
}

/// The cross-chain operations this relay can originate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SingleQuery,
    MultiQuery,
    SingleModify,
    DoubleModify,
}

/// How a class of operation is delivered to the mediator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// Read-only, signed, delivered synchronously.
    Query,
    /// State-mutating, unsigned, announced through a notification.
    Modify,
}

impl Operation {
    /// The logical call name carried in the `func` field.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SingleQuery => "InterchainSingleQuery",
            Operation::MultiQuery => "InterchainMultiQuery",
            Operation::SingleModify => "InterchainSingleModify",
            Operation::DoubleModify => "InterchainDoubleModify",
        }
    }

    pub fn class(&self) -> OperationClass {
        match self {
            Operation::SingleQuery | Operation::MultiQuery => OperationClass::Query,
            Operation::SingleModify | Operation::DoubleModify => OperationClass::Modify,
        }
    }
}

/// A request for a peer domain.
///
/// The field order here is the canonical order: the signed bytes are exactly the JSON encoding of this struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossChainRequest {
    #[serde(rename = "dstChainID")]
    pub dst_chain_id: ChainId,
    pub func: String,
    pub args: Vec<String>,
}

impl CrossChainRequest {
    pub fn new(dst_chain_id: ChainId, operation: Operation, args: Vec<String>) -> Self {
        CrossChainRequest {
            dst_chain_id,
            func: operation.name().to_owned(),
            args,
        }
    }

    pub fn single_query(dst: &ChainId, key: &str) -> Self {
        Self::new(
            dst.clone(),
            Operation::SingleQuery,
            vec![dst.to_string(), key.to_owned()],
        )
    }

    /// A query fanned out to several chains. The destination is left empty and the mediator selects peers using
    /// `query_by`.
    pub fn multi_query(query_by: &str, query_key: &str) -> Self {
        Self::new(
            ChainId::default(),
            Operation::MultiQuery,
            vec![query_by.to_owned(), query_key.to_owned()],
        )
    }

    pub fn single_modify(dst: &ChainId, key: &str, value: &str) -> Self {
        Self::new(
            dst.clone(),
            Operation::SingleModify,
            vec![dst.to_string(), key.to_owned(), value.to_owned()],
        )
    }

    pub fn double_modify(dst: &ChainId, first: (&str, &str), second: (&str, &str)) -> Self {
        Self::new(
            dst.clone(),
            Operation::DoubleModify,
            vec![
                dst.to_string(),
                first.0.to_owned(),
                first.1.to_owned(),
                second.0.to_owned(),
                second.1.to_owned(),
            ],
        )
    }

    /// The unique, stable byte form of this request. This is the input to hashing and signing, and also the body
    /// stored in the message log.
    ///
    /// JSON string escaping is injective and the fields are always written in declaration order, so distinct
    /// requests never share a canonical form.
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A request together with the signature over its canonical form.
///
/// The signature fields are empty when the request is delivered by notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub cc_request: CrossChainRequest,
    #[serde(with = "base64_bytes")]
    pub sig_r: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub sig_s: Vec<u8>,
}

impl SignedEnvelope {
    pub fn unsigned(cc_request: CrossChainRequest) -> Self {
        SignedEnvelope {
            cc_request,
            sig_r: vec![],
            sig_s: vec![],
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.sig_r.is_empty() && !self.sig_s.is_empty()
    }
}
