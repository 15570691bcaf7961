//! Signing of outbound requests.
//!
//! A request is signed by hashing its canonical bytes with SHA-256 and producing an ECDSA (secp256k1) signature over
//! the digest. The two signature scalars travel as ASCII decimal text, which is the form the mediator parses.
//! Verification is the mediator's job; [verify] exists so that tooling and tests can check what we produced.

use std::fmt::{self, Debug, Formatter};

use k256::{
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::hazmat::{PrehashSigner, PrehashVerifier},
    },
    pkcs8::DecodePrivateKey,
};
use primitive_types::U256;
use sha2::{Digest, Sha256};

use crate::{
    error::{RelayError, Result},
    message::CrossChainRequest,
};

/// The private key a relay signs its queries with.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl Debug for SecretKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&"..").finish()
    }
}

impl SecretKey {
    /// Parse key material as stored in the ledger. Accepted forms are SEC1 or PKCS#8 PEM, SEC1 or PKCS#8 DER, and a
    /// hex-encoded 32-byte scalar (with or without a `0x` prefix).
    pub fn parse(material: &[u8]) -> Result<SecretKey> {
        let invalid = |reason: &dyn std::fmt::Display| {
            RelayError::Signing(format!("invalid private key material: {reason}"))
        };

        if material.is_empty() {
            return Err(invalid(&"empty"));
        }

        if let Ok(text) = std::str::from_utf8(material) {
            let text = text.trim();
            if text.starts_with("-----BEGIN") {
                let key = if text.contains("EC PRIVATE KEY") {
                    k256::SecretKey::from_sec1_pem(text).map_err(|e| invalid(&e))?
                } else {
                    k256::SecretKey::from_pkcs8_pem(text).map_err(|e| invalid(&e))?
                };
                return Ok(SecretKey(key.into()));
            }
            let hex_text = text.strip_prefix("0x").unwrap_or(text);
            if hex_text.len() == 64 && hex_text.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Self::from_hex(hex_text);
            }
        }

        let key = k256::SecretKey::from_sec1_der(material)
            .or_else(|_| k256::SecretKey::from_pkcs8_der(material))
            .map_err(|e| invalid(&e))?;
        Ok(SecretKey(key.into()))
    }

    pub fn from_hex(s: &str) -> Result<SecretKey> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| RelayError::Signing(format!("invalid private key hex: {e}")))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| RelayError::Signing(format!("invalid private key scalar: {e}")))?;
        Ok(SecretKey(key))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.0.verifying_key()
    }

    pub fn sign(&self, request: &CrossChainRequest) -> Result<RequestSignature> {
        let digest = request_digest(request)?;
        let signature: Signature = self
            .0
            .sign_prehash(&digest)
            .map_err(|e| RelayError::Signing(e.to_string()))?;
        let (r, s) = signature.split_bytes();
        Ok(RequestSignature {
            r: U256::from_big_endian(&r).to_string().into_bytes(),
            s: U256::from_big_endian(&s).to_string().into_bytes(),
        })
    }
}

/// The two scalars of an ECDSA signature, each as ASCII decimal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

/// The digest that gets signed: SHA-256 of the canonical bytes. A request which cannot be canonicalised is never
/// signed.
pub fn request_digest(request: &CrossChainRequest) -> Result<[u8; 32]> {
    let bytes = request
        .canonical_bytes()
        .map_err(|e| RelayError::Signing(format!("cannot canonicalise request: {e}")))?;
    Ok(Sha256::digest(bytes).into())
}

/// Sign `request` with the key in `material`.
pub fn sign(material: &[u8], request: &CrossChainRequest) -> Result<RequestSignature> {
    SecretKey::parse(material)?.sign(request)
}

fn decimal_scalar(text: &[u8]) -> Result<[u8; 32]> {
    let text =
        std::str::from_utf8(text).map_err(|e| RelayError::decode("signature scalar", e))?;
    let value = U256::from_dec_str(text)
        .map_err(|e| RelayError::decode("signature scalar", format!("{e:?}")))?;
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    Ok(bytes)
}

/// Check `signature` against `request` and the signer's public key.
pub fn verify(
    key: &VerifyingKey,
    request: &CrossChainRequest,
    signature: &RequestSignature,
) -> Result<()> {
    let r = decimal_scalar(&signature.r)?;
    let s = decimal_scalar(&signature.s)?;
    let signature = Signature::from_scalars(r, s)
        .map_err(|e| RelayError::Signing(format!("malformed signature: {e}")))?;
    key.verify_prehash(&request_digest(request)?, &signature)
        .map_err(|_| RelayError::Signing("invalid signature".to_owned()))
}
