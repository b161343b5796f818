// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! COSE_Sign1 parsing and RSA signature verification.
//!
//! UVM endorsements are COSE_Sign1 envelopes (RFC 8152) tagged 18, with
//! the signing identity carried in the protected header: the algorithm
//! (label 1), content type (label 3), x5chain (label 33, one DER
//! certificate or an array), and text labels `iss` and `feed`.

use std::io::Cursor;

use attest_types::{Result, VerificationError};
use ciborium::Value;
use rsa::RsaPublicKey;

use attest_crypto::sign::HashAlg;

const CBOR_TAG_COSE_SIGN1: u64 = 18;
const PARAM_ALG: i128 = 1;
const PARAM_CONTENT_TYPE: i128 = 3;
const PARAM_X5CHAIN: i128 = 33;
const HEADER_PARAM_ISSUER: &str = "iss";
const HEADER_PARAM_FEED: &str = "feed";

pub const CONTENT_TYPE_APPLICATION_JSON: &str = "application/json";

// COSE algorithm identifiers for the RSA family.
pub const COSE_ALG_PS256: i64 = -37;
pub const COSE_ALG_PS384: i64 = -38;
pub const COSE_ALG_PS512: i64 = -39;
pub const COSE_ALG_RS256: i64 = -257;
pub const COSE_ALG_RS384: i64 = -258;
pub const COSE_ALG_RS512: i64 = -259;

pub fn is_rsa_alg(alg: i64) -> bool {
    matches!(
        alg,
        COSE_ALG_PS256
            | COSE_ALG_PS384
            | COSE_ALG_PS512
            | COSE_ALG_RS256
            | COSE_ALG_RS384
            | COSE_ALG_RS512
    )
}

/// A parsed COSE_Sign1 envelope.
#[derive(Debug, Clone)]
pub struct CoseSign1 {
    /// Protected header bytes (a serialized CBOR map).
    pub protected: Vec<u8>,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

/// The protected-header fields UVM endorsements use.
#[derive(Debug, Clone, Default)]
pub struct ProtectedHeader {
    pub alg: i64,
    pub content_type: Option<String>,
    pub x5_chain: Vec<Vec<u8>>,
    pub iss: Option<String>,
    pub feed: Option<String>,
}

impl CoseSign1 {
    /// Parse a tagged COSE_Sign1. The tag is required.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);
        let value: Value = ciborium::from_reader(&mut reader)
            .map_err(|e| decode_err(format!("not valid CBOR: {e}")))?;
        if reader.position() != data.len() as u64 {
            return Err(decode_err("trailing bytes after COSE_Sign1".into()));
        }

        let array = match value {
            Value::Tag(CBOR_TAG_COSE_SIGN1, inner) => match *inner {
                Value::Array(array) => array,
                _ => return Err(decode_err("COSE_Sign1 tag content is not an array".into())),
            },
            _ => return Err(decode_err("missing COSE_Sign1 tag".into())),
        };
        if array.len() != 4 {
            return Err(decode_err(format!(
                "COSE_Sign1 array has {} elements, expected 4",
                array.len()
            )));
        }

        let protected = match &array[0] {
            Value::Bytes(b) => b.clone(),
            _ => return Err(decode_err("protected header is not a byte string".into())),
        };
        let payload = match &array[2] {
            Value::Bytes(b) => b.clone(),
            Value::Null => {
                return Err(decode_err("detached payloads are not supported".into()))
            }
            _ => return Err(decode_err("payload is not a byte string".into())),
        };
        let signature = match &array[3] {
            Value::Bytes(b) => b.clone(),
            _ => return Err(decode_err("signature is not a byte string".into())),
        };

        Ok(Self {
            protected,
            payload,
            signature,
        })
    }

    /// Decode the protected header map.
    pub fn protected_header(&self) -> Result<ProtectedHeader> {
        let mut reader = Cursor::new(&self.protected);
        let value: Value = ciborium::from_reader(&mut reader)
            .map_err(|e| decode_err(format!("protected header is not valid CBOR: {e}")))?;
        let map = match value {
            Value::Map(map) => map,
            _ => return Err(decode_err("protected header is not a map".into())),
        };

        let mut phdr = ProtectedHeader::default();
        for (label, value) in map {
            match label {
                Value::Integer(i) => match i128::from(i) {
                    PARAM_ALG => {
                        phdr.alg = value
                            .as_integer()
                            .map(i128::from)
                            .and_then(|v| i64::try_from(v).ok())
                            .ok_or_else(|| decode_err("alg is not an integer".into()))?;
                    }
                    PARAM_CONTENT_TYPE => {
                        phdr.content_type = Some(match value {
                            Value::Text(s) => s,
                            _ => return Err(decode_err("content type is not a text string".into())),
                        });
                    }
                    PARAM_X5CHAIN => phdr.x5_chain = decode_x5chain(value)?,
                    _ => {}
                },
                Value::Text(name) if name == HEADER_PARAM_ISSUER => {
                    phdr.iss = Some(text(value, "iss")?);
                }
                Value::Text(name) if name == HEADER_PARAM_FEED => {
                    phdr.feed = Some(text(value, "feed")?);
                }
                _ => {}
            }
        }
        Ok(phdr)
    }

    /// The Sig_structure covered by the signature:
    /// `["Signature1", protected, external_aad, payload]`.
    pub fn sig_structure(&self) -> Result<Vec<u8>> {
        let structure = Value::Array(vec![
            Value::Text("Signature1".to_string()),
            Value::Bytes(self.protected.clone()),
            Value::Bytes(Vec::new()),
            Value::Bytes(self.payload.clone()),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&structure, &mut buf)
            .map_err(|e| decode_err(format!("failed to encode Sig_structure: {e}")))?;
        Ok(buf)
    }

    /// Verify the envelope signature with an RSA key, dispatching padding
    /// and hash on the COSE algorithm.
    pub fn verify_rsa(&self, alg: i64, key: &RsaPublicKey) -> Result<()> {
        let sig_structure = self.sig_structure()?;
        let (hash, pss) = match alg {
            COSE_ALG_PS256 => (HashAlg::Sha256, true),
            COSE_ALG_PS384 => (HashAlg::Sha384, true),
            COSE_ALG_PS512 => (HashAlg::Sha512, true),
            COSE_ALG_RS256 => (HashAlg::Sha256, false),
            COSE_ALG_RS384 => (HashAlg::Sha384, false),
            COSE_ALG_RS512 => (HashAlg::Sha512, false),
            _ => return Err(decode_err(format!("algorithm {alg} is not an RSA algorithm"))),
        };
        let digest = match hash {
            HashAlg::Sha256 => attest_crypto::sha256(&[&sig_structure]).to_vec(),
            HashAlg::Sha384 => attest_crypto::sha384(&[&sig_structure]).to_vec(),
            HashAlg::Sha512 => attest_crypto::sha512(&[&sig_structure]).to_vec(),
        };
        let ok = if pss {
            attest_crypto::sign::verify_rsa_pss(key, hash, &digest, &self.signature)
        } else {
            attest_crypto::sign::verify_rsa_pkcs1(key, hash, &digest, &self.signature)
        };
        ok.then_some(())
            .ok_or(VerificationError::CoseSignatureInvalid)
    }
}

fn decode_x5chain(value: Value) -> Result<Vec<Vec<u8>>> {
    match value {
        Value::Bytes(der) => Ok(vec![der]),
        Value::Array(items) => {
            if items.is_empty() {
                return Err(decode_err("x5chain array is empty".into()));
            }
            items
                .into_iter()
                .map(|item| match item {
                    Value::Bytes(der) => Ok(der),
                    _ => Err(decode_err("x5chain item is not a byte string".into())),
                })
                .collect()
        }
        _ => Err(decode_err("x5chain is not an array or byte string".into())),
    }
}

fn text(value: Value, what: &str) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(decode_err(format!("{what} is not a text string"))),
    }
}

fn decode_err(msg: String) -> VerificationError {
    VerificationError::CoseDecode(msg)
}
