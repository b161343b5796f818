// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Shared types for remote attestation verification.
//!
//! This crate defines the attestation envelope exchanged with callers, the
//! verification options, the claims produced by a successful verification,
//! the error type shared by all verifier crates, and the bounds-checked
//! byte reader used to parse vendor evidence formats.

use serde::{Deserialize, Serialize};

pub mod claims;
pub mod codec;
mod error;

pub use claims::{AciClaims, Claims, SgxClaims, SnpClaims, SnpTcbVersion, UvmClaims};
pub use error::{Result, VerificationError};

/// The attestation technology that produced a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "sgx")]
    Sgx,
    #[serde(rename = "sevsnp")]
    SevSnp,
    #[serde(rename = "openenclave")]
    OpenEnclave,
    #[serde(rename = "aci")]
    Aci,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sgx => "sgx",
            Self::SevSnp => "sevsnp",
            Self::OpenEnclave => "openenclave",
            Self::Aci => "aci",
        }
    }
}

/// An attestation envelope: evidence plus optional endorsements.
///
/// The JSON form carries the byte fields base64-encoded; the CBOR form
/// carries raw byte strings. Both round-trip losslessly. Bundles are
/// immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationBundle {
    pub source: Source,
    #[serde(with = "bytes_b64")]
    pub evidence: Vec<u8>,
    #[serde(with = "bytes_b64", default, skip_serializing_if = "Vec::is_empty")]
    pub endorsements: Vec<u8>,
    /// UVM endorsements (COSE_Sign1); only meaningful for [`Source::Aci`].
    #[serde(with = "bytes_b64", default, skip_serializing_if = "Vec::is_empty")]
    pub uvm_endorsements: Vec<u8>,
}

impl AttestationBundle {
    pub fn new(source: Source, evidence: Vec<u8>, endorsements: Vec<u8>) -> Self {
        Self {
            source,
            evidence,
            endorsements,
            uvm_endorsements: Vec::new(),
        }
    }

    pub fn with_uvm_endorsements(mut self, uvm_endorsements: Vec<u8>) -> Self {
        self.uvm_endorsements = uvm_endorsements;
        self
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| VerificationError::MalformedEvidence(format!("envelope encode: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| VerificationError::MalformedEvidence(format!("envelope decode: {e}")))
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| VerificationError::MalformedEvidence(format!("envelope encode: {e}")))?;
        Ok(buf)
    }

    pub fn from_cbor(cbor: &[u8]) -> Result<Self> {
        ciborium::from_reader(cbor)
            .map_err(|e| VerificationError::MalformedEvidence(format!("envelope decode: {e}")))
    }
}

/// Verification options. All knobs default to off.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Fixed timestamp used as "now" for certificate validity checks.
    /// Defaults to the system clock.
    pub verification_time: Option<std::time::SystemTime>,
    /// Skip notBefore/notAfter and CRL time checks entirely.
    pub ignore_time: bool,
    /// Caller-supplied trust anchor (PEM). If absent and
    /// `fresh_root_ca_certificate` is set, the root is fetched from the
    /// vendor; otherwise the root contained in the endorsements is trusted
    /// (subject to the hard-coded vendor public key check).
    pub root_ca_certificate: Option<String>,
    /// Ignore caller-supplied endorsements and fetch new ones.
    pub fresh_endorsements: bool,
    /// Always refetch the root CA certificate.
    pub fresh_root_ca_certificate: bool,
    /// Allow verification to succeed with a subset of claims populated when
    /// collateral is incomplete.
    pub partial: bool,
    /// Diagnostic verbosity (0-2). Affects log output only, never results.
    pub verbosity: u8,
}

/// Byte fields that serialize as base64 strings in human-readable formats
/// and as raw byte strings otherwise.
mod bytes_b64 {
    use base64::prelude::*;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            BASE64_STANDARD.decode(s.as_bytes()).map_err(D::Error::custom)
        } else {
            serde_bytes::ByteBuf::deserialize(deserializer).map(serde_bytes::ByteBuf::into_vec)
        }
    }
}
