// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type Result<T, E = VerificationError> = std::result::Result<T, E>;

/// Failure modes of attestation verification.
///
/// Every failure aborts the enclosing request; no partial claims are
/// returned unless [`crate::Options::partial`] is set.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed evidence: {0}")]
    MalformedEvidence(String),

    #[error("unsupported version {got}, expected {expected}")]
    UnsupportedVersion { got: u32, expected: u32 },

    #[error("collateral fetch from {url} failed with HTTP status {status}")]
    CollateralFetchFailed { url: String, status: u16 },

    #[error("certificate chain invalid at depth {depth}: {reason}")]
    CertChainInvalid { reason: String, depth: usize },

    #[error("no CRL available for certificates issued by {issuer}")]
    CrlMissing { issuer: String },

    #[error("{which} signature verification failed")]
    SignatureInvalid { which: &'static str },

    #[error("{which} does not carry the expected public key")]
    PublicKeyMismatch { which: &'static str },

    #[error("malformed TCB document: {0}")]
    TcbParse(String),

    #[error("no matching TCB level found")]
    NoMatchingTcbLevel,

    #[error("QE identity mismatch: {field}")]
    QeIdentityMismatch { field: &'static str },

    #[error("COSE decode error: {0}")]
    CoseDecode(String),

    #[error("COSE signature verification failed")]
    CoseSignatureInvalid,

    #[error("DID resolution failed: {0}")]
    DidResolution(String),

    #[error("launch measurement {payload} does not equal attested measurement {attested}")]
    MeasurementMismatch { payload: String, attested: String },

    #[error("UVM endorsements (did {did}, feed {feed}, svn {svn}) match no known root of trust")]
    UnknownRootOfTrust {
        did: String,
        feed: String,
        svn: String,
    },

    #[error("deadline exceeded")]
    Timeout,
}
