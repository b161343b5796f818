// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Crypto primitives shared by the attestation verifiers.
//!
//! This crate provides hashing over byte spans, signature verification for
//! the algorithm/encoding combinations that appear in attestation evidence
//! (ECDSA P-256/P-384 in fixed, DER and little-endian forms, RSA PKCS#1
//! v1.5 and PSS), X.509 certificate chain validation with CRL enforcement,
//! and PEM/DER splitting helpers.

pub mod chain;
pub mod pem;
pub mod sign;

pub use chain::{verify_certificate_chain, TrustStore, ValidationOptions};
pub use sign::PublicKey;

use sha2::Digest as _;

/// SHA-256 over the concatenation of the given spans.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = sha2::Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// SHA-384 over the concatenation of the given spans.
pub fn sha384(parts: &[&[u8]]) -> [u8; 48] {
    let mut hasher = sha2::Sha384::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// SHA-512 over the concatenation of the given spans.
pub fn sha512(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = sha2::Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
