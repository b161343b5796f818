// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Minimal did:x509 resolution.
//!
//! A did:x509 identifier pins a CA of an X.509 chain by fingerprint and
//! constrains the leaf through policies:
//! `did:x509:0:<hash>:<base64url-fingerprint>::<policy>...` with `eku` and
//! `subject` policies supported here. Resolution validates the chain's
//! link signatures, checks the fingerprint against the non-leaf
//! certificates, applies the policies to the leaf, and emits a DID
//! document carrying the leaf key as a JWK.

use attest_types::{Result, VerificationError};
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;

/// A JSON Web Key as embedded in DID documents. Only RSA public keys are
/// produced by this resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl JsonWebKey {
    /// Convert to an RSA public key. Non-RSA key types are unsupported for
    /// UVM endorsement signatures.
    pub fn to_rsa_public_key(&self) -> Result<rsa::RsaPublicKey> {
        if self.kty != "RSA" {
            return Err(resolution_err(format!(
                "unsupported JWK key type {}",
                self.kty
            )));
        }
        let n = decode_b64url(self.n.as_deref().unwrap_or_default(), "JWK modulus")?;
        let e = decode_b64url(self.e.as_deref().unwrap_or_default(), "JWK exponent")?;
        rsa::RsaPublicKey::new(
            rsa::BigUint::from_bytes_be(&n),
            rsa::BigUint::from_bytes_be(&e),
        )
        .map_err(|e| resolution_err(format!("invalid RSA JWK: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    pub public_key_jwk: JsonWebKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    pub id: String,
    #[serde(default)]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion_method: Option<String>,
}

/// Resolve a did:x509 identifier against the certificate chain it is
/// claimed for (leaf first, DER).
pub fn resolve(chain: &[Vec<u8>], did: &str) -> Result<DidDocument> {
    if chain.len() < 2 {
        return Err(resolution_err(
            "did:x509 requires a chain of at least two certificates".into(),
        ));
    }

    let parts: Vec<&str> = did.split("::").collect();
    if parts.len() < 2 {
        return Err(resolution_err("did:x509 without policies".into()));
    }
    let prefix: Vec<&str> = parts[0].split(':').collect();
    let (scheme, method, version, hash_alg, fingerprint) = match prefix.as_slice() {
        [s, m, v, h, f] => (*s, *m, *v, *h, *f),
        _ => return Err(resolution_err("malformed did:x509 prefix".into())),
    };
    if scheme != "did" || method != "x509" {
        return Err(resolution_err(format!("not a did:x509 identifier: {did}")));
    }
    if version != "0" {
        return Err(resolution_err(format!("unsupported did:x509 version {version}")));
    }

    verify_chain_links(chain)?;

    // The fingerprint must match one of the CA certificates.
    let matched = chain[1..].iter().any(|der| {
        ca_fingerprint(der, hash_alg)
            .map(|fp| fp == fingerprint)
            .unwrap_or(false)
    });
    if !matched {
        return Err(resolution_err(
            "no CA certificate matches the did:x509 fingerprint".into(),
        ));
    }

    let (_, leaf) = X509Certificate::from_der(&chain[0])
        .map_err(|e| resolution_err(format!("invalid leaf certificate: {e}")))?;
    for policy in &parts[1..] {
        apply_policy(&leaf, policy)?;
    }

    let jwk = leaf_jwk(&leaf)?;
    Ok(DidDocument {
        id: did.to_string(),
        verification_method: vec![VerificationMethod {
            id: format!("{did}#key-1"),
            method_type: "JsonWebKey2020".to_string(),
            controller: did.to_string(),
            public_key_jwk: jwk,
        }],
        assertion_method: Some(format!("{did}#key-1")),
    })
}

fn verify_chain_links(chain: &[Vec<u8>]) -> Result<()> {
    for i in 0..chain.len() - 1 {
        let (_, child) = X509Certificate::from_der(&chain[i])
            .map_err(|e| resolution_err(format!("invalid certificate at {i}: {e}")))?;
        let (_, parent) = X509Certificate::from_der(&chain[i + 1])
            .map_err(|e| resolution_err(format!("invalid certificate at {}: {e}", i + 1)))?;
        if child.issuer() != parent.subject() {
            return Err(resolution_err(format!("certificate {i} is not issued by its successor")));
        }
        attest_crypto::sign::verify_x509_signature(
            child.tbs_certificate.as_ref(),
            &child.signature_algorithm,
            child.signature_value.data.as_ref(),
            parent.public_key(),
        )
        .map_err(|reason| resolution_err(format!("certificate {i} signature: {reason}")))?;
    }
    Ok(())
}

fn ca_fingerprint(der: &[u8], hash_alg: &str) -> Result<String> {
    let digest = match hash_alg {
        "sha256" => attest_crypto::sha256(&[der]).to_vec(),
        "sha384" => attest_crypto::sha384(&[der]).to_vec(),
        "sha512" => attest_crypto::sha512(&[der]).to_vec(),
        other => return Err(resolution_err(format!("unsupported fingerprint algorithm {other}"))),
    };
    Ok(BASE64_URL_SAFE_NO_PAD.encode(digest))
}

fn apply_policy(leaf: &X509Certificate, policy: &str) -> Result<()> {
    let (name, value) = policy
        .split_once(':')
        .ok_or_else(|| resolution_err(format!("malformed policy '{policy}'")))?;
    match name {
        "eku" => check_eku(leaf, value),
        "subject" => check_subject(leaf, value),
        other => Err(resolution_err(format!("unsupported policy '{other}'"))),
    }
}

fn check_eku(leaf: &X509Certificate, eku_oid: &str) -> Result<()> {
    let eku = leaf
        .extended_key_usage()
        .map_err(|e| resolution_err(format!("invalid extended key usage: {e}")))?
        .ok_or_else(|| resolution_err("leaf has no extended key usage".into()))?;
    let found = eku
        .value
        .other
        .iter()
        .any(|oid| oid.to_id_string() == eku_oid);
    if !found {
        return Err(resolution_err(format!("leaf does not carry EKU {eku_oid}")));
    }
    Ok(())
}

fn check_subject(leaf: &X509Certificate, policy_value: &str) -> Result<()> {
    let fields: Vec<&str> = policy_value.split(':').collect();
    if fields.is_empty() || fields.len() % 2 != 0 {
        return Err(resolution_err("subject policy requires key:value pairs".into()));
    }
    for pair in fields.chunks(2) {
        let key = pair[0];
        let expected: Vec<u8> = percent_encoding::percent_decode_str(pair[1]).collect();
        let expected = String::from_utf8(expected)
            .map_err(|_| resolution_err("subject value is not UTF-8".into()))?;
        let matched = subject_values(leaf, key)?
            .iter()
            .any(|value| *value == expected);
        if !matched {
            return Err(resolution_err(format!("subject {key} does not match '{expected}'")));
        }
    }
    Ok(())
}

fn subject_values(leaf: &X509Certificate, key: &str) -> Result<Vec<String>> {
    use x509_parser::der_parser::oid;
    let oid = match key {
        "CN" => oid!(2.5.4.3),
        "C" => oid!(2.5.4.6),
        "L" => oid!(2.5.4.7),
        "ST" => oid!(2.5.4.8),
        "STREET" => oid!(2.5.4.9),
        "O" => oid!(2.5.4.10),
        "OU" => oid!(2.5.4.11),
        other => return Err(resolution_err(format!("unsupported subject key '{other}'"))),
    };
    Ok(leaf
        .subject()
        .iter_by_oid(&oid)
        .filter_map(|attr| attr.as_str().ok().map(|s| s.to_string()))
        .collect())
}

fn leaf_jwk(leaf: &X509Certificate) -> Result<JsonWebKey> {
    match attest_crypto::PublicKey::from_spki(leaf.public_key())? {
        attest_crypto::PublicKey::Rsa(key) => {
            use rsa::traits::PublicKeyParts;
            Ok(JsonWebKey {
                kty: "RSA".to_string(),
                n: Some(BASE64_URL_SAFE_NO_PAD.encode(key.n().to_bytes_be())),
                e: Some(BASE64_URL_SAFE_NO_PAD.encode(key.e().to_bytes_be())),
            })
        }
        _ => Err(resolution_err(
            "leaf key type is not supported for UVM endorsements".into(),
        )),
    }
}

fn decode_b64url(value: &str, what: &str) -> Result<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| resolution_err(format!("{what} is not valid base64url")))
}

fn resolution_err(msg: String) -> VerificationError {
    VerificationError::DidResolution(msg)
}
