// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Azure UVM endorsement verification.
//!
//! Confidential container platforms endorse the Utility VM a workload runs
//! in with a COSE_Sign1 envelope whose signing identity is a did:x509. The
//! verification here decodes the envelope, resolves the issuer DID against
//! the embedded certificate chain, verifies the RSA signature, matches the
//! endorsed launch measurement against the SEV-SNP report, and requires
//! the `{did, feed, svn}` triple to match a known root of trust.

use attest_types::claims::UvmClaims;
use attest_types::{Result, VerificationError};
use serde::Deserialize;
use tracing::debug;

pub mod cose;
pub mod did;

pub use cose::CoseSign1;
pub use did::{DidDocument, JsonWebKey};

/// One trusted UVM endorser: an identity, the artifact feed it signs, and
/// the minimum acceptable SVN (compared lexicographically).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UvmRootOfTrust {
    pub did: String,
    pub feed: String,
    pub min_svn: String,
}

/// The built-in roots of trust for UVM endorsements in AMD SEV-SNP
/// attestations.
pub fn builtin_roots_of_trust() -> Vec<UvmRootOfTrust> {
    vec![
        // Confidential Azure Container Instances (ACI).
        UvmRootOfTrust {
            did: concat!(
                "did:x509:0:sha256:I__iuL25oXEVFdTP_aBLx_eT1RPHbCQ_ECBQfYZpt9s",
                "::eku:1.3.6.1.4.1.311.76.59.1.2"
            )
            .to_string(),
            feed: "ContainerPlat-AMD-UVM".to_string(),
            min_svn: "0".to_string(),
        },
        // Confidential Azure Kubernetes Service (AKS).
        UvmRootOfTrust {
            did: concat!(
                "did:x509:0:sha256:I__iuL25oXEVFdTP_aBLx_eT1RPHbCQ_ECBQfYZpt9s",
                "::eku:1.3.6.1.4.1.311.76.59.1.5"
            )
            .to_string(),
            feed: "ConfAKS-AMD-UVM".to_string(),
            min_svn: "0".to_string(),
        },
    ]
}

/// Whether an endorsement triple matches some root-of-trust row: equal did
/// and feed, and the row's minimum SVN not above the endorsed SVN.
pub fn matches_roots_of_trust(
    roots: &[UvmRootOfTrust],
    did: &str,
    feed: &str,
    svn: &str,
) -> bool {
    roots
        .iter()
        .any(|root| root.did == did && root.feed == feed && root.min_svn.as_str() <= svn)
}

#[derive(Debug, Deserialize)]
struct UvmEndorsementsPayload {
    #[serde(rename = "x-ms-sevsnpvm-guestsvn")]
    guest_svn: serde_json::Value,
    #[serde(rename = "x-ms-sevsnpvm-launchmeasurement")]
    launch_measurement: String,
}

/// Verify UVM endorsements against the measurement attested by the
/// SEV-SNP report, using the built-in roots of trust.
pub fn verify_uvm_endorsements(
    uvm_endorsements_raw: &[u8],
    snp_measurement: &[u8; 48],
) -> Result<UvmClaims> {
    verify_uvm_endorsements_with_roots(
        uvm_endorsements_raw,
        snp_measurement,
        &builtin_roots_of_trust(),
    )
}

/// Verify UVM endorsements against an explicit roots-of-trust table.
pub fn verify_uvm_endorsements_with_roots(
    uvm_endorsements_raw: &[u8],
    snp_measurement: &[u8; 48],
    roots: &[UvmRootOfTrust],
) -> Result<UvmClaims> {
    let envelope = CoseSign1::from_bytes(uvm_endorsements_raw)?;
    let phdr = envelope.protected_header()?;

    if phdr.content_type.as_deref() != Some(cose::CONTENT_TYPE_APPLICATION_JSON) {
        return Err(VerificationError::CoseDecode(format!(
            "unexpected payload content type {:?}, expected {}",
            phdr.content_type,
            cose::CONTENT_TYPE_APPLICATION_JSON
        )));
    }
    if !cose::is_rsa_alg(phdr.alg) {
        return Err(VerificationError::CoseDecode(format!(
            "signature algorithm {} is not an expected RSA algorithm",
            phdr.alg
        )));
    }
    if phdr.x5_chain.is_empty() {
        return Err(VerificationError::CoseDecode(
            "protected header carries no x5chain".into(),
        ));
    }
    let issuer = phdr
        .iss
        .clone()
        .ok_or_else(|| VerificationError::CoseDecode("protected header carries no iss".into()))?;

    let document = did::resolve(&phdr.x5_chain, &issuer)?;
    let method = document
        .verification_method
        .iter()
        .find(|method| method.controller == issuer)
        .ok_or_else(|| {
            VerificationError::DidResolution(format!(
                "no verification method with controller {issuer}"
            ))
        })?;
    let public_key = method.public_key_jwk.to_rsa_public_key()?;

    envelope.verify_rsa(phdr.alg, &public_key)?;

    let payload: UvmEndorsementsPayload = serde_json::from_slice(&envelope.payload)
        .map_err(|e| VerificationError::CoseDecode(format!("invalid endorsement payload: {e}")))?;

    let attested = hex::encode(snp_measurement);
    if payload.launch_measurement != attested {
        return Err(VerificationError::MeasurementMismatch {
            payload: payload.launch_measurement,
            attested,
        });
    }

    let svn = match &payload.guest_svn {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => {
            return Err(VerificationError::CoseDecode(
                "guest SVN is neither a string nor a number".into(),
            ))
        }
    };

    let feed = phdr.feed.clone().unwrap_or_default();
    if !matches_roots_of_trust(roots, &issuer, &feed, &svn) {
        return Err(VerificationError::UnknownRootOfTrust {
            did: issuer,
            feed,
            svn,
        });
    }

    debug!(did = %issuer, %feed, %svn, "UVM endorsements verified");
    Ok(UvmClaims {
        did: issuer,
        feed,
        svn,
        launch_measurement: payload.launch_measurement,
    })
}
