// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! The SEV-SNP report verification algorithm.

use attest_crypto::chain::{cert_has_public_key_pem, cert_is_ca};
use attest_crypto::{sha384, verify_certificate_chain, TrustStore, ValidationOptions};
use attest_types::claims::SnpClaims;
use attest_types::{Options, Result, VerificationError};
use p384::ecdsa::signature::hazmat::PrehashVerifier as _;
use tracing::{debug, info, warn};

use crate::collateral::{download_endorsements, download_root_ca, SnpEndorsements};
use crate::report::{AttestationReport, SIG_ALGO_ECDSA_P384_SHA384};
use crate::AMD_MILAN_ROOT_PUBLIC_KEY_PEM;

/// Verify a SEV-SNP attestation report and produce claims.
///
/// Caller-supplied endorsements are the VCEK certificate chain as a PEM
/// bundle (or concatenated DER), optionally including `X509 CRL` blocks.
pub async fn verify(
    evidence: &[u8],
    endorsements: &[u8],
    options: &Options,
    client: &reqwest::Client,
) -> Result<SnpClaims> {
    let report = AttestationReport::parse(evidence)?;

    let endorsements = obtain_endorsements(&report, endorsements, options, client).await?;

    if options.verbosity > 0 {
        info!(
            chain_certs = endorsements.vcek_chain.len(),
            crls = endorsements.crls.len(),
            "SEV-SNP endorsements"
        );
    }

    let mut store = TrustStore::new();
    let mut validation = ValidationOptions::from_options(options);
    for crl in &endorsements.crls {
        store.add_crl(crl)?;
    }
    if endorsements.crls.is_empty() {
        // Caller-supplied chains may come without a CRL; revocation is
        // then not checkable.
        warn!("no CRL in SEV-SNP endorsements, skipping revocation checks");
        validation.require_crls = false;
    }

    if let Some(root_pem) = &options.root_ca_certificate {
        store.add_anchor_pem(root_pem)?;
    } else if let Some(root_der) = &endorsements.root_ca_certificate {
        store.add_anchor_der(root_der.clone());
    }

    let chain = verify_certificate_chain(&endorsements.vcek_chain, &store, &validation)?;
    if chain.len() != 3 {
        return Err(VerificationError::CertChainInvalid {
            reason: format!("unexpected certificate chain length {}", chain.len()),
            depth: chain.len().saturating_sub(1),
        });
    }
    let vcek_der = &chain[0];
    let ark_der = &chain[2];

    if !cert_has_public_key_pem(ark_der, AMD_MILAN_ROOT_PUBLIC_KEY_PEM)? {
        return Err(VerificationError::PublicKeyMismatch {
            which: "AMD Milan root",
        });
    }
    if !cert_is_ca(ark_der)? {
        return Err(VerificationError::CertChainInvalid {
            reason: "root certificate is not a CA".into(),
            depth: 2,
        });
    }

    if report.signature_algo != SIG_ALGO_ECDSA_P384_SHA384 {
        return Err(VerificationError::MalformedEvidence(format!(
            "unexpected signature algorithm {}",
            report.signature_algo
        )));
    }

    let vcek_key = match attest_crypto::PublicKey::from_cert_der(vcek_der)? {
        attest_crypto::PublicKey::EcP384(key) => key,
        _ => {
            return Err(VerificationError::MalformedEvidence(
                "VCEK does not carry a P-384 key".into(),
            ))
        }
    };
    let digest = sha384(&[AttestationReport::signed_span(evidence)]);
    let signature =
        attest_crypto::sign::p384_signature_from_le(&report.signature_r_le, &report.signature_s_le)?;
    vcek_key
        .verify_prehash(&digest, &signature)
        .map_err(|_| VerificationError::SignatureInvalid {
            which: "SEV-SNP report",
        })?;

    debug!(guest_svn = report.guest_svn, "SEV-SNP report verified");
    Ok(SnpClaims {
        measurement: report.measurement,
        report_data: report.report_data,
        guest_svn: report.guest_svn,
        policy: report.policy,
        platform_version: report.platform_version,
        chip_id: report.chip_id,
        reported_tcb: report.reported_tcb,
        launch_tcb: report.launch_tcb,
    })
}

/// Resolve the endorsements for a report without verifying anything:
/// caller-supplied endorsements are passed through, otherwise the VCEK
/// chain and CRL are fetched from the KDS and returned as one PEM bundle.
pub async fn prepare_endorsements(
    evidence: &[u8],
    endorsements: &[u8],
    options: &Options,
    client: &reqwest::Client,
) -> Result<Vec<u8>> {
    if !endorsements.is_empty() && !options.fresh_endorsements {
        return Ok(endorsements.to_vec());
    }
    let report = AttestationReport::parse(evidence)?;
    let fetched = download_endorsements(client, &report.chip_id, &report.reported_tcb).await?;
    let mut bundle = String::new();
    for der in &fetched.vcek_chain {
        bundle.push_str(&attest_crypto::pem::der_to_pem(der, "CERTIFICATE"));
    }
    for crl in &fetched.crls {
        let der = attest_crypto::pem::crl_to_der(crl)?;
        bundle.push_str(&attest_crypto::pem::der_to_pem(&der, "X509 CRL"));
    }
    Ok(bundle.into_bytes())
}

async fn obtain_endorsements(
    report: &AttestationReport,
    endorsements: &[u8],
    options: &Options,
    client: &reqwest::Client,
) -> Result<SnpEndorsements> {
    if !endorsements.is_empty() && !options.fresh_endorsements {
        let (vcek_chain, crls) = split_supplied_endorsements(endorsements)?;
        let root = if options.fresh_root_ca_certificate && options.root_ca_certificate.is_none() {
            Some(download_root_ca(client).await?)
        } else {
            None
        };
        return Ok(SnpEndorsements {
            vcek_chain,
            crls,
            root_ca_certificate: root,
        });
    }
    download_endorsements(client, &report.chip_id, &report.reported_tcb).await
}

/// Caller-supplied endorsements: certificates plus optional CRL blocks in
/// one PEM bundle, or a concatenated DER chain.
fn split_supplied_endorsements(data: &[u8]) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>)> {
    if let Ok(blocks) = ::pem::parse_many(data) {
        if !blocks.is_empty() {
            let mut certs = Vec::new();
            let mut crls = Vec::new();
            for block in blocks {
                match block.tag() {
                    "CERTIFICATE" => certs.push(block.into_contents()),
                    "X509 CRL" => crls.push(block.into_contents()),
                    other => {
                        return Err(VerificationError::MalformedEvidence(format!(
                            "unexpected PEM block '{other}' in endorsements"
                        )))
                    }
                }
            }
            if certs.is_empty() {
                return Err(VerificationError::MalformedEvidence(
                    "no certificates in endorsements".into(),
                ));
            }
            return Ok((certs, crls));
        }
    }
    Ok((attest_crypto::pem::certs_to_der(data)?, Vec::new()))
}
