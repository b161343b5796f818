// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! The SGX quote verification algorithm.

use attest_crypto::chain::{cert_has_public_key_pem, cert_is_ca};
use attest_crypto::{sha256, verify_certificate_chain, TrustStore, ValidationOptions};
use attest_types::claims::{SgxClaims, SgxTcbLevelClaims};
use attest_types::{Options, Result, VerificationError};
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::collateral::{download_collateral, download_root_ca};
use crate::constants::{INTEL_SGX_ROOT_PUBLIC_KEY_PEM, PCK_CERT_COMMON_NAME};
use crate::extension::{parse_sgx_extensions, SgxExtensions};
use crate::quote::Quote;
use crate::tcb::{verify_qe_identity, verify_tcb_info};
use crate::QuoteCollateral;

/// Verify an SGX quote and produce claims.
///
/// Caller-supplied endorsements are used as-is (no network I/O) unless
/// `fresh_endorsements` is set; otherwise the collateral is fetched from
/// Intel's endpoints using the CA type and fmspc certified by the
/// (at that point still unverified) PCK leaf.
pub async fn verify(
    evidence: &[u8],
    endorsements: &[u8],
    options: &Options,
    client: &reqwest::Client,
) -> Result<SgxClaims> {
    let quote = Quote::parse(evidence)?;
    let pck_chain_ders =
        attest_crypto::pem::certs_to_der(quote.signature_data.certification_data)?;
    let pck_ext = parse_sgx_extensions(&pck_chain_ders[0])?;

    let (collateral, root_ca_pem) =
        obtain_collateral(endorsements, &pck_ext, options, client).await?;

    if options.verbosity > 0 {
        info!(
            major = collateral.major_version,
            minor = collateral.minor_version,
            tee_type = collateral.tee_type,
            tcb_info_bytes = collateral.tcb_info.len(),
            qe_identity_bytes = collateral.qe_identity.len(),
            "SGX collateral"
        );
    }

    let mut store = TrustStore::new();
    store.add_crl(&collateral.root_ca_crl)?;
    store.add_crl(&collateral.pck_crl)?;
    if let Some(root_pem) = &root_ca_pem {
        store.add_anchor_pem(root_pem)?;
    }
    let validation = ValidationOptions::from_options(options);

    // PCK CRL issuer chain, then the PCK chain itself. The root is either
    // the configured anchor or auto-trusted pending the Intel key check.
    let crl_issuer_chain = attest_crypto::pem::certs_to_der(&collateral.pck_crl_issuer_chain)?;
    verify_certificate_chain(&crl_issuer_chain, &store, &validation)?;
    let pck_chain = verify_certificate_chain(&pck_chain_ders, &store, &validation)?;

    let pck_leaf_der = &pck_chain[0];
    let pck_root_der = pck_chain.last().expect("chain is non-empty");
    check_pck_leaf_common_name(pck_leaf_der)?;
    if !cert_has_public_key_pem(pck_root_der, INTEL_SGX_ROOT_PUBLIC_KEY_PEM)? {
        return Err(VerificationError::PublicKeyMismatch {
            which: "Intel SGX provisioning root",
        });
    }
    if !cert_is_ca(pck_root_der)? {
        return Err(VerificationError::CertChainInvalid {
            reason: "root certificate is not a CA".into(),
            depth: pck_chain.len() - 1,
        });
    }

    // QE report signature: ECDSA-P256 with the PCK leaf key.
    let pck_leaf_key = spki_point(pck_leaf_der)?;
    if !attest_crypto::sign::verify_p256_fixed(
        &pck_leaf_key,
        quote.signature_data.qe_report_raw,
        quote.signature_data.qe_report_signature,
    ) {
        return Err(VerificationError::SignatureInvalid { which: "QE report" });
    }

    // Quote signature: ECDSA-P256 with the attestation key from the
    // signature data, over the signed quote prefix.
    let attest_key = attest_crypto::sign::sec1_from_raw_p256(quote.signature_data.attest_pub_key);
    if !attest_crypto::sign::verify_p256_fixed(
        &attest_key,
        quote.signed_span,
        quote.signature_data.quote_signature,
    ) {
        return Err(VerificationError::SignatureInvalid { which: "quote" });
    }

    // The QE binds the attestation key: SHA-256(attest_pub_key || auth_data)
    // must equal the first half of the QE report data.
    let binding = sha256(&[
        quote.signature_data.attest_pub_key,
        quote.signature_data.auth_data,
    ]);
    if binding != quote.signature_data.qe_report.report_data[..32] {
        return Err(VerificationError::SignatureInvalid {
            which: "attestation key binding hash",
        });
    }

    let tcb = check_tcb_info(&collateral, &pck_ext, &store, &validation)?;
    check_qe_identity(&collateral, &quote, &store, &validation, options)?;

    debug!(status = %tcb.status, "SGX quote verified");
    Ok(SgxClaims {
        measurement: quote.report_body.mr_enclave,
        report_data: quote.report_body.report_data,
        mr_signer: quote.report_body.mr_signer,
        isv_prod_id: quote.report_body.isv_prod_id,
        isv_svn: quote.report_body.isv_svn,
        attributes: quote.report_body.attributes,
        tcb,
    })
}

/// Resolve the endorsements for a quote without verifying anything:
/// caller-supplied collateral is passed through, otherwise a fresh set is
/// downloaded for the CA and fmspc named by the quote's PCK leaf. Returns
/// the packed stream layout.
pub async fn prepare_endorsements(
    evidence: &[u8],
    endorsements: &[u8],
    options: &Options,
    client: &reqwest::Client,
) -> Result<Vec<u8>> {
    if !endorsements.is_empty() && !options.fresh_endorsements {
        return Ok(endorsements.to_vec());
    }
    let quote = Quote::parse(evidence)?;
    let pck_ders = attest_crypto::pem::certs_to_der(quote.signature_data.certification_data)?;
    let pck_ext = parse_sgx_extensions(&pck_ders[0])?;
    let ca = if pck_ext.has_platform_instance_id() {
        "platform"
    } else {
        "processor"
    };
    let fmspc = hex::encode(&pck_ext.fmspc);
    Ok(download_collateral(client, ca, &fmspc, false).await?.to_bytes())
}

async fn obtain_collateral(
    endorsements: &[u8],
    pck_ext: &SgxExtensions,
    options: &Options,
    client: &reqwest::Client,
) -> Result<(QuoteCollateral, Option<String>)> {
    if !endorsements.is_empty() && !options.fresh_endorsements {
        let collateral = QuoteCollateral::parse(endorsements)?;
        let root = if let Some(pem) = &options.root_ca_certificate {
            Some(pem.clone())
        } else if options.fresh_root_ca_certificate {
            Some(pem_string(download_root_ca(client).await?)?)
        } else {
            // Trust the root contained in the endorsements; its key is
            // checked against the hard-coded Intel key afterwards.
            None
        };
        return Ok((collateral, root));
    }

    let ca = if pck_ext.has_platform_instance_id() {
        "platform"
    } else {
        "processor"
    };
    let fmspc = hex::encode(&pck_ext.fmspc);
    let collateral = download_collateral(client, ca, &fmspc, false).await?;
    let root = match &options.root_ca_certificate {
        Some(pem) => Some(pem.clone()),
        None => Some(pem_string(download_root_ca(client).await?)?),
    };
    Ok((collateral, root))
}

fn check_tcb_info(
    collateral: &QuoteCollateral,
    pck_ext: &SgxExtensions,
    store: &TrustStore,
    validation: &ValidationOptions,
) -> Result<SgxTcbLevelClaims> {
    let issuer_chain = attest_crypto::pem::certs_to_der(&collateral.tcb_info_issuer_chain)?;
    let chain = verify_certificate_chain(&issuer_chain, store, validation)?;
    let root = chain.last().expect("chain is non-empty");
    if !cert_has_public_key_pem(root, INTEL_SGX_ROOT_PUBLIC_KEY_PEM)? {
        return Err(VerificationError::PublicKeyMismatch {
            which: "TCB info issuer root",
        });
    }
    let leaf_key = spki_point(&chain[0])?;
    verify_tcb_info(
        &collateral.tcb_info,
        &pck_ext.tcb,
        &pck_ext.fmspc,
        &pck_ext.pceid,
        &leaf_key,
    )
}

fn check_qe_identity(
    collateral: &QuoteCollateral,
    quote: &Quote,
    store: &TrustStore,
    validation: &ValidationOptions,
    options: &Options,
) -> Result<()> {
    if collateral.qe_identity.is_empty() && options.partial {
        debug!("no QE identity collateral, skipped under partial verification");
        return Ok(());
    }
    let issuer_chain = attest_crypto::pem::certs_to_der(&collateral.qe_identity_issuer_chain)?;
    let chain = verify_certificate_chain(&issuer_chain, store, validation)?;
    let root = chain.last().expect("chain is non-empty");
    if !cert_has_public_key_pem(root, INTEL_SGX_ROOT_PUBLIC_KEY_PEM)? {
        return Err(VerificationError::PublicKeyMismatch {
            which: "QE identity issuer root",
        });
    }
    let leaf_key = spki_point(&chain[0])?;
    verify_qe_identity(
        &collateral.qe_identity,
        &quote.signature_data.qe_report,
        &leaf_key,
    )
}

fn check_pck_leaf_common_name(pck_leaf_der: &[u8]) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(pck_leaf_der)
        .map_err(|e| VerificationError::MalformedEvidence(format!("invalid PCK leaf: {e}")))?;
    let has_expected_cn = cert
        .subject()
        .iter_common_name()
        .any(|cn| cn.as_str().map(|s| s == PCK_CERT_COMMON_NAME).unwrap_or(false));
    if !has_expected_cn {
        return Err(VerificationError::CertChainInvalid {
            reason: "PCK certificate does not have the expected common name".into(),
            depth: 0,
        });
    }
    Ok(())
}

/// SEC1 point bytes of a certificate's EC public key.
fn spki_point(cert_der: &[u8]) -> Result<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| VerificationError::MalformedEvidence(format!("invalid certificate: {e}")))?;
    Ok(cert.public_key().subject_public_key.data.as_ref().to_vec())
}

fn pem_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| VerificationError::MalformedEvidence("root CA PEM is not UTF-8".into()))
}
