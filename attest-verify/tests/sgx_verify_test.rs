// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! SGX verification pipeline against a locally minted PCK hierarchy.
//!
//! A forged hierarchy can satisfy every structural check (quote layout,
//! chain signatures, CRLs, common name) but must be stopped at the pinned
//! Intel provisioning root key. These tests drive the pipeline to exactly
//! that point, and check that chain-level defects surface first.

use attest_types::{AttestationBundle, Options, Source, VerificationError};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DnType, IsCa, KeyPair,
    KeyUsagePurpose, RevokedCertParams, SerialNumber,
};
use sgx_qvl::extension::{build as ext_build, PckTcb, SgxExtensions};
use sgx_qvl::QuoteCollateral;

struct PckHierarchy {
    root_key: KeyPair,
    root: rcgen::Certificate,
    pck_ca_key: KeyPair,
    pck_ca: rcgen::Certificate,
    pck_leaf: rcgen::Certificate,
    leaf_serial: Vec<u8>,
}

fn sgx_extensions() -> SgxExtensions {
    SgxExtensions {
        ppid: vec![0x11; 16],
        tcb: PckTcb {
            comp_svn: [4; 16],
            pce_svn: 11,
            cpu_svn: [0; 16],
        },
        pceid: vec![0, 0],
        fmspc: vec![0x00, 0x90, 0x6e, 0xd5, 0x00, 0x00],
        sgx_type: 0,
        platform_instance_id: None,
        configuration: None,
    }
}

fn build_hierarchy() -> PckHierarchy {
    let root_key = KeyPair::generate().unwrap();
    let mut root_params = CertificateParams::default();
    root_params
        .distinguished_name
        .push(DnType::CommonName, "Test SGX Root CA");
    root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    root_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let root = root_params.self_signed(&root_key).unwrap();

    let pck_ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::default();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "Test SGX PCK Processor CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let pck_ca = ca_params.signed_by(&pck_ca_key, &root, &root_key).unwrap();

    let leaf_key = KeyPair::generate().unwrap();
    let leaf_serial = vec![0x05, 0x17, 0x2a];
    let mut leaf_params = CertificateParams::default();
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "Intel SGX PCK Certificate");
    leaf_params.serial_number = Some(SerialNumber::from_slice(&leaf_serial));
    leaf_params.custom_extensions = vec![rcgen::CustomExtension::from_oid_content(
        &[1, 2, 840, 113741, 1, 13, 1],
        ext_build::encode_sgx_extension(&sgx_extensions()),
    )];
    let pck_leaf = leaf_params
        .signed_by(&leaf_key, &pck_ca, &pck_ca_key)
        .unwrap();

    PckHierarchy {
        root_key,
        root,
        pck_ca_key,
        pck_ca,
        pck_leaf,
        leaf_serial,
    }
}

fn crl_for(
    issuer: &rcgen::Certificate,
    issuer_key: &KeyPair,
    revoked_serials: &[&[u8]],
) -> Vec<u8> {
    use time::macros::datetime;
    let params = CertificateRevocationListParams {
        this_update: datetime!(2024-01-01 00:00:00 UTC),
        next_update: datetime!(2099-01-01 00:00:00 UTC),
        crl_number: SerialNumber::from_slice(&[1]),
        issuing_distribution_point: None,
        revoked_certs: revoked_serials
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from_slice(serial),
                revocation_time: datetime!(2024-06-01 00:00:00 UTC),
                reason_code: None,
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: rcgen::KeyIdMethod::Sha256,
    };
    params.signed_by(issuer, issuer_key).unwrap().der().to_vec()
}

/// Assemble a structurally valid ECDSA quote around the PCK chain PEM.
fn build_quote(certification_data: &[u8]) -> Vec<u8> {
    let mut sig_data = Vec::new();
    sig_data.extend_from_slice(&[0u8; 64]); // quote signature
    sig_data.extend_from_slice(&[1u8; 64]); // attestation public key
    sig_data.extend_from_slice(&[0u8; 384]); // QE report
    sig_data.extend_from_slice(&[0u8; 64]); // QE report signature
    sig_data.extend_from_slice(&4u16.to_le_bytes());
    sig_data.extend_from_slice(b"auth");
    sig_data.extend_from_slice(&5u16.to_le_bytes()); // PCK_CERT_CHAIN
    sig_data.extend_from_slice(&(certification_data.len() as u32).to_le_bytes());
    sig_data.extend_from_slice(certification_data);

    let mut quote = Vec::new();
    quote.extend_from_slice(&3u16.to_le_bytes()); // version
    quote.extend_from_slice(&2u16.to_le_bytes()); // ECDSA-P256
    quote.extend_from_slice(&[0u8; 44]);
    quote.extend_from_slice(&[0u8; 384]); // report body
    quote.extend_from_slice(&(sig_data.len() as u32).to_le_bytes());
    quote.extend_from_slice(&sig_data);
    quote
}

fn pck_chain_pem(pki: &PckHierarchy) -> Vec<u8> {
    format!("{}{}{}", pki.pck_leaf.pem(), pki.pck_ca.pem(), pki.root.pem()).into_bytes()
}

fn collateral_for(pki: &PckHierarchy, revoke_leaf: bool) -> QuoteCollateral {
    let leaf_revocations: Vec<&[u8]> = if revoke_leaf {
        vec![&pki.leaf_serial]
    } else {
        Vec::new()
    };
    QuoteCollateral {
        major_version: 3,
        minor_version: 1,
        tee_type: 0,
        pck_crl_issuer_chain: format!("{}{}", pki.pck_ca.pem(), pki.root.pem()).into_bytes(),
        root_ca_crl: crl_for(&pki.root, &pki.root_key, &[]),
        pck_crl: crl_for(&pki.pck_ca, &pki.pck_ca_key, &leaf_revocations),
        tcb_info_issuer_chain: Vec::new(),
        tcb_info: Vec::new(),
        qe_identity_issuer_chain: Vec::new(),
        qe_identity: Vec::new(),
    }
}

fn bundle(pki: &PckHierarchy, revoke_leaf: bool) -> AttestationBundle {
    AttestationBundle::new(
        Source::Sgx,
        build_quote(&pck_chain_pem(pki)),
        collateral_for(pki, revoke_leaf).to_bytes(),
    )
}

#[tokio::test]
async fn forged_hierarchy_stops_at_intel_root_pin() {
    let pki = build_hierarchy();
    let err = attest_verify::verify(
        &bundle(&pki, false),
        &Options::default(),
        &reqwest::Client::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        VerificationError::PublicKeyMismatch {
            which: "Intel SGX provisioning root"
        }
    ));
}

#[tokio::test]
async fn revoked_pck_rejected_before_root_pin() {
    let pki = build_hierarchy();
    let err = attest_verify::verify(
        &bundle(&pki, true),
        &Options::default(),
        &reqwest::Client::new(),
    )
    .await
    .unwrap_err();
    match err {
        VerificationError::CertChainInvalid { reason, .. } => {
            assert!(reason.contains("revoked"), "unexpected reason: {reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn reordered_pck_chain_rejected() {
    let pki = build_hierarchy();
    let scrambled = format!("{}{}{}", pki.pck_ca.pem(), pki.pck_leaf.pem(), pki.root.pem());
    let mut attestation = bundle(&pki, false);
    attestation.evidence = build_quote(scrambled.as_bytes());
    let err = attest_verify::verify(&attestation, &Options::default(), &reqwest::Client::new())
        .await
        .unwrap_err();
    // The scrambled leaf has no SGX extension, or the chain walk fails;
    // either way the evidence is rejected before any trust decision.
    assert!(matches!(
        err,
        VerificationError::MalformedEvidence(_) | VerificationError::CertChainInvalid { .. }
    ));
}

#[tokio::test]
async fn truncated_quote_rejected() {
    let pki = build_hierarchy();
    let mut attestation = bundle(&pki, false);
    attestation.evidence.pop();
    let err = attest_verify::verify(&attestation, &Options::default(), &reqwest::Client::new())
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::MalformedEvidence(_)));
}
