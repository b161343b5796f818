// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TCB info and QE identity verification against locally signed documents.

use attest_types::VerificationError;
use p256::ecdsa::signature::hazmat::PrehashSigner as _;
use p256::ecdsa::SigningKey;
use sgx_qvl::extension::PckTcb;
use sgx_qvl::quote::{ReportBody, REPORT_BODY_SIZE};
use sgx_qvl::tcb::{verify_qe_identity, verify_tcb_info};
use sha2::{Digest as _, Sha256};

fn signer() -> (SigningKey, Vec<u8>) {
    let key = SigningKey::from_slice(&[42u8; 32]).unwrap();
    let point = key.verifying_key().to_encoded_point(false);
    (key, point.as_bytes().to_vec())
}

fn sign_envelope(key: &SigningKey, body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let sig: p256::ecdsa::Signature = key.sign_prehash(&digest).unwrap();
    hex::encode(sig.to_bytes())
}

fn tcb_level(comp: u8, pce: u16, status: &str) -> String {
    let comps: Vec<String> = (1..=16)
        .map(|i| format!("\"sgxtcbcomp{i:02}svn\":{comp}"))
        .collect();
    format!(
        "{{\"tcb\":{{{},\"pcesvn\":{pce}}},\"tcbDate\":\"2021-06-09T00:00:00Z\",\"tcbStatus\":\"{status}\"}}",
        comps.join(",")
    )
}

fn tcb_info_doc(key: &SigningKey, levels: &[String]) -> String {
    let body = format!(
        "{{\"version\":2,\"issueDate\":\"2022-04-13T09:38:17Z\",\"nextUpdate\":\"2022-05-13T09:38:17Z\",\
         \"fmspc\":\"00906ed50000\",\"pceId\":\"0000\",\"tcbType\":0,\"tcbEvaluationDataNumber\":12,\
         \"tcbLevels\":[{}]}}",
        levels.join(",")
    );
    let signature = sign_envelope(key, &body);
    format!("{{\"tcbInfo\":{body},\"signature\":\"{signature}\"}}")
}

fn pck_tcb(comp: u8, pce: u16) -> PckTcb {
    PckTcb {
        comp_svn: [comp; 16],
        pce_svn: pce,
        cpu_svn: [0; 16],
    }
}

const FMSPC: &[u8] = &[0x00, 0x90, 0x6e, 0xd5, 0x00, 0x00];
const PCEID: &[u8] = &[0x00, 0x00];

#[test]
fn selects_first_matching_level() {
    let (key, pubkey) = signer();
    let doc = tcb_info_doc(
        &key,
        &[
            tcb_level(10, 11, "UpToDate"),
            tcb_level(5, 6, "SWHardeningNeeded"),
            tcb_level(1, 1, "OutOfDate"),
        ],
    );

    // PCK at (7,8) skips the first level and must take the second, even
    // though the third also matches.
    let selected = verify_tcb_info(doc.as_bytes(), &pck_tcb(7, 8), FMSPC, PCEID, &pubkey).unwrap();
    assert_eq!(selected.status, "SWHardeningNeeded");

    // Exact equality selects.
    let selected = verify_tcb_info(doc.as_bytes(), &pck_tcb(10, 11), FMSPC, PCEID, &pubkey).unwrap();
    assert_eq!(selected.status, "UpToDate");
}

#[test]
fn no_matching_level_is_an_error() {
    let (key, pubkey) = signer();
    let doc = tcb_info_doc(&key, &[tcb_level(10, 11, "UpToDate")]);
    let err = verify_tcb_info(doc.as_bytes(), &pck_tcb(9, 11), FMSPC, PCEID, &pubkey).unwrap_err();
    assert!(matches!(err, VerificationError::NoMatchingTcbLevel));
}

#[test]
fn fmspc_mismatch_rejected() {
    let (key, pubkey) = signer();
    let doc = tcb_info_doc(&key, &[tcb_level(1, 1, "UpToDate")]);
    let err = verify_tcb_info(
        doc.as_bytes(),
        &pck_tcb(7, 8),
        &[0xde, 0xad, 0xbe, 0xef, 0x00, 0x00],
        PCEID,
        &pubkey,
    )
    .unwrap_err();
    assert!(matches!(err, VerificationError::TcbParse(_)));
}

#[test]
fn tampered_tcb_info_signature_rejected() {
    let (key, pubkey) = signer();
    let doc = tcb_info_doc(&key, &[tcb_level(1, 1, "UpToDate")]);
    let tampered = doc.replace("UpToDate", "UpToDatX");
    let err =
        verify_tcb_info(tampered.as_bytes(), &pck_tcb(7, 8), FMSPC, PCEID, &pubkey).unwrap_err();
    assert!(matches!(
        err,
        VerificationError::SignatureInvalid { which: "TCB info" }
    ));
}

#[test]
fn issue_date_floor_enforced() {
    let (key, pubkey) = signer();
    let body = format!(
        "{{\"version\":2,\"issueDate\":\"2016-01-01T00:00:00Z\",\"nextUpdate\":\"2022-05-13T09:38:17Z\",\
         \"fmspc\":\"00906ed50000\",\"pceId\":\"0000\",\"tcbType\":0,\"tcbEvaluationDataNumber\":12,\
         \"tcbLevels\":[{}]}}",
        tcb_level(1, 1, "UpToDate")
    );
    let signature = sign_envelope(&key, &body);
    let doc = format!("{{\"tcbInfo\":{body},\"signature\":\"{signature}\"}}");
    let err = verify_tcb_info(doc.as_bytes(), &pck_tcb(7, 8), FMSPC, PCEID, &pubkey).unwrap_err();
    assert!(matches!(err, VerificationError::TcbParse(_)));
}

fn qe_report(isv_svn: u16, mr_signer: [u8; 32], flags: u64) -> ReportBody {
    let mut body = vec![0u8; REPORT_BODY_SIZE];
    body[48..56].copy_from_slice(&flags.to_le_bytes());
    body[128..160].copy_from_slice(&mr_signer);
    body[256..258].copy_from_slice(&1u16.to_le_bytes()); // isv_prod_id
    body[258..260].copy_from_slice(&isv_svn.to_le_bytes());
    ReportBody::parse(&body).unwrap()
}

fn qe_identity_doc(key: &SigningKey, mr_signer: &[u8; 32], levels: &[(u16, &str)]) -> String {
    let levels: Vec<String> = levels
        .iter()
        .map(|(svn, status)| {
            format!(
                "{{\"tcb\":{{\"isvsvn\":{svn}}},\"tcbDate\":\"2021-06-09T00:00:00Z\",\"tcbStatus\":\"{status}\"}}"
            )
        })
        .collect();
    let body = format!(
        "{{\"id\":\"QE\",\"version\":2,\"issueDate\":\"2022-04-13T10:15:38Z\",\"nextUpdate\":\"2022-05-13T10:15:38Z\",\
         \"miscselect\":\"00000000\",\"miscselectMask\":\"ffffffff\",\
         \"attributes\":\"01000000000000000000000000000000\",\"attributesMask\":\"f9ffffffffffffff0000000000000000\",\
         \"mrsigner\":\"{}\",\"isvprodid\":1,\"tcbLevels\":[{}]}}",
        hex::encode(mr_signer),
        levels.join(",")
    );
    let signature = sign_envelope(key, &body);
    format!("{{\"enclaveIdentity\":{body},\"signature\":\"{signature}\"}}")
}

#[test]
fn qe_identity_accepts_equal_isv_svn() {
    let (key, pubkey) = signer();
    let mr_signer = [0x5a; 32];
    // flags = 0x01 (INIT), matches attributes under the mask with DEBUG clear.
    let report = qe_report(6, mr_signer, 0x01);
    let doc = qe_identity_doc(&key, &mr_signer, &[(8, "UpToDate"), (6, "OutOfDate")]);
    verify_qe_identity(doc.as_bytes(), &report, &pubkey).unwrap();
}

#[test]
fn qe_identity_without_matching_level_rejected() {
    let (key, pubkey) = signer();
    let mr_signer = [0x5a; 32];
    let report = qe_report(3, mr_signer, 0x01);
    let doc = qe_identity_doc(&key, &mr_signer, &[(8, "UpToDate"), (6, "OutOfDate")]);
    let err = verify_qe_identity(doc.as_bytes(), &report, &pubkey).unwrap_err();
    assert!(matches!(err, VerificationError::NoMatchingTcbLevel));
}

#[test]
fn qe_identity_mrsigner_mismatch_rejected() {
    let (key, pubkey) = signer();
    let report = qe_report(6, [0x11; 32], 0x01);
    let doc = qe_identity_doc(&key, &[0x5a; 32], &[(6, "UpToDate")]);
    let err = verify_qe_identity(doc.as_bytes(), &report, &pubkey).unwrap_err();
    assert!(matches!(
        err,
        VerificationError::QeIdentityMismatch { field: "mrsigner" }
    ));
}

#[test]
fn qe_identity_debug_flag_rejected() {
    let (key, pubkey) = signer();
    let mr_signer = [0x5a; 32];
    // DEBUG (bit 1) is outside the attributes mask, so the attribute
    // equality check passes and the dedicated debug check must fire.
    let report = qe_report(6, mr_signer, 0x03);
    let doc = qe_identity_doc(&key, &mr_signer, &[(6, "UpToDate")]);
    let err = verify_qe_identity(doc.as_bytes(), &report, &pubkey).unwrap_err();
    assert!(matches!(
        err,
        VerificationError::QeIdentityMismatch {
            field: "debug flag set"
        }
    ));
}

#[test]
fn qe_identity_tampered_signature_rejected() {
    let (key, pubkey) = signer();
    let mr_signer = [0x5a; 32];
    let report = qe_report(6, mr_signer, 0x01);
    let doc = qe_identity_doc(&key, &mr_signer, &[(6, "UpToDate")]);
    let tampered = doc.replace("UpToDate", "UpToDatX");
    let err = verify_qe_identity(tampered.as_bytes(), &report, &pubkey).unwrap_err();
    assert!(matches!(
        err,
        VerificationError::SignatureInvalid { which: "QE identity" }
    ));
}
