// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TCB info and QE identity verification.
//!
//! Both documents are JSON envelopes `{ body..., "signature": hex }` where
//! the signature covers the exact substring of the body value as served,
//! so the raw text is searched for the body span rather than re-serialized.

use attest_types::claims::SgxTcbLevelClaims;
use attest_types::{Result, VerificationError};
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use tracing::debug;

use crate::constants::{SGX_EARLIEST_TCB_CRL_DATE, SGX_FLAGS_DEBUG};
use crate::extension::PckTcb;
use crate::quote::ReportBody;

#[derive(Debug, Deserialize)]
struct TcbInfoDoc {
    #[serde(rename = "tcbInfo")]
    tcb_info: TcbInfo,
    signature: String,
}

#[derive(Debug, Deserialize)]
pub struct TcbInfo {
    pub version: u32,
    #[serde(rename = "issueDate")]
    pub issue_date: String,
    #[serde(rename = "nextUpdate")]
    pub next_update: String,
    pub fmspc: String,
    #[serde(rename = "pceId")]
    pub pce_id: String,
    #[serde(rename = "tcbType")]
    pub tcb_type: u64,
    #[serde(rename = "tcbEvaluationDataNumber", default)]
    pub tcb_evaluation_data_number: u64,
    #[serde(rename = "tcbLevels")]
    pub tcb_levels: Vec<TcbLevelEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TcbLevelEntry {
    pub tcb: serde_json::Value,
    #[serde(rename = "tcbDate")]
    pub tcb_date: String,
    #[serde(rename = "tcbStatus")]
    pub tcb_status: String,
    #[serde(rename = "advisoryIDs", default)]
    pub advisory_ids: Vec<String>,
}

impl TcbLevelEntry {
    fn comp_svn(&self) -> Result<[u8; 16]> {
        let mut out = [0u8; 16];
        for (i, svn) in out.iter_mut().enumerate() {
            let key = format!("sgxtcbcomp{:02}svn", i + 1);
            *svn = self.tcb[&key]
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| parse_err(format!("missing or invalid {key}")))?;
        }
        Ok(out)
    }

    fn pce_svn(&self) -> Result<u16> {
        self.tcb["pcesvn"]
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| parse_err("missing or invalid pcesvn".into()))
    }
}

/// Verify a TCB info document against the PCK-certified TCB and return the
/// selected level.
///
/// The selected level is the first (in source order) whose every component
/// SVN and whose PCE SVN are less than or equal to the PCK's.
pub fn verify_tcb_info(
    raw: &[u8],
    pck_tcb: &PckTcb,
    fmspc: &[u8],
    pceid: &[u8],
    signer_public_key_sec1: &[u8],
) -> Result<SgxTcbLevelClaims> {
    let text = std::str::from_utf8(raw).map_err(|_| parse_err("TCB info is not UTF-8".into()))?;
    let doc: TcbInfoDoc =
        serde_json::from_str(text).map_err(|e| parse_err(format!("TCB info: {e}")))?;
    let info = &doc.tcb_info;

    if info.version != 2 {
        return Err(parse_err(format!("unsupported tcbInfo version {}", info.version)));
    }
    check_datetime(&info.issue_date, "TCB issue date")?;
    check_datetime(&info.next_update, "TCB next update")?;

    if !hex_matches(&info.fmspc, fmspc) {
        return Err(parse_err("fmspc mismatch".into()));
    }
    if !hex_matches(&info.pce_id, pceid) {
        return Err(parse_err("pceId mismatch".into()));
    }
    if info.tcb_type != 0 {
        return Err(parse_err(format!("tcbType {} not supported", info.tcb_type)));
    }

    let mut selected: Option<SgxTcbLevelClaims> = None;
    for level in &info.tcb_levels {
        let comp_svn = level.comp_svn()?;
        let pce_svn = level.pce_svn()?;
        if selected.is_none() {
            let good = pck_tcb
                .comp_svn
                .iter()
                .zip(comp_svn.iter())
                .all(|(pck, level)| pck >= level)
                && pck_tcb.pce_svn >= pce_svn;
            if good {
                selected = Some(SgxTcbLevelClaims {
                    status: level.tcb_status.clone(),
                    date: level.tcb_date.clone(),
                    advisory_ids: level.advisory_ids.clone(),
                });
            }
        }
    }
    let selected = selected.ok_or(VerificationError::NoMatchingTcbLevel)?;
    debug!(status = %selected.status, "TCB level selected");

    let signed_span = signed_span(text, "{\"tcbInfo\":", ",\"signature\"")
        .ok_or_else(|| parse_err("tcbInfo does not contain a signature envelope".into()))?;
    let signature = hex::decode(&doc.signature)
        .map_err(|_| parse_err("TCB info signature is not valid hex".into()))?;
    if !attest_crypto::sign::verify_p256_fixed(signer_public_key_sec1, signed_span, &signature) {
        return Err(VerificationError::SignatureInvalid { which: "TCB info" });
    }

    Ok(selected)
}

#[derive(Debug, Deserialize)]
struct QeIdentityDoc {
    #[serde(rename = "enclaveIdentity")]
    enclave_identity: EnclaveIdentity,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct EnclaveIdentity {
    id: String,
    version: u32,
    #[serde(rename = "issueDate")]
    issue_date: String,
    #[serde(rename = "nextUpdate")]
    next_update: String,
    miscselect: String,
    #[serde(rename = "miscselectMask")]
    miscselect_mask: String,
    attributes: String,
    #[serde(rename = "attributesMask")]
    attributes_mask: String,
    mrsigner: String,
    isvprodid: u16,
    #[serde(rename = "tcbLevels")]
    tcb_levels: Vec<QeTcbLevel>,
}

#[derive(Debug, Deserialize)]
struct QeTcbLevel {
    tcb: QeTcb,
    #[serde(rename = "tcbStatus")]
    tcb_status: String,
}

#[derive(Debug, Deserialize)]
struct QeTcb {
    isvsvn: u16,
}

/// Verify a QE (or QVE) identity document against the QE report.
pub fn verify_qe_identity(
    raw: &[u8],
    qe_report: &ReportBody,
    signer_public_key_sec1: &[u8],
) -> Result<()> {
    let text =
        std::str::from_utf8(raw).map_err(|_| parse_err("QE identity is not UTF-8".into()))?;
    let doc: QeIdentityDoc =
        serde_json::from_str(text).map_err(|e| parse_err(format!("QE identity: {e}")))?;
    let identity = &doc.enclave_identity;

    if identity.version != 2 {
        return Err(parse_err(format!(
            "unsupported enclaveIdentity version {}",
            identity.version
        )));
    }
    if identity.id != "QE" && identity.id != "QVE" {
        return Err(parse_err(format!("enclave identity type {} not supported", identity.id)));
    }
    check_datetime(&identity.issue_date, "QE identity issue date")?;
    check_datetime(&identity.next_update, "QE identity next update")?;

    // First level whose isvsvn is <= the report's; equality selects.
    let selected = identity
        .tcb_levels
        .iter()
        .find(|level| level.tcb.isvsvn <= qe_report.isv_svn)
        .ok_or(VerificationError::NoMatchingTcbLevel)?;
    debug!(status = %selected.tcb_status, "QE TCB level selected");

    if !hex_matches(&identity.mrsigner, &qe_report.mr_signer) {
        return Err(VerificationError::QeIdentityMismatch { field: "mrsigner" });
    }
    if identity.isvprodid != qe_report.isv_prod_id {
        return Err(VerificationError::QeIdentityMismatch { field: "isvprodid" });
    }

    let miscselect = hex_u32(&identity.miscselect)?;
    let miscselect_mask = hex_u32(&identity.miscselect_mask)?;
    if qe_report.misc_select & miscselect_mask != miscselect {
        return Err(VerificationError::QeIdentityMismatch { field: "miscselect" });
    }

    if identity.attributes.len() != 32 || identity.attributes_mask.len() != 32 {
        return Err(parse_err("unexpected attribute value sizes".into()));
    }
    let flags = hex_u64(&identity.attributes[..16])?;
    let xfrm = hex_u64(&identity.attributes[16..])?;
    let flags_mask = hex_u64(&identity.attributes_mask[..16])?;
    let xfrm_mask = hex_u64(&identity.attributes_mask[16..])?;
    if qe_report.attribute_flags() & flags_mask != flags {
        return Err(VerificationError::QeIdentityMismatch { field: "attributes.flags" });
    }
    if qe_report.attribute_xfrm() & xfrm_mask != xfrm {
        return Err(VerificationError::QeIdentityMismatch { field: "attributes.xfrm" });
    }
    if qe_report.attribute_flags() & SGX_FLAGS_DEBUG != 0 {
        return Err(VerificationError::QeIdentityMismatch { field: "debug flag set" });
    }

    let signed_span = signed_span(text, "\"enclaveIdentity\":", ",\"signature\":\"")
        .ok_or_else(|| parse_err("QE identity does not contain a signature envelope".into()))?;
    let signature = hex::decode(&doc.signature)
        .map_err(|_| parse_err("QE identity signature is not valid hex".into()))?;
    if !attest_crypto::sign::verify_p256_fixed(signer_public_key_sec1, signed_span, &signature) {
        return Err(VerificationError::SignatureInvalid { which: "QE identity" });
    }

    Ok(())
}

/// The signed substring: everything between the end of the first `pre` and
/// the start of the last `post`.
fn signed_span<'a>(text: &'a str, pre: &str, post: &str) -> Option<&'a [u8]> {
    let start = text.find(pre)? + pre.len();
    let end = text.rfind(post)?;
    if end < start {
        return None;
    }
    Some(text[start..end].as_bytes())
}

fn check_datetime(value: &str, what: &str) -> Result<()> {
    let floor: DateTime<FixedOffset> = DateTime::parse_from_rfc3339(SGX_EARLIEST_TCB_CRL_DATE)
        .expect("constant date parses");
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| parse_err(format!("{what}: invalid datetime: {e}")))?;
    if parsed < floor {
        return Err(parse_err(format!("{what} earlier than permitted")));
    }
    Ok(())
}

fn hex_matches(hex_str: &str, bytes: &[u8]) -> bool {
    hex::decode(hex_str)
        .map(|decoded| decoded == bytes)
        .unwrap_or(false)
}

// The identity documents dump these fields as hex of the in-memory
// little-endian representation.
fn hex_u32(hex_str: &str) -> Result<u32> {
    let bytes = hex::decode(hex_str).map_err(|_| parse_err("invalid hex value".into()))?;
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| parse_err("invalid hex length".into()))?;
    Ok(u32::from_le_bytes(arr))
}

fn hex_u64(hex_str: &str) -> Result<u64> {
    let bytes = hex::decode(hex_str).map_err(|_| parse_err("invalid hex value".into()))?;
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| parse_err("invalid hex length".into()))?;
    Ok(u64::from_le_bytes(arr))
}

fn parse_err(msg: String) -> VerificationError {
    VerificationError::TcbParse(msg)
}
