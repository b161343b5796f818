// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! SEV-SNP attestation report parsing (AMD SEV-SNP ABI, Table 21).

use attest_types::claims::SnpTcbVersion;
use attest_types::codec::SliceReader;
use attest_types::{Result, VerificationError};

/// Total report size including the signature.
pub const REPORT_SIZE: usize = 1184;
/// The signature covers everything before the signature field.
pub const REPORT_SIGNED_SIZE: usize = 0x2A0;
pub const SUPPORTED_REPORT_VERSION: u32 = 2;

/// `ecdsa_p384_sha384` in the signature_algo field.
pub const SIG_ALGO_ECDSA_P384_SHA384: u32 = 1;

/// A parsed attestation report. Signature halves are the raw 72-byte
/// little-endian fields.
#[derive(Debug, Clone)]
pub struct AttestationReport {
    pub version: u32,
    pub guest_svn: u32,
    pub policy: u64,
    pub family_id: [u8; 16],
    pub image_id: [u8; 16],
    pub vmpl: u32,
    pub signature_algo: u32,
    pub platform_version: SnpTcbVersion,
    pub platform_info: u64,
    pub report_data: [u8; 64],
    pub measurement: [u8; 48],
    pub host_data: [u8; 32],
    pub report_id: [u8; 32],
    pub reported_tcb: SnpTcbVersion,
    pub chip_id: [u8; 64],
    pub launch_tcb: SnpTcbVersion,
    pub signature_r_le: [u8; 72],
    pub signature_s_le: [u8; 72],
}

impl AttestationReport {
    pub fn parse(evidence: &[u8]) -> Result<Self> {
        if evidence.len() != REPORT_SIZE {
            return Err(VerificationError::MalformedEvidence(format!(
                "SEV-SNP report is {} bytes, expected {REPORT_SIZE}",
                evidence.len()
            )));
        }

        let mut r = SliceReader::new(evidence);
        let version = r.read_u32_le()?;
        if version != SUPPORTED_REPORT_VERSION {
            return Err(VerificationError::UnsupportedVersion {
                got: version,
                expected: SUPPORTED_REPORT_VERSION,
            });
        }
        let guest_svn = r.read_u32_le()?;
        let policy = r.read_u64_le()?;
        let family_id = r.read_array()?;
        let image_id = r.read_array()?;
        let vmpl = r.read_u32_le()?;
        let signature_algo = r.read_u32_le()?;
        let platform_version = SnpTcbVersion::from_le_bytes(r.read_array()?);
        let platform_info = r.read_u64_le()?;
        r.skip(4)?; // flags
        r.skip(4)?; // reserved
        let report_data = r.read_array()?;
        let measurement = r.read_array()?;
        let host_data = r.read_array()?;
        r.skip(48)?; // id_key_digest
        r.skip(48)?; // author_key_digest
        let report_id = r.read_array()?;
        r.skip(32)?; // report_id_ma
        let reported_tcb = SnpTcbVersion::from_le_bytes(r.read_array()?);
        r.skip(24)?; // reserved
        let chip_id = r.read_array()?;
        r.skip(8)?; // committed_tcb
        r.skip(8)?; // current/committed build + versions
        let launch_tcb = SnpTcbVersion::from_le_bytes(r.read_array()?);
        r.skip(168)?; // reserved
        debug_assert_eq!(r.position(), REPORT_SIGNED_SIZE);
        let signature_r_le = r.read_array()?;
        let signature_s_le = r.read_array()?;

        Ok(Self {
            version,
            guest_svn,
            policy,
            family_id,
            image_id,
            vmpl,
            signature_algo,
            platform_version,
            platform_info,
            report_data,
            measurement,
            host_data,
            report_id,
            reported_tcb,
            chip_id,
            launch_tcb,
            signature_r_le,
            signature_s_le,
        })
    }

    /// The byte span covered by the report signature.
    pub fn signed_span(evidence: &[u8]) -> &[u8] {
        &evidence[..REPORT_SIGNED_SIZE]
    }
}
