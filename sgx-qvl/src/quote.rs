// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! DCAP quote parsing.
//!
//! Layout per the Intel DCAP quoting library: a fixed `sgx_quote_t` prefix
//! (436 bytes) whose trailing u32 is the signature length, followed by the
//! ECDSA signature data (`sgx_ql_ecdsa_sig_data_t`) with variable-length
//! authentication and certification data. Every sub-span is bounds-checked
//! against the evidence buffer.

use attest_types::codec::SliceReader;
use attest_types::{Result, VerificationError};

use crate::constants::{CERT_KEY_TYPE_PCK_CHAIN, SIGN_TYPE_ECDSA_P256, SUPPORTED_QUOTE_VERSION};

/// Size of `sgx_quote_t` including the signature_len field.
pub const QUOTE_T_SIZE: usize = 436;
/// The quote signature covers `sgx_quote_t` minus the signature_len field.
pub const QUOTE_SIGNED_SIZE: usize = QUOTE_T_SIZE - 4;
/// Size of `sgx_report_body_t`.
pub const REPORT_BODY_SIZE: usize = 384;

/// Parsed `sgx_report_body_t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBody {
    pub cpu_svn: [u8; 16],
    pub misc_select: u32,
    pub attributes: [u8; 16],
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub report_data: [u8; 64],
}

impl ReportBody {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = SliceReader::new(data);
        let cpu_svn = r.read_array()?;
        let misc_select = r.read_u32_le()?;
        r.skip(12)?; // reserved1
        r.skip(16)?; // isv_ext_prod_id
        let attributes = r.read_array()?;
        let mr_enclave = r.read_array()?;
        r.skip(32)?; // reserved2
        let mr_signer = r.read_array()?;
        r.skip(32)?; // reserved3
        r.skip(64)?; // config_id
        let isv_prod_id = r.read_u16_le()?;
        let isv_svn = r.read_u16_le()?;
        r.skip(2)?; // config_svn
        r.skip(42)?; // reserved4
        r.skip(16)?; // isv_family_id
        let report_data = r.read_array()?;
        Ok(Self {
            cpu_svn,
            misc_select,
            attributes,
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
            report_data,
        })
    }

    /// Attribute flags (low 8 bytes of the attributes field).
    pub fn attribute_flags(&self) -> u64 {
        u64::from_le_bytes(self.attributes[..8].try_into().expect("8 bytes"))
    }

    /// Attribute XFRM (high 8 bytes of the attributes field).
    pub fn attribute_xfrm(&self) -> u64 {
        u64::from_le_bytes(self.attributes[8..].try_into().expect("8 bytes"))
    }
}

/// The `sgx_ql_ecdsa_sig_data_t` payload of a quote.
#[derive(Debug, Clone)]
pub struct SignatureData<'a> {
    /// ECDSA signature (r||s) over the signed quote prefix.
    pub quote_signature: &'a [u8],
    /// Raw attestation public key (x||y, 64 bytes).
    pub attest_pub_key: &'a [u8],
    /// Raw QE report body bytes (signed by the PCK key).
    pub qe_report_raw: &'a [u8],
    pub qe_report: ReportBody,
    /// ECDSA signature (r||s) over the QE report.
    pub qe_report_signature: &'a [u8],
    pub auth_data: &'a [u8],
    /// PCK certificate chain (PEM) certifying the QE report key.
    pub certification_data: &'a [u8],
}

/// A parsed quote. All spans reference the evidence buffer.
#[derive(Debug, Clone)]
pub struct Quote<'a> {
    /// The signed prefix: `sgx_quote_t` minus signature_len.
    pub signed_span: &'a [u8],
    pub version: u16,
    pub sign_type: u16,
    pub report_body: ReportBody,
    pub signature_data: SignatureData<'a>,
}

impl<'a> Quote<'a> {
    pub fn parse(evidence: &'a [u8]) -> Result<Self> {
        if evidence.len() < QUOTE_T_SIZE {
            return Err(VerificationError::MalformedEvidence(
                "evidence too small to contain an SGX quote".into(),
            ));
        }

        let mut r = SliceReader::new(evidence);
        let version = r.read_u16_le()?;
        let sign_type = r.read_u16_le()?;
        r.skip(4)?; // epid_group_id
        r.skip(2)?; // qe_svn
        r.skip(2)?; // pce_svn
        r.skip(4)?; // xeid
        r.skip(32)?; // basename
        let report_body = ReportBody::parse(r.take(REPORT_BODY_SIZE)?)?;
        let signature_len = r.read_u32_le()? as usize;

        if evidence.len() != QUOTE_T_SIZE + signature_len {
            return Err(VerificationError::MalformedEvidence(format!(
                "evidence is {} bytes, quote declares {}",
                evidence.len(),
                QUOTE_T_SIZE + signature_len
            )));
        }

        if version != SUPPORTED_QUOTE_VERSION {
            return Err(VerificationError::UnsupportedVersion {
                got: version as u32,
                expected: SUPPORTED_QUOTE_VERSION as u32,
            });
        }
        if sign_type != SIGN_TYPE_ECDSA_P256 {
            return Err(VerificationError::MalformedEvidence(format!(
                "unsupported quote signing type {sign_type}"
            )));
        }

        let signature_data = Self::parse_signature_data(r.take(signature_len)?)?;

        Ok(Self {
            signed_span: &evidence[..QUOTE_SIGNED_SIZE],
            version,
            sign_type,
            report_body,
            signature_data,
        })
    }

    fn parse_signature_data(data: &'a [u8]) -> Result<SignatureData<'a>> {
        let mut r = SliceReader::new(data);
        let quote_signature = r.take(64)?;
        let attest_pub_key = r.take(64)?;
        let qe_report_raw = r.take(REPORT_BODY_SIZE)?;
        let qe_report = ReportBody::parse(qe_report_raw)?;
        let qe_report_signature = r.take(64)?;

        let auth_data_len = r.read_u16_le()? as usize;
        let auth_data = r.take(auth_data_len)?;
        if auth_data.is_empty() {
            return Err(VerificationError::MalformedEvidence(
                "missing authentication data".into(),
            ));
        }

        let cert_key_type = r.read_u16_le()?;
        let cert_data_len = r.read_u32_le()? as usize;
        let certification_data = r.take(cert_data_len)?;
        if certification_data.is_empty() {
            return Err(VerificationError::MalformedEvidence(
                "missing certification data".into(),
            ));
        }
        if cert_key_type != CERT_KEY_TYPE_PCK_CHAIN {
            return Err(VerificationError::MalformedEvidence(format!(
                "unsupported certification data key type {cert_key_type}"
            )));
        }

        Ok(SignatureData {
            quote_signature,
            attest_pub_key,
            qe_report_raw,
            qe_report,
            qe_report_signature,
            auth_data,
            certification_data,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Assemble a syntactically valid quote from parts; fields not given
    /// are zero.
    pub fn build_quote(
        report_data: &[u8; 64],
        attest_pub_key: &[u8; 64],
        auth_data: &[u8],
        certification_data: &[u8],
    ) -> Vec<u8> {
        let mut report_body = vec![0u8; REPORT_BODY_SIZE];
        report_body[320..384].copy_from_slice(report_data);

        let mut sig_data = Vec::new();
        sig_data.extend_from_slice(&[0u8; 64]); // quote signature
        sig_data.extend_from_slice(attest_pub_key);
        sig_data.extend_from_slice(&vec![0u8; REPORT_BODY_SIZE]); // QE report
        sig_data.extend_from_slice(&[0u8; 64]); // QE report signature
        sig_data.extend_from_slice(&(auth_data.len() as u16).to_le_bytes());
        sig_data.extend_from_slice(auth_data);
        sig_data.extend_from_slice(&CERT_KEY_TYPE_PCK_CHAIN.to_le_bytes());
        sig_data.extend_from_slice(&(certification_data.len() as u32).to_le_bytes());
        sig_data.extend_from_slice(certification_data);

        let mut quote = Vec::new();
        quote.extend_from_slice(&SUPPORTED_QUOTE_VERSION.to_le_bytes());
        quote.extend_from_slice(&SIGN_TYPE_ECDSA_P256.to_le_bytes());
        quote.extend_from_slice(&[0u8; 44]); // epid_group_id..basename
        quote.extend_from_slice(&report_body);
        quote.extend_from_slice(&(sig_data.len() as u32).to_le_bytes());
        quote.extend_from_slice(&sig_data);
        quote
    }
}
