// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Intel SGX DCAP quote verification library (QVL).
//!
//! Verifies ECDSA-P256 quotes (`sgx_quote_t` version 3) against Intel's
//! provisioning certification infrastructure:
//! - PCK certificate chain and CRLs up to the Intel SGX provisioning root
//! - QE report and quote signatures plus the attestation key binding hash
//! - TCB info and QE identity documents from the PCS
//!
//! Collateral can be supplied by the caller in the packed stream layout
//! (see [`QuoteCollateral`]) or fetched from Intel's endpoints.

use attest_types::codec::SliceReader;
use attest_types::{Result, VerificationError};

pub mod collateral;
pub mod constants;
pub mod extension;
pub mod quote;
pub mod tcb;
pub mod verify;

pub use constants::INTEL_SGX_ROOT_PUBLIC_KEY_PEM;
pub use verify::{prepare_endorsements, verify};

/// SGX quote collateral in the packed stream layout: version header
/// followed by seven u64-length-prefixed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteCollateral {
    pub major_version: u16,
    pub minor_version: u16,
    pub tee_type: u32,
    pub pck_crl_issuer_chain: Vec<u8>,
    pub root_ca_crl: Vec<u8>,
    pub pck_crl: Vec<u8>,
    pub tcb_info_issuer_chain: Vec<u8>,
    pub tcb_info: Vec<u8>,
    pub qe_identity_issuer_chain: Vec<u8>,
    pub qe_identity: Vec<u8>,
}

impl QuoteCollateral {
    /// Parse the packed layout. Trailing NUL padding is tolerated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = SliceReader::new(data);
        let major_version = r.read_u16_le()?;
        let minor_version = r.read_u16_le()?;
        let tee_type = r.read_u32_le()?;
        let mut fields: [Vec<u8>; 7] = Default::default();
        for field in fields.iter_mut() {
            *field = r.read_len_prefixed_u64()?.to_vec();
        }
        let [pck_crl_issuer_chain, root_ca_crl, pck_crl, tcb_info_issuer_chain, tcb_info, qe_identity_issuer_chain, qe_identity] =
            fields;
        Ok(Self {
            major_version,
            minor_version,
            tee_type,
            pck_crl_issuer_chain,
            root_ca_crl,
            pck_crl,
            tcb_info_issuer_chain,
            tcb_info,
            qe_identity_issuer_chain,
            qe_identity,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.major_version.to_le_bytes());
        out.extend_from_slice(&self.minor_version.to_le_bytes());
        out.extend_from_slice(&self.tee_type.to_le_bytes());
        for field in [
            &self.pck_crl_issuer_chain,
            &self.root_ca_crl,
            &self.pck_crl,
            &self.tcb_info_issuer_chain,
            &self.tcb_info,
            &self.qe_identity_issuer_chain,
            &self.qe_identity,
        ] {
            out.extend_from_slice(&(field.len() as u64).to_le_bytes());
            out.extend_from_slice(field);
        }
        out
    }
}
