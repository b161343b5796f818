// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Claims produced by a successful verification.
//!
//! Claims are created exactly once, when verification returns success, and
//! never mutated afterwards. Byte fields serialize as hex in human-readable
//! formats.

use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;

use crate::Source;

/// Authenticated claims, one variant per attestation source.
///
/// Open Enclave evidence yields [`Claims::Sgx`]; ACI composes SEV-SNP
/// claims with UVM endorsement claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum Claims {
    #[serde(rename = "sgx")]
    Sgx(SgxClaims),
    #[serde(rename = "sevsnp")]
    SevSnp(SnpClaims),
    #[serde(rename = "aci")]
    Aci(AciClaims),
}

impl Claims {
    pub fn source(&self) -> Source {
        match self {
            Self::Sgx(_) => Source::Sgx,
            Self::SevSnp(_) => Source::SevSnp,
            Self::Aci(_) => Source::Aci,
        }
    }

    /// The 64-byte caller-supplied nonce binding covered by the verified
    /// signature.
    pub fn report_data(&self) -> &[u8; 64] {
        match self {
            Self::Sgx(c) => &c.report_data,
            Self::SevSnp(c) => &c.report_data,
            Self::Aci(c) => &c.snp.report_data,
        }
    }

    /// The primary integrity measurement covered by the verified signature.
    pub fn measurement(&self) -> &[u8] {
        match self {
            Self::Sgx(c) => &c.measurement,
            Self::SevSnp(c) => &c.measurement,
            Self::Aci(c) => &c.snp.measurement,
        }
    }
}

/// The TCB level selected while verifying Intel's TCB info document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgxTcbLevelClaims {
    pub status: String,
    pub date: String,
    #[serde(default)]
    pub advisory_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgxClaims {
    /// MRENCLAVE of the attested enclave.
    #[serde(with = "hex_bytes")]
    pub measurement: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub report_data: [u8; 64],
    #[serde(with = "hex_bytes")]
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    /// Raw attribute flags and XFRM of the enclave.
    #[serde(with = "hex_bytes")]
    pub attributes: [u8; 16],
    pub tcb: SgxTcbLevelClaims,
}

/// AMD TCB component security version numbers, packed as 8 bytes in the
/// report (boot loader, TEE, 4 reserved, SNP, microcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnpTcbVersion {
    pub boot_loader: u8,
    pub tee: u8,
    pub snp: u8,
    pub microcode: u8,
}

impl SnpTcbVersion {
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self {
            boot_loader: bytes[0],
            tee: bytes[1],
            snp: bytes[6],
            microcode: bytes[7],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnpClaims {
    /// Launch measurement of the guest (48 bytes).
    #[serde(with = "hex_bytes")]
    pub measurement: [u8; 48],
    #[serde(with = "hex_bytes")]
    pub report_data: [u8; 64],
    pub guest_svn: u32,
    pub policy: u64,
    pub platform_version: SnpTcbVersion,
    #[serde(with = "hex_bytes")]
    pub chip_id: [u8; 64],
    pub reported_tcb: SnpTcbVersion,
    pub launch_tcb: SnpTcbVersion,
}

/// Claims extracted from a verified UVM endorsement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UvmClaims {
    pub did: String,
    pub feed: String,
    pub svn: String,
    /// Lower-hex launch measurement from the COSE payload; equals the hex
    /// encoding of the SEV-SNP report measurement.
    pub launch_measurement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AciClaims {
    #[serde(flatten)]
    pub snp: SnpClaims,
    /// Absent only when `Options::partial` is set and no UVM endorsements
    /// were supplied.
    pub uvm: Option<UvmClaims>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcb_version_unpacks_from_report_bytes() {
        let tcb = SnpTcbVersion::from_le_bytes([0x07, 0x01, 0, 0, 0, 0, 0x0e, 0x48]);
        assert_eq!(tcb.boot_loader, 0x07);
        assert_eq!(tcb.tee, 0x01);
        assert_eq!(tcb.snp, 0x0e);
        assert_eq!(tcb.microcode, 0x48);
    }

    #[test]
    fn claims_serialize_with_source_tag() {
        let claims = Claims::SevSnp(SnpClaims {
            measurement: [0xab; 48],
            report_data: [1; 64],
            guest_svn: 3,
            policy: 0x30000,
            platform_version: SnpTcbVersion::from_le_bytes([0; 8]),
            chip_id: [0; 64],
            reported_tcb: SnpTcbVersion::from_le_bytes([0; 8]),
            launch_tcb: SnpTcbVersion::from_le_bytes([0; 8]),
        });
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["source"], "sevsnp");
        assert_eq!(json["measurement"], hex::encode([0xab; 48]));
        assert_eq!(claims.measurement(), &[0xab; 48]);
        assert_eq!(claims.report_data(), &[1u8; 64]);
    }
}
