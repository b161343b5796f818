// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Open Enclave evidence adapter.
//!
//! OE evidence is either a raw `sgx_quote_t` (possibly followed by custom
//! claims, which are sliced off) or an `oe_attestation_header_t` wrapper
//! around one; OE endorsements are an `oe_endorsements_t` offset table
//! (optionally with the same header). The adapter validates versions and
//! the format UUID, repacks the endorsement fields into the SGX packed
//! collateral stream, and delegates to the SGX verifier.

use attest_types::claims::SgxClaims;
use attest_types::codec::SliceReader;
use attest_types::{AttestationBundle, Options, Result, VerificationError};
use tracing::debug;

use sgx_qvl::QuoteCollateral;

pub const OE_ATTESTATION_HEADER_VERSION: u32 = 3;
pub const OE_SGX_ENDORSEMENTS_VERSION: u32 = 1;
pub const OE_ENCLAVE_TYPE_SGX: u32 = 2;

/// `OE_FORMAT_UUID_SGX_ECDSA`.
pub const OE_FORMAT_UUID_SGX_ECDSA: [u8; 16] = [
    0xa3, 0xa2, 0x1e, 0x87, 0x1b, 0x4d, 0x40, 0x14, 0xb7, 0x0a, 0xa1, 0x25, 0xd2, 0xfb, 0xcd,
    0x8c,
];

/// Verify Open Enclave evidence by adapting it onto the SGX verifier.
pub async fn verify(
    bundle: &AttestationBundle,
    options: &Options,
    client: &reqwest::Client,
) -> Result<SgxClaims> {
    let quote = unwrap_evidence(&bundle.evidence)?;
    let endorsements = if bundle.endorsements.is_empty() {
        Vec::new()
    } else {
        endorsements_to_collateral(&bundle.endorsements)?.to_bytes()
    };
    debug!(
        quote_len = quote.len(),
        "Open Enclave evidence adapted to SGX"
    );
    sgx_qvl::verify(quote, &endorsements, options, client).await
}

/// Extract the raw SGX quote from OE evidence.
pub fn unwrap_evidence(evidence: &[u8]) -> Result<&[u8]> {
    if evidence.is_empty() {
        return Err(VerificationError::MalformedEvidence(
            "no evidence to verify".into(),
        ));
    }
    let payload = match unwrap_attestation_header(evidence)? {
        Some(data) => data,
        None => evidence,
    };

    // sgx_quote_t with signature_len at offset 432; trailing custom claims
    // are not part of the quote.
    if payload.len() < 436 {
        return Err(VerificationError::MalformedEvidence(
            "evidence too small to contain an SGX quote".into(),
        ));
    }
    let signature_len =
        u32::from_le_bytes(payload[432..436].try_into().expect("4 bytes")) as usize;
    let quote_len = 436 + signature_len;
    if payload.len() < quote_len {
        return Err(VerificationError::MalformedEvidence(
            "evidence shorter than the quote it declares".into(),
        ));
    }
    Ok(&payload[..quote_len])
}

/// Unwrap an `oe_attestation_header_t` if present. Returns `None` when the
/// input does not start with the header.
fn unwrap_attestation_header(data: &[u8]) -> Result<Option<&[u8]>> {
    // A bare quote reads (version=3, sign_type=2) as u32 0x0002_0003, so a
    // leading u32 of exactly 3 can only be the OE header.
    if data.len() < 4 || u32::from_le_bytes(data[..4].try_into().expect("4 bytes")) != 3 {
        return Ok(None);
    }

    let mut r = SliceReader::new(data);
    let version = r.read_u32_le()?;
    if version != OE_ATTESTATION_HEADER_VERSION {
        return Err(VerificationError::UnsupportedVersion {
            got: version,
            expected: OE_ATTESTATION_HEADER_VERSION,
        });
    }
    let format_id: [u8; 16] = r.read_array()?;
    if format_id != OE_FORMAT_UUID_SGX_ECDSA {
        return Err(VerificationError::MalformedEvidence(
            "unsupported OE format id, only SGX ECDSA is supported".into(),
        ));
    }
    let data_size = r.read_u64_le()? as usize;
    let payload = r.take(data_size)?;
    Ok(Some(payload))
}

/// Re-pack an `oe_endorsements_t` offset table into SGX packed collateral.
pub fn endorsements_to_collateral(endorsements: &[u8]) -> Result<QuoteCollateral> {
    let payload = match unwrap_attestation_header(endorsements)? {
        Some(data) => data,
        None => endorsements,
    };

    let mut r = SliceReader::new(payload);
    let version = r.read_u32_le()?;
    if version != OE_SGX_ENDORSEMENTS_VERSION {
        return Err(VerificationError::UnsupportedVersion {
            got: version,
            expected: OE_SGX_ENDORSEMENTS_VERSION,
        });
    }
    let enclave_type = r.read_u32_le()?;
    if enclave_type != OE_ENCLAVE_TYPE_SGX {
        return Err(VerificationError::MalformedEvidence(format!(
            "unsupported enclave type {enclave_type} in OE endorsements"
        )));
    }
    let buffer_size = r.read_u32_le()? as usize;
    let num_elements = r.read_u32_le()? as usize;
    let buffer = r.take(buffer_size)?;

    let offsets_size = num_elements
        .checked_mul(4)
        .filter(|size| *size <= buffer.len())
        .ok_or_else(|| {
            VerificationError::MalformedEvidence("OE endorsements offset table overflow".into())
        })?;
    let data = &buffer[offsets_size..];
    let offset_at = |i: usize| -> usize {
        u32::from_le_bytes(buffer[i * 4..i * 4 + 4].try_into().expect("4 bytes")) as usize
    };

    let mut collateral = QuoteCollateral {
        major_version: 3,
        minor_version: 1,
        tee_type: 0,
        ..Default::default()
    };

    for i in 0..num_elements {
        let offset = offset_at(i);
        if offset > data.len() {
            return Err(VerificationError::MalformedEvidence(
                "invalid OE endorsement item offset".into(),
            ));
        }
        let end = if i + 1 < num_elements {
            offset_at(i + 1)
        } else {
            data.len()
        };
        if end < offset || end > data.len() {
            return Err(VerificationError::MalformedEvidence(
                "invalid OE endorsement item offset".into(),
            ));
        }
        let item = &data[offset..end];

        // Fixed slot order per oe_sgx_endorsement_field_t.
        match i {
            0 => {
                let ok = item.len() == 4
                    && u32::from_le_bytes(item.try_into().expect("4 bytes"))
                        == OE_SGX_ENDORSEMENTS_VERSION;
                if !ok {
                    return Err(VerificationError::UnsupportedVersion {
                        got: 0,
                        expected: OE_SGX_ENDORSEMENTS_VERSION,
                    });
                }
            }
            1 => collateral.tcb_info = item.to_vec(),
            2 => collateral.tcb_info_issuer_chain = item.to_vec(),
            3 => collateral.pck_crl = item.to_vec(),
            4 => collateral.root_ca_crl = item.to_vec(),
            5 => collateral.pck_crl_issuer_chain = item.to_vec(),
            6 => collateral.qe_identity = item.to_vec(),
            7 => collateral.qe_identity_issuer_chain = item.to_vec(),
            8 => {} // creation datetime, ignored
            _ => {
                return Err(VerificationError::MalformedEvidence(
                    "excess elements in OE endorsements data".into(),
                ))
            }
        }
    }

    Ok(collateral)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_quote(signature_len: usize) -> Vec<u8> {
        let mut quote = vec![0u8; 436 + signature_len];
        quote[0..2].copy_from_slice(&3u16.to_le_bytes()); // version
        quote[2..4].copy_from_slice(&2u16.to_le_bytes()); // sign_type
        quote[432..436].copy_from_slice(&(signature_len as u32).to_le_bytes());
        quote
    }

    fn wrap_header(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&OE_ATTESTATION_HEADER_VERSION.to_le_bytes());
        out.extend_from_slice(&OE_FORMAT_UUID_SGX_ECDSA);
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn oe_endorsements(fields: &[&[u8]]) -> Vec<u8> {
        let mut offsets = Vec::new();
        let mut data = Vec::new();
        for field in fields {
            offsets.extend_from_slice(&(data.len() as u32).to_le_bytes());
            data.extend_from_slice(field);
        }
        let buffer: Vec<u8> = offsets.into_iter().chain(data).collect();

        let mut out = Vec::new();
        out.extend_from_slice(&OE_SGX_ENDORSEMENTS_VERSION.to_le_bytes());
        out.extend_from_slice(&OE_ENCLAVE_TYPE_SGX.to_le_bytes());
        out.extend_from_slice(&(buffer.len() as u32).to_le_bytes());
        out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        out.extend_from_slice(&buffer);
        out
    }

    #[test]
    fn bare_quote_with_custom_claims_is_sliced() {
        let mut evidence = fake_quote(100);
        evidence.extend_from_slice(b"custom claims here");
        let quote = unwrap_evidence(&evidence).unwrap();
        assert_eq!(quote.len(), 536);
    }

    #[test]
    fn header_wrapped_quote_unwraps() {
        let quote = fake_quote(64);
        let evidence = wrap_header(&quote);
        assert_eq!(unwrap_evidence(&evidence).unwrap(), &quote[..]);
    }

    #[test]
    fn wrong_format_uuid_rejected() {
        let quote = fake_quote(64);
        let mut evidence = wrap_header(&quote);
        evidence[4] ^= 0xff;
        assert!(unwrap_evidence(&evidence).is_err());
    }

    #[test]
    fn truncated_evidence_rejected() {
        let quote = fake_quote(64);
        assert!(unwrap_evidence(&quote[..400]).is_err());
        // Declared signature length exceeding the buffer.
        let mut short = fake_quote(64);
        short.truncate(436 + 10);
        assert!(unwrap_evidence(&short).is_err());
    }

    #[test]
    fn endorsements_repack_into_collateral() {
        let version = OE_SGX_ENDORSEMENTS_VERSION.to_le_bytes();
        let endorsements = oe_endorsements(&[
            &version,
            b"tcb-info",
            b"tcb-chain",
            b"pck-crl",
            b"root-crl",
            b"pck-crl-chain",
            b"qe-id",
            b"qe-id-chain",
            b"2024-01-01T00:00:00Z",
        ]);
        let collateral = endorsements_to_collateral(&endorsements).unwrap();
        assert_eq!(collateral.tcb_info, b"tcb-info");
        assert_eq!(collateral.tcb_info_issuer_chain, b"tcb-chain");
        assert_eq!(collateral.pck_crl, b"pck-crl");
        assert_eq!(collateral.root_ca_crl, b"root-crl");
        assert_eq!(collateral.pck_crl_issuer_chain, b"pck-crl-chain");
        assert_eq!(collateral.qe_identity, b"qe-id");
        assert_eq!(collateral.qe_identity_issuer_chain, b"qe-id-chain");

        // The same table wrapped in an attestation header also parses.
        let wrapped = wrap_header(&endorsements);
        assert_eq!(endorsements_to_collateral(&wrapped).unwrap(), collateral);
    }

    #[test]
    fn wrong_endorsement_version_rejected() {
        let endorsements = oe_endorsements(&[&7u32.to_le_bytes()]);
        assert!(endorsements_to_collateral(&endorsements).is_err());
    }
}
