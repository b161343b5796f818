// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! PEM/DER splitting helpers.
//!
//! Vendor endorsements mix encodings freely: Intel issuer chains are PEM
//! bundles, AMD serves DER certificates and CRLs, and Open Enclave packs
//! PEM text into binary structures. Everything is normalized to DER here.

use attest_types::{Result, VerificationError};

/// Split a PEM bundle into DER certificates, preserving order (leaf first
/// when the input is a chain).
pub fn pem_certs_to_der(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let blocks = ::pem::parse_many(data)
        .map_err(|e| VerificationError::MalformedEvidence(format!("invalid PEM: {e}")))?;
    let certs: Vec<Vec<u8>> = blocks
        .into_iter()
        .filter(|b| b.tag() == "CERTIFICATE")
        .map(|b| b.into_contents())
        .collect();
    if certs.is_empty() {
        return Err(VerificationError::MalformedEvidence(
            "no certificates in PEM data".into(),
        ));
    }
    Ok(certs)
}

/// Split certificate data that may be a PEM bundle or concatenated DER,
/// preserving order.
pub fn certs_to_der(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    if looks_like_pem(data) {
        pem_certs_to_der(data)
    } else {
        split_der_sequence(data)
    }
}

/// Normalize a CRL that may be PEM ("X509 CRL") or DER encoded to DER,
/// probing by leading bytes.
pub fn crl_to_der(data: &[u8]) -> Result<Vec<u8>> {
    if looks_like_pem(data) {
        let block = ::pem::parse(data)
            .map_err(|e| VerificationError::MalformedEvidence(format!("invalid CRL PEM: {e}")))?;
        if block.tag() != "X509 CRL" {
            return Err(VerificationError::MalformedEvidence(format!(
                "unexpected PEM tag {} for CRL",
                block.tag()
            )));
        }
        Ok(block.into_contents())
    } else {
        Ok(data.to_vec())
    }
}

pub fn der_to_pem(der: &[u8], label: &str) -> String {
    ::pem::encode(&::pem::Pem::new(label.to_string(), der.to_vec()))
}

fn looks_like_pem(data: &[u8]) -> bool {
    data.iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| data[i..].starts_with(b"-----"))
        .unwrap_or(false)
}

/// Split concatenated DER structures by walking the outer TLV lengths.
fn split_der_sequence(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let len = der_tlv_len(rest)?;
        out.push(rest[..len].to_vec());
        rest = &rest[len..];
    }
    if out.is_empty() {
        return Err(VerificationError::MalformedEvidence(
            "no certificates in DER data".into(),
        ));
    }
    Ok(out)
}

/// Total length of the DER TLV starting at the beginning of `data`.
fn der_tlv_len(data: &[u8]) -> Result<usize> {
    let malformed = |what: &str| VerificationError::MalformedEvidence(format!("DER: {what}"));
    if data.len() < 2 {
        return Err(malformed("truncated header"));
    }
    if data[0] != 0x30 {
        return Err(malformed("expected SEQUENCE tag"));
    }
    let (header_len, content_len) = match data[1] {
        n @ 0x00..=0x7f => (2, n as usize),
        0x81 => {
            if data.len() < 3 {
                return Err(malformed("truncated length"));
            }
            (3, data[2] as usize)
        }
        0x82 => {
            if data.len() < 4 {
                return Err(malformed("truncated length"));
            }
            (4, u16::from_be_bytes([data[2], data[3]]) as usize)
        }
        _ => return Err(malformed("unsupported length encoding")),
    };
    let total = header_len + content_len;
    if total > data.len() {
        return Err(malformed("declared length exceeds input"));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cert_der() -> Vec<u8> {
        let key = rcgen::KeyPair::generate().unwrap();
        rcgen::CertificateParams::new(vec!["test.example".into()])
            .unwrap()
            .self_signed(&key)
            .unwrap()
            .der()
            .to_vec()
    }

    #[test]
    fn pem_bundle_preserves_order() {
        let a = test_cert_der();
        let b = test_cert_der();
        let bundle = format!(
            "{}{}",
            der_to_pem(&a, "CERTIFICATE"),
            der_to_pem(&b, "CERTIFICATE")
        );
        let ders = pem_certs_to_der(bundle.as_bytes()).unwrap();
        assert_eq!(ders, vec![a, b]);
    }

    #[test]
    fn concatenated_der_splits() {
        let a = test_cert_der();
        let b = test_cert_der();
        let mut joined = a.clone();
        joined.extend_from_slice(&b);
        let ders = certs_to_der(&joined).unwrap();
        assert_eq!(ders, vec![a, b]);
    }

    #[test]
    fn truncated_der_is_malformed() {
        let a = test_cert_der();
        assert!(certs_to_der(&a[..a.len() - 1]).is_err());
    }

    #[test]
    fn crl_probe_accepts_der_and_pem() {
        let der = vec![0x30, 0x03, 1, 2, 3];
        assert_eq!(crl_to_der(&der).unwrap(), der);
        let pem_text = der_to_pem(&der, "X509 CRL");
        assert_eq!(crl_to_der(pem_text.as_bytes()).unwrap(), der);
        let wrong_tag = der_to_pem(&der, "CERTIFICATE");
        assert!(crl_to_der(wrong_tag.as_bytes()).is_err());
    }
}
