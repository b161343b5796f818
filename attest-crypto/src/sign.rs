// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Signature verification for the algorithm/encoding combinations found in
//! attestation evidence and its endorsement certificates.

use attest_types::{Result, VerificationError};
use p256::ecdsa::signature::hazmat::PrehashVerifier as _;
use rsa::pkcs1::DecodeRsaPublicKey as _;
use rsa::RsaPublicKey;
use sha2::{Sha256, Sha384, Sha512};
use x509_parser::der_parser::oid;
use x509_parser::der_parser::Oid;
use x509_parser::prelude::*;

use crate::{sha256, sha384, sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    fn digest(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => sha256(&[message]).to_vec(),
            Self::Sha384 => sha384(&[message]).to_vec(),
            Self::Sha512 => sha512(&[message]).to_vec(),
        }
    }
}

/// A public key extracted from a certificate, ready for verification.
#[derive(Debug, Clone)]
pub enum PublicKey {
    EcP256(p256::ecdsa::VerifyingKey),
    EcP384(p384::ecdsa::VerifyingKey),
    Rsa(RsaPublicKey),
}

const OID_EC_PUBLIC_KEY: Oid<'static> = oid!(1.2.840.10045.2.1);
const OID_RSA_ENCRYPTION: Oid<'static> = oid!(1.2.840.113549.1.1.1);
const OID_CURVE_P256: Oid<'static> = oid!(1.2.840.10045.3.1.7);
const OID_CURVE_P384: Oid<'static> = oid!(1.3.132.0.34);

const OID_ECDSA_WITH_SHA256: Oid<'static> = oid!(1.2.840.10045.4.3.2);
const OID_ECDSA_WITH_SHA384: Oid<'static> = oid!(1.2.840.10045.4.3.3);
const OID_SHA256_WITH_RSA: Oid<'static> = oid!(1.2.840.113549.1.1.11);
const OID_SHA384_WITH_RSA: Oid<'static> = oid!(1.2.840.113549.1.1.12);
const OID_SHA512_WITH_RSA: Oid<'static> = oid!(1.2.840.113549.1.1.13);
const OID_RSASSA_PSS: Oid<'static> = oid!(1.2.840.113549.1.1.10);

impl PublicKey {
    /// Parse a SubjectPublicKeyInfo into a usable verification key.
    pub fn from_spki(spki: &SubjectPublicKeyInfo) -> Result<Self> {
        let key_bytes = spki.subject_public_key.data.as_ref();
        let alg = &spki.algorithm.algorithm;
        if *alg == OID_EC_PUBLIC_KEY {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .map(|p| p.data)
                .ok_or_else(|| {
                    VerificationError::MalformedEvidence("EC key without curve parameter".into())
                })?;
            if curve == OID_CURVE_P256.as_bytes() {
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes).map_err(|e| {
                    VerificationError::MalformedEvidence(format!("invalid P-256 key: {e}"))
                })?;
                Ok(Self::EcP256(key))
            } else if curve == OID_CURVE_P384.as_bytes() {
                let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes).map_err(|e| {
                    VerificationError::MalformedEvidence(format!("invalid P-384 key: {e}"))
                })?;
                Ok(Self::EcP384(key))
            } else {
                Err(VerificationError::MalformedEvidence(
                    "unsupported EC curve".into(),
                ))
            }
        } else if *alg == OID_RSA_ENCRYPTION {
            let key = RsaPublicKey::from_pkcs1_der(key_bytes).map_err(|e| {
                VerificationError::MalformedEvidence(format!("invalid RSA key: {e}"))
            })?;
            Ok(Self::Rsa(key))
        } else {
            Err(VerificationError::MalformedEvidence(format!(
                "unsupported public key algorithm {alg}"
            )))
        }
    }

    pub fn from_cert_der(cert_der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| VerificationError::MalformedEvidence(format!("invalid certificate: {e}")))?;
        Self::from_spki(cert.public_key())
    }
}

/// Verify an ECDSA P-256 signature in IEEE P1363 (r||s) form over a
/// SHA-256 digest of `message`. This is the form quote and QE report
/// signatures use.
pub fn verify_p256_fixed(public_key_sec1: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key_sec1) else {
        return false;
    };
    let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else {
        return false;
    };
    key.verify_prehash(&sha256(&[message]), &sig).is_ok()
}

/// Build an uncompressed SEC1 point (0x04 || x || y) from a raw 64-byte
/// public key, as carried in SGX attestation key fields.
pub fn sec1_from_raw_p256(raw_xy: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw_xy.len() + 1);
    out.push(0x04);
    out.extend_from_slice(raw_xy);
    out
}

/// Convert SEV-SNP's little-endian (r, s) signature halves into a P-384
/// signature. Each half is a 72-byte field of which the low 48 bytes carry
/// the scalar.
pub fn p384_signature_from_le(r_le: &[u8], s_le: &[u8]) -> Result<p384::ecdsa::Signature> {
    use p384::elliptic_curve::generic_array::GenericArray;

    const SCALAR: usize = 48;
    if r_le.len() < SCALAR || s_le.len() < SCALAR {
        return Err(VerificationError::MalformedEvidence(
            "signature component too short".into(),
        ));
    }
    let r_be: Vec<u8> = r_le[..SCALAR].iter().rev().copied().collect();
    let s_be: Vec<u8> = s_le[..SCALAR].iter().rev().copied().collect();
    p384::ecdsa::Signature::from_scalars(
        GenericArray::clone_from_slice(&r_be),
        GenericArray::clone_from_slice(&s_be),
    )
    .map_err(|e| VerificationError::MalformedEvidence(format!("invalid signature scalars: {e}")))
}

/// Verify a signature over `tbs` as found in X.509 certificates and CRLs:
/// the algorithm identifier selects curve/padding and hash, the signature
/// bytes are DER (ECDSA) or raw (RSA).
pub fn verify_x509_signature(
    tbs: &[u8],
    alg: &AlgorithmIdentifier,
    signature: &[u8],
    issuer_spki: &SubjectPublicKeyInfo,
) -> std::result::Result<(), String> {
    let key = PublicKey::from_spki(issuer_spki).map_err(|e| e.to_string())?;
    let alg_oid = &alg.algorithm;

    if *alg_oid == OID_ECDSA_WITH_SHA256 || *alg_oid == OID_ECDSA_WITH_SHA384 {
        let hash = if *alg_oid == OID_ECDSA_WITH_SHA256 {
            HashAlg::Sha256
        } else {
            HashAlg::Sha384
        };
        let digest = hash.digest(tbs);
        let ok = match &key {
            PublicKey::EcP256(k) => p256::ecdsa::Signature::from_der(signature)
                .map(|sig| k.verify_prehash(&digest, &sig).is_ok())
                .unwrap_or(false),
            PublicKey::EcP384(k) => p384::ecdsa::Signature::from_der(signature)
                .map(|sig| k.verify_prehash(&digest, &sig).is_ok())
                .unwrap_or(false),
            PublicKey::Rsa(_) => false,
        };
        return ok.then_some(()).ok_or_else(|| "ECDSA signature mismatch".into());
    }

    let rsa_key = match &key {
        PublicKey::Rsa(k) => k,
        _ => return Err("signature algorithm does not match issuer key type".into()),
    };

    if *alg_oid == OID_SHA256_WITH_RSA || *alg_oid == OID_SHA384_WITH_RSA
        || *alg_oid == OID_SHA512_WITH_RSA
    {
        let hash = match alg_oid {
            o if *o == OID_SHA256_WITH_RSA => HashAlg::Sha256,
            o if *o == OID_SHA384_WITH_RSA => HashAlg::Sha384,
            _ => HashAlg::Sha512,
        };
        return verify_rsa_pkcs1(rsa_key, hash, &hash.digest(tbs), signature)
            .then_some(())
            .ok_or_else(|| "RSA PKCS#1 signature mismatch".into());
    }

    if *alg_oid == OID_RSASSA_PSS {
        let hash = pss_hash_from_params(alg)?;
        return verify_rsa_pss(rsa_key, hash, &hash.digest(tbs), signature)
            .then_some(())
            .ok_or_else(|| "RSA-PSS signature mismatch".into());
    }

    Err(format!("unsupported signature algorithm {alg_oid}"))
}

pub fn verify_rsa_pkcs1(key: &RsaPublicKey, hash: HashAlg, digest: &[u8], sig: &[u8]) -> bool {
    let padding = match hash {
        HashAlg::Sha256 => rsa::Pkcs1v15Sign::new::<Sha256>(),
        HashAlg::Sha384 => rsa::Pkcs1v15Sign::new::<Sha384>(),
        HashAlg::Sha512 => rsa::Pkcs1v15Sign::new::<Sha512>(),
    };
    key.verify(padding, digest, sig).is_ok()
}

pub fn verify_rsa_pss(key: &RsaPublicKey, hash: HashAlg, digest: &[u8], sig: &[u8]) -> bool {
    let padding = match hash {
        HashAlg::Sha256 => rsa::Pss::new::<Sha256>(),
        HashAlg::Sha384 => rsa::Pss::new::<Sha384>(),
        HashAlg::Sha512 => rsa::Pss::new::<Sha512>(),
    };
    key.verify(padding, digest, sig).is_ok()
}

/// Pick the hash out of RSASSA-PSS-params. The parameters are scanned for
/// the DER encoding of a supported digest OID; a wrong pick cannot weaken
/// anything since the signature must still verify under it.
fn pss_hash_from_params(alg: &AlgorithmIdentifier) -> std::result::Result<HashAlg, String> {
    const SHA256_OID_DER: &[u8] = &[0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
    const SHA384_OID_DER: &[u8] = &[0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
    const SHA512_OID_DER: &[u8] = &[0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];

    let params = alg
        .parameters
        .as_ref()
        .ok_or_else(|| "RSASSA-PSS without parameters".to_string())?
        .data;
    for (der, hash) in [
        (SHA256_OID_DER, HashAlg::Sha256),
        (SHA384_OID_DER, HashAlg::Sha384),
        (SHA512_OID_DER, HashAlg::Sha512),
    ] {
        if params.windows(der.len()).any(|w| w == der) {
            return Ok(hash);
        }
    }
    Err("RSASSA-PSS with unsupported digest".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::hazmat::{PrehashSigner as _, PrehashVerifier as _};

    #[test]
    fn p256_fixed_signature_round_trip() {
        let signing = p256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap();
        let message = b"attested message";
        let sig: p256::ecdsa::Signature = signing.sign_prehash(&sha256(&[message])).unwrap();
        let pubkey = signing.verifying_key().to_encoded_point(false);

        assert!(verify_p256_fixed(pubkey.as_bytes(), message, &sig.to_vec()));
        assert!(!verify_p256_fixed(pubkey.as_bytes(), b"tampered", &sig.to_vec()));

        // The raw 64-byte x||y form used inside quotes.
        let raw = &pubkey.as_bytes()[1..];
        assert!(verify_p256_fixed(&sec1_from_raw_p256(raw), message, &sig.to_vec()));
    }

    #[test]
    fn p384_le_conversion_round_trip() {
        use p384::ecdsa::signature::hazmat::PrehashSigner as _;

        let signing = p384::ecdsa::SigningKey::from_slice(&[9u8; 48]).unwrap();
        let digest = sha384(&[b"report body"]);
        let sig: p384::ecdsa::Signature = signing.sign_prehash(&digest).unwrap();

        // Re-encode as the report's little-endian 72-byte halves.
        let bytes = sig.to_bytes();
        let mut r_le = [0u8; 72];
        let mut s_le = [0u8; 72];
        for i in 0..48 {
            r_le[i] = bytes[47 - i];
            s_le[i] = bytes[95 - i];
        }

        let recovered = p384_signature_from_le(&r_le, &s_le).unwrap();
        assert!(signing
            .verifying_key()
            .verify_prehash(&digest, &recovered)
            .is_ok());
    }

    #[test]
    fn short_le_component_rejected() {
        assert!(p384_signature_from_le(&[0u8; 12], &[0u8; 72]).is_err());
    }
}
