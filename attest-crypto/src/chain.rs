// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! X.509 certificate chain validation with CRL enforcement.
//!
//! The chains validated here come from vendor endorsements and have
//! policies an off-the-shelf web-PKI validator cannot express: when no
//! anchor is configured the chain's final certificate is auto-trusted (the
//! caller then checks it against a hard-coded vendor key), `ignore_time`
//! disables validity windows entirely, missing Authority-Key-Identifier
//! extensions must be tolerated (AMD VCEK), and every certificate below
//! the anchor must be covered by a CRL.

use std::time::{SystemTime, UNIX_EPOCH};

use attest_types::{Options, Result, VerificationError};
use tracing::{debug, trace};
use x509_parser::prelude::*;

use crate::pem;
use crate::sign::verify_x509_signature;

/// Trust anchors and CRLs for one chain validation.
///
/// Anchors and CRLs are held as DER; PEM inputs are converted on add.
#[derive(Debug, Default, Clone)]
pub struct TrustStore {
    anchors: Vec<Vec<u8>>,
    crls: Vec<Vec<u8>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_anchor_pem(&mut self, pem_data: &str) -> Result<()> {
        let ders = pem::pem_certs_to_der(pem_data.as_bytes())?;
        self.anchors.extend(ders);
        Ok(())
    }

    pub fn add_anchor_der(&mut self, der: Vec<u8>) {
        self.anchors.push(der);
    }

    /// Add a CRL in PEM or DER encoding, probed by leading bytes.
    pub fn add_crl(&mut self, data: &[u8]) -> Result<()> {
        let der = pem::crl_to_der(data)?;
        // Reject garbage early so failures point at the collateral.
        CertificateRevocationList::from_der(&der)
            .map_err(|e| VerificationError::MalformedEvidence(format!("invalid CRL: {e}")))?;
        self.crls.push(der);
        Ok(())
    }

    pub fn has_anchor(&self) -> bool {
        !self.anchors.is_empty()
    }
}

/// Validation knobs derived from [`Options`].
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub verification_time: Option<SystemTime>,
    pub ignore_time: bool,
    /// Require a CRL covering every certificate below the trust anchor.
    pub require_crls: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            verification_time: None,
            ignore_time: false,
            require_crls: true,
        }
    }
}

impl ValidationOptions {
    pub fn from_options(options: &Options) -> Self {
        Self {
            verification_time: options.verification_time,
            ignore_time: options.ignore_time,
            require_crls: true,
        }
    }

    fn now_timestamp(&self) -> i64 {
        let now = self.verification_time.unwrap_or_else(SystemTime::now);
        match now.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        }
    }
}

/// Verify a leaf-first certificate chain against the store.
///
/// Returns the validated chain as DER, leaf first, with the trust anchor
/// appended when it was not already the chain's final element. Depth in
/// errors is the index of the offending certificate, leaf = 0.
pub fn verify_certificate_chain(
    chain: &[Vec<u8>],
    store: &TrustStore,
    options: &ValidationOptions,
) -> Result<Vec<Vec<u8>>> {
    if chain.is_empty() {
        return Err(invalid(0, "empty certificate chain"));
    }

    // Walk leaf -> root on the input chain, checking names and link
    // signatures, and decide whether a configured anchor must be appended.
    // AKI/SKI are deliberately not consulted.
    let extra_anchor: Option<Vec<u8>> = {
        let certs = parse_all(chain)?;
        for i in 0..certs.len() - 1 {
            let (child, parent) = (&certs[i], &certs[i + 1]);
            if child.issuer() != parent.subject() {
                return Err(invalid(i, "issuer does not match subject of the next certificate"));
            }
            verify_link(child, parent.public_key()).map_err(|reason| invalid(i, &reason))?;
        }

        let top = certs.len() - 1;
        if store.has_anchor() {
            anchor_for_chain(&certs, store)?
        } else {
            // No configured anchor: auto-trust the final certificate. It
            // must at least be properly self-signed; the caller is expected
            // to compare its key against the hard-coded vendor key.
            if certs[top].subject() != certs[top].issuer() {
                return Err(invalid(top, "chain does not terminate in a self-signed certificate"));
            }
            None
        }
    };

    let mut ders: Vec<Vec<u8>> = chain.to_vec();
    if let Some(anchor) = extra_anchor {
        ders.push(anchor);
    }
    let certs = parse_all(&ders)?;

    let top = certs.len() - 1;
    {
        let root = &certs[top];
        if root.subject() != root.issuer() {
            return Err(invalid(top, "trust anchor is not self-signed"));
        }
        verify_link(root, root.public_key()).map_err(|reason| invalid(top, &reason))?;
    }

    if !options.ignore_time {
        let now = options.now_timestamp();
        for (i, cert) in certs.iter().enumerate() {
            let validity = cert.validity();
            if now < validity.not_before.timestamp() {
                return Err(invalid(i, "certificate is not yet valid"));
            }
            if now > validity.not_after.timestamp() {
                return Err(invalid(i, "certificate has expired"));
            }
        }
    }

    if options.require_crls {
        check_revocation(&certs, store, options)?;
    }

    debug!(depth = certs.len(), "certificate chain verified");
    Ok(ders)
}

/// Check that a standalone certificate carries the given SPKI, used for the
/// hard-coded vendor root key comparisons.
pub fn cert_has_public_key_pem(cert_der: &[u8], public_key_pem: &str) -> Result<bool> {
    let expected = ::pem::parse(public_key_pem)
        .map_err(|e| VerificationError::MalformedEvidence(format!("invalid public key PEM: {e}")))?;
    if expected.tag() != "PUBLIC KEY" {
        return Err(VerificationError::MalformedEvidence(format!(
            "unexpected PEM tag {} for public key",
            expected.tag()
        )));
    }
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| VerificationError::MalformedEvidence(format!("invalid certificate: {e}")))?;
    Ok(cert.public_key().raw == expected.contents())
}

pub fn cert_is_ca(cert_der: &[u8]) -> Result<bool> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| VerificationError::MalformedEvidence(format!("invalid certificate: {e}")))?;
    Ok(cert.is_ca())
}

fn parse_all(ders: &[Vec<u8>]) -> Result<Vec<X509Certificate>> {
    ders.iter()
        .enumerate()
        .map(|(i, der)| {
            X509Certificate::from_der(der)
                .map(|(_, cert)| cert)
                .map_err(|e| invalid(i, &format!("certificate parse error: {e}")))
        })
        .collect()
}

fn verify_link(
    child: &X509Certificate,
    issuer_spki: &SubjectPublicKeyInfo,
) -> std::result::Result<(), String> {
    verify_x509_signature(
        child.tbs_certificate.as_ref(),
        &child.signature_algorithm,
        child.signature_value.data.as_ref(),
        issuer_spki,
    )
}

/// Tie the chain's top to a configured anchor. Returns the anchor DER when
/// it has to be appended to the chain.
fn anchor_for_chain(certs: &[X509Certificate], store: &TrustStore) -> Result<Option<Vec<u8>>> {
    let top = certs.len() - 1;
    let top_cert = &certs[top];

    for anchor_der in &store.anchors {
        let (_, anchor) = X509Certificate::from_der(anchor_der)
            .map_err(|e| VerificationError::MalformedEvidence(format!("invalid anchor: {e}")))?;
        if top_cert.subject() == anchor.subject()
            && top_cert.public_key().raw == anchor.public_key().raw
        {
            // The chain already carries the anchor certificate.
            return Ok(None);
        }
        if top_cert.issuer() == anchor.subject() {
            verify_link(top_cert, anchor.public_key()).map_err(|reason| invalid(top, &reason))?;
            return Ok(Some(anchor_der.clone()));
        }
    }

    Err(invalid(top, "chain does not terminate at a configured trust anchor"))
}

/// CRL enforcement for every certificate below the trust anchor.
///
/// A CRL is matched by issuer name; when no name match exists, any store
/// CRL signed by a chain member is consulted instead (AMD publishes one
/// combined CRL for the whole VCEK chain). A certificate with no
/// applicable CRL at all is an error.
fn check_revocation(
    certs: &[X509Certificate],
    store: &TrustStore,
    options: &ValidationOptions,
) -> Result<()> {
    let parsed_crls: Vec<CertificateRevocationList> = store
        .crls
        .iter()
        .map(|der| {
            CertificateRevocationList::from_der(der)
                .map(|(_, crl)| crl)
                .map_err(|e| VerificationError::MalformedEvidence(format!("invalid CRL: {e}")))
        })
        .collect::<Result<_>>()?;

    let crl_signed_by_chain = |crl: &CertificateRevocationList| -> bool {
        certs.iter().any(|cert| {
            cert.subject() == crl.issuer()
                && verify_crl_signature(crl, cert.public_key()).is_ok()
        })
    };

    let top = certs.len() - 1;
    for (i, cert) in certs.iter().enumerate() {
        if i == top {
            // The trust anchor itself is not revocation-checked.
            continue;
        }

        let mut applicable: Option<&CertificateRevocationList> = parsed_crls
            .iter()
            .find(|crl| crl.issuer() == cert.issuer());

        if applicable.is_none() {
            applicable = parsed_crls.iter().find(|crl| crl_signed_by_chain(crl));
            if applicable.is_some() {
                trace!(depth = i, "no issuer-matched CRL, using chain-signed CRL");
            }
        }

        let crl = applicable.ok_or_else(|| VerificationError::CrlMissing {
            issuer: cert.issuer().to_string(),
        })?;

        // The CRL must be signed by the chain certificate that issued it.
        if let Some(signer) = certs.iter().find(|c| c.subject() == crl.issuer()) {
            verify_crl_signature(crl, signer.public_key())
                .map_err(|reason| invalid(i, &format!("CRL signature: {reason}")))?;
        }

        if !options.ignore_time {
            if let Some(next_update) = crl.tbs_cert_list.next_update {
                if options.now_timestamp() > next_update.timestamp() {
                    return Err(invalid(i, "CRL is out of date"));
                }
            }
        }

        let serial = cert.tbs_certificate.raw_serial();
        if crl
            .iter_revoked_certificates()
            .any(|revoked| revoked.raw_serial() == serial)
        {
            return Err(invalid(i, "certificate is revoked"));
        }
    }
    Ok(())
}

fn verify_crl_signature(
    crl: &CertificateRevocationList,
    issuer_spki: &SubjectPublicKeyInfo,
) -> std::result::Result<(), String> {
    verify_x509_signature(
        crl.tbs_cert_list.as_ref(),
        &crl.signature_algorithm,
        crl.signature_value.data.as_ref(),
        issuer_spki,
    )
}

fn invalid(depth: usize, reason: &str) -> VerificationError {
    VerificationError::CertChainInvalid {
        reason: reason.to_string(),
        depth,
    }
}
