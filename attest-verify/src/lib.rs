// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Remote attestation verification.
//!
//! Entry point over the per-platform verifiers: dispatches an
//! [`AttestationBundle`] by source, adapts Open Enclave evidence onto the
//! SGX verifier, composes ACI verification (SEV-SNP report first, then UVM
//! endorsements against the attested measurement), and hosts the request
//! [`service`] for callers that want background verification with
//! submit/result/erase semantics.

use attest_types::claims::AciClaims;
use attest_types::{AttestationBundle, Claims, Options, Result, Source, VerificationError};
use tracing::{debug, info};

pub mod oe;
pub mod service;

pub use attest_types::{claims, codec};
pub use service::{RequestId, RequestState, VerifierService};

/// Verify an attestation bundle and produce claims.
///
/// With caller-supplied endorsements no network I/O happens; otherwise
/// endorsements are fetched from the platform vendor with `client`.
pub async fn verify(
    bundle: &AttestationBundle,
    options: &Options,
    client: &reqwest::Client,
) -> Result<Claims> {
    info!(source = bundle.source.as_str(), "verifying attestation");
    let result = match bundle.source {
        Source::Sgx => {
            sgx_qvl::verify(&bundle.evidence, &bundle.endorsements, options, client)
                .await
                .map(Claims::Sgx)
        }
        Source::OpenEnclave => oe::verify(bundle, options, client).await.map(Claims::Sgx),
        Source::SevSnp => {
            snp_qvl::verify(&bundle.evidence, &bundle.endorsements, options, client)
                .await
                .map(Claims::SevSnp)
        }
        Source::Aci => verify_aci(bundle, options, client).await.map(Claims::Aci),
    };
    match &result {
        Ok(_) => debug!(source = bundle.source.as_str(), "verification successful"),
        Err(e) => debug!(source = bundle.source.as_str(), "verification failed: {e}"),
    }
    result
}

/// ACI wraps SEV-SNP: the report is verified first, then the UVM
/// endorsements are checked against the measurement the report attested.
async fn verify_aci(
    bundle: &AttestationBundle,
    options: &Options,
    client: &reqwest::Client,
) -> Result<AciClaims> {
    let snp = snp_qvl::verify(&bundle.evidence, &bundle.endorsements, options, client).await?;

    if bundle.uvm_endorsements.is_empty() {
        if options.partial {
            debug!("no UVM endorsements, returning SEV-SNP claims only");
            return Ok(AciClaims { snp, uvm: None });
        }
        return Err(VerificationError::MalformedEvidence(
            "ACI attestation without UVM endorsements".into(),
        ));
    }

    let uvm =
        uvm_endorsements::verify_uvm_endorsements(&bundle.uvm_endorsements, &snp.measurement)?;
    Ok(AciClaims {
        snp,
        uvm: Some(uvm),
    })
}

/// Resolve the endorsements a bundle will be verified against, fetching
/// from the vendor when the bundle carries none (or `fresh_endorsements`
/// is set). The returned bytes are in the caller-supplied format of the
/// respective source.
pub async fn prepare_endorsements(
    bundle: &AttestationBundle,
    options: &Options,
    client: &reqwest::Client,
) -> Result<Vec<u8>> {
    match bundle.source {
        Source::Sgx => {
            sgx_qvl::prepare_endorsements(&bundle.evidence, &bundle.endorsements, options, client)
                .await
        }
        Source::SevSnp | Source::Aci => {
            snp_qvl::prepare_endorsements(&bundle.evidence, &bundle.endorsements, options, client)
                .await
        }
        // Open Enclave endorsements are produced enclave-side and cannot be
        // fetched; whatever the caller supplied is used as-is.
        Source::OpenEnclave => Ok(bundle.endorsements.clone()),
    }
}
