// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Endorsement download from the AMD Key Distribution Service.

use attest_collateral::{fetch_all, Request};
use attest_types::claims::SnpTcbVersion;
use attest_types::{Result, VerificationError};
use tracing::debug;

use crate::{KDS_URL, PRODUCT_NAME};

/// Endorsements for one report: the VCEK chain (leaf first, DER), the
/// issuer-chain CRL, and optionally the ARK fetched separately.
#[derive(Debug, Clone, Default)]
pub struct SnpEndorsements {
    pub vcek_chain: Vec<Vec<u8>>,
    pub crls: Vec<Vec<u8>>,
    pub root_ca_certificate: Option<Vec<u8>>,
}

fn vcek_url(chip_id: &[u8], tcb: &SnpTcbVersion) -> String {
    format!(
        "{KDS_URL}/vcek/v1/{PRODUCT_NAME}/{}?blSPL={}&teeSPL={}&snpSPL={}&ucodeSPL={}",
        hex::encode(chip_id),
        tcb.boot_loader,
        tcb.tee,
        tcb.snp,
        tcb.microcode
    )
}

/// Fetch the VCEK, the ASK/ARK issuer chain and the issuer CRL for a
/// report's chip and reported TCB.
pub async fn download_endorsements(
    client: &reqwest::Client,
    chip_id: &[u8],
    reported_tcb: &SnpTcbVersion,
) -> Result<SnpEndorsements> {
    let requests = vec![
        Request::new(vcek_url(chip_id, reported_tcb)),
        Request::new(format!("{KDS_URL}/vcek/v1/{PRODUCT_NAME}/cert_chain")),
        Request::new(format!("{KDS_URL}/vcek/v1/{PRODUCT_NAME}/crl")),
    ];
    debug!(product = PRODUCT_NAME, "downloading SEV-SNP endorsements");
    let responses = fetch_all(client, requests).await?;
    let [vcek, issuer_chain, crl]: [attest_collateral::Response; 3] = responses
        .try_into()
        .expect("batch size matches request count");

    // The issuer chain is ASK then ARK.
    let issuer_ders = attest_crypto::pem::certs_to_der(&issuer_chain.body)?;
    if issuer_ders.len() != 2 {
        return Err(VerificationError::MalformedEvidence(format!(
            "VCEK issuer chain has {} certificates, expected 2",
            issuer_ders.len()
        )));
    }

    let mut vcek_chain = vec![vcek.body];
    let root = issuer_ders.last().cloned();
    vcek_chain.extend(issuer_ders);

    Ok(SnpEndorsements {
        vcek_chain,
        crls: vec![crl.body],
        root_ca_certificate: root,
    })
}

/// Fetch only the ARK (the second certificate of the issuer chain).
pub async fn download_root_ca(client: &reqwest::Client) -> Result<Vec<u8>> {
    let responses = fetch_all(
        client,
        vec![Request::new(format!(
            "{KDS_URL}/vcek/v1/{PRODUCT_NAME}/cert_chain"
        ))],
    )
    .await?;
    let body = &responses[0].body;
    let ders = attest_crypto::pem::certs_to_der(body)?;
    ders.into_iter().nth(1).ok_or_else(|| {
        VerificationError::MalformedEvidence("VCEK issuer chain has no root certificate".into())
    })
}
