// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Collateral download from Intel's provisioning certification service.
//!
//! One batch fetches the root CA CRL, the TCB info for the platform's
//! fmspc, the PCK CRL for the issuing CA, and the QE (or QVE) identity.
//! Issuer chains ride in percent-encoded response headers.

use attest_collateral::{fetch_all, Request};
use attest_types::Result;
use tracing::debug;

use crate::constants::{API_BASE_URL, ROOT_CA_URL, ROOT_CRL_URL};
use crate::QuoteCollateral;

/// Download the Intel SGX provisioning root CA certificate (PEM).
pub async fn download_root_ca(client: &reqwest::Client) -> Result<Vec<u8>> {
    let responses = fetch_all(client, vec![Request::new(ROOT_CA_URL)]).await?;
    Ok(responses.into_iter().next().expect("one response").body)
}

/// Download quote verification collateral for the given PCK CA
/// (`processor` or `platform`) and fmspc (lower-case hex).
pub async fn download_collateral(
    client: &reqwest::Client,
    ca: &str,
    fmspc: &str,
    qve: bool,
) -> Result<QuoteCollateral> {
    let identity_kind = if qve { "qve" } else { "qe" };
    let requests = vec![
        Request::new(ROOT_CRL_URL),
        Request::new(format!("{API_BASE_URL}/tcb?fmspc={fmspc}")),
        Request::new(format!("{API_BASE_URL}/pckcrl?ca={ca}&encoding=pem")),
        Request::new(format!("{API_BASE_URL}/{identity_kind}/identity")),
    ];
    debug!(ca, fmspc, identity_kind, "downloading SGX collateral");
    let responses = fetch_all(client, requests).await?;
    let [root_crl, tcb, pck_crl, identity]: [attest_collateral::Response; 4] = responses
        .try_into()
        .expect("batch size matches request count");

    Ok(QuoteCollateral {
        major_version: 3,
        minor_version: 1,
        tee_type: 0,
        root_ca_crl: root_crl.body,
        tcb_info_issuer_chain: tcb.header_data("SGX-TCB-Info-Issuer-Chain", true)?,
        tcb_info: tcb.body,
        pck_crl_issuer_chain: pck_crl.header_data("SGX-PCK-CRL-Issuer-Chain", true)?,
        pck_crl: pck_crl.body,
        qe_identity_issuer_chain: identity.header_data("SGX-Enclave-Identity-Issuer-Chain", true)?,
        qe_identity: identity.body,
    })
}
