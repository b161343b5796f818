// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Process-wide constants for SGX verification.

/// Intel SGX Provisioning Certification Root CA public key. The root of
/// every PCK, TCB-info and QE-identity issuer chain must carry exactly
/// this key.
pub const INTEL_SGX_ROOT_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEC6nEwMDIYZOj/iPWsCzaEKi71OiO
SLRFhWGjbnBVJfVnkY4u3IjkDYYL0MxO4mqsyYjlBalTVYxFP2sJBK5zlA==
-----END PUBLIC KEY-----
";

pub const PCK_CERT_COMMON_NAME: &str = "Intel SGX PCK Certificate";

/// TCB and enclave-identity documents dated before this are rejected.
pub const SGX_EARLIEST_TCB_CRL_DATE: &str = "2017-03-17T00:00:00Z";

pub const ROOT_CA_URL: &str =
    "https://certificates.trustedservices.intel.com/Intel_SGX_Provisioning_Certification_RootCA.pem";
pub const ROOT_CRL_URL: &str =
    "https://certificates.trustedservices.intel.com/IntelSGXRootCA.crl";
pub const API_BASE_URL: &str = "https://api.trustedservices.intel.com/sgx/certification/v3";

pub const SUPPORTED_QUOTE_VERSION: u16 = 3;
/// `SGX_QL_ALG_ECDSA_P256`
pub const SIGN_TYPE_ECDSA_P256: u16 = 2;
/// `PCK_CERT_CHAIN` certification data type.
pub const CERT_KEY_TYPE_PCK_CHAIN: u16 = 5;

/// `SGX_FLAGS_DEBUG` in the report attribute flags.
pub const SGX_FLAGS_DEBUG: u64 = 0x0000_0000_0000_0002;
