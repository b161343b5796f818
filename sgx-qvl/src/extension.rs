// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! PCK certificate SGX extension parsing.
//!
//! PCK certificates carry an extension under OID 1.2.840.113741.1.13.1
//! holding a sequence of (OID, value) pairs: ppid, the certified TCB
//! (16 component SVNs, the PCE SVN and the CPU SVN), pceid, fmspc and the
//! SGX type; platform-CA certificates append a platform instance id and a
//! three-flag configuration sequence. Order and OIDs are fixed by Intel's
//! PCK certificate specification and are enforced here.

use attest_types::{Result, VerificationError};
use x509_parser::der_parser::ber::BerObject;
use x509_parser::der_parser::parse_der;
use x509_parser::prelude::*;

pub const SGX_EXTENSION_OID: &str = "1.2.840.113741.1.13.1";

const PROCESSOR_NUM_ENTRIES: usize = 5;
const PLATFORM_NUM_ENTRIES: usize = 7;
const TCB_SEQ_LEN: usize = 18;

/// The TCB certified by a PCK certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PckTcb {
    pub comp_svn: [u8; 16],
    pub pce_svn: u16,
    pub cpu_svn: [u8; 16],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PckConfiguration {
    pub dynamic_platform: bool,
    pub cached_keys: bool,
    pub smt_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgxExtensions {
    pub ppid: Vec<u8>,
    pub tcb: PckTcb,
    pub pceid: Vec<u8>,
    pub fmspc: Vec<u8>,
    pub sgx_type: u64,
    /// Present only in platform-CA certificates.
    pub platform_instance_id: Option<Vec<u8>>,
    pub configuration: Option<PckConfiguration>,
}

impl SgxExtensions {
    /// Whether the platform instance id is present and non-zero, which
    /// selects the `platform` PCK CA for collateral lookups.
    pub fn has_platform_instance_id(&self) -> bool {
        self.platform_instance_id
            .as_ref()
            .map(|id| id.iter().any(|b| *b != 0))
            .unwrap_or(false)
    }
}

/// Parse the SGX extension out of a PCK certificate.
pub fn parse_sgx_extensions(cert_der: &[u8]) -> Result<SgxExtensions> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| malformed(format!("invalid PCK certificate: {e}")))?;
    let ext = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == SGX_EXTENSION_OID)
        .ok_or_else(|| malformed("PCK certificate does not contain the SGX extension".into()))?;

    let (_, obj) = parse_der(ext.value)
        .map_err(|e| malformed(format!("SGX extension is not valid DER: {e}")))?;
    let entries = as_sequence(&obj)?;

    if entries.len() != PROCESSOR_NUM_ENTRIES && entries.len() != PLATFORM_NUM_ENTRIES {
        return Err(malformed(format!(
            "SGX extension sequence has invalid size {}",
            entries.len()
        )));
    }

    let ppid = octet_string(&entries[0], &sub_oid("1"))?;
    let tcb = parse_tcb(&entries[1])?;
    let pceid = octet_string(&entries[2], &sub_oid("3"))?;
    let fmspc = octet_string(&entries[3], &sub_oid("4"))?;
    let sgx_type = enumerated(&entries[4], &sub_oid("5"))?;

    let (platform_instance_id, configuration) = if entries.len() == PLATFORM_NUM_ENTRIES {
        let instance_id = octet_string(&entries[5], &sub_oid("6"))?;
        let config = parse_configuration(&entries[6])?;
        (Some(instance_id), Some(config))
    } else {
        (None, None)
    };

    Ok(SgxExtensions {
        ppid,
        tcb,
        pceid,
        fmspc,
        sgx_type,
        platform_instance_id,
        configuration,
    })
}

fn parse_tcb(entry: &BerObject) -> Result<PckTcb> {
    let tcb_oid = sub_oid("2");
    let items = as_sequence(&keyed_value(entry, &tcb_oid)?)?;
    if items.len() != TCB_SEQ_LEN {
        return Err(malformed("SGX TCB extension sequence of invalid length".into()));
    }

    let mut comp_svn = [0u8; 16];
    let mut pce_svn = 0u16;
    let mut cpu_svn = [0u8; 16];
    for (i, item) in items.iter().enumerate() {
        let expected_oid = format!("{tcb_oid}.{}", i + 1);
        if i < 16 {
            let v = integer(item, &expected_oid)?;
            comp_svn[i] = u8::try_from(v)
                .map_err(|_| malformed(format!("component SVN {} out of range", i + 1)))?;
        } else if i == 16 {
            let v = integer(item, &expected_oid)?;
            pce_svn = u16::try_from(v).map_err(|_| malformed("PCE SVN out of range".into()))?;
        } else {
            let v = octet_string(item, &expected_oid)?;
            if v.len() != cpu_svn.len() {
                return Err(malformed("CPU SVN octet string of invalid size".into()));
            }
            cpu_svn.copy_from_slice(&v);
        }
    }

    Ok(PckTcb {
        comp_svn,
        pce_svn,
        cpu_svn,
    })
}

fn parse_configuration(entry: &BerObject) -> Result<PckConfiguration> {
    let config_oid = sub_oid("7");
    let items = as_sequence(&keyed_value(entry, &config_oid)?)?;
    if items.len() != 3 {
        return Err(malformed("SGX configuration sequence has invalid size".into()));
    }
    let dynamic_platform = boolean(&items[0], &format!("{config_oid}.1"))?;
    let cached_keys = boolean(&items[1], &format!("{config_oid}.2"))?;
    let smt_enabled = boolean(&items[2], &format!("{config_oid}.3"))?;
    Ok(PckConfiguration {
        dynamic_platform,
        cached_keys,
        smt_enabled,
    })
}

fn sub_oid(tail: &str) -> String {
    format!("{SGX_EXTENSION_OID}.{tail}")
}

fn malformed(msg: String) -> VerificationError {
    VerificationError::MalformedEvidence(msg)
}

fn as_sequence<'a>(obj: &BerObject<'a>) -> Result<Vec<BerObject<'a>>> {
    obj.as_sequence()
        .map(|v| v.to_vec())
        .map_err(|_| malformed("SGX extension: expected a sequence".into()))
}

/// Unpack a `SEQUENCE { OID, value }` pair, checking the OID.
fn keyed_value<'a>(entry: &BerObject<'a>, expected_oid: &str) -> Result<BerObject<'a>> {
    let pair = as_sequence(entry)?;
    if pair.len() != 2 {
        return Err(malformed("SGX extension: expected an (OID, value) pair".into()));
    }
    let oid = pair[0]
        .as_oid()
        .map_err(|_| malformed("SGX extension: expected an OID".into()))?;
    if oid.to_id_string() != expected_oid {
        return Err(malformed(format!(
            "SGX extension: expected OID {expected_oid}, found {}",
            oid.to_id_string()
        )));
    }
    Ok(pair[1].clone())
}

fn octet_string(entry: &BerObject, expected_oid: &str) -> Result<Vec<u8>> {
    let value = keyed_value(entry, expected_oid)?;
    value
        .as_slice()
        .map(|s| s.to_vec())
        .map_err(|_| malformed(format!("SGX extension {expected_oid}: expected an octet string")))
}

fn integer(entry: &BerObject, expected_oid: &str) -> Result<u64> {
    let value = keyed_value(entry, expected_oid)?;
    value
        .as_u64()
        .map_err(|_| malformed(format!("SGX extension {expected_oid}: expected an integer")))
}

fn enumerated(entry: &BerObject, expected_oid: &str) -> Result<u64> {
    let value = keyed_value(entry, expected_oid)?;
    value
        .as_u64()
        .map_err(|_| malformed(format!("SGX extension {expected_oid}: expected an enumerated")))
}

fn boolean(entry: &BerObject, expected_oid: &str) -> Result<bool> {
    let value = keyed_value(entry, expected_oid)?;
    value
        .as_bool()
        .map_err(|_| malformed(format!("SGX extension {expected_oid}: expected a boolean")))
}

/// DER construction of the SGX extension, used to build PCK test
/// certificates and exercised against the parser above.
pub mod build {
    use super::{PckConfiguration, PckTcb, SgxExtensions, SGX_EXTENSION_OID};

    fn der_len(out: &mut Vec<u8>, len: usize) {
        if len < 0x80 {
            out.push(len as u8);
        } else if len <= 0xff {
            out.push(0x81);
            out.push(len as u8);
        } else {
            out.push(0x82);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
    }

    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        der_len(&mut out, content.len());
        out.extend_from_slice(content);
        out
    }

    fn oid(dotted: &str) -> Vec<u8> {
        let parts: Vec<u64> = dotted.split('.').map(|p| p.parse().unwrap()).collect();
        let mut content = vec![(parts[0] * 40 + parts[1]) as u8];
        for &part in &parts[2..] {
            let mut bytes = Vec::new();
            let mut v = part;
            loop {
                bytes.push((v & 0x7f) as u8);
                v >>= 7;
                if v == 0 {
                    break;
                }
            }
            bytes.reverse();
            let last = bytes.len() - 1;
            for (i, b) in bytes.iter().enumerate() {
                content.push(if i == last { *b } else { *b | 0x80 });
            }
        }
        tlv(0x06, &content)
    }

    fn sequence(items: &[Vec<u8>]) -> Vec<u8> {
        tlv(0x30, &items.concat())
    }

    fn pair(oid_str: &str, value: Vec<u8>) -> Vec<u8> {
        sequence(&[oid(oid_str), value])
    }

    fn octet_string(data: &[u8]) -> Vec<u8> {
        tlv(0x04, data)
    }

    fn integer(v: u64) -> Vec<u8> {
        let mut bytes = v.to_be_bytes().to_vec();
        while bytes.len() > 1 && bytes[0] == 0 && bytes[1] < 0x80 {
            bytes.remove(0);
        }
        tlv(0x02, &bytes)
    }

    fn enumerated(v: u64) -> Vec<u8> {
        let mut bytes = v.to_be_bytes().to_vec();
        while bytes.len() > 1 && bytes[0] == 0 && bytes[1] < 0x80 {
            bytes.remove(0);
        }
        tlv(0x0a, &bytes)
    }

    fn boolean(v: bool) -> Vec<u8> {
        tlv(0x01, &[if v { 0xff } else { 0x00 }])
    }

    /// Encode the SGX extension value for the given contents.
    pub fn encode_sgx_extension(ext: &SgxExtensions) -> Vec<u8> {
        let base = SGX_EXTENSION_OID;
        let mut entries = vec![
            pair(&format!("{base}.1"), octet_string(&ext.ppid)),
            pair(&format!("{base}.2"), encode_tcb(&ext.tcb)),
            pair(&format!("{base}.3"), octet_string(&ext.pceid)),
            pair(&format!("{base}.4"), octet_string(&ext.fmspc)),
            pair(&format!("{base}.5"), enumerated(ext.sgx_type)),
        ];
        if let Some(instance_id) = &ext.platform_instance_id {
            entries.push(pair(&format!("{base}.6"), octet_string(instance_id)));
            let config = ext.configuration.unwrap_or(PckConfiguration {
                dynamic_platform: false,
                cached_keys: false,
                smt_enabled: false,
            });
            entries.push(pair(&format!("{base}.7"), encode_configuration(&config)));
        }
        sequence(&entries)
    }

    fn encode_tcb(tcb: &PckTcb) -> Vec<u8> {
        let base = format!("{SGX_EXTENSION_OID}.2");
        let mut items = Vec::new();
        for (i, svn) in tcb.comp_svn.iter().enumerate() {
            items.push(pair(&format!("{base}.{}", i + 1), integer(*svn as u64)));
        }
        items.push(pair(&format!("{base}.17"), integer(tcb.pce_svn as u64)));
        items.push(pair(&format!("{base}.18"), octet_string(&tcb.cpu_svn)));
        sequence(&items)
    }

    fn encode_configuration(config: &PckConfiguration) -> Vec<u8> {
        let base = format!("{SGX_EXTENSION_OID}.7");
        sequence(&[
            pair(&format!("{base}.1"), boolean(config.dynamic_platform)),
            pair(&format!("{base}.2"), boolean(config.cached_keys)),
            pair(&format!("{base}.3"), boolean(config.smt_enabled)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_extensions(platform: bool) -> SgxExtensions {
        SgxExtensions {
            ppid: vec![0x11; 16],
            tcb: PckTcb {
                comp_svn: [2; 16],
                pce_svn: 11,
                cpu_svn: [3; 16],
            },
            pceid: vec![0, 0],
            fmspc: vec![0x00, 0x90, 0x6e, 0xd5, 0x00, 0x00],
            sgx_type: 0,
            platform_instance_id: platform.then(|| vec![0xaa; 16]),
            configuration: platform.then(|| PckConfiguration {
                dynamic_platform: true,
                cached_keys: false,
                smt_enabled: true,
            }),
        }
    }

    fn cert_with_extension(ext_value: &[u8]) -> Vec<u8> {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::default();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "Intel SGX PCK Certificate");
        params.custom_extensions = vec![rcgen::CustomExtension::from_oid_content(
            &[1, 2, 840, 113741, 1, 13, 1],
            ext_value.to_vec(),
        )];
        params.self_signed(&key).unwrap().der().to_vec()
    }

    #[test]
    fn processor_extension_round_trip() {
        let ext = sample_extensions(false);
        let cert = cert_with_extension(&build::encode_sgx_extension(&ext));
        let parsed = parse_sgx_extensions(&cert).unwrap();
        assert_eq!(parsed, ext);
        assert!(!parsed.has_platform_instance_id());
    }

    #[test]
    fn platform_extension_round_trip() {
        let ext = sample_extensions(true);
        let cert = cert_with_extension(&build::encode_sgx_extension(&ext));
        let parsed = parse_sgx_extensions(&cert).unwrap();
        assert_eq!(parsed, ext);
        assert!(parsed.has_platform_instance_id());
    }

    #[test]
    fn zero_platform_instance_id_selects_processor_ca() {
        let mut ext = sample_extensions(true);
        ext.platform_instance_id = Some(vec![0; 16]);
        let cert = cert_with_extension(&build::encode_sgx_extension(&ext));
        assert!(!parse_sgx_extensions(&cert).unwrap().has_platform_instance_id());
    }

    #[test]
    fn missing_extension_rejected() {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::default()
            .self_signed(&key)
            .unwrap()
            .der()
            .to_vec();
        assert!(parse_sgx_extensions(&cert).is_err());
    }

    #[test]
    fn truncated_tcb_sequence_rejected() {
        // Drop one TCB component pair by re-encoding with 17 entries.
        let ext = sample_extensions(false);
        let good = build::encode_sgx_extension(&ext);
        // Corrupt the inner TCB sequence length marker by flipping a byte in
        // the encoded form; the parser must reject rather than misread.
        let mut bad = good.clone();
        bad[10] ^= 0xff;
        let cert = cert_with_extension(&bad);
        assert!(parse_sgx_extensions(&cert).is_err());
    }
}
