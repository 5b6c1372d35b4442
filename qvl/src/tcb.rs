//! TCB data surfaces.
//!
//! The core does not implement Intel's TCB policy; it surfaces the data a
//! policy needs (the PCK certificate's FMSPC / CPU SVN / PCE SVN, and a
//! serde model of the PCS TCB-info response) and defers the decision to an
//! injected [`TcbPolicy`]. Fetching TCB info over the network is likewise
//! the caller's job, via [`FetchTcbInfo`].

use std::{collections::BTreeMap, sync::Arc};

use asn1_rs::oid;
use serde::{Deserialize, Serialize};

use crate::{error::CertChainError, quote::Quote, x509::Cert};

/// Decides whether a platform's TCB level is acceptable. Receives the PCK
/// FMSPC (lowercase hex) and the parsed quote; the quote exposes the CPU SVN
/// vector, PCE SVN, and (for TDX) the TEE TCB SVN array.
pub trait TcbPolicy: Send + Sync {
    fn verify(&self, fmspc_hex: &str, quote: &Quote) -> bool;
}

impl<F> TcbPolicy for F
where
    F: Fn(&str, &Quote) -> bool + Send + Sync,
{
    fn verify(&self, fmspc_hex: &str, quote: &Quote) -> bool {
        self(fmspc_hex, quote)
    }
}

/// Caller-supplied TCB-info fetcher (e.g. an Intel PCS client). The core
/// never performs network I/O itself.
pub type FetchTcbInfo = Arc<dyn Fn(&str) -> anyhow::Result<TcbInfo> + Send + Sync>;

/// Intel SGX PCK certificate extension (OID 1.2.840.113741.1.13.1) fields
/// needed for TCB evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PckExtension {
    pub fmspc: [u8; 6],
    pub cpu_svn: [u8; 16],
    pub pce_svn: u16,
}

impl PckExtension {
    pub fn fmspc_hex(&self) -> String {
        hex::encode(self.fmspc)
    }

    /// Whether `cert` carries the Intel SGX PCK extension at all. Used to
    /// pick the PCK leaf out of a candidate pool.
    pub fn is_pck_cert(cert: &Cert<'_>) -> bool {
        cert.extension_value(&oid!(1.2.840.113741.1.13.1)).is_some()
    }

    /// Parse the extension from a PCK certificate.
    pub fn from_cert(cert: &Cert<'_>) -> Result<Self, CertChainError> {
        let value = cert
            .extension_value(&oid!(1.2.840.113741.1.13.1))
            .ok_or_else(|| {
                CertChainError::MissingCertData("no Intel SGX PCK extension".to_owned())
            })?;
        Self::parse(value)
    }

    /// Parse the extension value: a SEQUENCE of `{ OID, value }` pairs, with
    /// the TCB entry (arc .2) itself a nested sequence of component SVNs.
    fn parse(value: &[u8]) -> Result<Self, CertChainError> {
        let entries = read_oid_value_pairs(value)?;

        let mut fmspc = None;
        let mut cpu_svn = None;
        let mut pce_svn = None;

        for (oid, raw) in &entries {
            let arcs = oid.components();
            match arcs.as_slice() {
                // FMSPC: OCTET STRING (6)
                [1, 2, 840, 113741, 1, 13, 1, 4] => {
                    let bytes = read_octet_string(raw)?;
                    fmspc = Some(<[u8; 6]>::try_from(bytes.as_slice()).map_err(|_| {
                        CertChainError::BadDer(format!("FMSPC length {}", bytes.len()))
                    })?);
                }
                // TCB: SEQUENCE of { OID, INTEGER | OCTET STRING }
                [1, 2, 840, 113741, 1, 13, 1, 2] => {
                    let tcb_entries = read_oid_value_pairs(raw)?;
                    let mut svns = [0u8; 16];
                    for (tcb_oid, tcb_raw) in &tcb_entries {
                        match tcb_oid.components().as_slice() {
                            [1, 2, 840, 113741, 1, 13, 1, 2, comp @ 1..=16] => {
                                svns[(comp - 1) as usize] = read_integer(tcb_raw)? as u8;
                            }
                            [1, 2, 840, 113741, 1, 13, 1, 2, 17] => {
                                pce_svn = Some(read_integer(tcb_raw)? as u16);
                            }
                            [1, 2, 840, 113741, 1, 13, 1, 2, 18] => {
                                let bytes = read_octet_string(tcb_raw)?;
                                cpu_svn =
                                    Some(<[u8; 16]>::try_from(bytes.as_slice()).map_err(|_| {
                                        CertChainError::BadDer(format!(
                                            "CPUSVN length {}",
                                            bytes.len()
                                        ))
                                    })?);
                            }
                            _ => (),
                        }
                    }
                    // fall back to the per-component SVNs when no packed
                    // CPUSVN octet string is present
                    if cpu_svn.is_none() {
                        cpu_svn = Some(svns);
                    }
                }
                _ => (),
            }
        }

        Ok(Self {
            fmspc: fmspc
                .ok_or_else(|| CertChainError::BadDer("PCK extension missing FMSPC".to_owned()))?,
            cpu_svn: cpu_svn
                .ok_or_else(|| CertChainError::BadDer("PCK extension missing TCB".to_owned()))?,
            pce_svn: pce_svn
                .ok_or_else(|| CertChainError::BadDer("PCK extension missing PCESVN".to_owned()))?,
        })
    }
}

fn read_oid_value_pairs(
    der: &[u8],
) -> Result<Vec<(yasna::models::ObjectIdentifier, Vec<u8>)>, CertChainError> {
    yasna::parse_der(der, |reader| {
        reader.collect_sequence_of(|reader| {
            reader.read_sequence(|reader| {
                let oid = reader.next().read_oid()?;
                let raw = reader.next().read_der()?;
                Ok((oid, raw))
            })
        })
    })
    .map_err(|e| CertChainError::BadDer(format!("PCK extension: {e}")))
}

fn read_octet_string(der: &[u8]) -> Result<Vec<u8>, CertChainError> {
    yasna::parse_der(der, |reader| reader.read_bytes())
        .map_err(|e| CertChainError::BadDer(format!("PCK extension: {e}")))
}

fn read_integer(der: &[u8]) -> Result<u64, CertChainError> {
    yasna::parse_der(der, |reader| reader.read_u64())
        .map_err(|e| CertChainError::BadDer(format!("PCK extension: {e}")))
}

// --- PCS TCB info model --- //

/// TCB status values reported by the Intel PCS.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcbStatus {
    UpToDate,
    #[serde(rename = "SWHardeningNeeded")]
    SwHardeningNeeded,
    ConfigurationNeeded,
    #[serde(rename = "ConfigurationAndSWHardeningNeeded")]
    ConfigurationAndSwHardeningNeeded,
    OutOfDate,
    OutOfDateConfigurationNeeded,
    Revoked,
}

/// One TCB component SVN, as found in v3+ `*tcbcomponents` arrays.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TcbComponent {
    pub svn: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// The `tcb` object of one TCB level. The PCS has used two shapes over time:
/// v2 responses carry flat legacy keys (`sgxtcbcomp01svn` ..
/// `sgxtcbcomp16svn`), v3+ responses carry `sgxtcbcomponents` /
/// `tdxtcbcomponents` arrays. Both deserialize here; [`TcbLevelTcb::sgx_svns`]
/// normalizes either shape to a 16-entry vector.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TcbLevelTcb {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sgxtcbcomponents: Option<Vec<TcbComponent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tdxtcbcomponents: Option<Vec<TcbComponent>>,
    #[serde(default)]
    pub pcesvn: u16,
    #[serde(flatten)]
    pub legacy: BTreeMap<String, serde_json::Value>,
}

impl TcbLevelTcb {
    /// The 16 SGX component SVNs, from whichever schema is present.
    pub fn sgx_svns(&self) -> Option<[u8; 16]> {
        if let Some(components) = &self.sgxtcbcomponents {
            if components.len() != 16 {
                return None;
            }
            let mut svns = [0u8; 16];
            for (svn, component) in svns.iter_mut().zip(components) {
                *svn = component.svn;
            }
            return Some(svns);
        }

        // legacy flat keys
        let mut svns = [0u8; 16];
        for (i, svn) in svns.iter_mut().enumerate() {
            let key = format!("sgxtcbcomp{:02}svn", i + 1);
            *svn = self.legacy.get(&key)?.as_u64()? as u8;
        }
        Some(svns)
    }

    /// The 16 TDX component SVNs, when present (TDX TCB info only).
    pub fn tdx_svns(&self) -> Option<[u8; 16]> {
        let components = self.tdxtcbcomponents.as_ref()?;
        if components.len() != 16 {
            return None;
        }
        let mut svns = [0u8; 16];
        for (svn, component) in svns.iter_mut().zip(components) {
            *svn = component.svn;
        }
        Some(svns)
    }
}

/// One entry of `tcbLevels`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcbLevel {
    pub tcb: TcbLevelTcb,
    pub tcb_date: String,
    pub tcb_status: TcbStatus,
    #[serde(default, rename = "advisoryIDs", skip_serializing_if = "Option::is_none")]
    pub advisory_ids: Option<Vec<String>>,
}

/// The `tcbInfo` object of a PCS TCB-info response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcbInfo {
    /// "SGX" or "TDX"; absent in v2 responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub version: u32,
    pub issue_date: String,
    pub next_update: String,
    pub fmspc: String,
    pub pce_id: String,
    #[serde(default)]
    pub tcb_type: u32,
    #[serde(default)]
    pub tcb_evaluation_data_number: u32,
    pub tcb_levels: Vec<TcbLevel>,
}

/// A full signed PCS response: `{ "tcbInfo": ..., "signature": hex }`.
/// Signature verification against the TCB signing certificate is part of the
/// caller's policy, not this model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTcbInfo {
    pub tcb_info: TcbInfo,
    pub signature: String,
}
