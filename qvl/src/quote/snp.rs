//! AMD SEV-SNP attestation report structures.
//!
//! The SNP report is a fixed 1184-byte structure; the VCEK's ECDSA-P384
//! signature covers the first 672 bytes. Signature `r`/`s` components are
//! stored little-endian in 72-byte fields, per the AMD SEV-SNP ABI.

use crate::{
    error::ParseError,
    measurement::{Measurement32, Measurement48, Measurement64, ReportData},
    quote::Reader,
};

/// Total length of an SNP attestation report.
pub const SNP_REPORT_LEN: usize = 1184;
/// Length of the signed region: everything before the signature.
pub const SNP_SIGNED_LEN: usize = 0x2A0;

/// A versioned SNP TCB value: four security version numbers packed into a
/// u64 (bytes 2..6 are reserved).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SnpTcbVersion {
    pub boot_loader: u8,
    pub tee: u8,
    pub snp: u8,
    pub microcode: u8,
}

impl SnpTcbVersion {
    fn from_u64(raw: u64) -> Self {
        let bytes = raw.to_le_bytes();
        Self {
            boot_loader: bytes[0],
            tee: bytes[1],
            snp: bytes[6],
            microcode: bytes[7],
        }
    }
}

/// A parsed SEV-SNP attestation report (version 2 or 3).
#[derive(Clone, Debug)]
pub struct SnpReport {
    raw: Vec<u8>,
    pub version: u32,
    pub guest_svn: u32,
    pub policy: u64,
    pub family_id: [u8; 16],
    pub image_id: [u8; 16],
    pub vmpl: u32,
    pub signature_algo: u32,
    pub current_tcb: SnpTcbVersion,
    pub platform_info: u64,
    /// Author-key-enabled / signing-key flags word.
    pub flags: u32,
    pub report_data: ReportData,
    pub measurement: Measurement48,
    pub host_data: Measurement32,
    pub id_key_digest: Measurement48,
    pub author_key_digest: Measurement48,
    pub report_id: [u8; 32],
    pub report_id_ma: [u8; 32],
    pub reported_tcb: SnpTcbVersion,
    pub chip_id: Measurement64,
    pub committed_tcb: SnpTcbVersion,
    pub launch_tcb: SnpTcbVersion,
    /// Signature `r` component, little-endian as stored.
    pub signature_r: [u8; 72],
    /// Signature `s` component, little-endian as stored.
    pub signature_s: [u8; 72],
}

impl SnpReport {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut r = Reader::new(bytes);

        let version = r.u32_le()?;
        if version < 2 {
            return Err(ParseError::UnsupportedVersion {
                family: "SEV-SNP",
                version,
            });
        }
        let guest_svn = r.u32_le()?;
        let policy = r.u64_le()?;
        let family_id = r.array()?;
        let image_id = r.array()?;
        let vmpl = r.u32_le()?;
        let signature_algo = r.u32_le()?;
        let current_tcb = SnpTcbVersion::from_u64(r.u64_le()?);
        let platform_info = r.u64_le()?;
        let flags = r.u32_le()?;
        let _reserved = r.u32_le()?;
        let report_data = ReportData::new(r.array()?);
        let measurement = Measurement48::new(r.array()?);
        let host_data = Measurement32::new(r.array()?);
        let id_key_digest = Measurement48::new(r.array()?);
        let author_key_digest = Measurement48::new(r.array()?);
        let report_id = r.array()?;
        let report_id_ma = r.array()?;
        let reported_tcb = SnpTcbVersion::from_u64(r.u64_le()?);
        let _reserved = r.take(24)?;
        let chip_id = Measurement64::new(r.array()?);
        let committed_tcb = SnpTcbVersion::from_u64(r.u64_le()?);
        let _version_build = r.take(8)?;
        let launch_tcb = SnpTcbVersion::from_u64(r.u64_le()?);
        let _reserved = r.take(168)?;
        debug_assert_eq!(r.offset(), SNP_SIGNED_LEN);
        let signature_r: [u8; 72] = r.array()?;
        let signature_s: [u8; 72] = r.array()?;
        let _reserved = r.take(368)?;
        r.finish()?;

        Ok(Self {
            raw: bytes.to_vec(),
            version,
            guest_svn,
            policy,
            family_id,
            image_id,
            vmpl,
            signature_algo,
            current_tcb,
            platform_info,
            flags,
            report_data,
            measurement,
            host_data,
            id_key_digest,
            author_key_digest,
            report_id,
            report_id_ma,
            reported_tcb,
            chip_id,
            committed_tcb,
            launch_tcb,
            signature_r,
            signature_s,
        })
    }

    /// The exact bytes the VCEK signed: everything before the signature.
    pub fn signed_bytes(&self) -> &[u8] {
        &self.raw[..SNP_SIGNED_LEN]
    }

    /// The full raw report.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The signature as a fixed 96-byte big-endian `r || s` pair, the form
    /// ECDSA-P384 verifiers consume. Returns `None` if either component
    /// overflows 48 bytes.
    pub fn signature_fixed(&self) -> Option<[u8; 96]> {
        fn le72_to_be48(le: &[u8; 72]) -> Option<[u8; 48]> {
            // the high 24 bytes must be zero for a P-384 scalar
            if le[48..].iter().any(|b| *b != 0) {
                return None;
            }
            let mut be = [0u8; 48];
            for (i, b) in le[..48].iter().enumerate() {
                be[47 - i] = *b;
            }
            Some(be)
        }

        let r = le72_to_be48(&self.signature_r)?;
        let s = le72_to_be48(&self.signature_s)?;
        let mut out = [0u8; 96];
        out[..48].copy_from_slice(&r);
        out[48..].copy_from_slice(&s);
        Some(out)
    }

    /// Guest policy DEBUG bit (bit 19).
    pub fn debug_allowed(&self) -> bool {
        self.policy >> 19 & 1 == 1
    }
}
