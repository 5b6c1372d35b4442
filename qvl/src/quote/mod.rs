//! Binary quote codec.
//!
//! Decodes attestation evidence into typed structures without any I/O or
//! cryptography. Field offsets and sizes are fixed per quote version; all
//! numeric fields are little-endian. Parsing borrows nothing from the input:
//! each quote owns its raw bytes so that [`signed_bytes`] can hand back the
//! exact region signatures were computed over.
//!
//! [`signed_bytes`]: Quote::signed_bytes

use base64::Engine;

use crate::{
    error::ParseError,
    measurement::{Measurement32, Measurement48, ReportData},
};

pub mod sgx;
pub mod sig;
pub mod snp;
pub mod tdx;

pub use sgx::{SgxQuote, SgxReportBody};
pub use sig::{CertData, CertDataType, QeReportCertData, QuoteSignature};
pub use snp::{SnpReport, SnpTcbVersion};
pub use tdx::{TdxQuote, TdxReportBody};

/// Length of the quote header shared by SGX v3 and TDX v4/v5 quotes.
pub const QUOTE_HEADER_LEN: usize = 48;

/// `tee_type` value for SGX quotes.
pub const TEE_TYPE_SGX: u32 = 0x0000_0000;
/// `tee_type` value for TDX quotes.
pub const TEE_TYPE_TDX: u32 = 0x0000_0081;

/// TEE family identified by the quote header's `(version, tee_type)` pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TeeType {
    Sgx,
    Tdx,
}

impl TeeType {
    fn from_wire(value: u32) -> Result<Self, ParseError> {
        match value {
            TEE_TYPE_SGX => Ok(Self::Sgx),
            TEE_TYPE_TDX => Ok(Self::Tdx),
            other => Err(ParseError::UnsupportedTeeType(other)),
        }
    }
}

/// Attestation key type used by the Quoting Enclave. Only ECDSA-P256 is
/// supported; EPID and P384 quotes are rejected at parse time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttKeyType {
    EcdsaP256,
}

impl AttKeyType {
    fn from_wire(value: u16) -> Result<Self, ParseError> {
        match value {
            2 => Ok(Self::EcdsaP256),
            other => Err(ParseError::UnsupportedAttKeyType(other)),
        }
    }
}

/// The 48-byte quote header shared by SGX v3 and TDX v4/v5 quotes.
#[derive(Clone, Debug)]
pub struct QuoteHeader {
    pub version: u16,
    pub att_key_type: AttKeyType,
    pub tee_type: TeeType,
    /// QE security version (SGX v3; reserved in TDX).
    pub qe_svn: u16,
    /// PCE security version (SGX v3; reserved in TDX).
    pub pce_svn: u16,
    pub qe_vendor_id: [u8; 16],
    pub user_data: [u8; 20],
}

impl QuoteHeader {
    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let version = r.u16_le()?;
        let att_key_type_raw = r.u16_le()?;
        let tee_type_raw = r.u32_le()?;

        let tee_type = TeeType::from_wire(tee_type_raw)?;
        match (tee_type, version) {
            (TeeType::Sgx, 3) | (TeeType::Tdx, 4) | (TeeType::Tdx, 5) => (),
            (TeeType::Sgx, v) => {
                return Err(ParseError::UnsupportedVersion {
                    family: "SGX",
                    version: u32::from(v),
                })
            }
            (TeeType::Tdx, v) => {
                return Err(ParseError::UnsupportedVersion {
                    family: "TDX",
                    version: u32::from(v),
                })
            }
        }
        let att_key_type = AttKeyType::from_wire(att_key_type_raw)?;

        Ok(Self {
            version,
            att_key_type,
            tee_type,
            qe_svn: r.u16_le()?,
            pce_svn: r.u16_le()?,
            qe_vendor_id: r.array()?,
            user_data: r.array()?,
        })
    }
}

/// Parsed attestation evidence, tagged by TEE family.
#[derive(Clone, Debug)]
pub enum Quote {
    Sgx(SgxQuote),
    TdxV4(TdxQuote),
    TdxV5(TdxQuote),
    SevSnp(SnpReport),
}

impl Quote {
    /// Parse a quote, identifying the family from the leading bytes.
    ///
    /// SGX and TDX quotes are identified by the header's `(version,
    /// tee_type)` pair. SEV-SNP reports have no such header; they are
    /// identified by their fixed 1184-byte length and leading version word.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() == snp::SNP_REPORT_LEN {
            let version = u32::from_le_bytes(bytes[..4].try_into().expect("checked length"));
            if (2..=3).contains(&version) {
                return SnpReport::parse(bytes).map(Self::SevSnp);
            }
        }

        let mut r = Reader::new(bytes);
        let header = QuoteHeader::parse(&mut r)?;
        match (header.tee_type, header.version) {
            (TeeType::Sgx, 3) => SgxQuote::parse(bytes).map(Self::Sgx),
            (TeeType::Tdx, 4) => TdxQuote::parse(bytes).map(Self::TdxV4),
            (TeeType::Tdx, 5) => TdxQuote::parse(bytes).map(Self::TdxV5),
            // `QuoteHeader::parse` already rejected everything else.
            _ => unreachable!("header parse admits only supported versions"),
        }
    }

    /// Parse a base64-encoded quote.
    pub fn parse_base64(b64: &str) -> Result<Self, ParseError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|_| ParseError::InvalidBase64)?;
        Self::parse(&bytes)
    }

    /// Short family name, for logs and error messages.
    pub fn family(&self) -> &'static str {
        match self {
            Self::Sgx(_) => "SGX",
            Self::TdxV4(_) | Self::TdxV5(_) => "TDX",
            Self::SevSnp(_) => "SEV-SNP",
        }
    }

    /// The exact byte range the quote signature covers.
    pub fn signed_bytes(&self) -> &[u8] {
        match self {
            Self::Sgx(q) => q.signed_bytes(),
            Self::TdxV4(q) | Self::TdxV5(q) => q.signed_bytes(),
            Self::SevSnp(r) => r.signed_bytes(),
        }
    }

    /// The application-chosen 64-byte report data.
    pub fn report_data(&self) -> &ReportData {
        match self {
            Self::Sgx(q) => &q.body.report_data,
            Self::TdxV4(q) | Self::TdxV5(q) => &q.body.report_data,
            Self::SevSnp(r) => &r.report_data,
        }
    }

    // --- Measurement accessors used by the measurement predicate --- //
    // Each returns `None` when the field does not exist for this family.

    pub fn mr_td(&self) -> Option<&Measurement48> {
        match self {
            Self::TdxV4(q) | Self::TdxV5(q) => Some(&q.body.mr_td),
            _ => None,
        }
    }

    pub fn rtmr(&self, index: usize) -> Option<&Measurement48> {
        match self {
            Self::TdxV4(q) | Self::TdxV5(q) => q.body.rtmrs.get(index),
            _ => None,
        }
    }

    pub fn mr_enclave(&self) -> Option<&Measurement32> {
        match self {
            Self::Sgx(q) => Some(&q.body.mr_enclave),
            _ => None,
        }
    }

    pub fn mr_signer(&self) -> Option<&Measurement32> {
        match self {
            Self::Sgx(q) => Some(&q.body.mr_signer),
            _ => None,
        }
    }

    pub fn isv_prod_id(&self) -> Option<u16> {
        match self {
            Self::Sgx(q) => Some(q.body.isv_prod_id),
            _ => None,
        }
    }

    pub fn isv_svn(&self) -> Option<u16> {
        match self {
            Self::Sgx(q) => Some(q.body.isv_svn),
            _ => None,
        }
    }

    pub fn snp_measurement(&self) -> Option<&Measurement48> {
        match self {
            Self::SevSnp(r) => Some(&r.measurement),
            _ => None,
        }
    }

    /// The ECDSA quoting signature structure (SGX and TDX only).
    pub fn signature(&self) -> Option<&QuoteSignature> {
        match self {
            Self::Sgx(q) => Some(&q.signature),
            Self::TdxV4(q) | Self::TdxV5(q) => Some(&q.signature),
            Self::SevSnp(_) => None,
        }
    }
}

/// A bounds-checked little-endian cursor over the quote bytes.
///
/// There may be no panicking indexing in the codec; every read goes through
/// [`Reader::take`] so truncated inputs surface as [`ParseError`].
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::TruncatedQuote {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        self.take(N)
            .map(|s| <[u8; N]>::try_from(s).expect("take returned N bytes"))
    }

    pub(crate) fn u16_le(&mut self) -> Result<u16, ParseError> {
        self.array().map(u16::from_le_bytes)
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32, ParseError> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn u64_le(&mut self) -> Result<u64, ParseError> {
        self.array().map(u64::from_le_bytes)
    }

    /// Require that the input is fully consumed.
    pub(crate) fn finish(&self) -> Result<(), ParseError> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(ParseError::TrailingBytes { count }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reader_truncation() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.take(2).unwrap(), &[1, 2]);
        let err = r.take(2).unwrap_err();
        assert_eq!(
            err,
            ParseError::TruncatedQuote {
                offset: 2,
                needed: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn test_header_rejects_epid_versions() {
        // version 2 (EPID), tee_type SGX
        let mut bytes = [0u8; QUOTE_HEADER_LEN];
        bytes[0] = 2;
        bytes[2] = 2;
        let err = QuoteHeader::parse(&mut Reader::new(&bytes)).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnsupportedVersion {
                family: "SGX",
                version: 2
            }
        );
    }

    #[test]
    fn test_header_rejects_unknown_tee_type() {
        let mut bytes = [0u8; QUOTE_HEADER_LEN];
        bytes[0] = 4;
        bytes[2] = 2;
        bytes[4] = 0x82;
        let err = QuoteHeader::parse(&mut Reader::new(&bytes)).unwrap_err();
        assert_eq!(err, ParseError::UnsupportedTeeType(0x82));
    }

    #[test]
    fn test_header_rejects_epid_att_key_type() {
        let mut bytes = [0u8; QUOTE_HEADER_LEN];
        bytes[0] = 3;
        bytes[2] = 1; // EPID linkable
        let err = QuoteHeader::parse(&mut Reader::new(&bytes)).unwrap_err();
        assert_eq!(err, ParseError::UnsupportedAttKeyType(1));
    }
}

#[cfg(test)]
mod fixture_test {
    use base64::Engine;

    use super::*;
    use crate::testutil::{
        build_sgx_quote, build_snp_report, build_tdx_quote_v4, build_tdx_quote_v5, ChainKind,
        QuoteParams, SnpParams, TestChain,
    };

    /// Every family parses, dispatches to the right variant, and exposes a
    /// signed region of the expected length.
    #[test]
    fn test_parse_dispatch_and_signed_region_lengths() {
        let intel = TestChain::new(ChainKind::IntelP256);
        let amd = TestChain::new(ChainKind::AmdP384);
        let params = QuoteParams::default();

        let cases: [(Vec<u8>, &str, usize); 4] = [
            (build_sgx_quote(&intel, &params), "SGX", 432),
            (build_tdx_quote_v4(&intel, &params), "TDX", 632),
            (build_tdx_quote_v5(&intel, &params), "TDX", 638),
            (
                build_snp_report(&amd, &SnpParams::default()),
                "SEV-SNP",
                672,
            ),
        ];
        for (bytes, family, signed_len) in &cases {
            let quote = Quote::parse(bytes).unwrap();
            assert_eq!(quote.family(), *family);
            assert_eq!(quote.signed_bytes().len(), *signed_len);
            // the signed region is a prefix of the input
            assert_eq!(quote.signed_bytes(), &bytes[..*signed_len]);
        }
    }

    #[test]
    fn test_parse_base64_roundtrip() {
        let intel = TestChain::new(ChainKind::IntelP256);
        let bytes = build_tdx_quote_v4(&intel, &QuoteParams::default());
        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let quote = Quote::parse_base64(&b64).unwrap();
        assert_eq!(quote.family(), "TDX");
        assert_eq!(
            Quote::parse_base64("!!!").unwrap_err(),
            ParseError::InvalidBase64
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let intel = TestChain::new(ChainKind::IntelP256);
        let bytes = build_sgx_quote(&intel, &QuoteParams::default());
        let a = Quote::parse(&bytes).unwrap();
        let b = Quote::parse(&bytes).unwrap();
        let (Quote::Sgx(a), Quote::Sgx(b)) = (&a, &b) else {
            panic!("expected SGX quotes");
        };
        assert_eq!(a.body.mr_enclave, b.body.mr_enclave);
        assert_eq!(a.body.report_data, b.body.report_data);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let intel = TestChain::new(ChainKind::IntelP256);
        let mut bytes = build_sgx_quote(&intel, &QuoteParams::default());
        bytes.push(0);
        assert!(matches!(
            Quote::parse(&bytes).unwrap_err(),
            ParseError::TrailingBytes { count: 1 }
        ));
    }
}
