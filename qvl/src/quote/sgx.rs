//! SGX (DCAP v3, ECDSA-P256) quote structures.

use crate::{
    error::ParseError,
    measurement::{Measurement32, ReportData},
    quote::{sig::QuoteSignature, QuoteHeader, Reader, TeeType, QUOTE_HEADER_LEN},
};

/// Length of the SGX enclave report body inside a quote (the truncated
/// `REPORT` structure without `keyid`/`mac`).
pub const SGX_REPORT_BODY_LEN: usize = 384;

/// Length of the signed region of an SGX v3 quote: header + report body.
pub const SGX_SIGNED_LEN: usize = QUOTE_HEADER_LEN + SGX_REPORT_BODY_LEN;

/// The 384-byte SGX enclave report body. Also used for the QE report
/// embedded in the quote signature of both SGX and TDX quotes.
#[derive(Clone, Debug)]
pub struct SgxReportBody {
    pub cpu_svn: [u8; 16],
    pub misc_select: u32,
    pub attributes: [u8; 16],
    pub mr_enclave: Measurement32,
    pub mr_signer: Measurement32,
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub report_data: ReportData,
}

impl SgxReportBody {
    /// Parse exactly [`SGX_REPORT_BODY_LEN`] bytes. Offsets per the Intel
    /// SDM `REPORT` layout; reserved ranges are skipped, not validated.
    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let cpu_svn = r.array()?;
        let misc_select = r.u32_le()?;
        let _reserved = r.take(28)?;
        let attributes = r.array()?;
        let mr_enclave = Measurement32::new(r.array()?);
        let _reserved = r.take(32)?;
        let mr_signer = Measurement32::new(r.array()?);
        let _reserved = r.take(96)?;
        let isv_prod_id = r.u16_le()?;
        let isv_svn = r.u16_le()?;
        let _reserved = r.take(60)?;
        let report_data = ReportData::new(r.array()?);

        Ok(Self {
            cpu_svn,
            misc_select,
            attributes,
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
            report_data,
        })
    }

    /// Parse a standalone 384-byte report body slice.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut r = Reader::new(bytes);
        let body = Self::parse(&mut r)?;
        r.finish()?;
        Ok(body)
    }

    /// DEBUG attribute bit (SECS.ATTRIBUTES.DEBUG, bit 1 of the first flags
    /// byte).
    pub fn is_debug(&self) -> bool {
        self.attributes[0] & 0x02 != 0
    }
}

/// A parsed SGX v3 ECDSA quote.
#[derive(Clone, Debug)]
pub struct SgxQuote {
    raw: Vec<u8>,
    pub header: QuoteHeader,
    pub body: SgxReportBody,
    pub signature: QuoteSignature,
}

impl SgxQuote {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut r = Reader::new(bytes);
        let header = QuoteHeader::parse(&mut r)?;
        if header.tee_type != TeeType::Sgx {
            return Err(ParseError::UnsupportedTeeType(super::TEE_TYPE_TDX));
        }
        let body = SgxReportBody::parse(&mut r)?;
        debug_assert_eq!(r.offset(), SGX_SIGNED_LEN);
        let signature = QuoteSignature::parse(&mut r, TeeType::Sgx)?;
        r.finish()?;

        Ok(Self {
            raw: bytes.to_vec(),
            header,
            body,
            signature,
        })
    }

    /// The exact bytes the attestation key signed: header + report body.
    pub fn signed_bytes(&self) -> &[u8] {
        &self.raw[..SGX_SIGNED_LEN]
    }

    /// The full raw quote.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}
