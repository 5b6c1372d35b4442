//! TDX (DCAP v4/v5, ECDSA-P256) quote structures.
//!
//! v5 quotes insert a 6-byte body descriptor between the header and the TD
//! report body, selecting the TD 1.0 layout (identical to v4) or the TD 1.5
//! layout (two extra trailing fields).

use crate::{
    error::ParseError,
    measurement::{Measurement48, ReportData},
    quote::{sig::QuoteSignature, QuoteHeader, Reader, TeeType, QUOTE_HEADER_LEN},
};

/// Length of the TD 1.0 report body (TDX v4, and v5 body type 1).
pub const TDX_BODY_TD10_LEN: usize = 584;
/// Length of the TD 1.5 report body (v5 body type 2).
pub const TDX_BODY_TD15_LEN: usize = 648;
/// Length of the v5 body descriptor: body type + body size.
pub const TDX_V5_BODY_DESC_LEN: usize = 6;

/// TD report body type selector carried by v5 quotes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TdBodyType {
    Td10,
    Td15,
}

impl TdBodyType {
    fn from_wire(value: u16) -> Result<Self, ParseError> {
        match value {
            1 => Ok(Self::Td10),
            2 => Ok(Self::Td15),
            other => Err(ParseError::UnsupportedBodyType(other)),
        }
    }

    fn body_len(self) -> usize {
        match self {
            Self::Td10 => TDX_BODY_TD10_LEN,
            Self::Td15 => TDX_BODY_TD15_LEN,
        }
    }
}

/// The TD report body. TD 1.5 fields are `None` for TD 1.0 layouts.
#[derive(Clone, Debug)]
pub struct TdxReportBody {
    pub tee_tcb_svn: [u8; 16],
    pub mr_seam: Measurement48,
    pub mr_seam_signer: Measurement48,
    pub seam_attributes: [u8; 8],
    pub td_attributes: [u8; 8],
    pub xfam: [u8; 8],
    pub mr_td: Measurement48,
    pub mr_config_id: Measurement48,
    pub mr_owner: Measurement48,
    pub mr_owner_config: Measurement48,
    pub rtmrs: [Measurement48; 4],
    pub report_data: ReportData,
    // TD 1.5 only
    pub tee_tcb_svn2: Option<[u8; 16]>,
    pub mr_service_td: Option<Measurement48>,
}

impl TdxReportBody {
    fn parse(r: &mut Reader<'_>, body_type: TdBodyType) -> Result<Self, ParseError> {
        let tee_tcb_svn = r.array()?;
        let mr_seam = Measurement48::new(r.array()?);
        let mr_seam_signer = Measurement48::new(r.array()?);
        let seam_attributes = r.array()?;
        let td_attributes = r.array()?;
        let xfam = r.array()?;
        let mr_td = Measurement48::new(r.array()?);
        let mr_config_id = Measurement48::new(r.array()?);
        let mr_owner = Measurement48::new(r.array()?);
        let mr_owner_config = Measurement48::new(r.array()?);
        let rtmrs = [
            Measurement48::new(r.array()?),
            Measurement48::new(r.array()?),
            Measurement48::new(r.array()?),
            Measurement48::new(r.array()?),
        ];
        let report_data = ReportData::new(r.array()?);

        let (tee_tcb_svn2, mr_service_td) = match body_type {
            TdBodyType::Td10 => (None, None),
            TdBodyType::Td15 => (
                Some(r.array()?),
                Some(Measurement48::new(r.array()?)),
            ),
        };

        Ok(Self {
            tee_tcb_svn,
            mr_seam,
            mr_seam_signer,
            seam_attributes,
            td_attributes,
            xfam,
            mr_td,
            mr_config_id,
            mr_owner,
            mr_owner_config,
            rtmrs,
            report_data,
            tee_tcb_svn2,
            mr_service_td,
        })
    }
}

/// A parsed TDX v4 or v5 ECDSA quote.
#[derive(Clone, Debug)]
pub struct TdxQuote {
    raw: Vec<u8>,
    signed_len: usize,
    pub header: QuoteHeader,
    /// v5 body descriptor; `None` for v4.
    pub body_type: Option<TdBodyType>,
    pub body: TdxReportBody,
    pub signature: QuoteSignature,
}

impl TdxQuote {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut r = Reader::new(bytes);
        let header = QuoteHeader::parse(&mut r)?;
        if header.tee_type != TeeType::Tdx {
            return Err(ParseError::UnsupportedTeeType(super::TEE_TYPE_SGX));
        }

        let (body_type, body, signed_len) = match header.version {
            4 => {
                let body = TdxReportBody::parse(&mut r, TdBodyType::Td10)?;
                (None, body, QUOTE_HEADER_LEN + TDX_BODY_TD10_LEN)
            }
            5 => {
                let body_type = TdBodyType::from_wire(r.u16_le()?)?;
                let body_size = r.u32_le()? as usize;
                if body_size != body_type.body_len() {
                    return Err(ParseError::TruncatedQuote {
                        offset: r.offset(),
                        needed: body_type.body_len(),
                        remaining: body_size,
                    });
                }
                let body = TdxReportBody::parse(&mut r, body_type)?;
                (
                    Some(body_type),
                    body,
                    QUOTE_HEADER_LEN + TDX_V5_BODY_DESC_LEN + body_size,
                )
            }
            _ => unreachable!("header parse admits only v4/v5 TDX quotes"),
        };
        debug_assert_eq!(r.offset(), signed_len);

        let signature = QuoteSignature::parse(&mut r, TeeType::Tdx)?;
        r.finish()?;

        Ok(Self {
            raw: bytes.to_vec(),
            signed_len,
            header,
            body_type,
            body,
            signature,
        })
    }

    /// The exact bytes the attestation key signed: header (+ v5 body
    /// descriptor) + TD report body.
    pub fn signed_bytes(&self) -> &[u8] {
        &self.raw[..self.signed_len]
    }

    /// The full raw quote.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}
