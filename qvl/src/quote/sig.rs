//! The ECDSA quoting signature structure shared by SGX v3 and TDX v4/v5.
//!
//! SGX quotes carry the QE report inline; TDX quotes wrap the same fields in
//! a type-6 ("QE report certification data") envelope. Both end with a
//! certification data blob, which in the common case (type 5) is the PCK
//! certificate chain as concatenated PEM.

use crate::{
    error::ParseError,
    quote::{sgx::SgxReportBody, Reader, TeeType},
};

/// Certification data type tags, per the Intel DCAP quote library.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CertDataType {
    PpidCleartext = 1,
    PpidRsa2048 = 2,
    PpidRsa3072 = 3,
    PckLeafCert = 4,
    PckCertChain = 5,
    QeReportCertData = 6,
    PlatformManifest = 7,
}

impl CertDataType {
    fn from_wire(value: u16) -> Result<Self, ParseError> {
        match value {
            1 => Ok(Self::PpidCleartext),
            2 => Ok(Self::PpidRsa2048),
            3 => Ok(Self::PpidRsa3072),
            4 => Ok(Self::PckLeafCert),
            5 => Ok(Self::PckCertChain),
            6 => Ok(Self::QeReportCertData),
            7 => Ok(Self::PlatformManifest),
            other => Err(ParseError::InvalidCertDataType(other)),
        }
    }
}

/// A certification data blob: a type tag plus opaque bytes.
#[derive(Clone, Debug)]
pub struct CertData {
    pub ty: CertDataType,
    pub data: Vec<u8>,
}

impl CertData {
    fn parse(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let ty = CertDataType::from_wire(r.u16_le()?)?;
        let len = r.u32_le()? as usize;
        let data = r.take(len)?.to_vec();
        Ok(Self { ty, data })
    }

    /// The PCK certificate chain as concatenated PEM, when this blob carries
    /// one (type 5). Other types need the chain supplied out of band.
    pub fn pck_chain_pem(&self) -> Option<&str> {
        match self.ty {
            CertDataType::PckCertChain => std::str::from_utf8(&self.data).ok(),
            _ => None,
        }
    }
}

/// The QE report and its certification data.
#[derive(Clone, Debug)]
pub struct QeReportCertData {
    /// Raw QE report bytes, exactly as signed by the PCK key.
    pub qe_report_raw: [u8; 384],
    /// Parsed QE report body.
    pub qe_report: SgxReportBody,
    /// ECDSA-P256 signature (fixed `r || s`) over `qe_report_raw`.
    pub qe_report_signature: [u8; 64],
    /// QE authentication data, bound into the QE report data hash.
    pub qe_auth_data: Vec<u8>,
    /// Certification data for the PCK chain.
    pub cert_data: CertData,
}

impl QeReportCertData {
    fn parse(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let qe_report_raw: [u8; 384] = r.array()?;
        let qe_report = SgxReportBody::parse_bytes(&qe_report_raw)?;
        let qe_report_signature: [u8; 64] = r.array()?;
        let auth_len = r.u16_le()? as usize;
        let qe_auth_data = r.take(auth_len)?.to_vec();
        let cert_data = CertData::parse(r)?;

        Ok(Self {
            qe_report_raw,
            qe_report,
            qe_report_signature,
            qe_auth_data,
            cert_data,
        })
    }
}

/// The quote signature section: attestation-key signature over the signed
/// region, the attestation public key itself, and the QE report that endorses
/// that key.
#[derive(Clone, Debug)]
pub struct QuoteSignature {
    /// ECDSA-P256 signature (fixed `r || s`) over the quote's signed region.
    pub signature: [u8; 64],
    /// The attestation public key as a raw 64-byte uncompressed point
    /// (without the leading `0x04`).
    pub attestation_public_key: [u8; 64],
    /// QE report and certification data.
    pub qe: QeReportCertData,
}

impl QuoteSignature {
    pub(crate) fn parse(r: &mut Reader<'_>, family: TeeType) -> Result<Self, ParseError> {
        let sig_data_len = r.u32_le()? as usize;
        let sig_bytes = r.take(sig_data_len)?;
        let mut sr = Reader::new(sig_bytes);

        let signature: [u8; 64] = sr.array()?;
        let attestation_public_key: [u8; 64] = sr.array()?;

        let qe = match family {
            // SGX v3 carries the QE report fields inline.
            TeeType::Sgx => QeReportCertData::parse(&mut sr)?,
            // TDX v4/v5 wraps them in a type-6 certification data envelope.
            TeeType::Tdx => {
                let outer = CertData::parse(&mut sr)?;
                if outer.ty != CertDataType::QeReportCertData {
                    return Err(ParseError::InvalidCertDataType(outer.ty as u16));
                }
                let mut ir = Reader::new(&outer.data);
                let qe = QeReportCertData::parse(&mut ir)?;
                ir.finish()?;
                qe
            }
        };
        sr.finish()?;

        Ok(Self {
            signature,
            attestation_public_key,
            qe,
        })
    }
}
