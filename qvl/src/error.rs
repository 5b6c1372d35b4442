//! Error types for quote parsing and verification.
//!
//! Each failure domain gets its own enum so callers can match on the class
//! of failure without string-matching; [`VerifyError`] composes them for the
//! top-level verification entry points.

use thiserror::Error;

/// Malformed or unsupported quote bytes. Raised at parse time, before any
/// cryptography runs.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("quote truncated: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    TruncatedQuote {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("unsupported quote version {version} for {family}")]
    UnsupportedVersion {
        family: &'static str,
        version: u32,
    },
    #[error("unsupported tee_type {0:#010x}")]
    UnsupportedTeeType(u32),
    #[error("unsupported attestation key type {0}")]
    UnsupportedAttKeyType(u16),
    #[error("invalid certification data type {0}")]
    InvalidCertDataType(u16),
    #[error("unsupported TD report body type {0}")]
    UnsupportedBodyType(u16),
    #[error("{count} unexpected trailing bytes after quote")]
    TrailingBytes { count: usize },
    #[error("invalid base64 quote input")]
    InvalidBase64,
    #[error("evidence is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Failures while building or checking the certificate chain of trust.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CertChainError {
    #[error("chain root is not in the pinned root set: {subject}")]
    InvalidRoot { subject: String },
    #[error("invalid certificate chain: {reason}")]
    InvalidChain { reason: String },
    #[error("certificate outside validity window: {subject}")]
    ExpiredOrNotYetValid { subject: String },
    #[error("certificate revoked: {subject} (serial {serial})")]
    Revoked { subject: String, serial: String },
    #[error("missing certificate data: {0}")]
    MissingCertData(String),
    #[error("malformed certificate or CRL: {0}")]
    BadDer(String),
}

/// A cryptographic signature failed to verify.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("QE report signature did not verify under the PCK key")]
    QeReport,
    #[error("QE report data does not bind the attestation key")]
    QeBinding,
    #[error("quote body signature did not verify under the attestation key")]
    QuoteBody,
    #[error("SEV-SNP report signature did not verify under the VCEK key")]
    SnpReport,
    #[error("unsupported signature algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("malformed public key: {0}")]
    BadPublicKey(String),
}

/// The report data did not encode the advertised key / nonce.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("report_data does not match the expected derivation")]
    ReportDataMismatch,
    #[error("report_data[32..64] must be zero")]
    NonZeroPadding,
    #[error("runtime data digest does not match report_data[0..32]")]
    RuntimeDataMismatch,
    #[error("runtime user-data does not bind the nonce and user data")]
    UserDataMismatch,
    #[error("malformed runtime data: {0}")]
    BadRuntimeData(String),
}

/// The caller's policy rejected an otherwise-valid quote.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("VMPL {vmpl} exceeds configured maximum {max_vmpl}")]
    VmplExceeded { vmpl: u32, max_vmpl: u32 },
    #[error("expected a {expected} quote, got {actual}")]
    TeeTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Top-level verification error. Entry points surface the first failing
/// kind; partial successes never succeed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("quote parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("certificate chain error: {0}")]
    CertChain(#[from] CertChainError),
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("no configured measurement predicate matched the quote")]
    Measurement,
    #[error("TCB policy rejected the platform (fmspc {fmspc})")]
    Tcb { fmspc: String },
    #[error("report data binding error: {0}")]
    Binding(#[from] BindingError),
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
}

impl VerifyError {
    /// Whether this failure is *only* a measurement-predicate mismatch, i.e.
    /// the evidence itself verified but didn't match any configured
    /// measurements. The boolean `verify_*` entry points map this case to
    /// `Ok(false)` and propagate everything else as an error.
    pub fn is_measurement_mismatch(&self) -> bool {
        matches!(self, Self::Measurement)
    }
}
