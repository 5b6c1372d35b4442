//! The client's attestation verifier seam.
//!
//! The tunnel client cares about one question: does this quote verify under
//! my policy, and does its report data bind the x25519 key the server just
//! announced? The [`AttestationVerifier`] trait captures that question;
//! [`QvlVerifier`] answers it with `qvl`, and tests substitute stubs.

use std::{fmt, sync::Arc, time::SystemTime};

use qvl::{verify::Evaluation, Quote, ReportData, VerifyError, VerifyOpts};

/// The outcome of a successful verification, exposed to UIs that want to
/// display attested measurements.
#[derive(Clone, Debug)]
pub struct VerifiedAttestation {
    pub quote: Quote,
    pub server_public_key: [u8; 32],
}

/// Client policy hook: verify the server's quote and its key binding.
pub trait AttestationVerifier: Send + Sync {
    fn verify(
        &self,
        quote_bytes: &[u8],
        server_public_key: &[u8; 32],
    ) -> Result<VerifiedAttestation, VerifyError>;
}

impl<F> AttestationVerifier for F
where
    F: Fn(&[u8], &[u8; 32]) -> Result<VerifiedAttestation, VerifyError> + Send + Sync,
{
    fn verify(
        &self,
        quote_bytes: &[u8],
        server_public_key: &[u8; 32],
    ) -> Result<VerifiedAttestation, VerifyError> {
        self(quote_bytes, server_public_key)
    }
}

/// Which verification entry point the quote goes through.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QuoteFamily {
    Sgx,
    Tdx,
    SevSnp,
}

/// How the quote's report data must bind the server's x25519 key.
#[derive(Clone)]
pub enum KeyBinding {
    /// `report_data = SHA-256(key) || zeros` (SGX; no nonce channel).
    SgxDigest,
    /// `report_data[0..32] = key` verbatim.
    RawKey,
    /// Custom predicate over the report data and the announced key.
    Callback(Arc<dyn Fn(&ReportData, &[u8; 32]) -> bool + Send + Sync>),
}

impl fmt::Debug for KeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SgxDigest => f.write_str("SgxDigest"),
            Self::RawKey => f.write_str("RawKey"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl KeyBinding {
    fn check(&self, report_data: &ReportData, key: &[u8; 32]) -> bool {
        match self {
            Self::SgxDigest => qvl::binding::verify_sgx_binding(report_data, key).is_ok(),
            Self::RawKey => report_data.as_slice()[..32] == key[..],
            Self::Callback(callback) => callback(report_data, key),
        }
    }
}

/// The qvl-backed verifier.
pub struct QvlVerifier {
    pub family: QuoteFamily,
    pub opts: VerifyOpts,
    pub binding: KeyBinding,
    /// When set, `opts.now` is replaced with the wall clock at each
    /// verification (connections are long-lived; certificate validity is
    /// checked at handshake time).
    pub live_clock: bool,
}

impl QvlVerifier {
    pub fn new(family: QuoteFamily, opts: VerifyOpts, binding: KeyBinding) -> Self {
        Self {
            family,
            opts,
            binding,
            live_clock: true,
        }
    }

    fn evaluate(&self, quote_bytes: &[u8]) -> Evaluation {
        let mut opts = self.opts.clone();
        if self.live_clock {
            opts.now = SystemTime::now();
        }
        match self.family {
            QuoteFamily::Sgx => qvl::evaluate_sgx(quote_bytes, &opts),
            QuoteFamily::Tdx => qvl::evaluate_tdx(quote_bytes, &opts),
            QuoteFamily::SevSnp => qvl::evaluate_sev_snp(quote_bytes, &opts),
        }
    }
}

impl AttestationVerifier for QvlVerifier {
    fn verify(
        &self,
        quote_bytes: &[u8],
        server_public_key: &[u8; 32],
    ) -> Result<VerifiedAttestation, VerifyError> {
        let evaluation = self.evaluate(quote_bytes);
        if let Some(error) = evaluation.error {
            return Err(error);
        }
        let quote = evaluation
            .quote
            .expect("a valid evaluation carries the parsed quote");

        if !self.binding.check(quote.report_data(), server_public_key) {
            return Err(qvl::BindingError::ReportDataMismatch.into());
        }

        Ok(VerifiedAttestation {
            quote,
            server_public_key: *server_public_key,
        })
    }
}
