//! TDX quote verification (v4 and v5).

use crate::{
    error::{PolicyError, VerifyError},
    quote::Quote,
    verify::{check_measurements, verify_intel, Evaluation, VerifyOpts},
};

/// Verify a TDX v4 or v5 ECDSA quote. See the module docs for the boolean
/// contract.
pub fn verify_tdx(bytes: &[u8], opts: &VerifyOpts) -> Result<bool, VerifyError> {
    evaluate_tdx(bytes, opts).into_bool()
}

/// Verify a TDX quote, returning the full result record.
pub fn evaluate_tdx(bytes: &[u8], opts: &VerifyOpts) -> Evaluation {
    let quote = match Quote::parse(bytes) {
        Ok(quote) => quote,
        Err(err) => return Evaluation::failed(None, err.into()),
    };
    match verify_parsed(&quote, opts) {
        Ok(()) => Evaluation::passed(quote),
        Err(err) => Evaluation::failed(Some(quote), err),
    }
}

fn verify_parsed(quote: &Quote, opts: &VerifyOpts) -> Result<(), VerifyError> {
    let tdx = match quote {
        Quote::TdxV4(tdx) | Quote::TdxV5(tdx) => tdx,
        _ => {
            return Err(PolicyError::TeeTypeMismatch {
                expected: "TDX",
                actual: quote.family(),
            }
            .into())
        }
    };
    verify_intel(quote, &tdx.signature, tdx.signed_bytes(), opts)?;
    check_measurements(quote, opts)
}
