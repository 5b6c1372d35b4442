//! SGX quote verification.

use crate::{
    error::{PolicyError, VerifyError},
    quote::Quote,
    verify::{check_measurements, verify_intel, Evaluation, VerifyOpts},
};

/// Verify an SGX v3 ECDSA quote. See the module docs for the boolean
/// contract.
pub fn verify_sgx(bytes: &[u8], opts: &VerifyOpts) -> Result<bool, VerifyError> {
    evaluate_sgx(bytes, opts).into_bool()
}

/// Verify an SGX quote, returning the full result record.
pub fn evaluate_sgx(bytes: &[u8], opts: &VerifyOpts) -> Evaluation {
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
    let Quote::Sgx(sgx) = quote else {
        return Err(PolicyError::TeeTypeMismatch {
            expected: "SGX",
            actual: quote.family(),
        }
        .into());
    };
    verify_intel(quote, &sgx.signature, sgx.signed_bytes(), opts)?;
    check_measurements(quote, opts)
}
