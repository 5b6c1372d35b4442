//! Azure TDX verification (vTPM-wrapped quotes).
//!
//! On Azure, the TDX quote's `report_data` does not bind the application
//! key directly. Instead it commits to a vTPM "runtime data" JSON blob
//! (`report_data[0..32] == SHA-256(runtime_data)`), and the runtime data's
//! `user-data` field in turn commits to the caller's nonce and user data
//! (`SHA-512(nonce || user_data)`, uppercase hex). After those bindings
//! check out, the inner quote goes through the regular TDX verification.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{
    error::{BindingError, ParseError, VerifyError},
    quote::Quote,
    sha256, sha512,
    verify::{tdx, Evaluation, VerifyOpts},
};

/// Evidence as emitted by the Intel Trust Authority CLI on an Azure TDX VM.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AzureTdxEvidence {
    /// Base64 TDX quote.
    pub quote: String,
    /// Base64 vTPM runtime data (a JSON blob once decoded).
    pub runtime_data: String,
    /// Base64 caller user data, bound into `runtime_data["user-data"]`.
    #[serde(default)]
    pub user_data: Option<String>,
    /// Base64 caller nonce, bound into `runtime_data["user-data"]`.
    #[serde(default)]
    pub nonce: Option<String>,
}

impl AzureTdxEvidence {
    pub fn from_json(cli_output: &str) -> Result<Self, ParseError> {
        serde_json::from_str(cli_output).map_err(|e| ParseError::InvalidJson(e.to_string()))
    }
}

/// Verify Azure TDX evidence (Trust Authority CLI output JSON). See the
/// module docs for the boolean contract.
pub fn verify_azure_tdx(cli_output: &str, opts: &VerifyOpts) -> Result<bool, VerifyError> {
    evaluate_azure_tdx(cli_output, opts).into_bool()
}

/// Verify Azure TDX evidence, returning the full result record.
pub fn evaluate_azure_tdx(cli_output: &str, opts: &VerifyOpts) -> Evaluation {
    let evidence = match AzureTdxEvidence::from_json(cli_output) {
        Ok(evidence) => evidence,
        Err(err) => return Evaluation::failed(None, err.into()),
    };

    let (quote_bytes, runtime_data) = match decode_evidence(&evidence) {
        Ok(decoded) => decoded,
        Err(err) => return Evaluation::failed(None, err),
    };

    let quote = match Quote::parse(&quote_bytes) {
        Ok(quote) => quote,
        Err(err) => return Evaluation::failed(None, err.into()),
    };

    if let Err(err) = check_runtime_binding(&quote, &runtime_data, &evidence) {
        return Evaluation::failed(Some(quote), err);
    }

    // The vTPM binding held; the rest is a regular TDX verification.
    tdx::evaluate_tdx(&quote_bytes, opts)
}

fn decode_b64(value: &str) -> Result<Vec<u8>, VerifyError> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|_| ParseError::InvalidBase64.into())
}

fn decode_evidence(evidence: &AzureTdxEvidence) -> Result<(Vec<u8>, Vec<u8>), VerifyError> {
    let quote_bytes = decode_b64(&evidence.quote)?;
    let runtime_data = decode_b64(&evidence.runtime_data)?;
    Ok((quote_bytes, runtime_data))
}

fn check_runtime_binding(
    quote: &Quote,
    runtime_data: &[u8],
    evidence: &AzureTdxEvidence,
) -> Result<(), VerifyError> {
    let report_data = quote.report_data();

    // report_data[0..32] == SHA-256(runtime_data), tail must be zero.
    if report_data.as_slice()[..32] != sha256::digest(runtime_data) {
        return Err(BindingError::RuntimeDataMismatch.into());
    }
    if !report_data.tail_is_zero() {
        return Err(BindingError::NonZeroPadding.into());
    }

    // runtime_data["user-data"] == uppercase hex SHA-512(nonce || user_data)
    let runtime_json: serde_json::Value = serde_json::from_slice(runtime_data)
        .map_err(|e| BindingError::BadRuntimeData(format!("not JSON: {e}")))?;
    let user_data_hex = runtime_json
        .get("user-data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BindingError::BadRuntimeData("missing user-data field".to_owned()))?;

    let nonce = match &evidence.nonce {
        Some(b64) => decode_b64(b64)?,
        None => Vec::new(),
    };
    let user_data = match &evidence.user_data {
        Some(b64) => decode_b64(b64)?,
        None => Vec::new(),
    };
    let expected = hex::encode_upper(sha512::digest_many(&[&nonce, &user_data]));
    if !user_data_hex.eq_ignore_ascii_case(&expected) {
        return Err(BindingError::UserDataMismatch.into());
    }

    Ok(())
}
