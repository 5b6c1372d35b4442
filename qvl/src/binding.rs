//! Report-data binding derivations.
//!
//! A server proves ownership of an ephemeral key by baking a digest of it
//! into the quote's 64-byte `report_data`. These are the canonical
//! derivations for each TEE family, plus predicates that re-run the
//! derivation and compare byte-for-byte.

use crate::{error::BindingError, measurement::ReportData, sha256, sha512};

/// TDX binding: `SHA-512(nonce || iat || key)`, filling all 64 bytes.
pub fn x25519_report_data(nonce: &[u8], iat: &[u8], key: &[u8; 32]) -> ReportData {
    ReportData::new(sha512::digest_many(&[nonce, iat, key]))
}

/// SGX binding: `SHA-256(key) || zeros`. SGX has no nonce channel here, so
/// a replayed quote re-binds the same key; fresh-key-per-process is the
/// operative mitigation. Do not add a nonce without changing the servers
/// that produce these quotes.
pub fn sgx_report_data(key: &[u8; 32]) -> ReportData {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&sha256::digest(key));
    ReportData::new(out)
}

/// Azure vTPM binding: `SHA-512(nonce || user_data)`, carried inside the
/// runtime data blob rather than the quote itself.
pub fn azure_report_data(nonce: &[u8], user_data: &[u8]) -> ReportData {
    ReportData::new(sha512::digest_many(&[nonce, user_data]))
}

/// Check the TDX x25519 binding.
pub fn verify_x25519_binding(
    report_data: &ReportData,
    nonce: &[u8],
    iat: &[u8],
    key: &[u8; 32],
) -> Result<(), BindingError> {
    if report_data == &x25519_report_data(nonce, iat, key) {
        Ok(())
    } else {
        Err(BindingError::ReportDataMismatch)
    }
}

/// Check the SGX binding, including the zero tail.
pub fn verify_sgx_binding(report_data: &ReportData, key: &[u8; 32]) -> Result<(), BindingError> {
    if !report_data.tail_is_zero() {
        return Err(BindingError::NonZeroPadding);
    }
    if report_data == &sgx_report_data(key) {
        Ok(())
    } else {
        Err(BindingError::ReportDataMismatch)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sgx_binding_roundtrip() {
        let key = [7u8; 32];
        let report_data = sgx_report_data(&key);
        assert!(report_data.tail_is_zero());
        verify_sgx_binding(&report_data, &key).unwrap();
        assert_eq!(
            verify_sgx_binding(&report_data, &[8u8; 32]).unwrap_err(),
            BindingError::ReportDataMismatch
        );
    }

    #[test]
    fn test_sgx_binding_rejects_nonzero_tail() {
        let key = [7u8; 32];
        let mut bytes = *sgx_report_data(&key).as_array();
        bytes[63] = 1;
        assert_eq!(
            verify_sgx_binding(&ReportData::new(bytes), &key).unwrap_err(),
            BindingError::NonZeroPadding
        );
    }

    #[test]
    fn test_x25519_binding_roundtrip() {
        let key = [9u8; 32];
        let report_data = x25519_report_data(b"nonce", b"1700000000", &key);
        verify_x25519_binding(&report_data, b"nonce", b"1700000000", &key).unwrap();
        assert!(verify_x25519_binding(&report_data, b"other", b"1700000000", &key).is_err());
    }

    #[test]
    fn test_azure_binding_is_sha512() {
        let report_data = azure_report_data(b"n", b"u");
        assert_eq!(
            report_data.as_slice(),
            crate::sha512::digest(b"nu").as_slice()
        );
    }
}
