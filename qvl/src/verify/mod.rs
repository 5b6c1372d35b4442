//! Attestation verification entry points.
//!
//! One module per quote family; this module holds the options struct, the
//! result record, and the chain-of-trust steps shared by all Intel variants.
//!
//! The boolean entry points (`verify_sgx`, `verify_tdx`, `verify_sev_snp`,
//! `verify_azure_tdx`) return `Ok(false)` exactly when the measurement
//! predicate was the only thing that failed; every lower-level failure
//! (parse, chain, signature, binding, TCB, policy) propagates as a typed
//! [`VerifyError`]. The `evaluate_*` companions return an [`Evaluation`]
//! record for callers that want the parsed quote regardless of outcome.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::{CertChainError, SignatureError, VerifyError},
    policy::MeasurementPolicy,
    quote::{Quote, QuoteSignature},
    roots::PinnedRoots,
    sha256,
    tcb::{PckExtension, TcbPolicy},
    x509::{pem_to_ders, Cert, CertChain, Crl},
};

mod azure;
mod sgx;
mod snp;
mod tdx;

pub use azure::{evaluate_azure_tdx, verify_azure_tdx, AzureTdxEvidence};
pub use sgx::{evaluate_sgx, verify_sgx};
pub use snp::{evaluate_sev_snp, verify_sev_snp};
pub use tdx::{evaluate_tdx, verify_tdx};

/// Options for a verification run. Construct with [`VerifyOpts::at`]; the
/// verification instant is always caller-supplied so runs are deterministic.
#[derive(Clone)]
pub struct VerifyOpts {
    /// The instant certificates are validated against.
    pub now: SystemTime,
    /// DER-encoded CRLs. Only CRLs signed by a chain member are honored.
    pub crls: Vec<Vec<u8>>,
    /// Extra PEM certificate material, consulted when the quote carries no
    /// usable embedded chain (and always, for SEV-SNP).
    pub extra_certs: Vec<String>,
    /// Override the pinned root set. No default; `None` means the
    /// compiled-in vendor roots.
    pub pinned_roots: Option<PinnedRoots>,
    /// Injected TCB policy. `None` skips TCB evaluation.
    pub tcb: Option<Arc<dyn TcbPolicy>>,
    /// Measurement predicate. `None` skips the measurement check.
    pub measurements: Option<MeasurementPolicy>,
    /// SEV-SNP only: reject reports with `vmpl > max_vmpl`.
    pub max_vmpl: Option<u32>,
}

impl VerifyOpts {
    pub fn at(now: SystemTime) -> Self {
        Self {
            now,
            crls: Vec::new(),
            extra_certs: Vec::new(),
            pinned_roots: None,
            tcb: None,
            measurements: None,
            max_vmpl: None,
        }
    }

    pub fn with_crl(mut self, crl_der: Vec<u8>) -> Self {
        self.crls.push(crl_der);
        self
    }

    pub fn with_extra_certs(mut self, pem: impl Into<String>) -> Self {
        self.extra_certs.push(pem.into());
        self
    }

    pub fn with_pinned_roots(mut self, roots: PinnedRoots) -> Self {
        self.pinned_roots = Some(roots);
        self
    }

    pub fn with_tcb_policy(mut self, policy: impl TcbPolicy + 'static) -> Self {
        self.tcb = Some(Arc::new(policy));
        self
    }

    pub fn with_measurements(mut self, measurements: MeasurementPolicy) -> Self {
        self.measurements = Some(measurements);
        self
    }

    pub fn with_max_vmpl(mut self, max_vmpl: u32) -> Self {
        self.max_vmpl = Some(max_vmpl);
        self
    }

    pub(crate) fn now_unix(&self) -> i64 {
        match self.now.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        }
    }
}

/// The result record of an `evaluate_*` call.
#[derive(Debug)]
pub struct Evaluation {
    /// Whether the quote fully verified, measurements included.
    pub valid: bool,
    /// The parsed quote, present whenever parsing got far enough.
    pub quote: Option<Quote>,
    /// The first failure, if any.
    pub error: Option<VerifyError>,
}

impl Evaluation {
    fn passed(quote: Quote) -> Self {
        Self {
            valid: true,
            quote: Some(quote),
            error: None,
        }
    }

    fn failed(quote: Option<Quote>, error: VerifyError) -> Self {
        Self {
            valid: false,
            quote,
            error: Some(error),
        }
    }

    /// Collapse to the boolean contract: measurement mismatch is `false`,
    /// anything else is an error.
    fn into_bool(self) -> Result<bool, VerifyError> {
        match self.error {
            None => Ok(true),
            Some(error) if error.is_measurement_mismatch() => Ok(false),
            Some(error) => Err(error),
        }
    }
}

/// Evaluate the measurement predicate, if one is configured.
pub(crate) fn check_measurements(quote: &Quote, opts: &VerifyOpts) -> Result<(), VerifyError> {
    match &opts.measurements {
        None => Ok(()),
        Some(policy) if policy.matches(quote) => Ok(()),
        Some(_) => Err(VerifyError::Measurement),
    }
}

/// The chain-of-trust steps shared by SGX and TDX quotes:
///
/// 1. assemble the candidate pool from the embedded PCK chain and
///    `extra_certs`, and pick the PCK leaf (the cert carrying the Intel SGX
///    PCK extension);
/// 2. order and verify the chain against the pinned roots, CRLs, and the
///    verification instant;
/// 3. check the QE report's signature under the PCK key;
/// 4. check the QE report binds the attestation key:
///    `qe_report.report_data[0..32] == SHA-256(att_pk || qe_auth_data)`;
/// 5. check the quote signature over the signed region under the
///    attestation key;
/// 6. run the injected TCB policy with the PCK's FMSPC.
pub(crate) fn verify_intel(
    quote: &Quote,
    signature: &QuoteSignature,
    signed_region: &[u8],
    opts: &VerifyOpts,
) -> Result<(), VerifyError> {
    // 1. candidate pool
    let mut ders: Vec<Vec<u8>> = Vec::new();
    if let Some(pem) = signature.qe.cert_data.pck_chain_pem() {
        ders.extend(pem_to_ders(pem)?);
    }
    for pem in &opts.extra_certs {
        ders.extend(pem_to_ders(pem)?);
    }
    if ders.is_empty() {
        return Err(CertChainError::MissingCertData(
            "quote carries no certificate chain and no extra_certs were supplied".to_owned(),
        )
        .into());
    }

    let certs = ders
        .iter()
        .map(|der| Cert::parse(der))
        .collect::<Result<Vec<_>, _>>()?;
    let leaf_index = certs
        .iter()
        .position(PckExtension::is_pck_cert)
        .ok_or_else(|| {
            CertChainError::MissingCertData("no PCK certificate among candidates".to_owned())
        })?;

    // 2. chain of trust
    let crls = opts
        .crls
        .iter()
        .map(|der| Crl::parse(der))
        .collect::<Result<Vec<_>, _>>()?;
    let default_roots;
    let pinned = match &opts.pinned_roots {
        Some(roots) => roots,
        None => {
            default_roots = PinnedRoots::intel();
            &default_roots
        }
    };
    let chain = CertChain::build(certs, leaf_index)?;
    chain.verify(opts.now_unix(), &crls, pinned)?;
    let pck = chain.leaf();

    // 3. QE report signature under the PCK key
    if !pck.verify_p256_fixed(&signature.qe.qe_report_raw, &signature.qe.qe_report_signature) {
        return Err(SignatureError::QeReport.into());
    }

    // 4. QE report binds the attestation key
    let expected = sha256::digest_many(&[
        &signature.attestation_public_key,
        &signature.qe.qe_auth_data,
    ]);
    if signature.qe.qe_report.report_data.as_slice()[..32] != expected {
        return Err(SignatureError::QeBinding.into());
    }

    // 5. quote signature under the attestation key
    let mut att_pk_uncompressed = [0u8; 65];
    att_pk_uncompressed[0] = 0x04;
    att_pk_uncompressed[1..].copy_from_slice(&signature.attestation_public_key);
    let att_key = ring::signature::UnparsedPublicKey::new(
        &ring::signature::ECDSA_P256_SHA256_FIXED,
        att_pk_uncompressed.as_slice(),
    );
    att_key
        .verify(signed_region, &signature.signature)
        .map_err(|_| SignatureError::QuoteBody)?;

    // 6. TCB policy
    if let Some(tcb) = &opts.tcb {
        let pck_ext = PckExtension::from_cert(pck)?;
        let fmspc = pck_ext.fmspc_hex();
        if !tcb.verify(&fmspc, quote) {
            return Err(VerifyError::Tcb { fmspc });
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::testutil::{
        build_tdx_quote_v4, build_tdx_quote_v4_with_chain_pem, ChainKind, ChainPosition,
        CrlSigner, QuoteParams, TestChain, INTERMEDIATE_SERIAL, LEAF_SERIAL, ROOT_SERIAL,
    };

    fn mock_now() -> SystemTime {
        // 2025-09-01, inside the fixture chain's validity window
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_756_684_800)
    }

    fn base_opts(chain: &TestChain) -> VerifyOpts {
        VerifyOpts::at(mock_now()).with_pinned_roots(chain.pinned_roots())
    }

    #[test]
    fn test_full_chain_verifies() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let quote = build_tdx_quote_v4(&chain, &QuoteParams::default());
        assert_eq!(verify_tdx(&quote, &base_opts(&chain)), Ok(true));
    }

    #[test]
    fn test_chain_missing_leaf_is_missing_cert_data() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let pem = chain.chain_pem_without(ChainPosition::Leaf);
        let quote = build_tdx_quote_v4_with_chain_pem(&chain, &QuoteParams::default(), &pem);
        let err = verify_tdx(&quote, &base_opts(&chain)).unwrap_err();
        assert!(
            matches!(err, VerifyError::CertChain(CertChainError::MissingCertData(_))),
            "{err:?}"
        );
    }

    #[test]
    fn test_chain_missing_intermediate_is_invalid_chain() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let pem = chain.chain_pem_without(ChainPosition::Intermediate);
        let quote = build_tdx_quote_v4_with_chain_pem(&chain, &QuoteParams::default(), &pem);
        let err = verify_tdx(&quote, &base_opts(&chain)).unwrap_err();
        match err {
            VerifyError::CertChain(CertChainError::InvalidChain { reason }) => {
                assert!(reason.contains("PCK Platform CA"), "{reason}");
            }
            other => panic!("expected InvalidChain, got {other:?}"),
        }
    }

    #[test]
    fn test_chain_missing_root_is_invalid_chain_at_root() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let pem = chain.chain_pem_without(ChainPosition::Root);
        let quote = build_tdx_quote_v4_with_chain_pem(&chain, &QuoteParams::default(), &pem);
        let err = verify_tdx(&quote, &base_opts(&chain)).unwrap_err();
        match err {
            VerifyError::CertChain(CertChainError::InvalidChain { reason }) => {
                assert!(reason.contains("Root CA"), "{reason}");
            }
            other => panic!("expected InvalidChain, got {other:?}"),
        }
    }

    #[test]
    fn test_revocation_at_each_position() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let quote = build_tdx_quote_v4(&chain, &QuoteParams::default());
        let cases = [
            (CrlSigner::Intermediate, LEAF_SERIAL),
            (CrlSigner::Root, INTERMEDIATE_SERIAL),
            (CrlSigner::Root, ROOT_SERIAL),
        ];
        for (signer, serial) in cases {
            let opts = base_opts(&chain).with_crl(chain.crl(signer, &[serial]));
            let err = verify_tdx(&quote, &opts).unwrap_err();
            match err {
                VerifyError::CertChain(CertChainError::Revoked {
                    serial: revoked, ..
                }) => {
                    assert_eq!(revoked, crate::x509::normalize_serial(serial));
                }
                other => panic!("expected Revoked for {serial:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_crl_for_unrelated_chain_is_ignored() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let other = TestChain::new(ChainKind::IntelP256);
        let quote = build_tdx_quote_v4(&chain, &QuoteParams::default());
        let opts = base_opts(&chain).with_crl(other.crl(CrlSigner::Root, &[LEAF_SERIAL]));
        assert_eq!(verify_tdx(&quote, &opts), Ok(true));
    }

    #[test]
    fn test_validity_window() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let quote = build_tdx_quote_v4(&chain, &QuoteParams::default());
        // fixture certs are valid 2024-01-01 .. 2034-01-01
        for instant in [
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000), // 2020
            SystemTime::UNIX_EPOCH + Duration::from_secs(2_100_000_000), // 2036
        ] {
            let opts = VerifyOpts::at(instant).with_pinned_roots(chain.pinned_roots());
            let err = verify_tdx(&quote, &opts).unwrap_err();
            assert!(
                matches!(
                    err,
                    VerifyError::CertChain(CertChainError::ExpiredOrNotYetValid { .. })
                ),
                "{err:?}"
            );
        }
    }

    #[test]
    fn test_empty_pinned_set_is_invalid_root() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let quote = build_tdx_quote_v4(&chain, &QuoteParams::default());
        let opts = VerifyOpts::at(mock_now()).with_pinned_roots(PinnedRoots::empty());
        let err = verify_tdx(&quote, &opts).unwrap_err();
        assert!(
            matches!(err, VerifyError::CertChain(CertChainError::InvalidRoot { .. })),
            "{err:?}"
        );
    }

    #[test]
    fn test_default_pinned_roots_reject_synthetic_chain() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let quote = build_tdx_quote_v4(&chain, &QuoteParams::default());
        // no override: the compiled-in Intel root does not match
        let opts = VerifyOpts::at(mock_now());
        let err = verify_tdx(&quote, &opts).unwrap_err();
        assert!(
            matches!(err, VerifyError::CertChain(CertChainError::InvalidRoot { .. })),
            "{err:?}"
        );
    }

    #[test]
    fn test_tcb_callback_receives_fmspc_and_can_reject() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let quote = build_tdx_quote_v4(&chain, &QuoteParams::default());
        let opts = base_opts(&chain).with_tcb_policy(|fmspc: &str, _quote: &Quote| {
            assert_eq!(fmspc, hex::encode(crate::testutil::TEST_FMSPC));
            false
        });
        let err = verify_tdx(&quote, &opts).unwrap_err();
        assert!(matches!(err, VerifyError::Tcb { .. }), "{err:?}");
    }
}
