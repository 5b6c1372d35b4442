//! SEV-SNP attestation report verification.
//!
//! Unlike Intel quotes, SNP reports embed no certificate chain: the VCEK,
//! ASK, and ARK must arrive via `extra_certs`, and the trusted ARK via the
//! `pinned_roots` override (AMD roots are provisioned at deploy time, see
//! `roots`). The VCEK's ECDSA-P384 signature covers the first 672 bytes of
//! the report.

use crate::{
    error::{CertChainError, PolicyError, SignatureError, VerifyError},
    quote::Quote,
    roots::PinnedRoots,
    verify::{check_measurements, Evaluation, VerifyOpts},
    x509::{pem_to_ders, Cert, CertChain, Crl},
};

/// Verify an SEV-SNP attestation report. See the module docs for the
/// boolean contract.
pub fn verify_sev_snp(bytes: &[u8], opts: &VerifyOpts) -> Result<bool, VerifyError> {
    evaluate_sev_snp(bytes, opts).into_bool()
}

/// Verify an SEV-SNP report, returning the full result record.
pub fn evaluate_sev_snp(bytes: &[u8], opts: &VerifyOpts) -> Evaluation {
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
    let Quote::SevSnp(report) = quote else {
        return Err(PolicyError::TeeTypeMismatch {
            expected: "SEV-SNP",
            actual: quote.family(),
        }
        .into());
    };

    if report.signature_algo > 1 {
        return Err(SignatureError::UnsupportedAlgorithm(format!(
            "SNP signature_algo {}",
            report.signature_algo
        ))
        .into());
    }

    if let Some(max_vmpl) = opts.max_vmpl {
        if report.vmpl > max_vmpl {
            return Err(PolicyError::VmplExceeded {
                vmpl: report.vmpl,
                max_vmpl,
            }
            .into());
        }
    }

    // VCEK <- ASK <- ARK, all caller-supplied.
    let mut ders: Vec<Vec<u8>> = Vec::new();
    for pem in &opts.extra_certs {
        ders.extend(pem_to_ders(pem)?);
    }
    if ders.is_empty() {
        return Err(CertChainError::MissingCertData(
            "SEV-SNP verification requires the VCEK/ASK/ARK chain via extra_certs".to_owned(),
        )
        .into());
    }
    let certs = ders
        .iter()
        .map(|der| Cert::parse(der))
        .collect::<Result<Vec<_>, _>>()?;

    // The VCEK leaf is the candidate that issues nothing else and is not
    // self-signed.
    let leaf_index = certs
        .iter()
        .position(|cand| {
            !cand.is_self_signed() && !certs.iter().any(|other| other.issuer() == cand.subject())
        })
        .ok_or_else(|| {
            CertChainError::MissingCertData("no VCEK leaf among candidates".to_owned())
        })?;

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

    let signature = report
        .signature_fixed()
        .ok_or(SignatureError::SnpReport)?;
    if !chain
        .leaf()
        .verify_p384_fixed(report.signed_bytes(), &signature)
    {
        return Err(SignatureError::SnpReport.into());
    }

    check_measurements(quote, opts)
}

#[cfg(test)]
mod test {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::{
        policy::{MeasurementPolicy, MeasurementSet},
        testutil::{build_snp_report, ChainKind, SnpParams, TestChain},
    };

    fn mock_now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_756_684_800)
    }

    fn opts(chain: &TestChain) -> VerifyOpts {
        VerifyOpts::at(mock_now())
            .with_pinned_roots(chain.pinned_roots())
            .with_extra_certs(chain.chain_pem())
    }

    #[test]
    fn test_parse_and_verify() {
        let chain = TestChain::new(ChainKind::AmdP384);
        let params = SnpParams {
            vmpl: 1,
            measurement: [0xB7; 48],
            ..SnpParams::default()
        };
        let report_bytes = build_snp_report(&chain, &params);

        let quote = Quote::parse(&report_bytes).unwrap();
        let Quote::SevSnp(report) = &quote else {
            panic!("expected SEV-SNP, got {}", quote.family());
        };
        assert_eq!(report.version, 2);
        assert_eq!(report.vmpl, 1);
        assert_eq!(report.measurement.to_hex(), "b7".repeat(48));

        let opts = opts(&chain).with_measurements(MeasurementPolicy::Single(MeasurementSet {
            measurement: Some("b7".repeat(48)),
            ..MeasurementSet::default()
        }));
        assert_eq!(verify_sev_snp(&report_bytes, &opts), Ok(true));
    }

    #[test]
    fn test_vmpl_over_max_is_policy_error() {
        let chain = TestChain::new(ChainKind::AmdP384);
        let params = SnpParams {
            vmpl: 1,
            ..SnpParams::default()
        };
        let report_bytes = build_snp_report(&chain, &params);
        let opts = opts(&chain).with_max_vmpl(0);
        let err = verify_sev_snp(&report_bytes, &opts).unwrap_err();
        assert_eq!(
            err,
            VerifyError::Policy(PolicyError::VmplExceeded {
                vmpl: 1,
                max_vmpl: 0
            })
        );
    }

    #[test]
    fn test_vmpl_at_max_is_accepted() {
        let chain = TestChain::new(ChainKind::AmdP384);
        let report_bytes = build_snp_report(&chain, &SnpParams::default());
        let opts = opts(&chain).with_max_vmpl(0);
        assert_eq!(verify_sev_snp(&report_bytes, &opts), Ok(true));
    }

    #[test]
    fn test_signed_region_mutation_fails_signature() {
        let chain = TestChain::new(ChainKind::AmdP384);
        let mut report_bytes = build_snp_report(&chain, &SnpParams::default());
        report_bytes[0x90] ^= 0x01; // measurement byte
        let err = verify_sev_snp(&report_bytes, &opts(&chain)).unwrap_err();
        assert_eq!(err, VerifyError::Signature(SignatureError::SnpReport));
    }

    #[test]
    fn test_missing_chain_is_missing_cert_data() {
        let chain = TestChain::new(ChainKind::AmdP384);
        let report_bytes = build_snp_report(&chain, &SnpParams::default());
        let opts = VerifyOpts::at(mock_now()).with_pinned_roots(chain.pinned_roots());
        let err = verify_sev_snp(&report_bytes, &opts).unwrap_err();
        assert!(
            matches!(err, VerifyError::CertChain(CertChainError::MissingCertData(_))),
            "{err:?}"
        );
    }

    #[test]
    fn test_unknown_signature_algo_rejected() {
        let chain = TestChain::new(ChainKind::AmdP384);
        let params = SnpParams {
            signature_algo: 7,
            ..SnpParams::default()
        };
        let report_bytes = build_snp_report(&chain, &params);
        let err = verify_sev_snp(&report_bytes, &opts(&chain)).unwrap_err();
        assert!(
            matches!(err, VerifyError::Signature(SignatureError::UnsupportedAlgorithm(_))),
            "{err:?}"
        );
    }

    #[test]
    fn test_tdx_entry_point_rejects_snp_report() {
        let chain = TestChain::new(ChainKind::AmdP384);
        let report_bytes = build_snp_report(&chain, &SnpParams::default());
        let err = crate::verify::verify_tdx(&report_bytes, &opts(&chain)).unwrap_err();
        assert!(
            matches!(err, VerifyError::Policy(PolicyError::TeeTypeMismatch { .. })),
            "{err:?}"
        );
    }
}
