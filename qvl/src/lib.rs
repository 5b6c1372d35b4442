//! # qvl: Quote Verification Library
//!
//! A pure, offline verifier for TEE attestation evidence: Intel SGX (DCAP
//! v3), Intel TDX (v4 and v5), Intel TDX on Azure (vTPM-wrapped), and AMD
//! SEV-SNP. Given raw quote bytes, `qvl` validates the chain of trust from
//! the vendor root certificate down to the signed report body, evaluates TCB
//! status through an injected policy, and exposes the attested measurements.
//!
//! The library performs no network I/O: TCB info fetching and policy are
//! delegated via callbacks ([`tcb::TcbPolicy`], [`tcb::FetchTcbInfo`]), CRLs
//! and out-of-band certificates arrive through [`VerifyOpts`], and the
//! verification instant is always caller-supplied. The same inputs always
//! produce the same verdict.
//!
//! ```no_run
//! use std::time::SystemTime;
//! use qvl::{verify_tdx, MeasurementPolicy, MeasurementSet, VerifyOpts};
//!
//! # fn main() -> Result<(), qvl::VerifyError> {
//! # let quote_bytes: &[u8] = &[];
//! let opts = VerifyOpts::at(SystemTime::now())
//!     .with_tcb_policy(|_fmspc: &str, _quote: &qvl::Quote| true)
//!     .with_measurements(MeasurementPolicy::Single(MeasurementSet {
//!         mrtd: Some(
//!             "c68518a0ebb42136c12b2275164f8c72f25fa9a34392228687ed6e9caeb9c0f1\
//!              808de1845f4cb34eb85b4a1ef3e84fd4"
//!                 .into(),
//!         ),
//!         ..MeasurementSet::default()
//!     }));
//! let trusted = verify_tdx(quote_bytes, &opts)?;
//! # Ok(())
//! # }
//! ```

/// Report-data binding derivations and predicates.
pub mod binding;
/// Typed errors per failure domain.
pub mod error;
/// Fixed-size measurement newtypes.
pub mod measurement;
/// Measurement predicates.
pub mod policy;
/// Binary quote codec.
pub mod quote;
/// Pinned vendor roots.
pub mod roots;
/// SHA-256 helpers.
pub mod sha256;
/// SHA-512 helpers.
pub mod sha512;
/// TCB data surfaces and policy injection points.
pub mod tcb;
/// Verification entry points.
pub mod verify;
/// X.509 / CRL engine.
pub mod x509;

/// Synthetic fixtures for tests (and dependent crates' tests via the
/// `test-utils` feature).
#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use error::{
    BindingError, CertChainError, ParseError, PolicyError, SignatureError, VerifyError,
};
pub use measurement::{Measurement32, Measurement48, Measurement64, ReportData};
pub use policy::{MeasurementPolicy, MeasurementRule, MeasurementSet};
pub use quote::{Quote, SgxQuote, SnpReport, TdxQuote};
pub use roots::{PinnedRoots, PINNED_ROOTS_VERSION};
pub use verify::{
    evaluate_azure_tdx, evaluate_sev_snp, evaluate_sgx, evaluate_tdx, verify_azure_tdx,
    verify_sev_snp, verify_sgx, verify_tdx, AzureTdxEvidence, Evaluation, VerifyOpts,
};
