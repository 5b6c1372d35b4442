//! Pinned vendor root certificates.
//!
//! Verification refuses to succeed unless the chain terminates at one of the
//! pinned roots, or at a member of an explicit caller-supplied override set.
//! The override exists for testing and for roots that must be provisioned at
//! deploy time (AMD ARKs rotate per product line and are distributed via
//! AMD's KDS, which this library never contacts); it has no default.

use crate::{
    error::CertChainError,
    x509::{pem_to_ders, Cert},
};

/// Version stamp of the compiled-in root set. Bump when the embedded
/// certificates change.
pub const PINNED_ROOTS_VERSION: &str = "2025.1";

/// The Intel SGX Root CA, used for both SGX and TDX PCK chains.
const INTEL_SGX_ROOT_CA_PEM: &str = include_str!("../data/intel_sgx_root_ca.pem");

/// An immutable set of trusted root certificates, matched by DER equality.
#[derive(Clone, Debug, Default)]
pub struct PinnedRoots {
    ders: Vec<Vec<u8>>,
}

impl PinnedRoots {
    /// The compiled-in Intel root set. This is the default for SGX and TDX
    /// verification.
    pub fn intel() -> Self {
        Self::from_pem(INTEL_SGX_ROOT_CA_PEM)
            .expect("compiled-in Intel SGX root CA must parse")
    }

    /// An empty set. Every chain fails `InvalidRoot` against it.
    pub fn empty() -> Self {
        Self { ders: Vec::new() }
    }

    /// Build a root set from concatenated PEM. Each certificate must parse
    /// and be self-signed.
    pub fn from_pem(pem: &str) -> Result<Self, CertChainError> {
        let ders = pem_to_ders(pem)?;
        let mut roots = Self::empty();
        for der in ders {
            roots.push_der(der)?;
        }
        Ok(roots)
    }

    /// Add a DER certificate to the set, validating that it parses and is
    /// self-signed.
    pub fn push_der(&mut self, der: Vec<u8>) -> Result<(), CertChainError> {
        let cert = Cert::parse(&der)?;
        if !cert.is_self_signed() {
            return Err(CertChainError::InvalidRoot {
                subject: cert.subject(),
            });
        }
        drop(cert);
        self.ders.push(der);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ders.len()
    }

    /// Whether `der` is byte-identical to one of the pinned roots.
    pub fn contains_der(&self, der: &[u8]) -> bool {
        self.ders.iter().any(|pinned| pinned == der)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_intel_root_parses() {
        let roots = PinnedRoots::intel();
        assert_eq!(roots.len(), 1);
        assert_ne!(PINNED_ROOTS_VERSION, "");
    }

    #[test]
    fn test_intel_root_is_self_signed_intel() {
        let ders = pem_to_ders(INTEL_SGX_ROOT_CA_PEM).unwrap();
        let cert = Cert::parse(&ders[0]).unwrap();
        assert!(cert.is_self_signed());
        assert!(cert.subject().contains("Intel SGX Root CA"));
    }

    #[test]
    fn test_empty_set_contains_nothing() {
        let roots = PinnedRoots::empty();
        assert!(roots.is_empty());
        assert!(!roots.contains_der(b"anything"));
    }
}
