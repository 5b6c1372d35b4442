//! X.509 certificate and CRL engine.
//!
//! Thin handles over DER with exactly the accessors verification needs, plus
//! chain building against a pinned root set. Signature verification is done
//! with `ring` over the raw `tbsCertificate` / `tbsCertList` bytes, so the
//! supported algorithm set is explicit: ECDSA-P256/SHA-256 (Intel PCK
//! chains), ECDSA-P384/SHA-384 (AMD VCEK), and RSA-PSS/SHA-384 (AMD
//! ARK/ASK), with RSA-PKCS#1 accepted for interop.

use std::io::Cursor;

use asn1_rs::FromDer;
use x509_parser::{certificate::X509Certificate, revocation_list::CertificateRevocationList};

use crate::{error::CertChainError, roots::PinnedRoots};

/// Signature algorithm of a certificate or CRL, from its algorithm OID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SigAlg {
    EcdsaP256Sha256,
    EcdsaP384Sha384,
    RsaPss,
    RsaPkcs1Sha256,
    RsaPkcs1Sha384,
    Unknown(String),
}

impl SigAlg {
    fn from_oid(oid: &str) -> Self {
        match oid {
            "1.2.840.10045.4.3.2" => Self::EcdsaP256Sha256,
            "1.2.840.10045.4.3.3" => Self::EcdsaP384Sha384,
            "1.2.840.113549.1.1.10" => Self::RsaPss,
            "1.2.840.113549.1.1.11" => Self::RsaPkcs1Sha256,
            "1.2.840.113549.1.1.12" => Self::RsaPkcs1Sha384,
            other => Self::Unknown(other.to_owned()),
        }
    }

    fn ring_alg(&self) -> Option<&'static dyn ring::signature::VerificationAlgorithm> {
        match self {
            Self::EcdsaP256Sha256 => Some(&ring::signature::ECDSA_P256_SHA256_ASN1),
            Self::EcdsaP384Sha384 => Some(&ring::signature::ECDSA_P384_SHA384_ASN1),
            // AMD's ARK/ASK use RSA-PSS with SHA-384 and 4096-bit keys,
            // which this ring algorithm admits.
            Self::RsaPss => Some(&ring::signature::RSA_PSS_2048_8192_SHA384),
            Self::RsaPkcs1Sha256 => Some(&ring::signature::RSA_PKCS1_2048_8192_SHA256),
            Self::RsaPkcs1Sha384 => Some(&ring::signature::RSA_PKCS1_2048_8192_SHA384),
            Self::Unknown(_) => None,
        }
    }
}

/// Split a DER `SIGNED{...}` structure (certificate or CRL) into the raw
/// to-be-signed bytes and the signature bits.
fn split_signed(der: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CertChainError> {
    yasna::parse_der(der, |reader| {
        reader.read_sequence(|r| {
            let tbs = r.next().read_der()?;
            let _alg = r.next().read_der()?;
            let (sig, _bits) = r.next().read_bitvec_bytes()?;
            Ok((tbs, sig))
        })
    })
    .map_err(|e| CertChainError::BadDer(format!("signed structure: {e}")))
}

/// Normalize a serial number for comparison: strip leading zero bytes,
/// lowercase hex, strip leading zero digits. CRL entries and certificate
/// serials both go through this, so a leading `0x00` pad byte (required by
/// DER for high-bit serials) never causes a mismatch.
pub fn normalize_serial(bytes: &[u8]) -> String {
    let first_nonzero = bytes.iter().position(|b| *b != 0);
    let trimmed = match first_nonzero {
        Some(idx) => &bytes[idx..],
        None => return "0".to_owned(),
    };
    let hex = hex::encode(trimmed);
    match hex.strip_prefix('0') {
        Some(rest) => rest.to_owned(),
        None => hex,
    }
}

/// Decode concatenated PEM certificates into DER blocks.
pub fn pem_to_ders(pem: &str) -> Result<Vec<Vec<u8>>, CertChainError> {
    let mut cursor = Cursor::new(pem.as_bytes());
    rustls_pemfile::certs(&mut cursor)
        .map(|res| {
            res.map(|der| der.as_ref().to_vec())
                .map_err(|e| CertChainError::BadDer(format!("PEM: {e}")))
        })
        .collect()
}

/// A parsed certificate handle borrowing its DER.
pub struct Cert<'a> {
    pub der: &'a [u8],
    x509: X509Certificate<'a>,
    tbs_raw: Vec<u8>,
    signature: Vec<u8>,
    sig_alg: SigAlg,
}

impl<'a> Cert<'a> {
    pub fn parse(der: &'a [u8]) -> Result<Self, CertChainError> {
        let (rem, x509) = X509Certificate::from_der(der)
            .map_err(|e| CertChainError::BadDer(format!("certificate: {e}")))?;
        if !rem.is_empty() {
            return Err(CertChainError::BadDer(
                "trailing bytes after certificate".to_owned(),
            ));
        }
        let (tbs_raw, signature) = split_signed(der)?;
        let sig_alg = SigAlg::from_oid(&x509.signature_algorithm.algorithm.to_id_string());

        Ok(Self {
            der,
            x509,
            tbs_raw,
            signature,
            sig_alg,
        })
    }

    pub fn subject(&self) -> String {
        self.x509.subject().to_string()
    }

    pub fn issuer(&self) -> String {
        self.x509.issuer().to_string()
    }

    /// Normalized serial number (see [`normalize_serial`]).
    pub fn serial(&self) -> String {
        normalize_serial(self.x509.raw_serial())
    }

    /// Validity window as unix timestamps `(not_before, not_after)`.
    pub fn validity(&self) -> (i64, i64) {
        let validity = self.x509.validity();
        (
            validity.not_before.timestamp(),
            validity.not_after.timestamp(),
        )
    }

    /// The subject public key bits: an uncompressed point for EC keys, a
    /// PKCS#1 `RSAPublicKey` for RSA keys. Exactly what `ring` consumes.
    pub fn spki_bits(&self) -> &[u8] {
        self.x509.public_key().subject_public_key.data.as_ref()
    }

    pub fn is_self_signed(&self) -> bool {
        self.x509.subject() == self.x509.issuer()
    }

    /// Look up an extension value by OID.
    pub fn extension_value(&self, oid: &asn1_rs::Oid<'_>) -> Option<&[u8]> {
        self.x509
            .extensions()
            .iter()
            .find(|ext| &ext.oid == oid)
            .map(|ext| ext.value)
    }

    /// Verify that `self`'s signature was produced by `issuer`'s key.
    pub fn verify_issued_by(&self, issuer: &Cert<'_>) -> Result<(), CertChainError> {
        let alg = self.sig_alg.ring_alg().ok_or_else(|| {
            CertChainError::InvalidChain {
                reason: format!("unsupported signature algorithm on {}", self.subject()),
            }
        })?;
        let key = ring::signature::UnparsedPublicKey::new(alg, issuer.spki_bits());
        key.verify(&self.tbs_raw, &self.signature)
            .map_err(|_| CertChainError::InvalidChain {
                reason: format!(
                    "signature on {} does not verify under {}",
                    self.subject(),
                    issuer.subject()
                ),
            })
    }

    /// Verify a raw ECDSA-P256 fixed `r || s` signature under this cert's
    /// public key (used for the QE report signature, which is not DER).
    pub fn verify_p256_fixed(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let key = ring::signature::UnparsedPublicKey::new(
            &ring::signature::ECDSA_P256_SHA256_FIXED,
            self.spki_bits(),
        );
        key.verify(message, signature).is_ok()
    }

    /// Verify a raw ECDSA-P384 fixed `r || s` signature under this cert's
    /// public key (used for the SEV-SNP report signature).
    pub fn verify_p384_fixed(&self, message: &[u8], signature: &[u8; 96]) -> bool {
        let key = ring::signature::UnparsedPublicKey::new(
            &ring::signature::ECDSA_P384_SHA384_FIXED,
            self.spki_bits(),
        );
        key.verify(message, signature).is_ok()
    }
}

/// A parsed CRL handle borrowing its DER.
pub struct Crl<'a> {
    crl: CertificateRevocationList<'a>,
    tbs_raw: Vec<u8>,
    signature: Vec<u8>,
    sig_alg: SigAlg,
}

impl<'a> Crl<'a> {
    pub fn parse(der: &'a [u8]) -> Result<Self, CertChainError> {
        let (rem, crl) = CertificateRevocationList::from_der(der)
            .map_err(|e| CertChainError::BadDer(format!("CRL: {e}")))?;
        if !rem.is_empty() {
            return Err(CertChainError::BadDer("trailing bytes after CRL".to_owned()));
        }
        let (tbs_raw, signature) = split_signed(der)?;
        let sig_alg = SigAlg::from_oid(&crl.signature_algorithm.algorithm.to_id_string());

        Ok(Self {
            crl,
            tbs_raw,
            signature,
            sig_alg,
        })
    }

    pub fn issuer(&self) -> String {
        self.crl.issuer().to_string()
    }

    /// Normalized serials of every revoked certificate.
    pub fn revoked_serials(&self) -> Vec<String> {
        self.crl
            .iter_revoked_certificates()
            .map(|revoked| normalize_serial(revoked.raw_serial()))
            .collect()
    }

    /// Whether `issuer`'s key actually signed this CRL.
    pub fn verify_signed_by(&self, issuer: &Cert<'_>) -> bool {
        let Some(alg) = self.sig_alg.ring_alg() else {
            return false;
        };
        let key = ring::signature::UnparsedPublicKey::new(alg, issuer.spki_bits());
        key.verify(&self.tbs_raw, &self.signature).is_ok()
    }
}

/// An ordered chain, leaf first, root last.
pub struct CertChain<'a> {
    pub certs: Vec<Cert<'a>>,
}

impl<'a> CertChain<'a> {
    pub fn leaf(&self) -> &Cert<'a> {
        &self.certs[0]
    }

    pub fn root(&self) -> &Cert<'a> {
        self.certs.last().expect("chain is never empty")
    }

    /// Order `pool` into a chain starting at `leaf_index`, following
    /// issuer DNs until a self-signed certificate is reached. Candidates
    /// that do not participate in the chain are ignored.
    pub fn build(pool: Vec<Cert<'a>>, leaf_index: usize) -> Result<Self, CertChainError> {
        let mut remaining = pool;
        if leaf_index >= remaining.len() {
            return Err(CertChainError::MissingCertData(
                "leaf index out of range".to_owned(),
            ));
        }
        let mut certs = vec![remaining.swap_remove(leaf_index)];

        loop {
            let current = certs.last().expect("just pushed");
            if current.is_self_signed() {
                break;
            }
            let issuer_dn = current.issuer();
            let Some(idx) = remaining
                .iter()
                .position(|cand| cand.subject() == issuer_dn)
            else {
                return Err(CertChainError::InvalidChain {
                    reason: format!("issuer not found: {issuer_dn}"),
                });
            };
            let issuer = remaining.swap_remove(idx);
            certs.push(issuer);

            // An issuer loop can only come from adversarial input.
            if certs.len() > 8 {
                return Err(CertChainError::InvalidChain {
                    reason: "certificate chain too deep".to_owned(),
                });
            }
        }

        Ok(Self { certs })
    }

    /// Run the full chain policy: root pinning, validity windows, signature
    /// linkage (including the root's self-signature), and revocation against
    /// CRLs signed by a chain member.
    pub fn verify(
        &self,
        now_unix: i64,
        crls: &[Crl<'_>],
        pinned: &PinnedRoots,
    ) -> Result<(), CertChainError> {
        let root = self.root();
        if !pinned.contains_der(root.der) {
            return Err(CertChainError::InvalidRoot {
                subject: root.subject(),
            });
        }

        for cert in &self.certs {
            let (not_before, not_after) = cert.validity();
            if now_unix < not_before || now_unix > not_after {
                return Err(CertChainError::ExpiredOrNotYetValid {
                    subject: cert.subject(),
                });
            }
        }

        for pair in self.certs.windows(2) {
            pair[0].verify_issued_by(&pair[1])?;
        }
        root.verify_issued_by(root)?;

        // Only CRLs verifiably signed by a chain member count; others are
        // ignored (the caller may pass CRLs for unrelated chains).
        for crl in crls {
            let issuer_dn = crl.issuer();
            let signed_by_member = self
                .certs
                .iter()
                .any(|cert| cert.subject() == issuer_dn && crl.verify_signed_by(cert));
            if !signed_by_member {
                tracing::debug!(issuer = %issuer_dn, "ignoring CRL not signed by chain member");
                continue;
            }
            let revoked = crl.revoked_serials();
            for cert in &self.certs {
                if revoked.contains(&cert.serial()) {
                    return Err(CertChainError::Revoked {
                        subject: cert.subject(),
                        serial: cert.serial(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_serial() {
        assert_eq!(normalize_serial(&[0x00, 0xab, 0xcd]), "abcd");
        assert_eq!(normalize_serial(&[0xab, 0xcd]), "abcd");
        assert_eq!(normalize_serial(&[0x0a, 0xbc]), "abc");
        assert_eq!(normalize_serial(&[0x00, 0x00]), "0");
        assert_eq!(normalize_serial(&[]), "0");
    }

    #[test]
    fn test_sig_alg_from_oid() {
        assert_eq!(
            SigAlg::from_oid("1.2.840.10045.4.3.2"),
            SigAlg::EcdsaP256Sha256
        );
        assert_eq!(SigAlg::from_oid("1.2.840.113549.1.1.10"), SigAlg::RsaPss);
        assert!(matches!(SigAlg::from_oid("1.2.3.4"), SigAlg::Unknown(_)));
    }

    #[test]
    fn test_pem_to_ders_rejects_garbage_block() {
        let pem = "-----BEGIN CERTIFICATE-----\n!!!not base64!!!\n-----END CERTIFICATE-----\n";
        assert!(pem_to_ders(pem).is_err() || pem_to_ders(pem).unwrap().is_empty());
    }
}

#[cfg(test)]
mod chain_test {
    use super::*;
    use crate::testutil::{ChainKind, TestChain};

    // 2025-09-01, inside the fixture validity window
    const NOW: i64 = 1_756_684_800;

    #[test]
    fn test_pem_chain_decodes_to_three_certs() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let ders = pem_to_ders(&chain.chain_pem()).unwrap();
        assert_eq!(ders.len(), 3);
        assert_eq!(ders[0], chain.leaf_der);
        assert_eq!(ders[2], chain.root_der);
    }

    #[test]
    fn test_build_orders_shuffled_candidates() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let ders = [
            chain.root_der.clone(),
            chain.leaf_der.clone(),
            chain.intermediate_der.clone(),
        ];
        let certs = ders
            .iter()
            .map(|der| Cert::parse(der))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let ordered = CertChain::build(certs, 1).unwrap();
        assert_eq!(ordered.certs.len(), 3);
        assert!(ordered.leaf().subject().contains("PCK Certificate"));
        assert!(ordered.root().is_self_signed());
        ordered.verify(NOW, &[], &chain.pinned_roots()).unwrap();
    }

    #[test]
    fn test_serials_match_assigned_bytes() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let leaf = Cert::parse(&chain.leaf_der).unwrap();
        assert_eq!(leaf.serial(), normalize_serial(crate::testutil::LEAF_SERIAL));
    }

    #[test]
    fn test_p384_chain_verifies() {
        let chain = TestChain::new(ChainKind::AmdP384);
        let ders = [
            chain.leaf_der.clone(),
            chain.intermediate_der.clone(),
            chain.root_der.clone(),
        ];
        let certs = ders
            .iter()
            .map(|der| Cert::parse(der))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let ordered = CertChain::build(certs, 0).unwrap();
        ordered.verify(NOW, &[], &chain.pinned_roots()).unwrap();
    }

    #[test]
    fn test_crl_parse_and_issuer_check() {
        let chain = TestChain::new(ChainKind::IntelP256);
        let crl_der = chain.crl(
            crate::testutil::CrlSigner::Intermediate,
            &[crate::testutil::LEAF_SERIAL],
        );
        let crl = Crl::parse(&crl_der).unwrap();
        assert_eq!(
            crl.revoked_serials(),
            vec![normalize_serial(crate::testutil::LEAF_SERIAL)]
        );
        let intermediate = Cert::parse(&chain.intermediate_der).unwrap();
        let root = Cert::parse(&chain.root_der).unwrap();
        assert!(crl.verify_signed_by(&intermediate));
        assert!(!crl.verify_signed_by(&root));
    }
}
