//! Synthetic attestation fixtures for tests.
//!
//! Vendor-signed quotes can't be minted offline, so tests exercise the full
//! verification path against a synthetic vendor: an rcgen-built three-cert
//! chain (root CA, intermediate CA, leaf) with real ECDSA signatures, and
//! quote bytes assembled field-for-field per the codec layouts and signed
//! with real attestation keys. Verification runs with the `pinned_roots`
//! override pointed at the synthetic root, which is exactly the override's
//! purpose.

use ring::{
    rand::SystemRandom,
    signature::{
        EcdsaKeyPair, KeyPair as _, ECDSA_P256_SHA256_FIXED_SIGNING,
        ECDSA_P384_SHA384_FIXED_SIGNING,
    },
};

use crate::{
    quote::{sgx::SGX_REPORT_BODY_LEN, snp::SNP_REPORT_LEN, QUOTE_HEADER_LEN, TEE_TYPE_TDX},
    roots::PinnedRoots,
    sha256,
};

/// OID arcs of the Intel SGX PCK extension and its TCB sub-entries.
const PCK_EXT_OID: &[u64] = &[1, 2, 840, 113741, 1, 13, 1];

/// Which vendor shape to mimic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChainKind {
    /// P-256 chain; the leaf carries the PCK extension (Intel PCK shape).
    IntelP256,
    /// P-384 chain named ARK/ASK/VCEK (AMD shape; the test chain signs with
    /// ECDSA-P384 rather than AMD's RSA-PSS, both of which the engine
    /// accepts by OID).
    AmdP384,
}

/// A three-certificate chain with signing keys, usable both as embedded
/// quote cert data and as `extra_certs`.
pub struct TestChain {
    pub kind: ChainKind,
    pub root_der: Vec<u8>,
    pub root_pem: String,
    pub intermediate_der: Vec<u8>,
    pub intermediate_pem: String,
    pub leaf_der: Vec<u8>,
    pub leaf_pem: String,
    root_params: rcgen::CertificateParams,
    root_key: rcgen::KeyPair,
    intermediate_params: rcgen::CertificateParams,
    intermediate_key: rcgen::KeyPair,
    leaf_key: rcgen::KeyPair,
}

/// Serial bytes assigned to each chain position.
pub const ROOT_SERIAL: &[u8] = &[0xA1, 0x01];
pub const INTERMEDIATE_SERIAL: &[u8] = &[0xA2, 0x02];
pub const LEAF_SERIAL: &[u8] = &[0xA3, 0x03];

/// Default FMSPC baked into the test PCK extension.
pub const TEST_FMSPC: [u8; 6] = [0x00, 0x90, 0x6E, 0xA1, 0x00, 0x00];

fn base_params(common_name: &str, serial: &[u8]) -> rcgen::CertificateParams {
    let mut params = rcgen::CertificateParams::default();
    params.not_before = rcgen::date_time_ymd(2024, 1, 1);
    params.not_after = rcgen::date_time_ymd(2034, 1, 1);
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    params.serial_number = Some(rcgen::SerialNumber::from(serial.to_vec()));
    params.key_identifier_method = rcgen::KeyIdMethod::Sha256;
    params
}

/// DER content of a synthetic Intel SGX PCK extension: TCB entry (component
/// SVNs, PCESVN, CPUSVN) plus FMSPC.
pub fn pck_extension_content(fmspc: &[u8; 6], cpu_svn: &[u8; 16], pce_svn: u16) -> Vec<u8> {
    let arc_oid = |tail: &[u64]| {
        let mut arcs = PCK_EXT_OID.to_vec();
        arcs.extend_from_slice(tail);
        yasna::models::ObjectIdentifier::from_slice(&arcs)
    };

    yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            // TCB
            writer.next().write_sequence(|writer| {
                writer.next().write_oid(&arc_oid(&[2]));
                writer.next().write_sequence(|writer| {
                    for (i, svn) in cpu_svn.iter().enumerate() {
                        writer.next().write_sequence(|writer| {
                            writer.next().write_oid(&arc_oid(&[2, i as u64 + 1]));
                            writer.next().write_u32(u32::from(*svn));
                        });
                    }
                    writer.next().write_sequence(|writer| {
                        writer.next().write_oid(&arc_oid(&[2, 17]));
                        writer.next().write_u32(u32::from(pce_svn));
                    });
                    writer.next().write_sequence(|writer| {
                        writer.next().write_oid(&arc_oid(&[2, 18]));
                        writer.next().write_bytes(cpu_svn);
                    });
                });
            });
            // FMSPC
            writer.next().write_sequence(|writer| {
                writer.next().write_oid(&arc_oid(&[4]));
                writer.next().write_bytes(fmspc);
            });
        })
    })
}

impl TestChain {
    pub fn new(kind: ChainKind) -> Self {
        let (alg, root_cn, intermediate_cn, leaf_cn): (_, &str, &str, &str) = match kind {
            ChainKind::IntelP256 => (
                &rcgen::PKCS_ECDSA_P256_SHA256,
                "Test SGX Root CA",
                "Test SGX PCK Platform CA",
                "Test SGX PCK Certificate",
            ),
            ChainKind::AmdP384 => (
                &rcgen::PKCS_ECDSA_P384_SHA384,
                "Test ARK-Milan",
                "Test SEV-Milan",
                "Test SEV-VCEK",
            ),
        };

        let root_key = rcgen::KeyPair::generate_for(alg).expect("generate root key");
        let intermediate_key = rcgen::KeyPair::generate_for(alg).expect("generate ca key");
        let leaf_key = rcgen::KeyPair::generate_for(alg).expect("generate leaf key");

        let mut root_params = base_params(root_cn, ROOT_SERIAL);
        root_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

        let mut intermediate_params = base_params(intermediate_cn, INTERMEDIATE_SERIAL);
        intermediate_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

        let mut leaf_params = base_params(leaf_cn, LEAF_SERIAL);
        if kind == ChainKind::IntelP256 {
            leaf_params
                .custom_extensions
                .push(rcgen::CustomExtension::from_oid_content(
                    PCK_EXT_OID,
                    pck_extension_content(&TEST_FMSPC, &[2u8; 16], 11),
                ));
        }

        let (root_cert, intermediate_cert) = {
            let root_issuer = rcgen::Issuer::from_params(&root_params, &root_key);
            let root_cert = root_params
                .clone()
                .signed_by(&root_key, &root_issuer)
                .expect("sign root");
            let intermediate_cert = intermediate_params
                .clone()
                .signed_by(&intermediate_key, &root_issuer)
                .expect("sign intermediate");
            (root_cert, intermediate_cert)
        };
        let leaf_cert = {
            let intermediate_issuer =
                rcgen::Issuer::from_params(&intermediate_params, &intermediate_key);
            leaf_params
                .signed_by(&leaf_key, &intermediate_issuer)
                .expect("sign leaf")
        };

        Self {
            kind,
            root_der: root_cert.der().to_vec(),
            root_pem: root_cert.pem(),
            intermediate_der: intermediate_cert.der().to_vec(),
            intermediate_pem: intermediate_cert.pem(),
            leaf_der: leaf_cert.der().to_vec(),
            leaf_pem: leaf_cert.pem(),
            root_params,
            root_key,
            intermediate_params,
            intermediate_key,
            leaf_key,
        }
    }

    /// The whole chain as concatenated PEM, leaf first (the order Intel
    /// embeds PCK chains in).
    pub fn chain_pem(&self) -> String {
        format!("{}{}{}", self.leaf_pem, self.intermediate_pem, self.root_pem)
    }

    /// Chain PEM without one position, for completeness tests.
    pub fn chain_pem_without(&self, position: ChainPosition) -> String {
        let parts = [
            (&self.leaf_pem, ChainPosition::Leaf),
            (&self.intermediate_pem, ChainPosition::Intermediate),
            (&self.root_pem, ChainPosition::Root),
        ];
        parts
            .iter()
            .filter(|(_, p)| *p != position)
            .map(|(pem, _)| pem.as_str())
            .collect()
    }

    /// The pinned-roots override trusting this chain's root.
    pub fn pinned_roots(&self) -> PinnedRoots {
        PinnedRoots::from_pem(&self.root_pem).expect("test root parses")
    }

    /// The leaf's signing key as a `ring` keypair for raw signatures.
    pub fn leaf_ring_key(&self) -> EcdsaKeyPair {
        let alg = match self.kind {
            ChainKind::IntelP256 => &ECDSA_P256_SHA256_FIXED_SIGNING,
            ChainKind::AmdP384 => &ECDSA_P384_SHA384_FIXED_SIGNING,
        };
        EcdsaKeyPair::from_pkcs8(alg, &self.leaf_key.serialize_der(), &SystemRandom::new())
            .expect("leaf key imports into ring")
    }

    /// A DER CRL signed by the given chain position, revoking `serials`.
    pub fn crl(&self, signer: CrlSigner, serials: &[&[u8]]) -> Vec<u8> {
        let revoked_certs = serials
            .iter()
            .map(|serial| rcgen::RevokedCertParams {
                serial_number: rcgen::SerialNumber::from(serial.to_vec()),
                revocation_time: rcgen::date_time_ymd(2025, 1, 1),
                reason_code: Some(rcgen::RevocationReason::Unspecified),
                invalidity_date: None,
            })
            .collect();
        let params = rcgen::CertificateRevocationListParams {
            this_update: rcgen::date_time_ymd(2025, 1, 1),
            next_update: rcgen::date_time_ymd(2035, 1, 1),
            crl_number: rcgen::SerialNumber::from(vec![0x01]),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: rcgen::KeyIdMethod::Sha256,
        };
        let (issuer_params, issuer_key) = match signer {
            CrlSigner::Root => (&self.root_params, &self.root_key),
            CrlSigner::Intermediate => (&self.intermediate_params, &self.intermediate_key),
        };
        let issuer = rcgen::Issuer::from_params(issuer_params, issuer_key);
        params.signed_by(&issuer).expect("sign CRL").der().to_vec()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChainPosition {
    Leaf,
    Intermediate,
    Root,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CrlSigner {
    Root,
    Intermediate,
}

/// A freshly generated ECDSA-P256 attestation key.
pub struct AttestationKey {
    key: EcdsaKeyPair,
    rng: SystemRandom,
}

impl AttestationKey {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("generate attestation key");
        let key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .expect("attestation key imports");
        Self { key, rng }
    }

    /// The raw 64-byte uncompressed point, as embedded in quotes.
    pub fn public_key_64(&self) -> [u8; 64] {
        let uncompressed = self.key.public_key().as_ref();
        <[u8; 64]>::try_from(&uncompressed[1..]).expect("P-256 point is 65 bytes")
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let sig = self.key.sign(&self.rng, message).expect("sign");
        <[u8; 64]>::try_from(sig.as_ref()).expect("P-256 fixed signature is 64 bytes")
    }
}

// --- Quote builders --- //

/// Adjustable fields of a synthetic quote's report body.
#[derive(Clone)]
pub struct QuoteParams {
    pub report_data: [u8; 64],
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub mr_td: [u8; 48],
    pub rtmrs: [[u8; 48]; 4],
}

impl Default for QuoteParams {
    fn default() -> Self {
        Self {
            report_data: [0u8; 64],
            mr_enclave: [0x11; 32],
            mr_signer: [0x22; 32],
            isv_prod_id: 1,
            isv_svn: 1,
            mr_td: [0x33; 48],
            rtmrs: [[0x40; 48], [0x41; 48], [0x42; 48], [0x43; 48]],
        }
    }
}

fn encode_header(version: u16, tee_type: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(QUOTE_HEADER_LEN);
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // ECDSA-P256
    out.extend_from_slice(&tee_type.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // qe_svn
    out.extend_from_slice(&1u16.to_le_bytes()); // pce_svn
    out.extend_from_slice(&[0x51; 16]); // qe_vendor_id
    out.extend_from_slice(&[0u8; 20]); // user_data
    debug_assert_eq!(out.len(), QUOTE_HEADER_LEN);
    out
}

fn encode_sgx_body(params: &QuoteParams, cpu_svn: &[u8; 16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SGX_REPORT_BODY_LEN);
    out.extend_from_slice(cpu_svn);
    out.extend_from_slice(&0u32.to_le_bytes()); // misc_select
    out.extend_from_slice(&[0u8; 28]);
    out.extend_from_slice(&[0u8; 16]); // attributes
    out.extend_from_slice(&params.mr_enclave);
    out.extend_from_slice(&[0u8; 32]);
    out.extend_from_slice(&params.mr_signer);
    out.extend_from_slice(&[0u8; 96]);
    out.extend_from_slice(&params.isv_prod_id.to_le_bytes());
    out.extend_from_slice(&params.isv_svn.to_le_bytes());
    out.extend_from_slice(&[0u8; 60]);
    out.extend_from_slice(&params.report_data);
    debug_assert_eq!(out.len(), SGX_REPORT_BODY_LEN);
    out
}

fn encode_tdx_body(params: &QuoteParams) -> Vec<u8> {
    let mut out = Vec::with_capacity(584);
    out.extend_from_slice(&[2u8; 16]); // tee_tcb_svn
    out.extend_from_slice(&[0x60; 48]); // mr_seam
    out.extend_from_slice(&[0u8; 48]); // mr_seam_signer
    out.extend_from_slice(&[0u8; 8]); // seam_attributes
    out.extend_from_slice(&[0u8; 8]); // td_attributes
    out.extend_from_slice(&[0u8; 8]); // xfam
    out.extend_from_slice(&params.mr_td);
    out.extend_from_slice(&[0u8; 48]); // mr_config_id
    out.extend_from_slice(&[0u8; 48]); // mr_owner
    out.extend_from_slice(&[0u8; 48]); // mr_owner_config
    for rtmr in &params.rtmrs {
        out.extend_from_slice(rtmr);
    }
    out.extend_from_slice(&params.report_data);
    debug_assert_eq!(out.len(), 584);
    out
}

/// The QE report + certification data tail shared by SGX and TDX quotes.
fn encode_qe_and_cert_data(
    chain: &TestChain,
    att_pk: &[u8; 64],
    cert_data_pem: &str,
) -> Vec<u8> {
    let qe_auth_data: &[u8] = b"test qe auth data";

    // QE report binds the attestation key.
    let mut qe_report_params = QuoteParams {
        mr_enclave: [0x77; 32],
        mr_signer: [0x78; 32],
        ..QuoteParams::default()
    };
    let binding = sha256::digest_many(&[att_pk.as_slice(), qe_auth_data]);
    qe_report_params.report_data[..32].copy_from_slice(&binding);
    let qe_report = encode_sgx_body(&qe_report_params, &[1u8; 16]);

    let pck_key = chain.leaf_ring_key();
    let qe_report_sig = pck_key
        .sign(&SystemRandom::new(), &qe_report)
        .expect("sign QE report");

    let mut out = Vec::new();
    out.extend_from_slice(&qe_report);
    out.extend_from_slice(qe_report_sig.as_ref());
    out.extend_from_slice(&(qe_auth_data.len() as u16).to_le_bytes());
    out.extend_from_slice(qe_auth_data);
    out.extend_from_slice(&5u16.to_le_bytes()); // PCK cert chain
    out.extend_from_slice(&(cert_data_pem.len() as u32).to_le_bytes());
    out.extend_from_slice(cert_data_pem.as_bytes());
    out
}

fn assemble_intel_quote(
    signed_region: Vec<u8>,
    att_key: &AttestationKey,
    qe_tail: Vec<u8>,
    wrap_in_type6: bool,
) -> Vec<u8> {
    let signature = att_key.sign(&signed_region);

    let mut sig_data = Vec::new();
    sig_data.extend_from_slice(&signature);
    sig_data.extend_from_slice(&att_key.public_key_64());
    if wrap_in_type6 {
        sig_data.extend_from_slice(&6u16.to_le_bytes());
        sig_data.extend_from_slice(&(qe_tail.len() as u32).to_le_bytes());
    }
    sig_data.extend_from_slice(&qe_tail);

    let mut quote = signed_region;
    quote.extend_from_slice(&(sig_data.len() as u32).to_le_bytes());
    quote.extend_from_slice(&sig_data);
    quote
}

/// Build a complete, correctly signed SGX v3 quote with the chain embedded
/// as type-5 cert data.
pub fn build_sgx_quote(chain: &TestChain, params: &QuoteParams) -> Vec<u8> {
    assert_eq!(chain.kind, ChainKind::IntelP256);
    let att_key = AttestationKey::generate();

    let mut signed_region = encode_header(3, 0);
    signed_region.extend_from_slice(&encode_sgx_body(params, &[2u8; 16]));

    let qe_tail = encode_qe_and_cert_data(chain, &att_key.public_key_64(), &chain.chain_pem());
    assemble_intel_quote(signed_region, &att_key, qe_tail, false)
}

/// Build a complete, correctly signed TDX v4 quote.
pub fn build_tdx_quote_v4(chain: &TestChain, params: &QuoteParams) -> Vec<u8> {
    build_tdx_quote_v4_with_chain_pem(chain, params, &chain.chain_pem())
}

/// Build a TDX v4 quote with explicit embedded cert data (possibly an
/// incomplete chain, for completeness tests).
pub fn build_tdx_quote_v4_with_chain_pem(
    chain: &TestChain,
    params: &QuoteParams,
    cert_data_pem: &str,
) -> Vec<u8> {
    assert_eq!(chain.kind, ChainKind::IntelP256);
    let att_key = AttestationKey::generate();

    let mut signed_region = encode_header(4, TEE_TYPE_TDX);
    signed_region.extend_from_slice(&encode_tdx_body(params));

    let qe_tail = encode_qe_and_cert_data(chain, &att_key.public_key_64(), cert_data_pem);
    assemble_intel_quote(signed_region, &att_key, qe_tail, true)
}

/// Build a complete, correctly signed TDX v5 quote (TD 1.0 body).
pub fn build_tdx_quote_v5(chain: &TestChain, params: &QuoteParams) -> Vec<u8> {
    assert_eq!(chain.kind, ChainKind::IntelP256);
    let att_key = AttestationKey::generate();

    let mut signed_region = encode_header(5, TEE_TYPE_TDX);
    signed_region.extend_from_slice(&1u16.to_le_bytes()); // TD 1.0
    signed_region.extend_from_slice(&584u32.to_le_bytes());
    signed_region.extend_from_slice(&encode_tdx_body(params));

    let qe_tail = encode_qe_and_cert_data(chain, &att_key.public_key_64(), &chain.chain_pem());
    assemble_intel_quote(signed_region, &att_key, qe_tail, true)
}

/// Adjustable fields of a synthetic SNP report.
#[derive(Clone)]
pub struct SnpParams {
    pub version: u32,
    pub vmpl: u32,
    pub signature_algo: u32,
    pub policy: u64,
    pub report_data: [u8; 64],
    pub measurement: [u8; 48],
    pub host_data: [u8; 32],
}

impl Default for SnpParams {
    fn default() -> Self {
        Self {
            version: 2,
            vmpl: 0,
            signature_algo: 1,
            policy: 0x3_0000,
            report_data: [0u8; 64],
            measurement: [0x55; 48],
            host_data: [0x66; 32],
        }
    }
}

/// Build a complete SEV-SNP report signed by the chain's VCEK leaf.
pub fn build_snp_report(chain: &TestChain, params: &SnpParams) -> Vec<u8> {
    assert_eq!(chain.kind, ChainKind::AmdP384);

    let mut report = vec![0u8; SNP_REPORT_LEN];
    report[0x00..0x04].copy_from_slice(&params.version.to_le_bytes());
    report[0x04..0x08].copy_from_slice(&1u32.to_le_bytes()); // guest_svn
    report[0x08..0x10].copy_from_slice(&params.policy.to_le_bytes());
    report[0x30..0x34].copy_from_slice(&params.vmpl.to_le_bytes());
    report[0x34..0x38].copy_from_slice(&params.signature_algo.to_le_bytes());
    // current_tcb: boot_loader=3, tee=0, snp=8, microcode=115
    report[0x38] = 3;
    report[0x3E] = 8;
    report[0x3F] = 115;
    report[0x50..0x90].copy_from_slice(&params.report_data);
    report[0x90..0xC0].copy_from_slice(&params.measurement);
    report[0xC0..0xE0].copy_from_slice(&params.host_data);
    report[0x1A0..0x1E0].copy_from_slice(&[0x77; 64]); // chip_id

    let vcek = chain.leaf_ring_key();
    let sig = vcek
        .sign(&SystemRandom::new(), &report[..0x2A0])
        .expect("sign SNP report");
    let sig = sig.as_ref();
    assert_eq!(sig.len(), 96);
    // fixed big-endian r || s -> little-endian 72-byte fields
    for (i, b) in sig[..48].iter().enumerate() {
        report[0x2A0 + 47 - i] = *b;
    }
    for (i, b) in sig[48..].iter().enumerate() {
        report[0x2E8 + 47 - i] = *b;
    }
    report
}
