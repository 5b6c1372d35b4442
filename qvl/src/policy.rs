//! Measurement predicates.
//!
//! A verifier's policy for which workload measurements it trusts. The
//! predicate comes in three shapes: a single expected-value set, an ordered
//! list of sets and/or callbacks (OR semantics), or a bare callback over the
//! parsed quote.

use std::{fmt, sync::Arc};

use crate::quote::Quote;

/// Callback form of the predicate: full access to the parsed quote.
pub type MeasurementCallback = Arc<dyn Fn(&Quote) -> bool + Send + Sync>;

/// Expected measurement values, all hex, compared case-insensitively. Every
/// populated field must match; an empty set matches any quote. Fields that
/// do not exist for the quote's family (e.g. `mr_enclave` on a TDX quote)
/// fail the set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeasurementSet {
    pub mrtd: Option<String>,
    pub rtmr0: Option<String>,
    pub rtmr1: Option<String>,
    pub rtmr2: Option<String>,
    pub rtmr3: Option<String>,
    pub mr_enclave: Option<String>,
    pub mr_signer: Option<String>,
    pub isv_prod_id: Option<u16>,
    pub isv_svn: Option<u16>,
    /// SEV-SNP launch measurement.
    pub measurement: Option<String>,
    pub report_data: Option<String>,
}

impl MeasurementSet {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, quote: &Quote) -> bool {
        let rtmr_matches = |index: usize, expected: &Option<String>| match expected {
            None => true,
            Some(hex) => quote.rtmr(index).is_some_and(|m| m.matches_hex(hex)),
        };

        let field_checks = [
            self.mrtd
                .as_ref()
                .is_none_or(|hex| quote.mr_td().is_some_and(|m| m.matches_hex(hex))),
            rtmr_matches(0, &self.rtmr0),
            rtmr_matches(1, &self.rtmr1),
            rtmr_matches(2, &self.rtmr2),
            rtmr_matches(3, &self.rtmr3),
            self.mr_enclave
                .as_ref()
                .is_none_or(|hex| quote.mr_enclave().is_some_and(|m| m.matches_hex(hex))),
            self.mr_signer
                .as_ref()
                .is_none_or(|hex| quote.mr_signer().is_some_and(|m| m.matches_hex(hex))),
            self.isv_prod_id
                .is_none_or(|expected| quote.isv_prod_id() == Some(expected)),
            self.isv_svn
                .is_none_or(|expected| quote.isv_svn() == Some(expected)),
            self.measurement
                .as_ref()
                .is_none_or(|hex| quote.snp_measurement().is_some_and(|m| m.matches_hex(hex))),
            self.report_data
                .as_ref()
                .is_none_or(|hex| hex.eq_ignore_ascii_case(&quote.report_data().to_hex())),
        ];

        field_checks.into_iter().all(|ok| ok)
    }
}

/// One element of an ordered predicate list.
#[derive(Clone)]
pub enum MeasurementRule {
    Set(MeasurementSet),
    Callback(MeasurementCallback),
}

impl MeasurementRule {
    fn matches(&self, quote: &Quote) -> bool {
        match self {
            Self::Set(set) => set.matches(quote),
            Self::Callback(callback) => callback(quote),
        }
    }
}

impl fmt::Debug for MeasurementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(set) => f.debug_tuple("Set").field(set).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl From<MeasurementSet> for MeasurementRule {
    fn from(set: MeasurementSet) -> Self {
        Self::Set(set)
    }
}

/// The measurement predicate.
#[derive(Clone)]
pub enum MeasurementPolicy {
    /// A single expected-value set.
    Single(MeasurementSet),
    /// OR across the rules; an empty list never matches.
    Any(Vec<MeasurementRule>),
    /// A bare callback.
    Callback(MeasurementCallback),
}

impl MeasurementPolicy {
    /// Convenience constructor for a callback policy.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Quote) -> bool + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    pub fn matches(&self, quote: &Quote) -> bool {
        match self {
            Self::Single(set) => set.matches(quote),
            Self::Any(rules) => rules.iter().any(|rule| rule.matches(quote)),
            Self::Callback(callback) => callback(quote),
        }
    }
}

impl fmt::Debug for MeasurementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(set) => f.debug_tuple("Single").field(set).finish(),
            Self::Any(rules) => f.debug_tuple("Any").field(rules).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}
