//! Identification matches and the store that owns them.

use crate::mass::Tolerance;
use crate::{Error, Result};
use dashmap::DashMap;
use fnv::{FnvBuildHasher, FnvHashMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchKey(pub u64);

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLevel {
    Spectrum,
    Peptide,
    Protein,
}

impl MatchLevel {
    pub const ALL: [MatchLevel; 3] = [MatchLevel::Spectrum, MatchLevel::Peptide, MatchLevel::Protein];

    fn index(self) -> usize {
        match self {
            MatchLevel::Spectrum => 0,
            MatchLevel::Peptide => 1,
            MatchLevel::Protein => 2,
        }
    }
}

impl fmt::Display for MatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            MatchLevel::Spectrum => "spectrum",
            MatchLevel::Peptide => "peptide",
            MatchLevel::Protein => "protein",
        };
        f.write_str(level)
    }
}

/// Best peptide-spectrum match of one spectrum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumMatch {
    pub key: MatchKey,
    pub spectrum_file: String,
    pub charge: u8,
    /// Raw search engine score, lower is better
    pub score: f64,
    pub decoy: bool,
    pub theoretical_mz: f64,
    pub experimental_mz: f64,
    /// Search engines that reported this match
    #[serde(default)]
    pub algorithms: Vec<String>,
}

impl SpectrumMatch {
    /// Precursor m/z deviation in ppm
    pub fn precursor_error(&self) -> f64 {
        Tolerance::ppm_error(self.theoretical_mz, self.experimental_mz)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeptideMatch {
    pub key: MatchKey,
    pub sequence: String,
    pub decoy: bool,
    /// Masses of the modifications carried by the peptide
    #[serde(default)]
    pub modifications: Vec<f64>,
    pub spectrum_matches: Vec<MatchKey>,
    /// Accessions of every protein the peptide maps to
    pub proteins: Vec<String>,
    /// Accessions the peptide only maps to through a sequence variant
    #[serde(default)]
    pub variant_accessions: BTreeSet<String>,
}

impl PeptideMatch {
    /// Does the peptide map to `accession` without a sequence variant?
    pub fn maps_directly(&self, accession: &str) -> bool {
        self.proteins.iter().any(|p| p == accession) && !self.variant_accessions.contains(accession)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProteinGroup {
    pub key: MatchKey,
    pub accessions: BTreeSet<String>,
    pub leading_accession: String,
    pub peptides: BTreeSet<MatchKey>,
    pub decoy: bool,
}

impl ProteinGroup {
    /// A group holding more than one accession
    pub fn is_shared(&self) -> bool {
        self.accessions.len() > 1
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    None,
    NotValidated,
    Doubtful,
    Confident,
}

impl Default for ValidationLevel {
    fn default() -> Self {
        ValidationLevel::None
    }
}

impl ValidationLevel {
    pub fn is_validated(self) -> bool {
        matches!(self, ValidationLevel::Doubtful | ValidationLevel::Confident)
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            ValidationLevel::None => "none",
            ValidationLevel::NotValidated => "not_validated",
            ValidationLevel::Doubtful => "doubtful",
            ValidationLevel::Confident => "confident",
        };
        f.write_str(level)
    }
}

/// QC filter name -> passed
pub type QcResults = BTreeMap<String, bool>;

/// Validation state attached to a match
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchValidation {
    pub level: ValidationLevel,
    /// Set by a human reviewer; freezes `level`
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub qc: QcResults,
    /// Posterior error probability
    pub probability: f64,
    pub confidence: f64,
    /// -10 log10 of the raw probability
    pub score: f64,
}

impl Default for MatchValidation {
    fn default() -> Self {
        Self {
            level: ValidationLevel::None,
            manual: false,
            qc: QcResults::new(),
            probability: 1.0,
            confidence: 0.0,
            score: 0.0,
        }
    }
}

impl MatchValidation {
    /// A validation set by hand, which no validation run will overwrite
    pub fn manual(level: ValidationLevel) -> Self {
        Self {
            level,
            manual: true,
            ..Default::default()
        }
    }
}

/// Owner of all matches of a project. Retrieval must be safe while worker
/// threads validate matches in parallel.
pub trait MatchStore: Send + Sync {
    fn spectrum_match(&self, key: MatchKey) -> Option<Arc<SpectrumMatch>>;

    fn peptide_match(&self, key: MatchKey) -> Option<Arc<PeptideMatch>>;

    fn protein_group(&self, key: MatchKey) -> Option<Arc<ProteinGroup>>;

    /// Keys of every match at `level`, in ascending order
    fn keys(&self, level: MatchLevel) -> Vec<MatchKey>;

    fn len(&self, level: MatchLevel) -> usize {
        self.keys(level).len()
    }

    /// Insert `group`, replacing any group stored under the same key
    fn update_protein_group(&self, group: ProteinGroup);

    fn remove_protein_group(&self, key: MatchKey) -> Option<Arc<ProteinGroup>>;

    fn validation(&self, level: MatchLevel, key: MatchKey) -> Option<MatchValidation>;

    fn set_validation(&self, level: MatchLevel, key: MatchKey, validation: MatchValidation);

    fn require_spectrum_match(&self, key: MatchKey) -> Result<Arc<SpectrumMatch>> {
        self.spectrum_match(key).ok_or(Error::MissingMatch {
            level: MatchLevel::Spectrum,
            key,
        })
    }

    fn require_peptide_match(&self, key: MatchKey) -> Result<Arc<PeptideMatch>> {
        self.peptide_match(key).ok_or(Error::MissingMatch {
            level: MatchLevel::Peptide,
            key,
        })
    }

    fn require_protein_group(&self, key: MatchKey) -> Result<Arc<ProteinGroup>> {
        self.protein_group(key).ok_or(Error::MissingMatch {
            level: MatchLevel::Protein,
            key,
        })
    }

    /// Validation level of a match, `None` when it was never validated
    fn validation_level(&self, level: MatchLevel, key: MatchKey) -> ValidationLevel {
        self.validation(level, key)
            .map(|validation| validation.level)
            .unwrap_or_default()
    }
}

/// A [`MatchStore`] holding everything in memory
#[derive(Default)]
pub struct InMemoryMatchStore {
    spectra: FnvHashMap<MatchKey, Arc<SpectrumMatch>>,
    peptides: FnvHashMap<MatchKey, Arc<PeptideMatch>>,
    proteins: DashMap<MatchKey, Arc<ProteinGroup>, FnvBuildHasher>,
    validations: [DashMap<MatchKey, MatchValidation, FnvBuildHasher>; 3],
}

impl InMemoryMatchStore {
    pub fn new(
        spectra: Vec<SpectrumMatch>,
        peptides: Vec<PeptideMatch>,
        proteins: Vec<ProteinGroup>,
    ) -> Self {
        let store = InMemoryMatchStore {
            spectra: spectra.into_iter().map(|m| (m.key, Arc::new(m))).collect(),
            peptides: peptides.into_iter().map(|m| (m.key, Arc::new(m))).collect(),
            ..Default::default()
        };
        for group in proteins {
            store.proteins.insert(group.key, Arc::new(group));
        }
        store
    }
}

impl MatchStore for InMemoryMatchStore {
    fn spectrum_match(&self, key: MatchKey) -> Option<Arc<SpectrumMatch>> {
        self.spectra.get(&key).cloned()
    }

    fn peptide_match(&self, key: MatchKey) -> Option<Arc<PeptideMatch>> {
        self.peptides.get(&key).cloned()
    }

    fn protein_group(&self, key: MatchKey) -> Option<Arc<ProteinGroup>> {
        self.proteins.get(&key).map(|group| group.value().clone())
    }

    fn keys(&self, level: MatchLevel) -> Vec<MatchKey> {
        let mut keys = match level {
            MatchLevel::Spectrum => self.spectra.keys().copied().collect::<Vec<_>>(),
            MatchLevel::Peptide => self.peptides.keys().copied().collect(),
            MatchLevel::Protein => self.proteins.iter().map(|group| *group.key()).collect(),
        };
        keys.sort_unstable();
        keys
    }

    fn len(&self, level: MatchLevel) -> usize {
        match level {
            MatchLevel::Spectrum => self.spectra.len(),
            MatchLevel::Peptide => self.peptides.len(),
            MatchLevel::Protein => self.proteins.len(),
        }
    }

    fn update_protein_group(&self, group: ProteinGroup) {
        self.proteins.insert(group.key, Arc::new(group));
    }

    fn remove_protein_group(&self, key: MatchKey) -> Option<Arc<ProteinGroup>> {
        self.validations[MatchLevel::Protein.index()].remove(&key);
        self.proteins.remove(&key).map(|(_, group)| group)
    }

    fn validation(&self, level: MatchLevel, key: MatchKey) -> Option<MatchValidation> {
        self.validations[level.index()]
            .get(&key)
            .map(|validation| validation.value().clone())
    }

    fn set_validation(&self, level: MatchLevel, key: MatchKey, validation: MatchValidation) {
        self.validations[level.index()].insert(key, validation);
    }
}
