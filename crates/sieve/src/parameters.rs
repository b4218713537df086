use crate::enzyme::{Enzyme, EnzymeBuilder};
use crate::mass::Tolerance;
use crate::matches::MatchLevel;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deepest match level a project is validated at
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Spectrum,
    Peptide,
    Protein,
}

impl Default for ProjectType {
    fn default() -> Self {
        ProjectType::Protein
    }
}

impl ProjectType {
    pub fn validates(self, level: MatchLevel) -> bool {
        match level {
            MatchLevel::Spectrum => true,
            MatchLevel::Peptide => self >= ProjectType::Peptide,
            MatchLevel::Protein => self == ProjectType::Protein,
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct FdrBuilder {
    pub spectrum: Option<f64>,
    pub peptide: Option<f64>,
    pub protein: Option<f64>,
}

/// Requested FDR per match level, as a fraction
#[derive(Serialize, Copy, Clone, Debug, PartialEq)]
pub struct Fdr {
    pub spectrum: f64,
    pub peptide: f64,
    pub protein: f64,
}

impl Fdr {
    pub fn get(&self, level: MatchLevel) -> f64 {
        match level {
            MatchLevel::Spectrum => self.spectrum,
            MatchLevel::Peptide => self.peptide,
            MatchLevel::Protein => self.protein,
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct TimeoutBuilder {
    pub base_secs: Option<u64>,
    pub per_match_ms: Option<u64>,
}

#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timeout {
    pub base_secs: u64,
    pub per_match_ms: u64,
}

impl Timeout {
    /// Time a pass over `matches` matches may take before it is aborted
    pub fn limit(&self, matches: usize) -> Duration {
        Duration::from_secs(self.base_secs)
            .saturating_add(Duration::from_millis(self.per_match_ms.saturating_mul(matches as u64)))
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct QcBuilder {
    pub precursor_deviation: Option<bool>,
    pub precursor_coverage: Option<f64>,
    pub min_precursor_sample: Option<usize>,
    pub min_validated_spectra: Option<usize>,
    pub min_validated_peptides: Option<usize>,
}

#[derive(Serialize, Copy, Clone, Debug, PartialEq)]
pub struct QcParameters {
    /// Filter spectrum matches on the empirical precursor deviation
    pub precursor_deviation: bool,
    /// Central fraction of validated precursor deviations accepted
    pub precursor_coverage: f64,
    /// Below this many validated deviations the search tolerance is used instead
    pub min_precursor_sample: usize,
    /// Validated spectrum matches a confident peptide needs
    pub min_validated_spectra: usize,
    /// Validated peptides a confident protein group needs
    pub min_validated_peptides: usize,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct SimplificationBuilder {
    pub evidence: Option<bool>,
    pub confidence: Option<bool>,
    pub enzymaticity: Option<bool>,
    pub variants: Option<bool>,
    pub confidence_threshold: Option<f64>,
}

/// Which reasons allow a shared protein group to be simplified
#[derive(Serialize, Copy, Clone, Debug, PartialEq)]
pub struct Simplification {
    pub evidence: bool,
    pub confidence: bool,
    pub enzymaticity: bool,
    pub variants: bool,
    /// Peptide confidence (percent) at or below which a peptide does not
    /// support an accession
    pub confidence_threshold: f64,
}

impl Default for Simplification {
    fn default() -> Self {
        SimplificationBuilder::default().make()
    }
}

impl SimplificationBuilder {
    fn make(self) -> Simplification {
        Simplification {
            evidence: self.evidence.unwrap_or(true),
            confidence: self.confidence.unwrap_or(true),
            enzymaticity: self.enzymaticity.unwrap_or(true),
            variants: self.variants.unwrap_or(true),
            confidence_threshold: self.confidence_threshold.unwrap_or(0.05),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
/// Parameters controlling validation, all optional
pub struct Builder {
    pub project_type: Option<ProjectType>,
    pub fdr: Option<FdrBuilder>,
    /// Percent points added to the confidence limit of a stratum
    pub confidence_margin: Option<f64>,
    /// Stratify spectrum matches by spectrum file as well as charge
    pub separate_files: Option<bool>,
    pub threads: Option<usize>,
    pub timeout: Option<TimeoutBuilder>,
    /// Search tolerance of the precursor
    pub precursor_tol: Option<Tolerance>,
    pub qc: Option<QcBuilder>,
    pub simplification: Option<SimplificationBuilder>,
    pub enzyme: Option<EnzymeBuilder>,
}

impl Builder {
    pub fn make_parameters(self) -> Result<ValidationParameters> {
        let fdr = self.fdr.unwrap_or_default();
        let timeout = self.timeout.unwrap_or_default();
        let qc = self.qc.unwrap_or_default();

        let parameters = ValidationParameters {
            project_type: self.project_type.unwrap_or_default(),
            fdr: Fdr {
                spectrum: fdr.spectrum.unwrap_or(0.01),
                peptide: fdr.peptide.unwrap_or(0.01),
                protein: fdr.protein.unwrap_or(0.01),
            },
            confidence_margin: self.confidence_margin.unwrap_or(1.0),
            separate_files: self.separate_files.unwrap_or(false),
            threads: self.threads.unwrap_or_else(rayon::current_num_threads),
            timeout: Timeout {
                base_secs: timeout.base_secs.unwrap_or(60),
                per_match_ms: timeout.per_match_ms.unwrap_or(1000),
            },
            precursor_tol: self.precursor_tol.unwrap_or_default(),
            qc: QcParameters {
                precursor_deviation: qc.precursor_deviation.unwrap_or(true),
                precursor_coverage: qc.precursor_coverage.unwrap_or(0.99),
                min_precursor_sample: qc.min_precursor_sample.unwrap_or(100),
                min_validated_spectra: qc.min_validated_spectra.unwrap_or(1),
                min_validated_peptides: qc.min_validated_peptides.unwrap_or(1),
            },
            simplification: self.simplification.unwrap_or_default().make(),
            enzyme: self.enzyme.unwrap_or_default(),
        };
        parameters.check()?;
        Ok(parameters)
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct ValidationParameters {
    pub project_type: ProjectType,
    pub fdr: Fdr,
    pub confidence_margin: f64,
    pub separate_files: bool,
    pub threads: usize,
    pub timeout: Timeout,
    pub precursor_tol: Tolerance,
    pub qc: QcParameters,
    pub simplification: Simplification,
    pub enzyme: EnzymeBuilder,
}

impl ValidationParameters {
    fn check(&self) -> Result<()> {
        for level in MatchLevel::ALL {
            let fdr = self.fdr.get(level);
            if !(fdr > 0.0 && fdr <= 1.0) {
                return Err(Error::Parameter(format!(
                    "{} FDR must be within (0, 1], got {}",
                    level, fdr
                )));
            }
        }
        if self.threads == 0 {
            return Err(Error::Parameter("at least one thread is required".into()));
        }
        if !(self.confidence_margin >= 0.0) {
            return Err(Error::Parameter(format!(
                "confidence margin must not be negative, got {}",
                self.confidence_margin
            )));
        }
        if !(self.qc.precursor_coverage > 0.0 && self.qc.precursor_coverage <= 1.0) {
            return Err(Error::Parameter(format!(
                "precursor coverage must be within (0, 1], got {}",
                self.qc.precursor_coverage
            )));
        }
        self.enzyme()?;
        Ok(())
    }

    /// The digestion enzyme, `None` for a non-specific digest
    pub fn enzyme(&self) -> Result<Option<Enzyme>> {
        self.enzyme.build()
    }

    /// FDR used to decide whether a stratum holds enough hits: the smallest
    /// FDR requested at any level
    pub fn minimal_fdr(&self) -> f64 {
        self.fdr.spectrum.min(self.fdr.peptide).min(self.fdr.protein)
    }
}
