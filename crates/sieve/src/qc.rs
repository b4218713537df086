//! Quality control filters a validated match must pass to be confident.

use crate::mass::Tolerance;
use crate::matches::{MatchKey, MatchLevel, MatchStore};
use crate::parameters::QcParameters;
use crate::Result;
use serde::Serialize;

/// Central window of the precursor deviations of validated target matches
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct PrecursorWindow {
    /// ppm
    pub lower: f64,
    /// ppm
    pub upper: f64,
    pub sample: usize,
}

impl PrecursorWindow {
    /// Window holding the central `coverage` fraction of `errors`
    pub fn new(mut errors: Vec<f64>, coverage: f64) -> Option<Self> {
        errors.retain(|e| e.is_finite());
        if errors.is_empty() {
            return None;
        }
        errors.sort_by(|a, b| a.total_cmp(b));
        let n = errors.len() - 1;
        let tail = (1.0 - coverage.clamp(0.0, 1.0)) / 2.0;
        let lo = (tail * n as f64).round() as usize;
        let hi = ((1.0 - tail) * n as f64).round() as usize;
        Some(PrecursorWindow {
            lower: errors[lo.min(n)],
            upper: errors[hi.min(n)],
            sample: errors.len(),
        })
    }

    pub fn contains(&self, ppm: f64) -> bool {
        ppm >= self.lower && ppm <= self.upper
    }
}

/// State shared by all filters of a classification pass
pub struct QcContext<'a> {
    pub store: &'a dyn MatchStore,
    /// Precursor window learned from the calibration pass, if any
    pub precursor: Option<PrecursorWindow>,
}

/// A named predicate over the matches of one level
pub trait QcFilter: Send + Sync {
    fn name(&self) -> &str;

    fn level(&self) -> MatchLevel;

    /// `Err` only when the match (or one of its children) cannot be read
    fn is_validated(&self, key: MatchKey, context: &QcContext<'_>) -> Result<bool>;

    /// Does the filter rely on the empirical precursor deviation distribution?
    fn requires_precursor_distribution(&self) -> bool {
        false
    }
}

/// Spectrum matches whose precursor deviation lies in the empirical window
pub struct PrecursorDeviationFilter;

impl QcFilter for PrecursorDeviationFilter {
    fn name(&self) -> &str {
        "precursor_deviation"
    }

    fn level(&self) -> MatchLevel {
        MatchLevel::Spectrum
    }

    fn is_validated(&self, key: MatchKey, context: &QcContext<'_>) -> Result<bool> {
        let psm = context.store.require_spectrum_match(key)?;
        Ok(context
            .precursor
            .map(|window| window.contains(psm.precursor_error()))
            .unwrap_or(true))
    }

    fn requires_precursor_distribution(&self) -> bool {
        true
    }
}

/// Spectrum matches whose precursor lies within the search tolerance
pub struct PrecursorToleranceFilter {
    pub tolerance: Tolerance,
}

impl QcFilter for PrecursorToleranceFilter {
    fn name(&self) -> &str {
        "precursor_tolerance"
    }

    fn level(&self) -> MatchLevel {
        MatchLevel::Spectrum
    }

    fn is_validated(&self, key: MatchKey, context: &QcContext<'_>) -> Result<bool> {
        let psm = context.store.require_spectrum_match(key)?;
        Ok(self.tolerance.contains(psm.theoretical_mz, psm.experimental_mz))
    }
}

/// Peptides (proteins) supported by at least `minimum` validated spectrum
/// matches (peptides)
pub struct MinimumValidated {
    pub level: MatchLevel,
    pub minimum: usize,
}

impl QcFilter for MinimumValidated {
    fn name(&self) -> &str {
        match self.level {
            MatchLevel::Protein => "validated_peptides",
            _ => "validated_spectra",
        }
    }

    fn level(&self) -> MatchLevel {
        self.level
    }

    fn is_validated(&self, key: MatchKey, context: &QcContext<'_>) -> Result<bool> {
        let store = context.store;
        let validated = match self.level {
            MatchLevel::Spectrum => return Ok(true),
            MatchLevel::Peptide => store
                .require_peptide_match(key)?
                .spectrum_matches
                .iter()
                .filter(|psm| store.validation_level(MatchLevel::Spectrum, **psm).is_validated())
                .count(),
            MatchLevel::Protein => store
                .require_protein_group(key)?
                .peptides
                .iter()
                .filter(|peptide| store.validation_level(MatchLevel::Peptide, **peptide).is_validated())
                .count(),
        };
        Ok(validated >= self.minimum)
    }
}

/// Filter backed by a closure
pub struct FnFilter<F> {
    name: String,
    level: MatchLevel,
    filter: F,
}

impl<F> FnFilter<F>
where
    F: Fn(MatchKey, &QcContext<'_>) -> Result<bool> + Send + Sync,
{
    pub fn new<S: Into<String>>(name: S, level: MatchLevel, filter: F) -> Self {
        Self {
            name: name.into(),
            level,
            filter,
        }
    }
}

impl<F> QcFilter for FnFilter<F>
where
    F: Fn(MatchKey, &QcContext<'_>) -> Result<bool> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> MatchLevel {
        self.level
    }

    fn is_validated(&self, key: MatchKey, context: &QcContext<'_>) -> Result<bool> {
        (self.filter)(key, context)
    }
}

/// The built-in filters enabled by `parameters`
pub fn default_filters(parameters: &QcParameters) -> Vec<Box<dyn QcFilter>> {
    let mut filters: Vec<Box<dyn QcFilter>> = Vec::new();
    if parameters.precursor_deviation {
        filters.push(Box::new(PrecursorDeviationFilter));
    }
    if parameters.min_validated_spectra > 0 {
        filters.push(Box::new(MinimumValidated {
            level: MatchLevel::Peptide,
            minimum: parameters.min_validated_spectra,
        }));
    }
    if parameters.min_validated_peptides > 0 {
        filters.push(Box::new(MinimumValidated {
            level: MatchLevel::Protein,
            minimum: parameters.min_validated_peptides,
        }));
    }
    filters
}
