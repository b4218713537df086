//! Level by level validation of spectrum matches, peptides and protein groups.
//!
//! Each level is one phase of a [`TaskGroup`]; a phase starts only once the
//! previous one has drained. Within a phase every match is classified against
//! the threshold of its stratum and the QC filters of its level.

use crate::maps::TargetDecoyMaps;
use crate::matches::{MatchKey, MatchLevel, MatchStore, MatchValidation, QcResults, ValidationLevel};
use crate::parameters::ValidationParameters;
use crate::progress::{FaultSink, ProgressHandle};
use crate::qc::{default_filters, PrecursorToleranceFilter, PrecursorWindow, QcContext, QcFilter};
use crate::score::{probability_to_confidence, probability_to_score};
use crate::task::{CancellationToken, TaskGroup};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Threshold of the stratum a match belongs to
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FdrThreshold {
    /// Worst accepted raw score, `None` when the stratum cannot reach the
    /// requested FDR
    pub score: Option<f64>,
    /// Confidence a validated match needs to be confident
    pub confidence_threshold: f64,
}

/// Validation level of a match.
///
/// Returns `None` when the level is frozen by a manual validation. `threshold`
/// is `None` when target/decoy statistics are unavailable for the match.
/// `run_qc` runs all QC filters and is only called for matches within the
/// threshold.
pub fn classify<Q>(
    manual: bool,
    threshold: Option<&FdrThreshold>,
    score: f64,
    confidence: f64,
    run_qc: Q,
) -> Option<ValidationLevel>
where
    Q: FnOnce() -> bool,
{
    if manual {
        return None;
    }
    let threshold = match threshold {
        Some(threshold) => threshold,
        None => return Some(ValidationLevel::None),
    };
    match threshold.score {
        Some(limit) if score <= limit => {
            let passed = run_qc();
            if passed && confidence >= threshold.confidence_threshold {
                Some(ValidationLevel::Confident)
            } else {
                Some(ValidationLevel::Doubtful)
            }
        }
        _ => Some(ValidationLevel::NotValidated),
    }
}

/// Counts of one level after validation
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LevelSummary {
    pub matches: usize,
    pub levels: BTreeMap<ValidationLevel, usize>,
    /// Matches whose level was set manually and left untouched
    pub frozen: usize,
    pub validated_decoys: usize,
}

impl LevelSummary {
    fn add(&mut self, level: ValidationLevel, decoy: bool, frozen: bool) {
        self.matches += 1;
        *self.levels.entry(level).or_insert(0) += 1;
        self.frozen += frozen as usize;
        self.validated_decoys += (decoy && level.is_validated()) as usize;
    }

    fn merge(mut self, other: LevelSummary) -> Self {
        self.matches += other.matches;
        for (level, count) in other.levels {
            *self.levels.entry(level).or_insert(0) += count;
        }
        self.frozen += other.frozen;
        self.validated_decoys += other.validated_decoys;
        self
    }

    pub fn count(&self, level: ValidationLevel) -> usize {
        self.levels.get(&level).copied().unwrap_or_default()
    }
}

/// Per worker accumulator of the PSM calibration pass
#[derive(Default)]
struct Calibration {
    /// ppm deviations of validated target matches
    precursor_errors: Vec<f64>,
    /// Validated matches per search engine
    algorithms: BTreeMap<String, usize>,
}

impl Calibration {
    fn merge(mut self, other: Calibration) -> Self {
        self.precursor_errors.extend(other.precursor_errors);
        for (algorithm, count) in other.algorithms {
            *self.algorithms.entry(algorithm).or_insert(0) += count;
        }
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub levels: BTreeMap<MatchLevel, LevelSummary>,
    /// Precursor window learned from validated spectrum matches
    pub precursor: Option<PrecursorWindow>,
    /// Too few validated spectrum matches: the search tolerance replaced the
    /// empirical precursor window
    pub precursor_fallback: bool,
    pub algorithms: BTreeMap<String, usize>,
}

pub struct ValidationOrchestrator<'a> {
    store: &'a dyn MatchStore,
    maps: &'a TargetDecoyMaps,
    parameters: &'a ValidationParameters,
    filters: Vec<Box<dyn QcFilter>>,
    progress: &'a dyn ProgressHandle,
    faults: &'a dyn FaultSink,
    cancel: CancellationToken,
}

impl<'a> ValidationOrchestrator<'a> {
    /// An orchestrator running the built-in QC filters enabled in `parameters`
    pub fn new(
        store: &'a dyn MatchStore,
        maps: &'a TargetDecoyMaps,
        parameters: &'a ValidationParameters,
        progress: &'a dyn ProgressHandle,
        faults: &'a dyn FaultSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            maps,
            parameters,
            filters: default_filters(&parameters.qc),
            progress,
            faults,
            cancel,
        }
    }

    /// Add a QC filter to the filters of its level
    pub fn with_filter(mut self, filter: Box<dyn QcFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    fn check_canceled(&self) -> Result<()> {
        match self.cancel.is_canceled() || self.progress.is_canceled() {
            true => Err(Error::Canceled),
            false => Ok(()),
        }
    }

    /// Validate every level the project type asks for, spectrum matches first.
    ///
    /// Fails with [`Error::Timeout`] when a phase does not drain in time, and
    /// with [`Error::Canceled`] when the run was canceled or a match could
    /// not be validated; such faults are reported to the fault sink.
    pub fn run(&self) -> Result<ValidationReport> {
        let group = TaskGroup::new(self.parameters.threads, self.cancel.clone());
        let mut report = ValidationReport::default();

        for level in MatchLevel::ALL {
            if !self.parameters.project_type.validates(level) {
                continue;
            }
            self.check_canceled()?;

            let start = Instant::now();
            let keys = self.store.keys(level);
            let limit = self.parameters.timeout.limit(keys.len());
            let mut context = QcContext {
                store: self.store,
                precursor: None,
            };
            let mut fallback = false;

            if level == MatchLevel::Spectrum {
                self.progress.set_text("calibrating spectrum matches");
                self.progress.set_maximum(keys.len());
                self.progress.reset();
                let calibration = self
                    .calibrate(&group, &keys, limit)
                    .map_err(|e| phase_error(e, limit))?;

                let sample = calibration.precursor_errors.len();
                if sample < self.parameters.qc.min_precursor_sample {
                    fallback = self.filters.iter().any(|f| f.requires_precursor_distribution());
                    if fallback {
                        log::warn!(
                            "only {} validated spectrum matches, using the search tolerance as precursor filter",
                            sample
                        );
                    }
                } else {
                    context.precursor = PrecursorWindow::new(
                        calibration.precursor_errors,
                        self.parameters.qc.precursor_coverage,
                    );
                }
                report.precursor = context.precursor;
                report.precursor_fallback = fallback;
                report.algorithms = calibration.algorithms;
            }

            self.check_canceled()?;
            self.progress.set_text(&format!("validating {} matches", level));
            self.progress.set_maximum(keys.len());
            self.progress.reset();

            let fallback_filter = PrecursorToleranceFilter {
                tolerance: self.parameters.precursor_tol,
            };
            let mut filters: Vec<&dyn QcFilter> = Vec::new();
            for filter in self.filters.iter().filter(|f| f.level() == level) {
                if fallback && filter.requires_precursor_distribution() {
                    filters.push(&fallback_filter);
                } else {
                    filters.push(&**filter);
                }
            }

            let remaining = limit.saturating_sub(start.elapsed());
            let summary = self
                .classify_level(&group, level, &keys, remaining, &context, &filters)
                .map_err(|e| phase_error(e, limit))?;

            log::info!(
                "- {} validation: {} ms ({} confident, {} doubtful, {} not validated)",
                level,
                start.elapsed().as_millis(),
                summary.count(ValidationLevel::Confident),
                summary.count(ValidationLevel::Doubtful),
                summary.count(ValidationLevel::NotValidated),
            );
            report.levels.insert(level, summary);
        }
        Ok(report)
    }

    /// Threshold-only pass over the spectrum matches, collecting precursor
    /// deviations of validated targets and per-algorithm tallies
    fn calibrate(&self, group: &TaskGroup, keys: &[MatchKey], limit: Duration) -> Result<Calibration> {
        let accumulators = group.run(
            MatchLevel::Spectrum,
            keys.iter().copied(),
            limit,
            Calibration::default,
            |acc, key| {
                if let Err(e) = self.calibrate_match(acc, key) {
                    self.fault(e);
                }
                self.progress.increase();
            },
        )?;
        Ok(accumulators
            .into_iter()
            .fold(Calibration::default(), Calibration::merge))
    }

    fn calibrate_match(&self, acc: &mut Calibration, key: MatchKey) -> Result<()> {
        let psm = self.store.require_spectrum_match(key)?;
        let threshold = self.maps.spectrum_results(&psm).and_then(|r| r.threshold);
        if let Some(threshold) = threshold {
            if psm.score <= threshold && !psm.decoy {
                acc.precursor_errors.push(psm.precursor_error());
                for algorithm in &psm.algorithms {
                    *acc.algorithms.entry(algorithm.clone()).or_insert(0) += 1;
                }
            }
        }
        Ok(())
    }

    fn classify_level(
        &self,
        group: &TaskGroup,
        level: MatchLevel,
        keys: &[MatchKey],
        limit: Duration,
        context: &QcContext<'_>,
        filters: &[&dyn QcFilter],
    ) -> Result<LevelSummary> {
        let has_decoys = self.maps.has_decoys(level);
        if !has_decoys {
            log::warn!("no {} decoys, target/decoy validation is unavailable", level);
        }
        let accumulators = group.run(
            level,
            keys.iter().copied(),
            limit,
            LevelSummary::default,
            |summary, key| {
                match self.validate(level, key, has_decoys, context, filters) {
                    Ok((validation, decoy, frozen)) => summary.add(validation, decoy, frozen),
                    Err(e) => self.fault(e),
                }
                self.progress.increase();
            },
        )?;
        Ok(accumulators
            .into_iter()
            .fold(LevelSummary::default(), LevelSummary::merge))
    }

    /// Classify one match and store the outcome. Returns the match's level,
    /// decoy status, and whether the level is frozen
    fn validate(
        &self,
        level: MatchLevel,
        key: MatchKey,
        has_decoys: bool,
        context: &QcContext<'_>,
        filters: &[&dyn QcFilter],
    ) -> Result<(ValidationLevel, bool, bool)> {
        let lookup = self.maps.lookup(self.store, level, key)?;
        let previous = self.store.validation(level, key).unwrap_or_default();
        let confidence = probability_to_confidence(lookup.probability);
        let threshold = lookup
            .results
            .filter(|_| has_decoys)
            .map(|results| FdrThreshold {
                score: results.threshold,
                confidence_threshold: (results.confidence_limit + self.parameters.confidence_margin)
                    .min(100.0),
            });

        let mut qc = QcResults::new();
        let mut fault = None;
        let outcome = classify(previous.manual, threshold.as_ref(), lookup.score, confidence, || {
            let mut passed = true;
            for filter in filters {
                match filter.is_validated(key, context) {
                    Ok(ok) => {
                        qc.insert(filter.name().to_string(), ok);
                        passed &= ok;
                    }
                    Err(e) => {
                        fault = Some(e);
                        passed = false;
                    }
                }
            }
            passed
        });
        if let Some(e) = fault {
            return Err(e);
        }

        match outcome {
            None => Ok((previous.level, lookup.decoy, true)),
            Some(validation) => {
                self.store.set_validation(
                    level,
                    key,
                    MatchValidation {
                        level: validation,
                        manual: false,
                        qc,
                        probability: lookup.probability,
                        confidence,
                        score: probability_to_score(lookup.probability),
                    },
                );
                Ok((validation, lookup.decoy, false))
            }
        }
    }

    /// Report a per-match fault and stop the run
    fn fault(&self, error: Error) {
        self.faults.report(error);
        self.cancel.cancel();
    }
}

/// Timeouts carry the limit of the whole phase
fn phase_error(error: Error, limit: Duration) -> Error {
    match error {
        Error::Timeout { level, .. } => Error::Timeout { level, limit },
        error => error,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn threshold(score: Option<f64>, confidence_threshold: f64) -> FdrThreshold {
        FdrThreshold {
            score,
            confidence_threshold,
        }
    }

    #[test]
    fn above_threshold_is_not_validated() {
        let mut qc_ran = false;
        let level = classify(false, Some(&threshold(Some(0.3), 95.0)), 0.5, 99.0, || {
            qc_ran = true;
            true
        });
        assert_eq!(level, Some(ValidationLevel::NotValidated));
        assert!(!qc_ran);
    }

    #[test]
    fn within_threshold_and_confident() {
        let level = classify(false, Some(&threshold(Some(0.3), 95.0)), 0.1, 96.0, || true);
        assert_eq!(level, Some(ValidationLevel::Confident));
    }

    #[test]
    fn doubtful_outcomes() {
        // QC failure
        let level = classify(false, Some(&threshold(Some(0.3), 95.0)), 0.1, 96.0, || false);
        assert_eq!(level, Some(ValidationLevel::Doubtful));
        // low confidence
        let level = classify(false, Some(&threshold(Some(0.3), 95.0)), 0.3, 90.0, || true);
        assert_eq!(level, Some(ValidationLevel::Doubtful));
    }

    #[test]
    fn degenerate_statistics() {
        let level = classify(false, Some(&threshold(None, 95.0)), 0.0, 100.0, || true);
        assert_eq!(level, Some(ValidationLevel::NotValidated));
        let level = classify(false, None, 0.0, 100.0, || true);
        assert_eq!(level, Some(ValidationLevel::None));
    }

    #[test]
    fn manual_levels_are_frozen() {
        assert_eq!(classify(true, Some(&threshold(Some(0.3), 95.0)), 0.1, 96.0, || true), None);
        assert_eq!(classify(true, None, 0.1, 96.0, || true), None);
    }

    #[test]
    fn summaries_merge() {
        let mut a = LevelSummary::default();
        a.add(ValidationLevel::Confident, false, false);
        a.add(ValidationLevel::Doubtful, true, false);
        let mut b = LevelSummary::default();
        b.add(ValidationLevel::Confident, false, true);
        b.add(ValidationLevel::NotValidated, true, false);

        let merged = a.merge(b);
        assert_eq!(merged.matches, 4);
        assert_eq!(merged.count(ValidationLevel::Confident), 2);
        assert_eq!(merged.count(ValidationLevel::None), 0);
        assert_eq!(merged.frozen, 1);
        assert_eq!(merged.validated_decoys, 1);
    }

    #[test]
    fn timeouts_carry_phase_limit() {
        let error = phase_error(
            Error::Timeout {
                level: MatchLevel::Spectrum,
                limit: Duration::from_secs(1),
            },
            Duration::from_secs(60),
        );
        match error {
            Error::Timeout { limit, .. } => assert_eq!(limit, Duration::from_secs(60)),
            _ => panic!("expected a timeout"),
        }
        assert!(matches!(phase_error(Error::Canceled, Duration::ZERO), Error::Canceled));
    }
}
