//! Target/decoy score statistics for a single stratum.
//!
//! A [`ScoreStatistic`] collects `(score, decoy)` points, where lower raw
//! scores are better (e-values, probabilities). Once filled, it estimates a
//! posterior error probability (PEP) curve over the score axis and derives the
//! score threshold at which the accepted matches satisfy a requested FDR.
//!
//! Käll, 2008 [https://pubmed.ncbi.nlm.nih.gov/18052118/]

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// A stratum needs at least this many decoys before its own threshold is trusted
pub const MIN_DECOYS: usize = 10;

/// Smallest half width of the sliding window used for PEP estimation
const MIN_WINDOW: usize = 10;

/// Largest score a probability can be converted to
pub const MAX_SCORE: f64 = 100.0;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScorePoint {
    pub score: f64,
    pub decoy: bool,
}

/// Number of target and decoy hits behind a statistic
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub targets: usize,
    pub decoys: usize,
}

impl Tally {
    /// Too few hits to draw a statistically safe threshold at `minimal_fdr`.
    ///
    /// Both conditions are monotone: adding hits to a tally can only turn a
    /// suspicious tally into an unsuspicious one, never the other way around.
    pub fn suspicious(&self, minimal_fdr: f64) -> bool {
        let required_targets = (1.0 / minimal_fdr.max(f64::MIN_POSITIVE)).ceil();
        self.decoys < MIN_DECOYS || (self.targets as f64) < required_targets
    }

    pub fn total(&self) -> usize {
        self.targets + self.decoys
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.targets += rhs.targets;
        self.decoys += rhs.decoys;
    }
}

/// Outcome of thresholding a statistic at a requested FDR
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct TargetDecoyResults {
    /// Requested FDR
    pub fdr: f64,
    /// Worst score still accepted, `None` when the stratum cannot reach the
    /// requested FDR at all
    pub threshold: Option<f64>,
    /// Estimated FDR at the threshold
    pub estimated_fdr: f64,
    /// Number of targets at or below the threshold
    pub validated_targets: usize,
    /// Number of decoys at or below the threshold
    pub validated_decoys: usize,
    /// Confidence of a match scoring exactly at the threshold
    pub confidence_limit: f64,
}

impl TargetDecoyResults {
    pub fn no_validated_data(&self) -> bool {
        self.threshold.is_none()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScoreStatistic {
    points: Vec<ScorePoint>,
    tally: Tally,
    /// `None` until [`ScoreStatistic::estimate_probabilities`] has run;
    /// `Some(vec![])` for an estimated but empty statistic
    curve: Option<Vec<(f64, f64)>>,
    results: Option<TargetDecoyResults>,
}

impl ScoreStatistic {
    pub fn add(&mut self, point: ScorePoint) {
        match point.decoy {
            true => self.tally.decoys += 1,
            false => self.tally.targets += 1,
        }
        self.points.push(point);
        self.curve = None;
        self.results = None;
    }

    /// Fold every point of `other` into this statistic
    pub fn extend(&mut self, other: &ScoreStatistic) {
        self.points.extend_from_slice(&other.points);
        self.tally += other.tally;
        self.curve = None;
        self.results = None;
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn suspicious(&self, minimal_fdr: f64) -> bool {
        self.tally.suspicious(minimal_fdr)
    }

    pub fn is_estimated(&self) -> bool {
        self.curve.is_some()
    }

    pub fn results(&self) -> Option<&TargetDecoyResults> {
        self.results.as_ref()
    }

    /// Sort points best-first. Decoys sort before targets on ties, so that a
    /// threshold never accepts a target while rejecting an equally scored decoy
    fn sort(&mut self) {
        self.points.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| b.decoy.cmp(&a.decoy))
        });
    }

    /// Largest number of targets found between two consecutive decoys
    fn n_max(&self) -> usize {
        let mut n_max = 0;
        let mut run = 0;
        for point in &self.points {
            match point.decoy {
                true => run = 0,
                false => {
                    run += 1;
                    n_max = n_max.max(run);
                }
            }
        }
        n_max
    }

    /// Fit the PEP curve. The curve is non-decreasing towards worse scores
    pub fn estimate_probabilities(&mut self) {
        self.sort();
        let n = self.points.len();
        if n == 0 {
            self.curve = Some(Vec::new());
            return;
        }

        // Prefix sums of decoys make window counts O(1)
        let mut decoy_prefix = Vec::with_capacity(n + 1);
        decoy_prefix.push(0usize);
        for point in &self.points {
            let last = decoy_prefix[decoy_prefix.len() - 1];
            decoy_prefix.push(last + point.decoy as usize);
        }

        let half_width = self.n_max().max(MIN_WINDOW);
        let mut curve: Vec<(f64, f64)> = Vec::new();
        let mut start = 0;
        while start < n {
            let score = self.points[start].score;
            let mut end = start + 1;
            while end < n && self.points[end].score == score {
                end += 1;
            }

            let lo = start.saturating_sub(half_width);
            let hi = (end + half_width).min(n);
            let decoys = decoy_prefix[hi] - decoy_prefix[lo];
            let targets = (hi - lo) - decoys;
            let pep = match targets {
                0 => 1.0,
                _ => (decoys as f64 / targets as f64).min(1.0),
            };
            curve.push((score, pep));
            start = end;
        }

        let mut running = 0.0f64;
        for (_, pep) in curve.iter_mut() {
            running = running.max(*pep);
            *pep = running;
        }
        self.curve = Some(curve);
    }

    /// Posterior error probability of a match with raw `score`.
    ///
    /// Returns 1.0 (indistinguishable from a decoy) before the curve has been
    /// estimated or when the statistic holds no points.
    pub fn probability(&self, score: f64) -> f64 {
        let curve = match &self.curve {
            Some(curve) if !curve.is_empty() => curve,
            _ => return 1.0,
        };

        let idx = curve.partition_point(|(s, _)| *s < score);
        if idx == 0 {
            return curve[0].1;
        }
        if idx == curve.len() {
            return curve[curve.len() - 1].1;
        }
        let (s0, p0) = curve[idx - 1];
        let (s1, p1) = curve[idx];
        if s1 == s0 {
            return p1;
        }
        p0 + (p1 - p0) * (score - s0) / (s1 - s0)
    }

    pub fn confidence(&self, score: f64) -> f64 {
        probability_to_confidence(self.probability(score))
    }

    /// Threshold the statistic at `fdr`, storing and returning the results.
    ///
    /// Assigns q-values on the sorted points: the estimated FDR at each score is
    /// `decoys / targets` accumulated best-first, and the q-value is the minimum
    /// FDR at that score or any worse one.
    pub fn set_fdr(&mut self, fdr: f64) -> TargetDecoyResults {
        if self.curve.is_none() {
            self.estimate_probabilities();
        }

        // (score, targets, decoys, fdr) at each distinct score boundary
        let mut boundaries: Vec<(f64, usize, usize, f64)> = Vec::new();
        let mut targets = 0usize;
        let mut decoys = 0usize;
        let n = self.points.len();
        for (ix, point) in self.points.iter().enumerate() {
            match point.decoy {
                true => decoys += 1,
                false => targets += 1,
            }
            let last_of_score = ix + 1 == n || self.points[ix + 1].score != point.score;
            if last_of_score {
                let estimate = match targets {
                    0 => f64::INFINITY,
                    _ => decoys as f64 / targets as f64,
                };
                boundaries.push((point.score, targets, decoys, estimate));
            }
        }

        // Reverse slice, and calculate the cumulative minimum
        let mut q_min = f64::INFINITY;
        let mut best: Option<(f64, usize, usize, f64)> = None;
        for boundary in boundaries.iter().rev() {
            q_min = q_min.min(boundary.3);
            if q_min <= fdr && best.is_none() {
                best = Some(*boundary);
            }
        }

        let results = match best {
            Some((score, targets, decoys, estimate)) => TargetDecoyResults {
                fdr,
                threshold: Some(score),
                estimated_fdr: estimate.min(1.0),
                validated_targets: targets,
                validated_decoys: decoys,
                confidence_limit: self.confidence(score),
            },
            None => TargetDecoyResults {
                fdr,
                threshold: None,
                estimated_fdr: 1.0,
                validated_targets: 0,
                validated_decoys: 0,
                confidence_limit: 0.0,
            },
        };
        self.results = Some(results);
        results
    }
}

/// Convert a raw probability into a score: `-10 * log10(p)`, at most 100.
///
/// Non-positive probabilities floor at the maximal score of 100.
pub fn probability_to_score(raw: f64) -> f64 {
    if raw <= 0.0 {
        return MAX_SCORE;
    }
    (-10.0 * raw.log10()).min(MAX_SCORE)
}

/// Confidence in percent for a posterior error probability, clamped to [0, 100]
pub fn probability_to_confidence(pep: f64) -> f64 {
    (100.0 * (1.0 - pep)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn point(score: f64, decoy: bool) -> ScorePoint {
        ScorePoint { score, decoy }
    }

    /// 200 targets with scores 0..200, decoys interleaved in the tail
    fn filled() -> ScoreStatistic {
        let mut stat = ScoreStatistic::default();
        for ix in 0..200 {
            stat.add(point(ix as f64, false));
        }
        for ix in 0..40 {
            stat.add(point(120.0 + ix as f64 * 2.0 + 0.5, true));
        }
        stat
    }

    #[test]
    fn tally_counts() {
        let stat = filled();
        assert_eq!(stat.tally(), Tally { targets: 200, decoys: 40 });
        assert_eq!(stat.len(), 240);
    }

    #[test]
    fn suspicious_input() {
        let stat = filled();
        assert!(!stat.suspicious(0.01));
        // Needs 1000 targets for a 0.1% resolution
        assert!(stat.suspicious(0.001));

        let mut few_decoys = ScoreStatistic::default();
        for ix in 0..500 {
            few_decoys.add(point(ix as f64, false));
        }
        for ix in 0..3 {
            few_decoys.add(point(ix as f64 + 0.5, true));
        }
        assert!(few_decoys.suspicious(0.01));
    }

    #[test]
    fn unestimated_probability_is_worst_case() {
        let stat = filled();
        assert_eq!(stat.probability(1.0), 1.0);
        assert!(!stat.is_estimated());

        let mut empty = ScoreStatistic::default();
        empty.estimate_probabilities();
        assert!(empty.is_estimated());
        assert_eq!(empty.probability(1.0), 1.0);
    }

    #[test]
    fn probability_is_monotone() {
        let mut stat = filled();
        stat.estimate_probabilities();
        let mut last = 0.0;
        for ix in 0..400 {
            let p = stat.probability(ix as f64 * 0.5);
            assert!(p >= last, "pep decreased at {}", ix);
            assert!((0.0..=1.0).contains(&p));
            last = p;
        }
        assert!(stat.probability(0.0) < 0.01);
        assert!(stat.probability(190.0) > 0.4);
    }

    #[test]
    fn fdr_threshold() {
        let mut stat = filled();
        let results = stat.set_fdr(0.01);
        // One decoy at 120.5 among 123 targets is still below 1%
        assert_eq!(results.threshold, Some(122.0));
        assert_eq!(results.validated_targets, 123);
        assert_eq!(results.validated_decoys, 1);
        assert!(!results.no_validated_data());
        assert_eq!(stat.results(), Some(&results));

        let results = stat.set_fdr(0.05);
        assert!(results.threshold.unwrap() > 120.0);
        assert!(results.estimated_fdr <= 0.05);
    }

    #[test]
    fn decoy_first_has_no_validated_data() {
        let mut stat = ScoreStatistic::default();
        stat.add(point(0.0, true));
        stat.add(point(1.0, false));
        stat.add(point(2.0, true));
        let results = stat.set_fdr(0.01);
        assert!(results.no_validated_data());
        assert_eq!(results.confidence_limit, 0.0);
    }

    #[test]
    fn score_conversion() {
        assert_eq!(probability_to_score(0.0), 100.0);
        assert_eq!(probability_to_score(-1.0), 100.0);
        assert_eq!(probability_to_score(1e-20), 100.0);
        assert!((probability_to_score(0.01) - 20.0).abs() < 1e-9);
        assert!(probability_to_score(1.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(probability_to_confidence(0.0), 100.0);
        assert_eq!(probability_to_confidence(1.5), 0.0);
        assert_eq!(probability_to_confidence(-0.5), 100.0);
        assert!((probability_to_confidence(0.04) - 96.0).abs() < 1e-9);
    }

    #[quickcheck]
    fn score_is_non_increasing(a: f64, b: f64) -> bool {
        if a.is_nan() || b.is_nan() {
            return true;
        }
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        probability_to_score(lo) >= probability_to_score(hi)
    }

    #[quickcheck]
    fn merged_tally_stays_unsuspicious(targets: u16, decoys: u8, extra: u8) -> bool {
        let base = Tally { targets: targets as usize, decoys: decoys as usize };
        let mut merged = base;
        merged += Tally { targets: extra as usize, decoys: extra as usize };
        base.suspicious(0.01) || !merged.suspicious(0.01)
    }
}
