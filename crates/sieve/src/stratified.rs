//! Target/decoy statistics stratified by match category.
//!
//! Separate statistics per charge, spectrum file or modification profile
//! sharpen the FDR estimate, but sparse strata do not hold enough decoys to
//! draw a safe threshold on their own. [`StratifiedScoreMap::clean`] groups
//! such strata with their neighbours (or into a shared dustbin) so that every
//! representative statistic keeps enough statistical power.

use crate::score::{probability_to_confidence, ScorePoint, ScoreStatistic, Tally, TargetDecoyResults};
use dashmap::DashMap;
use fnv::{FnvBuildHasher, FnvHashMap};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Composite key of a stratum. The natural ordering of the key defines
/// adjacency when sparse strata cascade into each other.
pub trait Stratum: Clone + Eq + Hash + Ord + Send + Sync + Debug {
    /// Coarser stratum that a suspicious sub-stratum folds into before the
    /// top-level strata are grouped
    fn parent(&self) -> Option<Self> {
        None
    }
}

/// Single-stratum maps
impl Stratum for () {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupingStrategy<K> {
    /// Suspicious strata chain into the closest preceding suspicious stratum
    /// until the pooled statistic is no longer suspicious
    Cascade,
    /// Suspicious strata without natural adjacency all land in one catch-all
    /// stratum
    Dustbin(K),
}

/// Maps a suspicious stratum onto the stratum whose statistic represents it.
///
/// Entries are only ever appended while cleaning, and always point at a stratum
/// that was visited earlier or that is not grouped itself, so chains cannot
/// cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupingTable<K: Stratum> {
    entries: FnvHashMap<K, K>,
}

impl<K: Stratum> Default for GroupingTable<K> {
    fn default() -> Self {
        Self {
            entries: FnvHashMap::default(),
        }
    }
}

impl<K: Stratum> GroupingTable<K> {
    fn insert(&mut self, stratum: K, representative: K) {
        debug_assert!(stratum != representative);
        debug_assert!(!self.entries.contains_key(&stratum));
        self.entries.insert(stratum, representative);
    }

    pub fn get(&self, stratum: &K) -> Option<&K> {
        self.entries.get(stratum)
    }

    pub fn contains(&self, stratum: &K) -> bool {
        self.entries.contains_key(stratum)
    }

    /// Follow the chain starting at `stratum` to its final representative
    pub fn resolve(&self, stratum: &K) -> K {
        let mut current = stratum;
        // A chain can't be longer than the table
        for _ in 0..=self.entries.len() {
            match self.entries.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.clone()
    }

    /// Point every entry directly at its final representative
    fn collapse(&mut self) {
        let collapsed = self
            .entries
            .keys()
            .map(|stratum| (stratum.clone(), self.resolve(stratum)))
            .collect();
        self.entries = collapsed;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &K)> {
        self.entries.iter()
    }
}

pub struct StratifiedScoreMap<K: Stratum> {
    strategy: GroupingStrategy<K>,
    /// Statistics exactly as filled, never modified by grouping
    statistics: DashMap<K, ScoreStatistic, FnvBuildHasher>,
    /// Statistics of representatives that absorbed grouped strata
    pooled: FnvHashMap<K, ScoreStatistic>,
    grouping: GroupingTable<K>,
}

impl<K: Stratum> StratifiedScoreMap<K> {
    pub fn new(strategy: GroupingStrategy<K>) -> Self {
        Self {
            strategy,
            statistics: DashMap::default(),
            pooled: FnvHashMap::default(),
            grouping: GroupingTable::default(),
        }
    }

    pub fn cascade() -> Self {
        Self::new(GroupingStrategy::Cascade)
    }

    pub fn dustbin(dustbin: K) -> Self {
        Self::new(GroupingStrategy::Dustbin(dustbin))
    }

    /// Record a point for `stratum`, creating its statistic on first use.
    ///
    /// Safe to call concurrently; creation of a new stratum is guarded by the
    /// map's shard lock, so two threads never create the same statistic twice.
    pub fn add_point(&self, stratum: K, score: f64, decoy: bool) {
        self.statistics
            .entry(stratum)
            .or_default()
            .add(ScorePoint { score, decoy });
    }

    /// All observed strata, in their natural order
    pub fn strata(&self) -> Vec<K> {
        let mut strata = self
            .statistics
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        strata.sort();
        strata
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty()
    }

    /// Target and decoy counts summed over every stratum
    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        for entry in self.statistics.iter() {
            tally += entry.value().tally();
        }
        tally
    }

    /// Target/decoy statistics are only meaningful when decoys were observed
    pub fn has_decoys(&self) -> bool {
        self.tally().decoys > 0
    }

    pub fn grouping(&self) -> &GroupingTable<K> {
        &self.grouping
    }

    /// Group suspicious strata so that representatives can be trusted at
    /// `minimal_fdr`.
    ///
    /// Sub-strata (strata with a parent) fold into their parent first. The
    /// remaining strata are then visited in ascending order and grouped
    /// according to the map's [`GroupingStrategy`]. A parent pool that is
    /// still suspicious afterwards joins a safe sub-stratum. Cleaning starts
    /// from the filled statistics every time, so calling it again with the
    /// same FDR yields the same grouping.
    pub fn clean(&mut self, minimal_fdr: f64) {
        let mut grouping = GroupingTable::default();

        let mut top: BTreeMap<K, Tally> = BTreeMap::new();
        let mut substrata = Vec::new();
        for stratum in self.strata() {
            let tally = match self.statistics.get(&stratum) {
                Some(statistic) => statistic.tally(),
                None => continue,
            };
            match stratum.parent() {
                Some(parent) if tally.suspicious(minimal_fdr) => {
                    *top.entry(parent.clone()).or_default() += tally;
                    grouping.insert(stratum, parent);
                }
                Some(_) => substrata.push((stratum, tally)),
                None => *top.entry(stratum).or_default() += tally,
            }
        }

        let entries = top.into_iter().collect::<Vec<_>>();
        match &self.strategy {
            GroupingStrategy::Cascade => cascade(&entries, minimal_fdr, &mut grouping),
            GroupingStrategy::Dustbin(dustbin) => {
                group_into_dustbin(&entries, dustbin, minimal_fdr, &mut grouping)
            }
        }
        fold_into_substrata(&entries, &substrata, minimal_fdr, &mut grouping);
        grouping.collapse();

        let suspicious = entries
            .iter()
            .filter(|(stratum, _)| !grouping.contains(stratum))
            .count();
        log::trace!(
            "grouped {} of {} strata into {} representatives",
            grouping.len(),
            self.statistics.len(),
            suspicious
        );

        self.pooled = self.pool(&grouping);
        self.grouping = grouping;
    }

    fn pool(&self, grouping: &GroupingTable<K>) -> FnvHashMap<K, ScoreStatistic> {
        let mut pooled: FnvHashMap<K, ScoreStatistic> = FnvHashMap::default();
        for (member, representative) in grouping.iter() {
            let pool = pooled.entry(representative.clone()).or_insert_with(|| {
                self.statistics
                    .get(representative)
                    .map(|statistic| statistic.value().clone())
                    .unwrap_or_default()
            });
            if let Some(statistic) = self.statistics.get(member) {
                pool.extend(statistic.value());
            }
        }
        pooled
    }

    /// The stratum whose statistic answers queries for `stratum`
    pub fn corrected_key(&self, stratum: &K) -> K {
        self.grouping.resolve(stratum)
    }

    fn contains_statistic(&self, stratum: &K) -> bool {
        self.pooled.contains_key(stratum) || self.statistics.contains_key(stratum)
    }

    /// Resolve the representative of `stratum`, falling back to the
    /// representative of its parent when the stratum itself was never observed
    fn representative_key(&self, stratum: &K) -> Option<K> {
        let key = self.corrected_key(stratum);
        if self.contains_statistic(&key) {
            return Some(key);
        }
        let parent = self.corrected_key(&stratum.parent()?);
        self.contains_statistic(&parent).then(|| parent)
    }

    /// Run `f` against the representative statistic of `stratum`
    pub fn with_statistic<R>(&self, stratum: &K, f: impl FnOnce(&ScoreStatistic) -> R) -> Option<R> {
        let key = self.representative_key(stratum)?;
        match self.pooled.get(&key) {
            Some(statistic) => Some(f(statistic)),
            None => self.statistics.get(&key).map(|statistic| f(statistic.value())),
        }
    }

    /// Posterior error probability of `score` in `stratum`; 1.0 when no
    /// statistic covers the stratum
    pub fn probability(&self, stratum: &K, score: f64) -> f64 {
        self.with_statistic(stratum, |statistic| statistic.probability(score))
            .unwrap_or(1.0)
    }

    pub fn confidence(&self, stratum: &K, score: f64) -> f64 {
        probability_to_confidence(self.probability(stratum, score))
    }

    /// Thresholding results of the representative of `stratum`
    pub fn results(&self, stratum: &K) -> Option<TargetDecoyResults> {
        self.with_statistic(stratum, |statistic| statistic.results().copied())
            .flatten()
    }

    /// Strata whose own filled statistic is their representative
    fn standalone(&self) -> Vec<K> {
        self.statistics
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| !self.grouping.contains(key) && !self.pooled.contains_key(key))
            .collect()
    }

    /// Apply `f` to every representative statistic in parallel. Grouped
    /// strata are skipped: only their representative is fit
    fn for_each_representative<F>(&mut self, f: F)
    where
        F: Fn(&mut ScoreStatistic) + Send + Sync,
    {
        self.pooled
            .par_iter_mut()
            .for_each(|(_, statistic)| f(statistic));

        let standalone = self.standalone();
        let statistics = &self.statistics;
        standalone.par_iter().for_each(|key| {
            if let Some(mut statistic) = statistics.get_mut(key) {
                f(statistic.value_mut());
            }
        });
    }

    /// Fit the probability curves of all representative statistics
    pub fn estimate_probabilities(&mut self) {
        self.for_each_representative(|statistic| statistic.estimate_probabilities());
    }

    /// Threshold all representative statistics at `fdr`
    pub fn set_fdr(&mut self, fdr: f64) {
        self.for_each_representative(|statistic| {
            let results = statistic.set_fdr(fdr);
            if results.no_validated_data() {
                log::warn!(
                    "a stratum with {} targets and {} decoys cannot reach {}% FDR",
                    statistic.tally().targets,
                    statistic.tally().decoys,
                    fdr * 100.0
                );
            }
        });
    }

    /// Representatives with their pooled tallies and thresholding results
    pub fn summary(&self) -> Vec<(K, Tally, Option<TargetDecoyResults>)> {
        let mut summary = self
            .strata()
            .into_iter()
            .chain(self.pooled.keys().cloned())
            .filter(|stratum| !self.grouping.contains(stratum))
            .filter_map(|stratum| {
                let (tally, results) = self.with_statistic(&stratum, |statistic| {
                    (statistic.tally(), statistic.results().copied())
                })?;
                Some((stratum, tally, results))
            })
            .collect::<Vec<_>>();
        summary.sort_by(|a, b| a.0.cmp(&b.0));
        summary.dedup_by(|a, b| a.0 == b.0);
        summary
    }
}

/// Chain suspicious strata in ascending order. A chain starts at the first
/// suspicious stratum without an open reference and closes as soon as its pool
/// is no longer suspicious. A chain still open at the end folds into the
/// nearest representative before it, or else the nearest one after it.
fn cascade<K: Stratum>(entries: &[(K, Tally)], minimal_fdr: f64, grouping: &mut GroupingTable<K>) {
    let mut reference: Option<(usize, Tally)> = None;
    for (ix, (stratum, tally)) in entries.iter().enumerate() {
        if !tally.suspicious(minimal_fdr) {
            continue;
        }
        match reference.as_mut() {
            None => reference = Some((ix, *tally)),
            Some((ref_ix, pool)) => {
                *pool += *tally;
                grouping.insert(stratum.clone(), entries[*ref_ix].0.clone());
            }
        }
        if matches!(reference, Some((_, pool)) if !pool.suspicious(minimal_fdr)) {
            reference = None;
        }
    }

    if let Some((ref_ix, _)) = reference {
        let target = entries[..ref_ix]
            .iter()
            .rev()
            .chain(entries[ref_ix + 1..].iter())
            .map(|(stratum, _)| stratum)
            .find(|stratum| !grouping.contains(stratum));
        if let Some(target) = target {
            grouping.insert(entries[ref_ix].0.clone(), target.clone());
        }
    }
}

/// A top-level pool left suspicious after grouping joins the largest safe
/// sub-stratum, preferring one whose parent is the pool itself.
fn fold_into_substrata<K: Stratum>(
    entries: &[(K, Tally)],
    substrata: &[(K, Tally)],
    minimal_fdr: f64,
    grouping: &mut GroupingTable<K>,
) {
    let mut pools: BTreeMap<K, Tally> = BTreeMap::new();
    for (stratum, tally) in entries {
        *pools.entry(grouping.resolve(stratum)).or_default() += *tally;
    }

    for (pool, tally) in pools {
        if !tally.suspicious(minimal_fdr) {
            continue;
        }
        let child = |stratum: &K| stratum.parent().as_ref() == Some(&pool);
        let target = substrata.iter().max_by(|a, b| {
            child(&a.0)
                .cmp(&child(&b.0))
                .then_with(|| a.1.total().cmp(&b.1.total()))
                .then_with(|| b.0.cmp(&a.0))
        });
        if let Some((target, _)) = target {
            grouping.insert(pool, target.clone());
        }
    }
}

/// Route every suspicious stratum into `dustbin`. A dustbin that is still
/// suspicious folds into the largest representative.
fn group_into_dustbin<K: Stratum>(
    entries: &[(K, Tally)],
    dustbin: &K,
    minimal_fdr: f64,
    grouping: &mut GroupingTable<K>,
) {
    let mut pool = Tally::default();
    for (stratum, tally) in entries {
        if stratum == dustbin {
            pool += *tally;
        } else if tally.suspicious(minimal_fdr) {
            pool += *tally;
            grouping.insert(stratum.clone(), dustbin.clone());
        }
    }

    if pool.total() > 0 && pool.suspicious(minimal_fdr) {
        let target = entries
            .iter()
            .filter(|(stratum, _)| stratum != dustbin && !grouping.contains(stratum))
            .max_by(|a, b| a.1.total().cmp(&b.1.total()).then_with(|| b.0.cmp(&a.0)));
        if let Some((target, _)) = target {
            grouping.insert(dustbin.clone(), target.clone());
        }
    }
}
