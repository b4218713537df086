//! Removal of protein groups that simpler groups already explain.
//!
//! A shared protein group S is a candidate for removal when other groups hold
//! proper subsets of its accessions. The groups form a containment DAG that is
//! processed leaves-first (ascending number of accessions), so every candidate
//! of S has been resolved before S itself. Each node memoizes its resolved
//! representative set: a kept group represents itself, a removed group is
//! represented by the union of the representatives of its candidates.

use crate::enzyme::Enzyme;
use crate::matches::{MatchKey, MatchLevel, MatchStore, PeptideMatch, ProteinGroup};
use crate::parameters::Simplification;
use crate::protein::ProteinAnnotations;
use crate::Result;
use fnv::FnvHashMap;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// Why an accession found only in the removed group is not genuine evidence
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimplificationReason {
    /// Every accession of the group is held by a simpler group
    Redundant,
    /// Worse protein existence level than the covering proteins
    Evidence,
    /// Peptides found only for the accession have low confidence
    Confidence,
    /// No peptide is enzymatic in the protein
    Enzymaticity,
    /// All peptides map to the protein only through a sequence variant
    Variant,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResolutionReport {
    /// Keys of the removed groups, ascending
    pub deleted: Vec<MatchKey>,
    /// Number of kept groups that gained peptides or changed leading accession
    pub updated: usize,
    /// Removed groups per reason; a group can count for several reasons
    pub reasons: BTreeMap<SimplificationReason, usize>,
}

pub struct ProteinGroupResolver<'a> {
    store: &'a dyn MatchStore,
    annotations: &'a dyn ProteinAnnotations,
    simplification: Simplification,
    enzyme: Option<Enzyme>,
}

/// Immutable inputs shared while deciding about each group
struct Snapshot {
    groups: Vec<Arc<ProteinGroup>>,
    peptides: FnvHashMap<MatchKey, Arc<PeptideMatch>>,
    confidences: FnvHashMap<MatchKey, f64>,
}

impl<'a> ProteinGroupResolver<'a> {
    pub fn new(
        store: &'a dyn MatchStore,
        annotations: &'a dyn ProteinAnnotations,
        simplification: Simplification,
        enzyme: Option<Enzyme>,
    ) -> Self {
        Self {
            store,
            annotations,
            simplification,
            enzyme,
        }
    }

    /// Remove every simplifiable shared group from the store, merge its
    /// peptides into the groups representing it, and select the leading
    /// accession of the remaining groups.
    ///
    /// `confidence` gives the confidence (percent) of a peptide; it is only
    /// consulted when simplification by confidence is enabled.
    pub fn resolve<C>(&self, confidence: C) -> Result<ResolutionReport>
    where
        C: Fn(&PeptideMatch) -> Result<f64> + Sync,
    {
        let start = Instant::now();
        let snapshot = self.snapshot(confidence)?;
        let groups = &snapshot.groups;
        let n = groups.len();

        let mut index: FnvHashMap<&str, Vec<usize>> = FnvHashMap::default();
        for (id, group) in groups.iter().enumerate() {
            for accession in &group.accessions {
                index.entry(accession.as_str()).or_default().push(id);
            }
        }

        let candidates = groups
            .par_iter()
            .enumerate()
            .map(|(id, group)| find_candidates(id, group, groups, &index))
            .collect::<Vec<_>>();

        let mut order = (0..n).collect::<Vec<_>>();
        order.sort_by_key(|&id| (groups[id].accessions.len(), groups[id].key));

        let mut representatives: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut deleted = vec![false; n];
        let mut merged: Vec<BTreeSet<MatchKey>> = vec![BTreeSet::new(); n];
        let mut report = ResolutionReport::default();

        for id in order {
            let group = &groups[id];
            let covering = candidates[id]
                .iter()
                .flat_map(|candidate| representatives[*candidate].iter().copied())
                .collect::<BTreeSet<usize>>();

            let reasons = match covering.is_empty() {
                true => None,
                false => self.simplify(group, &covering, &snapshot),
            };
            let reasons = match reasons {
                Some(reasons) => reasons,
                None => {
                    representatives[id] = vec![id];
                    continue;
                }
            };

            for key in &group.peptides {
                let targets = snapshot
                    .peptides
                    .get(key)
                    .map(|peptide| {
                        covering
                            .iter()
                            .copied()
                            .filter(|rep| {
                                peptide
                                    .proteins
                                    .iter()
                                    .any(|accession| groups[*rep].accessions.contains(accession))
                            })
                            .collect::<Vec<_>>()
                    })
                    .filter(|targets| !targets.is_empty())
                    .unwrap_or_else(|| covering.iter().copied().collect());
                for rep in targets {
                    if !groups[rep].peptides.contains(key) {
                        merged[rep].insert(*key);
                    }
                }
            }

            for reason in reasons {
                *report.reasons.entry(reason).or_insert(0) += 1;
            }
            deleted[id] = true;
            representatives[id] = covering.into_iter().collect();
        }

        for (id, group) in groups.iter().enumerate() {
            if deleted[id] {
                self.store.remove_protein_group(group.key);
                report.deleted.push(group.key);
                continue;
            }
            let leading = select_leading_accession(&group.accessions, self.annotations)
                .unwrap_or_else(|| group.leading_accession.clone());
            if merged[id].is_empty() && leading == group.leading_accession {
                continue;
            }
            let mut next = ProteinGroup::clone(group);
            next.peptides.extend(merged[id].iter().copied());
            next.leading_accession = leading;
            self.store.update_protein_group(next);
            report.updated += 1;
        }
        report.deleted.sort_unstable();

        log::info!(
            "- resolved {} protein groups, removed {}: {} ms",
            n,
            report.deleted.len(),
            start.elapsed().as_millis()
        );
        Ok(report)
    }

    fn snapshot<C>(&self, confidence: C) -> Result<Snapshot>
    where
        C: Fn(&PeptideMatch) -> Result<f64> + Sync,
    {
        let groups = self
            .store
            .keys(MatchLevel::Protein)
            .into_iter()
            .map(|key| self.store.require_protein_group(key))
            .collect::<Result<Vec<_>>>()?;

        let peptides = groups
            .iter()
            .flat_map(|group| group.peptides.iter().copied())
            .unique()
            .map(|key| self.store.require_peptide_match(key).map(|peptide| (key, peptide)))
            .collect::<Result<FnvHashMap<_, _>>>()?;

        let confidences = match self.simplification.confidence {
            true => peptides
                .par_iter()
                .map(|(key, peptide)| confidence(&**peptide).map(|c| (*key, c)))
                .collect::<Result<FnvHashMap<_, _>>>()?,
            false => FnvHashMap::default(),
        };

        Ok(Snapshot {
            groups,
            peptides,
            confidences,
        })
    }

    /// Reasons for removing `group`, `None` if some accession of the group is
    /// genuine evidence
    fn simplify(
        &self,
        group: &ProteinGroup,
        covering: &BTreeSet<usize>,
        snapshot: &Snapshot,
    ) -> Option<BTreeSet<SimplificationReason>> {
        let covered = covering
            .iter()
            .flat_map(|rep| snapshot.groups[*rep].accessions.iter().map(String::as_str))
            .collect::<BTreeSet<&str>>();

        let unique = group
            .accessions
            .iter()
            .map(String::as_str)
            .filter(|accession| !covered.contains(accession))
            .collect::<Vec<_>>();

        if unique.is_empty() {
            return Some([SimplificationReason::Redundant].into_iter().collect());
        }

        unique
            .into_iter()
            .map(|accession| self.reason(accession, group, &covered, snapshot))
            .collect()
    }

    /// First applicable reason why `accession` does not count as evidence
    fn reason(
        &self,
        accession: &str,
        group: &ProteinGroup,
        covered: &BTreeSet<&str>,
        snapshot: &Snapshot,
    ) -> Option<SimplificationReason> {
        let simplification = &self.simplification;
        let supporting = group
            .peptides
            .iter()
            .filter_map(|key| snapshot.peptides.get(key))
            .filter(|peptide| peptide.proteins.iter().any(|p| p == accession))
            .collect::<Vec<_>>();

        if simplification.evidence && self.worse_evidence(accession, covered) {
            return Some(SimplificationReason::Evidence);
        }

        if simplification.confidence {
            let weak = supporting
                .iter()
                .filter(|peptide| !peptide.proteins.iter().any(|p| covered.contains(p.as_str())))
                .all(|peptide| {
                    snapshot
                        .confidences
                        .get(&peptide.key)
                        .map(|confidence| *confidence <= simplification.confidence_threshold)
                        .unwrap_or(true)
                });
            if weak {
                return Some(SimplificationReason::Confidence);
            }
        }

        if simplification.enzymaticity {
            if let (Some(enzyme), Some(sequence)) = (&self.enzyme, self.annotations.sequence(accession)) {
                if !supporting
                    .iter()
                    .any(|peptide| enzyme.is_enzymatic(&peptide.sequence, sequence))
                {
                    return Some(SimplificationReason::Enzymaticity);
                }
            }
        }

        if simplification.variants
            && supporting
                .iter()
                .all(|peptide| !peptide.maps_directly(accession))
        {
            return Some(SimplificationReason::Variant);
        }

        None
    }

    fn worse_evidence(&self, accession: &str, covered: &BTreeSet<&str>) -> bool {
        let annotations = self.annotations;
        if let Some(level) = annotations.evidence_level(accession) {
            let worse = covered.iter().all(|other| {
                annotations
                    .evidence_level(other)
                    .map(|other| level > other)
                    .unwrap_or(false)
            });
            if worse {
                return true;
            }
        }
        annotations.is_uncharacterized(accession)
            && !covered.iter().any(|other| annotations.is_uncharacterized(other))
    }
}

/// Groups holding a proper subset of the accessions of shared group `id`
fn find_candidates(
    id: usize,
    group: &ProteinGroup,
    groups: &[Arc<ProteinGroup>],
    index: &FnvHashMap<&str, Vec<usize>>,
) -> Vec<usize> {
    if !group.is_shared() {
        return Vec::new();
    }
    let mut hits: FnvHashMap<usize, usize> = FnvHashMap::default();
    for accession in &group.accessions {
        for &other in index.get(accession.as_str()).into_iter().flatten() {
            if other != id {
                *hits.entry(other).or_insert(0) += 1;
            }
        }
    }
    let mut found = hits
        .into_iter()
        .filter(|&(other, hits)| {
            let size = groups[other].accessions.len();
            hits == size && size < group.accessions.len() && groups[other].decoy == group.decoy
        })
        .map(|(other, _)| other)
        .collect::<Vec<_>>();
    found.sort_unstable();
    found
}

/// Best protein existence level first, then characterized proteins, then
/// the lexicographically smallest accession
pub fn select_leading_accession(
    accessions: &BTreeSet<String>,
    annotations: &dyn ProteinAnnotations,
) -> Option<String> {
    let rank = |accession: &String| {
        (
            annotations.evidence_level(accession).unwrap_or(u8::MAX),
            annotations.is_uncharacterized(accession),
        )
    };
    accessions
        .iter()
        .min_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)))
        .cloned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::matches::InMemoryMatchStore;
    use crate::protein::{ProteinDatabase, ProteinEntry};
    use quickcheck_macros::quickcheck;

    fn peptide(key: u64, sequence: &str, proteins: &[&str]) -> PeptideMatch {
        PeptideMatch {
            key: MatchKey(key),
            sequence: sequence.into(),
            decoy: false,
            modifications: vec![],
            spectrum_matches: vec![],
            proteins: proteins.iter().map(|s| s.to_string()).collect(),
            variant_accessions: BTreeSet::new(),
        }
    }

    fn group(key: u64, accessions: &[&str], peptides: &[u64]) -> ProteinGroup {
        ProteinGroup {
            key: MatchKey(key),
            accessions: accessions.iter().map(|s| s.to_string()).collect(),
            leading_accession: accessions[0].to_string(),
            peptides: peptides.iter().copied().map(MatchKey).collect(),
            decoy: false,
        }
    }

    fn entry(accession: &str, evidence: Option<u8>, sequence: &str) -> ProteinEntry {
        ProteinEntry {
            accession: accession.into(),
            description: String::new(),
            sequence: sequence.into(),
            evidence,
        }
    }

    fn resolve(
        store: &InMemoryMatchStore,
        db: &ProteinDatabase,
        simplification: Simplification,
    ) -> ResolutionReport {
        let enzyme = Enzyme::new("KR", Some('P'), true).unwrap();
        ProteinGroupResolver::new(store, db, simplification, enzyme)
            .resolve(|peptide: &PeptideMatch| Ok(if peptide.key.0 >= 3 { 100.0 } else { 0.0 }))
            .unwrap()
    }

    fn peptides_of(store: &InMemoryMatchStore, key: u64) -> Vec<u64> {
        store
            .protein_group(MatchKey(key))
            .unwrap()
            .peptides
            .iter()
            .map(|k| k.0)
            .collect()
    }

    #[test]
    fn shared_group_merges_into_unique_group() {
        let store = InMemoryMatchStore::new(
            vec![],
            vec![
                peptide(1, "PEPTIDEK", &["A", "B"]),
                peptide(2, "PEPTIDER", &["A", "B"]),
            ],
            vec![group(10, &["A"], &[1]), group(20, &["A", "B"], &[1, 2])],
        );
        let report = resolve(&store, &ProteinDatabase::default(), Simplification::default());

        assert_eq!(report.deleted, vec![MatchKey(20)]);
        assert_eq!(report.reasons.get(&SimplificationReason::Confidence), Some(&1));
        assert!(store.protein_group(MatchKey(20)).is_none());
        assert_eq!(peptides_of(&store, 10), vec![1, 2]);
    }

    #[test]
    fn confident_unique_peptide_blocks_removal() {
        let store = InMemoryMatchStore::new(
            vec![],
            vec![peptide(1, "PEPTIDEK", &["A", "B"]), peptide(3, "EPTIDER", &["B"])],
            vec![group(10, &["A"], &[1]), group(20, &["A", "B"], &[1, 3])],
        );
        let report = resolve(&store, &ProteinDatabase::default(), Simplification::default());
        assert!(report.deleted.is_empty());
        assert_eq!(store.len(MatchLevel::Protein), 2);
        assert_eq!(peptides_of(&store, 10), vec![1]);
    }

    #[test]
    fn evidence_level() {
        let db = vec![entry("A", Some(1), ""), entry("B", Some(4), "")]
            .into_iter()
            .collect::<ProteinDatabase>();
        let store = InMemoryMatchStore::new(
            vec![],
            vec![peptide(1, "PEPTIDEK", &["A", "B"]), peptide(3, "EPTIDER", &["B"])],
            vec![group(10, &["A"], &[1]), group(20, &["A", "B"], &[1, 3])],
        );
        let report = resolve(&store, &db, Simplification::default());
        assert_eq!(report.deleted, vec![MatchKey(20)]);
        assert_eq!(report.reasons.get(&SimplificationReason::Evidence), Some(&1));
        // the confident B peptide is carried over to A
        assert_eq!(peptides_of(&store, 10), vec![1, 3]);
    }

    #[test]
    fn disabled_reasons_keep_the_group() {
        let db = vec![entry("A", Some(1), ""), entry("B", Some(4), "")]
            .into_iter()
            .collect::<ProteinDatabase>();
        let store = InMemoryMatchStore::new(
            vec![],
            vec![peptide(1, "PEPTIDEK", &["A", "B"]), peptide(3, "EPTIDER", &["B"])],
            vec![group(10, &["A"], &[1]), group(20, &["A", "B"], &[1, 3])],
        );
        let simplification = Simplification {
            evidence: false,
            ..Default::default()
        };
        assert!(resolve(&store, &db, simplification).deleted.is_empty());
    }

    #[test]
    fn enzymaticity() {
        let db = vec![entry("B", None, "MKAEPTIDERGGG")]
            .into_iter()
            .collect::<ProteinDatabase>();
        let groups = || vec![group(10, &["A"], &[1]), group(20, &["A", "B"], &[1, 3])];

        // semi-tryptic in B
        let store = InMemoryMatchStore::new(
            vec![],
            vec![peptide(1, "PEPTIDEK", &["A", "B"]), peptide(3, "EPTIDER", &["B"])],
            groups(),
        );
        let report = resolve(&store, &db, Simplification::default());
        assert_eq!(report.reasons.get(&SimplificationReason::Enzymaticity), Some(&1));

        // tryptic in B
        let store = InMemoryMatchStore::new(
            vec![],
            vec![peptide(1, "PEPTIDEK", &["A", "B"]), peptide(3, "AEPTIDER", &["B"])],
            groups(),
        );
        assert!(resolve(&store, &db, Simplification::default()).deleted.is_empty());
    }

    #[test]
    fn variant_mapping() {
        let mut variant = peptide(3, "EPTIDER", &["B"]);
        variant.variant_accessions.insert("B".into());
        let store = InMemoryMatchStore::new(
            vec![],
            vec![peptide(1, "PEPTIDEK", &["A"]), variant],
            vec![group(10, &["A"], &[1]), group(20, &["A", "B"], &[1, 3])],
        );
        let report = resolve(&store, &ProteinDatabase::default(), Simplification::default());
        assert_eq!(report.reasons.get(&SimplificationReason::Variant), Some(&1));
        assert_eq!(report.deleted, vec![MatchKey(20)]);
    }

    #[test]
    fn no_candidates_no_change() {
        let store = InMemoryMatchStore::new(
            vec![],
            vec![peptide(1, "PEPTIDEK", &["A", "B"])],
            vec![group(20, &["A", "B"], &[1]), group(30, &["C", "D"], &[1])],
        );
        let report = resolve(&store, &ProteinDatabase::default(), Simplification::default());
        assert!(report.deleted.is_empty());
        assert_eq!(report.updated, 0);
    }

    #[test]
    fn nested_groups_resolve_leaves_first() {
        let store = InMemoryMatchStore::new(
            vec![],
            vec![
                peptide(1, "PEPTIDEK", &["A", "B", "C"]),
                peptide(2, "PEPTIDER", &["A", "B"]),
            ],
            vec![
                group(10, &["A"], &[1]),
                group(20, &["A", "B"], &[1, 2]),
                group(30, &["A", "B", "C"], &[1, 2]),
            ],
        );
        let report = resolve(&store, &ProteinDatabase::default(), Simplification::default());
        assert_eq!(report.deleted, vec![MatchKey(20), MatchKey(30)]);
        assert_eq!(store.keys(MatchLevel::Protein), vec![MatchKey(10)]);
        assert_eq!(peptides_of(&store, 10), vec![1, 2]);
    }

    #[test]
    fn fully_covered_group_is_redundant() {
        let store = InMemoryMatchStore::new(
            vec![],
            vec![peptide(3, "PEPTIDEK", &["A", "B"])],
            vec![
                group(10, &["A"], &[3]),
                group(11, &["B"], &[3]),
                group(20, &["A", "B"], &[3]),
            ],
        );
        let report = resolve(&store, &ProteinDatabase::default(), Simplification::default());
        assert_eq!(report.deleted, vec![MatchKey(20)]);
        assert_eq!(report.reasons.get(&SimplificationReason::Redundant), Some(&1));
    }

    #[test]
    fn leading_accession() {
        let db = vec![
            entry("P1", Some(2), ""),
            entry("P2", Some(1), ""),
            ProteinEntry {
                accession: "P3".into(),
                description: "Putative protein".into(),
                sequence: String::new(),
                evidence: Some(1),
            },
        ]
        .into_iter()
        .collect::<ProteinDatabase>();
        let accessions = ["P1", "P2", "P3", "P4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(select_leading_accession(&accessions, &db), Some("P2".into()));

        let accessions = ["X", "B"].iter().map(|s| s.to_string()).collect();
        assert_eq!(select_leading_accession(&accessions, &db), Some("B".into()));
        assert_eq!(select_leading_accession(&BTreeSet::new(), &db), None);
    }

    #[test]
    fn missing_peptide_is_a_fault() {
        let store = InMemoryMatchStore::new(vec![], vec![], vec![group(10, &["A"], &[1])]);
        let db = ProteinDatabase::default();
        let result = ProteinGroupResolver::new(&store, &db, Simplification::default(), None)
            .resolve(|_: &PeptideMatch| Ok(0.0));
        assert!(result.is_err());
    }

    /// Groups over four accessions encoded as bit masks; every group carries
    /// one peptide mapping to all of its accessions
    fn random_store(masks: &[u8]) -> InMemoryMatchStore {
        let accessions = ["A", "B", "C", "D"];
        let masks = masks
            .iter()
            .map(|m| m & 0b1111)
            .filter(|m| *m != 0)
            .unique()
            .collect::<Vec<_>>();
        let mut peptides = Vec::new();
        let mut groups = Vec::new();
        for (ix, mask) in masks.iter().enumerate() {
            let members = (0..4)
                .filter(|bit| mask & (1 << bit) != 0)
                .map(|bit| accessions[bit])
                .collect::<Vec<_>>();
            let key = ix as u64 + 1;
            peptides.push(peptide(key, "PEPTIDEK", &members));
            groups.push(group(100 + key, &members, &[key]));
        }
        InMemoryMatchStore::new(vec![], peptides, groups)
    }

    #[quickcheck]
    fn resolving_twice_removes_nothing_more(masks: Vec<u8>) -> bool {
        let store = random_store(&masks);
        let db = ProteinDatabase::default();
        let first = resolve(&store, &db, Simplification::default());
        let kept = store.keys(MatchLevel::Protein);
        let second = resolve(&store, &db, Simplification::default());

        second.deleted.is_empty()
            && first.deleted.iter().all(|key| !kept.contains(key))
            && kept == store.keys(MatchLevel::Protein)
    }
}
