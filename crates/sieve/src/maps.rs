//! Target/decoy maps of the three match levels and their fill pass.
//!
//! Spectrum matches are stratified by charge (and optionally spectrum file),
//! peptides by their modification profile, proteins share a single stratum.
//! The raw score of a peptide is the product of the posterior error
//! probabilities of its spectrum matches; the raw score of a protein group is
//! the product of the probabilities of its peptides.

use crate::matches::{MatchKey, MatchLevel, MatchStore, PeptideMatch, ProteinGroup, SpectrumMatch};
use crate::parameters::Fdr;
use crate::score::{probability_to_confidence, TargetDecoyResults};
use crate::stratified::{StratifiedScoreMap, Stratum};
use crate::Result;
use itertools::Itertools;
use rayon::prelude::*;
use std::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpectrumStratum {
    pub charge: u8,
    pub file: Option<String>,
}

impl Stratum for SpectrumStratum {
    fn parent(&self) -> Option<Self> {
        self.file.as_ref().map(|_| SpectrumStratum {
            charge: self.charge,
            file: None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeptideStratum {
    /// Sorted modification masses, empty for unmodified peptides
    Modifications(String),
    Dustbin,
}

impl PeptideStratum {
    pub fn of(peptide: &PeptideMatch) -> Self {
        let mut masses = peptide.modifications.clone();
        masses.sort_by(|a, b| a.total_cmp(b));
        PeptideStratum::Modifications(masses.iter().map(|m| format!("{:.3}", m)).join("_"))
    }
}

impl Stratum for PeptideStratum {}

pub struct TargetDecoyMaps {
    pub spectrum: StratifiedScoreMap<SpectrumStratum>,
    pub peptide: StratifiedScoreMap<PeptideStratum>,
    pub protein: StratifiedScoreMap<()>,
    separate_files: bool,
}

impl TargetDecoyMaps {
    pub fn new(separate_files: bool) -> Self {
        Self {
            spectrum: StratifiedScoreMap::cascade(),
            peptide: StratifiedScoreMap::dustbin(PeptideStratum::Dustbin),
            protein: StratifiedScoreMap::cascade(),
            separate_files,
        }
    }

    pub fn spectrum_stratum(&self, psm: &SpectrumMatch) -> SpectrumStratum {
        SpectrumStratum {
            charge: psm.charge,
            file: self.separate_files.then(|| psm.spectrum_file.clone()),
        }
    }

    pub fn spectrum_probability(&self, psm: &SpectrumMatch) -> f64 {
        self.spectrum.probability(&self.spectrum_stratum(psm), psm.score)
    }

    pub fn spectrum_results(&self, psm: &SpectrumMatch) -> Option<TargetDecoyResults> {
        self.spectrum.results(&self.spectrum_stratum(psm))
    }

    /// Product of the probabilities of the peptide's spectrum matches
    pub fn peptide_score(&self, store: &dyn MatchStore, peptide: &PeptideMatch) -> Result<f64> {
        peptide.spectrum_matches.iter().try_fold(1.0, |score, key| {
            let psm = store.require_spectrum_match(*key)?;
            Ok(score * self.spectrum_probability(&psm))
        })
    }

    pub fn peptide_probability(&self, store: &dyn MatchStore, peptide: &PeptideMatch) -> Result<f64> {
        let score = self.peptide_score(store, peptide)?;
        Ok(self.peptide.probability(&PeptideStratum::of(peptide), score))
    }

    pub fn peptide_confidence(&self, store: &dyn MatchStore, peptide: &PeptideMatch) -> Result<f64> {
        self.peptide_probability(store, peptide)
            .map(probability_to_confidence)
    }

    /// Product of the probabilities of the group's peptides
    pub fn protein_score(&self, store: &dyn MatchStore, group: &ProteinGroup) -> Result<f64> {
        group.peptides.iter().try_fold(1.0, |score, key| {
            let peptide = store.require_peptide_match(*key)?;
            Ok(score * self.peptide_probability(store, &peptide)?)
        })
    }

    pub fn protein_probability(&self, store: &dyn MatchStore, group: &ProteinGroup) -> Result<f64> {
        let score = self.protein_score(store, group)?;
        Ok(self.protein.probability(&(), score))
    }

    /// Fill the spectrum map, group its sparse strata and fit the curves
    pub fn fill_spectra(&mut self, store: &dyn MatchStore, minimal_fdr: f64) -> Result<()> {
        let start = Instant::now();
        let keys = store.keys(MatchLevel::Spectrum);
        {
            let this = &*self;
            keys.par_iter().try_for_each(|key| -> Result<()> {
                let psm = store.require_spectrum_match(*key)?;
                this.spectrum
                    .add_point(this.spectrum_stratum(&psm), psm.score, psm.decoy);
                Ok(())
            })?;
        }
        self.spectrum.clean(minimal_fdr);
        self.spectrum.estimate_probabilities();
        log::info!(
            "- filled {} spectrum matches: {} ms",
            keys.len(),
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Fill the peptide map. Requires a filled spectrum map
    pub fn fill_peptides(&mut self, store: &dyn MatchStore, minimal_fdr: f64) -> Result<()> {
        let start = Instant::now();
        let keys = store.keys(MatchLevel::Peptide);
        {
            let this = &*self;
            keys.par_iter().try_for_each(|key| -> Result<()> {
                let peptide = store.require_peptide_match(*key)?;
                let score = this.peptide_score(store, &peptide)?;
                this.peptide
                    .add_point(PeptideStratum::of(&peptide), score, peptide.decoy);
                Ok(())
            })?;
        }
        self.peptide.clean(minimal_fdr);
        self.peptide.estimate_probabilities();
        log::info!(
            "- filled {} peptides: {} ms",
            keys.len(),
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Fill the protein map. Requires filled spectrum and peptide maps, and
    /// should run on the resolved protein groups
    pub fn fill_proteins(&mut self, store: &dyn MatchStore, minimal_fdr: f64) -> Result<()> {
        let start = Instant::now();
        let keys = store.keys(MatchLevel::Protein);
        {
            let this = &*self;
            keys.par_iter().try_for_each(|key| -> Result<()> {
                let group = store.require_protein_group(*key)?;
                let score = this.protein_score(store, &group)?;
                this.protein.add_point((), score, group.decoy);
                Ok(())
            })?;
        }
        self.protein.clean(minimal_fdr);
        self.protein.estimate_probabilities();
        log::info!(
            "- filled {} protein groups: {} ms",
            keys.len(),
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Threshold every level at its requested FDR
    pub fn set_fdr(&mut self, fdr: &Fdr) {
        self.spectrum.set_fdr(fdr.spectrum);
        self.peptide.set_fdr(fdr.peptide);
        self.protein.set_fdr(fdr.protein);
    }

    pub fn has_decoys(&self, level: MatchLevel) -> bool {
        match level {
            MatchLevel::Spectrum => self.spectrum.has_decoys(),
            MatchLevel::Peptide => self.peptide.has_decoys(),
            MatchLevel::Protein => self.protein.has_decoys(),
        }
    }

    /// Thresholding results of the stratum a match belongs to, with its raw
    /// score and posterior error probability
    pub fn lookup(&self, store: &dyn MatchStore, level: MatchLevel, key: MatchKey) -> Result<Lookup> {
        match level {
            MatchLevel::Spectrum => {
                let psm = store.require_spectrum_match(key)?;
                let stratum = self.spectrum_stratum(&psm);
                Ok(Lookup {
                    decoy: psm.decoy,
                    score: psm.score,
                    probability: self.spectrum.probability(&stratum, psm.score),
                    results: self.spectrum.results(&stratum),
                })
            }
            MatchLevel::Peptide => {
                let peptide = store.require_peptide_match(key)?;
                let stratum = PeptideStratum::of(&peptide);
                let score = self.peptide_score(store, &peptide)?;
                Ok(Lookup {
                    decoy: peptide.decoy,
                    score,
                    probability: self.peptide.probability(&stratum, score),
                    results: self.peptide.results(&stratum),
                })
            }
            MatchLevel::Protein => {
                let group = store.require_protein_group(key)?;
                let score = self.protein_score(store, &group)?;
                Ok(Lookup {
                    decoy: group.decoy,
                    score,
                    probability: self.protein.probability(&(), score),
                    results: self.protein.results(&()),
                })
            }
        }
    }
}

/// Statistics backing the validation of one match
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Lookup {
    pub decoy: bool,
    /// Raw score, lower is better
    pub score: f64,
    pub probability: f64,
    pub results: Option<TargetDecoyResults>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::matches::*;

    fn psm(key: u64, charge: u8, score: f64, decoy: bool) -> SpectrumMatch {
        SpectrumMatch {
            key: MatchKey(key),
            spectrum_file: format!("run{}.mzML", key % 2),
            charge,
            score,
            decoy,
            theoretical_mz: 800.0,
            experimental_mz: 800.0,
            algorithms: vec![],
        }
    }

    fn peptide(key: u64, psms: &[u64], decoy: bool, modifications: Vec<f64>) -> PeptideMatch {
        PeptideMatch {
            key: MatchKey(key),
            sequence: "PEPTIDEK".into(),
            decoy,
            modifications,
            spectrum_matches: psms.iter().copied().map(MatchKey).collect(),
            proteins: vec!["A".into()],
            variant_accessions: Default::default(),
        }
    }

    /// 400 targets with good scores, 40 decoys spread over worse scores
    fn store() -> InMemoryMatchStore {
        let mut psms = Vec::new();
        for ix in 0..400u64 {
            psms.push(psm(ix, 2 + (ix % 2) as u8, ix as f64 / 400.0, false));
        }
        for ix in 400..440u64 {
            psms.push(psm(ix, 2 + (ix % 2) as u8, 0.5 + (ix - 400) as f64 / 80.0, true));
        }
        let peptides = vec![
            peptide(1, &[0, 1], false, vec![]),
            peptide(2, &[399], false, vec![15.995, 57.021]),
            peptide(3, &[439], true, vec![57.021, 15.995]),
        ];
        InMemoryMatchStore::new(psms, peptides, vec![])
    }

    #[test]
    fn modification_profiles() {
        let a = peptide(2, &[], false, vec![57.02146, 15.9949]);
        let b = peptide(3, &[], false, vec![15.9949, 57.02146]);
        assert_eq!(PeptideStratum::of(&a), PeptideStratum::of(&b));
        assert_eq!(
            PeptideStratum::of(&a),
            PeptideStratum::Modifications("15.995_57.021".into())
        );
        assert_eq!(
            PeptideStratum::of(&peptide(1, &[], false, vec![])),
            PeptideStratum::Modifications(String::new())
        );
        assert_eq!(PeptideStratum::of(&a).parent(), None);
        assert_eq!(PeptideStratum::Dustbin.parent(), None);
    }

    #[test]
    fn file_strata_have_charge_parent() {
        let maps = TargetDecoyMaps::new(true);
        let stratum = maps.spectrum_stratum(&psm(3, 2, 0.1, false));
        assert_eq!(stratum.file.as_deref(), Some("run1.mzML"));
        assert_eq!(
            stratum.parent(),
            Some(SpectrumStratum {
                charge: 2,
                file: None
            })
        );
        assert!(TargetDecoyMaps::new(false)
            .spectrum_stratum(&psm(3, 2, 0.1, false))
            .file
            .is_none());
    }

    #[test]
    fn fill_and_threshold() {
        let store = store();
        let mut maps = TargetDecoyMaps::new(false);
        maps.fill_spectra(&store, 0.01).unwrap();
        assert_eq!(maps.spectrum.tally().total(), 440);
        assert!(maps.has_decoys(MatchLevel::Spectrum));

        let best = maps.spectrum_probability(&store.spectrum_match(MatchKey(0)).unwrap());
        let worst = maps.spectrum_probability(&store.spectrum_match(MatchKey(439)).unwrap());
        assert!(best < worst);

        let peptide = store.peptide_match(MatchKey(1)).unwrap();
        let expected = maps.spectrum_probability(&store.spectrum_match(MatchKey(0)).unwrap())
            * maps.spectrum_probability(&store.spectrum_match(MatchKey(1)).unwrap());
        assert_eq!(maps.peptide_score(&store, &peptide).unwrap(), expected);

        maps.fill_peptides(&store, 0.01).unwrap();
        assert_eq!(maps.peptide.tally().total(), 3);
        // all peptide strata are too small and end up in the dustbin
        assert_eq!(
            maps.peptide.corrected_key(&PeptideStratum::Modifications(String::new())),
            PeptideStratum::Dustbin
        );

        maps.set_fdr(&Fdr {
            spectrum: 0.01,
            peptide: 0.01,
            protein: 0.01,
        });
        let lookup = maps.lookup(&store, MatchLevel::Spectrum, MatchKey(0)).unwrap();
        assert!(lookup.results.unwrap().threshold.is_some());
        assert_eq!(lookup.score, 0.0);

        assert!(maps.lookup(&store, MatchLevel::Spectrum, MatchKey(9999)).is_err());
        assert!(!maps.has_decoys(MatchLevel::Protein));
    }

    #[test]
    fn missing_psm_is_a_fault() {
        let store = InMemoryMatchStore::new(vec![], vec![peptide(1, &[5], false, vec![])], vec![]);
        let mut maps = TargetDecoyMaps::new(false);
        maps.fill_spectra(&store, 0.01).unwrap();
        assert!(maps.fill_peptides(&store, 0.01).is_err());
    }
}
