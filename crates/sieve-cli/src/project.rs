//! Matches and protein annotations of one project, as read from JSON.

use anyhow::{ensure, Context};
use serde::Deserialize;
use sieve_core::matches::{
    InMemoryMatchStore, MatchKey, MatchLevel, MatchStore, MatchValidation, PeptideMatch, ProteinGroup,
    SpectrumMatch, ValidationLevel,
};
use sieve_core::protein::{ProteinDatabase, ProteinEntry};

/// A validation level fixed by a reviewer
#[derive(Deserialize, Debug)]
pub struct ManualValidation {
    pub level: MatchLevel,
    pub key: MatchKey,
    pub validation: ValidationLevel,
}

#[derive(Deserialize, Debug)]
pub struct Project {
    pub spectrum_matches: Vec<SpectrumMatch>,
    #[serde(default)]
    pub peptides: Vec<PeptideMatch>,
    #[serde(default)]
    pub protein_groups: Vec<ProteinGroup>,
    #[serde(default)]
    pub proteins: Vec<ProteinEntry>,
    #[serde(default)]
    pub manual: Vec<ManualValidation>,
}

impl Project {
    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read project `{path}`"))?;
        let project: Project =
            serde_json::from_str(&contents).with_context(|| format!("Failed to parse project `{path}`"))?;
        log::info!(
            "read {} spectrum matches, {} peptides, {} protein groups",
            project.spectrum_matches.len(),
            project.peptides.len(),
            project.protein_groups.len()
        );
        Ok(project)
    }

    /// Move the matches into a store, with the manual validations applied
    pub fn into_store(self) -> anyhow::Result<(InMemoryMatchStore, ProteinDatabase)> {
        let database = self.proteins.into_iter().collect::<ProteinDatabase>();
        let store = InMemoryMatchStore::new(self.spectrum_matches, self.peptides, self.protein_groups);
        for manual in self.manual {
            let known = match manual.level {
                MatchLevel::Spectrum => store.spectrum_match(manual.key).is_some(),
                MatchLevel::Peptide => store.peptide_match(manual.key).is_some(),
                MatchLevel::Protein => store.protein_group(manual.key).is_some(),
            };
            ensure!(
                known,
                "manual validation refers to unknown {} match {}",
                manual.level,
                manual.key
            );
            store.set_validation(manual.level, manual.key, MatchValidation::manual(manual.validation));
        }
        Ok((store, database))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn manual_validations() -> anyhow::Result<()> {
        let project: Project = serde_json::from_str(
            r#"{
                "spectrum_matches": [
                    {"key": 1, "spectrum_file": "a.mzML", "charge": 2, "score": 0.1,
                     "decoy": false, "theoretical_mz": 500.0, "experimental_mz": 500.0}
                ],
                "manual": [{"level": "spectrum", "key": 1, "validation": "confident"}]
            }"#,
        )?;
        let (store, database) = project.into_store()?;
        assert!(database.is_empty());
        let validation = store.validation(MatchLevel::Spectrum, MatchKey(1)).unwrap();
        assert!(validation.manual);
        assert_eq!(validation.level, ValidationLevel::Confident);
        Ok(())
    }

    #[test]
    fn unknown_manual_match() -> anyhow::Result<()> {
        let project: Project = serde_json::from_str(
            r#"{
                "spectrum_matches": [],
                "manual": [{"level": "peptide", "key": 4, "validation": "doubtful"}]
            }"#,
        )?;
        assert!(project.into_store().is_err());
        Ok(())
    }
}
