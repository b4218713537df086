//! Protein annotations consulted while resolving protein groups.

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

/// Read-only access to protein level annotations
pub trait ProteinAnnotations: Send + Sync {
    /// UniProt-style protein existence level, 1 (evidence at protein level)
    /// to 5 (uncertain)
    fn evidence_level(&self, accession: &str) -> Option<u8>;

    fn description(&self, accession: &str) -> Option<&str>;

    fn sequence(&self, accession: &str) -> Option<&str>;

    /// Is the protein flagged as uncharacterized or putative?
    fn is_uncharacterized(&self, accession: &str) -> bool {
        self.description(accession)
            .map(|d| {
                let d = d.to_lowercase();
                d.contains("uncharacterized") || d.contains("putative")
            })
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProteinEntry {
    pub accession: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sequence: String,
    #[serde(default)]
    pub evidence: Option<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct ProteinDatabase {
    entries: FnvHashMap<String, ProteinEntry>,
}

impl ProteinDatabase {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, accession: &str) -> Option<&ProteinEntry> {
        self.entries.get(accession)
    }
}

impl FromIterator<ProteinEntry> for ProteinDatabase {
    fn from_iter<T: IntoIterator<Item = ProteinEntry>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|entry| (entry.accession.clone(), entry))
                .collect(),
        }
    }
}

impl ProteinAnnotations for ProteinDatabase {
    fn evidence_level(&self, accession: &str) -> Option<u8> {
        self.get(accession).and_then(|entry| entry.evidence)
    }

    fn description(&self, accession: &str) -> Option<&str> {
        self.get(accession).map(|entry| entry.description.as_str())
    }

    fn sequence(&self, accession: &str) -> Option<&str> {
        self.get(accession)
            .map(|entry| entry.sequence.as_str())
            .filter(|sequence| !sequence.is_empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn annotations() {
        let db = vec![
            ProteinEntry {
                accession: "P1".into(),
                description: "Uncharacterized protein C1orf2".into(),
                sequence: "MPEPTIDEK".into(),
                evidence: Some(4),
            },
            ProteinEntry {
                accession: "P2".into(),
                description: "Serum albumin".into(),
                ..Default::default()
            },
        ]
        .into_iter()
        .collect::<ProteinDatabase>();

        assert_eq!(db.len(), 2);
        assert!(db.is_uncharacterized("P1"));
        assert!(!db.is_uncharacterized("P2"));
        assert!(!db.is_uncharacterized("P3"));
        assert_eq!(db.evidence_level("P1"), Some(4));
        assert_eq!(db.evidence_level("P2"), None);
        assert_eq!(db.sequence("P1"), Some("MPEPTIDEK"));
        assert_eq!(db.sequence("P2"), None);
    }
}
