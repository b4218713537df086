use fnv::FnvHashSet;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mass::VALID_AA;
use crate::{Error, Result};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EnzymeBuilder {
    /// Residues after (or before, see `c_terminal`) which the enzyme cleaves.
    /// An empty string means non-specific digestion
    pub cleave_at: Option<String>,
    /// Skip cleaving if the site is followed by this residue. Defaults to `P`
    /// when cleaving at `KR`
    pub restrict: Option<char>,
    pub c_terminal: Option<bool>,
}

impl Default for EnzymeBuilder {
    fn default() -> Self {
        Self {
            cleave_at: Some("KR".into()),
            restrict: Some('P'),
            c_terminal: Some(true),
        }
    }
}

impl EnzymeBuilder {
    /// `Ok(None)` for a non-specific digest
    pub fn build(&self) -> Result<Option<Enzyme>> {
        let cleave_at = self.cleave_at.as_deref().unwrap_or("KR");
        let restrict = self.restrict.or_else(|| (cleave_at == "KR").then_some('P'));
        Enzyme::new(cleave_at, restrict, self.c_terminal.unwrap_or(true))
    }
}

#[derive(Clone, Debug)]
pub struct Enzyme {
    // Skip cleaving if the site is followed matching this AA
    pub skip_suffix: Option<char>,
    // Regex for matching cleavage sites
    regex: Regex,
    // Cleave at c-terminal?
    pub c_terminal: bool,
}

impl Enzyme {
    pub fn new(cleave: &str, skip_suffix: Option<char>, c_terminal: bool) -> Result<Option<Self>> {
        if !(cleave.chars().all(|x| VALID_AA.contains(&(x as u8))) || cleave == "$") {
            return Err(Error::Enzyme(format!(
                "cleavage sequence contains non-amino acid characters: {}",
                cleave
            )));
        }
        if let Some(skip) = skip_suffix.filter(|x| !VALID_AA.contains(&(*x as u8))) {
            return Err(Error::Enzyme(format!(
                "cleavage restriction is non-amino acid character: {}",
                skip
            )));
        }

        let regex = |pattern: &str| Regex::new(pattern).map_err(|e| Error::Enzyme(e.to_string()));

        // At this point, cleave can be three things: empty, "$", or a string of valid AA's
        match cleave {
            "" => Ok(None),
            "$" => Ok(Some(Enzyme {
                regex: regex("$")?,
                skip_suffix: None,
                c_terminal: true,
            })),
            _ => Ok(Some(Enzyme {
                regex: regex(&format!("[{}]", cleave))?,
                skip_suffix,
                c_terminal,
            })),
        }
    }

    /// Positions between residues at which the enzyme cuts `sequence`
    pub fn cleavage_sites(&self, sequence: &str) -> FnvHashSet<usize> {
        let mut sites = FnvHashSet::default();
        for mat in self.regex.find_iter(sequence) {
            let site = match self.c_terminal {
                true => mat.end(),
                false => mat.start(),
            };
            if let Some(skip) = self.skip_suffix {
                if site < sequence.len() && sequence[site..].starts_with(skip) {
                    continue;
                }
            }
            sites.insert(site);
        }
        sites
    }

    /// Could `peptide` have been produced from `protein` by this enzyme?
    ///
    /// Both termini of at least one occurrence must fall on a cleavage site
    /// or a protein terminus. Loss of the initiator methionine counts as an
    /// N-terminus.
    pub fn is_enzymatic(&self, peptide: &str, protein: &str) -> bool {
        if peptide.is_empty() {
            return false;
        }
        let sites = self.cleavage_sites(protein);
        let mut from = 0;
        while let Some(offset) = protein.get(from..).and_then(|rest| rest.find(peptide)) {
            let start = from + offset;
            let end = start + peptide.len();
            let n_term = start == 0 || (start == 1 && protein.starts_with('M')) || sites.contains(&start);
            let c_term = end == protein.len() || sites.contains(&end);
            if n_term && c_term {
                return true;
            }
            from = start + 1;
        }
        false
    }
}
