use crate::input::Settings;
use crate::project::Project;
use anyhow::Context;
use log::info;
use serde::Serialize;
use sieve_core::maps::TargetDecoyMaps;
use sieve_core::matches::{InMemoryMatchStore, MatchLevel, MatchStore};
use sieve_core::progress::{CollectedFaults, LogProgress};
use sieve_core::protein::ProteinDatabase;
use sieve_core::resolver::{ProteinGroupResolver, ResolutionReport};
use sieve_core::score::{Tally, TargetDecoyResults};
use sieve_core::task::CancellationToken;
use sieve_core::validation::{ValidationOrchestrator, ValidationReport};
use std::path::PathBuf;
use std::time::Instant;

pub struct Runner {
    pub parameters: Settings,
    start: Instant,
}

/// Tally and thresholding results of one stratum
#[derive(Serialize)]
pub struct StratumSummary {
    pub stratum: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub results: Option<TargetDecoyResults>,
}

/// Everything written to `results.json`
#[derive(Serialize)]
pub struct Results<'a> {
    pub settings: &'a Settings,
    pub validation: &'a ValidationReport,
    pub resolution: &'a ResolutionReport,
    pub strata: Strata,
}

#[derive(Serialize)]
pub struct Strata {
    pub spectrum: Vec<StratumSummary>,
    pub peptide: Vec<StratumSummary>,
    pub protein: Vec<StratumSummary>,
}

impl Strata {
    fn new(maps: &TargetDecoyMaps) -> Self {
        Strata {
            spectrum: maps
                .spectrum
                .summary()
                .into_iter()
                .map(|(stratum, tally, results)| StratumSummary {
                    stratum: match stratum.file {
                        Some(file) => format!("{}+ {}", stratum.charge, file),
                        None => format!("{}+", stratum.charge),
                    },
                    tally,
                    results,
                })
                .collect(),
            peptide: maps
                .peptide
                .summary()
                .into_iter()
                .map(|(stratum, tally, results)| StratumSummary {
                    stratum: format!("{:?}", stratum),
                    tally,
                    results,
                })
                .collect(),
            protein: maps
                .protein
                .summary()
                .into_iter()
                .map(|(_, tally, results)| StratumSummary {
                    stratum: "all".into(),
                    tally,
                    results,
                })
                .collect(),
        }
    }
}

impl Runner {
    pub fn new(parameters: Settings) -> Self {
        Self {
            parameters,
            start: Instant::now(),
        }
    }

    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    /// Fill the target/decoy maps and resolve the protein groups
    fn prepare(
        &self,
        store: &InMemoryMatchStore,
        database: &ProteinDatabase,
    ) -> anyhow::Result<(TargetDecoyMaps, ResolutionReport)> {
        let parameters = &self.parameters.parameters;
        let minimal_fdr = parameters.minimal_fdr();
        let mut maps = TargetDecoyMaps::new(parameters.separate_files);

        maps.fill_spectra(store, minimal_fdr)?;
        maps.fill_peptides(store, minimal_fdr)?;

        let resolution = match parameters.project_type.validates(MatchLevel::Protein) {
            true => {
                let resolver = ProteinGroupResolver::new(
                    store,
                    database,
                    parameters.simplification,
                    parameters.enzyme()?,
                );
                let maps = &maps;
                resolver.resolve(|peptide| maps.peptide_confidence(store, peptide))?
            }
            false => ResolutionReport::default(),
        };

        maps.fill_proteins(store, minimal_fdr)?;
        maps.set_fdr(&parameters.fdr);
        Ok((maps, resolution))
    }

    pub fn run(mut self) -> anyhow::Result<Settings> {
        let (store, database) = Project::load(&self.parameters.project)?.into_store()?;

        let start = Instant::now();
        let (maps, resolution) = self.prepare(&store, &database)?;
        info!("- target/decoy maps: {:8} ms", start.elapsed().as_millis());

        let cancel = CancellationToken::new();
        let progress = LogProgress::new(cancel.clone());
        let faults = CollectedFaults::default();
        let report = ValidationOrchestrator::new(
            &store,
            &maps,
            &self.parameters.parameters,
            &progress,
            &faults,
            cancel,
        )
        .run();

        if !faults.is_empty() {
            let faults = faults.into_inner();
            anyhow::bail!(
                "validation failed on {} matches, first fault: {}",
                faults.len(),
                faults[0]
            );
        }
        let report = report.context("validation did not complete")?;

        for level in MatchLevel::ALL {
            if !self.parameters.parameters.project_type.validates(level) {
                continue;
            }
            let path = match level {
                MatchLevel::Spectrum => self.write_spectrum_matches(&store)?,
                MatchLevel::Peptide => self.write_peptides(&store)?,
                MatchLevel::Protein => self.write_protein_groups(&store)?,
            };
            self.parameters.output_paths.push(path);
        }

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.display().to_string());

        let results = Results {
            settings: &self.parameters,
            validation: &report,
            resolution: &resolution,
            strata: Strata::new(&maps),
        };
        println!("{}", serde_json::to_string_pretty(&results.settings)?);

        let bytes = serde_json::to_vec_pretty(&results)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;

        info!(
            "validated {} spectrum matches, {} peptides, {} protein groups",
            store.len(MatchLevel::Spectrum),
            store.len(MatchLevel::Peptide),
            store.len(MatchLevel::Protein)
        );
        info!("finished in {}s", self.start.elapsed().as_secs());
        Ok(self.parameters)
    }
}
