use anyhow::{ensure, Context};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use sieve_core::mass::Tolerance;
use sieve_core::parameters::{Builder, ProjectType, ValidationParameters};
use std::path::PathBuf;

#[derive(Serialize)]
/// Actual validation settings - may include overrides or default values not set by user
pub struct Settings {
    pub version: String,
    pub project: String,
    pub parameters: ValidationParameters,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Deserialize)]
/// Input settings deserialized from JSON file
pub struct Input {
    project: Option<String>,
    output_directory: Option<String>,
    #[serde(flatten)]
    parameters: Builder,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("missing parameters path")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(project) = matches.get_one::<String>("project") {
            log::trace!("overriding `project` parameter.");
            input.project = Some(project.into());
        }
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(threads) = matches.get_one::<u16>("threads").copied() {
            log::trace!("overriding `threads` parameter.");
            input.parameters.threads = Some(threads as usize);
        }
        if let Some(project_type) = matches.get_one::<String>("project-type") {
            log::trace!("overriding `project_type` parameter.");
            input.parameters.project_type = Some(match project_type.as_str() {
                "spectrum" => ProjectType::Spectrum,
                "peptide" => ProjectType::Peptide,
                _ => ProjectType::Protein,
            });
        }

        ensure!(
            input.project.is_some(),
            "`project` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn check_tolerance(tolerance: &Tolerance) {
        let (lo, hi) = match tolerance {
            Tolerance::Ppm(lo, hi) | Tolerance::Da(lo, hi) => (lo, hi),
        };
        if lo > hi {
            log::warn!(
                "Lower precursor tolerance is greater than the upper one: [{} - {}]",
                lo,
                hi
            );
        }
    }

    pub fn build(mut self) -> anyhow::Result<Settings> {
        self.parameters.threads.get_or_insert_with(num_cpus::get);
        let parameters = self.parameters.make_parameters()?;

        Self::check_tolerance(&parameters.precursor_tol);
        if parameters.confidence_margin > 10.0 {
            log::warn!(
                "`confidence_margin` of {} percent points is higher than expected",
                parameters.confidence_margin
            );
        }

        let project = self
            .project
            .context("`project` must be set. For more information try '--help'")?;

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create `{}`", path.display()))?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Settings {
            version: clap::crate_version!().into(),
            project,
            parameters,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}
