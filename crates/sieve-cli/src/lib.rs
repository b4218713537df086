pub mod input;
pub mod output;
pub mod project;
pub mod runner;

use clap::{value_parser, Arg, Command, ValueHint};

pub fn command() -> Command {
    Command::new("sieve")
        .version(clap::crate_version!())
        .about("Validate peptide and protein identifications with target-decoy statistics")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("project")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the project to validate (JSON file). Overrides the project \
                     listed in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where validation results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of validation worker threads (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("project-type")
                .long("project-type")
                .value_parser(["spectrum", "peptide", "protein"])
                .help("Deepest match level to validate"),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
}
