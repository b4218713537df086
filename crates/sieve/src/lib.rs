pub mod enzyme;
pub mod maps;
pub mod mass;
pub mod matches;
pub mod parameters;
pub mod progress;
pub mod protein;
pub mod qc;
pub mod resolver;
pub mod score;
pub mod stratified;
pub mod task;
pub mod validation;

use matches::{MatchKey, MatchLevel};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{level} match {key} is missing from the match store")]
    MissingMatch { level: MatchLevel, key: MatchKey },
    #[error("{level} validation did not finish within {limit:?}")]
    Timeout { level: MatchLevel, limit: Duration },
    #[error("validation was canceled")]
    Canceled,
    #[error("unable to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("invalid enzyme: {0}")]
    Enzyme(String),
    #[error("invalid parameter: {0}")]
    Parameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;
