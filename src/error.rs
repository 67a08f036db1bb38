// THEORY:
// Linking fails in exactly one of a few typed ways, or it succeeds with a list of
// non-fatal box warnings attached to the report.
//
//     LinkError            fatal, returned from every `link` call
//     ConfigError          loading a LinkerConfig from disk or a string
//     DegenerateBoxWarning non-fatal, collected into the LinkReport

use std::path::PathBuf;
use thiserror::Error;

use crate::core_modules::bbox::BBox;

/// Convenient `Result` alias used across the crate.
pub type LinkResult<T> = Result<T, LinkError>;

/// Every way a `link` call can fail. A call either fully succeeds or reports
/// exactly one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    /// The configuration, or the shape of the input relative to it, is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A frame contributed no candidate proposals.
    #[error("frame {frame} has no candidate proposals")]
    EmptyInput { frame: usize },

    /// A proposal carries a NaN or infinite coordinate or actionness.
    #[error("proposal {index} in frame {frame} has a non-finite value")]
    NonFinite { frame: usize, index: usize },

    /// A worker of the parallel linker went away before replying.
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

/// Failures while loading a `LinkerConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] LinkError),
}

/// What is wrong with a warned-about box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxDefect {
    ZeroArea,
    /// `x1 < x0` or `y1 < y0`. The area is still positive but the box overlaps nothing.
    ReversedCorners,
}

/// A proposal whose box can never overlap anything. It can still be selected, but
/// its IoU against any partner is 0.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DegenerateBoxWarning {
    pub frame: usize,
    pub index: usize,
    pub bbox: BBox,
    pub defect: BoxDefect,
}
