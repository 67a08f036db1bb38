// THEORY:
// This file is the main entry point for the `tube_linker` library crate.
//
// The crate links per-frame action proposals of a video clip into a single
// spatio-temporal "tube": one box per frame, chosen to maximize the clip's average
// actionness plus the overlap continuity between consecutive boxes. The primary
// exports are `TubeLinker` (sequential, with exhaustive, dynamic and beam search),
// `ParallelLinker` (exhaustive search on a tokio worker pool) and their shared
// `LinkerConfig` and `LinkReport`. The building blocks in `core_modules` are public
// too, for callers that need IoU, scoring or tube pooling on their own.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use crate::core_modules::bbox::{BBox, iou};
pub use crate::core_modules::proposal::{Clip, Proposal, Tube};
pub use crate::error::{BoxDefect, ConfigError, DegenerateBoxWarning, LinkError, LinkResult};
pub use crate::parallel_pipeline::ParallelLinker;
pub use crate::pipeline::{LinkReport, LinkStrategy, LinkedTube, LinkerConfig, TubeLinker, select_best};
