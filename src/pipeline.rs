// THEORY:
// The `pipeline` module is the top-level API of the linker. It takes one clip's
// per-frame proposals and hands back the single best tube, its score, and any
// non-fatal warnings raised along the way.
//
// Stages of a `link` call:
// 1.  **Fail Fast**: The clip is checked against the configuration before any tube is
//     built. Bad configuration, an empty frame or a NaN value ends the call here.
// 2.  **Search**: One of three strategies finds the winner. `Exhaustive` enumerates and
//     scores every tube, `Dynamic` finds the same optimum by dynamic programming, and
//     `Beam` keeps only the best partial tubes frame by frame.
// 3.  **Select**: Ties are broken by enumeration order. The first tube to reach the
//     best score wins, never the one with "nicer" geometry.
//
// A `TubeLinker` holds configuration only. Every `link` call is independent and
// nothing from one clip survives into the next.

use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::core_modules::enumerator::TubeEnumerator;
use crate::core_modules::proposal::{Clip, Tube};
use crate::core_modules::scorer::TubeScorer;
use crate::core_modules::toi_pool::{FeatureScale, ToiPool};
use crate::core_modules::{beam_linker, dynamic_linker};
use crate::error::{ConfigError, DegenerateBoxWarning, LinkError, LinkResult};

/// Largest candidate space the exhaustive strategy will walk by default.
pub const DEFAULT_MAX_CANDIDATES: u64 = 50_000_000;

/// How the best tube is searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkStrategy {
    /// Score every tube of the Cartesian product.
    #[default]
    Exhaustive,
    /// Exact dynamic program over consecutive frames.
    Dynamic,
    /// Keep the `width` best partial tubes after each frame.
    Beam { width: usize },
}

/// Configuration for the TubeLinker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkerConfig {
    /// Frames per clip. Must be at least 2 and equal the input's frame count.
    pub n_clips: usize,
    /// Maximum number of candidate proposals per frame.
    pub n_anchors: usize,
    #[serde(default)]
    pub strategy: LinkStrategy,
    /// Worker count for the parallel linker. `None` uses one worker per CPU.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Refuse exhaustive enumeration of more tubes than this.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: u64,
    /// Input resolution and feature-map resolution, for pooling along a tube.
    #[serde(default)]
    pub feature_scale: Option<FeatureScale>,
}

fn default_max_candidates() -> u64 {
    DEFAULT_MAX_CANDIDATES
}

impl LinkerConfig {
    pub fn new(n_clips: usize, n_anchors: usize) -> Self {
        Self {
            n_clips,
            n_anchors,
            strategy: LinkStrategy::default(),
            workers: None,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            feature_scale: None,
        }
    }

    pub fn with_strategy(mut self, strategy: LinkStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn validate(&self) -> LinkResult<()> {
        if self.n_clips < 2 {
            return Err(LinkError::InvalidConfiguration(format!(
                "n_clips must be at least 2, got {}",
                self.n_clips
            )));
        }
        if self.n_anchors == 0 {
            return Err(LinkError::InvalidConfiguration("n_anchors must be at least 1".into()));
        }
        if let LinkStrategy::Beam { width: 0 } = self.strategy {
            return Err(LinkError::InvalidConfiguration("beam width must be at least 1".into()));
        }
        if self.workers == Some(0) {
            return Err(LinkError::InvalidConfiguration("workers must be at least 1".into()));
        }
        if self.max_candidates == 0 {
            return Err(LinkError::InvalidConfiguration("max_candidates must be at least 1".into()));
        }
        if let Some(scale) = &self.feature_scale {
            scale.validate()?;
        }
        Ok(())
    }

    /// Number of parallel workers to spawn.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

/// The selected tube and its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedTube {
    pub tube: Tube,
    pub score: f64,
}

/// The primary output of the linker for a single clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkReport {
    pub selected: LinkedTube,
    /// Tubes, partial tubes or transitions scored, depending on the strategy.
    pub evaluations: u64,
    pub warnings: Vec<DegenerateBoxWarning>,
}

/// Returns the first candidate carrying the strictly greatest score.
///
/// Later candidates only replace the current best when they score higher, so among
/// equal scores the one seen first is kept.
pub fn select_best<T, I>(candidates: I) -> Option<(T, f64)>
where
    I: IntoIterator<Item = (T, f64)>,
{
    let mut best: Option<(T, f64)> = None;
    for (candidate, score) in candidates {
        let improves = match &best {
            Some((_, best_score)) => score > *best_score,
            None => true,
        };
        if improves {
            best = Some((candidate, score));
        }
    }
    best
}

/// The main, top-level struct of the linker.
#[derive(Debug, Clone)]
pub struct TubeLinker {
    config: LinkerConfig,
    scorer: TubeScorer,
}

impl TubeLinker {
    pub fn new(config: LinkerConfig) -> LinkResult<Self> {
        config.validate()?;
        let scorer = TubeScorer::new(config.n_clips)?;
        Ok(Self { config, scorer })
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn scorer(&self) -> &TubeScorer {
        &self.scorer
    }

    /// Checks a clip and returns the warnings it raises.
    pub fn check(&self, clip: &Clip) -> LinkResult<Vec<DegenerateBoxWarning>> {
        clip.check(self.config.n_clips, self.config.n_anchors)
    }

    /// Links one clip's proposals into its best tube.
    pub fn link(&self, clip: &Clip) -> LinkResult<LinkReport> {
        let warnings = self.check(clip)?;
        debug!(
            frames = clip.num_frames(),
            candidates = ?clip.candidate_counts(),
            strategy = ?self.config.strategy,
            "linking clip"
        );

        let (selected, evaluations) = match self.config.strategy {
            LinkStrategy::Exhaustive => self.link_exhaustive(clip)?,
            LinkStrategy::Dynamic => {
                let found = dynamic_linker::link(clip, &self.scorer);
                (
                    LinkedTube {
                        tube: found.tube,
                        score: found.score,
                    },
                    found.transitions,
                )
            }
            LinkStrategy::Beam { width } => {
                let found = beam_linker::link(clip, &self.scorer, width);
                (
                    LinkedTube {
                        tube: found.tube,
                        score: found.score,
                    },
                    found.expansions,
                )
            }
        };

        Ok(LinkReport {
            selected,
            evaluations,
            warnings,
        })
    }

    /// Max-pools a `[C, D, H, W]` feature volume along a linked tube, mapping boxes
    /// with the configured feature scale.
    pub fn pool(&self, volume: ArrayView4<'_, f32>, tube: &Tube, toi: &ToiPool) -> LinkResult<Array4<f32>> {
        let scale = self.config.feature_scale.ok_or_else(|| {
            LinkError::InvalidConfiguration("feature_scale must be configured to pool along a tube".into())
        })?;
        toi.pool(volume, tube, &scale)
    }

    fn link_exhaustive(&self, clip: &Clip) -> LinkResult<(LinkedTube, u64)> {
        let enumerator = TubeEnumerator::new(clip)?;
        if enumerator.len() > self.config.max_candidates {
            return Err(LinkError::InvalidConfiguration(format!(
                "{} candidate tubes exceed max_candidates {}; use the dynamic or beam strategy",
                enumerator.len(),
                self.config.max_candidates
            )));
        }

        let scored = enumerator.indices().map(|choice| {
            let score = self.scorer.score_choice(clip, &choice);
            (choice, score)
        });
        let (choice, score) = select_best(scored).ok_or(LinkError::EmptyInput { frame: 0 })?;
        debug!(?choice, score, candidates = enumerator.len(), "exhaustive linker selected tube");

        Ok((
            LinkedTube {
                tube: clip.tube(&choice),
                score,
            },
            enumerator.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::bbox::BBox;
    use crate::core_modules::proposal::Proposal;

    fn example_clip() -> Clip {
        Clip::new(vec![
            vec![Proposal::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0.8)],
            vec![
                Proposal::new(BBox::new(1.0, 1.0, 11.0, 11.0), 0.6),
                Proposal::new(BBox::new(50.0, 50.0, 60.0, 60.0), 0.9),
            ],
        ])
    }

    #[test]
    fn select_best_returns_the_maximum() {
        let best = select_best(vec![("a", 0.5), ("b", 0.9), ("c", 0.3)]);
        assert_eq!(best, Some(("b", 0.9)));
    }

    #[test]
    fn select_best_keeps_the_first_of_equal_scores() {
        let best = select_best(vec![("a", 0.2), ("b", 0.7), ("c", 0.7), ("d", 0.1)]);
        assert_eq!(best, Some(("b", 0.7)));
    }

    #[test]
    fn select_best_of_nothing_is_none() {
        assert_eq!(select_best(Vec::<((), f64)>::new()), None);
    }

    #[test]
    fn end_to_end_example_picks_the_overlapping_candidate() {
        let linker = TubeLinker::new(LinkerConfig::new(2, 9)).unwrap();
        let report = linker.link(&example_clip()).unwrap();
        assert_eq!(report.selected.tube.indices, vec![0, 0]);
        assert_eq!(report.selected.tube.proposals[1].bbox, BBox::new(1.0, 1.0, 11.0, 11.0));
        assert!((report.selected.score - (0.7 + 81.0 / 119.0)).abs() < 1e-12);
        assert_eq!(report.evaluations, 2);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn identical_candidates_resolve_to_the_first() {
        let p = Proposal::new(BBox::new(0.0, 0.0, 5.0, 5.0), 0.4);
        let clip = Clip::new(vec![vec![p; 3]; 3]);
        for strategy in [LinkStrategy::Exhaustive, LinkStrategy::Dynamic, LinkStrategy::Beam { width: 4 }] {
            let linker = TubeLinker::new(LinkerConfig::new(3, 3).with_strategy(strategy)).unwrap();
            assert_eq!(linker.link(&clip).unwrap().selected.tube.indices, vec![0, 0, 0]);
        }
    }

    #[test]
    fn single_frame_configuration_is_rejected() {
        assert!(matches!(
            TubeLinker::new(LinkerConfig::new(1, 9)),
            Err(LinkError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let linker = TubeLinker::new(LinkerConfig::new(2, 9)).unwrap();
        let clip = Clip::new(vec![example_clip().frames[0].clone(), vec![]]);
        assert_eq!(linker.link(&clip), Err(LinkError::EmptyInput { frame: 1 }));
    }

    #[test]
    fn frame_count_must_match_configuration() {
        let linker = TubeLinker::new(LinkerConfig::new(4, 9)).unwrap();
        assert!(matches!(
            linker.link(&example_clip()),
            Err(LinkError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn oversized_exhaustive_search_is_refused() {
        let mut config = LinkerConfig::new(2, 9);
        config.max_candidates = 1;
        let linker = TubeLinker::new(config).unwrap();
        assert!(matches!(
            linker.link(&example_clip()),
            Err(LinkError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn degenerate_box_warns_but_links() {
        let clip = Clip::new(vec![
            vec![Proposal::new(BBox::new(3.0, 3.0, 3.0, 3.0), 0.9)],
            vec![Proposal::new(BBox::new(0.0, 0.0, 5.0, 5.0), 0.1)],
        ]);
        let linker = TubeLinker::new(LinkerConfig::new(2, 9)).unwrap();
        let report = linker.link(&clip).unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!((report.selected.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn config_loads_from_json() {
        let config = LinkerConfig::from_json_str(
            r#"{ "n_clips": 8, "n_anchors": 9, "strategy": { "kind": "beam", "width": 32 } }"#,
        )
        .unwrap();
        assert_eq!(config.strategy, LinkStrategy::Beam { width: 32 });
        assert_eq!(config.max_candidates, DEFAULT_MAX_CANDIDATES);
        assert_eq!(config.workers, None);
    }

    #[test]
    fn config_validation_runs_on_load() {
        let err = LinkerConfig::from_json_str(r#"{ "n_clips": 1, "n_anchors": 9 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(LinkError::InvalidConfiguration(_))));

        let err = LinkerConfig::from_json_str(r#"{ "n_clips": 4 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn pooling_uses_the_configured_feature_scale() {
        let clip = example_clip();
        let volume = Array4::<f32>::from_shape_fn((2, 2, 6, 6), |(c, z, y, x)| (c * 100 + z * 36 + y * 6 + x) as f32);
        let toi = ToiPool::new(1, 2, 2).unwrap();

        let unscaled = TubeLinker::new(LinkerConfig::new(2, 9)).unwrap();
        let report = unscaled.link(&clip).unwrap();
        assert!(matches!(
            unscaled.pool(volume.view(), &report.selected.tube, &toi),
            Err(LinkError::InvalidConfiguration(_))
        ));

        let mut config = LinkerConfig::new(2, 9);
        config.feature_scale = Some(FeatureScale::new(12, 12, 6, 6));
        let scaled = TubeLinker::new(config).unwrap();
        let pooled = scaled.pool(volume.view(), &report.selected.tube, &toi).unwrap();
        assert_eq!(pooled.dim(), (2, 1, 2, 2));
        // Only the second frame's box reaches the far corner cell, in slice 1.
        assert_eq!(pooled[[0, 0, 1, 1]], (36 + 5 * 6 + 5) as f32);
    }

    #[test]
    fn zero_workers_and_zero_beam_are_rejected() {
        assert!(LinkerConfig::new(2, 9).with_workers(0).validate().is_err());
        assert!(
            LinkerConfig::new(2, 9)
                .with_strategy(LinkStrategy::Beam { width: 0 })
                .validate()
                .is_err()
        );
    }
}
