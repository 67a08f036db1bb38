// THEORY:
// The `TubeScorer` turns a candidate tube into one number:
//
//     score = (1 / n) * sum(actionness) + (1 / (n - 1)) * sum(iou(box_t, box_t+1))
//
// The first term rewards confident proposals, the second rewards boxes that stay in
// place from one frame to the next. Both weights are fixed by the clip length `n`,
// so they are computed once when the scorer is built and a clip length below 2 is
// refused there, before any tube is looked at. A tube of any other length than the
// scorer's `n` is refused when it is scored.

use crate::core_modules::actionness::aggregate_actionness;
use crate::core_modules::bbox::{BBox, iou};
use crate::core_modules::proposal::{Clip, Tube};
use crate::error::{LinkError, LinkResult};

/// Sum of the IoU of each consecutive pair of boxes.
pub fn aggregate_overlap<'a, I>(boxes: I) -> f64
where
    I: IntoIterator<Item = &'a BBox>,
{
    let mut boxes = boxes.into_iter();
    let Some(mut prev) = boxes.next() else {
        return 0.0;
    };
    let mut overlap = 0.0;
    for next in boxes {
        overlap += iou(prev, next);
        prev = next;
    }
    overlap
}

/// Precomputed weights for a fixed clip length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TubeScorer {
    n_clips: usize,
    actionness_weight: f64,
    overlap_weight: f64,
}

impl TubeScorer {
    pub fn new(n_clips: usize) -> LinkResult<Self> {
        if n_clips < 2 {
            return Err(LinkError::InvalidConfiguration(format!(
                "n_clips must be at least 2, got {}",
                n_clips
            )));
        }
        Ok(Self {
            n_clips,
            actionness_weight: 1.0 / n_clips as f64,
            overlap_weight: 1.0 / (n_clips - 1) as f64,
        })
    }

    pub fn n_clips(&self) -> usize {
        self.n_clips
    }

    pub fn actionness_weight(&self) -> f64 {
        self.actionness_weight
    }

    pub fn overlap_weight(&self) -> f64 {
        self.overlap_weight
    }

    /// Weighted sum of aggregate actionness and aggregate overlap.
    pub fn combine(&self, actionness: f64, overlap: f64) -> f64 {
        self.actionness_weight * actionness + self.overlap_weight * overlap
    }

    /// Scores a tube that spans exactly `n_clips` frames.
    pub fn score(&self, tube: &Tube) -> LinkResult<f64> {
        if tube.len() != self.n_clips {
            return Err(LinkError::InvalidConfiguration(format!(
                "tube spans {} frames but n_clips is {}",
                tube.len(),
                self.n_clips
            )));
        }
        Ok(self.combine(aggregate_actionness(tube.actionness()), aggregate_overlap(tube.boxes())))
    }

    /// Scores the tube `choice` of `clip` without building a `Tube`. The clip must
    /// already have passed `Clip::check` against `n_clips`.
    pub fn score_choice(&self, clip: &Clip, choice: &[usize]) -> f64 {
        let proposals = choice
            .iter()
            .enumerate()
            .map(|(frame, &index)| clip.proposal(frame, index));
        let actionness = aggregate_actionness(proposals.clone().map(|p| p.actionness));
        let overlap = aggregate_overlap(proposals.map(|p| &p.bbox));
        self.combine(actionness, overlap)
    }
}

/// Scores one tube for a clip of `n_clips` frames.
pub fn score(tube: &Tube, n_clips: usize) -> LinkResult<f64> {
    TubeScorer::new(n_clips)?.score(tube)
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn overlapping_candidate_scores_as_expected() {
        let tube = example_clip().tube(&[0, 0]);
        let expected = 0.5 * 1.4 + 81.0 / 119.0;
        assert!((score(&tube, 2).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn disjoint_candidate_scores_only_actionness() {
        let tube = example_clip().tube(&[0, 1]);
        assert!((score(&tube, 2).unwrap() - 0.85).abs() < 1e-12);
    }

    #[test]
    fn score_choice_matches_score() {
        let clip = example_clip();
        let scorer = TubeScorer::new(2).unwrap();
        for choice in [[0, 0], [0, 1]] {
            assert_eq!(scorer.score_choice(&clip, &choice), scorer.score(&clip.tube(&choice)).unwrap());
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let tube = example_clip().tube(&[0, 0]);
        let first = score(&tube, 2).unwrap();
        for _ in 0..10 {
            assert_eq!(score(&tube, 2).unwrap(), first);
        }
    }

    #[test]
    fn clip_length_below_two_is_rejected() {
        let tube = example_clip().tube(&[0, 0]);
        assert!(matches!(score(&tube, 1), Err(LinkError::InvalidConfiguration(_))));
        assert!(matches!(TubeScorer::new(0), Err(LinkError::InvalidConfiguration(_))));
    }

    #[test]
    fn tube_length_must_match_clip_length() {
        let p = Proposal::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0.5);
        let tube = Clip::new(vec![vec![p]; 3]).tube(&[0, 0, 0]);
        assert!(matches!(score(&tube, 2), Err(LinkError::InvalidConfiguration(_))));
        assert!(matches!(score(&tube, 4), Err(LinkError::InvalidConfiguration(_))));
        assert!((score(&tube, 3).unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn overlap_of_single_box_is_zero() {
        let b = BBox::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(aggregate_overlap([&b]), 0.0);
        assert_eq!(aggregate_overlap(std::iter::empty::<&BBox>()), 0.0);
    }
}
