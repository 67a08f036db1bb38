// THEORY:
// A bounded alternative to exhaustive enumeration: grow partial tubes one frame at a
// time and keep only the `width` best after each step. The partial score uses the
// same weights as the full score, so with a beam at least as wide as the candidate
// space this is exactly the exhaustive result. Narrower beams trade optimality for a
// cost linear in the clip length.
//
// Equal partial scores are ordered by their candidate indices, which is the order
// the exhaustive enumeration would have met them in.

use tracing::debug;

use crate::core_modules::bbox::iou;
use crate::core_modules::proposal::{Clip, Tube};
use crate::core_modules::scorer::TubeScorer;

#[derive(Debug, Clone)]
struct Partial {
    choice: Vec<usize>,
    actionness: f64,
    overlap: f64,
    score: f64,
}

/// Result of a beam pass.
#[derive(Debug, Clone)]
pub struct BeamLink {
    pub tube: Tube,
    pub score: f64,
    /// Number of partial tubes scored across all steps.
    pub expansions: u64,
}

/// Finds a high-scoring tube of a checked, non-empty clip, keeping at most `width`
/// partial tubes alive between frames.
pub fn link(clip: &Clip, scorer: &TubeScorer, width: usize) -> BeamLink {
    let width = width.max(1);
    let frames = &clip.frames;
    let mut expansions = frames[0].len() as u64;

    let mut beam: Vec<Partial> = frames[0]
        .iter()
        .enumerate()
        .map(|(i, p)| Partial {
            choice: vec![i],
            actionness: p.actionness,
            overlap: 0.0,
            score: scorer.combine(p.actionness, 0.0),
        })
        .collect();
    prune(&mut beam, width);

    for t in 1..frames.len() {
        let mut grown = Vec::with_capacity(beam.len() * frames[t].len());
        for partial in &beam {
            let last = &frames[t - 1][partial.choice[t - 1]].bbox;
            for (j, q) in frames[t].iter().enumerate() {
                let actionness = partial.actionness + q.actionness;
                let overlap = partial.overlap + iou(last, &q.bbox);
                let mut choice = partial.choice.clone();
                choice.push(j);
                grown.push(Partial {
                    choice,
                    actionness,
                    overlap,
                    score: scorer.combine(actionness, overlap),
                });
            }
        }
        expansions += grown.len() as u64;
        prune(&mut grown, width);
        beam = grown;
    }

    // The beam is sorted best-first, so the head is the first-seen maximum.
    let best = &beam[0];
    let tube = clip.tube(&best.choice);
    let score = scorer.score_choice(clip, &best.choice);
    debug!(choice = ?best.choice, score, expansions, width, "beam linker selected tube");
    BeamLink {
        tube,
        score,
        expansions,
    }
}

fn prune(partials: &mut Vec<Partial>, width: usize) {
    partials.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.choice.cmp(&b.choice)));
    partials.truncate(width);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::bbox::BBox;
    use crate::core_modules::proposal::Proposal;

    fn trap_clip() -> Clip {
        // Greedy on frame 0 takes the confident box that leads nowhere.
        let left = BBox::new(0.0, 0.0, 10.0, 10.0);
        let right = BBox::new(100.0, 0.0, 110.0, 10.0);
        Clip::new(vec![
            vec![Proposal::new(left, 0.6), Proposal::new(right, 0.5)],
            vec![Proposal::new(left, 0.0), Proposal::new(right, 1.0)],
            vec![Proposal::new(left, 0.5), Proposal::new(right, 0.5)],
        ])
    }

    #[test]
    fn wide_beam_finds_the_optimum() {
        let scorer = TubeScorer::new(3).unwrap();
        let result = link(&trap_clip(), &scorer, 8);
        assert_eq!(result.tube.indices, vec![1, 1, 1]);
        assert_eq!(result.expansions, 2 + 4 + 8);
    }

    #[test]
    fn width_one_is_greedy() {
        let scorer = TubeScorer::new(3).unwrap();
        let result = link(&trap_clip(), &scorer, 1);
        assert_eq!(result.tube.indices[0], 0);
        assert_eq!(result.tube.len(), 3);
        assert_eq!(result.expansions, 2 + 2 + 2);
    }

    #[test]
    fn equal_partials_keep_enumeration_order() {
        let p = Proposal::new(BBox::new(0.0, 0.0, 4.0, 4.0), 0.5);
        let clip = Clip::new(vec![vec![p; 4]; 2]);
        let scorer = TubeScorer::new(2).unwrap();
        assert_eq!(link(&clip, &scorer, 2).tube.indices, vec![0, 0]);
    }
}
