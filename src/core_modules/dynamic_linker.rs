// THEORY:
// Exhaustive linking costs the product of the per-frame candidate counts, which is
// already out of reach for 8 frames of 9 anchors. The tube score, however, is a sum
// of per-proposal terms (actionness / n) and consecutive-pair terms
// (iou / (n - 1)). That makes the arg-max a longest-path problem on a layered graph,
// solvable exactly in the sum of `k_t * k_t+1` pair evaluations.
//
// The table is filled backwards: `best_from[t][i]` is the best score any suffix
// starting at candidate `i` of frame `t` can reach. The table adds its terms in a
// different order than the tube scorer does, so tubes that tie on paper can differ
// in the last bits. Reconstruction therefore walks forwards through every tube whose
// table value lies within a small relative tolerance of the optimum, in enumeration
// order, re-scores each with the tube scorer and keeps the first strictly greater
// one. That is exactly the tube the exhaustive enumeration would have returned.

use tracing::debug;

use crate::core_modules::bbox::iou;
use crate::core_modules::proposal::{Clip, Tube};
use crate::core_modules::scorer::TubeScorer;
use crate::pipeline::select_best;

/// Relative distance from the table optimum within which tubes count as tied.
const TIE_TOLERANCE: f64 = 1e-9;

/// Upper bound on tied tubes re-scored per clip. Clips made of identical proposals
/// tie everywhere; past this many the earliest tubes found decide.
const MAX_TIED_TUBES: usize = 1 << 16;

/// Result of a dynamic-programming pass.
#[derive(Debug, Clone)]
pub struct DynamicLink {
    pub tube: Tube,
    pub score: f64,
    /// Number of consecutive-pair transitions evaluated.
    pub transitions: u64,
}

/// Finds the best-scoring tube of a checked, non-empty clip.
pub fn link(clip: &Clip, scorer: &TubeScorer) -> DynamicLink {
    let frames = &clip.frames;
    let n = frames.len();
    let w_act = scorer.actionness_weight();
    let w_ovl = scorer.overlap_weight();
    let mut transitions = 0u64;

    let mut best_from: Vec<Vec<f64>> = vec![Vec::new(); n];
    best_from[n - 1] = frames[n - 1].iter().map(|p| w_act * p.actionness).collect();

    for t in (0..n - 1).rev() {
        let (head, tail) = best_from.split_at_mut(t + 1);
        let next = &tail[0];
        head[t] = frames[t]
            .iter()
            .map(|p| {
                let best_next = frames[t + 1]
                    .iter()
                    .zip(next)
                    .map(|(q, &suffix)| w_ovl * iou(&p.bbox, &q.bbox) + suffix)
                    .fold(f64::NEG_INFINITY, f64::max);
                w_act * p.actionness + best_next
            })
            .collect();
        transitions += (frames[t].len() * frames[t + 1].len()) as u64;
    }

    let best = best_from[0].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut walk = TieWalk {
        clip,
        best_from: &best_from,
        w_act,
        w_ovl,
        floor: best - TIE_TOLERANCE * best.abs().max(1.0),
        found: Vec::new(),
    };
    walk.descend(&mut Vec::with_capacity(n), 0.0);
    let tied = walk.found.len();

    let scored = walk.found.into_iter().map(|choice| {
        let score = scorer.score_choice(clip, &choice);
        (choice, score)
    });
    let (choice, score) = select_best(scored).unwrap_or_else(|| {
        // The arg-max path always clears the floor; this only guards an empty walk.
        let choice = table_argmax_path(clip, &best_from, w_ovl);
        let score = scorer.score_choice(clip, &choice);
        (choice, score)
    });

    let tube = clip.tube(&choice);
    debug!(?choice, score, transitions, tied, "dynamic linker selected tube");
    DynamicLink {
        tube,
        score,
        transitions,
    }
}

/// Depth-first walk over the tubes whose table value reaches `floor`, visited in
/// enumeration order.
struct TieWalk<'a> {
    clip: &'a Clip,
    best_from: &'a [Vec<f64>],
    w_act: f64,
    w_ovl: f64,
    floor: f64,
    found: Vec<Vec<usize>>,
}

impl TieWalk<'_> {
    /// `value` is the weighted actionness of `prefix` plus the weighted overlap
    /// between its consecutive boxes.
    fn descend(&mut self, prefix: &mut Vec<usize>, value: f64) {
        let t = prefix.len();
        if t == self.best_from.len() {
            self.found.push(prefix.clone());
            return;
        }
        let frames = &self.clip.frames;
        for (j, q) in frames[t].iter().enumerate() {
            if self.found.len() >= MAX_TIED_TUBES {
                return;
            }
            let edge = match prefix.last() {
                Some(&i) => self.w_ovl * iou(&frames[t - 1][i].bbox, &q.bbox),
                None => 0.0,
            };
            if value + edge + self.best_from[t][j] < self.floor {
                continue;
            }
            prefix.push(j);
            self.descend(prefix, value + edge + self.w_act * q.actionness);
            prefix.pop();
        }
    }
}

/// Follows the table forwards, taking the lowest index among equal values.
fn table_argmax_path(clip: &Clip, best_from: &[Vec<f64>], w_ovl: f64) -> Vec<usize> {
    let frames = &clip.frames;
    let mut choice = Vec::with_capacity(frames.len());
    choice.push(first_argmax(best_from[0].iter().copied()));
    for t in 1..frames.len() {
        let prev = &frames[t - 1][choice[t - 1]].bbox;
        let index = first_argmax(
            frames[t]
                .iter()
                .zip(&best_from[t])
                .map(|(q, &suffix)| w_ovl * iou(prev, &q.bbox) + suffix),
        );
        choice.push(index);
    }
    choice
}

/// Index of the first strictly greatest value.
fn first_argmax<I: IntoIterator<Item = f64>>(values: I) -> usize {
    let mut best_index = 0;
    let mut best = f64::NEG_INFINITY;
    for (i, v) in values.into_iter().enumerate() {
        if v > best {
            best = v;
            best_index = i;
        }
    }
    best_index
}
