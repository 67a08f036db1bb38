// THEORY:
// The data model of the linker. Everything here is a value type.
//
// 1.  **Proposal**: one candidate box in one frame, paired with its actionness.
// 2.  **Clip**: the ordered frames of one clip, each holding its own candidate set.
//     Candidates inside one frame are never linked to each other; a clip only
//     offers one choice per frame.
// 3.  **Tube**: exactly one proposal per frame, plus the index of the candidate that
//     was chosen in each frame. A tube is built once and never mutated. The selected
//     tube is returned by value, so nothing hands out references into a clip.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core_modules::bbox::BBox;
use crate::error::{BoxDefect, DegenerateBoxWarning, LinkError, LinkResult};

/// A candidate box in one frame with its actionness score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub bbox: BBox,
    pub actionness: f64,
}

impl Proposal {
    pub fn new(bbox: BBox, actionness: f64) -> Self {
        Self { bbox, actionness }
    }

    pub fn is_finite(&self) -> bool {
        self.bbox.is_finite() && self.actionness.is_finite()
    }
}

/// The per-frame candidate sets of a single clip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Clip {
    pub frames: Vec<Vec<Proposal>>,
}

impl Clip {
    pub fn new(frames: Vec<Vec<Proposal>>) -> Self {
        Self { frames }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Number of candidates offered by each frame.
    pub fn candidate_counts(&self) -> Vec<usize> {
        self.frames.iter().map(Vec::len).collect()
    }

    pub fn proposal(&self, frame: usize, index: usize) -> &Proposal {
        &self.frames[frame][index]
    }

    /// Checks the clip against the configured clip length and candidate limit.
    ///
    /// Shape problems are `InvalidConfiguration`, an empty frame is `EmptyInput`,
    /// and a NaN or infinite value is `NonFinite`, in that order. Zero-area boxes are
    /// not errors; they come back as warnings.
    pub fn check(&self, n_clips: usize, n_anchors: usize) -> LinkResult<Vec<DegenerateBoxWarning>> {
        if self.frames.len() != n_clips {
            return Err(LinkError::InvalidConfiguration(format!(
                "clip has {} frames but n_clips is {}",
                self.frames.len(),
                n_clips
            )));
        }
        if let Some((frame, candidates)) = self
            .frames
            .iter()
            .enumerate()
            .find(|(_, candidates)| candidates.len() > n_anchors)
        {
            return Err(LinkError::InvalidConfiguration(format!(
                "frame {} has {} candidates but n_anchors is {}",
                frame,
                candidates.len(),
                n_anchors
            )));
        }
        if let Some(frame) = self.frames.iter().position(Vec::is_empty) {
            return Err(LinkError::EmptyInput { frame });
        }

        let mut warnings = Vec::new();
        for (frame, candidates) in self.frames.iter().enumerate() {
            for (index, proposal) in candidates.iter().enumerate() {
                if !proposal.is_finite() {
                    return Err(LinkError::NonFinite { frame, index });
                }
                let defect = if proposal.bbox.is_degenerate() {
                    BoxDefect::ZeroArea
                } else if proposal.bbox.is_reversed() {
                    BoxDefect::ReversedCorners
                } else {
                    continue;
                };
                warn!(frame, index, bbox = ?proposal.bbox, ?defect, "degenerate proposal box, its overlap counts as 0");
                warnings.push(DegenerateBoxWarning {
                    frame,
                    index,
                    bbox: proposal.bbox,
                    defect,
                });
            }
        }
        Ok(warnings)
    }

    /// Builds the tube that picks `indices[t]` in frame `t`.
    pub fn tube(&self, indices: &[usize]) -> Tube {
        let proposals = indices
            .iter()
            .enumerate()
            .map(|(frame, &index)| self.frames[frame][index])
            .collect();
        Tube {
            proposals,
            indices: indices.to_vec(),
        }
    }
}

/// One hypothesized track of an action through a clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tube {
    /// The chosen proposal of each frame, in frame order.
    pub proposals: Vec<Proposal>,
    /// The candidate index chosen in each frame.
    pub indices: Vec<usize>,
}

impl Tube {
    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn boxes(&self) -> impl Iterator<Item = &BBox> + '_ {
        self.proposals.iter().map(|p| &p.bbox)
    }

    pub fn actionness(&self) -> impl Iterator<Item = f64> + '_ {
        self.proposals.iter().map(|p| p.actionness)
    }
}
