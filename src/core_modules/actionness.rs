// THEORY:
// Actionness is the per-proposal confidence that a box contains part of an action.
// A tube's aggregate is the plain sum over its frames. Normalizing by the clip
// length is the scorer's job, not this module's.

/// Sums the actionness values of a tube, one value per frame.
pub fn aggregate_actionness<I>(scores: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    scores.into_iter().sum()
}
