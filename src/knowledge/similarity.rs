//! Cosine similarity over embedding vectors.
//!
//! Single pass over both slices, no allocation.

/// Cosine similarity of two vectors.
///
/// Returns `0.0` when either vector is empty, the lengths differ, or either norm is
/// zero. The result is clamped into `[-1.0, 1.0]` to absorb rounding drift.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}

/// Two vectors can be compared only when their lengths agree.
pub fn comparable(a: &[f32], b: &[f32]) -> bool {
    !a.is_empty() && a.len() == b.len()
}

/// Highest similarity between `query` and any comparable vector in `candidates`.
/// `None` when nothing is comparable.
pub fn best_match<'a, I>(query: &[f32], candidates: I) -> Option<f32>
where
    I: IntoIterator<Item = &'a Vec<f32>>,
{
    candidates
        .into_iter()
        .filter(|c| comparable(query, c))
        .map(|c| cosine(query, c))
        .fold(None, |best, sim| match best {
            Some(b) if b >= sim => Some(b),
            _ => Some(sim),
        })
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}
