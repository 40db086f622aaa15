use serde::{Deserialize, Serialize};

/// Cosine similarity at or above this value counts as a match.
///
/// One global constant for the whole deployment, overridable through daemon
/// configuration — never per identity.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.60;

/// Similarity reported when either vector has zero norm.
///
/// Sits below any usable threshold so callers can compare against the
/// threshold without a separate degenerate-input branch.
pub const ZERO_NORM_SIMILARITY: f32 = -1.0;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Select the face to feed downstream: the box with the **largest area**.
///
/// Deliberately not the highest confidence — the prominent foreground face
/// beats a smaller, possibly sharper background face.
pub fn primary_face(faces: &[FaceBox]) -> Option<&FaceBox> {
    faces.iter().max_by(|a, b| {
        a.area()
            .partial_cmp(&b.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// L2-normalized face embedding vector (512-dimensional for ArcFace).
///
/// Serializes as a bare float array, which is also the storage format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Normalize a raw model output to unit length.
    ///
    /// Returns `None` for a zero-norm vector instead of dividing by zero —
    /// callers treat that as "could not compute embedding".
    pub fn from_raw(raw: Vec<f32>) -> Option<Self> {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return None;
        }
        Some(Self {
            values: raw.iter().map(|x| x / norm).collect(),
        })
    }

    /// Wrap stored values without renormalizing.
    ///
    /// Stored vectors are unit length by construction, but [`similarity`]
    /// re-normalizes defensively anyway, so vectors of unknown provenance
    /// degrade safely rather than skewing scores.
    ///
    /// [`similarity`]: Self::similarity
    pub fn from_stored(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Cosine similarity in [-1, 1]; higher means more similar.
    ///
    /// Both sides are re-normalized even if already unit vectors. A zero
    /// norm on either side yields [`ZERO_NORM_SIMILARITY`] rather than an
    /// error.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom == 0.0 {
            return ZERO_NORM_SIMILARITY;
        }
        (dot / denom).clamp(-1.0, 1.0)
    }
}

/// One enrolled identity's stored embedding, as loaded from the store.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub staff_id: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the enrolled gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best candidate [-1, 1].
    pub similarity: f32,
    /// Staff id of the match (only when `matched`).
    pub staff_id: Option<String>,
}

/// Strategy for resolving a probe embedding against a gallery of enrollments.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult;
}

/// Linear cosine-similarity scan over the whole gallery.
///
/// O(N) per probe — fine for tens to low hundreds of staff. The scan keeps
/// the strict maximum, so on an exact tie the first-encountered entry wins;
/// callers get determinism by passing the gallery in ascending staff-id
/// order.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, enrolled) in gallery.iter().enumerate() {
            let sim = probe.similarity(&enrolled.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                staff_id: Some(gallery[idx].staff_id.clone()),
            },
            _ => MatchResult {
                matched: false,
                similarity: if best_sim == f32::NEG_INFINITY {
                    ZERO_NORM_SIMILARITY
                } else {
                    best_sim
                },
                staff_id: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: Vec<f32>) -> Embedding {
        Embedding::from_raw(values).expect("non-zero test vector")
    }

    fn enrolled(staff_id: &str, values: Vec<f32>) -> EnrolledFace {
        EnrolledFace {
            staff_id: staff_id.to_string(),
            embedding: unit(values),
        }
    }

    #[test]
    fn similarity_of_vector_with_itself_is_one() {
        let a = unit(vec![0.3, -1.2, 0.5, 2.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = unit(vec![1.0, 2.0, -0.5]);
        let b = unit(vec![-0.7, 0.1, 3.0]);
        assert_eq!(a.similarity(&b), b.similarity(&a));
    }

    #[test]
    fn similarity_stays_in_range() {
        let a = unit(vec![1.0, 0.0]);
        for b in [
            unit(vec![1.0, 0.0]),
            unit(vec![0.0, 1.0]),
            unit(vec![-1.0, 0.0]),
            unit(vec![0.6, -0.8]),
        ] {
            let sim = a.similarity(&b);
            assert!((-1.0..=1.0).contains(&sim), "out of range: {sim}");
        }
    }

    #[test]
    fn similarity_of_opposite_vectors_is_minus_one() {
        let a = unit(vec![1.0, 0.0]);
        let b = unit(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_input_yields_sentinel() {
        let zero = Embedding::from_stored(vec![0.0, 0.0, 0.0]);
        let a = unit(vec![1.0, 0.0, 0.0]);
        assert_eq!(zero.similarity(&a), ZERO_NORM_SIMILARITY);
        assert_eq!(a.similarity(&zero), ZERO_NORM_SIMILARITY);
    }

    #[test]
    fn stored_unnormalized_vectors_are_renormalized() {
        // Same direction, different magnitudes: still a perfect match.
        let stored = Embedding::from_stored(vec![2.0, 4.0, 6.0]);
        let probe = unit(vec![1.0, 2.0, 3.0]);
        assert!((probe.similarity(&stored) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn from_raw_rejects_zero_vector() {
        assert!(Embedding::from_raw(vec![0.0; 8]).is_none());
    }

    #[test]
    fn from_raw_produces_unit_length() {
        let e = unit(vec![3.0, 4.0]);
        let norm: f32 = e.values().iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((e.values()[0] - 0.6).abs() < 1e-6);
        assert!((e.values()[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn embedding_serializes_as_bare_array() {
        let e = Embedding::from_stored(vec![0.5, -0.5]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,-0.5]");
        let back: Embedding = serde_json::from_str("[0.5,-0.5]").unwrap();
        assert_eq!(back.values(), &[0.5, -0.5]);
    }

    #[test]
    fn primary_face_picks_largest_area_not_highest_confidence() {
        let faces = vec![
            FaceBox {
                x: 0.0,
                y: 0.0,
                width: 40.0,
                height: 40.0,
                confidence: 0.99,
                landmarks: None,
            },
            FaceBox {
                x: 100.0,
                y: 100.0,
                width: 120.0,
                height: 150.0,
                confidence: 0.71,
                landmarks: None,
            },
        ];
        let primary = primary_face(&faces).unwrap();
        assert_eq!(primary.confidence, 0.71);
        assert_eq!(primary.area(), 120.0 * 150.0);
    }

    #[test]
    fn primary_face_of_empty_slice_is_none() {
        assert!(primary_face(&[]).is_none());
    }

    #[test]
    fn open_search_returns_global_maximum() {
        let gallery = vec![
            enrolled("S001", vec![0.0, 1.0, 0.0]),
            enrolled("S002", vec![0.9, 0.1, 0.0]),
            enrolled("S003", vec![1.0, 0.0, 0.0]),
        ];
        let probe = unit(vec![1.0, 0.0, 0.0]);

        let result = CosineMatcher.compare(&probe, &gallery, 0.60);
        assert!(result.matched);
        assert_eq!(result.staff_id.as_deref(), Some("S003"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn open_search_fails_when_maximum_is_below_threshold() {
        // S001 is the closest candidate but still under the bar.
        let gallery = vec![
            enrolled("S001", vec![0.5, 0.5, 0.0]),
            enrolled("S002", vec![0.0, 0.0, 1.0]),
        ];
        let probe = unit(vec![1.0, 0.0, 0.0]);

        let result = CosineMatcher.compare(&probe, &gallery, 0.95);
        assert!(!result.matched);
        assert!(result.staff_id.is_none());
        assert!(result.similarity < 0.95);
        assert!(result.similarity > 0.0);
    }

    #[test]
    fn open_search_tie_keeps_first_encountered() {
        let gallery = vec![
            enrolled("S001", vec![1.0, 0.0]),
            enrolled("S002", vec![1.0, 0.0]),
        ];
        let probe = unit(vec![1.0, 0.0]);

        let result = CosineMatcher.compare(&probe, &gallery, 0.60);
        assert!(result.matched);
        assert_eq!(result.staff_id.as_deref(), Some("S001"));
    }

    #[test]
    fn open_search_empty_gallery_never_matches() {
        let probe = unit(vec![1.0, 0.0]);
        let result = CosineMatcher.compare(&probe, &[], 0.60);
        assert!(!result.matched);
        assert_eq!(result.similarity, ZERO_NORM_SIMILARITY);
    }
}
