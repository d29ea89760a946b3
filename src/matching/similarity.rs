//! Cross-source similarity scores.
//!
//! Scores are cosine similarity mapped to `[0, 1]` via `(cos + 1) / 2`. Each
//! entry is computed independently from its two vectors, so a score never
//! depends on iteration order or on which other posts are in the run.

use ndarray::Array2;

use crate::embedding::EmbeddingSet;
use crate::error::InvariantViolation;
use crate::post::{Post, PostKey, Source};

/// Cosine of the angle between `a` and `b`, accumulated in f64.
/// `None` for empty vectors, mismatched lengths, or a zero norm.
fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom).clamp(-1.0, 1.0))
}

/// Cosine similarity in `[-1, 1]`. Returns `0.0` for degenerate inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    cosine(a, b).unwrap_or(0.0)
}

/// Similarity score in `[0, 1]`. Symmetric: `similarity(a, b) == similarity(b, a)`.
///
/// Degenerate inputs (zero norm, length mismatch) score `0.0` so they can never
/// clear a threshold.
pub fn similarity(a: &[f32], b: &[f32]) -> f64 {
    cosine(a, b).map_or(0.0, |cos| (cos + 1.0) / 2.0)
}

/// All pairwise scores between the posts of two sources.
///
/// Rows belong to `left`, columns to `right`; `left` precedes `right` in the
/// configured source order.
#[derive(Debug, Clone)]
pub struct ScoreMatrix {
    left: Source,
    right: Source,
    rows: Vec<PostKey>,
    cols: Vec<PostKey>,
    scores: Array2<f64>,
}

impl ScoreMatrix {
    /// Build a matrix from explicit scores, one inner `Vec` per row.
    ///
    /// Every score must be finite and lie in `[0, 1]`.
    pub fn from_rows(
        left: Source,
        right: Source,
        row_ids: &[&str],
        col_ids: &[&str],
        scores: Vec<Vec<f64>>,
    ) -> Result<Self, InvariantViolation> {
        let rows: Vec<PostKey> = row_ids.iter().map(|id| PostKey::new(left, *id)).collect();
        let cols: Vec<PostKey> = col_ids.iter().map(|id| PostKey::new(right, *id)).collect();

        let shape = (rows.len(), cols.len());
        let flat: Vec<f64> = scores.into_iter().flatten().collect();
        let values = flat.len();
        let scores = Array2::from_shape_vec(shape, flat).map_err(|_| {
            InvariantViolation::MatrixShape {
                rows: shape.0,
                cols: shape.1,
                values,
            }
        })?;

        let matrix = Self {
            left,
            right,
            rows,
            cols,
            scores,
        };
        matrix.check_bounds()?;
        Ok(matrix)
    }

    /// Score every `left` post against every `right` post.
    pub fn compute(
        left: Source,
        right: Source,
        left_posts: &[&Post],
        right_posts: &[&Post],
        embeddings: &EmbeddingSet,
    ) -> Self {
        let rows: Vec<PostKey> = left_posts.iter().map(|p| p.key()).collect();
        let cols: Vec<PostKey> = right_posts.iter().map(|p| p.key()).collect();

        let left_vecs: Vec<&[f32]> = rows.iter().map(|k| vector(embeddings, k)).collect();
        let right_vecs: Vec<&[f32]> = cols.iter().map(|k| vector(embeddings, k)).collect();

        let scores = Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
            similarity(left_vecs[i], right_vecs[j])
        });

        Self {
            left,
            right,
            rows,
            cols,
            scores,
        }
    }

    fn check_bounds(&self) -> Result<(), InvariantViolation> {
        for ((i, j), &score) in self.scores.indexed_iter() {
            if !(0.0..=1.0).contains(&score) {
                return Err(InvariantViolation::ScoreOutOfRange {
                    a: self.rows[i].clone(),
                    b: self.cols[j].clone(),
                    score,
                });
            }
        }
        Ok(())
    }

    pub fn left(&self) -> Source {
        self.left
    }

    pub fn right(&self) -> Source {
        self.right
    }

    pub fn rows(&self) -> &[PostKey] {
        &self.rows
    }

    pub fn cols(&self) -> &[PostKey] {
        &self.cols
    }

    /// Look up the score for a pair of keys, in either order.
    pub fn score_of(&self, a: &PostKey, b: &PostKey) -> Option<f64> {
        let (r, c) = if a.source == self.left { (a, b) } else { (b, a) };
        let i = self.rows.iter().position(|k| k == r)?;
        let j = self.cols.iter().position(|k| k == c)?;
        Some(self.scores[[i, j]])
    }

    pub fn shape(&self) -> (usize, usize) {
        self.scores.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.cols.is_empty()
    }

    /// Iterate `(row, col, score)` over every entry.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.scores.indexed_iter().map(|((i, j), &s)| (i, j, s))
    }
}

fn vector<'a>(embeddings: &'a EmbeddingSet, key: &PostKey) -> &'a [f32] {
    embeddings.get(key).map(|e| e.as_slice()).unwrap_or(&[])
}

/// The score matrices of one run, one per ordered source pair.
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    matrices: Vec<ScoreMatrix>,
}

impl SimilarityIndex {
    /// Score every pair of sources `(A, B)` with `A` before `B` in `sources`.
    ///
    /// Only posts that have an embedding take part. An empty source yields
    /// empty matrices for its pairings.
    pub fn build(sources: &[Source], posts: &[Post], embeddings: &EmbeddingSet) -> Self {
        let partitions: Vec<(Source, Vec<&Post>)> = sources
            .iter()
            .map(|&source| {
                let members = posts
                    .iter()
                    .filter(|p| p.source == source && embeddings.get(&p.key()).is_some())
                    .collect();
                (source, members)
            })
            .collect();

        let mut matrices = Vec::new();
        for (i, (left, left_posts)) in partitions.iter().enumerate() {
            for (right, right_posts) in &partitions[i + 1..] {
                let matrix = ScoreMatrix::compute(*left, *right, left_posts, right_posts, embeddings);
                tracing::debug!(
                    left = %left,
                    right = %right,
                    rows = matrix.shape().0,
                    cols = matrix.shape().1,
                    "score matrix computed"
                );
                matrices.push(matrix);
            }
        }

        Self { matrices }
    }

    pub fn from_matrices(matrices: Vec<ScoreMatrix>) -> Self {
        Self { matrices }
    }

    pub fn matrices(&self) -> &[ScoreMatrix] {
        &self.matrices
    }

    /// Score of a cross-source pair, if both posts were indexed.
    pub fn score(&self, a: &PostKey, b: &PostKey) -> Option<f64> {
        self.matrices
            .iter()
            .find(|m| {
                (m.left == a.source && m.right == b.source)
                    || (m.left == b.source && m.right == a.source)
            })
            .and_then(|m| m.score_of(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedding;

    fn post(source: Source, id: &str) -> Post {
        Post {
            id: id.into(),
            source,
            title: id.into(),
            body: id.into(),
            published_at: None,
            url: String::new(),
            title_derived: false,
        }
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = [0.3f32, -0.2, 0.9];
        assert!((similarity(&v, &v) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn opposite_vectors_score_zero() {
        let a = [1.0f32, 0.0];
        let b = [-1.0f32, 0.0];
        assert_eq!(similarity(&a, &b), 0.0);
    }

    #[test]
    fn orthogonal_vectors_score_half() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert_eq!(similarity(&a, &b), 0.5);
    }

    #[test]
    fn similarity_is_exactly_symmetric() {
        let a = [0.123f32, -0.98, 0.4, 0.0001, 7.5];
        let b = [-3.1f32, 0.22, 0.91, 1e-5, 0.5];
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn degenerate_vectors_score_zero() {
        assert_eq!(similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(similarity(&[], &[]), 0.0);
    }

    #[test]
    fn from_rows_rejects_out_of_range_scores() {
        let err = ScoreMatrix::from_rows(
            Source::Pikabu,
            Source::Habr,
            &["p1"],
            &["h1"],
            vec![vec![1.2]],
        )
        .unwrap_err();
        assert!(matches!(err, InvariantViolation::ScoreOutOfRange { .. }));

        let err = ScoreMatrix::from_rows(
            Source::Pikabu,
            Source::Habr,
            &["p1", "p2"],
            &["h1"],
            vec![vec![0.5]],
        )
        .unwrap_err();
        assert!(matches!(err, InvariantViolation::MatrixShape { .. }));
    }

    #[test]
    fn index_builds_every_source_pair_in_order() {
        let posts = vec![
            post(Source::Pikabu, "p1"),
            post(Source::Habr, "h1"),
            post(Source::Habr, "h2"),
        ];
        let mut set = EmbeddingSet::new();
        set.insert(posts[0].key(), Embedding::new(vec![1.0, 0.0], 2).unwrap());
        set.insert(posts[1].key(), Embedding::new(vec![1.0, 0.0], 2).unwrap());
        set.insert(posts[2].key(), Embedding::new(vec![0.0, 1.0], 2).unwrap());

        let index = SimilarityIndex::build(&Source::ALL, &posts, &set);
        let pairs: Vec<(Source, Source)> =
            index.matrices().iter().map(|m| (m.left(), m.right())).collect();
        assert_eq!(
            pairs,
            vec![
                (Source::Pikabu, Source::Habr),
                (Source::Pikabu, Source::Telegram),
                (Source::Habr, Source::Telegram),
            ]
        );

        assert_eq!(index.matrices()[0].shape(), (1, 2));
        assert!(index.matrices()[1].is_empty());
        assert!(index.matrices()[2].is_empty());

        let p1 = PostKey::new(Source::Pikabu, "p1");
        let h1 = PostKey::new(Source::Habr, "h1");
        let h2 = PostKey::new(Source::Habr, "h2");
        assert_eq!(index.score(&p1, &h1), Some(1.0));
        assert_eq!(index.score(&h2, &p1), Some(0.5));
    }

    #[test]
    fn posts_without_embeddings_are_not_indexed() {
        let posts = vec![post(Source::Pikabu, "p1"), post(Source::Habr, "h1")];
        let mut set = EmbeddingSet::new();
        set.insert(posts[0].key(), Embedding::new(vec![1.0, 0.0], 2).unwrap());

        let index = SimilarityIndex::build(&[Source::Pikabu, Source::Habr], &posts, &set);
        assert_eq!(index.matrices()[0].shape(), (1, 0));
    }

    #[test]
    fn scores_do_not_depend_on_post_order() {
        let posts = vec![
            post(Source::Pikabu, "p1"),
            post(Source::Pikabu, "p2"),
            post(Source::Habr, "h1"),
            post(Source::Habr, "h2"),
        ];
        let mut set = EmbeddingSet::new();
        let vectors = [[0.9f32, 0.1, 0.3], [0.2, 0.8, 0.1], [0.7, 0.3, 0.2], [0.1, 0.1, 0.9]];
        for (p, v) in posts.iter().zip(vectors) {
            set.insert(p.key(), Embedding::new(v.to_vec(), 3).unwrap());
        }

        let forward = SimilarityIndex::build(&[Source::Pikabu, Source::Habr], &posts, &set);
        let mut reversed_posts = posts.clone();
        reversed_posts.reverse();
        let reversed =
            SimilarityIndex::build(&[Source::Pikabu, Source::Habr], &reversed_posts, &set);

        for a in &posts[..2] {
            for b in &posts[2..] {
                let x = forward.score(&a.key(), &b.key()).unwrap();
                let y = reversed.score(&a.key(), &b.key()).unwrap();
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
    }
}
