//! Retrieval engine.
//!
//! Read-only operations against the store: semantic search, metadata-filtered
//! search, and 2-D projection for the dashboard's neighborhood view.

use crate::embedder::Embedder;
use crate::error::OmniResult;
use crate::index::MetadataIndex;
use crate::types::{ChunkKind, ProjectionPoint, SearchResult};

/// Batch size for streaming embedding comparisons, so a single-threaded
/// runtime can yield control between batches on a large store.
const SEARCH_BATCH_SIZE: usize = 100;

/// Retrieval engine over a store and an embedder.
pub struct SearchEngine;

impl SearchEngine {
    /// Embed `query`, compare against every stored embedding in batches, and
    /// return chunks scoring at or above `threshold`, ranked descending,
    /// truncated to `k`.
    pub fn search(
        query: &str,
        k: usize,
        threshold: f64,
        index: &MetadataIndex,
        embedder: &Embedder,
    ) -> OmniResult<Vec<SearchResult>> {
        if !embedder.is_available() {
            return Ok(Vec::new());
        }
        let query_vector = embedder.embed_single(query)?;
        let embeddings = index.all_embeddings()?;
        let scored = score_against_query(&query_vector, &embeddings, threshold);
        Self::join_and_truncate(scored, k, index)
    }

    /// Filter to chunks of `kind`, then rank the filtered set by similarity
    /// to `kind`'s own name embedded as a pseudo-query.
    pub fn search_by_kind(
        kind: ChunkKind,
        k: usize,
        index: &MetadataIndex,
        embedder: &Embedder,
    ) -> OmniResult<Vec<SearchResult>> {
        let files = index.files_by_syntax_kind(kind)?;
        Self::rank_within_files(&files, kind.as_str(), k, index, embedder)
    }

    /// Filter to chunks tagged with `domain`, then rank by similarity to the
    /// domain tag string itself.
    pub fn search_by_domain(
        domain: &str,
        k: usize,
        index: &MetadataIndex,
        embedder: &Embedder,
    ) -> OmniResult<Vec<SearchResult>> {
        let all = index.all_chunks()?;
        let files: Vec<String> = all
            .iter()
            .filter(|c| c.domain_tags.contains(domain))
            .map(|c| c.file.clone())
            .collect();
        Self::rank_within_files(&files, domain, k, index, embedder)
    }

    fn rank_within_files(
        files: &[String],
        query: &str,
        k: usize,
        index: &MetadataIndex,
        embedder: &Embedder,
    ) -> OmniResult<Vec<SearchResult>> {
        if files.is_empty() || !embedder.is_available() {
            return Ok(Vec::new());
        }
        let query_vector = embedder.embed_single(query)?;
        let file_set: std::collections::HashSet<&str> = files.iter().map(String::as_str).collect();
        let embeddings: Vec<(String, Vec<f32>)> = index
            .all_embeddings()?
            .into_iter()
            .filter(|(chunk_id, _)| file_set.iter().any(|f| chunk_id.starts_with(f)))
            .collect();
        let scored = score_against_query(&query_vector, &embeddings, -1.0);
        Self::join_and_truncate(scored, k, index)
    }

    fn join_and_truncate(
        mut scored: Vec<(String, f64)>,
        k: usize,
        index: &MetadataIndex,
    ) -> OmniResult<Vec<SearchResult>> {
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let all_chunks = index.all_chunks()?;
        let mut results = Vec::with_capacity(scored.len());
        for (chunk_id, similarity) in scored {
            if let Some(chunk) = all_chunks.iter().find(|c| c.id == chunk_id) {
                results.push(SearchResult {
                    chunk: chunk.clone(),
                    similarity,
                });
            }
        }
        Ok(results)
    }

    /// 2-D coordinates for every embedded chunk. Returns the cache verbatim
    /// when its recorded embedding count matches the store's current count;
    /// otherwise recomputes and replaces the cache atomically. Fewer than two
    /// embeddings yields degenerate `(0,0)` coordinates for each.
    pub fn projection(index: &mut MetadataIndex) -> OmniResult<Vec<(String, ProjectionPoint)>> {
        let embeddings = index.all_embeddings()?;
        let current_count = embeddings.len();

        if current_count < 2 {
            return Ok(embeddings
                .into_iter()
                .map(|(id, _)| (id, ProjectionPoint { x: 0.0, y: 0.0 }))
                .collect());
        }

        let cached = index.cached_projections()?;
        if !cached.is_empty() && cached.iter().all(|(_, _, count)| *count == current_count) {
            return Ok(cached.into_iter().map(|(id, point, _)| (id, point)).collect());
        }

        let points = mds_project(&embeddings);
        index.clear_projections()?;
        for (id, point) in &points {
            index.store_projection(id, *point, current_count)?;
        }
        Ok(points)
    }
}

/// Cosine similarity against every `(id, vector)` pair, in batches, dropping
/// anything below `threshold`. Vectors are pre-normalized (invariant 3 of the
/// data model), so cosine similarity reduces to a dot product.
fn score_against_query(query: &[f32], embeddings: &[(String, Vec<f32>)], threshold: f64) -> Vec<(String, f64)> {
    let mut scored = Vec::new();
    for batch in embeddings.chunks(SEARCH_BATCH_SIZE) {
        for (id, vector) in batch {
            let similarity = dot_product(query, vector);
            if similarity >= threshold {
                scored.push((id.clone(), similarity));
            }
        }
    }
    scored
}

fn dot_product(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

/// Deterministic classical MDS projection (SMACOF-style stress majorization)
/// from cosine distance to 2-D, for a small, bounded step budget. Converges
/// given identical input, satisfying the determinism requirement without
/// depending on a specific dimensionality-reduction library.
fn mds_project(embeddings: &[(String, Vec<f32>)]) -> Vec<(String, ProjectionPoint)> {
    const MAX_ITERATIONS: usize = 100;
    let n = embeddings.len();

    // Pairwise cosine distance matrix: 1 - cosine_similarity, clamped to [0, 2].
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = (1.0 - dot_product(&embeddings[i].1, &embeddings[j].1)).clamp(0.0, 2.0);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    // Deterministic initial layout on the unit circle (no RNG dependency).
    let mut coords: Vec<(f64, f64)> = (0..n)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * (i as f64) / (n as f64);
            (angle.cos(), angle.sin())
        })
        .collect();

    for _ in 0..MAX_ITERATIONS {
        let mut next = coords.clone();
        for i in 0..n {
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            let mut weight_total = 0.0;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let (dx, dy) = (coords[i].0 - coords[j].0, coords[i].1 - coords[j].1);
                let current_dist = (dx * dx + dy * dy).sqrt().max(1e-9);
                let target_dist = dist[i][j];
                let factor = target_dist / current_dist;
                sum_x += coords[j].0 + dx * factor;
                sum_y += coords[j].1 + dy * factor;
                weight_total += 1.0;
            }
            if weight_total > 0.0 {
                next[i] = (sum_x / weight_total, sum_y / weight_total);
            }
        }
        coords = next;
    }

    embeddings
        .iter()
        .zip(coords)
        .map(|((id, _), (x, y))| {
            (
                id.clone(),
                ProjectionPoint {
                    x: x as f32,
                    y: y as f32,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product_on_identical_vectors_is_one() {
        let v = vec![1.0f32, 0.0, 0.0];
        assert!((dot_product(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_against_query_respects_threshold() {
        let embeddings = vec![
            ("a".to_string(), vec![1.0f32, 0.0]),
            ("b".to_string(), vec![0.0f32, 1.0]),
        ];
        let query = vec![1.0f32, 0.0];
        let scored = score_against_query(&query, &embeddings, 0.5);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].0, "a");
    }

    #[test]
    fn test_mds_project_is_deterministic() {
        let embeddings = vec![
            ("a".to_string(), vec![1.0f32, 0.0, 0.0]),
            ("b".to_string(), vec![0.0f32, 1.0, 0.0]),
            ("c".to_string(), vec![0.0f32, 0.0, 1.0]),
        ];
        let first = mds_project(&embeddings);
        let second = mds_project(&embeddings);
        for ((_, p1), (_, p2)) in first.iter().zip(second.iter()) {
            assert!((p1.x - p2.x).abs() < 1e-9);
            assert!((p1.y - p2.y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_projection_degenerate_below_two_embeddings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index = MetadataIndex::open(&dir.path().join("t.db")).expect("open");
        let points = SearchEngine::projection(&mut index).expect("projection");
        assert!(points.is_empty());
    }
}
