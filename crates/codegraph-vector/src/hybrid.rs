//! Hybrid ranker: fuses semantic vector hits with a structural file set.
//!
//! `rerank_semantic_hits` is the one formula the whole component exists to
//! run: `finalScore = semanticScore + structuralBoost`, where the boost is a
//! flat `0.15` when the hit's normalized path appears in a structural file
//! set gathered from a prior graph query, else `0`. Ties keep their
//! original relative order (a stable sort), so a hit already favored by the
//! semantic search doesn't get arbitrarily reshuffled among equal scores.

use std::collections::HashSet;

use serde::Serialize;

use crate::vector_store::VectorHit;

/// Additive boost applied when a hit's path is in the structural set.
pub const STRUCTURAL_BOOST: f32 = 0.15;

/// One reranked hit, carrying both the original signals and the fused
/// score — telemetry wants to see the components, not just the total.
#[derive(Debug, Clone, Serialize)]
pub struct HybridHit {
    pub entity_id: String,
    pub semantic_score: f32,
    pub structural_boost: f32,
    pub final_score: f32,
    pub path: String,
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}

/// Merge raw vector-store hits with a structural file set. `structural_set`
/// holds already-normalized paths from a prior graph query; an empty set
/// degenerates to a pure semantic ranking (`finalScore == semanticScore`).
pub fn rerank_semantic_hits(hits: Vec<VectorHit>, structural_set: &HashSet<String>) -> Vec<HybridHit> {
    let mut reranked: Vec<HybridHit> = hits
        .into_iter()
        .map(|hit| {
            let normalized_path = normalize_path(&hit.metadata.path);
            let boost = if structural_set.contains(&normalized_path) {
                STRUCTURAL_BOOST
            } else {
                0.0
            };
            HybridHit {
                entity_id: hit.entity_id,
                semantic_score: hit.score,
                structural_boost: boost,
                final_score: hit.score + boost,
                path: normalized_path,
            }
        })
        .collect();

    // stable_sort_by preserves original relative order among ties.
    reranked.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    reranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::VectorMetadata;

    fn hit(entity_id: &str, score: f32, path: &str) -> VectorHit {
        VectorHit {
            entity_id: entity_id.to_string(),
            score,
            metadata: VectorMetadata {
                path: path.to_string(),
                entity_type: "function".to_string(),
                name: entity_id.to_string(),
                language: "rust".to_string(),
            },
        }
    }

    #[test]
    fn empty_structural_set_leaves_semantic_score_unchanged() {
        let hits = vec![hit("a", 0.9, "/a.ts"), hit("b", 0.5, "/b.ts")];
        let reranked = rerank_semantic_hits(hits, &HashSet::new());
        assert_eq!(reranked[0].final_score, 0.9);
        assert_eq!(reranked[1].final_score, 0.5);
    }

    #[test]
    fn structural_boost_can_overtake_a_higher_semantic_score() {
        let hits = vec![hit("b_hit", 0.92, "/b.ts"), hit("a_hit", 0.90, "/a.ts")];
        let mut structural = HashSet::new();
        structural.insert("/a.ts".to_string());

        let reranked = rerank_semantic_hits(hits, &structural);
        assert_eq!(reranked[0].entity_id, "a_hit");
        assert!((reranked[0].final_score - 1.05).abs() < 1e-6);
        assert_eq!(reranked[1].entity_id, "b_hit");
    }

    #[test]
    fn ties_preserve_original_order() {
        let hits = vec![hit("first", 0.5, "/x.ts"), hit("second", 0.5, "/y.ts")];
        let reranked = rerank_semantic_hits(hits, &HashSet::new());
        assert_eq!(reranked[0].entity_id, "first");
        assert_eq!(reranked[1].entity_id, "second");
    }
}
