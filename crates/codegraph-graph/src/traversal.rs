//! In-memory traversal over a snapshot of the persistent store.
//!
//! `GraphStore` is the durable source of truth; `GraphView` loads it into a
//! `petgraph::StableGraph` so neighborhood walks and impact analysis run as
//! plain graph algorithms instead of repeated SQL joins. Callers rebuild the
//! view after an index pass that touched many files; a single upsert doesn't
//! need one.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Direction as PetDirection;

use codegraph_core::model::{Entity, RelationshipType};

use crate::error::Result;
use crate::store::GraphStore;

/// An in-memory, read-only view of the entity/relationship graph.
pub struct GraphView {
    graph: StableGraph<Entity, RelationshipType, petgraph::Directed>,
    index: HashMap<String, NodeIndex>,
}

impl GraphView {
    pub fn build(store: &GraphStore) -> Result<Self> {
        let entities = store.all_entities()?;
        let relationships = store.all_relationships()?;

        let mut graph = StableGraph::new();
        let mut index = HashMap::with_capacity(entities.len());
        for entity in entities {
            let id = entity.id.clone();
            let node_idx = graph.add_node(entity);
            index.insert(id, node_idx);
        }
        for rel in relationships {
            if let (Some(&from), Some(&to)) = (index.get(&rel.from_id), index.get(&rel.to_id)) {
                graph.add_edge(from, to, rel.relationship_type);
            }
        }
        Ok(Self { graph, index })
    }

    pub fn entity_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn node_for(&self, entity_id: &str) -> Option<NodeIndex> {
        self.index.get(entity_id).copied()
    }

    /// Breadth-first neighborhood up to `depth` hops, in either direction.
    /// Used by `list_entity_relationships` and `get_graph` tools to bound
    /// how much of a potentially huge graph gets serialized.
    pub fn neighborhood(
        &self,
        entity_id: &str,
        depth: usize,
        direction: PetDirection,
    ) -> Vec<&Entity> {
        let Some(start) = self.node_for(entity_id) else {
            return Vec::new();
        };
        let mut visited = HashSet::new();
        visited.insert(start);
        let mut frontier = VecDeque::new();
        frontier.push_back((start, 0usize));
        let mut result = Vec::new();

        while let Some((node, d)) = frontier.pop_front() {
            if d >= depth {
                continue;
            }
            for neighbor in self.graph.neighbors_directed(node, direction) {
                if visited.insert(neighbor) {
                    result.push(neighbor);
                    frontier.push_back((neighbor, d + 1));
                }
            }
        }

        result.into_iter().filter_map(|idx| self.graph.node_weight(idx)).collect()
    }

    /// Direct + transitive dependents (things that would break) and
    /// dependencies (things this entity relies on) for impact analysis.
    pub fn impact_analysis(&self, entity_id: &str, max_depth: usize) -> ImpactReport {
        let Some(start) = self.node_for(entity_id) else {
            return ImpactReport::default();
        };

        let dependents = self.bfs_levels(start, PetDirection::Incoming, max_depth);
        let dependencies = self.bfs_levels(start, PetDirection::Outgoing, max_depth);

        ImpactReport {
            direct_dependents: self.entities_at_level(&dependents, 1),
            transitive_dependents: self.entities_beyond_level(&dependents, 1),
            direct_dependencies: self.entities_at_level(&dependencies, 1),
            transitive_dependencies: self.entities_beyond_level(&dependencies, 1),
        }
    }

    fn bfs_levels(
        &self,
        start: NodeIndex,
        direction: PetDirection,
        max_depth: usize,
    ) -> HashMap<NodeIndex, usize> {
        let mut levels = HashMap::new();
        levels.insert(start, 0);
        let mut frontier = VecDeque::new();
        frontier.push_back((start, 0usize));

        while let Some((node, d)) = frontier.pop_front() {
            if d >= max_depth {
                continue;
            }
            for neighbor in self.graph.neighbors_directed(node, direction) {
                if !levels.contains_key(&neighbor) {
                    levels.insert(neighbor, d + 1);
                    frontier.push_back((neighbor, d + 1));
                }
            }
        }
        levels.remove(&start);
        levels
    }

    fn entities_at_level(&self, levels: &HashMap<NodeIndex, usize>, target: usize) -> Vec<Entity> {
        levels
            .iter()
            .filter(|(_, &d)| d == target)
            .filter_map(|(idx, _)| self.graph.node_weight(*idx).cloned())
            .collect()
    }

    fn entities_beyond_level(&self, levels: &HashMap<NodeIndex, usize>, target: usize) -> Vec<Entity> {
        levels
            .iter()
            .filter(|(_, &d)| d > target)
            .filter_map(|(idx, _)| self.graph.node_weight(*idx).cloned())
            .collect()
    }
}

/// Entities grouped by how many relationship hops separate them from the
/// analyzed entity, split by direction.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ImpactReport {
    pub direct_dependents: Vec<Entity>,
    pub transitive_dependents: Vec<Entity>,
    pub direct_dependencies: Vec<Entity>,
    pub transitive_dependencies: Vec<Entity>,
}

/// A name-resolution candidate with a fuzzy match score in `[0.0, 1.0]`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResolvedCandidate {
    pub entity: Entity,
    pub score: f64,
}

/// Resolves a (possibly partial, possibly misspelled) name against every
/// entity in the store. Exact and substring matches score highest; anything
/// else falls back to normalized edit-distance similarity so typos still
/// surface a plausible top candidate instead of an empty result.
pub fn resolve_entity_candidates(
    store: &GraphStore,
    query: &str,
    limit: usize,
) -> Result<Vec<ResolvedCandidate>> {
    let entities = store.all_entities()?;
    let mut scored: Vec<ResolvedCandidate> = entities
        .into_iter()
        .map(|entity| {
            let score = name_similarity(&entity.name, query);
            ResolvedCandidate { entity, score }
        })
        .filter(|c| c.score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    Ok(scored)
}

fn name_similarity(name: &str, query: &str) -> f64 {
    if name == query {
        return 1.0;
    }
    if name.eq_ignore_ascii_case(query) {
        return 0.95;
    }
    if name.starts_with(query) {
        return 0.85;
    }
    if name.to_lowercase().contains(&query.to_lowercase()) {
        return 0.65;
    }
    let distance = levenshtein(name, query) as f64;
    let max_len = name.len().max(query.len()).max(1) as f64;
    let normalized = 1.0 - (distance / max_len);
    if normalized > 0.4 {
        normalized * 0.5
    } else {
        0.0
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev_diag
            } else {
                1 + prev_diag.min(row[j]).min(row[j - 1])
            };
            prev_diag = temp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_core::model::{Entity, EntityType, Location, Point};
    use std::collections::HashMap as Map;

    fn entity(id: &str, name: &str) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: EntityType::Function,
            file_path: "a.rs".to_string(),
            location: Location {
                start: Point { line: 1, col: 0, index: 0 },
                end: Point { line: 2, col: 0, index: 5 },
            },
            content_hash: "h".to_string(),
            metadata: Map::new(),
        }
    }

    fn store_with_chain() -> GraphStore {
        use codegraph_core::model::Relationship;
        let store = GraphStore::in_memory().unwrap();
        let a = entity("a", "a");
        let b = entity("b", "b");
        let c = entity("c", "c");
        store.upsert_entities(&[a.clone(), b.clone(), c.clone()]).unwrap();
        // a -> b -> c (a calls b, b calls c)
        store
            .upsert_relationships(&[
                Relationship::new(a.id.clone(), b.id.clone(), RelationshipType::Calls),
                Relationship::new(b.id.clone(), c.id.clone(), RelationshipType::Calls),
            ])
            .unwrap();
        store
    }

    #[test]
    fn neighborhood_respects_depth_limit() {
        let store = store_with_chain();
        let view = GraphView::build(&store).unwrap();
        let one_hop = view.neighborhood("a", 1, PetDirection::Outgoing);
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].id, "b");

        let two_hop = view.neighborhood("a", 2, PetDirection::Outgoing);
        assert_eq!(two_hop.len(), 2);
    }

    #[test]
    fn impact_analysis_separates_direct_from_transitive() {
        let store = store_with_chain();
        let view = GraphView::build(&store).unwrap();
        let report = view.impact_analysis("c", 5);
        let direct_ids: Vec<_> = report.direct_dependents.iter().map(|e| e.id.as_str()).collect();
        let transitive_ids: Vec<_> =
            report.transitive_dependents.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(direct_ids, vec!["b"]);
        assert_eq!(transitive_ids, vec!["a"]);
    }

    #[test]
    fn impact_analysis_on_unknown_entity_is_empty() {
        let store = store_with_chain();
        let view = GraphView::build(&store).unwrap();
        let report = view.impact_analysis("does-not-exist", 5);
        assert!(report.direct_dependents.is_empty());
    }

    #[test]
    fn resolve_entity_candidates_ranks_exact_above_fuzzy() {
        let store = GraphStore::in_memory().unwrap();
        store
            .upsert_entities(&[entity("x", "parse_file"), entity("y", "parse_files_in_dir")])
            .unwrap();
        let candidates = resolve_entity_candidates(&store, "parse_file", 10).unwrap();
        assert_eq!(candidates[0].entity.name, "parse_file");
        assert_eq!(candidates[0].score, 1.0);
        assert!(candidates[0].score > candidates[1].score);
    }

    #[test]
    fn resolve_entity_candidates_tolerates_typos() {
        let store = GraphStore::in_memory().unwrap();
        store.upsert_entities(&[entity("x", "parse_file")]).unwrap();
        let candidates = resolve_entity_candidates(&store, "parse_fil", 10).unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates[0].score > 0.5);
    }
}
