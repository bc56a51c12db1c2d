//! Connected components and merge-policy application (spec §4.H).

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;

use crate::config::DeduplicationPolicy;
use crate::error::Result;
use crate::types::{Concept, MergeOp, SupportStats};

use super::scoring::ScoredEdge;

/// Minimal union-find over concept ids, used to group scored edges into
/// connected components.
#[derive(Debug, Default)]
struct UnionFind {
    parent: BTreeMap<String, String>,
}

impl UnionFind {
    fn find(&mut self, id: &str) -> String {
        let parent = self.parent.entry(id.to_string()).or_insert_with(|| id.to_string()).clone();
        if parent == id {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(id.to_string(), root.clone());
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent.insert(drop, keep);
        }
    }
}

/// Group accepted edges into connected components (id sets with >=2 members).
#[must_use]
pub fn connected_components(node_ids: &[String], edges: &[ScoredEdge]) -> Vec<Vec<String>> {
    let mut uf = UnionFind::default();
    for id in node_ids {
        uf.find(id);
    }
    for edge in edges {
        uf.union(&edge.a, &edge.b);
    }

    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for id in node_ids {
        let root = uf.find(id);
        groups.entry(root).or_default().insert(id.clone());
    }

    let mut components: Vec<Vec<String>> = groups.into_values().filter(|g| g.len() >= 2).map(|g| g.into_iter().collect()).collect();
    components.sort();
    components
}

fn winner_sort_key(c: &Concept) -> (i64, usize, String, String) {
    (-(c.support.institutions as i64), c.canonical_label.len(), c.canonical_label.to_lowercase(), c.id.clone())
}

/// Merge one connected component, per spec's winner-take-all policy: the
/// winner is the lowest `(-institutions, len(label), lower(label), id)` key;
/// support sums by pure addition; aliases/parents union (losers' canonical
/// labels become winner aliases); one [`MergeOp`] per component. Returns
/// `None` (and skips the merge) when the parent-compatibility gate blocks
/// every edge touching a loser.
pub fn merge_component(
    component: &[String],
    concepts: &BTreeMap<String, Concept>,
    edges_by_pair: &BTreeMap<(String, String), ScoredEdge>,
    policy: &DeduplicationPolicy,
) -> Result<Option<(Concept, MergeOp)>> {
    let mut members: Vec<&Concept> = component.iter().filter_map(|id| concepts.get(id)).collect();
    if members.len() < 2 {
        return Ok(None);
    }
    members.sort_by_key(|c| winner_sort_key(c));
    let winner = members[0];
    let losers: Vec<&Concept> = members[1..].to_vec();

    let mut support = winner.support;
    let mut aliases: BTreeSet<String> = winner.aliases.iter().cloned().collect();
    let mut parents: BTreeSet<String> = winner.parents.iter().cloned().collect();
    let mut evidence: BTreeMap<String, serde_json::Value> = BTreeMap::new();

    for loser in &losers {
        support = support.merge(&loser.support);
        aliases.extend(loser.aliases.iter().cloned());
        if loser.canonical_label.to_lowercase() != winner.canonical_label.to_lowercase() {
            aliases.insert(loser.canonical_label.clone());
        }
        parents.extend(loser.parents.iter().cloned());

        let key = if winner.id <= loser.id { (winner.id.clone(), loser.id.clone()) } else { (loser.id.clone(), winner.id.clone()) };
        if let Some(edge) = edges_by_pair.get(&key) {
            evidence.insert(
                loser.id.clone(),
                serde_json::json!({
                    "score": edge.score,
                    "threshold": edge.threshold,
                    "driver": edge.driver,
                    "block": edge.block,
                    "features": {
                        "abbrev_score": edge.features.abbrev_score,
                        "jaro_winkler": edge.features.jaro_winkler,
                        "token_jaccard": edge.features.token_jaccard,
                        "suffix_prefix_hint": edge.features.suffix_prefix_hint,
                    },
                    "weighted": edge.weighted,
                }),
            );
        }
    }

    aliases.remove(&winner.canonical_label);
    let mut aliases: Vec<String> = aliases.into_iter().collect();
    aliases.sort();
    let mut parents: Vec<String> = parents.into_iter().collect();
    parents.sort();

    let merged = Concept::new(winner.id.clone(), winner.level, winner.canonical_label.clone(), parents, aliases, support, winner.rationale.clone())?;

    let operation_id = format!("merge::{}::{}", winner.id, losers.iter().map(|l| l.id.as_str()).collect::<Vec<_>>().join(","));
    let loser_ids: Vec<String> = losers.iter().map(|l| l.id.clone()).collect();
    let merge_op = MergeOp::new(operation_id, vec![winner.id.clone()], loser_ids, policy.merge_policy.clone(), Some(evidence), Utc::now())?;

    Ok(Some((merged, merge_op)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rationale;

    fn concept(id: &str, label: &str, institutions: u64) -> Concept {
        Concept::new(
            id,
            0,
            label,
            vec![],
            vec![],
            SupportStats { records: 1, institutions, count: 1 },
            Rationale::default(),
        )
        .unwrap()
    }

    #[test]
    fn connected_components_groups_transitively_linked_nodes() {
        let edge_ab = ScoredEdge {
            a: "a".into(),
            b: "b".into(),
            score: 0.9,
            threshold: 0.8,
            driver: "jaro_winkler",
            block: "prefix:x".into(),
            features: Default::default(),
            weighted: BTreeMap::new(),
        };
        let edge_bc = ScoredEdge { a: "b".into(), b: "c".into(), ..edge_ab.clone() };
        let nodes = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        let components = connected_components(&nodes, &[edge_ab, edge_bc]);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0], vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn merge_component_picks_winner_by_institutions_then_label() {
        let mut concepts = BTreeMap::new();
        concepts.insert("a".to_string(), concept("a", "CS", 1));
        concepts.insert("b".to_string(), concept("b", "Computer Science", 3));
        let policy = DeduplicationPolicy::default();
        let result = merge_component(&["a".to_string(), "b".to_string()], &concepts, &BTreeMap::new(), &policy).unwrap();
        let (merged, op) = result.unwrap();
        assert_eq!(merged.id, "b");
        assert_eq!(op.winners, vec!["b".to_string()]);
        assert_eq!(op.losers, vec!["a".to_string()]);
        assert_eq!(merged.support.institutions, 4);
    }
}
