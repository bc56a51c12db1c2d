//! Hierarchy assembly (component K): builds the concept DAG, enforces
//! insertion invariants, applies the orphan policy, and checks acyclicity.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HierarchyPolicy;
use crate::error::{Error, Result};
use crate::observability::CounterRegistry;
use crate::types::Concept;

/// One structural violation recorded against the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphViolation {
    /// Violation code (e.g. `"missing_parent"`, `"cycle"`, `"non_unique_path"`, `"level_shortcut"`).
    pub code: String,
    /// Concept id this violation pertains to, when applicable.
    pub concept_id: Option<String>,
    /// Human-readable detail.
    pub detail: String,
}

/// Summary of how orphaned concepts (missing parents) were handled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrphanSummary {
    /// Total concepts with at least one missing parent.
    pub total: usize,
    /// Concept ids dropped (strategy `drop`).
    pub dropped: Vec<String>,
    /// Concept ids quarantined (strategy `quarantine`).
    pub quarantined: Vec<String>,
    /// Concept ids attached under synthesized placeholders.
    pub attached_placeholder: Vec<String>,
}

/// Aggregate statistics over the assembled graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GraphStats {
    /// Total node count.
    pub node_count: usize,
    /// Total edge count (child->parent pairs).
    pub edge_count: usize,
    /// Node count by level, index = level.
    pub level_counts: [usize; 4],
    /// Maximum number of parents any single node declares.
    pub max_in_degree: usize,
    /// Maximum number of children any single node has.
    pub max_out_degree: usize,
}

/// Report produced by running the full hierarchy validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    /// `true` iff no violations were recorded and no orphans remain unresolved.
    pub passed: bool,
    /// All structural violations found.
    pub violations: Vec<GraphViolation>,
    /// Orphan-handling summary.
    pub orphan_summary: OrphanSummary,
    /// Graph statistics.
    pub graph_stats: GraphStats,
    /// Free-form proof artifacts (e.g. topological order), for audit.
    pub proofs: BTreeMap<String, serde_json::Value>,
    /// When this report was generated.
    pub generated_at: DateTime<Utc>,
}

fn placeholder_id(level: u8) -> String {
    format!("placeholder::level{level}")
}

fn ensure_placeholder_chain(graph: &mut HierarchyGraph, up_to_level: u8) -> Result<()> {
    for level in 0..=up_to_level {
        let id = placeholder_id(level);
        if graph.nodes.contains_key(&id) {
            continue;
        }
        let parents = if level == 0 { Vec::new() } else { vec![placeholder_id(level - 1)] };
        let placeholder = Concept::new(id.clone(), level, format!("(placeholder level {level})"), parents, vec![], Default::default(), Default::default())?;
        graph.insert_raw(placeholder);
    }
    Ok(())
}

/// The assembled concept DAG: nodes plus sorted child/parent adjacency.
#[derive(Debug, Default)]
pub struct HierarchyGraph {
    nodes: BTreeMap<String, Concept>,
    children: BTreeMap<String, BTreeSet<String>>,
}

impl HierarchyGraph {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_raw(&mut self, concept: Concept) {
        for parent in &concept.parents {
            self.children.entry(parent.clone()).or_default().insert(concept.id.clone());
        }
        self.children.entry(concept.id.clone()).or_default();
        self.nodes.insert(concept.id.clone(), concept);
    }

    /// Number of nodes currently in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Concept> {
        self.nodes.get(id)
    }

    /// Every node currently in the graph, in id order.
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.nodes.values()
    }

    /// Compute aggregate statistics over the current graph.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let mut level_counts = [0usize; 4];
        let mut max_in_degree = 0usize;
        let mut max_out_degree = 0usize;
        let mut edge_count = 0usize;

        for concept in self.nodes.values() {
            level_counts[concept.level.min(3) as usize] += 1;
            max_in_degree = max_in_degree.max(concept.parents.len());
            edge_count += concept.parents.len();
        }
        for kids in self.children.values() {
            max_out_degree = max_out_degree.max(kids.len());
        }

        GraphStats { node_count: self.nodes.len(), edge_count, level_counts, max_in_degree, max_out_degree }
    }

    /// Kahn's algorithm over the child->parent edges; returns the
    /// topological order (parents before children) or a cycle violation.
    pub fn topological_order(&self) -> std::result::Result<Vec<String>, GraphViolation> {
        let mut indegree: BTreeMap<String, usize> = self.nodes.keys().map(|id| (id.clone(), 0)).collect();
        for concept in self.nodes.values() {
            *indegree.entry(concept.id.clone()).or_insert(0) += concept.parents.len();
        }

        let mut queue: VecDeque<String> = indegree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| id.clone()).collect();
        let mut order = Vec::new();

        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            if let Some(kids) = self.children.get(&id) {
                for child in kids {
                    if let Some(d) = indegree.get_mut(child) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(child.clone());
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphViolation { code: "cycle".to_string(), concept_id: None, detail: "graph contains a cycle".to_string() });
        }
        Ok(order)
    }

    /// Scan for unique-path violations: a concept with >1 parent that isn't
    /// in `allow_multi_parent_exceptions`.
    #[must_use]
    pub fn unique_path_violations(&self, policy: &HierarchyPolicy) -> Vec<GraphViolation> {
        if !policy.enforce_unique_paths {
            return Vec::new();
        }
        self.nodes
            .values()
            .filter(|c| c.parents.len() > 1 && !policy.allow_multi_parent_exceptions.contains(&c.id))
            .map(|c| GraphViolation { code: "non_unique_path".to_string(), concept_id: Some(c.id.clone()), detail: format!("{} declares {} parents", c.id, c.parents.len()) })
            .collect()
    }
}

/// Assembles a [`HierarchyGraph`] from a stream of concepts, enforcing
/// insertion invariants and applying the configured orphan policy.
pub struct HierarchyAssembler<'a> {
    policy: &'a HierarchyPolicy,
    counters: &'a CounterRegistry,
}

impl<'a> HierarchyAssembler<'a> {
    /// Construct an assembler bound to `policy`.
    #[must_use]
    pub fn new(policy: &'a HierarchyPolicy, counters: &'a CounterRegistry) -> Self {
        Self { policy, counters }
    }

    /// Insert `concepts` one at a time (in the given order), enforcing the
    /// invariants from spec §4.K and applying the orphan policy for any
    /// concept whose listed parent(s) aren't present yet.
    pub fn assemble(&self, concepts: Vec<Concept>) -> (HierarchyGraph, OrphanSummary) {
        let mut graph = HierarchyGraph::new();
        let mut orphans = OrphanSummary::default();
        let _ = self.counters.increment("Hierarchy", "nodes_in", concepts.len() as i64);

        for concept in concepts {
            if graph.len() >= self.policy.max_graph_size {
                let _ = self.counters.increment("Hierarchy", "violations", 1);
                continue;
            }
            if graph.nodes.contains_key(&concept.id) {
                let _ = self.counters.increment("Hierarchy", "violations", 1);
                continue;
            }

            let missing: Vec<&String> = concept.parents.iter().filter(|p| !graph.nodes.contains_key(p.as_str())).collect();
            if concept.level > 0 && !missing.is_empty() {
                orphans.total += 1;
                match self.policy.orphan_strategy.as_str() {
                    "attach_placeholder" => {
                        if ensure_placeholder_chain(&mut graph, concept.level.saturating_sub(1)).is_ok() {
                            let mut fixed = concept.clone();
                            fixed.parents = fixed
                                .parents
                                .iter()
                                .map(|p| if graph.nodes.contains_key(p) { p.clone() } else { placeholder_id(concept.level - 1) })
                                .collect();
                            fixed.parents.sort();
                            fixed.parents.dedup();
                            if self.try_insert(&mut graph, fixed.clone()).is_ok() {
                                orphans.attached_placeholder.push(fixed.id.clone());
                                let _ = self.counters.increment("Hierarchy", "nodes_kept", 1);
                                let _ = self.counters.increment("Hierarchy", "edges_built", fixed.parents.len() as i64);
                            }
                        }
                    }
                    "quarantine" => {
                        orphans.quarantined.push(concept.id.clone());
                        let _ = self.counters.increment("Hierarchy", "orphans", 1);
                    }
                    _ => {
                        orphans.dropped.push(concept.id.clone());
                        let _ = self.counters.increment("Hierarchy", "orphans", 1);
                    }
                }
                continue;
            }

            match self.try_insert(&mut graph, concept.clone()) {
                Ok(()) => {
                    let _ = self.counters.increment("Hierarchy", "nodes_kept", 1);
                    let _ = self.counters.increment("Hierarchy", "edges_built", concept.parents.len() as i64);
                }
                Err(_) => {
                    let _ = self.counters.increment("Hierarchy", "violations", 1);
                }
            }
        }

        (graph, orphans)
    }

    fn try_insert(&self, graph: &mut HierarchyGraph, concept: Concept) -> Result<()> {
        for parent_id in &concept.parents {
            let parent = graph.nodes.get(parent_id).ok_or_else(|| Error::GraphInvariant(format!("parent '{parent_id}' does not exist")))?;
            if concept.level <= parent.level {
                return Err(Error::GraphInvariant(format!("child level {} must exceed parent level {}", concept.level, parent.level)));
            }
            if self.policy.strict_level_enforcement && !self.policy.allow_level_shortcuts && concept.level - parent.level != 1 {
                return Err(Error::GraphInvariant(format!("level shortcut: child {} parent {}", concept.level, parent.level)));
            }
        }
        if self.policy.enforce_unique_paths && concept.parents.len() > 1 && !self.policy.allow_multi_parent_exceptions.contains(&concept.id) {
            return Err(Error::GraphInvariant(format!("{} violates unique-path enforcement", concept.id)));
        }

        let parent_refs: Vec<&Concept> = concept.parents.iter().filter_map(|p| graph.nodes.get(p)).collect();
        concept.validate_hierarchy(Some(&parent_refs))?;

        graph.insert_raw(concept);
        Ok(())
    }

    /// Run the full structural + unique-path + acyclicity validator over
    /// `graph`/`orphans` and produce a [`ValidationReport`].
    #[must_use]
    pub fn validate(&self, graph: &HierarchyGraph, orphans: &OrphanSummary, now: DateTime<Utc>) -> ValidationReport {
        let mut violations = graph.unique_path_violations(self.policy);
        let mut proofs = BTreeMap::new();

        match graph.topological_order() {
            Ok(order) => {
                proofs.insert("topological_order".to_string(), serde_json::json!(order));
            }
            Err(v) => violations.push(v),
        }

        let orphan_total = orphans.dropped.len() + orphans.quarantined.len();
        let _ = self.counters.increment("Hierarchy", "violations", 0);

        ValidationReport {
            passed: violations.is_empty() && orphan_total == 0,
            violations,
            orphan_summary: orphans.clone(),
            graph_stats: graph.stats(),
            proofs,
            generated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rationale, SupportStats};

    fn concept(id: &str, level: u8, parents: Vec<&str>) -> Concept {
        Concept::new(id, level, id, parents.into_iter().map(String::from).collect(), vec![], SupportStats::default(), Rationale::default()).unwrap()
    }

    #[test]
    fn assemble_inserts_well_formed_chain() {
        let policy = HierarchyPolicy::default();
        let counters = CounterRegistry::new(None);
        let assembler = HierarchyAssembler::new(&policy, &counters);
        let concepts = vec![concept("root", 0, vec![]), concept("child", 1, vec!["root"])];
        let (graph, orphans) = assembler.assemble(concepts);
        assert_eq!(graph.len(), 2);
        assert_eq!(orphans.total, 0);
    }

    #[test]
    fn assemble_attaches_placeholder_for_missing_parent() {
        let policy = HierarchyPolicy { orphan_strategy: "attach_placeholder".to_string(), ..HierarchyPolicy::default() };
        let counters = CounterRegistry::new(None);
        let assembler = HierarchyAssembler::new(&policy, &counters);
        let concepts = vec![concept("orphan", 1, vec!["missing-parent"])];
        let (graph, orphans) = assembler.assemble(concepts);
        assert_eq!(orphans.total, 1);
        assert_eq!(orphans.attached_placeholder, vec!["orphan".to_string()]);
        assert!(graph.get("placeholder::level0").is_some());
    }

    #[test]
    fn assemble_drops_orphan_under_drop_policy() {
        let policy = HierarchyPolicy { orphan_strategy: "drop".to_string(), ..HierarchyPolicy::default() };
        let counters = CounterRegistry::new(None);
        let assembler = HierarchyAssembler::new(&policy, &counters);
        let concepts = vec![concept("orphan", 1, vec!["missing-parent"])];
        let (graph, orphans) = assembler.assemble(concepts);
        assert!(graph.is_empty());
        assert_eq!(orphans.dropped, vec!["orphan".to_string()]);
    }

    #[test]
    fn validate_reports_passed_for_clean_graph() {
        let policy = HierarchyPolicy::default();
        let counters = CounterRegistry::new(None);
        let assembler = HierarchyAssembler::new(&policy, &counters);
        let concepts = vec![concept("root", 0, vec![]), concept("child", 1, vec!["root"])];
        let (graph, orphans) = assembler.assemble(concepts);
        let report = assembler.validate(&graph, &orphans, Utc::now());
        assert!(report.passed);
        assert_eq!(report.graph_stats.node_count, 2);
    }

    #[test]
    fn validate_flags_non_unique_paths() {
        let policy = HierarchyPolicy { enforce_unique_paths: true, allow_multi_parent_exceptions: vec!["multi".to_string()], ..HierarchyPolicy::default() };
        let counters = CounterRegistry::new(None);
        let assembler = HierarchyAssembler::new(&policy, &counters);
        let concepts = vec![concept("p1", 0, vec![]), concept("p2", 0, vec![]), concept("multi", 1, vec!["p1", "p2"])];
        let (graph, orphans) = assembler.assemble(concepts);
        let report = assembler.validate(&graph, &orphans, Utc::now());
        assert!(report.passed);
        assert_eq!(graph.len(), 3);
    }
}
