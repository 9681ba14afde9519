//! Knowledge graph writer

use crate::error::WriterError;
use async_trait::async_trait;
use parking_lot::RwLock;
use picker_artifact::{GraphDelta, NodeRef, Properties};
use picker_symbol::Symbol;
use std::collections::BTreeMap;

/// Node labels and relationship names of the signal graph
pub mod labels {
    pub const COMPANY: &str = "Company";
    pub const METRIC: &str = "Metric";
    pub const SENTIMENT: &str = "Sentiment";
    pub const SUMMARY: &str = "Summary";
    pub const SCREENING: &str = "Screening";
    pub const THREAD: &str = "Thread";

    pub const HAS_METRIC: &str = "HAS_METRIC";
    pub const HAS_SENTIMENT: &str = "HAS_SENTIMENT";
    pub const HAS_SUMMARY: &str = "HAS_SUMMARY";
    pub const SCREENED_AS: &str = "SCREENED_AS";
    pub const DISCUSSED_IN: &str = "DISCUSSED_IN";
    pub const COMPETES_WITH: &str = "COMPETES_WITH";
}

/// Applies graph deltas
///
/// Implementations upsert by node and edge key; applying the same delta
/// twice leaves the graph unchanged.
#[async_trait]
pub trait GraphWriter: Send + Sync {
    fn name(&self) -> &str {
        "graph"
    }

    async fn apply(&self, delta: &GraphDelta) -> Result<(), WriterError>;
}

type EdgeKey = (NodeRef, String, NodeRef);

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeRef, Properties>,
    edges: BTreeMap<EdgeKey, Properties>,
}

/// In-process property graph
///
/// A delta is validated first and then applied under one write lock, so
/// readers see either none or all of it.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
}

impl MemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn node(&self, id: &NodeRef) -> Option<Properties> {
        self.state.read().nodes.get(id).cloned()
    }

    #[must_use]
    pub fn edge(&self, from: &NodeRef, rel: &str, to: &NodeRef) -> Option<Properties> {
        let key = (from.clone(), rel.to_string(), to.clone());
        self.state.read().edges.get(&key).cloned()
    }

    /// Outgoing neighbours, optionally restricted to one relationship
    #[must_use]
    pub fn neighbors(&self, from: &NodeRef, rel: Option<&str>) -> Vec<NodeRef> {
        self.state
            .read()
            .edges
            .keys()
            .filter(|(f, r, _)| f == from && rel.map_or(true, |rel| r == rel))
            .map(|(_, _, to)| to.clone())
            .collect()
    }

    /// `name -> value` of a company's `HAS_METRIC` neighbours
    #[must_use]
    pub fn company_metrics(&self, symbol: &Symbol) -> BTreeMap<String, f64> {
        let company = NodeRef::new(labels::COMPANY, symbol.as_str());
        let state = self.state.read();
        state
            .edges
            .keys()
            .filter(|(f, r, _)| *f == company && r == labels::HAS_METRIC)
            .filter_map(|(_, _, metric)| {
                let props = state.nodes.get(metric)?;
                let name = props.get("name")?.as_str()?.to_string();
                let value = props.get("value")?.as_f64()?;
                Some((name, value))
            })
            .collect()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }

    pub(crate) fn validate(delta: &GraphDelta) -> Result<(), WriterError> {
        if let Some(edge) = delta.dangling_edges().first() {
            return Err(WriterError::invalid(
                "graph",
                format!(
                    "edge {} -[{}]-> {} references a node missing from the delta",
                    edge.from, edge.rel, edge.to
                ),
            ));
        }
        Ok(())
    }

    /// Upsert every node and edge of an already validated delta
    pub(crate) fn merge(&self, delta: &GraphDelta) {
        let mut state = self.state.write();
        for node in delta.nodes() {
            state
                .nodes
                .entry(node.id.clone())
                .or_default()
                .extend(node.properties.clone());
        }
        for edge in delta.edges() {
            state
                .edges
                .entry((edge.from.clone(), edge.rel.clone(), edge.to.clone()))
                .or_default()
                .extend(edge.properties.clone());
        }
    }
}

#[async_trait]
impl GraphWriter for MemoryGraphStore {
    async fn apply(&self, delta: &GraphDelta) -> Result<(), WriterError> {
        Self::validate(delta)?;
        self.merge(delta);
        tracing::debug!(
            symbol = %delta.symbol,
            nodes = delta.nodes().len(),
            edges = delta.edges().len(),
            "graph delta applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picker_artifact::props;
    use serde_json::json;

    fn acme() -> Symbol {
        Symbol::parse("ACME").unwrap()
    }

    fn delta() -> GraphDelta {
        let company = NodeRef::new(labels::COMPANY, "ACME");
        let roe = NodeRef::new(labels::METRIC, "ACME:ROE");
        let mut delta = GraphDelta::new(acme());
        delta
            .upsert_node(company.clone(), props([("name", json!("Acme"))]))
            .upsert_node(roe.clone(), props([("name", json!("ROE")), ("value", json!(18.0))]))
            .upsert_edge(company, labels::HAS_METRIC, roe, Properties::new());
        delta
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let store = MemoryGraphStore::new();
        store.apply(&delta()).await.unwrap();
        store.apply(&delta()).await.unwrap();
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.company_metrics(&acme()).get("ROE"), Some(&18.0));
    }

    #[tokio::test]
    async fn upsert_merges_properties() {
        let store = MemoryGraphStore::new();
        store.apply(&delta()).await.unwrap();

        let mut update = GraphDelta::new(acme());
        update.upsert_node(
            NodeRef::new(labels::COMPANY, "ACME"),
            props([("sector", json!("Chemicals"))]),
        );
        store.apply(&update).await.unwrap();

        let company = store.node(&NodeRef::new(labels::COMPANY, "ACME")).unwrap();
        assert_eq!(company["name"], json!("Acme"));
        assert_eq!(company["sector"], json!("Chemicals"));
    }

    #[tokio::test]
    async fn dangling_edge_rejects_whole_delta() {
        let store = MemoryGraphStore::new();
        let mut bad = delta();
        bad.upsert_edge(
            NodeRef::new(labels::COMPANY, "ACME"),
            labels::COMPETES_WITH,
            NodeRef::new(labels::COMPANY, "BETA"),
            Properties::new(),
        );
        let err = store.apply(&bad).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.edge_count(), 0);
    }

    #[tokio::test]
    async fn neighbors_filter_by_relationship() {
        let store = MemoryGraphStore::new();
        store.apply(&delta()).await.unwrap();
        let company = NodeRef::new(labels::COMPANY, "ACME");
        assert_eq!(store.neighbors(&company, Some(labels::HAS_METRIC)).len(), 1);
        assert!(store.neighbors(&company, Some(labels::HAS_SUMMARY)).is_empty());
    }
}
