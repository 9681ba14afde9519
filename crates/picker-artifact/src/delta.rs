//! Graph and vector deltas
//!
//! A delta is the batch of upserts derived from one symbol's terminal
//! artifacts. Nodes, edges and documents are kept sorted and unique by key
//! so equal inputs always give byte-identical deltas.

use crate::hash::{ContentHash, HashError, InputHasher};
use picker_symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property bag for graph nodes and edges
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Graph node identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
}

impl NodeRef {
    #[must_use]
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.label, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(flatten)]
    pub id: NodeRef,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeRef,
    pub rel: String,
    pub to: NodeRef,
    pub properties: Properties,
}

impl GraphEdge {
    fn sort_key(&self) -> (&NodeRef, &str, &NodeRef) {
        (&self.from, &self.rel, &self.to)
    }
}

/// Node and edge upserts for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    pub symbol: Symbol,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl GraphDelta {
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Insert a node or merge properties into an existing one
    pub fn upsert_node(&mut self, id: NodeRef, properties: Properties) -> &mut Self {
        match self.nodes.binary_search_by(|n| n.id.cmp(&id)) {
            Ok(idx) => self.nodes[idx].properties.extend(properties),
            Err(idx) => self.nodes.insert(idx, GraphNode { id, properties }),
        }
        self
    }

    /// Insert an edge or merge properties into an existing one
    pub fn upsert_edge(
        &mut self,
        from: NodeRef,
        rel: impl Into<String>,
        to: NodeRef,
        properties: Properties,
    ) -> &mut Self {
        let rel = rel.into();
        match self
            .edges
            .binary_search_by(|e| e.sort_key().cmp(&(&from, rel.as_str(), &to)))
        {
            Ok(idx) => self.edges[idx].properties.extend(properties),
            Err(idx) => self.edges.insert(
                idx,
                GraphEdge {
                    from,
                    rel,
                    to,
                    properties,
                },
            ),
        }
        self
    }

    #[must_use]
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    #[must_use]
    pub fn node(&self, id: &NodeRef) -> Option<&GraphNode> {
        self.nodes
            .binary_search_by(|n| n.id.cmp(id))
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    /// Edges whose endpoints are not part of this delta
    #[must_use]
    pub fn dangling_edges(&self) -> Vec<&GraphEdge> {
        self.edges
            .iter()
            .filter(|e| self.node(&e.from).is_none() || self.node(&e.to).is_none())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// # Errors
    /// Returns error if a property value cannot be serialized
    pub fn content_hash(&self) -> Result<ContentHash, HashError> {
        ContentHash::compute_serializable(self)
    }
}

/// Text submitted for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Hash of symbol and text; the vector store key
    pub hash: ContentHash,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl VectorDocument {
    #[must_use]
    pub fn new(symbol: &Symbol, text: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        let text = text.into();
        let hash = InputHasher::new("vector-document/v1")
            .str("symbol", symbol.as_str())
            .str("text", &text)
            .finish();
        Self {
            hash,
            text,
            metadata,
        }
    }
}

/// Documents to embed and upsert for one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorDelta {
    pub symbol: Symbol,
    documents: Vec<VectorDocument>,
}

impl VectorDelta {
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            documents: Vec::new(),
        }
    }

    /// Add a document; a document with the same hash is kept as is
    pub fn push(&mut self, document: VectorDocument) -> &mut Self {
        if let Err(idx) = self
            .documents
            .binary_search_by(|d| d.hash.cmp(&document.hash))
        {
            self.documents.insert(idx, document);
        }
        self
    }

    #[must_use]
    pub fn documents(&self) -> &[VectorDocument] {
        &self.documents
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// # Errors
    /// Returns error if serialization fails
    pub fn content_hash(&self) -> Result<ContentHash, HashError> {
        ContentHash::compute_serializable(self)
    }
}

/// Embedded document as held by a vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub hash: ContentHash,
    pub symbol: Symbol,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

/// Build a property bag from `(name, value)` pairs
#[must_use]
pub fn props<I, K, V>(pairs: I) -> Properties
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
