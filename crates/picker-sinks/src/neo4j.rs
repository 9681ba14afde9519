//! Neo4j graph writer
//!
//! Every node is merged on `(label, key)` and every edge on
//! `(from, rel, to)`; one delta is one transaction.

use crate::error::WriterError;
use crate::graph::{labels, GraphWriter, MemoryGraphStore};
use async_trait::async_trait;
use neo4rs::{
    query, BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType,
    ConfigBuilder, Graph, Query,
};
use picker_artifact::{GraphDelta, Properties};
use serde_json::Value;

const WRITER: &str = "neo4j";

/// Labels given a uniqueness constraint on `key` at connect time
const KEYED_LABELS: &[&str] = &[
    labels::COMPANY,
    labels::METRIC,
    labels::SENTIMENT,
    labels::SUMMARY,
    labels::SCREENING,
    labels::THREAD,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
}

/// One parameterised Cypher statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub cypher: String,
    pub params: Vec<(&'static str, BoltType)>,
}

impl Statement {
    fn into_query(self) -> Query {
        self.params
            .into_iter()
            .fold(query(&self.cypher), |q, (name, value)| q.param(name, value))
    }
}

pub struct Neo4jGraphWriter {
    graph: Graph,
}

impl std::fmt::Debug for Neo4jGraphWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jGraphWriter").finish_non_exhaustive()
    }
}

impl Neo4jGraphWriter {
    /// Connect and make sure every known label has a unique `key`
    ///
    /// # Errors
    /// Returns `Unavailable` if the server cannot be reached or refuses the
    /// constraint statements
    pub async fn connect(settings: &Neo4jSettings) -> Result<Self, WriterError> {
        let config = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(settings.user.as_str())
            .password(settings.password.as_str())
            .fetch_size(500)
            .max_connections(settings.max_connections)
            .build()
            .map_err(driver_error)?;
        let graph = Graph::connect(config).await.map_err(driver_error)?;
        for label in KEYED_LABELS {
            graph
                .run(query(&constraint(label)))
                .await
                .map_err(driver_error)?;
        }
        tracing::info!(uri = %settings.uri, "connected to neo4j");
        Ok(Self { graph })
    }
}

#[async_trait]
impl GraphWriter for Neo4jGraphWriter {
    fn name(&self) -> &str {
        WRITER
    }

    async fn apply(&self, delta: &GraphDelta) -> Result<(), WriterError> {
        let statements = statements(delta)?;
        if statements.is_empty() {
            return Ok(());
        }
        let count = statements.len();
        let mut txn = self.graph.start_txn().await.map_err(driver_error)?;
        if let Err(e) = txn
            .run_queries(statements.into_iter().map(Statement::into_query))
            .await
        {
            if let Err(rollback) = txn.rollback().await {
                tracing::warn!(error = %rollback, "neo4j rollback failed");
            }
            return Err(driver_error(e));
        }
        txn.commit().await.map_err(driver_error)?;
        tracing::debug!(symbol = %delta.symbol, statements = count, "graph delta committed");
        Ok(())
    }
}

fn constraint(label: &str) -> String {
    format!(
        "CREATE CONSTRAINT picker_{}_key IF NOT EXISTS FOR (n:`{label}`) REQUIRE n.key IS UNIQUE",
        label.to_lowercase()
    )
}

/// Cypher for a delta: node merges first, then edge merges
///
/// # Errors
/// Returns `InvalidDelta` for dangling edges and for labels or
/// relationship names that are not plain identifiers
pub fn statements(delta: &GraphDelta) -> Result<Vec<Statement>, WriterError> {
    MemoryGraphStore::validate(delta)?;
    let mut out = Vec::with_capacity(delta.nodes().len() + delta.edges().len());
    for node in delta.nodes() {
        let label = identifier(&node.id.label)?;
        out.push(Statement {
            cypher: format!("MERGE (n:`{label}` {{key: $key}}) SET n += $props"),
            params: vec![
                ("key", BoltType::String(BoltString::new(&node.id.key))),
                ("props", bolt_map(&node.properties)),
            ],
        });
    }
    for edge in delta.edges() {
        let from = identifier(&edge.from.label)?;
        let to = identifier(&edge.to.label)?;
        let rel = identifier(&edge.rel)?;
        out.push(Statement {
            cypher: format!(
                "MATCH (a:`{from}` {{key: $from}}) MATCH (b:`{to}` {{key: $to}}) \
                 MERGE (a)-[r:`{rel}`]->(b) SET r += $props"
            ),
            params: vec![
                ("from", BoltType::String(BoltString::new(&edge.from.key))),
                ("to", BoltType::String(BoltString::new(&edge.to.key))),
                ("props", bolt_map(&edge.properties)),
            ],
        });
    }
    Ok(out)
}

fn identifier(name: &str) -> Result<&str, WriterError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(WriterError::invalid(WRITER, format!("{name:?} is not a valid label")))
    }
}

fn bolt_map(properties: &Properties) -> BoltType {
    let mut map = BoltMap::new();
    for (name, value) in properties {
        map.put(BoltString::new(name), property(value));
    }
    BoltType::Map(map)
}

/// Scalars and single-type arrays map directly; anything else is stored
/// as its JSON text, since Neo4j properties cannot nest
fn property(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => BoltType::Integer(BoltInteger::new(i)),
            (None, Some(f)) => BoltType::Float(BoltFloat::new(f)),
            (None, None) => BoltType::String(BoltString::new(&n.to_string())),
        },
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::Array(items) if single_type(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(property(item));
            }
            BoltType::List(list)
        }
        other => BoltType::String(BoltString::new(&other.to_string())),
    }
}

fn single_type(items: &[Value]) -> bool {
    items.iter().all(Value::is_string)
        || items.iter().all(Value::is_boolean)
        || items.iter().all(Value::is_i64)
        || items.iter().all(|v| v.is_f64())
}

/// Driver failures are reported as transient
fn driver_error(err: neo4rs::Error) -> WriterError {
    WriterError::unavailable(WRITER, err.to_string())
}
