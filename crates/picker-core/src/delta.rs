//! Delta construction from terminal artifacts
//!
//! Deltas are pure functions of the profile and the succeeded artifacts of
//! a run, so a retry that reloads the same artifacts rebuilds identical
//! deltas.

use crate::error::PipelineError;
use picker_artifact::{
    props, Artifact, CleanText, Fundamentals, GraphDelta, NodeRef, Payload, Properties,
    ScreeningResult, SentimentReport, Summary, VectorDelta, VectorDocument,
};
use picker_sinks::labels;
use picker_symbol::SymbolProfile;
use serde_json::json;
use std::collections::BTreeMap;

/// Succeeded artifacts of one run, by stage name
pub type StageArtifacts = BTreeMap<String, Artifact>;

/// Derives store deltas from a run's artifacts
pub trait DeltaBuilder: Send + Sync {
    /// # Errors
    /// Returns error if a payload cannot be turned into graph upserts
    fn graph_delta(
        &self,
        profile: &SymbolProfile,
        artifacts: &StageArtifacts,
    ) -> Result<GraphDelta, PipelineError>;

    /// # Errors
    /// Returns error if a payload cannot be turned into documents
    fn vector_delta(
        &self,
        profile: &SymbolProfile,
        artifacts: &StageArtifacts,
    ) -> Result<VectorDelta, PipelineError>;
}

/// Company-centred signal graph and summary/discussion documents
///
/// Works from payload kinds, not stage names, so custom pipelines produce
/// the same shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalDeltaBuilder;

impl SignalDeltaBuilder {
    fn company_props(profile: &SymbolProfile, fundamentals: Option<&Fundamentals>) -> Properties {
        let mut company = props([
            ("symbol", json!(profile.symbol.as_str())),
            ("exchange", json!(profile.exchange.code())),
        ]);
        let name = profile
            .name
            .clone()
            .or_else(|| fundamentals.and_then(|f| f.name.clone()));
        let sector = profile
            .sector
            .clone()
            .or_else(|| fundamentals.and_then(|f| f.sector.clone()));
        if let Some(name) = name {
            company.insert("name".into(), json!(name));
        }
        if let Some(sector) = sector {
            company.insert("sector".into(), json!(sector));
        }
        company
    }

    fn add_metrics(delta: &mut GraphDelta, company: &NodeRef, fundamentals: &Fundamentals) {
        let symbol = delta.symbol.clone();
        for (name, value) in &fundamentals.metrics {
            let metric = NodeRef::new(labels::METRIC, format!("{symbol}:{name}"));
            delta
                .upsert_node(
                    metric.clone(),
                    props([
                        ("symbol", json!(symbol.as_str())),
                        ("name", json!(name)),
                        ("value", json!(value)),
                    ]),
                )
                .upsert_edge(company.clone(), labels::HAS_METRIC, metric, Properties::new());
        }
    }

    fn add_sentiment(delta: &mut GraphDelta, company: &NodeRef, report: &SentimentReport) {
        let symbol = delta.symbol.clone();
        for (month, monthly) in &report.monthly {
            let node = NodeRef::new(labels::SENTIMENT, format!("{symbol}:{month}"));
            delta
                .upsert_node(
                    node.clone(),
                    props([
                        ("symbol", json!(symbol.as_str())),
                        ("month", json!(month)),
                        ("score", json!(monthly.score)),
                        ("posts", json!(monthly.posts)),
                    ]),
                )
                .upsert_edge(company.clone(), labels::HAS_SENTIMENT, node, Properties::new());
        }
        delta.upsert_node(
            company.clone(),
            props([("sentiment_overall", json!(report.overall))]),
        );
    }

    fn add_summary(delta: &mut GraphDelta, company: &NodeRef, artifact: &Artifact, summary: &Summary) {
        let key = artifact
            .payload_hash
            .map_or_else(|| artifact.id.to_string(), |h| h.to_string());
        let node = NodeRef::new(labels::SUMMARY, key.clone());
        delta
            .upsert_node(
                node.clone(),
                props([
                    ("hash", json!(key)),
                    ("symbol", json!(delta.symbol.as_str())),
                    ("text", json!(summary.text)),
                    ("method", json!(summary.method)),
                ]),
            )
            .upsert_edge(company.clone(), labels::HAS_SUMMARY, node, Properties::new());

        // keyed like the monthly sentiment nodes
        let symbol = delta.symbol.clone();
        for (month, monthly) in &summary.monthly {
            let node = NodeRef::new(labels::SUMMARY, format!("{symbol}:{month}"));
            delta
                .upsert_node(
                    node.clone(),
                    props([
                        ("symbol", json!(symbol.as_str())),
                        ("month", json!(month)),
                        ("text", json!(monthly.text)),
                        ("method", json!(summary.method)),
                        ("posts", json!(monthly.posts)),
                    ]),
                )
                .upsert_edge(
                    company.clone(),
                    labels::HAS_SUMMARY,
                    node,
                    props([("month", json!(month))]),
                );
        }
    }

    fn add_screening(delta: &mut GraphDelta, company: &NodeRef, result: &ScreeningResult) {
        let symbol = delta.symbol.clone();
        let node = NodeRef::new(labels::SCREENING, symbol.as_str());
        let mut properties = props([
            ("symbol", json!(symbol.as_str())),
            ("passed", json!(result.passed)),
            ("probability", json!(result.probability)),
            ("rules", json!(result.rules)),
        ]);
        if let Some(score) = result.sentiment_score {
            properties.insert("sentiment_score".into(), json!(score));
        }
        delta
            .upsert_node(node.clone(), properties)
            .upsert_edge(company.clone(), labels::SCREENED_AS, node, Properties::new());
    }

    fn add_threads(delta: &mut GraphDelta, company: &NodeRef, text: &CleanText) {
        let mut threads: BTreeMap<u64, (&str, usize)> = BTreeMap::new();
        for post in &text.posts {
            threads.entry(post.thread_id).or_insert((post.thread_title.as_str(), 0)).1 += 1;
        }
        for (id, (title, posts)) in threads {
            let node = NodeRef::new(labels::THREAD, id.to_string());
            delta
                .upsert_node(node.clone(), props([("id", json!(id)), ("title", json!(title))]))
                .upsert_edge(
                    company.clone(),
                    labels::DISCUSSED_IN,
                    node,
                    props([("posts", json!(posts))]),
                );
        }
    }

    fn metadata(artifact: &Artifact, kind: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("symbol".to_string(), artifact.symbol().to_string()),
            ("stage".to_string(), artifact.stage().to_string()),
            ("artifact_id".to_string(), artifact.id.to_string()),
            ("kind".to_string(), kind.to_string()),
        ])
    }
}

impl DeltaBuilder for SignalDeltaBuilder {
    fn graph_delta(
        &self,
        profile: &SymbolProfile,
        artifacts: &StageArtifacts,
    ) -> Result<GraphDelta, PipelineError> {
        let company = NodeRef::new(labels::COMPANY, profile.symbol.as_str());
        let fundamentals = artifacts
            .values()
            .find_map(|a| a.payload.as_ref().and_then(Payload::as_fundamentals));

        let mut delta = GraphDelta::new(profile.symbol.clone());
        delta.upsert_node(company.clone(), Self::company_props(profile, fundamentals));

        for artifact in artifacts.values() {
            match &artifact.payload {
                Some(Payload::Fundamentals(f)) => Self::add_metrics(&mut delta, &company, f),
                Some(Payload::Sentiment(report)) => Self::add_sentiment(&mut delta, &company, report),
                Some(Payload::Summary(summary)) => {
                    Self::add_summary(&mut delta, &company, artifact, summary);
                }
                Some(Payload::Screening(result)) => Self::add_screening(&mut delta, &company, result),
                Some(Payload::CleanText(text)) => Self::add_threads(&mut delta, &company, text),
                _ => {}
            }
        }

        for peer in &profile.peers {
            let other = NodeRef::new(labels::COMPANY, peer.as_str());
            delta
                .upsert_node(other.clone(), props([("symbol", json!(peer.as_str()))]))
                .upsert_edge(company.clone(), labels::COMPETES_WITH, other, Properties::new());
        }
        Ok(delta)
    }

    fn vector_delta(
        &self,
        profile: &SymbolProfile,
        artifacts: &StageArtifacts,
    ) -> Result<VectorDelta, PipelineError> {
        let symbol = &profile.symbol;
        let mut delta = VectorDelta::new(symbol.clone());
        for artifact in artifacts.values() {
            match &artifact.payload {
                Some(Payload::Summary(summary)) => {
                    if !summary.text.trim().is_empty() {
                        delta.push(VectorDocument::new(
                            symbol,
                            summary.text.clone(),
                            Self::metadata(artifact, "summary"),
                        ));
                    }
                    for (month, monthly) in &summary.monthly {
                        if monthly.text.trim().is_empty() {
                            continue;
                        }
                        let mut metadata = Self::metadata(artifact, "monthly_summary");
                        metadata.insert("month".to_string(), month.clone());
                        delta.push(VectorDocument::new(symbol, monthly.text.clone(), metadata));
                    }
                }
                Some(Payload::CleanText(text)) => {
                    for (month, posts) in text.by_month() {
                        let bundle = posts
                            .iter()
                            .map(|p| p.text.as_str())
                            .filter(|t| !t.is_empty())
                            .collect::<Vec<_>>()
                            .join(" ");
                        if bundle.is_empty() {
                            continue;
                        }
                        let mut metadata = Self::metadata(artifact, "discussion");
                        metadata.insert("month".to_string(), month);
                        delta.push(VectorDocument::new(symbol, bundle, metadata));
                    }
                }
                _ => {}
            }
        }
        Ok(delta)
    }
}
