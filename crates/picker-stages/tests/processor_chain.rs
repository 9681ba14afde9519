//! Built-in processors chained the way the default pipeline wires them

use picker_artifact::{Payload, PayloadKind, SentimentLabel};
use picker_stages::processors::clean_html;
use picker_stages::{AdapterStage, FileAdapter, ProcessorRegistry, StageInput, StageProcessor};
use picker_symbol::{Symbol, SymbolProfile};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn profile() -> SymbolProfile {
    SymbolProfile::new(Symbol::parse("ACME").unwrap()).with_name("Acme Chemicals")
}

fn write_fixtures(dir: &std::path::Path) {
    let acme = dir.join("ACME");
    std::fs::create_dir_all(&acme).unwrap();
    let forum = json!({
        "threads": [{
            "id": 11,
            "title": "Acme Chemicals - specialty play",
            "posts": [
                { "id": 1, "created_at": "2024-01-10T08:00:00Z",
                  "cooked": "<p>Strong <b>growth</b> and rising profit this year.</p>" },
                { "id": 2, "created_at": "2024-02-03T08:00:00Z",
                  "cooked": "<p>Debt is a risk, margins may decline.</p>" },
                { "id": 3, "created_at": "2024-02-20T08:00:00Z",
                  "cooked": "<p>Visit https://example.com for the annual report.</p>" }
            ]
        }]
    });
    std::fs::write(acme.join("forum.json"), forum.to_string()).unwrap();
    let fundamentals = json!({
        "name": "Acme Chemicals",
        "metrics": { "ROCE": 24, "ROE": 19, "CAGR": 17, "DE": 0.1, "PE": 18, "FCF": 40 }
    });
    std::fs::write(acme.join("fundamentals.json"), fundamentals.to_string()).unwrap();
}

async fn run(processor: &dyn StageProcessor, stage: &str, upstream: Vec<(&str, Payload)>) -> Payload {
    let mut input = StageInput::new(profile(), stage);
    for (name, payload) in upstream {
        input = input.with_upstream(name, payload);
    }
    let payload = processor.run(input).await.unwrap();
    assert_eq!(payload.kind(), processor.output());
    payload
}

#[tokio::test]
async fn forum_and_fundamentals_flow_into_a_screening_verdict() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let registry = ProcessorRegistry::with_builtins();

    let forum = AdapterStage::new("forum_posts", Arc::new(FileAdapter::new(dir.path(), "forum")));
    let raw = run(&forum, "forum_posts", vec![]).await;

    let cleaner = registry.get("text_cleaner").unwrap();
    let clean = run(cleaner.as_ref(), "clean_text", vec![("forum_posts", raw)]).await;
    let posts = &clean.as_clean_text().unwrap().posts;
    assert_eq!(posts.len(), 3);
    assert_eq!(posts[2].text, "visit for the annual report.");

    let sentiment = registry.get("lexicon_sentiment").unwrap();
    let report = run(sentiment.as_ref(), "sentiment", vec![("clean_text", clean.clone())]).await;
    let report_ref = report.as_sentiment().unwrap();
    assert_eq!(report_ref.posts[0].label, SentimentLabel::Positive);
    assert_eq!(report_ref.posts[1].label, SentimentLabel::Negative);
    assert_eq!(report_ref.monthly.len(), 2);

    let summarizer = registry.get("extractive_summarizer").unwrap();
    let summary = run(summarizer.as_ref(), "summarize", vec![("clean_text", clean)]).await;
    assert_eq!(summary.as_summary().unwrap().source_posts, 3);

    let fundamentals_doc = AdapterStage::new(
        "fundamentals_doc",
        Arc::new(FileAdapter::new(dir.path(), "fundamentals")),
    );
    let raw = run(&fundamentals_doc, "fundamentals_doc", vec![]).await;
    let parser = registry.get("fundamentals_parser").unwrap();
    let fundamentals = run(parser.as_ref(), "fundamentals", vec![("fundamentals_doc", raw)]).await;

    let screener = registry.get("rule_screener").unwrap();
    let verdict = run(
        screener.as_ref(),
        "screen",
        vec![("fundamentals", fundamentals), ("sentiment", report)],
    )
    .await;
    let verdict = verdict.as_screening().unwrap();
    assert!(verdict.passed);
    // posts score 87, 16 and 50
    assert_eq!(verdict.sentiment_score, Some(51));
}

#[tokio::test]
async fn screener_without_fundamentals_is_a_contract_violation() {
    let registry = ProcessorRegistry::with_builtins();
    let screener = registry.get("rule_screener").unwrap();
    let err = screener
        .run(StageInput::new(profile(), "screen"))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(screener.output(), PayloadKind::Screening);
}

proptest! {
    #[test]
    fn cleaned_text_has_no_markup_or_stray_space(input in "[ -~]{0,200}") {
        let out = clean_html(&input);
        prop_assert_eq!(out.trim(), out.as_str());
        prop_assert!(!out.contains("  "));
        prop_assert!(!out.contains(['<', '>', '&']));
    }
}
