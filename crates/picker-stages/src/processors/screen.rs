//! Rule and model screening

use crate::error::StageError;
use crate::processor::{StageInput, StageProcessor};
use async_trait::async_trait;
use picker_artifact::{Fundamentals, Payload, PayloadKind, RuleResult, ScreeningResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">=")]
    AtLeast,
    #[serde(rename = ">")]
    Above,
    #[serde(rename = "<")]
    Below,
    #[serde(rename = "<=")]
    AtMost,
}

impl Comparison {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::AtLeast => ">=",
            Comparison::Above => ">",
            Comparison::Below => "<",
            Comparison::AtMost => "<=",
        }
    }

    #[must_use]
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::AtLeast => value >= threshold,
            Comparison::Above => value > threshold,
            Comparison::Below => value < threshold,
            Comparison::AtMost => value <= threshold,
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One threshold on a fundamentals metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRule {
    pub metric: String,
    pub op: Comparison,
    pub threshold: f64,
    /// Value assumed when the metric is missing
    #[serde(default)]
    pub missing: f64,
}

impl ScreenRule {
    #[must_use]
    pub fn new(metric: impl Into<String>, op: Comparison, threshold: f64, missing: f64) -> Self {
        Self {
            metric: metric.into(),
            op,
            threshold,
            missing,
        }
    }

    #[must_use]
    pub fn evaluate(&self, fundamentals: &Fundamentals) -> RuleResult {
        let value = fundamentals.metric(&self.metric);
        RuleResult {
            metric: self.metric.clone(),
            op: self.op.as_str().to_string(),
            threshold: self.threshold,
            value,
            passed: self.op.holds(value.unwrap_or(self.missing), self.threshold),
        }
    }
}

/// Default small-cap quality screen
#[must_use]
pub fn default_rules() -> Vec<ScreenRule> {
    vec![
        ScreenRule::new("ROCE", Comparison::AtLeast, 15.0, 0.0),
        ScreenRule::new("ROE", Comparison::AtLeast, 15.0, 0.0),
        ScreenRule::new("CAGR", Comparison::AtLeast, 15.0, 0.0),
        ScreenRule::new("DE", Comparison::Below, 0.5, 1.0),
        ScreenRule::new("PE", Comparison::Below, 25.0, 100.0),
        ScreenRule::new("FCF", Comparison::Above, 0.0, 0.0),
    ]
}

/// Multibagger probability model
pub trait MlScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Probability in `0.0..=1.0` for the given features
    ///
    /// # Errors
    /// Returns error if the features cannot be scored
    fn score(&self, features: &BTreeMap<String, f64>) -> Result<f64, StageError>;
}

/// Logistic model over named features; missing features count as zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticScorer {
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub bias: f64,
}

impl MlScorer for LogisticScorer {
    fn name(&self) -> &str {
        "logistic"
    }

    fn score(&self, features: &BTreeMap<String, f64>) -> Result<f64, StageError> {
        let z = self.bias
            + self
                .weights
                .iter()
                .map(|(k, w)| w * features.get(k).copied().unwrap_or(0.0))
                .sum::<f64>();
        if !z.is_finite() {
            return Err(StageError::internal("logistic score is not finite"));
        }
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

/// Applies threshold rules and an optional scorer to fundamentals
#[derive(Clone)]
pub struct RuleScreener {
    rules: Vec<ScreenRule>,
    scorer: Option<Arc<dyn MlScorer>>,
}

impl Default for RuleScreener {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl fmt::Debug for RuleScreener {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleScreener")
            .field("rules", &self.rules.len())
            .field("scorer", &self.scorer.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

impl RuleScreener {
    #[must_use]
    pub fn new(rules: Vec<ScreenRule>) -> Self {
        Self {
            rules,
            scorer: None,
        }
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn MlScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Rule metrics with missing values filled in, plus `SENTIMENT`
    #[must_use]
    pub fn features(&self, fundamentals: &Fundamentals, sentiment: Option<u8>) -> BTreeMap<String, f64> {
        let mut features: BTreeMap<String, f64> = fundamentals.metrics.clone();
        for rule in &self.rules {
            features.entry(rule.metric.clone()).or_insert(rule.missing);
        }
        if let Some(score) = sentiment {
            features.insert("SENTIMENT".into(), f64::from(score));
        }
        features
    }

    /// # Errors
    /// Propagates scorer failures
    pub fn screen(
        &self,
        fundamentals: &Fundamentals,
        sentiment: Option<u8>,
    ) -> Result<ScreeningResult, StageError> {
        let rules: Vec<RuleResult> = self.rules.iter().map(|r| r.evaluate(fundamentals)).collect();
        let passed = rules.iter().all(|r| r.passed);

        let (probability, scorer) = match &self.scorer {
            Some(scorer) => {
                let p = scorer.score(&self.features(fundamentals, sentiment))?;
                (p.clamp(0.0, 1.0), Some(scorer.name().to_string()))
            }
            None => {
                tracing::warn!("no model scorer configured; probability left at 0");
                (0.0, None)
            }
        };

        Ok(ScreeningResult {
            passed,
            rules,
            probability,
            scorer,
            sentiment_score: sentiment,
        })
    }
}

#[async_trait]
impl StageProcessor for RuleScreener {
    fn name(&self) -> &str {
        "rule_screener"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Screening
    }

    fn fingerprint(&self) -> String {
        let rules: Vec<String> = self
            .rules
            .iter()
            .map(|r| format!("{}{}{}|{}", r.metric, r.op, r.threshold, r.missing))
            .collect();
        let scorer = self.scorer.as_ref().map_or("none", |s| s.name());
        format!("rule_screener/v1:{}:{scorer}", rules.join(";"))
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError> {
        let fundamentals = input.fundamentals()?;
        let sentiment = input.sentiment().map(|s| s.overall);
        Ok(Payload::Screening(self.screen(fundamentals, sentiment)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picker_artifact::SentimentReport;
    use picker_symbol::{Symbol, SymbolProfile};

    fn fundamentals(pairs: &[(&str, f64)]) -> Fundamentals {
        Fundamentals {
            metrics: pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
            ..Fundamentals::default()
        }
    }

    fn strong() -> Fundamentals {
        fundamentals(&[
            ("ROCE", 22.0),
            ("ROE", 18.0),
            ("CAGR", 20.0),
            ("DE", 0.2),
            ("PE", 14.0),
            ("FCF", 50.0),
        ])
    }

    #[test]
    fn all_rules_pass_for_strong_company() {
        let result = RuleScreener::default().screen(&strong(), None).unwrap();
        assert!(result.passed);
        assert_eq!(result.rules.len(), 6);
        assert_eq!(result.probability, 0.0);
        assert!(result.scorer.is_none());
    }

    #[test]
    fn missing_metrics_use_their_defaults() {
        let result = RuleScreener::default()
            .screen(&fundamentals(&[("ROCE", 30.0)]), Some(70))
            .unwrap();
        assert!(!result.passed);
        let de = result.rules.iter().find(|r| r.metric == "DE").unwrap();
        assert_eq!(de.value, None);
        assert!(!de.passed);
        assert!(result.rules.iter().find(|r| r.metric == "ROCE").unwrap().passed);
        assert_eq!(result.sentiment_score, Some(70));
    }

    #[test]
    fn boundaries_follow_the_operator() {
        let at = ScreenRule::new("ROE", Comparison::AtLeast, 15.0, 0.0);
        assert!(at.evaluate(&fundamentals(&[("ROE", 15.0)])).passed);
        let below = ScreenRule::new("PE", Comparison::Below, 25.0, 100.0);
        assert!(!below.evaluate(&fundamentals(&[("PE", 25.0)])).passed);
    }

    #[test]
    fn scorer_sees_sentiment_and_is_recorded() {
        let scorer = LogisticScorer {
            weights: BTreeMap::from([("SENTIMENT".to_string(), 0.1)]),
            bias: -5.0,
        };
        let screener = RuleScreener::default().with_scorer(Arc::new(scorer));
        let result = screener.screen(&strong(), Some(50)).unwrap();
        assert!((result.probability - 0.5).abs() < 1e-9);
        assert_eq!(result.scorer.as_deref(), Some("logistic"));
        assert!(screener.fingerprint().ends_with(":logistic"));
    }

    #[test]
    fn rules_deserialize_from_config() {
        let rule: ScreenRule =
            serde_json::from_str(r#"{"metric":"DE","op":"<","threshold":0.5,"missing":1.0}"#).unwrap();
        assert_eq!(rule, ScreenRule::new("DE", Comparison::Below, 0.5, 1.0));
    }

    #[tokio::test]
    async fn processor_reads_optional_sentiment() {
        let report = SentimentReport {
            overall: 64,
            monthly: BTreeMap::new(),
            posts: Vec::new(),
        };
        let input = StageInput::new(SymbolProfile::new(Symbol::parse("ACME").unwrap()), "screen")
            .with_upstream("fundamentals", Payload::Fundamentals(strong()))
            .with_upstream("sentiment", Payload::Sentiment(report));
        let payload = RuleScreener::default().run(input).await.unwrap();
        assert_eq!(payload.as_screening().unwrap().sentiment_score, Some(64));
    }
}
