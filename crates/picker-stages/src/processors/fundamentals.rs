//! Fundamentals parsing
//!
//! Accepts either a flat metrics document (`{"ROE": 18, "PE": "12.5"}`,
//! optionally nested under `metrics`) or an EODHD fundamentals document
//! (`General`, `Highlights`, `Valuation`, `Financials`). Metrics that cannot
//! be derived are left out.

use crate::error::StageError;
use crate::processor::{StageInput, StageProcessor};
use async_trait::async_trait;
use picker_artifact::{Fundamentals, Payload, PayloadKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Canonical metric names and the keys accepted for them in flat documents
const METRIC_ALIASES: &[(&str, &[&str])] = &[
    ("ROCE", &["roce"]),
    ("ROE", &["roe", "return_on_equity"]),
    ("CAGR", &["cagr", "sales_cagr", "revenue_cagr"]),
    ("DE", &["de", "d/e", "debt_to_equity", "debt_equity"]),
    ("PE", &["pe", "p/e", "pe_ratio"]),
    ("FCF", &["fcf", "free_cash_flow"]),
];

/// Number or numeric string; non-finite values are treated as missing
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn canonical(key: &str) -> Option<&'static str> {
    let key = key.trim().to_lowercase();
    METRIC_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&key.as_str()))
        .map(|(name, _)| *name)
}

/// Yearly statement rows, oldest first
fn yearly<'a>(financials: &'a Value, statement: &str) -> Vec<&'a Map<String, Value>> {
    let Some(rows) = financials
        .get(statement)
        .and_then(|s| s.get("yearly"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };
    let mut rows: Vec<(&String, &Map<String, Value>)> = rows
        .iter()
        .filter_map(|(date, row)| row.as_object().map(|r| (date, r)))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));
    rows.into_iter().map(|(_, r)| r).collect()
}

fn field(row: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| row.get(*k).and_then(number))
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator.abs() > f64::EPSILON).then(|| numerator / denominator)
}

/// Compound annual growth of `first` to `last` over `years`, in percent
#[allow(clippy::cast_precision_loss)]
fn cagr(first: f64, last: f64, years: usize) -> Option<f64> {
    if years == 0 || first <= 0.0 || last <= 0.0 {
        return None;
    }
    Some(((last / first).powf(1.0 / years as f64) - 1.0) * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundamentalsParser {
    /// Revenue growth window for `CAGR`
    pub cagr_years: usize,
}

impl Default for FundamentalsParser {
    fn default() -> Self {
        Self { cagr_years: 3 }
    }
}

impl FundamentalsParser {
    /// # Errors
    /// `MalformedInput` if the body is not a JSON object
    pub fn parse(&self, body: &Value) -> Result<Fundamentals, StageError> {
        let object = body
            .as_object()
            .ok_or_else(|| StageError::malformed("fundamentals document is not an object"))?;
        let eodhd = ["General", "Highlights", "Financials"]
            .iter()
            .any(|k| object.contains_key(*k));
        Ok(if eodhd {
            self.parse_eodhd(body)
        } else {
            Self::parse_flat(object)
        })
    }

    fn parse_flat(object: &Map<String, Value>) -> Fundamentals {
        let source = object
            .get("metrics")
            .and_then(Value::as_object)
            .unwrap_or(object);
        let metrics = source
            .iter()
            .filter_map(|(k, v)| Some((canonical(k)?.to_string(), number(v)?)))
            .collect();
        Fundamentals {
            name: text(object.get("name")),
            sector: text(object.get("sector")),
            metrics,
        }
    }

    fn parse_eodhd(&self, body: &Value) -> Fundamentals {
        let mut metrics = BTreeMap::new();
        let mut put = |name: &str, value: Option<f64>| {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                metrics.insert(name.to_string(), v);
            }
        };

        let highlight = |key: &str| body.pointer(&format!("/Highlights/{key}")).and_then(number);
        put("ROE", highlight("ReturnOnEquityTTM").map(|r| r * 100.0));
        put(
            "PE",
            highlight("PERatio")
                .or_else(|| body.pointer("/Valuation/TrailingPE").and_then(number)),
        );

        let empty = Value::Null;
        let financials = body.get("Financials").unwrap_or(&empty);
        let balance = yearly(financials, "Balance_Sheet");
        let income = yearly(financials, "Income_Statement");
        let cash = yearly(financials, "Cash_Flow");

        if let (Some(b), Some(i)) = (balance.last(), income.last()) {
            let ebit = field(i, &["ebit", "operatingIncome"]);
            let assets = field(b, &["totalAssets"]);
            let current = field(b, &["totalCurrentLiabilities"]);
            if let (Some(ebit), Some(assets), Some(current)) = (ebit, assets, current) {
                put("ROCE", ratio(ebit, assets - current).map(|r| r * 100.0));
            }
        }

        if let Some(b) = balance.last() {
            let debt = field(b, &["shortLongTermDebtTotal"]).or_else(|| {
                let long = field(b, &["longTermDebt"]);
                let short = field(b, &["shortTermDebt"]);
                match (long, short) {
                    (None, None) => None,
                    (l, s) => Some(l.unwrap_or(0.0) + s.unwrap_or(0.0)),
                }
            });
            let equity = field(b, &["totalStockholderEquity"]);
            if let (Some(debt), Some(equity)) = (debt, equity) {
                put("DE", ratio(debt, equity));
            }
        }

        if let Some(c) = cash.last() {
            let fcf = field(c, &["freeCashFlow"]).or_else(|| {
                let ops = field(c, &["totalCashFromOperatingActivities"])?;
                let capex = field(c, &["capitalExpenditures"])?;
                Some(ops - capex.abs())
            });
            put("FCF", fcf);
        }

        let revenue: Vec<f64> = income
            .iter()
            .filter_map(|row| field(row, &["totalRevenue"]))
            .collect();
        if revenue.len() >= 2 {
            let window = revenue.len().min(self.cagr_years + 1);
            let tail = &revenue[revenue.len() - window..];
            put("CAGR", cagr(tail[0], tail[window - 1], window - 1));
        }

        Fundamentals {
            name: text(body.pointer("/General/Name")),
            sector: text(body.pointer("/General/Sector")),
            metrics,
        }
    }
}

#[async_trait]
impl StageProcessor for FundamentalsParser {
    fn name(&self) -> &str {
        "fundamentals_parser"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Fundamentals
    }

    fn fingerprint(&self) -> String {
        format!("fundamentals_parser/v1:{}", self.cagr_years)
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError> {
        let doc = input.raw_document()?;
        let fundamentals = self.parse(&doc.body)?;
        if fundamentals.metrics.is_empty() {
            tracing::warn!(symbol = %input.profile.symbol, "no fundamentals metrics found");
        }
        Ok(Payload::Fundamentals(fundamentals))
    }
}
