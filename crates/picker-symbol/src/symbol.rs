//! Ticker symbols and per-company profiles
//!
//! A [`Symbol`] is the identity of a tracked company. It is validated once
//! at construction and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Maximum symbol length accepted by [`Symbol::parse`]
pub const MAX_SYMBOL_LEN: usize = 20;

/// Validated ticker symbol
///
/// Normalized to uppercase. Allowed characters are ASCII letters, digits,
/// `&`, `-` and `.` (`M&M`, `BAJAJ-AUTO` and `RELIANCE.NS` are all valid).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a symbol
    ///
    /// # Errors
    /// Returns error if the trimmed input is empty, too long, or contains
    /// characters outside the allowed set
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        if trimmed.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong {
                symbol: trimmed.to_string(),
                max: MAX_SYMBOL_LEN,
            });
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '&' | '-' | '.')))
        {
            return Err(SymbolError::InvalidChar {
                symbol: trimmed.to_string(),
                found: bad,
            });
        }
        if !trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Err(SymbolError::NoAlphanumeric(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Symbol as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Listing exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    /// National Stock Exchange of India
    #[default]
    Nse,
    /// Bombay Stock Exchange
    Bse,
}

impl Exchange {
    /// Exchange code used by fundamentals providers (`NSE`, `BSE`)
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
        }
    }

    /// Ticker suffix used by Yahoo-style quote services
    #[must_use]
    pub fn quote_suffix(self) -> &'static str {
        match self {
            Exchange::Nse => ".NS",
            Exchange::Bse => ".BO",
        }
    }
}

impl Display for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Static company profile registered through configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolProfile {
    /// Ticker
    pub symbol: Symbol,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Listing exchange
    #[serde(default)]
    pub exchange: Exchange,
    /// Sector label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    /// Alternative names used in forum thread titles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Competitors, linked in the knowledge graph
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<Symbol>,
}

impl SymbolProfile {
    /// Profile with only the ticker set
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            name: None,
            exchange: Exchange::default(),
            sector: None,
            aliases: Vec::new(),
            peers: Vec::new(),
        }
    }

    /// With display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// With exchange
    #[must_use]
    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchange = exchange;
        self
    }

    /// With sector
    #[must_use]
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    /// With an extra alias
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// With a peer company
    #[must_use]
    pub fn with_peer(mut self, peer: Symbol) -> Self {
        self.peers.push(peer);
        self
    }

    /// All lowercase names this company may be referred to by:
    /// the ticker, the display name and every alias
    #[must_use]
    pub fn match_names(&self) -> Vec<String> {
        let mut names = vec![self.symbol.as_str().to_lowercase()];
        names.extend(self.name.iter().map(|n| n.to_lowercase()));
        names.extend(self.aliases.iter().map(|a| a.to_lowercase()));
        names.retain(|n| !n.trim().is_empty());
        names.dedup();
        names
    }
}

/// Symbol validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Empty after trimming
    #[error("symbol is empty")]
    Empty,

    /// Longer than [`MAX_SYMBOL_LEN`]
    #[error("symbol {symbol:?} exceeds {max} characters")]
    TooLong { symbol: String, max: usize },

    /// Character outside the allowed set
    #[error("symbol {symbol:?} contains invalid character {found:?}")]
    InvalidChar { symbol: String, found: char },

    /// Punctuation only (`..`, `-`)
    #[error("symbol {0:?} has no letter or digit")]
    NoAlphanumeric(String),

    /// Registered twice
    #[error("symbol {0} is already registered")]
    Duplicate(Symbol),

    /// Not present in the registry
    #[error("symbol {0} is not registered")]
    Unknown(Symbol),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        let s = Symbol::parse("  reliance ").unwrap();
        assert_eq!(s.as_str(), "RELIANCE");
    }

    #[test]
    fn parse_accepts_punctuated_tickers() {
        assert!(Symbol::parse("M&M").is_ok());
        assert!(Symbol::parse("BAJAJ-AUTO").is_ok());
        assert!(Symbol::parse("tatachem.ns").is_ok());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(Symbol::parse("   "), Err(SymbolError::Empty));
        assert!(matches!(
            Symbol::parse("ACME CORP"),
            Err(SymbolError::InvalidChar { found: ' ', .. })
        ));
        assert!(matches!(Symbol::parse(".."), Err(SymbolError::NoAlphanumeric(_))));
        assert!(matches!(
            Symbol::parse(&"X".repeat(21)),
            Err(SymbolError::TooLong { max: 20, .. })
        ));
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: Symbol = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(ok.as_str(), "ACME");
        assert!(serde_json::from_str::<Symbol>("\"a b\"").is_err());
    }

    #[test]
    fn exchange_suffixes() {
        assert_eq!(Exchange::Nse.quote_suffix(), ".NS");
        assert_eq!(Exchange::Bse.quote_suffix(), ".BO");
        assert_eq!(Exchange::default(), Exchange::Nse);
    }

    #[test]
    fn match_names_include_aliases() {
        let profile = SymbolProfile::new(Symbol::parse("TATACHEM").unwrap())
            .with_name("Tata Chemicals")
            .with_alias("Tata Chem");
        assert_eq!(
            profile.match_names(),
            vec!["tatachem", "tata chemicals", "tata chem"]
        );
    }
}
