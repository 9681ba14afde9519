//! Symbol registry
//!
//! Holds the configured set of tracked companies in declaration order.
//! Profiles are added and removed by configuration and never edited in
//! place.

use crate::symbol::{Symbol, SymbolError, SymbolProfile};
use indexmap::IndexMap;

/// Registry of tracked companies
#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    profiles: IndexMap<Symbol, SymbolProfile>,
}

impl SymbolRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from profiles, rejecting duplicates
    ///
    /// # Errors
    /// Returns `SymbolError::Duplicate` on the first repeated ticker
    pub fn from_profiles(
        profiles: impl IntoIterator<Item = SymbolProfile>,
    ) -> Result<Self, SymbolError> {
        let mut registry = Self::new();
        for profile in profiles {
            registry.register(profile)?;
        }
        Ok(registry)
    }

    /// Register a new company
    ///
    /// # Errors
    /// Returns `SymbolError::Duplicate` if the ticker is already present
    pub fn register(&mut self, profile: SymbolProfile) -> Result<(), SymbolError> {
        if self.profiles.contains_key(&profile.symbol) {
            return Err(SymbolError::Duplicate(profile.symbol));
        }
        self.profiles.insert(profile.symbol.clone(), profile);
        Ok(())
    }

    /// Remove a company, returning its profile
    pub fn remove(&mut self, symbol: &Symbol) -> Option<SymbolProfile> {
        self.profiles.shift_remove(symbol)
    }

    /// Look up a profile
    #[inline]
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolProfile> {
        self.profiles.get(symbol)
    }

    /// Whether the ticker is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.profiles.contains_key(symbol)
    }

    /// Profiles in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &SymbolProfile> {
        self.profiles.values()
    }

    /// Tickers in declaration order
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.profiles.keys().cloned().collect()
    }

    /// Number of registered companies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Resolve a requested subset, preserving request order and dropping
    /// repeats
    ///
    /// # Errors
    /// Returns `SymbolError::Unknown` for the first unregistered ticker
    pub fn select(&self, requested: &[Symbol]) -> Result<Vec<SymbolProfile>, SymbolError> {
        let mut seen = Vec::with_capacity(requested.len());
        let mut out = Vec::with_capacity(requested.len());
        for symbol in requested {
            if seen.contains(symbol) {
                continue;
            }
            let profile = self
                .get(symbol)
                .ok_or_else(|| SymbolError::Unknown(symbol.clone()))?;
            seen.push(symbol.clone());
            out.push(profile.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(s: &str) -> SymbolProfile {
        SymbolProfile::new(Symbol::parse(s).unwrap())
    }

    #[test]
    fn registry_preserves_declaration_order() {
        let registry =
            SymbolRegistry::from_profiles([profile("BETA"), profile("ACME"), profile("GAMMA")])
                .unwrap();
        let names: Vec<_> = registry.iter().map(|p| p.symbol.to_string()).collect();
        assert_eq!(names, vec!["BETA", "ACME", "GAMMA"]);
    }

    #[test]
    fn registry_rejects_duplicates() {
        let result = SymbolRegistry::from_profiles([profile("ACME"), profile("acme")]);
        assert!(matches!(result, Err(SymbolError::Duplicate(s)) if s.as_str() == "ACME"));
    }

    #[test]
    fn remove_then_register_again() {
        let mut registry = SymbolRegistry::from_profiles([profile("ACME")]).unwrap();
        let acme = Symbol::parse("ACME").unwrap();
        assert!(registry.remove(&acme).is_some());
        assert!(registry.is_empty());
        registry.register(profile("ACME")).unwrap();
        assert!(registry.contains(&acme));
    }

    #[test]
    fn select_rejects_unknown_and_dedups() {
        let registry = SymbolRegistry::from_profiles([profile("ACME"), profile("BETA")]).unwrap();
        let acme = Symbol::parse("ACME").unwrap();
        let beta = Symbol::parse("BETA").unwrap();

        let picked = registry.select(&[beta.clone(), acme.clone(), beta]).unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].symbol.as_str(), "BETA");

        let missing = Symbol::parse("ZETA").unwrap();
        assert!(matches!(
            registry.select(&[acme, missing]),
            Err(SymbolError::Unknown(_))
        ));
    }
}
