//! Picker Symbol
//!
//! Validated ticker symbols ([`Symbol`]), company profiles
//! ([`SymbolProfile`]) and the configuration-driven [`SymbolRegistry`].
//!
//! # Example
//!
//! ```
//! use picker_symbol::{Symbol, SymbolProfile, SymbolRegistry};
//!
//! let acme = SymbolProfile::new(Symbol::parse("acme").unwrap()).with_name("Acme Ltd");
//! let registry = SymbolRegistry::from_profiles([acme]).unwrap();
//! assert!(registry.contains(&Symbol::parse("ACME").unwrap()));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod registry;
mod symbol;

pub use registry::SymbolRegistry;
pub use symbol::{Exchange, Symbol, SymbolError, SymbolProfile, MAX_SYMBOL_LEN};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
