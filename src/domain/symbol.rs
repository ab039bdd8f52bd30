use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn symbol_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]+USDT$").unwrap())
}

/// A USDT-margined linear perpetual symbol, locked at construction to the
/// strict `BASEUSDT` shape (no separators, no suffixes) per spec §4.5.
/// Every other quote currency, spot pair, or inverse contract is rejected
/// here so the rest of the exchange never has to special-case them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if !symbol_pattern().is_match(&normalized) {
            return Err(ConfigError::InvalidSymbol(raw.to_string()));
        }
        Ok(Symbol(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base(&self) -> &str {
        self.0.strip_suffix("USDT").unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_btcusdt() {
        let s = Symbol::parse("btcusdt").unwrap();
        assert_eq!(s.as_str(), "BTCUSDT");
        assert_eq!(s.base(), "BTC");
    }

    #[test]
    fn rejects_non_usdt_quote() {
        assert!(Symbol::parse("BTCUSD").is_err());
    }

    #[test]
    fn rejects_separators() {
        assert!(Symbol::parse("BTC-USDT").is_err());
        assert!(Symbol::parse("BTC_USDT").is_err());
    }

    #[test]
    fn rejects_suffixed_symbol() {
        assert!(Symbol::parse("BTCUSDTPERP").is_err());
    }
}
