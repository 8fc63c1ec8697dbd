use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical trading symbol in `BASE/QUOTE` form. Adapters hold their own
/// mapping from this to the exchange's native symbol (e.g. `BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    base: String,
    quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Canonical string used everywhere outside the adapter's wire layer.
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Correlation group used by the risk manager's per-group exposure cap.
    /// Not exhaustive — unknown bases fall back to their own singleton group.
    pub fn correlation_group(&self) -> &'static str {
        match self.base.as_str() {
            "BTC" | "WBTC" => "btc",
            "ETH" | "WETH" | "STETH" => "eth",
            "SOL" | "AVAX" | "NEAR" | "APT" | "SUI" => "alt-l1",
            "LINK" | "BAND" | "API3" => "alt-oracle",
            "XRP" | "XLM" | "ALGO" => "alt-payment",
            _ => "other",
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| format!("pair '{}' is not in BASE/QUOTE form", s))?;
        if base.is_empty() || quote.is_empty() {
            return Err(format!("pair '{}' has an empty base or quote", s));
        }
        Ok(Self::new(base, quote))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn sign(&self) -> i32 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M5,
    M15,
    H1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::H1 => "1h",
        }
    }

    pub fn to_minutes(&self) -> i64 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M5 => 5,
            TimeFrame::M15 => 15,
            TimeFrame::H1 => 60,
        }
    }

    pub fn to_seconds(&self) -> i64 {
        self.to_minutes() * 60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_round_trips_through_from_str() {
        let pair = Pair::new("btc", "usdt");
        assert_eq!(pair.canonical(), "BTC/USDT");
        let parsed: Pair = pair.canonical().parse().unwrap();
        assert_eq!(parsed, pair);
    }

    #[test]
    fn correlation_groups_cluster_related_assets() {
        assert_eq!(Pair::new("BTC", "USDT").correlation_group(), "btc");
        assert_eq!(Pair::new("SOL", "USDT").correlation_group(), "alt-l1");
        assert_eq!(Pair::new("DOGE", "USDT").correlation_group(), "other");
    }

    #[test]
    fn from_str_rejects_missing_separator() {
        assert!("BTCUSDT".parse::<Pair>().is_err());
    }
}
