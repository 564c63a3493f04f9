//! Configuration types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Strategy selection and parameters
    pub strategy: StrategyConfig,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Strategy parameters, selected by the `kind` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Grid(GridConfig),
    Range(RangeConfig),
    Breakout(BreakoutConfig),
    CashAndCarry(CashCarryConfig),
    Twap(TwapConfig),
    Emac(EmacConfig),
}

impl StrategyConfig {
    /// Configuration tag of the selected strategy
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyConfig::Grid(_) => "grid",
            StrategyConfig::Range(_) => "range",
            StrategyConfig::Breakout(_) => "breakout",
            StrategyConfig::CashAndCarry(_) => "cash_and_carry",
            StrategyConfig::Twap(_) => "twap",
            StrategyConfig::Emac(_) => "emac",
        }
    }

    /// Symbols the strategy trades; cash-and-carry resolves its pair at build time
    pub fn symbol(&self) -> Option<&str> {
        match self {
            StrategyConfig::Grid(c) => Some(&c.symbol),
            StrategyConfig::Range(c) => Some(&c.symbol),
            StrategyConfig::Breakout(c) => Some(&c.symbol),
            StrategyConfig::CashAndCarry(_) => None,
            StrategyConfig::Twap(c) => Some(&c.symbol),
            StrategyConfig::Emac(c) => Some(&c.symbol),
        }
    }
}

/// Direction-filtered infinite grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub symbol: String,
    /// Distance between levels, percent of the reference price
    pub grid_spacing: Decimal,
    /// 1 long only, -1 short only, 0 both
    #[serde(default)]
    pub direction: i8,
    /// Stop-loss distance, percent of the reference price
    pub stop_loss: Decimal,
    /// Quote-currency budget for the whole grid
    pub max_investment: Decimal,
    /// Take-profit growth per filled level in trend mode
    #[serde(default = "default_tp_multiplier")]
    pub tp_multiplier: Decimal,
}

fn default_tp_multiplier() -> Decimal {
    Decimal::ONE
}

/// Bounded, windowed neutral grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub symbol: String,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    /// Total ladder levels, rounded up to an even count
    pub no_levels: u32,
    /// Largest position the grid may hold
    pub max_position: Decimal,
    /// Concurrent order budget for the active window
    #[serde(default = "default_max_orders")]
    pub max_orders: usize,
}

fn default_max_orders() -> usize {
    16
}

/// Martingale breakout reversal ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutConfig {
    pub symbol: String,
    /// Stop distance, percent
    pub sl_distance_pc: Decimal,
    /// Take-profit distance, percent
    pub tp_distance_pc: Decimal,
    /// Position multiplier applied on every stop-out
    pub size_multiplier: Decimal,
    /// Candle width for the trend filter
    #[serde(default = "default_trend_interval")]
    pub trend_interval: String,
    pub trend_ema_period: usize,
    /// Consecutive losses before a take-profit is placed
    #[serde(default)]
    pub tp_after_loss: u32,
    /// Entry notional; zero uses the minimum order size
    #[serde(default)]
    pub entry_value: Decimal,
    /// Loop budget; zero runs indefinitely
    #[serde(default)]
    pub loops: u32,
    /// Optional direction lock
    #[serde(default)]
    pub direction: i8,
    /// Candle width used to detect take-profit crosses
    #[serde(default = "default_ratchet_interval")]
    pub ratchet_interval: String,
}

fn default_trend_interval() -> String {
    "1h".to_string()
}

fn default_ratchet_interval() -> String {
    "1m".to_string()
}

/// Spot-long / perpetual-short funding capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashCarryConfig {
    /// Token to carry, e.g. `ETH`
    pub token: String,
    /// Quote value of each leg
    pub value: Decimal,
    /// Limit price slippage allowance, percent
    pub slippage_pc: Decimal,
    /// Funding rate (percent) below which the pair is unwound
    pub funding_pc_threshold: Decimal,
    #[serde(default = "default_quote")]
    pub quote: String,
}

fn default_quote() -> String {
    "USDT".to_string()
}

/// Linear time-weighted execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwapConfig {
    pub symbol: String,
    /// Target signed position
    pub target: Decimal,
    /// Seconds between cycles
    pub interval_secs: u64,
    /// Total execution time in seconds
    pub duration_secs: u64,
}

/// EMA crossover with a trend filter and ATR stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmacConfig {
    pub symbol: String,
    pub fast_ema: usize,
    pub slow_ema: usize,
    pub trend_ema: usize,
    /// Trade size as percent of quote balance
    pub trade_pc: Decimal,
    pub atr_stop_multiplier: Decimal,
    #[serde(default = "default_granularity")]
    pub granularity: String,
    #[serde(default)]
    pub direction: i8,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
}

fn default_granularity() -> String {
    "1h".to_string()
}

fn default_atr_period() -> usize {
    14
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds between strategy cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Where the runner persists strategy state between restarts
    #[serde(default)]
    pub state_path: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            interval_secs: default_interval(),
            state_path: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_strategy_config_tagged_by_kind() {
        let json = r#"{
            "kind": "grid",
            "symbol": "ETH/USDT:USDT",
            "grid_spacing": "1",
            "stop_loss": "10",
            "max_investment": "1000"
        }"#;
        let config: StrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind(), "grid");
        match config {
            StrategyConfig::Grid(grid) => {
                assert_eq!(grid.grid_spacing, dec!(1));
                assert_eq!(grid.direction, 0);
                assert_eq!(grid.tp_multiplier, dec!(1));
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_range_defaults() {
        let json = r#"{
            "kind": "range",
            "symbol": "ETH/USDT:USDT",
            "lower_price": "100",
            "upper_price": "200",
            "no_levels": 4,
            "max_position": "10"
        }"#;
        let config: StrategyConfig = serde_json::from_str(json).unwrap();
        let StrategyConfig::Range(range) = config else {
            panic!("expected range config");
        };
        assert_eq!(range.max_orders, 16);
    }

    #[test]
    fn test_cash_and_carry_has_no_single_symbol() {
        let config = StrategyConfig::CashAndCarry(CashCarryConfig {
            token: "ETH".to_string(),
            value: dec!(1000),
            slippage_pc: dec!(0.05),
            funding_pc_threshold: dec!(0.001),
            quote: "USDT".to_string(),
        });
        assert_eq!(config.kind(), "cash_and_carry");
        assert!(config.symbol().is_none());
    }
}
