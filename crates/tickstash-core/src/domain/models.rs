use serde::{Deserialize, Serialize};

use crate::{Interval, LookbackWindow, Ticker, UtcDateTime, ValidationError};

/// One OHLCV bar. Timestamps of daily and coarser bars sit at 00:00:00Z of the trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
}

impl Bar {
    pub fn new(
        ts: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<u64>,
    ) -> Result<Self, ValidationError> {
        validate_finite("open", open)?;
        validate_finite("high", high)?;
        validate_finite("low", low)?;
        validate_finite("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Price history for one (ticker, interval, window).
///
/// Bars are strictly increasing in `ts`; the constructor and deserializer both
/// reject anything else, so a corrupted cached series never reaches callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PriceSeriesParts")]
pub struct PriceSeries {
    ticker: Ticker,
    interval: Interval,
    window: LookbackWindow,
    bars: Vec<Bar>,
}

#[derive(Deserialize)]
struct PriceSeriesParts {
    ticker: Ticker,
    interval: Interval,
    window: LookbackWindow,
    bars: Vec<Bar>,
}

impl TryFrom<PriceSeriesParts> for PriceSeries {
    type Error = ValidationError;

    fn try_from(parts: PriceSeriesParts) -> Result<Self, Self::Error> {
        Self::new(parts.ticker, parts.interval, parts.window, parts.bars)
    }
}

impl PriceSeries {
    pub fn new(
        ticker: Ticker,
        interval: Interval,
        window: LookbackWindow,
        bars: Vec<Bar>,
    ) -> Result<Self, ValidationError> {
        if let Some(index) = bars
            .windows(2)
            .position(|pair| pair[0].ts >= pair[1].ts)
        {
            return Err(ValidationError::BarsNotIncreasing { index: index + 1 });
        }

        Ok(Self {
            ticker,
            interval,
            window,
            bars,
        })
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn window(&self) -> LookbackWindow {
        self.window
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Named fundamentals metrics. Serialized names match the snapshot's field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    PriceToEarnings,
    ForwardPriceToEarnings,
    PriceToBook,
    ProfitMargin,
    OperatingMargin,
    ReturnOnAssets,
    ReturnOnEquity,
    RevenueGrowth,
    EarningsGrowth,
    BookValue,
    MarketCap,
    DividendYield,
    DebtToEquity,
    CurrentRatio,
}

impl Metric {
    pub const ALL: [Self; 14] = [
        Self::PriceToEarnings,
        Self::ForwardPriceToEarnings,
        Self::PriceToBook,
        Self::ProfitMargin,
        Self::OperatingMargin,
        Self::ReturnOnAssets,
        Self::ReturnOnEquity,
        Self::RevenueGrowth,
        Self::EarningsGrowth,
        Self::BookValue,
        Self::MarketCap,
        Self::DividendYield,
        Self::DebtToEquity,
        Self::CurrentRatio,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceToEarnings => "priceToEarnings",
            Self::ForwardPriceToEarnings => "forwardPriceToEarnings",
            Self::PriceToBook => "priceToBook",
            Self::ProfitMargin => "profitMargin",
            Self::OperatingMargin => "operatingMargin",
            Self::ReturnOnAssets => "returnOnAssets",
            Self::ReturnOnEquity => "returnOnEquity",
            Self::RevenueGrowth => "revenueGrowth",
            Self::EarningsGrowth => "earningsGrowth",
            Self::BookValue => "bookValue",
            Self::MarketCap => "marketCap",
            Self::DividendYield => "dividendYield",
            Self::DebtToEquity => "debtToEquity",
            Self::CurrentRatio => "currentRatio",
        }
    }
}

/// Point-in-time fundamentals. `None` means "not disclosed", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundamentalsSnapshot {
    pub ticker: Ticker,
    #[serde(default, alias = "peRatio", skip_serializing_if = "Option::is_none")]
    pub price_to_earnings: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_price_to_earnings: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_to_book: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_margin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_margin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_on_assets: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_on_equity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_growth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earnings_growth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dividend_yield: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debt_to_equity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedMetrics>,
}

impl FundamentalsSnapshot {
    pub fn empty(ticker: Ticker) -> Self {
        Self {
            ticker,
            price_to_earnings: None,
            forward_price_to_earnings: None,
            price_to_book: None,
            profit_margin: None,
            operating_margin: None,
            return_on_assets: None,
            return_on_equity: None,
            revenue_growth: None,
            earnings_growth: None,
            book_value: None,
            market_cap: None,
            dividend_yield: None,
            debt_to_equity: None,
            current_ratio: None,
            derived: None,
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::PriceToEarnings => self.price_to_earnings,
            Metric::ForwardPriceToEarnings => self.forward_price_to_earnings,
            Metric::PriceToBook => self.price_to_book,
            Metric::ProfitMargin => self.profit_margin,
            Metric::OperatingMargin => self.operating_margin,
            Metric::ReturnOnAssets => self.return_on_assets,
            Metric::ReturnOnEquity => self.return_on_equity,
            Metric::RevenueGrowth => self.revenue_growth,
            Metric::EarningsGrowth => self.earnings_growth,
            Metric::BookValue => self.book_value,
            Metric::MarketCap => self.market_cap,
            Metric::DividendYield => self.dividend_yield,
            Metric::DebtToEquity => self.debt_to_equity,
            Metric::CurrentRatio => self.current_ratio,
        }
    }

    /// Stores `value` when it is finite; anything else leaves the metric absent.
    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        let value = value.filter(|value| value.is_finite());
        let slot = match metric {
            Metric::PriceToEarnings => &mut self.price_to_earnings,
            Metric::ForwardPriceToEarnings => &mut self.forward_price_to_earnings,
            Metric::PriceToBook => &mut self.price_to_book,
            Metric::ProfitMargin => &mut self.profit_margin,
            Metric::OperatingMargin => &mut self.operating_margin,
            Metric::ReturnOnAssets => &mut self.return_on_assets,
            Metric::ReturnOnEquity => &mut self.return_on_equity,
            Metric::RevenueGrowth => &mut self.revenue_growth,
            Metric::EarningsGrowth => &mut self.earnings_growth,
            Metric::BookValue => &mut self.book_value,
            Metric::MarketCap => &mut self.market_cap,
            Metric::DividendYield => &mut self.dividend_yield,
            Metric::DebtToEquity => &mut self.debt_to_equity,
            Metric::CurrentRatio => &mut self.current_ratio,
        };
        *slot = value;
    }

    pub fn present_count(&self) -> usize {
        Metric::ALL
            .iter()
            .filter(|metric| self.get(**metric).is_some())
            .count()
    }
}

/// Metrics computed by comparing the two most recent annual statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_period_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_growth_yoy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_income_growth_yoy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_margin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_margin_change: Option<f64>,
}

/// Descriptive company data. Every field except the ticker is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyMetadata {
    pub ticker: Ticker,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}
