use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::error::ConfigError;
use crate::session::MarketCalendar;
use crate::{Interval, UtcDateTime};

/// Cached data classes with distinct freshness rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    PriceDaily,
    PriceWeekly,
    Fundamentals,
    Metadata,
}

impl DataType {
    pub const ALL: [Self; 4] = [
        Self::PriceDaily,
        Self::PriceWeekly,
        Self::Fundamentals,
        Self::Metadata,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceDaily => "price_daily",
            Self::PriceWeekly => "price_weekly",
            Self::Fundamentals => "fundamentals",
            Self::Metadata => "metadata",
        }
    }

    /// Monthly bars refresh on the weekly schedule.
    pub const fn for_interval(interval: Interval) -> Self {
        match interval {
            Interval::Daily => Self::PriceDaily,
            Interval::Weekly | Interval::Monthly => Self::PriceWeekly,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "pricedaily" => Ok(Self::PriceDaily),
            "priceweekly" => Ok(Self::PriceWeekly),
            "fundamentals" => Ok(Self::Fundamentals),
            "metadata" => Ok(Self::Metadata),
            _ => Err(ConfigError::UnknownDataType {
                value: value.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    MarketOpen,
    MarketClosed,
    Weekend,
}

/// Maximum cache age for one (data type, session state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAge {
    Fixed(Duration),
    /// Fresh as long as the entry was written after the most recent close.
    UntilNextOpen,
}

impl MaxAge {
    /// Concrete threshold at `now`.
    pub fn resolve(self, now: UtcDateTime, calendar: &MarketCalendar) -> Duration {
        match self {
            Self::Fixed(duration) => duration,
            Self::UntilNextOpen => calendar.last_close(now).until(now),
        }
    }
}

/// Pure mapping from (data type, session state) to a maximum cache age.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessPolicy {
    price_daily_open: Duration,
    price_weekly_open: Duration,
    fundamentals: Duration,
    metadata: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            price_daily_open: Duration::hours(5),
            price_weekly_open: Duration::hours(24),
            fundamentals: Duration::hours(24),
            metadata: Duration::hours(24),
        }
    }
}

impl FreshnessPolicy {
    /// Overrides the duration for one data type. Price durations apply while the market is open.
    pub fn with_hours(mut self, data_type: DataType, hours: f64) -> Result<Self, ConfigError> {
        if !hours.is_finite() || hours <= 0.0 {
            return Err(ConfigError::NonPositiveDuration {
                data_type: data_type.as_str().to_owned(),
                hours,
            });
        }

        let duration = Duration::seconds_f64(hours * 3_600.0);
        match data_type {
            DataType::PriceDaily => self.price_daily_open = duration,
            DataType::PriceWeekly => self.price_weekly_open = duration,
            DataType::Fundamentals => self.fundamentals = duration,
            DataType::Metadata => self.metadata = duration,
        }
        Ok(self)
    }

    pub fn max_age(&self, data_type: DataType, session: SessionState) -> MaxAge {
        match (data_type, session) {
            (DataType::PriceDaily, SessionState::MarketOpen) => MaxAge::Fixed(self.price_daily_open),
            (DataType::PriceWeekly, SessionState::MarketOpen) => {
                MaxAge::Fixed(self.price_weekly_open)
            }
            (DataType::PriceDaily | DataType::PriceWeekly, _) => MaxAge::UntilNextOpen,
            (DataType::Fundamentals, _) => MaxAge::Fixed(self.fundamentals),
            (DataType::Metadata, _) => MaxAge::Fixed(self.metadata),
        }
    }

    /// Threshold for `data_type` at `now` under `calendar`.
    pub fn threshold(
        &self,
        data_type: DataType,
        now: UtcDateTime,
        calendar: &MarketCalendar,
    ) -> Duration {
        self.max_age(data_type, calendar.session_state(now))
            .resolve(now, calendar)
    }
}

/// An entry is fresh while its age is strictly below the threshold.
pub fn is_fresh(fetched_at: UtcDateTime, now: UtcDateTime, threshold: Duration) -> bool {
    fetched_at.until(now) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> UtcDateTime {
        UtcDateTime::parse(ts).expect("valid timestamp")
    }

    #[test]
    fn default_durations() {
        let policy = FreshnessPolicy::default();

        assert_eq!(
            policy.max_age(DataType::PriceDaily, SessionState::MarketOpen),
            MaxAge::Fixed(Duration::hours(5))
        );
        assert_eq!(
            policy.max_age(DataType::PriceWeekly, SessionState::MarketOpen),
            MaxAge::Fixed(Duration::hours(24))
        );
        assert_eq!(
            policy.max_age(DataType::PriceDaily, SessionState::Weekend),
            MaxAge::UntilNextOpen
        );
        assert_eq!(
            policy.max_age(DataType::Fundamentals, SessionState::MarketClosed),
            MaxAge::Fixed(Duration::hours(24))
        );
        assert_eq!(
            policy.max_age(DataType::Metadata, SessionState::Weekend),
            MaxAge::Fixed(Duration::hours(24))
        );
    }

    #[test]
    fn unknown_data_type_fails_fast() {
        assert_eq!(
            "priceDaily".parse::<DataType>(),
            Ok(DataType::PriceDaily)
        );
        assert_eq!(
            "intraday".parse::<DataType>(),
            Err(ConfigError::UnknownDataType {
                value: String::from("intraday")
            })
        );
    }

    #[test]
    fn non_positive_hours_are_rejected() {
        let error = FreshnessPolicy::default()
            .with_hours(DataType::Fundamentals, 0.0)
            .expect_err("zero hours");

        assert!(matches!(error, ConfigError::NonPositiveDuration { .. }));
    }

    #[test]
    fn boundary_is_exclusive() {
        let now = at("2024-03-06T12:00:00Z");
        let threshold = Duration::hours(5);

        assert!(!is_fresh(now.saturating_sub(threshold), now, threshold));
        assert!(is_fresh(
            now.saturating_sub(threshold - Duration::milliseconds(1)),
            now,
            threshold
        ));
    }

    #[test]
    fn weekend_prices_stay_fresh_if_written_after_friday_close() {
        let calendar = MarketCalendar::default();
        let policy = FreshnessPolicy::default();
        let now = at("2024-03-10T12:00:00Z");

        let threshold = policy.threshold(DataType::PriceDaily, now, &calendar);

        assert!(is_fresh(at("2024-03-08T17:00:00Z"), now, threshold));
        assert!(!is_fresh(at("2024-03-08T15:00:00Z"), now, threshold));
    }

    #[test]
    fn summer_opening_hour_uses_the_open_market_limit() {
        let calendar = MarketCalendar::default();
        let policy = FreshnessPolicy::default();
        // Wednesday 09:30 CEST.
        let now = at("2024-07-03T07:30:00Z");

        let threshold = policy.threshold(DataType::PriceDaily, now, &calendar);

        assert_eq!(threshold, Duration::hours(5));
        assert!(!is_fresh(at("2024-07-02T16:40:00Z"), now, threshold));
    }

    #[test]
    fn monthly_prices_use_the_weekly_class() {
        assert_eq!(DataType::for_interval(Interval::Monthly), DataType::PriceWeekly);
    }
}
