use std::fmt::{Debug, Formatter};
use std::sync::Mutex;

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::error::ConfigError;
use crate::freshness::SessionState;
use crate::UtcDateTime;

/// Source of "now" for freshness decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Settable clock for tests and replays.
pub struct FixedClock {
    now: Mutex<UtcDateTime>,
}

impl FixedClock {
    pub fn new(now: UtcDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: UtcDateTime) {
        *self.now.lock().expect("fixed clock lock is not poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("fixed clock lock is not poisoned");
        *now = now.saturating_add(by);
    }
}

impl Debug for FixedClock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedClock").field("now", &self.now()).finish()
    }
}

impl Clock for FixedClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().expect("fixed clock lock is not poisoned")
    }
}

/// Regular trading hours of one exchange in its own time zone. Holidays are
/// not modelled; a holiday reads as a closed weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CalendarSettings", into = "CalendarSettings")]
pub struct MarketCalendar {
    zone: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

/// Serialized calendar: an IANA zone name plus `HH:MM` session times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalendarSettings {
    pub timezone: String,
    pub open: String,
    pub close: String,
}

impl Default for MarketCalendar {
    /// Nasdaq Stockholm, 09:00 to 17:30 Europe/Stockholm.
    fn default() -> Self {
        Self {
            zone: Tz::Europe__Stockholm,
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(17, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl TryFrom<CalendarSettings> for MarketCalendar {
    type Error = ConfigError;

    fn try_from(settings: CalendarSettings) -> Result<Self, Self::Error> {
        let zone: Tz = settings.timezone.trim().parse().map_err(|_| {
            ConfigError::InvalidCalendar(format!(
                "'{}' is not an IANA time zone",
                settings.timezone
            ))
        })?;
        Self::new(zone, parse_hh_mm(&settings.open)?, parse_hh_mm(&settings.close)?)
    }
}

impl From<MarketCalendar> for CalendarSettings {
    fn from(calendar: MarketCalendar) -> Self {
        Self {
            timezone: calendar.zone.name().to_owned(),
            open: calendar.open.format("%H:%M").to_string(),
            close: calendar.close.format("%H:%M").to_string(),
        }
    }
}

impl MarketCalendar {
    pub fn new(zone: Tz, open: NaiveTime, close: NaiveTime) -> Result<Self, ConfigError> {
        if open >= close {
            return Err(ConfigError::InvalidCalendar(String::from(
                "session open must be earlier than close",
            )));
        }
        Ok(Self { zone, open, close })
    }

    pub fn session_state(&self, now: UtcDateTime) -> SessionState {
        let Some(local) = self.local(now) else {
            return SessionState::MarketClosed;
        };
        if is_weekend(local.weekday()) {
            return SessionState::Weekend;
        }

        let time = local.time();
        if time >= self.open && time < self.close {
            SessionState::MarketOpen
        } else {
            SessionState::MarketClosed
        }
    }

    /// Most recent session close at or before `now`. Falls back to `now`
    /// when the instant cannot be placed in the exchange zone.
    pub fn last_close(&self, now: UtcDateTime) -> UtcDateTime {
        let Some(local) = self.local(now) else {
            return now;
        };
        let mut date = local.date_naive();
        if local.time() < self.close {
            date = date.pred_opt().unwrap_or(date);
        }
        while is_weekend(date.weekday()) {
            date = date.pred_opt().unwrap_or(date);
        }
        self.at(date, self.close).unwrap_or(now)
    }

    fn local(&self, now: UtcDateTime) -> Option<DateTime<Tz>> {
        let instant = now.into_inner();
        DateTime::from_timestamp(instant.unix_timestamp(), instant.nanosecond())
            .map(|utc| utc.with_timezone(&self.zone))
    }

    fn at(&self, date: NaiveDate, time: NaiveTime) -> Option<UtcDateTime> {
        let local = date.and_time(time);
        let resolved = match self.zone.from_local_datetime(&local) {
            LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => at,
            // Wall time inside a DST gap; place it as if it were UTC.
            LocalResult::None => self.zone.from_utc_datetime(&local),
        };
        UtcDateTime::from_unix_timestamp(resolved.timestamp())
    }
}

fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

fn parse_hh_mm(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ConfigError::InvalidCalendar(format!("'{value}' is not an HH:MM time")))
}
