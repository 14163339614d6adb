use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    models::{Consent, FeedbackFilter, RawFeedback, RawTimestamp, Ratings, Status},
    store::{self, FeedbackStore, StoreError},
};

/// Number of calendar days in every series, today included.
pub const WINDOW_DAYS: usize = 5;

const MONTHS: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sep", "oct", "nov", "dic",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Metric {
    #[serde(rename = "availability")]
    Availability,
    #[serde(rename = "staff")]
    Staff,
    #[serde(rename = "waitTime")]
    WaitTime,
    #[serde(rename = "experience")]
    Experience,
    #[serde(rename = "general")]
    General,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Availability,
        Metric::Staff,
        Metric::WaitTime,
        Metric::Experience,
        Metric::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Availability => "availability",
            Metric::Staff => "staff",
            Metric::WaitTime => "waitTime",
            Metric::Experience => "experience",
            Metric::General => "general",
        }
    }

    /// Value this record contributes to the metric, if any.
    ///
    /// `General` averages the valid subset of the four base ratings, rounded
    /// to two decimals per record.
    pub fn extract(&self, ratings: &Ratings) -> Option<f64> {
        match self {
            Metric::Availability => rating_value(&ratings.availability),
            Metric::Staff => rating_value(&ratings.staff),
            Metric::WaitTime => rating_value(&ratings.wait_time),
            Metric::Experience => rating_value(&ratings.experience),
            Metric::General => {
                let parts: Vec<f64> = [
                    &ratings.availability,
                    &ratings.experience,
                    &ratings.staff,
                    &ratings.wait_time,
                ]
                .into_iter()
                .filter_map(rating_value)
                .collect();
                mean(&parts).map(round2)
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown metric '{0}'")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DailyMetricPoint {
    /// Day of month and abbreviated month, e.g. `30 jul`.
    pub day: String,
    /// Mean rounded to two decimals, `0` when `samples` is `0`.
    pub rating: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetricSeries {
    pub metric: Metric,
    pub points: Vec<DailyMetricPoint>,
}

#[derive(Debug, thiserror::Error)]
#[error("aggregation of '{metric}' failed")]
pub struct AggregationError {
    pub metric: Metric,
    #[source]
    pub source: StoreError,
}

fn rating_value(value: &Option<Value>) -> Option<f64> {
    value
        .as_ref()?
        .as_f64()
        .filter(|v| v.is_finite() && (1.0..=5.0).contains(v))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Display label of a calendar day. Carries no year.
pub fn format_day(date: NaiveDate) -> String {
    format!("{:02} {}", date.day(), MONTHS[date.month0() as usize])
}

/// The calendar days of the window ending at `today`, oldest first.
pub fn window_days(today: NaiveDate) -> [NaiveDate; WINDOW_DAYS] {
    std::array::from_fn(|i| today - TimeDelta::days((WINDOW_DAYS - 1 - i) as i64))
}

/// First instant of the window: local midnight of the oldest day.
pub fn window_start<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let first_day = window_days(now.date_naive())[0];
    let midnight = first_day.and_time(chrono::NaiveTime::MIN);
    let tz = now.timezone();
    match tz.from_local_datetime(&midnight).earliest() {
        Some(start) => start.with_timezone(&Utc),
        // midnight skipped by a DST jump, fall back to the current offset.
        // The bound may then sit before the first local instant of the day,
        // compute_daily_averages re-checks the calendar date anyway.
        None => {
            let offset = TimeDelta::seconds(now.offset().fix().local_minus_utc() as i64);
            (midnight - offset).and_utc()
        }
    }
}

/// Interprets a stored timestamp in `tz`. Client values are accepted as
/// RFC 3339, or as a naive local date-time.
pub fn parse_timestamp<Tz: TimeZone>(timestamp: &RawTimestamp, tz: &Tz) -> Option<DateTime<Tz>> {
    match timestamp {
        RawTimestamp::Server(ts) => Some(ts.with_timezone(tz)),
        RawTimestamp::Client(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|ts| ts.with_timezone(tz))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .and_then(|naive| tz.from_local_datetime(&naive).earliest())
            }),
        RawTimestamp::Missing => None,
    }
}

/// Per-day averages of `metric` over the trailing window ending at `now`.
///
/// Only approved, consented records dated on one of the window's local
/// calendar days contribute. Malformed records are skipped, never fatal.
/// Days without data are reported with `rating = 0` and `samples = 0`.
pub fn compute_daily_averages<Tz: TimeZone>(
    records: &[RawFeedback],
    metric: Metric,
    now: &DateTime<Tz>,
) -> [DailyMetricPoint; WINDOW_DAYS] {
    let tz = now.timezone();
    let days = window_days(now.date_naive());
    let (first, last) = (days[0], days[WINDOW_DAYS - 1]);

    let mut buckets: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for record in records {
        if record.status != Status::Approved || record.consent != Consent::Si {
            continue;
        }
        let Some(ts) = parse_timestamp(&record.timestamp, &tz) else {
            tracing::warn!(id = %record.id, timestamp = ?record.timestamp, "skipped feedback with invalid timestamp");
            continue;
        };
        let date = ts.date_naive();
        if date < first || date > last {
            continue;
        }
        if let Some(value) = metric.extract(&record.ratings) {
            buckets.entry(date).or_default().push(value);
        }
    }

    days.map(|date| {
        let values = buckets.get(&date).map(Vec::as_slice).unwrap_or_default();
        DailyMetricPoint {
            day: format_day(date),
            rating: mean(values).map(round2).unwrap_or(0.0),
            samples: values.len(),
        }
    })
}

/// Fetches eligible records and aggregates them. Every call issues its own
/// store query.
#[derive(Clone)]
pub struct MetricAggregator {
    store: Arc<dyn FeedbackStore>,
    timeout: Duration,
}

impl MetricAggregator {
    pub fn new(store: Arc<dyn FeedbackStore>, timeout: Duration) -> Self {
        MetricAggregator { store, timeout }
    }

    #[tracing::instrument(skip(self, now))]
    pub async fn daily_averages<Tz: TimeZone>(
        &self,
        metric: Metric,
        now: DateTime<Tz>,
    ) -> Result<[DailyMetricPoint; WINDOW_DAYS], AggregationError> {
        let filter = FeedbackFilter::visible().since(window_start(&now));
        let records = store::call(&self.store, self.timeout, move |store| store.query(&filter))
            .await
            .map_err(|source| AggregationError { metric, source })?;

        tracing::debug!(records = records.len(), "fetched feedback");
        Ok(compute_daily_averages(&records, metric, &now))
    }
}
