use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Approved,
    Rejected,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Consent {
    Si,
    No,
}

impl Consent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consent::Si => "si",
            Consent::No => "no",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl FromStr for Status {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "approved" => Ok(Status::Approved),
            "rejected" => Ok(Status::Rejected),
            _ => Err(UnknownVariant {
                kind: "status",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for Consent {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "si" => Ok(Consent::Si),
            "no" => Ok(Consent::No),
            _ => Err(UnknownVariant {
                kind: "consent",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record's timestamp came from. Only `Server` is guaranteed to be a
/// valid instant.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    Server(DateTime<Utc>),
    Client(String),
    Missing,
}

/// Rating fields exactly as stored. Values are left untyped so that one
/// malformed field never hides the rest of the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Ratings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub availability: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub staff: Option<Value>,
    #[serde(default, rename = "waitTime", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub wait_time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub experience: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawFeedback {
    pub id: String,
    pub status: Status,
    pub consent: Consent,
    pub ratings: Ratings,
    pub comments: Option<String>,
    pub keywords: Option<String>,
    pub timestamp: RawTimestamp,
    pub moderated_by: Option<String>,
    pub moderated_at: Option<DateTime<Utc>>,
}

impl RawFeedback {
    /// True when the record carries a comment or keyword worth moderating or
    /// displaying.
    pub fn has_text(&self) -> bool {
        fn non_blank(s: &Option<String>) -> bool {
            s.as_deref().is_some_and(|s| !s.trim().is_empty())
        }
        non_blank(&self.comments) || non_blank(&self.keywords)
    }
}

/// Conditions understood by every `FeedbackStore`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackFilter {
    /// Empty means any status.
    pub statuses: Vec<Status>,
    pub consent: Option<Consent>,
    /// Lower bound on server-assigned timestamps. Records without one are
    /// passed through for the caller to re-check.
    pub since: Option<DateTime<Utc>>,
}

impl FeedbackFilter {
    pub fn status(status: Status) -> Self {
        FeedbackFilter {
            statuses: vec![status],
            ..Default::default()
        }
    }

    pub fn visible() -> Self {
        FeedbackFilter {
            statuses: vec![Status::Approved],
            consent: Some(Consent::Si),
            since: None,
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// In-memory equivalent of the store's filter.
    #[cfg(test)]
    pub fn matches(&self, record: &RawFeedback) -> bool {
        let status = self.statuses.is_empty() || self.statuses.contains(&record.status);
        let consent = self.consent.map_or(true, |c| c == record.consent);
        let since = match (&self.since, &record.timestamp) {
            (Some(since), RawTimestamp::Server(ts)) => ts >= since,
            _ => true,
        };
        status && consent && since
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFeedback {
    pub consent: Consent,
    pub ratings: Ratings,
    pub comments: Option<String>,
    pub keywords: Option<String>,
    pub client_timestamp: Option<String>,
}

/// Survey form body.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct FeedbackSubmission {
    pub availability: i64,
    pub staff: i64,
    #[serde(rename = "waitTime")]
    pub wait_time: i64,
    pub experience: i64,
    #[serde(default)]
    pub keywords: Option<String>,
    pub comments: String,
    pub consent: Consent,
    /// Client clock, kept as a fallback when the server time is unavailable.
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ModerationRequest {
    pub status: Status,
}

/// Record as shown to admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackView {
    pub id: String,
    pub status: Status,
    pub consent: Consent,
    #[serde(flatten)]
    pub ratings: Ratings,
    pub comments: Option<String>,
    pub keywords: Option<String>,
    /// Server timestamp if present, otherwise the raw client value.
    pub timestamp: Option<String>,
    pub moderated_by: Option<String>,
    pub moderated_at: Option<DateTime<Utc>>,
}

impl From<RawFeedback> for FeedbackView {
    fn from(record: RawFeedback) -> Self {
        let timestamp = match record.timestamp {
            RawTimestamp::Server(ts) => Some(ts.to_rfc3339()),
            RawTimestamp::Client(raw) => Some(raw),
            RawTimestamp::Missing => None,
        };
        FeedbackView {
            id: record.id,
            status: record.status,
            consent: record.consent,
            ratings: record.ratings,
            comments: record.comments,
            keywords: record.keywords,
            timestamp,
            moderated_by: record.moderated_by,
            moderated_at: record.moderated_at,
        }
    }
}

/// Public carousel entry. Carries no identifiers or ratings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommentView {
    pub comments: Option<String>,
    pub keywords: Option<String>,
}

impl From<RawFeedback> for CommentView {
    fn from(record: RawFeedback) -> Self {
        CommentView {
            comments: record.comments,
            keywords: record.keywords,
        }
    }
}
