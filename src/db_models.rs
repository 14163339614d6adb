use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use super::schema::*;
use crate::models::{RawFeedback, RawTimestamp, Ratings, UnknownVariant};

#[derive(Queryable, Selectable)]
#[diesel(table_name = feedbacks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FeedbackRow {
    pub id: String,
    pub status: String,
    pub consent: String,
    pub ratings: Value,
    pub comments: Option<String>,
    pub keywords: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub client_timestamp: Option<String>,
    pub moderated_by: Option<String>,
    pub moderated_at: Option<DateTime<Utc>>,
}

#[derive(Insertable)]
#[diesel(table_name = feedbacks)]
pub struct NewFeedbackRow {
    pub id: String,
    pub status: String,
    pub consent: String,
    pub ratings: Value,
    pub comments: Option<String>,
    pub keywords: Option<String>,
    pub client_timestamp: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = feedbacks)]
pub struct Moderation<'a> {
    pub status: &'a str,
    pub moderated_by: &'a str,
    pub moderated_at: DateTime<Utc>,
}

impl TryFrom<FeedbackRow> for RawFeedback {
    type Error = UnknownVariant;

    fn try_from(row: FeedbackRow) -> Result<Self, Self::Error> {
        let ratings = serde_json::from_value::<Ratings>(row.ratings).unwrap_or_else(|e| {
            tracing::warn!(id = %row.id, error = %e, "feedback ratings are not an object");
            Ratings::default()
        });
        let timestamp = match (row.submitted_at, row.client_timestamp) {
            (Some(ts), _) => RawTimestamp::Server(ts),
            (None, Some(raw)) => RawTimestamp::Client(raw),
            (None, None) => RawTimestamp::Missing,
        };

        Ok(RawFeedback {
            status: row.status.parse()?,
            consent: row.consent.parse()?,
            id: row.id,
            ratings,
            comments: row.comments,
            keywords: row.keywords,
            timestamp,
            moderated_by: row.moderated_by,
            moderated_at: row.moderated_at,
        })
    }
}
