use chrono::{DateTime, Utc};
use diesel::{
    pg::PgConnection,
    prelude::*,
    r2d2::{ConnectionManager, Pool, PooledConnection},
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::Config,
    db_models::{FeedbackRow, Moderation, NewFeedbackRow},
    models::{FeedbackFilter, NewFeedback, RawFeedback, Status},
    schema::feedbacks,
    store::FeedbackStore,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    PoolError(#[from] r2d2::Error),
    #[error(transparent)]
    QueryError(#[from] diesel::result::Error),
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),
    #[error("migration failed: {0}")]
    MigrationError(String),
    #[error("corrupt feedback '{0}': {1}")]
    CorruptRecord(String, String),
}

pub fn connection_pool(config: &Config) -> Result<PgPool, DatabaseError> {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url());
    let pool = Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(config.store_timeout)
        .build(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    let mut conn = pool.get()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;
    for migration in applied {
        tracing::info!(%migration, "applied migration");
    }
    Ok(())
}

pub struct PgFeedbackStore {
    pool: PgPool,
}

impl PgFeedbackStore {
    pub fn new(pool: PgPool) -> Self {
        PgFeedbackStore { pool }
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, DatabaseError> {
        Ok(self.pool.get()?)
    }
}

impl FeedbackStore for PgFeedbackStore {
    fn query(&self, filter: &FeedbackFilter) -> Result<Vec<RawFeedback>, DatabaseError> {
        let mut q = feedbacks::table
            .select(FeedbackRow::as_select())
            .into_boxed();
        if !filter.statuses.is_empty() {
            let statuses: Vec<&str> = filter.statuses.iter().map(Status::as_str).collect();
            q = q.filter(feedbacks::status.eq_any(statuses));
        }
        if let Some(consent) = filter.consent {
            q = q.filter(feedbacks::consent.eq(consent.as_str()));
        }
        if let Some(since) = filter.since {
            q = q.filter(
                feedbacks::submitted_at
                    .is_null()
                    .or(feedbacks::submitted_at.ge(since)),
            );
        }

        let rows = q.load(&mut self.conn()?)?;

        // rows with unknown enum values are dropped, the rest are still served
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                RawFeedback::try_from(row)
                    .map_err(|e| tracing::warn!(%id, error = %e, "skipped corrupt feedback"))
                    .ok()
            })
            .collect())
    }

    fn find(&self, id: &str) -> Result<Option<RawFeedback>, DatabaseError> {
        feedbacks::table
            .find(id)
            .select(FeedbackRow::as_select())
            .first(&mut self.conn()?)
            .optional()?
            .map(|row| {
                RawFeedback::try_from(row)
                    .map_err(|e| DatabaseError::CorruptRecord(id.to_string(), e.to_string()))
            })
            .transpose()
    }

    fn insert(&self, feedback: NewFeedback) -> Result<RawFeedback, DatabaseError> {
        let ratings = serde_json::to_value(&feedback.ratings)?;
        let row = NewFeedbackRow {
            id: Uuid::new_v4().to_string(),
            status: Status::Pending.as_str().to_string(),
            consent: feedback.consent.as_str().to_string(),
            ratings,
            comments: feedback.comments,
            keywords: feedback.keywords,
            client_timestamp: feedback.client_timestamp,
        };
        let id = row.id.clone();

        let stored: FeedbackRow = diesel::insert_into(feedbacks::table)
            .values(&row)
            .returning(FeedbackRow::as_returning())
            .get_result(&mut self.conn()?)?;

        RawFeedback::try_from(stored).map_err(|e| DatabaseError::CorruptRecord(id, e.to_string()))
    }

    fn set_status(
        &self,
        id: &str,
        status: Status,
        expected: Option<Status>,
        moderator: &str,
        when: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let changes = Moderation {
            status: status.as_str(),
            moderated_by: moderator,
            moderated_at: when,
        };
        let target = feedbacks::table.find(id);
        let mut conn = self.conn()?;

        let updated = match expected {
            Some(current) => diesel::update(target.filter(feedbacks::status.eq(current.as_str())))
                .set(&changes)
                .execute(&mut conn)?,
            None => diesel::update(target).set(&changes).execute(&mut conn)?,
        };
        Ok(updated > 0)
    }

    fn ping(&self) -> Result<(), DatabaseError> {
        feedbacks::table
            .count()
            .get_result::<i64>(&mut self.conn()?)?;
        Ok(())
    }
}
