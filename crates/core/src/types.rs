/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Job status ids match the `job_statuses` seed table (SMALLINT).
pub type StatusId = i16;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
