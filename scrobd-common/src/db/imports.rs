//! Import job bookkeeping
//!
//! Every batch import runs bracketed by a job row: started_at at launch,
//! finished_at on completion (NULL means it never finished and may be
//! resumed). The job keeps a JSON log of created record GUIDs so undo can
//! delete exactly those records, never more.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ImportJob {
    pub guid: Uuid,
    pub source: String,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_guids: Vec<Uuid>,
    pub skipped_count: i64,
    pub notes: Option<String>,
}

impl ImportJob {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

fn row_to_job(row: &SqliteRow) -> Result<ImportJob> {
    let guid: String = row.try_get("guid")?;
    let user_id: String = row.try_get("user_id")?;
    let started_at: i64 = row.try_get("started_at")?;
    let finished_at: Option<i64> = row.try_get("finished_at")?;
    let created_json: String = row.try_get("created_guids")?;

    let parse_uuid = |s: &str, what: &str| {
        Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Bad {}: {}", what, e)))
    };

    // The undo log must parse completely or the job's undo is unusable
    let created_guids = parse_undo_log(&guid, &created_json)?;

    Ok(ImportJob {
        guid: parse_uuid(&guid, "job guid")?,
        source: row.try_get("source")?,
        user_id: parse_uuid(&user_id, "job user id")?,
        started_at: Utc.timestamp_opt(started_at, 0).single().unwrap_or_default(),
        finished_at: finished_at.map(|s| Utc.timestamp_opt(s, 0).single().unwrap_or_default()),
        created_guids,
        skipped_count: row.try_get("skipped_count")?,
        notes: row.try_get("notes")?,
    })
}

/// Parse a stored undo log; any malformed entry corrupts the whole log
fn parse_undo_log(job_guid: &str, json: &str) -> Result<Vec<Uuid>> {
    let raw: Vec<String> = serde_json::from_str(json)
        .map_err(|_| Error::UndoLogCorrupt(job_guid.to_string()))?;
    raw.iter()
        .map(|s| Uuid::parse_str(s).map_err(|_| Error::UndoLogCorrupt(job_guid.to_string())))
        .collect()
}

/// Insert a started job row
pub async fn begin_job(
    db: &Pool<Sqlite>,
    source: &str,
    user_id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<ImportJob> {
    let guid = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO import_jobs (guid, source, user_id, started_at) VALUES (?, ?, ?, ?)",
    )
    .bind(guid.to_string())
    .bind(source)
    .bind(user_id.to_string())
    .bind(started_at.timestamp())
    .execute(db)
    .await?;

    Ok(ImportJob {
        guid,
        source: source.to_string(),
        user_id,
        started_at,
        finished_at: None,
        created_guids: Vec::new(),
        skipped_count: 0,
        notes: None,
    })
}

/// Mark a job finished and store its undo log in one write
pub async fn finish_job(
    db: &Pool<Sqlite>,
    guid: Uuid,
    finished_at: DateTime<Utc>,
    created_guids: &[Uuid],
    skipped_count: i64,
    notes: Option<&str>,
) -> Result<()> {
    let created_json = serde_json::to_string(
        &created_guids.iter().map(|g| g.to_string()).collect::<Vec<_>>(),
    )
    .map_err(|e| Error::Internal(format!("Failed to encode undo log: {}", e)))?;

    let result = sqlx::query(
        r#"
        UPDATE import_jobs
        SET finished_at = ?, created_guids = ?, skipped_count = ?, notes = ?
        WHERE guid = ?
        "#,
    )
    .bind(finished_at.timestamp())
    .bind(created_json)
    .bind(skipped_count)
    .bind(notes)
    .bind(guid.to_string())
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("import job {}", guid)));
    }
    Ok(())
}

pub async fn get_job(db: &Pool<Sqlite>, guid: Uuid) -> Result<ImportJob> {
    let row = sqlx::query("SELECT * FROM import_jobs WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("import job {}", guid)))?;
    row_to_job(&row)
}

/// Latest job for (source, user); used to detect prior or unfinished runs
pub async fn latest_job(
    db: &Pool<Sqlite>,
    source: &str,
    user_id: Uuid,
) -> Result<Option<ImportJob>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM import_jobs
        WHERE source = ? AND user_id = ?
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(source)
    .bind(user_id.to_string())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;
    use crate::db::users::anonymous_user_id;

    #[tokio::test]
    async fn job_bracketing_round_trip() {
        let db = init_memory_database().await.unwrap();
        let user = anonymous_user_id();

        let job = begin_job(&db, "koreader", user, Utc::now()).await.unwrap();
        assert!(!get_job(&db, job.guid).await.unwrap().is_finished());

        let created = vec![Uuid::new_v4(), Uuid::new_v4()];
        finish_job(&db, job.guid, Utc::now(), &created, 3, None)
            .await
            .unwrap();

        let finished = get_job(&db, job.guid).await.unwrap();
        assert!(finished.is_finished());
        assert_eq!(finished.created_guids, created);
        assert_eq!(finished.skipped_count, 3);
    }

    #[tokio::test]
    async fn corrupt_undo_log_is_an_error() {
        let db = init_memory_database().await.unwrap();
        let user = anonymous_user_id();
        let job = begin_job(&db, "tsv", user, Utc::now()).await.unwrap();

        sqlx::query("UPDATE import_jobs SET created_guids = ? WHERE guid = ?")
            .bind("not json at all")
            .bind(job.guid.to_string())
            .execute(&db)
            .await
            .unwrap();

        let err = get_job(&db, job.guid).await.unwrap_err();
        assert!(matches!(err, Error::UndoLogCorrupt(_)));
    }

    #[tokio::test]
    async fn latest_job_finds_most_recent() {
        let db = init_memory_database().await.unwrap();
        let user = anonymous_user_id();

        let t0 = Utc.timestamp_opt(1_000_000, 0).single().unwrap();
        let t1 = Utc.timestamp_opt(2_000_000, 0).single().unwrap();
        begin_job(&db, "tsv", user, t0).await.unwrap();
        let newer = begin_job(&db, "tsv", user, t1).await.unwrap();

        let latest = latest_job(&db, "tsv", user).await.unwrap().unwrap();
        assert_eq!(latest.guid, newer.guid);
    }
}
