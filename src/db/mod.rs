use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use uuid::Uuid;

pub type DbPool = SqlitePool;

pub const KIND_ORIGINAL: &str = "original";
pub const KIND_REDACTED: &str = "redacted";

/// A stored audio artifact (original or redacted)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Artifact {
    pub recording_id: String,
    pub kind: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub created_at: String,
}

/// A stored redacted transcript plus the spans that were masked
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TranscriptRow {
    pub recording_id: String,
    pub text: String,
    pub spans_json: String,
    pub created_at: String,
}

pub async fn init_db(database_url: &str) -> Result<DbPool, sqlx::Error> {
    if let Some(path) = database_url.strip_prefix("sqlite:") {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

async fn store_artifact(
    pool: &DbPool,
    recording_id: Uuid,
    kind: &str,
    content: &[u8],
    content_type: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO artifacts (recording_id, kind, content, content_type, created_at)
        VALUES (?, ?, ?, ?, datetime('now'))
        ON CONFLICT(recording_id, kind)
        DO UPDATE SET content = excluded.content, content_type = excluded.content_type,
                      created_at = datetime('now')
        "#,
    )
    .bind(recording_id.to_string())
    .bind(kind)
    .bind(content)
    .bind(content_type)
    .execute(pool)
    .await?;

    Ok(())
}

async fn get_artifact(
    pool: &DbPool,
    recording_id: Uuid,
    kind: &str,
) -> Result<Option<Artifact>, sqlx::Error> {
    let artifact = sqlx::query_as::<_, Artifact>(
        "SELECT * FROM artifacts WHERE recording_id = ? AND kind = ?",
    )
    .bind(recording_id.to_string())
    .bind(kind)
    .fetch_optional(pool)
    .await?;

    Ok(artifact)
}

pub async fn store_original(
    pool: &DbPool,
    recording_id: Uuid,
    content: &[u8],
    content_type: &str,
) -> Result<(), sqlx::Error> {
    store_artifact(pool, recording_id, KIND_ORIGINAL, content, content_type).await
}

pub async fn store_redacted(
    pool: &DbPool,
    recording_id: Uuid,
    content: &[u8],
    content_type: &str,
) -> Result<(), sqlx::Error> {
    store_artifact(pool, recording_id, KIND_REDACTED, content, content_type).await
}

pub async fn get_original(pool: &DbPool, recording_id: Uuid) -> Result<Option<Artifact>, sqlx::Error> {
    get_artifact(pool, recording_id, KIND_ORIGINAL).await
}

pub async fn get_redacted(pool: &DbPool, recording_id: Uuid) -> Result<Option<Artifact>, sqlx::Error> {
    get_artifact(pool, recording_id, KIND_REDACTED).await
}

pub async fn store_transcript(
    pool: &DbPool,
    recording_id: Uuid,
    text: &str,
    spans_json: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transcripts (recording_id, text, spans_json, created_at)
        VALUES (?, ?, ?, datetime('now'))
        ON CONFLICT(recording_id)
        DO UPDATE SET text = excluded.text, spans_json = excluded.spans_json,
                      created_at = datetime('now')
        "#,
    )
    .bind(recording_id.to_string())
    .bind(text)
    .bind(spans_json)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_transcript(
    pool: &DbPool,
    recording_id: Uuid,
) -> Result<Option<TranscriptRow>, sqlx::Error> {
    let row = sqlx::query_as::<_, TranscriptRow>(
        "SELECT * FROM transcripts WHERE recording_id = ?",
    )
    .bind(recording_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
