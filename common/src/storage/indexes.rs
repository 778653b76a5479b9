use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{error::AppError, storage::db::SurrealDbClient};

const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FTS_ANALYZER_NAME: &str = "km_en_fts_analyzer";
const HNSW_INDEX_NAME: &str = "idx_embedding_memory_record";
const HNSW_TABLE: &str = "memory_record";
const FTS_INDEX_NAME: &str = "memory_record_fts_idx";

/// Build runtime Surreal indexes (FTS + HNSW) for the `memory_record` table, using
/// concurrent creation with readiness polling. Idempotent: safe to call multiple times
/// and will overwrite the HNSW definition when the embedding dimension changes
/// (spec §4.6, §9 Open Question 2).
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    ensure_runtime_indexes_inner(db, embedding_dimension)
        .await
        .map_err(AppError::Anyhow)
}

/// Rebuild the known FTS and HNSW indexes, skipping any that are not yet defined.
pub async fn rebuild_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    rebuild_indexes_inner(db).await.map_err(AppError::Anyhow)
}

async fn ensure_runtime_indexes_inner(db: &SurrealDbClient, embedding_dimension: usize) -> Result<()> {
    create_fts_analyzer(db).await?;

    if !index_exists(db, HNSW_TABLE, FTS_INDEX_NAME).await? {
        create_index_with_polling(db, fts_definition(), FTS_INDEX_NAME, HNSW_TABLE).await?;
    }

    match hnsw_index_state(db, embedding_dimension).await? {
        HnswIndexState::Missing => {
            create_index_with_polling(
                db,
                hnsw_definition_if_not_exists(embedding_dimension),
                HNSW_INDEX_NAME,
                HNSW_TABLE,
            )
            .await?;
        }
        HnswIndexState::Matches => {
            let status = get_index_status(db, HNSW_INDEX_NAME, HNSW_TABLE).await?;
            if status.eq_ignore_ascii_case("error") {
                warn!(index = HNSW_INDEX_NAME, "HNSW index in error state; rebuilding");
                create_index_with_polling(
                    db,
                    hnsw_definition_overwrite(embedding_dimension),
                    HNSW_INDEX_NAME,
                    HNSW_TABLE,
                )
                .await?;
            }
        }
        HnswIndexState::Different(existing) => {
            debug!(
                existing_dimension = existing,
                target_dimension = embedding_dimension,
                "overwriting HNSW index to match new embedding dimension"
            );
            create_index_with_polling(
                db,
                hnsw_definition_overwrite(embedding_dimension),
                HNSW_INDEX_NAME,
                HNSW_TABLE,
            )
            .await?;
        }
    }

    Ok(())
}

async fn rebuild_indexes_inner(db: &SurrealDbClient) -> Result<()> {
    create_fts_analyzer(db).await?;

    if index_exists(db, HNSW_TABLE, FTS_INDEX_NAME).await? {
        create_index_with_polling(db, fts_overwrite_definition(), FTS_INDEX_NAME, HNSW_TABLE).await?;
    }

    if let Some(dimension) = existing_hnsw_dimension(db).await? {
        create_index_with_polling(
            db,
            hnsw_definition_overwrite(dimension),
            HNSW_INDEX_NAME,
            HNSW_TABLE,
        )
        .await?;
    }

    Ok(())
}

fn hnsw_definition_if_not_exists(dimension: usize) -> String {
    format!(
        "DEFINE INDEX IF NOT EXISTS {HNSW_INDEX_NAME} ON TABLE {HNSW_TABLE} \
         FIELDS vector HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8 CONCURRENTLY;"
    )
}

fn hnsw_definition_overwrite(dimension: usize) -> String {
    format!(
        "DEFINE INDEX OVERWRITE {HNSW_INDEX_NAME} ON TABLE {HNSW_TABLE} \
         FIELDS vector HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8 CONCURRENTLY;"
    )
}

fn fts_definition() -> String {
    format!(
        "DEFINE INDEX IF NOT EXISTS {FTS_INDEX_NAME} ON TABLE {HNSW_TABLE} \
         FIELDS payload.text SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25 CONCURRENTLY;"
    )
}

fn fts_overwrite_definition() -> String {
    format!(
        "DEFINE INDEX OVERWRITE {FTS_INDEX_NAME} ON TABLE {HNSW_TABLE} \
         FIELDS payload.text SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25 CONCURRENTLY;"
    )
}

async fn get_index_status(db: &SurrealDbClient, index_name: &str, table: &str) -> Result<String> {
    let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
    let mut info_res = db
        .client
        .query(info_query)
        .await
        .context("checking index status")?;
    let info: Option<Value> = info_res.take(0).context("failed to take info result")?;

    let Some(info) = info else {
        return Ok("unknown".to_string());
    };

    Ok(info
        .get("building")
        .and_then(|b| b.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("ready")
        .to_string())
}

async fn existing_hnsw_dimension(db: &SurrealDbClient) -> Result<Option<usize>> {
    let Some(indexes) = table_index_definitions(db, HNSW_TABLE).await? else {
        return Ok(None);
    };

    let Some(definition) = indexes
        .get(HNSW_INDEX_NAME)
        .and_then(|details| details.get("Strand"))
        .and_then(|v| v.as_str())
    else {
        return Ok(None);
    };

    Ok(extract_dimension(definition).and_then(|d| usize::try_from(d).ok()))
}

enum HnswIndexState {
    Missing,
    Matches,
    Different(u64),
}

async fn hnsw_index_state(db: &SurrealDbClient, expected_dimension: usize) -> Result<HnswIndexState> {
    match existing_hnsw_dimension(db).await? {
        None => Ok(HnswIndexState::Missing),
        Some(current) if current == expected_dimension => Ok(HnswIndexState::Matches),
        Some(current) => Ok(HnswIndexState::Different(current as u64)),
    }
}

fn extract_dimension(definition: &str) -> Option<u64> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<u64>().ok())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<()> {
    let snowball_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball(english);"
    );

    match db.client.query(snowball_query).await {
        Ok(res) if res.check().is_ok() => return Ok(()),
        Ok(_) | Err(_) => {
            warn!("snowball analyzer unavailable; falling back to lowercase+ascii only");
        }
    }

    let fallback_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class
            FILTERS lowercase, ascii;"
    );

    let res = db
        .client
        .query(fallback_query)
        .await
        .context("creating fallback FTS analyzer")?;
    res.check().context("failed to create fallback FTS analyzer")?;

    Ok(())
}

async fn create_index_with_polling(
    db: &SurrealDbClient,
    definition: String,
    index_name: &str,
    table: &str,
) -> Result<()> {
    let expected_total = count_table_rows(db, table)
        .await
        .with_context(|| format!("counting rows in {table} for index {index_name} progress"))?;

    let mut attempts = 0;
    const MAX_ATTEMPTS: usize = 3;
    loop {
        attempts += 1;
        let res = db
            .client
            .query(definition.clone())
            .await
            .with_context(|| format!("creating index {index_name} on table {table}"))?;
        match res.check() {
            Ok(_) => break,
            Err(err) => {
                let conflict = err.to_string().contains("read or write conflict");
                warn!(index = %index_name, table = %table, error = ?err, attempt = attempts, "index definition failed");
                if conflict && attempts < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                return Err(err)
                    .with_context(|| format!("index definition failed for {index_name} on {table}"));
            }
        }
    }

    poll_index_build_status(db, index_name, table, expected_total, INDEX_POLL_INTERVAL).await
}

async fn poll_index_build_status(
    db: &SurrealDbClient,
    index_name: &str,
    table: &str,
    total_rows: u64,
    poll_every: Duration,
) -> Result<()> {
    loop {
        tokio::time::sleep(poll_every).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut info_res = db
            .client
            .query(info_query)
            .await
            .with_context(|| format!("checking index build status for {index_name} on {table}"))?;

        let info: Option<Value> = info_res
            .take(0)
            .context("failed to deserialize INFO FOR INDEX result")?;

        let Some(snapshot) = parse_index_build_info(info, total_rows) else {
            warn!(index = %index_name, table = %table, "INFO FOR INDEX returned no data");
            break;
        };

        debug!(index = %index_name, table = %table, status = snapshot.status, processed = snapshot.processed, total = snapshot.total_rows, "index build status");

        if snapshot.is_ready() || snapshot.status.eq_ignore_ascii_case("error") {
            break;
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
struct IndexBuildSnapshot {
    status: String,
    processed: u64,
    total_rows: u64,
}

impl IndexBuildSnapshot {
    fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("ready")
    }
}

fn parse_index_build_info(info: Option<Value>, total_rows: u64) -> Option<IndexBuildSnapshot> {
    let info = info?;
    let building = info.get("building");

    let status = building
        .and_then(|b| b.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("ready")
        .to_string();

    let initial = building.and_then(|b| b.get("initial")).and_then(Value::as_u64).unwrap_or(0);
    let updated = building.and_then(|b| b.get("updated")).and_then(Value::as_u64).unwrap_or(0);
    let processed = initial.saturating_add(updated);

    Some(IndexBuildSnapshot {
        status,
        processed,
        total_rows,
    })
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

async fn count_table_rows(db: &SurrealDbClient, table: &str) -> Result<u64> {
    let query = format!("SELECT count() AS count FROM {table} GROUP ALL;");
    let mut response = db.client.query(query).await.with_context(|| format!("counting rows in {table}"))?;
    let rows: Vec<CountRow> = response.take(0).context("failed to deserialize count() response")?;
    Ok(rows.first().map_or(0, |r| r.count))
}

async fn table_index_definitions(db: &SurrealDbClient, table: &str) -> Result<Option<Map<String, Value>>> {
    let info_query = format!("INFO FOR TABLE {table};");
    let mut response = db
        .client
        .query(info_query)
        .await
        .with_context(|| format!("fetching table info for {table}"))?;

    let info: surrealdb::Value = response.take(0).context("failed to take table info response")?;
    let info_json: Value = serde_json::to_value(info).context("serializing table info to JSON")?;

    Ok(info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.as_object())
        .cloned())
}

async fn index_exists(db: &SurrealDbClient, table: &str, index_name: &str) -> Result<bool> {
    let Some(indexes) = table_index_definitions(db, table).await? else {
        return Ok(false);
    };
    Ok(indexes.contains_key(index_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn parse_index_build_info_reports_progress() {
        let info = json!({
            "building": { "initial": 56894, "pending": 0, "status": "indexing", "updated": 0 }
        });

        let snapshot = parse_index_build_info(Some(info), 61081).expect("snapshot");
        assert_eq!(snapshot.status, "indexing");
        assert_eq!(snapshot.processed, 56894);
        assert!(!snapshot.is_ready());
    }

    #[test]
    fn parse_index_build_info_defaults_to_ready_when_no_building_block() {
        let info = json!({});
        let snapshot = parse_index_build_info(Some(info), 10).expect("snapshot");
        assert!(snapshot.is_ready());
        assert_eq!(snapshot.processed, 0);
    }

    #[test]
    fn extract_dimension_parses_value() {
        let definition = "DEFINE INDEX idx_embedding_memory_record ON TABLE memory_record FIELDS vector HNSW DIMENSION 1536 DIST COSINE TYPE F32 EFC 100 M 8;";
        assert_eq!(extract_dimension(definition), Some(1536));
    }

    #[tokio::test]
    async fn ensure_runtime_indexes_is_idempotent() {
        let namespace = "indexes_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database).await.expect("in-memory db");

        ensure_runtime_indexes(&db, 8).await.expect("initial index creation");
        ensure_runtime_indexes(&db, 8).await.expect("second index creation is a no-op");
    }

    #[tokio::test]
    async fn ensure_hnsw_index_overwrites_dimension() {
        let namespace = "indexes_dim";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database).await.expect("in-memory db");

        ensure_runtime_indexes(&db, 8).await.expect("initial index creation");
        ensure_runtime_indexes(&db, 4).await.expect("overwritten index creation");
    }
}
