use super::model::BatchDetail;
use crate::error::{RegistryError, Result};
use crate::model::{
    parse_quantity, Batch, BatchStatus, GeoPoint, MediaAttachment, MediaKind, NewBatch,
    SoilQuality, TimelineStep,
};
use crate::{geo, timeline};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and create the parent
/// directory. In-memory URLs and non-sqlite schemes pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded, q),
        None => format!("sqlite://{}", expanded),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

fn decode_err(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch, sqlx::Error> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| decode_err("id", format!("bad batch id {id_str}: {e}")))?;
    let status_str: String = row.get("status");
    let status = BatchStatus::parse_status(&status_str)
        .ok_or_else(|| decode_err("status", format!("unknown status {status_str}")))?;
    let soil_quality = row
        .get::<Option<String>, _>("soil_quality")
        .map(|s| {
            SoilQuality::parse_rating(&s)
                .ok_or_else(|| decode_err("soil_quality", format!("unknown rating {s}")))
        })
        .transpose()?;

    Ok(Batch {
        id,
        farmer_id: row.get("farmer_id"),
        species: row.get("species"),
        quantity: row.get("quantity"),
        status,
        geo: GeoPoint {
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            accuracy_m: row.get("accuracy_m"),
        },
        weather: row.get("weather"),
        soil_quality,
        estimated_value: row.get("estimated_value"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    })
}

fn step_from_row(row: &SqliteRow) -> TimelineStep {
    TimelineStep {
        position: row.get("position"),
        title: row.get("title"),
        completed: row.get("completed"),
        in_progress: row.get("in_progress"),
        completed_at: row.get("completed_at"),
    }
}

fn media_from_row(row: &SqliteRow) -> Result<MediaAttachment, sqlx::Error> {
    let batch_id_str: String = row.get("batch_id");
    let batch_id = Uuid::parse_str(&batch_id_str)
        .map_err(|e| decode_err("batch_id", format!("bad batch id {batch_id_str}: {e}")))?;
    let kind_str: String = row.get("kind");
    let kind = MediaKind::parse_kind(&kind_str)
        .ok_or_else(|| decode_err("kind", format!("unknown media kind {kind_str}")))?;
    Ok(MediaAttachment {
        batch_id,
        sequence: row.get("sequence"),
        media_ref: row.get("media_ref"),
        kind,
        created_at: row.get("created_at"),
    })
}

fn validate_new_batch(input: &NewBatch) -> Result<()> {
    if input.farmer_id.trim().is_empty() {
        return Err(RegistryError::Validation("farmer_id is required".into()));
    }
    if input.species.trim().is_empty() {
        return Err(RegistryError::Validation("species is required".into()));
    }
    if input.quantity.trim().is_empty() {
        return Err(RegistryError::Validation("quantity is required".into()));
    }
    if parse_quantity(&input.quantity).is_none() {
        return Err(RegistryError::Validation(format!(
            "quantity {:?} must look like \"18kg\"",
            input.quantity
        )));
    }
    geo::validate(&input.geo)?;
    Ok(())
}

/// Register a collection batch and its fixed timeline in one transaction.
#[instrument(skip_all, fields(species = %input.species))]
pub async fn create_batch(pool: &Pool, input: &NewBatch) -> Result<Uuid> {
    validate_new_batch(input)?;

    let id = Uuid::new_v4();
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO batches (id, farmer_id, species, quantity, status, latitude, longitude, accuracy_m, weather, soil_quality, estimated_value, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(input.farmer_id.trim())
    .bind(input.species.trim())
    .bind(input.quantity.trim())
    .bind(BatchStatus::Active.as_str())
    .bind(input.geo.latitude)
    .bind(input.geo.longitude)
    .bind(input.geo.accuracy_m)
    .bind(input.weather.as_deref())
    .bind(input.soil_quality.map(|q| q.as_str()))
    .bind(input.estimated_value.as_deref())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for step in timeline::initial_steps() {
        sqlx::query(
            "INSERT INTO timeline_steps (batch_id, position, title, completed, in_progress) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(step.position)
        .bind(&step.title)
        .bind(step.completed)
        .bind(step.in_progress)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(batch_id = %id, species = %input.species, "registered batch");
    Ok(id)
}

/// Fetch a batch with its ordered timeline and media.
#[instrument(skip_all, fields(batch_id = %id))]
pub async fn get_batch(pool: &Pool, id: Uuid) -> Result<BatchDetail> {
    let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(RegistryError::NotFound(id));
    };
    let batch = batch_from_row(&row)?;

    let steps = sqlx::query(
        "SELECT position, title, completed, in_progress, completed_at FROM timeline_steps WHERE batch_id = ? ORDER BY position ASC",
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;
    let timeline = steps.iter().map(step_from_row).collect();

    let media = list_media_rows(pool, id).await?;

    Ok(BatchDetail {
        batch,
        timeline,
        media,
    })
}

/// Batches in insertion order, optionally restricted to one status.
/// Presentation ordering (most recent first) is the caller's concern.
#[instrument(skip_all)]
pub async fn list_batches(pool: &Pool, status: Option<BatchStatus>) -> Result<Vec<Batch>> {
    let rows = match status {
        Some(status) => {
            sqlx::query("SELECT * FROM batches WHERE status = ? ORDER BY rowid ASC")
                .bind(status.as_str())
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query("SELECT * FROM batches ORDER BY rowid ASC")
                .fetch_all(pool)
                .await?
        }
    };
    rows.iter()
        .map(|row| batch_from_row(row).map_err(RegistryError::from))
        .collect()
}

/// Advance a batch to the immediate successor of its current status,
/// moving the timeline along with it.
///
/// The update is version-checked so concurrent advances serialize: a lost
/// race re-reads the batch and reports the transition against the state that
/// actually won, never skipping or double-applying a step.
#[instrument(skip_all, fields(batch_id = %id, to = %to.as_str()))]
pub async fn advance_batch(pool: &Pool, id: Uuid, to: BatchStatus) -> Result<BatchDetail> {
    for _ in 0..2 {
        let mut tx = pool.begin().await?;
        let row = sqlx::query("SELECT status, version FROM batches WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(RegistryError::NotFound(id));
        };
        let status_str: String = row.get("status");
        let from = BatchStatus::parse_status(&status_str)
            .ok_or_else(|| decode_err("status", format!("unknown status {status_str}")))?;
        let version: i64 = row.get("version");

        timeline::check_transition(from, to)?;

        let now = Utc::now();
        let completed_at = (to == BatchStatus::Completed).then_some(now);
        let updated = sqlx::query(
            "UPDATE batches SET status = ?, version = version + 1, completed_at = COALESCE(?, completed_at) \
             WHERE id = ? AND version = ?",
        )
        .bind(to.as_str())
        .bind(completed_at)
        .bind(id.to_string())
        .bind(version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            // Lost the version check to a concurrent advance; re-read.
            tx.rollback().await?;
            continue;
        }

        sqlx::query(
            "UPDATE timeline_steps SET completed = 1, in_progress = 0, completed_at = ? WHERE batch_id = ? AND position = ?",
        )
        .bind(now)
        .bind(id.to_string())
        .bind(from.step_position())
        .execute(&mut *tx)
        .await?;
        if to == BatchStatus::Completed {
            sqlx::query(
                "UPDATE timeline_steps SET completed = 1, in_progress = 0, completed_at = ? WHERE batch_id = ? AND position = ?",
            )
            .bind(now)
            .bind(id.to_string())
            .bind(to.step_position())
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE timeline_steps SET in_progress = 1 WHERE batch_id = ? AND position = ?",
            )
            .bind(id.to_string())
            .bind(to.step_position())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(batch_id = %id, from = from.as_str(), to = to.as_str(), "advanced batch");
        return get_batch(pool, id).await;
    }

    // Both attempts lost the race, so the status moved underneath us and the
    // requested transition no longer applies to what is stored.
    let current = get_batch(pool, id).await?;
    Err(RegistryError::InvalidTransition {
        from: current.batch.status,
        to,
    })
}

/// Append a media reference to a batch. References are opaque handles from
/// the external media store; no dedup, no cap at this layer.
#[instrument(skip_all, fields(batch_id = %id))]
pub async fn attach_media(
    pool: &Pool,
    id: Uuid,
    media_ref: &str,
    kind: MediaKind,
) -> Result<MediaAttachment> {
    let media_ref = media_ref.trim();
    if media_ref.is_empty() {
        return Err(RegistryError::Validation("media_ref is required".into()));
    }

    let mut tx = pool.begin().await?;
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM batches WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    if exists == 0 {
        return Err(RegistryError::NotFound(id));
    }

    // Dense append-only sequence, 1..N per batch.
    let max_seq: Option<i64> =
        sqlx::query_scalar("SELECT MAX(sequence) FROM media_attachments WHERE batch_id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .flatten();
    let sequence = max_seq.unwrap_or(0) + 1;

    let now = Utc::now();
    sqlx::query(
        "INSERT INTO media_attachments (batch_id, sequence, media_ref, kind, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(sequence)
    .bind(media_ref)
    .bind(kind.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(MediaAttachment {
        batch_id: id,
        sequence,
        media_ref: media_ref.to_string(),
        kind,
        created_at: now,
    })
}

/// Media references for a batch in attachment order.
#[instrument(skip_all, fields(batch_id = %id))]
pub async fn list_media(pool: &Pool, id: Uuid) -> Result<Vec<MediaAttachment>> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM batches WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Err(RegistryError::NotFound(id));
    }
    list_media_rows(pool, id).await
}

async fn list_media_rows(pool: &Pool, id: Uuid) -> Result<Vec<MediaAttachment>> {
    let rows = sqlx::query(
        "SELECT batch_id, sequence, media_ref, kind, created_at FROM media_attachments WHERE batch_id = ? ORDER BY sequence ASC",
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| media_from_row(row).map_err(RegistryError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_input() -> NewBatch {
        NewBatch {
            farmer_id: "farmer-042".into(),
            species: "Turmeric".into(),
            quantity: "18kg".into(),
            geo: GeoPoint {
                latitude: 26.92,
                longitude: 75.79,
                accuracy_m: 5.0,
            },
            weather: Some("Clear, 25°C".into()),
            soil_quality: Some(SoilQuality::Good),
            estimated_value: Some("₹900".into()),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let pool = setup_pool().await;
        let id = create_batch(&pool, &sample_input()).await.unwrap();

        let detail = get_batch(&pool, id).await.unwrap();
        assert_eq!(detail.batch.id, id);
        assert_eq!(detail.batch.status, BatchStatus::Active);
        assert_eq!(detail.batch.species, "Turmeric");
        assert_eq!(detail.batch.geo.latitude, 26.92);
        assert_eq!(detail.timeline.len(), 4);
        assert!(detail.timeline[0].in_progress);
        assert!(detail.media.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_missing_fields_and_bad_geo() {
        let pool = setup_pool().await;

        let mut input = sample_input();
        input.species = "".into();
        assert!(matches!(
            create_batch(&pool, &input).await,
            Err(RegistryError::Validation(_))
        ));

        let mut input = sample_input();
        input.quantity = "plenty".into();
        assert!(matches!(
            create_batch(&pool, &input).await,
            Err(RegistryError::Validation(_))
        ));

        let mut input = sample_input();
        input.geo.latitude = 95.0;
        assert!(matches!(
            create_batch(&pool, &input).await,
            Err(RegistryError::Geo(_))
        ));
    }

    #[tokio::test]
    async fn get_unknown_batch_is_not_found() {
        let pool = setup_pool().await;
        let id = Uuid::new_v4();
        assert!(matches!(
            get_batch(&pool, id).await,
            Err(RegistryError::NotFound(got)) if got == id
        ));
    }

    #[tokio::test]
    async fn advance_walks_the_lifecycle() {
        let pool = setup_pool().await;
        let id = create_batch(&pool, &sample_input()).await.unwrap();

        let detail = advance_batch(&pool, id, BatchStatus::Processing).await.unwrap();
        assert_eq!(detail.batch.status, BatchStatus::Processing);
        assert!(detail.timeline[0].completed);
        assert!(detail.timeline[0].completed_at.is_some());
        assert!(detail.timeline[1].in_progress);

        let detail = advance_batch(&pool, id, BatchStatus::Testing).await.unwrap();
        assert_eq!(detail.batch.status, BatchStatus::Testing);

        let detail = advance_batch(&pool, id, BatchStatus::Completed).await.unwrap();
        assert_eq!(detail.batch.status, BatchStatus::Completed);
        assert!(detail.batch.completed_at.is_some());
        assert!(detail.timeline.iter().all(|s| s.completed));
        assert!(detail.timeline.iter().all(|s| !s.in_progress));
    }

    #[tokio::test]
    async fn advance_rejects_skips_and_regressions() {
        let pool = setup_pool().await;
        let id = create_batch(&pool, &sample_input()).await.unwrap();

        // Fresh batch must pass through processing first.
        assert!(matches!(
            advance_batch(&pool, id, BatchStatus::Testing).await,
            Err(RegistryError::InvalidTransition {
                from: BatchStatus::Active,
                to: BatchStatus::Testing,
            })
        ));

        advance_batch(&pool, id, BatchStatus::Processing).await.unwrap();
        advance_batch(&pool, id, BatchStatus::Testing).await.unwrap();
        assert!(matches!(
            advance_batch(&pool, id, BatchStatus::Active).await,
            Err(RegistryError::InvalidTransition { .. })
        ));

        // Terminal status has no successor.
        advance_batch(&pool, id, BatchStatus::Completed).await.unwrap();
        assert!(matches!(
            advance_batch(&pool, id, BatchStatus::Completed).await,
            Err(RegistryError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_advances_serialize() {
        // One pooled connection so both writers contend for the same store.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let id = create_batch(&pool, &sample_input()).await.unwrap();

        let a = advance_batch(&pool, id, BatchStatus::Processing);
        let b = advance_batch(&pool, id, BatchStatus::Processing);
        let (ra, rb) = tokio::join!(a, b);

        // Exactly one writer wins; the loser sees a no-longer-valid transition.
        assert!(ra.is_ok() != rb.is_ok());
        let detail = get_batch(&pool, id).await.unwrap();
        assert_eq!(detail.batch.status, BatchStatus::Processing);
        assert_eq!(
            detail.timeline.iter().filter(|s| s.in_progress).count(),
            1
        );
    }

    #[tokio::test]
    async fn media_appends_in_order() {
        let pool = setup_pool().await;
        let id = create_batch(&pool, &sample_input()).await.unwrap();

        for i in 1..=3 {
            let a = attach_media(&pool, id, &format!("media/photo-{i}.jpg"), MediaKind::Photo)
                .await
                .unwrap();
            assert_eq!(a.sequence, i);
        }
        // Duplicate refs are allowed.
        attach_media(&pool, id, "media/photo-1.jpg", MediaKind::Certificate)
            .await
            .unwrap();

        let listed = list_media(&pool, id).await.unwrap();
        assert_eq!(listed.len(), 4);
        assert_eq!(
            listed.iter().map(|m| m.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(listed[3].kind, MediaKind::Certificate);

        // Re-listing returns the same sequence.
        let again = list_media(&pool, id).await.unwrap();
        assert_eq!(
            again.iter().map(|m| m.media_ref.clone()).collect::<Vec<_>>(),
            listed.iter().map(|m| m.media_ref.clone()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn media_requires_known_batch_and_ref() {
        let pool = setup_pool().await;
        assert!(matches!(
            attach_media(&pool, Uuid::new_v4(), "media/x.jpg", MediaKind::Photo).await,
            Err(RegistryError::NotFound(_))
        ));

        let id = create_batch(&pool, &sample_input()).await.unwrap();
        assert!(matches!(
            attach_media(&pool, id, "   ", MediaKind::Photo).await,
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            list_media(&pool, Uuid::new_v4()).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let pool = setup_pool().await;
        let first = create_batch(&pool, &sample_input()).await.unwrap();
        let mut other = sample_input();
        other.species = "Ashwagandha".into();
        other.quantity = "25 kg".into();
        let second = create_batch(&pool, &other).await.unwrap();

        advance_batch(&pool, second, BatchStatus::Processing).await.unwrap();

        let all = list_batches(&pool, None).await.unwrap();
        assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![first, second]);

        let active = list_batches(&pool, Some(BatchStatus::Active)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first);

        let testing = list_batches(&pool, Some(BatchStatus::Testing)).await.unwrap();
        assert!(testing.is_empty());
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
        assert_eq!(
            prepare_sqlite_url("sqlite:///tmp/ht/reg.db"),
            "sqlite:///tmp/ht/reg.db"
        );
    }
}
