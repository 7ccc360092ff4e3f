use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{
    ACTIVE_WEIGHT_CONFIG_KEY, CUTOVER_LOCK_KEY, NOVELTY_CONFIG_KEY, PgStore,
    WEIGHT_CONFIG_COLUMNS, parse_active_pointer, row_to_live_score, row_to_scored_post,
    row_to_weight_config,
};
use crate::jobs::JobStatus;
use crate::ranking::NoveltyConfig;
use crate::store::StoreError;
use crate::store::models::{
    CutoverReport, CutoverRequest, LiveScore, NewWeightConfig, ScoredPost, StagedScore,
    WeightConfig,
};
use crate::store::traits::RankingStore;

fn weight_config_not_found(id: Uuid) -> StoreError {
    StoreError::NotFound {
        entity: "weight config",
        id,
    }
}

/// Locks the config row and returns its `has_scores` flag.
async fn lock_weight_config(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    exclusive: bool,
) -> Result<bool, StoreError> {
    let sql = if exclusive {
        "SELECT has_scores FROM weight_configs WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT has_scores FROM weight_configs WHERE id = $1 FOR SHARE"
    };
    sqlx::query_scalar::<_, bool>(sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| weight_config_not_found(id))
}

async fn referenced_by_open_job(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<bool, StoreError> {
    let referenced: bool = sqlx::query_scalar(
        r"
        SELECT EXISTS(
            SELECT 1
            FROM background_jobs
            WHERE status IN ('pending', 'running')
              AND (params ->> 'weight_config_id')::uuid = $1
        )
        ",
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(referenced)
}

async fn read_setting(
    executor: impl sqlx::PgExecutor<'_>,
    key: &str,
) -> Result<Option<Value>, StoreError> {
    let value = sqlx::query_scalar::<_, Value>("SELECT value FROM settings WHERE key = $1")
        .bind(key)
        .fetch_optional(executor)
        .await?;
    Ok(value)
}

async fn write_setting(
    executor: impl sqlx::PgExecutor<'_>,
    key: &str,
    value: Value,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO settings (key, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (key) DO UPDATE
        SET value = EXCLUDED.value,
            updated_at = NOW()
        ",
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl RankingStore for PgStore {
    async fn create_weight_config(
        &self,
        config: NewWeightConfig,
    ) -> Result<WeightConfig, StoreError> {
        let sql = format!(
            r"
            INSERT INTO weight_configs (id, name, description, weights, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {WEIGHT_CONFIG_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::now_v7())
            .bind(config.name)
            .bind(config.description)
            .bind(serde_json::to_value(&config.weights)?)
            .bind(config.created_by)
            .fetch_one(&self.pool)
            .await?;
        row_to_weight_config(&row)
    }

    async fn get_weight_config(&self, id: Uuid) -> Result<WeightConfig, StoreError> {
        let sql = format!("SELECT {WEIGHT_CONFIG_COLUMNS} FROM weight_configs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| weight_config_not_found(id))?;
        row_to_weight_config(&row)
    }

    async fn list_weight_configs(&self) -> Result<Vec<WeightConfig>, StoreError> {
        let sql = format!(
            "SELECT {WEIGHT_CONFIG_COLUMNS} FROM weight_configs ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_weight_config).collect()
    }

    async fn update_weight_config_details(
        &self,
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<WeightConfig, StoreError> {
        let sql = format!(
            r"
            UPDATE weight_configs
            SET name = COALESCE($2, name),
                description = COALESCE($3, description)
            WHERE id = $1
            RETURNING {WEIGHT_CONFIG_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(name)
            .bind(description)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| weight_config_not_found(id))?;
        row_to_weight_config(&row)
    }

    async fn replace_weights(
        &self,
        id: Uuid,
        weights: BTreeMap<String, f64>,
    ) -> Result<WeightConfig, StoreError> {
        let mut tx = self.pool.begin().await?;
        if lock_weight_config(&mut tx, id, true).await? {
            return Err(StoreError::Conflict(format!(
                "weight config {id} already has scores"
            )));
        }
        if referenced_by_open_job(&mut tx, id).await? {
            return Err(StoreError::Conflict(format!(
                "weight config {id} is referenced by a pending or running job"
            )));
        }
        let sql = format!(
            r"
            UPDATE weight_configs
            SET weights = $2
            WHERE id = $1
            RETURNING {WEIGHT_CONFIG_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(serde_json::to_value(&weights)?)
            .fetch_one(&mut *tx)
            .await?;
        let config = row_to_weight_config(&row)?;
        tx.commit().await?;
        Ok(config)
    }

    async fn mark_has_scores(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE weight_configs SET has_scores = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(weight_config_not_found(id));
        }
        Ok(())
    }

    async fn delete_weight_config(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_weight_config(&mut tx, id, true).await?;

        let active = parse_active_pointer(read_setting(&mut *tx, ACTIVE_WEIGHT_CONFIG_KEY).await?)?;
        if active == Some(id) {
            return Err(StoreError::Conflict(format!(
                "weight config {id} is the active configuration"
            )));
        }
        if referenced_by_open_job(&mut tx, id).await? {
            return Err(StoreError::Conflict(format!(
                "weight config {id} is referenced by a pending or running job"
            )));
        }

        sqlx::query("DELETE FROM post_scores_staging WHERE weight_config_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM weight_configs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn novelty_config(&self) -> Result<NoveltyConfig, StoreError> {
        match read_setting(&self.pool, NOVELTY_CONFIG_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(NoveltyConfig::default()),
        }
    }

    async fn save_novelty_config(&self, config: &NoveltyConfig) -> Result<(), StoreError> {
        write_setting(&self.pool, NOVELTY_CONFIG_KEY, serde_json::to_value(config)?).await
    }

    async fn active_weight_config_id(&self) -> Result<Option<Uuid>, StoreError> {
        parse_active_pointer(read_setting(&self.pool, ACTIVE_WEIGHT_CONFIG_KEY).await?)
    }

    async fn count_scored_posts(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM llm_scores")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn fetch_scored_posts(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ScoredPost>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT post_id, scores, categories, scored_at
            FROM llm_scores
            WHERE ($1::uuid IS NULL OR post_id > $1)
            ORDER BY post_id ASC
            LIMIT $2
            ",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_scored_post).collect()
    }

    async fn fetch_unstaged_posts(
        &self,
        weight_config_id: Uuid,
        job_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScoredPost>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT p.post_id, p.scores, p.categories, p.scored_at
            FROM llm_scores p
            WHERE NOT EXISTS (
                SELECT 1
                FROM post_scores_staging s
                WHERE s.post_id = p.post_id
                  AND s.weight_config_id = $1
                  AND s.job_id = $2
            )
            ORDER BY p.post_id ASC
            LIMIT $3
            ",
        )
        .bind(weight_config_id)
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_scored_post).collect()
    }

    async fn topic_counts(&self, window_days: i32) -> Result<HashMap<String, i64>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT category, COUNT(*) AS count
            FROM (
                SELECT DISTINCT post_id, UNNEST(categories) AS category
                FROM llm_scores
                WHERE scored_at >= NOW() - make_interval(days => $1)
            ) AS recent
            GROUP BY category
            ",
        )
        .bind(window_days)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            counts.insert(row.try_get("category")?, row.try_get("count")?);
        }
        Ok(counts)
    }

    async fn write_staged_scores(&self, scores: &[StagedScore]) -> Result<(), StoreError> {
        if scores.is_empty() {
            return Ok(());
        }
        let post_ids: Vec<Uuid> = scores.iter().map(|s| s.post_id).collect();
        let config_ids: Vec<Uuid> = scores.iter().map(|s| s.weight_config_id).collect();
        let job_ids: Vec<Uuid> = scores.iter().map(|s| s.job_id).collect();
        let final_scores: Vec<f64> = scores.iter().map(|s| s.final_score).collect();
        let multipliers: Vec<f64> = scores.iter().map(|s| s.novelty_multiplier).collect();
        let computed_at: Vec<DateTime<Utc>> = scores.iter().map(|s| s.computed_at).collect();

        sqlx::query(
            r"
            INSERT INTO post_scores_staging
                (post_id, weight_config_id, job_id, final_score, novelty_multiplier, computed_at)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::uuid[], $4::float8[], $5::float8[], $6::timestamptz[]
            )
            ON CONFLICT (post_id, weight_config_id) DO UPDATE
            SET job_id = EXCLUDED.job_id,
                final_score = EXCLUDED.final_score,
                novelty_multiplier = EXCLUDED.novelty_multiplier,
                computed_at = EXCLUDED.computed_at
            ",
        )
        .bind(post_ids)
        .bind(config_ids)
        .bind(job_ids)
        .bind(final_scores)
        .bind(multipliers)
        .bind(computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cutover(&self, request: CutoverRequest) -> Result<CutoverReport, StoreError> {
        let CutoverRequest {
            weight_config_id,
            completing_job,
        } = request;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CUTOVER_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let has_scores = lock_weight_config(&mut tx, weight_config_id, false).await?;

        if let Some(completing) = completing_job {
            let status: String =
                sqlx::query_scalar("SELECT status FROM background_jobs WHERE id = $1 FOR UPDATE")
                    .bind(completing.job_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(StoreError::NotFound {
                        entity: "job",
                        id: completing.job_id,
                    })?;
            if status != JobStatus::Running.as_str() {
                return Err(StoreError::Conflict(format!(
                    "job {} is {status} (expected running)",
                    completing.job_id
                )));
            }
        }

        let counts = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM llm_scores) AS total,
                (
                    SELECT COUNT(*)
                    FROM post_scores_staging s
                    JOIN llm_scores p ON p.post_id = s.post_id
                    WHERE s.weight_config_id = $1
                ) AS staged
            ",
        )
        .bind(weight_config_id)
        .fetch_one(&mut *tx)
        .await?;
        let total: i64 = counts.try_get("total")?;
        let staged: i64 = counts.try_get("staged")?;
        if !has_scores || staged != total {
            // Dropping the transaction rolls it back.
            return Err(StoreError::NotReady {
                weight_config_id,
                has_scores,
                staged,
                total,
            });
        }

        sqlx::query("DELETE FROM post_scores")
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            r"
            INSERT INTO post_scores
                (post_id, weight_config_id, final_score, novelty_multiplier, computed_at)
            SELECT s.post_id, s.weight_config_id, s.final_score, s.novelty_multiplier, s.computed_at
            FROM post_scores_staging s
            JOIN llm_scores p ON p.post_id = s.post_id
            WHERE s.weight_config_id = $1
            ",
        )
        .bind(weight_config_id)
        .execute(&mut *tx)
        .await?;

        let previous =
            parse_active_pointer(read_setting(&mut *tx, ACTIVE_WEIGHT_CONFIG_KEY).await?)?;
        write_setting(
            &mut *tx,
            ACTIVE_WEIGHT_CONFIG_KEY,
            serde_json::to_value(weight_config_id)?,
        )
        .await?;

        if let Some(completing) = completing_job {
            sqlx::query(
                r"
                UPDATE background_jobs
                SET status = 'completed',
                    completed_at = NOW(),
                    progress = $2
                WHERE id = $1
                ",
            )
            .bind(completing.job_id)
            .bind(completing.progress)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(CutoverReport {
            weight_config_id,
            previous_weight_config_id: previous,
            live_rows: i64::try_from(inserted.rows_affected()).unwrap_or(i64::MAX),
        })
    }

    async fn live_scores(&self, limit: i64, offset: i64) -> Result<Vec<LiveScore>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT post_id, weight_config_id, final_score, novelty_multiplier, computed_at
            FROM post_scores
            ORDER BY final_score DESC, post_id ASC
            LIMIT $1 OFFSET $2
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_live_score).collect()
    }
}
