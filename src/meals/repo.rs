use async_trait::async_trait;
use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    model::{MealAnalysis, MealRecord, NewMeal},
    store::{Appended, MealStore, StoreError},
};

/// Serializes writers so the trim sees every committed insert.
const APPEND_LOCK_KEY: i64 = 0x6d65_616c_735f_6c6f;

#[derive(Debug, FromRow)]
struct MealRow {
    id: Uuid,
    image_url: String,
    analysis: Json<MealAnalysis>,
    created_at: OffsetDateTime,
}

impl From<MealRow> for MealRecord {
    fn from(r: MealRow) -> Self {
        Self {
            id: r.id,
            image_url: r.image_url,
            analysis: r.analysis.0,
            created_at: r.created_at,
        }
    }
}

/// Postgres-backed history. Rows past `capacity` are pruned on insert.
pub struct PgMealStore {
    db: PgPool,
    capacity: usize,
}

impl PgMealStore {
    pub fn new(db: PgPool, capacity: usize) -> Self {
        Self { db, capacity }
    }
}

#[async_trait]
impl MealStore for PgMealStore {
    async fn append(&self, meal: NewMeal) -> Result<Appended, StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, MealRow>(
            r#"
            INSERT INTO meals (image_url, analysis)
            VALUES ($1, $2)
            RETURNING id, image_url, analysis, created_at
            "#,
        )
        .bind(&meal.image_url)
        .bind(Json(&meal.analysis))
        .fetch_one(&mut *tx)
        .await?;

        let evicted = sqlx::query_as::<_, MealRow>(
            r#"
            DELETE FROM meals
            WHERE id IN (
                SELECT id FROM meals
                ORDER BY created_at DESC, id DESC
                OFFSET $1
            )
            RETURNING id, image_url, analysis, created_at
            "#,
        )
        .bind(self.capacity as i64)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Appended {
            record: row.into(),
            evicted: evicted.into_iter().map(Into::into).collect(),
        })
    }

    async fn list(&self, limit: usize) -> Result<Vec<MealRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MealRow>(
            r#"
            SELECT id, image_url, analysis, created_at
            FROM meals
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MealRecord>, StoreError> {
        let row = sqlx::query_as::<_, MealRow>(
            r#"
            SELECT id, image_url, analysis, created_at
            FROM meals
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }
}
