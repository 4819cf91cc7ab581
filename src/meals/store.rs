use std::collections::VecDeque;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{MealRecord, NewMeal};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of an append: the stored record plus whatever fell off the end.
#[derive(Debug)]
pub struct Appended {
    pub record: MealRecord,
    pub evicted: Vec<MealRecord>,
}

/// Bounded, newest-first history of analysed meals.
#[async_trait]
pub trait MealStore: Send + Sync {
    /// Persists a meal with its assigned id and timestamp. Records pushed
    /// past capacity are removed and handed back in `evicted`.
    async fn append(&self, meal: NewMeal) -> Result<Appended, StoreError>;
    /// At most `limit` records, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<MealRecord>, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<MealRecord>, StoreError>;
}

/// Process-lifetime history; lost on restart.
pub struct InMemoryMealStore {
    capacity: usize,
    records: RwLock<VecDeque<MealRecord>>,
}

impl InMemoryMealStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity + 1)),
        }
    }
}

#[async_trait]
impl MealStore for InMemoryMealStore {
    async fn append(&self, meal: NewMeal) -> Result<Appended, StoreError> {
        // stamp, insert and trim under one guard: push order == created_at order
        let mut records = self.records.write().await;
        let record = MealRecord {
            id: Uuid::now_v7(),
            image_url: meal.image_url,
            analysis: meal.analysis,
            created_at: OffsetDateTime::now_utc(),
        };
        records.push_front(record.clone());
        let evicted = if records.len() > self.capacity {
            records.split_off(self.capacity).into()
        } else {
            Vec::new()
        };
        Ok(Appended { record, evicted })
    }

    async fn list(&self, limit: usize) -> Result<Vec<MealRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().take(limit).cloned().collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MealRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }
}
