use std::{sync::Arc, time::Instant};

use crate::{
    analysis::vision::{GeminiClient, VisionClient},
    auth::{InMemoryUserRepository, PgUserRepository, UserRepository},
    config::AppConfig,
    db,
    meals::{repo::PgMealStore, InMemoryMealStore, MealStore},
    storage::{LocalStorage, S3Storage, StorageClient},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub meals: Arc<dyn MealStore>,
    pub users: Arc<dyn UserRepository>,
    pub vision: Arc<dyn VisionClient>,
    /// `None` when image copies are disabled.
    pub storage: Option<Arc<dyn StorageClient>>,
    pub started_at: Instant,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let (meals, users): (Arc<dyn MealStore>, Arc<dyn UserRepository>) =
            match &config.database_url {
                Some(url) => {
                    let db = db::connect(url).await?;
                    tracing::info!("using postgres meal store");
                    (
                        Arc::new(PgMealStore::new(db.clone(), config.history_capacity)),
                        Arc::new(PgUserRepository::new(db)),
                    )
                }
                None => {
                    tracing::warn!("DATABASE_URL not set; history and users are kept in memory");
                    (
                        Arc::new(InMemoryMealStore::new(config.history_capacity)),
                        Arc::new(InMemoryUserRepository::default()),
                    )
                }
            };

        let storage: Option<Arc<dyn StorageClient>> = match (&config.s3, config.keep_image_copy) {
            (_, false) => None,
            (Some(s3), true) => Some(Arc::new(S3Storage::new(s3).await?)),
            (None, true) => Some(Arc::new(LocalStorage::new(&config.upload_dir).await?)),
        };

        let vision = Arc::new(GeminiClient::new(&config.vision)?) as Arc<dyn VisionClient>;

        Ok(Self {
            config,
            meals,
            users,
            vision,
            storage,
            started_at: Instant::now(),
        })
    }

    /// Serves `/uploads` from disk only for the local backend.
    pub fn serves_local_uploads(&self) -> bool {
        self.storage.is_some() && self.config.keep_image_copy && self.config.s3.is_none()
    }
}

#[cfg(test)]
impl AppState {
    pub fn fake(vision: Arc<dyn VisionClient>) -> Self {
        let config = crate::config::AppConfig::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some("test-key".into()),
            "JWT_SECRET" => Some("test-secret".into()),
            "KEEP_IMAGE_COPY" => Some("false".into()),
            _ => None,
        })
        .expect("test config");
        Self {
            meals: Arc::new(InMemoryMealStore::new(config.history_capacity)),
            users: Arc::new(InMemoryUserRepository::default()),
            config: Arc::new(config),
            vision,
            storage: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageClient>) -> Self {
        let mut config = (*self.config).clone();
        config.keep_image_copy = true;
        self.config = Arc::new(config);
        self.storage = Some(storage);
        self
    }

    pub fn with_meals(mut self, meals: Arc<dyn MealStore>) -> Self {
        self.meals = meals;
        self
    }
}
