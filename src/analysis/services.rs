use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;
use tracing::{info, warn};

use super::{
    parser::{parse_analysis, ParseError},
    prompt::build_prompt,
    vision::{VisionCallError, VisionClient},
};
use crate::{
    error::ApiError,
    images::services::{
        discard_copy, discard_evicted, store_copy, StoredImage, PLACEHOLDER_IMAGE_URL,
    },
    meals::{Appended, Category, Macros, MealAnalysis, MealRecord, NewMeal},
    state::AppState,
};

/// Image bytes taken from the multipart body.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub mime_type: String,
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    pub record: MealRecord,
    /// The stored analysis is the fallback record.
    pub degraded: bool,
}

#[derive(Debug, thiserror::Error)]
enum AnalysisFailure {
    #[error(transparent)]
    Vision(#[from] VisionCallError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Conservative record stored when the model call or parse fails.
pub fn fallback_analysis() -> MealAnalysis {
    MealAnalysis {
        food_name: "Food Item".into(),
        serving_size: "1 serving".into(),
        calories: 250.0,
        macros: Macros {
            protein: 15.0,
            carbs: 25.0,
            fat: 8.0,
            fiber: 3.0,
            sugar: 5.0,
        },
        micros: BTreeMap::from([
            ("Vitamin A".to_string(), "10%".to_string()),
            ("Calcium".to_string(), "8%".to_string()),
        ]),
        ingredients: vec!["Various ingredients".into()],
        category: Category::Balanced,
        score: 60,
        emoji: "🍽️".into(),
        short_description: "Nutritional analysis based on visual inspection".into(),
        cooking_method: None,
        health_warnings: Vec::new(),
        dietary_tags: Vec::new(),
        benefits: Vec::new(),
        portion_advice: None,
    }
}

pub fn validate_upload(
    upload: Option<ImageUpload>,
    max_bytes: usize,
) -> Result<ImageUpload, ApiError> {
    let upload = upload.ok_or_else(|| ApiError::bad_request("No image uploaded"))?;
    if upload.bytes.is_empty() {
        return Err(ApiError::bad_request("Uploaded image is empty"));
    }
    if upload.bytes.len() > max_bytes {
        return Err(ApiError::bad_request(format!(
            "Image too large. Max size is {} bytes",
            max_bytes
        )));
    }
    if !upload.mime_type.starts_with("image/") {
        return Err(ApiError::bad_request("Only image uploads are supported"));
    }
    Ok(upload)
}

async fn request_analysis(
    vision: &dyn VisionClient,
    upload: &ImageUpload,
    timeout: Duration,
) -> Result<MealAnalysis, AnalysisFailure> {
    let prompt = build_prompt();
    let call = vision.generate(upload.bytes.clone(), &upload.mime_type, &prompt);
    let raw = tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| VisionCallError::Timeout(timeout))??;
    Ok(parse_analysis(&raw)?)
}

async fn keep_copy(st: &AppState, upload: &ImageUpload) -> Option<StoredImage> {
    let storage = st.storage.as_ref()?;
    match store_copy(storage.as_ref(), upload.bytes.clone(), &upload.mime_type).await {
        Ok(img) => Some(img),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "could not keep image copy; using placeholder");
            None
        }
    }
}

/// Validates the upload, asks the vision model, and stores the result.
///
/// Model and parse failures never reach the caller: they produce the
/// fallback record, flagged through `AnalysisOutcome::degraded`.
pub async fn analyze_upload(
    st: &AppState,
    upload: Option<ImageUpload>,
) -> Result<AnalysisOutcome, ApiError> {
    let upload = validate_upload(upload, st.config.max_upload_bytes)?;
    info!(bytes = upload.bytes.len(), mime = %upload.mime_type, "analyzing upload");

    let (analysis, image, degraded) =
        match request_analysis(st.vision.as_ref(), &upload, st.config.vision.timeout).await {
            Ok(analysis) => {
                let image = keep_copy(st, &upload).await;
                (analysis, image, false)
            }
            Err(e) => {
                warn!(error = %e, "analysis failed; storing fallback record");
                (fallback_analysis(), None, true)
            }
        };

    let image_url = image
        .as_ref()
        .map(|img| img.url.clone())
        .unwrap_or_else(|| PLACEHOLDER_IMAGE_URL.to_string());

    let record = match st.meals.append(NewMeal { image_url, analysis }).await {
        Ok(Appended { record, evicted }) => {
            if let Some(storage) = &st.storage {
                discard_evicted(storage.as_ref(), &evicted).await;
            }
            record
        }
        Err(e) => {
            if let (Some(img), Some(storage)) = (&image, &st.storage) {
                if let Err(de) = discard_copy(storage.as_ref(), img).await {
                    warn!(error = %format!("{de:#}"), key = %img.key, "orphaned image copy");
                }
            }
            return Err(ApiError::internal(e));
        }
    };

    info!(
        meal_id = %record.id,
        food = %record.analysis.food_name,
        category = %record.analysis.category,
        score = record.analysis.score,
        degraded,
        "analysis stored"
    );
    Ok(AnalysisOutcome { record, degraded })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::{
        meals::{InMemoryMealStore, MealStore, StoreError},
        storage::LocalStorage,
    };

    pub(crate) const PIZZA_REPLY: &str = "```json\n{\"foodName\":\"Pizza\",\"servingSize\":\"2 slices\",\
        \"calories\":570,\"macros\":{\"protein\":24,\"carbs\":66,\"fat\":22,\"fiber\":3,\"sugar\":7},\
        \"micros\":{\"Sodium\":\"1200mg\"},\"ingredients\":[\"Dough\",\"Cheese\"],\
        \"category\":\"Indulgent\",\"score\":35,\"emoji\":\"🍕\",\
        \"shortDescription\":\"Heavy on sodium.\"}\n```";

    pub(crate) enum Reply {
        Text(String),
        Fail,
        Hang,
    }

    pub(crate) struct ScriptedVision {
        reply: Reply,
        pub calls: AtomicUsize,
    }

    impl ScriptedVision {
        pub(crate) fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionClient for ScriptedVision {
        async fn generate(
            &self,
            image: Bytes,
            mime_type: &str,
            prompt: &str,
        ) -> Result<String, VisionCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!image.is_empty());
            assert!(mime_type.starts_with("image/"));
            assert!(prompt.contains("foodName"));
            match &self.reply {
                Reply::Text(t) => Ok(t.clone()),
                Reply::Fail => Err(VisionCallError::EmptyResponse),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(String::new())
                }
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl MealStore for BrokenStore {
        async fn append(&self, _meal: NewMeal) -> Result<Appended, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn list(&self, _limit: usize) -> Result<Vec<MealRecord>, StoreError> {
            Ok(Vec::new())
        }
        async fn get(&self, _id: Uuid) -> Result<Option<MealRecord>, StoreError> {
            Ok(None)
        }
    }

    fn jpeg(bytes: &'static [u8]) -> Option<ImageUpload> {
        Some(ImageUpload {
            bytes: Bytes::from_static(bytes),
            mime_type: "image/jpeg".into(),
        })
    }

    fn state_with(reply: Reply) -> (AppState, Arc<ScriptedVision>) {
        let vision = ScriptedVision::new(reply);
        (AppState::fake(vision.clone()), vision)
    }

    fn assert_is_fallback(outcome: &AnalysisOutcome) {
        assert!(outcome.degraded);
        assert_eq!(outcome.record.analysis, fallback_analysis());
        assert_eq!(outcome.record.analysis.category, Category::Balanced);
        assert_eq!(outcome.record.analysis.score, 60);
        assert_eq!(outcome.record.image_url, PLACEHOLDER_IMAGE_URL);
    }

    #[test]
    fn fallback_is_complete_and_in_band() {
        let f = fallback_analysis();
        assert!(!f.food_name.is_empty());
        assert!(f.category.band().contains(&f.score));
        let text = serde_json::to_string(&f).unwrap();
        assert_eq!(parse_analysis(&text).unwrap(), f);
    }

    #[tokio::test]
    async fn successful_analysis_is_stored() {
        let (st, vision) = state_with(Reply::Text(PIZZA_REPLY.into()));

        let outcome = analyze_upload(&st, jpeg(b"\xff\xd8\xff")).await.unwrap();
        assert!(!outcome.degraded);
        assert_eq!(outcome.record.analysis.food_name, "Pizza");
        assert_eq!(outcome.record.analysis.category, Category::Indulgent);
        assert_eq!(outcome.record.analysis.score, 35);
        assert_eq!(outcome.record.image_url, PLACEHOLDER_IMAGE_URL);
        assert_eq!(vision.calls.load(Ordering::SeqCst), 1);

        let history = st.meals.list(50).await.unwrap();
        assert_eq!(history, vec![outcome.record]);
    }

    #[tokio::test]
    async fn unparseable_reply_stores_fallback() {
        let (st, _) = state_with(Reply::Text("not json at all".into()));

        let outcome = analyze_upload(&st, jpeg(b"img")).await.unwrap();
        assert_is_fallback(&outcome);
        assert_eq!(st.meals.list(50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vision_error_stores_fallback() {
        let (st, _) = state_with(Reply::Fail);
        let outcome = analyze_upload(&st, jpeg(b"img")).await.unwrap();
        assert_is_fallback(&outcome);
    }

    #[tokio::test]
    async fn slow_vision_call_times_out_into_fallback() {
        let (mut st, _) = state_with(Reply::Hang);
        let mut config = (*st.config).clone();
        config.vision.timeout = Duration::from_millis(50);
        st.config = Arc::new(config);

        let started = std::time::Instant::now();
        let outcome = analyze_upload(&st, jpeg(b"img")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_is_fallback(&outcome);
    }

    #[tokio::test]
    async fn invalid_uploads_are_rejected_without_side_effects() {
        let (mut st, vision) = state_with(Reply::Text(PIZZA_REPLY.into()));
        let mut config = (*st.config).clone();
        config.max_upload_bytes = 4;
        st.config = Arc::new(config);

        let cases = [
            (None, "No image uploaded"),
            (jpeg(b""), "Uploaded image is empty"),
            (jpeg(b"12345"), "Image too large. Max size is 4 bytes"),
            (
                Some(ImageUpload {
                    bytes: Bytes::from_static(b"%PDF"),
                    mime_type: "application/pdf".into(),
                }),
                "Only image uploads are supported",
            ),
        ];
        for (upload, expected) in cases {
            match analyze_upload(&st, upload).await.unwrap_err() {
                ApiError::BadRequest(msg) => assert_eq!(msg, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(st.meals.list(50).await.unwrap().is_empty());
        assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_analysis_keeps_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let (st, _) = state_with(Reply::Text(PIZZA_REPLY.into()));
        let st = st.with_storage(storage);

        let outcome = analyze_upload(&st, jpeg(b"\xff\xd8\xff")).await.unwrap();
        let url = &outcome.record.image_url;
        assert!(url.starts_with("/uploads/food_") && url.ends_with(".jpg"), "{url}");
        let file = dir.path().join(url.trim_start_matches("/uploads/"));
        assert_eq!(std::fs::read(file).unwrap(), b"\xff\xd8\xff");
    }

    #[tokio::test]
    async fn evicted_meals_lose_their_image_copy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let (st, _) = state_with(Reply::Text(PIZZA_REPLY.into()));
        let st = st
            .with_storage(storage)
            .with_meals(Arc::new(InMemoryMealStore::new(2)));

        for _ in 0..5 {
            analyze_upload(&st, jpeg(b"\xff\xd8\xff")).await.unwrap();
        }

        let history = st.meals.list(50).await.unwrap();
        assert_eq!(history.len(), 2);
        let mut on_disk: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        let mut kept: Vec<String> = history
            .iter()
            .map(|r| r.image_url.trim_start_matches("/uploads/").to_string())
            .collect();
        on_disk.sort();
        kept.sort();
        assert_eq!(on_disk, kept);
    }

    #[tokio::test]
    async fn fallback_does_not_keep_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let (st, _) = state_with(Reply::Fail);
        let st = st.with_storage(storage);

        let outcome = analyze_upload(&st, jpeg(b"img")).await.unwrap();
        assert_is_fallback(&outcome);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_an_error_and_removes_the_copy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let (st, _) = state_with(Reply::Text(PIZZA_REPLY.into()));
        let st = st.with_storage(storage).with_meals(Arc::new(BrokenStore));

        let err = analyze_upload(&st, jpeg(b"img")).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uploads_all_land_in_history() {
        let (st, vision) = state_with(Reply::Text(PIZZA_REPLY.into()));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let st = st.clone();
                tokio::spawn(async move { analyze_upload(&st, jpeg(b"img")).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let history = st.meals.list(50).await.unwrap();
        assert_eq!(history.len(), 20);
        let ids: HashSet<_> = history.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 20);
        assert_eq!(vision.calls.load(Ordering::SeqCst), 20);
    }
}
