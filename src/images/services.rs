use anyhow::Context;
use bytes::Bytes;
use uuid::Uuid;

use tracing::{debug, warn};

use crate::{meals::MealRecord, storage::StorageClient};

/// Shown for meals without a stored copy of their photo.
pub const PLACEHOLDER_IMAGE_URL: &str = "https://placehold.co/600x400";

/// A copy of an uploaded photo that was written to storage.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub key: String,
    pub url: String,
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

const KEY_PREFIX: &str = "food_";

fn new_key(content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("{KEY_PREFIX}{}.{}", Uuid::new_v4().simple(), ext)
}

/// Storage key behind a record's `image_url`, if it points at a kept copy.
/// Works for `/uploads/<key>` and for presigned `https://.../<key>?...` URLs.
pub fn key_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let key = path.rsplit('/').next()?;
    (key.starts_with(KEY_PREFIX) && key.len() > KEY_PREFIX.len()).then_some(key)
}

pub async fn store_copy(
    storage: &dyn StorageClient,
    body: Bytes,
    content_type: &str,
) -> anyhow::Result<StoredImage> {
    let key = new_key(content_type);
    storage
        .put_object(&key, body, content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    let url = storage
        .url_for(&key)
        .await
        .with_context(|| format!("url for {}", key))?;
    Ok(StoredImage { key, url })
}

pub async fn discard_copy(storage: &dyn StorageClient, image: &StoredImage) -> anyhow::Result<()> {
    storage
        .delete_object(&image.key)
        .await
        .with_context(|| format!("delete_object {}", image.key))
}

/// Removes the copies behind records that left the history. Failures are
/// logged; the records are already gone.
pub async fn discard_evicted(storage: &dyn StorageClient, evicted: &[MealRecord]) {
    for meal in evicted {
        let Some(key) = key_from_url(&meal.image_url) else {
            continue;
        };
        match storage.delete_object(key).await {
            Ok(()) => debug!(meal_id = %meal.id, %key, "evicted image copy removed"),
            Err(e) => warn!(error = %format!("{e:#}"), meal_id = %meal.id, %key, "orphaned image copy"),
        }
    }
}
