use std::{path::PathBuf, time::Duration};

use anyhow::Context;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub url_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub vision: VisionConfig,
    pub cors_allowed_origins: Vec<String>,
    pub upload_dir: PathBuf,
    pub keep_image_copy: bool,
    pub max_upload_bytes: usize,
    pub history_capacity: usize,
    pub s3: Option<S3Config>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{key} must be set"));

        let vision = VisionConfig {
            api_key: required("GEMINI_API_KEY")?,
            model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".into()),
            api_base: get("GEMINI_API_BASE")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".into()),
            timeout: Duration::from_secs(parse_or(&get, "VISION_TIMEOUT_SECS", 30)?),
        };

        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "nutriveda".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "nutriveda-users".into()),
            ttl_minutes: parse_or(&get, "JWT_TTL_MINUTES", 60)?,
        };

        let port = match get("APP_PORT").or_else(|| get("PORT")) {
            Some(v) => v.parse().with_context(|| format!("invalid port {v:?}"))?,
            None => 5001,
        };

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:*,*.onrender.com,*.vercel.app".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let history_capacity = parse_or(&get, "HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY)?;
        anyhow::ensure!(history_capacity > 0, "HISTORY_CAPACITY must be positive");

        let s3 = match (
            get("S3_ENDPOINT"),
            get("S3_BUCKET"),
            get("S3_ACCESS_KEY"),
            get("S3_SECRET_KEY"),
        ) {
            (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) => Some(S3Config {
                endpoint,
                bucket,
                access_key,
                secret_key,
                region: get("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                url_ttl_secs: parse_or(&get, "S3_URL_TTL_SECS", 7 * 24 * 60 * 60)?,
            }),
            _ => None,
        };

        Ok(Self {
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            database_url: get("DATABASE_URL"),
            jwt,
            vision,
            cors_allowed_origins,
            upload_dir: get("UPLOAD_DIR")
                .unwrap_or_else(|| "uploads".into())
                .into(),
            keep_image_copy: parse_or(&get, "KEEP_IMAGE_COPY", true)?,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            history_capacity,
            s3,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {v:?}")),
        None => Ok(default),
    }
}
