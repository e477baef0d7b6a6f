#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub media_root: String,
    pub media_url: String,
    /// When present, uploads go to S3/MinIO instead of `media_root`.
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone)]
pub struct SuperuserConfig {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub storage: StorageConfig,
    pub superuser: Option<SuperuserConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env_opt("DATABASE_URL");

        let s3 = match env_opt("MINIO_ENDPOINT") {
            Some(endpoint) => Some(S3Config {
                endpoint,
                bucket: std::env::var("MINIO_BUCKET")?,
                access_key: std::env::var("MINIO_ACCESS_KEY")?,
                secret_key: std::env::var("MINIO_SECRET_KEY")?,
                region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
            }),
            None => None,
        };

        let mut media_url = std::env::var("MEDIA_URL").unwrap_or_else(|_| "/media/".into());
        if !media_url.ends_with('/') {
            media_url.push('/');
        }
        let storage = StorageConfig {
            media_root: std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".into()),
            media_url,
            s3,
        };

        let superuser = match (env_opt("SUPERUSER_EMAIL"), env_opt("SUPERUSER_PASSWORD")) {
            (Some(email), Some(password)) => Some(SuperuserConfig { email, password }),
            _ => None,
        };

        Ok(Self {
            database_url,
            storage,
            superuser,
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
