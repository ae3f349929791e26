use crate::error::IntakeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "PARCEL_INTAKE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "parcel-intake.toml";

const MIN_JWT_SECRET_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IntakeConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub google: GoogleConfig,
    pub storage: StorageConfig,
    pub uploads: UploadsConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "corsOrigin")]
    pub cors_origin: String,
    #[serde(rename = "logLevel")]
    pub log_level: String,
    #[serde(rename = "logsDir")]
    pub logs_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            cors_origin: "*".to_string(),
            log_level: "info".to_string(),
            logs_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(rename = "jwtSecret")]
    pub jwt_secret: String,
    #[serde(rename = "tokenLifetimeSecs")]
    pub token_lifetime_secs: i64,
    #[serde(rename = "maxFailedLoginAttempts")]
    pub max_failed_login_attempts: u32,
    #[serde(rename = "passwordResetTtlSecs")]
    pub password_reset_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_lifetime_secs: 24 * 60 * 60,
            max_failed_login_attempts: 6,
            password_reset_ttl_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GoogleConfig {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(rename = "clientSecret")]
    pub client_secret: Option<String>,
    #[serde(rename = "callbackUrl")]
    pub callback_url: Option<String>,
}

impl GoogleConfig {
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "defaultProvider")]
    pub default_provider: String,
    pub local: LocalStorageConfig,
    pub s3: S3Config,
    pub gcs: GcsConfig,
    pub cloudinary: CloudinaryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_provider: "local".to_string(),
            local: LocalStorageConfig::default(),
            s3: S3Config::default(),
            gcs: GcsConfig::default(),
            cloudinary: CloudinaryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStorageConfig {
    /// Directory files are written under
    pub root: PathBuf,
    /// Public URL the root directory is served at
    #[serde(rename = "baseUrl")]
    pub base_url: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            base_url: "http://localhost:3000/uploads".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: Option<String>,
    pub region: String,
    #[serde(rename = "accessKeyId")]
    pub access_key_id: Option<String>,
    #[serde(rename = "secretAccessKey")]
    pub secret_access_key: Option<String>,
    /// Custom endpoint (MinIO, localstack); switches to path-style URLs
    pub endpoint: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GcsConfig {
    pub bucket: Option<String>,
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CloudinaryConfig {
    #[serde(rename = "cloudName")]
    pub cloud_name: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(rename = "apiSecret")]
    pub api_secret: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    #[serde(rename = "maxFileSize")]
    pub max_file_size: u64,
    #[serde(rename = "maxFiles")]
    pub max_files: usize,
    #[serde(rename = "maxParcelImages")]
    pub max_parcel_images: usize,
    #[serde(rename = "allowedMimeTypes")]
    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            max_files: 11,
            max_parcel_images: 10,
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/jpg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowLimit {
    #[serde(rename = "windowSecs")]
    pub window_secs: u64,
    #[serde(rename = "maxRequests")]
    pub max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub auth: WindowLimit,
    pub login: WindowLimit,
    pub api: WindowLimit,
    /// Reverse proxies allowed to name the client in `X-Forwarded-For`
    #[serde(rename = "trustedProxies")]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth: WindowLimit {
                window_secs: 15 * 60,
                max_requests: 10,
            },
            login: WindowLimit {
                window_secs: 60 * 60,
                max_requests: 5,
            },
            api: WindowLimit {
                window_secs: 5 * 60,
                max_requests: 100,
            },
            trusted_proxies: Vec::new(),
        }
    }
}

pub fn get_config_file_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Default data directory, used for the database when none is configured
pub fn get_data_dir() -> Result<PathBuf, IntakeError> {
    dirs::data_local_dir()
        .map(|dir| dir.join("parcel-intake"))
        .ok_or_else(|| IntakeError::Config("Could not find local data directory".to_string()))
}

impl IntakeConfig {
    /// Load from the configured file (if present), then apply environment overrides.
    pub fn load() -> Result<Self, IntakeError> {
        let mut config = Self::load_file(&get_config_file_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self, IntakeError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| IntakeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key) {
                *target = Some(value);
            }
        };

        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(base_url) = lookup("BASE_URL") {
            self.server.base_url = base_url;
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        set(&mut self.google.client_id, "GOOGLE_CLIENT_ID");
        set(&mut self.google.client_secret, "GOOGLE_CLIENT_SECRET");
        set(&mut self.google.callback_url, "GOOGLE_CALLBACK_URL");

        if let Some(provider) = lookup("STORAGE_DEFAULT_PROVIDER") {
            self.storage.default_provider = provider;
        }
        set(&mut self.storage.s3.bucket, "AWS_S3_BUCKET_NAME");
        if let Some(region) = lookup("AWS_REGION") {
            self.storage.s3.region = region;
        }
        set(&mut self.storage.s3.access_key_id, "AWS_ACCESS_KEY_ID");
        set(&mut self.storage.s3.secret_access_key, "AWS_SECRET_ACCESS_KEY");
        set(&mut self.storage.s3.endpoint, "AWS_S3_ENDPOINT");
        set(&mut self.storage.gcs.bucket, "GCS_BUCKET_NAME");
        set(&mut self.storage.gcs.project_id, "GOOGLE_CLOUD_PROJECT_ID");
        set(&mut self.storage.gcs.access_token, "GCS_ACCESS_TOKEN");
        set(&mut self.storage.cloudinary.cloud_name, "CLOUDINARY_CLOUD_NAME");
        set(&mut self.storage.cloudinary.api_key, "CLOUDINARY_API_KEY");
        set(&mut self.storage.cloudinary.api_secret, "CLOUDINARY_API_SECRET");

        if let Some(proxies) = lookup("TRUSTED_PROXIES") {
            self.rate_limit.trusted_proxies = proxies
                .split(',')
                .filter_map(|ip| ip.trim().parse().ok())
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), IntakeError> {
        if self.server.port == 0 {
            return Err(IntakeError::Config("server.port must be non-zero".to_string()));
        }
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(IntakeError::Config(format!(
                "auth.jwtSecret must be at least {} characters (set JWT_SECRET)",
                MIN_JWT_SECRET_LEN
            )));
        }
        if !crate::storage::KNOWN_PROVIDERS.contains(&self.storage.default_provider.as_str()) {
            return Err(IntakeError::Config(format!(
                "Unknown storage provider '{}'",
                self.storage.default_provider
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf, IntakeError> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_data_dir()?.join("parcel-intake.db")),
        }
    }

    pub fn logs_dir(&self) -> Result<PathBuf, IntakeError> {
        match &self.server.logs_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(get_data_dir()?.join("logs")),
        }
    }

    pub fn google_callback_url(&self) -> String {
        self.google
            .callback_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}/auth/google/callback", self.server.port))
    }
}

/// Create a directory readable only by the owner
pub fn ensure_private_dir(dir: &Path) -> Result<(), IntakeError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(dir)?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}
