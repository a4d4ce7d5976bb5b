use std::net::SocketAddr;

use anyhow::Context;

/// Upper bound for any token lifetime read from the environment: one year.
const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base for the URLs handed back to clients after an upload.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub cookie_secure: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_minutes(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
        .min(MAX_TTL_MINUTES)
}

fn parse_bind_addr(host: &str, port: &str) -> anyhow::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("APP_HOST/APP_PORT do not form a socket address: {host}:{port}"))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = parse_bind_addr(
            &env_or("APP_HOST", "0.0.0.0"),
            &env_or("APP_PORT", "8080"),
        )?;
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL")?;

        let jwt = JwtConfig {
            access_secret: std::env::var("JWT_ACCESS_SECRET").context("JWT_ACCESS_SECRET")?,
            refresh_secret: std::env::var("JWT_REFRESH_SECRET").context("JWT_REFRESH_SECRET")?,
            issuer: env_or("JWT_ISSUER", "userhub"),
            audience: env_or("JWT_AUDIENCE", "userhub-users"),
            access_ttl_minutes: env_minutes("ACCESS_TOKEN_TTL_MINUTES", 15),
            refresh_ttl_minutes: env_minutes("REFRESH_TOKEN_TTL_MINUTES", 60 * 24 * 14),
        };
        anyhow::ensure!(
            jwt.access_secret != jwt.refresh_secret,
            "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ"
        );

        let endpoint = std::env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT")?;
        let storage = StorageConfig {
            public_url: env_or("STORAGE_PUBLIC_URL", &endpoint),
            endpoint,
            bucket: std::env::var("MINIO_BUCKET").context("MINIO_BUCKET")?,
            access_key: std::env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY")?,
            secret_key: std::env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY")?,
            region: env_or("MINIO_REGION", "us-east-1"),
        };

        let cookie_secure = std::env::var("COOKIE_SECURE")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            bind_addr,
            database_url,
            jwt,
            storage,
            cookie_secure,
        })
    }
}
