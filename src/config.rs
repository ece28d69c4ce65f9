use anyhow::Context;

/// Upper bound for either token lifetime: one year.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// S3-compatible bucket the avatars and cover images live in.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base URL clients fetch stored objects from.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub media: MediaConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| get(key).with_context(|| format!("{key} must be set"));
        let minutes = |key: &str, default: i64| -> anyhow::Result<i64> {
            let Some(raw) = get(key) else {
                return Ok(default);
            };
            let value = raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{key} must be a number of minutes"))?;
            anyhow::ensure!(
                (1..=MAX_TTL_MINUTES).contains(&value),
                "{key} must be between 1 and {MAX_TTL_MINUTES} minutes"
            );
            Ok(value)
        };

        let database_url = required("DATABASE_URL")?;
        let host = get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match get("APP_PORT") {
            Some(v) => v.parse::<u16>().context("APP_PORT must be a port number")?,
            None => 8000,
        };

        let jwt = JwtConfig {
            access_secret: required("ACCESS_TOKEN_SECRET")?,
            refresh_secret: required("REFRESH_TOKEN_SECRET")?,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "tubeaccounts".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "tubeaccounts-users".into()),
            ttl_minutes: minutes("ACCESS_TOKEN_EXPIRY_MINUTES", 60 * 24)?,
            refresh_ttl_minutes: minutes("REFRESH_TOKEN_EXPIRY_MINUTES", 60 * 24 * 10)?,
        };

        let endpoint = required("MEDIA_ENDPOINT")?;
        let bucket = required("MEDIA_BUCKET")?;
        let public_url = get("MEDIA_PUBLIC_URL")
            .unwrap_or_else(|| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let media = MediaConfig {
            access_key: required("MEDIA_ACCESS_KEY")?,
            secret_key: required("MEDIA_SECRET_KEY")?,
            region: get("MEDIA_REGION").unwrap_or_else(|| "us-east-1".into()),
            endpoint,
            bucket,
            public_url,
        };

        Ok(Self {
            database_url,
            host,
            port,
            jwt,
            media,
        })
    }
}
