use config::ConfigError;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
}

/// Runtime environment. Production turns on the `Secure` cookie attribute.
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// Token signing settings. Access and refresh tokens use independent secrets.
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expiry_ms: i64,  // 900000 = 15 minutes
    pub refresh_token_expiry_ms: i64, // 604800000 = 7 days
    pub issuer: String,
    /// Replace the refresh token on every refresh call. Off by default.
    pub rotate_refresh_tokens: bool,
}

impl JwtSettings {
    pub const DEFAULT_ACCESS_EXPIRY_MS: i64 = 15 * 60 * 1000;
    pub const DEFAULT_REFRESH_EXPIRY_MS: i64 = 7 * 24 * 60 * 60 * 1000;

    /// Settings with default lifetimes and the given secrets.
    pub fn with_secrets(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_token_expiry_ms: Self::DEFAULT_ACCESS_EXPIRY_MS,
            refresh_token_expiry_ms: Self::DEFAULT_REFRESH_EXPIRY_MS,
            issuer: "saiqa".to_string(),
            rotate_refresh_tokens: false,
        }
    }
}

/// Loads settings from `configuration.{yaml,toml,json}` (optional) and then
/// from `APP_`-prefixed environment variables, e.g. `APP_JWT__ACCESS_SECRET`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("application.port", 8080)?
        .set_default("application.environment", "local")?
        .set_default("database.max_connections", 5)?
        .set_default("jwt.access_token_expiry_ms", JwtSettings::DEFAULT_ACCESS_EXPIRY_MS)?
        .set_default("jwt.refresh_token_expiry_ms", JwtSettings::DEFAULT_REFRESH_EXPIRY_MS)?
        .set_default("jwt.issuer", "saiqa")?
        .set_default("jwt.rotate_refresh_tokens", false)?
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let settings = settings.try_deserialize::<Settings>()?;
    validate_jwt_settings(&settings.jwt)?;
    Ok(settings)
}

fn validate_jwt_settings(jwt: &JwtSettings) -> Result<(), ConfigError> {
    if jwt.access_secret.is_empty() || jwt.refresh_secret.is_empty() {
        return Err(ConfigError::Message(
            "jwt.access_secret and jwt.refresh_secret must be set".to_string(),
        ));
    }
    if jwt.access_secret == jwt.refresh_secret {
        tracing::warn!("Access and refresh tokens share a signing secret");
    }
    if jwt.access_token_expiry_ms <= 0 || jwt.refresh_token_expiry_ms <= 0 {
        return Err(ConfigError::Message(
            "token lifetimes must be positive".to_string(),
        ));
    }
    Ok(())
}
