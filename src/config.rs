use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub webhook: WebhookConfig,
    pub rate_limit: RateLimitConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS (the training portal frontend).
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
    /// Lifetime of password reset tokens.
    pub password_reset_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    /// bcrypt work factor (4..=31).
    pub bcrypt_cost: u32,
    pub min_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret used to sign video vendor webhooks (HMAC-SHA256).
    pub secret: String,
    /// Maximum accepted clock skew between the signed timestamp and now.
    pub tolerance_minutes: i64,
}

/// Administrator account created on first start when both values are set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for auth endpoints (e.g. /api/auth/login)
    pub auth_per_second: u32,
    /// Burst size for auth endpoints
    pub auth_burst: u32,
    /// Allowed requests per second (per IP) for webhook endpoints (e.g. /webhooks/video)
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

/// Upper bounds keeping `chrono::Duration` arithmetic on these values in range.
const MAX_JWT_EXPIRATION_HOURS: i64 = 24 * 365;
const MAX_PASSWORD_RESET_TTL_MINUTES: i64 = 24 * 60;
const MAX_WEBHOOK_TOLERANCE_MINUTES: i64 = 24 * 60;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/emdr.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
                expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
                password_reset_ttl_minutes: env::var("PASSWORD_RESET_TTL_MINUTES")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
            },
            password: PasswordConfig {
                bcrypt_cost: env::var("BCRYPT_COST")
                    .unwrap_or_else(|_| bcrypt::DEFAULT_COST.to_string())
                    .parse()
                    .unwrap_or(bcrypt::DEFAULT_COST),
                min_length: env::var("PASSWORD_MIN_LENGTH")
                    .unwrap_or_else(|_| "8".to_string())
                    .parse()
                    .unwrap_or(8),
            },
            webhook: WebhookConfig {
                secret: env::var("WEBHOOK_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("WEBHOOK_SECRET".to_string()))?,
                tolerance_minutes: env::var("WEBHOOK_TOLERANCE_MINUTES")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            rate_limit: RateLimitConfig {
                auth_per_second: env::var("RATE_LIMIT_AUTH_PER_SECOND")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
                auth_burst: env::var("RATE_LIMIT_AUTH_BURST")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
            admin: AdminConfig {
                email: env::var("ADMIN_EMAIL").ok().filter(|v| !v.trim().is_empty()),
                password: env::var("ADMIN_PASSWORD").ok().filter(|v| !v.is_empty()),
            },
        };
        Ok(config.clamped())
    }

    /// Pull lifetimes and work factors into their supported ranges.
    fn clamped(mut self) -> Self {
        self.jwt.expiration_hours = self.jwt.expiration_hours.clamp(1, MAX_JWT_EXPIRATION_HOURS);
        self.jwt.password_reset_ttl_minutes = self
            .jwt
            .password_reset_ttl_minutes
            .clamp(1, MAX_PASSWORD_RESET_TTL_MINUTES);
        self.webhook.tolerance_minutes = self
            .webhook
            .tolerance_minutes
            .clamp(0, MAX_WEBHOOK_TOLERANCE_MINUTES);
        self.password.bcrypt_cost = self.password.bcrypt_cost.clamp(4, 31);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/emdr.db".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: String::new(),
                expiration_hours: 24,
                password_reset_ttl_minutes: 60,
            },
            password: PasswordConfig {
                bcrypt_cost: bcrypt::DEFAULT_COST,
                min_length: 8,
            },
            webhook: WebhookConfig {
                secret: String::new(),
                tolerance_minutes: 10,
            },
            rate_limit: RateLimitConfig {
                auth_per_second: 3,
                auth_burst: 10,
                webhook_per_second: 10,
                webhook_burst: 50,
            },
            admin: AdminConfig::default(),
        }
    }
}
