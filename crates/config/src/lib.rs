use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
    pub tls_enabled: bool,
    pub tls_ca_cert_path: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("DATABASE_HOST").ok(),
            port: std::env::var("DATABASE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5432),
            database: std::env::var("DATABASE_NAME").unwrap_or_else(|_| "lms_payments".to_string()),
            username: std::env::var("DATABASE_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: if let Ok(path) = std::env::var("DATABASE_PASSWORD_FILE") {
                std::fs::read_to_string(&path)
                    .map(|p| p.trim().to_string())
                    .unwrap_or_else(|e| {
                        panic!("Failed to read DATABASE_PASSWORD_FILE at {}: {}", path, e)
                    })
            } else {
                std::env::var("DATABASE_PASSWORD").unwrap_or_else(|_| "postgres".to_string())
            },
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10),
            tls_enabled: std::env::var("DATABASE_TLS_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            tls_ca_cert_path: std::env::var("DATABASE_TLS_CA_CERT_PATH").ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        }
    }
}

/// Configuration for the Razorpay billing provider
#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayConfig {
    /// Public key id, also served to the client checkout widget
    pub key_id: String,
    /// API key secret, used for basic auth against the Razorpay API
    pub key_secret: String,
    /// Shared secret used to verify payment signatures
    pub payment_secret: String,
    /// Recurring plan to subscribe users to
    pub plan_id: String,
    /// Base URL of the Razorpay REST API (overridable for tests/sandboxes)
    pub api_base_url: String,
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            key_id: std::env::var("RAZORPAY_KEY_ID").unwrap_or_default(),
            key_secret: if let Ok(path) = std::env::var("RAZORPAY_KEY_SECRET_FILE") {
                std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|e| {
                        panic!("Failed to read RAZORPAY_KEY_SECRET_FILE at {}: {}", path, e)
                    })
            } else {
                std::env::var("RAZORPAY_KEY_SECRET").unwrap_or_default()
            },
            payment_secret: if let Ok(path) = std::env::var("RAZORPAY_PAYMENT_SECRET_FILE") {
                std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|e| {
                        panic!(
                            "Failed to read RAZORPAY_PAYMENT_SECRET_FILE at {}: {}",
                            path, e
                        )
                    })
            } else {
                std::env::var("RAZORPAY_PAYMENT_SECRET").unwrap_or_default()
            },
            plan_id: std::env::var("RAZORPAY_PLAN_ID").unwrap_or_default(),
            api_base_url: std::env::var("RAZORPAY_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
        }
    }
}

impl RazorpayConfig {
    /// Returns true if the provider credentials are present
    pub fn is_configured(&self) -> bool {
        !self.key_id.is_empty() && !self.key_secret.is_empty() && !self.plan_id.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub exact_matches: Vec<String>,
    pub wildcard_suffixes: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        let raw_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        parse_cors_origins(&raw_origins)
    }
}

fn parse_cors_origins(raw_origins: &str) -> CorsConfig {
    let mut exact_matches = Vec::new();
    let mut wildcard_suffixes = Vec::new();

    for origin in raw_origins.split(',') {
        let s = origin.trim();
        if s.is_empty() {
            continue;
        }

        if let Some(suffix) = s.strip_prefix('*') {
            let safe_suffix = if suffix.starts_with('.') || suffix.starts_with('-') {
                suffix.to_string()
            } else {
                format!(".{}", suffix)
            };
            wildcard_suffixes.push(safe_suffix);
        } else {
            exact_matches.push(s.to_string());
        }
    }

    CorsConfig {
        exact_matches,
        wildcard_suffixes,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub razorpay: RazorpayConfig,
    pub cors: CorsConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }
}
