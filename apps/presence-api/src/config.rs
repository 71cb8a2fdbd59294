use std::path::PathBuf;
use std::time::Duration;

/// Presence API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret used to verify bearer tokens issued by the portal.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// How long a new socket may take to authenticate before it is dropped.
    pub handshake_timeout: Duration,
    /// Deadline for a single socket write before the connection is dropped.
    pub push_write_timeout: Duration,
    /// Capacity of each connection's outbound channel.
    pub outbound_buffer: usize,
    /// Per-user bound on the offline delivery queue.
    pub offline_queue_limit: usize,
    /// Default lifetime of a notification.
    pub notification_ttl: chrono::Duration,
    /// Interval between expired-notification sweeps.
    pub sweep_interval: Duration,
    /// How long shutdown waits for gateway connections to say goodbye.
    pub shutdown_grace: Duration,
    /// Optional JSON file used to seed the in-memory user directory.
    pub users_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: required_var("JWT_SECRET"),
            port: parsed_var("PORT", 4010),
            handshake_timeout: Duration::from_secs(parsed_var("HANDSHAKE_TIMEOUT_SECS", 10)),
            push_write_timeout: Duration::from_millis(parsed_var("PUSH_WRITE_TIMEOUT_MS", 5000)),
            outbound_buffer: parsed_var("OUTBOUND_BUFFER", 256),
            offline_queue_limit: parsed_var("OFFLINE_QUEUE_LIMIT", 50),
            notification_ttl: chrono::Duration::days(parsed_var("NOTIFICATION_TTL_DAYS", 30)),
            sweep_interval: Duration::from_secs(parsed_var("SWEEP_INTERVAL_SECS", 24 * 3600)),
            shutdown_grace: Duration::from_secs(parsed_var("SHUTDOWN_GRACE_SECS", 5)),
            users_file: std::env::var("USERS_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Defaults for everything except the secret. Used by tests and tooling.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            port: 4010,
            handshake_timeout: Duration::from_secs(10),
            push_write_timeout: Duration::from_millis(5000),
            outbound_buffer: 256,
            offline_queue_limit: 50,
            notification_ttl: chrono::Duration::days(30),
            sweep_interval: Duration::from_secs(24 * 3600),
            shutdown_grace: Duration::from_secs(5),
            users_file: None,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
