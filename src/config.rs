use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and budget knobs shared by every playback subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// How long a Signalling/Connecting transport may take to become Ready.
    pub ready_timeout: Duration,
    /// Window for a kicked-or-moved connection (close code 4014) to start reconnecting.
    pub reconnect_grace: Duration,
    /// Rejoin `n` (0-based) fires after `(n + 1) * rejoin_base_delay`.
    pub rejoin_base_delay: Duration,
    pub max_rejoin_attempts: u32,
    /// Consecutive failures tolerated for a looped track before it is skipped.
    pub max_resolution_retries: u32,
    pub max_queue_size: usize,
}

impl PlaybackConfig {
    pub fn rejoin_delay(&self, attempts: u32) -> Duration {
        self.rejoin_base_delay * (attempts + 1)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(20),
            reconnect_grace: Duration::from_secs(5),
            rejoin_base_delay: Duration::from_secs(5),
            max_rejoin_attempts: 5,
            max_resolution_retries: 3,
            max_queue_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub playback: PlaybackConfig,

    // Queue display
    pub queue_page_size: usize,

    // Resolvers
    pub ytdlp_path: String,
    pub resolver_timeout: Duration,

    // Discord; without a token the binary runs the console instead
    #[serde(skip_serializing)]
    pub discord_token: Option<String>,
    pub command_prefix: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = PlaybackConfig::default();
        let config = Self {
            playback: PlaybackConfig {
                ready_timeout: env_duration("READY_TIMEOUT", defaults.ready_timeout)?,
                reconnect_grace: env_duration("RECONNECT_GRACE", defaults.reconnect_grace)?,
                rejoin_base_delay: env_duration("REJOIN_BASE_DELAY", defaults.rejoin_base_delay)?,
                max_rejoin_attempts: std::env::var("MAX_REJOIN_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                max_resolution_retries: std::env::var("MAX_RESOLUTION_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
                max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
            },
            queue_page_size: std::env::var("QUEUE_PAGE_SIZE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            resolver_timeout: env_duration("RESOLVER_TIMEOUT", Duration::from_secs(30))?,
            discord_token: std::env::var("DISCORD_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Timeouts and the rejoin base delay must be non-zero
    /// - Queue size and page size must be greater than 0
    /// - The yt-dlp path and the command prefix must not be empty
    pub fn validate(&self) -> Result<()> {
        let playback = &self.playback;

        if playback.ready_timeout.is_zero() {
            anyhow::bail!("READY_TIMEOUT must be greater than 0");
        }

        if playback.reconnect_grace.is_zero() {
            anyhow::bail!("RECONNECT_GRACE must be greater than 0");
        }

        if playback.rejoin_base_delay.is_zero() {
            anyhow::bail!("REJOIN_BASE_DELAY must be greater than 0");
        }

        if playback.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.queue_page_size == 0 {
            anyhow::bail!("Queue page size must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH cannot be empty");
        }

        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("COMMAND_PREFIX cannot be empty");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        let playback = &self.playback;
        format!(
            "Config Summary:\n  \
            Connection: {} ready timeout, {} grace, {} x{} rejoin backoff\n  \
            Queue: {} max, {} per page, {} retries for looped tracks\n  \
            Resolver: {} ({} timeout)\n  \
            Frontend: {}",
            humantime::format_duration(playback.ready_timeout),
            humantime::format_duration(playback.reconnect_grace),
            humantime::format_duration(playback.rejoin_base_delay),
            playback.max_rejoin_attempts,
            playback.max_queue_size,
            self.queue_page_size,
            playback.max_resolution_retries,
            self.ytdlp_path,
            humantime::format_duration(self.resolver_timeout),
            match &self.discord_token {
                Some(_) => format!("Discord, prefix `{}`", self.command_prefix),
                None => "console".to_string(),
            },
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            queue_page_size: 5,
            ytdlp_path: "yt-dlp".to_string(),
            resolver_timeout: Duration::from_secs(30),
            discord_token: None,
            command_prefix: "!".to_string(),
        }
    }
}

/// Reads a humantime duration such as `20s` or `1m 30s`.
fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => humantime::parse_duration(value.trim())
            .map_err(|e| anyhow::anyhow!("Invalid duration for {}: {}", key, e)),
        _ => Ok(default),
    }
}
