use crate::domain::value_objects::money::Money;
use std::net::SocketAddr;
use std::time::Duration;

/// What a sweep does with a value+date match that has more than one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguousMatchPolicy {
    /// Count as skipped and log a warning.
    Skip,
    /// Count as failed and log at error level for operators.
    Alert,
}

impl AmbiguousMatchPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "skip" => Some(AmbiguousMatchPolicy::Skip),
            "alert" => Some(AmbiguousMatchPolicy::Alert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid URL for {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub token_url: String,
    /// External-account scope the token pair is stored under.
    pub scope: String,
    /// Tokens expiring within this window are refreshed before use.
    pub expiry_buffer: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Minimum spacing between consecutive outbound calls.
    pub min_interval: Duration,
    /// Total attempts for a call answered with 429.
    pub max_attempts: u32,
    /// Backoff after the n-th 429 is `backoff_step × n`, capped at `backoff_ceiling`.
    pub backoff_step: Duration,
    pub backoff_ceiling: Duration,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        std::cmp::min(self.backoff_step * attempt, self.backoff_ceiling)
    }
}

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Order-number prefixes that mark internal-only records.
    pub internal_prefixes: Vec<String>,
    pub date_window_days: i64,
    pub total_tolerance: Money,
    pub search_page_size: u32,
    pub search_max_pages: u32,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// ERP status code of an authorized fiscal document.
    pub authorized_status_code: i64,
    /// Query documents by order id when the order payload references none.
    pub search_documents_by_order: bool,
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub page_size: u32,
    pub item_delay: Duration,
    pub ambiguous_policy: AmbiguousMatchPolicy,
    pub linkage_interval: Duration,
    pub documents_interval: Duration,
    pub schedule_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub credential: CredentialConfig,
    pub gateway: GatewayConfig,
    pub matcher: MatcherConfig,
    pub resolver: ResolverConfig,
    pub backfill: BackfillConfig,
    pub api: ApiConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            credential: CredentialConfig {
                token_url: "https://www.bling.com.br/Api/v3/oauth/token".to_string(),
                scope: "default".to_string(),
                expiry_buffer: Duration::from_secs(300),
            },
            gateway: GatewayConfig {
                base_url: "https://www.bling.com.br/Api/v3".to_string(),
                min_interval: Duration::from_millis(350), // ~3 req/s
                max_attempts: 5,
                backoff_step: Duration::from_millis(1500),
                backoff_ceiling: Duration::from_secs(8),
                request_timeout: Duration::from_secs(30),
            },
            matcher: MatcherConfig {
                internal_prefixes: vec!["#D".to_string()],
                date_window_days: 5,
                total_tolerance: Money::from_cents(200),
                search_page_size: 100,
                search_max_pages: 5,
            },
            resolver: ResolverConfig {
                authorized_status_code: 5,
                search_documents_by_order: true,
            },
            backfill: BackfillConfig {
                page_size: 50,
                item_delay: Duration::from_millis(400),
                ambiguous_policy: AmbiguousMatchPolicy::Skip,
                linkage_interval: Duration::from_secs(3600),
                documents_interval: Duration::from_secs(1800),
                schedule_enabled: true,
            },
            api: ApiConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
                requests_per_minute: 60,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default", name, raw, e);
            None
        }
    }
}

fn env_in_range<T>(name: &str, range: std::ops::RangeInclusive<T>) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = env_parse::<T>(name)?;
    if range.contains(&value) {
        Some(value)
    } else {
        tracing::warn!(
            "Invalid {} value: {} (must be between {} and {}), using default",
            name,
            value,
            range.start(),
            range.end()
        );
        None
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}

impl SyncConfig {
    /// Load configuration from environment variables, keeping defaults for anything invalid.
    pub fn from_env() -> SyncConfig {
        let mut config = SyncConfig::default();

        if let Ok(url) = std::env::var("ERP_BASE_URL") {
            config.gateway.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(url) = std::env::var("ERP_TOKEN_URL") {
            config.credential.token_url = url;
        }
        if let Ok(scope) = std::env::var("ERP_CREDENTIAL_SCOPE") {
            if !scope.trim().is_empty() {
                config.credential.scope = scope.trim().to_string();
            }
        }
        if let Some(secs) = env_in_range::<u64>("ERP_TOKEN_EXPIRY_BUFFER_SECONDS", 0..=3600) {
            config.credential.expiry_buffer = Duration::from_secs(secs);
        }

        if let Some(ms) = env_in_range::<u64>("ERP_MIN_INTERVAL_MILLISECONDS", 50..=10_000) {
            config.gateway.min_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_in_range::<u32>("ERP_RATE_LIMIT_MAX_ATTEMPTS", 1..=10) {
            config.gateway.max_attempts = attempts;
        }
        if let Some(ms) = env_in_range::<u64>("ERP_BACKOFF_STEP_MILLISECONDS", 10..=60_000) {
            config.gateway.backoff_step = Duration::from_millis(ms);
        }
        if let Some(ms) = env_in_range::<u64>("ERP_BACKOFF_CEILING_MILLISECONDS", 10..=120_000) {
            config.gateway.backoff_ceiling = Duration::from_millis(ms);
        }
        if let Some(secs) = env_in_range::<u64>("ERP_REQUEST_TIMEOUT_SECONDS", 1..=300) {
            config.gateway.request_timeout = Duration::from_secs(secs);
        }

        if let Ok(prefixes) = std::env::var("INTERNAL_ORDER_PREFIXES") {
            config.matcher.internal_prefixes = prefixes
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(days) = env_in_range::<i64>("MATCH_DATE_WINDOW_DAYS", 0..=30) {
            config.matcher.date_window_days = days;
        }
        if let Some(cents) = env_in_range::<i64>("MATCH_TOTAL_TOLERANCE_CENTS", 0..=1000) {
            config.matcher.total_tolerance = Money::from_cents(cents);
        }
        if let Some(size) = env_in_range::<u32>("ERP_SEARCH_PAGE_SIZE", 1..=100) {
            config.matcher.search_page_size = size;
        }
        if let Some(pages) = env_in_range::<u32>("ERP_SEARCH_MAX_PAGES", 1..=50) {
            config.matcher.search_max_pages = pages;
        }

        if let Some(code) = env_parse::<i64>("FISCAL_AUTHORIZED_STATUS") {
            config.resolver.authorized_status_code = code;
        }
        if let Some(enabled) = env_flag("FISCAL_SEARCH_BY_ORDER") {
            config.resolver.search_documents_by_order = enabled;
        }

        if let Some(size) = env_in_range::<u32>("BACKFILL_PAGE_SIZE", 1..=500) {
            config.backfill.page_size = size;
        }
        if let Some(ms) = env_in_range::<u64>("BACKFILL_ITEM_DELAY_MILLISECONDS", 0..=60_000) {
            config.backfill.item_delay = Duration::from_millis(ms);
        }
        if let Ok(policy) = std::env::var("AMBIGUOUS_MATCH_POLICY") {
            match AmbiguousMatchPolicy::parse(&policy) {
                Some(p) => config.backfill.ambiguous_policy = p,
                None => tracing::warn!(
                    "Invalid AMBIGUOUS_MATCH_POLICY '{}' (expected skip|alert), using default",
                    policy
                ),
            }
        }
        if let Some(secs) = env_in_range::<u64>("LINKAGE_BACKFILL_INTERVAL_SECONDS", 60..=86_400) {
            config.backfill.linkage_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_in_range::<u64>("DOCUMENT_BACKFILL_INTERVAL_SECONDS", 60..=86_400) {
            config.backfill.documents_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_flag("BACKFILL_SCHEDULE_ENABLED") {
            config.backfill.schedule_enabled = enabled;
        }

        if let Some(addr) = env_parse::<SocketAddr>("API_BIND_ADDR") {
            config.api.bind_addr = addr;
        }
        if let Some(rpm) = env_in_range::<u32>("API_REQUESTS_PER_MINUTE", 1..=10_000) {
            config.api.requests_per_minute = rpm;
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("ERP_BASE_URL", &self.gateway.base_url),
            ("ERP_TOKEN_URL", &self.credential.token_url),
        ] {
            url::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
                name,
                reason: e.to_string(),
            })?;
        }
        if self.gateway.backoff_ceiling < self.gateway.backoff_step {
            return Err(ConfigError::InvalidValue {
                name: "ERP_BACKOFF_CEILING_MILLISECONDS",
                reason: "ceiling is below the backoff step".to_string(),
            });
        }
        if self.matcher.total_tolerance.cents() < 0 {
            return Err(ConfigError::InvalidValue {
                name: "MATCH_TOTAL_TOLERANCE_CENTS",
                reason: "must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}
