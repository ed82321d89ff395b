use std::env;

/// Default lifetime of an unsubscribe hash, in days.
pub const DEFAULT_UNSUBSCRIBE_LINK_ALIVE_DAYS: i64 = 30;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub base_url: String,
    pub static_base_url: Option<String>,
    pub link_tracking_enabled: bool,
    pub convert_to_absolute_links: bool,
    pub unsubscribe_link_alive_days: i64,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_tls: bool,
    pub smtp_from_email: String,
    pub smtp_rate_limit_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            base_url: with_trailing_slash(&env::var("BASE_URL")?),
            static_base_url: env::var("STATIC_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| with_trailing_slash(&s)),
            link_tracking_enabled: env::var("LINK_TRACKING_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            convert_to_absolute_links: env::var("CONVERT_TO_ABSOLUTE_LINKS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            unsubscribe_link_alive_days: env::var("UNSUBSCRIBE_LINK_ALIVE_DAYS")
                .unwrap_or_else(|_| DEFAULT_UNSUBSCRIBE_LINK_ALIVE_DAYS.to_string())
                .parse()
                .unwrap_or(DEFAULT_UNSUBSCRIBE_LINK_ALIVE_DAYS),
            smtp_host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "1025".to_string())
                .parse()
                .unwrap_or(1025),
            smtp_username: env::var("SMTP_USERNAME").ok().filter(|s| !s.is_empty()),
            smtp_password: env::var("SMTP_PASSWORD").ok().filter(|s| !s.is_empty()),
            smtp_tls: env::var("SMTP_TLS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            smtp_from_email: env::var("SMTP_FROM_EMAIL")
                .unwrap_or_else(|_| "newsletter@example.com".to_string()),
            smtp_rate_limit_ms: env::var("SMTP_RATE_LIMIT_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
        })
    }

    /// The rendering switches, detached from the rest of the process config.
    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            link_tracking_enabled: self.link_tracking_enabled,
            convert_to_absolute_links: self.convert_to_absolute_links,
            static_base_url: self.static_base_url.clone(),
        }
    }
}

/// Per-renderer switches. Each renderer owns its copy, so tests can run
/// different configurations side by side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    pub link_tracking_enabled: bool,
    pub convert_to_absolute_links: bool,
    /// Pinned base URL for unsubscribe links, used instead of the site's
    /// resolved base URL when set (e.g. behind a proxy).
    pub static_base_url: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            link_tracking_enabled: true,
            convert_to_absolute_links: true,
            static_base_url: None,
        }
    }
}

/// Site-level settings the renderer reads at render time.
pub trait SiteConfig: Send + Sync {
    /// Absolute base URL of the site, ending with `/`.
    fn base_url(&self) -> String;

    fn unsubscribe_link_alive_days(&self) -> i64;
}

impl SiteConfig for AppConfig {
    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn unsubscribe_link_alive_days(&self) -> i64 {
        self.unsubscribe_link_alive_days
    }
}

pub fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}
