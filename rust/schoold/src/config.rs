use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ai: AiConfig,
    /// Workspace opened before the first request, if any.
    pub startup_workspace: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("SCHOOLD_GEMINI_BASE_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());

        let timeout_secs = match lookup("SCHOOLD_HTTP_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    log::warn!(
                        "ignoring SCHOOLD_HTTP_TIMEOUT_SECS={:?}; using {}",
                        raw,
                        DEFAULT_HTTP_TIMEOUT_SECS
                    );
                    DEFAULT_HTTP_TIMEOUT_SECS
                }
            },
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        let startup_workspace = lookup("SCHOOLD_WORKSPACE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self {
            ai: AiConfig {
                base_url,
                timeout: Duration::from_secs(timeout_secs),
            },
            startup_workspace,
        }
    }
}

impl AiConfig {
    /// Loopback endpoints bypass any system proxy.
    pub fn is_loopback(&self) -> bool {
        let rest = self
            .base_url
            .strip_prefix("http://")
            .or_else(|| self.base_url.strip_prefix("https://"))
            .unwrap_or(&self.base_url);
        rest.starts_with("127.0.0.1") || rest.starts_with("localhost") || rest.starts_with("[::1]")
    }
}
