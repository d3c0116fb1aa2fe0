use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::application::SupervisorConfig;
use crate::domain::{DEFAULT_INTERVAL_SECS, IntervalPolicy, MIN_INTERVAL_SECS, RestartPolicy};
use crate::infrastructure::email_notifier::EmailSettings;
use crate::infrastructure::http_fetcher::{DEFAULT_MAX_REDIRECTS, default_user_agent};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub default_interval_seconds: u64,
    pub min_interval_seconds: u64,
    pub fetch_timeout_seconds: u64,
    pub notify_timeout_seconds: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    pub max_concurrent_watches: usize,
    pub stop_grace_seconds: u64,
    pub reconcile_interval_seconds: u64,
    pub restart: RestartCfg,
    pub notifiers: NotifiersCfg,
    pub http: HttpCfg,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RestartCfg {
    pub max_restarts: u32,
    pub delay_seconds: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifiersCfg {
    pub console: bool,
    pub webhook: Option<WebhookCfg>,
    pub telegram: Option<TelegramCfg>,
    pub email: Option<EmailCfg>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct WebhookCfg {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TelegramCfg {
    pub token: String,
    pub chat_id: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EmailCfg {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    /// Defaults to `username`.
    pub from: Option<String>,
    pub to: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpCfg {
    pub listen: Option<String>,
    pub api_token: Option<String>,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:pagewatch.db".to_string(),
            default_interval_seconds: DEFAULT_INTERVAL_SECS,
            min_interval_seconds: MIN_INTERVAL_SECS,
            fetch_timeout_seconds: 15,
            notify_timeout_seconds: 30,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: default_user_agent(),
            max_concurrent_watches: 200,
            stop_grace_seconds: 20,
            reconcile_interval_seconds: 30,
            restart: RestartCfg::default(),
            notifiers: NotifiersCfg::default(),
            http: HttpCfg::default(),
        }
    }
}

impl Default for RestartCfg {
    fn default() -> Self {
        let policy = RestartPolicy::default();
        Self {
            max_restarts: policy.max_restarts,
            delay_seconds: policy.delay.as_secs(),
        }
    }
}

impl Default for NotifiersCfg {
    fn default() -> Self {
        Self {
            console: true,
            webhook: None,
            telegram: None,
            email: None,
        }
    }
}

impl Config {
    /// Loads `path` if it exists (defaults otherwise), applies environment
    /// overrides and validates.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let mut cfg = if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {path}"))?;
            Self::from_yaml(&expand_env(&raw, &env))
                .with_context(|| format!("parsing config {path}"))?
        } else {
            Self::default()
        };
        cfg.apply_env(&env)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Environment variables win over the file.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> anyhow::Result<()> {
        let get = |k: &str| env.get(k).filter(|v| !v.is_empty()).cloned();

        if let Some(url) = get("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(url) = get("WEBHOOK_URL") {
            self.notifiers.webhook = Some(WebhookCfg { url });
        }
        if let (Some(token), Some(chat_id)) = (get("TELEGRAM_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            self.notifiers.telegram = Some(TelegramCfg { token, chat_id });
        }
        if let (Some(sender), Some(password), Some(receiver)) = (
            get("EMAIL_SENDER"),
            get("EMAIL_PASSWORD"),
            get("EMAIL_RECEIVER"),
        ) {
            let smtp_port = match get("SMTP_PORT") {
                Some(p) => p.parse().with_context(|| format!("invalid SMTP_PORT {p:?}"))?,
                None => default_smtp_port(),
            };
            self.notifiers.email = Some(EmailCfg {
                smtp_host: get("SMTP_HOST").unwrap_or_else(default_smtp_host),
                smtp_port,
                username: sender,
                password,
                from: None,
                to: receiver,
            });
        }
        if let Some(token) = get("PAGEWATCH_API_TOKEN") {
            self.http.api_token = Some(token);
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fetch_timeout_seconds == 0 {
            bail!("fetch_timeout_seconds must be positive");
        }
        if self.notify_timeout_seconds == 0 {
            bail!("notify_timeout_seconds must be positive");
        }
        if self.min_interval_seconds < MIN_INTERVAL_SECS {
            bail!("min_interval_seconds may not be below {MIN_INTERVAL_SECS}");
        }
        if self.default_interval_seconds < self.min_interval_seconds {
            bail!(
                "default_interval_seconds ({}) is below min_interval_seconds ({})",
                self.default_interval_seconds,
                self.min_interval_seconds
            );
        }
        if self.max_concurrent_watches == 0 {
            bail!("max_concurrent_watches must be positive");
        }
        if self.reconcile_interval_seconds == 0 {
            bail!("reconcile_interval_seconds must be positive");
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    pub fn interval_policy(&self) -> IntervalPolicy {
        IntervalPolicy {
            min_secs: self.min_interval_seconds,
            default_secs: self.default_interval_seconds,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_watches: self.max_concurrent_watches,
            stop_grace: Duration::from_secs(self.stop_grace_seconds),
            restart: RestartPolicy {
                max_restarts: self.restart.max_restarts,
                delay: Duration::from_secs(self.restart.delay_seconds),
            },
            intervals: self.interval_policy(),
        }
    }
}

impl EmailCfg {
    pub fn to_settings(&self) -> EmailSettings {
        EmailSettings {
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            username: self.username.clone(),
            password: self.password.clone(),
            from: self.from.clone().unwrap_or_else(|| self.username.clone()),
            to: self.to.clone(),
        }
    }
}

/// very small ${VAR} expansion to keep config simple
fn expand_env(s: &str, env: &HashMap<String, String>) -> String {
    let mut out = s.to_string();
    for (k, v) in env {
        out = out.replace(&format!("${{{}}}", k), v);
    }
    out
}
