//! YAML configuration for the ingress service.
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hops_conversation::DEFAULT_DISPATCH_TIMEOUT;
use hops_core::platforms::wecom::DEFAULT_API_BASE_URL;
use hops_idempotency::IdempotencyConfig;
use hops_session::SessionConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("配置校验失败: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub server: ServerConfig,
    pub wecom: WeComConfig,
    pub unraid: UnraidConfig,
    pub auth: AuthConfig,
    pub dedup: DedupConfig,
    pub conversation: ConversationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub base_url: String,
    pub max_body_bytes: usize,
    pub handler_timeout_secs: u64,
    pub http_client_timeout_secs: u64,
    pub notify_on_startup: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            base_url: String::new(),
            max_body_bytes: 1 << 20,
            handler_timeout_secs: 90,
            http_client_timeout_secs: 15,
            notify_on_startup: true,
        }
    }
}

impl ServerConfig {
    /// Parses `listen_addr`; a bare `:port` binds every interface.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        let addr = self.listen_addr.trim();
        match addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}").parse(),
            None => addr.parse(),
        }
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs.max(1))
    }

    pub fn http_client_timeout(&self) -> Duration {
        Duration::from_secs(self.http_client_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeComConfig {
    pub corpid: String,
    pub agentid: i64,
    pub secret: String,
    pub token: String,
    pub encoding_aes_key: String,
    pub api_base_url: String,
}

impl Default for WeComConfig {
    fn default() -> Self {
        Self {
            corpid: String::new(),
            agentid: 0,
            secret: String::new(),
            token: String::new(),
            encoding_aes_key: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnraidConfig {
    pub endpoint: String,
    pub api_key: String,
    pub origin: String,
    pub force_update_mutation: String,
}

impl Default for UnraidConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            origin: "hops".into(),
            force_update_mutation: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub allowed_userids: Vec<String>,
}

impl AuthConfig {
    /// Trimmed, de-duplicated user ids in configuration order.
    pub fn unique_users(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.allowed_userids
            .iter()
            .map(|user| user.trim())
            .filter(|user| !user.is_empty() && seen.insert(user.to_string()))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

impl From<&DedupConfig> for IdempotencyConfig {
    fn from(cfg: &DedupConfig) -> Self {
        IdempotencyConfig::from_secs(cfg.ttl_secs, cfg.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Deadline for one confirmed action against the backend.
    pub dispatch_timeout_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            sweep_interval_secs: 60,
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT.as_secs(),
        }
    }
}

impl ConversationConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs.max(1))
    }
}

impl From<&ConversationConfig> for SessionConfig {
    fn from(cfg: &ConversationConfig) -> Self {
        SessionConfig::from_secs(cfg.ttl_secs, cfg.sweep_interval_secs)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = serde_yaml::from_str(raw)?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        if self.log.level.trim().is_empty() {
            self.log.level = LogConfig::default().level;
        }
        if self.server.listen_addr.trim().is_empty() {
            self.server.listen_addr = ServerConfig::default().listen_addr;
        }
        if self.wecom.api_base_url.trim().is_empty() {
            self.wecom.api_base_url = DEFAULT_API_BASE_URL.into();
        }
        if self.unraid.origin.trim().is_empty() {
            self.unraid.origin = UnraidConfig::default().origin;
        }
    }

    /// Collects every problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut require = |value: &str, field: &str| {
            if value.trim().is_empty() {
                problems.push(format!("{field} 不能为空"));
            }
        };

        require(&self.wecom.corpid, "wecom.corpid");
        require(&self.wecom.secret, "wecom.secret");
        require(&self.wecom.token, "wecom.token");
        require(&self.wecom.encoding_aes_key, "wecom.encoding_aes_key");
        require(&self.wecom.api_base_url, "wecom.api_base_url");
        require(&self.unraid.endpoint, "unraid.endpoint");
        require(&self.unraid.api_key, "unraid.api_key");

        if self.wecom.agentid == 0 {
            problems.push("wecom.agentid 不能为空".to_string());
        }
        if self.auth.unique_users().is_empty() {
            problems.push("auth.allowed_userids 不能为空（仅支持白名单）".to_string());
        }
        if self.server.max_body_bytes == 0 {
            problems.push("server.max_body_bytes 必须大于 0".to_string());
        }
        // The handler deadline has to outlive the dispatch and the reply send.
        let needed = self.conversation.dispatch_timeout() + self.server.http_client_timeout();
        if self.server.handler_timeout() <= needed {
            problems.push(format!(
                "server.handler_timeout_secs 必须大于 conversation.dispatch_timeout_secs + server.http_client_timeout_secs（{}s）",
                needed.as_secs()
            ));
        }
        if self.server.socket_addr().is_err() {
            problems.push(format!(
                "server.listen_addr 不合法: {}",
                self.server.listen_addr
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}
