use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// Filter used when `RUST_LOG` is unset.
    pub default_level: String,
    pub json_logs: bool,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        let service_name =
            env::var("SERVICE_NAME").unwrap_or_else(|_| default_service_name.to_string());
        let service_version = env::var("SERVICE_VERSION")
            .unwrap_or_else(|_| default_service_version.to_string());
        let json_logs = env::var("LOG_FORMAT")
            .map(|v| parse_json_logs(&v))
            .unwrap_or(true);

        Self {
            service_name,
            service_version,
            default_level: "info".to_string(),
            json_logs,
        }
    }

    /// Overrides the fallback filter, typically from the `log.level` setting.
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        let level = level.into();
        if !level.trim().is_empty() {
            self.default_level = level.trim().to_lowercase();
        }
        self
    }
}

fn parse_json_logs(value: &str) -> bool {
    !matches!(value.to_lowercase().as_str(), "text" | "pretty" | "plain")
}
