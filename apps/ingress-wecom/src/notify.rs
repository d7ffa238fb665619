//! Startup notification sent to the allow-listed users.
use std::time::Duration;

use anyhow::{Context, Result};
use hops_core::MessageSender;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::callback::CALLBACK_PATH;

pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Facts about the running process included in the startup message.
#[derive(Debug, Clone)]
pub struct StartupInfo {
    pub version: String,
    pub config_path: String,
    pub listen_addr: String,
    pub base_url: String,
    pub backend: String,
    pub elapsed: Duration,
    pub started_at: OffsetDateTime,
}

impl StartupInfo {
    pub fn render(&self) -> String {
        let started_at = self
            .started_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.started_at.unix_timestamp().to_string());
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into());

        let mut lines = vec![
            "hops 已启动".to_string(),
            format!("时间：{started_at}"),
            format!("耗时：{}ms", self.elapsed.as_millis()),
            format!("主机：{host}"),
            format!("PID：{}", std::process::id()),
            format!("版本：{}", self.version),
            format!("配置：{}", self.config_path),
            format!("监听：{}", self.listen_addr),
        ];
        let base = self.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            lines.push(format!("回调：{CALLBACK_PATH}"));
            lines.push("健康检查：/healthz".to_string());
        } else {
            lines.push(format!("回调：{base}{CALLBACK_PATH}"));
            lines.push(format!("健康检查：{base}/healthz"));
        }
        lines.push(format!("后端：{}", self.backend));
        lines.join("\n")
    }
}

/// Sends `info` to every user in one call, bounded by [`NOTIFY_TIMEOUT`].
pub async fn notify_startup(
    sender: &dyn MessageSender,
    users: &[String],
    info: &StartupInfo,
) -> Result<()> {
    if users.is_empty() {
        return Ok(());
    }
    let to = users.join("|");
    let content = info.render();
    tokio::time::timeout(NOTIFY_TIMEOUT, sender.send_text(&to, &content))
        .await
        .context("startup notification timed out")?
        .context("send startup notification")?;
    info!(recipients = users.len(), "startup notification sent");
    Ok(())
}

/// Fire-and-forget wrapper; failures are only logged.
pub fn spawn_startup_notification(
    sender: std::sync::Arc<dyn MessageSender>,
    users: Vec<String>,
    info: StartupInfo,
) {
    tokio::spawn(async move {
        if let Err(err) = notify_startup(sender.as_ref(), &users, &info).await {
            warn!(error = %format!("{err:#}"), "startup notification failed");
        }
    });
}
