//! WeCom application messaging client.
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cards::{ButtonStyle, InteractiveCard};
use crate::credential::{CredentialCache, FetchedToken, TokenFetcher};
use crate::interfaces::MessageSender;
use crate::platforms::build_url;

pub const DEFAULT_API_BASE_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin";

/// Error codes meaning the access token was rejected.
const TOKEN_REJECTED_CODES: &[i64] = &[40014, 42001];

#[derive(Debug, Clone)]
pub struct WeComClientConfig {
    pub api_base_url: String,
    pub corp_id: String,
    pub agent_id: i64,
    pub secret: String,
}

pub struct WeComClient {
    http: reqwest::Client,
    config: WeComClientConfig,
    tokens: CredentialCache,
}

impl WeComClient {
    pub fn new(config: WeComClientConfig, http: reqwest::Client) -> Self {
        let fetcher = GetTokenFetcher {
            http: http.clone(),
            config: config.clone(),
        };
        Self {
            http,
            config,
            tokens: CredentialCache::new("wecom", Arc::new(fetcher)),
        }
    }

    async fn send_message(&self, request: &SendRequest<'_>) -> Result<()> {
        let token = self.tokens.get_token().await?;
        let url = Url::parse_with_params(
            &build_url(&self.config.api_base_url, "message/send"),
            &[("access_token", token.as_str())],
        )
        .context("build wecom message/send url")?;

        let status: ApiStatus = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .context("wecom message/send request failed")?
            .json()
            .await
            .context("decode wecom message/send response")?;

        if status.errcode != 0 {
            if TOKEN_REJECTED_CODES.contains(&status.errcode) {
                self.tokens.invalidate();
            }
            bail!("wecom api error: {} {}", status.errcode, status.errmsg);
        }
        debug!(to = request.touser, msgtype = request.msgtype, "wecom message sent");
        Ok(())
    }
}

#[async_trait]
impl MessageSender for WeComClient {
    async fn send_text(&self, to: &str, content: &str) -> Result<()> {
        let request = SendRequest {
            touser: to,
            msgtype: "text",
            agentid: self.config.agent_id,
            text: Some(TextBody { content }),
            template_card: None,
        };
        self.send_message(&request).await
    }

    async fn send_card(&self, to: &str, card: &InteractiveCard) -> Result<()> {
        let task_id = card.task_id.clone().unwrap_or_else(generate_task_id);
        let request = SendRequest {
            touser: to,
            msgtype: "template_card",
            agentid: self.config.agent_id,
            text: None,
            template_card: Some(TemplateCardBody::from_card(card, task_id)),
        };
        self.send_message(&request).await
    }
}

fn generate_task_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("hops-{nanos}")
}

struct GetTokenFetcher {
    http: reqwest::Client,
    config: WeComClientConfig,
}

#[async_trait]
impl TokenFetcher for GetTokenFetcher {
    async fn fetch_token(&self) -> Result<FetchedToken> {
        let url = Url::parse_with_params(
            &build_url(&self.config.api_base_url, "gettoken"),
            &[
                ("corpid", self.config.corp_id.as_str()),
                ("corpsecret", self.config.secret.as_str()),
            ],
        )
        .context("build wecom gettoken url")?;

        let body: TokenResponse = self
            .http
            .get(url)
            .send()
            .await
            .context("wecom gettoken request failed")?
            .json()
            .await
            .context("decode wecom gettoken response")?;

        if body.errcode != 0 {
            return Err(anyhow!(
                "wecom gettoken error: {} {}",
                body.errcode,
                body.errmsg
            ));
        }
        Ok(FetchedToken {
            token: body.access_token,
            expires_in: Duration::from_secs(body.expires_in),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiStatus {
    errcode: i64,
    errmsg: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenResponse {
    errcode: i64,
    errmsg: String,
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    touser: &'a str,
    msgtype: &'static str,
    agentid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_card: Option<TemplateCardBody<'a>>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct TemplateCardBody<'a> {
    card_type: &'static str,
    main_title: MainTitle<'a>,
    button_list: Vec<ButtonBody<'a>>,
    task_id: String,
}

#[derive(Debug, Serialize)]
struct MainTitle<'a> {
    title: &'a str,
    desc: &'a str,
}

#[derive(Debug, Serialize)]
struct ButtonBody<'a> {
    text: &'a str,
    style: ButtonStyle,
    key: &'a str,
}

impl<'a> TemplateCardBody<'a> {
    fn from_card(card: &'a InteractiveCard, task_id: String) -> Self {
        Self {
            card_type: "button_interaction",
            main_title: MainTitle {
                title: &card.title,
                desc: &card.description,
            },
            button_list: card
                .buttons
                .iter()
                .map(|button| ButtonBody {
                    text: &button.label,
                    style: button.style,
                    key: &button.key,
                })
                .collect(),
            task_id,
        }
    }
}
