//! Callback transport for the WeCom "receive messages" URL.
//!
//! `GET` answers the URL verification handshake by echoing the decrypted
//! `echostr`. `POST` authenticates and decrypts one delivery, drops
//! redeliveries, and hands the decoded message to the configured handler.
//! Once a delivery decrypts it is always acknowledged with `success`, even if
//! the handler fails, so the platform does not retry it.

use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::CONTENT_LENGTH},
    response::{IntoResponse, Response},
};
use hops_core::{DecodedMessage, SharedHandler};
use hops_idempotency::{IdKey, IdempotencyGuard};
use http_body_util::LengthLimitError;
use security::{CryptoError, EnvelopeCrypto};
use serde::Deserialize;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const CALLBACK_PATH: &str = "/wecom/callback";
pub const SUCCESS_BODY: &str = "success";

/// Shared state behind both callback routes.
#[derive(Clone)]
pub struct CallbackState {
    crypto: Arc<EnvelopeCrypto>,
    guard: IdempotencyGuard,
    handler: SharedHandler,
    max_body_bytes: usize,
    handler_timeout: Duration,
}

impl CallbackState {
    pub fn new(
        crypto: Arc<EnvelopeCrypto>,
        guard: IdempotencyGuard,
        handler: SharedHandler,
        max_body_bytes: usize,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            crypto,
            guard,
            handler,
            max_body_bytes: max_body_bytes.max(1),
            handler_timeout,
        }
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallbackQuery {
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub echostr: String,
}

impl CallbackQuery {
    /// Strips surrounding whitespace before any signature check.
    pub fn trimmed(self) -> Self {
        Self {
            msg_signature: self.msg_signature.trim().to_string(),
            timestamp: self.timestamp.trim().to_string(),
            nonce: self.nonce.trim().to_string(),
            echostr: self.echostr.trim().to_string(),
        }
    }
}

/// Outer delivery envelope; only the ciphertext is needed.
#[derive(Debug, Deserialize)]
struct EncryptedEnvelope {
    #[serde(rename = "ToUserName", default)]
    to_user_name: String,
    #[serde(rename = "Encrypt", default)]
    encrypt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    BodyTooLarge,
    BodyUnreadable,
    MalformedEnvelope,
    MissingCiphertext,
    BadSignature,
    Decrypt(&'static str),
    MalformedMessage,
}

impl Rejection {
    fn status(self) -> StatusCode {
        match self {
            Rejection::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::BadSignature | Rejection::Decrypt(_) => StatusCode::FORBIDDEN,
            Rejection::BodyUnreadable
            | Rejection::MalformedEnvelope
            | Rejection::MissingCiphertext
            | Rejection::MalformedMessage => StatusCode::BAD_REQUEST,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Rejection::BodyTooLarge => "body_too_large",
            Rejection::BodyUnreadable => "body_unreadable",
            Rejection::MalformedEnvelope => "malformed_envelope",
            Rejection::MissingCiphertext => "missing_ciphertext",
            Rejection::BadSignature => "bad_signature",
            Rejection::Decrypt(kind) => kind,
            Rejection::MalformedMessage => "malformed_message",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        metrics::counter!("wecom_callback_rejected_total", "reason" => self.reason())
            .increment(1);
        self.status().into_response()
    }
}

/// URL verification handshake.
pub async fn verify_url(
    State(state): State<CallbackState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let query = query.trimmed();
    if !state.crypto.verify_signature(
        &query.msg_signature,
        &query.timestamp,
        &query.nonce,
        &query.echostr,
    ) {
        warn!(
            timestamp = %query.timestamp,
            nonce = %query.nonce,
            msg_signature_len = query.msg_signature.len(),
            echostr_len = query.echostr.len(),
            "verify url signature mismatch"
        );
        return Rejection::BadSignature.into_response();
    }

    match state.crypto.decrypt(&query.echostr) {
        Ok(plain) => {
            info!(plain_len = plain.len(), "verify url ok");
            (StatusCode::OK, plain).into_response()
        }
        Err(err) => {
            warn!(
                error = %err,
                timestamp = %query.timestamp,
                nonce = %query.nonce,
                echostr_len = query.echostr.len(),
                "verify url decrypt failed"
            );
            Rejection::Decrypt(err.kind()).into_response()
        }
    }
}

/// Message delivery.
pub async fn deliver(
    State(state): State<CallbackState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let query = query.trimmed();
    let span = info_span!(
        "wecom.callback",
        timestamp = %query.timestamp,
        nonce = %query.nonce,
        user_id = tracing::field::Empty,
    );
    async move {
        match process_delivery(&state, &query, &headers, body).await {
            Ok(()) => (StatusCode::OK, SUCCESS_BODY).into_response(),
            Err(rejection) => rejection.into_response(),
        }
    }
    .instrument(span)
    .await
}

async fn process_delivery(
    state: &CallbackState,
    query: &CallbackQuery,
    headers: &HeaderMap,
    body: Body,
) -> Result<(), Rejection> {
    let body = read_capped(headers, body, state.max_body_bytes).await?;

    let envelope: EncryptedEnvelope = std::str::from_utf8(&body)
        .ok()
        .and_then(|raw| quick_xml::de::from_str(raw).ok())
        .ok_or_else(|| {
            warn!(body_len = body.len(), "malformed callback envelope");
            Rejection::MalformedEnvelope
        })?;
    let encrypted = envelope.encrypt.trim();
    if encrypted.is_empty() {
        warn!(body_len = body.len(), "callback envelope without ciphertext");
        return Err(Rejection::MissingCiphertext);
    }

    if !state.crypto.verify_signature(
        &query.msg_signature,
        &query.timestamp,
        &query.nonce,
        encrypted,
    ) {
        warn!(
            msg_signature_len = query.msg_signature.len(),
            encrypt_len = encrypted.len(),
            body_len = body.len(),
            "callback signature mismatch"
        );
        return Err(Rejection::BadSignature);
    }

    let plaintext = state.crypto.decrypt(encrypted).map_err(|err| {
        log_decrypt_failure(&err, encrypted.len(), body.len());
        Rejection::Decrypt(err.kind())
    })?;

    let message = DecodedMessage::from_xml(&plaintext).map_err(|err| {
        warn!(error = %err, plain_len = plaintext.len(), "malformed callback message");
        Rejection::MalformedMessage
    })?;
    tracing::Span::current().record("user_id", message.sender.as_str());
    debug!(
        to_user = %envelope.to_user_name,
        kind = message.kind.as_str(),
        plain_len = plaintext.len(),
        "callback decrypted"
    );

    let key = IdKey::derive(&message, &plaintext);
    if !state.guard.should_process(&key) {
        metrics::counter!("wecom_callback_duplicate_total").increment(1);
        return Ok(());
    }

    dispatch(state, message).await;
    Ok(())
}

async fn dispatch(state: &CallbackState, message: DecodedMessage) {
    let handled = tokio::time::timeout(
        state.handler_timeout,
        state.handler.handle_message(message),
    )
    .await;
    match handled {
        Ok(Ok(())) => {
            metrics::counter!("wecom_callback_handled_total").increment(1);
        }
        Ok(Err(err)) => {
            error!(error = %format!("{err:#}"), "message handler failed");
        }
        Err(_) => {
            error!(
                timeout_ms = state.handler_timeout.as_millis() as u64,
                "message handler timed out"
            );
        }
    }
}

fn log_decrypt_failure(err: &CryptoError, encrypt_len: usize, body_len: usize) {
    warn!(
        error = %err,
        kind = err.kind(),
        encrypt_len,
        body_len,
        "callback decrypt failed"
    );
}

/// Reads at most `limit` bytes. A declared length over the cap is rejected
/// before any of the body is read.
async fn read_capped(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, Rejection> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        warn!(declared, limit, "callback body over limit");
        return Err(Rejection::BodyTooLarge);
    }

    axum::body::to_bytes(body, limit).await.map_err(|err| {
        if is_length_limit(&err) {
            warn!(limit, "callback body over limit");
            Rejection::BodyTooLarge
        } else {
            warn!(error = %err, "callback body unreadable");
            Rejection::BodyUnreadable
        }
    })
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if inner.is::<LengthLimitError>() {
            return true;
        }
        source = inner.source();
    }
    false
}
