use std::collections::{BTreeMap, BTreeSet};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};

use super::schema::{Discovery, FieldMeta, MutationMeta, discover_force_update};

/// Number of known container names quoted in a not-found error.
const MAX_SUGGESTIONS: usize = 10;
/// Bytes of a non-2xx response body kept for the error message.
const MAX_ERROR_BODY: usize = 4 << 10;

const LIST_CONTAINERS: &str = "query { docker { containers { id names state status } } }";
const STOP_CONTAINER: &str =
    "mutation Stop($dockerId: PrefixedID!) { docker { stop(id: $dockerId) { id state status } } }";
const START_CONTAINER: &str =
    "mutation Start($dockerId: PrefixedID!) { docker { start(id: $dockerId) { id state status } } }";
const MUTATION_TYPE: &str = "query { __schema { mutationType { fields { name type { name kind ofType { name kind ofType { name kind } } } } } } }";
const TYPE_FIELDS: &str = "query($name: String!) { __type(name: $name) { fields { name args { name type { kind name ofType { kind name ofType { kind name ofType { kind name } } } } } type { kind name ofType { kind name ofType { kind name ofType { kind name } } } } } } }";

#[derive(Debug, Clone)]
pub struct UnraidClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub origin: Option<String>,
    pub force_update_mutation: Option<String>,
}

#[derive(Debug, Error)]
pub enum UnraidError {
    #[error("unraid graphql transport error")]
    Transport(#[from] reqwest::Error),
    #[error("unraid graphql http status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("graphql error: {}", .0.join("; "))]
    GraphQl(Vec<String>),
    #[error("unraid graphql response decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("未找到容器：{name}{}", suggestions(.candidates))]
    ContainerNotFound {
        name: String,
        candidates: Vec<String>,
    },
    #[error("当前 Unraid GraphQL API 未发现可用的“强制更新”mutation")]
    ForceUpdateUnsupported,
    #[error("未找到配置的 unraid.force_update_mutation: {0}")]
    ConfiguredMutationMissing(String),
    #[error("unraid.force_update_mutation 参数不支持 id/dockerId: {0}")]
    ConfiguredMutationArgs(String),
}

fn suggestions(candidates: &[String]) -> String {
    if candidates.is_empty() {
        String::new()
    } else {
        format!("（可选容器示例：{}）", candidates.join(", "))
    }
}

impl UnraidError {
    fn mentions(&self, words: &[&str]) -> bool {
        match self {
            UnraidError::GraphQl(messages) => messages
                .iter()
                .any(|msg| words.iter().all(|word| msg.contains(word))),
            _ => false,
        }
    }

    fn is_already_stopped(&self) -> bool {
        self.mentions(&["already", "stopped"])
    }

    fn is_already_started(&self) -> bool {
        self.mentions(&["already", "started"])
    }
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<Value>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Deserialize)]
struct GraphQlErrorEntry {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ContainersData {
    docker: ContainerList,
}

#[derive(Deserialize)]
struct ContainerList {
    #[serde(default)]
    containers: Vec<ContainerSummary>,
}

#[derive(Deserialize)]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Value,
}

#[derive(Deserialize)]
struct SchemaData {
    #[serde(rename = "__schema")]
    schema: SchemaRoot,
}

#[derive(Deserialize)]
struct SchemaRoot {
    #[serde(rename = "mutationType")]
    mutation_type: Option<FieldList>,
}

#[derive(Deserialize)]
struct TypeData {
    #[serde(rename = "__type")]
    ty: Option<FieldList>,
}

#[derive(Deserialize)]
struct FieldList {
    #[serde(default)]
    fields: Option<Vec<FieldMeta>>,
}

/// Unraid Connect GraphQL client for container lifecycle operations.
pub struct UnraidClient {
    http: reqwest::Client,
    config: UnraidClientConfig,
}

impl UnraidClient {
    pub fn new(config: UnraidClientConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    /// Stops then starts the container; already stopped/started is not an error.
    #[instrument(name = "unraid.restart", skip(self))]
    pub async fn restart_container(&self, name: &str) -> Result<(), UnraidError> {
        let id = self.find_container_id(name).await?;
        match self.stop(&id).await {
            Err(err) if !err.is_already_stopped() => return Err(err),
            _ => {}
        }
        match self.start(&id).await {
            Err(err) if !err.is_already_started() => Err(err),
            _ => Ok(()),
        }
    }

    #[instrument(name = "unraid.stop", skip(self))]
    pub async fn stop_container(&self, name: &str) -> Result<(), UnraidError> {
        let id = self.find_container_id(name).await?;
        match self.stop(&id).await {
            Err(err) if !err.is_already_stopped() => Err(err),
            _ => Ok(()),
        }
    }

    /// Calls the update mutation discovered through schema introspection.
    #[instrument(name = "unraid.force_update", skip(self))]
    pub async fn force_update_container(&self, name: &str) -> Result<(), UnraidError> {
        let id = self.find_container_id(name).await?;
        let meta = self.detect_force_update().await?;
        debug!(field = %meta.field, arg = %meta.arg_name, "using force update mutation");
        self.execute::<Value>(&meta.render_query(), Some(json!({ "v": id })))
            .await?;
        Ok(())
    }

    async fn find_container_id(&self, name: &str) -> Result<String, UnraidError> {
        let data: ContainersData = self.execute(LIST_CONTAINERS, None).await?;
        let wanted = normalize_name(name);
        let mut known = BTreeSet::new();
        for container in data.docker.containers {
            for candidate in container_names(&container.names) {
                let candidate = normalize_name(&candidate);
                if candidate == wanted {
                    return Ok(strip_id_prefix(&container.id).to_string());
                }
                if !candidate.is_empty() {
                    known.insert(candidate);
                }
            }
        }
        Err(UnraidError::ContainerNotFound {
            name: name.to_string(),
            candidates: known.into_iter().take(MAX_SUGGESTIONS).collect(),
        })
    }

    async fn stop(&self, id: &str) -> Result<(), UnraidError> {
        self.execute::<Value>(STOP_CONTAINER, Some(json!({ "dockerId": id })))
            .await
            .map(|_| ())
    }

    async fn start(&self, id: &str) -> Result<(), UnraidError> {
        self.execute::<Value>(START_CONTAINER, Some(json!({ "dockerId": id })))
            .await
            .map(|_| ())
    }

    async fn detect_force_update(&self) -> Result<MutationMeta, UnraidError> {
        let schema: SchemaData = self.execute(MUTATION_TYPE, None).await?;
        let docker_type = schema
            .schema
            .mutation_type
            .and_then(|mutation| mutation.fields)
            .unwrap_or_default()
            .into_iter()
            .find(|field| field.name == "docker")
            .and_then(|field| field.ty.named_type().map(str::to_string))
            .ok_or(UnraidError::ForceUpdateUnsupported)?;

        let data: TypeData = self
            .execute(TYPE_FIELDS, Some(json!({ "name": docker_type })))
            .await?;
        let fields: BTreeMap<String, FieldMeta> = data
            .ty
            .and_then(|ty| ty.fields)
            .unwrap_or_default()
            .into_iter()
            .filter(|field| !field.name.is_empty())
            .map(|field| (field.name.clone(), field))
            .collect();

        match discover_force_update(&fields, self.config.force_update_mutation.as_deref()) {
            Discovery::Found(meta) => Ok(meta),
            Discovery::NotFound => Err(UnraidError::ForceUpdateUnsupported),
            Discovery::ConfiguredMissing(name) => Err(UnraidError::ConfiguredMutationMissing(name)),
            Discovery::ConfiguredWithoutIdArg(name) => {
                Err(UnraidError::ConfiguredMutationArgs(name))
            }
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Option<Value>,
    ) -> Result<T, UnraidError> {
        let mut request = self
            .http
            .post(&self.config.endpoint)
            .header("x-api-key", &self.config.api_key)
            .json(&GraphQlRequest { query, variables });
        if let Some(origin) = self.config.origin.as_deref().filter(|o| !o.is_empty()) {
            request = request.header(reqwest::header::ORIGIN, origin);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UnraidError::Status {
                status,
                body: truncate(body.trim(), MAX_ERROR_BODY).to_string(),
            });
        }

        let envelope: GraphQlResponse = serde_json::from_slice(&response.bytes().await?)?;
        if !envelope.errors.is_empty() {
            let mut messages: Vec<String> = envelope
                .errors
                .into_iter()
                .map(|entry| entry.message)
                .filter(|message| !message.is_empty())
                .collect();
            if messages.is_empty() {
                messages.push("unknown error".to_string());
            }
            return Err(UnraidError::GraphQl(messages));
        }
        Ok(serde_json::from_value(envelope.data.unwrap_or(Value::Null))?)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn normalize_name(name: &str) -> String {
    let name = name.trim();
    name.strip_prefix('/').unwrap_or(name).to_string()
}

/// `names` is a list on current servers and a bare string on older ones.
fn container_names(value: &Value) -> Vec<String> {
    match value {
        Value::String(name) => vec![name.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Reduces a `server:id` prefixed id to the container id.
fn strip_id_prefix(id: &str) -> &str {
    id.split_once(':').map(|(_, rest)| rest).unwrap_or(id)
}
