//! GraphQL introspection helpers used to locate the container update mutation.
use std::collections::BTreeMap;

use serde::Deserialize;

/// Well-known names tried, in order, before falling back to a keyword scan.
const FORCE_UPDATE_CANDIDATES: &[&str] = &[
    "forceUpdate",
    "forceUpdateDocker",
    "force_update",
    "update",
    "updateContainer",
    "updateDocker",
    "update_container",
    "recreate",
    "pull",
];

const FORCE_UPDATE_KEYWORDS: &[&str] = &["update", "pull", "recreate"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeRef {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "ofType", default)]
    pub of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    /// Renders the reference in GraphQL variable-declaration syntax.
    pub fn render(&self) -> String {
        match self.kind.as_str() {
            "NON_NULL" => match &self.of_type {
                Some(inner) => format!("{}!", inner.render()),
                None => "String!".to_string(),
            },
            "LIST" => match &self.of_type {
                Some(inner) => format!("[{}]", inner.render()),
                None => "[String]".to_string(),
            },
            _ => match (&self.name, &self.of_type) {
                (Some(name), _) if !name.is_empty() => name.clone(),
                (_, Some(inner)) => inner.render(),
                _ => "String".to_string(),
            },
        }
    }

    /// First concrete type name found while unwrapping wrappers.
    pub fn named_type(&self) -> Option<&str> {
        match &self.name {
            Some(name) if !name.is_empty() => Some(name),
            _ => self.of_type.as_deref().and_then(TypeRef::named_type),
        }
    }

    pub fn requires_selection(&self) -> bool {
        matches!(self.base_kind(), "OBJECT" | "INTERFACE" | "UNION")
    }

    fn base_kind(&self) -> &str {
        match (self.kind.as_str(), &self.of_type) {
            ("NON_NULL" | "LIST", Some(inner)) => inner.base_kind(),
            (kind, _) => kind,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArgMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ArgMeta>,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

/// Everything needed to render the update mutation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationMeta {
    pub field: String,
    pub arg_name: String,
    pub arg_type: String,
    pub needs_selection: bool,
}

impl MutationMeta {
    fn from_field(field: &FieldMeta) -> Option<Self> {
        let (arg_name, arg_type) = pick_id_arg(&field.args)?;
        Some(Self {
            field: field.name.clone(),
            arg_name,
            arg_type,
            needs_selection: field.ty.requires_selection(),
        })
    }

    pub fn render_query(&self) -> String {
        let selection = if self.needs_selection {
            " { __typename }"
        } else {
            ""
        };
        format!(
            "mutation ForceUpdate($v: {}) {{ docker {{ {}({}: $v){} }} }}",
            self.arg_type, self.field, self.arg_name, selection
        )
    }
}

/// Picks the argument that carries the container id: `id`, then `dockerId`,
/// then the only argument when there is exactly one.
pub fn pick_id_arg(args: &[ArgMeta]) -> Option<(String, String)> {
    let by_name = |wanted: &str| args.iter().find(|arg| arg.name == wanted);
    let arg = by_name("id")
        .or_else(|| by_name("dockerId"))
        .or_else(|| if args.len() == 1 { args.first() } else { None })?;
    Some((arg.name.clone(), arg.ty.render()))
}

#[derive(Debug, PartialEq, Eq)]
pub enum Discovery {
    Found(MutationMeta),
    NotFound,
    ConfiguredMissing(String),
    ConfiguredWithoutIdArg(String),
}

/// Chooses the update mutation among the fields of the docker mutation type.
pub fn discover_force_update(
    fields: &BTreeMap<String, FieldMeta>,
    configured: Option<&str>,
) -> Discovery {
    if let Some(name) = configured.filter(|name| !name.is_empty()) {
        let Some(field) = fields.get(name) else {
            return Discovery::ConfiguredMissing(name.to_string());
        };
        return match MutationMeta::from_field(field) {
            Some(meta) => Discovery::Found(meta),
            None => Discovery::ConfiguredWithoutIdArg(name.to_string()),
        };
    }

    let by_candidate = FORCE_UPDATE_CANDIDATES
        .iter()
        .filter_map(|name| fields.get(*name))
        .find_map(MutationMeta::from_field);
    if let Some(meta) = by_candidate {
        return Discovery::Found(meta);
    }

    // BTreeMap iteration keeps the keyword scan deterministic.
    fields
        .values()
        .filter(|field| {
            let lower = field.name.to_lowercase();
            FORCE_UPDATE_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .find_map(MutationMeta::from_field)
        .map(Discovery::Found)
        .unwrap_or(Discovery::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: serde_json::Value) -> (String, FieldMeta) {
        let meta: FieldMeta = serde_json::from_value(value).unwrap();
        (meta.name.clone(), meta)
    }

    fn prefixed_id_arg(name: &str) -> serde_json::Value {
        json!({"name": name, "type": {"kind": "NON_NULL", "name": null, "ofType": {"kind": "SCALAR", "name": "PrefixedID"}}})
    }

    #[test]
    fn renders_wrapped_types() {
        let ty: TypeRef = serde_json::from_value(json!({
            "kind": "NON_NULL", "name": null,
            "ofType": {"kind": "LIST", "name": null, "ofType": {"kind": "SCALAR", "name": "ID"}}
        }))
        .unwrap();
        assert_eq!(ty.render(), "[ID]!");
        assert_eq!(ty.named_type(), Some("ID"));
        assert!(!ty.requires_selection());
    }

    #[test]
    fn prefers_configured_mutation() {
        let fields: BTreeMap<_, _> = [
            field(json!({"name": "update", "args": [prefixed_id_arg("id")], "type": {"kind": "OBJECT", "name": "DockerContainer"}})),
            field(json!({"name": "rebuild", "args": [prefixed_id_arg("dockerId")], "type": {"kind": "SCALAR", "name": "Boolean"}})),
        ]
        .into_iter()
        .collect();

        let Discovery::Found(meta) = discover_force_update(&fields, Some("rebuild")) else {
            panic!("configured mutation should be used");
        };
        assert_eq!(meta.field, "rebuild");
        assert_eq!(meta.arg_name, "dockerId");
        assert!(!meta.needs_selection);

        assert_eq!(
            discover_force_update(&fields, Some("missing")),
            Discovery::ConfiguredMissing("missing".into())
        );
    }

    #[test]
    fn falls_back_to_candidates_then_keywords() {
        let fields: BTreeMap<_, _> = [
            field(json!({"name": "start", "args": [prefixed_id_arg("id")], "type": {"kind": "OBJECT", "name": "DockerContainer"}})),
            field(json!({"name": "updateContainer", "args": [prefixed_id_arg("id")], "type": {"kind": "OBJECT", "name": "DockerContainer"}})),
        ]
        .into_iter()
        .collect();
        let Discovery::Found(meta) = discover_force_update(&fields, None) else {
            panic!("candidate should match");
        };
        assert_eq!(meta.field, "updateContainer");
        assert_eq!(
            meta.render_query(),
            "mutation ForceUpdate($v: PrefixedID!) { docker { updateContainer(id: $v) { __typename } } }"
        );

        let fields: BTreeMap<_, _> = [field(json!({
            "name": "pullImage", "args": [prefixed_id_arg("container")], "type": {"kind": "SCALAR", "name": "Boolean"}
        }))]
        .into_iter()
        .collect();
        let Discovery::Found(meta) = discover_force_update(&fields, None) else {
            panic!("keyword scan should match");
        };
        assert_eq!(meta.field, "pullImage");
        assert_eq!(meta.arg_name, "container");

        let fields: BTreeMap<_, _> = [field(json!({
            "name": "start", "args": [prefixed_id_arg("id")], "type": {"kind": "OBJECT", "name": "DockerContainer"}
        }))]
        .into_iter()
        .collect();
        assert_eq!(discover_force_update(&fields, None), Discovery::NotFound);
    }

    #[test]
    fn id_arg_needs_a_known_name_or_a_single_argument() {
        let args: Vec<ArgMeta> = serde_json::from_value(json!([
            {"name": "force", "type": {"kind": "SCALAR", "name": "Boolean"}},
            {"name": "target", "type": {"kind": "SCALAR", "name": "String"}}
        ]))
        .unwrap();
        assert_eq!(pick_id_arg(&args), None);
    }
}
