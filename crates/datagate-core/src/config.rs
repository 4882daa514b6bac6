//! Decoder adapter and sources file loading.
//!
//! A sources file maps source names to documents; each document carries a
//! `kind` that selects the decoder in the [`SourceRegistry`](crate::SourceRegistry):
//!
//! ```yaml
//! sources:
//!   prod-events:
//!     kind: honeycomb
//!     api_key: ${HONEYCOMB_API_KEY}
//!   audit-search:
//!     kind: splunk
//!     host: splunk.internal
//!     token: ${SPLUNK_TOKEN}
//! ```
//!
//! `${VAR}` references in string values are expanded from the environment
//! before decoding. Declaration order is preserved.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::DecodeError;

pub const KIND_KEY: &str = "kind";
pub const NAME_KEY: &str = "name";

/// Per-source decode context handed to registry decoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeContext {
    source_name: String,
}

impl DecodeContext {
    pub fn new(source_name: impl Into<String>) -> Result<Self, DecodeError> {
        let source_name = source_name.into();
        if source_name.trim().is_empty() {
            return Err(DecodeError::EmptyName);
        }
        Ok(Self { source_name })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn missing_field(&self, field: &str) -> DecodeError {
        DecodeError::MissingField {
            source_name: self.source_name.clone(),
            field: field.to_owned(),
        }
    }

    pub fn invalid_field(&self, field: &str, reason: impl Into<String>) -> DecodeError {
        DecodeError::InvalidField {
            source_name: self.source_name.clone(),
            field: field.to_owned(),
            reason: reason.into(),
        }
    }

    /// Rejects empty or whitespace-only required strings.
    pub fn require_non_empty(&self, field: &str, value: &str) -> Result<(), DecodeError> {
        if value.trim().is_empty() {
            return Err(self.missing_field(field));
        }
        Ok(())
    }
}

/// Post-deserialization constraints of a config document.
pub trait Validate {
    fn validate(&self, ctx: &DecodeContext) -> Result<(), DecodeError>;
}

/// Decodes a raw source document into `T` and validates it.
///
/// The `kind` and `name` keys are routing metadata and are removed before
/// deserialization; everything else must be a known field of `T`.
pub fn decode_document<T>(ctx: &DecodeContext, raw: Value) -> Result<T, DecodeError>
where
    T: DeserializeOwned + Validate,
{
    let Value::Mapping(mut mapping) = raw else {
        return Err(DecodeError::NotAMapping {
            source_name: ctx.source_name().to_owned(),
        });
    };
    mapping.remove(KIND_KEY);
    mapping.remove(NAME_KEY);

    let decoded: T = serde_yaml::from_value(Value::Mapping(mapping))
        .map_err(|error| classify_serde_error(ctx, &error.to_string()))?;
    decoded.validate(ctx)?;
    Ok(decoded)
}

fn classify_serde_error(ctx: &DecodeContext, message: &str) -> DecodeError {
    static MISSING_FIELD: OnceLock<Regex> = OnceLock::new();
    let pattern =
        MISSING_FIELD.get_or_init(|| Regex::new(r"missing field `([^`]+)`").expect("valid regex"));

    match pattern.captures(message).and_then(|caps| caps.get(1)) {
        Some(field) => ctx.missing_field(field.as_str()),
        None => DecodeError::Invalid {
            source_name: ctx.source_name().to_owned(),
            message: message.to_owned(),
        },
    }
}

/// Reads the `kind` discriminator from a raw document.
pub fn document_kind<'a>(ctx: &DecodeContext, raw: &'a Value) -> Result<&'a str, DecodeError> {
    let Value::Mapping(mapping) = raw else {
        return Err(DecodeError::NotAMapping {
            source_name: ctx.source_name().to_owned(),
        });
    };
    match mapping.get(KIND_KEY).and_then(Value::as_str) {
        Some(kind) if !kind.trim().is_empty() => Ok(kind),
        _ => Err(DecodeError::MissingKind {
            source_name: ctx.source_name().to_owned(),
        }),
    }
}

/// Expands `${VAR}` references in every string scalar of `value`.
///
/// # Errors
///
/// Returns the name of the first referenced variable `lookup` cannot resolve.
pub fn interpolate_env<F>(value: &mut Value, lookup: &F) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => {
            if let Some(expanded) = expand_str(text, lookup)? {
                *text = expanded;
            }
            Ok(())
        }
        Value::Sequence(items) => items
            .iter_mut()
            .try_for_each(|item| interpolate_env(item, lookup)),
        Value::Mapping(mapping) => mapping
            .iter_mut()
            .try_for_each(|(_, item)| interpolate_env(item, lookup)),
        Value::Tagged(tagged) => interpolate_env(&mut tagged.value, lookup),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

fn expand_str<F>(text: &str, lookup: &F) -> Result<Option<String>, String>
where
    F: Fn(&str) -> Option<String>,
{
    static VARIABLE: OnceLock<Regex> = OnceLock::new();
    let pattern = VARIABLE
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

    if !pattern.is_match(text) {
        return Ok(None);
    }

    let mut expanded = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let replacement = lookup(name.as_str()).ok_or_else(|| name.as_str().to_owned())?;
        expanded.push_str(&text[last..whole.start()]);
        expanded.push_str(&replacement);
        last = whole.end();
    }
    expanded.push_str(&text[last..]);
    Ok(Some(expanded))
}

/// One named, not-yet-decoded source document.
///
/// `error` holds a failure found while reading the file (an unset `${VAR}`).
/// It belongs to this entry alone; siblings are unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub name: String,
    pub document: Value,
    pub error: Option<DecodeError>,
}

impl SourceEntry {
    pub fn new(name: impl Into<String>, document: Value) -> Self {
        Self {
            name: name.into(),
            document,
            error: None,
        }
    }

    fn failed(name: String, document: Value, error: DecodeError) -> Self {
        Self {
            name,
            document,
            error: Some(error),
        }
    }

    /// The document ready for decoding, or the error recorded while reading it.
    pub fn checked_document(&self) -> Result<Value, DecodeError> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.document.clone()),
        }
    }

    /// The declared kind, if the document carries one.
    pub fn kind(&self) -> Option<&str> {
        self.document.get(KIND_KEY).and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSourcesFile {
    #[serde(default)]
    sources: Mapping,
}

/// Parsed sources file: entries in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcesFile {
    entries: Vec<SourceEntry>,
}

impl SourcesFile {
    pub fn new(entries: Vec<SourceEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| DecodeError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses a sources file, expanding `${VAR}` from the process environment.
    pub fn from_yaml_str(text: &str) -> Result<Self, DecodeError> {
        Self::from_yaml_str_with(text, &|name: &str| std::env::var(name).ok())
    }

    /// Parses a sources file, resolving `${VAR}` through `lookup`.
    ///
    /// An unresolved variable is recorded on its entry rather than failing the
    /// file. Only malformed YAML or an empty source name is fatal here.
    pub fn from_yaml_str_with<F>(text: &str, lookup: &F) -> Result<Self, DecodeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawSourcesFile =
            serde_yaml::from_str(text).map_err(|error| DecodeError::Yaml(error.to_string()))?;

        let mut entries = Vec::with_capacity(raw.sources.len());
        for (key, mut document) in raw.sources {
            let name = match key {
                Value::String(name) if !name.trim().is_empty() => name,
                _ => return Err(DecodeError::EmptyName),
            };
            let entry = match interpolate_env(&mut document, lookup) {
                Ok(()) => SourceEntry::new(name, document),
                Err(variable) => {
                    let error = DecodeError::UnsetVariable {
                        source_name: name.clone(),
                        variable,
                    };
                    SourceEntry::failed(name, document, error)
                }
            };
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for SourcesFile {
    type Item = SourceEntry;
    type IntoIter = std::vec::IntoIter<SourceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct SampleConfig {
        host: String,
        #[serde(default)]
        port: Option<u16>,
    }

    impl Validate for SampleConfig {
        fn validate(&self, ctx: &DecodeContext) -> Result<(), DecodeError> {
            ctx.require_non_empty("host", &self.host)
        }
    }

    fn ctx() -> DecodeContext {
        DecodeContext::new("sample").expect("non-empty name")
    }

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).expect("valid yaml")
    }

    #[test]
    fn empty_source_name_is_rejected() {
        assert_eq!(DecodeContext::new("  "), Err(DecodeError::EmptyName));
    }

    #[test]
    fn decode_strips_routing_keys() {
        let config: SampleConfig =
            decode_document(&ctx(), yaml("kind: sample\nname: x\nhost: db\nport: 5432"))
                .expect("decodes");

        assert_eq!(config.host, "db");
        assert_eq!(config.port, Some(5432));
    }

    #[test]
    fn missing_required_field_is_named() {
        let error = decode_document::<SampleConfig>(&ctx(), yaml("kind: sample\nport: 1"))
            .expect_err("host missing");

        assert_eq!(error, ctx().missing_field("host"));
    }

    #[test]
    fn blank_required_field_is_named() {
        let error = decode_document::<SampleConfig>(&ctx(), yaml("host: ' '"))
            .expect_err("host blank");

        assert_eq!(error, ctx().missing_field("host"));
    }

    #[test]
    fn unknown_field_is_invalid() {
        let error = decode_document::<SampleConfig>(&ctx(), yaml("host: db\nhots: typo"))
            .expect_err("unknown field");

        assert!(matches!(error, DecodeError::Invalid { .. }));
        assert!(error.to_string().contains("hots"));
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        let error = decode_document::<SampleConfig>(&ctx(), yaml("- a\n- b"))
            .expect_err("sequence");

        assert!(matches!(error, DecodeError::NotAMapping { .. }));
    }

    #[test]
    fn kind_is_required() {
        assert_eq!(document_kind(&ctx(), &yaml("kind: http")), Ok("http"));
        assert!(matches!(
            document_kind(&ctx(), &yaml("host: db")),
            Err(DecodeError::MissingKind { .. })
        ));
    }

    #[test]
    fn interpolation_expands_nested_strings() {
        let mut value = yaml("a: ${TOKEN}\nb: [\"x-${HOST}-y\", 3]\nc: plain");
        let lookup = |name: &str| match name {
            "TOKEN" => Some(String::from("t0k")),
            "HOST" => Some(String::from("db")),
            _ => None,
        };

        interpolate_env(&mut value, &lookup).expect("all variables set");

        assert_eq!(value["a"].as_str(), Some("t0k"));
        assert_eq!(value["b"][0].as_str(), Some("x-db-y"));
        assert_eq!(value["c"].as_str(), Some("plain"));
    }

    #[test]
    fn sources_file_preserves_order_and_reports_unset_variables() {
        let text = "sources:\n  zeta:\n    kind: http\n  alpha:\n    kind: http\n    token: ${MISSING}\n";

        let unresolved = SourcesFile::from_yaml_str_with(text, &|_: &str| None)
            .expect("unset variables stay on their entry");
        assert_eq!(unresolved.entries()[0].error, None);
        assert_eq!(
            unresolved.entries()[1].checked_document(),
            Err(DecodeError::UnsetVariable {
                source_name: String::from("alpha"),
                variable: String::from("MISSING"),
            })
        );

        let file = SourcesFile::from_yaml_str_with(text, &|_: &str| Some(String::from("v")))
            .expect("resolves");
        let names: Vec<_> = file.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(file.entries()[1].kind(), Some("http"));
    }

    #[test]
    fn unknown_top_level_key_is_a_yaml_error() {
        let error = SourcesFile::from_yaml_str("sauces: {}").expect_err("typo");

        assert!(matches!(error, DecodeError::Yaml(_)));
    }
}
