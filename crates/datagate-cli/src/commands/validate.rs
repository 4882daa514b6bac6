use datagate_core::{decode_all, SourceRegistry, SourcesFile};
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct ValidSource {
    name: String,
    kind: String,
    config: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ValidateResponseData {
    valid: Vec<ValidSource>,
}

pub fn run(registry: &SourceRegistry, file: &SourcesFile) -> Result<CommandResult, CliError> {
    let report = decode_all(registry, file);

    let valid = report
        .configs
        .iter()
        .map(|config| ValidSource {
            name: config.name().to_owned(),
            kind: config.kind().to_owned(),
            config: redact(config.to_document()),
        })
        .collect();

    let data = serde_json::to_value(ValidateResponseData { valid })?;
    Ok(CommandResult::ok(data).with_failures(&report.failures))
}

const SECRET_FIELDS: [&str; 4] = ["api_key", "token", "bearer_token", "password"];
const MASK: &str = "***";

/// Masks secret fields at any depth, and every value under `headers`.
fn redact(mut document: serde_json::Value) -> serde_json::Value {
    redact_in_place(&mut document);
    document
}

fn redact_in_place(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if SECRET_FIELDS.contains(&key.as_str()) {
                    *item = serde_json::Value::String(String::from(MASK));
                } else if key == "headers" {
                    mask_values(item);
                } else {
                    redact_in_place(item);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact_in_place),
        _ => {}
    }
}

fn mask_values(headers: &mut serde_json::Value) {
    if let Some(map) = headers.as_object_mut() {
        for value in map.values_mut() {
            *value = serde_json::Value::String(String::from(MASK));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_masked_in_output() {
        let redacted = redact(serde_json::json!({
            "kind": "splunk",
            "host": "splunk.internal",
            "token": "abc"
        }));

        assert_eq!(redacted["token"], "***");
        assert_eq!(redacted["host"], "splunk.internal");
    }

    #[test]
    fn header_values_are_masked_in_output() {
        let registry = SourceRegistry::builtin().expect("registry");
        let file = SourcesFile::from_yaml_str(
            "sources:\n  api:\n    kind: http\n    base_url: https://a.test\n    headers:\n      X-Api-Key: hunter2\n      Authorization: Basic czNjcjN0\n",
        )
        .expect("file");

        let result = run(&registry, &file).expect("validated");
        let rendered = result.data.to_string();

        assert!(!rendered.contains("hunter2"), "{rendered}");
        assert!(!rendered.contains("czNjcjN0"), "{rendered}");
        let headers = &result.data["valid"][0]["config"]["headers"];
        assert_eq!(headers["X-Api-Key"], "***");
        assert_eq!(headers["Authorization"], "***");
        assert_eq!(result.data["valid"][0]["config"]["base_url"], "https://a.test");
    }

    #[test]
    fn nested_secret_fields_are_masked() {
        let redacted = redact(serde_json::json!({
            "kind": "custom",
            "auth": { "password": "pw", "user": "ops" }
        }));

        assert_eq!(redacted["auth"]["password"], "***");
        assert_eq!(redacted["auth"]["user"], "ops");
    }

    #[test]
    fn invalid_entries_become_failures() {
        let registry = SourceRegistry::builtin().expect("registry");
        let file = SourcesFile::from_yaml_str(
            "sources:\n  api:\n    kind: http\n    base_url: https://a.test\n  bad:\n    kind: nope\n",
        )
        .expect("file");

        let result = run(&registry, &file).expect("validated");

        assert_eq!(result.data["valid"][0]["name"], "api");
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].name, "bad");
        assert_eq!(result.failures[0].code, "config.decode");
    }
}
