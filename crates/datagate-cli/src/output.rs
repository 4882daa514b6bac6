use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::commands::CommandResult;
use crate::error::CliError;

pub fn render(result: &CommandResult, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = json!({
                "data": result.data,
                "errors": result.failures,
            });
            let payload = if pretty {
                serde_json::to_string_pretty(&payload)?
            } else {
                serde_json::to_string(&payload)?
            };
            println!("{payload}");
        }
        OutputFormat::Table => print!("{}", render_table(result)),
    }

    Ok(())
}

fn render_table(result: &CommandResult) -> String {
    let mut out = String::new();

    if let Some(map) = result.data.as_object() {
        for (section, rows) in map {
            out.push_str(&format!("{section}:\n"));
            match rows {
                Value::Array(rows) if rows.is_empty() => out.push_str("  (none)\n"),
                Value::Array(rows) => {
                    for row in rows {
                        out.push_str(&format!("  - {}\n", row_label(row)));
                    }
                }
                other => out.push_str(&format!("  {other}\n")),
            }
        }
    }

    if !result.failures.is_empty() {
        out.push_str("errors:\n");
        for failure in &result.failures {
            let kind = failure.kind.as_deref().unwrap_or("?");
            out.push_str(&format!(
                "  - {} ({kind}) {}: {}\n",
                failure.name, failure.code, failure.message
            ));
        }
    }

    out
}

fn row_label(row: &Value) -> String {
    match row {
        Value::String(value) => value.clone(),
        Value::Object(map) => {
            let field = |key: &str| map.get(key).and_then(Value::as_str).unwrap_or("");
            let mut label = format!("{:<16} {:<10}", field("name"), field("kind"));
            if let Some(status) = map.get("status").and_then(Value::as_str) {
                label.push_str(&format!(" {status}"));
            }
            label.trim_end().to_owned()
        }
        other => other.to_string(),
    }
}
