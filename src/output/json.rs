//! JSON output formatting

use crate::output::formatter::Report;
use serde_json::{json, Value};

pub fn format_json(report: &Report) -> String {
    let data: Value = match report {
        Report::Init { path } => json!({ "created": path }),
        Report::Build(info) => serde_json::to_value(info).unwrap_or(json!(null)),
        Report::Plan { steps, checked } => json!({ "checked": checked, "steps": steps }),
        Report::Images(images) => serde_json::to_value(images).unwrap_or(json!(null)),
        Report::Image { record, tags } => {
            let mut value = serde_json::to_value(record).unwrap_or(json!({}));
            if let Some(map) = value.as_object_mut() {
                map.insert("tags".to_string(), json!(tags));
            }
            value
        }
        Report::Probe { url, result } => {
            let mut value = serde_json::to_value(result).unwrap_or(json!({}));
            if let Some(map) = value.as_object_mut() {
                map.insert("url".to_string(), json!(url));
            }
            value
        }
        Report::Instances(records) => serde_json::to_value(records).unwrap_or(json!(null)),
        Report::Instance(record) => serde_json::to_value(record).unwrap_or(json!(null)),
        Report::Dockerfile(text) => json!({ "dockerfile": text }),
    };

    serde_json::to_string_pretty(&data).unwrap_or_else(|_| "{}".to_string())
}
