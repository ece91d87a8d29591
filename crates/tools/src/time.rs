//! Current time tool.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserialize;

use scarlett_core::error::ToolError;
use scarlett_core::tool::{Tool, ToolOutput};

pub const DEFAULT_OFFSET: &str = "+09:00";

pub struct CurrentTimeTool {
    default_offset: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeArgs {
    timezone: Option<String>,
}

impl CurrentTimeTool {
    pub fn new(default_offset: impl Into<String>) -> Self {
        Self {
            default_offset: default_offset.into(),
        }
    }
}

impl Default for CurrentTimeTool {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSET)
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Use when the user asks about the current time, date, or day of the week."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "Timezone as UTC offset like '+09:00' for JST/KST, '+00:00' for UTC. Default is '+09:00'."
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: TimeArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let offset = args.timezone.as_deref().unwrap_or(&self.default_offset);
        Ok(ToolOutput::Text(format_time(Utc::now(), offset)))
    }
}

/// Parse `+09:00`, `-05:30`, `+9` style offsets.
pub fn parse_offset(text: &str) -> Option<FixedOffset> {
    let text = text.trim();
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => (1, text),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// `2026-10-19 21:04:05 (UTC+09:00) Monday`. Unparsable offsets use +09:00.
pub fn format_time(now: DateTime<Utc>, offset: &str) -> String {
    let tz = parse_offset(offset).unwrap_or_else(|| {
        tracing::debug!(offset, "Unparsable UTC offset, using default");
        FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix())
    });
    let local = now.with_timezone(&tz);
    local.format("%Y-%m-%d %H:%M:%S (UTC%:z) %A").to_string()
}
