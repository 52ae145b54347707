//! WebFetch tool: HTTPS-upgraded GET with redirect-host-mismatch handling
//! and a reduced-markdown body, truncated at 10,000 chars.

use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use crate::message::ToolResult;
use crate::tools::Tool;

const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const MAX_BODY_CHARS: usize = 10_000;

pub struct WebFetchTool;

fn upgrade_to_https(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("http://") {
        format!("https://{}", rest)
    } else {
        raw.to_string()
    }
}

/// Collapses HTML to a reduced, markdown-like text form: strips tags,
/// collapses runs of whitespace.
fn reduce_to_markdown(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(mut text: String) -> String {
    if text.chars().count() > MAX_BODY_CHARS {
        text = text.chars().take(MAX_BODY_CHARS).collect();
        text.push_str("\n... [truncated]");
    }
    text
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "WebFetch"
    }

    fn description(&self) -> &str {
        "Fetches a URL and returns a reduced, markdown-like rendering of its content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to fetch"},
                "prompt": {"type": "string", "description": "What information to extract from the page"}
            },
            "required": ["url", "prompt"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(raw_url) = args.get("url").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'url'");
        };
        let upgraded = upgrade_to_https(raw_url);

        let requested_host = match Url::parse(&upgraded) {
            Ok(u) => u.host_str().unwrap_or_default().to_string(),
            Err(e) => return ToolResult::err(format!("Invalid URL: {}", e)),
        };

        let client = match reqwest::Client::builder().timeout(FETCH_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let response = match client.get(&upgraded).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("Request failed: {}", e)),
        };

        // Redirects are followed by the client; once landed, check whether
        // the final host still matches the one the caller asked for.
        let final_host = response.url().host_str().unwrap_or_default().to_string();
        let final_url = response.url().to_string();
        if final_host != requested_host {
            return ToolResult::ok(format!(
                "The URL redirected to a different host ({}). Please refetch using: {}",
                final_host, final_url
            ));
        }

        if !response.status().is_success() {
            return ToolResult::err(format!("HTTP {}", response.status()));
        }

        match response.text().await {
            Ok(body) => ToolResult::ok(truncate(reduce_to_markdown(&body))),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}
