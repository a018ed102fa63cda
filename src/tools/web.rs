//! Network tools: URL fetch and DuckDuckGo search.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::redirect::Policy;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::traits::{ParamKind, ParamSpec, Tool, ToolCategory, ToolResult};

/// Maximum response body returned (1 MB).
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 120;

fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .redirect(Policy::limited(5))
        .user_agent("Quarry/0.4")
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn validate_url(url: &str) -> Result<Url, String> {
    let parsed = Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(format!(
            "unsupported URL scheme: {scheme}. Only http and https are allowed."
        )),
    }
}

// ─── FetchUrlTool ─────────────────────────────────────────────────────────────

/// HTTP GET with a bounded response body.
pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        Self {
            client: build_client(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch content from a URL using HTTP GET and return the body as text."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            ("url", ParamSpec::required(ParamKind::String, "URL to fetch (http/https).")),
            (
                "timeout_seconds",
                ParamSpec::optional(ParamKind::Integer, "Request timeout (default 30, max 120)."),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'url'")?;
        let parsed = validate_url(url)?;
        let timeout = args
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let response = self
            .client
            .get(parsed.as_str())
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read response body: {e}"))?;

        let original_len = body.len();
        let (body, truncated) = if original_len > MAX_RESPONSE_SIZE {
            (body[..MAX_RESPONSE_SIZE].to_string(), true)
        } else {
            (body, false)
        };

        let mut output = format!("HTTP {status}\nContent-Type: {content_type}\n\n");
        output.push_str(&body);

        let metadata = json!({
            "status_code": status.as_u16(),
            "content_type": content_type,
            "response_size": body.len(),
            "truncated": truncated,
        });

        if status.is_success() {
            Ok(ToolResult::ok(output).with_metadata(metadata))
        } else {
            Ok(ToolResult::err(output).with_metadata(metadata))
        }
    }
}

// ─── WebSearchTool ────────────────────────────────────────────────────────────

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web search via the DuckDuckGo HTML endpoint (no API key required).
pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: build_client(DEFAULT_TIMEOUT_SECS),
        }
    }

    fn build_search_url(query: &str, max_results: usize) -> String {
        format!(
            "https://html.duckduckgo.com/html/?q={}&num={}",
            urlencoding::encode(query),
            max_results
        )
    }

    fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
        let result_pattern =
            Regex::new(r#"<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>([^<]+)</a>"#);
        let snippet_pattern =
            Regex::new(r#"<a[^>]*class="result__snippet"[^>]*>([^<]*(?:<[^>]+>[^<]*)*)</a>"#);
        let (Ok(result_pattern), Ok(snippet_pattern)) = (result_pattern, snippet_pattern) else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for block in html.split("class=\"result__body\"").skip(1).take(max_results) {
            let Some(caps) = result_pattern.captures(block) else {
                continue;
            };
            let raw_url = caps.get(1).map_or("", |m| m.as_str());
            let title = caps.get(2).map_or("", |m| m.as_str());
            let snippet = snippet_pattern
                .captures(block)
                .and_then(|s| s.get(1))
                .map(|m| clean_html(m.as_str()))
                .unwrap_or_default();
            let url = extract_actual_url(raw_url);
            if !title.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    title: clean_html(title),
                    url,
                    snippet,
                });
            }
        }
        results
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// DuckDuckGo result links are redirect URLs carrying the target in `uddg=`.
fn extract_actual_url(redirect_url: &str) -> String {
    if let Some(start) = redirect_url.find("uddg=") {
        let encoded = &redirect_url[start + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        return urlencoding::decode(encoded)
            .map(|s| s.into_owned())
            .unwrap_or_default();
    }
    if redirect_url.starts_with("http") {
        redirect_url.to_string()
    } else if let Some(rest) = redirect_url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        redirect_url.to_string()
    }
}

fn clean_html(text: &str) -> String {
    let stripped = match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    };
    stripped
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return structured results with titles, URLs and snippets."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn parameters(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            ("query", ParamSpec::required(ParamKind::String, "The search query.")),
            (
                "max_results",
                ParamSpec::optional(ParamKind::Integer, "Result cap (default 5, max 20).")
                    .with_default(json!(5)),
            ),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'query'")?;
        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(5)
            .min(20) as usize;

        let url = Self::build_search_url(query, max_results);
        let response = self
            .client
            .get(&url)
            .header("Accept", "text/html")
            .send()
            .await
            .map_err(|e| format!("search request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("search failed with status {}", response.status()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        let results = Self::parse_results(&html, max_results);

        if results.is_empty() {
            return Ok(ToolResult::ok(format!("No results found for '{query}'")));
        }

        let mut output = format!("Search results for '{query}':\n\n");
        for (i, result) in results.iter().enumerate() {
            output.push_str(&format!(
                "{}. {}\n   {}\n   {}\n\n",
                i + 1,
                result.title,
                result.snippet,
                result.url
            ));
        }

        let metadata = json!({
            "query": query,
            "result_count": results.len(),
            "results": results,
        });
        Ok(ToolResult::ok(output).with_metadata(metadata))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
