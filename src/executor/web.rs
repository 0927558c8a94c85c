//! HTTP tools: `Fetch`/`WebFetch` and `WebSearch`.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::util::{truncate_output, truncate_output_with, CappedBuffer};
use super::ToolOutput;
use crate::models::tool::ToolInput;

/// Results listed per search.
const MAX_RESULTS: usize = 10;

/// Most of a search results page that is parsed for links.
const MAX_SEARCH_PAGE_BYTES: usize = 1024 * 1024;

/// Perform the HTTP request described by `input`.
pub async fn fetch(client: &reqwest::Client, input: &ToolInput, max_output: usize) -> ToolOutput {
    let Some(raw_url) = input.url.as_deref().filter(|u| !u.trim().is_empty()) else {
        return ToolOutput::error("missing required argument: url");
    };
    let url = match parse_http_url(raw_url) {
        Ok(url) => url,
        Err(msg) => return ToolOutput::error(msg),
    };
    let method = match Method::from_bytes(input.http_method().as_bytes()) {
        Ok(method) => method,
        Err(_) => return ToolOutput::error(format!("invalid HTTP method: {}", input.http_method())),
    };

    let mut request = client.request(method.clone(), url);
    if let Some(headers) = &input.headers {
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
    }
    match &input.body {
        None | Some(Value::Null) => {}
        Some(Value::String(body)) => request = request.body(body.clone()),
        Some(other) => request = request.json(other),
    }

    debug!(%method, url = raw_url, "http request");
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return ToolOutput::error(format!("request failed: {err}")),
    };

    let status = response.status();
    let body = match read_body(response, max_output, true).await {
        Ok(body) => body,
        Err(err) => return ToolOutput::error(format!("failed to read response body: {err}")),
    };

    let (body, dropped) = body.into_lossy();
    let text = truncate_output_with(&format!("HTTP {status}\n{body}"), max_output, dropped);
    if status.is_success() {
        ToolOutput::ok(text)
    } else {
        ToolOutput::error(text)
    }
}

/// Query the HTML search endpoint and list the result links.
pub async fn search(
    client: &reqwest::Client,
    endpoint: &str,
    query: &str,
    max_output: usize,
) -> ToolOutput {
    let url = match Url::parse_with_params(endpoint, &[("q", query)]) {
        Ok(url) => url,
        Err(err) => return ToolOutput::error(format!("invalid search endpoint: {err}")),
    };

    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(err) => return ToolOutput::error(format!("search failed: {err}")),
    };
    let status = response.status();
    if !status.is_success() {
        return ToolOutput::error(format!("search failed: HTTP {status}"));
    }
    let html = match read_body(response, MAX_SEARCH_PAGE_BYTES, false).await {
        Ok(page) => page.into_lossy().0,
        Err(err) => return ToolOutput::error(format!("failed to read search results: {err}")),
    };

    let results = parse_search_results(&html);
    if results.is_empty() {
        return ToolOutput::ok(format!("no results for {query:?}"));
    }

    let listing = results
        .iter()
        .take(MAX_RESULTS)
        .enumerate()
        .map(|(i, r)| format!("{}. {}\n   {}", i + 1, r.title, r.url))
        .collect::<Vec<_>>()
        .join("\n");
    ToolOutput::ok(truncate_output(&listing, max_output))
}

/// Stream the body chunk by chunk, keeping at most `limit` bytes.
///
/// With `drain` the remainder is read and counted, otherwise reading stops
/// once the buffer is full.
async fn read_body(
    mut response: reqwest::Response,
    limit: usize,
    drain: bool,
) -> reqwest::Result<CappedBuffer> {
    let mut body = CappedBuffer::new(limit);
    while let Some(chunk) = response.chunk().await? {
        body.extend(&chunk);
        if body.is_full() && !drain {
            break;
        }
    }
    Ok(body)
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Link title with markup removed.
    pub title: String,
    /// Absolute link target.
    pub url: String,
}

/// Extract result links from a search engine's HTML page.
#[must_use]
pub fn parse_search_results(html: &str) -> Vec<SearchResult> {
    static LINK: OnceLock<Option<Regex>> = OnceLock::new();
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();

    let link = LINK.get_or_init(|| {
        Regex::new(r#"(?s)class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).ok()
    });
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]+>").ok());
    let (Some(link), Some(tag)) = (link, tag) else {
        warn!("search result patterns failed to compile");
        return Vec::new();
    };

    link.captures_iter(html)
        .filter_map(|caps| {
            let href = decode_entities(caps.get(1)?.as_str());
            let title = decode_entities(tag.replace_all(caps.get(2)?.as_str(), "").trim());
            let url = if href.starts_with("//") {
                format!("https:{href}")
            } else {
                href
            };
            (!title.is_empty()).then_some(SearchResult { title, url })
        })
        .collect()
}

fn parse_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|err| format!("invalid url {raw}: {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported url scheme: {other}")),
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}
