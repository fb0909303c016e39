//! LLM oracle client.
//!
//! The oracle is an opaque HTTP service: POST `{system_msg, prompt}` to
//! `/request`, get `{response}` back. Which backend answers is the shim's
//! business; the core only knows the endpoint. Responses often arrive
//! wrapped in fenced code blocks, which are stripped before any parsing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct OracleRequest<'a> {
    system_msg: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OracleResponse {
    response: String,
}

/// Blocking HTTP client for the LLM shim. The repair pipeline is the only
/// caller and is itself synchronous, so the child simply suspends on the
/// request.
pub struct OracleClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl OracleClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("Failed to build oracle HTTP client")?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    /// One round-trip to the oracle. Returns the fence-stripped response
    /// text. An unreachable oracle is an infrastructure failure.
    pub fn request(&self, system_msg: &str, prompt: &str) -> Result<String> {
        let body = OracleRequest { system_msg, prompt };
        let response: OracleResponse = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .with_context(|| format!("Oracle unreachable at {}", self.endpoint))?
            .error_for_status()
            .context("Oracle returned an error status")?
            .json()
            .context("Oracle response was not the expected JSON envelope")?;

        Ok(strip_code_fences(&response.response))
    }
}

/// Remove a leading/trailing markdown fence (``` or ```json) from the
/// response so the JSON inside can be parsed directly.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    let without_open = if let Some(rest) = trimmed.strip_prefix("```") {
        // drop the info string ("json", "python", ...) up to end of line
        match rest.find('\n') {
            Some(nl) => &rest[nl + 1..],
            None => rest,
        }
    } else {
        trimmed
    };

    let without_close = without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open);

    without_close.trim().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_plain_text_unchanged() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_bare_fences() {
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_json_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_with_surrounding_whitespace() {
        assert_eq!(
            strip_code_fences("  ```json\n{\"a\": 1}\n```  \n"),
            "{\"a\": 1}"
        );
    }

    #[test]
    fn test_inner_fences_preserved() {
        // only the outermost fence pair is the transport wrapper
        let inner = "text with ``` inside";
        assert_eq!(strip_code_fences(inner), inner);
    }

    #[test]
    fn test_strip_score_response() {
        assert_eq!(strip_code_fences("```\n0.85\n```"), "0.85");
        assert_eq!(strip_code_fences("0.85"), "0.85");
    }
}
