//! Cooking instructions from a video link.

use url::Url;

use crate::gemini::{ContentGenerator, GenerateRequest, GenerationError, Part};
use crate::models::{InputError, WorkflowResponse};

pub const INSTRUCTION: &str =
    "List the cooking instructions and ingredients list with alternate options";
pub const HEADING: &str = "Instructions Summary:";

// ── Input ────────────────────────────────────────────────────────────────────

/// Trim and check the user's URL. Only absolute http(s) links pass.
pub fn collect_url(raw: &str) -> Result<&str, InputError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(InputError::EmptyUrl);
    }
    let parsed = Url::parse(url).map_err(|_| InputError::InvalidUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(InputError::InvalidUrl);
    }
    Ok(url)
}

// ── Request ──────────────────────────────────────────────────────────────────

pub fn build_request(model: &str, url: &str) -> GenerateRequest {
    GenerateRequest::user(model, vec![Part::text(INSTRUCTION), Part::file_uri(url)])
}

pub async fn summarize(
    generator: &dyn ContentGenerator,
    model: &str,
    url: &str,
) -> Result<String, GenerationError> {
    let request = build_request(model, url);
    let response = generator.generate(&request).await?;
    response.first_text().map(str::to_string)
}

// ── Rendering ────────────────────────────────────────────────────────────────

pub fn render(result: Result<String, GenerationError>) -> WorkflowResponse {
    match result {
        Ok(text) => WorkflowResponse::success(HEADING, text),
        Err(e) => WorkflowResponse::failure(format!("Error generating video instructions: {e}")),
    }
}
