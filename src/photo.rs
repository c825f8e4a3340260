//! Ingredients and dish ideas from an uploaded photo.

use std::io::Cursor;
use std::path::Path;

use image::{ImageFormat, ImageReader};

use crate::gemini::{ContentGenerator, GenerateRequest, GenerationError, Part};
use crate::models::{InputError, WorkflowResponse};

pub const INSTRUCTION: &str =
    "List the ingredients identifiable in this image and the dish(es) that can be made from them";
pub const HEADING: &str = "Ingredients identified:";

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// An upload whose header has been read; pixels are left to the model.
#[derive(Debug)]
pub struct ImageUpload {
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

// ── Input ────────────────────────────────────────────────────────────────────

pub fn collect_image(file_name: Option<&str>, bytes: Vec<u8>) -> Result<ImageUpload, InputError> {
    let name = file_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(InputError::MissingImage)?;

    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        let shown = if extension.is_empty() {
            name.to_string()
        } else {
            extension
        };
        return Err(InputError::UnsupportedType(shown));
    }

    if bytes.is_empty() {
        return Err(InputError::MissingImage);
    }

    // The extension only gates the upload; the bytes decide the MIME type.
    let format = image::guess_format(&bytes).map_err(|_| InputError::Undecodable)?;
    let mime_type = match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        _ => return Err(InputError::Undecodable),
    };
    let (width, height) = ImageReader::with_format(Cursor::new(&bytes), format)
        .into_dimensions()
        .map_err(|_| InputError::Undecodable)?;

    Ok(ImageUpload {
        mime_type,
        width,
        height,
        bytes,
    })
}

// ── Request ──────────────────────────────────────────────────────────────────

pub fn build_request(model: &str, upload: &ImageUpload) -> GenerateRequest {
    GenerateRequest::user(
        model,
        vec![
            Part::text(INSTRUCTION),
            Part::inline(upload.mime_type, &upload.bytes),
        ],
    )
}

pub async fn identify(
    generator: &dyn ContentGenerator,
    model: &str,
    upload: &ImageUpload,
) -> Result<String, GenerationError> {
    let request = build_request(model, upload);
    let response = generator.generate(&request).await?;
    response.text()
}

// ── Rendering ────────────────────────────────────────────────────────────────

pub fn render(result: Result<String, GenerationError>) -> WorkflowResponse {
    match result {
        Ok(text) => WorkflowResponse::success(HEADING, text),
        Err(e) => WorkflowResponse::failure(format!("Error identifying ingredients: {e}")),
    }
}
