use serde::{Deserialize, Serialize};

use crate::session::{Feature, Phase};

#[derive(Debug, Deserialize)]
pub struct VideoInstructionsRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub feature: Feature,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SessionView {
    pub selected: Option<Feature>,
    pub video_assistant: Phase,
    pub image_suggestions: Phase,
}

/// Problems with user input. Each one blocks a single action; no call is made.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("Please enter the YouTube video URL")]
    EmptyUrl,
    #[error("Please enter a valid video URL")]
    InvalidUrl,
    #[error("Please upload an image to identify ingredients")]
    MissingImage,
    #[error("Unsupported file type {0:?}; upload a PNG or JPEG image")]
    UnsupportedType(String),
    #[error("The uploaded file could not be read as an image")]
    Undecodable,
    #[error("The uploaded file is larger than the {0} byte limit")]
    TooLarge(usize),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Warning,
    Failure,
}

/// What a workflow hands back to the user.
#[derive(Debug, Serialize, PartialEq)]
pub struct WorkflowResponse {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WorkflowResponse {
    pub fn success(heading: &str, text: String) -> Self {
        Self {
            status: Status::Success,
            heading: Some(heading.to_string()),
            text: Some(text),
            message: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: Status::Warning,
            heading: None,
            text: None,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failure,
            heading: None,
            text: None,
            message: Some(message.into()),
        }
    }
}

impl From<InputError> for WorkflowResponse {
    fn from(err: InputError) -> Self {
        Self::warning(err.to_string())
    }
}
