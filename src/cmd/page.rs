//! Page domain: navigation, screenshots, new-document scripts.

use serde::{Deserialize, Serialize};

use cdpmux_types::Binary;

use super::command;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(String);

impl FrameId {
    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableParams {}
command!(EnableParams, "Page.enable", EnableReturns);

#[derive(Debug, Clone, Deserialize)]
pub struct EnableReturns {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
    pub url: String,
}
command!(NavigateParams, "Page.navigate", NavigateReturns);

impl NavigateParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl<T: Into<String>> From<T> for NavigateParams {
    fn from(url: T) -> Self {
        NavigateParams::new(url)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateReturns {
    pub frame_id: FrameId,
    pub loader_id: Option<String>,
    /// Set when the navigation was answered with an error page.
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureScreenshotParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<i64>,
}
command!(
    CaptureScreenshotParams,
    "Page.captureScreenshot",
    CaptureScreenshotReturns
);

impl CaptureScreenshotParams {
    pub fn png() -> Self {
        Self {
            format: Some("png".to_string()),
            quality: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureScreenshotReturns {
    /// Base64-encoded image data.
    pub data: Binary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddScriptToEvaluateOnNewDocumentParams {
    pub source: String,
}
command!(
    AddScriptToEvaluateOnNewDocumentParams,
    "Page.addScriptToEvaluateOnNewDocument",
    AddScriptToEvaluateOnNewDocumentReturns
);

impl AddScriptToEvaluateOnNewDocumentParams {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddScriptToEvaluateOnNewDocumentReturns {
    pub identifier: String,
}
