//! Fetch domain: request interception, continuation and fulfillment.

use serde::{Deserialize, Serialize};

use cdpmux_types::Binary;

use super::command;

/// Identifier of a paused request, carried by `Fetch.requestPaused`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl<T: Into<String>> From<T> for RequestId {
    fn from(id: T) -> Self {
        RequestId(id.into())
    }
}

/// URL pattern to intercept; defaults to everything.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

impl RequestPattern {
    pub fn url(pattern: impl Into<String>) -> Self {
        Self {
            url_pattern: Some(pattern.into()),
            resource_type: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<RequestPattern>>,
}
command!(EnableParams, "Fetch.enable", EnableReturns);

impl EnableParams {
    pub fn patterns(patterns: Vec<RequestPattern>) -> Self {
        Self {
            patterns: Some(patterns),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnableReturns {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableParams {}
command!(DisableParams, "Fetch.disable", DisableReturns);

#[derive(Debug, Clone, Deserialize)]
pub struct DisableReturns {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRequestParams {
    pub request_id: RequestId,
}
command!(ContinueRequestParams, "Fetch.continueRequest", ContinueRequestReturns);

impl ContinueRequestParams {
    pub fn new(request_id: impl Into<RequestId>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContinueRequestReturns {}

/// A response header handed to [`FulfillRequestParams`].
#[derive(Debug, Clone, Serialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillRequestParams {
    pub request_id: RequestId,
    pub response_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HeaderEntry>>,
    /// Base64-encoded response body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Binary>,
}
command!(FulfillRequestParams, "Fetch.fulfillRequest", FulfillRequestReturns);

impl FulfillRequestParams {
    pub fn new(request_id: impl Into<RequestId>, response_code: i64) -> Self {
        Self {
            request_id: request_id.into(),
            response_code,
            response_headers: None,
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers
            .get_or_insert_with(Vec::new)
            .push(HeaderEntry::new(name, value));
        self
    }

    pub fn body_b64(mut self, body: impl Into<String>) -> Self {
        self.body = Some(Binary::from(body.into()));
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FulfillRequestReturns {}

#[cfg(test)]
mod tests {
    use super::*;
    use cdpmux_types::Method;

    #[test]
    fn enable_with_patterns() {
        let params = EnableParams::patterns(vec![RequestPattern::url("*/api/*")]);
        assert_eq!(params.identifier(), "Fetch.enable");
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            serde_json::json!({"patterns": [{"urlPattern": "*/api/*"}]})
        );
    }

    #[test]
    fn fulfill_request_shape() {
        let params = FulfillRequestParams::new("interception-1", 200)
            .header("Content-Type", "application/json")
            .body_b64("e30=");
        let raw = serde_json::to_value(&params).unwrap();
        assert_eq!(raw["requestId"], "interception-1");
        assert_eq!(raw["responseCode"], 200);
        assert_eq!(raw["responseHeaders"][0]["name"], "Content-Type");
        assert_eq!(raw["body"], "e30=");
    }
}
