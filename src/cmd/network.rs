//! Network domain: traffic monitoring and header overrides.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::command;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableParams {}
command!(EnableParams, "Network.enable", EnableReturns);

#[derive(Debug, Clone, Deserialize)]
pub struct EnableReturns {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableParams {}
command!(DisableParams, "Network.disable", DisableReturns);

#[derive(Debug, Clone, Deserialize)]
pub struct DisableReturns {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExtraHttpHeadersParams {
    pub headers: HashMap<String, String>,
}
command!(
    SetExtraHttpHeadersParams,
    "Network.setExtraHTTPHeaders",
    SetExtraHttpHeadersReturns
);

impl SetExtraHttpHeadersParams {
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self { headers }
    }
}

impl FromIterator<(String, String)> for SetExtraHttpHeadersParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            headers: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetExtraHttpHeadersReturns {}
