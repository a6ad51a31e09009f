//! DOM domain: document access and selector queries.

use serde::{Deserialize, Serialize};

use super::command;
use super::runtime::RemoteObject;

/// Identifier of a node known to the DOM agent. `0` means "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(i64);

impl NodeId {
    pub fn new(id: i64) -> Self {
        NodeId(id)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: NodeId,
    pub node_name: String,
    /// Interleaved name/value pairs, the way the agent reports them.
    pub attributes: Option<Vec<String>>,
    pub children: Option<Vec<Node>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableParams {}
command!(EnableParams, "DOM.enable", EnableReturns);

#[derive(Debug, Clone, Deserialize)]
pub struct EnableReturns {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDocumentParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i64>,
}
command!(GetDocumentParams, "DOM.getDocument", GetDocumentReturns);

impl GetDocumentParams {
    pub fn with_depth(depth: i64) -> Self {
        Self { depth: Some(depth) }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDocumentReturns {
    pub root: Node,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySelectorParams {
    pub node_id: NodeId,
    pub selector: String,
}
command!(QuerySelectorParams, "DOM.querySelector", QuerySelectorReturns);

impl QuerySelectorParams {
    pub fn new(node_id: NodeId, selector: impl Into<String>) -> Self {
        Self {
            node_id,
            selector: selector.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySelectorReturns {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveNodeParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}
command!(ResolveNodeParams, "DOM.resolveNode", ResolveNodeReturns);

impl ResolveNodeParams {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveNodeReturns {
    pub object: RemoteObject,
}
