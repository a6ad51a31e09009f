//! Runtime domain: expression evaluation and remote-object access.

use serde::{Deserialize, Serialize};

use super::command;

/// Unique identifier of a remote JavaScript object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteObjectId(String);

impl RemoteObjectId {
    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl<T: Into<String>> From<T> for RemoteObjectId {
    fn from(id: T) -> Self {
        RemoteObjectId(id.into())
    }
}

/// Mirror object referencing the original JavaScript object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RemoteObjectId>,
}

/// Exception details reported alongside an evaluation result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub text: String,
    pub exception: Option<RemoteObject>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableParams {}
command!(EnableParams, "Runtime.enable", EnableReturns);

#[derive(Debug, Clone, Deserialize)]
pub struct EnableReturns {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_by_value: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_preview: Option<bool>,
}
command!(EvaluateParams, "Runtime.evaluate", EvaluateReturns);

impl EvaluateParams {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            return_by_value: None,
            generate_preview: None,
        }
    }

    pub fn by_value(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            return_by_value: Some(true),
            generate_preview: None,
        }
    }
}

impl<T: Into<String>> From<T> for EvaluateParams {
    fn from(expression: T) -> Self {
        EvaluateParams::new(expression)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateReturns {
    pub result: RemoteObject,
    pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPropertiesParams {
    pub object_id: RemoteObjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own_properties: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessor_properties_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_preview: Option<bool>,
}
command!(GetPropertiesParams, "Runtime.getProperties", GetPropertiesReturns);

impl GetPropertiesParams {
    pub fn new(object_id: impl Into<RemoteObjectId>) -> Self {
        Self {
            object_id: object_id.into(),
            own_properties: Some(true),
            accessor_properties_only: None,
            generate_preview: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    pub value: Option<RemoteObject>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPropertiesReturns {
    pub result: Vec<PropertyDescriptor>,
}

/// Argument passed to [`CallFunctionOnParams`]; either a plain value or a
/// handle to another remote object.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallArgument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RemoteObjectId>,
}

impl CallArgument {
    pub fn value(value: serde_json::Value) -> Self {
        Self {
            value: Some(value),
            object_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFunctionOnParams {
    pub function_declaration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RemoteObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<CallArgument>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_by_value: Option<bool>,
}
command!(CallFunctionOnParams, "Runtime.callFunctionOn", CallFunctionOnReturns);

impl CallFunctionOnParams {
    pub fn new(object_id: impl Into<RemoteObjectId>, declaration: impl Into<String>) -> Self {
        Self {
            function_declaration: declaration.into(),
            object_id: Some(object_id.into()),
            arguments: None,
            return_by_value: None,
        }
    }

    pub fn argument(mut self, arg: CallArgument) -> Self {
        self.arguments.get_or_insert_with(Vec::new).push(arg);
        self
    }

    pub fn by_value(mut self) -> Self {
        self.return_by_value = Some(true);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFunctionOnReturns {
    pub result: RemoteObject,
    pub exception_details: Option<ExceptionDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdpmux_types::Method;

    #[test]
    fn evaluate_request_shape() {
        let params = EvaluateParams::by_value("1+1");
        assert_eq!(params.identifier(), "Runtime.evaluate");
        assert_eq!(params.domain_name(), "Runtime");
        let raw = serde_json::to_value(&params).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"expression": "1+1", "returnByValue": true})
        );
    }

    #[test]
    fn call_function_on_arguments() {
        let params = CallFunctionOnParams::new("obj-1", "function(v){ this.value = v; }")
            .argument(CallArgument::value("hi".into()))
            .by_value();
        let raw = serde_json::to_value(&params).unwrap();
        assert_eq!(raw["objectId"], "obj-1");
        assert_eq!(raw["arguments"][0]["value"], "hi");
        assert_eq!(raw["returnByValue"], true);
    }

    #[test]
    fn evaluate_returns_parse() {
        let raw = serde_json::json!({
            "result": {"type": "number", "value": 2, "description": "2"}
        });
        let returns: EvaluateReturns = serde_json::from_value(raw).unwrap();
        assert_eq!(returns.result.value, Some(2.into()));
        assert!(returns.exception_details.is_none());
    }
}
