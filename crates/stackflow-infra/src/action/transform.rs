//! Local JSON reshaping for `transform-data` steps.
//!
//! Config shape:
//!
//! ```json
//! {
//!   "input":  "$step_extract",          // value to transform (required)
//!   "select": ["title", "price"],       // keep only these fields
//!   "rename": { "price": "amount" },    // rename fields
//!   "merge":  { "currency": "EUR" }     // add or overwrite fields
//! }
//! ```
//!
//! Operations apply in the order select, rename, merge, to an object or to
//! every object of an array.

use serde_json::{Map, Value};
use stackflow_core::workflow::action::ActionHandler;
use stackflow_core::workflow::context::ExecutionContext;
use stackflow_types::error::ActionError;
use stackflow_types::workflow::StepDefinition;

#[derive(Debug, Clone, Default)]
pub struct TransformDataHandler;

impl TransformDataHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ActionHandler for TransformDataHandler {
    fn name(&self) -> &str {
        "transform-data"
    }

    async fn execute(
        &self,
        step: &StepDefinition,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ActionError> {
        let output = transform(&step.config)?;
        tracing::debug!(step_id = %step.id, "transform step completed");
        Ok(output)
    }
}

/// Apply the operations described by `config` to `config.input`.
pub fn transform(config: &Value) -> Result<Value, ActionError> {
    let input = config
        .get("input")
        .ok_or_else(|| ActionError::Validation("'input' is required".to_string()))?;
    if let Some(reference) = input.as_str().filter(|s| s.starts_with('$')) {
        return Err(ActionError::Validation(format!(
            "input reference '{reference}' did not resolve"
        )));
    }

    let ops = Operations::from_config(config)?;
    match input {
        Value::Object(map) => Ok(Value::Object(ops.apply(map.clone()))),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(Value::Object(ops.apply(map.clone()))),
                _ => Err(ActionError::Validation(format!(
                    "input[{i}] is not an object"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ if ops.is_empty() => Ok(input.clone()),
        _ => Err(ActionError::Validation(
            "input must be an object or an array of objects".to_string(),
        )),
    }
}

struct Operations<'a> {
    select: Option<Vec<&'a str>>,
    rename: Option<&'a Map<String, Value>>,
    merge: Option<&'a Map<String, Value>>,
}

impl<'a> Operations<'a> {
    fn from_config(config: &'a Value) -> Result<Self, ActionError> {
        let select = match config.get("select") {
            None | Some(Value::Null) => None,
            Some(Value::Array(fields)) => Some(
                fields
                    .iter()
                    .map(|f| {
                        f.as_str().ok_or_else(|| {
                            ActionError::Validation("'select' entries must be strings".to_string())
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(_) => {
                return Err(ActionError::Validation(
                    "'select' must be an array of field names".to_string(),
                ));
            }
        };

        let rename = object_op(config, "rename")?;
        if let Some(map) = rename {
            if map.values().any(|v| !v.is_string()) {
                return Err(ActionError::Validation(
                    "'rename' values must be strings".to_string(),
                ));
            }
        }

        Ok(Self {
            select,
            rename,
            merge: object_op(config, "merge")?,
        })
    }

    fn is_empty(&self) -> bool {
        self.select.is_none() && self.rename.is_none() && self.merge.is_none()
    }

    fn apply(&self, mut map: Map<String, Value>) -> Map<String, Value> {
        if let Some(fields) = &self.select {
            map.retain(|k, _| fields.contains(&k.as_str()));
        }
        if let Some(rename) = self.rename {
            for (from, to) in rename {
                if let (Some(value), Some(to)) = (map.remove(from), to.as_str()) {
                    map.insert(to.to_string(), value);
                }
            }
        }
        if let Some(merge) = self.merge {
            for (k, v) in merge {
                map.insert(k.clone(), v.clone());
            }
        }
        map
    }
}

fn object_op<'a>(config: &'a Value, key: &str) -> Result<Option<&'a Map<String, Value>>, ActionError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ActionError::Validation(format!("'{key}' must be an object"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_rename_merge_on_object() {
        let out = transform(&json!({
            "input": {"title": "Laptop", "price": 999, "sku": "X1"},
            "select": ["title", "price"],
            "rename": {"price": "amount"},
            "merge": {"currency": "EUR"}
        }))
        .unwrap();

        assert_eq!(out, json!({"title": "Laptop", "amount": 999, "currency": "EUR"}));
    }

    #[test]
    fn test_applies_to_each_array_item() {
        let out = transform(&json!({
            "input": [{"name": "a", "x": 1}, {"name": "b", "x": 2}],
            "select": ["name"]
        }))
        .unwrap();

        assert_eq!(out, json!([{"name": "a"}, {"name": "b"}]));
    }

    #[test]
    fn test_passthrough_without_operations() {
        assert_eq!(transform(&json!({"input": 42})).unwrap(), json!(42));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            json!({}),
            json!({"input": "$step_missing"}),
            json!({"input": {"a": 1}, "select": "a"}),
            json!({"input": {"a": 1}, "rename": {"a": 5}}),
            json!({"input": {"a": 1}, "merge": [1]}),
            json!({"input": [1, 2], "select": ["a"]}),
            json!({"input": "text", "merge": {"a": 1}}),
        ];
        for config in cases {
            let err = transform(&config).unwrap_err();
            assert!(matches!(err, ActionError::Validation(_)), "config {config}");
        }
    }

    #[tokio::test]
    async fn test_handler_uses_step_config() {
        use std::collections::HashMap;
        use stackflow_types::workflow::StepType;

        let step = StepDefinition::new(
            "shape",
            StepType::TransformData,
            json!({"input": {"a": 1}, "merge": {"b": 2}}),
        );
        let ctx = ExecutionContext::new("wf", "exec", HashMap::new(), 1);

        let out = TransformDataHandler::new().execute(&step, &ctx).await.unwrap();
        assert_eq!(out, json!({"a": 1, "b": 2}));
    }
}
