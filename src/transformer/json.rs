//! JSON body field transformer.
//!
//! Paths use the `$.field.sub[0]` form and are resolved through JSON
//! pointers. A body that is not valid JSON fails the transform so that
//! unprotected data is never forwarded.

use super::{TransformError, Transformer};
use crate::config::{JsonOperation, JsonTransform};
use crate::message::{ProxyRequest, ProxyResponse};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Character used when masking values.
const MASK_CHAR: char = '*';

/// JSON body transformer.
pub struct JsonTransformer {
    name: String,
    operations: Vec<JsonOperation>,
}

impl JsonTransformer {
    /// Create a new JSON transformer from configuration.
    pub fn new(name: impl Into<String>, config: &JsonTransform) -> Self {
        Self {
            name: name.into(),
            operations: config.operations.clone(),
        }
    }

    fn rewrite(&self, body: &[u8]) -> Result<Option<Vec<u8>>, TransformError> {
        if body.is_empty() {
            return Ok(None);
        }

        let mut json: JsonValue = serde_json::from_slice(body)?;
        for operation in &self.operations {
            apply_operation(&mut json, operation)?;
        }

        Ok(Some(serde_json::to_vec(&json)?))
    }
}

fn apply_operation(json: &mut JsonValue, operation: &JsonOperation) -> Result<(), TransformError> {
    match operation {
        JsonOperation::Set { path, value } => set_value(json, path, value.clone()),
        JsonOperation::Delete(paths) => {
            for path in paths {
                take_value(json, path)?;
            }
            Ok(())
        }
        JsonOperation::Rename { from, to } => match take_value(json, from)? {
            Some(value) => set_value(json, to, value),
            None => Ok(()),
        },
        JsonOperation::Mask { path, keep_last } => {
            let pointer = to_pointer(path)?;
            let Some(target) = json.pointer_mut(&pointer) else {
                return Ok(());
            };

            let masked = match &*target {
                JsonValue::String(s) => mask(s, *keep_last),
                JsonValue::Number(n) => mask(&n.to_string(), *keep_last),
                JsonValue::Null => return Ok(()),
                _ => {
                    return Err(TransformError::JsonPath(format!(
                        "Cannot mask non-scalar value at '{}'",
                        path
                    )))
                }
            };
            *target = JsonValue::String(masked);
            Ok(())
        }
    }
}

/// Replace all but the last `keep_last` characters.
fn mask(value: &str, keep_last: usize) -> String {
    let len = value.chars().count();
    let hidden = len.saturating_sub(keep_last);
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { MASK_CHAR } else { c })
        .collect()
}

/// Convert `$.a.b[0]` into the JSON pointer `/a/b/0`.
fn to_pointer(path: &str) -> Result<String, TransformError> {
    let trimmed = path.strip_prefix('$').unwrap_or(path);
    let mut pointer = String::new();

    for part in trimmed.split('.').filter(|p| !p.is_empty()) {
        let (key, indexes) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };

        if !key.is_empty() {
            pointer.push('/');
            pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
        }

        for index in indexes.split('[').filter(|i| !i.is_empty()) {
            let index = index
                .strip_suffix(']')
                .filter(|i| i.parse::<usize>().is_ok())
                .ok_or_else(|| TransformError::JsonPath(format!("Invalid index in '{}'", path)))?;
            pointer.push('/');
            pointer.push_str(index);
        }
    }

    Ok(pointer)
}

/// Split a pointer into its parent pointer and last token.
fn split_last(pointer: &str) -> Option<(&str, &str)> {
    pointer.rfind('/').map(|pos| (&pointer[..pos], &pointer[pos + 1..]))
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn set_value(json: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), TransformError> {
    let pointer = to_pointer(path)?;
    let Some((parent, last)) = split_last(&pointer) else {
        *json = value;
        return Ok(());
    };

    let parent_value = ensure_object_path(json, parent, path)?;
    match parent_value {
        JsonValue::Object(map) => {
            map.insert(unescape(last), value);
            Ok(())
        }
        JsonValue::Array(items) => {
            let index: usize = last
                .parse()
                .map_err(|_| TransformError::JsonPath(format!("Expected index in '{}'", path)))?;
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[index] = value,
                std::cmp::Ordering::Equal => items.push(value),
                std::cmp::Ordering::Greater => {
                    return Err(TransformError::JsonPath(format!(
                        "Index past the end of the array in '{}'",
                        path
                    )))
                }
            }
            Ok(())
        }
        _ => Err(TransformError::JsonPath(format!(
            "Cannot set '{}' on a scalar value",
            path
        ))),
    }
}

/// Walk to `pointer`, creating missing objects along the way.
fn ensure_object_path<'a>(
    json: &'a mut JsonValue,
    pointer: &str,
    path: &str,
) -> Result<&'a mut JsonValue, TransformError> {
    let mut current = json;

    for token in pointer.split('/').skip(1) {
        current = match current {
            JsonValue::Object(map) => map
                .entry(unescape(token))
                .or_insert_with(|| JsonValue::Object(serde_json::Map::new())),
            JsonValue::Array(items) => {
                let index = token
                    .parse::<usize>()
                    .ok()
                    .filter(|i| *i < items.len())
                    .ok_or_else(|| {
                        TransformError::JsonPath(format!("Index out of range in '{}'", path))
                    })?;
                &mut items[index]
            }
            _ => {
                return Err(TransformError::JsonPath(format!(
                    "Path '{}' crosses a scalar value",
                    path
                )))
            }
        };
    }

    Ok(current)
}

/// Remove and return the value at `path`, if present.
fn take_value(json: &mut JsonValue, path: &str) -> Result<Option<JsonValue>, TransformError> {
    let pointer = to_pointer(path)?;
    let Some((parent, last)) = split_last(&pointer) else {
        return Ok(None);
    };

    let taken = match json.pointer_mut(parent) {
        Some(JsonValue::Object(map)) => map.remove(&unescape(last)),
        Some(JsonValue::Array(items)) => match last.parse::<usize>() {
            Ok(i) if i < items.len() => Some(items.remove(i)),
            _ => None,
        },
        _ => None,
    };

    Ok(taken)
}

#[async_trait]
impl Transformer for JsonTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform_request(
        &self,
        mut request: ProxyRequest,
    ) -> Result<ProxyRequest, TransformError> {
        if let Some(body) = self.rewrite(&request.body)? {
            request.body = body;
        }
        Ok(request)
    }

    async fn transform_response(
        &self,
        mut response: ProxyResponse,
    ) -> Result<ProxyResponse, TransformError> {
        if let Some(body) = self.rewrite(&response.body)? {
            response.body = body;
        }
        Ok(response)
    }
}
