use crate::error::{Result, StoreError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a value is represented inside a slice file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueCodec {
    /// JSON bytes wrapped in a base64 string cell.
    Base64Json,
    /// The JSON value stored as-is.
    PlainJson,
}

impl ValueCodec {
    pub fn encode(self, key: &str, value: &Value) -> Result<Value> {
        match self {
            Self::PlainJson => Ok(value.clone()),
            Self::Base64Json => {
                let bytes = serde_json::to_vec(value).map_err(|err| StoreError::Codec {
                    key: key.to_string(),
                    reason: format!("encode json: {err}"),
                })?;
                Ok(Value::String(STANDARD.encode(bytes)))
            }
        }
    }

    pub fn decode(self, key: &str, cell: &Value) -> Result<Value> {
        match self {
            Self::PlainJson => Ok(cell.clone()),
            Self::Base64Json => {
                let Value::String(b64) = cell else {
                    return Err(StoreError::Codec {
                        key: key.to_string(),
                        reason: "expected a base64 string cell".to_string(),
                    });
                };
                let bytes = STANDARD
                    .decode(b64.as_bytes())
                    .map_err(|err| StoreError::Codec {
                        key: key.to_string(),
                        reason: format!("invalid base64: {err}"),
                    })?;
                serde_json::from_slice(&bytes).map_err(|err| StoreError::Codec {
                    key: key.to_string(),
                    reason: format!("invalid json payload: {err}"),
                })
            }
        }
    }

    /// Re-encode a cell from `self` into `target` without materializing a typed value.
    pub fn transcode(self, target: Self, key: &str, cell: &Value) -> Result<Value> {
        if self == target {
            return Ok(cell.clone());
        }
        let value = self.decode(key, cell)?;
        target.encode(key, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base64_cell_is_a_string() {
        let cell = ValueCodec::Base64Json
            .encode("k", &json!({"a": [1, 2]}))
            .unwrap();
        assert_eq!(cell, json!("eyJhIjpbMSwyXX0="));
        assert_eq!(
            ValueCodec::Base64Json.decode("k", &cell).unwrap(),
            json!({"a": [1, 2]})
        );
    }

    #[test]
    fn plain_cell_is_the_value() {
        let cell = ValueCodec::PlainJson.encode("k", &json!(7)).unwrap();
        assert_eq!(cell, json!(7));
    }

    #[test]
    fn bad_cells_are_errors() {
        let err = ValueCodec::Base64Json.decode("k", &json!(1)).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));

        let err = ValueCodec::Base64Json
            .decode("k", &json!("not base64!!"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid base64"));

        // "{{" is valid base64 of bytes that are not JSON
        let not_json = Value::String(STANDARD.encode(b"{{"));
        let err = ValueCodec::Base64Json.decode("k", &not_json).unwrap_err();
        assert!(err.to_string().contains("invalid json payload"));
    }

    #[test]
    fn transcode_between_codecs() {
        let cell = ValueCodec::Base64Json.encode("k", &json!("hi")).unwrap();
        let plain = ValueCodec::Base64Json
            .transcode(ValueCodec::PlainJson, "k", &cell)
            .unwrap();
        assert_eq!(plain, json!("hi"));
    }
}
