//! Wire frame parsing and serialization (§4.1).
//!
//! A frame is a single JSON object. Field presence carries meaning: a
//! `method` field marks a request, its absence (with a nonzero `id`) marks a
//! response. `result` is stored as a [`serde_json::Value`] rather than a raw
//! string, which gets the "quotes preserved on a string result" requirement
//! for free — `Value::String` always serializes back with its quotes.

use serde_json::{Map, Value};

use crate::error::RpcMuxError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub version: i64,
    pub id: i64,
    pub src: String,
    pub dst: String,
    pub tag: String,
    pub key: String,
    pub auth: Option<Value>,
    pub no_response: bool,
    pub method: String,
    pub args: Option<Value>,
    pub result: Option<Value>,
    pub error_code: i64,
    pub error_msg: String,
}

impl Frame {
    pub fn new_request(id: i64, method: impl Into<String>) -> Self {
        Frame {
            id,
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn is_request(&self) -> bool {
        !self.method.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }

    /// Parses a single JSON object into a [`Frame`]. Fails if the payload
    /// isn't a JSON object, or if it's an object with none of the fields a
    /// frame recognizes (an empty `{}` is rejected the same way).
    pub fn parse(bytes: &[u8]) -> Result<Frame, RpcMuxError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let obj = value
            .as_object()
            .ok_or_else(|| RpcMuxError::InvalidFrame("frame is not a JSON object".into()))?;

        const KNOWN_FIELDS: &[&str] = &[
            "v", "id", "src", "dst", "tag", "key", "auth", "nr", "method", "args", "result",
            "error",
        ];
        if !KNOWN_FIELDS.iter().any(|f| obj.contains_key(*f)) {
            return Err(RpcMuxError::InvalidFrame(
                "frame has none of the recognized fields".into(),
            ));
        }

        let get_str = |key: &str| -> String {
            obj.get(key).and_then(Value::as_str).unwrap_or("").to_string()
        };

        let mut frame = Frame {
            version: obj.get("v").and_then(Value::as_i64).unwrap_or(0),
            id: obj.get("id").and_then(Value::as_i64).unwrap_or(0),
            src: get_str("src"),
            dst: get_str("dst"),
            tag: get_str("tag"),
            key: get_str("key"),
            auth: obj.get("auth").cloned(),
            no_response: obj.get("nr").and_then(Value::as_bool).unwrap_or(false),
            method: get_str("method"),
            args: obj.get("args").cloned(),
            result: None,
            error_code: 0,
            error_msg: String::new(),
        };

        if let Some(error) = obj.get("error").and_then(Value::as_object) {
            frame.error_code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            frame.error_msg = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
        } else if let Some(result) = obj.get("result") {
            frame.result = Some(result.clone());
        }

        Ok(frame)
    }

    /// Serializes the frame as a JSON object, omitting empty/default fields,
    /// in the order `id, src, dst, tag, key, auth, <payload>`.
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_value()).expect("Frame serializes to valid JSON")
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if self.version != 0 {
            map.insert("v".into(), Value::from(self.version));
        }
        map.insert("id".into(), Value::from(self.id));
        if !self.src.is_empty() {
            map.insert("src".into(), Value::from(self.src.clone()));
        }
        if !self.dst.is_empty() {
            map.insert("dst".into(), Value::from(self.dst.clone()));
        }
        if !self.tag.is_empty() {
            map.insert("tag".into(), Value::from(self.tag.clone()));
        }
        if !self.key.is_empty() {
            map.insert("key".into(), Value::from(self.key.clone()));
        }
        if let Some(auth) = &self.auth {
            map.insert("auth".into(), auth.clone());
        }
        if self.is_request() {
            map.insert("method".into(), Value::from(self.method.clone()));
            if let Some(args) = &self.args {
                map.insert("args".into(), args.clone());
            }
            if self.no_response {
                map.insert("nr".into(), Value::Bool(true));
            }
        } else if self.is_error() {
            let mut error = Map::new();
            error.insert("code".into(), Value::from(self.error_code));
            error.insert("message".into(), Value::from(self.error_msg.clone()));
            map.insert("error".into(), Value::Object(error));
        } else {
            map.insert(
                "result".into(),
                self.result.clone().unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip_preserves_string_args_quotes() {
        let mut frame = Frame::new_request(42, "Sum.Add");
        frame.args = Some(json!({"a": 1, "b": "two"}));
        let bytes = frame.serialize();
        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(parsed.method, "Sum.Add");
        assert_eq!(parsed.args, Some(json!({"a": 1, "b": "two"})));
    }

    #[test]
    fn string_result_keeps_its_quotes_on_the_wire() {
        let mut frame = Frame::default();
        frame.id = 7;
        frame.result = Some(Value::String("hello".into()));
        let bytes = frame.serialize();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"result\":\"hello\""));
    }

    #[test]
    fn error_frame_omits_result_and_method() {
        let mut frame = Frame::default();
        frame.id = 3;
        frame.error_code = 404;
        frame.error_msg = "No handler".into();
        let value = frame.to_value();
        assert!(value.get("result").is_none());
        assert!(value.get("method").is_none());
        assert_eq!(value["error"]["code"], 404);
    }

    #[test]
    fn parse_rejects_non_object_payload() {
        assert!(Frame::parse(b"[1,2,3]").is_err());
        assert!(Frame::parse(b"42").is_err());
    }

    #[test]
    fn parse_rejects_object_with_no_recognized_fields() {
        assert!(Frame::parse(b"{\"unrelated\":true}").is_err());
    }

    #[test]
    fn no_response_flag_round_trips() {
        let mut frame = Frame::new_request(1, "Log.Emit");
        frame.no_response = true;
        let bytes = frame.serialize();
        let parsed = Frame::parse(&bytes).unwrap();
        assert!(parsed.no_response);
    }
}
