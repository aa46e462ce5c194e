//! JSON message envelope (§4.A, §6): the `{"t": ..., "i": [...]}` wire
//! format shared by the NEC and interface UDP channels.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A single metadata element as carried in a message's `i` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInfo {
    /// Element pk_id.
    #[serde(default)]
    pub d: i64,
    /// Stringified value.
    #[serde(default)]
    pub v: String,
    /// Press count (reserved by upstream callers; passed through unused here).
    #[serde(default)]
    pub n: i32,
    #[serde(default)]
    pub model: i32,
}

impl Default for MetaInfo {
    fn default() -> Self {
        Self {
            d: 0,
            v: String::new(),
            n: 0,
            model: 0,
        }
    }
}

/// The closed set of message types recognized on either UDP channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    MdIn,
    MdOut,
    MdChange,
    SetValue,
    AddRegListen,
    ImitateDate,
    ButtonGrade,
    EndGrade,
    SetValueAck,
    AddRegListenAck,
    /// Anything outside the closed set above — a forward-compatible escape
    /// hatch, not a parse failure: `t` was present and a string.
    Unknown,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MdIn => "md_in",
            Self::MdOut => "md_out",
            Self::MdChange => "md_change",
            Self::SetValue => "setValue",
            Self::AddRegListen => "addRegListen",
            Self::ImitateDate => "imitateDate",
            Self::ButtonGrade => "buttonGrade",
            Self::EndGrade => "endGrade",
            Self::SetValueAck => "setValueAck",
            Self::AddRegListenAck => "addRegListenAck",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(t: &str) -> Self {
        match t {
            "md_in" => Self::MdIn,
            "md_out" => Self::MdOut,
            "md_change" => Self::MdChange,
            "setValue" => Self::SetValue,
            "addRegListen" => Self::AddRegListen,
            "imitateDate" => Self::ImitateDate,
            "buttonGrade" => Self::ButtonGrade,
            "endGrade" => Self::EndGrade,
            "setValueAck" => Self::SetValueAck,
            "addRegListenAck" => Self::AddRegListenAck,
            _ => Self::Unknown,
        }
    }
}

/// The message envelope itself. `t` is required by the wire format;
/// `i` defaults to empty when absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    pub t: String,
    #[serde(default)]
    pub i: Vec<MetaInfo>,
}

impl Message {
    pub fn new(t: impl Into<String>) -> Self {
        Self {
            t: t.into(),
            i: Vec::new(),
        }
    }

    pub fn with_items(t: impl Into<String>, i: Vec<MetaInfo>) -> Self {
        Self { t: t.into(), i }
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_str(&self.t)
    }
}

/// Parse a compact-JSON datagram into a [`Message`]. A message is *valid*
/// only when `t` is present and a string; anything else is a
/// [`ProtocolError`] and the datagram must be dropped without mutating
/// state.
pub fn parse(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

    let t = value
        .get("t")
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    let i = match value.get("i") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<MetaInfo>(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    };

    Ok(Message { t, i })
}

/// Emit a message as compact (no whitespace) JSON bytes.
pub fn emit(msg: &Message) -> Vec<u8> {
    serde_json::to_vec(msg).expect("Message serialization is infallible")
}

/// Acknowledgement helper: `{"t": <type>, "ok": 0|1}`.
pub fn emit_ack(t: &str, ok: bool) -> Vec<u8> {
    let value = serde_json::json!({ "t": t, "ok": if ok { 1 } else { 0 } });
    serde_json::to_vec(&value).expect("ack serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_requires_t_as_string() {
        assert_eq!(parse(b"{}").unwrap_err(), ProtocolError::MissingType);
        assert_eq!(
            parse(br#"{"t":1}"#).unwrap_err(),
            ProtocolError::MissingType
        );
    }

    #[test]
    fn parse_rejects_malformed_json() {
        assert!(matches!(
            parse(b"not json"),
            Err(ProtocolError::MalformedJson(_))
        ));
    }

    #[test]
    fn absent_i_yields_empty_list() {
        let msg = parse(br#"{"t":"md_in"}"#).unwrap();
        assert_eq!(msg.t, "md_in");
        assert!(msg.i.is_empty());
    }

    #[test]
    fn meta_info_defaults_missing_fields() {
        let msg = parse(br#"{"t":"setValue","i":[{"d":42}]}"#).unwrap();
        assert_eq!(
            msg.i[0],
            MetaInfo {
                d: 42,
                v: String::new(),
                n: 0,
                model: 0
            }
        );
    }

    #[test]
    fn round_trips_through_emit_and_parse() {
        let msg = Message::with_items(
            "md_in",
            vec![MetaInfo {
                d: 7,
                v: "1".into(),
                n: 0,
                model: 0,
            }],
        );
        let bytes = emit(&msg);
        assert_eq!(parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn emit_is_compact() {
        let msg = Message::new("md_in");
        let bytes = emit(&msg);
        assert!(!bytes.iter().any(|&b| b == b' ' || b == b'\n'));
    }

    #[test]
    fn message_type_round_trips_known_types() {
        for t in [
            "md_in",
            "md_out",
            "md_change",
            "setValue",
            "addRegListen",
            "imitateDate",
            "buttonGrade",
            "endGrade",
        ] {
            let mt = MessageType::from_str(t);
            assert_ne!(mt, MessageType::Unknown, "{t} should be recognized");
            assert_eq!(mt.as_str(), t);
        }
    }
}
