//! The WAMP v1 message model: a closed [`MessageType`] enumeration, a tagged-union
//! [`Message`], and a bidirectional JSON-array codec.
//!
//! Every variant's wire form is a JSON array whose first element is the integer
//! type code from the table below; [`Message::decode`]/[`Message::encode`] convert
//! between that array form and a `Message` value. Structural equality on `Message`
//! (`PartialEq`) is defined via the encoded form, per the original's
//! `WAMPMessage.__eq__` (`self.json == other.json`).

mod uri;
pub use uri::Uri;

use std::collections::VecDeque;
use std::convert::TryInto;
use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, WampResult};

/// The closed enumeration of the nine WAMP v1 message codes.
///
/// `name` and `code` are a bijection fixed by the wire-format table in the
/// protocol spec; [`MessageType::of_name`] is case-insensitive, matching the
/// original's `UppercaseAliasingMixin`-based lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Welcome = 0,
    Prefix = 1,
    Call = 2,
    CallResult = 3,
    CallError = 4,
    Subscribe = 5,
    Unsubscribe = 6,
    Publish = 7,
    Event = 8,
}

const MESSAGE_TYPE_NAMES: [(&str, MessageType); 9] = [
    ("WELCOME", MessageType::Welcome),
    ("PREFIX", MessageType::Prefix),
    ("CALL", MessageType::Call),
    ("CALLRESULT", MessageType::CallResult),
    ("CALLERROR", MessageType::CallError),
    ("SUBSCRIBE", MessageType::Subscribe),
    ("UNSUBSCRIBE", MessageType::Unsubscribe),
    ("PUBLISH", MessageType::Publish),
    ("EVENT", MessageType::Event),
];

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        MESSAGE_TYPE_NAMES[self.code() as usize].0
    }

    pub fn of_code(code: u8) -> WampResult<MessageType> {
        MESSAGE_TYPE_NAMES
            .get(code as usize)
            .map(|&(_, ty)| ty)
            .ok_or_else(|| Error::invalid_type(format!("{}", code)))
    }

    /// Case-insensitive lookup by canonical name, e.g. `"call"` or `"Call"`.
    pub fn of_name(name: &str) -> WampResult<MessageType> {
        MESSAGE_TYPE_NAMES
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|&(_, ty)| ty)
            .ok_or_else(|| Error::invalid_type(name.to_string()))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The PUBLISH filter: either the `exclude_me` shorthand or an explicit
/// exclude/eligible pair. Modeled as an enum (rather than a bare `bool` plus
/// two `Vec`s) so the "exclude_me can't combine with a non-empty eligible
/// list" invariant from the protocol spec is enforced by construction instead
/// of by a runtime check.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PublishFilter {
    #[default]
    None,
    /// Wire form `[..., true]` — don't deliver the event back to the publisher.
    ExcludeMe,
    /// Wire form `[..., exclude]` or `[..., exclude, eligible]`.
    Explicit {
        exclude: Vec<String>,
        eligible: Vec<String>,
    },
}

impl PublishFilter {
    pub fn explicit(exclude: Vec<String>, eligible: Vec<String>) -> PublishFilter {
        if exclude.is_empty() && eligible.is_empty() {
            PublishFilter::None
        } else {
            PublishFilter::Explicit { exclude, eligible }
        }
    }
}

/// A single WAMP v1 protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Welcome {
        session_id: String,
        protocol_version: i64,
        server_ident: i64,
    },
    Prefix {
        prefix: String,
        uri: Uri,
    },
    Call {
        call_id: String,
        proc_uri: Uri,
        args: Vec<Value>,
    },
    CallResult {
        call_id: String,
        result: Value,
    },
    CallError {
        call_id: String,
        error_uri: String,
        error_desc: String,
        error_details: Option<Value>,
    },
    Subscribe {
        topic_uri: Uri,
    },
    Unsubscribe {
        topic_uri: Uri,
    },
    Publish {
        topic_uri: Uri,
        event: Value,
        filter: PublishFilter,
    },
    Event {
        topic_uri: Uri,
        event: Value,
    },
}

impl Message {
    pub fn welcome(session_id: impl Into<String>) -> Message {
        Message::Welcome {
            session_id: session_id.into(),
            protocol_version: 1,
            server_ident: 1,
        }
    }

    pub fn prefix(prefix: impl Into<String>, uri: impl Into<Uri>) -> Message {
        Message::Prefix {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }

    pub fn call(call_id: impl Into<String>, proc_uri: impl Into<Uri>, args: Vec<Value>) -> Message {
        Message::Call {
            call_id: call_id.into(),
            proc_uri: proc_uri.into(),
            args,
        }
    }

    pub fn call_result(call_id: impl Into<String>, result: Value) -> Message {
        Message::CallResult {
            call_id: call_id.into(),
            result,
        }
    }

    pub fn call_error(
        call_id: impl Into<String>,
        error_uri: impl Into<String>,
        error_desc: impl Into<String>,
        error_details: Option<Value>,
    ) -> Message {
        Message::CallError {
            call_id: call_id.into(),
            error_uri: error_uri.into(),
            error_desc: error_desc.into(),
            error_details,
        }
    }

    pub fn subscribe(topic_uri: impl Into<Uri>) -> Message {
        Message::Subscribe {
            topic_uri: topic_uri.into(),
        }
    }

    pub fn unsubscribe(topic_uri: impl Into<Uri>) -> Message {
        Message::Unsubscribe {
            topic_uri: topic_uri.into(),
        }
    }

    pub fn publish(topic_uri: impl Into<Uri>, event: Value) -> Message {
        Message::Publish {
            topic_uri: topic_uri.into(),
            event,
            filter: PublishFilter::None,
        }
    }

    pub fn publish_exclude_me(topic_uri: impl Into<Uri>, event: Value) -> Message {
        Message::Publish {
            topic_uri: topic_uri.into(),
            event,
            filter: PublishFilter::ExcludeMe,
        }
    }

    pub fn publish_filtered(
        topic_uri: impl Into<Uri>,
        event: Value,
        exclude: Vec<String>,
        eligible: Vec<String>,
    ) -> Message {
        Message::Publish {
            topic_uri: topic_uri.into(),
            event,
            filter: PublishFilter::explicit(exclude, eligible),
        }
    }

    pub fn event(topic_uri: impl Into<Uri>, event: Value) -> Message {
        Message::Event {
            topic_uri: topic_uri.into(),
            event,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Welcome { .. } => MessageType::Welcome,
            Message::Prefix { .. } => MessageType::Prefix,
            Message::Call { .. } => MessageType::Call,
            Message::CallResult { .. } => MessageType::CallResult,
            Message::CallError { .. } => MessageType::CallError,
            Message::Subscribe { .. } => MessageType::Subscribe,
            Message::Unsubscribe { .. } => MessageType::Unsubscribe,
            Message::Publish { .. } => MessageType::Publish,
            Message::Event { .. } => MessageType::Event,
        }
    }

    /// Decode a JSON-array wire message, e.g. `"[7,\"t\",\"e\",true]"`.
    pub fn decode(text: &str) -> WampResult<Message> {
        let value: Value = serde_json::from_str(text)?;
        Message::from_value(value)
    }

    /// Encode to the minimal JSON-array wire form (trailing optional slots
    /// omitted per-variant, as described by the protocol spec).
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.to_value()).expect("Message wire form is always valid JSON")
    }

    fn to_value(&self) -> Value {
        let mut items = vec![Value::from(self.message_type().code())];
        match self {
            Message::Welcome {
                session_id,
                protocol_version,
                server_ident,
            } => {
                items.push(Value::from(session_id.clone()));
                items.push(Value::from(*protocol_version));
                items.push(Value::from(*server_ident));
            }
            Message::Prefix { prefix, uri } => {
                items.push(Value::from(prefix.clone()));
                items.push(Value::from(uri.0.clone()));
            }
            Message::Call {
                call_id,
                proc_uri,
                args,
            } => {
                items.push(Value::from(call_id.clone()));
                items.push(Value::from(proc_uri.0.clone()));
                items.extend(args.iter().cloned());
            }
            Message::CallResult { call_id, result } => {
                items.push(Value::from(call_id.clone()));
                items.push(result.clone());
            }
            Message::CallError {
                call_id,
                error_uri,
                error_desc,
                error_details,
            } => {
                items.push(Value::from(call_id.clone()));
                items.push(Value::from(error_uri.clone()));
                items.push(Value::from(error_desc.clone()));
                if let Some(details) = error_details {
                    if !details.is_null() {
                        items.push(details.clone());
                    }
                }
            }
            Message::Subscribe { topic_uri } | Message::Unsubscribe { topic_uri } => {
                items.push(Value::from(topic_uri.0.clone()));
            }
            Message::Publish {
                topic_uri,
                event,
                filter,
            } => {
                items.push(Value::from(topic_uri.0.clone()));
                items.push(event.clone());
                match filter {
                    PublishFilter::None => {}
                    PublishFilter::ExcludeMe => items.push(Value::from(true)),
                    PublishFilter::Explicit { exclude, eligible } => {
                        items.push(Value::from(exclude.clone()));
                        if !eligible.is_empty() {
                            items.push(Value::from(eligible.clone()));
                        }
                    }
                }
            }
            Message::Event { topic_uri, event } => {
                items.push(Value::from(topic_uri.0.clone()));
                items.push(event.clone());
            }
        }
        Value::Array(items)
    }

    fn from_value(value: Value) -> WampResult<Message> {
        let mut items = match value {
            Value::Array(items) => items,
            other => return Err(Error::malformed(format!("expected a JSON array, got {}", other))),
        };
        if items.is_empty() {
            return Err(Error::malformed("empty message array"));
        }
        let code = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::malformed("message type code must be a non-negative integer"))?;
        let code: u8 = code
            .try_into()
            .map_err(|_| Error::invalid_type(format!("{}", code)))?;
        let message_type = MessageType::of_code(code)?;
        let rest: Vec<Value> = items.drain(1..).collect();
        decode_body(message_type, rest)
    }
}

fn take_string(items: &mut VecDeque<Value>, what: &str) -> WampResult<String> {
    match items.pop_front() {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(Error::malformed(format!("expected {} to be a string, got {}", what, other))),
        None => Err(Error::malformed(format!("missing {}", what))),
    }
}

fn take_i64(items: &mut VecDeque<Value>, what: &str, default: i64) -> WampResult<i64> {
    match items.pop_front() {
        Some(v) => v
            .as_i64()
            .ok_or_else(|| Error::malformed(format!("expected {} to be an integer, got {}", what, v))),
        None => Ok(default),
    }
}

fn decode_body(message_type: MessageType, rest: Vec<Value>) -> WampResult<Message> {
    let mut items: VecDeque<Value> = rest.into();
    match message_type {
        MessageType::Welcome => {
            let session_id = take_string(&mut items, "session_id")?;
            let protocol_version = take_i64(&mut items, "protocol_version", 1)?;
            let server_ident = take_i64(&mut items, "server_ident", 1)?;
            if !items.is_empty() {
                return Err(Error::malformed("WELCOME takes at most 3 arguments"));
            }
            Ok(Message::Welcome {
                session_id,
                protocol_version,
                server_ident,
            })
        }
        MessageType::Prefix => {
            let prefix = take_string(&mut items, "prefix")?;
            let uri = take_string(&mut items, "uri")?;
            if !items.is_empty() {
                return Err(Error::malformed("PREFIX takes exactly 2 arguments"));
            }
            Ok(Message::prefix(prefix, uri))
        }
        MessageType::Call => {
            let call_id = take_string(&mut items, "call_id")?;
            let proc_uri = take_string(&mut items, "proc_uri")?;
            let args: Vec<Value> = items.into();
            Ok(Message::call(call_id, proc_uri, args))
        }
        MessageType::CallResult => {
            let call_id = take_string(&mut items, "call_id")?;
            let result = items.pop_front().unwrap_or(Value::Null);
            if !items.is_empty() {
                return Err(Error::malformed("CALLRESULT takes exactly 2 arguments"));
            }
            Ok(Message::call_result(call_id, result))
        }
        MessageType::CallError => {
            let call_id = take_string(&mut items, "call_id")?;
            let error_uri = take_string(&mut items, "error_uri")?;
            let error_desc = take_string(&mut items, "error_desc")?;
            let error_details = match items.pop_front() {
                Some(Value::Null) | None => None,
                Some(other) => Some(other),
            };
            if !items.is_empty() {
                return Err(Error::malformed("CALLERROR takes at most 4 arguments"));
            }
            Ok(Message::call_error(call_id, error_uri, error_desc, error_details))
        }
        MessageType::Subscribe => {
            let topic_uri = take_string(&mut items, "topic_uri")?;
            if !items.is_empty() {
                return Err(Error::malformed("SUBSCRIBE takes exactly 1 argument"));
            }
            Ok(Message::subscribe(topic_uri))
        }
        MessageType::Unsubscribe => {
            let topic_uri = take_string(&mut items, "topic_uri")?;
            if !items.is_empty() {
                return Err(Error::malformed("UNSUBSCRIBE takes exactly 1 argument"));
            }
            Ok(Message::unsubscribe(topic_uri))
        }
        MessageType::Publish => {
            let topic_uri = take_string(&mut items, "topic_uri")?;
            let event = items.pop_front().unwrap_or(Value::Null);
            let filter = match items.pop_front() {
                None => PublishFilter::None,
                Some(Value::Bool(true)) => {
                    if !items.is_empty() {
                        return Err(Error::malformed(
                            "PUBLISH exclude_me shorthand cannot combine with an eligible list",
                        ));
                    }
                    PublishFilter::ExcludeMe
                }
                Some(Value::Bool(false)) => PublishFilter::None,
                Some(Value::Array(exclude)) => {
                    let exclude = values_to_strings(exclude, "exclude")?;
                    let eligible = match items.pop_front() {
                        None => Vec::new(),
                        Some(Value::Array(eligible)) => values_to_strings(eligible, "eligible")?,
                        Some(other) => {
                            return Err(Error::malformed(format!("expected eligible list, got {}", other)))
                        }
                    };
                    if !items.is_empty() {
                        return Err(Error::malformed("PUBLISH takes at most 4 arguments"));
                    }
                    PublishFilter::explicit(exclude, eligible)
                }
                Some(other) => {
                    return Err(Error::malformed(format!(
                        "expected PUBLISH filter slot to be a bool or array, got {}",
                        other
                    )))
                }
            };
            Ok(Message::Publish {
                topic_uri: Uri::new(topic_uri),
                event,
                filter,
            })
        }
        MessageType::Event => {
            let topic_uri = take_string(&mut items, "topic_uri")?;
            let event = items.pop_front().unwrap_or(Value::Null);
            if !items.is_empty() {
                return Err(Error::malformed("EVENT takes exactly 2 arguments"));
            }
            Ok(Message::event(topic_uri, event))
        }
    }
}

fn values_to_strings(values: Vec<Value>, what: &str) -> WampResult<Vec<String>> {
    values
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            other => Err(Error::malformed(format!("expected {} entries to be strings, got {}", what, other))),
        })
        .collect()
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Message, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(de::Error::custom)
    }
}
