//! Defines the control message protocol exchanged with the remote agent.
//!
//! Every message travels as a JSON envelope `{type, tag, data}` over the
//! transport's data channel. Outbound constructors only carry the fields the
//! agent needs for that message kind. Inbound decoding is lenient: anything
//! that is not a recognised message of this protocol is reported as
//! [`MalformedMessage`] and dropped by the caller, never surfaced.

use crate::config::{ClientConfig, LlmMessage, PIPELINE_SERVICES, ServiceOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Protocol family tag carried by every envelope.
pub const MESSAGE_TAG: &str = "realtime-ai";

/// The closed catalog of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Outbound
    Config,
    LlmGetContext,
    LlmUpdateContext,
    LlmAppendContext,
    Speak,
    Interrupt,
    // Inbound
    LlmContext,
    Transcript,
    ConfigUpdated,
    ConfigError,
    ToolCall,
    JsonCompletion,
}

impl MessageType {
    pub const ALL: [MessageType; 12] = [
        Self::Config,
        Self::LlmGetContext,
        Self::LlmUpdateContext,
        Self::LlmAppendContext,
        Self::Speak,
        Self::Interrupt,
        Self::LlmContext,
        Self::Transcript,
        Self::ConfigUpdated,
        Self::ConfigError,
        Self::ToolCall,
        Self::JsonCompletion,
    ];

    /// The wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config-update",
            Self::LlmGetContext => "llm-get-context",
            Self::LlmUpdateContext => "llm-update-context",
            Self::LlmAppendContext => "llm-append-context",
            Self::Speak => "tts-speak",
            Self::Interrupt => "tts-interrupt",
            Self::LlmContext => "llm-context",
            Self::Transcript => "transcript",
            Self::ConfigUpdated => "config-updated",
            Self::ConfigError => "config-error",
            Self::ToolCall => "tool-call",
            Self::JsonCompletion => "json-completion",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Whether the agent sends this kind to the client.
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            Self::LlmContext
                | Self::Transcript
                | Self::ConfigUpdated
                | Self::ConfigError
                | Self::ToolCall
                | Self::JsonCompletion
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an inbound payload was dropped.
#[derive(Debug, thiserror::Error)]
pub enum MalformedMessage {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope is not a JSON object")]
    NotAnObject,
    #[error("envelope has no `tag`")]
    MissingTag,
    #[error("unknown protocol tag `{0}`")]
    UnknownTag(String),
    #[error("unknown inbound message type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` payload: {reason}")]
    Payload { kind: MessageType, reason: String },
}

/// The `{type, tag, data}` envelope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: String,
    #[serde(default)]
    pub data: Value,
}

impl ControlMessage {
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            tag: MESSAGE_TAG.to_string(),
            data,
        }
    }

    /// The catalog entry for this message, if its `type` is known.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire(&self.kind)
    }

    pub fn serialize(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a raw envelope.
    ///
    /// The envelope must be a JSON object carrying this protocol's tag. The
    /// `type` is not checked here; see [`InboundMessage::try_from`].
    pub fn decode(raw: &str) -> Result<Self, MalformedMessage> {
        let value: Value = serde_json::from_str(raw)?;
        let object = value.as_object().ok_or(MalformedMessage::NotAnObject)?;
        match object.get("tag").and_then(Value::as_str) {
            None => return Err(MalformedMessage::MissingTag),
            Some(tag) if tag != MESSAGE_TAG => {
                return Err(MalformedMessage::UnknownTag(tag.to_string()));
            }
            Some(_) => {}
        }
        Ok(serde_json::from_value(value)?)
    }

    // --- Outbound constructors ---

    /// Pipeline configuration update. Only the `llm` and `tts` services are
    /// forwarded; absent services are omitted.
    pub fn config(config: &ClientConfig) -> Self {
        Self::new(
            MessageType::Config,
            json!({ "config": config.restricted_to(&PIPELINE_SERVICES) }),
        )
    }

    pub fn speak(text: &str, interrupt: bool) -> Self {
        Self::new(
            MessageType::Speak,
            json!({ "tts": { "text": text, "interrupt": interrupt } }),
        )
    }

    pub fn interrupt() -> Self {
        Self::new(MessageType::Interrupt, json!({}))
    }

    /// Asks the agent for its current LLM context; answered by `llm-context`.
    pub fn get_llm_context() -> Self {
        Self::new(MessageType::LlmGetContext, json!({}))
    }

    pub fn update_llm_context(llm: &ServiceOptions) -> Self {
        Self::new(MessageType::LlmUpdateContext, json!({ "llm": llm }))
    }

    pub fn append_llm_context(message: &LlmMessage) -> Self {
        Self::new(
            MessageType::LlmAppendContext,
            json!({ "llm": { "messages": [message] } }),
        )
    }
}

/// A speech-to-text transcript from the agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

/// A request from the agent to invoke a client-side tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCall {
    #[serde(alias = "function_name")]
    pub name: String,
    #[serde(default, alias = "arguments")]
    pub args: Value,
}

/// A decoded message the agent sent to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    LlmContext(Value),
    Transcript(Transcript),
    ConfigUpdated(ClientConfig),
    ConfigError(String),
    ToolCall(ToolCall),
    JsonCompletion(String),
}

impl InboundMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::LlmContext(_) => MessageType::LlmContext,
            Self::Transcript(_) => MessageType::Transcript,
            Self::ConfigUpdated(_) => MessageType::ConfigUpdated,
            Self::ConfigError(_) => MessageType::ConfigError,
            Self::ToolCall(_) => MessageType::ToolCall,
            Self::JsonCompletion(_) => MessageType::JsonCompletion,
        }
    }
}

impl TryFrom<ControlMessage> for InboundMessage {
    type Error = MalformedMessage;

    fn try_from(message: ControlMessage) -> Result<Self, Self::Error> {
        let kind = match message.message_type() {
            Some(kind) if kind.is_inbound() => kind,
            _ => return Err(MalformedMessage::UnknownType(message.kind)),
        };
        let payload_err = |reason: String| MalformedMessage::Payload { kind, reason };
        let data = message.data;

        match kind {
            MessageType::LlmContext => Ok(Self::LlmContext(data)),
            MessageType::Transcript => serde_json::from_value(data)
                .map(Self::Transcript)
                .map_err(|e| payload_err(e.to_string())),
            MessageType::ConfigUpdated => {
                let config = match data.get("config") {
                    Some(inner) => inner.clone(),
                    None => data,
                };
                ClientConfig::from_value(config)
                    .map(Self::ConfigUpdated)
                    .ok_or_else(|| payload_err("expected an object of service objects".into()))
            }
            MessageType::ConfigError => Ok(Self::ConfigError(match data {
                Value::String(s) => s,
                Value::Object(ref map) => match map.get("error") {
                    Some(Value::String(s)) => s.clone(),
                    _ => data.to_string(),
                },
                other => other.to_string(),
            })),
            MessageType::ToolCall => serde_json::from_value(data)
                .map(Self::ToolCall)
                .map_err(|e| payload_err(e.to_string())),
            MessageType::JsonCompletion => Ok(Self::JsonCompletion(match data {
                Value::String(s) => s,
                other => other.to_string(),
            })),
            _ => Err(MalformedMessage::UnknownType(kind.as_str().to_string())),
        }
    }
}
