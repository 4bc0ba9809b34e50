//! Wire types for transcript JSONL records.
//!
//! The external chat agent emits records of variable shape; decoding is
//! deliberately permissive. Unknown fields are ignored, unknown content
//! variants degrade to `Other` and are skipped downstream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of a transcript file.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptRecord {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, rename = "type")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub message: Option<MessageBody>,
}

impl TranscriptRecord {
    pub fn is_summary(&self) -> bool {
        self.record_type.as_deref() == Some("summary")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

impl MessageBody {
    pub fn is_conversational(&self) -> bool {
        matches!(self.role.as_deref(), Some("user") | Some("assistant"))
    }

    /// Flatten the message content to plain text. Text parts of a content
    /// list are joined with newlines; tool-use and unknown parts contribute
    /// nothing.
    pub fn text(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(s)) => s.clone(),
            Some(MessageContent::Parts(parts)) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|item| match item {
                        ContentItem::Part(ContentPart::Text { text }) => Some(text.as_str()),
                        ContentItem::Str(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect();
                texts.join("\n")
            }
            None => String::new(),
        }
    }
}

/// `message.content` is either a bare string or a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentItem>),
}

/// A content-list element: a typed part, a bare string, or anything else.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentItem {
    Part(ContentPart),
    Str(String),
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
}

/// Metadata aggregated over one transcript in a single streaming pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TranscriptMetadata {
    pub files_analyzed: Vec<String>,
    pub files_edited: Vec<String>,
    pub tools_used: Vec<String>,
    pub concepts: Vec<String>,
    pub ast_elements: Vec<String>,
    pub has_code_blocks: bool,
    pub total_messages: usize,
}

/// Payload stored with every conversation chunk point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub conversation_id: String,
    pub chunk_index: usize,
    pub timestamp: String,
    pub project: String,
    pub start_role: String,
    pub message_count: usize,
    pub total_messages: usize,
    pub message_index: usize,
    pub message_indices: Vec<usize>,
    #[serde(flatten)]
    pub metadata: TranscriptMetadata,
}
