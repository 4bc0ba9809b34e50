//! Streaming transcript chunker and metadata extractor.
//!
//! Transcripts can reach hundreds of megabytes; both passes read the file
//! line by line and never hold more than one chunk's worth of messages in
//! memory. All metadata accumulators have hard caps enforced on insert.

use crate::error::{AppError, AppResult};
use crate::models::transcript::{ContentItem, ContentPart, TranscriptMetadata, TranscriptRecord};
use crate::utils::token_estimator::estimate_tokens;
use chrono::Utc;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

const MAX_CONCEPTS: usize = 10;
const MAX_AST_ELEMENTS: usize = 30;
const MAX_CODE_BLOCKS_PER_MESSAGE: usize = 5;
const MAX_ELEMENTS_PER_BLOCK: usize = 10;
const MAX_FILE_REFS: usize = 20;
const MAX_TOOLS: usize = 15;
const MAX_CONCEPT_MESSAGES: usize = 50;
const MAX_CONCEPT_CHARS_PER_MESSAGE: usize = 1000;

const EDIT_TOOLS: [&str; 4] = ["Edit", "Write", "MultiEdit", "NotebookEdit"];

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n]*\n?(.*?)```").expect("invalid code fence regex"));

static FUNCTION_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Line-anchored declarations first (Rust, Python), permissive
        // JS/TS-style patterns as fallback.
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+([A-Za-z_]\w*)",
        r"(?m)^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(",
        r"(?:function|const|let|var)\s+(\w+)\s*(?:=\s*)?(?:\([^)]*\)|\s*=>)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid function regex"))
    .collect()
});

static CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:class|interface|struct|enum|trait)\s+(\w+)").expect("invalid class regex")
});

static CONCEPT_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("docker", r"(?i)\b(?:docker|container|compose|dockerfile)\b"),
        ("testing", r"(?i)\b(?:test|testing|unittest|pytest|jest)\b"),
        (
            "database",
            r"(?i)\b(?:database|sql|postgres|mysql|mongodb|qdrant)\b",
        ),
        ("api", r"(?i)\b(?:api|rest|graphql|endpoint)\b"),
        (
            "security",
            r"(?i)\b(?:security|auth|authentication|encryption)\b",
        ),
        (
            "performance",
            r"(?i)\b(?:performance|optimization|cache|speed)\b",
        ),
        ("debugging", r"(?i)\b(?:debug|debugging|error|bug|trace)\b"),
        ("deployment", r"(?i)\b(?:deploy|deployment|ci/cd|production)\b"),
        ("git", r"(?i)\b(?:git|commit|branch|merge|pull request)\b"),
        ("mcp", r"(?i)\b(?:mcp|model context protocol)\b"),
        (
            "embeddings",
            r"(?i)\b(?:embedding|vector|semantic|similarity)\b",
        ),
    ]
    .iter()
    .map(|(name, pattern)| (*name, Regex::new(pattern).expect("invalid concept regex")))
    .collect()
});

/// One message captured for chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMessage {
    pub role: String,
    pub content: String,
    /// 1-based ordinal over user/assistant messages; 0 for anything else.
    pub message_index: usize,
}

/// A contiguous slice of transcript messages destined for one vector point.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    pub messages: Vec<ChunkMessage>,
}

impl MessageChunk {
    /// Serialized chunk text: `ROLE: content` blocks separated by blank
    /// lines, in buffer order.
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn start_role(&self) -> String {
        self.messages
            .first()
            .map(|m| m.role.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn message_indices(&self) -> Vec<usize> {
        self.messages
            .iter()
            .filter(|m| m.message_index > 0)
            .map(|m| m.message_index)
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Streaming pass 2: buffer up to `max_messages` messages per chunk.
pub struct ChunkReader {
    lines: Lines<BufReader<File>>,
    max_messages: usize,
    buffer: Vec<ChunkMessage>,
    message_ordinal: usize,
    skipped_lines: usize,
    exhausted: bool,
}

impl ChunkReader {
    pub fn open(path: &Path, max_messages: usize) -> AppResult<Self> {
        let file = File::open(path)
            .map_err(|e| AppError::FileFailed(format!("{}: {}", path.display(), e)))?;
        Ok(ChunkReader {
            lines: BufReader::new(file).lines(),
            max_messages: max_messages.max(1),
            buffer: Vec::new(),
            message_ordinal: 0,
            skipped_lines: 0,
            exhausted: false,
        })
    }

    /// Number of malformed lines skipped so far.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    pub fn next_chunk(&mut self) -> AppResult<Option<MessageChunk>> {
        if self.exhausted {
            return Ok(None);
        }

        while let Some(line) = self.lines.next() {
            let line = line.map_err(|e| AppError::FileFailed(format!("read error: {}", e)))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record: TranscriptRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(_) => {
                    self.skipped_lines += 1;
                    continue;
                }
            };

            if record.is_summary() {
                continue;
            }
            let Some(message) = record.message else {
                continue;
            };
            let Some(role) = message.role.clone() else {
                continue;
            };
            let content = message.text();
            if content.is_empty() {
                continue;
            }

            let message_index = if message.is_conversational() {
                self.message_ordinal += 1;
                self.message_ordinal
            } else {
                0
            };

            self.buffer.push(ChunkMessage {
                role,
                content,
                message_index,
            });

            if self.buffer.len() >= self.max_messages {
                return Ok(Some(MessageChunk {
                    messages: std::mem::take(&mut self.buffer),
                }));
            }
        }

        self.exhausted = true;
        if self.buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(MessageChunk {
                messages: std::mem::take(&mut self.buffer),
            }))
        }
    }
}

/// Split a chunk whose token estimate exceeds `max_tokens` along message
/// boundaries. A single message beyond the budget stays whole here; the
/// provider's char-level split-and-average handles it downstream.
pub fn split_oversized_chunk(
    chunk: MessageChunk,
    max_tokens: usize,
    estimation_ratio: usize,
) -> Vec<MessageChunk> {
    if estimate_tokens(&chunk.text(), estimation_ratio) <= max_tokens {
        return vec![chunk];
    }

    let mut pieces = Vec::new();
    let mut current: Vec<ChunkMessage> = Vec::new();
    let mut current_tokens = 0usize;

    for message in chunk.messages {
        let message_tokens = estimate_tokens(&message.content, estimation_ratio);
        if !current.is_empty() && current_tokens + message_tokens > max_tokens {
            pieces.push(MessageChunk {
                messages: std::mem::take(&mut current),
            });
            current_tokens = 0;
        }
        current_tokens += message_tokens;
        current.push(message);
    }
    if !current.is_empty() {
        pieces.push(MessageChunk { messages: current });
    }

    pieces
}

/// Streaming pass 1: aggregate transcript metadata and capture the first
/// timestamp. Returns `(metadata, first_timestamp)`.
pub fn extract_metadata(path: &Path) -> AppResult<(TranscriptMetadata, String)> {
    let file =
        File::open(path).map_err(|e| AppError::FileFailed(format!("{}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);

    let mut metadata = TranscriptMetadata::default();
    let mut first_timestamp: Option<String> = None;
    let mut concept_text = String::new();
    let mut concept_messages = 0usize;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Stopping metadata pass on read error: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: TranscriptRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => continue,
        };

        if first_timestamp.is_none() {
            first_timestamp = record.timestamp.clone();
        }

        let Some(message) = record.message else {
            continue;
        };
        if message.is_conversational() {
            metadata.total_messages += 1;
        }

        let mut text_content = String::new();
        match &message.content {
            Some(crate::models::transcript::MessageContent::Text(s)) => {
                text_content.push_str(s);
            }
            Some(crate::models::transcript::MessageContent::Parts(items)) => {
                for item in items {
                    match item {
                        ContentItem::Part(ContentPart::Text { text }) => {
                            text_content.push_str(text);
                            scan_code_blocks(text, &mut metadata);
                        }
                        ContentItem::Part(ContentPart::ToolUse { name, input }) => {
                            record_tool_use(name, input, &mut metadata);
                        }
                        ContentItem::Str(s) => text_content.push_str(s),
                        ContentItem::Other(_) => {}
                    }
                }
            }
            None => {}
        }

        if !text_content.is_empty() && concept_messages < MAX_CONCEPT_MESSAGES {
            let clipped = truncate_at_char_boundary(&text_content, MAX_CONCEPT_CHARS_PER_MESSAGE);
            concept_text.push_str(clipped);
            concept_text.push(' ');
            concept_messages += 1;
        }
    }

    metadata.concepts = extract_concepts(&concept_text);

    let first_timestamp = first_timestamp.unwrap_or_else(|| Utc::now().to_rfc3339());
    Ok((metadata, first_timestamp))
}

fn scan_code_blocks(text: &str, metadata: &mut TranscriptMetadata) {
    if !text.contains("```") {
        return;
    }
    metadata.has_code_blocks = true;
    if metadata.ast_elements.len() >= MAX_AST_ELEMENTS {
        return;
    }

    for captures in CODE_FENCE_RE
        .captures_iter(text)
        .take(MAX_CODE_BLOCKS_PER_MESSAGE)
    {
        if metadata.ast_elements.len() >= MAX_AST_ELEMENTS {
            break;
        }
        let block = &captures[1];
        for element in extract_ast_elements(block)
            .into_iter()
            .take(MAX_ELEMENTS_PER_BLOCK)
        {
            if metadata.ast_elements.len() >= MAX_AST_ELEMENTS {
                break;
            }
            if !metadata.ast_elements.contains(&element) {
                metadata.ast_elements.push(element);
            }
        }
    }
}

fn record_tool_use(name: &str, input: &Value, metadata: &mut TranscriptMetadata) {
    if !name.is_empty()
        && !metadata.tools_used.iter().any(|t| t == name)
        && metadata.tools_used.len() < MAX_TOOLS
    {
        metadata.tools_used.push(name.to_string());
    }

    let is_edit = EDIT_TOOLS.contains(&name);
    if let Some(file_ref) = input.get("file_path").and_then(Value::as_str) {
        if is_edit {
            push_capped(&mut metadata.files_edited, file_ref, MAX_FILE_REFS);
        } else {
            push_capped(&mut metadata.files_analyzed, file_ref, MAX_FILE_REFS);
        }
    }
    if let Some(file_ref) = input.get("path").and_then(Value::as_str) {
        push_capped(&mut metadata.files_analyzed, file_ref, MAX_FILE_REFS);
    }
}

fn push_capped(list: &mut Vec<String>, value: &str, cap: usize) {
    if list.len() < cap && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Harvest `func:`/`class:` symbols from a fenced code block.
pub fn extract_ast_elements(code: &str) -> Vec<String> {
    let mut elements = Vec::new();

    for re in FUNCTION_RES.iter() {
        for captures in re.captures_iter(code) {
            let element = format!("func:{}", &captures[1]);
            if !elements.contains(&element) {
                elements.push(element);
            }
        }
    }
    for captures in CLASS_RE.captures_iter(code) {
        let element = format!("class:{}", &captures[1]);
        if !elements.contains(&element) {
            elements.push(element);
        }
    }

    elements
}

/// Match the concatenated text against the fixed concept table; table order
/// defines output order.
pub fn extract_concepts(text: &str) -> Vec<String> {
    let mut concepts = Vec::new();
    for (concept, pattern) in CONCEPT_PATTERNS.iter() {
        if concepts.len() >= MAX_CONCEPTS {
            break;
        }
        if pattern.is_match(text) {
            concepts.push((*concept).to_string());
        }
    }
    concepts
}

fn truncate_at_char_boundary(text: &str, mut max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    while max > 0 && !text.is_char_boundary(max) {
        max -= 1;
    }
    &text[..max]
}
