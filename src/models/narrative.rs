//! Structured narrative summaries produced by the remote batch LLM.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Narrative {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub outcome: Outcome,
}

impl Narrative {
    /// Labelled, delimiter-joined concatenation of the populated fields.
    /// This is the text that gets embedded for narrative search.
    pub fn searchable_text(&self) -> String {
        let mut parts = Vec::new();

        if !self.summary.is_empty() {
            parts.push(format!("Summary: {}", self.summary));
        }
        if !self.problem.is_empty() {
            parts.push(format!("Problem: {}", self.problem));
        }
        if !self.solution.is_empty() {
            parts.push(format!("Solution: {}", self.solution));
        }
        if !self.decisions.is_empty() {
            parts.push(format!("Decisions: {}", self.decisions.join(", ")));
        }
        if !self.files_modified.is_empty() {
            parts.push(format!("Files: {}", self.files_modified.join(", ")));
        }
        if !self.key_insights.is_empty() {
            parts.push(format!("Insights: {}", self.key_insights.join(", ")));
        }
        if !self.tags.is_empty() {
            parts.push(format!("Tags: {}", self.tags.join(", ")));
        }

        parts.join(" | ")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Success,
    Partial,
    Failed,
    Ongoing,
}

/// One parsed line of a completed batch job's output file.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResultEntry {
    pub conversation_id: String,
    pub narrative: Option<Narrative>,
    pub tokens_used: Option<Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_skips_empty_fields() {
        let narrative = Narrative {
            summary: "Fixed the import race".to_string(),
            decisions: vec!["serialize state writes".to_string()],
            ..Default::default()
        };
        assert_eq!(
            narrative.searchable_text(),
            "Summary: Fixed the import race | Decisions: serialize state writes"
        );
    }

    #[test]
    fn test_decode_with_defaults() {
        let narrative: Narrative =
            serde_json::from_str(r#"{"summary":"did things","outcome":"partial"}"#).unwrap();
        assert_eq!(narrative.outcome, Outcome::Partial);
        assert_eq!(narrative.complexity, Complexity::Medium);
        assert!(narrative.tags.is_empty());
    }

    #[test]
    fn test_enum_wire_format_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&Outcome::Ongoing).unwrap(),
            "\"ongoing\""
        );
        assert_eq!(serde_json::to_string(&Complexity::High).unwrap(), "\"high\"");
    }
}
