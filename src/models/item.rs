use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parameters::Difficulty;

/// Either an option index or answer text as the model wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrectAnswer {
    Index(usize),
    Text(String),
}

impl CorrectAnswer {
    pub fn is_blank(&self) -> bool {
        matches!(self, CorrectAnswer::Text(t) if t.trim().is_empty())
    }

    /// Position of the answer inside `options`, if it can be resolved.
    ///
    /// Numeric answers are indices. Text answers match an option exactly,
    /// then an option's text after its label (`"3"` for `"B. 3"`), then as a
    /// numeric index, then by option letter (`"A"`, `"B."`), then by
    /// containment.
    pub fn resolve_index(&self, options: &[String]) -> Option<usize> {
        match self {
            CorrectAnswer::Index(i) => (*i < options.len()).then_some(*i),
            CorrectAnswer::Text(raw) => {
                let text = raw.trim();
                if text.is_empty() {
                    return None;
                }
                if let Some(pos) = options.iter().position(|o| o.trim() == text) {
                    return Some(pos);
                }
                let letter = option_letter(text);
                if letter.is_none() {
                    if let Some(pos) = options.iter().position(|o| option_body(o) == Some(text)) {
                        return Some(pos);
                    }
                }
                if let Ok(i) = text.parse::<usize>() {
                    return (i < options.len()).then_some(i);
                }
                if let Some(letter) = letter {
                    if let Some(pos) = options.iter().position(|o| starts_with_label(o, letter)) {
                        return Some(pos);
                    }
                    let idx = (letter as u8 - b'A') as usize;
                    if idx < options.len() {
                        return Some(idx);
                    }
                }
                options.iter().position(|o| o.contains(text))
            }
        }
    }
}

/// `"A"`, `"b"`, `"C."`, `"D、"` → the upper-case letter.
fn option_letter(text: &str) -> Option<char> {
    let mut chars = text.chars();
    let first = chars.next()?.to_ascii_uppercase();
    if !first.is_ascii_uppercase() {
        return None;
    }
    let rest: String = chars.collect();
    matches!(rest.trim(), "" | "." | "、" | ")" | "．").then_some(first)
}

/// `"B. 3"` → `"3"`; `None` when the option carries no letter label.
fn option_body(option: &str) -> Option<&str> {
    let trimmed = option.trim();
    let mut chars = trimmed.char_indices();
    let (_, first) = chars.next()?;
    let (at, sep) = chars.next()?;
    if !first.is_ascii_alphabetic() || !matches!(sep, '.' | '、' | ')' | '．' | ':' | '：') {
        return None;
    }
    Some(trimmed[at + sep.len_utf8()..].trim())
}

fn starts_with_label(option: &str, letter: char) -> bool {
    let trimmed = option.trim_start();
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some(c), Some(sep)) => {
            c.to_ascii_uppercase() == letter && matches!(sep, '.' | '、' | ')' | '．' | ' ' | ':' | '：')
        }
        (Some(c), None) => c.to_ascii_uppercase() == letter,
        _ => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationAnnotation {
    pub structurally_compliant: bool,
    pub issues: Vec<String>,
    pub difficulty_match: bool,
    pub goal_relevant: bool,
    pub covered_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedItem {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: CorrectAnswer,
    pub explanation: String,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_knowledge_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationAnnotation>,
}

impl GeneratedItem {
    /// Lower-cased question and explanation, the text every axis searches.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.question, self.explanation).to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub id: Uuid,
    pub topic: String,
    #[serde(flatten)]
    pub item: GeneratedItem,
    pub created_at: DateTime<Utc>,
}
