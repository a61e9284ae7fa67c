//! Text splitting for segment production.
//!
//! The default paragraph mode emits one segment per blank-line-separated
//! paragraph and only falls back to size-splitting when a single paragraph
//! exceeds the configured chunk size. Sentence mode packs sentences up to
//! the size limit; length mode is a plain sliding window.

use docqa_core::error::{DocQaError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// How a parsed document is split into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitType {
    #[default]
    Paragraph,
    Sentence,
    Length,
}

impl SplitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Sentence => "sentence",
            Self::Length => "length",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "paragraph" => Ok(Self::Paragraph),
            "sentence" => Ok(Self::Sentence),
            "length" => Ok(Self::Length),
            _ => Err(DocQaError::config(format!("unknown split type '{}'", s))),
        }
    }
}

/// Splits text into segments with a configured size and overlap.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    split_type: SplitType,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize, split_type: SplitType) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size.saturating_sub(1)),
            split_type,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split text into segments; whitespace-only input yields nothing.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self.split_type {
            SplitType::Paragraph => self.split_paragraphs(text),
            SplitType::Sentence => self.split_sentences(text),
            SplitType::Length => self.split_by_length(text),
        }
    }

    fn split_paragraphs(&self, text: &str) -> Vec<String> {
        let mut segments = Vec::new();
        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            if paragraph.chars().count() <= self.chunk_size {
                segments.push(paragraph.to_string());
            } else {
                segments.extend(self.split_by_length(paragraph));
            }
        }
        segments
    }

    fn split_sentences(&self, text: &str) -> Vec<String> {
        let sentences = sentence_boundaries(text);
        let mut segments = Vec::new();
        let mut current = String::new();

        for sentence in sentences {
            let sentence_len = sentence.chars().count();
            let current_len = current.chars().count();

            if current_len + sentence_len > self.chunk_size && !current.is_empty() {
                segments.push(current.clone());
                current.clear();
            }

            if sentence_len > self.chunk_size {
                segments.extend(self.split_by_length(&sentence));
                continue;
            }

            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&sentence);
        }

        if !current.trim().is_empty() {
            segments.push(current);
        }
        segments
    }

    fn split_by_length(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut segments = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            segments.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += self.chunk_size - self.overlap;
        }

        segments
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(500, 50, SplitType::Paragraph)
    }
}

/// Split on sentence terminators followed by whitespace and an upper-case
/// letter, keeping the terminator with its sentence.
fn sentence_boundaries(text: &str) -> Vec<String> {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| Regex::new(r"([.!?。！？])\s+").expect("valid sentence regex"));

    let mut sentences = Vec::new();
    let mut last_end = 0;

    for found in boundary.find_iter(text) {
        let end = found.start() + found.as_str().trim_end().len();
        let sentence = text[last_end..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        last_end = found.end();
    }

    let tail = text[last_end..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}
