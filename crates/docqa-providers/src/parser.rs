//! Document parsers.
//!
//! Format-specific extraction (PDF, Office formats) is an external
//! collaborator; this adapter covers plain text and markdown, which is
//! enough for the ingestion pipeline and its tests.

use async_trait::async_trait;
use docqa_core::error::{DocQaError, Result};
use docqa_core::traits::DocumentParser;
use std::path::Path;
use tracing::debug;

/// Parser for UTF-8 text files (txt, md, and friends).
pub struct PlainTextParser;

#[async_trait]
impl DocumentParser for PlainTextParser {
    async fn parse(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(DocQaError::not_found("file", path.display().to_string()));
        }
        let content = tokio::fs::read(path).await?;
        self.parse_bytes(&content, &path.to_string_lossy()).await
    }

    async fn parse_bytes(&self, content: &[u8], name: &str) -> Result<String> {
        debug!("parsing {} ({} bytes)", name, content.len());
        let text = String::from_utf8_lossy(content);
        // Strip a UTF-8 BOM if present.
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        Ok(text.to_string())
    }
}
