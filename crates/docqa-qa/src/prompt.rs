//! RAG prompt assembly.
//!
//! Templates carry two named slots, `{{question}}` and `{{context}}`. The
//! context slot is filled by joining the retrieved texts as `【i】<text>`
//! blocks with 1-based indices.

/// Which answer template to use when context was retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateMode {
    #[default]
    Standard,
    DeepThinking,
}

const DEFAULT_TEMPLATE: &str = "You are a helpful assistant answering questions about the user's documents.\n\
Answer the question using only the context below. If the context does not\n\
contain the answer, say you don't know rather than making something up.\n\n\
Context:\n{{context}}\n\
Question: {{question}}\n\
Answer:";

const DEEP_THINKING_TEMPLATE: &str = "You are a careful analyst answering questions about the user's documents.\n\
Think through the context step by step before answering. Cite the numbered\n\
context blocks you relied on. If the context does not contain the answer,\n\
say so explicitly.\n\n\
Context:\n{{context}}\n\
Question: {{question}}\n\
Answer:";

const EMPTY_CONTEXT_TEMPLATE: &str = "No relevant content was found in the user's documents for this question.\n\
Answer from general knowledge, and start by noting that the documents do\n\
not cover it.\n\n\
Question: {{question}}\n\
Answer:";

/// Prompt templates and mode, swappable at runtime.
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub mode: TemplateMode,
    pub template: String,
    pub deep_template: String,
    pub empty_template: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            mode: TemplateMode::Standard,
            template: DEFAULT_TEMPLATE.to_string(),
            deep_template: DEEP_THINKING_TEMPLATE.to_string(),
            empty_template: EMPTY_CONTEXT_TEMPLATE.to_string(),
        }
    }
}

impl RagConfig {
    /// The template used when context was retrieved.
    pub fn answer_template(&self) -> &str {
        match self.mode {
            TemplateMode::Standard => &self.template,
            TemplateMode::DeepThinking => &self.deep_template,
        }
    }
}

/// Fill a template's slots.
pub fn render(template: &str, question: &str, contexts: &[String]) -> String {
    template
        .replace("{{context}}", &join_contexts(contexts))
        .replace("{{question}}", question)
}

fn join_contexts(contexts: &[String]) -> String {
    contexts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("【{}】{}\n\n", i + 1, text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_joining() {
        let joined = join_contexts(&["first".to_string(), "second".to_string()]);
        assert_eq!(joined, "【1】first\n\n【2】second\n\n");
    }

    #[test]
    fn test_render_fills_both_slots() {
        let prompt = render(
            "Q: {{question}}\nC: {{context}}",
            "why?",
            &["because".to_string()],
        );
        assert_eq!(prompt, "Q: why?\nC: 【1】because\n\n");
    }

    #[test]
    fn test_mode_selects_template() {
        let mut config = RagConfig::default();
        assert!(config.answer_template().contains("helpful assistant"));
        config.mode = TemplateMode::DeepThinking;
        assert!(config.answer_template().contains("step by step"));
    }

    #[test]
    fn test_default_template_admits_ignorance() {
        let config = RagConfig::default();
        assert!(config.template.contains("don't know"));
        assert!(config.empty_template.contains("general knowledge"));
    }
}
