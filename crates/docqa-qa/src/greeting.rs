//! Greeting detection.
//!
//! Greetings bypass retrieval and get a short friendly reply. The word set
//! is a constructor parameter; the default covers common English and
//! Chinese openers. Matching is exact or short-prefix after stripping
//! punctuation.

/// Detects greeting questions.
pub struct GreetingDetector {
    greetings: Vec<String>,
}

impl GreetingDetector {
    /// Build a detector over a custom greeting set.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            greetings: words
                .into_iter()
                .map(|w| normalize(w.as_ref()))
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// Whether the question is a greeting.
    pub fn is_greeting(&self, question: &str) -> bool {
        let normalized = normalize(question);
        if normalized.is_empty() {
            return false;
        }
        self.greetings.iter().any(|greeting| {
            normalized == *greeting
                || (normalized.starts_with(greeting.as_str())
                    && normalized.chars().count() <= greeting.chars().count() + 3)
        })
    }
}

impl Default for GreetingDetector {
    fn default() -> Self {
        Self::new([
            "hi",
            "hello",
            "hey",
            "good morning",
            "good afternoon",
            "good evening",
            "你好",
            "您好",
            "嗨",
            "早上好",
            "下午好",
            "晚上好",
        ])
    }
}

/// Lowercase and drop ASCII and common CJK punctuation.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation() && !"，。！？、；：“”‘’（）【】".contains(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_greetings() {
        let detector = GreetingDetector::default();
        assert!(detector.is_greeting("hello"));
        assert!(detector.is_greeting("Hello!"));
        assert!(detector.is_greeting("你好"));
        assert!(detector.is_greeting("你好！"));
    }

    #[test]
    fn test_short_prefix_match() {
        let detector = GreetingDetector::default();
        assert!(detector.is_greeting("hi!!"));
        assert!(detector.is_greeting("hey ho"));
    }

    #[test]
    fn test_questions_are_not_greetings() {
        let detector = GreetingDetector::default();
        assert!(!detector.is_greeting("What is the capital of France?"));
        assert!(!detector.is_greeting("hello, can you summarise the report for me"));
        assert!(!detector.is_greeting(""));
    }

    #[test]
    fn test_custom_set() {
        let detector = GreetingDetector::new(["ahoy"]);
        assert!(detector.is_greeting("Ahoy!"));
        assert!(!detector.is_greeting("hello"));
    }
}
