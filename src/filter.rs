//! 良性短语过滤 - 跳过已知的例行消息

/// Messages containing any of these are routine XProtect chatter.
pub const DEFAULT_BENIGN_PHRASES: [&str; 8] = [
    "Already up to date",
    "Using XProtect rules location",
    "Forwarding detection succeeded",
    "JETSAM_REASON_MEMORY_IDLE_EXIT",
    "shutting down",
    "cleaning up",
    "XPC connection invalidated",
    "Waiting for launchd to call us",
];

/// Case-sensitive substring filter over composed messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenignPhraseFilter {
    phrases: Vec<String>,
}

impl BenignPhraseFilter {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases.into_iter().map(Into::into).collect(),
        }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn is_benign(&self, message: &str) -> bool {
        self.matching_phrase(message).is_some()
    }

    /// First configured phrase found in `message`, in configuration order.
    pub fn matching_phrase(&self, message: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|phrase| message.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

impl Default for BenignPhraseFilter {
    fn default() -> Self {
        Self::new(DEFAULT_BENIGN_PHRASES)
    }
}
