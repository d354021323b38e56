use unicode_segmentation::UnicodeSegmentation;

use crate::models::chat::ChatMessage;

/// Deterministic token estimate used for memory budgeting
pub struct TokenCounter;

impl TokenCounter {
    const CHARS_PER_TOKEN: usize = 4;

    pub fn count_text(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.graphemes(true).count();
        char_count.div_ceil(Self::CHARS_PER_TOKEN).max(1)
    }

    pub fn count_messages(messages: &[ChatMessage]) -> usize {
        messages.iter().map(|msg| msg.estimate_tokens()).sum()
    }
}
