use std::cmp::Ordering;

use tracing::debug;

use crate::config::PromptsConfig;
use crate::models::chat::ChatMessage;

use super::token_counter::TokenCounter;
use super::types::{ConversationContext, Passage, PromptTemplate, Turn};

/// Builds the request-scoped message list sent to the generation gateway.
/// Pure: no I/O, same inputs give the same output.
pub struct ContextBuilder {
    prompts: PromptsConfig,
    history_window: usize,
}

impl ContextBuilder {
    pub fn new(prompts: PromptsConfig, history_window: usize) -> Self {
        Self {
            prompts,
            history_window,
        }
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Fixed answering rules placed ahead of the grounding block
    pub fn directives(&self) -> Vec<String> {
        let mut directives = vec![
            "Answer in the same language as the question.".to_string(),
            format!(
                "You are the assistant for {}. Use only the provided context to answer.",
                self.prompts.assistant_name
            ),
        ];

        if !self.prompts.refusal_messages.is_empty() {
            let refusals: Vec<String> = self
                .prompts
                .refusal_messages
                .iter()
                .map(|m| format!("\"{}\"", m))
                .collect();
            directives.push(format!(
                "If the answer is not in the context, reply exactly with {}.",
                refusals.join(" OR ")
            ));
        }

        directives.push(format!(
            "If the message is only a greeting, reply exactly with \"{}\".",
            self.prompts.greeting_reply
        ));

        directives.extend(self.prompts.extra_directives.iter().cloned());
        directives
    }

    /// Passage texts in descending score order, separated by blank lines
    pub fn grounding_block(passages: &[Passage]) -> String {
        let mut ranked: Vec<&Passage> = passages
            .iter()
            .filter(|p| !p.text.trim().is_empty())
            .collect();

        // Stable sort keeps retrieval order on ties; NaN ranks last
        ranked.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
        });

        ranked
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Last K history turns followed by one synthetic instruction message
    pub fn assemble(
        &self,
        passages: &[Passage],
        history: &[Turn],
        question: &str,
    ) -> ConversationContext {
        let grounding_block = Self::grounding_block(passages);

        let template = PromptTemplate {
            directives: self.directives(),
            context_block: grounding_block.clone(),
            question: question.to_string(),
        };

        let skip = history.len().saturating_sub(self.history_window);
        let mut messages: Vec<ChatMessage> =
            history.iter().skip(skip).map(Turn::to_message).collect();
        messages.push(ChatMessage::user(template.build()));

        debug!(
            "Assembled context: {} history messages, {} passages, ~{} prompt tokens",
            messages.len() - 1,
            passages.len(),
            TokenCounter::count_messages(&messages)
        );

        ConversationContext {
            messages,
            grounding_block,
        }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(PromptsConfig::default(), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use crate::services::conversation::types::{ConversationState, MemoryLimits};

    fn turns(n: usize) -> Vec<Turn> {
        let mut state = ConversationState::new("s".to_string());
        for i in 0..n {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            state.push(role, format!("turn {}", i), &MemoryLimits::default());
        }
        state.turns.into_iter().collect()
    }

    #[test]
    fn test_passages_ordered_by_score() {
        let passages = vec![
            Passage::new("low", 0.2),
            Passage::new("high", 0.9),
            Passage::new("mid-a", 0.5),
            Passage::new("mid-b", 0.5),
        ];
        assert_eq!(
            ContextBuilder::grounding_block(&passages),
            "high\n\nmid-a\n\nmid-b\n\nlow"
        );
    }

    #[test]
    fn test_nan_score_ranks_last() {
        let passages = vec![Passage::new("nan", f32::NAN), Passage::new("ok", 0.1)];
        assert_eq!(ContextBuilder::grounding_block(&passages), "ok\n\nnan");
    }

    #[test]
    fn test_empty_passages_keep_directives() {
        let builder = ContextBuilder::default();
        let context = builder.assemble(&[], &[], "What is the deadline?");

        assert_eq!(context.grounding_block, "");
        assert_eq!(context.messages.len(), 1);

        let prompt = &context.messages[0];
        assert_eq!(prompt.role, Role::User);
        assert!(prompt.content.contains("Use only the provided context"));
        assert!(prompt.content.contains("same language as the question"));
        assert!(prompt.content.contains("How can I help you?"));
        assert!(prompt.content.contains("Question: What is the deadline?"));
    }

    #[test]
    fn test_history_window_applied() {
        let builder = ContextBuilder::default();
        let history = turns(5);
        let context = builder.assemble(&[], &history, "next");

        let replayed: Vec<&str> = context.messages[..3]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(replayed, vec!["turn 2", "turn 3", "turn 4"]);
        assert_eq!(context.messages.len(), 4);
        assert_eq!(context.messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_assemble_is_pure() {
        let builder = ContextBuilder::default();
        let history = turns(2);
        let passages = vec![Passage::new("Applications close on 30 June.", 0.8)];

        let first = builder.assemble(&passages, &history, "When?");
        let second = builder.assemble(&passages, &history, "When?");
        assert_eq!(first, second);
    }

    #[test]
    fn test_refusals_and_extra_directives() {
        let prompts = PromptsConfig {
            refusal_messages: vec!["A".into(), "B".into()],
            extra_directives: vec!["Treat 'hackathon' as 'hackathon 2.0'.".into()],
            ..PromptsConfig::default()
        };
        let builder = ContextBuilder::new(prompts, 3);
        let content = &builder.assemble(&[], &[], "hi").messages[0].content;

        assert!(content.contains("\"A\" OR \"B\""));
        assert!(content.contains("hackathon 2.0"));
    }
}
