//! Small one-shot helpers built on a [`ChatProvider`]: session titles and
//! agent system-prompt drafting.

use crate::provider::ChatProvider;
use crate::types::Message;
use crate::{Error, Result};
use futures::StreamExt;
use futures::stream::Stream;
use std::pin::Pin;

/// Longest title, in characters
pub const MAX_TITLE_CHARS: usize = 60;

/// Used when the model returns nothing usable
pub const DEFAULT_TITLE: &str = "New Chat";

const TITLE_PROMPT: &str = "Generate a short, descriptive title (at most 6 words) for a \
conversation that starts with the message below. Reply with the title only: no quotes, \
no punctuation at the end, no explanation.";

const INSTRUCTIONS_PROMPT: &str = "You write system prompts for AI assistants. Given a short \
description of an assistant, write clear, specific instructions in the second person \
(\"You are...\") covering its role, tone, what it should and should not do, and how it \
should use any tools it has. Reply with the instructions only.";

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Title for a session, from its first user message
pub async fn generate_title(provider: &dyn ChatProvider, first_message: &str) -> Result<String> {
    let messages = [Message::system(TITLE_PROMPT), Message::user(first_message)];
    let raw = provider.chat_completion(&messages, &[]).await?;
    Ok(clean_title(&raw))
}

/// Trim, strip wrapping quotes, keep the first line, cap the length
pub fn clean_title(raw: &str) -> String {
    const QUOTES: &[char] = &['"', '\'', '`', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];

    let first_line = raw.trim().lines().next().unwrap_or_default();
    let unquoted = first_line
        .trim()
        .trim_matches(|c: char| QUOTES.contains(&c) || c.is_whitespace());
    let unlabelled = unquoted
        .strip_prefix("Title:")
        .map(|rest| rest.trim().trim_matches(|c: char| QUOTES.contains(&c)))
        .unwrap_or(unquoted);

    let title: String = unlabelled.chars().take(MAX_TITLE_CHARS).collect();
    let title = title.trim_end();
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title.to_string()
    }
}

/// Draft a system prompt for an agent described in a sentence or two
pub async fn generate_agent_instructions(
    provider: &dyn ChatProvider,
    description: &str,
) -> Result<String> {
    if description.trim().is_empty() {
        return Err(Error::invalid_input("Agent description is empty"));
    }
    let messages = [Message::system(INSTRUCTIONS_PROMPT), Message::user(description)];
    let text = provider.chat_completion(&messages, &[]).await?;
    Ok(text.trim().to_string())
}

/// Same as [`generate_agent_instructions`], yielding text as it streams in
pub async fn stream_agent_instructions(
    provider: &dyn ChatProvider,
    description: &str,
) -> Result<TextStream> {
    if description.trim().is_empty() {
        return Err(Error::invalid_input("Agent description is empty"));
    }
    let messages = [Message::system(INSTRUCTIONS_PROMPT), Message::user(description)];
    let events = provider.stream_chat_completion(&messages, &[]).await?;

    let text = events.filter_map(|event| async move {
        match event {
            Ok(chunk) => chunk.content.map(Ok),
            Err(e) => Some(Err(e)),
        }
    });
    Ok(Box::pin(text))
}
