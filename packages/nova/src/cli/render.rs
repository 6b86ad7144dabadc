//! Plain-text rendering of the transcript for the terminal.

use nova_chat::{ChatMessage, END_TOKEN, Feedback, Source};

/// Turns successive snapshots of a streaming answer into printable deltas.
///
/// A snapshot can end in the first few bytes of the sentinel (it was split
/// across chunks); those bytes are held back until the stream shows whether
/// they are text or metadata.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    printed: usize,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The part of `text` not printed yet. With `finished`, nothing is held
    /// back.
    pub fn delta<'a>(&mut self, text: &'a str, finished: bool) -> &'a str {
        let end = if finished {
            text.len()
        } else {
            text.len() - partial_sentinel_len(text)
        };
        if self.printed > end || !text.is_char_boundary(self.printed) {
            // snapshot shrank past what we showed; nothing sane to add
            self.printed = end;
            return "";
        }
        let delta = &text[self.printed..end];
        self.printed = end;
        delta
    }

    pub fn reset(&mut self) {
        self.printed = 0;
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the
/// sentinel.
fn partial_sentinel_len(text: &str) -> usize {
    let token = END_TOKEN.as_bytes();
    let bytes = text.as_bytes();
    (1..token.len().min(bytes.len() + 1))
        .rev()
        .find(|&n| bytes.ends_with(&token[..n]))
        .unwrap_or(0)
}

pub fn format_source(index: usize, source: &Source) -> String {
    let title = if source.title.is_empty() {
        source.file_name.as_str()
    } else {
        source.title.as_str()
    };
    let mut line = format!("  [{}] {}", index + 1, title);
    if let Some(page) = source.page_number {
        line.push_str(&format!(", p. {}", page));
    }
    if !source.link.is_empty() {
        line.push_str(&format!(" <{}>", source.link));
    }
    line
}

/// Sources, follow-up questions and the rating hint shown under an answer.
pub fn answer_footer(message: &ChatMessage, collect_feedback: bool) -> Vec<String> {
    let mut lines = Vec::new();

    if !message.sources.is_empty() {
        lines.push("Sources:".to_string());
        lines.extend(
            message
                .sources
                .iter()
                .enumerate()
                .map(|(i, s)| format_source(i, s)),
        );
    }

    if !message.promptback_questions.is_empty() {
        lines.push("You could also ask:".to_string());
        lines.extend(
            message
                .promptback_questions
                .iter()
                .map(|q| format!("  - {}", q)),
        );
    }

    if collect_feedback && message.accepts_feedback() {
        match message.feedback {
            Some(Feedback::Liked) => lines.push("(rated: liked)".to_string()),
            Some(Feedback::Disliked) => lines.push("(rated: disliked)".to_string()),
            None => lines.push("(/like or /dislike to rate this answer)".to_string()),
        }
    }

    lines
}
