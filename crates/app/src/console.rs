use std::collections::HashMap;
use std::fmt::Write;

use ray_chat::{ConversationSnapshot, FailureKind, MessageId, Role, TurnId};

const ASSISTANT_PREFIX: &str = "assistant> ";

/// The one line shown for a failed turn, or `None` for a cancel.
pub fn failure_line(kind: FailureKind) -> Option<&'static str> {
    match kind {
        FailureKind::Cancelled => None,
        FailureKind::EmptyBody => Some("Empty response body"),
        _ => Some("Failed to send message. Please try again."),
    }
}

#[derive(Debug, Default)]
struct PrintedMessage {
    bytes: usize,
    finished: bool,
}

/// Turns successive snapshots into incremental terminal output.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    printed: HashMap<MessageId, PrintedMessage>,
    last_version: u64,
    reported_failure: Option<TurnId>,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of the newest snapshot rendered so far.
    pub fn last_version(&self) -> u64 {
        self.last_version
    }

    /// Returns the text not yet shown for `snapshot`.
    pub fn render(&mut self, snapshot: &ConversationSnapshot) -> String {
        let mut output = String::new();
        if snapshot.version <= self.last_version {
            return output;
        }
        self.last_version = snapshot.version;

        if snapshot.messages.is_empty() {
            self.printed.clear();
        }

        for message in snapshot
            .messages
            .iter()
            .filter(|message| message.role == Role::Assistant)
        {
            let printed = self.printed.entry(message.id).or_default();
            if printed.finished {
                continue;
            }
            if printed.bytes == 0 && !message.content.is_empty() {
                output.push_str(ASSISTANT_PREFIX);
            }

            if let Some(fresh) = message.content.get(printed.bytes..) {
                output.push_str(fresh);
                printed.bytes = message.content.len();
            }

            if !message.is_streaming() {
                printed.finished = true;
                if message.partial {
                    output.push_str(" [interrupted]");
                }
                if printed.bytes > 0 {
                    output.push('\n');
                }
            }
        }

        if let Some(failure) = snapshot.status.failure()
            && self.reported_failure != Some(failure.turn_id)
        {
            self.reported_failure = Some(failure.turn_id);
            if let Some(line) = failure_line(failure.kind) {
                let _ = writeln!(output, "error: {line}");
            }
        }

        output
    }
}
