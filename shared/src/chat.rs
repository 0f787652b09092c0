use std::collections::VecDeque;

pub const MAX_CHAT_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub sender: String,
    pub text: String,
    pub color: [f32; 3],
}

/// Bounded chat history, oldest lines evicted first
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sender: impl Into<String>, text: impl Into<String>, color: [f32; 3]) {
        if self.entries.len() == MAX_CHAT_LINES {
            self.entries.pop_front();
        }
        self.entries.push_back(ChatEntry {
            sender: sender.into(),
            text: text.into(),
            color,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&ChatEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
