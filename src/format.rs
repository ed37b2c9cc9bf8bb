use crate::chat::ChatMessage;

pub const DEFAULT_CHAR_LIMIT: usize = 70;
const TRUNCATION_SUFFIX: &str = " 以下省略";

/// Turns a chat message into the text that is read aloud.
///
/// Rules are checked in order and the first match wins: attachments, links,
/// replies, mentions, then plain text clipped to the character limit.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    char_limit: usize,
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_CHAR_LIMIT)
    }
}

impl MessageFormatter {
    pub fn new(char_limit: usize) -> Self {
        Self { char_limit }
    }

    pub fn format(&self, message: &ChatMessage) -> String {
        let name = &message.author.display_name;

        if !message.attachments.is_empty() {
            "画像".to_string()
        } else if message
            .content
            .split_whitespace()
            .any(|word| word.starts_with("http"))
        {
            "URL".to_string()
        } else if message.reply_to.is_some() {
            format!("{}がリプ", name)
        } else if !message.mentions.is_empty() {
            format!("{}がメンション", name)
        } else {
            self.truncate(&message.content)
        }
    }

    fn truncate(&self, text: &str) -> String {
        match text.char_indices().nth(self.char_limit) {
            Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_SUFFIX),
            None => text.to_string(),
        }
    }
}

pub fn joined_announcement(display_name: &str) -> String {
    format!("{} が参加しました。", display_name)
}

pub fn left_announcement(display_name: &str) -> String {
    format!("{} が退出しました。", display_name)
}
