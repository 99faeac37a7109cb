//! Chat request assembly

use serde::{Deserialize, Serialize};

use crate::channel::FeedRow;

pub const LINE_BREAK: &str = "\n";
pub const LINE_SEPARATOR: &str = "-----------------------";

pub const SYSTEM_PROMPT: &str = "\
You're an experienced and creative web developer.

The user will give you a list of messages and each message will
contain an entry from a content feed. It could be a blog post,
a podcast episode, a video clip or audio recording. Let's call
these content feed entries \"posts\".

You should respond with a valid html page that will render in
the user's browser.

You should not include all the posts in your response. Instead,
you should synthesise and summarise where possible and select
5 distinct posts that you find most appealing.

All of the posts will contain an 'id' and a 'link'. If you
reference a post, you must cite it with that link and make sure
that the link's id attribute contains the post's id.

You should use semantic html. But avoid using inline styles or
css classes.

Additional helpful rules are:
- If the post's 'media_url' is audio, use the appropriate html
  element to embed the media
- If the media_url is a YouTube video, use the appropriate
  YouTube embed code instead
- Feel free to use emoji, icons, svgs and images as you see fit
- Have fun!
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of a streaming chat-completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl ChatRequest {
    /// System instruction followed by one user message per row
    pub fn for_rows(model: impl Into<String>, rows: &[FeedRow]) -> Self {
        let messages = std::iter::once(ChatMessage::system(SYSTEM_PROMPT))
            .chain(rows.iter().map(|row| ChatMessage::user(row_document(row))))
            .collect();
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }
}

/// Textual encoding of one row
pub fn row_document(row: &FeedRow) -> String {
    [
        format!("id: {}", row.id),
        format!("title: {}", row.title),
        format!("link: {}", row.link),
        format!("media_url: {}", row.media_url),
        LINE_SEPARATOR.to_string(),
        row.excerpt().to_string(),
        LINE_BREAK.to_string(),
    ]
    .join(LINE_BREAK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> FeedRow {
        FeedRow {
            id: "42".to_string(),
            title: "Rust 2024".to_string(),
            link: "https://blog.example.com/rust".to_string(),
            media_url: "https://cdn.example.com/rust.mp3".to_string(),
            content: "The edition ships.".to_string(),
            ..FeedRow::default()
        }
    }

    #[test]
    fn test_row_document_layout() {
        let doc = row_document(&sample_row());
        assert_eq!(
            doc,
            "id: 42\ntitle: Rust 2024\nlink: https://blog.example.com/rust\n\
             media_url: https://cdn.example.com/rust.mp3\n-----------------------\n\
             The edition ships.\n\n"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest::for_rows("gpt-4o-mini", &[sample_row(), sample_row()]);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], SYSTEM_PROMPT);
        assert_eq!(messages[1]["role"], "user");
        assert!(messages[2]["content"].as_str().unwrap().starts_with("id: 42\n"));
    }
}
