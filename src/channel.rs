//! Channel rows - entries of the remote feed dataset

use serde::{Deserialize, Serialize};
use url::Url;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "aac", "m4a"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png", "gif", "svg", "webp"];

/// One entry of the channel view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedRow {
    pub id: String,
    pub title: String,
    pub link: String,
    pub media_url: String,
    pub summary: String,
    pub content: String,
    pub media_descriptions: String,
    pub published_ms: i64,
}

/// Embeddable media behind a row's `media_url`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Youtube,
    Audio,
    Image,
}

impl FeedRow {
    /// Map a row of [`crate::engine::schema::SELECT_TOP_K`]
    pub fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        let text = |idx: usize| -> duckdb::Result<String> {
            Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
        };

        Ok(Self {
            id: text(0)?,
            title: text(1)?,
            link: text(2)?,
            media_url: text(3)?,
            summary: text(4)?,
            content: text(5)?,
            media_descriptions: text(6)?,
            published_ms: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
        })
    }

    /// Body text: summary, then content, then media descriptions
    pub fn excerpt(&self) -> &str {
        [&self.summary, &self.content, &self.media_descriptions]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Host of the entry link, if it parses
    pub fn link_host(&self) -> Option<String> {
        Url::parse(&self.link)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        if self.media_url.is_empty() {
            return None;
        }
        let url = Url::parse(&self.media_url).ok()?;
        if url.host_str().is_some_and(|host| host.contains("youtube.com")) {
            return Some(MediaKind::Youtube);
        }

        let last = url.path().rsplit('/').next().unwrap_or("");
        let extension = last.rsplit_once('.').map(|(_, ext)| ext)?;
        if AUDIO_EXTENSIONS.contains(&extension) {
            Some(MediaKind::Audio)
        } else if IMAGE_EXTENSIONS.contains(&extension) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }

    /// Embed address for a YouTube entry, taken from the `v` parameter of the link
    pub fn youtube_embed_url(&self) -> Option<String> {
        let link = Url::parse(&self.link).ok()?;
        let video_id = link
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())?;
        Some(format!("https://www.youtube.com/embed/{}", video_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(media_url: &str) -> FeedRow {
        FeedRow {
            id: "1".to_string(),
            link: "https://www.youtube.com/watch?v=abc123".to_string(),
            media_url: media_url.to_string(),
            ..FeedRow::default()
        }
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(row("https://www.youtube.com/v/abc123").media_kind(), Some(MediaKind::Youtube));
        assert_eq!(row("https://cdn.example.com/ep/42.mp3").media_kind(), Some(MediaKind::Audio));
        assert_eq!(row("https://cdn.example.com/img/cover.webp").media_kind(), Some(MediaKind::Image));
        assert_eq!(row("https://cdn.example.com/doc.pdf").media_kind(), None);
        assert_eq!(row("https://cdn.example.com/noext").media_kind(), None);
        assert_eq!(row("").media_kind(), None);
    }

    #[test]
    fn test_excerpt_fallback() {
        let mut r = row("");
        assert_eq!(r.excerpt(), "");
        r.media_descriptions = "described".to_string();
        assert_eq!(r.excerpt(), "described");
        r.content = "content".to_string();
        assert_eq!(r.excerpt(), "content");
        r.summary = "summary".to_string();
        assert_eq!(r.excerpt(), "summary");
    }

    #[test]
    fn test_youtube_embed_url() {
        assert_eq!(
            row("").youtube_embed_url().as_deref(),
            Some("https://www.youtube.com/embed/abc123")
        );
        assert_eq!(row("").link_host().as_deref(), Some("www.youtube.com"));
    }
}
