use crate::channel::{FeedRow, MediaKind};
use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info.clone()),
        label.style(theme().dim.clone()),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim.clone()).to_string()
}

pub fn muted(text: &str) -> String {
    text.style(theme().muted.clone()).to_string()
}

/// One line per entry: title and host
pub fn feed_link(row: &FeedRow) {
    let host = row.link_host().unwrap_or_default();
    println!(
        "{} {} {}",
        Icons::NEWS,
        row.title.style(theme().title.clone()),
        muted(&format!("({})", host))
    );
    println!("   {}", row.link.style(theme().link.clone()));
}

/// Entry with its excerpt and embedded media
pub fn feed_more(row: &FeedRow) {
    feed_link(row);
    let excerpt = row.excerpt().trim();
    if !excerpt.is_empty() {
        for line in excerpt.lines().take(4) {
            println!("   {}", dim(line));
        }
    }
    let media = match row.media_kind() {
        Some(MediaKind::Youtube) => row
            .youtube_embed_url()
            .map(|embed| (Icons::VIDEO, embed)),
        Some(MediaKind::Audio) => Some((Icons::AUDIO, row.media_url.clone())),
        Some(MediaKind::Image) => Some((Icons::IMAGE, row.media_url.clone())),
        None => None,
    };
    if let Some((icon, url)) = media {
        println!("   {} {}", icon, url.style(theme().media.clone()));
    }
    println!();
}

pub fn stored_file(key: &str, size: usize) {
    println!(
        "{} {} {}",
        Icons::FILE.style(theme().info.clone()),
        key,
        muted(&human_bytes(size as u64))
    );
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
