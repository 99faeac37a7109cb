//! Output assembly: markdown rendering, document extraction and HTML sanitisation

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd, html};

/// Embeddable tags allowed on top of the default safe set
pub const TAG_ALLOW_LIST: &[&str] = &["audio", "video", "img", "picture", "iframe", "source"];

const MEDIA_ATTRIBUTES: &[&str] = &["src", "controls", "type", "width", "height", "title"];
const IFRAME_ATTRIBUTES: &[&str] = &["src", "width", "height", "title", "allow", "allowfullscreen", "frameborder"];

/// Render markdown to HTML
pub fn render_markdown(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Text of the first code block, if the markdown has one
pub fn first_code_block(markdown: &str) -> Option<String> {
    let mut inside = false;
    let mut code = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::CodeBlock(_)) => inside = true,
            Event::End(TagEnd::CodeBlock) if inside => return Some(code),
            Event::Text(text) if inside => code.push_str(&text),
            _ => {}
        }
    }
    // Unterminated fence at the end of a partial response
    inside.then_some(code)
}

/// Strip everything outside the safe set plus [`TAG_ALLOW_LIST`]
pub fn sanitize_html(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder.add_tags(TAG_ALLOW_LIST);
    builder.add_generic_attributes(&["id"]);
    for tag in ["audio", "video", "source", "picture"] {
        builder.add_tag_attributes(tag, MEDIA_ATTRIBUTES);
    }
    builder.add_tag_attributes("iframe", IFRAME_ATTRIBUTES);
    builder.clean(html).to_string()
}

/// Trusted document from a finished completion
///
/// The model is asked for an HTML page, usually wrapped in a fenced block.
pub fn extract_document(output: &str) -> String {
    let document = first_code_block(output).unwrap_or_else(|| output.to_string());
    sanitize_html(&document)
}
