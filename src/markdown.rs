use pulldown_cmark::{Event, Options, Parser, Tag};

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// The text a reader sees once `markdown` is rendered: markup removed, one
/// newline after each block. Partial input (an unterminated code fence, half
/// a list) renders as whatever the parser makes of it at that moment.
pub fn to_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());

    for event in Parser::new_ext(markdown, options()) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(Tag::Paragraph)
            | Event::End(Tag::Heading(..))
            | Event::End(Tag::Item)
            | Event::End(Tag::TableRow)
            | Event::End(Tag::TableHead) => out.push('\n'),
            Event::End(Tag::TableCell) => out.push('\t'),
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraph_text() {
        assert_eq!(to_text("Hello **world**"), "Hello world\n");
        assert_eq!(to_text("# Title\n\nbody"), "Title\nbody\n");
    }

    #[test]
    fn test_unterminated_fence_resolves_when_closed() {
        let partial = to_text("```rust\nfn main() {");
        assert!(partial.contains("fn main() {"));
        assert!(!partial.contains("```"));

        let closed = to_text("```rust\nfn main() {}\n```\nafter");
        assert!(closed.starts_with("fn main() {}"));
        assert!(closed.ends_with("after\n"));
    }

    #[test]
    fn test_text_keeps_inline_code_and_lists() {
        assert_eq!(to_text("- one\n- `two`"), "one\ntwo\n");
    }
}
