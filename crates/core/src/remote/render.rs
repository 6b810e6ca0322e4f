//! Default markdown <-> HTML renderer.

use pulldown_cmark::{html, CowStr, Event, Options, Parser};

use super::Renderer;

/// GFM-flavoured markdown to HTML via `pulldown-cmark`, HTML back to
/// markdown via `html2md`. Raw HTML in markdown is escaped, not passed
/// through.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    fn options() -> Options {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options
    }
}

impl Renderer for MarkdownRenderer {
    fn to_remote(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, Self::options()).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(CowStr::from(raw.into_string())),
            other => other,
        });
        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }

    fn to_local(&self, html: &str) -> String {
        html2md::parse_html(html).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_to_html() {
        let html = MarkdownRenderer.to_remote("# Title\n\nSome *emphasis* and ~~gone~~.\n");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>emphasis</em>"));
        assert!(html.contains("<del>gone</del>"));
    }

    #[test]
    fn test_tables_render() {
        let html = MarkdownRenderer.to_remote("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn test_raw_html_is_escaped() {
        let html = MarkdownRenderer.to_remote("<script>alert(1)</script>\n");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_html_to_markdown() {
        let md = MarkdownRenderer.to_local("<h2>Part</h2><p>Hello <strong>there</strong></p>");
        assert!(md.contains("Part"));
        assert!(md.contains("**there**"));
    }
}
