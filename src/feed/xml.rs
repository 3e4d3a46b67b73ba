//! Minimal owned element tree built on top of `quick-xml`'s pull reader.
//!
//! Feed extraction only needs "first child with local name X", attribute
//! lookup and direct text content, so namespaces are reduced to local names.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::error::FeedParseError;

/// Deepest element nesting accepted. Feed extraction reads at most four
/// levels; the cap keeps the tree shallow enough to drop without recursing
/// off the stack.
pub(crate) const MAX_DEPTH: usize = 256;

/// An XML element with local-name addressing.
#[derive(Debug, Clone, Default)]
pub(crate) struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Self {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let attributes = start
            .attributes()
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                let value = attr.unescape_value().map_or_else(
                    |_| String::from_utf8_lossy(&attr.value).into_owned(),
                    std::borrow::Cow::into_owned,
                );
                (key, value)
            })
            .collect();
        Self {
            name,
            attributes,
            children: Vec::new(),
            text: String::new(),
        }
    }

    /// Local name of the element.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Value of the attribute with the given local name.
    pub(crate) fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == local_name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct text and CDATA content, untrimmed.
    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    /// First child with the given local name.
    pub(crate) fn child(&self, local_name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == local_name)
    }

    /// All children with the given local name, in document order.
    pub(crate) fn children_named<'a>(
        &'a self,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children
            .iter()
            .filter(move |child| child.name == local_name)
    }

    pub(crate) fn children(&self) -> &[Element] {
        &self.children
    }
}

/// Parses a complete document and returns its root element.
///
/// # Errors
///
/// Returns [`FeedParseError::Xml`] for malformed markup, unclosed elements,
/// a missing root, more than one root or nesting deeper than [`MAX_DEPTH`].
pub(crate) fn parse_document(xml: &str) -> Result<Element, FeedParseError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            FeedParseError::xml(format!(
                "{e} at byte {}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(start) => {
                check_depth(stack.len() + 1)?;
                stack.push(Element::from_start(&start));
            }
            Event::Empty(start) => {
                check_depth(stack.len() + 1)?;
                attach(&mut stack, &mut root, Element::from_start(&start))?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| FeedParseError::xml("unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    // Undeclared HTML entities are common in feeds; keep the raw text.
                    match text.unescape() {
                        Ok(unescaped) => current.text.push_str(&unescaped),
                        Err(_) => current.text.push_str(&String::from_utf8_lossy(&text)),
                    }
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(FeedParseError::xml(format!(
            "unclosed element <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| FeedParseError::xml("document has no root element"))
}

fn check_depth(depth: usize) -> Result<(), FeedParseError> {
    if depth > MAX_DEPTH {
        return Err(FeedParseError::xml(format!(
            "elements nested deeper than {MAX_DEPTH} levels"
        )));
    }
    Ok(())
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), FeedParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(FeedParseError::xml("document has more than one root element"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_builds_tree_with_local_names() {
        let root = parse_document(
            r#"<?xml version="1.0"?>
            <a:feed xmlns:a="http://www.w3.org/2005/Atom">
                <a:title>Hello &amp; welcome</a:title>
                <a:link href="https://example.com/" rel="alternate"/>
            </a:feed>"#,
        )
        .unwrap();

        assert_eq!(root.name(), "feed");
        assert_eq!(root.child("title").unwrap().text(), "Hello & welcome");
        let link = root.child("link").unwrap();
        assert_eq!(link.attribute("href"), Some("https://example.com/"));
        assert_eq!(link.attribute("rel"), Some("alternate"));
    }

    #[test]
    fn test_parse_document_reads_cdata() {
        let root = parse_document("<rss><title><![CDATA[<b>bold</b>]]></title></rss>").unwrap();
        assert_eq!(root.child("title").unwrap().text(), "<b>bold</b>");
    }

    #[test]
    fn test_parse_document_children_named_preserves_order() {
        let root = parse_document("<c><i>1</i><x/><i>2</i></c>").unwrap();
        let texts: Vec<_> = root.children_named("i").map(Element::text).collect();
        assert_eq!(texts, vec!["1", "2"]);
        assert_eq!(root.children().len(), 3);
    }

    #[test]
    fn test_parse_document_tolerates_undeclared_entities() {
        let root = parse_document("<rss><title>a&nbsp;b</title></rss>").unwrap();
        assert!(root.child("title").unwrap().text().contains("nbsp"));
    }

    #[test]
    fn test_parse_document_rejects_mismatched_tags() {
        assert!(parse_document("<rss><channel></rss>").is_err());
    }

    #[test]
    fn test_parse_document_rejects_unclosed_root() {
        assert!(parse_document("<rss><channel></channel>").is_err());
    }

    #[test]
    fn test_parse_document_rejects_deep_nesting() {
        let depth = 200_000;
        let doc = format!("<rss>{}{}</rss>", "<a>".repeat(depth), "</a>".repeat(depth));
        let err = parse_document(&doc).unwrap_err();
        assert!(err.to_string().contains("nested deeper"), "got {err}");

        let at_limit = MAX_DEPTH - 1;
        let doc = format!(
            "<rss>{}<b/>{}</rss>",
            "<a>".repeat(at_limit - 1),
            "</a>".repeat(at_limit - 1)
        );
        assert!(parse_document(&doc).is_ok());
    }

    #[test]
    fn test_parse_document_rejects_non_xml() {
        assert!(parse_document("this is not xml").is_err());
        assert!(parse_document("").is_err());
    }
}
