//! Minimal XML element tree built on `quick-xml` events.
//!
//! Feeds and sitemaps are small documents, so they are read into an owned
//! tree once and then walked by name. Element names keep their prefix
//! (`content:encoded`, `dc:creator`).

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use marketlore_shared::{MarketloreError, Result};

/// One XML element with its attributes, direct text, and children.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Name without any namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of the first child named `name`, if non-empty.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name)
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Text of this element and all of its descendants, depth-first.
    pub fn deep_text(&self) -> String {
        let mut out = self.text.trim().to_string();
        for child in &self.children {
            let text = child.deep_text();
            if text.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&text);
        }
        out
    }

    /// Like [`XmlNode::child_text`] but includes nested markup's text, as in
    /// Atom `type="xhtml"` content.
    pub fn child_deep_text(&self, name: &str) -> Option<String> {
        self.child(name)
            .map(XmlNode::deep_text)
            .filter(|t| !t.is_empty())
    }

    /// First non-empty text among several candidate child names.
    pub fn first_text(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|n| self.child_text(n))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search for every element with the given local name.
    pub fn descendants<'a>(&'a self, local: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.local_name() == local {
                out.push(child);
            }
            child.descendants(local, out);
        }
    }
}

/// Parse a document and return its root element.
pub fn parse_document(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // Synthetic holder so the real root can be pushed like any other child.
    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(start_node(&e)),
            Ok(Event::Empty(e)) => {
                let node = start_node(&e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1 {
                    if let Some(node) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(node);
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                append_text(&mut stack, &text);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                append_text(&mut stack, &text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(MarketloreError::parse(format!(
                    "XML error at position {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    // Unclosed elements: fold them back into their parents.
    while stack.len() > 1 {
        if let Some(node) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
            }
        }
    }

    stack
        .pop()
        .and_then(|holder| holder.children.into_iter().next())
        .ok_or_else(|| MarketloreError::parse("document has no root element"))
}

fn start_node(e: &BytesStart<'_>) -> XmlNode {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let attrs = e
        .attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned());
            (key, value)
        })
        .collect();
    XmlNode {
        name,
        attrs,
        ..XmlNode::default()
    }
}

fn append_text(stack: &mut [XmlNode], text: &str) {
    if let Some(node) = stack.last_mut() {
        if !node.text.is_empty() {
            node.text.push(' ');
        }
        node.text.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tree_with_prefixes_and_cdata() {
        let root = parse_document(
            r#"<?xml version="1.0"?>
<rss xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <item>
      <title>Hello &amp; welcome</title>
      <dc:creator><![CDATA[Jane]]></dc:creator>
      <enclosure url="https://x/y.png"/>
    </item>
  </channel>
</rss>"#,
        )
        .unwrap();
        assert_eq!(root.name, "rss");
        let item = root.child("channel").unwrap().child("item").unwrap();
        assert_eq!(item.child_text("title").as_deref(), Some("Hello & welcome"));
        assert_eq!(item.child_text("dc:creator").as_deref(), Some("Jane"));
        assert_eq!(item.child("enclosure").unwrap().attr("url"), Some("https://x/y.png"));
        assert_eq!(item.child("dc:creator").unwrap().local_name(), "creator");
    }

    #[test]
    fn deep_text_reaches_nested_markup() {
        let root = parse_document(
            r#"<entry><content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><p>Hook viewers</p><p>in <b>3</b> seconds</p></div></content></entry>"#,
        )
        .unwrap();
        assert_eq!(root.child_text("content"), None);
        assert_eq!(
            root.child_deep_text("content").as_deref(),
            Some("Hook viewers in 3 seconds")
        );
    }

    #[test]
    fn malformed_document_is_parse_error() {
        let err = parse_document("<rss><channel></rss>").unwrap_err();
        assert!(matches!(err, MarketloreError::Parse { .. }));
    }

    #[test]
    fn empty_document_is_parse_error() {
        assert!(parse_document("").is_err());
    }
}
