//! A small owned XML document model.
//!
//! Documents are read with `quick-xml` and written back compactly (no
//! indentation). Whitespace-only text is treated as insignificant and
//! dropped while parsing; the XML declaration and any DOCTYPE are not kept.

use crate::error::ExtensionsError;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;

/// The declaration written in front of serialized documents.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// A node inside an element or around the root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    Comment(String),
    /// Target and content of a processing instruction, e.g. `xml-stylesheet href="a.xsl"`
    ProcessingInstruction(String),
}

/// An element with its attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name, including any prefix (`soap:Envelope`)
    pub name: String,

    /// Attributes in document order, values unescaped
    pub attributes: Vec<(String, String)>,

    /// Child nodes in document order
    pub children: Vec<XmlNode>,

    /// Written as `<name />` while the element has no children
    pub self_closing: bool,
}

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    /// Comments and processing instructions before the root
    pub prolog: Vec<XmlNode>,
    root: XmlElement,
    /// Comments and processing instructions after the root
    pub epilog: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: false,
        }
    }

    /// Create `<name>text</name>`, validating the name.
    pub fn with_text(name: &str, text: &str) -> Result<Self, ExtensionsError> {
        if !is_valid_name(name) {
            return Err(ExtensionsError::invalid_argument(
                "name",
                format!("'{}' is not a valid XML name", name),
            ));
        }

        let mut element = Self::new(name);
        element.children.push(XmlNode::Text(text.to_string()));
        Ok(element)
    }

    /// Look up an attribute value by its qualified name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Child elements, skipping text and other nodes.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Concatenated text and CDATA of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) | XmlNode::CData(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Insert a node before all existing children.
    pub fn prepend_child<N: Into<XmlNode>>(&mut self, node: N) {
        self.children.insert(0, node.into());
    }

    /// Strip prefixes and namespace declarations from this element and its
    /// descendants.
    fn strip_namespaces(&mut self) {
        self.name = local_name(&self.name).to_string();

        let mut kept: Vec<(String, String)> = Vec::with_capacity(self.attributes.len());
        for (key, value) in self.attributes.drain(..) {
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            // xml: is bound by definition and never declared
            let key = if key.starts_with("xml:") {
                key
            } else {
                local_name(&key).to_string()
            };
            if kept.iter().any(|(existing, _)| *existing == key) {
                continue;
            }
            kept.push((key, value));
        }
        self.attributes = kept;

        for child in &mut self.children {
            if let XmlNode::Element(element) = child {
                element.strip_namespaces();
            }
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, ExtensionsError> {
        let mut element = Self::new(std::str::from_utf8(start.name().as_ref())?);

        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = std::str::from_utf8(attribute.key.as_ref())?.to_string();
            let value = attribute.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }

        Ok(element)
    }
}

impl From<XmlElement> for XmlNode {
    fn from(element: XmlElement) -> Self {
        XmlNode::Element(element)
    }
}

impl XmlDocument {
    /// Create a document around a root element.
    pub fn new(root: XmlElement) -> Self {
        Self {
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    /// Parse a document from text.
    ///
    /// # Errors
    ///
    /// `ExtensionsError::Xml` for malformed markup, mismatched or unclosed
    /// tags, text outside the root, more than one root, or no root at all.
    pub fn parse(text: &str) -> Result<Self, ExtensionsError> {
        let mut reader = Reader::from_str(text);
        let mut builder = TreeBuilder::default();

        loop {
            match reader.read_event()? {
                Event::Start(start) => builder.open(XmlElement::from_start(&start)?),
                Event::Empty(start) => {
                    let mut element = XmlElement::from_start(&start)?;
                    element.self_closing = true;
                    builder.attach(element.into())?;
                }
                Event::End(_) => builder.close()?,
                Event::Text(text) => {
                    let text = text.unescape()?;
                    if !text.trim().is_empty() {
                        builder.attach(XmlNode::Text(text.into_owned()))?;
                    }
                }
                Event::CData(data) => {
                    let data = String::from_utf8(data.into_inner().into_owned())?;
                    builder.attach(XmlNode::CData(data))?;
                }
                Event::Comment(comment) => {
                    let comment = String::from_utf8(comment.into_inner().into_owned())?;
                    builder.attach(XmlNode::Comment(comment))?;
                }
                Event::PI(instruction) => {
                    let instruction = std::str::from_utf8(&instruction)?.to_string();
                    builder.attach(XmlNode::ProcessingInstruction(instruction))?;
                }
                Event::Decl(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        builder.finish()
    }

    /// Read everything from `reader` and parse it as a document.
    ///
    /// A leading UTF-8 byte order mark is ignored.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ExtensionsError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
        Self::parse(std::str::from_utf8(body)?)
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    /// Serialize with a UTF-8 XML declaration into a stream at position 0.
    pub fn to_stream(&self) -> Cursor<Vec<u8>> {
        Cursor::new(format!("{}{}", XML_DECLARATION, self).into_bytes())
    }

    /// A copy of this document with every namespace declaration removed and
    /// every element and attribute prefix stripped.
    ///
    /// The reserved `xml:` prefix is kept. When stripping a prefix makes an
    /// attribute name collide with an earlier one, the later attribute is
    /// dropped.
    pub fn remove_namespaces(&self) -> XmlDocument {
        let mut document = self.clone();
        document.root.strip_namespaces();
        document
    }
}

impl FromStr for XmlDocument {
    type Err = ExtensionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for XmlNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XmlNode::Element(element) => fmt::Display::fmt(element, f),
            XmlNode::Text(text) => f.write_str(&partial_escape(text.as_str())),
            XmlNode::CData(data) => write!(f, "<![CDATA[{}]]>", data),
            XmlNode::Comment(comment) => write!(f, "<!--{}-->", comment),
            XmlNode::ProcessingInstruction(instruction) => write!(f, "<?{}?>", instruction),
        }
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (key, value) in &self.attributes {
            write!(f, " {}=\"{}\"", key, escape(value.as_str()))?;
        }

        if self.children.is_empty() && self.self_closing {
            return f.write_str(" />");
        }

        f.write_str(">")?;
        for child in &self.children {
            fmt::Display::fmt(child, f)?;
        }
        write!(f, "</{}>", self.name)
    }
}

impl fmt::Display for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.prolog {
            fmt::Display::fmt(node, f)?;
        }
        fmt::Display::fmt(&self.root, f)?;
        for node in &self.epilog {
            fmt::Display::fmt(node, f)?;
        }
        Ok(())
    }
}

/// Assembles the tree while events stream in.
#[derive(Default)]
struct TreeBuilder {
    open: Vec<XmlElement>,
    prolog: Vec<XmlNode>,
    root: Option<XmlElement>,
    epilog: Vec<XmlNode>,
}

impl TreeBuilder {
    fn open(&mut self, element: XmlElement) {
        self.open.push(element);
    }

    fn close(&mut self) -> Result<(), ExtensionsError> {
        let element = self
            .open
            .pop()
            .ok_or_else(|| ExtensionsError::xml("end tag without a matching start tag"))?;
        self.attach(element.into())
    }

    fn attach(&mut self, node: XmlNode) -> Result<(), ExtensionsError> {
        if let Some(parent) = self.open.last_mut() {
            parent.children.push(node);
            return Ok(());
        }

        match node {
            XmlNode::Element(element) => {
                if self.root.is_some() {
                    return Err(ExtensionsError::xml(format!(
                        "multiple root elements: <{}> follows the root",
                        element.name
                    )));
                }
                self.root = Some(element);
            }
            XmlNode::Text(_) | XmlNode::CData(_) => {
                return Err(ExtensionsError::xml("text outside the root element"));
            }
            other if self.root.is_none() => self.prolog.push(other),
            other => self.epilog.push(other),
        }

        Ok(())
    }

    fn finish(self) -> Result<XmlDocument, ExtensionsError> {
        if let Some(unclosed) = self.open.last() {
            return Err(ExtensionsError::xml(format!(
                "unexpected end of document: <{}> is not closed",
                unclosed.name
            )));
        }

        let root = self
            .root
            .ok_or_else(|| ExtensionsError::xml("document has no root element"))?;

        Ok(XmlDocument {
            prolog: self.prolog,
            root,
            epilog: self.epilog,
        })
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_string;

    #[test]
    fn test_parse_and_display_compact() {
        let xml = "<Root><Child1>data1</Child1><Child2>data2</Child2></Root>";
        let document = XmlDocument::parse(xml).unwrap();
        assert_eq!(document.to_string(), xml);
        assert_eq!(document.root().child_elements().count(), 2);
    }

    #[test]
    fn test_insignificant_whitespace_dropped() {
        let document = XmlDocument::parse("<Root>\n  <Child>value</Child>\n</Root>\n").unwrap();
        assert_eq!(document.to_string(), "<Root><Child>value</Child></Root>");
    }

    #[test]
    fn test_declaration_not_retained() {
        let document =
            XmlDocument::parse(r#"<?xml version="1.0" encoding="utf-8"?><Root></Root>"#).unwrap();
        assert_eq!(document.to_string(), "<Root></Root>");
    }

    #[test]
    fn test_self_closing_preserved() {
        let document = XmlDocument::parse(r#"<Root><Empty a="1"/></Root>"#).unwrap();
        assert_eq!(document.to_string(), r#"<Root><Empty a="1" /></Root>"#);
    }

    #[test]
    fn test_escaping_round_trip() {
        let document =
            XmlDocument::parse(r#"<Root note="a &amp; &quot;b&quot;">1 &lt; 2 &amp;&amp; 3 &gt; 2</Root>"#)
                .unwrap();

        assert_eq!(document.root().attribute("note"), Some(r#"a & "b""#));
        assert_eq!(document.root().text(), "1 < 2 && 3 > 2");
        assert_eq!(
            document.to_string(),
            r#"<Root note="a &amp; &quot;b&quot;">1 &lt; 2 &amp;&amp; 3 &gt; 2</Root>"#
        );
    }

    #[test]
    fn test_comments_cdata_and_instructions_kept() {
        let xml = r#"<!--head--><?app mode="x"?><Root><![CDATA[<raw>]]><!--inner--></Root><!--tail-->"#;
        let document = XmlDocument::parse(xml).unwrap();

        assert_eq!(document.prolog.len(), 2);
        assert_eq!(document.epilog, vec![XmlNode::Comment("tail".to_string())]);
        assert_eq!(document.root().text(), "<raw>");
        assert_eq!(document.to_string(), xml);
    }

    #[test]
    fn test_to_stream_adds_declaration() {
        let mut stream = XmlDocument::parse("<Root></Root>").unwrap().to_stream();
        assert_eq!(stream.position(), 0);
        assert_eq!(
            read_to_string(&mut stream).unwrap(),
            r#"<?xml version="1.0" encoding="utf-8"?><Root></Root>"#
        );
    }

    #[test]
    fn test_to_stream_keeps_single_declaration() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?><Root></Root>"#;
        let mut stream = XmlDocument::parse(xml).unwrap().to_stream();
        assert_eq!(read_to_string(&mut stream).unwrap(), xml);
    }

    #[test]
    fn test_remove_default_namespace() {
        let document = XmlDocument::parse(
            r#"<?xml version="1.0" encoding="utf-8"?><Root xmlns="http://testNamespace"></Root>"#,
        )
        .unwrap();

        let stripped = document.remove_namespaces();
        assert_eq!(stripped.to_string(), "<Root></Root>");
        // the source document is untouched
        assert_eq!(document.root().attribute("xmlns"), Some("http://testNamespace"));
    }

    #[test]
    fn test_remove_prefixed_namespaces() {
        let document = XmlDocument::parse(
            r#"<s:Envelope xmlns:s="urn:s" xmlns:i="urn:i"><s:Body i:type="Order" xml:lang="en"><s:Id>7</s:Id></s:Body></s:Envelope>"#,
        )
        .unwrap();

        assert_eq!(
            document.remove_namespaces().to_string(),
            r#"<Envelope><Body type="Order" xml:lang="en"><Id>7</Id></Body></Envelope>"#
        );
    }

    #[test]
    fn test_remove_namespaces_drops_colliding_attribute() {
        let document = XmlDocument::parse(r#"<Root id="1" x:id="2" xmlns:x="urn:x"></Root>"#).unwrap();
        assert_eq!(
            document.remove_namespaces().to_string(),
            r#"<Root id="1"></Root>"#
        );
    }

    #[test]
    fn test_prepend_child() {
        let mut document = XmlDocument::parse("<Product><B>2</B></Product>").unwrap();
        document
            .root_mut()
            .prepend_child(XmlElement::with_text("A", "1").unwrap());
        assert_eq!(document.to_string(), "<Product><A>1</A><B>2</B></Product>");
    }

    #[test]
    fn test_prepend_child_to_self_closing_root() {
        let mut document = XmlDocument::parse("<Product/>").unwrap();
        document
            .root_mut()
            .prepend_child(XmlElement::with_text("A", "1").unwrap());
        assert_eq!(document.to_string(), "<Product><A>1</A></Product>");
    }

    #[test]
    fn test_with_text_rejects_invalid_names() {
        for name in ["", "1abc", "has space", "<tag>"] {
            let err = XmlElement::with_text(name, "value").unwrap_err();
            assert!(err.is_validation(), "{:?} should be rejected", name);
        }
        assert!(XmlElement::with_text("ns:Valid-name_1.2", "value").is_ok());
    }

    #[test]
    fn test_malformed_documents() {
        for xml in [
            "",
            "   ",
            "plain text",
            "<Root>",
            "<Root><Child></Root>",
            "<a></a><b></b>",
            "<Root attr=\"1\" attr=\"2\"></Root>",
        ] {
            let err = XmlDocument::parse(xml).unwrap_err();
            assert!(
                matches!(err, ExtensionsError::Xml { .. }),
                "{:?} should fail as XML, got {:?}",
                xml,
                err
            );
        }
    }

    #[test]
    fn test_from_str() {
        let document: XmlDocument = "<Root><A/></Root>".parse().unwrap();
        assert_eq!(document.root().name, "Root");
    }
}
