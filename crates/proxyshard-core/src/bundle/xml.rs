//! Ordered XML element tree used for every bundle document.
//!
//! Bundle documents are small, so each one is read fully into an
//! [`XmlElement`] tree.  Child lookups always yield sequences, which removes
//! the single-object-vs-list ambiguity at the parser boundary: an element that
//! appears once and an element that appears many times are walked the same way.

use std::path::Path;

use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::errors::{ShardError, ShardResult};

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

/// One XML element with its attributes, children and text content.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: Option<String>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: set an attribute, replacing any existing value.
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder: set the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Builder: append a child element.
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    /// Trimmed text content, `None` when absent or blank.
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Every child with the given name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child with the given name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(XmlElement::text)
    }

    /// Texts of every child with the given name, skipping blank ones.
    pub fn child_texts(&self, name: &str) -> Vec<String> {
        self.children_named(name)
            .filter_map(XmlElement::text)
            .map(str::to_string)
            .collect()
    }

    /// Whether the element carries any content at all.
    ///
    /// `<ExpirySettings/>` is present but empty, which bundle semantics treat
    /// the same as absent.
    pub fn has_content(&self) -> bool {
        self.text().is_some() || !self.children.is_empty() || !self.attributes.is_empty()
    }

    /// Remove every child with the given name.
    pub fn remove_children(&mut self, name: &str) {
        self.children.retain(|c| c.name != name);
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn decode(decoder: Decoder, bytes: &[u8]) -> ShardResult<String> {
    decoder
        .decode(bytes)
        .map(|text| text.into_owned())
        .map_err(|e| ShardError::Parse(format!("undecodable content: {e}")))
}

fn element_from_start(start: &BytesStart<'_>, decoder: Decoder) -> ShardResult<XmlElement> {
    let mut element = XmlElement::new(decode(decoder, start.name().as_ref())?);
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = decode(decoder, attribute.key.as_ref())?;
        let value = attribute
            .decode_and_unescape_value(decoder)
            .map_err(|e| ShardError::Parse(format!("attribute '{key}': {e}")))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn append_text(stack: &mut [XmlElement], text: &str) {
    if let Some(current) = stack.last_mut() {
        match current.text.as_mut() {
            Some(existing) => existing.push_str(text),
            None => current.text = Some(text.to_string()),
        }
    }
}

fn close_element(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>) -> ShardResult<()> {
    let finished = stack
        .pop()
        .ok_or_else(|| ShardError::Parse("unbalanced closing tag".into()))?;
    match stack.last_mut() {
        Some(parent) => parent.children.push(finished),
        None => {
            if root.is_some() {
                return Err(ShardError::Parse("document has multiple root elements".into()));
            }
            *root = Some(finished);
        }
    }
    Ok(())
}

fn parse_events(mut reader: Reader<&[u8]>) -> ShardResult<XmlElement> {
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(element_from_start(&start, reader.decoder())?),
            Event::Empty(start) => {
                stack.push(element_from_start(&start, reader.decoder())?);
                close_element(&mut stack, &mut root)?;
            }
            Event::End(_) => close_element(&mut stack, &mut root)?,
            Event::Text(text) => append_text(&mut stack, &text.unescape()?),
            Event::CData(data) => append_text(&mut stack, &decode(reader.decoder(), &data)?),
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ShardError::Parse("document ended inside an open element".into()));
    }
    root.ok_or_else(|| ShardError::Parse("document has no root element".into()))
}

/// Parse an XML document from a string into its root element.
pub fn parse_document(source: &str) -> ShardResult<XmlElement> {
    parse_events(Reader::from_str(source))
}

/// Parse raw document bytes, honouring a BOM or the encoding named in the
/// XML declaration. Bytes invalid for that encoding are a parse error.
pub fn parse_document_bytes(bytes: &[u8]) -> ShardResult<XmlElement> {
    parse_events(Reader::from_reader(bytes))
}

/// Read and parse an XML document from disk.
///
/// Only the read itself can fail with [`ShardError::Io`]; anything wrong with
/// the content is reported as [`ShardError::Parse`].
pub fn read_document(path: &Path) -> ShardResult<XmlElement> {
    let bytes = std::fs::read(path)?;
    parse_document_bytes(&bytes).map_err(|e| ShardError::Parse(format!("{}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> ShardResult<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    let text = element.text();
    if element.children.is_empty() && text.is_none() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    if let Some(text) = text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

/// Render an element as a standalone, indented XML document.
pub fn to_document(root: &XmlElement) -> ShardResult<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    write_element(&mut writer, root)?;
    String::from_utf8(writer.into_inner())
        .map_err(|e| ShardError::Parse(format!("rendered document is not UTF-8: {e}")))
}

/// Render and write an XML document to disk.
pub fn write_document(path: &Path, root: &XmlElement) -> ShardResult<()> {
    let rendered = to_document(root)?;
    std::fs::write(path, rendered)?;
    Ok(())
}
