//! XML parsing into the owned element tree.
//!
//! Built on the quick-xml event reader. Namespace resolution is done here
//! with an explicit prefix-scope stack so that `xmlns` declarations stay in
//! the attribute list and round-trip unchanged.

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

use super::{Attr, Comment, Document, Element, Node};

const XML_NS_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Parse a complete XML document.
pub fn parse_document(bytes: &[u8]) -> Result<Document> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::invalid_package(format!("descriptor is not valid UTF-8: {}", e)))?;

    let prolog = extract_prolog(text);

    let mut reader = Reader::from_str(text);
    let mut scopes: Vec<Vec<(Option<String>, String)>> = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut pre_root: Option<String> = None;
    let mut nsmap: Vec<(String, String)> = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::invalid_package(format!(
                "XML parse error at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;
        match event {
            Event::Decl(_) | Event::DocType(_) => {}
            Event::PI(_) => {
                warn!("Ignoring XML processing instruction in descriptor");
            }
            Event::Start(ref e) => {
                let decls = collect_ns_decls(e)?;
                scopes.push(decls);
                let mut element = build_element(e, &scopes)?;
                element.empty_tag = false;
                if root.is_none() && stack.is_empty() {
                    for (prefix, uri) in scopes.last().unwrap() {
                        nsmap.push((prefix.clone().unwrap_or_default(), uri.clone()));
                    }
                }
                stack.push(element);
            }
            Event::Empty(ref e) => {
                let decls = collect_ns_decls(e)?;
                scopes.push(decls);
                let element = build_element(e, &scopes)?;
                scopes.pop();
                attach(&mut stack, &mut root, Node::Element(element))?;
            }
            Event::End(_) => {
                scopes.pop();
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::invalid_package("unbalanced end tag"))?;
                attach(&mut stack, &mut root, Node::Element(element))?;
            }
            Event::Text(ref t) => {
                let s = t.unescape().map_err(|e| {
                    Error::invalid_package(format!("bad character data: {}", e))
                })?;
                append_text(&mut stack, &mut root, &mut pre_root, &s);
            }
            Event::CData(ref c) => {
                let s = String::from_utf8_lossy(c).to_string();
                append_text(&mut stack, &mut root, &mut pre_root, &s);
            }
            Event::Comment(ref c) => {
                let content = String::from_utf8_lossy(c).to_string();
                let node = Node::Comment(Comment {
                    content,
                    tail: None,
                });
                // Comments before the root are dropped; OVF tooling never
                // emits them and keeping the model simple matters more.
                if stack.is_empty() && root.is_none() {
                    continue;
                }
                attach(&mut stack, &mut root, node)?;
            }
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return Err(Error::invalid_package("unexpected end of document"));
    }
    let root = root.ok_or_else(|| Error::invalid_package("document has no root element"))?;

    Ok(Document {
        prolog,
        pre_root,
        root,
        nsmap,
    })
}

/// Parse a standalone element fragment, e.g. a preserved custom subtree.
/// Namespace prefixes need not be declared within the fragment.
pub fn parse_fragment(text: &str) -> Result<Element> {
    let doc = parse_document(text.as_bytes())?;
    let mut root = doc.root;
    root.tail = None;
    Ok(root)
}

/// Capture the XML declaration verbatim, if the document has one.
fn extract_prolog(text: &str) -> Option<String> {
    let trimmed = text.trim_start_matches('\u{feff}');
    if !trimmed.starts_with("<?xml") {
        return None;
    }
    trimmed.find("?>").map(|end| trimmed[..end + 2].to_string())
}

/// Pull the `xmlns` declarations off a start tag.
fn collect_ns_decls(e: &BytesStart<'_>) -> Result<Vec<(Option<String>, String)>> {
    let mut decls = Vec::new();
    for attr in e.attributes() {
        let attr = attr
            .map_err(|e| Error::invalid_package(format!("malformed attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::invalid_package(format!("bad attribute value: {}", e)))?
            .to_string();
        if key == "xmlns" {
            decls.push((None, value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            decls.push((Some(prefix.to_string()), value));
        }
    }
    Ok(decls)
}

/// Resolve a prefix against the scope stack, innermost first.
fn resolve(scopes: &[Vec<(Option<String>, String)>], prefix: Option<&str>) -> Option<String> {
    if prefix == Some("xml") {
        return Some(XML_NS_URI.to_string());
    }
    for scope in scopes.iter().rev() {
        for (p, uri) in scope.iter().rev() {
            if p.as_deref() == prefix {
                return Some(uri.clone());
            }
        }
    }
    None
}

fn split_name(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((p, l)) => (Some(p), l),
        None => (None, raw),
    }
}

fn build_element(e: &BytesStart<'_>, scopes: &[Vec<(Option<String>, String)>]) -> Result<Element> {
    let raw = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let (prefix, local) = split_name(&raw);
    let uri = resolve(scopes, prefix);

    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr
            .map_err(|e| Error::invalid_package(format!("malformed attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::invalid_package(format!("bad attribute value: {}", e)))?
            .to_string();
        let (aprefix, alocal) = split_name(&key);
        // Unprefixed attributes have no namespace; xmlns declarations are
        // kept as ordinary attributes so they serialize back in place.
        let auri = match aprefix {
            Some("xmlns") | None => None,
            Some(p) => {
                if key == "xmlns" {
                    None
                } else {
                    resolve(scopes, Some(p))
                }
            }
        };
        attrs.push(Attr {
            prefix: aprefix.map(str::to_string),
            local: alocal.to_string(),
            uri: auri,
            value,
        });
    }

    Ok(Element {
        prefix: prefix.map(str::to_string),
        local: local.to_string(),
        uri,
        attrs,
        nodes: Vec::new(),
        text: None,
        tail: None,
        empty_tag: true,
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, node: Node) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.nodes.push(node);
        return Ok(());
    }
    match node {
        Node::Element(e) => {
            if root.is_some() {
                return Err(Error::invalid_package("multiple root elements"));
            }
            *root = Some(e);
        }
        Node::Comment(_) => {}
    }
    Ok(())
}

fn append_text(
    stack: &mut [Element],
    root: &mut Option<Element>,
    pre_root: &mut Option<String>,
    s: &str,
) {
    if let Some(top) = stack.last_mut() {
        match top.nodes.last_mut() {
            Some(last) => {
                let mut tail = match last {
                    Node::Element(e) => e.tail.take().unwrap_or_default(),
                    Node::Comment(c) => c.tail.take().unwrap_or_default(),
                };
                tail.push_str(s);
                match last {
                    Node::Element(e) => e.tail = Some(tail),
                    Node::Comment(c) => c.tail = Some(tail),
                }
            }
            None => {
                let mut text = top.text.take().unwrap_or_default();
                text.push_str(s);
                top.text = Some(text);
            }
        }
    } else if let Some(r) = root.as_mut() {
        let mut tail = r.tail.take().unwrap_or_default();
        tail.push_str(s);
        r.tail = Some(tail);
    } else {
        let mut t = pre_root.take().unwrap_or_default();
        t.push_str(s);
        *pre_root = Some(t);
    }
}
