//! Generic named tree used for IPC requests, responses and notifications
//!
//! Every message exchanged over the IPC channel is a tree of named nodes
//! carrying optional text values. The same type is used to parse incoming
//! requests and to build outgoing responses, so a node is exclusively owned
//! by whoever is constructing it until it is handed to [`TreeNode::to_xml`].

use std::borrow::Cow;
use std::str::FromStr;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};

use crate::error::{Lwm2mError, Result};

/// A named node with an optional text value and ordered children
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<TreeNode>,
}

impl TreeNode {
    /// Create an empty node
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            children: Vec::new(),
        }
    }

    /// Create a leaf node holding a value
    pub fn with_value(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: Some(value.to_string()),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = Some(value.into());
    }

    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [TreeNode] {
        &mut self.children
    }

    /// Child at `index`, in insertion order
    pub fn child(&self, index: usize) -> Option<&TreeNode> {
        self.children.get(index)
    }

    /// Append a child and return a handle to it
    pub fn add_child(&mut self, child: TreeNode) -> &mut TreeNode {
        let index = self.children.len();
        self.children.push(child);
        &mut self.children[index]
    }

    /// First direct child with the given name
    pub fn child_named(&self, name: &str) -> Option<&TreeNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_named_mut(&mut self, name: &str) -> Option<&mut TreeNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// All direct children with the given name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TreeNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Navigate a slash-delimited path whose first segment names this node,
    /// e.g. `"Content/Objects"` from a `Content` node.
    pub fn navigate(&self, path: &str) -> Option<&TreeNode> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        if segments.next()? != self.name {
            return None;
        }
        segments.try_fold(self, |node, segment| node.child_named(segment))
    }

    /// Depth-first search for the first descendant with the given name
    pub fn find(&self, name: &str) -> Option<&TreeNode> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Parse the value of a direct child as an integer
    pub fn child_integer(&self, name: &str) -> Option<i64> {
        self.child_named(name)?.value()?.trim().parse().ok()
    }

    /// Serialize to XML text, failing when the result exceeds `capacity` bytes
    pub fn to_xml(&self, capacity: usize) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_xml(&mut writer)?;
        let bytes = writer.into_inner();
        if bytes.len() > capacity {
            return Err(Lwm2mError::BufferTooSmall {
                needed: bytes.len(),
                capacity,
            });
        }
        String::from_utf8(bytes).map_err(|e| Lwm2mError::Xml(e.to_string()))
    }

    fn write_xml(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let name = self.name.as_str();
        if self.value.is_none() && self.children.is_empty() {
            return writer
                .write_event(Event::Empty(BytesStart::new(name)))
                .map_err(xml_error);
        }

        writer
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(xml_error)?;
        if let Some(value) = &self.value {
            writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(xml_error)?;
        }
        for child in &self.children {
            child.write_xml(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_error)
    }

    /// Parse XML text into a tree; attributes are ignored
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);

        let mut stack: Vec<TreeNode> = Vec::new();
        let mut root: Option<TreeNode> = None;

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(start) => stack.push(TreeNode::new(element_name(&start)?)),
                Event::Empty(start) => {
                    let node = TreeNode::new(element_name(&start)?);
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let mut node = stack
                        .pop()
                        .ok_or_else(|| Lwm2mError::Xml("unbalanced end tag".into()))?;
                    // indentation between child elements is not a value
                    if !node.children.is_empty()
                        && node.value.as_deref().is_some_and(|v| v.trim().is_empty())
                    {
                        node.value = None;
                    }
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(xml_error)?;
                    append_text(&mut stack, text)?;
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    append_text(&mut stack, Cow::Owned(text))?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Lwm2mError::Xml("unterminated element".into()));
        }
        root.ok_or_else(|| Lwm2mError::Xml("document has no root element".into()))
    }
}

impl FromStr for TreeNode {
    type Err = Lwm2mError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_xml(s)
    }
}

fn element_name(start: &BytesStart<'_>) -> Result<String> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_string)
        .map_err(|e| Lwm2mError::Xml(e.to_string()))
}

fn attach(stack: &mut [TreeNode], root: &mut Option<TreeNode>, node: TreeNode) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.add_child(node);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(node);
            Ok(())
        }
        None => Err(Lwm2mError::Xml("multiple root elements".into())),
    }
}

fn append_text(stack: &mut [TreeNode], text: Cow<'_, str>) -> Result<()> {
    let Some(node) = stack.last_mut() else {
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err(Lwm2mError::Xml("text outside root element".into()));
    };
    match &mut node.value {
        Some(value) => value.push_str(&text),
        None => node.value = Some(text.into_owned()),
    }
    Ok(())
}

fn xml_error(e: impl std::fmt::Display) -> Lwm2mError {
    Lwm2mError::Xml(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "<Request><Type>Get</Type><Content><Objects><Object><ID>3</ID>\
        </Object></Objects></Content></Request>";

    #[test]
    fn test_parse_and_navigate() {
        let tree = TreeNode::from_xml(SAMPLE).unwrap();
        assert_eq!(tree.name(), "Request");
        assert_eq!(tree.navigate("Request/Type").unwrap().value(), Some("Get"));

        let objects = tree.navigate("Request/Content/Objects").unwrap();
        assert_eq!(objects.child(0).unwrap().child_integer("ID"), Some(3));
        assert!(tree.navigate("Content/Objects").is_none());
    }

    #[test]
    fn test_find_descendant() {
        let tree: TreeNode = SAMPLE.parse().unwrap();
        assert_eq!(tree.find("ID").unwrap().value(), Some("3"));
        assert!(tree.find("Resource").is_none());
    }

    #[test]
    fn test_serialize_escapes_and_empty_nodes() {
        let mut root = TreeNode::new("Response");
        root.add_child(TreeNode::with_value("Value", "a<b&c"));
        root.add_child(TreeNode::new("SubscribeToChange"));

        let xml = root.to_xml(1024).unwrap();
        assert_eq!(
            xml,
            "<Response><Value>a&lt;b&amp;c</Value><SubscribeToChange/></Response>"
        );
        assert_eq!(TreeNode::from_xml(&xml).unwrap(), root);
    }

    #[test]
    fn test_serialize_respects_capacity() {
        let root = TreeNode::with_value("Value", "0123456789");
        match root.to_xml(8) {
            Err(Lwm2mError::BufferTooSmall { needed, capacity }) => {
                assert!(needed > 8);
                assert_eq!(capacity, 8);
            }
            other => panic!("expected BufferTooSmall, got {:?}", other),
        }
    }

    #[test]
    fn test_text_values_keep_whitespace() {
        let xml = "<Resource>\n  <ID> 1 </ID>\n  <Value> a </Value>\n  <Blank> </Blank>\n</Resource>\n";
        let tree = TreeNode::from_xml(xml).unwrap();
        assert_eq!(tree.value(), None);
        assert_eq!(tree.child_named("Value").unwrap().value(), Some(" a "));
        assert_eq!(tree.child_named("Blank").unwrap().value(), Some(" "));
        assert_eq!(tree.child_integer("ID"), Some(1));

        let reparsed = TreeNode::from_xml(&tree.to_xml(1024).unwrap()).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn test_rejects_malformed_xml() {
        assert!(TreeNode::from_xml("<A><B></A>").is_err());
        assert!(TreeNode::from_xml("<A/><B/>").is_err());
        assert!(TreeNode::from_xml("").is_err());
    }
}
