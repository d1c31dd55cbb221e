use crate::error::{EngineError, EngineResult};
use crate::model::scalar_to_text;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Cursor;

/// Attribute carrying a record's URI
pub const URI_ATTRIBUTE: &str = "URIInstance";
pub const IMPORTED_FROM_ATTRIBUTE: &str = "importedFromURI";
pub const PREVIOUS_VERSION_ATTRIBUTE: &str = "previousVersionURI";
/// Marks a record already emitted earlier in the same document
pub const REFERENCE_MARKER: &str = "REFERENCE_IN_THIS_FILE";
/// Marks a stub standing for a record owned by another structure
pub const EXTERNAL_MARKER: &str = "externalReference";
/// Primary key of the record on the emitting server, carried by stubs
pub const PK_ATTRIBUTE: &str = "pk";

/// Text renderings of a serialized graph. The native nested mapping (DICT)
/// is the `serde_json::Value` returned by [`SerialNode::to_dict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFormat {
    Xml,
    Json,
}

impl std::str::FromStr for SerialFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xml" => Ok(SerialFormat::Xml),
            "json" => Ok(SerialFormat::Json),
            other => Err(EngineError::Format(format!("Unknown format: {}", other))),
        }
    }
}

/// Format-neutral tree produced by the serializer and consumed by the deserializer.
///
/// A `Record` is one element with scalar attributes. A `Collection` is an
/// attribute-less wrapper around records (to-many links, `ActualInstances`).
#[derive(Debug, Clone, PartialEq)]
pub enum SerialNode {
    Record {
        tag: String,
        attributes: Vec<(String, Value)>,
        children: Vec<SerialNode>,
    },
    Collection {
        tag: String,
        items: Vec<SerialNode>,
    },
}

impl SerialNode {
    pub fn record(tag: &str) -> Self {
        SerialNode::Record {
            tag: tag.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn collection(tag: &str, items: Vec<SerialNode>) -> Self {
        SerialNode::Collection {
            tag: tag.to_string(),
            items,
        }
    }

    /// Set (or replace) an attribute; no-op on collections
    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<Value>) {
        if let SerialNode::Record { attributes, .. } = self {
            let value = value.into();
            match attributes.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value,
                None => attributes.push((name.to_string(), value)),
            }
        }
    }

    /// Append a child (records) or an item (collections)
    pub fn push(&mut self, node: SerialNode) {
        match self {
            SerialNode::Record { children, .. } => children.push(node),
            SerialNode::Collection { items, .. } => items.push(node),
        }
    }

    pub fn with_child(mut self, node: SerialNode) -> Self {
        self.push(node);
        self
    }

    pub fn tag(&self) -> &str {
        match self {
            SerialNode::Record { tag, .. } | SerialNode::Collection { tag, .. } => tag,
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, SerialNode::Record { .. })
    }

    pub fn attributes(&self) -> &[(String, Value)] {
        match self {
            SerialNode::Record { attributes, .. } => attributes,
            SerialNode::Collection { .. } => &[],
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Attribute rendered as text; `None` when missing, null or empty
    pub fn attr_text(&self, name: &str) -> Option<String> {
        self.attribute(name)
            .filter(|v| !v.is_null())
            .map(scalar_to_text)
            .filter(|s| !s.is_empty())
    }

    /// Boolean flag, tolerant of markup text ("true", "True", "1")
    pub fn flag(&self, name: &str) -> bool {
        match self.attribute(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
            _ => false,
        }
    }

    pub fn uri(&self) -> Option<String> {
        self.attr_text(URI_ATTRIBUTE)
    }

    pub fn children(&self) -> &[SerialNode] {
        match self {
            SerialNode::Record { children, .. } => children,
            SerialNode::Collection { items, .. } => items,
        }
    }

    pub fn child(&self, tag: &str) -> Option<&SerialNode> {
        self.children().iter().find(|c| c.tag() == tag)
    }

    pub fn items(&self) -> &[SerialNode] {
        match self {
            SerialNode::Collection { items, .. } => items,
            SerialNode::Record { .. } => &[],
        }
    }

    pub fn render(&self, format: SerialFormat) -> EngineResult<String> {
        match format {
            SerialFormat::Xml => self.to_xml(),
            SerialFormat::Json => Ok(serde_json::to_string_pretty(&self.to_dict())?),
        }
    }

    pub fn parse(text: &str, format: SerialFormat) -> EngineResult<Self> {
        match format {
            SerialFormat::Xml => Self::from_xml(text),
            SerialFormat::Json => Self::from_dict(&serde_json::from_str(text)?),
        }
    }

    // ---- DICT ----

    /// `{tag: body}` for records, `{tag: [items]}` for collections
    pub fn to_dict(&self) -> Value {
        let mut outer = Map::new();
        match self {
            SerialNode::Record { tag, .. } => outer.insert(tag.clone(), self.body()),
            SerialNode::Collection { tag, items } => outer.insert(
                tag.clone(),
                Value::Array(items.iter().map(SerialNode::to_dict).collect()),
            ),
        };
        Value::Object(outer)
    }

    fn body(&self) -> Value {
        let mut body = Map::new();
        for (name, value) in self.attributes() {
            body.insert(name.clone(), value.clone());
        }
        for child in self.children() {
            match child {
                SerialNode::Record { tag, .. } => {
                    body.insert(tag.clone(), child.body());
                }
                SerialNode::Collection { tag, items } => {
                    body.insert(
                        tag.clone(),
                        Value::Array(items.iter().map(SerialNode::to_dict).collect()),
                    );
                }
            }
        }
        Value::Object(body)
    }

    pub fn from_dict(value: &Value) -> EngineResult<Self> {
        let object = value
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| EngineError::Format("Expected an object with a single tag".to_string()))?;
        let (tag, inner) = object
            .iter()
            .next()
            .ok_or_else(|| EngineError::Format("Empty object".to_string()))?;
        match inner {
            Value::Array(items) => Ok(SerialNode::collection(
                tag,
                items.iter().map(Self::from_dict).collect::<EngineResult<Vec<_>>>()?,
            )),
            Value::Object(_) => Self::from_body(tag, inner),
            _ => Err(EngineError::Format(format!("Tag '{}' holds a scalar", tag))),
        }
    }

    fn from_body(tag: &str, body: &Value) -> EngineResult<Self> {
        let mut node = SerialNode::record(tag);
        if let Value::Object(map) = body {
            for (key, value) in map {
                match value {
                    Value::Object(_) => node.push(Self::from_body(key, value)?),
                    Value::Array(items) => node.push(SerialNode::collection(
                        key,
                        items.iter().map(Self::from_dict).collect::<EngineResult<Vec<_>>>()?,
                    )),
                    scalar => node.set_attr(key, scalar.clone()),
                }
            }
        }
        Ok(node)
    }

    // ---- XML ----

    pub fn to_xml(&self) -> EngineResult<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.write_xml(&mut writer)?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| EngineError::Format(e.to_string()))
    }

    fn write_xml(&self, writer: &mut Writer<Cursor<Vec<u8>>>) -> EngineResult<()> {
        let tag = self.tag();
        let mut start = BytesStart::new(tag);
        for (name, value) in self.attributes() {
            if value.is_null() {
                continue;
            }
            let text = scalar_to_text(value);
            start.push_attribute((name.as_str(), text.as_str()));
        }
        if self.children().is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        for child in self.children() {
            child.write_xml(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
        Ok(())
    }

    /// Elements with attributes become records, bare elements collections
    pub fn from_xml(text: &str) -> EngineResult<Self> {
        struct Open {
            tag: String,
            attributes: Vec<(String, Value)>,
            children: Vec<SerialNode>,
        }

        fn open(e: &BytesStart) -> EngineResult<Open> {
            let mut attributes = Vec::new();
            for attr in e.attributes() {
                let attr = attr.map_err(|e| EngineError::Format(e.to_string()))?;
                let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                let value = attr.unescape_value()?.to_string();
                attributes.push((key, Value::String(value)));
            }
            Ok(Open {
                tag: String::from_utf8_lossy(e.name().as_ref()).to_string(),
                attributes,
                children: Vec::new(),
            })
        }

        fn close(element: Open) -> SerialNode {
            if element.attributes.is_empty() {
                SerialNode::Collection {
                    tag: element.tag,
                    items: element.children,
                }
            } else {
                SerialNode::Record {
                    tag: element.tag,
                    attributes: element.attributes,
                    children: element.children,
                }
            }
        }

        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut stack: Vec<Open> = Vec::new();
        let mut root: Option<SerialNode> = None;
        loop {
            let finished = match reader.read_event()? {
                Event::Start(e) => {
                    stack.push(open(&e)?);
                    None
                }
                Event::Empty(e) => Some(close(open(&e)?)),
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| EngineError::Format("Unbalanced closing tag".to_string()))?;
                    Some(close(element))
                }
                Event::Eof => break,
                _ => None,
            };
            if let Some(node) = finished {
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => {
                        return Err(EngineError::Format("More than one root element".to_string()))
                    }
                }
            }
        }
        if !stack.is_empty() {
            return Err(EngineError::Format("Unclosed element".to_string()));
        }
        root.ok_or_else(|| EngineError::Format("Empty document".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn europe() -> SerialNode {
        let italy = SerialNode::record("State")
            .attr(URI_ATTRIBUTE, "http://ks/geo/State/3")
            .attr("name", "Italy")
            .with_child(
                SerialNode::record("sub_continent")
                    .attr(REFERENCE_MARKER, true)
                    .attr(URI_ATTRIBUTE, "http://ks/geo/SubContinent/2")
                    .attr("name", "South Europe"),
            );
        SerialNode::record("Continent")
            .attr(URI_ATTRIBUTE, "http://ks/geo/Continent/1")
            .attr("name", "Europe")
            .with_child(SerialNode::collection(
                "subcontinents",
                vec![SerialNode::record("SubContinent")
                    .attr(URI_ATTRIBUTE, "http://ks/geo/SubContinent/2")
                    .attr("name", "South Europe")],
            ))
            .with_child(SerialNode::collection("states", vec![italy]))
    }

    #[test]
    fn test_dict_shape() {
        let dict = europe().to_dict();
        assert_eq!(dict["Continent"]["name"], json!("Europe"));
        assert_eq!(
            dict["Continent"]["states"][0]["State"]["sub_continent"][REFERENCE_MARKER],
            json!(true)
        );
        assert_eq!(SerialNode::from_dict(&dict).unwrap(), europe());
    }

    #[test]
    fn test_xml_and_json_carry_the_same_content() {
        let node = europe();
        let xml = node.render(SerialFormat::Xml).unwrap();
        assert!(xml.contains("<Continent URIInstance=\"http://ks/geo/Continent/1\""));
        let from_xml = SerialNode::parse(&xml, SerialFormat::Xml).unwrap();

        let json = node.render(SerialFormat::Json).unwrap();
        let from_json = SerialNode::parse(&json, SerialFormat::Json).unwrap();

        // markup turns every scalar into text; compare on text
        let italy_xml = &from_xml.child("states").unwrap().items()[0];
        let italy_json = &from_json.child("states").unwrap().items()[0];
        assert_eq!(italy_xml.attr_text("name"), italy_json.attr_text("name"));
        assert!(italy_xml.child("sub_continent").unwrap().flag(REFERENCE_MARKER));
        assert!(italy_json.child("sub_continent").unwrap().flag(REFERENCE_MARKER));
    }

    #[test]
    fn test_empty_collection_survives_xml() {
        let node = SerialNode::record("Continent")
            .attr(URI_ATTRIBUTE, "u")
            .with_child(SerialNode::collection("states", Vec::new()));
        let parsed = SerialNode::from_xml(&node.to_xml().unwrap()).unwrap();
        assert_eq!(parsed.child("states").map(|s| s.items().len()), Some(0));
        assert!(!parsed.child("states").unwrap().is_record());
    }

    #[test]
    fn test_xml_escapes_attribute_text() {
        let node = SerialNode::record("License").attr("name", "A & B <v2>");
        let parsed = SerialNode::from_xml(&node.to_xml().unwrap()).unwrap();
        assert_eq!(parsed.attr_text("name").as_deref(), Some("A & B <v2>"));
    }

    #[test]
    fn test_malformed_input_is_a_format_error() {
        assert!(SerialNode::from_xml("<a x=\"1\"><b></a>").is_err());
        assert!(SerialNode::from_dict(&json!({"a": {}, "b": {}})).is_err());
        assert!("yaml".parse::<SerialFormat>().is_err());
    }
}
