use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::api::handlers::{engine_error, ApiError, ErrorResponse};
use crate::model::{scalar_to_text, SerialFormat, SerialNode};

/// Response format selector shared by the read endpoints (`?format=`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    Xml,
    #[default]
    Json,
    /// Human-readable page
    Browse,
}

impl ResponseFormat {
    pub fn from_query(format: Option<&str>) -> Result<Self, ApiError> {
        match format.map(|f| f.to_lowercase()).as_deref() {
            None | Some("json") => Ok(ResponseFormat::Json),
            Some("xml") => Ok(ResponseFormat::Xml),
            Some("browse") | Some("html") => Ok(ResponseFormat::Browse),
            Some(other) => Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(&format!(
                    "Unknown format '{}', expected xml, json or browse",
                    other
                ))),
            )),
        }
    }
}

fn xml_response(text: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], text).into_response()
}

fn json_response(text: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], text).into_response()
}

fn browse_response(title: &str, value: &Value) -> Result<Response, ApiError> {
    let pretty = serde_json::to_string_pretty(value).map_err(|e| engine_error(e.into()))?;
    let html = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"UTF-8\"><title>{}</title></head>\n<body><h1>{}</h1><pre>{}</pre></body></html>",
        quick_xml::escape::escape(title),
        quick_xml::escape::escape(title),
        quick_xml::escape::escape(pretty.as_str())
    );
    Ok(Html(html).into_response())
}

/// Render a serialized graph in the requested format
pub fn render_serial(node: &SerialNode, title: &str, format: ResponseFormat) -> Result<Response, ApiError> {
    match format {
        ResponseFormat::Xml => Ok(xml_response(node.render(SerialFormat::Xml).map_err(engine_error)?)),
        ResponseFormat::Json => Ok(json_response(node.render(SerialFormat::Json).map_err(engine_error)?)),
        ResponseFormat::Browse => browse_response(title, &node.to_dict()),
    }
}

/// Render any serializable response; XML wraps it under `root_tag`
pub fn render_value<T: Serialize>(value: &T, root_tag: &str, format: ResponseFormat) -> Result<Response, ApiError> {
    let value = serde_json::to_value(value).map_err(|e| engine_error(e.into()))?;
    match format {
        ResponseFormat::Json => Ok(Json(value).into_response()),
        ResponseFormat::Browse => browse_response(root_tag, &value),
        ResponseFormat::Xml => {
            let node = value_to_serial(root_tag, &value);
            Ok(xml_response(node.to_xml().map_err(engine_error)?))
        }
    }
}

/// Objects become elements with scalar attributes, arrays become wrappers
fn value_to_serial(tag: &str, value: &Value) -> SerialNode {
    match value {
        Value::Object(map) => {
            let mut node = SerialNode::record(tag);
            for (key, inner) in map {
                match inner {
                    Value::Object(_) | Value::Array(_) => node.push(value_to_serial(key, inner)),
                    Value::Null => {}
                    scalar => node.set_attr(key, scalar.clone()),
                }
            }
            node
        }
        Value::Array(items) => SerialNode::collection(
            tag,
            items.iter().map(|item| value_to_serial("item", item)).collect(),
        ),
        scalar => SerialNode::record(tag).attr("value", scalar_to_text(scalar)),
    }
}
