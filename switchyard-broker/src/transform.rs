//! Content transformers for expression-based message selection.
//!
//! The browse phase of a GET decodes every browsed message, transforms it
//! to the canonical structure for its content type and evaluates the
//! request's expression against it; a message matches when the expression
//! yields at least one value. Expressions are validated up front so an
//! illegal selector fails the request before the queue is touched.

use sxd_xpath::{Context, Factory, Value as XPathValue, XPath};

use crate::error::{AsyncMessageError, HandlerResult};

/// Supported payload content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Xml,
}

impl ContentType {
    /// Parse the `content_type` context field.
    pub fn from_string(value: &str) -> HandlerResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "application/json" => Ok(Self::Json),
            "xml" | "application/xml" | "text/xml" => Ok(Self::Xml),
            other => Err(AsyncMessageError::transform(format!(
                "\"{other}\" is an unknown response content type"
            ))),
        }
    }
}

enum Selector {
    Json(jsonpath_lib::Compiled),
    Xml(XPath),
}

/// A validated expression bound to a content type.
pub struct Transformer {
    content_type: ContentType,
    selector: Selector,
}

impl Transformer {
    /// Compile `expression` for `content_type`.
    ///
    /// Fails with a `TransformError` when the expression is not a legal
    /// selector for the content type.
    pub fn new(content_type: ContentType, expression: &str) -> HandlerResult<Self> {
        let selector = match content_type {
            ContentType::Json => {
                let compiled = jsonpath_lib::Compiled::compile(expression).map_err(|e| {
                    AsyncMessageError::transform(format!(
                        "unable to parse JSON path expression \"{expression}\": {e:?}"
                    ))
                })?;
                Selector::Json(compiled)
            }
            ContentType::Xml => {
                let xpath = Factory::new()
                    .build(expression)
                    .map_err(|e| {
                        AsyncMessageError::transform(format!(
                            "unable to parse XPath expression \"{expression}\": {e:?}"
                        ))
                    })?
                    .ok_or_else(|| {
                        AsyncMessageError::transform(format!(
                            "unable to parse XPath expression \"{expression}\""
                        ))
                    })?;
                Selector::Xml(xpath)
            }
        };

        Ok(Self {
            content_type,
            selector,
        })
    }

    #[must_use]
    pub const fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Transform `payload` and count the values the expression yields.
    pub fn matches(&self, payload: &str) -> HandlerResult<usize> {
        match &self.selector {
            Selector::Json(compiled) => {
                let document: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
                    AsyncMessageError::transform(format!("failed to transform input as JSON: {e}"))
                })?;
                let values = compiled.select(&document).map_err(|e| {
                    AsyncMessageError::transform(format!("failed to evaluate expression: {e:?}"))
                })?;
                Ok(values.len())
            }
            Selector::Xml(xpath) => {
                let package = sxd_document::parser::parse(payload).map_err(|e| {
                    AsyncMessageError::transform(format!("failed to transform input as XML: {e:?}"))
                })?;
                let document = package.as_document();
                let value = xpath
                    .evaluate(&Context::new(), document.root())
                    .map_err(|e| {
                        AsyncMessageError::transform(format!(
                            "failed to evaluate expression: {e:?}"
                        ))
                    })?;

                Ok(match value {
                    XPathValue::Nodeset(nodes) => nodes.size(),
                    XPathValue::Boolean(b) => usize::from(b),
                    XPathValue::Number(_) => 1,
                    XPathValue::String(s) => usize::from(!s.is_empty()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_from_string() {
        assert_eq!(ContentType::from_string("json").unwrap(), ContentType::Json);
        assert_eq!(
            ContentType::from_string("application/json").unwrap(),
            ContentType::Json
        );
        assert_eq!(ContentType::from_string("XML").unwrap(), ContentType::Xml);
        assert!(ContentType::from_string("yaml").is_err());
    }

    #[test]
    fn test_json_filter_expression() {
        let transformer =
            Transformer::new(ContentType::Json, "$[?(@.id=='B')]").unwrap();

        assert_eq!(transformer.matches(r#"[{"id":"B"}]"#).unwrap(), 1);
        assert_eq!(transformer.matches(r#"[{"id":"A"}]"#).unwrap(), 0);
        assert_eq!(
            transformer
                .matches(r#"[{"id":"B"},{"id":"B"},{"id":"C"}]"#)
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_json_path_expression() {
        let transformer = Transformer::new(ContentType::Json, "$.actors.actor").unwrap();
        assert_eq!(
            transformer
                .matches(r#"{"actors":{"actor":"named"}}"#)
                .unwrap(),
            1
        );
        assert_eq!(transformer.matches(r#"{"actors":{}}"#).unwrap(), 0);
    }

    #[test]
    fn test_invalid_json_expression_rejected() {
        let err = Transformer::new(ContentType::Json, "$[?(").unwrap_err();
        assert!(matches!(err, AsyncMessageError::Transform(_)));
    }

    #[test]
    fn test_undecodable_json_payload() {
        let transformer = Transformer::new(ContentType::Json, "$.id").unwrap();
        let err = transformer.matches("<not-json/>").unwrap_err();
        assert!(err.to_string().contains("failed to transform input as JSON"));
    }

    #[test]
    fn test_xpath_expression() {
        let transformer =
            Transformer::new(ContentType::Xml, "/documents/document[@id='B']").unwrap();

        assert_eq!(
            transformer
                .matches(r#"<documents><document id="B">b</document></documents>"#)
                .unwrap(),
            1
        );
        assert_eq!(
            transformer
                .matches(r#"<documents><document id="A">a</document></documents>"#)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_invalid_xpath_rejected() {
        assert!(Transformer::new(ContentType::Xml, "///[").is_err());
    }

    #[test]
    fn test_undecodable_xml_payload() {
        let transformer = Transformer::new(ContentType::Xml, "/a").unwrap();
        assert!(transformer.matches("{\"id\": 1}").is_err());
    }
}
