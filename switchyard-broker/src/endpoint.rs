//! Per-request endpoint grammar.
//!
//! `queue:<name>[, expression:<expr>][, max_message_size:<n>]`: comma
//! separated `key: value` pairs with surrounding whitespace ignored. Only
//! the three keys above are legal; anything else is rejected with an error
//! naming the offending keys.

use crate::error::{AsyncMessageError, HandlerResult};

const SUPPORTED_ARGUMENTS: [&str; 3] = ["queue", "expression", "max_message_size"];

/// Parsed endpoint arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointArguments {
    pub queue: String,
    pub expression: Option<String>,
    /// `0` on the wire means unset.
    pub max_message_size: Option<usize>,
}

/// Parse an endpoint string.
pub fn parse_endpoint(endpoint: &str) -> HandlerResult<EndpointArguments> {
    let mut queue: Option<String> = None;
    let mut expression: Option<String> = None;
    let mut max_message_size: Option<usize> = None;
    let mut unsupported: Vec<String> = Vec::new();

    for part in endpoint.split(',') {
        let part = part.trim();
        let Some((key, value)) = part.split_once(':') else {
            return Err(AsyncMessageError::configuration(format!(
                "incorrect format in arguments: \"{part}\""
            )));
        };

        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return Err(AsyncMessageError::configuration(format!(
                "incorrect format in arguments: \"{part}\""
            )));
        }

        match key {
            "queue" => queue = Some(value.to_string()),
            "expression" => expression = Some(value.to_string()),
            "max_message_size" => {
                let size: usize = value.parse().map_err(|_| {
                    AsyncMessageError::configuration(format!(
                        "max_message_size is not a valid integer: \"{value}\""
                    ))
                })?;
                max_message_size = (size > 0).then_some(size);
            }
            _ => unsupported.push(key.to_string()),
        }
    }

    if !unsupported.is_empty() {
        return Err(AsyncMessageError::configuration(format!(
            "arguments {} is not supported",
            unsupported.join(", ")
        )));
    }

    let queue = queue.ok_or_else(|| {
        AsyncMessageError::configuration(format!("no queue specified in endpoint: \"{endpoint}\""))
    })?;

    Ok(EndpointArguments {
        queue,
        expression,
        max_message_size,
    })
}

/// Reject `expression` for any action other than GET.
pub fn reject_expression(arguments: &EndpointArguments, action: &str) -> HandlerResult<()> {
    if arguments.expression.is_some() {
        return Err(AsyncMessageError::configuration(format!(
            "argument expression is not allowed for action {action}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_only() {
        let args = parse_endpoint("queue:IN.QUEUE").unwrap();
        assert_eq!(args.queue, "IN.QUEUE");
        assert!(args.expression.is_none());
        assert!(args.max_message_size.is_none());
    }

    #[test]
    fn test_all_arguments_with_whitespace() {
        let args =
            parse_endpoint("queue: IN.QUEUE , expression: $.id , max_message_size: 1024").unwrap();
        assert_eq!(args.queue, "IN.QUEUE");
        assert_eq!(args.expression.as_deref(), Some("$.id"));
        assert_eq!(args.max_message_size, Some(1024));
    }

    #[test]
    fn test_expression_keeps_embedded_colons() {
        let args = parse_endpoint("queue:Q, expression:$[?(@.tag=='a:b')]").unwrap();
        assert_eq!(args.expression.as_deref(), Some("$[?(@.tag=='a:b')]"));
    }

    #[test]
    fn test_unsupported_arguments_named() {
        let err = parse_endpoint("queue:Q, foo:1, bar:2").unwrap_err();
        assert_eq!(err.to_string(), "arguments foo, bar is not supported");
    }

    #[test]
    fn test_zero_max_message_size_means_unset() {
        let args = parse_endpoint("queue:Q, max_message_size:0").unwrap();
        assert!(args.max_message_size.is_none());
    }

    #[test]
    fn test_bad_max_message_size() {
        let err = parse_endpoint("queue:Q, max_message_size:many").unwrap_err();
        assert!(err.to_string().contains("not a valid integer"));
    }

    #[test]
    fn test_missing_queue() {
        let err = parse_endpoint("expression:$.id").unwrap_err();
        assert!(err.to_string().contains("no queue specified"));
    }

    #[test]
    fn test_malformed_pair() {
        assert!(parse_endpoint("queue").is_err());
        assert!(parse_endpoint("queue:Q, expression:").is_err());
    }

    #[test]
    fn test_expression_rejected_for_put() {
        let args = parse_endpoint("queue:Q, expression:$.id").unwrap();
        let err = reject_expression(&args, "PUT").unwrap_err();
        assert_eq!(
            err.to_string(),
            "argument expression is not allowed for action PUT"
        );

        let plain = parse_endpoint("queue:Q").unwrap();
        assert!(reject_expression(&plain, "PUT").is_ok());
    }
}
