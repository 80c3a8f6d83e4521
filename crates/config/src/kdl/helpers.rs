//! KDL parsing helper functions.
//!
//! Common utilities for extracting values from KDL nodes.

use anyhow::Result;

/// Convert a byte offset to line and column numbers (1-indexed)
pub fn offset_to_line_col(content: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in content.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn first_value<'a>(node: &'a ::kdl::KdlNode, name: &str) -> Option<&'a ::kdl::KdlValue> {
    node.children()
        .and_then(|children| children.get(name))
        .and_then(|n| n.entries().first())
        .map(|e| e.value())
}

/// Helper to get a string entry from a KDL node
pub fn get_string_entry(node: &::kdl::KdlNode, name: &str) -> Option<String> {
    first_value(node, name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Helper to get an integer entry from a KDL node
pub fn get_int_entry(node: &::kdl::KdlNode, name: &str) -> Option<i128> {
    first_value(node, name).and_then(|v| v.as_integer())
}

/// Helper to get a non-negative integer entry, rejecting negatives and overflow
pub fn get_u64_entry(node: &::kdl::KdlNode, name: &str) -> Result<Option<u64>> {
    match get_int_entry(node, name) {
        Some(v) => u64::try_from(v).map(Some).map_err(|_| {
            anyhow::anyhow!(
                "'{}' in '{}' must be a non-negative integer, got {}",
                name,
                node.name().value(),
                v
            )
        }),
        None => Ok(None),
    }
}

/// Helper to get a boolean entry from a KDL node
pub fn get_bool_entry(node: &::kdl::KdlNode, name: &str) -> Option<bool> {
    first_value(node, name).and_then(|v| v.as_bool())
}

/// Helper to get every string argument of a child node
pub fn get_string_list(node: &::kdl::KdlNode, name: &str) -> Option<Vec<String>> {
    node.children().and_then(|children| children.get(name)).map(|n| {
        n.entries()
            .iter()
            .filter(|e| e.name().is_none())
            .filter_map(|e| e.value().as_string())
            .map(|s| s.to_string())
            .collect()
    })
}

/// Helper to get a child block by name
pub fn get_child<'a>(node: &'a ::kdl::KdlNode, name: &str) -> Option<&'a ::kdl::KdlNode> {
    node.children().and_then(|children| children.get(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ::kdl::KdlDocument {
        content.parse().unwrap()
    }

    #[test]
    fn test_offset_to_line_col() {
        let content = "a\nbc\nd";
        assert_eq!(offset_to_line_col(content, 0), (1, 1));
        assert_eq!(offset_to_line_col(content, 3), (2, 2));
        assert_eq!(offset_to_line_col(content, 5), (3, 1));
    }

    #[test]
    fn test_entry_helpers() {
        let doc = parse(
            r#"
            block {
                name "value"
                count 42
                negative -1
                flag #true
                servers "a" "b"
            }
            "#,
        );
        let node = doc.get("block").unwrap();

        assert_eq!(get_string_entry(node, "name").as_deref(), Some("value"));
        assert_eq!(get_int_entry(node, "count"), Some(42));
        assert_eq!(get_u64_entry(node, "count").unwrap(), Some(42));
        assert!(get_u64_entry(node, "negative").is_err());
        assert_eq!(get_bool_entry(node, "flag"), Some(true));
        assert_eq!(
            get_string_list(node, "servers"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(get_string_entry(node, "missing").is_none());
    }
}
