//! Lenient JSON reading for hand-maintained manifests
//!
//! Published manifests are sometimes edited or templated by hand, and the
//! most common damage is a trailing comma before a closing brace or bracket.
//! The reader strips those in a string-aware pre-pass and hands the cleaned
//! document to `serde_json`; everything else stays strict.

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Parse a JSON document, tolerating trailing commas in objects and arrays.
pub fn from_str_lenient<T: DeserializeOwned>(input: &str) -> Result<T> {
    Ok(serde_json::from_str(&strip_trailing_commas(input))?)
}

/// Remove commas whose next significant character closes an object or array.
///
/// Commas inside string literals are untouched, including behind escapes.
fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                // Hold the comma until we know what follows the whitespace.
                let mut pending_ws = String::new();
                let mut next_significant = None;
                while let Some(&n) = chars.peek() {
                    if n.is_whitespace() {
                        pending_ws.push(n);
                        chars.next();
                    } else {
                        next_significant = Some(n);
                        break;
                    }
                }
                if !matches!(next_significant, Some('}' | ']')) {
                    out.push(',');
                }
                out.push_str(&pending_ws);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strict_documents_pass_through() {
        let doc = r#"{"files": [{"path": "a", "size": 1}]}"#;
        assert_eq!(strip_trailing_commas(doc), doc);
    }

    #[test]
    fn test_trailing_comma_in_object() {
        let doc = "{\"a\": 1,}";
        assert_eq!(strip_trailing_commas(doc), "{\"a\": 1}");
    }

    #[test]
    fn test_trailing_comma_in_array_with_newlines() {
        let doc = "[\n  1,\n  2,\n]";
        assert_eq!(strip_trailing_commas(doc), "[\n  1,\n  2\n]");
    }

    #[test]
    fn test_commas_inside_strings_survive() {
        let doc = r#"{"path": "weird, name,]", "n": 1,}"#;
        assert_eq!(
            strip_trailing_commas(doc),
            r#"{"path": "weird, name,]", "n": 1}"#
        );
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        let doc = r#"{"s": "a\",]b",}"#;
        assert_eq!(strip_trailing_commas(doc), r#"{"s": "a\",]b"}"#);
    }

    #[test]
    fn test_from_str_lenient_parses_damaged_manifest() {
        #[derive(serde::Deserialize)]
        struct Doc {
            values: Vec<u32>,
        }
        let doc: Doc = from_str_lenient("{\"values\": [1, 2, 3,],}").unwrap();
        assert_eq!(doc.values, vec![1, 2, 3]);
    }

    #[test]
    fn test_double_comma_is_still_an_error() {
        #[derive(serde::Deserialize)]
        struct Doc {
            #[allow(dead_code)]
            values: Vec<u32>,
        }
        assert!(from_str_lenient::<Doc>("{\"values\": [1,, 2]}").is_err());
    }

    proptest::proptest! {
        // Stripping must never corrupt a document that was already valid.
        #[test]
        fn prop_valid_json_unaffected(values in proptest::collection::vec(".*", 0..8)) {
            let doc = serde_json::to_string(&values).unwrap();
            let cleaned = strip_trailing_commas(&doc);
            let back: Vec<String> = serde_json::from_str(&cleaned).unwrap();
            proptest::prop_assert_eq!(back, values);
        }
    }
}
