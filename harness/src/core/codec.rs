//! Tagged text blocks exchanged between agent roles.
//!
//! The grammar is flat: a block is `<word>payload</word>` where the payload runs
//! to the first closing tag of the same name. Blocks inside a payload are not
//! reported at the top level; decode the payload again to reach them.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::HarnessError;

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(\w+)>").expect("open tag pattern should compile"));

/// Decoded tag → payload mapping.
pub type Envelope = BTreeMap<String, String>;

/// Wrap `payload` in a start/end tag pair.
pub fn encode(tag: &str, payload: &str) -> String {
    format!("<{tag}>\n{payload}\n</{tag}>")
}

/// Extract every top-level `<tag>...</tag>` pair, trimming payloads.
///
/// Tagless or malformed text yields an empty mapping. When a tag repeats, the
/// last occurrence wins.
pub fn decode(text: &str) -> Envelope {
    let mut envelope = Envelope::new();
    let mut cursor = 0;
    while let Some(open) = OPEN_TAG.captures_at(text, cursor) {
        let (Some(whole), Some(name)) = (open.get(0), open.get(1)) else {
            break;
        };
        let closing = format!("</{}>", name.as_str());
        match text[whole.end()..].find(&closing) {
            Some(offset) => {
                let payload = &text[whole.end()..whole.end() + offset];
                envelope.insert(name.as_str().to_string(), payload.trim().to_string());
                cursor = whole.end() + offset + closing.len();
            }
            // Unclosed: retry from the next character like a regex scan would.
            None => cursor = whole.start() + 1,
        }
    }
    envelope
}

/// Fetch a tag that the caller cannot proceed without.
pub fn require<'a>(envelope: &'a Envelope, tag: &str) -> Result<&'a str, HarnessError> {
    envelope
        .get(tag)
        .map(String::as_str)
        .ok_or_else(|| HarnessError::missing_tag(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn decode_of_encode_is_trimmed_payload() {
        let text = encode("task_name", "  collect_wood \n");
        let envelope = decode(&text);
        assert_eq!(envelope.len(), 1);
        assert_eq!(envelope["task_name"], "collect_wood");
    }

    #[test]
    fn decode_finds_every_top_level_tag() {
        let text = "Please assess:\n<performer_url>\nhttp://localhost:9002\n</performer_url>\n\
                    some prose <task_name>collect_wood</task_name> and\n\
                    <difficulty> simple </difficulty>";
        let envelope = decode(text);
        assert_eq!(envelope.len(), 3);
        assert_eq!(envelope["performer_url"], "http://localhost:9002");
        assert_eq!(envelope["task_name"], "collect_wood");
        assert_eq!(envelope["difficulty"], "simple");
    }

    #[test]
    fn decode_is_non_greedy_and_multiline() {
        let text = "<a>\none\ntwo\n</a> middle <a>three</a>";
        let envelope = decode(text);
        assert_eq!(envelope["a"], "three", "last occurrence wins");
    }

    #[test]
    fn nested_tags_stay_inside_the_payload() {
        let text = "<task_request>Task Name: x\n<task_config>text: y</task_config>\n</task_request>";
        let envelope = decode(text);
        assert_eq!(envelope.len(), 1);
        let inner = decode(&envelope["task_request"]);
        assert_eq!(inner["task_config"], "text: y");
    }

    #[test]
    fn malformed_text_decodes_to_empty() {
        assert!(decode("no tags here").is_empty());
        assert!(decode("<open>never closed").is_empty());
        assert!(decode("<a>mismatched</b>").is_empty());
    }

    #[test]
    fn unclosed_tag_does_not_hide_later_blocks() {
        let envelope = decode("<broken> then <ok>fine</ok>");
        assert_eq!(envelope.len(), 1);
        assert_eq!(envelope["ok"], "fine");
    }

    #[test]
    fn require_reports_missing_tag() {
        let envelope = decode("<a>1</a>");
        assert_eq!(require(&envelope, "a").expect("present"), "1");
        let err = require(&envelope, "video_artifact").expect_err("absent");
        assert_eq!(
            err,
            HarnessError::Protocol(ProtocolError::MissingTag {
                tag: "video_artifact".to_string()
            })
        );
    }
}
