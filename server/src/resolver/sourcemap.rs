use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lively_shared::LivelyResult;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct SourceMap<'a> {
    version: u8,
    sources: [&'a str; 1],
    #[serde(rename = "sourcesContent")]
    sources_content: [&'a str; 1],
    names: [&'a str; 0],
    mappings: String,
}

/// Builds a `//# sourceMappingURL` comment (with surrounding newlines) that
/// maps every line of `content`, shifted down by `line_offset` lines, back
/// onto the same line of `source_url`.
pub fn inline_comment(source_url: &str, content: &str, line_offset: usize) -> LivelyResult<String> {
    let map = SourceMap {
        version: 3,
        sources: [source_url],
        sources_content: [content],
        names: [],
        mappings: line_mappings(content.lines().count().max(1), line_offset),
    };
    let json = serde_json::to_string(&map)?;

    Ok(format!(
        "\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,{}\n",
        STANDARD.encode(json)
    ))
}

/// VLQ mappings for a line-to-line identity map. The first mapped line
/// points at source line 0 (`AAAA`), each following one advances the
/// source line by one (`AACA`).
fn line_mappings(lines: usize, line_offset: usize) -> String {
    let mut mappings = ";".repeat(line_offset);
    mappings.push_str("AAAA");
    for _ in 1..lines {
        mappings.push_str(";AACA");
    }
    mappings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(comment: &str) -> serde_json::Value {
        let encoded = comment
            .trim()
            .strip_prefix("//# sourceMappingURL=data:application/json;charset=utf-8;base64,")
            .unwrap();
        serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn map_points_at_original_url() {
        let comment = inline_comment("/templates/item.hbs", "a\nb\nc", 1).unwrap();
        assert!(comment.starts_with('\n') && comment.ends_with('\n'));

        let map = decode(&comment);
        assert_eq!(map["version"], 3);
        assert_eq!(map["sources"][0], "/templates/item.hbs");
        assert_eq!(map["sourcesContent"][0], "a\nb\nc");
        assert_eq!(map["mappings"], ";AAAA;AACA;AACA");
    }

    #[test]
    fn empty_content_still_maps_one_line() {
        assert_eq!(line_mappings(1, 0), "AAAA");
        assert_eq!(line_mappings(2, 2), ";;AAAA;AACA");
    }
}
