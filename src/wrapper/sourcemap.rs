//! Source Map v3 support for generated modules.
//!
//! Generated wrappers carry a map whose single mapping ties the entry
//! statement back to the first position of the original test file. The
//! interpreter consults registered maps when rendering stack frames.

use serde::{Deserialize, Serialize};

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const TRAILER_PREFIX: &str = "//# sourceMappingURL=";

// ============================================================================
// VLQ
// ============================================================================

/// Append the base64 VLQ encoding of `value` to `out`.
pub fn encode_vlq(value: i64, out: &mut String) {
    let mut rest = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = (rest & 0b1_1111) as usize;
        rest >>= 5;
        if rest > 0 {
            digit |= 0b10_0000;
        }
        out.push(BASE64[digit] as char);
        if rest == 0 {
            break;
        }
    }
}

/// Decode one segment (a comma-free run of VLQ fields).
pub fn decode_vlq_segment(segment: &str) -> Option<Vec<i64>> {
    let mut values = Vec::new();
    let mut value: i64 = 0;
    let mut shift = 0;
    for byte in segment.bytes() {
        let digit = BASE64.iter().position(|&b| b == byte)? as i64;
        value += (digit & 0b1_1111) << shift;
        if digit & 0b10_0000 != 0 {
            shift += 5;
            if shift > 60 {
                return None;
            }
            continue;
        }
        let negative = value & 1 == 1;
        value >>= 1;
        values.push(if negative { -value } else { value });
        value = 0;
        shift = 0;
    }
    // A continuation bit on the last digit leaves a dangling field.
    (shift == 0).then_some(values)
}

// ============================================================================
// SOURCE MAP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u32,
    #[serde(default)]
    pub file: String,
    pub sources: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}

/// A position in an original source, 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    pub source: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    generated_column: i64,
    source: i64,
    line: i64,
    column: i64,
}

impl SourceMap {
    /// A map with one mapping from `(generated_line, generated_column)` in
    /// `file` to line 0 column 0 of `source`. Both coordinates are 0-based.
    pub fn single_mapping(file: &str, source: &str, generated_line: u32, generated_column: u32) -> Self {
        let mut mappings = ";".repeat(generated_line as usize);
        for field in [generated_column as i64, 0, 0, 0] {
            encode_vlq(field, &mut mappings);
        }
        Self {
            version: 3,
            file: file.to_string(),
            sources: vec![source.to_string()],
            names: Vec::new(),
            mappings,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Original position for a 0-based generated position. Uses the last
    /// segment at or before `column`, else the first segment on the line.
    pub fn lookup(&self, line: u32, column: u32) -> Option<OriginalPosition> {
        let segments = self.decode_line(line as usize)?;
        let segment = segments
            .iter()
            .rev()
            .find(|s| s.generated_column <= column as i64)
            .or_else(|| segments.first())?;
        let source = self.sources.get(usize::try_from(segment.source).ok()?)?;
        Some(OriginalPosition {
            source: source.clone(),
            line: u32::try_from(segment.line).ok()?,
            column: u32::try_from(segment.column).ok()?,
        })
    }

    /// Segments of one generated line with absolute fields. Source fields are
    /// relative across the whole mapping string, so earlier lines are decoded
    /// too.
    fn decode_line(&self, wanted: usize) -> Option<Vec<Segment>> {
        let (mut source, mut line, mut column) = (0i64, 0i64, 0i64);
        for (index, text) in self.mappings.split(';').enumerate() {
            let mut generated_column = 0i64;
            let mut segments = Vec::new();
            for raw in text.split(',').filter(|s| !s.is_empty()) {
                let fields = decode_vlq_segment(raw)?;
                generated_column += *fields.first()?;
                if fields.len() >= 4 {
                    source += fields[1];
                    line += fields[2];
                    column += fields[3];
                    segments.push(Segment {
                        generated_column,
                        source,
                        line,
                        column,
                    });
                }
            }
            if index == wanted {
                return (!segments.is_empty()).then_some(segments);
            }
        }
        None
    }
}

// ============================================================================
// TRAILER
// ============================================================================

/// The `//# sourceMappingURL=` comment naming `map_name`.
pub fn trailer(map_name: &str) -> String {
    format!("{TRAILER_PREFIX}{map_name}")
}

/// The map name from the last `//# sourceMappingURL=` line of `text`.
pub fn trailer_url(text: &str) -> Option<&str> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.strip_prefix(TRAILER_PREFIX))
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlq_matches_known_encodings() {
        let mut out = String::new();
        for v in [0, 1, -1, 16, 123] {
            encode_vlq(v, &mut out);
            out.push(',');
        }
        assert_eq!(out, "A,C,D,gB,2H,");
        assert_eq!(decode_vlq_segment("2H"), Some(vec![123]));
        assert_eq!(decode_vlq_segment("AAgBC"), Some(vec![0, 0, 16, 1]));
        assert_eq!(decode_vlq_segment("g"), None);
    }

    #[test]
    fn single_mapping_points_at_original_start() {
        let map = SourceMap::single_mapping("w.mjs", "/abs/orig.test.mjs", 3, 4);
        assert_eq!(map.mappings, ";;;IAAA");

        let found = map.lookup(3, 10).unwrap();
        assert_eq!(found.source, "/abs/orig.test.mjs");
        assert_eq!((found.line, found.column), (0, 0));
        // Before the mapped column the line's first segment still applies.
        assert!(map.lookup(3, 0).is_some());
        assert!(map.lookup(1, 0).is_none());
    }

    #[test]
    fn json_form_is_v3() {
        let map = SourceMap::single_mapping("w.mjs", "o.mjs", 0, 0);
        let json: serde_json::Value = serde_json::from_str(&map.to_json()).unwrap();
        assert_eq!(json["version"], 3);
        assert_eq!(json["sources"][0], "o.mjs");
        assert_eq!(SourceMap::from_json(&map.to_json()).unwrap(), map);
    }

    #[test]
    fn trailer_is_found_on_last_line() {
        let text = format!("code();\n{}\n", trailer("w.mjs.map"));
        assert_eq!(trailer_url(&text), Some("w.mjs.map"));
        assert_eq!(trailer_url("code();\n"), None);
    }
}
