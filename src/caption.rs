use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Substituted when the model's text was not a JSON object at all, or when a
/// stored record is missing or unreadable.
pub const FALLBACK_TITLE: &str = "No Title Found";
pub const FALLBACK_DESCRIPTION: &str = "No Description Found";

/// Substituted per-field when the JSON parsed but a key was absent.
const MISSING_TITLE: &str = "No Title Generated";
const MISSING_DESCRIPTION: &str = "No Description Generated";

/// The caption pair stored alongside every image as `{basename}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub title: String,
    pub description: String,
}

impl CaptionRecord {
    pub fn fallback() -> Self {
        CaptionRecord {
            title: FALLBACK_TITLE.to_owned(),
            description: FALLBACK_DESCRIPTION.to_owned(),
        }
    }
}

/// Normalizes the generator's raw text into a caption record.
///
/// Models routinely wrap the payload in markdown code fences, so those are
/// stripped before parsing. Malformed output degrades to the fallback pair
/// rather than failing; the upload pipeline never aborts on bad caption text.
pub fn normalize(raw: &str) -> CaptionRecord {
    let text = raw.replace("```json", "").replace("```", "");
    parse_fields(text.trim())
}

/// Applies the same field semantics when reading a record back from the
/// store. Records we wrote ourselves always parse, but a hand-edited or
/// truncated object still degrades instead of erroring.
pub fn parse_stored(text: &str) -> CaptionRecord {
    parse_fields(text)
}

fn parse_fields(text: &str) -> CaptionRecord {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => CaptionRecord {
            title: map
                .get("title")
                .and_then(Value::as_str)
                .map_or_else(|| MISSING_TITLE.to_owned(), str::to_owned),
            description: map
                .get("description")
                .and_then(Value::as_str)
                .map_or_else(|| MISSING_DESCRIPTION.to_owned(), str::to_owned),
        },
        _ => CaptionRecord::fallback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tagged_code_fences() {
        let raw = "```json\n{\"title\":\"Dog\",\"description\":\"A brown dog\"}\n```";
        let record = normalize(raw);
        assert_eq!(record.title, "Dog");
        assert_eq!(record.description, "A brown dog");
    }

    #[test]
    fn strips_untagged_code_fences() {
        let raw = "```\n{\"title\":\"Cat\",\"description\":\"A cat on a mat\"}\n```";
        let record = normalize(raw);
        assert_eq!(record.title, "Cat");
        assert_eq!(record.description, "A cat on a mat");
    }

    #[test]
    fn plain_json_needs_no_stripping() {
        let record = normalize("{\"title\":\"T\",\"description\":\"D\"}");
        assert_eq!(record.title, "T");
        assert_eq!(record.description, "D");
    }

    #[test]
    fn invalid_json_yields_fallback_pair() {
        let record = normalize("the model rambled instead of answering");
        assert_eq!(record, CaptionRecord::fallback());
    }

    #[test]
    fn non_object_json_yields_fallback_pair() {
        assert_eq!(normalize("[1, 2, 3]"), CaptionRecord::fallback());
        assert_eq!(normalize("\"just a string\""), CaptionRecord::fallback());
    }

    #[test]
    fn missing_title_defaults_and_preserves_description() {
        let record = normalize("{\"description\":\"A sunset over water\"}");
        assert_eq!(record.title, "No Title Generated");
        assert_eq!(record.description, "A sunset over water");
    }

    #[test]
    fn missing_description_defaults_and_preserves_title() {
        let record = normalize("{\"title\":\"Sunset\"}");
        assert_eq!(record.title, "Sunset");
        assert_eq!(record.description, "No Description Generated");
    }

    #[test]
    fn non_string_field_counts_as_missing() {
        let record = normalize("{\"title\": 7, \"description\":\"D\"}");
        assert_eq!(record.title, "No Title Generated");
        assert_eq!(record.description, "D");
    }

    #[test]
    fn stored_record_round_trips_verbatim() {
        let record = CaptionRecord {
            title: "Dog".into(),
            description: "A brown dog".into(),
        };
        let json = serde_json::to_string_pretty(&record).unwrap();
        assert_eq!(parse_stored(&json), record);
    }

    #[test]
    fn unreadable_stored_record_yields_fallback_pair() {
        assert_eq!(parse_stored("{truncated"), CaptionRecord::fallback());
    }
}
