use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::{MAX_INVITEE_EMAILS, MAX_MEETINGS_PER_PACKAGE};

/// Title used when the content has no header block with text.
pub const UNTITLED: &str = "Untitled";

/// Editor output: an ordered tree of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One content block. Unrecognized or malformed block payloads land in
/// `Unknown` and round-trip through persistence untouched.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: Option<String>,
    pub body: BlockBody,
}

#[derive(Debug, Clone)]
pub enum BlockBody {
    Header(HeaderData),
    Image(ImageData),
    Package(PackageBlock),
    Unknown { kind: String, data: Value },
}

impl BlockBody {
    fn kind(&self) -> &str {
        match self {
            BlockBody::Header(_) => "header",
            BlockBody::Image(_) => "image",
            BlockBody::Package(_) => "package",
            BlockBody::Unknown { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl HeaderData {
    /// Header text as the editor would display it; numbers are accepted.
    pub fn text_string(&self) -> Option<String> {
        match self.text.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<ImageFile>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Raw package block as emitted by the editor tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageBlock {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub include_meet: bool,
    #[serde(default)]
    pub include_drive: bool,
    #[serde(default)]
    pub meetings: Vec<MeetingBlock>,
    #[serde(default)]
    pub drive_folder: Option<FolderBlock>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingBlock {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub speaker_emails: Option<Vec<String>>,
    #[serde(default)]
    pub speaker_email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderBlock {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub speaker_emails: Option<Vec<String>>,
    #[serde(default)]
    pub speaker_email: Option<String>,
}

#[derive(Deserialize)]
struct RawBlock {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawBlock::deserialize(deserializer)?;
        let body = match raw.kind.as_str() {
            "header" => match serde_json::from_value::<HeaderData>(raw.data.clone()) {
                Ok(data) => BlockBody::Header(data),
                Err(_) => BlockBody::Unknown {
                    kind: raw.kind,
                    data: raw.data,
                },
            },
            "image" => match serde_json::from_value::<ImageData>(raw.data.clone()) {
                Ok(data) => BlockBody::Image(data),
                Err(_) => BlockBody::Unknown {
                    kind: raw.kind,
                    data: raw.data,
                },
            },
            "package" => match serde_json::from_value::<PackageBlock>(raw.data.clone()) {
                Ok(data) => BlockBody::Package(data),
                Err(_) => BlockBody::Unknown {
                    kind: raw.kind,
                    data: raw.data,
                },
            },
            _ => BlockBody::Unknown {
                kind: raw.kind,
                data: raw.data,
            },
        };
        Ok(Block { id: raw.id, body })
    }
}

impl Serialize for Block {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = match &self.body {
            BlockBody::Header(d) => serde_json::to_value(d).map_err(serde::ser::Error::custom)?,
            BlockBody::Image(d) => serde_json::to_value(d).map_err(serde::ser::Error::custom)?,
            BlockBody::Package(d) => serde_json::to_value(d).map_err(serde::ser::Error::custom)?,
            BlockBody::Unknown { data, .. } => data.clone(),
        };
        let len = if self.id.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        map.serialize_entry("type", self.body.kind())?;
        map.serialize_entry("data", &data)?;
        map.end()
    }
}

/// Parsed package specification extracted from content.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageSpec {
    pub name: String,
    pub price: i64,
    pub meetings: Vec<MeetingRequest>,
    pub drive_folder: Option<FolderRequest>,
}

/// One desired scheduled session.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingRequest {
    pub start: DateTime<Utc>,
    pub timezone: String,
    pub invitees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderRequest {
    pub path: String,
    pub invitees: Vec<String>,
}

/// First header block with non-empty trimmed text, if any.
pub fn display_title(content: &EditorContent) -> Option<String> {
    content.blocks.iter().find_map(|block| match &block.body {
        BlockBody::Header(data) => {
            let text = data.text_string()?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    })
}

/// URL of the first image block's file, if any.
pub fn display_image(content: &EditorContent) -> Option<String> {
    content.blocks.iter().find_map(|block| match &block.body {
        BlockBody::Image(data) => data.file.as_ref().and_then(|f| f.url.clone()),
        _ => None,
    })
}

/// Extract the package specification. Present only when content carries
/// exactly one package block with a non-empty name and a valid non-negative
/// price. Malformed pieces degrade to defaults instead of failing.
pub fn package_spec(content: &EditorContent) -> Option<PackageSpec> {
    let mut package_blocks = content.blocks.iter().filter_map(|block| match &block.body {
        BlockBody::Package(data) => Some(data),
        _ => None,
    });
    let block = package_blocks.next()?;
    if package_blocks.next().is_some() {
        return None;
    }

    let name = block.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    let price = block.price.filter(|p| p.is_finite() && *p >= 0.0)?;

    let meetings = block
        .meetings
        .iter()
        .filter(|m| m.start_date.is_some())
        .take(MAX_MEETINGS_PER_PACKAGE)
        .filter_map(|m| {
            let timezone = m
                .timezone
                .as_deref()
                .filter(|tz| !tz.trim().is_empty())
                .unwrap_or("UTC")
                .to_string();
            let start = parse_meeting_start(m.start_date.as_deref()?, &timezone)?;
            Some(MeetingRequest {
                start,
                timezone,
                invitees: invitee_emails(m.speaker_emails.as_deref(), m.speaker_email.as_deref()),
            })
        })
        .collect();

    let drive_folder = block.drive_folder.as_ref().and_then(|folder| {
        let path = folder.path.as_deref().map(str::trim).unwrap_or_default();
        if path.is_empty() {
            return None;
        }
        Some(FolderRequest {
            path: path.to_string(),
            invitees: invitee_emails(
                folder.speaker_emails.as_deref(),
                folder.speaker_email.as_deref(),
            ),
        })
    });

    Some(PackageSpec {
        name: name.to_string(),
        price: price.round() as i64,
        meetings,
        drive_folder,
    })
}

fn invitee_emails(emails: Option<&[String]>, single: Option<&str>) -> Vec<String> {
    let from_list: Vec<String> = match emails {
        Some(list) => list
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect(),
        None => single
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| vec![e.to_string()])
            .unwrap_or_default(),
    };
    from_list.into_iter().take(MAX_INVITEE_EMAILS).collect()
}

static OFFSET_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(Z|[+-]\d{2}:?\d{2})$").expect("valid regex"));

/// Named-timezone UTC offsets for local wall-clock inputs. No DST handling;
/// the supported zones do not observe it.
fn timezone_offset_hours(timezone: &str) -> i64 {
    match timezone {
        "Asia/Jakarta" => 7,
        "Asia/Singapore" => 8,
        _ => 0,
    }
}

/// Resolve a requested start to an absolute instant. Inputs carrying a `Z`
/// or numeric offset are taken verbatim; bare wall-clock strings are shifted
/// by the declared timezone's fixed offset.
pub fn parse_meeting_start(raw: &str, timezone: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if OFFSET_SUFFIX.is_match(s) {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
            return Some(dt.with_timezone(&Utc));
        }
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()?;
    let shifted = Utc.from_utc_datetime(&naive) - chrono::Duration::hours(timezone_offset_hours(timezone));
    Some(shifted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(blocks: Value) -> EditorContent {
        serde_json::from_value(json!({ "time": 1700000000, "blocks": blocks, "version": "2.29.1" }))
            .unwrap()
    }

    #[test]
    fn title_comes_from_first_nonempty_header() {
        let c = content(json!([
            { "type": "header", "data": { "text": "   " } },
            { "type": "paragraph", "data": { "text": "body" } },
            { "type": "header", "data": { "text": "  Rust Course  " } },
        ]));
        assert_eq!(display_title(&c).as_deref(), Some("Rust Course"));
    }

    #[test]
    fn missing_header_yields_no_title() {
        let c = content(json!([{ "type": "paragraph", "data": { "text": "hi" } }]));
        assert_eq!(display_title(&c), None);
    }

    #[test]
    fn image_url_from_first_image_block() {
        let c = content(json!([
            { "type": "image", "data": { "file": { "url": "https://img.test/a.png" } } },
            { "type": "image", "data": { "file": { "url": "https://img.test/b.png" } } },
        ]));
        assert_eq!(
            display_image(&c).as_deref(),
            Some("https://img.test/a.png")
        );
    }

    #[test]
    fn unknown_blocks_round_trip() {
        let raw = json!({
            "blocks": [
                { "id": "x1", "type": "quote", "data": { "text": "q", "caption": "c" } },
            ]
        });
        let c: EditorContent = serde_json::from_value(raw.clone()).unwrap();
        let back = serde_json::to_value(&c).unwrap();
        assert_eq!(back["blocks"][0], raw["blocks"][0]);
    }

    #[test]
    fn header_extra_fields_round_trip() {
        let raw = json!({
            "blocks": [
                { "type": "header", "data": { "text": "T", "level": 2 } },
            ]
        });
        let c: EditorContent = serde_json::from_value(raw.clone()).unwrap();
        let back = serde_json::to_value(&c).unwrap();
        assert_eq!(back["blocks"][0]["data"]["level"], 2);
    }

    #[test]
    fn package_spec_requires_name_and_price() {
        let no_name = content(json!([
            { "type": "package", "data": { "name": "  ", "price": 100 } },
        ]));
        assert!(package_spec(&no_name).is_none());

        let negative = content(json!([
            { "type": "package", "data": { "name": "Course", "price": -5 } },
        ]));
        assert!(package_spec(&negative).is_none());

        let ok = content(json!([
            { "type": "package", "data": { "name": " Course ", "price": 99999.6 } },
        ]));
        let spec = package_spec(&ok).unwrap();
        assert_eq!(spec.name, "Course");
        assert_eq!(spec.price, 100000);
        assert!(spec.meetings.is_empty());
        assert!(spec.drive_folder.is_none());
    }

    #[test]
    fn zero_price_is_valid() {
        let c = content(json!([
            { "type": "package", "data": { "name": "Free intro", "price": 0 } },
        ]));
        assert_eq!(package_spec(&c).unwrap().price, 0);
    }

    #[test]
    fn two_package_blocks_yield_no_spec() {
        let c = content(json!([
            { "type": "package", "data": { "name": "A", "price": 1 } },
            { "type": "package", "data": { "name": "B", "price": 2 } },
        ]));
        assert!(package_spec(&c).is_none());
    }

    #[test]
    fn meetings_capped_and_dateless_skipped() {
        let c = content(json!([
            { "type": "package", "data": {
                "name": "Course", "price": 1000,
                "meetings": [
                    { "startDate": "2025-06-01T10:00:00Z", "timezone": "UTC" },
                    { "timezone": "UTC" },
                    { "startDate": "2025-06-02T10:00:00Z", "timezone": "UTC" },
                    { "startDate": "2025-06-03T10:00:00Z", "timezone": "UTC" },
                    { "startDate": "2025-06-04T10:00:00Z", "timezone": "UTC" },
                ],
            } },
        ]));
        let spec = package_spec(&c).unwrap();
        assert_eq!(spec.meetings.len(), 3);
        assert_eq!(
            spec.meetings[2].start,
            Utc.with_ymd_and_hms(2025, 6, 3, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn invitee_emails_trimmed_and_capped() {
        let c = content(json!([
            { "type": "package", "data": {
                "name": "Course", "price": 1000,
                "meetings": [
                    { "startDate": "2025-06-01T10:00:00Z",
                      "speakerEmails": [" a@x.io ", "", "b@x.io", "c@x.io", "d@x.io"] },
                ],
                "driveFolder": { "path": " shared ", "speakerEmail": " e@x.io " },
            } },
        ]));
        let spec = package_spec(&c).unwrap();
        assert_eq!(spec.meetings[0].invitees, vec!["a@x.io", "b@x.io", "c@x.io"]);
        let folder = spec.drive_folder.unwrap();
        assert_eq!(folder.path, "shared");
        assert_eq!(folder.invitees, vec!["e@x.io"]);
    }

    #[test]
    fn malformed_package_data_degrades_to_absent() {
        let c = content(json!([
            { "type": "package", "data": { "name": "Course", "price": "not-a-number" } },
        ]));
        assert!(package_spec(&c).is_none());
    }

    #[test]
    fn wall_clock_shifted_by_fixed_offset() {
        // Jakarta is UTC+7
        let dt = parse_meeting_start("2025-06-01T10:00:00", "Asia/Jakarta").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap());

        let sg = parse_meeting_start("2025-06-01T10:00", "Asia/Singapore").unwrap();
        assert_eq!(sg, Utc.with_ymd_and_hms(2025, 6, 1, 2, 0, 0).unwrap());

        // unknown zones fall back to UTC
        let other = parse_meeting_start("2025-06-01T10:00:00", "Europe/Berlin").unwrap();
        assert_eq!(other, Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn offset_qualified_instants_taken_verbatim() {
        let zulu = parse_meeting_start("2025-06-01T10:00:00Z", "Asia/Jakarta").unwrap();
        assert_eq!(zulu, Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap());

        let offset = parse_meeting_start("2025-06-01T10:00:00+07:00", "UTC").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap());

        let compact = parse_meeting_start("2025-06-01T10:00:00+0700", "UTC").unwrap();
        assert_eq!(compact, Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn garbage_start_date_is_dropped() {
        assert!(parse_meeting_start("next tuesday", "UTC").is_none());
        let c = content(json!([
            { "type": "package", "data": {
                "name": "Course", "price": 1000,
                "meetings": [{ "startDate": "soon", "timezone": "UTC" }],
            } },
        ]));
        assert!(package_spec(&c).unwrap().meetings.is_empty());
    }
}
