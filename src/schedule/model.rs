use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::IngestError;

pub const SAMPLE_SCHEDULE_JSON: &str = include_str!("../../schedules/sample.json");

static NEXT_ITEM_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Identifier assigned to an item when it is ingested. Never supplied by the
/// schedule service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    fn allocate(ingested_unix_ms: i64) -> Self {
        let sequence = NEXT_ITEM_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("event-{ingested_unix_ms}-{sequence}"))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Presentation,
    Break,
    Workshop,
    Panel,
    Other,
}

impl ItemKind {
    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Presentation => "presentation",
            ItemKind::Break => "break",
            ItemKind::Workshop => "workshop",
            ItemKind::Panel => "panel",
            ItemKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleItem {
    pub id: ItemId,
    #[serde(serialize_with = "serialize_hhmm")]
    pub start_time: NaiveTime,
    #[serde(serialize_with = "serialize_optional_hhmm")]
    pub end_time: Option<NaiveTime>,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

impl ScheduleItem {
    /// `09:00` or `09:00 - 09:45` when an explicit end is known.
    pub fn time_label(&self) -> String {
        match self.end_time {
            Some(end) => format!(
                "{} - {}",
                self.start_time.format("%H:%M"),
                end.format("%H:%M")
            ),
            None => self.start_time.format("%H:%M").to_string(),
        }
    }
}

#[cfg(test)]
impl ScheduleItem {
    pub fn new(
        title: impl Into<String>,
        start_time: NaiveTime,
        end_time: Option<NaiveTime>,
    ) -> Self {
        Self {
            id: ItemId::allocate(Local::now().timestamp_millis()),
            start_time,
            end_time,
            title: title.into(),
            description: None,
            kind: ItemKind::Other,
        }
    }

    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Items in the order the schedule service returned them. Replaced wholesale,
/// never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    items: Vec<ScheduleItem>,
}

impl Schedule {
    pub fn new(items: Vec<ScheduleItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[ScheduleItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find(&self, id: &ItemId) -> Option<&ScheduleItem> {
        self.items.iter().find(|item| &item.id == id)
    }
}

pub fn load_schedule_file(path: &Path) -> Result<Schedule> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read schedule file {}", path.display()))?;
    let schedule = parse_schedule_response(&content)?;
    Ok(schedule)
}

/// Adopts the JSON list produced by the schedule service. Any malformed entry
/// rejects the whole response.
pub fn parse_schedule_response(content: &str) -> Result<Schedule, IngestError> {
    let raw = serde_json::from_str::<Value>(content).map_err(|err| IngestError::InvalidJson {
        line: err.line(),
        column: err.column(),
        message: err.to_string(),
    })?;
    let Value::Array(entries) = raw else {
        return Err(IngestError::NotAList);
    };

    let ingested_unix_ms = Local::now().timestamp_millis();
    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let entry = serde_json::from_value::<ItemEntry>(entry).map_err(|err| {
            IngestError::InvalidEntry {
                index,
                message: err.to_string(),
            }
        })?;

        let start_time =
            parse_time_of_day(&entry.start_time).ok_or_else(|| IngestError::InvalidTime {
                index,
                field: "startTime",
                value: entry.start_time.clone(),
            })?;
        let end_time = match entry.end_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(parse_time_of_day(text).ok_or_else(|| {
                IngestError::InvalidTime {
                    index,
                    field: "endTime",
                    value: text.to_string(),
                }
            })?),
        };

        items.push(ScheduleItem {
            id: ItemId::allocate(ingested_unix_ms),
            start_time,
            end_time,
            title: entry.title,
            description: entry
                .description
                .filter(|description| !description.trim().is_empty()),
            kind: entry.kind,
        });
    }

    Ok(Schedule::new(items))
}

pub fn parse_time_of_day(input: &str) -> Option<NaiveTime> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemEntry {
    start_time: String,
    #[serde(default)]
    end_time: Option<String>,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "type")]
    kind: ItemKind,
}

fn serialize_hhmm<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&time.format("%H:%M"))
}

fn serialize_optional_hhmm<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match time {
        Some(time) => serialize_hhmm(time, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    #[test]
    fn parses_valid_service_response() {
        let json = r#"
[
  {
    "startTime": "09:00",
    "endTime": "09:45",
    "title": "Keynote",
    "description": "Opening talk",
    "type": "presentation"
  },
  {
    "startTime": "09:45",
    "title": "Coffee",
    "type": "break"
  }
]
"#;

        let schedule = parse_schedule_response(json).expect("valid response");
        assert_eq!(schedule.len(), 2);
        let keynote = &schedule.items()[0];
        assert_eq!(keynote.start_time, hm(9, 0));
        assert_eq!(keynote.end_time, Some(hm(9, 45)));
        assert_eq!(keynote.description.as_deref(), Some("Opening talk"));
        assert_eq!(keynote.kind, ItemKind::Presentation);
        let coffee = &schedule.items()[1];
        assert_eq!(coffee.end_time, None);
        assert_eq!(coffee.kind, ItemKind::Break);
    }

    #[test]
    fn empty_list_is_an_empty_schedule() {
        let schedule = parse_schedule_response("[]").expect("empty list is valid");
        assert!(schedule.is_empty());
    }

    #[test]
    fn null_and_blank_end_times_mean_absent() {
        let json = r#"
[
  { "startTime": "09:00", "endTime": null, "title": "A", "type": "other" },
  { "startTime": "10:00", "endTime": "", "title": "B", "type": "other" },
  { "startTime": "11:00", "title": "C", "type": "other", "description": "  " }
]
"#;
        let schedule = parse_schedule_response(json).expect("valid response");
        assert!(schedule.items().iter().all(|item| item.end_time.is_none()));
        assert_eq!(schedule.items()[2].description, None);
    }

    #[test]
    fn rejects_non_json_response() {
        let err = parse_schedule_response("{ not-json ").expect_err("invalid json should fail");
        assert!(matches!(err, IngestError::InvalidJson { line: 1, .. }));
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn rejects_response_that_is_not_a_list() {
        let err = parse_schedule_response(r#"{ "items": [] }"#).expect_err("object should fail");
        assert!(matches!(err, IngestError::NotAList));
    }

    #[test]
    fn rejects_entry_missing_title_and_names_index() {
        let json = r#"
[
  { "startTime": "09:00", "title": "A", "type": "other" },
  { "startTime": "10:00", "type": "panel" }
]
"#;
        let err = parse_schedule_response(json).expect_err("missing title should fail");
        match err {
            IngestError::InvalidEntry { index, message } => {
                assert_eq!(index, 1);
                assert!(message.contains("title"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_unknown_item_type() {
        let json = r#"[{ "startTime": "09:00", "title": "A", "type": "keynote" }]"#;
        let err = parse_schedule_response(json).expect_err("unknown type should fail");
        assert!(matches!(err, IngestError::InvalidEntry { index: 0, .. }));
    }

    #[test]
    fn rejects_unparseable_times() {
        let json = r#"[{ "startTime": "25:00", "title": "A", "type": "other" }]"#;
        let err = parse_schedule_response(json).expect_err("bad start should fail");
        assert!(matches!(
            err,
            IngestError::InvalidTime {
                index: 0,
                field: "startTime",
                ..
            }
        ));

        let json = r#"[{ "startTime": "09:00", "endTime": "soon", "title": "A", "type": "other" }]"#;
        let err = parse_schedule_response(json).expect_err("bad end should fail");
        assert!(err.to_string().contains("endTime 'soon'"));
    }

    #[test]
    fn tolerates_end_before_start() {
        let json = r#"[{ "startTime": "10:00", "endTime": "09:00", "title": "A", "type": "other" }]"#;
        let schedule = parse_schedule_response(json).expect("inverted range is kept");
        assert_eq!(schedule.items()[0].end_time, Some(hm(9, 0)));
    }

    #[test]
    fn ids_are_assigned_on_ingestion_and_never_reused() {
        let json = r#"
[
  { "id": "from-service", "startTime": "09:00", "title": "A", "type": "other" },
  { "startTime": "09:30", "title": "B", "type": "other" }
]
"#;
        let first = parse_schedule_response(json).expect("valid response");
        let second = parse_schedule_response(json).expect("valid response");

        let ids = first
            .items()
            .iter()
            .chain(second.items())
            .map(|item| item.id.clone())
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), 4);
        assert!(ids.iter().all(|id| id.to_string().starts_with("event-")));
        assert!(!ids.iter().any(|id| id.to_string() == "from-service"));
    }

    #[test]
    fn find_looks_up_by_id() {
        let schedule = parse_schedule_response(SAMPLE_SCHEDULE_JSON).expect("sample parses");
        let id = schedule.items()[3].id.clone();
        assert_eq!(
            schedule.find(&id).map(|item| item.title.as_str()),
            Some("Coffee Break")
        );
    }

    #[test]
    fn sample_schedule_parses() {
        let schedule = parse_schedule_response(SAMPLE_SCHEDULE_JSON).expect("sample parses");
        assert_eq!(schedule.len(), 8);
        assert_eq!(schedule.items()[0].start_time, hm(9, 0));
        assert_eq!(schedule.items()[7].title, "Closing Thoughts");
    }

    #[test]
    fn serializes_times_as_hh_mm() {
        let item = ScheduleItem::new("Talk", hm(9, 5), Some(hm(9, 50)))
            .with_kind(ItemKind::Workshop);
        let value = serde_json::to_value(&item).expect("serializable");
        assert_eq!(value["start_time"], "09:05");
        assert_eq!(value["end_time"], "09:50");
        assert_eq!(value["type"], "workshop");
        assert_eq!(item.time_label(), "09:05 - 09:50");
    }
}
