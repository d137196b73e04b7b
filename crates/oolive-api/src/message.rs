// ── Wire messages ──
//
// Logical JSON content carried in frames. Card-reader entries flow from a
// reader station to the results server; replies flow back from the server
// (or from a streaming subscriber) as `{"result": ...}` objects.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── EntryType ────────────────────────────────────────────────────────

/// State announced by a card-reader station.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum EntryType {
    ReaderDisconnected,
    ReaderConnected,
    CardInserted,
    CardRemoved,
    CardRead,
}

// ── CardReaderEntry ──────────────────────────────────────────────────

/// One control punch read from a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Punch {
    pub control_code: String,
    pub punch_time: DateTime<FixedOffset>,
}

/// Full card contents carried by a `cardRead` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardData {
    /// Card generation as reported by the reader, e.g. `"SI10"`.
    pub card_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_time: Option<DateTime<FixedOffset>>,
    pub punches: Vec<Punch>,
}

/// A message sent by a card-reader station.
///
/// State announcements (`readerConnected`, `cardInserted`, ...) carry only
/// the entry type, the time and optionally the card number. A `cardRead`
/// entry additionally flattens the [`CardData`] fields into the same object.
/// This is also the line format of the card log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardReaderEntry {
    pub entry_type: EntryType,
    pub entry_time: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_card: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub card: Option<CardData>,
}

/// Why a card-reader entry does not match the canonical record layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("{entry_type} entry requires field '{field}'")]
    MissingField {
        entry_type: EntryType,
        field: &'static str,
    },

    #[error("{entry_type} entry must not carry card data")]
    UnexpectedCardData { entry_type: EntryType },

    #[error("invalid {field}: '{value}' is not a number")]
    NotNumeric { field: &'static str, value: String },
}

impl CardReaderEntry {
    /// A state announcement without card data.
    pub fn state(
        entry_type: EntryType,
        entry_time: DateTime<FixedOffset>,
        control_card: Option<String>,
    ) -> Self {
        Self {
            entry_type,
            entry_time,
            control_card,
            card: None,
        }
    }

    /// A `cardRead` entry carrying the full card contents.
    pub fn card_read(
        entry_time: DateTime<FixedOffset>,
        control_card: String,
        card: CardData,
    ) -> Self {
        Self {
            entry_type: EntryType::CardRead,
            entry_time,
            control_card: Some(control_card),
            card: Some(card),
        }
    }

    /// Check the entry against the canonical record layout.
    ///
    /// Deserialization already enforces field types and timestamp format;
    /// this adds the cross-field rules serde cannot express.
    pub fn validate(&self) -> Result<(), EntryError> {
        let entry_type = self.entry_type;
        match (entry_type, &self.card) {
            (EntryType::CardRead, None) => {
                return Err(EntryError::MissingField {
                    entry_type,
                    field: "punches",
                });
            }
            (EntryType::CardRead, Some(_)) => {}
            (_, Some(_)) => return Err(EntryError::UnexpectedCardData { entry_type }),
            (_, None) => {}
        }

        let needs_card = matches!(entry_type, EntryType::CardRead | EntryType::CardInserted);
        match &self.control_card {
            None if needs_card => {
                return Err(EntryError::MissingField {
                    entry_type,
                    field: "controlCard",
                });
            }
            Some(card) => check_numeric("controlCard", card)?,
            None => {}
        }

        if let Some(card) = &self.card {
            for punch in &card.punches {
                check_numeric("controlCode", &punch.control_code)?;
            }
        }
        Ok(())
    }
}

fn check_numeric(field: &'static str, value: &str) -> Result<(), EntryError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EntryError::NotNumeric {
            field,
            value: value.to_owned(),
        });
    }
    Ok(())
}

// ── Replies ──────────────────────────────────────────────────────────

/// Outcome reported by a streaming subscriber for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyResult {
    Ok,
    EventNotFound,
    /// Any other value, including a missing or non-string `result`.
    Error(String),
}

impl ReplyResult {
    /// Strict decode of a `{"result": ...}` object.
    pub fn from_value(value: &serde_json::Value) -> Self {
        match value.get("result") {
            Some(serde_json::Value::String(s)) => match s.as_str() {
                "ok" => Self::Ok,
                "eventNotFound" => Self::EventNotFound,
                other => Self::Error(other.to_owned()),
            },
            Some(other) => Self::Error(other.to_string()),
            None => Self::Error("missing result".into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Reply to a card-reader request.
///
/// The server answers with a free-form JSON object; the reader only cares
/// whether a `status` is present (the card was accepted and should be
/// acknowledged at the device). An empty reply means no answer arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerReply(pub serde_json::Map<String, serde_json::Value>);

impl ServerReply {
    pub fn status(&self) -> Option<&serde_json::Value> {
        self.0.get("status")
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn time(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn state_entry_serializes_without_card_fields() {
        let entry = CardReaderEntry::state(
            EntryType::ReaderConnected,
            time("2021-05-18T16:31:19+02:00"),
            None,
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "entryType": "readerConnected",
                "entryTime": "2021-05-18T16:31:19+02:00",
            })
        );
    }

    #[test]
    fn card_read_entry_flattens_card_data() {
        let entry = CardReaderEntry::card_read(
            time("2021-05-18T16:32:00+02:00"),
            "219412".into(),
            CardData {
                card_type: "SI10".into(),
                start_time: Some(time("2021-05-18T16:31:19+02:00")),
                finish_time: None,
                check_time: None,
                clear_time: None,
                punches: vec![Punch {
                    control_code: "141".into(),
                    punch_time: time("2021-05-18T16:31:25+02:00"),
                }],
            },
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "entryType": "cardRead",
                "entryTime": "2021-05-18T16:32:00+02:00",
                "controlCard": "219412",
                "cardType": "SI10",
                "startTime": "2021-05-18T16:31:19+02:00",
                "punches": [
                    {"controlCode": "141", "punchTime": "2021-05-18T16:31:25+02:00"}
                ],
            })
        );

        let back: CardReaderEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn entry_type_display_matches_wire_name() {
        assert_eq!(EntryType::CardInserted.to_string(), "cardInserted");
        assert_eq!(
            "readerDisconnected".parse::<EntryType>().unwrap(),
            EntryType::ReaderDisconnected
        );
    }

    #[test]
    fn validate_rejects_card_read_without_punches() {
        let raw = json!({
            "entryType": "cardRead",
            "entryTime": "2021-05-18T16:32:00+02:00",
            "controlCard": "219412",
        });
        let entry: CardReaderEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(
            entry.validate(),
            Err(EntryError::MissingField {
                entry_type: EntryType::CardRead,
                field: "punches",
            })
        );
    }

    #[test]
    fn validate_rejects_non_numeric_card() {
        let entry = CardReaderEntry::state(
            EntryType::CardInserted,
            time("2021-05-18T16:32:00+02:00"),
            Some("12ab".into()),
        );
        assert!(matches!(
            entry.validate(),
            Err(EntryError::NotNumeric { field: "controlCard", .. })
        ));
    }

    #[test]
    fn validate_requires_card_for_inserted() {
        let entry = CardReaderEntry::state(
            EntryType::CardInserted,
            time("2021-05-18T16:32:00+02:00"),
            None,
        );
        assert!(entry.validate().is_err());
    }

    #[test]
    fn entry_time_without_offset_is_rejected() {
        let raw = json!({
            "entryType": "readerConnected",
            "entryTime": "2021-05-18T16:32:00",
        });
        assert!(serde_json::from_value::<CardReaderEntry>(raw).is_err());
    }

    #[test]
    fn reply_result_decodes_known_values() {
        assert_eq!(ReplyResult::from_value(&json!({"result": "ok"})), ReplyResult::Ok);
        assert_eq!(
            ReplyResult::from_value(&json!({"result": "eventNotFound"})),
            ReplyResult::EventNotFound
        );
        assert_eq!(
            ReplyResult::from_value(&json!({"result": "error"})),
            ReplyResult::Error("error".into())
        );
    }

    #[test]
    fn reply_result_maps_unexpected_shapes_to_error() {
        assert!(matches!(
            ReplyResult::from_value(&json!({"result": 42})),
            ReplyResult::Error(_)
        ));
        assert!(matches!(
            ReplyResult::from_value(&json!({"status": "ok"})),
            ReplyResult::Error(_)
        ));
        assert!(matches!(ReplyResult::from_value(&json!([1, 2])), ReplyResult::Error(_)));
    }

    #[test]
    fn server_reply_exposes_status() {
        let reply: ServerReply = serde_json::from_value(json!({"status": "OK"})).unwrap();
        assert_eq!(reply.status(), Some(&json!("OK")));
        assert!(ServerReply::default().is_empty());
    }
}
