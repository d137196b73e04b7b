// ── Card-reader device seam ──
//
// The station protocol itself lives behind `CardReaderDevice`. Calls are
// blocking and only ever made from the ingest worker thread.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use oolive_api::{CardData, CardReaderEntry, Punch};

use crate::error::DeviceError;

/// A card detected in the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPresence {
    pub card_number: u32,
    pub card_type: String,
}

/// Contents of a card as read from the station.
///
/// Times are wall-clock times of the station without an offset; they are
/// interpreted in the local time zone when building the wire entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunchRecord {
    pub card_number: u32,
    pub card_type: String,
    pub start: Option<NaiveDateTime>,
    pub finish: Option<NaiveDateTime>,
    pub check: Option<NaiveDateTime>,
    pub clear: Option<NaiveDateTime>,
    /// `(control code, punch time)` in punch order.
    pub punches: Vec<(u16, NaiveDateTime)>,
}

impl PunchRecord {
    /// Build the `cardRead` entry, reading station times as local time.
    pub fn to_entry(&self, entry_time: DateTime<FixedOffset>) -> CardReaderEntry {
        self.to_entry_in(entry_time, &Local)
    }

    /// Build the `cardRead` entry, reading station times in `tz`.
    pub fn to_entry_in<Tz: TimeZone>(
        &self,
        entry_time: DateTime<FixedOffset>,
        tz: &Tz,
    ) -> CardReaderEntry {
        let at = |t: &NaiveDateTime| {
            tz.from_local_datetime(t)
                .earliest()
                .unwrap_or_else(|| tz.from_utc_datetime(t))
                .fixed_offset()
        };
        CardReaderEntry::card_read(
            entry_time,
            self.card_number.to_string(),
            CardData {
                card_type: self.card_type.clone(),
                start_time: self.start.as_ref().map(at),
                finish_time: self.finish.as_ref().map(at),
                check_time: self.check.as_ref().map(at),
                clear_time: self.clear.as_ref().map(at),
                punches: self
                    .punches
                    .iter()
                    .map(|(code, time)| Punch {
                        control_code: code.to_string(),
                        punch_time: at(time),
                    })
                    .collect(),
            },
        )
    }
}

/// An open card-reader station.
pub trait CardReaderDevice: Send {
    /// Check for a newly inserted card.
    ///
    /// Returns `Some` once per insertion. Only works in extended protocol
    /// mode; basic mode fails with [`DeviceError::Protocol`].
    fn poll_card(&mut self) -> Result<Option<CardPresence>, DeviceError>;

    /// Read the full contents of the inserted card.
    ///
    /// Fails with [`DeviceError::CardChanged`] if the card is removed or
    /// swapped during the read.
    fn read_card(&mut self) -> Result<PunchRecord, DeviceError>;

    /// Acknowledge the card at the station (beep and flash).
    fn ack_card(&mut self) -> Result<(), DeviceError>;

    /// Switch between extended (`true`) and basic protocol mode.
    fn set_extended_protocol(&mut self, extended: bool) -> Result<(), DeviceError>;

    fn disconnect(&mut self) -> Result<(), DeviceError>;
}

/// Finds and opens a card-reader station.
pub trait DeviceDiscovery: Send {
    fn discover(&mut self) -> Result<Box<dyn CardReaderDevice>, DeviceError>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use oolive_api::{EntryType, codec};
    use pretty_assertions::assert_eq;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn record() -> PunchRecord {
        PunchRecord {
            card_number: 219_412,
            card_type: "SI10".into(),
            start: Some(naive("2021-05-18 16:31:19")),
            finish: Some(naive("2021-05-18 16:58:02")),
            check: None,
            clear: Some(naive("2021-05-18 16:20:00")),
            punches: vec![
                (141, naive("2021-05-18 16:35:10")),
                (37, naive("2021-05-18 16:41:53")),
            ],
        }
    }

    #[test]
    fn entry_carries_every_field_in_the_given_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let entry_time = DateTime::parse_from_rfc3339("2021-05-18T16:59:00+02:00").unwrap();
        let entry = record().to_entry_in(entry_time, &tz);

        assert_eq!(entry.entry_type, EntryType::CardRead);
        assert_eq!(entry.control_card.as_deref(), Some("219412"));
        let card = entry.card.as_ref().unwrap();
        assert_eq!(card.card_type, "SI10");
        assert_eq!(
            card.start_time.unwrap().to_rfc3339(),
            "2021-05-18T16:31:19+02:00"
        );
        assert_eq!(card.check_time, None);
        assert_eq!(card.punches.len(), 2);
        assert_eq!(card.punches[1].control_code, "37");
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn entry_survives_the_wire_unchanged() {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let entry_time = DateTime::parse_from_rfc3339("2021-05-18T16:59:00+01:00").unwrap();
        let entry = record().to_entry_in(entry_time, &tz);

        let frame = codec::encode(&entry).unwrap();
        let received: CardReaderEntry = codec::decode(&frame).unwrap();

        assert_eq!(received, entry);
        assert_eq!(
            serde_json::to_value(&received).unwrap(),
            serde_json::to_value(&entry).unwrap()
        );
    }
}
