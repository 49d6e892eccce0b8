use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 6] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    /// 1 (Monday) ..= 6 (Saturday); the stored column value.
    pub fn ordinal(self) -> i64 {
        match self {
            Weekday::Monday => 1,
            Weekday::Tuesday => 2,
            Weekday::Wednesday => 3,
            Weekday::Thursday => 4,
            Weekday::Friday => 5,
            Weekday::Saturday => 6,
        }
    }

    pub fn from_ordinal(n: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.ordinal() == n)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weekday {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| format!("unknown day: {t}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    Theory,
    Lab,
    Practical,
}

impl SlotType {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotType::Theory => "theory",
            SlotType::Lab => "lab",
            SlotType::Practical => "practical",
        }
    }
}

impl FromStr for SlotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "theory" => Ok(SlotType::Theory),
            "lab" => Ok(SlotType::Lab),
            "practical" => Ok(SlotType::Practical),
            other => Err(format!("unknown slot type: {other}")),
        }
    }
}

/// Identity key of a slot: one occupant per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub batch_id: i64,
    pub section_id: i64,
    pub day: Weekday,
    pub period: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimetableSlot {
    pub id: String,
    pub batch_id: i64,
    pub section_id: i64,
    pub day: Weekday,
    pub period: u8,
    pub subject_code: String,
    pub faculty_id: i64,
    pub room: Option<String>,
    #[serde(rename = "type")]
    pub slot_type: SlotType,
}

impl TimetableSlot {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            batch_id: self.batch_id,
            section_id: self.section_id,
            day: self.day,
            period: self.period,
        }
    }
}

/// Key as sent by clients; day and period are validated by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSlotKey {
    pub batch_id: i64,
    pub section_id: i64,
    pub day: String,
    pub period: i64,
}

/// A proposed slot exactly as submitted. Fields that can be out of range are
/// kept raw so every violation can be reported instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotProposal {
    pub batch_id: i64,
    pub section_id: i64,
    pub day: String,
    pub period: i64,
    pub subject_code: String,
    pub faculty_id: i64,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(rename = "type")]
    pub slot_type: String,
    /// Date the slot takes effect; checked against the batch's semester
    /// window. Defaults to today.
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    /// Key of the existing slot this write replaces. Equal to the proposed
    /// key for an in-place update, different for a move.
    #[serde(default)]
    pub update_key: Option<RawSlotKey>,
}

impl SlotProposal {
    /// Trimmed room; blank means no room.
    pub fn normalized_room(&self) -> Option<String> {
        self.room
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_ordinals_round_trip_and_sort() {
        for d in Weekday::ALL {
            assert_eq!(Weekday::from_ordinal(d.ordinal()), Some(d));
        }
        assert_eq!(Weekday::from_ordinal(7), None);
        assert!(Weekday::Monday < Weekday::Saturday);
    }

    #[test]
    fn sunday_is_not_a_teaching_day() {
        assert_eq!("monday".parse::<Weekday>(), Ok(Weekday::Monday));
        assert!("Sunday".parse::<Weekday>().is_err());
    }

    #[test]
    fn blank_room_normalizes_to_none() {
        let mut p: SlotProposal = serde_json::from_value(serde_json::json!({
            "batch_id": 1, "section_id": 1, "day": "Monday", "period": 1,
            "subject_code": "SUB101", "faculty_id": 1, "room": "  ", "type": "theory"
        }))
        .expect("parse");
        assert_eq!(p.normalized_room(), None);
        p.room = Some(" 101 ".into());
        assert_eq!(p.normalized_room().as_deref(), Some("101"));
    }
}
