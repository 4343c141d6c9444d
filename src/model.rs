use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::Text(s) => s,
            StringOrNumber::Int(i) => i.to_string(),
            StringOrNumber::Float(f) => f.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(d).map(String::from)
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                string_or_number(d).map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(StudentId);
string_id!(EventId);
string_id!(UserId);
string_id!(FineId);

/// A fixed set of lowercase wire values, parsed case-insensitively.
pub trait Choice: Copy + Ord + FromStr + 'static {
    const ALL: &'static [Self];
    fn as_str(self) -> &'static str;
    fn label(self) -> &'static str;
}

macro_rules! choice_enum {
    ($name:ident, $what:literal, { $($variant:ident => ($wire:literal, $label:literal)),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl Choice for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| format!("unknown {} '{}'", $what, s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                string_or_number(d)?.parse().map_err(de::Error::custom)
            }
        }
    };
}

choice_enum!(Course, "course", {
    Bsit => ("bsit", "BSIT"),
    Bshm => ("bshm", "BSHM"),
    Bscrim => ("bscrim", "BSCRIM"),
});

choice_enum!(Year, "year", {
    First => ("1", "1"),
    Second => ("2", "2"),
    Third => ("3", "3"),
    Fourth => ("4", "4"),
});

choice_enum!(Section, "section", {
    A => ("a", "A"),
    B => ("b", "B"),
    C => ("c", "C"),
    D => ("d", "D"),
});

choice_enum!(AttendanceStatus, "status", {
    Present => ("present", "Present"),
    Absent => ("absent", "Absent"),
    Excused => ("excused", "Excused"),
});

/// Account role. Both role taxonomies the backend has used are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Administrator,
    Moderator,
    Viewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Administrator => "president",
            Role::Moderator => "vice_president",
            Role::Viewer => "admin",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Administrator => "Administrator",
            Role::Moderator => "Moderator",
            Role::Viewer => "Viewer",
        }
    }

    /// Ordering used by the account list: most privileged first.
    pub fn priority(self) -> u8 {
        match self {
            Role::Administrator => 1,
            Role::Moderator => 2,
            Role::Viewer => 3,
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "president" | "administrator" => Ok(Role::Administrator),
            "vice_president" | "moderator" => Ok(Role::Moderator),
            "admin" | "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        String::deserialize(d)?.parse().map_err(de::Error::custom)
    }
}

/// Non-negative money amount held in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    /// Largest amount accepted from text: one billion, in cents.
    pub const MAX: Amount = Amount(100_000_000_000);

    pub fn from_cents(cents: i64) -> Self {
        Amount(cents.max(0))
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v: f64 = s
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", s.trim()))?;
        if !v.is_finite() || v < 0.0 {
            return Err(format!("'{}' is not a non-negative amount", s.trim()));
        }
        let cents = (v * 100.0).round();
        if cents > Amount::MAX.0 as f64 {
            return Err(format!("'{}' exceeds the largest amount {}", s.trim(), Amount::MAX));
        }
        Ok(Amount(cents as i64))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        Amount(iter.fold(0i64, |acc, a| acc.saturating_add(a.0)))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        string_or_number(d)?.parse().map_err(de::Error::custom)
    }
}

// Aggregate counts may arrive as strings.
fn de_count<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    string_or_number(d)?.trim().parse().map_err(de::Error::custom)
}

fn de_rfid<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn de_opt_status<'de, D: Deserializer<'de>>(d: D) -> Result<Option<AttendanceStatus>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(de::Error::custom),
    }
}

/// Timestamps come back in a few shapes; anything unparseable is dropped.
fn de_opt_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.and_then(|s| parse_timestamp(&s)))
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

fn de_event_date<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(d)?;
    parse_event_date(&raw).map_err(de::Error::custom)
}

/// Accepts `YYYY-MM-DD` or a full timestamp whose date part is used.
pub fn parse_event_date(s: &str) -> Result<NaiveDate, String> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|_| format!("invalid date '{}'", s))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Student {
    pub student_id: StudentId,
    pub name: String,
    pub course: Course,
    pub year: Year,
    pub section: Section,
    #[serde(default, deserialize_with = "de_rfid")]
    pub rfid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttendanceEntry {
    pub student_id: StudentId,
    pub event_id: EventId,
    pub name: String,
    pub course: Course,
    pub year: Year,
    pub section: Section,
    #[serde(default, deserialize_with = "de_opt_status")]
    pub status: Option<AttendanceStatus>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub check_in_time: Option<DateTime<Utc>>,
}

/// Body of a successful `PUT /attendance/rfid/:rfid/:eventId`.
#[derive(Debug, Clone, Deserialize)]
pub struct RfidCheckIn {
    pub student_id: StudentId,
    pub student: CheckedInStudent,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub check_in_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckedInStudent {
    pub name: String,
    pub course: Course,
    pub year: Year,
    pub section: Section,
}

impl RfidCheckIn {
    pub fn into_entry(self, event_id: EventId) -> AttendanceEntry {
        AttendanceEntry {
            student_id: self.student_id,
            event_id,
            name: self.student.name,
            course: self.student.course,
            year: self.student.year,
            section: self.student.section,
            status: Some(AttendanceStatus::Present),
            check_in_time: self.check_in_time,
        }
    }
}

/// Which members of a category an event applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope<T: Choice> {
    All,
    Only(BTreeSet<T>),
}

impl<T: Choice> Default for Scope<T> {
    fn default() -> Self {
        Scope::All
    }
}

impl<T: Choice> Scope<T> {
    pub fn none() -> Self {
        Scope::Only(BTreeSet::new())
    }

    pub fn contains(&self, v: T) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(set) => set.contains(&v),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Scope::All)
    }

    /// The "All" checkbox: ticks or clears every member.
    pub fn set_all(&mut self, checked: bool) {
        *self = if checked { Scope::All } else { Scope::none() };
    }

    /// A member checkbox. Ticking the last missing member collapses to `All`.
    pub fn set(&mut self, v: T, checked: bool) {
        let mut set: BTreeSet<T> = match self {
            Scope::All => T::ALL.iter().copied().collect(),
            Scope::Only(set) => std::mem::take(set),
        };
        if checked {
            set.insert(v);
        } else {
            set.remove(&v);
        }
        *self = if T::ALL.iter().all(|m| set.contains(m)) {
            Scope::All
        } else {
            Scope::Only(set)
        };
    }

    pub fn describe(&self) -> String {
        match self {
            Scope::All => "all".to_string(),
            Scope::Only(set) if set.is_empty() => "none".to_string(),
            Scope::Only(set) => set.iter().map(|v| v.label()).collect::<Vec<_>>().join(","),
        }
    }
}

impl<T: Choice> Serialize for Scope<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(T::ALL.len() + 1))?;
        map.serialize_entry("all", &self.is_all())?;
        for m in T::ALL {
            map.serialize_entry(m.as_str(), &self.contains(*m))?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeRepr {
    Flags(BTreeMap<String, bool>),
    List(Vec<String>),
    Word(String),
}

impl<'de, T: Choice> Deserialize<'de> for Scope<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let names: Vec<String> = match ScopeRepr::deserialize(d)? {
            ScopeRepr::Flags(flags) => flags
                .into_iter()
                .filter(|(_, on)| *on)
                .map(|(k, _)| k)
                .collect(),
            ScopeRepr::List(list) => list,
            ScopeRepr::Word(w) => vec![w],
        };
        if names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
            return Ok(Scope::All);
        }
        let mut scope = Scope::none();
        for n in names {
            if let Some(v) = T::ALL.iter().copied().find(|m| m.as_str().eq_ignore_ascii_case(&n)) {
                scope.set(v, true);
            }
        }
        Ok(scope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Eligibility {
    #[serde(default)]
    pub courses: Scope<Course>,
    #[serde(default)]
    pub sections: Scope<Section>,
    #[serde(default, rename = "schoolYears")]
    pub school_years: Scope<Year>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    #[serde(rename = "event_date", deserialize_with = "de_event_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub fine: Amount,
    #[serde(flatten)]
    pub eligibility: Eligibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Fine {
    pub id: FineId,
    pub event_id: EventId,
    #[serde(default)]
    pub event_title: String,
    pub amount: Amount,
    pub is_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default = "unknown_user_id")]
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

fn unknown_user_id() -> UserId {
    UserId(String::new())
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentMetrics {
    pub student: MetricsStudent,
    pub summary: MetricsSummary,
    #[serde(rename = "attendanceRecords", default)]
    pub attendance_records: Vec<MetricsRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsStudent {
    pub student_id: StudentId,
    pub name: String,
    pub course: Course,
    pub year: Year,
    pub section: Section,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSummary {
    #[serde(rename = "totalEvents", deserialize_with = "de_count")]
    pub total_events: u32,
    #[serde(deserialize_with = "de_count")]
    pub present: u32,
    #[serde(deserialize_with = "de_count")]
    pub absent: u32,
    #[serde(deserialize_with = "de_count")]
    pub excused: u32,
    #[serde(rename = "attendanceRate", deserialize_with = "string_or_number")]
    pub attendance_rate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsRecord {
    pub event_id: EventId,
    pub event_title: String,
    pub event_date: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, deserialize_with = "de_opt_status")]
    pub status: Option<AttendanceStatus>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub check_in_time: Option<DateTime<Utc>>,
}

/// The two tables the dashboard can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Table {
    #[default]
    Attendance,
    Students,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Attendance => "attendance",
            Table::Students => "students",
        }
    }

    pub fn sheet_name(self) -> &'static str {
        match self {
            Table::Attendance => "Attendance",
            Table::Students => "Students",
        }
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attendance" => Ok(Table::Attendance),
            "students" | "student" => Ok(Table::Students),
            other => Err(format!("unknown table '{}'", other)),
        }
    }
}

/// A row of either table, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    Attendance(&'a AttendanceEntry),
    Student(&'a Student),
}

impl<'a> Record<'a> {
    pub fn student_id(&self) -> &'a StudentId {
        match self {
            Record::Attendance(a) => &a.student_id,
            Record::Student(s) => &s.student_id,
        }
    }

    pub fn name(&self) -> &'a str {
        match self {
            Record::Attendance(a) => &a.name,
            Record::Student(s) => &s.name,
        }
    }

    pub fn course(&self) -> Course {
        match self {
            Record::Attendance(a) => a.course,
            Record::Student(s) => s.course,
        }
    }

    pub fn year(&self) -> Year {
        match self {
            Record::Attendance(a) => a.year,
            Record::Student(s) => s.year,
        }
    }

    pub fn section(&self) -> Section {
        match self {
            Record::Attendance(a) => a.section,
            Record::Student(s) => s.section,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn student_row_from_backend() {
        let s: Student = serde_json::from_value(json!({
            "id": 7,
            "student_id": "23-0001",
            "name": "Ana Cruz",
            "course": "bsit",
            "year": "1",
            "section": "a",
            "rfid": "  ",
            "created_at": "2024-01-01T00:00:00.000Z"
        }))
        .unwrap();
        assert_eq!(s.student_id.as_str(), "23-0001");
        assert_eq!(s.course, Course::Bsit);
        assert_eq!(s.section.label(), "A");
        assert_eq!(s.rfid, None);
    }

    #[test]
    fn attendance_with_unset_status() {
        let a: AttendanceEntry = serde_json::from_value(json!({
            "student_id": "S1",
            "event_id": 3,
            "name": "Ben",
            "course": "BSHM",
            "year": 2,
            "section": "B",
            "status": null,
            "check_in_time": null
        }))
        .unwrap();
        assert_eq!(a.event_id.as_str(), "3");
        assert_eq!(a.status, None);
        assert_eq!(a.year, Year::Second);
    }

    #[test]
    fn amount_parses_strings_and_numbers() {
        assert_eq!("50.00".parse::<Amount>().unwrap().cents(), 5000);
        assert_eq!("0".parse::<Amount>().unwrap(), Amount::ZERO);
        assert!("-1".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
        assert!("1e300".parse::<Amount>().is_err());
        assert_eq!("1000000000".parse::<Amount>().unwrap(), Amount::MAX);
        assert!(serde_json::from_value::<Amount>(json!(1e300)).is_err());
        let a: Amount = serde_json::from_value(json!(12.5)).unwrap();
        assert_eq!(a.to_string(), "12.50");
    }

    #[test]
    fn role_accepts_both_taxonomies() {
        assert_eq!("president".parse::<Role>().unwrap(), Role::Administrator);
        assert_eq!("Administrator".parse::<Role>().unwrap(), Role::Administrator);
        assert_eq!("vice_president".parse::<Role>().unwrap(), Role::Moderator);
        assert_eq!("Vice President".parse::<Role>().unwrap(), Role::Moderator);
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Viewer);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
    }

    #[test]
    fn scope_checkbox_semantics() {
        let mut s: Scope<Section> = Scope::none();
        s.set(Section::A, true);
        s.set(Section::B, true);
        s.set(Section::C, true);
        assert!(!s.is_all());
        s.set(Section::D, true);
        assert!(s.is_all());
        s.set(Section::B, false);
        assert!(!s.contains(Section::B));
        assert!(s.contains(Section::A));
        s.set_all(false);
        assert_eq!(s.describe(), "none");
    }

    #[test]
    fn scope_serializes_as_flag_map() {
        let mut s: Scope<Course> = Scope::none();
        s.set(Course::Bsit, true);
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v, json!({"all": false, "bsit": true, "bshm": false, "bscrim": false}));
        let back: Scope<Course> = serde_json::from_value(v).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn event_without_eligibility_admits_everyone() {
        let e: Event = serde_json::from_value(json!({
            "id": 1,
            "title": "Assembly",
            "event_date": "2024-03-01T00:00:00.000Z",
            "location": "Gym",
            "fine": "25.00"
        }))
        .unwrap();
        assert_eq!(e.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(e.fine.cents(), 2500);
        let el = &e.eligibility;
        assert!(el.courses.contains(Course::Bscrim));
        assert!(el.school_years.contains(Year::Fourth));
        assert!(el.sections.contains(Section::D));
    }
}
