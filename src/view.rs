//! Filtering and sorting of table rows into the on-screen view.
//!
//! The view is everything that matches the filters, in sort order, before
//! pagination. Export reads the same view.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::model::{AttendanceEntry, Choice, Course, Record, Section, Student, Table, Year};

/// A row that can be filtered and sorted.
pub trait Row {
    fn record(&self) -> Record<'_>;

    /// Display text of a sortable column. Columns the row does not have are
    /// empty.
    fn field(&self, key: SortKey) -> &str {
        let r = self.record();
        match key {
            SortKey::StudentId => r.student_id().as_str(),
            SortKey::Name => r.name(),
            SortKey::Course => r.course().label(),
            SortKey::Year => r.year().label(),
            SortKey::Section => r.section().label(),
            SortKey::Status => match r {
                Record::Attendance(a) => a.status.map(|s| s.as_str()).unwrap_or(""),
                Record::Student(_) => "",
            },
            SortKey::Rfid => match r {
                Record::Student(s) => s.rfid.as_deref().unwrap_or(""),
                Record::Attendance(_) => "",
            },
        }
    }
}

impl Row for Student {
    fn record(&self) -> Record<'_> {
        Record::Student(self)
    }
}

impl Row for AttendanceEntry {
    fn record(&self) -> Record<'_> {
        Record::Attendance(self)
    }
}

impl Row for Record<'_> {
    fn record(&self) -> Record<'_> {
        *self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Filters {
    pub search: String,
    pub course: Option<Course>,
    pub year: Option<Year>,
    pub section: Option<Section>,
}

/// Parses a filter dropdown value; `"all"` (or empty) means no filter.
pub fn parse_filter<T: FromStr<Err = String>>(s: &str) -> Result<Option<T>, String> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("all") {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}

impl Filters {
    pub fn matches<R: Row + ?Sized>(&self, row: &R) -> bool {
        let r = row.record();
        self.search_matches(&r)
            && self.course.is_none_or(|c| r.course() == c)
            && self.year.is_none_or(|y| r.year() == y)
            && self.section.is_none_or(|s| r.section() == s)
    }

    fn search_matches(&self, r: &Record<'_>) -> bool {
        if self.search.is_empty() {
            return true;
        }
        let needle = self.search.to_lowercase();
        r.name().to_lowercase().contains(&needle)
            || r.student_id().as_str().to_lowercase().contains(&needle)
            || r.course().label().to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    StudentId,
    Name,
    Course,
    Year,
    Section,
    Status,
    Rfid,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::StudentId => "studentId",
            SortKey::Name => "name",
            SortKey::Course => "course",
            SortKey::Year => "year",
            SortKey::Section => "section",
            SortKey::Status => "status",
            SortKey::Rfid => "rfid",
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "id" | "studentid" => Ok(SortKey::StudentId),
            "name" => Ok(SortKey::Name),
            "course" => Ok(SortKey::Course),
            "year" => Ok(SortKey::Year),
            "section" => Ok(SortKey::Section),
            "status" => Ok(SortKey::Status),
            "rfid" => Ok(SortKey::Rfid),
            other => Err(format!("unknown sort column '{}'", other)),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sort {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            key: SortKey::Name,
            direction: SortDirection::Asc,
        }
    }
}

impl Sort {
    /// Column-header click: same column flips direction, a new column
    /// starts ascending.
    pub fn toggle(&mut self, key: SortKey) {
        self.direction = if self.key == key && self.direction == SortDirection::Asc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        self.key = key;
    }

    /// Case-sensitive comparison of the column text. Equal values compare
    /// equal in both directions so a stable sort keeps input order.
    pub fn compare<R: Row + ?Sized>(&self, a: &R, b: &R) -> Ordering {
        let ord = a.field(self.key).cmp(b.field(self.key));
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

/// Positions in `rows` of the view, filtered then stably sorted.
pub fn derive_indices<R: Row>(rows: &[R], filters: &Filters, sort: &Sort) -> Vec<usize> {
    let mut idx: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| filters.matches(*r))
        .map(|(i, _)| i)
        .collect();
    idx.sort_by(|&a, &b| sort.compare(&rows[a], &rows[b]));
    idx
}

pub fn derive_view<'a, R: Row>(rows: &'a [R], filters: &Filters, sort: &Sort) -> Vec<&'a R> {
    derive_indices(rows, filters, sort)
        .into_iter()
        .map(|i| &rows[i])
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewKey {
    table: Table,
    filters: Filters,
    sort: Sort,
    revision: u64,
}

/// Memoized view indices; recomputed only when the table, filters, sort or
/// the row data revision change.
#[derive(Debug, Default)]
pub struct ViewCache {
    key: Option<ViewKey>,
    indices: Vec<usize>,
    derivations: u64,
}

impl ViewCache {
    pub fn get<R: Row>(
        &mut self,
        table: Table,
        revision: u64,
        rows: &[R],
        filters: &Filters,
        sort: &Sort,
    ) -> &[usize] {
        let key = ViewKey {
            table,
            filters: filters.clone(),
            sort: *sort,
            revision,
        };
        if self.key.as_ref() != Some(&key) {
            self.indices = derive_indices(rows, filters, sort);
            self.key = Some(key);
            self.derivations += 1;
        }
        &self.indices
    }

    /// How many times the view has actually been recomputed.
    pub fn derivations(&self) -> u64 {
        self.derivations
    }
}
