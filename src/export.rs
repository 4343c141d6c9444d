use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet};
use tracing::info;

use crate::error::Result;
use crate::model::{Choice, Record, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

pub fn columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::Attendance => &["Id", "Name", "Course", "Year", "Section", "Status"],
        Table::Students => &["Id", "Rfid", "Name", "Course", "Year", "Section"],
    }
}

/// `attendance_2024-03-01.xlsx` and the like.
pub fn file_name(table: Table, format: ExportFormat, date: NaiveDate) -> String {
    format!(
        "{}_{}.{}",
        table.as_str(),
        date.format("%Y-%m-%d"),
        format.extension()
    )
}

fn export_row(record: Record<'_>) -> Vec<String> {
    match record {
        Record::Attendance(a) => vec![
            a.student_id.to_string(),
            a.name.clone(),
            a.course.label().to_string(),
            a.year.label().to_string(),
            a.section.label().to_string(),
            a.status.map(|s| s.label()).unwrap_or_default().to_string(),
        ],
        Record::Student(s) => vec![
            s.student_id.to_string(),
            s.rfid.clone().unwrap_or_default(),
            s.name.clone(),
            s.course.label().to_string(),
            s.year.label().to_string(),
            s.section.label().to_string(),
        ],
    }
}

/// Cell text for every row of the view, in view order. Rows of the other
/// table kind are skipped.
pub fn export_rows(table: Table, view: &[Record<'_>]) -> Vec<Vec<String>> {
    view.iter()
        .filter(|r| {
            matches!(
                (table, r),
                (Table::Attendance, Record::Attendance(_)) | (Table::Students, Record::Student(_))
            )
        })
        .map(|r| export_row(*r))
        .collect()
}

struct ExportFormats {
    header: Format,
    cell: Format,
}

impl ExportFormats {
    fn new() -> Self {
        Self {
            header: Format::new()
                .set_bold()
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter),
            cell: Format::new()
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Left)
                .set_align(FormatAlign::VerticalCenter),
        }
    }
}

fn write_headers(ws: &mut Worksheet, headers: &[&str], fmt: &Format) -> Result<()> {
    for (i, h) in headers.iter().enumerate() {
        ws.write_string_with_format(0, i as u16, *h, fmt)?;
    }
    Ok(())
}

fn write_rows(ws: &mut Worksheet, rows: &[Vec<String>], fmt: &Format) -> Result<()> {
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            ws.write_string_with_format(r as u32 + 1, c as u16, value, fmt)?;
        }
    }
    Ok(())
}

fn set_column_widths(ws: &mut Worksheet, table: Table) -> Result<()> {
    let widths: &[u16] = match table {
        Table::Attendance => &[14, 30, 10, 6, 8, 10],
        Table::Students => &[14, 16, 30, 10, 6, 8],
    };
    for (col, w) in widths.iter().enumerate() {
        ws.set_column_width(col as u16, *w)?;
    }
    Ok(())
}

/// One-sheet workbook: bold header row, frozen and filterable.
pub fn to_xlsx(table: Table, rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let headers = columns(table);
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    ws.set_name(table.sheet_name())?;
    let fmt = ExportFormats::new();

    write_headers(ws, headers, &fmt.header)?;
    write_rows(ws, rows, &fmt.cell)?;
    ws.set_freeze_panes(1, 0)?;
    ws.autofilter(0, 0, rows.len() as u32, headers.len() as u16 - 1)?;
    set_column_widths(ws, table)?;

    Ok(workbook.save_to_buffer()?)
}

pub fn to_csv<W: Write>(table: Table, rows: &[Vec<String>], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(columns(table))?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the view into `dir` under its dated file name and returns the path.
pub fn export_view(
    table: Table,
    view: &[Record<'_>],
    format: ExportFormat,
    dir: &Path,
    date: NaiveDate,
) -> Result<PathBuf> {
    let rows = export_rows(table, view);
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name(table, format, date));
    match format {
        ExportFormat::Xlsx => std::fs::write(&path, to_xlsx(table, &rows)?)?,
        ExportFormat::Csv => to_csv(table, &rows, std::fs::File::create(&path)?)?,
    }
    info!(path = %path.display(), rows = rows.len(), "exported {}", table.as_str());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttendanceEntry, AttendanceStatus, Course, EventId, Section, Student, StudentId, Year};

    fn student(id: &str, name: &str, rfid: Option<&str>) -> Student {
        Student {
            student_id: StudentId::from(id),
            name: name.into(),
            course: Course::Bscrim,
            year: Year::Third,
            section: Section::B,
            rfid: rfid.map(Into::into),
        }
    }

    #[test]
    fn file_name_uses_table_and_date() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(file_name(Table::Attendance, ExportFormat::Xlsx, d), "attendance_2024-03-01.xlsx");
        assert_eq!(file_name(Table::Students, ExportFormat::Csv, d), "students_2024-03-01.csv");
    }

    #[test]
    fn student_rows_follow_column_order() {
        let a = student("S1", "Ana", Some("RF1"));
        let b = student("S2", "Ben", None);
        let rows = export_rows(Table::Students, &[Record::Student(&a), Record::Student(&b)]);
        assert_eq!(rows[0], vec!["S1", "RF1", "Ana", "BSCRIM", "3", "B"]);
        assert_eq!(rows[1][1], "");
    }

    #[test]
    fn attendance_csv_has_header_and_status() {
        let e = AttendanceEntry {
            student_id: StudentId::from("S1"),
            event_id: EventId::from("9"),
            name: "Ana".into(),
            course: Course::Bsit,
            year: Year::First,
            section: Section::A,
            status: Some(AttendanceStatus::Excused),
            check_in_time: None,
        };
        let rows = export_rows(Table::Attendance, &[Record::Attendance(&e)]);
        let mut buf = Vec::new();
        to_csv(Table::Attendance, &rows, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "Id,Name,Course,Year,Section,Status\nS1,Ana,BSIT,1,A,Excused\n"
        );
    }

    #[test]
    fn xlsx_is_a_zip_even_when_empty() {
        let bytes = to_xlsx(Table::Students, &[]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn export_view_writes_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let a = student("S1", "Ana", None);
        let d = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let path = export_view(Table::Students, &[Record::Student(&a)], ExportFormat::Csv, dir.path(), d)
            .unwrap();
        assert_eq!(path, dir.path().join("students_2024-05-02.csv"));
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
