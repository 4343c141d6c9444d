//! The dashboard: loaded records plus everything about how they are being
//! viewed, and the actions that change them.
//!
//! Every action takes `&mut self`, so one dashboard runs one action at a
//! time. Failed actions raise an error notice and return the error; nothing
//! in the store changes unless the backend accepted the request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::api::AttendanceApi;
use crate::auth::{Capabilities, Session};
use crate::bulk::{self, BulkAction, BulkConfirmation, BulkReport};
use crate::error::{Error, Result};
use crate::export::{self, ExportFormat};
use crate::fines::{self, FinePolicy, FineSort};
use crate::forms::{EventForm, StudentForm};
use crate::model::{
    AttendanceEntry, AttendanceStatus, Choice, Event, EventId, Fine, Record, Student, StudentId,
    StudentMetrics, Table,
};
use crate::notice::Notices;
use crate::paginate::{PageSize, Paginator};
use crate::rfid::CheckInSession;
use crate::selection::Selection;
use crate::view::{Filters, Sort, SortDirection, SortKey, ViewCache};

/// One page of the active table.
#[derive(Debug)]
pub struct PageView<'a> {
    pub rows: Vec<Record<'a>>,
    pub page: usize,
    pub total_pages: usize,
    pub total_rows: usize,
}

impl PageView<'_> {
    pub fn ids(&self) -> Vec<StudentId> {
        self.rows.iter().map(|r| r.student_id().clone()).collect()
    }
}

pub struct Dashboard {
    api: Arc<dyn AttendanceApi>,
    session: Option<Session>,
    fine_policy: FinePolicy,

    students: Vec<Student>,
    events: Vec<Event>,
    selected_event: Option<EventId>,
    attendance: Vec<AttendanceEntry>,
    revision: u64,

    table: Table,
    filters: Filters,
    sort: Sort,
    paginator: Paginator,
    selection: Selection,
    view_cache: ViewCache,
    bulk: Option<BulkConfirmation>,
    rfid: CheckInSession,
    pub notices: Notices,
}

impl Dashboard {
    pub fn new(api: Arc<dyn AttendanceApi>, session: Option<Session>) -> Self {
        Self {
            api,
            session,
            fine_policy: FinePolicy::default(),
            students: Vec::new(),
            events: Vec::new(),
            selected_event: None,
            attendance: Vec::new(),
            revision: 0,
            table: Table::default(),
            filters: Filters::default(),
            sort: Sort::default(),
            paginator: Paginator::default(),
            selection: Selection::default(),
            view_cache: ViewCache::default(),
            bulk: None,
            rfid: CheckInSession::default(),
            notices: Notices::default(),
        }
    }

    pub fn with_page_size(mut self, size: PageSize) -> Self {
        self.paginator = Paginator::new(size);
        self
    }

    pub fn with_fine_policy(mut self, policy: FinePolicy) -> Self {
        self.fine_policy = policy;
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn require(&self, allowed: fn(&Capabilities) -> bool, action: &'static str) -> Result<()> {
        self.session
            .as_ref()
            .ok_or(Error::NotLoggedIn)?
            .require(allowed, action)
    }

    fn logged_in(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::NotLoggedIn)
    }

    /// Raises an error notice for `result` if it failed, then passes it on.
    fn report<T>(&mut self, result: Result<T>, fallback: &str) -> Result<T> {
        if let Err(e) = &result {
            self.notices.error(e.user_message(fallback));
        }
        result
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn attendance(&self) -> &[AttendanceEntry] {
        &self.attendance
    }

    pub fn selected_event(&self) -> Option<&Event> {
        let id = self.selected_event.as_ref()?;
        self.events.iter().find(|e| &e.id == id)
    }

    pub fn selected_event_id(&self) -> Option<&EventId> {
        self.selected_event.as_ref()
    }

    pub async fn load_students(&mut self) -> Result<()> {
        let result = match self.logged_in() {
            Ok(_) => self.api.list_students().await,
            Err(e) => Err(e),
        };
        let students = self.report(result, "Failed to fetch students")?;
        debug!(count = students.len(), "students loaded");
        self.students = students;
        self.touch();
        let len = self.view_len();
        self.paginator.clamp(len);
        Ok(())
    }

    pub async fn load_events(&mut self) -> Result<()> {
        let result = match self.logged_in() {
            Ok(_) => self.api.list_events().await,
            Err(e) => Err(e),
        };
        let events = self.report(result, "Failed to fetch events")?;
        debug!(count = events.len(), "events loaded");
        self.events = events;
        Ok(())
    }

    pub async fn events_on(&mut self, date: NaiveDate) -> Result<Vec<Event>> {
        let result = match self.logged_in() {
            Ok(_) => self.api.events_on(date).await,
            Err(e) => Err(e),
        };
        self.report(result, "Failed to fetch events")
    }

    /// Picks the event whose attendance the attendance table shows. `None`
    /// empties that table.
    pub async fn select_event(&mut self, event: Option<EventId>) -> Result<()> {
        let Some(id) = event else {
            self.selected_event = None;
            self.attendance.clear();
            self.rfid.close();
            self.touch();
            if self.table == Table::Attendance {
                self.view_scope_changed();
            }
            return Ok(());
        };
        if !self.events.is_empty() && !self.events.iter().any(|e| e.id == id) {
            return self.report(Err(Error::NotFound(format!("event {}", id))), "");
        }
        let result = match self.logged_in() {
            Ok(_) => self.api.event_attendance(&id).await,
            Err(e) => Err(e),
        };
        let entries = self.report(result, "Failed to fetch attendance")?;
        self.attendance = entries;
        self.selected_event = Some(id);
        if self.rfid.is_open() {
            self.rfid.close();
        }
        self.touch();
        if self.table == Table::Attendance {
            self.view_scope_changed();
        }
        if let Some(e) = self.selected_event() {
            let title = e.title.clone();
            self.notices.info(format!("Viewing attendance for {}", title));
        }
        Ok(())
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn sort(&self) -> Sort {
        self.sort
    }

    pub fn paginator(&self) -> Paginator {
        self.paginator
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn view_derivations(&self) -> u64 {
        self.view_cache.derivations()
    }

    /// Table, filter or search changed: back to page 1, nothing selected.
    fn view_scope_changed(&mut self) {
        self.paginator.reset();
        self.selection.clear();
        self.bulk = None;
    }

    pub fn set_table(&mut self, table: Table) {
        if self.table != table {
            self.table = table;
            self.view_scope_changed();
        }
    }

    pub fn set_filters(&mut self, filters: Filters) {
        if self.filters != filters {
            self.filters = filters;
            self.view_scope_changed();
        }
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        let filters = Filters {
            search: search.into(),
            ..self.filters.clone()
        };
        self.set_filters(filters);
    }

    pub fn toggle_sort(&mut self, key: SortKey) {
        self.sort.toggle(key);
    }

    pub fn set_sort(&mut self, key: SortKey, direction: SortDirection) {
        self.sort = Sort { key, direction };
    }

    pub fn set_page_size(&mut self, size: PageSize) {
        self.paginator.set_size(size);
    }

    pub fn goto_page(&mut self, input: &str) {
        let len = self.view_len();
        self.paginator.goto_input(input, len);
    }

    pub fn next_page(&mut self) {
        let len = self.view_len();
        self.paginator.next(len);
    }

    pub fn prev_page(&mut self) {
        self.paginator.prev();
    }

    /// The filtered, sorted active table, all pages.
    pub fn view(&mut self) -> Vec<Record<'_>> {
        let rev = self.revision;
        match self.table {
            Table::Students => {
                let idx = self
                    .view_cache
                    .get(Table::Students, rev, &self.students, &self.filters, &self.sort);
                idx.iter().map(|&i| Record::Student(&self.students[i])).collect()
            }
            Table::Attendance => {
                let idx = self.view_cache.get(
                    Table::Attendance,
                    rev,
                    &self.attendance,
                    &self.filters,
                    &self.sort,
                );
                idx.iter()
                    .map(|&i| Record::Attendance(&self.attendance[i]))
                    .collect()
            }
        }
    }

    fn view_len(&mut self) -> usize {
        self.view().len()
    }

    pub fn page(&mut self) -> PageView<'_> {
        let len = self.view_len();
        self.paginator.clamp(len);
        let paginator = self.paginator;
        let view = self.view();
        let page = paginator.slice(&view);
        PageView {
            rows: page.items.to_vec(),
            page: page.page,
            total_pages: page.total_pages,
            total_rows: view.len(),
        }
    }

    fn page_ids(&mut self) -> Vec<StudentId> {
        self.page().ids()
    }

    pub fn toggle_row(&mut self, id: &StudentId) {
        self.selection.toggle(id);
    }

    pub fn set_row_selected(&mut self, id: &StudentId, checked: bool) {
        self.selection.set(id, checked);
    }

    /// Header checkbox over the current page.
    pub fn toggle_page_selection(&mut self) {
        let ids = self.page_ids();
        self.selection.toggle_page(&ids);
    }

    pub fn page_fully_selected(&mut self) -> bool {
        let ids = self.page_ids();
        self.selection.page_fully_selected(&ids)
    }

    /// Selected rows that are on the current page, in page order.
    pub fn selected_on_page(&mut self) -> Vec<StudentId> {
        let ids = self.page_ids();
        self.selection.resolve(&ids)
    }

    pub async fn set_status(&mut self, student: &StudentId, status: AttendanceStatus) -> Result<()> {
        let result = self.set_status_inner(student, status).await;
        self.report(result, "Failed to update attendance")
    }

    async fn set_status_inner(&mut self, student: &StudentId, status: AttendanceStatus) -> Result<()> {
        self.require(|c| c.can_edit, "edit attendance")?;
        let event = self.selected_event.clone().ok_or(Error::NoEventSelected)?;
        self.api.set_attendance(student, &event, status).await?;
        let name = self.patch_status(student, status).unwrap_or_else(|| student.to_string());
        self.touch();
        self.notices.success(format!(
            "{}'s attendance marked as {}",
            name,
            status.as_str()
        ));
        Ok(())
    }

    /// Sets the status of a loaded entry; returns the student's name.
    fn patch_status(&mut self, student: &StudentId, status: AttendanceStatus) -> Option<String> {
        let entry = self.attendance.iter_mut().find(|a| &a.student_id == student)?;
        entry.status = Some(status);
        Some(entry.name.clone())
    }

    pub async fn add_student(&mut self, form: &StudentForm) -> Result<()> {
        let result = self.add_student_inner(form).await;
        self.report(result, "Failed to add student")
    }

    async fn add_student_inner(&mut self, form: &StudentForm) -> Result<()> {
        self.require(|c| c.can_add, "add students")?;
        let payload = form.validate()?;
        let created = self.api.create_student(&payload).await?;
        info!(student_id = %created.student_id, "student added");
        self.notices
            .success(format!("Student {} added successfully", created.name));
        self.students.push(created);
        self.touch();
        Ok(())
    }

    pub async fn update_student(&mut self, id: &StudentId, form: &StudentForm) -> Result<()> {
        let result = self.update_student_inner(id, form).await;
        self.report(result, "Failed to update student")
    }

    async fn update_student_inner(&mut self, id: &StudentId, form: &StudentForm) -> Result<()> {
        self.require(|c| c.can_edit, "edit students")?;
        let payload = form.validate()?;
        let updated = self.api.update_student(id, &payload).await?;
        if let Some(s) = self.students.iter_mut().find(|s| &s.student_id == id) {
            *s = updated.clone();
        }
        for a in self.attendance.iter_mut().filter(|a| &a.student_id == id) {
            a.student_id = updated.student_id.clone();
            a.name = updated.name.clone();
            a.course = updated.course;
            a.year = updated.year;
            a.section = updated.section;
        }
        if &updated.student_id != id && self.selection.contains(id) {
            self.selection.set(id, false);
            self.selection.set(&updated.student_id, true);
        }
        self.touch();
        self.notices
            .success(format!("Student {} updated successfully", updated.name));
        Ok(())
    }

    pub async fn delete_student(&mut self, id: &StudentId) -> Result<()> {
        let result = self.delete_student_inner(id).await;
        self.report(result, "Failed to delete student")
    }

    async fn delete_student_inner(&mut self, id: &StudentId) -> Result<()> {
        self.require(|c| c.can_delete, "delete students")?;
        let response = self.api.delete_students(std::slice::from_ref(id)).await?;
        self.remove_students(std::slice::from_ref(id));
        self.notices.success(if response.message.is_empty() {
            "Student deleted successfully".to_string()
        } else {
            response.message
        });
        Ok(())
    }

    fn remove_students(&mut self, ids: &[StudentId]) {
        self.students.retain(|s| !ids.contains(&s.student_id));
        self.attendance.retain(|a| !ids.contains(&a.student_id));
        for id in ids {
            self.selection.set(id, false);
        }
        self.touch();
        let len = self.view_len();
        self.paginator.clamp(len);
    }

    pub async fn student_metrics(&mut self, id: &StudentId) -> Result<StudentMetrics> {
        let result = match self.logged_in() {
            Ok(_) => self.api.student_metrics(id).await,
            Err(e) => Err(e),
        };
        self.report(result, "Failed to fetch student metrics")
    }

    pub async fn add_event(&mut self, form: &EventForm) -> Result<Event> {
        let result = self.add_event_inner(form).await;
        self.report(result, "Failed to create event")
    }

    async fn add_event_inner(&mut self, form: &EventForm) -> Result<Event> {
        self.require(|c| c.can_manage_events, "manage events")?;
        let payload = form.validate()?;
        let event = self.api.create_event(&payload).await?;
        self.notices
            .success(format!("Event \"{}\" created successfully", event.title));
        self.events.push(event.clone());
        Ok(event)
    }

    pub async fn edit_event(&mut self, id: &EventId, form: &EventForm) -> Result<Event> {
        let result = self.edit_event_inner(id, form).await;
        self.report(result, "Failed to update event")
    }

    async fn edit_event_inner(&mut self, id: &EventId, form: &EventForm) -> Result<Event> {
        self.require(|c| c.can_manage_events, "manage events")?;
        let payload = form.validate()?;
        let event = self.api.update_event(id, &payload).await?;
        match self.events.iter_mut().find(|e| &e.id == id) {
            Some(slot) => *slot = event.clone(),
            None => self.events.push(event.clone()),
        }
        self.notices
            .success(format!("Event \"{}\" updated successfully", event.title));
        Ok(event)
    }

    pub async fn delete_event(&mut self, id: &EventId) -> Result<()> {
        let result = self.delete_event_inner(id).await;
        self.report(result, "Failed to delete event")
    }

    async fn delete_event_inner(&mut self, id: &EventId) -> Result<()> {
        self.require(|c| c.can_manage_events, "manage events")?;
        self.api.delete_event(id).await?;
        self.events.retain(|e| &e.id != id);
        if self.selected_event.as_ref() == Some(id) {
            self.select_event(None).await?;
        }
        self.notices.success("Event deleted successfully");
        Ok(())
    }

    pub async fn fines(
        &mut self,
        student: &StudentId,
        key: FineSort,
        direction: SortDirection,
    ) -> Result<Vec<Fine>> {
        let result = match self.logged_in() {
            Ok(_) => self.api.student_fines(student).await,
            Err(e) => Err(e),
        };
        let mut list = self.report(result, "Failed to fetch fines")?;
        fines::sort_fines(&mut list, key, direction);
        Ok(list)
    }

    pub async fn set_fine_paid(&mut self, student: &StudentId, event: &EventId, paid: bool) -> Result<()> {
        let result = self.set_fine_paid_inner(student, event, paid).await;
        self.report(result, "Failed to update fine")
    }

    async fn set_fine_paid_inner(&mut self, student: &StudentId, event: &EventId, paid: bool) -> Result<()> {
        let caps = self.logged_in()?.capabilities();
        self.fine_policy.check(&caps, paid)?;
        self.api.set_fine_paid(student, event, paid).await?;
        self.notices.success(if paid {
            "Fine marked as paid"
        } else {
            "Fine marked as unpaid"
        });
        Ok(())
    }

    pub fn check_in_session(&self) -> &CheckInSession {
        &self.rfid
    }

    pub fn open_check_in(&mut self) -> Result<()> {
        let result = self
            .require(|c| c.can_check_in, "check students in")
            .and_then(|_| self.rfid.open(self.selected_event.as_ref()));
        self.report(result, "")
    }

    pub fn close_check_in(&mut self) {
        self.rfid.close();
    }

    /// Feeds one reader line. Returns the checked-in entry, or `None` when
    /// the line was blank.
    pub async fn check_in(&mut self, line: &str) -> Result<Option<AttendanceEntry>> {
        if !self.rfid.is_open() {
            self.open_check_in()?;
        }
        let Some(tag) = self.rfid.feed_line(line) else {
            return Ok(None);
        };
        let result = self.submit_tag(&tag).await;
        self.rfid.finish();
        self.report(result, "Failed to update attendance").map(Some)
    }

    async fn submit_tag(&mut self, tag: &str) -> Result<AttendanceEntry> {
        let event = self.rfid.event().cloned().ok_or(Error::NoEventSelected)?;
        let checked = self.api.rfid_check_in(tag, &event).await?;
        let entry = checked.into_entry(event);
        self.upsert_entry(entry.clone());
        self.notices
            .success(format!("{} marked as present", entry.name));
        Ok(entry)
    }

    /// Replaces the entry for the same student, or appends a new one.
    fn upsert_entry(&mut self, entry: AttendanceEntry) {
        if self.selected_event.as_ref() != Some(&entry.event_id) {
            return;
        }
        match self
            .attendance
            .iter_mut()
            .find(|a| a.student_id == entry.student_id)
        {
            Some(slot) => *slot = entry,
            None => self.attendance.push(entry),
        }
        self.touch();
    }

    pub fn pending_bulk(&self) -> Option<&BulkConfirmation> {
        self.bulk.as_ref()
    }

    /// Opens the confirmation dialog for `action` over the current selection.
    pub fn open_bulk(&mut self, action: BulkAction) -> Result<()> {
        let result = self.open_bulk_inner(action);
        self.report(result, "")
    }

    fn open_bulk_inner(&mut self, action: BulkAction) -> Result<()> {
        match action {
            BulkAction::Delete => self.require(|c| c.can_delete, "delete students")?,
            BulkAction::SetStatus(_) => self.require(|c| c.can_edit, "edit attendance")?,
        }
        if self.table != action.table() {
            return Err(Error::WrongTable(action.table().as_str()));
        }
        if let BulkAction::SetStatus(_) = action {
            self.selected_event.as_ref().ok_or(Error::NoEventSelected)?;
        }
        if self.selected_on_page().is_empty() {
            return Err(Error::EmptySelection);
        }
        self.bulk = Some(BulkConfirmation::new(action));
        Ok(())
    }

    pub fn acknowledge_bulk(&mut self, checked: bool) {
        if let Some(b) = self.bulk.as_mut() {
            b.acknowledge(checked);
        }
    }

    pub fn cancel_bulk(&mut self) {
        self.bulk = None;
    }

    /// Runs the pending bulk action against the selected rows on the current
    /// page. Without the acknowledgement nothing is sent and the dialog
    /// stays open; otherwise the selection and dialog are cleared whatever
    /// the outcome.
    pub async fn confirm_bulk(&mut self) -> Result<BulkReport> {
        let Some(pending) = self.bulk else {
            return self.report(Err(Error::EmptySelection), "");
        };
        if let Err(e) = pending.ensure_acknowledged() {
            return self.report(Err(e), "");
        }
        let ids = self.selected_on_page();
        self.bulk = None;
        self.selection.clear();
        if ids.is_empty() {
            return self.report(Err(Error::EmptySelection), "");
        }
        match pending.action {
            BulkAction::Delete => {
                let result = self.bulk_delete(ids).await;
                self.report(result, "Failed to delete selected students")
            }
            BulkAction::SetStatus(status) => self.bulk_set_status(ids, status).await,
        }
    }

    async fn bulk_delete(&mut self, ids: Vec<StudentId>) -> Result<BulkReport> {
        let response = self.api.delete_students(&ids).await?;
        if let Some(n) = response.deleted_count.filter(|&n| n != ids.len() as u64) {
            warn!(requested = ids.len(), deleted = n, "bulk delete count mismatch");
            self.notices.warning(format!(
                "Requested {} deletion(s) but the server reported {}",
                ids.len(),
                n
            ));
        }
        self.remove_students(&ids);
        self.notices.success(if response.message.is_empty() {
            format!("Deleted {} student(s)", ids.len())
        } else {
            response.message
        });
        let mut report = BulkReport::new(BulkAction::Delete);
        report.succeeded = ids;
        Ok(report)
    }

    /// Each request that succeeds is applied as soon as it completes; the
    /// failures are reported together at the end.
    async fn bulk_set_status(&mut self, ids: Vec<StudentId>, status: AttendanceStatus) -> Result<BulkReport> {
        let Some(event) = self.selected_event.clone() else {
            return self.report(Err(Error::NoEventSelected), "");
        };
        let action = BulkAction::SetStatus(status);
        let mut report = BulkReport::new(action);
        let api = Arc::clone(&self.api);
        let mut results = bulk::set_status_each(api.as_ref(), ids, &event, status);
        while let Some((id, result)) = results.next().await {
            match result {
                Ok(()) => {
                    self.patch_status(&id, status);
                    self.touch();
                    report.succeeded.push(id);
                }
                Err(e) => {
                    debug!(student_id = %id, error = %e, "status update failed");
                    report.failed.push((id, e));
                }
            }
        }

        if report.is_complete() {
            self.notices.success(format!(
                "Marked {} student(s) as {}",
                report.succeeded.len(),
                status.as_str()
            ));
        } else if report.succeeded.is_empty() {
            self.notices
                .error("Failed to update attendance for selected students");
        } else {
            let failed: Vec<&str> = report.failed_ids().map(|id| id.as_str()).collect();
            warn!(failed = failed.len(), "bulk status partly applied");
            self.notices.warning(format!(
                "Marked {} of {} student(s) as {}; failed: {}",
                report.succeeded.len(),
                report.requested(),
                status.as_str(),
                failed.join(", ")
            ));
        }
        Ok(report)
    }

    /// Writes the whole view of the active table, not just the page.
    pub fn export(&mut self, format: ExportFormat, dir: &Path, date: NaiveDate) -> Result<PathBuf> {
        let table = self.table;
        let view = self.view();
        let count = view.len();
        let result = export::export_view(table, &view, format, dir, date);
        let result = self.report(result, "Failed to export");
        if result.is_ok() {
            self.notices
                .success(format!("Exported {} records to {}", count, format.extension()));
        }
        result
    }
}
