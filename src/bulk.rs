//! Bulk actions over the selected rows: a confirmation step, then the
//! requests, then a report of what went through.

use futures::stream::{FuturesUnordered, Stream};

use crate::api::AttendanceApi;
use crate::error::{Error, Result};
use crate::model::{AttendanceStatus, Choice, EventId, StudentId, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Delete,
    SetStatus(AttendanceStatus),
}

impl BulkAction {
    /// The table the action is offered on.
    pub fn table(self) -> Table {
        match self {
            BulkAction::Delete => Table::Students,
            BulkAction::SetStatus(_) => Table::Attendance,
        }
    }

    pub fn describe(self, count: usize) -> String {
        match self {
            BulkAction::Delete => format!("delete {} student(s)", count),
            BulkAction::SetStatus(s) => format!("mark {} student(s) as {}", count, s.as_str()),
        }
    }
}

/// The open confirmation dialog: which action, and whether the
/// "I understand" box is ticked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkConfirmation {
    pub action: BulkAction,
    acknowledged: bool,
}

impl BulkConfirmation {
    pub fn new(action: BulkAction) -> Self {
        Self {
            action,
            acknowledged: false,
        }
    }

    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn acknowledge(&mut self, checked: bool) {
        self.acknowledged = checked;
    }

    pub fn ensure_acknowledged(&self) -> Result<()> {
        if self.acknowledged {
            Ok(())
        } else {
            Err(Error::NotAcknowledged)
        }
    }
}

/// Outcome of a confirmed bulk action. A delete is all-or-nothing; a status
/// change can partly succeed.
#[derive(Debug)]
pub struct BulkReport {
    pub action: BulkAction,
    pub succeeded: Vec<StudentId>,
    pub failed: Vec<(StudentId, Error)>,
}

impl BulkReport {
    pub fn new(action: BulkAction) -> Self {
        Self {
            action,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn requested(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = &StudentId> {
        self.failed.iter().map(|(id, _)| id)
    }
}

/// One status request per student, all in flight at once. Results come out
/// in completion order.
pub fn set_status_each<'a>(
    api: &'a dyn AttendanceApi,
    ids: Vec<StudentId>,
    event: &'a EventId,
    status: AttendanceStatus,
) -> impl Stream<Item = (StudentId, Result<()>)> + 'a {
    ids.into_iter()
        .map(|id| async move {
            let result = api.set_attendance(&id, event, status).await;
            (id, result)
        })
        .collect::<FuturesUnordered<_>>()
}
