#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use rollcall::api::{AttendanceApi, BulkDeleteResponse, Credentials};
use rollcall::auth::Session;
use rollcall::forms::{EventPayload, NewStudent, UserPayload};
use rollcall::model::{
    Amount, AttendanceEntry, AttendanceStatus, CheckedInStudent, Course, Eligibility, Event,
    EventId, Fine, FineId, RfidCheckIn, Role, Section, Student, StudentId, StudentMetrics, User,
    UserId, Year,
};
use rollcall::{Dashboard, Error, Result};

/// In-memory backend with switches for making requests fail.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

#[derive(Default)]
pub struct FakeState {
    pub students: Vec<Student>,
    pub events: Vec<Event>,
    pub attendance: Vec<AttendanceEntry>,
    pub fines: Vec<(StudentId, Fine)>,
    pub users: Vec<User>,
    pub password: String,

    pub fail_delete: bool,
    pub fail_status_for: HashSet<StudentId>,
    pub deleted_count_override: Option<u64>,

    pub calls: Vec<String>,
}

impl FakeState {
    pub fn count(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| c.as_str() == name).count()
    }
}

fn server_error(message: &str) -> Error {
    Error::Api {
        status: 500,
        message: Some(message.to_string()),
    }
}

fn not_found(message: &str) -> Error {
    Error::Api {
        status: 404,
        message: Some(message.to_string()),
    }
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn call(&self, name: &str) -> MutexGuard<'_, FakeState> {
        let mut s = self.state();
        s.calls.push(name.to_string());
        s
    }
}

#[async_trait]
impl AttendanceApi for FakeApi {
    async fn list_students(&self) -> Result<Vec<Student>> {
        Ok(self.call("list_students").students.clone())
    }

    async fn create_student(&self, student: &NewStudent) -> Result<Student> {
        let mut s = self.call("create_student");
        let created = student.to_student();
        s.students.push(created.clone());
        Ok(created)
    }

    async fn update_student(&self, id: &StudentId, student: &NewStudent) -> Result<Student> {
        let mut s = self.call("update_student");
        let updated = student.to_student();
        let slot = s
            .students
            .iter_mut()
            .find(|x| &x.student_id == id)
            .ok_or_else(|| not_found("Student not found"))?;
        *slot = updated.clone();
        Ok(updated)
    }

    async fn delete_students(&self, ids: &[StudentId]) -> Result<BulkDeleteResponse> {
        let mut s = self.call("delete_students");
        if s.fail_delete {
            return Err(server_error("Database unavailable"));
        }
        let before = s.students.len();
        s.students.retain(|x| !ids.contains(&x.student_id));
        let removed = (before - s.students.len()) as u64;
        Ok(BulkDeleteResponse {
            message: format!("{} students deleted successfully", removed),
            deleted_count: Some(s.deleted_count_override.unwrap_or(removed)),
        })
    }

    async fn student_metrics(&self, _id: &StudentId) -> Result<StudentMetrics> {
        drop(self.call("student_metrics"));
        Err(not_found("Student not found"))
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        Ok(self.call("list_events").events.clone())
    }

    async fn events_on(&self, date: NaiveDate) -> Result<Vec<Event>> {
        let s = self.call("events_on");
        Ok(s.events.iter().filter(|e| e.date == date).cloned().collect())
    }

    async fn create_event(&self, event: &EventPayload) -> Result<Event> {
        let mut s = self.call("create_event");
        let created = Event {
            id: EventId::from((s.events.len() + 1).to_string()),
            title: event.title.clone(),
            date: event.event_date,
            location: event.location.clone(),
            fine: event.fine,
            eligibility: event.eligibility.clone(),
        };
        s.events.push(created.clone());
        Ok(created)
    }

    async fn update_event(&self, id: &EventId, event: &EventPayload) -> Result<Event> {
        let mut s = self.call("update_event");
        let slot = s
            .events
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| not_found("Event not found"))?;
        slot.title = event.title.clone();
        slot.date = event.event_date;
        slot.location = event.location.clone();
        slot.fine = event.fine;
        slot.eligibility = event.eligibility.clone();
        Ok(slot.clone())
    }

    async fn delete_event(&self, id: &EventId) -> Result<()> {
        let mut s = self.call("delete_event");
        s.events.retain(|e| &e.id != id);
        Ok(())
    }

    async fn event_attendance(&self, event: &EventId) -> Result<Vec<AttendanceEntry>> {
        let s = self.call("event_attendance");
        Ok(s.attendance
            .iter()
            .filter(|a| &a.event_id == event)
            .cloned()
            .collect())
    }

    async fn set_attendance(
        &self,
        student: &StudentId,
        event: &EventId,
        status: AttendanceStatus,
    ) -> Result<()> {
        let mut s = self.call("set_attendance");
        if s.fail_status_for.contains(student) {
            return Err(server_error("Failed to update attendance"));
        }
        if let Some(a) = s
            .attendance
            .iter_mut()
            .find(|a| &a.student_id == student && &a.event_id == event)
        {
            a.status = Some(status);
        }
        Ok(())
    }

    async fn rfid_check_in(&self, rfid: &str, event: &EventId) -> Result<RfidCheckIn> {
        let s = self.call("rfid_check_in");
        let student = s
            .students
            .iter()
            .find(|x| x.rfid.as_deref() == Some(rfid))
            .ok_or_else(|| not_found("Student not found with this RFID"))?;
        let _ = event;
        Ok(RfidCheckIn {
            student_id: student.student_id.clone(),
            student: CheckedInStudent {
                name: student.name.clone(),
                course: student.course,
                year: student.year,
                section: student.section,
            },
            check_in_time: Some(Utc::now()),
        })
    }

    async fn student_fines(&self, student: &StudentId) -> Result<Vec<Fine>> {
        let s = self.call("student_fines");
        Ok(s.fines
            .iter()
            .filter(|(id, _)| id == student)
            .map(|(_, f)| f.clone())
            .collect())
    }

    async fn set_fine_paid(&self, student: &StudentId, event: &EventId, paid: bool) -> Result<()> {
        let mut s = self.call("set_fine_paid");
        for (id, f) in s.fines.iter_mut() {
            if id == student && &f.event_id == event {
                f.is_paid = paid;
            }
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.call("list_users").users.clone())
    }

    async fn create_user(&self, user: &UserPayload) -> Result<()> {
        let mut s = self.call("create_user");
        let id = UserId::from((s.users.len() + 1).to_string());
        s.users.push(User {
            id,
            username: user.username.clone(),
            role: user.role,
        });
        Ok(())
    }

    async fn update_user(&self, id: &UserId, user: &UserPayload) -> Result<()> {
        let mut s = self.call("update_user");
        if let Some(u) = s.users.iter_mut().find(|u| &u.id == id) {
            u.username = user.username.clone();
            u.role = user.role;
        }
        Ok(())
    }

    async fn delete_user(&self, id: &UserId) -> Result<()> {
        let mut s = self.call("delete_user");
        s.users.retain(|u| &u.id != id);
        Ok(())
    }

    async fn login(&self, credentials: &Credentials) -> Result<Session> {
        let s = self.call("login");
        let user = s
            .users
            .iter()
            .find(|u| u.username == credentials.username)
            .filter(|_| credentials.password == s.password)
            .ok_or(Error::Api {
                status: 401,
                message: Some("Invalid credentials".into()),
            })?;
        Ok(Session {
            token: format!("token-{}", user.id),
            user: user.clone(),
        })
    }
}

pub fn student(id: &str, name: &str, course: Course, rfid: Option<&str>) -> Student {
    Student {
        student_id: StudentId::from(id),
        name: name.into(),
        course,
        year: Year::First,
        section: Section::A,
        rfid: rfid.map(Into::into),
    }
}

pub fn entry(s: &Student, event: &str, status: Option<AttendanceStatus>) -> AttendanceEntry {
    AttendanceEntry {
        student_id: s.student_id.clone(),
        event_id: EventId::from(event),
        name: s.name.clone(),
        course: s.course,
        year: s.year,
        section: s.section,
        status,
        check_in_time: None,
    }
}

pub fn event(id: &str, title: &str) -> Event {
    Event {
        id: EventId::from(id),
        title: title.into(),
        date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        location: "Gym".into(),
        fine: Amount::from_cents(5000),
        eligibility: Eligibility::default(),
    }
}

pub fn fine(event: &str, title: &str, cents: i64, paid: bool) -> Fine {
    Fine {
        id: FineId::from(event),
        event_id: EventId::from(event),
        event_title: title.into(),
        amount: Amount::from_cents(cents),
        is_paid: paid,
    }
}

pub fn session(role: Role) -> Session {
    Session {
        token: "tok".into(),
        user: User {
            id: UserId::from("1"),
            username: "officer".into(),
            role,
        },
    }
}

pub fn dashboard(api: &Arc<FakeApi>, role: Role) -> Dashboard {
    let api: Arc<dyn AttendanceApi> = api.clone();
    Dashboard::new(api, Some(session(role)))
}

/// Ten students: four BSHM, the rest split between BSIT and BSCRIM.
pub fn roster() -> Vec<Student> {
    vec![
        student("S01", "Ana", Course::Bsit, Some("RF01")),
        student("S02", "Ben", Course::Bshm, Some("RF02")),
        student("S03", "Carl", Course::Bshm, None),
        student("S04", "dora", Course::Bscrim, None),
        student("S05", "Eve", Course::Bshm, None),
        student("S06", "Finn", Course::Bsit, None),
        student("S07", "Gus", Course::Bscrim, None),
        student("S08", "Hana", Course::Bshm, None),
        student("S09", "Ivo", Course::Bsit, None),
        student("S10", "Jin", Course::Bscrim, None),
    ]
}
