//! The backend REST API, behind a trait so the dashboard can run against
//! any implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use crate::auth::Session;
use crate::error::{Error, Result};
use crate::forms::{EventPayload, NewStudent, UserPayload};
use crate::model::{
    AttendanceEntry, AttendanceStatus, Choice, Event, EventId, Fine, RfidCheckIn, Student,
    StudentId, StudentMetrics, User, UserId,
};

/// Reply to `DELETE /students/bulk`. Backends that report how many rows
/// they removed let the caller notice a partial delete.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkDeleteResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "deletedCount")]
    pub deleted_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait AttendanceApi: Send + Sync {
    async fn list_students(&self) -> Result<Vec<Student>>;
    async fn create_student(&self, student: &NewStudent) -> Result<Student>;
    async fn update_student(&self, id: &StudentId, student: &NewStudent) -> Result<Student>;
    async fn delete_students(&self, ids: &[StudentId]) -> Result<BulkDeleteResponse>;
    async fn student_metrics(&self, id: &StudentId) -> Result<StudentMetrics>;

    async fn list_events(&self) -> Result<Vec<Event>>;
    async fn events_on(&self, date: NaiveDate) -> Result<Vec<Event>>;
    async fn create_event(&self, event: &EventPayload) -> Result<Event>;
    async fn update_event(&self, id: &EventId, event: &EventPayload) -> Result<Event>;
    async fn delete_event(&self, id: &EventId) -> Result<()>;

    async fn event_attendance(&self, event: &EventId) -> Result<Vec<AttendanceEntry>>;
    async fn set_attendance(
        &self,
        student: &StudentId,
        event: &EventId,
        status: AttendanceStatus,
    ) -> Result<()>;
    async fn rfid_check_in(&self, rfid: &str, event: &EventId) -> Result<RfidCheckIn>;

    async fn student_fines(&self, student: &StudentId) -> Result<Vec<Fine>>;
    async fn set_fine_paid(&self, student: &StudentId, event: &EventId, paid: bool) -> Result<()>;

    async fn list_users(&self) -> Result<Vec<User>>;
    async fn create_user(&self, user: &UserPayload) -> Result<()>;
    async fn update_user(&self, id: &UserId, user: &UserPayload) -> Result<()>;
    async fn delete_user(&self, id: &UserId) -> Result<()>;
    async fn login(&self, credentials: &Credentials) -> Result<Session>;
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// `reqwest` client for the real backend. The bearer token comes from the
/// session handed to [`HttpApi::with_session`]; there is no shared default.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::validation("api_base_url", e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::validation("api_base_url", "not a base URL"));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    pub fn with_session(mut self, session: Option<&Session>) -> Self {
        self.token = session.map(|s| s.token.clone());
        self
    }

    /// Joins path segments onto the base URL, percent-encoding each.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let url = self.url(segments);
        debug!(%method, %url, "request");
        let rb = self.http.request(method, url);
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn check(rb: RequestBuilder) -> Result<reqwest::Response> {
        let response = rb.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message);
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch<T: DeserializeOwned>(rb: RequestBuilder) -> Result<T> {
        let response = Self::check(rb).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn execute(rb: RequestBuilder) -> Result<()> {
        Self::check(rb).await.map(|_| ())
    }
}

#[async_trait]
impl AttendanceApi for HttpApi {
    async fn list_students(&self) -> Result<Vec<Student>> {
        Self::fetch(self.request(Method::GET, &["students"])).await
    }

    #[instrument(skip(self, student), fields(student_id = %student.student_id))]
    async fn create_student(&self, student: &NewStudent) -> Result<Student> {
        Self::fetch(self.request(Method::POST, &["students"]).json(student)).await
    }

    async fn update_student(&self, id: &StudentId, student: &NewStudent) -> Result<Student> {
        Self::fetch(
            self.request(Method::PUT, &["students", id.as_str()])
                .json(student),
        )
        .await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_students(&self, ids: &[StudentId]) -> Result<BulkDeleteResponse> {
        Self::fetch(
            self.request(Method::DELETE, &["students", "bulk"])
                .json(&json!({ "studentIds": ids })),
        )
        .await
    }

    async fn student_metrics(&self, id: &StudentId) -> Result<StudentMetrics> {
        Self::fetch(self.request(Method::GET, &["students", id.as_str(), "metrics"])).await
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        Self::fetch(self.request(Method::GET, &["events"])).await
    }

    async fn events_on(&self, date: NaiveDate) -> Result<Vec<Event>> {
        let day = date.format("%Y-%m-%d").to_string();
        Self::fetch(self.request(Method::GET, &["events", "date", &day])).await
    }

    async fn create_event(&self, event: &EventPayload) -> Result<Event> {
        Self::fetch(self.request(Method::POST, &["events", ""]).json(event)).await
    }

    async fn update_event(&self, id: &EventId, event: &EventPayload) -> Result<Event> {
        Self::fetch(self.request(Method::PUT, &["events", id.as_str()]).json(event)).await
    }

    async fn delete_event(&self, id: &EventId) -> Result<()> {
        Self::execute(self.request(Method::DELETE, &["events", id.as_str()])).await
    }

    async fn event_attendance(&self, event: &EventId) -> Result<Vec<AttendanceEntry>> {
        Self::fetch(self.request(Method::GET, &["attendance", "event", event.as_str()])).await
    }

    async fn set_attendance(
        &self,
        student: &StudentId,
        event: &EventId,
        status: AttendanceStatus,
    ) -> Result<()> {
        Self::execute(
            self.request(Method::PUT, &["attendance", student.as_str(), event.as_str()])
                .json(&json!({ "status": status.as_str() })),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn rfid_check_in(&self, rfid: &str, event: &EventId) -> Result<RfidCheckIn> {
        Self::fetch(
            self.request(Method::PUT, &["attendance", "rfid", rfid, event.as_str()])
                .json(&json!({ "status": AttendanceStatus::Present.as_str() })),
        )
        .await
    }

    async fn student_fines(&self, student: &StudentId) -> Result<Vec<Fine>> {
        Self::fetch(self.request(Method::GET, &["fines", "student", student.as_str()])).await
    }

    async fn set_fine_paid(&self, student: &StudentId, event: &EventId, paid: bool) -> Result<()> {
        Self::execute(
            self.request(
                Method::PUT,
                &["fines", "student", student.as_str(), "event", event.as_str()],
            )
            .json(&json!({ "isPaid": paid })),
        )
        .await
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Self::fetch(self.request(Method::GET, &["users"])).await
    }

    async fn create_user(&self, user: &UserPayload) -> Result<()> {
        Self::execute(self.request(Method::POST, &["users"]).json(user)).await
    }

    async fn update_user(&self, id: &UserId, user: &UserPayload) -> Result<()> {
        Self::execute(self.request(Method::PUT, &["users", id.as_str()]).json(user)).await
    }

    async fn delete_user(&self, id: &UserId) -> Result<()> {
        Self::execute(self.request(Method::DELETE, &["users", id.as_str()])).await
    }

    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    async fn login(&self, credentials: &Credentials) -> Result<Session> {
        Self::fetch(self.request(Method::POST, &["users", "login"]).json(credentials)).await
    }
}
