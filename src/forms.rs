//! Form input validation. Nothing here touches the network; a form that
//! fails validation never becomes a request.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{
    parse_event_date, Amount, Course, Eligibility, Event, Role, Section, Student, StudentId, Year,
};

/// Body of `POST /students` and `PUT /students/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewStudent {
    pub student_id: StudentId,
    pub name: String,
    pub course: Course,
    pub year: Year,
    pub section: Section,
    pub rfid: String,
}

impl NewStudent {
    pub fn to_student(&self) -> Student {
        Student {
            student_id: self.student_id.clone(),
            name: self.name.clone(),
            course: self.course,
            year: self.year,
            section: self.section,
            rfid: Some(self.rfid.clone()).filter(|r| !r.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StudentForm {
    pub student_id: String,
    pub name: String,
    pub course: String,
    pub year: String,
    pub section: String,
    pub rfid: String,
}

fn required(field: &'static str, value: &str) -> Result<String> {
    let v = value.trim();
    if v.is_empty() {
        Err(Error::validation(field, "is required"))
    } else {
        Ok(v.to_string())
    }
}

fn choice<T: std::str::FromStr<Err = String>>(field: &'static str, value: &str) -> Result<T> {
    value.parse().map_err(|e: String| Error::validation(field, e))
}

impl StudentForm {
    pub fn from_student(s: &Student) -> Self {
        Self {
            student_id: s.student_id.to_string(),
            name: s.name.clone(),
            course: s.course.to_string(),
            year: s.year.to_string(),
            section: s.section.to_string(),
            rfid: s.rfid.clone().unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<NewStudent> {
        Ok(NewStudent {
            student_id: StudentId(required("student id", &self.student_id)?),
            name: required("name", &self.name)?,
            course: choice("course", &self.course)?,
            year: choice("year", &self.year)?,
            section: choice("section", &self.section)?,
            rfid: self.rfid.trim().to_string(),
        })
    }
}

/// Body of `POST /events/` and `PUT /events/:id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPayload {
    pub title: String,
    pub event_date: NaiveDate,
    pub location: String,
    pub fine: Amount,
    #[serde(flatten)]
    pub eligibility: Eligibility,
}

#[derive(Debug, Clone, Default)]
pub struct EventForm {
    pub title: String,
    pub date: String,
    pub location: String,
    pub fine: String,
    pub eligibility: Eligibility,
}

impl EventForm {
    pub fn from_event(e: &Event) -> Self {
        Self {
            title: e.title.clone(),
            date: e.date.format("%Y-%m-%d").to_string(),
            location: e.location.clone(),
            fine: e.fine.to_string(),
            eligibility: e.eligibility.clone(),
        }
    }

    pub fn validate(&self) -> Result<EventPayload> {
        let title = required("title", &self.title)?;
        let event_date =
            parse_event_date(&self.date).map_err(|e| Error::validation("date", e))?;
        let fine: Amount = self
            .fine
            .parse()
            .map_err(|_| Error::validation("fine", "Please enter a valid positive number"))?;
        Ok(EventPayload {
            title,
            event_date,
            location: self.location.trim().to_string(),
            fine,
            eligibility: self.eligibility.clone(),
        })
    }
}

/// Body of `POST /users` and `PUT /users/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPayload {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Default)]
pub struct UserForm {
    pub username: String,
    pub password: String,
    pub role: String,
}

impl UserForm {
    /// A new account needs a password; on edit an empty one keeps the old.
    pub fn validate(&self, creating: bool) -> Result<UserPayload> {
        let username = required("username", &self.username)?;
        let password = match (creating, self.password.is_empty()) {
            (true, true) => return Err(Error::validation("password", "is required")),
            (false, true) => None,
            (_, false) => Some(self.password.clone()),
        };
        Ok(UserPayload {
            username,
            password,
            role: choice("role", &self.role)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scope;
    use serde_json::json;

    fn student_form() -> StudentForm {
        StudentForm {
            student_id: " 23-0001 ".into(),
            name: "Ana Cruz".into(),
            course: "BSIT".into(),
            year: "1".into(),
            section: "a".into(),
            rfid: "  ".into(),
        }
    }

    #[test]
    fn student_payload_is_lowercase_and_trimmed() {
        let p = student_form().validate().unwrap();
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(
            v,
            json!({
                "student_id": "23-0001",
                "name": "Ana Cruz",
                "course": "bsit",
                "year": "1",
                "section": "a",
                "rfid": ""
            })
        );
        assert_eq!(p.to_student().rfid, None);
    }

    #[test]
    fn student_form_rejects_unknown_course() {
        let mut f = student_form();
        f.course = "BSED".into();
        assert!(matches!(f.validate(), Err(Error::Validation { field: "course", .. })));
    }

    #[test]
    fn negative_fine_is_rejected_inline() {
        let f = EventForm {
            title: "Assembly".into(),
            date: "2024-03-01".into(),
            location: "Gym".into(),
            fine: "-5".into(),
            eligibility: Eligibility::default(),
        };
        match f.validate() {
            Err(Error::Validation { field, message }) => {
                assert_eq!(field, "fine");
                assert_eq!(message, "Please enter a valid positive number");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn event_payload_carries_eligibility_flags() {
        let mut eligibility = Eligibility::default();
        eligibility.courses = Scope::none();
        eligibility.courses.set(Course::Bshm, true);
        let f = EventForm {
            title: "Seminar".into(),
            date: "2024-05-02".into(),
            location: String::new(),
            fine: "10".into(),
            eligibility,
        };
        let v = serde_json::to_value(f.validate().unwrap()).unwrap();
        assert_eq!(v["event_date"], json!("2024-05-02"));
        assert_eq!(v["fine"], json!(10.0));
        assert_eq!(v["courses"]["bshm"], json!(true));
        assert_eq!(v["courses"]["all"], json!(false));
        assert_eq!(v["schoolYears"]["all"], json!(true));
    }

    #[test]
    fn user_password_rules() {
        let mut f = UserForm {
            username: "vp".into(),
            password: String::new(),
            role: "vice_president".into(),
        };
        assert!(f.validate(true).is_err());
        let edit = f.validate(false).unwrap();
        assert_eq!(edit.password, None);
        assert!(!serde_json::to_value(&edit).unwrap().as_object().unwrap().contains_key("password"));
        f.password = "secret".into();
        assert_eq!(f.validate(true).unwrap().role, Role::Moderator);
    }
}
