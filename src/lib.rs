//! Client for the student-organization attendance backend: records,
//! filtered and paginated views, bulk actions, RFID check-in and export.

pub mod api;
pub mod auth;
pub mod bulk;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod fines;
pub mod forms;
pub mod model;
pub mod notice;
pub mod paginate;
pub mod rfid;
pub mod selection;
pub mod users;
pub mod view;

pub use api::{AttendanceApi, HttpApi};
pub use config::Config;
pub use dashboard::Dashboard;
pub use error::{Error, Result};
