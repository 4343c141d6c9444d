use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use rollcall::api::{AttendanceApi, Credentials, HttpApi};
use rollcall::auth::{LoginGuard, Session, StateStore};
use rollcall::bulk::BulkAction;
use rollcall::dashboard::Dashboard;
use rollcall::export::{self, ExportFormat};
use rollcall::fines::{self, FinePolicy, FineSort};
use rollcall::forms::{EventForm, StudentForm, UserForm};
use rollcall::model::{AttendanceStatus, Choice, EventId, Scope, StudentId, Table, UserId};
use rollcall::notice::NoticeKind;
use rollcall::paginate::PageSize;
use rollcall::view::{Filters, SortDirection, SortKey, parse_filter};
use rollcall::{Config, Error, users};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/rollcall/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, e.g. http://localhost:5000/api
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Where the session and login-attempt files live
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and remember the session
    Login {
        username: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in account
    Whoami,
    #[command(subcommand)]
    Students(StudentsCommand),
    #[command(subcommand)]
    Events(EventsCommand),
    #[command(subcommand)]
    Attendance(AttendanceCommand),
    /// Read RFID taps from stdin and mark each student present
    Checkin {
        #[arg(short, long)]
        event: String,
    },
    #[command(subcommand)]
    Fines(FinesCommand),
    #[command(subcommand)]
    Users(UsersCommand),
    /// Write the filtered, sorted table to a spreadsheet
    Export {
        #[arg(short, long, default_value = "attendance")]
        table: Table,
        #[arg(short, long)]
        event: Option<String>,
        #[arg(short, long, default_value = "xlsx")]
        format: ExportFormat,
        /// Output directory (default: export_dir from config)
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        list: ListArgs,
    },
}

#[derive(Subcommand, Debug)]
enum StudentsCommand {
    List(ListArgs),
    Add(StudentArgs),
    Edit {
        id: String,
        #[command(flatten)]
        fields: StudentArgs,
    },
    /// Delete the given students that are on the listed page
    Delete {
        ids: Vec<String>,
        /// Select every row on the page
        #[arg(long)]
        all: bool,
        /// I understand this cannot be undone
        #[arg(long)]
        confirm: bool,
        #[command(flatten)]
        list: ListArgs,
    },
    Metrics {
        id: String,
    },
}

#[derive(Args, Debug, Default)]
struct StudentArgs {
    #[arg(long)]
    student_id: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    course: Option<String>,
    #[arg(long)]
    year: Option<String>,
    #[arg(long)]
    section: Option<String>,
    #[arg(long)]
    rfid: Option<String>,
}

impl StudentArgs {
    fn apply(self, form: &mut StudentForm) {
        let set = |slot: &mut String, v: Option<String>| {
            if let Some(v) = v {
                *slot = v;
            }
        };
        set(&mut form.student_id, self.student_id);
        set(&mut form.name, self.name);
        set(&mut form.course, self.course);
        set(&mut form.year, self.year);
        set(&mut form.section, self.section);
        set(&mut form.rfid, self.rfid);
    }
}

#[derive(Subcommand, Debug)]
enum EventsCommand {
    List {
        /// Only events on this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    Add(EventArgs),
    Edit {
        id: String,
        #[command(flatten)]
        fields: EventArgs,
    },
    Delete {
        id: String,
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Args, Debug, Default)]
struct EventArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    fine: Option<String>,
    /// Comma-separated, or "all"
    #[arg(long)]
    courses: Option<String>,
    #[arg(long)]
    sections: Option<String>,
    #[arg(long)]
    years: Option<String>,
}

fn parse_scope<T: Choice>(s: &str) -> Result<Scope<T>> {
    if s.trim().eq_ignore_ascii_case("all") {
        return Ok(Scope::All);
    }
    let mut scope = Scope::none();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let v = T::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(part))
            .with_context(|| format!("unknown value '{}'", part))?;
        scope.set(v, true);
    }
    Ok(scope)
}

impl EventArgs {
    fn apply(self, form: &mut EventForm) -> Result<()> {
        if let Some(v) = self.title {
            form.title = v;
        }
        if let Some(v) = self.date {
            form.date = v;
        }
        if let Some(v) = self.location {
            form.location = v;
        }
        if let Some(v) = self.fine {
            form.fine = v;
        }
        if let Some(v) = self.courses {
            form.eligibility.courses = parse_scope(&v)?;
        }
        if let Some(v) = self.sections {
            form.eligibility.sections = parse_scope(&v)?;
        }
        if let Some(v) = self.years {
            form.eligibility.school_years = parse_scope(&v)?;
        }
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
enum AttendanceCommand {
    List {
        #[arg(short, long)]
        event: String,
        #[command(flatten)]
        list: ListArgs,
    },
    Set {
        #[arg(short, long)]
        event: String,
        student: String,
        status: AttendanceStatus,
    },
    /// Set one status for the given students on the listed page
    Bulk {
        #[arg(short, long)]
        event: String,
        status: AttendanceStatus,
        ids: Vec<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        confirm: bool,
        #[command(flatten)]
        list: ListArgs,
    },
}

#[derive(Subcommand, Debug)]
enum FinesCommand {
    List {
        student: String,
        #[arg(long, default_value = "event")]
        sort: FineSort,
        #[arg(long)]
        desc: bool,
    },
    Pay {
        student: String,
        event: String,
    },
    Unpay {
        student: String,
        event: String,
    },
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    List,
    Add {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        role: String,
    },
    Edit {
        id: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    Delete {
        id: String,
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Args, Debug, Default)]
struct ListArgs {
    #[arg(short, long)]
    search: Option<String>,
    #[arg(long)]
    course: Option<String>,
    #[arg(long)]
    year: Option<String>,
    #[arg(long)]
    section: Option<String>,
    #[arg(long)]
    sort: Option<SortKey>,
    #[arg(long)]
    desc: bool,
    #[arg(long)]
    page: Option<String>,
    #[arg(long)]
    page_size: Option<PageSize>,
}

impl ListArgs {
    fn filters(&self) -> Result<Filters> {
        let opt = |s: &Option<String>| s.as_deref().unwrap_or("all").to_string();
        Ok(Filters {
            search: self.search.clone().unwrap_or_default(),
            course: parse_filter(&opt(&self.course)).map_err(anyhow::Error::msg)?,
            year: parse_filter(&opt(&self.year)).map_err(anyhow::Error::msg)?,
            section: parse_filter(&opt(&self.section)).map_err(anyhow::Error::msg)?,
        })
    }

    /// Call after the table's rows are loaded so the page number can be
    /// checked against them.
    fn apply(&self, dash: &mut Dashboard) -> Result<()> {
        dash.set_filters(self.filters()?);
        let direction = if self.desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        dash.set_sort(self.sort.unwrap_or(SortKey::Name), direction);
        if let Some(size) = self.page_size {
            dash.set_page_size(size);
        }
        if let Some(page) = &self.page {
            dash.goto_page(page);
        }
        Ok(())
    }
}

struct App {
    config: Config,
    store: StateStore,
    api: Arc<HttpApi>,
    session: Option<Session>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let store = StateStore::new(&config.state_dir);
        let session = store.load_session()?;
        let api = HttpApi::new(&config.api_base_url, config.request_timeout())?
            .with_session(session.as_ref());
        Ok(Self {
            config,
            store,
            api: Arc::new(api),
            session,
        })
    }

    fn dashboard(&self) -> Dashboard {
        let api: Arc<dyn AttendanceApi> = self.api.clone();
        Dashboard::new(api, self.session.clone())
            .with_page_size(self.config.page_size)
            .with_fine_policy(FinePolicy {
                allow_unpay: self.config.fines.allow_unpay,
            })
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| Error::NotLoggedIn.into())
    }

    fn guard(&self) -> LoginGuard {
        LoginGuard::new(
            self.store.clone(),
            self.config.login.max_attempts,
            self.config.lockout(),
        )
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rollcall=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    println!("{}", line(headers.to_vec()));
    for row in rows {
        println!("{}", line(row.iter().map(String::as_str).collect()));
    }
}

fn print_page(dash: &mut Dashboard) {
    let table = dash.table();
    let page = dash.page();
    let rows = export::export_rows(table, &page.rows);
    print_table(export::columns(table), &rows);
    println!(
        "Page {} of {} ({} rows)",
        page.page, page.total_pages, page.total_rows
    );
}

/// Prints pending notices; returns whether any was an error.
fn print_notices(dash: &mut Dashboard) -> bool {
    let mut had_error = false;
    for n in dash.notices.drain() {
        had_error |= n.kind == NoticeKind::Error;
        println!("{}", n);
    }
    had_error
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn open_event(dash: &mut Dashboard, event: &str) -> Result<()> {
    dash.load_events().await?;
    dash.select_event(Some(EventId::from(event))).await?;
    Ok(())
}

async fn run_bulk(
    dash: &mut Dashboard,
    action: BulkAction,
    ids: &[String],
    all: bool,
    confirm: bool,
) -> Result<()> {
    for id in ids {
        dash.set_row_selected(&StudentId::from(id.as_str()), true);
    }
    if all {
        dash.toggle_page_selection();
    }
    let picked = dash.selection().len();
    let on_page = dash.selected_on_page().len();
    if on_page < picked {
        dash.notices.warning(format!(
            "{} of the given students are not on this page and were skipped",
            picked - on_page
        ));
    }
    dash.open_bulk(action)?;
    dash.acknowledge_bulk(confirm);
    let report = dash.confirm_bulk().await?;
    for (id, e) in &report.failed {
        println!("{}: {}", id, e.user_message("request failed"));
    }
    Ok(())
}

async fn run(app: &App, dash: &mut Dashboard, command: Command) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            let guard = app.guard();
            let credentials = Credentials { username, password };
            match users::login(app.api.as_ref(), &guard, &app.store, &credentials, Utc::now())
                .await
            {
                Ok(session) => println!(
                    "Logged in as {} ({})",
                    session.user.username,
                    session.user.role.label()
                ),
                Err(e @ Error::Api { .. }) => bail!(
                    "{} ({} attempt(s) left)",
                    e.user_message("Login failed. Please check your credentials."),
                    guard.remaining_attempts()?
                ),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Logout => {
            users::logout(&app.store)?;
            println!("Logged out");
        }
        Command::Whoami => match &app.session {
            Some(s) => println!("{} ({})", s.user.username, s.user.role.label()),
            None => println!("Not logged in"),
        },

        Command::Students(cmd) => match cmd {
            StudentsCommand::List(list) => {
                dash.set_table(Table::Students);
                dash.load_students().await?;
                list.apply(dash)?;
                print_page(dash);
            }
            StudentsCommand::Add(fields) => {
                let mut form = StudentForm::default();
                fields.apply(&mut form);
                dash.add_student(&form).await?;
            }
            StudentsCommand::Edit { id, fields } => {
                dash.load_students().await?;
                let id = StudentId::from(id);
                let current = dash
                    .students()
                    .iter()
                    .find(|s| s.student_id == id)
                    .ok_or_else(|| Error::NotFound(format!("student {}", id)))?;
                let mut form = StudentForm::from_student(current);
                fields.apply(&mut form);
                dash.update_student(&id, &form).await?;
            }
            StudentsCommand::Delete {
                ids,
                all,
                confirm,
                list,
            } => {
                dash.set_table(Table::Students);
                dash.load_students().await?;
                list.apply(dash)?;
                run_bulk(dash, BulkAction::Delete, &ids, all, confirm).await?;
            }
            StudentsCommand::Metrics { id } => {
                let m = dash.student_metrics(&StudentId::from(id)).await?;
                println!(
                    "{} ({}) {} {}-{}",
                    m.student.name, m.student.student_id, m.student.course, m.student.year, m.student.section
                );
                println!(
                    "Events: {}  Present: {}  Absent: {}  Excused: {}  Rate: {}%",
                    m.summary.total_events,
                    m.summary.present,
                    m.summary.absent,
                    m.summary.excused,
                    m.summary.attendance_rate
                );
                let rows: Vec<Vec<String>> = m
                    .attendance_records
                    .iter()
                    .map(|r| {
                        vec![
                            r.event_date.clone(),
                            r.event_title.clone(),
                            r.location.clone(),
                            r.status.map(|s| s.label()).unwrap_or("-").to_string(),
                        ]
                    })
                    .collect();
                print_table(&["Date", "Event", "Location", "Status"], &rows);
            }
        },

        Command::Events(cmd) => match cmd {
            EventsCommand::List { date } => {
                let events = match date {
                    Some(d) => {
                        let day = rollcall::model::parse_event_date(&d).map_err(anyhow::Error::msg)?;
                        dash.events_on(day).await?
                    }
                    None => {
                        dash.load_events().await?;
                        dash.events().to_vec()
                    }
                };
                let rows: Vec<Vec<String>> = events
                    .iter()
                    .map(|e| {
                        vec![
                            e.id.to_string(),
                            e.date.format("%Y-%m-%d").to_string(),
                            e.title.clone(),
                            e.location.clone(),
                            e.fine.to_string(),
                            format!(
                                "{} / {} / {}",
                                e.eligibility.courses.describe(),
                                e.eligibility.school_years.describe(),
                                e.eligibility.sections.describe()
                            ),
                        ]
                    })
                    .collect();
                print_table(
                    &["Id", "Date", "Title", "Location", "Fine", "Courses / Years / Sections"],
                    &rows,
                );
            }
            EventsCommand::Add(fields) => {
                let mut form = EventForm {
                    fine: "0".into(),
                    ..EventForm::default()
                };
                fields.apply(&mut form)?;
                let event = dash.add_event(&form).await?;
                println!("{}", event.id);
            }
            EventsCommand::Edit { id, fields } => {
                dash.load_events().await?;
                let id = EventId::from(id);
                let current = dash
                    .events()
                    .iter()
                    .find(|e| e.id == id)
                    .ok_or_else(|| Error::NotFound(format!("event {}", id)))?;
                let mut form = EventForm::from_event(current);
                fields.apply(&mut form)?;
                dash.edit_event(&id, &form).await?;
            }
            EventsCommand::Delete { id, confirm } => {
                if !confirm {
                    return Err(Error::NotAcknowledged.into());
                }
                dash.load_events().await?;
                dash.delete_event(&EventId::from(id)).await?;
            }
        },

        Command::Attendance(cmd) => match cmd {
            AttendanceCommand::List { event, list } => {
                dash.set_table(Table::Attendance);
                open_event(dash, &event).await?;
                list.apply(dash)?;
                print_page(dash);
            }
            AttendanceCommand::Set {
                event,
                student,
                status,
            } => {
                open_event(dash, &event).await?;
                dash.set_status(&StudentId::from(student), status).await?;
            }
            AttendanceCommand::Bulk {
                event,
                status,
                ids,
                all,
                confirm,
                list,
            } => {
                dash.set_table(Table::Attendance);
                open_event(dash, &event).await?;
                list.apply(dash)?;
                run_bulk(dash, BulkAction::SetStatus(status), &ids, all, confirm).await?;
            }
        },

        Command::Checkin { event } => {
            open_event(dash, &event).await?;
            dash.open_check_in()?;
            let title = dash
                .selected_event()
                .map(|e| e.title.clone())
                .unwrap_or_else(|| event.clone());
            println!("Scanning for {}. Tap cards; 'q' or end of input stops.", title);
            print_notices(dash);
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().eq_ignore_ascii_case("q") {
                    break;
                }
                // failures are already in the notices; keep scanning
                let _ = dash.check_in(&line).await;
                print_notices(dash);
            }
            dash.close_check_in();
        }

        Command::Fines(cmd) => match cmd {
            FinesCommand::List {
                student,
                sort,
                desc,
            } => {
                let direction = if desc {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                };
                let list = dash
                    .fines(&StudentId::from(student), sort, direction)
                    .await?;
                let rows: Vec<Vec<String>> = list
                    .iter()
                    .map(|f| {
                        vec![
                            f.event_id.to_string(),
                            f.event_title.clone(),
                            f.amount.to_string(),
                            if f.is_paid { "Paid" } else { "Unpaid" }.to_string(),
                        ]
                    })
                    .collect();
                print_table(&["Event", "Title", "Amount", "Status"], &rows);
                println!("Total unpaid: {}", fines::total_unpaid(&list));
            }
            FinesCommand::Pay { student, event } => {
                dash.set_fine_paid(&StudentId::from(student), &EventId::from(event), true)
                    .await?;
            }
            FinesCommand::Unpay { student, event } => {
                dash.set_fine_paid(&StudentId::from(student), &EventId::from(event), false)
                    .await?;
            }
        },

        Command::Users(cmd) => {
            let session = app.session()?;
            let api = app.api.as_ref();
            match cmd {
                UsersCommand::List => {
                    let rows: Vec<Vec<String>> = users::list(api, session)
                        .await?
                        .iter()
                        .map(|u| {
                            vec![
                                u.id.to_string(),
                                u.username.clone(),
                                u.role.label().to_string(),
                            ]
                        })
                        .collect();
                    print_table(&["Id", "Username", "Role"], &rows);
                }
                UsersCommand::Add {
                    username,
                    password,
                    role,
                } => {
                    let form = UserForm {
                        username,
                        password,
                        role,
                    };
                    users::create(api, session, &form).await?;
                    println!("User created");
                }
                UsersCommand::Edit {
                    id,
                    username,
                    password,
                    role,
                } => {
                    let id = UserId::from(id);
                    let current = users::list(api, session)
                        .await?
                        .into_iter()
                        .find(|u| u.id == id)
                        .ok_or_else(|| Error::NotFound(format!("user {}", id)))?;
                    let form = UserForm {
                        username: username.unwrap_or(current.username),
                        password: password.unwrap_or_default(),
                        role: role.unwrap_or_else(|| current.role.as_str().to_string()),
                    };
                    users::update(api, session, &id, &form).await?;
                    println!("User updated");
                }
                UsersCommand::Delete { id, confirm } => {
                    if !confirm {
                        return Err(Error::NotAcknowledged.into());
                    }
                    users::delete(api, session, &UserId::from(id)).await?;
                    println!("User deleted");
                }
            }
        }

        Command::Export {
            table,
            event,
            format,
            out,
            list,
        } => {
            dash.set_table(table);
            match table {
                Table::Students => dash.load_students().await?,
                Table::Attendance => {
                    let event = event.context("--event is required for the attendance table")?;
                    open_event(dash, &event).await?;
                }
            }
            list.apply(dash)?;
            let dir = out.unwrap_or_else(|| app.config.export_dir.clone());
            let path = dash.export(format, &dir, Utc::now().date_naive())?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::resolve(cli.config, cli.api_url, cli.state_dir)?;
    let app = App::new(config)?;
    let mut dash = app.dashboard();

    let result = run(&app, &mut dash, cli.command).await;
    let had_error = print_notices(&mut dash);
    match result {
        Err(_) if had_error => std::process::exit(1),
        other => other,
    }
}
