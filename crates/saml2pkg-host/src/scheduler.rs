use crate::{run_command, HostError};
use saml2pkg_store::write_atomic;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

const JOB_MARKER: &str = "# pfsense-saml2 job: ";

/// One periodic invocation registered with the host scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronJob {
    pub name: String,
    pub minute: String,
    pub hour: String,
    pub user: String,
    pub command: String,
}

impl CronJob {
    fn validate(&self) -> Result<(), HostError> {
        let invalid = |what: &str| HostError::Schedule(format!("job '{}': {what}", self.name));
        if self.name.is_empty() || self.name.contains(char::is_whitespace) {
            return Err(HostError::Schedule(format!(
                "job name '{}' must be a single word",
                self.name
            )));
        }
        for (field, value) in [("minute", &self.minute), ("hour", &self.hour)] {
            if value.is_empty()
                || !value
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | ',' | '-'))
            {
                return Err(invalid(&format!("invalid {field} field '{value}'")));
            }
        }
        if self.user.is_empty() || self.user.contains(char::is_whitespace) {
            return Err(invalid("invalid user"));
        }
        if self.command.trim().is_empty() || self.command.contains(['\n', '\r']) {
            return Err(invalid("command must be a single non-empty line"));
        }
        Ok(())
    }

    fn to_line(&self) -> String {
        format!(
            "{}\t{}\t*\t*\t*\t{}\t{}",
            self.minute, self.hour, self.user, self.command
        )
    }

    fn from_line(name: &str, line: &str) -> Option<Self> {
        let mut rest = line;
        let mut field = || {
            let trimmed = rest.trim_start();
            let end = trimmed.find(char::is_whitespace)?;
            let (value, tail) = trimmed.split_at(end);
            rest = tail;
            Some(value.to_owned())
        };
        let minute = field()?;
        let hour = field()?;
        for _ in 0..3 {
            field()?;
        }
        let user = field()?;
        // The command is kept verbatim; it may contain quoted whitespace.
        let command = rest.trim().to_owned();
        if command.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_owned(),
            minute,
            hour,
            user,
            command,
        })
    }
}

/// Registration of periodic jobs with the host.
///
/// `register` and `unregister` only change the pending job set; `apply`
/// makes it take effect.
pub trait HostScheduler {
    fn register(&mut self, job: CronJob) -> Result<(), HostError>;

    /// Returns whether a job with that name was registered.
    fn unregister(&mut self, name: &str) -> bool;

    fn jobs(&self) -> &[CronJob];

    fn apply(&self) -> Result<(), HostError>;
}

/// Scheduler backed by a dedicated system crontab file owned by this tool.
pub struct CronFileScheduler {
    path: PathBuf,
    apply_command: Option<Vec<String>>,
    jobs: Vec<CronJob>,
}

impl CronFileScheduler {
    /// Load the jobs already present in `path`. A missing file has no jobs.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HostError> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        let mut pending_name: Option<&str> = None;
        for line in content.lines() {
            if let Some(name) = line.strip_prefix(JOB_MARKER) {
                pending_name = Some(name.trim());
            } else if let Some(name) = pending_name.take() {
                if let Some(job) = CronJob::from_line(name, line) {
                    jobs.push(job);
                }
            }
        }
        debug!("loaded {} cron jobs from {}", jobs.len(), path.display());
        Ok(Self {
            path,
            apply_command: None,
            jobs,
        })
    }

    /// Command run after the file is written, for hosts that must be told
    /// to re-read their crontabs.
    #[must_use]
    pub fn with_apply_command(mut self, argv: Vec<String>) -> Self {
        self.apply_command = Some(argv);
        self
    }

    fn render(&self) -> String {
        let mut out = String::from("# Managed by pfsense-saml2. Do not edit.\n");
        for job in &self.jobs {
            out.push_str(JOB_MARKER);
            out.push_str(&job.name);
            out.push('\n');
            out.push_str(&job.to_line());
            out.push('\n');
        }
        out
    }
}

impl HostScheduler for CronFileScheduler {
    fn register(&mut self, job: CronJob) -> Result<(), HostError> {
        job.validate()?;
        self.jobs.retain(|j| j.name != job.name);
        self.jobs.push(job);
        Ok(())
    }

    fn unregister(&mut self, name: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.name != name);
        self.jobs.len() != before
    }

    fn jobs(&self) -> &[CronJob] {
        &self.jobs
    }

    fn apply(&self) -> Result<(), HostError> {
        if self.jobs.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => info!("removed {}", self.path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            write_atomic(&self.path, self.render().as_bytes())?;
            info!("wrote {} cron jobs to {}", self.jobs.len(), self.path.display());
        }
        if let Some(ref argv) = self.apply_command {
            run_command(argv)?;
        }
        Ok(())
    }
}
