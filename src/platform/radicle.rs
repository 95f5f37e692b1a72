//! Radicle adapter. Talks to the network through the `rad` command-line tool.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{Error, Result};
use crate::ident::parse_rid;
use crate::platform::{Category, CreatedItem, NewItem, Platform, RemoteItem, Side};

const ENV_RAD_BIN: &str = "RADSYNC_RAD_BIN";
const PLATFORM: &str = "radicle";

/// `rad issue list` prints abbreviated object ids while `rad issue open`
/// may print the full one; keys are normalized to this prefix length.
pub const SHORT_ID_LEN: usize = 7;

/// Runs an external program. Abstracted so tests can feed canned output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        cwd: Option<&Path>,
    ) -> io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct ProcessCommandRunner;

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        cwd: Option<&Path>,
    ) -> io::Result<Output> {
        let mut command = tokio::process::Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        command.output().await
    }
}

pub struct RadicleClient<R: CommandRunner = ProcessCommandRunner> {
    runner: R,
    binary: PathBuf,
    rid: String,
    checkout: Option<PathBuf>,
    timeout: Duration,
}

impl RadicleClient<ProcessCommandRunner> {
    pub async fn connect(
        rid: Option<String>,
        checkout: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        Self::connect_with_runner(ProcessCommandRunner, rid, checkout, timeout).await
    }
}

impl<R: CommandRunner> RadicleClient<R> {
    /// Build a client for `rid`. Without one, the repository is whatever
    /// `rad inspect` reports for the checkout (or the working directory), so
    /// the store is always bound to a real repository id.
    pub async fn connect_with_runner(
        runner: R,
        rid: Option<String>,
        checkout: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let binary = std::env::var_os(ENV_RAD_BIN)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("rad"));
        if binary.as_os_str().is_empty() {
            return Err(Error::Config(format!(
                "{ENV_RAD_BIN} is set but empty. Provide a valid rad binary path or unset it."
            )));
        }

        let mut client = Self {
            runner,
            binary,
            rid: String::new(),
            checkout,
            timeout,
        };
        client.rid = match rid {
            Some(rid) => parse_rid(&rid)?,
            None => client.inspect_rid().await?,
        };
        log::debug!("Using Radicle repository {}", client.rid);
        Ok(client)
    }

    async fn inspect_rid(&self) -> Result<String> {
        let location = self
            .checkout
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "the current directory".to_string());
        let unresolved = |detail: String| {
            Error::Config(format!(
                "could not determine the Radicle repository in {location} ({detail}); pass --rid"
            ))
        };

        let output = self
            .run_rad(&[OsString::from("inspect")])
            .await
            .map_err(|e| unresolved(e.to_string()))?;
        if !output.status.success() {
            return Err(unresolved(command_output_detail(&output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        parse_rid(line).map_err(|e| unresolved(e.to_string()))
    }

    fn list_args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from("issue"), OsString::from("list")];
        self.push_repo(&mut args);
        args
    }

    fn show_args(&self, id: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("issue"),
            OsString::from("show"),
            OsString::from(id),
        ];
        self.push_repo(&mut args);
        args
    }

    fn open_args(&self, item: &NewItem) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("issue"),
            OsString::from("open"),
            OsString::from("--title"),
            OsString::from(item.title.as_str()),
            OsString::from("--description"),
            OsString::from(item.body.as_str()),
        ];
        for label in &item.labels {
            args.push(OsString::from("--label"));
            args.push(OsString::from(label.as_str()));
        }
        self.push_repo(&mut args);
        args
    }

    fn push_repo(&self, args: &mut Vec<OsString>) {
        args.push(OsString::from("--repo"));
        args.push(OsString::from(self.rid.as_str()));
    }

    async fn run_rad(&self, args: &[OsString]) -> Result<Output> {
        log::debug!("Running {} {}", self.binary.display(), render_args(args));
        let call = self.runner.run(&self.binary, args, self.checkout.as_deref());
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(Error::unavailable(
                PLATFORM,
                format!(
                    "`rad {}` timed out after {}s",
                    render_args(args),
                    self.timeout.as_secs()
                ),
            )),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => Err(Error::unavailable(
                PLATFORM,
                format!(
                    "Radicle CLI `{}` was not found. Install radicle and run `rad auth`.",
                    self.binary.display()
                ),
            )),
            Ok(Err(e)) => Err(Error::unavailable(
                PLATFORM,
                format!("failed to execute `{}`: {e}", self.binary.display()),
            )),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

#[async_trait]
impl<R: CommandRunner> Platform for RadicleClient<R> {
    fn side(&self) -> Side {
        Side::A
    }

    fn name(&self) -> &str {
        PLATFORM
    }

    fn identifier(&self) -> String {
        self.rid.clone()
    }

    async fn list_items(
        &self,
        category: Category,
        limit: Option<usize>,
    ) -> Result<Vec<RemoteItem>> {
        if category == Category::Patches {
            return Err(Error::not_supported(PLATFORM, "patch listing"));
        }
        let args = self.list_args();
        let output = self.run_rad(&args).await?;
        if !output.status.success() {
            return Err(classify_failure(&output, false));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut items = Vec::new();
        for mut item in parse_issue_table(&stdout, Utc::now()) {
            item.url = Some(permalink(&self.rid, &item.id));
            items.push(item.validate(PLATFORM)?);
            if limit.is_some_and(|l| items.len() >= l) {
                break;
            }
        }
        log::debug!("Listed {} Radicle issues", items.len());
        Ok(items)
    }

    /// `rad issue list` has no descriptions; `rad issue show` supplies the
    /// body and the full object id for the permalink.
    async fn fetch_details(&self, category: Category, item: &RemoteItem) -> Result<RemoteItem> {
        if category == Category::Patches {
            return Err(Error::not_supported(PLATFORM, "patch details"));
        }
        let output = self.run_rad(&self.show_args(&item.id)).await?;
        if !output.status.success() {
            return Err(classify_failure(&output, false));
        }
        let details = parse_issue_show(&String::from_utf8_lossy(&output.stdout));

        let mut item = item.clone();
        item.body = details.body;
        let full_id = details.id.unwrap_or_else(|| item.id.clone());
        item.url = Some(permalink(&self.rid, &full_id));
        for label in details.labels {
            if !item.labels.contains(&label) {
                item.labels.push(label);
            }
        }
        Ok(item)
    }

    async fn create_item(&self, category: Category, item: &NewItem) -> Result<CreatedItem> {
        if category == Category::Patches {
            return Err(Error::not_supported(
                PLATFORM,
                "patch creation (requires branch management)",
            ));
        }
        let args = self.open_args(item);
        let output = self.run_rad(&args).await?;
        if !output.status.success() {
            return Err(classify_failure(&output, true));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = parse_opened_id(&stdout).ok_or_else(|| {
            Error::validation(
                PLATFORM,
                format!("could not find the new issue id in rad output: {}", stdout.trim()),
            )
        })?;
        Ok(CreatedItem {
            url: Some(permalink(&self.rid, &id)),
            id,
            updated_at: None,
        })
    }
}

fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn command_output_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("exit status {}", output.status)
}

/// Map a failed `rad` invocation onto the error taxonomy. A rejected create
/// is a validation failure; a failed listing means the repository could not
/// be read.
fn classify_failure(output: &Output, creating: bool) -> Error {
    let detail = command_output_detail(output);
    let lower = detail.to_lowercase();
    if lower.contains("rad auth")
        || lower.contains("passphrase")
        || lower.contains("not authenticated")
    {
        return Error::auth(PLATFORM, detail);
    }
    if creating {
        Error::validation(PLATFORM, detail)
    } else {
        Error::unavailable(PLATFORM, detail)
    }
}

/// Normalize an object id to the abbreviated form used as a mapping key.
pub fn canonical_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

fn issue_row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*│?\s*●\s+([0-9a-f]{7,40})\s+(.+?)\s*│?\s*$").unwrap())
}

fn column_split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

fn opened_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)issue\s+([0-9a-f]{7,40})").unwrap())
}

fn relative_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+|an?)\s+(second|minute|hour|day|week|month|year)s?\s+ago$").unwrap()
    })
}

fn show_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(Title|Issue|Author|Status|Labels|Assignees)\s{2,}(.*)$").unwrap()
    })
}

/// Reference to an issue in a Radicle repository, e.g.
/// `rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5/issues/4b7ad1f`.
pub fn permalink(rid: &str, id: &str) -> String {
    format!("{rid}/issues/{id}")
}

/// Turn the "Opened" column (`2 days ago`, `an hour ago`, `now`) into an
/// approximate timestamp relative to `now`.
pub fn parse_relative_time(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text == "now" || text == "just now" {
        return Some(now);
    }
    let caps = relative_time_regex().captures(text)?;
    let n: i64 = caps[1].parse().unwrap_or(1);
    let unit = match &caps[2] {
        "second" => chrono::Duration::seconds(1),
        "minute" => chrono::Duration::minutes(1),
        "hour" => chrono::Duration::hours(1),
        "day" => chrono::Duration::days(1),
        "week" => chrono::Duration::weeks(1),
        "month" => chrono::Duration::days(30),
        _ => chrono::Duration::days(365),
    };
    Some(now - unit * n as i32)
}

/// Parse the table printed by `rad issue list`.
///
/// Rows look like `│ ●   4b7ad1f   Title text   alias   z6Mk…   2 days ago │`.
/// Columns are separated by runs of two or more spaces. The id, title and
/// author columns are used, plus the trailing "Opened" column as an
/// approximate creation time. The table carries no description.
pub fn parse_issue_table(stdout: &str, now: DateTime<Utc>) -> Vec<RemoteItem> {
    let mut items = Vec::new();
    for line in stdout.lines() {
        let Some(caps) = issue_row_regex().captures(line) else {
            continue;
        };
        let id = canonical_id(&caps[1]);
        let columns: Vec<&str> = column_split_regex()
            .split(caps[2].trim())
            .filter(|c| !c.is_empty())
            .collect();
        let Some(title) = columns.first() else {
            continue;
        };
        let mut item = RemoteItem::new(id, title.trim());
        if columns.len() > 1 {
            item.author = columns[1].trim().to_string();
            item.created_at = columns.last().and_then(|c| parse_relative_time(c, now));
        }
        items.push(item);
    }
    items
}

/// Fields read from `rad issue show`.
#[derive(Debug, Default, PartialEq)]
pub struct IssueDetails {
    /// Full object id, when printed.
    pub id: Option<String>,
    pub body: String,
    pub labels: Vec<String>,
}

/// Parse the box printed by `rad issue show`: a block of `Field  value`
/// rows, a blank row, then the description up to the first separator.
pub fn parse_issue_show(stdout: &str) -> IssueDetails {
    let mut details = IssueDetails::default();
    let mut body: Vec<&str> = Vec::new();
    let mut in_body = false;

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('╭') {
            continue;
        }
        if trimmed.starts_with('├') || trimmed.starts_with('╰') {
            if in_body {
                break;
            }
            continue;
        }
        let inner = trimmed.trim_start_matches('│').trim_end_matches('│');
        let inner = inner.strip_prefix(' ').unwrap_or(inner).trim_end();

        if in_body {
            body.push(inner);
            continue;
        }
        if inner.is_empty() {
            in_body = true;
            continue;
        }
        if let Some(caps) = show_field_regex().captures(inner) {
            let value = caps[2].trim();
            match &caps[1] {
                "Issue" if !value.is_empty() => details.id = Some(value.to_string()),
                "Labels" => {
                    details.labels = value
                        .split(',')
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect()
                }
                _ => {}
            }
        }
    }

    details.body = body.join("\n").trim().to_string();
    details
}

/// Extract the new issue id from `rad issue open` output, e.g.
/// `✓ Issue 4b7ad1f opened`.
pub fn parse_opened_id(stdout: &str) -> Option<String> {
    opened_id_regex()
        .captures(stdout)
        .map(|caps| canonical_id(&caps[1]))
}
