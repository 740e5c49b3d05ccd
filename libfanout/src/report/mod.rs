//! Turning a finished run into something an operator can read.
//!
//! Results are ordered by the target's position in the target list and then
//! by the command's position in the command list, never by completion time,
//! so the same inputs and the same remote outputs always render to the same
//! bytes.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use derive_getters::Getters;
use time::OffsetDateTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::executor::{CommandResult, Outcome};
use crate::log::*;
use crate::plan::Plan;

pub const DEFAULT_SEPARATOR: &str = "|";

/// Every result of a run, keyed by (target index, command index).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    results: BTreeMap<(usize, usize), CommandResult>,
}

impl ResultSet {
    /// Add a result. A second result for the same (target, command) pair is
    /// dropped; the first one wins.
    pub fn insert(&mut self, result: CommandResult) -> bool {
        let key = result.key();
        if self.results.contains_key(&key) {
            warn!(
                "duplicate result for {} / {}, keeping the first",
                result.target_address(),
                result.command()
            );
            return false;
        }
        self.results.insert(key, result);
        true
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results in report order.
    pub fn sorted(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.values()
    }

    /// Same as [`ResultSet::sorted`]; for callers that don't care about order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.values()
    }

    pub fn failures(&self) -> usize {
        self.iter().filter(|r| r.outcome().is_failure()).count()
    }

    /// Record a failure for every (target, command) pair of `plan` that has no
    /// result, for targets whose worker died before reporting. Returns how
    /// many pairs were filled.
    pub fn fill_missing(&mut self, plan: &Plan, targets: &HashSet<usize>, reason: &str) -> usize {
        let mut filled = 0;
        for target in plan.targets().iter().filter(|t| targets.contains(t.index())) {
            for (index, command) in plan.commands().iter().enumerate() {
                if !self.results.contains_key(&(*target.index(), index)) {
                    self.insert(CommandResult::new(
                        target,
                        index,
                        command,
                        Outcome::Failure(reason.to_string()),
                    ));
                    filled += 1;
                }
            }
        }
        filled
    }
}

impl Extend<CommandResult> for ResultSet {
    fn extend<T: IntoIterator<Item = CommandResult>>(&mut self, iter: T) {
        for result in iter {
            self.insert(result);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// `<target> <sep> <command> <sep> <line>`, one row per output line.
    #[default]
    Text,
    /// One JSON object per result.
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = color_eyre::eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(eyre!("unknown report format: {}", other)),
        }
    }
}

#[derive(Getters, Debug, Clone)]
pub struct Reporter {
    separator: String,
    format: ReportFormat,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR, ReportFormat::Text)
    }
}

impl Reporter {
    pub fn new<S: Into<String>>(separator: S, format: ReportFormat) -> Self {
        Self {
            separator: separator.into(),
            format,
        }
    }

    /// Render every result into report lines, in report order.
    pub fn render(&self, results: &ResultSet) -> Result<Vec<String>> {
        let mut lines = vec![];
        for result in results.sorted() {
            match self.format {
                ReportFormat::Text => {
                    for line in result.outcome().text().lines() {
                        lines.push(format!(
                            "{} {} {} {} {}",
                            result.target_address(),
                            self.separator,
                            result.command(),
                            self.separator,
                            line
                        ));
                    }
                }
                ReportFormat::Json => lines.push(
                    serde_json::to_string(result).wrap_err("Failed serializing result")?,
                ),
            }
        }
        Ok(lines)
    }

    /// Render and write the report, newline-terminated, to `out`.
    #[tracing::instrument(skip_all)]
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, results: &ResultSet, out: &mut W) -> Result<()> {
        let lines = self.render(results)?;
        for line in &lines {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
        out.flush().await?;
        debug!("wrote {} report lines", lines.len());
        Ok(())
    }
}

/// Where the report goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stdout,
    File(PathBuf),
}

impl ReportDestination {
    /// A file in `dir` named after the current UTC time.
    pub fn timestamped<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::timestamped_at(dir, OffsetDateTime::now_utc())
    }

    pub fn timestamped_at<P: AsRef<Path>>(dir: P, now: OffsetDateTime) -> Result<Self> {
        let stamp = now
            .to_offset(time::UtcOffset::UTC)
            .format(time::macros::format_description!(
                "[year][month][day]T[hour][minute][second]Z"
            ))
            .wrap_err("Failed formatting report timestamp")?;
        Ok(ReportDestination::File(
            dir.as_ref().join(format!("fanout-{stamp}.txt")),
        ))
    }

    pub async fn write(&self, reporter: &Reporter, results: &ResultSet) -> Result<()> {
        match self {
            ReportDestination::Stdout => reporter.write_to(results, &mut tokio::io::stdout()).await,
            ReportDestination::File(path) => {
                let mut file = tokio::fs::File::create(path)
                    .await
                    .wrap_err_with(|| format!("Failed creating report file {}", path.display()))?;
                reporter
                    .write_to(results, &mut file)
                    .await
                    .wrap_err_with(|| format!("Failed writing report file {}", path.display()))
            }
        }
    }
}

impl std::fmt::Display for ReportDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportDestination::Stdout => f.write_str("stdout"),
            ReportDestination::File(path) => write!(f, "{}", path.display()),
        }
    }
}
