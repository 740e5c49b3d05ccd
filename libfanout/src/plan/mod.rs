use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use derive_getters::Getters;
use tokio::fs;

use crate::log::*;

pub mod host;

use self::host::Target;

/// What a run is going to do: every command in `commands`, in order, against
/// every target in `targets`.
#[derive(Getters, Debug, Clone)]
pub struct Plan {
    targets: Vec<Target>,
    commands: Arc<[String]>,
}

impl Plan {
    /// Build a plan from raw target and command entries. Targets are
    /// normalized, commands are taken as-is.
    pub fn new<T, C>(targets: T, commands: C) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            targets: targets
                .into_iter()
                .enumerate()
                .map(|(index, address)| Target::new(index, address))
                .collect(),
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// Load the target list and the command list from disk. Either file
    /// being unreadable is fatal.
    #[tracing::instrument(skip_all)]
    pub async fn load<P: AsRef<Path>, Q: AsRef<Path>>(targets: P, commands: Q) -> Result<Self> {
        let targets = read_entries(targets.as_ref())
            .await
            .wrap_err("Failed reading targets file")?;
        let commands = read_entries(commands.as_ref())
            .await
            .wrap_err("Failed reading commands file")?;
        let plan = Self::new(targets, commands);
        debug!(
            "plan: loaded {} targets and {} commands",
            plan.targets.len(),
            plan.commands.len()
        );
        Ok(plan)
    }

    /// The number of results a complete run of this plan produces.
    pub fn expected_results(&self) -> usize {
        self.targets.len() * self.commands.len()
    }
}

/// Read a line-oriented list file. See [`parse_entries`].
pub async fn read_entries(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("couldn't read {}", path.display()))?;
    Ok(parse_entries(&contents))
}

/// One entry per line. Lines are trimmed, and blank lines and `#` comments
/// are dropped.
pub fn parse_entries(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
