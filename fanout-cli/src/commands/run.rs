use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::{Result, WrapErr};
use fanout::executor::ssh::{HostKeyPolicy, SshSessionClient};
use fanout::executor::{Credentials, Fleet, Scheduling};
use fanout::log::*;
use fanout::plan::Plan;
use fanout::report::{ReportDestination, ReportFormat, Reporter};

use super::Interactive;

pub const PASSWORD_ENV: &str = "FANOUT_PASSWORD";

pub struct RunCommand;

impl RunCommand {
    fn scheduling(&self, matches: &ArgMatches) -> Scheduling {
        if matches.get_flag("debug") {
            Scheduling::Sequential
        } else {
            Scheduling::Concurrent {
                max_parallel: matches.get_one::<usize>("max-parallel").copied(),
            }
        }
    }

    fn host_key_policy(&self, matches: &ArgMatches, plan: &Plan) -> Result<HostKeyPolicy> {
        if matches.get_flag("insecure") {
            warn!("host key verification is disabled");
            return Ok(HostKeyPolicy::Insecure);
        }
        let path = match matches.get_one::<String>("known-hosts") {
            Some(path) => path.into(),
            None => HostKeyPolicy::default_known_hosts_path()
                .ok_or_else(|| eyre!("couldn't find a home directory, pass --known-hosts or --insecure"))?,
        };
        debug!("checking host keys against {:?}", path);
        Ok(HostKeyPolicy::known_hosts(path, plan.targets()))
    }

    fn destination(&self, matches: &ArgMatches) -> Result<ReportDestination> {
        if matches.get_flag("timestamped") {
            let cwd = std::env::current_dir().wrap_err("Failed reading current directory")?;
            ReportDestination::timestamped(cwd)
        } else {
            Ok(match matches.get_one::<String>("output") {
                Some(path) => ReportDestination::File(path.into()),
                None => ReportDestination::Stdout,
            })
        }
    }

    fn credentials(&self, matches: &ArgMatches) -> Result<Credentials> {
        let user = self
            .read_argument_or_env(matches, "user", "USER")
            .wrap_err("No SSH user given, pass --user")?;
        let password = match std::env::var(PASSWORD_ENV) {
            Ok(password) => password,
            Err(_) => self.prompt_for_password("SSH password")?,
        };
        Ok(Credentials::new(user, password))
    }

    fn print_plan(&self, plan: &Plan) {
        println!("* targets:");
        for target in plan.targets() {
            println!("** {}", target);
        }
        println!("* commands:");
        for command in plan.commands().iter() {
            println!("** {}", command);
        }
    }
}

#[async_trait]
impl<'a> super::Command<'a> for RunCommand {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self {}
    }

    async fn run(&self, context: &'a super::CliContext) -> Result<()> {
        let matches = context.matches;
        let targets = self.read_argument(matches, "targets")?;
        let commands = self.read_argument(matches, "commands")?;
        let plan = Plan::load(&targets, &commands).await?;

        if matches.get_flag("dry") {
            self.print_plan(&plan);
            return Ok(());
        }

        let format: ReportFormat = self.read_argument(matches, "format")?.parse()?;
        let separator = self.read_argument(matches, "separator")?;
        let reporter = Reporter::new(separator, format);
        let destination = self.destination(matches)?;

        let client = SshSessionClient::new(self.host_key_policy(matches, &plan)?);
        let credentials = self.credentials(matches)?;
        let connect_timeout = matches
            .get_one::<u64>("connect-timeout")
            .copied()
            .map(Duration::from_secs)
            .unwrap_or(fanout::executor::worker::DEFAULT_CONNECT_TIMEOUT);
        let command_timeout = matches
            .get_one::<u64>("command-timeout")
            .copied()
            .map(Duration::from_secs);

        let fleet = Fleet::new(Arc::new(client), credentials)
            .with_scheduling(self.scheduling(matches))
            .with_connect_timeout(connect_timeout)
            .with_command_timeout(command_timeout);

        eprintln!(
            "* running {} commands on {} targets",
            plan.commands().len(),
            plan.targets().len()
        );
        let results = fleet.run(&plan).await?;
        eprintln!(
            "* finished: {} results, {} failed",
            results.len(),
            results.failures()
        );

        destination.write(&reporter, &results).await?;
        if let ReportDestination::File(_) = destination {
            eprintln!("* report written to {}", destination);
        }
        Ok(())
    }
}

impl<'a> super::Interactive<'a> for RunCommand {}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["fanout", "run", "-t", "hosts", "-c", "cmds"];
        argv.extend_from_slice(args);
        let matches = crate::cli().get_matches_from(argv);
        matches
            .subcommand_matches("run")
            .cloned()
            .expect("run subcommand")
    }

    #[test]
    fn test_debug_flag_runs_sequentially() {
        assert_eq!(Scheduling::Sequential, RunCommand.scheduling(&matches(&["--debug"])));
        assert_eq!(
            Scheduling::Concurrent {
                max_parallel: Some(8)
            },
            RunCommand.scheduling(&matches(&["--max-parallel", "8"]))
        );
        assert_eq!(Scheduling::default(), RunCommand.scheduling(&matches(&[])));
    }

    #[test]
    fn test_destination() -> Result<()> {
        assert_eq!(ReportDestination::Stdout, RunCommand.destination(&matches(&[]))?);
        assert_eq!(
            ReportDestination::File("out.txt".into()),
            RunCommand.destination(&matches(&["-o", "out.txt"]))?
        );
        match RunCommand.destination(&matches(&["--timestamped"]))? {
            ReportDestination::File(path) => {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                assert!(name.starts_with("fanout-") && name.ends_with("Z.txt"));
            }
            ReportDestination::Stdout => panic!("expected a file destination"),
        }
        Ok(())
    }

    #[test]
    fn test_explicit_known_hosts_path() -> Result<()> {
        let plan = Plan::new(["h1"], ["uptime"]);
        let policy = RunCommand.host_key_policy(&matches(&["--known-hosts", "/tmp/kh"]), &plan)?;
        match policy {
            HostKeyPolicy::KnownHosts { path, allowed } => {
                assert_eq!(std::path::PathBuf::from("/tmp/kh"), path);
                assert!(allowed.contains("h1:22"));
            }
            HostKeyPolicy::Insecure => panic!("expected a known_hosts policy"),
        }
        assert_eq!(
            HostKeyPolicy::Insecure,
            RunCommand.host_key_policy(&matches(&["--insecure"]), &plan)?
        );
        Ok(())
    }
}
