#![forbid(unsafe_code)]

use clap::{command, value_parser, Arg, ArgAction};
use color_eyre::eyre::Result;
use tracing_subscriber::util::SubscriberInitExt;

use crate::commands::Command;

mod commands;

use fanout::log::*;

fn cli() -> clap::Command {
    command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Turn debugging information on. Overrides -q. Can specify up to -vvvv.")
                .action(ArgAction::Count)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Silence all log output. The report is still written. Overridden by -v.")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            command!("run")
                .about("Run every command against every target and report the results.")
                .arg(
                    Arg::new("targets")
                        .help("Path to the targets file, one host[:port] per line.")
                        .short('t')
                        .long("targets")
                        .required(true),
                )
                .arg(
                    Arg::new("commands")
                        .help("Path to the commands file, one command per line.")
                        .short('c')
                        .long("commands")
                        .required(true),
                )
                .arg(
                    Arg::new("user")
                        .help("SSH user. Defaults to $USER.")
                        .short('u')
                        .long("user"),
                )
                .arg(
                    Arg::new("separator")
                        .help("Separator between the columns of the report.")
                        .short('s')
                        .long("separator")
                        .default_value(fanout::report::DEFAULT_SEPARATOR),
                )
                .arg(
                    Arg::new("output")
                        .help("Write the report to this file instead of stdout.")
                        .short('o')
                        .long("output")
                        .conflicts_with("timestamped"),
                )
                .arg(
                    Arg::new("timestamped")
                        .help("Write the report to a file in the current directory named after the current UTC time.")
                        .long("timestamped")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("format")
                        .help("Report format.")
                        .long("format")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    Arg::new("insecure")
                        .help("Don't verify host keys.")
                        .long("insecure")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("known-hosts"),
                )
                .arg(
                    Arg::new("known-hosts")
                        .help("Path to the known_hosts file. Defaults to ~/.ssh/known_hosts.")
                        .long("known-hosts"),
                )
                .arg(
                    Arg::new("debug")
                        .help("Run one target at a time instead of all at once.")
                        .short('d')
                        .long("debug")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("max-parallel")
                        .help("Maximum number of targets to run at once. Unlimited by default.")
                        .long("max-parallel")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("connect-timeout")
                        .help("Seconds to wait for a target to connect and authenticate.")
                        .long("connect-timeout")
                        .value_parser(value_parser!(u64))
                        .default_value("10"),
                )
                .arg(
                    Arg::new("command-timeout")
                        .help("Seconds to wait for each command. No limit by default.")
                        .long("command-timeout")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("dry")
                        .help("Don't connect to anything, just show the targets and commands that would run.")
                        .long("dry")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand_required(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre()?;

    let matches = cli().get_matches();

    // Set up logging. Logs go to stderr so they never mix with a report on
    // stdout.
    let level = level_filter(matches.get_flag("quiet"), matches.get_count("verbose"));
    let subscriber = tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::new(
            time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ))
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .compact()
        .finish();
    subscriber.init();

    let Some((subcommand, matches)) = matches.subcommand() else {
        return Err(commands::CommandErrors::NoSubcommandProvided.into());
    };
    let ctx = commands::CliContext::new(matches);
    debug!(
        "matched subcommand {} with matches: {:?}",
        &subcommand,
        &matches.ids().map(|id| id.as_str()).collect::<Vec<_>>()
    );
    match subcommand {
        "run" => commands::run::RunCommand::new().run(&ctx).await?,
        _ => return Err(commands::CommandErrors::InvalidSubcommand(subcommand.to_string()).into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_run_requires_targets_and_commands() {
        assert!(cli().try_get_matches_from(["fanout", "run", "-c", "cmds"]).is_err());
        assert!(cli()
            .try_get_matches_from(["fanout", "run", "-t", "hosts", "-c", "cmds"])
            .is_ok());
    }

    #[test]
    fn test_insecure_conflicts_with_known_hosts() {
        let result = cli().try_get_matches_from([
            "fanout",
            "run",
            "-t",
            "hosts",
            "-c",
            "cmds",
            "--insecure",
            "--known-hosts",
            "/tmp/kh",
        ]);
        assert!(result.is_err());
    }
}
