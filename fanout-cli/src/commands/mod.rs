use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::{Result, WrapErr};
use dialoguer::Password;
use thiserror::Error;

pub mod run;

#[derive(Error, Debug)]
pub enum CommandErrors {
    #[error("Prompt interaction failed.")]
    PromptInteractionFailed(
        #[from]
        #[source]
        dialoguer::Error,
    ),
    #[error("Required user input `{0}` is missing.")]
    RequiredUserInputMissing(String),
    #[error("Invalid subcommand `{0}`.")]
    InvalidSubcommand(String),
    #[error("No subcommand provided.")]
    NoSubcommandProvided,
}

pub struct CliContext<'a> {
    pub matches: &'a ArgMatches,
}

impl<'a> CliContext<'a> {
    pub fn new(matches: &'a ArgMatches) -> Self {
        Self { matches }
    }
}

#[async_trait]
pub trait Command<'a> {
    fn new() -> Self
    where
        Self: Sized;

    async fn run(&self, context: &'a CliContext) -> Result<()>;
}

pub trait Interactive<'a> {
    /// Prompt for a secret without echoing it.
    fn prompt_for_password(&self, message: &'a str) -> Result<String> {
        Password::new()
            .with_prompt(message)
            .allow_empty_password(true)
            .interact()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting for password failed.")
    }

    /// Read an argument from the CLI args, failing if it wasn't passed.
    fn read_argument(&self, arg_matches: &'a ArgMatches, id: &'a str) -> Result<String> {
        arg_matches
            .get_one::<String>(id)
            .cloned()
            .ok_or_else(|| CommandErrors::RequiredUserInputMissing(id.into()).into())
    }

    /// Read an argument from the CLI args, then from the environment.
    fn read_argument_or_env(
        &self,
        arg_matches: &'a ArgMatches,
        id: &'a str,
        env: &'a str,
    ) -> Result<String> {
        match arg_matches.get_one::<String>(id) {
            Some(value) => Ok(value.clone()),
            None => std::env::var(env)
                .map_err(|_| CommandErrors::RequiredUserInputMissing(id.into()).into()),
        }
    }
}
