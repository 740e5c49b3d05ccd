use std::sync::Arc;
use std::time::Duration;

use derive_getters::Getters;

use super::{CommandResult, Credentials, ExecError, Outcome, ResultSink, SessionClient};
use crate::log::*;
use crate::plan::host::Target;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the whole command list against one target at a time. Cheap to clone;
/// everything it holds is shared read-only between workers.
#[derive(Getters, Debug, Clone)]
pub struct Worker {
    #[getter(skip)]
    client: Arc<dyn SessionClient>,
    #[getter(skip)]
    credentials: Arc<Credentials>,
    commands: Arc<[String]>,
    connect_timeout: Duration,
    command_timeout: Option<Duration>,
}

impl Worker {
    pub fn new(
        client: Arc<dyn SessionClient>,
        credentials: Arc<Credentials>,
        commands: Arc<[String]>,
    ) -> Self {
        Self {
            client,
            credentials,
            commands,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_command_timeout(mut self, command_timeout: Option<Duration>) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Run every command against `target`, submitting exactly one result per
    /// command to `sink`. Never fails: connection and command errors become
    /// [`Outcome::Failure`] results.
    #[tracing::instrument(skip(self, target, sink), fields(target = %target))]
    pub async fn run(&self, target: &Target, sink: &ResultSink) {
        debug!("connecting to {}", target);
        let connecting = self.client.connect(target, &self.credentials);
        let connected = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(connected) => connected,
            Err(_) => Err(ExecError::ConnectTimeout {
                address: target.address().clone(),
                timeout: self.connect_timeout,
            }),
        };

        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                warn!("{}: {}", target, e);
                let reason = e.reason();
                for (index, command) in self.commands.iter().enumerate() {
                    self.submit(
                        sink,
                        CommandResult::new(target, index, command, Outcome::Failure(reason.clone())),
                    )
                    .await;
                }
                return;
            }
        };
        debug!("connected to {}", target);

        for (index, command) in self.commands.iter().enumerate() {
            debug!("{}: running command {}: {}", target, index, command);
            let running = session.run(command);
            let output = match self.command_timeout {
                Some(limit) => match tokio::time::timeout(limit, running).await {
                    Ok(output) => output,
                    Err(_) => Err(ExecError::CommandTimeout(limit)),
                },
                None => running.await,
            };
            if let Err(e) = &output {
                info!("{}: command '{}' failed: {}", target, command, e);
            }
            self.submit(sink, CommandResult::new(target, index, command, output.into()))
                .await;
        }

        session.close().await;
        debug!("{}: all {} commands finished", target, self.commands.len());
    }

    async fn submit(&self, sink: &ResultSink, result: CommandResult) {
        if let Err(e) = sink.submit(result).await {
            error!("{}", e);
        }
    }
}
