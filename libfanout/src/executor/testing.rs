//! A scripted [`SessionClient`] for exercising workers and the fleet without
//! a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Credentials, ExecError, Session, SessionClient};
use crate::plan::host::Target;

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Exit(u32),
    Transport(String),
}

#[derive(Debug, Clone, Default)]
pub struct HostScript {
    unreachable: Option<String>,
    panic: Option<String>,
    connect_delay: Duration,
    replies: HashMap<String, (Reply, Duration)>,
}

impl HostScript {
    pub fn up() -> Self {
        Self::default()
    }

    pub fn unreachable(reason: &str) -> Self {
        Self {
            unreachable: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Connecting to the host panics the worker.
    pub fn panicking(message: &str) -> Self {
        Self {
            panic: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn output(self, command: &str, output: &str) -> Self {
        self.slow_output(command, output, Duration::ZERO)
    }

    pub fn slow_output(mut self, command: &str, output: &str, delay: Duration) -> Self {
        self.replies
            .insert(command.to_string(), (Reply::Output(output.to_string()), delay));
        self
    }

    pub fn exit(mut self, command: &str, status: u32) -> Self {
        self.replies
            .insert(command.to_string(), (Reply::Exit(status), Duration::ZERO));
        self
    }

    pub fn transport_error(mut self, command: &str, reason: &str) -> Self {
        self.replies.insert(
            command.to_string(),
            (Reply::Transport(reason.to_string()), Duration::ZERO),
        );
        self
    }
}

/// Hosts not scripted are treated as unreachable. Commands not scripted for a
/// reachable host produce no output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedClient {
    hosts: HashMap<String, HostScript>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, address: &str, script: HostScript) -> Self {
        self.hosts.insert(address.to_string(), script);
        self
    }

    /// Counts sessions that were closed.
    pub fn closed(&self) -> Arc<AtomicUsize> {
        self.closed.clone()
    }
}

#[async_trait]
impl SessionClient for ScriptedClient {
    async fn connect(
        &self,
        target: &Target,
        _credentials: &Credentials,
    ) -> Result<Box<dyn Session>, ExecError> {
        let script = self.hosts.get(target.address()).cloned().unwrap_or_else(|| {
            HostScript::unreachable("no route to host")
        });
        tokio::time::sleep(script.connect_delay).await;
        if let Some(message) = script.panic {
            panic!("{}", message);
        }
        if let Some(reason) = script.unreachable {
            return Err(ExecError::Connect {
                address: target.address().clone(),
                reason,
            });
        }
        Ok(Box::new(ScriptedSession {
            replies: script.replies,
            closed: self.closed.clone(),
        }))
    }
}

struct ScriptedSession {
    replies: HashMap<String, (Reply, Duration)>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn run(&mut self, command: &str) -> Result<String, ExecError> {
        let Some((reply, delay)) = self.replies.get(command).cloned() else {
            return Ok(String::new());
        };
        tokio::time::sleep(delay).await;
        match reply {
            Reply::Output(output) => Ok(output),
            Reply::Exit(status) => Err(ExecError::NonZeroExit {
                status,
                output: String::new(),
            }),
            Reply::Transport(reason) => Err(ExecError::Transport(reason)),
        }
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
