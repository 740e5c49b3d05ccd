//! [`SessionClient`] backed by thrussh. One TCP connection per target, one
//! `exec` channel per command, password authentication.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::{Report, Result};
use derive_getters::Getters;

use super::{Credentials, ExecError, Session, SessionClient};
use crate::log::*;
use crate::plan::host::{Port, Target};

/// How server host keys are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents.
    Insecure,
    /// Only accept keys listed in `path` for hosts listed in `allowed`.
    KnownHosts {
        path: PathBuf,
        allowed: Arc<HashSet<String>>,
    },
}

impl HostKeyPolicy {
    /// Check against `path`, allowing only the hosts of `targets`.
    pub fn known_hosts<P: Into<PathBuf>>(path: P, targets: &[Target]) -> Self {
        let allowed = targets
            .iter()
            .map(|t| {
                let (host, port) = t.host_and_port();
                known_hosts_key(host, port)
            })
            .collect();
        HostKeyPolicy::KnownHosts {
            path: path.into(),
            allowed: Arc::new(allowed),
        }
    }

    /// `~/.ssh/known_hosts`, if there's a home directory.
    pub fn default_known_hosts_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
    }

    /// Whether `host:port` may be connected to at all. The whitelist is fixed
    /// when the policy is built, so an [`SshSessionClient`] handed targets
    /// from another list refuses them instead of trusting known_hosts alone.
    fn allows(&self, host: &str, port: Port) -> bool {
        match self {
            HostKeyPolicy::Insecure => true,
            HostKeyPolicy::KnownHosts { allowed, .. } => {
                allowed.contains(&known_hosts_key(host, port))
            }
        }
    }

    fn accepts(&self, host: &str, port: Port, key: &thrussh_keys::key::PublicKey) -> bool {
        if !self.allows(host, port) {
            warn!("{}:{} is not a target of this run, rejecting", host, port);
            return false;
        }
        match self {
            HostKeyPolicy::Insecure => true,
            HostKeyPolicy::KnownHosts { path, .. } => check_known_hosts(host, port, key, path),
        }
    }
}

fn known_hosts_key(host: &str, port: Port) -> String {
    format!("{host}:{port}")
}

fn check_known_hosts(host: &str, port: Port, key: &thrussh_keys::key::PublicKey, path: &Path) -> bool {
    match thrussh_keys::check_known_hosts_path(host, port, key, path) {
        Ok(true) => true,
        Ok(false) => {
            warn!("no host key for {}:{} in {}", host, port, path.display());
            false
        }
        Err(e) => {
            warn!("host key check for {}:{} failed: {}", host, port, e);
            false
        }
    }
}

#[derive(Getters, Debug, Clone)]
pub struct SshSessionClient {
    host_keys: HostKeyPolicy,
}

impl SshSessionClient {
    pub fn new(host_keys: HostKeyPolicy) -> Self {
        Self { host_keys }
    }
}

#[async_trait]
impl SessionClient for SshSessionClient {
    #[tracing::instrument(skip(self, target, credentials), fields(target = %target))]
    async fn connect(
        &self,
        target: &Target,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>, ExecError> {
        let (host, port) = target.host_and_port();
        let handler = HostKeyCheck {
            host: host.to_string(),
            port,
            policy: self.host_keys.clone(),
        };

        debug!("connecting to {}", target);
        let config = Arc::new(thrussh::client::Config::default());
        let mut handle = thrussh::client::connect(config, target.address().as_str(), handler)
            .await
            .map_err(|e| ExecError::Connect {
                address: target.address().clone(),
                reason: e.to_string(),
            })?;

        let authenticated = handle
            .authenticate_password(credentials.user().clone(), credentials.password().to_string())
            .await
            .map_err(|e| ExecError::Connect {
                address: target.address().clone(),
                reason: e.to_string(),
            })?;
        if !authenticated {
            return Err(ExecError::AuthenticationRejected {
                user: credentials.user().clone(),
                address: target.address().clone(),
            });
        }
        debug!("successfully authenticated to {}", target);

        Ok(Box::new(SshSession {
            address: target.address().clone(),
            handle,
        }))
    }
}

struct SshSession {
    address: String,
    handle: thrussh::client::Handle<HostKeyCheck>,
}

#[async_trait]
impl Session for SshSession {
    #[tracing::instrument(skip(self))]
    async fn run(&mut self, command: &str) -> Result<String, ExecError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Channel(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;

        let mut output = Vec::new();
        let mut exit_status = None;
        let mut exit_signal = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                thrussh::ChannelMsg::Data { data } => output.extend_from_slice(&data[..]),
                thrussh::ChannelMsg::ExtendedData { data, ext: _ } => {
                    output.extend_from_slice(&data[..])
                }
                thrussh::ChannelMsg::ExitStatus { exit_status: status } => {
                    exit_status = Some(status)
                }
                thrussh::ChannelMsg::ExitSignal { signal_name, .. } => {
                    exit_signal = Some(format!("{:?}", signal_name))
                }
                thrussh::ChannelMsg::Close => break,
                _ => {}
            }
        }
        let output = String::from_utf8_lossy(&output).into_owned();
        trace!(
            "{}: command '{}' produced {} bytes",
            self.address,
            command,
            output.len()
        );

        classify(exit_status, exit_signal, output)
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(thrussh::Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("error disconnecting from {}: {}", self.address, e);
        }
    }
}

/// Turn what the channel reported into the command's result. Only exit
/// status 0 counts as success; any output is kept on failure too.
fn classify(
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    output: String,
) -> Result<String, ExecError> {
    match (exit_status, exit_signal) {
        (Some(0), _) => Ok(output),
        (Some(status), _) => Err(ExecError::NonZeroExit { status, output }),
        (None, Some(signal)) => Err(ExecError::Signal { signal, output }),
        (None, None) => Err(ExecError::Transport(
            "channel closed without an exit status".to_string(),
        )),
    }
}

struct HostKeyCheck {
    host: String,
    port: Port,
    policy: HostKeyPolicy,
}

impl thrussh::client::Handler for HostKeyCheck {
    type Error = Report;
    type FutureUnit = futures::future::Ready<Result<(Self, thrussh::client::Session), Report>>;
    type FutureBool = futures::future::Ready<Result<(Self, bool), Report>>;

    fn finished_bool(self, b: bool) -> Self::FutureBool {
        futures::future::ready(Ok((self, b)))
    }

    fn finished(self, session: thrussh::client::Session) -> Self::FutureUnit {
        futures::future::ready(Ok((self, session)))
    }

    fn check_server_key(self, server_public_key: &thrussh_keys::key::PublicKey) -> Self::FutureBool {
        let accepted = self.policy.accepts(&self.host, self.port, server_public_key);
        self.finished_bool(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hosts_whitelist_is_built_from_targets() {
        let targets = vec![Target::new(0, "h1"), Target::new(1, "h2:2222")];
        let policy = HostKeyPolicy::known_hosts("/nonexistent/known_hosts", &targets);
        match policy {
            HostKeyPolicy::KnownHosts { allowed, .. } => {
                assert!(allowed.contains("h1:22"));
                assert!(allowed.contains("h2:2222"));
                assert!(!allowed.contains("h2:22"));
            }
            HostKeyPolicy::Insecure => panic!("expected a known_hosts policy"),
        }
    }

    #[test]
    fn test_hosts_outside_the_target_list_are_refused() {
        let policy = HostKeyPolicy::known_hosts("/nonexistent/known_hosts", &[Target::new(0, "h1")]);
        assert!(policy.allows("h1", 22));
        assert!(!policy.allows("h1", 2222));
        assert!(!policy.allows("h9", 22));
        assert!(HostKeyPolicy::Insecure.allows("h9", 22));
    }

    #[test]
    fn test_exit_status_zero_is_output() {
        assert_eq!(
            Ok("hi\n".to_string()),
            classify(Some(0), None, "hi\n".to_string())
        );
    }

    #[test]
    fn test_non_zero_exit_keeps_output() {
        let err = classify(Some(2), None, "No such file\n".to_string())
            .err()
            .expect("exit status 2 is a failure");
        assert_eq!(
            ExecError::NonZeroExit {
                status: 2,
                output: "No such file\n".to_string()
            },
            err
        );
        let reason = err.reason();
        assert!(reason.starts_with("command exited with status 2"));
        assert!(reason.contains("No such file"));
    }

    #[test]
    fn test_signal_without_status_is_a_failure() {
        let err = classify(None, Some("KILL".to_string()), String::new())
            .err()
            .expect("a killed command is a failure");
        assert!(matches!(err, ExecError::Signal { ref signal, .. } if signal == "KILL"));
        // An exit status wins over a signal.
        assert!(classify(Some(0), Some("TERM".to_string()), String::new()).is_ok());
    }

    #[test]
    fn test_no_status_and_no_signal_is_a_transport_error() {
        let err = classify(None, None, "partial".to_string())
            .err()
            .expect("no exit status is a failure");
        assert!(matches!(err, ExecError::Transport(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connect_error() {
        // Bind and drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let client = SshSessionClient::new(HostKeyPolicy::Insecure);
        let target = Target::new(0, format!("127.0.0.1:{port}"));
        let err = client
            .connect(&target, &Credentials::new("root", "hunter2"))
            .await
            .err()
            .expect("nothing listens on the port");
        assert!(matches!(err, ExecError::Connect { .. }));
    }
}
