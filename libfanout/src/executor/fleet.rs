use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::Result;
use derive_getters::Getters;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;

use super::worker::DEFAULT_CONNECT_TIMEOUT;
use super::{aggregator, Credentials, SessionClient, Worker};
use crate::log::*;
use crate::plan::Plan;
use crate::report::ResultSet;

/// How workers are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduling {
    /// One task per target. `max_parallel` caps how many run at once; `None`
    /// starts every target immediately.
    Concurrent { max_parallel: Option<usize> },
    /// One target at a time, each awaited before the next starts. Produces the
    /// same results as [`Scheduling::Concurrent`], only slower.
    Sequential,
}

impl Default for Scheduling {
    fn default() -> Self {
        Scheduling::Concurrent { max_parallel: None }
    }
}

/// Fans a [`Plan`] out over its targets and fans the results back in.
#[derive(Getters, Debug, Clone)]
pub struct Fleet {
    #[getter(skip)]
    client: Arc<dyn SessionClient>,
    #[getter(skip)]
    credentials: Arc<Credentials>,
    scheduling: Scheduling,
    connect_timeout: Duration,
    command_timeout: Option<Duration>,
}

impl Fleet {
    pub fn new(client: Arc<dyn SessionClient>, credentials: Credentials) -> Self {
        Self {
            client,
            credentials: Arc::new(credentials),
            scheduling: Scheduling::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: None,
        }
    }

    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_command_timeout(mut self, command_timeout: Option<Duration>) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Run every command of `plan` on every target and return the complete
    /// result set, one result per (target, command) pair.
    #[tracing::instrument(skip_all, fields(targets = plan.targets().len(), commands = plan.commands().len()))]
    pub async fn run(&self, plan: &Plan) -> Result<ResultSet> {
        let worker = Worker::new(
            self.client.clone(),
            self.credentials.clone(),
            plan.commands().clone(),
        )
        .with_connect_timeout(self.connect_timeout)
        .with_command_timeout(self.command_timeout);

        let (sink, source) = aggregator::channel();
        let collector = source.spawn();
        let mut lost_targets = HashSet::new();

        match self.scheduling {
            Scheduling::Sequential => {
                info!("running {} targets sequentially", plan.targets().len());
                for target in plan.targets().iter().cloned() {
                    let worker = worker.clone();
                    let sink = sink.clone();
                    let index = *target.index();
                    // Still a task of its own, so a panic is caught the same
                    // way as in concurrent mode.
                    let joined = tokio::task::spawn(async move {
                        worker.run(&target, &sink).await;
                    })
                    .await;
                    if let Err(e) = joined {
                        error!("worker for target #{} died: {}", index, e);
                        lost_targets.insert(index);
                    }
                }
            }
            Scheduling::Concurrent { max_parallel } => {
                info!(
                    "running {} targets concurrently (limit: {:?})",
                    plan.targets().len(),
                    max_parallel
                );
                let semaphore = max_parallel.map(|n| Arc::new(Semaphore::new(n.max(1))));
                let mut tasks = FuturesUnordered::new();
                for target in plan.targets().iter().cloned() {
                    let worker = worker.clone();
                    let sink = sink.clone();
                    let semaphore = semaphore.clone();
                    let index = *target.index();
                    let handle = tokio::task::spawn(async move {
                        let _permit = match &semaphore {
                            Some(semaphore) => Some(semaphore.acquire().await),
                            None => None,
                        };
                        worker.run(&target, &sink).await;
                    });
                    tasks.push(async move { (index, handle.await) });
                }
                while let Some((index, joined)) = tasks.next().await {
                    if let Err(e) = joined {
                        error!("worker for target #{} died: {}", index, e);
                        lost_targets.insert(index);
                    }
                }
            }
        }
        drop(sink);

        let mut results = aggregator::join(collector).await?;
        if !lost_targets.is_empty() {
            let filled = results.fill_missing(
                plan,
                &lost_targets,
                "worker terminated before reporting a result",
            );
            warn!("filled {} results for {} lost workers", filled, lost_targets.len());
        }
        if results.len() != plan.expected_results() {
            warn!(
                "expected {} results, collected {}",
                plan.expected_results(),
                results.len()
            );
        }
        info!(
            "collected {} results ({} failed)",
            results.len(),
            results.failures()
        );
        Ok(results)
    }
}
