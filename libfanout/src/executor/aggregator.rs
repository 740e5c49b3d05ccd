//! Fan-in for [`CommandResult`]s. Every worker holds its own [`ResultSink`]
//! clone; a single [`ResultSource`] drains them. The source only finishes once
//! the last sink is dropped, which makes "all workers are done" observable
//! without polling.

use color_eyre::eyre::{Result, WrapErr};
use tokio::sync::mpsc;

use super::CommandResult;
use crate::log::*;
use crate::report::ResultSet;

pub type ResultTx = mpsc::Sender<CommandResult>;
pub type ResultRx = mpsc::Receiver<CommandResult>;

/// Queue depth between the workers and the collector. Submitting blocks once
/// it's full, so a slow collector applies backpressure instead of buffering
/// without bound.
pub const RESULT_QUEUE_DEPTH: usize = 1024;

/// Create a connected sink/source pair.
pub fn channel() -> (ResultSink, ResultSource) {
    let (tx, rx) = mpsc::channel(RESULT_QUEUE_DEPTH);
    (ResultSink { tx }, ResultSource { rx })
}

#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: ResultTx,
}

impl ResultSink {
    /// Hand a result to the collector. Safe to call from any number of
    /// workers at once.
    pub async fn submit(&self, result: CommandResult) -> Result<()> {
        self.tx
            .send(result)
            .await
            .map_err(|e| eyre!("result collector is gone, dropped result for {}", e.0.target_address()))
    }
}

#[derive(Debug)]
pub struct ResultSource {
    rx: ResultRx,
}

impl ResultSource {
    /// Drain results until every [`ResultSink`] has been dropped, then return
    /// the frozen set.
    #[tracing::instrument(skip(self))]
    pub async fn collect(mut self) -> ResultSet {
        let mut results = ResultSet::default();
        while let Some(result) = self.rx.recv().await {
            trace!(
                "collected result for {} / {}",
                result.target_address(),
                result.command()
            );
            results.insert(result);
        }
        debug!("result source drained: {} results", results.len());
        results
    }

    /// Spawn [`ResultSource::collect`] onto the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<ResultSet> {
        tokio::task::spawn(self.collect())
    }
}

/// Await a collector spawned with [`ResultSource::spawn`].
pub async fn join(handle: tokio::task::JoinHandle<ResultSet>) -> Result<ResultSet> {
    handle.await.wrap_err("result collector task failed")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use color_eyre::eyre::Result;

    use super::*;
    use crate::executor::Outcome;
    use crate::plan::host::Target;

    #[tokio::test]
    async fn test_concurrent_submissions_are_all_collected() -> Result<()> {
        let (sink, source) = channel();
        let collector = source.spawn();

        let mut handles = vec![];
        for t in 0..64 {
            let sink = sink.clone();
            handles.push(tokio::task::spawn(async move {
                let target = Target::new(t, format!("host-{t}"));
                for c in 0..16 {
                    tokio::task::yield_now().await;
                    sink.submit(CommandResult::new(
                        &target,
                        c,
                        format!("cmd-{c}"),
                        Outcome::Output(format!("{t}/{c}")),
                    ))
                    .await?;
                }
                Ok::<_, color_eyre::eyre::Report>(())
            }));
        }
        drop(sink);
        for handle in handles {
            handle.await??;
        }

        let results = join(collector).await?;
        assert_eq!(64 * 16, results.len());
        let keys: HashSet<_> = results.iter().map(|r| r.key()).collect();
        assert_eq!(64 * 16, keys.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_source_finishes_when_no_sinks_remain() {
        let (sink, source) = channel();
        drop(sink);
        assert!(source.collect().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_source_dropped_is_an_error() {
        let (sink, source) = channel();
        drop(source);
        let target = Target::new(0, "h1");
        let result = CommandResult::new(&target, 0, "uptime", Outcome::Output(String::new()));
        assert!(sink.submit(result).await.is_err());
    }
}
