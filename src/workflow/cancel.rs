use super::log::LogSink;
use super::StageError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a stage needs besides the browser: the run's cancel token and its log sink.
///
/// Stages call [`RunContext::checkpoint`] before touching the portal and use
/// [`RunContext::pause`] for every fixed delay, so a stop request is observed
/// at the next suspension point. A browser call already in flight is not
/// interrupted; it finishes or times out on its own.
#[derive(Clone)]
pub struct RunContext {
    token: CancellationToken,
    sink: Arc<dyn LogSink>,
}

impl RunContext {
    pub fn new(token: CancellationToken, sink: Arc<dyn LogSink>) -> Self {
        Self { token, sink }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    pub fn checkpoint(&self) -> Result<(), StageError> {
        if self.token.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless the run is cancelled first.
    pub async fn pause(&self, duration: Duration) -> Result<(), StageError> {
        self.checkpoint()?;
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.token.cancelled() => Err(StageError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
