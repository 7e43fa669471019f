use std::{future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A named background loop that runs `tick` every `period`.
///
/// The first run happens one period after spawning. Stopping only takes effect
/// between runs: a tick in progress is always allowed to finish.
pub(crate) struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub(crate) fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let tok = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tok.cancelled() => break,
                    _ = timer.tick() => tick().await,
                }
            }
            debug!(task = name, "background task stopped");
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Cancel and wait for the loop to exit.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "background task ended abnormally");
        }
    }
}
