use std::{sync::Arc, time::Duration};

use tracing::info;

use super::{memory::MemoryLayer, tasks::PeriodicTask};

/// Periodically sweeps the memory tier (TTL expiry, then capacity trim).
pub struct EvictionScheduler {
    task: PeriodicTask,
}

impl EvictionScheduler {
    pub fn start(memory: Arc<MemoryLayer>, every: Duration) -> Self {
        info!(every_secs = every.as_secs_f64(), "starting memory eviction");
        let task = PeriodicTask::spawn("memory-eviction", every, move || {
            let memory = memory.clone();
            async move {
                memory.sweep().await;
            }
        });
        Self { task }
    }

    pub async fn stop(self) {
        self.task.stop().await;
    }
}
