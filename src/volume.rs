use crate::error::Result;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

/// Serializes volume steps and paces them on slow sound outputs
pub(crate) struct VolumeGate {
    lock: Mutex<()>,
    delay: Option<Duration>,
    delayed_outputs: HashSet<String>,
}

impl VolumeGate {
    pub(crate) fn new(delay: Option<Duration>, delayed_outputs: HashSet<String>) -> Self {
        Self {
            lock: Mutex::new(()),
            delay,
            delayed_outputs,
        }
    }

    fn delay_for(&self, sound_output: Option<&str>) -> Option<Duration> {
        let output = sound_output?;
        self.delay.filter(|_| self.delayed_outputs.contains(output))
    }

    /// Run one step inside the gate
    ///
    /// The sound output is read after the step completes; when it needs
    /// spacing the gate stays held for the configured delay.
    pub(crate) async fn step<T, Fut>(
        &self,
        send: Fut,
        sound_output: impl FnOnce() -> Option<String>,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.lock.lock().await;
        let result = send.await?;
        if let Some(delay) = self.delay_for(sound_output().as_deref()) {
            tracing::debug!("Holding volume gate for {:?}", delay);
            tokio::time::sleep(delay).await;
        }
        Ok(result)
    }
}
