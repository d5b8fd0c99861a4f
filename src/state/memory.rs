//! In-process state store for tests and dry runs.

use super::StateStore;
use crate::error::{Error, Result};
use crate::model::JobState;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    state: Option<JobState>,
    writes: Vec<JobState>,
    /// Number of further writes that succeed before writes start failing.
    writes_before_failure: Option<usize>,
    /// Failing writes still land; only the acknowledgement is lost.
    apply_failed_writes: bool,
}

/// Keeps the record in memory and logs every write.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
}

impl MemoryStateStore {
    pub fn new(state: Option<JobState>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                ..Inner::default()
            }),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub async fn snapshot(&self) -> Option<JobState> {
        self.inner.lock().await.state.clone()
    }

    /// Every record written so far, oldest first.
    pub async fn writes(&self) -> Vec<JobState> {
        self.inner.lock().await.writes.clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Lets `count` more writes succeed, then fails every later one.
    pub async fn fail_writes_after(&self, count: usize) {
        self.inner.lock().await.writes_before_failure = Some(count);
    }

    /// Lets `count` more writes succeed; every later write is stored but
    /// reported as failed, like an insert that times out after it landed.
    pub async fn lose_acks_after(&self, count: usize) {
        let mut inner = self.inner.lock().await;
        inner.writes_before_failure = Some(count);
        inner.apply_failed_writes = true;
    }

    pub async fn allow_writes(&self) {
        let mut inner = self.inner.lock().await;
        inner.writes_before_failure = None;
        inner.apply_failed_writes = false;
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn read_state(&self) -> Result<Option<JobState>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Transport("state store unavailable".to_string()));
        }
        Ok(self.inner.lock().await.state.clone())
    }

    async fn write_state(&self, state: &JobState) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(remaining) = inner.writes_before_failure.as_mut() {
            if *remaining == 0 {
                if inner.apply_failed_writes {
                    inner.state = Some(state.clone());
                    inner.writes.push(state.clone());
                }
                return Err(Error::Transport("state store unavailable".to_string()));
            }
            *remaining -= 1;
        }
        inner.state = Some(state.clone());
        inner.writes.push(state.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
