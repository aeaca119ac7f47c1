use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Trade,
    CapitalRecord,
    Expense,
    YenProfitLoss,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Trade => "trade",
            DataKind::CapitalRecord => "capital_record",
            DataKind::Expense => "expense",
            DataKind::YenProfitLoss => "yen_profit_loss",
        };
        f.write_str(name)
    }
}

/// Remote copy of the journal. Local storage stays the source of truth.
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    async fn save(&self, kind: DataKind, id: &str, payload: Value) -> anyhow::Result<()>;

    async fn delete(&self, kind: DataKind, id: &str) -> anyhow::Result<()>;
}

/// Fire-and-forget pushes to a [`RemoteMirror`], issued after a local write
/// has succeeded. Failures are logged and never touch local state.
#[derive(Clone)]
pub struct CloudSync {
    mirror: Arc<dyn RemoteMirror>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CloudSync {
    pub fn new(mirror: Arc<dyn RemoteMirror>) -> Self {
        Self {
            mirror,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push_save(&self, kind: DataKind, id: &str, payload: Value) {
        let mirror = Arc::clone(&self.mirror);
        let id = id.to_string();
        self.spawn(kind, id.clone(), async move {
            mirror.save(kind, &id, payload).await
        });
    }

    pub fn push_delete(&self, kind: DataKind, id: &str) {
        let mirror = Arc::clone(&self.mirror);
        let id = id.to_string();
        self.spawn(kind, id.clone(), async move { mirror.delete(kind, &id).await });
    }

    /// Wait for every push issued so far.
    pub async fn flush(&self) {
        let pending: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => return,
        };

        for result in futures::future::join_all(pending).await {
            if let Err(e) = result {
                log::warn!("Cloud sync task aborted: {}", e);
            }
        }
    }

    fn spawn<F>(&self, kind: DataKind, id: String, push: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("No async runtime, skipping cloud sync of {} {}", kind, id);
            return;
        };

        let handle = runtime.spawn(async move {
            if let Err(e) = push.await {
                log::warn!("Cloud sync failed for {} {}: {:#}", kind, id, e);
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingMirror {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteMirror for RecordingMirror {
        async fn save(&self, kind: DataKind, id: &str, _payload: Value) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("save {} {}", kind, id));
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            Ok(())
        }

        async fn delete(&self, kind: DataKind, id: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("delete {} {}", kind, id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pushes_reach_mirror_after_flush() {
        let mirror = Arc::new(RecordingMirror::default());
        let sync = CloudSync::new(mirror.clone());

        sync.push_save(DataKind::Trade, "T1", serde_json::json!({"id": "T1"}));
        sync.push_delete(DataKind::Expense, "E1");
        sync.flush().await;

        let mut calls = mirror.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["delete expense E1", "save trade T1"]);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let mirror = Arc::new(RecordingMirror {
            fail: true,
            ..Default::default()
        });
        let sync = CloudSync::new(mirror.clone());

        sync.push_save(DataKind::YenProfitLoss, "T1", Value::Null);
        sync.flush().await;

        assert_eq!(mirror.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_without_runtime_push_is_skipped() {
        let mirror = Arc::new(RecordingMirror::default());
        let sync = CloudSync::new(mirror.clone());

        sync.push_save(DataKind::Trade, "T1", Value::Null);
        assert!(mirror.calls.lock().unwrap().is_empty());
    }
}
