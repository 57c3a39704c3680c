use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::watch;
use uuid::Uuid;

use crate::engine::ports::CloseInhibitor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Install,
    Delete,
    Backup,
    Play,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskKind::Install => "install",
            TaskKind::Delete => "delete",
            TaskKind::Backup => "backup",
            TaskKind::Play => "play",
        };
        f.write_str(label)
    }
}

/// One in-flight long operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub target: String,
    pub started_at: DateTime<Utc>,
}

/// Observable list of running tasks.
#[derive(Clone)]
pub struct TaskQueue {
    tx: Arc<watch::Sender<Vec<Task>>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self { tx: Arc::new(tx) }
    }

    /// Register a task; it stays queued until the returned handle is dropped.
    pub fn start(&self, kind: TaskKind, target: impl Into<String>) -> TaskHandle {
        let task = Task {
            id: Uuid::new_v4(),
            kind,
            target: target.into(),
            started_at: Utc::now(),
        };
        debug!("tasks: start {} {} ({})", task.kind, task.target, task.id);
        let id = task.id;
        self.tx.send_modify(|tasks| tasks.push(task));
        TaskHandle {
            queue: self.clone(),
            id,
        }
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Task>> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub fn count(&self, kind: TaskKind, target: &str) -> usize {
        self.tx
            .borrow()
            .iter()
            .filter(|task| task.kind == kind && task.target == target)
            .count()
    }

    /// The application may exit only when nothing is running.
    pub fn can_exit(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    fn finish(&self, id: Uuid) {
        self.tx.send_if_modified(|tasks| {
            let before = tasks.len();
            tasks.retain(|task| task.id != id);
            before != tasks.len()
        });
        debug!("tasks: finished {id}");
    }
}

/// Removes its task from the queue when dropped.
pub struct TaskHandle {
    queue: TaskQueue,
    id: Uuid,
}

#[cfg(test)]
impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.queue.finish(self.id);
    }
}

/// In-process prevent-close registry, for hosts without a window manager hook.
#[derive(Clone, Default)]
pub struct CloseRegistry {
    reasons: Arc<Mutex<HashMap<String, String>>>,
}

impl CloseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self) -> bool {
        self.reasons
            .lock()
            .map(|reasons| !reasons.is_empty())
            .unwrap_or(false)
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons
            .lock()
            .map(|reasons| reasons.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl CloseInhibitor for CloseRegistry {
    fn register(&self, id: &str, reason: &str) {
        if let Ok(mut reasons) = self.reasons.lock() {
            reasons.insert(id.to_owned(), reason.to_owned());
        }
        info!("close blocked: {reason}");
    }

    fn unregister(&self, id: &str) {
        if let Ok(mut reasons) = self.reasons.lock()
            && let Some(reason) = reasons.remove(id)
        {
            info!("close unblocked: {reason}");
        }
    }
}

/// Keeps the host from closing until dropped.
pub struct PreventClose {
    inhibitor: Arc<dyn CloseInhibitor>,
    id: String,
}

impl PreventClose {
    pub fn register(inhibitor: Arc<dyn CloseInhibitor>, reason: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        inhibitor.register(&id, reason);
        Self { inhibitor, id }
    }
}

impl Drop for PreventClose {
    fn drop(&mut self) {
        self.inhibitor.unregister(&self.id);
    }
}
