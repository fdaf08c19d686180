use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_DISPLAY_DURATION: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToastKind {
    #[default]
    Success,
    Error,
    Info,
    Warning,
}

impl fmt::Display for ToastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToastKind::Success => "success",
            ToastKind::Error => "error",
            ToastKind::Info => "info",
            ToastKind::Warning => "warning",
        };
        f.write_str(name)
    }
}

/// Transient user-facing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub message: String,
    pub kind: ToastKind,
}

impl Toast {
    /// Error messages are shown with an `Error: ` prefix
    pub fn new(message: impl Into<String>, kind: ToastKind) -> Self {
        let message = message.into();
        let message = match kind {
            ToastKind::Error => format!("Error: {}", message),
            _ => message,
        };
        Self { message, kind }
    }
}

pub struct ToastNotifier {
    display_duration: Duration,
    state: Arc<watch::Sender<Option<Toast>>>,
    generation: Arc<AtomicU64>,
    dismiss_task: Mutex<Option<JoinHandle<()>>>,
}

impl ToastNotifier {
    pub fn new(display_duration: Duration) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            display_duration,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            dismiss_task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Toast>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Option<Toast> {
        self.state.borrow().clone()
    }

    pub fn is_visible(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Show a toast, replacing any visible one and restarting the dismiss timer
    pub async fn show(&self, message: impl Into<String>, kind: ToastKind) -> Toast {
        let toast = Toast::new(message, kind);
        let mut dismiss_task = self.dismiss_task.lock().await;

        if let Some(previous) = dismiss_task.take() {
            previous.abort();
        }

        let mut id = 0;
        self.state.send_modify(|current| {
            id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *current = Some(toast.clone());
        });
        debug!(kind = %toast.kind, "Toast shown: {}", toast.message);

        let state = Arc::clone(&self.state);
        let generation = Arc::clone(&self.generation);
        let display_duration = self.display_duration;

        *dismiss_task = Some(tokio::spawn(async move {
            tokio::time::sleep(display_duration).await;
            state.send_if_modified(|current| {
                if generation.load(Ordering::SeqCst) == id && current.is_some() {
                    *current = None;
                    true
                } else {
                    false
                }
            });
        }));

        toast
    }

    pub async fn success(&self, message: impl Into<String>) -> Toast {
        self.show(message, ToastKind::Success).await
    }

    pub async fn error(&self, message: impl Into<String>) -> Toast {
        self.show(message, ToastKind::Error).await
    }

    /// Hide the current toast immediately
    pub async fn dismiss(&self) {
        if let Some(task) = self.dismiss_task.lock().await.take() {
            task.abort();
        }
        self.state.send_if_modified(|current| current.take().is_some());
    }
}

impl Default for ToastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_DURATION)
    }
}
