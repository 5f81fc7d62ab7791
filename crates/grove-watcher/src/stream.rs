//! Async access to model change events

use std::sync::{Arc, Weak};

use grove_core::{ElementChangeEvent, ListenerId, ModelManager};
use tokio::sync::mpsc;

/// Forwards every change event of a model into a channel.
///
/// The stream ends once the model shuts down. Dropping the stream removes
/// its listener.
pub struct DeltaStream {
    manager: Weak<ModelManager>,
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<ElementChangeEvent>,
}

impl DeltaStream {
    pub fn attach(manager: &Arc<ModelManager>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = manager.add_listener(move |event: &ElementChangeEvent| {
            let _ = tx.send(event.clone());
        });
        DeltaStream {
            manager: Arc::downgrade(manager),
            id,
            rx,
        }
    }

    pub async fn recv(&mut self) -> Option<ElementChangeEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ElementChangeEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_listener(self.id);
        }
    }
}
