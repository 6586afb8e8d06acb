use crate::container::ContainerEvent;
use log::debug;
use std::sync::Mutex;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

pub struct EventHub {
    sender: Mutex<Option<broadcast::Sender<ContainerEvent>>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        match self.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            }
        }
    }

    pub fn emit(&self, event: impl Into<ContainerEvent>) -> usize {
        let event = event.into();
        match self.lock().as_ref() {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => {
                debug!("Dropping event after hub shutdown: {:?}", event);
                0
            }
        }
    }

    pub fn shutdown(&self) {
        if self.lock().take().is_some() {
            debug!("Event hub shut down");
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub fn receiver_count(&self) -> usize {
        self.lock()
            .as_ref()
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<broadcast::Sender<ContainerEvent>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{WindowEvent, WindowEventKind, WindowId};
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn subscribers_receive_emitted_events() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();

        let delivered = hub.emit(WindowEvent::new(WindowEventKind::Created, WindowId(1), "main"));
        assert_eq!(delivered, 1);

        match rx.try_recv() {
            Ok(ContainerEvent::Window(event)) => {
                assert_eq!(event.window_id, WindowId(1));
                assert_eq!(event.kind, WindowEventKind::Created);
            }
            other => panic!("unexpected receive result: {:?}", other),
        }
    }

    #[test]
    fn shutdown_closes_receivers() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        hub.shutdown();

        assert!(!hub.is_open());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(hub.emit(ContainerEvent::LayoutSaved { name: "x".into() }), 0);

        let mut late = hub.subscribe();
        assert_eq!(late.try_recv(), Err(TryRecvError::Closed));
    }
}
