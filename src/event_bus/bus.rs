use std::sync::{Arc, Mutex};

use tokio::{sync::oneshot, task};

use super::event::Event;
use super::sink::{EventSink, StdOutSink};

/// Receives events from nodes and the runner and forwards them to a sink.
pub struct EventBus {
    output_sink: Arc<Mutex<dyn EventSink>>,
    event_channel: (flume::Sender<Event>, flume::Receiver<Event>),
    listener: Mutex<Option<ListenerState>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

/// One line per event. The scope prefix is only printed when it changes.
fn render(event: &Event, current_scope: &mut Option<String>) -> String {
    let scope = event.scope_label();
    if current_scope.as_deref() == Some(scope) {
        format!("{event}\n")
    } else {
        *current_scope = Some(scope.to_string());
        format!("{scope}: {event}\n")
    }
}

impl EventBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self {
            output_sink: Arc::new(Mutex::new(sink)),
            event_channel: flume::unbounded(),
            listener: Mutex::new(None),
        }
    }

    /// Sender side for producers.
    pub fn get_sender(&self) -> flume::Sender<Event> {
        self.event_channel.0.clone()
    }

    /// Spawns the background task that drains events into the sink.
    /// Calling it again while a listener runs is a no-op.
    pub fn listen_for_events(&self) {
        let Ok(mut guard) = self.listener.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }
        let receiver = self.event_channel.1.clone();
        let output = self.output_sink.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = task::spawn(async move {
            let mut current_scope: Option<String> = None;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        // Flush whatever is still queued before exiting.
                        while let Ok(event) = receiver.try_recv() {
                            write_line(&output, &render(&event, &mut current_scope));
                        }
                        break;
                    }
                    recv = receiver.recv_async() => match recv {
                        Err(e) => {
                            tracing::warn!(error = %e, "event bus receiver closed");
                            break;
                        }
                        Ok(event) => write_line(&output, &render(&event, &mut current_scope)),
                    }
                }
            }
        });
        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stops the listener after draining pending events.
    pub async fn stop_listener(&self) {
        let state = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            if state.handle.await.is_err() {
                // Aborted or panicked; nothing left to flush.
            }
        }
    }
}

fn write_line(output: &Arc<Mutex<dyn EventSink>>, line: &str) {
    let result = output
        .lock()
        .map_err(|poisoned| std::io::Error::other(format!("poisoned mutex: {poisoned}")))
        .and_then(|mut sink| sink.write(line));
    if let Err(e) = result {
        tracing::warn!(error = %e, "event bus write failed");
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock()
            && let Some(state) = guard.take()
        {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}
