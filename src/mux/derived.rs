//! Logical listeners fed by the classifier.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::{BoxIo, Listener, ListenerError};

/// A listener that owns no socket.
///
/// Connections arrive through a bounded queue filled by the classifier.
/// Accept returns [`ListenerError::Closed`] once the listener is closed or
/// once the classifier has stopped and the queue is drained.
pub struct DerivedListener {
    name: String,
    rx: Mutex<mpsc::Receiver<BoxIo>>,
    closed: Shutdown,
}

/// The classifier's handle on a derived listener's queue.
pub(crate) struct Route {
    pub(crate) name: String,
    tx: mpsc::Sender<BoxIo>,
    closed: ShutdownSignal,
}

impl DerivedListener {
    pub(crate) fn channel(name: &str, queue: usize) -> (Self, Route) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let closed = Shutdown::new();
        let route = Route {
            name: name.to_string(),
            tx,
            closed: closed.subscribe(),
        };
        let listener = Self {
            name: name.to_string(),
            rx: Mutex::new(rx),
            closed,
        };
        (listener, route)
    }

    /// Rule name this listener was created for.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Listener for DerivedListener {
    async fn accept(&self) -> Result<BoxIo, ListenerError> {
        let mut closed = self.closed.subscribe();
        if closed.is_triggered() {
            return Err(ListenerError::Closed);
        }

        tokio::select! {
            biased;
            _ = closed.recv() => Err(ListenerError::Closed),
            conn = async { self.rx.lock().await.recv().await } => conn.ok_or(ListenerError::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.trigger() {
            return;
        }
        // Release anything queued but never accepted. If an accept holds the
        // lock it returns Closed on its own and the queue drops with us.
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
            while rx.try_recv().is_ok() {}
        }
        tracing::debug!(listener = %self.name, "Derived listener closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    fn describe(&self) -> String {
        format!("mux:{}", self.name)
    }
}

impl Route {
    /// Hand a classified connection to the listener.
    ///
    /// Waits for queue space. Returns `false` (dropping the connection) if
    /// the listener is closed first.
    pub(crate) async fn deliver(&self, conn: BoxIo) -> bool {
        let mut closed = self.closed.clone();
        if closed.is_triggered() {
            return false;
        }
        tokio::select! {
            biased;
            _ = closed.recv() => false,
            res = self.tx.send(conn) => res.is_ok(),
        }
    }
}
