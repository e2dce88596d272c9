//! The connection classifier.

use std::sync::Arc;
use std::time::Duration;

use crate::mux::derived::{DerivedListener, Route};
use crate::mux::matcher::Matcher;
use crate::mux::sniff::{SkipSettingsAck, Sniffer};
use crate::net::{accept_with_backoff, BoxIo, ConnectionId, Listener, ListenerError};

/// Classifier tuning.
#[derive(Debug, Clone)]
pub struct MuxOptions {
    /// Upper bound on how long one connection may take to classify.
    pub sniff_timeout: Duration,
    /// Upper bound on bytes buffered per connection while classifying.
    pub max_sniff_bytes: usize,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            sniff_timeout: Duration::from_secs(1),
            max_sniff_bytes: 64 * 1024,
        }
    }
}

/// Why the classifier's serve loop ended.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The root listener was closed; expected during shutdown.
    #[error("mux: listener closed")]
    ListenerClosed,
    /// The root listener failed.
    #[error("mux: {0}")]
    Accept(#[source] ListenerError),
}

impl MuxError {
    /// Whether this only reflects a planned close.
    pub fn is_closed(&self) -> bool {
        matches!(self, MuxError::ListenerClosed)
    }
}

struct Rule {
    matcher: Box<dyn Matcher>,
    route: Route,
}

/// Splits one listener into several by protocol.
///
/// Rules are evaluated in the order they were added; the first match wins.
/// A connection no rule matches is closed without being delivered anywhere.
pub struct Mux {
    root: Arc<dyn Listener>,
    rules: Vec<Rule>,
    options: MuxOptions,
}

impl Mux {
    /// Create a classifier over `root`.
    pub fn new(root: Arc<dyn Listener>, options: MuxOptions) -> Self {
        Self {
            root,
            rules: Vec::new(),
            options,
        }
    }

    /// Add a rule and return the listener its connections are delivered to.
    pub fn match_rule(&mut self, matcher: impl Matcher, queue: usize) -> Arc<DerivedListener> {
        let (listener, route) = DerivedListener::channel(matcher.name(), queue);
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            route,
        });
        Arc::new(listener)
    }

    /// Accept and classify until the root listener closes or fails.
    ///
    /// Each connection is classified on its own task so a slow client never
    /// holds up the accept loop. This only returns with an error;
    /// [`MuxError::ListenerClosed`] is the planned-shutdown case.
    pub async fn serve(self) -> Result<(), MuxError> {
        let rules: Arc<[Rule]> = self.rules.into();
        let options = Arc::new(self.options);
        let mut attempts = 0;

        tracing::debug!(
            listener = %self.root.describe(),
            rules = rules.len(),
            "Classifier serving"
        );

        loop {
            let conn = match accept_with_backoff(&*self.root, &mut attempts).await {
                Ok(conn) => conn,
                Err(ListenerError::Closed) => return Err(MuxError::ListenerClosed),
                Err(e) => return Err(MuxError::Accept(e)),
            };

            let rules = Arc::clone(&rules);
            let options = Arc::clone(&options);
            tokio::spawn(async move {
                dispatch(conn, &rules, &options).await;
            });
        }
    }
}

async fn dispatch(conn: BoxIo, rules: &[Rule], options: &MuxOptions) {
    let id = ConnectionId::new();
    let mut sniffer = Sniffer::new(conn, options.max_sniff_bytes);
    let matchers: Vec<&dyn Matcher> = rules.iter().map(|r| r.matcher.as_ref()).collect();

    // Unmatched connections are dropped silently.
    let Some(index) = sniffer.classify(&matchers, options.sniff_timeout).await else {
        return;
    };

    // A greeted client will acknowledge SETTINGS the server never sent.
    let greeted = sniffer.greeted();
    let rewind = sniffer.into_rewind();
    let conn: BoxIo = if greeted {
        Box::new(SkipSettingsAck::new(rewind))
    } else {
        Box::new(rewind)
    };

    let route = &rules[index].route;
    if route.deliver(conn).await {
        metrics::counter!("volgate_connections_routed_total", "listener" => route.name.clone())
            .increment(1);
        tracing::trace!(connection_id = %id, listener = %route.name, "Connection classified");
    }
}
