//! Server supervisor.
//!
//! # Responsibilities
//! - Bind the one endpoint and, when multiplexing, split it by protocol
//! - Run the control plane, the RPC server, and the bridge servers
//! - Stop them in dependency order, then remove the socket file
//!
//! # Stop sequence
//! ```text
//! fire signal → barrier reaches zero → RPC graceful stop
//!     → control-plane graceful stop → close raw listener → remove socket
//! ```
//!
//! Waiting on the barrier has no deadline unless `stop_timeout_secs` is
//! configured. Without one, a task that never observes the signal hangs
//! `stop` forever.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bridge::{warm_up, BridgeContext, BridgeFactory, BridgeServer, HttpProtocol};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, ServeError};
use crate::lifecycle::{Shutdown, ShutdownBarrier};
use crate::mux::{DerivedListener, Http1Fast, Http2HeaderField, Http2Preface, Mux, MuxError};
use crate::net::endpoint::remove_socket_file;
use crate::net::{Endpoint, Listener, RawListener};
use crate::rpc::{ControlPlane, RpcLogs, RpcServer};

/// Checkpoints of the stop sequence, reported in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPhase {
    /// The cancellation signal fired.
    Cancelled,
    /// Every registered background task reported.
    BarrierReleased,
    RpcStopped,
    ControlPlaneStopped,
    /// The socket file was removed (unix endpoints only).
    SocketRemoved,
}

/// Observes stop progress; receives the run's barrier for inspection.
pub type StopObserver = Arc<dyn Fn(StopPhase, &ShutdownBarrier) + Send + Sync>;

/// Called when a server fails in a way that must end the process.
pub type FatalHandler = Arc<dyn Fn(&'static str, &ServeError) + Send + Sync>;

/// The default [`FatalHandler`]: log and exit with status 1.
pub fn exit_process() -> FatalHandler {
    Arc::new(|component, error| {
        tracing::error!(component, error = %error, "Fatal server error, exiting");
        std::process::exit(1);
    })
}

/// What to do with a finished serve loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Expected; logged at debug.
    Quiet,
    /// Logged as a warning.
    Warn,
    /// Handed to the [`FatalHandler`].
    Fatal,
}

/// Background servers the supervisor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    ControlPlane,
    Rpc,
    Classifier,
    BridgeHttp1,
    BridgeHttp2,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::ControlPlane => "control-plane",
            Component::Rpc => "rpc",
            Component::Classifier => "classifier",
            Component::BridgeHttp1 => "bridge-http1",
            Component::BridgeHttp2 => "bridge-http2",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error policy for a server that stopped serving.
///
/// Planned closes are never fatal. The RPC server's close is a warning when
/// multiplexed, because the classifier closed its listener. Real failures of
/// the RPC server or control plane are fatal; the classifier and bridge
/// servers only warn, leaving the control plane running.
pub fn disposition(component: Component, multiplexed: bool, result: &Result<(), ServeError>) -> Disposition {
    let closed = match result {
        Ok(()) => return Disposition::Quiet,
        Err(e) => e.is_closed(),
    };
    match component {
        Component::Rpc if closed && multiplexed => Disposition::Warn,
        Component::Rpc | Component::ControlPlane if closed => Disposition::Quiet,
        Component::Rpc | Component::ControlPlane => Disposition::Fatal,
        _ if closed => Disposition::Quiet,
        _ => Disposition::Warn,
    }
}

struct Running {
    shutdown: Shutdown,
    barrier: ShutdownBarrier,
    rpc: Arc<RpcServer>,
    raw: Arc<RawListener>,
    endpoint: Endpoint,
}

/// Owns the servers behind one endpoint.
pub struct Supervisor {
    config: GatewayConfig,
    control_plane: Arc<dyn ControlPlane>,
    bridge: Option<BridgeFactory>,
    logs: RpcLogs,
    fatal: FatalHandler,
    observer: Option<StopObserver>,
    running: Mutex<Option<Running>>,
}

impl Supervisor {
    pub fn new(config: GatewayConfig, control_plane: Arc<dyn ControlPlane>, bridge: Option<BridgeFactory>) -> Self {
        Self {
            config,
            control_plane,
            bridge,
            logs: RpcLogs::default(),
            fatal: exit_process(),
            observer: None,
            running: Mutex::new(None),
        }
    }

    /// Where RPC request and response lines go.
    pub fn with_logs(mut self, logs: RpcLogs) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_fatal_handler(mut self, fatal: FatalHandler) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn with_stop_observer(mut self, observer: StopObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Bound address of the current run, e.g. `tcp://127.0.0.1:41234`.
    pub async fn local_addr(&self) -> Option<String> {
        self.running.lock().await.as_ref().map(|r| r.raw.local_addr())
    }

    /// Bind the endpoint and start every server for the configured mode.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(GatewayError::AlreadyStarted);
        }

        let multiplexed = self.config.is_multiplexed();
        if multiplexed && self.bridge.is_none() {
            return Err(GatewayError::NoBridge);
        }

        let endpoint = Endpoint::parse(&self.config.endpoint())?;
        tracing::info!(
            endpoint = %endpoint,
            multiplexed,
            "{}",
            if multiplexed { "Multiplexed RPC and legacy endpoint" } else { "RPC endpoint" }
        );
        endpoint.prepare()?;
        let raw = Arc::new(RawListener::bind(&endpoint).await?);

        let shutdown = Shutdown::new();
        let barrier = ShutdownBarrier::new();
        let rpc = Arc::new(RpcServer::for_service(self.control_plane.clone(), &self.logs));

        let mut derived = None;
        let mut mux = None;
        if multiplexed {
            let queue = self.config.mux.queue_size;
            let mut m = Mux::new(raw.clone(), self.config.mux_options());
            let http1 = m.match_rule(Http1Fast, queue);
            let grpc = m.match_rule(Http2HeaderField::grpc(), queue);
            let http2 = m.match_rule(Http2Preface, queue);
            self.close_on_signal(&shutdown, &barrier, [http1.clone(), grpc.clone(), http2.clone()]);
            derived = Some((http1, grpc, http2));
            mux = Some(m);
        }

        self.spawn_control_plane(&shutdown, multiplexed);

        let rpc_listener: Arc<dyn Listener> = match &derived {
            Some((_, grpc, _)) => grpc.clone(),
            None => raw.clone(),
        };
        self.spawn_monitored(Component::Rpc, multiplexed, {
            let rpc = rpc.clone();
            async move { rpc.serve(rpc_listener).await }
        });

        if let (Some((http1, _, http2)), Some(factory)) = (derived, &self.bridge) {
            let bridge = factory(BridgeContext {
                signal: shutdown.subscribe(),
                config: &self.config,
                mount_path: Some(self.config.mount_path()),
                control_plane: self.control_plane.clone(),
            });

            barrier.add(1);
            let warmup_barrier = barrier.clone();
            let interval = self.config.warmup_interval();
            let signal = shutdown.subscribe();
            let probe = bridge.clone();
            tokio::spawn(async move {
                let outcome = warm_up(probe, interval, signal).await;
                tracing::debug!(?outcome, "Bridge warmup finished");
                if let Err(e) = warmup_barrier.done() {
                    tracing::error!(error = %e, "Warmup completed an unregistered barrier unit");
                }
            });

            let router = bridge.router();
            let h1 = BridgeServer::new(router.clone(), HttpProtocol::Http1);
            let h2 = BridgeServer::new(router, HttpProtocol::Http2);
            self.spawn_monitored(Component::BridgeHttp1, true, async move { h1.serve(http1).await });
            self.spawn_monitored(Component::BridgeHttp2, true, async move { h2.serve(http2).await });
        }

        if let Some(m) = mux {
            self.spawn_monitored(Component::Classifier, true, async move {
                m.serve().await.map_err(|e| match e {
                    MuxError::ListenerClosed => ServeError::ServerClosed,
                    MuxError::Accept(e) => ServeError::Listener(e),
                })
            });
        }

        tracing::info!(
            endpoint = %raw.local_addr(),
            barrier_units = barrier.registered(),
            "Gateway started"
        );
        *running = Some(Running {
            shutdown,
            barrier,
            rpc,
            raw,
            endpoint,
        });
        Ok(())
    }

    /// Run the stop sequence. Later calls are no-ops.
    pub async fn stop(&self) -> Result<(), GatewayError> {
        let mut guard = self.running.lock().await;
        let Some(run) = guard.take() else {
            tracing::debug!("Stop called on a stopped gateway");
            return Ok(());
        };

        run.shutdown.trigger();
        self.observe(StopPhase::Cancelled, &run.barrier);

        match self.config.stop_timeout() {
            Some(limit) => {
                if let Err(e) = run.barrier.wait_timeout(limit).await {
                    tracing::error!(error = %e, "Continuing stop with background tasks outstanding");
                }
            }
            None => run.barrier.wait().await,
        }
        self.observe(StopPhase::BarrierReleased, &run.barrier);

        run.rpc.graceful_stop().await;
        self.observe(StopPhase::RpcStopped, &run.barrier);

        self.control_plane.graceful_stop().await;
        self.observe(StopPhase::ControlPlaneStopped, &run.barrier);

        run.raw.close();
        if let Some(path) = run.endpoint.socket_path() {
            if let Err(e) = remove_socket_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
            self.observe(StopPhase::SocketRemoved, &run.barrier);
        }

        tracing::info!(endpoint = %run.endpoint, "Gateway stopped");
        Ok(())
    }

    fn observe(&self, phase: StopPhase, barrier: &ShutdownBarrier) {
        tracing::debug!(?phase, outstanding = barrier.outstanding(), "Stop phase");
        if let Some(observer) = &self.observer {
            observer(phase, barrier);
        }
    }

    /// Close the derived listeners once the signal fires, one barrier unit each.
    fn close_on_signal<const N: usize>(
        &self,
        shutdown: &Shutdown,
        barrier: &ShutdownBarrier,
        listeners: [Arc<DerivedListener>; N],
    ) {
        barrier.add(N);
        let barrier = barrier.clone();
        let mut signal = shutdown.subscribe();
        tokio::spawn(async move {
            signal.recv().await;
            for listener in &listeners {
                listener.close();
            }
            for _ in 0..N {
                if let Err(e) = barrier.done() {
                    tracing::error!(error = %e, "Listener close completed an unregistered barrier unit");
                }
            }
        });
    }

    fn spawn_control_plane(&self, shutdown: &Shutdown, multiplexed: bool) {
        let control_plane = self.control_plane.clone();
        let signal = shutdown.subscribe();
        self.spawn_monitored(Component::ControlPlane, multiplexed, async move {
            control_plane.serve(signal, None).await
        });
    }

    fn spawn_monitored<F>(&self, component: Component, multiplexed: bool, serve: F)
    where
        F: std::future::Future<Output = Result<(), ServeError>> + Send + 'static,
    {
        let fatal = self.fatal.clone();
        tokio::spawn(async move {
            let result = serve.await;
            match (disposition(component, multiplexed, &result), &result) {
                (Disposition::Quiet, _) => tracing::debug!(%component, "Server stopped"),
                (Disposition::Warn, Err(e)) => tracing::warn!(%component, error = %e, "Server stopped serving"),
                (Disposition::Fatal, Err(e)) => fatal(component.as_str(), e),
                (_, Ok(())) => {}
            }
        });
    }
}
