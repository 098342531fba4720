//! Metric server lifecycle.
//!
//! A [`MetricServer`] owns at most one listener at a time. `start` binds the
//! configured address and spawns an accept loop; `stop` tears it down and waits
//! until the socket has been released, so the same instance (or another one)
//! can bind the address again right away.

use crate::config::{CollectorKind, ServerConfig, DEFAULT_DRAIN_TIMEOUT, DEFAULT_PATH, WILDCARD_HOST};
use crate::metrics::{MetricRegistry, ProcessStatsCollector, StandardCollector};
use crate::server::handler::ScrapeHandler;
use crate::server::tls::TlsCertificate;
use crate::server::MetricServerError;
use crate::util::ShutdownSignal;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Pending connection backlog for the listening socket.
const LISTEN_BACKLOG: i32 = 1024;

/// Pause after a failed accept; errors like EMFILE persist until a descriptor frees up.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// URL scheme the server is reachable under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

/// The configured address, as composed at construction time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindAddress {
    pub scheme: Scheme,
    pub hostname: String,
    pub port: u16,
    pub path: String,
}

impl BindAddress {
    /// Whether the hostname asks for every interface.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.hostname.trim(), "" | "+" | "*")
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.scheme,
            self.hostname,
            self.port,
            self.path.trim_start_matches('/')
        )
    }
}

/// Serves scrapes of one registry on one address.
pub struct MetricServer {
    address: BindAddress,
    certificate: Option<Arc<TlsCertificate>>,
    registry: MetricRegistry,
    drain_timeout: Duration,
    running: Mutex<Option<RunningServer>>,
}

/// Handle to a started listener.
struct RunningServer {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl MetricServer {
    /// Start building a server for `port`.
    pub fn builder(port: u16) -> MetricServerBuilder {
        MetricServerBuilder::new(port)
    }

    /// Build a server from configuration, loading TLS material from disk.
    pub fn from_config(config: &ServerConfig) -> Result<Self, MetricServerError> {
        let mut builder = Self::builder(config.port)
            .hostname(config.hostname.clone())
            .path(config.path.clone())
            .use_https(config.use_https)
            .drain_timeout(config.drain_timeout);

        if let Some(tls) = &config.tls {
            let certificate = TlsCertificate::from_pem_files(&tls.cert_path, &tls.key_path)?;
            builder = builder.certificate(Arc::new(certificate));
        }

        if let Some(kinds) = &config.collectors {
            builder = builder.standard_collectors(kinds.iter().map(|kind| match kind {
                CollectorKind::ProcessStats => StandardCollector::ProcessStats(ProcessStatsCollector::new()),
            }));
        }

        builder.build()
    }

    /// The configured address.
    pub fn bind_address(&self) -> &BindAddress {
        &self.address
    }

    /// The registry scrapes are served from.
    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// The address actually bound, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|running| running.local_addr)
    }

    /// Bind the listener and begin accepting scrapes.
    ///
    /// Returns once the socket is listening; connections are served on
    /// `scheduler`, or on the current runtime when none is given.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if this instance already has a listener
    /// - `Bind` if the address cannot be resolved or bound
    /// - `Tls` if the certificate is rejected
    /// - `NoRuntime` if no scheduler was given and no runtime is current
    pub async fn start(&self, scheduler: Option<Handle>) -> Result<(), MetricServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(MetricServerError::AlreadyRunning(self.address.to_string()));
        }

        let scheduler = match scheduler {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| MetricServerError::NoRuntime)?,
        };

        let acceptor = self
            .certificate
            .as_deref()
            .map(TlsCertificate::acceptor)
            .transpose()?;

        let bind_error = |source| MetricServerError::Bind {
            address: self.address.to_string(),
            source,
        };
        let socket_addr = resolve(&self.address).await.map_err(bind_error)?;
        let std_listener = bind_socket(socket_addr).map_err(bind_error)?;
        let listener = {
            let _guard = scheduler.enter();
            TcpListener::from_std(std_listener).map_err(bind_error)?
        };
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let shutdown = ShutdownSignal::new();
        let accept_loop = AcceptLoop {
            listener,
            acceptor,
            handler: ScrapeHandler::new(self.registry.clone(), &self.address.path),
            shutdown: shutdown.clone(),
            drain_timeout: self.drain_timeout,
            scheduler: scheduler.clone(),
        };
        let task = scheduler.spawn(accept_loop.run(shutdown.subscribe()));

        info!(
            address = %self.address,
            local_addr = %local_addr,
            tls = self.certificate.is_some(),
            "metric server started"
        );

        *running = Some(RunningServer {
            local_addr,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Stop accepting scrapes and release the listener.
    ///
    /// Does nothing if the server is not running. In-flight scrapes get up to
    /// the drain timeout to finish before they are aborted.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(server) = running.take() else {
            return;
        };

        server.shutdown.shutdown();
        if let Err(e) = server.task.await {
            warn!(error = %e, "metric server task ended abnormally");
        }

        info!(address = %self.address, local_addr = %server.local_addr, "metric server stopped");
    }
}

impl Drop for MetricServer {
    fn drop(&mut self) {
        // No await here: abort the accept loop so its listener is dropped.
        if let Some(server) = self.running.get_mut().take() {
            server.shutdown.shutdown();
            server.task.abort();
            debug!(local_addr = %server.local_addr, "metric server dropped while running");
        }
    }
}

impl fmt::Debug for MetricServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricServer")
            .field("address", &self.address)
            .field("tls", &self.certificate.is_some())
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MetricServer`].
#[derive(Debug)]
pub struct MetricServerBuilder {
    hostname: String,
    port: u16,
    path: String,
    registry: Option<MetricRegistry>,
    use_https: bool,
    certificate: Option<Arc<TlsCertificate>>,
    standard_collectors: Option<Vec<StandardCollector>>,
    drain_timeout: Duration,
}

impl MetricServerBuilder {
    fn new(port: u16) -> Self {
        Self {
            hostname: WILDCARD_HOST.to_string(),
            port,
            path: DEFAULT_PATH.to_string(),
            registry: None,
            use_https: false,
            certificate: None,
            standard_collectors: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Host to bind; `+`, `*` or an empty string bind every interface.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Base path scrapes are served under.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Serve this registry instead of the process-wide default.
    pub fn registry(mut self, registry: MetricRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn use_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    /// TLS certificate; supplying one serves https.
    pub fn certificate(mut self, certificate: Arc<TlsCertificate>) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Collectors registered into the default registry. Ignored when a
    /// registry is supplied.
    pub fn standard_collectors(mut self, collectors: impl IntoIterator<Item = StandardCollector>) -> Self {
        self.standard_collectors = Some(collectors.into_iter().collect());
        self
    }

    /// How long `stop` waits for in-flight scrapes.
    pub fn drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Validate the options and build the server.
    ///
    /// When serving the process-wide default registry, the standard collectors
    /// (the process-stats collector unless others were given) are registered
    /// into it. A caller-supplied registry is left untouched.
    pub fn build(self) -> Result<MetricServer, MetricServerError> {
        if self.use_https && self.certificate.is_none() {
            return Err(MetricServerError::InvalidConfiguration(
                "certificate is required when using https".to_string(),
            ));
        }

        let scheme = if self.certificate.is_some() {
            Scheme::Https
        } else {
            Scheme::Http
        };

        let registry = self.registry.unwrap_or_else(MetricRegistry::global);
        if registry.is_global() {
            let collectors = self.standard_collectors.unwrap_or_else(StandardCollector::defaults);
            let registered = registry.register_on_demand_collectors(collectors);
            debug!(registered, "registered standard collectors into default registry");
        }

        Ok(MetricServer {
            address: BindAddress {
                scheme,
                hostname: self.hostname,
                port: self.port,
                path: self.path,
            },
            certificate: self.certificate,
            registry,
            drain_timeout: self.drain_timeout,
            running: Mutex::new(None),
        })
    }
}

/// State owned by the background accept task.
struct AcceptLoop {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    handler: ScrapeHandler,
    shutdown: ShutdownSignal,
    drain_timeout: Duration,
    scheduler: Handle,
}

impl AcceptLoop {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.spawn_connection(&mut connections, stream, peer),
                        Err(e) => backoff_after_accept_error(&e).await,
                    }
                }

                // Reap finished connections so the set does not grow.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                _ = shutdown.recv() => {
                    debug!("metric server accept loop shutting down");
                    break;
                }
            }
        }

        // Release the socket and TLS context before draining.
        drop(self.listener);
        drop(self.acceptor);

        if connections.is_empty() {
            return;
        }

        debug!(in_flight = connections.len(), "draining scrape connections");
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "drain timeout elapsed, aborting scrape connections"
            );
            connections.shutdown().await;
        }
    }

    fn spawn_connection(&self, connections: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on scrape connection");
        }

        let handler = self.handler.clone();
        let acceptor = self.acceptor.clone();
        let shutdown = self.shutdown.subscribe();

        connections.spawn_on(
            async move {
                let result = match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => serve_connection(TokioIo::new(tls_stream), handler, shutdown).await,
                        Err(e) => {
                            debug!(peer = %peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                    None => serve_connection(TokioIo::new(stream), handler, shutdown).await,
                };

                if let Err(e) = result {
                    debug!(peer = %peer, error = %e, "scrape connection error");
                }
            },
            &self.scheduler,
        );
    }
}

async fn backoff_after_accept_error(e: &io::Error) {
    error!(
        error = %e,
        backoff_ms = ACCEPT_ERROR_BACKOFF.as_millis() as u64,
        "failed to accept scrape connection"
    );
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Serve HTTP/1.1 on one connection until the client leaves or shutdown.
async fn serve_connection<I>(
    io: I,
    handler: ScrapeHandler,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), hyper::Error>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let response = handler.handle(&req);
        async move { Ok::<_, Infallible>(response) }
    });

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    }
}

/// Turn the configured hostname into a socket address.
///
/// Wildcard hosts bind `0.0.0.0`; names resolving to several addresses prefer
/// the first IPv4 one.
async fn resolve(address: &BindAddress) -> io::Result<SocketAddr> {
    if address.is_wildcard() {
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, address.port)));
    }

    let host = address
        .hostname
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, address.port));
    }

    let candidates: Vec<SocketAddr> = lookup_host((host, address.port)).await?.collect();
    candidates
        .iter()
        .find(|candidate| candidate.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for host '{host}'"),
            )
        })
}

/// Create a non-blocking listening socket.
fn bind_socket(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    // Lets a restarted server rebind while old connections sit in TIME_WAIT.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}
