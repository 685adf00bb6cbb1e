//! Connecting to a destination with address failover.
//!
//! A [`ConnectAttempt`] holds all the state of one connection attempt: the
//! snapshot in use, where in it we are, which resolution pass this is, the
//! last error and the per-family sockets. It never performs I/O itself. A
//! driver asks it for the next step, does the blocking or non-blocking work,
//! and feeds the result back. [`DestinationManager::connect`] and
//! [`DestinationManager::connect_async`] are the two drivers.
//!
//! Addresses are tried in snapshot order starting at the rotation index,
//! wrapping once. If a whole pass fails the snapshot is marked failed and a
//! second pass runs on a fresh resolution.

use crate::base::cancel::CancelToken;
use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::dns::AddressSnapshot;
use crate::socket::bind::bind_local;
use crate::socket::destination::{ConnectSettings, DestinationManager};
use crate::socket::factory::AddressFamily;
use futures::future::{self, Either};
use socket2::{SockAddr, SockRef, Socket};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

const MAX_PASSES: u8 = 2;

/// One failed address of a connect attempt.
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    pub remote: SocketAddr,
    pub error: Arc<io::Error>,
}

/// What the driver has to do next.
pub enum ConnectStep {
    /// Resolve the destination, passing [`ConnectAttempt::presented`], and
    /// hand the result to [`ConnectAttempt::resolved`].
    Resolve,
    /// Connect `socket` to `remote` and report back through
    /// [`ConnectAttempt::continue_connect`].
    Connect { socket: Socket, remote: SocketAddr },
    /// The attempt failed.
    Failed(NetError),
}

impl fmt::Debug for ConnectStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStep::Resolve => f.write_str("Resolve"),
            ConnectStep::Connect { remote, .. } => {
                f.debug_struct("Connect")
                    .field("remote", remote)
                    .finish_non_exhaustive()
            }
            ConnectStep::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

enum Slot {
    Empty,
    Ready(Socket),
    Unsupported,
}

enum LastError {
    Io(Arc<io::Error>),
    Bind(NetError),
}

impl From<io::Error> for LastError {
    fn from(e: io::Error) -> Self {
        LastError::Io(Arc::new(e))
    }
}

/// Resumable state of a single connect attempt.
pub struct ConnectAttempt {
    manager: Arc<DestinationManager>,
    settings: ConnectSettings,
    snapshot: Option<Arc<AddressSnapshot>>,
    previous: Option<Arc<AddressSnapshot>>,
    start: usize,
    tried: usize,
    pass: u8,
    in_flight: Option<(usize, SocketAddr)>,
    ever_resolved: bool,
    last_error: Option<LastError>,
    outcome: Option<NetError>,
    ipv4: Slot,
    ipv6: Slot,
    attempts: Vec<ConnectionAttempt>,
    state: LoadState,
}

impl ConnectAttempt {
    pub fn new(manager: Arc<DestinationManager>) -> Self {
        let settings = manager.connect_settings();
        Self {
            manager,
            settings,
            snapshot: None,
            previous: None,
            start: 0,
            tried: 0,
            pass: 0,
            in_flight: None,
            ever_resolved: false,
            last_error: None,
            outcome: None,
            ipv4: Slot::Empty,
            ipv6: Slot::Empty,
            attempts: Vec::new(),
            state: LoadState::Idle,
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.state
    }

    /// Resolution passes started so far.
    pub fn pass(&self) -> u8 {
        self.pass
    }

    /// Addresses that failed so far, in order.
    pub fn attempts(&self) -> &[ConnectionAttempt] {
        &self.attempts
    }

    /// The snapshot to present when resolving.
    pub fn presented(&self) -> Option<&Arc<AddressSnapshot>> {
        self.previous.as_ref()
    }

    /// Start a pass on `snapshot`, beginning at `index`.
    pub fn resolved(&mut self, snapshot: Arc<AddressSnapshot>, index: usize) {
        self.pass += 1;
        self.start = if snapshot.is_empty() { 0 } else { index % snapshot.len() };
        self.tried = 0;
        self.ever_resolved |= !snapshot.is_empty();

        if snapshot.has_ipv4() {
            self.preallocate(AddressFamily::Ipv4);
        }
        if snapshot.has_ipv6() {
            self.preallocate(AddressFamily::Ipv6);
        }
        tracing::debug!(
            destination = %self.manager.destination(),
            pass = self.pass,
            generation = snapshot.generation(),
            addresses = snapshot.len(),
            start = self.start,
            "connect pass started"
        );
        self.snapshot = Some(snapshot);
    }

    /// Once the attempt has finished this keeps returning its outcome:
    /// [`NetError::SocketIsConnected`] after a success, the final error
    /// otherwise.
    pub fn next_step(&mut self) -> ConnectStep {
        loop {
            match self.state {
                LoadState::Connected => return ConnectStep::Failed(NetError::SocketIsConnected),
                LoadState::Failed => {
                    let error = self.outcome.clone().unwrap_or(NetError::RequestCanceled);
                    return ConnectStep::Failed(error);
                }
                _ => {}
            }

            let Some(snapshot) = self.snapshot.clone() else {
                self.state = LoadState::ResolvingHost {
                    forced: self.pass > 0,
                };
                return ConnectStep::Resolve;
            };

            if snapshot.is_empty() {
                return ConnectStep::Failed(self.fail());
            }

            if self.tried == snapshot.len() {
                self.state = LoadState::Exhausted { pass: self.pass };
                if self.pass >= MAX_PASSES {
                    return ConnectStep::Failed(self.fail());
                }
                self.manager.mark_failed(&snapshot);
                self.previous = self.snapshot.take();
                continue;
            }

            let index = (self.start + self.tried) % snapshot.len();
            self.tried += 1;
            let remote = snapshot.addresses()[index];

            match self.prepare(remote) {
                Ok(socket) => {
                    tracing::debug!(
                        destination = %self.manager.destination(),
                        %remote,
                        index,
                        "connecting"
                    );
                    self.state = LoadState::Connecting { index };
                    self.in_flight = Some((index, remote));
                    return ConnectStep::Connect { socket, remote };
                }
                Err(e) => self.record(remote, e),
            }
        }
    }

    /// Feed back the outcome of the connect handed out by
    /// [`next_step`](Self::next_step).
    ///
    /// A failure is recorded and `None` returned; call `next_step` again. On
    /// success the attempt finishes and returns the connection.
    ///
    /// Must only be called once per [`ConnectStep::Connect`]. A result with no
    /// connect in flight is dropped and returns `None`; debug builds panic.
    pub fn continue_connect<S>(&mut self, result: io::Result<S>) -> Option<Connection<S>>
    where
        for<'s> SockRef<'s>: From<&'s S>,
    {
        let Some((index, remote)) = self.in_flight.take() else {
            tracing::error!(
                destination = %self.manager.destination(),
                state = ?self.state,
                "connect result with no connect in flight"
            );
            debug_assert!(false, "continue_connect called with no connect in flight");
            return None;
        };
        match result {
            Ok(stream) => Some(self.finish(stream, index, remote)),
            Err(e) => {
                tracing::debug!(
                    destination = %self.manager.destination(),
                    %remote,
                    error = %e,
                    "connect failed"
                );
                self.record(remote, e.into());
                None
            }
        }
    }

    /// Give up. Drops every socket the attempt still holds.
    pub fn abort(&mut self) -> NetError {
        self.in_flight = None;
        self.release_sockets();
        self.state = LoadState::Failed;
        self.outcome = Some(NetError::RequestCanceled);
        tracing::debug!(destination = %self.manager.destination(), "connect canceled");
        NetError::RequestCanceled
    }

    fn preallocate(&mut self, family: AddressFamily) {
        let factory = Arc::clone(self.manager.socket_factory());
        let slot = self.slot(family);
        if !matches!(slot, Slot::Empty) {
            return;
        }
        if !factory.supports(family) {
            *slot = Slot::Unsupported;
            return;
        }
        match factory.create(family) {
            Ok(socket) => *slot = Slot::Ready(socket),
            Err(e) => tracing::debug!(?family, error = %e, "socket preallocation failed"),
        }
    }

    fn slot(&mut self, family: AddressFamily) -> &mut Slot {
        match family {
            AddressFamily::Ipv4 => &mut self.ipv4,
            AddressFamily::Ipv6 => &mut self.ipv6,
        }
    }

    /// Socket for `remote`, with pre-connect options set and bound.
    fn prepare(&mut self, remote: SocketAddr) -> Result<Socket, LastError> {
        let family = AddressFamily::of(&remote);
        let factory = Arc::clone(self.manager.socket_factory());
        let slot = self.slot(family);
        let socket = match std::mem::replace(slot, Slot::Empty) {
            Slot::Ready(socket) => socket,
            Slot::Unsupported => {
                *slot = Slot::Unsupported;
                return Err(unsupported().into());
            }
            Slot::Empty if !factory.supports(family) => {
                *slot = Slot::Unsupported;
                return Err(unsupported().into());
            }
            Slot::Empty => factory.create(family)?,
        };

        self.settings.options.apply_before_connect(&socket)?;

        if let Some(strategy) = &self.settings.bind {
            bind_local(
                &socket,
                strategy.as_ref(),
                self.manager.destination(),
                remote,
                self.settings.max_bind_retries,
            )
            .map_err(LastError::Bind)?;
        }
        Ok(socket)
    }

    fn record(&mut self, remote: SocketAddr, error: LastError) {
        let io_error = match &error {
            LastError::Io(e) => Arc::clone(e),
            LastError::Bind(NetError::BindRetryExhausted {
                source: Some(e), ..
            }) => Arc::clone(e),
            LastError::Bind(e) => Arc::new(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                e.to_string(),
            )),
        };
        self.attempts.push(ConnectionAttempt {
            remote,
            error: io_error,
        });
        self.last_error = Some(error);
    }

    fn release_sockets(&mut self) {
        self.ipv4 = Slot::Empty;
        self.ipv6 = Slot::Empty;
    }

    fn fail(&mut self) -> NetError {
        self.release_sockets();
        self.state = LoadState::Failed;
        let error = self.exhausted_error();
        tracing::debug!(
            destination = %self.manager.destination(),
            error = %error,
            "connect failed"
        );
        self.outcome = Some(error.clone());
        error
    }

    fn exhausted_error(&self) -> NetError {
        let destination = self.manager.destination();
        if !self.ever_resolved {
            let host = destination.host().to_string();
            return if destination.is_proxy() {
                NetError::ProxyNameResolutionFailure { host }
            } else {
                NetError::NameResolutionFailure { host }
            };
        }
        match &self.last_error {
            Some(LastError::Bind(e)) => e.clone(),
            Some(LastError::Io(e)) => NetError::ConnectFailure {
                host: destination.host().to_string(),
                port: destination.port(),
                source: Arc::clone(e),
            },
            None => NetError::connect_failure(
                destination.host(),
                destination.port(),
                io::Error::new(io::ErrorKind::NotConnected, "no address was attempted"),
            ),
        }
    }

    fn finish<S>(&mut self, stream: S, index: usize, remote: SocketAddr) -> Connection<S>
    where
        for<'s> SockRef<'s>: From<&'s S>,
    {
        let sock = SockRef::from(&stream);
        if let Err(e) = self.settings.options.apply_connected(sock) {
            tracing::warn!(%remote, error = %e, "failed to apply socket options");
        }
        self.release_sockets();
        self.state = LoadState::Connected;

        let generation = match &self.snapshot {
            Some(snapshot) => {
                if !self.settings.round_robin {
                    self.manager.prefer(snapshot, index);
                }
                snapshot.generation()
            }
            None => 0,
        };
        self.manager.on_activate();
        tracing::debug!(destination = %self.manager.destination(), %remote, index, "connected");

        Connection {
            stream,
            remote,
            generation,
            attempts: std::mem::take(&mut self.attempts),
            active: ActiveConnection {
                manager: Arc::clone(&self.manager),
            },
        }
    }
}

impl fmt::Debug for ConnectAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectAttempt")
            .field("destination", &self.manager.destination().key())
            .field("state", &self.state)
            .field("pass", &self.pass)
            .field("tried", &self.tried)
            .finish()
    }
}

fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "address family not supported")
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "connect timed out")
}

/// Keeps its destination counted as active. Dropping it deactivates.
pub struct ActiveConnection {
    manager: Arc<DestinationManager>,
}

impl ActiveConnection {
    pub fn manager(&self) -> &Arc<DestinationManager> {
        &self.manager
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.manager.on_deactivate();
    }
}

impl fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActiveConnection")
            .field(&self.manager.destination().key())
            .finish()
    }
}

/// A connected stream and how it was reached.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    remote: SocketAddr,
    generation: u64,
    attempts: Vec<ConnectionAttempt>,
    active: ActiveConnection,
}

impl<S> Connection<S> {
    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Generation of the snapshot the winning address came from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Addresses that failed before this one connected.
    pub fn attempts(&self) -> &[ConnectionAttempt] {
        &self.attempts
    }

    pub fn manager(&self) -> &Arc<DestinationManager> {
        self.active.manager()
    }

    /// Split off the stream. The destination stays active until the
    /// returned guard drops.
    pub fn into_parts(self) -> (S, ActiveConnection) {
        (self.stream, self.active)
    }
}

impl DestinationManager {
    /// Connect with blocking socket calls.
    ///
    /// `cancel` is checked before every address; a connect already in
    /// progress runs to completion or to the configured timeout.
    pub fn connect(
        self: &Arc<Self>,
        cancel: &CancelToken,
    ) -> Result<Connection<std::net::TcpStream>, NetError> {
        let mut attempt = ConnectAttempt::new(Arc::clone(self));
        loop {
            if cancel.is_cancelled() {
                return Err(attempt.abort());
            }
            match attempt.next_step() {
                ConnectStep::Resolve => {
                    let (snapshot, index) = self.resolve(attempt.presented());
                    attempt.resolved(snapshot, index);
                }
                ConnectStep::Connect { socket, remote } => {
                    let result = connect_blocking(socket, remote, attempt.settings.connect_timeout);
                    if let Some(connection) = attempt.continue_connect(result) {
                        return Ok(connection);
                    }
                }
                ConnectStep::Failed(e) => return Err(e),
            }
        }
    }

    /// Connect through the tokio reactor.
    ///
    /// Cancelling `cancel` while a connect is in flight drops the socket and
    /// ends the attempt with [`NetError::RequestCanceled`].
    pub async fn connect_async(
        self: &Arc<Self>,
        cancel: &CancelToken,
    ) -> Result<Connection<tokio::net::TcpStream>, NetError> {
        let mut attempt = ConnectAttempt::new(Arc::clone(self));
        loop {
            if cancel.is_cancelled() {
                return Err(attempt.abort());
            }
            match attempt.next_step() {
                ConnectStep::Resolve => {
                    let presented = attempt.presented().cloned();
                    let (snapshot, index) = self.resolve_async(presented).await;
                    attempt.resolved(snapshot, index);
                }
                ConnectStep::Connect { socket, remote } => {
                    let connect = pin!(connect_nonblocking(
                        socket,
                        remote,
                        attempt.settings.connect_timeout
                    ));
                    let cancelled = pin!(cancel.cancelled());
                    let result = match future::select(connect, cancelled).await {
                        Either::Left((result, _)) => result,
                        Either::Right(((), _)) => return Err(attempt.abort()),
                    };
                    if let Some(connection) = attempt.continue_connect(result) {
                        return Ok(connection);
                    }
                }
                ConnectStep::Failed(e) => return Err(e),
            }
        }
    }
}

fn connect_blocking(
    socket: Socket,
    remote: SocketAddr,
    timeout: Option<Duration>,
) -> io::Result<std::net::TcpStream> {
    let addr = SockAddr::from(remote);
    match timeout {
        Some(timeout) => socket.connect_timeout(&addr, timeout)?,
        None => socket.connect(&addr)?,
    }
    Ok(socket.into())
}

async fn connect_nonblocking(
    socket: Socket,
    remote: SocketAddr,
    timeout: Option<Duration>,
) -> io::Result<tokio::net::TcpStream> {
    socket.set_nonblocking(true)?;
    let socket = tokio::net::TcpSocket::from_std_stream(socket.into());
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, socket.connect(remote))
            .await
            .map_err(|_| timed_out())?,
        None => socket.connect(remote).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::timer::TimerThread;
    use crate::dns::{AddressResolver, HostEntry, Name, Resolve, StaticAddresses};
    use crate::socket::config::PoolConfig;
    use crate::socket::destination::Destination;
    use crate::socket::factory::{SocketFactory, TcpSocketFactory};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Vec<SocketAddr>);

    impl Resolve for Fixed {
        fn resolve(&self, name: &Name) -> Result<HostEntry, NetError> {
            Ok(HostEntry::new(name, self.0.clone()))
        }
    }

    #[derive(Default)]
    struct Counting {
        created: AtomicUsize,
    }

    impl SocketFactory for Counting {
        fn create(&self, family: AddressFamily) -> io::Result<Socket> {
            self.created.fetch_add(1, Ordering::SeqCst);
            TcpSocketFactory::new().create(family)
        }
    }

    /// An address nothing listens on.
    fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    fn manager(addrs: Vec<SocketAddr>, factory: Arc<Counting>) -> Arc<DestinationManager> {
        let destination = Destination::new("http", "example.test", 80, false);
        let resolver = AddressResolver::new(
            Arc::new(Fixed(addrs)),
            Arc::new(StaticAddresses::default()),
        );
        DestinationManager::builder(destination)
            .config(PoolConfig::default())
            .resolver(resolver)
            .socket_factory(factory)
            .timers(TimerThread::with_handle(tokio::runtime::Handle::current()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_step_sequence() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let good = listener.local_addr().unwrap();
        let bad = closed_port();
        let factory = Arc::new(Counting::default());
        let manager = manager(vec![bad, good], factory.clone());

        let mut attempt = ConnectAttempt::new(Arc::clone(&manager));
        assert!(matches!(attempt.next_step(), ConnectStep::Resolve));
        assert_eq!(
            attempt.load_state(),
            LoadState::ResolvingHost { forced: false }
        );

        let (snapshot, index) = manager.resolve(None);
        attempt.resolved(snapshot, index);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        let ConnectStep::Connect { socket, remote } = attempt.next_step() else {
            panic!("expected a connect step");
        };
        assert_eq!(remote, bad);
        assert_eq!(attempt.load_state(), LoadState::Connecting { index: 0 });
        let result = connect_blocking(socket, remote, None);
        assert!(attempt.continue_connect(result).is_none());

        let ConnectStep::Connect { socket, remote } = attempt.next_step() else {
            panic!("expected a connect step");
        };
        assert_eq!(remote, good);
        let result = connect_blocking(socket, remote, None);
        let connection = attempt.continue_connect(result).unwrap();
        assert_eq!(attempt.load_state(), LoadState::Connected);
        assert_eq!(connection.attempts().len(), 1);
        assert_eq!(connection.attempts()[0].remote, bad);
        assert_eq!(manager.rotation_index(), 1);
        assert_eq!(manager.active_connections(), 1);

        // A finished attempt says so instead of reporting a cancel.
        assert!(matches!(
            attempt.next_step(),
            ConnectStep::Failed(NetError::SocketIsConnected)
        ));
        assert_eq!(manager.active_connections(), 1);

        drop(connection);
        assert_eq!(manager.active_connections(), 0);
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "no connect in flight")]
    async fn test_stray_connect_result_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let good = listener.local_addr().unwrap();
        let manager = manager(vec![good], Arc::new(Counting::default()));

        let mut attempt = ConnectAttempt::new(Arc::clone(&manager));
        let stream = std::net::TcpStream::connect(good).unwrap();
        let _ = attempt.continue_connect(Ok(stream));
    }

    #[tokio::test]
    async fn test_two_passes_then_connect_failure() {
        let bad = closed_port();
        let factory = Arc::new(Counting::default());
        let manager = manager(vec![bad], factory.clone());

        let err = manager.connect(&CancelToken::new()).unwrap_err();
        match err {
            NetError::ConnectFailure { host, port, .. } => {
                assert_eq!(host, "example.test");
                assert_eq!(port, 80);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // One preallocated socket per pass.
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(manager.current_snapshot().unwrap().generation(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let factory = Arc::new(Counting::default());
        let manager = manager(vec![closed_port()], factory.clone());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = manager.connect_async(&cancel).await.unwrap_err();
        assert!(matches!(err, NetError::RequestCanceled));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
        assert_eq!(manager.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_bind_exhaustion_surfaces() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let good = listener.local_addr().unwrap();
        let busy = TcpListener::bind("127.0.0.1:0").unwrap();
        let busy_addr = busy.local_addr().unwrap();

        let factory = Arc::new(Counting::default());
        let manager = manager(vec![good], factory);
        manager.set_bind_strategy(Some(Arc::new(move |_: &Destination, _: SocketAddr, _: u32| {
            Some(busy_addr)
        })));

        let err = manager.connect(&CancelToken::new()).unwrap_err();
        assert!(
            matches!(err, NetError::BindRetryExhausted { attempts: 5, .. }),
            "{err:?}"
        );
    }
}
