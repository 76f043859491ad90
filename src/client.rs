//! Connection engine
//!
//! A `Client` owns one server connection at a time. `connect` dials and
//! starts three tasks that share a single [`Shutdown`] signal:
//! - receive: reads frames, parses them and dispatches to the registry
//! - send: drains the outbound queue through the rate limiter
//! - keepalive: pings with a random nonce and expects it echoed back
//!
//! `run` waits for a fatal error or an interrupt, then tears everything
//! down. Reconnecting is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::command::Commands;
use crate::config::Config;
use crate::error::{Error, ParseError, SendError};
use crate::handler::{Handler, HandlerSet, Registry};
use crate::message::Message;
use crate::ratelimit::RateLimiter;
use crate::roster::Rosters;
use crate::session::{FatalSlot, Session};
use crate::transport::{self, Stream};
use crate::types::{Nonce, SessionId, Shutdown};

/// Buffered PONG payloads awaiting the keepalive task
const PONG_BUFFER: usize = 4;

/// Longest accepted inbound frame, terminator included
const MAX_LINE_LEN: usize = 8192;

/// Upper bound on closing the writer once the connection is ending
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on each task exiting during teardown
const JOIN_GRACE: Duration = Duration::from_secs(2);

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Registering,
    Established,
    Terminating,
}

/// Event-driven IRC client
pub struct Client {
    config: Config,
    registry: Registry,
    rosters: Rosters,
    state: Arc<watch::Sender<State>>,
    live: Option<Live>,
}

/// Resources of the current connection
struct Live {
    id: SessionId,
    commands: Commands,
    shutdown: Shutdown,
    fatal: oneshot::Receiver<Error>,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// Create a client with the built-in protocol handlers registered
    pub fn new(config: Config) -> Self {
        let (state, _) = watch::channel(State::Disconnected);
        Self {
            config,
            registry: Registry::with_builtins(),
            rosters: Rosters::new(),
            state: Arc::new(state),
            live: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Append a handler for `command`
    ///
    /// Takes effect from the next `connect`.
    pub fn on_command<H>(&mut self, command: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.registry.on(command, handler);
    }

    /// Append a whole handler set
    pub fn stack(&mut self, set: HandlerSet) {
        self.registry.stack(set);
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle changes
    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    fn set_state(&self, state: State) {
        self.state.send_replace(state);
    }

    /// Shared handle to channel rosters
    pub fn rosters(&self) -> Rosters {
        self.rosters.clone()
    }

    /// Members of `channel`, waiting for a NAMES listing in progress
    pub async fn members(&self, channel: &str) -> Option<Vec<String>> {
        self.rosters.members(channel).await
    }

    /// Outbound handle for the current connection
    pub fn commands(&self) -> Option<Commands> {
        self.live.as_ref().map(|live| live.commands.clone())
    }

    /// Termination signal of the current connection
    ///
    /// Triggering it makes `run` return `Ok(())`.
    pub fn shutdown_handle(&self) -> Option<Shutdown> {
        self.live.as_ref().map(|live| live.shutdown.clone())
    }

    pub fn send_command(
        &self,
        command: &str,
        params: &[&str],
        trailing: Option<&str>,
    ) -> Result<(), Error> {
        let live = self.live.as_ref().ok_or(Error::NotConnected)?;
        live.commands.send_command(command, params, trailing)?;
        Ok(())
    }

    pub fn send_raw(&self, line: &str) -> Result<(), Error> {
        let live = self.live.as_ref().ok_or(Error::NotConnected)?;
        live.commands.send_raw(line)?;
        Ok(())
    }

    /// Dial the configured server and register
    pub async fn connect(&mut self) -> Result<(), Error> {
        self.config.validate()?;

        self.set_state(State::Connecting);
        info!("Connecting to {}", self.config.address);

        match transport::dial(&self.config).await {
            Ok(stream) => self.connect_stream(stream).await,
            Err(e) => {
                error!("Failed to connect to {}: {}", self.config.address, e);
                self.set_state(State::Disconnected);
                Err(e)
            }
        }
    }

    /// Run the engine over an already established stream
    ///
    /// Returns once the server has sent its first line and the
    /// registration commands are queued.
    pub async fn connect_stream<S>(&mut self, stream: S) -> Result<(), Error>
    where
        S: Stream + 'static,
    {
        self.config.validate()?;

        if let Some(old) = self.live.take() {
            self.teardown(old).await;
        }
        self.set_state(State::Connecting);

        let id = SessionId::generate();
        let shutdown = Shutdown::new();
        let verbose = self.config.verbose;
        let (reader, writer) = tokio::io::split(stream);

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let commands = Commands::new(queue_tx);
        let (fatal_slot, fatal) = FatalSlot::new();
        let limiter = RateLimiter::with_shutdown(
            self.config.send_interval,
            self.config.send_burst,
            shutdown.clone(),
        );

        let keepalive = self.config.keepalive;
        let (pong_tx, pong_rx) = if keepalive.is_zero() {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel(PONG_BUFFER);
            (Some(tx), Some(rx))
        };

        let session = Session::new(
            id,
            self.config.nick.clone(),
            commands.clone(),
            self.rosters.clone(),
            Arc::clone(&self.state),
            fatal_slot.clone(),
            pong_tx,
        );

        let (link_tx, link_rx) = oneshot::channel();
        let mut tasks = Vec::with_capacity(3);

        tasks.push(tokio::spawn(recv_loop(
            reader,
            session,
            self.registry.clone(),
            link_tx,
            shutdown.clone(),
            verbose,
        )));
        tasks.push(tokio::spawn(send_loop(
            writer,
            queue_rx,
            limiter,
            fatal_slot.clone(),
            shutdown.clone(),
            verbose,
        )));
        if let Some(pongs) = pong_rx {
            tasks.push(tokio::spawn(keepalive_loop(
                keepalive,
                commands.clone(),
                pongs,
                fatal_slot,
                shutdown.clone(),
            )));
        }

        let mut live = Live {
            id,
            commands,
            shutdown,
            fatal,
            tasks,
        };

        info!("Session {} started, waiting for server", id);

        // Hold registration until the server has proven responsive
        let linked = tokio::select! {
            biased;
            err = &mut live.fatal => Err(err.unwrap_or(Error::ConnectionClosed)),
            linked = link_rx => linked.map_err(|_| Error::ConnectionClosed),
        };
        if let Err(e) = linked {
            error!("Session {} failed before registration: {}", id, e);
            self.teardown(live).await;
            return Err(e);
        }

        self.set_state(State::Registering);
        if let Err(e) = self.register(&live.commands) {
            self.teardown(live).await;
            return Err(e.into());
        }

        self.live = Some(live);
        Ok(())
    }

    fn register(&self, commands: &Commands) -> Result<(), SendError> {
        if let Some(password) = &self.config.password {
            commands.pass(password)?;
        }
        commands.user(&self.config.user, self.config.realname())?;
        commands.nick(&self.config.nick)
    }

    /// Block until the connection ends
    ///
    /// Returns the fatal error, or `Ok(())` on Ctrl-C or when the shutdown
    /// handle is triggered. The connection is torn down either way.
    pub async fn run(&mut self) -> Result<(), Error> {
        let mut live = self.live.take().ok_or(Error::NotConnected)?;

        let result = tokio::select! {
            biased;
            err = &mut live.fatal => match err {
                Ok(e) => Err(e),
                // Every task exited without reporting
                Err(_) => Ok(()),
            },
            _ = live.shutdown.wait() => {
                info!("Session {} shutdown requested", live.id);
                Ok(())
            }
            _ = interrupted() => {
                info!("Session {} interrupted", live.id);
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!("Session {} terminated: {}", live.id, e);
        }

        self.teardown(live).await;
        result
    }

    async fn teardown(&mut self, mut live: Live) {
        self.set_state(State::Terminating);
        live.shutdown.trigger();

        for mut task in live.tasks.drain(..) {
            match tokio::time::timeout(JOIN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Session {} task failed: {}", live.id, e),
                Err(_) => {
                    warn!("Session {} task did not stop, aborting", live.id);
                    task.abort();
                }
            }
        }

        self.rosters.clear();
        self.set_state(State::Disconnected);
        info!("Session {} closed", live.id);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.shutdown.trigger();
        }
    }
}

/// Resolves on Ctrl-C; never resolves if the signal cannot be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn recv_loop<R>(
    reader: R,
    mut session: Session,
    registry: Registry,
    link: oneshot::Sender<()>,
    shutdown: Shutdown,
    verbose: bool,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut link = Some(link);
    let mut buf = Vec::new();
    // Inside a frame that exceeded MAX_LINE_LEN
    let mut oversized = false;

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_LEN as u64);
        let read = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            read = limited.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!("Session {} closed by server", session.id());
                session.fail(Error::ConnectionClosed);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Session {} read failed: {}", session.id(), e);
                session.fail(Error::Io(e));
                break;
            }
        }

        if let Some(link) = link.take() {
            let _ = link.send(());
        }

        if buf.len() >= MAX_LINE_LEN && buf.last() != Some(&b'\n') {
            if !oversized {
                warn!("Dropping line longer than {} bytes", MAX_LINE_LEN);
                oversized = true;
            }
            continue;
        }
        if oversized {
            // Tail of the dropped line
            oversized = false;
            continue;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        if verbose {
            info!("<< {}", line);
        } else {
            trace!("<< {}", line);
        }

        let msg = match Message::parse_at(line, Utc::now()) {
            Ok(msg) => msg,
            Err(ParseError::EmptyMessage) => continue,
            Err(e) => {
                warn!("Skipping unparseable line {:?}: {}", line, e);
                continue;
            }
        };

        if !registry.dispatch(&mut session, &msg) {
            debug!("No handler for {}", msg.command);
        }
    }

    debug!("Receive task ended for {}", session.id());
}

async fn send_loop<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<Message>,
    limiter: RateLimiter,
    fatal: FatalSlot,
    shutdown: Shutdown,
    verbose: bool,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            msg = queue.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        if limiter.acquire().await.is_err() {
            break;
        }

        let line = msg.to_string();
        if verbose {
            info!(">> {}", line);
        } else {
            trace!(">> {}", line);
        }

        let frame = format!("{}\r\n", line);
        let written = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            written = async {
                writer.write_all(frame.as_bytes()).await?;
                writer.flush().await
            } => written,
        };
        if let Err(e) = written {
            error!("Write failed: {}", e);
            fatal.report(Error::Io(e));
            break;
        }
    }

    // A stalled peer must not hold the task open
    if tokio::time::timeout(CLOSE_GRACE, writer.shutdown()).await.is_err() {
        debug!("Writer close timed out");
    }
    debug!("Send task ended");
}

async fn keepalive_loop(
    interval: Duration,
    commands: Commands,
    mut pongs: mpsc::Receiver<String>,
    fatal: FatalSlot,
    shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        // Unsolicited PONGs are not answers to this round
        while pongs.try_recv().is_ok() {}

        let nonce = Nonce::generate();
        match commands.ping(nonce.as_str()) {
            Ok(()) => trace!("Keepalive PING {}", nonce),
            Err(SendError::ChannelClosed) => break,
            // Left to time out
            Err(e) => warn!("Failed to queue keepalive PING: {}", e),
        }

        let reply = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            reply = tokio::time::timeout(interval, pongs.recv()) => reply,
        };

        match reply {
            Ok(Some(payload)) if payload == nonce.as_str() => trace!("Keepalive PONG {}", payload),
            Ok(Some(payload)) => {
                fatal.report(Error::PongMismatch {
                    expected: nonce.0,
                    received: payload,
                });
                break;
            }
            Ok(None) => break,
            Err(_) => {
                fatal.report(Error::PingTimeout);
                break;
            }
        }
    }

    debug!("Keepalive task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf};

    /// Reads from the inner pipe; writes and closes never complete
    struct StalledWriter {
        inner: DuplexStream,
    }

    impl AsyncRead for StalledWriter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for StalledWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_missing_identity_before_dialing() {
        // Nothing listens here; an identity error must come first
        let mut client = Client::new(Config::new("127.0.0.1:1", "", "user"));
        assert!(matches!(client.connect().await, Err(Error::InvalidIdentity(_))));

        let mut client = Client::new(Config::new("127.0.0.1:1", "nick", ""));
        assert!(matches!(client.connect().await, Err(Error::InvalidIdentity(_))));
        assert_eq!(client.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn test_run_without_connect() {
        let mut client = Client::new(Config::new("127.0.0.1:1", "nick", "user"));
        assert!(matches!(client.run().await, Err(Error::NotConnected)));
        assert!(matches!(
            client.send_command("PRIVMSG", &["#a"], Some("hi")),
            Err(Error::NotConnected)
        ));
        assert!(client.commands().is_none());
    }

    #[tokio::test]
    async fn test_server_closing_before_first_line() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        drop(server_side);

        let mut client = Client::new(Config::new("test", "nick", "user"));
        assert!(matches!(
            client.connect_stream(client_side).await,
            Err(Error::ConnectionClosed)
        ));
        assert_eq!(client.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn test_stalled_peer_still_times_out() {
        let (client_side, mut server_side) = tokio::io::duplex(1024);
        server_side
            .write_all(b":irc.test NOTICE * :hello\r\n")
            .await
            .unwrap();

        let mut config = Config::new("test", "nick", "user");
        config.keepalive = Duration::from_millis(100);
        let mut client = Client::new(config);
        client
            .connect_stream(StalledWriter { inner: client_side })
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), client.run())
            .await
            .expect("run returns despite the stuck writer");
        assert!(matches!(result, Err(Error::PingTimeout)), "{:?}", result);
        assert_eq!(client.state(), State::Disconnected);
        drop(server_side);
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server_side);
        let mut lines = BufReader::new(server_read).lines();
        server_write
            .write_all(b":irc.test NOTICE * :hello\r\n")
            .await
            .unwrap();

        let mut client = Client::new(Config::new("test", "nick", "user"));
        client.connect_stream(client_side).await.unwrap();

        let mut flood = b"PING :".to_vec();
        flood.resize(MAX_LINE_LEN * 2, b'x');
        flood.extend_from_slice(b"\r\nPING :after\r\n");
        server_write.write_all(&flood).await.unwrap();

        let mut sent = Vec::new();
        loop {
            let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
                .await
                .expect("client line")
                .unwrap()
                .expect("client still connected");
            if line.starts_with("PONG") {
                assert_eq!(line, "PONG after");
                break;
            }
            sent.push(line);
        }
        assert_eq!(sent, vec!["USER user 0 * :user", "NICK nick"]);
    }
}
