use std::net::SocketAddr;
use std::time::{Duration, Instant};

use irc_engine::{Client, Config, Error, Message, ParseError, SendError, Session, State};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

/// Scripted server end of one connection
struct FakeServer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeServer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("client line")
            .unwrap()
            .expect("client still connected")
    }

    /// Read until a line with `command` shows up
    async fn expect(&mut self, command: &str) -> Message {
        loop {
            let msg = Message::parse(&self.recv().await).unwrap();
            if msg.command == command {
                return msg;
            }
        }
    }
}

fn config(addr: SocketAddr) -> Config {
    let mut config = Config::new(addr.to_string(), "bot", "bot");
    config.realname = "Bot Real".to_string();
    config.send_interval = Duration::from_millis(10);
    config.send_burst = 16;
    config
}

/// Connect `client` and complete the server side of registration
async fn connect(mut client: Client, listener: &TcpListener) -> (Client, FakeServer) {
    let connecting = tokio::spawn(async move { client.connect().await.map(|_| client) });
    let mut server = FakeServer::accept(listener).await;
    server.send(":irc.test NOTICE * :*** Looking up your hostname").await;
    let client = timeout(WAIT, connecting).await.unwrap().unwrap().unwrap();
    server.expect("NICK").await;
    (client, server)
}

fn run(mut client: Client) -> JoinHandle<Result<(), Error>> {
    tokio::spawn(async move { client.run().await })
}

async fn listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

#[tokio::test]
async fn registration_waits_for_first_server_line() {
    let listener = listener().await;
    let mut config = config(listener.local_addr().unwrap());
    config.password = Some("secret".to_string());
    let mut client = Client::new(config);

    let connecting = tokio::spawn(async move { client.connect().await.map(|_| client) });
    let mut server = FakeServer::accept(&listener).await;

    // Nothing is sent before the server speaks
    assert!(timeout(Duration::from_millis(150), server.lines.next_line())
        .await
        .is_err());

    server.send(":irc.test NOTICE * :*** Looking up your hostname").await;
    let client = timeout(WAIT, connecting).await.unwrap().unwrap().unwrap();

    assert_eq!(server.recv().await, "PASS secret");
    assert_eq!(server.recv().await, "USER bot 0 * :Bot Real");
    assert_eq!(server.recv().await, "NICK bot");
    assert_eq!(client.state(), State::Registering);
}

#[tokio::test]
async fn welcome_establishes_and_ping_is_answered() {
    let listener = listener().await;
    let client = Client::new(config(listener.local_addr().unwrap()));
    let (client, mut server) = connect(client, &listener).await;

    server.send(":irc.test 001 bot :Welcome to the test network").await;
    // Malformed lines are skipped without ending the session
    server.send(":nick!broken PRIVMSG #a :x").await;
    server.send("PING :irc.test").await;
    assert_eq!(server.recv().await, "PONG irc.test");
    assert_eq!(client.state(), State::Established);
}

#[tokio::test]
async fn server_error_terminates_run() {
    let listener = listener().await;
    let client = Client::new(config(listener.local_addr().unwrap()));
    let (client, mut server) = connect(client, &listener).await;

    let mut state = client.watch_state();
    let running = run(client);
    server.send("ERROR :Closing Link: bot (K-Lined)").await;

    let result = timeout(WAIT, running).await.unwrap().unwrap();
    match result {
        Err(Error::Server(reason)) => assert_eq!(reason, "Closing Link: bot (K-Lined)"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(*state.borrow_and_update(), State::Disconnected);
}

#[tokio::test]
async fn server_hangup_terminates_run() {
    let listener = listener().await;
    let client = Client::new(config(listener.local_addr().unwrap()));
    let (client, server) = connect(client, &listener).await;

    let running = run(client);
    drop(server);

    let result = timeout(WAIT, running).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::ConnectionClosed)), "{:?}", result);
}

#[tokio::test]
async fn nick_collision_retries_with_underscore() {
    let listener = listener().await;
    let mut client = Client::new(config(listener.local_addr().unwrap()));

    let (seen_tx, mut seen_rx) = mpsc::channel(8);
    client.on_command("433", move |s: &mut Session, _: &Message| {
        let _ = seen_tx.try_send(s.nick().to_string());
    });
    let (client, mut server) = connect(client, &listener).await;

    server.send(":irc.test 433 * bot :Nickname is already in use").await;
    assert_eq!(server.recv().await, "NICK bot_");

    // Host handlers run after the built-in one and see the new nick
    let seen = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(seen, "bot_");

    server.send(":irc.test 001 bot_ :Welcome").await;
    server.send("PING :sync").await;
    assert_eq!(server.recv().await, "PONG sync");
    assert!(seen_rx.try_recv().is_err());
    drop(client);
}

#[tokio::test]
async fn roster_reader_waits_for_end_of_names() {
    let listener = listener().await;
    let client = Client::new(config(listener.local_addr().unwrap()));
    let (client, mut server) = connect(client, &listener).await;
    let rosters = client.rosters();

    server.send(":irc.test 005 bot PREFIX=(ov)@+ :are supported by this server").await;
    server.send(":irc.test 353 bot = #rust :@alice +bob").await;

    // Wait for the receive task to pick up the first reply
    timeout(WAIT, async {
        while rosters.snapshot("#rust").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let reader = {
        let rosters = rosters.clone();
        tokio::spawn(async move { rosters.members("#rust").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!reader.is_finished());

    server.send(":irc.test 353 bot = #rust :carol").await;
    server.send(":irc.test 366 bot #rust :End of /NAMES list.").await;

    let members = timeout(WAIT, reader).await.unwrap().unwrap();
    assert_eq!(
        members,
        Some(vec!["alice".to_string(), "bob".to_string(), "carol".to_string()])
    );
    drop(client);
}

#[tokio::test]
async fn send_raw_validates_and_queues() {
    let listener = listener().await;
    let client = Client::new(config(listener.local_addr().unwrap()));
    let (client, mut server) = connect(client, &listener).await;

    assert!(matches!(
        client.send_raw(""),
        Err(Error::Send(SendError::Parse(ParseError::EmptyMessage)))
    ));
    client.send_raw("privmsg #rust :hello   world").unwrap();
    client.send_command("join", &["#rust"], None).unwrap();

    assert_eq!(server.recv().await, "PRIVMSG #rust :hello   world");
    assert_eq!(server.recv().await, "JOIN #rust");
}

#[tokio::test]
async fn outbound_commands_are_paced() {
    let listener = listener().await;
    let mut config = config(listener.local_addr().unwrap());
    config.send_interval = Duration::from_millis(200);
    config.send_burst = 2;
    let client = Client::new(config);

    // USER and NICK use up the burst
    let (client, mut server) = connect(client, &listener).await;
    let after_nick = Instant::now();

    let commands = client.commands().unwrap();
    commands.privmsg("#rust", "one").unwrap();
    commands.privmsg("#rust", "two").unwrap();

    assert_eq!(server.recv().await, "PRIVMSG #rust :one");
    assert_eq!(server.recv().await, "PRIVMSG #rust :two");
    assert!(after_nick.elapsed() >= Duration::from_millis(300));
    drop(client);
}

#[tokio::test]
async fn keepalive_survives_matching_pongs() {
    let listener = listener().await;
    let mut config = config(listener.local_addr().unwrap());
    config.keepalive = Duration::from_millis(150);
    let client = Client::new(config);
    let (client, mut server) = connect(client, &listener).await;

    let shutdown = client.shutdown_handle().unwrap();
    let running = run(client);

    for _ in 0..4 {
        let ping = server.expect("PING").await;
        let nonce = ping.params[0].clone();
        server.send(&format!(":irc.test PONG irc.test :{}", nonce)).await;
    }
    assert!(!running.is_finished());

    shutdown.trigger();
    let result = timeout(WAIT, running).await.unwrap().unwrap();
    assert!(result.is_ok(), "{:?}", result);
}

#[tokio::test]
async fn keepalive_mismatched_pong_is_fatal() {
    let listener = listener().await;
    let mut config = config(listener.local_addr().unwrap());
    config.keepalive = Duration::from_millis(150);
    let client = Client::new(config);
    let (client, mut server) = connect(client, &listener).await;
    let running = run(client);

    let ping = server.expect("PING").await;
    server.send(":irc.test PONG irc.test :not-the-nonce").await;

    let result = timeout(WAIT, running).await.unwrap().unwrap();
    match result {
        Err(Error::PongMismatch { expected, received }) => {
            assert_eq!(expected, ping.params[0]);
            assert_eq!(received, "not-the-nonce");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn keepalive_without_pong_times_out() {
    let listener = listener().await;
    let mut config = config(listener.local_addr().unwrap());
    config.keepalive = Duration::from_millis(150);
    let client = Client::new(config);
    let (client, mut server) = connect(client, &listener).await;
    let running = run(client);

    server.expect("PING").await;
    let started = Instant::now();

    let result = timeout(WAIT, running).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::PingTimeout)), "{:?}", result);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn missing_identity_fails_before_dialing() {
    let listener = listener().await;
    let mut config = config(listener.local_addr().unwrap());
    config.user = String::new();
    let mut client = Client::new(config);

    assert!(matches!(client.connect().await, Err(Error::InvalidIdentity(_))));
    // No connection attempt reached the listener
    assert!(timeout(Duration::from_millis(100), listener.accept())
        .await
        .is_err());
}
