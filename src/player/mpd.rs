//! [`PlayerLink`] over a Music Player Daemon connection.

use std::{io, mem, ops::ControlFlow, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    sync::mpsc,
    task::JoinHandle,
};

use super::{Command, PlayerLink, SongPolicy};
use crate::{
    config::PlayerConfig,
    error::{Error, ErrorKind, Result},
    events::PlayerEvent,
    protocol::{
        self,
        mpd::{self as codec, Line, Pair},
    },
    state::PlayerState,
};

/// Player link to a Music Player Daemon.
pub struct Mpd {
    config: PlayerConfig,
    timeout: Duration,
    session: Option<Session>,
}

/// One open connection.
struct Session {
    writer: OwnedWriteHalf,
    lines: mpsc::UnboundedReceiver<io::Result<String>>,
    reader: JoinHandle<()>,
    timeout: Duration,

    /// An `idle` request is pending on the server.
    idle: bool,
    /// Pairs of an idle response received so far.
    changes: Vec<Pair>,
    /// `noidle` returned a player change.
    missed_change: bool,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Session {
    async fn open(config: &PlayerConfig, timeout: Duration) -> Result<Self> {
        let stream = protocol::connect(&config.host, config.port, timeout).await?;
        let (reader, writer) = stream.into_split();

        let (tx, lines) = mpsc::unbounded_channel();
        let reader = protocol::spawn_reader(reader, move |line| {
            if tx.send(line).is_err() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        let mut session = Self {
            writer,
            lines,
            reader,
            timeout,
            idle: false,
            changes: Vec::new(),
            missed_change: false,
        };

        let version = codec::parse_greeting(&session.recv().await?)?;
        codec::check_version(&version)?;
        info!(
            "connected to MPD {version} at {}:{}",
            config.host, config.port
        );

        Ok(session)
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        if line.starts_with("password ") {
            trace!("mpd <- password [redacted]");
        } else {
            trace!("mpd <- {line}");
        }

        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        tokio::time::timeout(self.timeout, self.writer.write_all(buf.as_bytes())).await??;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.lines.recv()).await? {
            Some(Ok(line)) => {
                trace!("mpd -> {line}");
                Ok(line)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::disconnected("connection to MPD closed")),
        }
    }

    /// Reads one response up to `OK`.
    async fn response(&mut self) -> Result<Vec<Pair>> {
        let mut pairs = Vec::new();
        loop {
            match self.recv().await?.parse::<Line>()? {
                Line::Ok => return Ok(pairs),
                Line::ListOk => {}
                Line::Ack(ack) => return Err(ack.into()),
                Line::Pair(pair) => pairs.push(pair),
            }
        }
    }

    async fn run(&mut self, line: &str) -> Result<Vec<Pair>> {
        self.send(line).await?;
        self.response().await
    }

    async fn subscribe_idle(&mut self) -> Result<()> {
        if !self.idle {
            self.send(&codec::idle()).await?;
            self.idle = true;
        }
        Ok(())
    }

    async fn interrupt_idle(&mut self) -> Result<()> {
        if self.idle {
            self.send("noidle").await?;

            // If the idle request was fulfilled just before, the server
            // ignores `noidle` and this reads the idle response instead.
            let result = self.response().await;
            self.idle = false;

            let mut pairs = mem::take(&mut self.changes);
            pairs.extend(result?);
            if codec::player_changed(&pairs) {
                debug!("player change arrived while interrupting idle");
                self.missed_change = true;
            }
        }
        Ok(())
    }

    /// Waits for the pending idle request to be answered.
    ///
    /// Keeps partial responses in `self`, so dropping the future loses
    /// nothing.
    async fn wait_idle(&mut self) -> Result<Vec<Pair>> {
        loop {
            let line = match self.lines.recv().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::disconnected("connection to MPD closed")),
            };
            trace!("mpd -> {line}");

            match line.parse::<Line>()? {
                Line::Pair(pair) => self.changes.push(pair),
                Line::ListOk => {}
                Line::Ok => {
                    self.idle = false;
                    return Ok(mem::take(&mut self.changes));
                }
                Line::Ack(ack) => {
                    self.idle = false;
                    self.changes.clear();
                    return Err(ack.into());
                }
            }
        }
    }

    async fn fetch(&mut self, previous: &PlayerState, policy: SongPolicy) -> Result<PlayerState> {
        let status = codec::parse_status(&self.run("status").await?)?;

        let track = if policy.wants_song(previous.play_state(), status.state) {
            codec::parse_song(&self.run("currentsong").await?)
        } else {
            previous.track.clone()
        };

        Ok(PlayerState::new(status, track))
    }
}

/// Combines the outcome of an operation with that of re-subscribing after it.
fn settle<T>(result: Result<T>, resubscribed: Result<()>) -> Result<T> {
    match (result, resubscribed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(resubscribe)) => {
            if resubscribe.is_fatal() && !e.is_fatal() {
                warn!("{e}; and then failed to re-subscribe to idle");
                Err(resubscribe)
            } else {
                Err(e)
            }
        }
    }
}

impl Mpd {
    #[must_use]
    pub fn new(config: &PlayerConfig, timeout: Duration) -> Self {
        Self {
            config: config.clone(),
            timeout,
            session: None,
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::not_connected("not connected to MPD"))
    }

    async fn handshake(&self) -> Result<(Session, PlayerState)> {
        let mut session = Session::open(&self.config, self.timeout).await?;

        if let Some(password) = &self.config.password {
            session.run(&codec::password(password)).await?;
        }

        let state = session
            .fetch(&PlayerState::default(), SongPolicy::Fetch)
            .await?;
        session.subscribe_idle().await?;

        Ok((session, state))
    }
}

impl PlayerLink for Mpd {
    async fn connect(&mut self) -> Result<PlayerState> {
        self.disconnect();

        let (session, state) = self.handshake().await?;
        self.session = Some(session);

        Ok(state)
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn next_event(&mut self) -> PlayerEvent {
        let Some(session) = self.session.as_mut().filter(|session| session.idle) else {
            return std::future::pending().await;
        };

        match session.wait_idle().await {
            Ok(changes) => {
                if !codec::player_changed(&changes) {
                    trace!("idle returned without player change: {changes:?}");
                }
                PlayerEvent::Changed
            }
            Err(e) => PlayerEvent::Failed(e),
        }
    }

    async fn rearm(&mut self) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.subscribe_idle().await,
            None => Ok(()),
        }
    }

    async fn call(&mut self, command: Command) -> Result<()> {
        debug!("running {command}");
        let session = self.session()?;
        session.interrupt_idle().await?;

        let result = session
            .run(&codec::encode(command))
            .await
            .map(drop)
            .map_err(|e| match e.kind {
                ErrorKind::ServerSide => Error {
                    kind: ErrorKind::CommandFailed,
                    ..e
                },
                _ => e,
            });

        let resubscribed = session.subscribe_idle().await;
        settle(result, resubscribed)
    }

    async fn fetch_status(
        &mut self,
        previous: &PlayerState,
        policy: SongPolicy,
    ) -> Result<PlayerState> {
        let session = self.session()?;
        session.interrupt_idle().await?;

        let result = session.fetch(previous, policy).await;

        let resubscribed = session.subscribe_idle().await;
        settle(result, resubscribed)
    }

    fn take_missed_change(&mut self) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| mem::take(&mut session.missed_change))
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!(
                "closed connection to MPD at {}:{}",
                self.config.host, self.config.port
            );
        }
    }
}
