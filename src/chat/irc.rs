//! [`ChatLink`] over a plain IRC connection.
//!
//! Each session runs two tasks next to the gateway:
//!
//! * a reader that frames inbound lines and answers `PING` on its own, so
//!   keepalives work however long the gateway is busy with the player;
//! * a writer that drains an unbounded queue of outbound lines, so that
//!   [`ChatLink::send`] never blocks.
//!
//! Both report failures into the inbound queue, where
//! [`ChatLink::next_event`] picks them up.

use std::{io, ops::ControlFlow, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};

use super::ChatLink;
use crate::{
    config::ChatConfig,
    error::{Error, Result},
    events::{ChatEvent, ChatMessage},
    protocol::{
        self,
        irc::{self as codec, Message},
    },
};

/// Upper bound for registration. Servers may do ident and DNS lookups first.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(60);

/// How often a taken nickname is extended with `_` before giving up.
const MAX_NICK_ATTEMPTS: usize = 5;

/// Numerics for failed joins.
const JOIN_FAILURES: [&str; 5] = ["403", "471", "473", "474", "475"];

/// Chat link to an IRC server.
pub struct Irc {
    config: ChatConfig,
    timeout: Duration,
    nick: String,
    session: Option<Session>,
}

/// One open connection.
struct Session {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<io::Result<String>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Session {
    async fn open(config: &ChatConfig, timeout: Duration) -> Result<Self> {
        let stream = protocol::connect(&config.host, config.port, timeout).await?;
        let (reader, writer) = stream.into_split();

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, queued) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_lines(writer, queued, inbound_tx.clone()));

        let pong = outbound.clone();
        let reader = protocol::spawn_reader(reader, move |line: io::Result<String>| {
            if let Some(token) = line.as_deref().ok().and_then(ping_token) {
                trace!("irc -> PING {token}");
                let _ = pong.send(Message::pong(&token).to_string());
                return ControlFlow::Continue(());
            }

            if inbound_tx.send(line).is_err() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        info!("connected to IRC at {}:{}", config.host, config.port);

        Ok(Self {
            outbound,
            inbound,
            reader,
            writer,
        })
    }

    fn send(&self, message: &Message) {
        // A closed queue means the writer failed, which it already reported.
        let _ = self.outbound.send(message.to_string());
    }

    async fn recv(&mut self) -> Result<Message> {
        loop {
            let line = match self.inbound.recv().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::disconnected("connection to IRC closed")),
            };
            trace!("irc -> {line}");

            match line.parse() {
                Ok(message) => return Ok(message),
                Err(e) => debug!("ignoring line: {e}"),
            }
        }
    }
}

/// Token of a `PING`, if `line` is one.
fn ping_token(line: &str) -> Option<String> {
    let message: Message = line.parse().ok()?;
    (message.command == "PING").then(|| message.param(0).unwrap_or_default().to_owned())
}

async fn write_lines(
    mut writer: OwnedWriteHalf,
    mut queued: mpsc::UnboundedReceiver<String>,
    failures: mpsc::UnboundedSender<io::Result<String>>,
) {
    while let Some(mut line) = queued.recv().await {
        if line.starts_with("PASS ") {
            trace!("irc <- PASS [redacted]");
        } else {
            trace!("irc <- {line}");
        }

        line.push_str("\r\n");
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            let _ = failures.send(Err(e));
            break;
        }
    }
}

impl Irc {
    #[must_use]
    pub fn new(config: &ChatConfig, timeout: Duration) -> Self {
        Self {
            config: config.clone(),
            timeout,
            nick: config.nick.clone(),
            session: None,
        }
    }

    /// Runs registration up to the welcome, then joins the channel.
    async fn register(&mut self, session: &mut Session) -> Result<()> {
        let deadline = Instant::now() + REGISTRATION_TIMEOUT;

        self.nick.clone_from(&self.config.nick);
        if let Some(password) = &self.config.password {
            session.send(&Message::pass(password));
        }
        session.send(&Message::nick(&self.nick));
        session.send(&Message::user(&self.config.nick, &self.config.realname));

        let mut attempts = 1;
        loop {
            let message = tokio::time::timeout_at(deadline, session.recv())
                .await
                .map_err(|_| {
                    Error::deadline_exceeded(format!(
                        "IRC registration did not complete within {}s",
                        REGISTRATION_TIMEOUT.as_secs()
                    ))
                })??;

            match message.command.as_str() {
                codec::RPL_WELCOME => {
                    if let Some(nick) = message.param(0) {
                        nick.clone_into(&mut self.nick);
                    }
                    break;
                }
                codec::ERR_NICKNAMEINUSE => {
                    if attempts >= MAX_NICK_ATTEMPTS {
                        return Err(Error::connection_refused(format!(
                            "nickname {} and {attempts} variants are in use",
                            self.config.nick
                        )));
                    }
                    attempts += 1;

                    self.nick.push('_');
                    warn!("nickname in use, trying {}", self.nick);
                    session.send(&Message::nick(&self.nick));
                }
                codec::ERR_PASSWDMISMATCH => {
                    return Err(Error::connection_refused("IRC server rejected the password"));
                }
                "ERROR" => {
                    return Err(Error::disconnected(format!(
                        "IRC server closed the connection: {}",
                        message.param(0).unwrap_or_default()
                    )));
                }
                _ => {}
            }
        }

        session.send(&Message::join(&self.config.channel));
        info!("registered as {}, joining {}", self.nick, self.config.channel);

        Ok(())
    }

    fn is_me(&self, nick: &str) -> bool {
        codec::eq_ignore_case(nick, &self.nick)
    }

    /// Turns a message after registration into an event, or handles it.
    fn handle(&mut self, message: &Message) -> Option<ChatEvent> {
        match message.command.as_str() {
            "PRIVMSG" => {
                let sender = message.source_nick()?;
                let target = message.param(0)?;
                let text = message.param(1)?;

                // CTCP, including ACTION
                if text.starts_with('\u{1}') {
                    return None;
                }

                let direct = self.is_me(target);
                if !direct && !codec::eq_ignore_case(target, &self.config.channel) {
                    return None;
                }

                Some(ChatEvent::Message(ChatMessage {
                    sender: sender.to_owned(),
                    text: text.to_owned(),
                    direct,
                }))
            }
            "NICK" => {
                if let (Some(old), Some(new)) = (message.source_nick(), message.param(0)) {
                    if self.is_me(old) {
                        info!("nickname changed to {new}");
                        new.clone_into(&mut self.nick);
                    }
                }
                None
            }
            "JOIN" => {
                if message.source_nick().is_some_and(|nick| self.is_me(nick)) {
                    info!("joined {}", self.config.channel);
                }
                None
            }
            "KICK" => {
                let channel = message.param(0)?;
                let kicked = message.param(1)?;
                if self.is_me(kicked) && codec::eq_ignore_case(channel, &self.config.channel) {
                    warn!(
                        "kicked from {channel} by {}: {}; rejoining",
                        message.source_nick().unwrap_or("server"),
                        message.param(2).unwrap_or_default()
                    );
                    if let Some(session) = &self.session {
                        session.send(&Message::join(&self.config.channel));
                    }
                }
                None
            }
            "ERROR" => Some(ChatEvent::Failed(Error::disconnected(format!(
                "IRC server closed the connection: {}",
                message.param(0).unwrap_or_default()
            )))),
            // Nothing said can reach the channel, so give the session up and
            // let the reconnection try again later.
            command if JOIN_FAILURES.contains(&command) => {
                Some(ChatEvent::Failed(Error::connection_refused(format!(
                    "cannot join {}: {}",
                    self.config.channel,
                    message.params.last().map_or("", String::as_str)
                ))))
            }
            _ => None,
        }
    }
}

impl ChatLink for Irc {
    async fn connect(&mut self) -> Result<()> {
        self.disconnect();

        let mut session = Session::open(&self.config, self.timeout).await?;
        self.register(&mut session).await?;
        self.session = Some(session);

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn nick(&self) -> &str {
        &self.nick
    }

    fn send(&mut self, text: &str) {
        let Some(session) = &self.session else {
            debug!("not connected to IRC, dropping: {text}");
            return;
        };

        for message in codec::privmsgs(&self.config.channel, text) {
            session.send(&message);
        }
    }

    async fn next_event(&mut self) -> ChatEvent {
        loop {
            let Some(session) = self.session.as_mut() else {
                return std::future::pending().await;
            };

            match session.recv().await {
                Ok(message) => {
                    if let Some(event) = self.handle(&message) {
                        return event;
                    }
                }
                Err(e) => return ChatEvent::Failed(e),
            }
        }
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!(
                "closed connection to IRC at {}:{}",
                self.config.host, self.config.port
            );
        }
    }
}
