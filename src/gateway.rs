//! The event loop between the player and the chat.
//!
//! A [`Gateway`] owns both links, their reconnection supervisors and the
//! cached [`PlayerState`]. It runs as a single task: exactly one event, be it
//! a player change, a chat line or a retry deadline, is handled to completion
//! before the next one is picked up. The cached state therefore needs no
//! locking, and the links never see it.
//!
//! # Event sources
//!
//! [`Gateway::run`] waits on, in order of priority:
//!
//! 1. the player retry deadline,
//! 2. the chat retry deadline,
//! 3. the next player event,
//! 4. the next chat event.
//!
//! Events of one link are handled in arrival order. Between the two links
//! there is no ordering guarantee.
//!
//! The shutdown token is raced against all of the above, including the
//! handlers themselves: a connect or command that is still in flight when
//! shutdown is requested is abandoned, not awaited.

use std::future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    chat::ChatLink,
    command::{Addressing, ChatCommand},
    config::Config,
    error::{Error, Result},
    events::{ChatEvent, PlayerEvent},
    player::{Command, PlayerLink, SongPolicy},
    state::{abled, PlayState, PlayerState, Track},
    supervisor::{Phase, Retry, Supervisor},
};

pub struct Gateway<P, C> {
    player: P,
    chat: C,
    addressing: Addressing,
    player_retry: Supervisor,
    chat_retry: Supervisor,

    /// Last known player state, replaced wholesale on every fetch.
    state: PlayerState,

    /// Runtime announcement switch, initialized from the configuration.
    announce: bool,
}

/// Completes at `deadline`, or never.
async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

impl<P, C> Gateway<P, C>
where
    P: PlayerLink,
    C: ChatLink,
{
    #[must_use]
    pub fn new(config: &Config, player: P, chat: C) -> Self {
        Self {
            player,
            chat,
            addressing: Addressing::new(config),
            player_retry: Supervisor::new("MPD", config.reconnect_interval),
            chat_retry: Supervisor::new("IRC", config.reconnect_interval),
            state: PlayerState::default(),
            announce: config.announce,
        }
    }

    #[must_use]
    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    #[must_use]
    pub fn announces(&self) -> bool {
        self.announce
    }

    /// Connects both links and handles events until `shutdown` is cancelled.
    ///
    /// Links that fail to connect are retried in the background; only a
    /// terminal failure ends the loop early. Both links are closed on return.
    ///
    /// # Errors
    ///
    /// Returns the terminal error that ended the loop, such as
    /// `ProtocolVersionTooOld`.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let result = tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                info!("shutting down");
                Ok(())
            }

            result = self.serve() => result,
        };

        self.shutdown();
        result
    }

    async fn serve(&mut self) -> Result<()> {
        self.start().await?;

        loop {
            tokio::select! {
                biased;

                () = expire(self.player_retry.deadline()) => self.retry_player().await?,

                () = expire(self.chat_retry.deadline()) => self.retry_chat().await?,

                event = self.player.next_event() => self.handle_player_event(event).await?,

                event = self.chat.next_event() => self.handle_chat_event(event).await?,
            }
        }
    }

    /// Connects the links that are neither up nor waiting for a retry.
    ///
    /// The chat goes first so that it can tell about the player.
    async fn start(&mut self) -> Result<()> {
        if self.chat_retry.phase() == Phase::Idle {
            self.connect_chat().await?;
        }
        if self.player_retry.phase() == Phase::Idle {
            self.connect_player().await?;
        }
        Ok(())
    }

    /// Closes both links and drops pending retries.
    pub fn shutdown(&mut self) {
        self.player_retry.cancel();
        self.chat_retry.cancel();
        self.player.disconnect();
        self.chat.disconnect();
        self.state = PlayerState::default();
    }

    async fn connect_player(&mut self) -> Result<()> {
        if !self.player_retry.begin() {
            return Ok(());
        }

        match self.player.connect().await {
            Ok(state) => {
                self.player_retry.connected();
                self.state = state;
                info!("connected to MPD");
                self.say("Connected to MPD");
                Ok(())
            }
            Err(e) => self.player_lost(e),
        }
    }

    async fn connect_chat(&mut self) -> Result<()> {
        if !self.chat_retry.begin() {
            return Ok(());
        }

        match self.chat.connect().await {
            Ok(()) => {
                self.chat_retry.connected();
                Ok(())
            }
            Err(e) => self.chat_lost(e),
        }
    }

    async fn retry_player(&mut self) -> Result<()> {
        if self.player_retry.is_due(Instant::now()) {
            self.connect_player().await?;
        }
        Ok(())
    }

    async fn retry_chat(&mut self) -> Result<()> {
        if self.chat_retry.is_due(Instant::now()) {
            self.connect_chat().await?;
        }
        Ok(())
    }

    /// Tears down the player session and schedules a reconnection.
    ///
    /// Tells the channel about the loss only when a session existed, so a
    /// failing retry stays quiet.
    fn player_lost(&mut self, error: Error) -> Result<()> {
        let was_connected = self.player_retry.is_connected();

        self.player.disconnect();
        self.state = PlayerState::default();
        if was_connected {
            self.say("Disconnected from MPD");
        }

        match self.player_retry.failed(Instant::now(), &error) {
            Retry::Scheduled(_) => Ok(()),
            Retry::Escalate => Err(error),
        }
    }

    fn chat_lost(&mut self, error: Error) -> Result<()> {
        self.chat.disconnect();

        match self.chat_retry.failed(Instant::now(), &error) {
            Retry::Scheduled(_) => Ok(()),
            Retry::Escalate => Err(error),
        }
    }

    /// Reports a player error in the channel, and drops the session if the
    /// error is fatal.
    fn report_player_error(&mut self, error: Error) -> Result<()> {
        warn!("MPD error: {error}");
        self.say(&format!("MPD error: {}", error.message()));

        if error.is_fatal() {
            self.player_lost(error)
        } else {
            Ok(())
        }
    }

    async fn handle_player_event(&mut self, event: PlayerEvent) -> Result<()> {
        match event {
            PlayerEvent::Changed => self.refresh(self.state.play_state()).await?,
            PlayerEvent::Failed(e) => self.report_player_error(e)?,
        }

        if self.player.is_connected() {
            if let Err(e) = self.player.rearm().await {
                self.report_player_error(e)?;
            }
        }
        Ok(())
    }

    /// Fetches the state after a player change and announces track starts.
    ///
    /// `previous` is the play state the change is measured from. It differs
    /// from the cached one when a command fetched in between.
    async fn refresh(&mut self, previous: PlayState) -> Result<()> {
        let state = match self
            .player
            .fetch_status(&self.state, SongPolicy::OnTrackStart)
            .await
        {
            Ok(state) => state,
            Err(e) => return self.report_player_error(e),
        };

        let starts_track = state.play_state().starts_track(previous);
        debug!("player {previous} -> {}", state.play_state());
        self.state = state;

        if starts_track && self.announce {
            if let Some(announcement) = self.state.track.as_ref().map(Track::announcement) {
                self.say(&announcement);
            }
        }
        Ok(())
    }

    async fn handle_chat_event(&mut self, event: ChatEvent) -> Result<()> {
        let message = match event {
            ChatEvent::Message(message) => message,
            ChatEvent::Failed(e) if e.is_fatal() => return self.chat_lost(e),
            ChatEvent::Failed(e) => {
                warn!("IRC error: {e}");
                return Ok(());
            }
        };

        match self.addressing.parse(&message, self.chat.nick()) {
            None => Ok(()),
            Some(Err(e)) => {
                debug!("{} sent {:?}: {e}", message.sender, message.text);
                self.say(&e.message());
                Ok(())
            }
            Some(Ok(command)) => {
                debug!("{} asked for {command}", message.sender);
                self.dispatch(command).await
            }
        }
    }

    /// Runs a chat command and replies in the channel.
    async fn dispatch(&mut self, command: ChatCommand) -> Result<()> {
        let call = match command {
            ChatCommand::Help => {
                let help = self.addressing.help();
                self.say(&help);
                return Ok(());
            }
            ChatCommand::Announce => {
                self.announce = !self.announce;
                self.say(&format!("Announce {}", abled(self.announce)));
                return Ok(());
            }
            ChatCommand::Status => None,
            ChatCommand::Next => Some(Command::Next),
            ChatCommand::Previous => Some(Command::Previous),
            ChatCommand::Play => Some(Command::Play),
            ChatCommand::TogglePause => Some(Command::TogglePause),
            ChatCommand::Stop => Some(Command::Stop),
            // Toggles flip the cached flag, which may be stale if someone
            // changed it elsewhere since the last fetch.
            ChatCommand::Repeat => Some(Command::SetRepeat(!self.state.status.repeat)),
            ChatCommand::Random => Some(Command::SetRandom(!self.state.status.random)),
        };

        if !self.player.is_connected() {
            self.say("Not connected to MPD");
            return Ok(());
        }

        let before = self.state.play_state();
        let result = match call {
            None => self.say_status().await,
            Some(command) => self.call(command).await,
        };
        if let Err(e) = result {
            self.report_player_error(e)?;
        }

        // The command may have swallowed a change notification.
        if self.player.take_missed_change() && self.player.is_connected() {
            self.refresh(before).await?;
        }
        Ok(())
    }

    async fn say_status(&mut self) -> Result<()> {
        self.state = self
            .player
            .fetch_status(&self.state, SongPolicy::Fetch)
            .await?;

        let line = self.state.status_line(self.announce);
        self.say(&line);
        Ok(())
    }

    async fn call(&mut self, command: Command) -> Result<()> {
        self.player.call(command).await?;

        let reply = match command {
            Command::SetRepeat(on) => format!("Repeat {}", abled(on)),
            Command::SetRandom(on) => format!("Random {}", abled(on)),
            _ => return Ok(()),
        };

        // Options do not wake the idle subscription, so fetch them here.
        self.state = self
            .player
            .fetch_status(&self.state, SongPolicy::Keep)
            .await?;
        self.say(&reply);
        Ok(())
    }

    /// Says `text` in the channel, or drops it while the chat is down.
    fn say(&mut self, text: &str) {
        if self.chat.is_connected() {
            self.chat.send(text);
        } else {
            debug!("not connected to IRC, dropping: {text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, mem, rc::Rc, time::Duration};

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        error::ErrorKind,
        events::ChatMessage,
        state::{PlayState, Status},
    };

    const INTERVAL: Duration = Duration::from_secs(30);
    const STALL: Duration = Duration::from_secs(60);

    /// Counts handlers that are running at the same time.
    #[derive(Clone, Default)]
    struct Overlap {
        active: Rc<Cell<usize>>,
        peak: Rc<Cell<usize>>,
    }

    impl Overlap {
        async fn visit(&self) {
            self.active.set(self.active.get() + 1);
            self.peak.set(self.peak.get().max(self.active.get()));
            tokio::task::yield_now().await;
            self.active.set(self.active.get() - 1);
        }
    }

    struct FakePlayer {
        /// What the server would report.
        server: PlayerState,
        connected: bool,
        refuse: Option<ErrorKind>,
        fail_next: Option<Error>,
        /// Makes commands hang, like a server that stopped answering.
        stall: bool,
        missed: bool,
        connects: usize,
        calls: Vec<Command>,
        fetches: Vec<SongPolicy>,
        events: mpsc::UnboundedReceiver<PlayerEvent>,
        overlap: Overlap,
    }

    impl PlayerLink for FakePlayer {
        async fn connect(&mut self) -> Result<PlayerState> {
            self.overlap.visit().await;
            self.connects += 1;
            if let Some(kind) = self.refuse {
                return Err(Error::new(kind, "connect failed"));
            }
            self.connected = true;
            Ok(self.server.clone())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn next_event(&mut self) -> PlayerEvent {
            if !self.connected {
                return future::pending().await;
            }
            match self.events.recv().await {
                Some(event) => event,
                None => future::pending().await,
            }
        }

        async fn rearm(&mut self) -> Result<()> {
            Ok(())
        }

        async fn call(&mut self, command: Command) -> Result<()> {
            self.overlap.visit().await;
            if self.stall {
                tokio::time::sleep(STALL).await;
            }
            if !self.connected {
                return Err(Error::not_connected("no session"));
            }
            if let Some(e) = self.fail_next.take() {
                return Err(e);
            }

            self.calls.push(command);
            match command {
                Command::SetRepeat(on) => self.server.status.repeat = on,
                Command::SetRandom(on) => self.server.status.random = on,
                _ => {}
            }
            Ok(())
        }

        async fn fetch_status(
            &mut self,
            previous: &PlayerState,
            policy: SongPolicy,
        ) -> Result<PlayerState> {
            self.overlap.visit().await;
            self.fetches.push(policy);

            let track = if policy.wants_song(previous.play_state(), self.server.play_state()) {
                self.server.track.clone()
            } else {
                previous.track.clone()
            };
            Ok(PlayerState::new(self.server.status, track))
        }

        fn take_missed_change(&mut self) -> bool {
            mem::take(&mut self.missed)
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }
    }

    struct FakeChat {
        connected: bool,
        refuse: bool,
        /// Makes registration hang, like a server doing slow lookups.
        stall: bool,
        said: Vec<String>,
        events: mpsc::UnboundedReceiver<ChatEvent>,
        overlap: Overlap,
    }

    impl ChatLink for FakeChat {
        async fn connect(&mut self) -> Result<()> {
            if self.stall {
                tokio::time::sleep(STALL).await;
            }
            if self.refuse {
                return Err(Error::connection_refused("connect failed"));
            }
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn nick(&self) -> &str {
            "mpdirc"
        }

        fn send(&mut self, text: &str) {
            assert_eq!(self.overlap.active.get(), 0, "said something mid-call");
            self.said.push(text.to_owned());
        }

        async fn next_event(&mut self) -> ChatEvent {
            if !self.connected {
                return future::pending().await;
            }
            match self.events.recv().await {
                Some(event) => event,
                None => future::pending().await,
            }
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }
    }

    struct Harness {
        gateway: Gateway<FakePlayer, FakeChat>,
        player_events: mpsc::UnboundedSender<PlayerEvent>,
        chat_events: mpsc::UnboundedSender<ChatEvent>,
        overlap: Overlap,
    }

    fn playing() -> PlayerState {
        PlayerState::new(
            Status {
                state: PlayState::Playing,
                elapsed: 65,
                total: 245,
                repeat: true,
                random: false,
            },
            Some(Track {
                artist: Some(String::from("Artist")),
                title: Some(String::from("Title")),
                album: Some(String::from("Album")),
            }),
        )
    }

    fn stopped() -> PlayerState {
        PlayerState::new(
            Status {
                state: PlayState::Stopped,
                ..Status::default()
            },
            None,
        )
    }

    fn harness(server: PlayerState) -> Harness {
        let config = Config {
            reconnect_interval: INTERVAL,
            ..Config::default()
        };
        let overlap = Overlap::default();
        let (player_events, player_rx) = mpsc::unbounded_channel();
        let (chat_events, chat_rx) = mpsc::unbounded_channel();

        let player = FakePlayer {
            server,
            connected: false,
            refuse: None,
            fail_next: None,
            stall: false,
            missed: false,
            connects: 0,
            calls: Vec::new(),
            fetches: Vec::new(),
            events: player_rx,
            overlap: overlap.clone(),
        };
        let chat = FakeChat {
            connected: false,
            refuse: false,
            stall: false,
            said: Vec::new(),
            events: chat_rx,
            overlap: overlap.clone(),
        };

        Harness {
            gateway: Gateway::new(&config, player, chat),
            player_events,
            chat_events,
            overlap,
        }
    }

    fn line(text: &str) -> ChatEvent {
        ChatEvent::Message(ChatMessage {
            sender: String::from("alice"),
            text: text.to_owned(),
            direct: false,
        })
    }

    impl Harness {
        async fn started(server: PlayerState) -> Self {
            let mut harness = harness(server);
            harness.gateway.start().await.unwrap();
            harness.said();
            harness
        }

        async fn chat(&mut self, text: &str) {
            self.gateway.handle_chat_event(line(text)).await.unwrap();
        }

        async fn change(&mut self, server: PlayerState) {
            self.gateway.player.server = server;
            self.gateway
                .handle_player_event(PlayerEvent::Changed)
                .await
                .unwrap();
        }

        /// Takes what was said so far.
        fn said(&mut self) -> Vec<String> {
            mem::take(&mut self.gateway.chat.said)
        }
    }

    #[tokio::test]
    async fn start_connects_chat_then_player() {
        let mut harness = harness(playing());
        harness.gateway.start().await.unwrap();

        assert!(harness.gateway.chat.connected);
        assert!(harness.gateway.player.connected);
        assert_eq!(harness.gateway.state(), &playing());
        assert_eq!(harness.said(), ["Connected to MPD"]);
    }

    #[tokio::test]
    async fn status_reports_fresh_state() {
        let mut harness = Harness::started(playing()).await;

        harness.chat("!status").await;

        assert_eq!(
            harness.said(),
            ["[playing] Artist - Title (1:05/4:05) | repeat: enabled | random: disabled | announce: enabled"]
        );
        assert_eq!(harness.gateway.player.fetches, [SongPolicy::Fetch]);
        assert!(harness.gateway.player.calls.is_empty());
    }

    #[tokio::test]
    async fn status_twice_differs_only_in_elapsed_time() {
        let mut harness = Harness::started(playing()).await;

        harness.chat("!status").await;
        harness.gateway.player.server.status.elapsed = 70;
        harness.chat("mpdirc: np").await;

        let said = harness.said();
        assert_eq!(said.len(), 2);
        assert!(said[0].contains("(1:05/4:05)"));
        assert!(said[1].contains("(1:10/4:05)"));
        assert_eq!(
            said[0].replace("1:05", "1:10"),
            said[1],
            "only the elapsed time may differ"
        );
    }

    #[tokio::test]
    async fn commands_without_player_are_refused() {
        let mut harness = harness(playing());
        harness.gateway.player.refuse = Some(ErrorKind::ConnectionRefused);
        harness.gateway.start().await.unwrap();
        assert!(harness.said().is_empty());

        harness.chat("!next").await;

        assert_eq!(harness.said(), ["Not connected to MPD"]);
        assert!(harness.gateway.player.calls.is_empty());
        assert_eq!(harness.gateway.player.connects, 1);
    }

    #[tokio::test]
    async fn announces_track_starts_but_not_resumes() {
        let mut harness = Harness::started(stopped()).await;

        harness.change(playing()).await;
        assert_eq!(harness.said(), ["Now playing: Title - Artist (Album)"]);

        let mut paused = playing();
        paused.status.state = PlayState::Paused;
        harness.change(paused).await;
        harness.change(playing()).await;
        assert!(harness.said().is_empty());

        assert_eq!(
            harness.gateway.player.fetches,
            [SongPolicy::OnTrackStart; 3]
        );
    }

    #[tokio::test]
    async fn announcements_follow_the_runtime_switch() {
        let mut harness = Harness::started(stopped()).await;

        harness.chat("!announce").await;
        assert_eq!(harness.said(), ["Announce disabled"]);
        assert!(!harness.gateway.announces());

        harness.change(playing()).await;
        assert!(harness.said().is_empty());

        harness.chat("!status").await;
        assert!(harness.said()[0].ends_with("| announce: disabled"));
    }

    #[tokio::test]
    async fn repeat_toggles_round_trip() {
        let mut harness = Harness::started(playing()).await;

        harness.chat("!repeat").await;
        harness.chat("!repeat").await;

        assert_eq!(harness.said(), ["Repeat disabled", "Repeat enabled"]);
        assert_eq!(
            harness.gateway.player.calls,
            [Command::SetRepeat(false), Command::SetRepeat(true)]
        );
        assert!(harness.gateway.state().status.repeat);
    }

    #[tokio::test]
    async fn toggles_flip_the_cached_flag() {
        let mut harness = Harness::started(playing()).await;

        // Someone enabled random elsewhere; the cache still says disabled.
        harness.gateway.player.server.status.random = true;
        harness.chat("!random").await;

        assert_eq!(harness.gateway.player.calls, [Command::SetRandom(true)]);
        assert_eq!(harness.said(), ["Random enabled"]);
    }

    #[tokio::test]
    async fn failed_commands_keep_the_session() {
        let mut harness = Harness::started(stopped()).await;
        harness.gateway.player.fail_next = Some(Error::command_failed("Not playing"));

        harness.chat("!next").await;

        assert_eq!(harness.said(), ["MPD error: Not playing"]);
        assert!(harness.gateway.player.connected);
        assert_eq!(harness.gateway.player_retry.deadline(), None);
    }

    #[tokio::test]
    async fn fatal_errors_disconnect_once_and_schedule_retry() {
        let mut harness = Harness::started(playing()).await;

        let before = Instant::now();
        harness
            .gateway
            .handle_player_event(PlayerEvent::Failed(Error::disconnected(
                "connection closed",
            )))
            .await
            .unwrap();

        assert_eq!(
            harness.said(),
            ["MPD error: connection closed", "Disconnected from MPD"]
        );
        assert!(!harness.gateway.player.connected);
        assert_eq!(harness.gateway.state(), &PlayerState::default());
        let deadline = harness.gateway.player_retry.deadline().unwrap();
        assert!(deadline >= before + INTERVAL);

        // A failing retry stays quiet.
        harness.gateway.player.refuse = Some(ErrorKind::ConnectionRefused);
        assert!(harness.gateway.player_retry.begin());
        harness.gateway.player_lost(Error::connection_refused("refused")).unwrap();
        assert!(harness.said().is_empty());
    }

    #[tokio::test]
    async fn swallowed_changes_are_caught_up() {
        let mut harness = Harness::started(stopped()).await;
        harness.gateway.player.server = playing();
        harness.gateway.player.missed = true;

        harness.chat("!play").await;

        assert_eq!(harness.gateway.player.calls, [Command::Play]);
        assert_eq!(harness.said(), ["Now playing: Title - Artist (Album)"]);
    }

    #[tokio::test]
    async fn swallowed_resume_is_not_announced() {
        let mut paused = playing();
        paused.status.state = PlayState::Paused;
        let mut harness = Harness::started(paused).await;

        // Someone resumed while the status request held the subscription.
        harness.gateway.player.server = playing();
        harness.gateway.player.missed = true;
        harness.chat("!status").await;

        let said = harness.said();
        assert_eq!(said.len(), 1);
        assert!(said[0].starts_with("[playing] Artist - Title"));
        assert_eq!(
            harness.gateway.player.fetches,
            [SongPolicy::Fetch, SongPolicy::OnTrackStart]
        );
    }

    #[tokio::test]
    async fn swallowed_change_after_toggle_counts_from_before_the_command() {
        let mut harness = Harness::started(stopped()).await;

        // Playback started while the toggle was in flight.
        harness.gateway.player.server = playing();
        harness.gateway.player.missed = true;
        harness.chat("!random").await;

        assert_eq!(
            harness.said(),
            ["Random enabled", "Now playing: Title - Artist (Album)"]
        );
    }

    #[tokio::test]
    async fn unknown_commands_and_help() {
        let mut harness = Harness::started(stopped()).await;

        harness.chat("!dance").await;
        harness.chat("just chatting").await;
        harness.chat("!help").await;

        let said = harness.said();
        assert_eq!(said[0], "Unknown command: dance");
        assert!(said[1].starts_with("Commands: !status, !next"));
        assert_eq!(said.len(), 2);
    }

    #[tokio::test]
    async fn chat_outage_drops_replies_until_reconnected() {
        let mut harness = Harness::started(playing()).await;

        harness
            .gateway
            .handle_chat_event(ChatEvent::Failed(Error::disconnected("EOF")))
            .await
            .unwrap();
        assert!(!harness.gateway.chat.connected);
        assert!(harness.gateway.chat_retry.deadline().is_some());

        harness.change(stopped()).await;
        harness.change(playing()).await;
        assert!(harness.said().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exactly_at_the_deadline() {
        let mut harness = harness(playing());
        harness.gateway.player.refuse = Some(ErrorKind::ConnectionRefused);
        let token = CancellationToken::new();

        let start = Instant::now();
        let result =
            tokio::time::timeout(Duration::from_secs(29), harness.gateway.run(token.clone())).await;
        assert!(result.is_err());
        assert_eq!(harness.gateway.player.connects, 1);
        assert_eq!(
            harness.gateway.player_retry.deadline(),
            Some(start + INTERVAL)
        );

        harness.gateway.player.refuse = None;
        let result =
            tokio::time::timeout(Duration::from_secs(2), harness.gateway.run(token)).await;
        assert!(result.is_err());
        assert_eq!(harness.gateway.player.connects, 2);
        assert!(harness.gateway.player.connected);
        assert_eq!(harness.said(), ["Connected to MPD"]);
    }

    #[tokio::test(start_paused = true)]
    async fn handles_events_one_at_a_time() {
        let mut harness = harness(stopped());
        for _ in 0..5 {
            harness.player_events.send(PlayerEvent::Changed).unwrap();
            harness.chat_events.send(line("!next")).unwrap();
            harness.chat_events.send(line("!status")).unwrap();
        }

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            harness.gateway.run(CancellationToken::new()),
        )
        .await;
        assert!(result.is_err());

        assert_eq!(harness.gateway.player.calls, [Command::Next; 5]);
        assert_eq!(harness.said().len(), 1 + 5);
        assert_eq!(harness.overlap.active.get(), 0);
        assert_eq!(harness.overlap.peak.get(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_links_and_cancels_retries() {
        let mut harness = harness(playing());
        harness.gateway.chat.refuse = true;
        let token = CancellationToken::new();
        token.cancel();

        harness.gateway.run(token).await.unwrap();

        assert!(!harness.gateway.player.connected);
        assert!(!harness.gateway.chat.connected);
        assert_eq!(harness.gateway.chat_retry.deadline(), None);
        assert_eq!(harness.gateway.player_retry.deadline(), None);
    }

    /// Cancels `token` one second into a paused clock.
    fn cancel_after_a_second(token: &CancellationToken) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_a_pending_connect() {
        let mut harness = harness(playing());
        harness.gateway.chat.stall = true;
        let token = CancellationToken::new();
        cancel_after_a_second(&token);

        let start = Instant::now();
        harness.gateway.run(token).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!harness.gateway.chat.connected);
        assert_eq!(harness.gateway.player.connects, 0);
        assert_eq!(harness.gateway.chat_retry.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_a_command_in_flight() {
        let mut harness = harness(playing());
        harness.gateway.player.stall = true;
        harness.chat_events.send(line("!next")).unwrap();
        let token = CancellationToken::new();
        cancel_after_a_second(&token);

        let start = Instant::now();
        harness.gateway.run(token).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(harness.gateway.player.calls.is_empty());
        assert!(!harness.gateway.player.connected);
        assert_eq!(harness.said(), ["Connected to MPD"]);
    }

    #[tokio::test]
    async fn too_old_player_ends_the_gateway() {
        let mut harness = harness(playing());
        harness.gateway.player.refuse = Some(ErrorKind::ProtocolVersionTooOld);

        let err = harness
            .gateway
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ProtocolVersionTooOld);
        assert!(!harness.gateway.chat.connected);
        assert_eq!(harness.gateway.player_retry.deadline(), None);
    }
}
