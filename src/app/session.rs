use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use super::monitor::{POLL_INTERVAL, StopReason, keep_alive};
use super::player::{Player, PlayerConnection, PlayerConnector, PlayerError};
use super::speech::Speaker;
use super::trigger::CancelTrigger;
use crate::config::NameMap;
use crate::db::{Database, EpisodeRecord};

/// Episodes older than this need a second command before they play.
pub(crate) const STALE_AFTER_HOURS: i64 = 14 * 24;
const HOURS_PER_DAY: i64 = 24;
const PREVIOUS_PREFIX: &str = "previous ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Module {
    Music,
    Radio,
    Podcast,
}

impl Module {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "music" => Some(Self::Music),
            "radio" => Some(Self::Radio),
            "podcast" | "podcasts" => Some(Self::Podcast),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SessionState {
    #[default]
    Idle,
    Dispatching,
    Playing,
    AwaitingConfirmation,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandOutcome {
    /// Playback was issued and supervised until it stopped.
    Played,
    /// A stale episode is pending; the next podcast command confirms it.
    Prompted,
    /// Only spoken output (listings, summaries).
    Spoke,
    /// A transport control such as pause or stop.
    Controlled,
    /// Unknown station, podcast, or no cached episode.
    NotFound,
    /// The player was unreachable or failed mid-command; logged and spoken.
    PlayerUnavailable,
}

/// Mutable state of one controller, carried from command to command.
#[derive(Debug, Default)]
pub(crate) struct Session {
    cancel_requested: Arc<AtomicBool>,
    awaiting_confirmation: bool,
    pending_url: Option<String>,
    keep_alive_suppressed: bool,
    state: SessionState,
    last_stop: Option<StopReason>,
}

impl Session {
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    #[cfg(test)]
    pub(crate) fn pending_url(&self) -> Option<&str> {
        self.pending_url.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn keep_alive_suppressed(&self) -> bool {
        self.keep_alive_suppressed
    }

    pub(crate) fn last_stop(&self) -> Option<StopReason> {
        self.last_stop
    }

    fn begin(&mut self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.keep_alive_suppressed = false;
        self.last_stop = None;
        self.state = SessionState::Dispatching;
    }

    fn abandon_confirmation(&mut self) {
        if self.awaiting_confirmation {
            info!(url = ?self.pending_url, "pending confirmation abandoned");
        }
        self.awaiting_confirmation = false;
        self.pending_url = None;
    }

    /// `Stopped` sticks until the next command so callers can see that playback ended.
    fn finish(&mut self) {
        self.state = if self.awaiting_confirmation {
            SessionState::AwaitingConfirmation
        } else if self.state == SessionState::Stopped {
            SessionState::Stopped
        } else {
            SessionState::Idle
        };
    }
}

/// Resolves voice commands against the catalog and drives the player.
pub(crate) struct Controller<'a> {
    pub(crate) catalog: &'a Database,
    pub(crate) podcasts: &'a NameMap,
    pub(crate) stations: &'a NameMap,
    pub(crate) connector: &'a dyn PlayerConnector,
    pub(crate) speaker: &'a dyn Speaker,
    pub(crate) trigger: &'a dyn CancelTrigger,
    pub(crate) poll_interval: Duration,
    pub(crate) now: fn() -> i64,
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

impl<'a> Controller<'a> {
    pub(crate) fn new(
        catalog: &'a Database,
        podcasts: &'a NameMap,
        stations: &'a NameMap,
        connector: &'a dyn PlayerConnector,
        speaker: &'a dyn Speaker,
        trigger: &'a dyn CancelTrigger,
    ) -> Self {
        Self {
            catalog,
            podcasts,
            stations,
            connector,
            speaker,
            trigger,
            poll_interval: POLL_INTERVAL,
            now: unix_now,
        }
    }

    pub(crate) fn command(
        &self,
        session: &mut Session,
        module: Module,
        voice_command: &str,
    ) -> Result<CommandOutcome> {
        session.begin();
        let result = self.run_command(session, module, voice_command.trim());
        session.finish();
        result
    }

    fn run_command(
        &self,
        session: &mut Session,
        module: Module,
        voice_command: &str,
    ) -> Result<CommandOutcome> {
        info!(?module, voice_command, "handling command");
        if module != Module::Podcast {
            session.abandon_confirmation();
        }

        let mut connection = match PlayerConnection::open(self.connector) {
            Ok(connection) => connection,
            Err(err) => {
                if err.is_timeout() {
                    warn!("player connection timed out");
                } else {
                    warn!("failed to connect to the player: {err}");
                }
                self.speaker.say("Error connecting to the music player");
                return Ok(CommandOutcome::PlayerUnavailable);
            }
        };

        let dispatched = match module {
            Module::Music => self.music(connection.player(), voice_command),
            Module::Radio => self.radio(session, connection.player(), voice_command),
            Module::Podcast => self.podcast(session, connection.player(), voice_command),
        };
        let outcome = match dispatched {
            Ok(outcome) => outcome,
            Err(err) => match err.downcast::<PlayerError>() {
                Ok(player_err) => {
                    warn!("player failed during command: {player_err}");
                    self.speaker.say("Error connecting to the music player");
                    CommandOutcome::PlayerUnavailable
                }
                Err(other) => return Err(other),
            },
        };

        if outcome == CommandOutcome::Played && !session.keep_alive_suppressed {
            session.state = SessionState::Playing;
            self.supervise(session, connection.player());
            session.state = SessionState::Stopped;
        }

        connection.release();
        Ok(outcome)
    }

    fn supervise(&self, session: &mut Session, player: &mut dyn Player) {
        match keep_alive(
            player,
            self.trigger,
            &session.cancel_requested,
            self.poll_interval,
        ) {
            Ok(reason) => {
                if reason == StopReason::Cancelled {
                    session.pending_url = None;
                }
                session.last_stop = Some(reason);
                info!(?reason, "playback stopped");
            }
            Err(err) if err.is_timeout() => warn!("player connection timed out"),
            Err(err) => warn!("lost the player while playing: {err}"),
        }
        if let Err(err) = player.clear_queue() {
            warn!("failed to clear the queue after playback: {err}");
        }
    }

    fn music(&self, player: &mut dyn Player, voice_command: &str) -> Result<CommandOutcome> {
        match voice_command {
            "stop" => {
                player.stop()?;
                player.clear_queue()?;
                Ok(CommandOutcome::Controlled)
            }
            "resume" | "play" => {
                player.pause(false)?;
                Ok(CommandOutcome::Played)
            }
            "pause" => {
                player.pause(true)?;
                Ok(CommandOutcome::Controlled)
            }
            other => {
                info!(command = other, "unknown music command");
                self.speaker.say(&format!("Unknown music command {other}"));
                Ok(CommandOutcome::NotFound)
            }
        }
    }

    fn radio(
        &self,
        session: &mut Session,
        player: &mut dyn Player,
        station: &str,
    ) -> Result<CommandOutcome> {
        if station == "list" {
            info!("enumerating radio stations");
            self.speaker.say("Available stations are");
            for name in self.stations.names() {
                self.speaker.say(name);
            }
            return Ok(CommandOutcome::Spoke);
        }

        let Some(url) = self.stations.lookup(station) else {
            info!(station, "station not found");
            self.speaker
                .say(&format!("radio station {station} not found"));
            return Ok(CommandOutcome::NotFound);
        };

        info!(station, url, "streaming radio");
        self.speaker.say(&format!("tuning the radio to {station}"));
        session.cancel_requested.store(false, Ordering::SeqCst);
        player.clear_queue()?;
        player.enqueue(url)?;
        player.play()?;
        Ok(CommandOutcome::Played)
    }

    fn podcast(
        &self,
        session: &mut Session,
        player: &mut dyn Player,
        voice_command: &str,
    ) -> Result<CommandOutcome> {
        if session.awaiting_confirmation {
            // Any follow-up counts as "yes"; the words themselves are not inspected.
            session.awaiting_confirmation = false;
            info!(answer = voice_command, url = ?session.pending_url, "playback confirmed");
            return self.play_pending(session, player);
        }

        match voice_command {
            "list" => {
                info!("enumerating podcasts");
                self.speaker.say("Available podcasts are");
                for name in self.podcasts.names() {
                    self.speaker.say(name);
                }
                return Ok(CommandOutcome::Spoke);
            }
            "recent" => {
                self.speaker.say("Recent podcasts are");
                for (_, episode, age) in self.newest_episodes()? {
                    self.speaker.say(&format!(
                        "{} uploaded an episode {}",
                        episode.feed_title,
                        age_phrase(age)
                    ));
                }
                return Ok(CommandOutcome::Spoke);
            }
            "today" => {
                self.speaker.say("Today's podcasts are");
                for (name, _, age) in self.newest_episodes()? {
                    if age < HOURS_PER_DAY {
                        self.speaker
                            .say(&format!("{name} uploaded an episode {age} hours ago"));
                    }
                }
                session.keep_alive_suppressed = true;
                return Ok(CommandOutcome::Spoke);
            }
            "yesterday" => {
                self.speaker.say("Yesterday's podcasts are");
                for (name, _, age) in self.newest_episodes()? {
                    if age > HOURS_PER_DAY && age < 2 * HOURS_PER_DAY {
                        self.speaker
                            .say(&format!("{name} uploaded an episode {age} hours ago"));
                    }
                }
                return Ok(CommandOutcome::Spoke);
            }
            _ => {}
        }

        let (podcast, offset) = match voice_command.strip_prefix(PREVIOUS_PREFIX) {
            Some(rest) => (rest.trim(), 1),
            None => (voice_command, 0),
        };

        if !self.podcasts.contains(podcast) {
            info!(podcast, "podcast not found");
            self.speaker.say(&format!("Podcast {podcast} not found"));
            return Ok(CommandOutcome::NotFound);
        }

        let Some(episode) = self.catalog.latest(podcast, offset)? else {
            warn!(podcast, offset, "no cached episode for podcast");
            return Ok(CommandOutcome::NotFound);
        };
        let age = episode.age_hours((self.now)());
        info!(
            podcast,
            feed = episode.feed_title.as_str(),
            episode = episode.episode_title.as_str(),
            url = episode.url.as_str(),
            age_hours = age,
            "resolved podcast episode"
        );

        self.speaker.say(&format!(
            "Playing episode of {} titled {}",
            episode.feed_title, episode.episode_title
        ));
        session.pending_url = Some(episode.url);

        if age > STALE_AFTER_HOURS {
            self.speaker.say(&format!(
                "This episode is {} days old. Do you still want to play it?",
                age / HOURS_PER_DAY
            ));
            session.awaiting_confirmation = true;
            return Ok(CommandOutcome::Prompted);
        }

        self.play_pending(session, player)
    }

    fn play_pending(&self, session: &mut Session, player: &mut dyn Player) -> Result<CommandOutcome> {
        session.cancel_requested.store(false, Ordering::SeqCst);
        let Some(url) = session.pending_url.take() else {
            return Ok(CommandOutcome::NotFound);
        };
        player.clear_queue()?;
        player.enqueue(&url)?;
        player.play()?;
        Ok(CommandOutcome::Played)
    }

    /// Newest cached episode of every configured podcast, with its age in hours.
    fn newest_episodes(&self) -> Result<Vec<(&'a str, EpisodeRecord, i64)>> {
        let now = (self.now)();
        let mut out = Vec::new();
        for name in self.podcasts.names() {
            if let Some(episode) = self.catalog.latest(name, 0)? {
                let age = episode.age_hours(now);
                out.push((name, episode, age));
            }
        }
        Ok(out)
    }
}

pub(crate) fn age_phrase(age_hours: i64) -> String {
    if age_hours < HOURS_PER_DAY {
        format!("{age_hours} hours ago")
    } else {
        format!("{} days ago", age_hours / HOURS_PER_DAY)
    }
}
