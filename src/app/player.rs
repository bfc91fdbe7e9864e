use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PlayerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlayerState {
    Play,
    Pause,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlayerStatus {
    pub(crate) state: PlayerState,
}

#[derive(Debug, Error)]
pub(crate) enum PlayerError {
    #[error("player connection timed out")]
    Timeout,
    #[error("player i/o failed: {0}")]
    Io(#[source] io::Error),
    #[error("player rejected command: {0}")]
    Protocol(String),
    #[error("player connection is closed")]
    Closed,
}

impl PlayerError {
    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<io::Error> for PlayerError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Io(err),
        }
    }
}

pub(crate) trait Player {
    fn clear_queue(&mut self) -> Result<(), PlayerError>;
    fn enqueue(&mut self, url: &str) -> Result<(), PlayerError>;
    fn play(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self, paused: bool) -> Result<(), PlayerError>;
    fn stop(&mut self) -> Result<(), PlayerError>;
    fn status(&mut self) -> Result<PlayerStatus, PlayerError>;
    fn close(&mut self) -> Result<(), PlayerError>;
    fn disconnect(&mut self) -> Result<(), PlayerError>;
}

pub(crate) trait PlayerConnector {
    fn connect(&self) -> Result<Box<dyn Player>, PlayerError>;
}

/// Owns a connected player and releases it exactly once, on every exit path.
pub(crate) struct PlayerConnection {
    player: Box<dyn Player>,
    released: bool,
}

impl PlayerConnection {
    pub(crate) fn open(connector: &dyn PlayerConnector) -> Result<Self, PlayerError> {
        Ok(Self {
            player: connector.connect()?,
            released: false,
        })
    }

    pub(crate) fn player(&mut self) -> &mut dyn Player {
        self.player.as_mut()
    }

    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.player.close() {
            log_release_error("close", &err);
        }
        if let Err(err) = self.player.disconnect() {
            log_release_error("disconnect", &err);
        }
    }
}

impl Drop for PlayerConnection {
    fn drop(&mut self) {
        self.release();
    }
}

fn log_release_error(step: &str, err: &PlayerError) {
    if err.is_timeout() {
        warn!(step, "player connection timed out");
    } else {
        debug!(step, "player release failed: {err}");
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MpdConnector {
    settings: PlayerSettings,
}

impl MpdConnector {
    pub(crate) fn new(settings: PlayerSettings) -> Self {
        Self { settings }
    }
}

impl PlayerConnector for MpdConnector {
    fn connect(&self) -> Result<Box<dyn Player>, PlayerError> {
        let player = MpdPlayer::connect(&self.settings)?;
        Ok(Box::new(player))
    }
}

/// MPD text protocol client over a plain TCP socket.
pub(crate) struct MpdPlayer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    open: bool,
}

impl MpdPlayer {
    pub(crate) fn connect(settings: &PlayerSettings) -> Result<Self, PlayerError> {
        let addrs = (settings.host.as_str(), settings.port).to_socket_addrs()?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, settings.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(settings.timeout))?;
                    stream.set_write_timeout(Some(settings.timeout))?;
                    return Self::handshake(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => err.into(),
            None => PlayerError::Protocol(format!(
                "no address found for {}:{}",
                settings.host, settings.port
            )),
        })
    }

    fn handshake(stream: TcpStream) -> Result<Self, PlayerError> {
        let writer = stream.try_clone()?;
        let mut player = Self {
            reader: BufReader::new(stream),
            writer,
            open: true,
        };
        let greeting = player.read_line()?;
        if !greeting.starts_with("OK MPD") {
            return Err(PlayerError::Protocol(format!(
                "unexpected greeting `{greeting}`"
            )));
        }
        debug!(greeting = greeting.as_str(), "connected to MPD");
        Ok(player)
    }

    fn read_line(&mut self) -> Result<String, PlayerError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(PlayerError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Sends one command and collects `key: value` lines up to the final `OK`.
    fn command(&mut self, line: &str) -> Result<Vec<(String, String)>, PlayerError> {
        if !self.open {
            return Err(PlayerError::Closed);
        }
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let mut pairs = Vec::new();
        loop {
            let response = self.read_line()?;
            if response == "OK" {
                return Ok(pairs);
            }
            if let Some(ack) = response.strip_prefix("ACK ") {
                return Err(PlayerError::Protocol(ack.to_string()));
            }
            if let Some((key, value)) = response.split_once(": ") {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }
}

pub(crate) fn quote_argument(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

pub(crate) fn parse_state(pairs: &[(String, String)]) -> Result<PlayerState, PlayerError> {
    let state = pairs
        .iter()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.as_str());
    match state {
        Some("play") => Ok(PlayerState::Play),
        Some("pause") => Ok(PlayerState::Pause),
        Some("stop") => Ok(PlayerState::Stop),
        Some(other) => Err(PlayerError::Protocol(format!("unknown state `{other}`"))),
        None => Err(PlayerError::Protocol("status without state".to_string())),
    }
}

impl Player for MpdPlayer {
    fn clear_queue(&mut self) -> Result<(), PlayerError> {
        self.command("clear").map(drop)
    }

    fn enqueue(&mut self, url: &str) -> Result<(), PlayerError> {
        self.command(&format!("add {}", quote_argument(url))).map(drop)
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        self.command("play").map(drop)
    }

    fn pause(&mut self, paused: bool) -> Result<(), PlayerError> {
        self.command(if paused { "pause 1" } else { "pause 0" })
            .map(drop)
    }

    fn stop(&mut self) -> Result<(), PlayerError> {
        self.command("stop").map(drop)
    }

    fn status(&mut self) -> Result<PlayerStatus, PlayerError> {
        let pairs = self.command("status")?;
        Ok(PlayerStatus {
            state: parse_state(&pairs)?,
        })
    }

    fn close(&mut self) -> Result<(), PlayerError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        // MPD hangs up on `close` without answering.
        self.writer.write_all(b"close\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), PlayerError> {
        self.open = false;
        match self.writer.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn quote_argument_escapes_quotes_and_backslashes() {
        assert_eq!(
            quote_argument(r#"https://cdn.test/a "b"\c.mp3"#),
            r#""https://cdn.test/a \"b\"\\c.mp3""#
        );
    }

    #[test]
    fn parse_state_reads_status_pairs() {
        let pairs = vec![
            ("volume".to_string(), "80".to_string()),
            ("state".to_string(), "pause".to_string()),
        ];
        assert_eq!(parse_state(&pairs).expect("state"), PlayerState::Pause);
        assert!(parse_state(&[]).is_err());
    }

    #[test]
    fn timeouts_are_classified() {
        let err: PlayerError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(err.is_timeout());
        let err: PlayerError = io::Error::new(io::ErrorKind::PermissionDenied, "no").into();
        assert!(!err.is_timeout());
    }

    #[test]
    fn mpd_player_speaks_the_text_protocol() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind fake mpd");
        let port = listener.local_addr().expect("local addr").port();
        let (seen_tx, seen_rx) = mpsc::channel::<String>();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut writer = stream.try_clone().expect("clone");
            let mut reader = BufReader::new(stream);
            writer.write_all(b"OK MPD 0.23.5\n").expect("greet");
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                seen_tx.send(line.clone()).expect("record command");
                match line.as_str() {
                    "close" => break,
                    "status" => writer
                        .write_all(b"volume: 50\nstate: play\nOK\n")
                        .expect("status"),
                    "play" => writer
                        .write_all(b"ACK [2@0] {play} Bad song index\n")
                        .expect("ack"),
                    _ => writer.write_all(b"OK\n").expect("ok"),
                }
            }
        });

        let settings = PlayerSettings {
            host: "127.0.0.1".to_string(),
            port,
            timeout: Duration::from_secs(2),
        };
        let mut player = MpdPlayer::connect(&settings).expect("connect");
        player.clear_queue().expect("clear");
        player.enqueue("https://cdn.test/ep.mp3").expect("add");
        let err = player.play().expect_err("fake server rejects play");
        assert!(matches!(err, PlayerError::Protocol(_)));
        assert_eq!(
            player.status().expect("status").state,
            PlayerState::Play
        );
        player.close().expect("close");
        player.disconnect().expect("disconnect");
        server.join().expect("server thread");

        let seen = seen_rx.try_iter().collect::<Vec<_>>();
        assert_eq!(
            seen,
            [
                "clear",
                "add \"https://cdn.test/ep.mp3\"",
                "play",
                "status",
                "close"
            ]
        );
    }
}
