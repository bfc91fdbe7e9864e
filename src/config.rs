use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

const DEFAULT_PLAYER_HOST: &str = "localhost";
const DEFAULT_PLAYER_PORT: u16 = 6600;
const DEFAULT_PLAYER_TIMEOUT_MS: u64 = 5_000;

/// Ordered name to url mapping, as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMap {
    entries: Vec<(String, String)>,
}

impl NameMap {
    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = Self::default();
        for (name, url) in pairs {
            map.insert(name.into(), url.into());
        }
        map
    }

    fn insert(&mut self, name: String, url: String) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = url,
            None => self.entries.push((name, url)),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, url)| url.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, url)| (name.as_str(), url.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSettings {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_PLAYER_HOST.to_string(),
            port: DEFAULT_PLAYER_PORT,
            timeout: Duration::from_millis(DEFAULT_PLAYER_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub podcasts: NameMap,
    pub radio: NameMap,
    pub player: PlayerSettings,
    pub speech_command: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config at {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let parsed: Value = serde_json::from_str(raw).context("config is not valid JSON")?;
        if !parsed.is_object() {
            return Err(anyhow!("config root must be an object"));
        }

        Ok(Self {
            podcasts: parse_name_map(&parsed, "podcasts")?,
            radio: parse_name_map(&parsed, "radio")?,
            player: parse_player(&parsed)?,
            speech_command: parsed
                .pointer("/speech/command")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|command| !command.is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_name_map(root: &Value, section: &str) -> Result<NameMap> {
    let Some(value) = root.get(section) else {
        return Ok(NameMap::default());
    };
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("`{section}` must map names to urls"))?;

    let mut map = NameMap::default();
    for (name, url) in object {
        let url = url
            .as_str()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| anyhow!("`{section}.{name}` must be a non-empty url string"))?;
        map.insert(name.trim().to_string(), url.to_string());
    }
    Ok(map)
}

fn parse_player(root: &Value) -> Result<PlayerSettings> {
    let mut settings = PlayerSettings::default();
    let Some(player) = root.get("player") else {
        return Ok(settings);
    };

    if let Some(host) = player.get("host").and_then(Value::as_str) {
        settings.host = host.trim().to_string();
    }
    if let Some(port) = player.get("port") {
        let port = port
            .as_u64()
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| anyhow!("`player.port` must be a TCP port number"))?;
        settings.port = port;
    }
    if let Some(timeout_ms) = player.get("timeout_ms") {
        let timeout_ms = timeout_ms
            .as_u64()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| anyhow!("`player.timeout_ms` must be a positive integer"))?;
        settings.timeout = Duration::from_millis(timeout_ms);
    }
    Ok(settings)
}
