mod feed;
mod monitor;
mod player;
mod session;
mod speech;
mod sync;
mod trigger;


use std::io::{self, BufRead};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::cli::{Cli, Command, ModuleArg};
use crate::config::Config;
use crate::db::Database;
use crate::http::RetryPolicy;
use crate::paths::{config_file_path, database_file_path};

use self::feed::HttpFeedSource;
use self::player::MpdConnector;
use self::session::{CommandOutcome, Controller, Module, Session, age_phrase, unix_now};
use self::speech::CommandSpeaker;
use self::sync::{SYNC_INTERVAL, Syncer, spawn_periodic};
use self::trigger::KeyPressTrigger;

pub fn run(cli: Cli) -> Result<()> {
    let config_path = config_file_path(cli.config.as_deref())?;
    let config = Config::load(&config_path)?;
    let db_path = database_file_path(cli.db.as_deref())?;

    match cli.command {
        Command::Sync { podcast } => run_sync(&config, &db_path, podcast.as_deref())?,
        Command::Command { module, words } => run_command(&config, &db_path, module, &words)?,
        Command::Listen => run_listen(&config, &db_path)?,
        Command::Latest { podcast, offset } => run_latest(&db_path, &podcast, offset)?,
        Command::Episodes { podcast } => run_episodes(&db_path, &podcast)?,
        Command::List => run_list(&config, &db_path)?,
    }

    Ok(())
}

impl From<ModuleArg> for Module {
    fn from(arg: ModuleArg) -> Self {
        match arg {
            ModuleArg::Music => Module::Music,
            ModuleArg::Radio => Module::Radio,
            ModuleArg::Podcast => Module::Podcast,
        }
    }
}

fn syncer_for(config: &Config) -> Syncer {
    let source = HttpFeedSource::new(RetryPolicy::default());
    Syncer::new(config.podcasts.clone(), Box::new(source))
}

fn run_sync(config: &Config, db_path: &Path, podcast: Option<&str>) -> Result<()> {
    if let Some(name) = podcast {
        if !config.podcasts.contains(name) {
            println!("Podcast `{name}` is not configured.");
            return Ok(());
        }
    }

    let db = Database::open(db_path)?;
    let report = syncer_for(config).sync(&db, podcast)?;
    println!(
        "Synced {} feed(s): {} episode(s) stored, {} entr(ies) skipped, {} empty, {} failed.",
        report.feeds_synced, report.stored, report.skipped, report.feeds_empty, report.feeds_failed
    );
    for name in &report.unrecognized_feeds {
        println!("Warning: the feed for `{name}` is in an unknown format.");
    }
    println!("Catalog holds {} episode(s).", db.count()?);
    Ok(())
}

fn run_command(config: &Config, db_path: &Path, module: ModuleArg, words: &[String]) -> Result<()> {
    let db = Database::open(db_path)?;
    let connector = MpdConnector::new(config.player.clone());
    let speaker = CommandSpeaker::new(config.speech_command.clone());
    let trigger = KeyPressTrigger::default();
    let controller = Controller::new(
        &db,
        &config.podcasts,
        &config.radio,
        &connector,
        &speaker,
        &trigger,
    );

    let mut session = Session::default();
    let outcome = controller.command(&mut session, module.into(), &words.join(" "))?;
    if outcome == CommandOutcome::Prompted {
        println!("Confirmation needs a follow-up command; use `podvoice listen` to answer.");
    }
    Ok(())
}

/// Splits `<module> <words...>` into its parts.
pub(crate) fn parse_voice_line(line: &str) -> Option<(Module, String)> {
    let line = line.trim();
    let (module, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let module = Module::parse(module)?;
    let words = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    (!words.is_empty()).then_some((module, words))
}

fn run_listen(config: &Config, db_path: &Path) -> Result<()> {
    let db = Database::open(db_path)?;
    let sync_db = Database::open(db_path)?;
    let sync_handle = spawn_periodic(sync_db, syncer_for(config), SYNC_INTERVAL)?;

    let connector = MpdConnector::new(config.player.clone());
    let speaker = CommandSpeaker::new(config.speech_command.clone());
    let trigger = KeyPressTrigger::default();
    let controller = Controller::new(
        &db,
        &config.podcasts,
        &config.radio,
        &connector,
        &speaker,
        &trigger,
    );
    let mut session = Session::default();

    println!("Listening. Enter `<music|radio|podcast> <command>`; any key stops playback; `quit` exits.");
    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read command from stdin")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "quit" | "exit") {
            break;
        }

        let Some((module, words)) = parse_voice_line(trimmed) else {
            println!("Unrecognized command: {trimmed}");
            continue;
        };
        match controller.command(&mut session, module, &words) {
            Ok(outcome) => {
                info!(?outcome, state = ?session.state(), stop = ?session.last_stop(), "command finished");
                if session.awaiting_confirmation() {
                    println!("Enter any podcast command to confirm.");
                }
            }
            Err(err) => error!("command failed: {err:#}"),
        }
    }

    sync_handle.stop();
    Ok(())
}

fn run_latest(db_path: &Path, podcast: &str, offset: u32) -> Result<()> {
    let db = Database::open(db_path)?;
    match db.latest(podcast, offset)? {
        Some(episode) => {
            println!("Podcast: {}", episode.feed_title);
            println!("Episode: {}", episode.episode_title);
            println!("Url:     {}", episode.url);
            println!("Age:     {}", age_phrase(episode.age_hours(unix_now())));
        }
        None => println!("No cached episode for `{podcast}` at offset {offset}. Run `podvoice sync` first."),
    }
    Ok(())
}

fn run_episodes(db_path: &Path, podcast: &str) -> Result<()> {
    let db = Database::open(db_path)?;
    let episodes = db.episodes(podcast)?;
    if episodes.is_empty() {
        println!("No cached episodes for `{podcast}`. Run `podvoice sync` first.");
        return Ok(());
    }

    let now = unix_now();
    println!("{:<50} {:<14}", "EPISODE", "AGE");
    for episode in episodes {
        println!(
            "{:<50} {:<14}",
            truncate(&episode.episode_title, 50),
            age_phrase(episode.age_hours(now))
        );
    }
    Ok(())
}

fn run_list(config: &Config, db_path: &Path) -> Result<()> {
    if config.podcasts.is_empty() {
        println!("No podcasts configured.");
        return Ok(());
    }

    let db = Database::open(db_path)?;
    let now = unix_now();
    println!("{:<20} {:<44} {:<14}", "PODCAST", "LATEST EPISODE", "AGE");
    for name in config.podcasts.names() {
        let (title, age) = match db.latest(name, 0)? {
            Some(episode) => (episode.episode_title.clone(), age_phrase(episode.age_hours(now))),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<20} {:<44} {:<14}",
            truncate(name, 20),
            truncate(&title, 44),
            age
        );
    }
    Ok(())
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}
