use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command as ProcessCommand, Stdio};

use tracing::{debug, warn};

pub(crate) trait Speaker {
    /// Speaks `text`; failures are logged, never surfaced.
    fn say(&self, text: &str);
}

/// Prints every phrase and, when configured, hands it to a TTS program.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandSpeaker {
    program: Option<PathBuf>,
}

impl CommandSpeaker {
    pub(crate) fn new(configured: Option<PathBuf>) -> Self {
        Self {
            program: resolve_tts_bin(env::var_os("PODVOICE_TTS_BIN"), configured),
        }
    }
}

impl Speaker for CommandSpeaker {
    fn say(&self, text: &str) {
        println!("{text}");
        let Some(program) = &self.program else {
            return;
        };

        let status = ProcessCommand::new(program)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => debug!(text, "spoke"),
            Ok(status) => warn!(program = %program.display(), %status, "speech program failed"),
            Err(err) => warn!(program = %program.display(), "failed to launch speech program: {err}"),
        }
    }
}

pub(crate) fn resolve_tts_bin(
    env_value: Option<OsString>,
    configured: Option<PathBuf>,
) -> Option<PathBuf> {
    match env_value {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => configured,
    }
}
