use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::player::{Player, PlayerError, PlayerState};
use super::trigger::{ArmedTrigger, CancelTrigger};

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    /// The player reached its stop state on its own.
    Finished,
    /// The cancel trigger fired and playback was stopped.
    Cancelled,
}

/// Blocks while the player is busy, waking at least every `poll` to check
/// status and immediately when the trigger fires.
pub(crate) fn keep_alive(
    player: &mut dyn Player,
    trigger: &dyn CancelTrigger,
    cancel_requested: &Arc<AtomicBool>,
    poll: Duration,
) -> Result<StopReason, PlayerError> {
    let (press_tx, press_rx) = mpsc::channel::<()>();
    let flag = Arc::clone(cancel_requested);
    let _armed = ArmedTrigger::arm(
        trigger,
        Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            let _ = press_tx.send(());
        }),
    );

    loop {
        if cancel_requested.load(Ordering::SeqCst) {
            info!("stopping playback by button press");
            player.stop()?;
            return Ok(StopReason::Cancelled);
        }
        if player.status()?.state == PlayerState::Stop {
            debug!("player reported stop");
            return Ok(StopReason::Finished);
        }
        match press_rx.recv_timeout(poll) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            // The trigger dropped its callback; fall back to plain polling.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(poll),
        }
    }
}
