use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, warn};

pub(crate) type CancelCallback = Box<dyn Fn() + Send + 'static>;

/// External "stop" button. Only armed while something is playing.
pub(crate) trait CancelTrigger {
    fn arm(&self, on_press: CancelCallback);
    fn disarm(&self);
}

/// Disarms the trigger when dropped, so no exit path leaves it live.
pub(crate) struct ArmedTrigger<'a> {
    trigger: &'a dyn CancelTrigger,
}

impl<'a> ArmedTrigger<'a> {
    pub(crate) fn arm(trigger: &'a dyn CancelTrigger, on_press: CancelCallback) -> Self {
        trigger.arm(on_press);
        Self { trigger }
    }
}

impl Drop for ArmedTrigger<'_> {
    fn drop(&mut self) {
        self.trigger.disarm();
    }
}

struct KeyWatcher {
    stop: Arc<AtomicBool>,
    join_handle: JoinHandle<()>,
    raw_mode: bool,
}

/// Any key press on the controlling terminal counts as the button.
#[derive(Default)]
pub(crate) struct KeyPressTrigger {
    watcher: Mutex<Option<KeyWatcher>>,
}

const KEY_POLL: Duration = Duration::from_millis(50);

impl CancelTrigger for KeyPressTrigger {
    fn arm(&self, on_press: CancelCallback) {
        self.disarm();

        let raw_mode = match enable_raw_mode() {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to enable raw mode, key presses need Enter: {err}");
                false
            }
        };
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("cancel-trigger".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    match event::poll(KEY_POLL) {
                        Ok(true) => match event::read() {
                            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => on_press(),
                            Ok(_) => {}
                            Err(err) => {
                                debug!("terminal event read failed: {err}");
                                break;
                            }
                        },
                        Ok(false) => {}
                        Err(err) => {
                            debug!("terminal event poll failed: {err}");
                            break;
                        }
                    }
                }
            });

        match spawned {
            Ok(join_handle) => {
                let mut slot = match self.watcher.lock() {
                    Ok(slot) => slot,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *slot = Some(KeyWatcher {
                    stop,
                    join_handle,
                    raw_mode,
                });
            }
            Err(err) => {
                warn!("failed to start cancel trigger thread: {err}");
                if raw_mode {
                    let _ = disable_raw_mode();
                }
            }
        }
    }

    fn disarm(&self) {
        let watcher = match self.watcher.lock() {
            Ok(mut watcher) => watcher.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(watcher) = watcher else {
            return;
        };
        watcher.stop.store(true, Ordering::SeqCst);
        let _ = watcher.join_handle.join();
        if watcher.raw_mode {
            if let Err(err) = disable_raw_mode() {
                warn!("failed to restore terminal mode: {err}");
            }
        }
    }
}

impl Drop for KeyPressTrigger {
    fn drop(&mut self) {
        self.disarm();
    }
}
