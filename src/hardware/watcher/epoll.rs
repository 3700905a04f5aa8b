//! Epoll Event Watcher
//!
//! Multiplexes readiness notifications for a set of watched files onto a
//! single channel. One dispatch thread per started watcher set blocks in
//! `epoll_wait` without a timeout and publishes an [`Event`] per ready
//! descriptor.
//!
//! Registration is safe while the dispatch loop runs: both indexes live
//! behind one lock, which the loop takes only to translate a descriptor
//! back to its file name. Each start owns its own epoll instance plus a
//! wake-up eventfd; `stop` signals the eventfd, so the retired loop returns
//! from its wait and releases the instance. An event the loop took off the
//! queue before `stop` may still be delivered.

use super::events::{Event, Watcher};
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default event channel capacity
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Raw events drained per `epoll_wait`
const MAX_EVENTS: usize = 32;

/// Epoll data of the wake-up eventfd; descriptors are never negative
const WAKE_TOKEN: u64 = u64::MAX;

// =============================================================================
// Internal State
// =============================================================================

struct Registration {
    watcher: Watcher,
    file: File,
}

impl Registration {
    fn register(&self, epoll: &Epoll) -> Result<()> {
        let flags = EpollFlags::from_bits_truncate(self.watcher.mask() as i32);
        let fd = self.file.as_raw_fd();
        epoll.add(&self.file, EpollEvent::new(flags, fd as u64))?;
        Ok(())
    }
}

/// Interest set and wake-up handle of one dispatch loop
struct Dispatcher {
    epoll: Epoll,
    wake: EventFd,
}

impl Dispatcher {
    fn new() -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        let wake = EventFd::from_flags(EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)?;
        epoll.add(&wake, EpollEvent::new(EpollFlags::EPOLLIN, WAKE_TOKEN))?;
        Ok(Self { epoll, wake })
    }
}

#[derive(Default)]
struct WatcherState {
    /// Interest set for the running or next loop; `None` between a stop
    /// and the following start
    dispatcher: Option<Arc<Dispatcher>>,
    by_file: HashMap<PathBuf, Registration>,
    by_fd: HashMap<RawFd, PathBuf>,
    sender: Option<mpsc::Sender<Event>>,
    active: bool,
    closed: bool,
    /// Bumped on every start so a retired loop cannot publish for a newer one
    generation: u64,
}

impl WatcherState {
    fn is_current(&self, generation: u64) -> bool {
        self.active && self.generation == generation
    }
}

// =============================================================================
// Event Watcher
// =============================================================================

/// A set of watched files sharing one event channel
pub struct EventWatcher {
    state: Arc<Mutex<WatcherState>>,
    buffer_size: usize,
}

impl EventWatcher {
    /// Create a watcher set whose channel buffers `buffer_size` events
    pub fn new(buffer_size: usize) -> Result<Self> {
        let dispatcher = Dispatcher::new()?;

        Ok(Self {
            state: Arc::new(Mutex::new(WatcherState {
                dispatcher: Some(Arc::new(dispatcher)),
                ..Default::default()
            })),
            buffer_size: buffer_size.max(1),
        })
    }

    /// Register a file for the watcher's interest flags
    ///
    /// All checks happen before the file is opened, so a rejected call has
    /// no side effect.
    pub fn add_watcher(&self, watcher: Watcher) -> Result<()> {
        if watcher.events().is_empty() {
            return Err(Error::InvalidEventType { bits: 0 });
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::WatcherClosed);
        }

        if state.by_file.contains_key(watcher.file_name()) {
            return Err(Error::FileAlreadyWatched {
                file: watcher.file_name().to_path_buf(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(watcher.file_name())?;
        let fd = file.as_raw_fd();
        let registration = Registration { watcher, file };

        // Stopped sets pick the file up on the next start
        if let Some(dispatcher) = &state.dispatcher {
            registration.register(&dispatcher.epoll)?;
        }

        debug!(
            "Watching {} (fd {}) for {:?}",
            registration.watcher.file_name().display(),
            fd,
            registration.watcher.events()
        );

        let file_name = registration.watcher.file_name().to_path_buf();
        state.by_fd.insert(fd, file_name.clone());
        state.by_file.insert(file_name, registration);

        Ok(())
    }

    /// Deregister a file; the descriptor is closed
    pub fn delete_watcher(&self, file_name: impl AsRef<Path>) -> Result<()> {
        let file_name = file_name.as_ref();
        let mut state = self.state.lock();

        let Some(registration) = state.by_file.get(file_name) else {
            return Err(Error::WatcherNotFound {
                file: file_name.to_path_buf(),
            });
        };

        if let Some(dispatcher) = &state.dispatcher {
            dispatcher.epoll.delete(&registration.file)?;
        }

        let fd = registration.file.as_raw_fd();
        state.by_fd.remove(&fd);
        state.by_file.remove(file_name);

        debug!("Stopped watching {}", file_name.display());
        Ok(())
    }

    /// Start the dispatch loop and return the event stream
    pub fn start(&self) -> Result<mpsc::Receiver<Event>> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(Error::WatcherClosed);
        }
        if state.active {
            return Err(Error::WatcherActive);
        }

        let dispatcher = match state.dispatcher.clone() {
            Some(dispatcher) => dispatcher,
            None => {
                let dispatcher = Dispatcher::new()?;
                for registration in state.by_file.values() {
                    registration.register(&dispatcher.epoll)?;
                }
                let dispatcher = Arc::new(dispatcher);
                state.dispatcher = Some(Arc::clone(&dispatcher));
                dispatcher
            }
        };

        let (tx, rx) = mpsc::channel(self.buffer_size);
        state.generation += 1;
        let generation = state.generation;

        let shared = Arc::clone(&self.state);
        thread::Builder::new()
            .name("event-watcher".into())
            .spawn(move || dispatch_loop(shared, dispatcher, generation))?;

        state.sender = Some(tx);
        state.active = true;

        info!(
            "Event watcher started with {} watched files",
            state.by_file.len()
        );
        Ok(rx)
    }

    /// Stop dispatching, wake the loop and close the event channel; no-op
    /// when inactive
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }

        state.active = false;
        state.sender = None;
        if let Some(dispatcher) = state.dispatcher.take() {
            if let Err(e) = dispatcher.wake.write(1) {
                warn!("Cannot wake dispatch loop {}: {}", state.generation, e);
            }
        }
        info!("Event watcher stopped");
    }

    /// Stop, then release the epoll instance and every watched descriptor
    pub fn close(&self) {
        self.stop();

        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.dispatcher = None;
            state.by_fd.clear();
            state.by_file.clear();
            debug!("Event watcher closed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Currently watched files, sorted
    pub fn watched_files(&self) -> Vec<PathBuf> {
        let state = self.state.lock();
        let mut files: Vec<PathBuf> = state
            .by_file
            .values()
            .map(|registration| registration.watcher.file_name().to_path_buf())
            .collect();
        files.sort();
        files
    }

    pub fn len(&self) -> usize {
        self.state.lock().by_file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Dispatch Loop
// =============================================================================

fn dispatch_loop(state: Arc<Mutex<WatcherState>>, dispatcher: Arc<Dispatcher>, generation: u64) {
    let mut events = vec![EpollEvent::empty(); MAX_EVENTS];

    loop {
        let ready = match dispatcher.epoll.wait(&mut events, EpollTimeout::NONE) {
            Ok(ready) => ready,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                error!("epoll_wait failed: {}", e);
                return;
            }
        };

        for raw in &events[..ready] {
            if raw.data() == WAKE_TOKEN {
                debug!("Dispatch loop {} woken by stop", generation);
                return;
            }

            let (sender, event) = {
                let state = state.lock();
                if !state.is_current(generation) {
                    debug!("Dispatch loop {} retired", generation);
                    return;
                }

                let fd = raw.data() as RawFd;
                let Some(file_name) = state.by_fd.get(&fd) else {
                    // Deleted while the wait was in flight
                    continue;
                };
                let Some(sender) = state.sender.clone() else {
                    return;
                };

                (
                    sender,
                    Event::from_raw(file_name.clone(), raw.events().bits() as u32),
                )
            };

            if sender.blocking_send(event).is_err() {
                warn!("Event receiver dropped, dispatch loop exiting");
                return;
            }

            // A stop that landed during the send closes the channel now
            if !state.lock().is_current(generation) {
                debug!("Dispatch loop {} retired", generation);
                return;
            }
        }
    }
}
