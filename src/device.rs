use crate::events::{EventSender, TrackingEvent};
use crate::types::DeviceIdentity;
use crate::{Result, TrackdError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Lifecycle of a [`Device`].
///
/// `Opening` means the hardware handles are held but the device is not
/// started; a failed `start` returns here so it can be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    Opening,
    Started,
    Running,
    Stopping,
}

/// The flag gating a device's poll loop.
///
/// Written from two places (the loop on disconnect, `stop` from outside),
/// so it only ever flips to inactive once.
#[derive(Debug, Clone, Default)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag. Returns true for the caller that actually cleared it.
    pub fn deactivate(&self) -> bool {
        self.0
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a poll loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The active flag was cleared from outside.
    Stopped,
    /// A watched channel errored or hung up; the loop cleared the flag itself.
    Disconnected,
}

/// Per-device behaviour plugged into the generic lifecycle.
pub trait Driver: Send {
    fn identity(&self) -> &DeviceIdentity;

    /// Device-specific setup. On error everything this call started has
    /// already been undone.
    fn start(&mut self, events: &EventSender) -> Result<()>;

    /// Blocking poll loop; returns once `active` is cleared or the device is gone.
    fn run(&mut self, active: &ActiveFlag, events: &EventSender) -> LoopExit;

    /// Best-effort teardown. Failures are logged, never returned.
    fn stop(&mut self);
}

type Undo<'a, T> = Box<dyn FnOnce(&mut T) + 'a>;

/// Multi-stage startup with rollback.
///
/// Each completed stage may register an undo action. Dropping the guard
/// without calling [`Startup::commit`] runs the registered undos in reverse
/// order, once each.
pub struct Startup<'a, T: ?Sized> {
    name: String,
    target: &'a mut T,
    undo: Vec<(&'static str, Undo<'a, T>)>,
}

impl<'a, T: ?Sized> Startup<'a, T> {
    pub fn new(name: impl Into<String>, target: &'a mut T) -> Self {
        Self {
            name: name.into(),
            target,
            undo: Vec::new(),
        }
    }

    /// Run a stage that needs no teardown.
    pub fn step<R>(&mut self, step: &'static str, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        f(&mut *self.target).map_err(|e| {
            log::warn!("{}: {} failed: {}", self.name, step, e);
            TrackdError::StartupStepFailed {
                step,
                source: Box::new(e),
            }
        })
    }

    /// Run a stage and, if it succeeds, remember how to undo it.
    pub fn step_with_undo<R>(
        &mut self,
        step: &'static str,
        f: impl FnOnce(&mut T) -> Result<R>,
        undo: impl FnOnce(&mut T) + 'a,
    ) -> Result<R> {
        let value = self.step(step, f)?;
        self.undo.push((step, Box::new(undo)));
        Ok(value)
    }

    /// Run a stage whose failure is logged and otherwise ignored.
    pub fn best_effort(&mut self, step: &'static str, f: impl FnOnce(&mut T) -> Result<()>) {
        if let Err(e) = f(&mut *self.target) {
            log::warn!("{}: {} failed: {}", self.name, step, e);
        }
    }

    /// Keep everything started so far.
    pub fn commit(mut self) {
        self.undo.clear();
    }
}

impl<T: ?Sized> Drop for Startup<'_, T> {
    fn drop(&mut self) {
        while let Some((step, undo)) = self.undo.pop() {
            log::warn!("{}: rolling back {}", self.name, step);
            undo(&mut *self.target);
        }
    }
}

/// Body of a poll thread. Yields the driver back when the loop ends.
type PollBody = Box<dyn FnOnce() -> Option<Box<dyn Driver>> + Send>;
type PollThread = JoinHandle<Option<Box<dyn Driver>>>;

/// An opened tracking device and the thread running its poll loop.
pub struct Device {
    identity: DeviceIdentity,
    name: Arc<str>,
    state: DeviceState,
    driver: Option<Box<dyn Driver>>,
    thread: Option<PollThread>,
    active: ActiveFlag,
    events: EventSender,
}

impl Device {
    /// Open `devnode` through `opener`.
    ///
    /// A node that does not exist (anymore) is expected while enumerating
    /// and only logged at debug level.
    pub fn open<F>(devnode: &str, events: EventSender, opener: F) -> Result<Device>
    where
        F: FnOnce(&str) -> Result<Box<dyn Driver>>,
    {
        let driver = match opener(devnode) {
            Ok(driver) => driver,
            Err(e) if e.is_not_found() => {
                log::debug!("{}: {}", devnode, e);
                return Err(e);
            }
            Err(e) => {
                log::warn!("{}: open failed: {}", devnode, e);
                return Err(e);
            }
        };
        let identity = driver.identity().clone();
        log::info!(
            "{}: opened {} (serial {})",
            identity.name,
            identity.devnode,
            identity.serial.as_deref().unwrap_or("unknown")
        );

        Ok(Device {
            name: Arc::from(identity.name.as_str()),
            identity,
            state: DeviceState::Opening,
            driver: Some(driver),
            thread: None,
            active: ActiveFlag::new(),
            events,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// True while the poll loop is running and has not seen a disconnect.
    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }

    /// Run the driver's startup, then hand it to a dedicated poll thread.
    ///
    /// A failed start leaves the device in `Opening`; it can be retried.
    pub fn start(&mut self) -> Result<()> {
        self.start_with(|name, body| std::thread::Builder::new().name(name).spawn(body))
    }

    fn start_with<S>(&mut self, spawn: S) -> Result<()>
    where
        S: FnOnce(String, PollBody) -> io::Result<PollThread>,
    {
        if self.state != DeviceState::Opening {
            return Err(TrackdError::InvalidState(format!(
                "{}: cannot start from {:?}",
                self.name, self.state
            )));
        }
        let mut driver = self
            .driver
            .take()
            .ok_or_else(|| TrackdError::InvalidState(format!("{}: no driver", self.name)))?;

        // the failing step has already been logged by the driver's startup
        if let Err(e) = driver.start(&self.events) {
            self.driver = Some(driver);
            return Err(e);
        }
        self.state = DeviceState::Started;
        log::info!("{}: started", self.name);

        self.active.activate();
        // The driver is parked here so it can be stopped if no thread ever runs.
        let slot = Arc::new(Mutex::new(Some(driver)));
        let thread_slot = Arc::clone(&slot);
        let active = self.active.clone();
        let events = self.events.clone();
        let name = Arc::clone(&self.name);
        let body: PollBody = Box::new(move || {
            let mut driver = thread_slot.lock().unwrap_or_else(|e| e.into_inner()).take()?;
            let exit = driver.run(&active, &events);
            if exit == LoopExit::Disconnected {
                log::warn!("{}: poll loop ended, device disconnected", name);
                events.emit(TrackingEvent::Disconnected { device: name });
            }
            Some(driver)
        });

        match spawn(format!("vrtrackd-{}", self.name), body) {
            Ok(handle) => {
                self.thread = Some(handle);
                self.state = DeviceState::Running;
                log::info!("{}: running", self.name);
                Ok(())
            }
            Err(e) => {
                self.active.deactivate();
                if let Some(mut driver) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                    driver.stop();
                }
                self.state = DeviceState::Closed;
                log::error!("{}: failed to spawn poll thread: {}", self.name, e);
                Err(TrackdError::InvalidState(format!(
                    "{}: failed to spawn poll thread: {}",
                    self.name, e
                )))
            }
        }
    }

    /// Stop the poll loop (at most one poll timeout of latency) and tear the
    /// driver down. Never fails; problems are logged.
    pub fn stop(&mut self) {
        if self.state == DeviceState::Closed {
            return;
        }
        self.state = DeviceState::Stopping;
        self.active.deactivate();

        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(driver) => self.driver = driver,
                Err(_) => log::error!("{}: poll thread panicked", self.name),
            }
        }
        if let Some(mut driver) = self.driver.take() {
            driver.stop();
        }
        self.state = DeviceState::Closed;
        log::info!("{}: stopped", self.name);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop();
    }
}
