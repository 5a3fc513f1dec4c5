//! The blocking wait/dispatch loop every driver runs on its own thread.

use crate::device::{ActiveFlag, LoopExit};
use crate::transport::{Poller, Readiness};
use crate::Result;
use std::time::Duration;

/// Device-specific handling of ready channels.
pub trait ReportHandler {
    /// Called once per wake-up with data, before any channel is read.
    /// Used for lazily issued side queries.
    fn before_reads(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after a wait that timed out with nothing ready. Pending
    /// settings must still reach an idle device.
    fn on_idle(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read and process exactly one report from channel `index`.
    fn handle_readable(&mut self, index: usize) -> Result<()>;
}

pub struct PollLoop<'a> {
    name: &'a str,
    timeout: Duration,
}

impl<'a> PollLoop<'a> {
    pub fn new(name: &'a str, timeout: Duration) -> Self {
        Self { name, timeout }
    }

    /// Run until `active` is cleared or any channel breaks.
    ///
    /// The flag is checked after every wake-up, so a stop request takes
    /// effect within one timeout. Bad reports and transient read errors are
    /// logged and skipped.
    pub fn run(
        &self,
        poller: &mut dyn Poller,
        active: &ActiveFlag,
        handler: &mut dyn ReportHandler,
    ) -> LoopExit {
        while active.is_active() {
            let ready = match poller.poll(self.timeout) {
                Ok(ready) => ready,
                Err(e) if e.is_disconnect() => return self.disconnected(active, &e),
                Err(e) => {
                    log::warn!("{}: Poll failure: {}", self.name, e);
                    continue;
                }
            };

            if ready.iter().all(|r| r.is_empty()) {
                log::debug!("{}: Poll timeout", self.name);
                if let Err(e) = handler.on_idle() {
                    if e.is_disconnect() {
                        return self.disconnected(active, &e);
                    }
                    log::warn!("{}: {}", self.name, e);
                }
                continue;
            }

            if ready.iter().any(|r| r.is_broken()) {
                log::warn!("{}: Disconnected ({:?})", self.name, ready);
                active.deactivate();
                return LoopExit::Disconnected;
            }

            if !active.is_active() {
                break;
            }

            if let Err(e) = handler.before_reads() {
                if e.is_disconnect() {
                    return self.disconnected(active, &e);
                }
                log::warn!("{}: {}", self.name, e);
            }

            for (index, readiness) in ready.iter().enumerate() {
                if !readiness.contains(Readiness::READABLE) {
                    continue;
                }
                if let Err(e) = handler.handle_readable(index) {
                    if e.is_disconnect() {
                        return self.disconnected(active, &e);
                    }
                    log::warn!("{}: {}", self.name, e);
                }
            }
        }
        LoopExit::Stopped
    }

    fn disconnected(&self, active: &ActiveFlag, err: &crate::TrackdError) -> LoopExit {
        log::warn!("{}: {}", self.name, err);
        active.deactivate();
        LoopExit::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IoError, ProtocolError};
    use crate::transport::mock::MockPoller;
    use crate::TrackdError;

    const IDLE: Readiness = Readiness::empty();
    const READ: Readiness = Readiness::READABLE;

    /// Records reads; fails them according to a script.
    #[derive(Default)]
    struct Recorder {
        reads: Vec<usize>,
        side_queries: usize,
        idle_calls: usize,
        idle_failure: Option<TrackdError>,
        failures: Vec<Option<TrackdError>>,
    }

    impl ReportHandler for Recorder {
        fn before_reads(&mut self) -> Result<()> {
            self.side_queries += 1;
            Ok(())
        }

        fn on_idle(&mut self) -> Result<()> {
            self.idle_calls += 1;
            match self.idle_failure.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn handle_readable(&mut self, index: usize) -> Result<()> {
            self.reads.push(index);
            match self.failures.pop() {
                Some(Some(e)) => Err(e),
                _ => Ok(()),
            }
        }
    }

    fn active() -> ActiveFlag {
        let flag = ActiveFlag::new();
        flag.activate();
        flag
    }

    #[test]
    fn test_timeout_is_not_fatal_and_hangup_is() {
        let mut poller = MockPoller::new(2, vec![vec![IDLE, IDLE], vec![READ, IDLE], vec![IDLE, READ]]);
        let polls = poller.polls.clone();
        let flag = active();
        let mut handler = Recorder::default();

        let exit = PollLoop::new("test", Duration::from_millis(1)).run(&mut poller, &flag, &mut handler);

        assert_eq!(exit, LoopExit::Disconnected);
        assert!(!flag.is_active());
        assert_eq!(handler.reads, vec![0, 1]);
        assert_eq!(handler.side_queries, 2);
        assert_eq!(handler.idle_calls, 1);
        // three scripted polls plus the hangup
        assert_eq!(*polls.lock().unwrap(), 4);
    }

    #[test]
    fn test_idle_wakeups_reach_handler() {
        let mut poller = MockPoller::new(1, vec![vec![IDLE], vec![IDLE], vec![IDLE]]);
        let flag = active();
        let mut handler = Recorder {
            idle_failure: Some(TrackdError::Io(IoError::Transient(std::io::Error::from_raw_os_error(
                libc::EIO,
            )))),
            ..Default::default()
        };

        let exit = PollLoop::new("test", Duration::from_millis(1)).run(&mut poller, &flag, &mut handler);

        // a failed idle hook is logged, later timeouts still call it
        assert_eq!(exit, LoopExit::Disconnected);
        assert_eq!(handler.idle_calls, 3);
        assert_eq!(handler.side_queries, 0);
        assert!(handler.reads.is_empty());
    }

    #[test]
    fn test_idle_disconnect_ends_loop() {
        let mut poller = MockPoller::new(1, vec![vec![IDLE], vec![READ]]);
        let flag = active();
        let mut handler = Recorder {
            idle_failure: Some(TrackdError::Io(IoError::Disconnected)),
            ..Default::default()
        };

        let exit = PollLoop::new("test", Duration::from_millis(1)).run(&mut poller, &flag, &mut handler);

        assert_eq!(exit, LoopExit::Disconnected);
        assert_eq!(handler.idle_calls, 1);
        assert!(handler.reads.is_empty());
        assert!(!flag.is_active());
    }

    #[test]
    fn test_hangup_on_one_channel_ends_loop() {
        let mut poller = MockPoller::new(2, vec![vec![READ, Readiness::HANGUP], vec![READ, READ]]);
        let flag = active();
        let mut handler = Recorder::default();

        let exit = PollLoop::new("test", Duration::from_millis(1)).run(&mut poller, &flag, &mut handler);

        assert_eq!(exit, LoopExit::Disconnected);
        assert!(handler.reads.is_empty());
    }

    #[test]
    fn test_malformed_report_keeps_loop_alive() {
        let mut poller = MockPoller::new(1, vec![vec![READ], vec![READ], vec![READ]]);
        let flag = active();
        let mut handler = Recorder {
            failures: vec![
                None,
                Some(TrackdError::Io(IoError::Transient(std::io::Error::from_raw_os_error(
                    libc::EAGAIN,
                )))),
                Some(TrackdError::Protocol(ProtocolError::WrongLength {
                    id: 0x20,
                    len: 51,
                    expected: 52,
                })),
            ],
            ..Default::default()
        };

        let exit = PollLoop::new("test", Duration::from_millis(1)).run(&mut poller, &flag, &mut handler);

        assert_eq!(exit, LoopExit::Disconnected);
        assert_eq!(handler.reads, vec![0, 0, 0]);
    }

    #[test]
    fn test_read_disconnect_ends_loop() {
        let mut poller = MockPoller::new(1, vec![vec![READ], vec![READ]]);
        let flag = active();
        let mut handler = Recorder {
            failures: vec![Some(TrackdError::Io(IoError::Disconnected))],
            ..Default::default()
        };

        let exit = PollLoop::new("test", Duration::from_millis(1)).run(&mut poller, &flag, &mut handler);

        assert_eq!(exit, LoopExit::Disconnected);
        assert_eq!(handler.reads, vec![0]);
        assert!(!flag.is_active());
    }

    #[test]
    fn test_inactive_flag_skips_polling() {
        let mut poller = MockPoller::new(1, vec![]);
        let polls = poller.polls.clone();
        let mut handler = Recorder::default();

        let exit =
            PollLoop::new("test", Duration::from_millis(1)).run(&mut poller, &ActiveFlag::new(), &mut handler);

        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(*polls.lock().unwrap(), 0);
    }

    /// Sleeps for the full timeout, like an idle device.
    struct IdlePoller;

    impl Poller for IdlePoller {
        fn poll(&mut self, timeout: Duration) -> Result<Vec<Readiness>> {
            std::thread::sleep(timeout);
            Ok(vec![Readiness::empty()])
        }
    }

    #[test]
    fn test_stop_observed_within_one_timeout() {
        let flag = active();
        let loop_flag = flag.clone();
        let thread = std::thread::spawn(move || {
            let mut handler = Recorder::default();
            PollLoop::new("idle", Duration::from_millis(20)).run(&mut IdlePoller, &loop_flag, &mut handler)
        });

        std::thread::sleep(Duration::from_millis(50));
        let stopped_at = std::time::Instant::now();
        assert!(flag.deactivate());
        assert_eq!(thread.join().unwrap(), LoopExit::Stopped);
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
    }
}
