//! Blocking transport seams shared by all drivers.
//!
//! A driver owns one [`ReportChannel`] per device node and a [`Poller`]
//! that waits on all of them at once. Real devices use [`crate::hid::HidrawChannel`]
//! and [`FdPoller`]; tests use the scripted doubles in `mock`.

use crate::{Result, TrackdError};
use std::os::unix::io::RawFd;
use std::time::Duration;

bitflags::bitflags! {
    /// Readiness of one watched channel after a poll.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Readiness: u8 {
        const READABLE = 1 << 0;
        const ERROR    = 1 << 1;
        const HANGUP   = 1 << 2;
        const INVALID  = 1 << 3;
    }
}

impl Readiness {
    /// The channel errored, hung up, or was closed under us.
    pub fn is_broken(self) -> bool {
        self.intersects(Readiness::ERROR | Readiness::HANGUP | Readiness::INVALID)
    }
}

/// A blocking report-oriented device channel (hidraw node, etc).
pub trait ReportChannel: Send {
    /// Read one input report into `buf`, returning its length.
    fn read_report(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Send a feature report. `data[0]` is the report id.
    fn send_feature_report(&mut self, data: &[u8]) -> Result<usize>;

    /// Fetch a feature report. The caller sets `buf[0]` to the report id.
    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Multiplexed blocking wait on a fixed set of channels.
pub trait Poller: Send {
    /// Wait up to `timeout`. Returns one entry per watched channel, in the
    /// order they were registered; all entries empty means the wait timed out.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Readiness>>;
}

/// `poll(2)` over raw file descriptors.
pub struct FdPoller {
    fds: Vec<RawFd>,
}

impl FdPoller {
    pub fn new(fds: Vec<RawFd>) -> Self {
        Self { fds }
    }
}

impl Poller for FdPoller {
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Readiness>> {
        let mut pollfds: Vec<libc::pollfd> = self
            .fds
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        // SAFETY: pollfds is a valid, exclusively borrowed array of nfds entries.
        let ret = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ret < 0 {
            return Err(TrackdError::from_channel_io(std::io::Error::last_os_error()));
        }

        Ok(pollfds
            .iter()
            .map(|p| {
                let mut r = Readiness::empty();
                r.set(Readiness::READABLE, p.revents & libc::POLLIN != 0);
                r.set(Readiness::ERROR, p.revents & libc::POLLERR != 0);
                r.set(Readiness::HANGUP, p.revents & libc::POLLHUP != 0);
                r.set(Readiness::INVALID, p.revents & libc::POLLNVAL != 0);
                r
            })
            .collect())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_broken() {
        assert!(!Readiness::READABLE.is_broken());
        assert!(!Readiness::empty().is_broken());
        assert!(Readiness::HANGUP.is_broken());
        assert!((Readiness::READABLE | Readiness::ERROR).is_broken());
        assert!(Readiness::INVALID.is_broken());
    }

    #[test]
    fn test_fd_poller_times_out_on_idle_pipe() {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds has room for the two descriptors pipe(2) writes.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let mut poller = FdPoller::new(vec![fds[0]]);
        let ready = poller.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(ready, vec![Readiness::empty()]);

        // SAFETY: the write end is open and the buffer is one valid byte.
        assert_eq!(unsafe { libc::write(fds[1], [1u8].as_ptr().cast(), 1) }, 1);
        let ready = poller.poll(Duration::from_millis(10)).unwrap();
        assert!(ready[0].contains(Readiness::READABLE));

        // SAFETY: closing descriptors this test opened.
        unsafe {
            libc::close(fds[1]);
        }
        let mut buf = [0u8; 1];
        // SAFETY: the read end is open and buf has room for one byte.
        unsafe { libc::read(fds[0], buf.as_mut_ptr().cast(), 1) };
        let ready = poller.poll(Duration::from_millis(10)).unwrap();
        assert!(ready[0].is_broken());

        // SAFETY: closing the remaining descriptor this test opened.
        unsafe {
            libc::close(fds[0]);
        }
    }
}
