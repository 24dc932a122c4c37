//! Connection lifecycle state machine.
//!
//! Pure bookkeeping with no I/O: the driver in [`connection`](crate::connection)
//! feeds it events and performs whatever [`Action`] comes back.
//!
//! ```text
//! Disconnected --start--> Connecting --open--> Connected
//!                              |                   |
//!                            close               close
//!                              v                   v
//!                          Reconnecting <----------+
//!                              |   \
//!                     timer due     attempts == max
//!                              v     v
//!                        Connecting  Closed
//! ```
//!
//! Every attempt and every stop bumps the epoch. Events and timers carry the
//! epoch they were issued under; anything from an older epoch is ignored, so
//! a timer scheduled before [`Lifecycle::stop`] can never reopen the session
//! and two physical connections can never be live at once.

use std::fmt;
use std::time::Duration;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller asked to stop.
    Stopped,
    /// The consecutive-failure limit was reached.
    ExhaustedRetries {
        /// Failed attempts at the time of closing.
        attempts: u32,
    },
}

/// Where the connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet started.
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// The link is open and frames flow.
    Connected,
    /// Waiting for the reconnect delay to elapse.
    Reconnecting,
    /// Terminal. No further attempts will be made.
    Closed(CloseReason),
}

impl ConnectionState {
    /// Whether the session has ended.
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting => f.write_str("reconnecting"),
            Self::Closed(CloseReason::Stopped) => f.write_str("closed (stopped)"),
            Self::Closed(CloseReason::ExhaustedRetries { attempts }) => {
                write!(f, "closed (gave up after {attempts} attempts)")
            }
        }
    }
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a physical connection tagged with `epoch`.
    Connect {
        /// Epoch the attempt belongs to.
        epoch: u64,
    },
    /// Arm a one-shot timer that reports back with `epoch` after `delay`.
    ScheduleReconnect {
        /// Epoch the timer belongs to.
        epoch: u64,
        /// How long to wait.
        delay: Duration,
    },
    /// The session ended.
    Closed(CloseReason),
}

/// The reconnect state machine.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
    attempts: u32,
    epoch: u64,
    max_attempts: u32,
    delay: Duration,
}

impl Lifecycle {
    /// A machine in [`ConnectionState::Disconnected`].
    ///
    /// `max_attempts` below 1 is treated as 1.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            epoch: 0,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Current state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful open.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current epoch.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Begin the first attempt. Only valid from `Disconnected`.
    pub fn start(&mut self) -> Option<Action> {
        match self.state {
            ConnectionState::Disconnected => Some(self.begin_attempt()),
            _ => None,
        }
    }

    /// The attempt tagged `epoch` opened.
    ///
    /// Returns `false` when the event is stale; the caller must then drop the
    /// link it just received.
    pub fn on_open(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        true
    }

    /// The link tagged `epoch` failed to open or was lost.
    ///
    /// Returns the next step, or `None` for a stale event.
    pub fn on_close(&mut self, epoch: u64) -> Option<Action> {
        if epoch != self.epoch {
            return None;
        }
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return None;
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            let reason = CloseReason::ExhaustedRetries {
                attempts: self.attempts,
            };
            self.state = ConnectionState::Closed(reason);
            self.epoch = self.epoch.saturating_add(1);
            return Some(Action::Closed(reason));
        }

        self.state = ConnectionState::Reconnecting;
        Some(Action::ScheduleReconnect {
            epoch: self.epoch,
            delay: self.delay,
        })
    }

    /// The reconnect timer tagged `epoch` fired.
    pub fn on_reconnect_due(&mut self, epoch: u64) -> Option<Action> {
        if epoch != self.epoch || self.state != ConnectionState::Reconnecting {
            return None;
        }
        Some(self.begin_attempt())
    }

    /// Close the session. Pending timers and in-flight attempts become stale.
    ///
    /// Returns `None` if the session was already closed.
    pub fn stop(&mut self) -> Option<Action> {
        if self.state.is_closed() {
            return None;
        }
        self.epoch = self.epoch.saturating_add(1);
        self.state = ConnectionState::Closed(CloseReason::Stopped);
        Some(Action::Closed(CloseReason::Stopped))
    }

    fn begin_attempt(&mut self) -> Action {
        self.epoch = self.epoch.saturating_add(1);
        self.state = ConnectionState::Connecting;
        Action::Connect { epoch: self.epoch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(3);

    fn connect_epoch(action: Option<Action>) -> u64 {
        match action {
            Some(Action::Connect { epoch }) => epoch,
            _ => 0,
        }
    }

    #[test]
    fn start_only_from_disconnected() {
        let mut lc = Lifecycle::new(3, DELAY);
        assert!(matches!(lc.start(), Some(Action::Connect { epoch: 1 })));
        assert_eq!(lc.state(), ConnectionState::Connecting);
        assert_eq!(lc.start(), None);
    }

    #[test]
    fn gives_up_after_max_consecutive_failures() {
        let mut lc = Lifecycle::new(3, DELAY);
        let mut epoch = connect_epoch(lc.start());

        for attempt in 1..3_u32 {
            let next = lc.on_close(epoch);
            assert_eq!(next, Some(Action::ScheduleReconnect { epoch, delay: DELAY }));
            assert_eq!(lc.state(), ConnectionState::Reconnecting);
            assert_eq!(lc.attempts(), attempt);
            epoch = connect_epoch(lc.on_reconnect_due(epoch));
            assert_eq!(lc.state(), ConnectionState::Connecting);
        }

        let reason = CloseReason::ExhaustedRetries { attempts: 3 };
        assert_eq!(lc.on_close(epoch), Some(Action::Closed(reason)));
        assert_eq!(lc.state(), ConnectionState::Closed(reason));

        // Nothing can revive it.
        assert_eq!(lc.on_reconnect_due(lc.epoch()), None);
        assert_eq!(lc.on_close(lc.epoch()), None);
        assert_eq!(lc.start(), None);
        assert_eq!(lc.attempts(), 3);
    }

    #[test]
    fn successful_open_resets_attempts() {
        let mut lc = Lifecycle::new(3, DELAY);
        let epoch = connect_epoch(lc.start());
        let _ = lc.on_close(epoch);
        let epoch = connect_epoch(lc.on_reconnect_due(epoch));
        let _ = lc.on_close(epoch);
        assert_eq!(lc.attempts(), 2);

        let epoch = connect_epoch(lc.on_reconnect_due(epoch));
        assert!(lc.on_open(epoch));
        assert_eq!(lc.attempts(), 0);
        assert_eq!(lc.state(), ConnectionState::Connected);

        // A drop after a good session starts the count over.
        assert!(matches!(lc.on_close(epoch), Some(Action::ScheduleReconnect { .. })));
        assert_eq!(lc.attempts(), 1);
    }

    #[test]
    fn stop_invalidates_pending_timer() {
        let mut lc = Lifecycle::new(5, DELAY);
        let epoch = connect_epoch(lc.start());
        let _ = lc.on_close(epoch);
        assert_eq!(lc.state(), ConnectionState::Reconnecting);

        assert_eq!(lc.stop(), Some(Action::Closed(CloseReason::Stopped)));
        assert_eq!(lc.on_reconnect_due(epoch), None);
        assert_eq!(lc.state(), ConnectionState::Closed(CloseReason::Stopped));
        assert_eq!(lc.stop(), None);
    }

    #[test]
    fn stale_open_after_stop_is_rejected() {
        let mut lc = Lifecycle::new(5, DELAY);
        let epoch = connect_epoch(lc.start());
        let _ = lc.stop();
        assert!(!lc.on_open(epoch));
        assert_eq!(lc.on_close(epoch), None);
    }

    #[test]
    fn events_from_superseded_attempt_are_ignored() {
        let mut lc = Lifecycle::new(5, DELAY);
        let first = connect_epoch(lc.start());
        let _ = lc.on_close(first);
        let second = connect_epoch(lc.on_reconnect_due(first));
        assert_ne!(first, second);

        // A late close from the first link must not count as a failure.
        assert_eq!(lc.on_close(first), None);
        assert_eq!(lc.attempts(), 1);
        assert!(lc.on_open(second));
    }

    #[test]
    fn single_attempt_limit_closes_on_first_failure() {
        let mut lc = Lifecycle::new(0, DELAY);
        let epoch = connect_epoch(lc.start());
        assert_eq!(
            lc.on_close(epoch),
            Some(Action::Closed(CloseReason::ExhaustedRetries { attempts: 1 }))
        );
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            ConnectionState::Closed(CloseReason::Stopped).to_string(),
            "closed (stopped)"
        );
    }
}
