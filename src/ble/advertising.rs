//! Connection / advertising lifecycle.
//!
//! ```text
//!            start()            rate timer
//! Stopped ──────────▶ Fast ─────────────▶ Slow
//!    ▲                 │                   │
//!    │ adv failure     │ connected         │ connected
//!    │                 ▼                   ▼
//!    └──────────── Suspended { peer } ◀────┘
//!                      │ disconnected + recycled
//!                      ▼
//!                    Fast (new timer)
//! ```
//!
//! All stack callbacks arrive as [`LinkEvent`]s through
//! [`AdvertisingStateMachine::handle`]. The rate-reduction timer can fire
//! concurrently with an incoming connection; a fired timer only acts when
//! its token is the one currently armed and the machine is still
//! advertising, so cancellation never has to win the race.

use crate::attributes::PeerId;
use crate::config::{
    ADV_FAST_INTERVAL_MAX, ADV_FAST_INTERVAL_MIN, ADV_RATE_REDUCTION_DELAY_MS,
    ADV_SLOW_INTERVAL_MAX, ADV_SLOW_INTERVAL_MIN,
};
use crate::error::TransportError;

/// Broadcast rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvMode {
    Fast,
    Slow,
}

impl AdvMode {
    /// Advertising interval range (0.625 ms units).
    pub const fn interval(self) -> (u32, u32) {
        match self {
            AdvMode::Fast => (ADV_FAST_INTERVAL_MIN, ADV_FAST_INTERVAL_MAX),
            AdvMode::Slow => (ADV_SLOW_INTERVAL_MIN, ADV_SLOW_INTERVAL_MAX),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertisingState {
    Stopped,
    FastAdvertising,
    SlowAdvertising,
    /// A connection is active; broadcasting is off.
    Suspended { peer: PeerId },
}

impl AdvertisingState {
    pub fn is_advertising(&self) -> bool {
        matches!(
            self,
            AdvertisingState::FastAdvertising | AdvertisingState::SlowAdvertising
        )
    }
}

/// Identifies one arming of the rate-reduction timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerToken(pub u32);

/// Notifications delivered by the transport stack and the rate timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// Stack initialisation finished (`Some` carries the failure code).
    Ready(Option<i32>),
    /// Incoming connection completed (`error` carries the HCI status on failure).
    Connected { peer: PeerId, error: Option<u8> },
    Disconnected { peer: PeerId, reason: u8 },
    /// The stack released the connection object.
    Recycled,
    RateTimerFired(TimerToken),
    /// The broadcast stopped with an error after it had started.
    AdvertisingFailed(TransportError),
}

/// What the state machine needs from the stack and the timer service.
pub trait AdvertisingPort {
    /// Begin broadcasting identity + service list at `mode`'s interval.
    fn start_advertising(&mut self, mode: AdvMode) -> Result<(), TransportError>;

    /// Stop the current broadcast. Must be harmless when none is running.
    fn stop_advertising(&mut self);

    /// Arm the one-shot rate timer; it later reports `RateTimerFired(token)`.
    fn arm_rate_timer(&mut self, delay_ms: u64, token: TimerToken);

    /// Cancel the rate timer. Must be harmless when already fired or cancelled.
    fn cancel_rate_timer(&mut self);
}

/// Owns the advertising lifecycle.
pub struct AdvertisingStateMachine {
    state: AdvertisingState,
    restart_pending: bool,
    armed: Option<TimerToken>,
    next_token: u32,
}

impl Default for AdvertisingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvertisingStateMachine {
    pub const fn new() -> Self {
        Self {
            state: AdvertisingState::Stopped,
            restart_pending: false,
            armed: None,
            next_token: 0,
        }
    }

    pub fn state(&self) -> AdvertisingState {
        self.state
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    /// Token of the currently armed rate timer, if any.
    pub fn armed_timer(&self) -> Option<TimerToken> {
        self.armed
    }

    /// Begin fast advertising and arm the rate-reduction timer.
    ///
    /// No-op while already advertising or connected. On failure the
    /// machine stays `Stopped`; nothing retries automatically.
    pub fn start<P: AdvertisingPort>(&mut self, port: &mut P) -> Result<(), TransportError> {
        if self.state != AdvertisingState::Stopped {
            debug!("start ignored in {:?}", self.state);
            return Ok(());
        }

        if let Err(e) = port.start_advertising(AdvMode::Fast) {
            error!("Advertising failed to start ({:?})", e);
            return Err(e);
        }

        self.next_token = self.next_token.wrapping_add(1);
        let token = TimerToken(self.next_token);
        port.arm_rate_timer(ADV_RATE_REDUCTION_DELAY_MS, token);
        self.armed = Some(token);
        self.state = AdvertisingState::FastAdvertising;
        info!("Advertising successfully started");
        Ok(())
    }

    /// Dispatch one lifecycle event.
    pub fn handle<P: AdvertisingPort>(&mut self, port: &mut P, event: LinkEvent) {
        match event {
            LinkEvent::Ready(Some(err)) => {
                error!("Bluetooth initialization failed (err {})", err);
            }
            LinkEvent::Ready(None) => {
                info!("Bluetooth initialized");
                let _ = self.start(port);
            }
            LinkEvent::Connected { peer, error: None } => {
                self.cancel_timer(port);
                self.state = AdvertisingState::Suspended { peer };
                info!("Connected to peer {}", peer);
            }
            LinkEvent::Connected {
                peer,
                error: Some(code),
            } => {
                self.cancel_timer(port);
                self.restart_pending = true;
                error!("Connection from peer {} failed, err {}", peer, code);
            }
            LinkEvent::Disconnected { peer, reason } => {
                if let AdvertisingState::Suspended { peer: current } = self.state {
                    if current != peer {
                        // The served link is still up; no restart.
                        warn!("Disconnect for peer {} while serving {}", peer, current);
                        return;
                    }
                }
                self.restart_pending = true;
                info!("Disconnected from peer {} (reason {})", peer, reason);
            }
            LinkEvent::Recycled => self.on_recycled(port),
            LinkEvent::RateTimerFired(token) => self.on_rate_timer(port, token),
            LinkEvent::AdvertisingFailed(e) => {
                if self.state.is_advertising() {
                    self.cancel_timer(port);
                    self.state = AdvertisingState::Stopped;
                    error!("Advertising stopped ({:?})", e);
                }
            }
        }
    }

    fn on_recycled<P: AdvertisingPort>(&mut self, port: &mut P) {
        if !core::mem::take(&mut self.restart_pending) {
            debug!("Recycled without pending restart");
            return;
        }

        // A failed connection attempt can leave a broadcast running.
        if self.state.is_advertising() {
            port.stop_advertising();
        }
        self.cancel_timer(port);
        self.state = AdvertisingState::Stopped;

        if self.start(port).is_ok() {
            info!("Advertising successfully restarted");
        }
    }

    fn on_rate_timer<P: AdvertisingPort>(&mut self, port: &mut P, token: TimerToken) {
        if self.armed != Some(token) || !self.state.is_advertising() {
            debug!("Stale rate timer {:?} in {:?}", token, self.state);
            return;
        }
        self.armed = None;

        port.stop_advertising();
        match port.start_advertising(AdvMode::Slow) {
            Ok(()) => {
                self.state = AdvertisingState::SlowAdvertising;
                info!("Advertising rate reduced");
            }
            Err(e) => {
                self.state = AdvertisingState::Stopped;
                error!("Slow advertising failed to start ({:?})", e);
            }
        }
    }

    fn cancel_timer<P: AdvertisingPort>(&mut self, port: &mut P) {
        port.cancel_rate_timer();
        self.armed = None;
    }
}
