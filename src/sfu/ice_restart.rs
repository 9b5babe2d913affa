use std::sync::Arc;

use derivative::Derivative;
use tokio::{task::JoinHandle, time::Duration};

use crate::{
    error::Error,
    events::{ConnectionStatus, TransportDirection},
    transport::{recovery_check_delay, IceRestartState, ICE_RESTART_MIN_INTERVAL},
};

use super::device::SfuTransport;

const MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(60);

/// Wait before the next attempt after a restart request failed.
pub fn failure_backoff(retry: u32) -> Duration {
    ICE_RESTART_MIN_INTERVAL
        .saturating_mul(2u32.saturating_pow(retry))
        .min(MAX_FAILURE_BACKOFF)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RestartDecision {
    Idle,
    RestartNow,
    /// Look at the transport again after this delay.
    Schedule(Duration),
    /// Attempts are exhausted; report the failure.
    GiveUp,
    /// The server no longer knows the transport.
    Stop,
}

/// One of the two SFU transports with its ICE restart bookkeeping.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct TransportSlot {
    pub direction: TransportDirection,
    pub transport: Arc<dyn SfuTransport>,
    pub status: ConnectionStatus,
    pub ice_restart: IceRestartState,
    failure_reported: bool,
    #[derivative(Debug = "ignore")]
    timer: Option<JoinHandle<()>>,
    #[derivative(Debug = "ignore")]
    pump: JoinHandle<()>,
}

impl TransportSlot {
    pub fn new(
        direction: TransportDirection,
        transport: Arc<dyn SfuTransport>,
        pump: JoinHandle<()>,
    ) -> Self {
        tracing::debug!("{} transport {} is created", direction, transport.id());
        Self {
            direction,
            transport,
            status: ConnectionStatus::Connecting,
            ice_restart: IceRestartState::default(),
            failure_reported: false,
            timer: None,
            pump,
        }
    }

    pub fn id(&self) -> String {
        self.transport.id()
    }

    pub fn on_state_change(&mut self, status: ConnectionStatus) -> RestartDecision {
        self.status = status;
        match status {
            ConnectionStatus::Connected => {
                self.ice_restart.reset();
                self.failure_reported = false;
                self.cancel_timer();
                RestartDecision::Idle
            }
            status if status.needs_recovery() => self.next_restart(),
            _ => RestartDecision::Idle,
        }
    }

    /// A scheduled check or retry fired.
    pub fn on_timer(&mut self) -> RestartDecision {
        self.timer = None;
        if self.status.needs_recovery() {
            self.next_restart()
        } else {
            RestartDecision::Idle
        }
    }

    pub fn on_restart_settled(&mut self, result: &Result<(), Error>) -> RestartDecision {
        self.ice_restart.settle();
        let retry = self.ice_restart.attempts.saturating_sub(1);
        match result {
            Ok(()) => RestartDecision::Schedule(recovery_check_delay(retry)),
            Err(err) if !err.is_retryable() => RestartDecision::Stop,
            Err(_) if self.ice_restart.exhausted() => self.give_up(),
            Err(_) => RestartDecision::Schedule(failure_backoff(retry)),
        }
    }

    fn next_restart(&mut self) -> RestartDecision {
        if self.ice_restart.in_flight {
            return RestartDecision::Idle;
        }
        if self.ice_restart.exhausted() {
            return self.give_up();
        }
        if let Some(elapsed) = self.ice_restart.since_last_attempt() {
            if elapsed < ICE_RESTART_MIN_INTERVAL {
                return RestartDecision::Schedule(ICE_RESTART_MIN_INTERVAL - elapsed);
            }
        }
        self.ice_restart.begin();
        RestartDecision::RestartNow
    }

    fn give_up(&mut self) -> RestartDecision {
        if self.failure_reported {
            return RestartDecision::Idle;
        }
        self.failure_reported = true;
        RestartDecision::GiveUp
    }

    pub fn set_timer(&mut self, timer: JoinHandle<()>) {
        self.cancel_timer();
        self.timer = Some(timer);
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub fn close(&mut self) {
        self.cancel_timer();
        self.pump.abort();
        self.transport.close();
        self.status = ConnectionStatus::Closed;
    }
}

impl Drop for TransportSlot {
    fn drop(&mut self) {
        self.cancel_timer();
        self.pump.abort();
        tracing::debug!("{} transport {} is dropped", self.direction, self.transport.id());
    }
}
