//! Transport health monitoring
//!
//! `HealthMonitor` is a synchronous state machine. It is fed the transport
//! observations in delivery order and answers with the recovery actions the
//! owner must carry out; timers are owned by the caller and identified by a
//! generation number so an expiry that was superseded is ignored.
//!
//! Policy:
//! - `disconnected` arms a grace timer; a return to `connected`/`completed`
//!   before it fires cancels it. Expiry triggers an ICE restart.
//! - `failed` schedules a full recovery after `retry_delay`, unless one is
//!   already pending. At most `max_recovery_attempts` per healthy period.
//! - A healthy observation resets the attempt counter.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::signaling::{ConnectionState, IceConnectionState};

/// Recovery timing and budget
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Time a `disconnected` transport gets to heal on its own
    pub grace_period: Duration,
    /// Delay before each full recovery attempt
    pub retry_delay: Duration,
    /// Full recovery attempts allowed per healthy period
    pub max_recovery_attempts: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            retry_delay: Duration::from_secs(2),
            max_recovery_attempts: 3,
        }
    }
}

/// Observation fed to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorInput {
    Transport(IceConnectionState),
    Session(ConnectionState),
    GraceExpired(u64),
    /// The replacement transport is negotiated and waiting for connectivity
    RecoveryEstablished,
    /// Re-establishing the transport failed before connectivity was observed
    RecoveryFailed,
}

/// Action the owner must carry out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    ArmGrace { generation: u64, after: Duration },
    CancelGrace,
    IceRestart,
    ScheduleRecovery { attempt: u32, delay: Duration },
    MarkHealthy,
    GiveUp { attempts: u32 },
}

impl RecoveryAction {
    /// Stable name used in events
    pub fn label(&self) -> &'static str {
        match self {
            RecoveryAction::ArmGrace { .. } => "grace_armed",
            RecoveryAction::CancelGrace => "grace_cancelled",
            RecoveryAction::IceRestart => "ice_restart",
            RecoveryAction::ScheduleRecovery { .. } => "recovery_scheduled",
            RecoveryAction::MarkHealthy => "healthy",
            RecoveryAction::GiveUp { .. } => "gave_up",
        }
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryAction::ArmGrace { after, .. } => {
                write!(f, "transport disconnected, grace period {}s", after.as_secs())
            }
            RecoveryAction::CancelGrace => write!(f, "transient disconnect healed, grace timer cancelled"),
            RecoveryAction::IceRestart => write!(f, "grace period expired, restarting ICE"),
            RecoveryAction::ScheduleRecovery { attempt, delay } => write!(
                f,
                "full recovery attempt {} in {}ms",
                attempt,
                delay.as_millis()
            ),
            RecoveryAction::MarkHealthy => write!(f, "transport healthy"),
            RecoveryAction::GiveUp { attempts } => {
                write!(f, "recovery budget exhausted after {} attempt(s)", attempts)
            }
        }
    }
}

/// Transport health state machine
#[derive(Debug)]
pub struct HealthMonitor {
    policy: HealthPolicy,
    grace: Option<u64>,
    next_generation: u64,
    attempts: u32,
    recovery_pending: bool,
    exhausted: bool,
    transport: IceConnectionState,
    session: ConnectionState,
}

impl HealthMonitor {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            grace: None,
            next_generation: 0,
            attempts: 0,
            recovery_pending: false,
            exhausted: false,
            transport: IceConnectionState::New,
            session: ConnectionState::New,
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Full recovery attempts made in the current unhealthy period
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn grace_armed(&self) -> bool {
        self.grace.is_some()
    }

    pub fn last_transport_state(&self) -> IceConnectionState {
        self.transport
    }

    pub fn last_session_state(&self) -> ConnectionState {
        self.session
    }

    /// Forget everything; used when a new `connect()` starts
    pub fn reset(&mut self) {
        *self = Self::new(self.policy.clone());
    }

    /// Consume one observation
    pub fn handle(&mut self, input: MonitorInput) -> Vec<RecoveryAction> {
        if self.exhausted {
            return Vec::new();
        }

        match input {
            MonitorInput::Transport(state) => self.on_transport(state),
            MonitorInput::Session(state) => {
                debug!("Session connectivity: {} -> {}", self.session, state);
                self.session = state;
                Vec::new()
            }
            MonitorInput::GraceExpired(generation) => {
                if self.grace == Some(generation) {
                    self.grace = None;
                    warn!("Transport still disconnected after grace period, restarting ICE");
                    vec![RecoveryAction::IceRestart]
                } else {
                    debug!("Ignoring superseded grace timer {}", generation);
                    Vec::new()
                }
            }
            MonitorInput::RecoveryEstablished => {
                self.recovery_pending = false;
                Vec::new()
            }
            MonitorInput::RecoveryFailed => {
                self.recovery_pending = false;
                self.schedule_recovery()
            }
        }
    }

    fn on_transport(&mut self, state: IceConnectionState) -> Vec<RecoveryAction> {
        debug!(
            "Transport connectivity: {} -> {} (attempt {})",
            self.transport, state, self.attempts
        );
        self.transport = state;

        let mut actions = Vec::new();
        match state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                if self.grace.take().is_some() {
                    actions.push(RecoveryAction::CancelGrace);
                }
                if self.attempts > 0 {
                    info!("Transport recovered after {} attempt(s)", self.attempts);
                }
                self.attempts = 0;
                self.recovery_pending = false;
                actions.push(RecoveryAction::MarkHealthy);
            }
            IceConnectionState::Disconnected => {
                if self.grace.is_none() && !self.recovery_pending {
                    let generation = self.next_generation;
                    self.next_generation += 1;
                    self.grace = Some(generation);
                    actions.push(RecoveryAction::ArmGrace {
                        generation,
                        after: self.policy.grace_period,
                    });
                }
            }
            IceConnectionState::Failed => {
                if self.grace.take().is_some() {
                    actions.push(RecoveryAction::CancelGrace);
                }
                actions.extend(self.schedule_recovery());
            }
            IceConnectionState::New | IceConnectionState::Checking | IceConnectionState::Closed => {}
        }
        actions
    }

    fn schedule_recovery(&mut self) -> Vec<RecoveryAction> {
        if self.recovery_pending {
            debug!("Recovery already pending, ignoring failure");
            return Vec::new();
        }
        if self.attempts >= self.policy.max_recovery_attempts {
            self.exhausted = true;
            warn!("Recovery budget exhausted after {} attempt(s)", self.attempts);
            return vec![RecoveryAction::GiveUp {
                attempts: self.attempts,
            }];
        }

        self.attempts += 1;
        self.recovery_pending = true;
        info!(
            "Scheduling full recovery attempt {}/{}",
            self.attempts, self.policy.max_recovery_attempts
        );
        vec![RecoveryAction::ScheduleRecovery {
            attempt: self.attempts,
            delay: self.policy.retry_delay,
        }]
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(monitor: &mut HealthMonitor, state: IceConnectionState) -> Vec<RecoveryAction> {
        monitor.handle(MonitorInput::Transport(state))
    }

    #[test]
    fn test_transient_blip_cancels_grace() {
        let mut monitor = HealthMonitor::default();
        assert_eq!(
            transport(&mut monitor, IceConnectionState::Connected),
            vec![RecoveryAction::MarkHealthy]
        );

        let actions = transport(&mut monitor, IceConnectionState::Disconnected);
        assert_eq!(
            actions,
            vec![RecoveryAction::ArmGrace {
                generation: 0,
                after: Duration::from_secs(10)
            }]
        );
        assert!(monitor.grace_armed());

        let actions = transport(&mut monitor, IceConnectionState::Connected);
        assert_eq!(
            actions,
            vec![RecoveryAction::CancelGrace, RecoveryAction::MarkHealthy]
        );
        assert!(!monitor.grace_armed());

        // Late expiry of the cancelled timer does nothing
        assert!(monitor.handle(MonitorInput::GraceExpired(0)).is_empty());
    }

    #[test]
    fn test_grace_expiry_restarts_ice() {
        let mut monitor = HealthMonitor::default();
        transport(&mut monitor, IceConnectionState::Connected);
        transport(&mut monitor, IceConnectionState::Disconnected);

        // Repeated disconnected does not re-arm
        assert!(transport(&mut monitor, IceConnectionState::Disconnected).is_empty());

        assert_eq!(
            monitor.handle(MonitorInput::GraceExpired(0)),
            vec![RecoveryAction::IceRestart]
        );
        assert!(!monitor.grace_armed());
        assert_eq!(monitor.attempts(), 0);
    }

    #[test]
    fn test_stale_generation_ignored() {
        let mut monitor = HealthMonitor::default();
        transport(&mut monitor, IceConnectionState::Disconnected);
        transport(&mut monitor, IceConnectionState::Connected);
        let actions = transport(&mut monitor, IceConnectionState::Disconnected);
        assert_eq!(
            actions,
            vec![RecoveryAction::ArmGrace {
                generation: 1,
                after: Duration::from_secs(10)
            }]
        );

        assert!(monitor.handle(MonitorInput::GraceExpired(0)).is_empty());
        assert_eq!(
            monitor.handle(MonitorInput::GraceExpired(1)),
            vec![RecoveryAction::IceRestart]
        );
    }

    #[test]
    fn test_failure_schedules_bounded_recovery() {
        let mut monitor = HealthMonitor::default();
        let delay = Duration::from_secs(2);

        for attempt in 1..=3 {
            assert_eq!(
                transport(&mut monitor, IceConnectionState::Failed),
                vec![RecoveryAction::ScheduleRecovery { attempt, delay }]
            );
            // Duplicate failure while pending is absorbed
            assert!(transport(&mut monitor, IceConnectionState::Failed).is_empty());
            monitor.handle(MonitorInput::RecoveryEstablished);
        }

        assert_eq!(
            transport(&mut monitor, IceConnectionState::Failed),
            vec![RecoveryAction::GiveUp { attempts: 3 }]
        );
        assert!(monitor.is_exhausted());

        // Nothing more once exhausted
        assert!(transport(&mut monitor, IceConnectionState::Failed).is_empty());
        assert!(transport(&mut monitor, IceConnectionState::Connected).is_empty());
    }

    #[test]
    fn test_recovery_failure_consumes_budget() {
        let mut monitor = HealthMonitor::default();
        transport(&mut monitor, IceConnectionState::Failed);

        let actions = monitor.handle(MonitorInput::RecoveryFailed);
        assert_eq!(
            actions,
            vec![RecoveryAction::ScheduleRecovery {
                attempt: 2,
                delay: Duration::from_secs(2)
            }]
        );
        monitor.handle(MonitorInput::RecoveryFailed);
        assert_eq!(
            monitor.handle(MonitorInput::RecoveryFailed),
            vec![RecoveryAction::GiveUp { attempts: 3 }]
        );
    }

    #[test]
    fn test_healthy_observation_resets_budget() {
        let mut monitor = HealthMonitor::default();
        transport(&mut monitor, IceConnectionState::Failed);
        monitor.handle(MonitorInput::RecoveryEstablished);
        transport(&mut monitor, IceConnectionState::Failed);
        monitor.handle(MonitorInput::RecoveryEstablished);
        assert_eq!(monitor.attempts(), 2);

        transport(&mut monitor, IceConnectionState::Completed);
        assert_eq!(monitor.attempts(), 0);

        assert_eq!(
            transport(&mut monitor, IceConnectionState::Failed),
            vec![RecoveryAction::ScheduleRecovery {
                attempt: 1,
                delay: Duration::from_secs(2)
            }]
        );
    }

    #[test]
    fn test_failure_cancels_pending_grace() {
        let mut monitor = HealthMonitor::default();
        transport(&mut monitor, IceConnectionState::Disconnected);
        let actions = transport(&mut monitor, IceConnectionState::Failed);
        assert_eq!(actions[0], RecoveryAction::CancelGrace);
        assert!(matches!(actions[1], RecoveryAction::ScheduleRecovery { attempt: 1, .. }));
        assert!(monitor.handle(MonitorInput::GraceExpired(0)).is_empty());
    }

    #[test]
    fn test_session_state_is_recorded_only() {
        let mut monitor = HealthMonitor::default();
        assert!(monitor
            .handle(MonitorInput::Session(ConnectionState::Failed))
            .is_empty());
        assert_eq!(monitor.last_session_state(), ConnectionState::Failed);
    }

    #[test]
    fn test_reset_keeps_policy() {
        let policy = HealthPolicy {
            grace_period: Duration::from_secs(1),
            retry_delay: Duration::from_millis(10),
            max_recovery_attempts: 1,
        };
        let mut monitor = HealthMonitor::new(policy);
        transport(&mut monitor, IceConnectionState::Failed);
        monitor.handle(MonitorInput::RecoveryFailed);
        assert!(monitor.is_exhausted());

        monitor.reset();
        assert!(!monitor.is_exhausted());
        assert_eq!(monitor.policy().max_recovery_attempts, 1);
    }
}
