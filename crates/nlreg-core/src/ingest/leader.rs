//! Leadership gating for singleton consumers
//!
//! Consumption of an inbound stream must run on at most one node. The
//! monitor turns a raw leadership signal into an explicit state machine
//! with a confirmation delay, so a node that just won an election does not
//! start consuming until the previous leader has had time to notice it lost.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Raw leadership signal, e.g. a lease or lock held elsewhere
#[async_trait]
pub trait LeaderSignal: Send + Sync {
    async fn is_leader(&self) -> bool;
}

/// Fixed signal for single-node deployments and tests
pub struct StaticLeader(pub bool);

#[async_trait]
impl LeaderSignal for StaticLeader {
    async fn is_leader(&self) -> bool {
        self.0
    }
}

/// Where a node stands in the leadership lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    /// Not elected; consumption forbidden
    NotLeader,
    /// Elected, waiting out the confirmation delay
    Probationary { since: Instant },
    /// Confirmed leader; consumption allowed
    Active,
}

impl LeadershipState {
    pub fn may_consume(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Drives the leadership state machine from a [`LeaderSignal`]
pub struct LeadershipMonitor {
    signal: Arc<dyn LeaderSignal>,
    confirmation: Duration,
    state: LeadershipState,
}

impl LeadershipMonitor {
    pub fn new(signal: Arc<dyn LeaderSignal>, confirmation: Duration) -> Self {
        Self {
            signal,
            confirmation,
            state: LeadershipState::NotLeader,
        }
    }

    pub fn state(&self) -> LeadershipState {
        self.state
    }

    /// Query the signal and advance the state machine
    pub async fn poll(&mut self) -> LeadershipState {
        let is_leader = self.signal.is_leader().await;
        self.advance(is_leader, Instant::now())
    }

    /// One state transition. Any negative signal drops straight back to
    /// NotLeader, whatever the current state.
    fn advance(&mut self, is_leader: bool, now: Instant) -> LeadershipState {
        let next = match (self.state, is_leader) {
            (_, false) => LeadershipState::NotLeader,
            (LeadershipState::NotLeader, true) => LeadershipState::Probationary { since: now },
            (LeadershipState::Probationary { since }, true) => {
                if now.duration_since(since) >= self.confirmation {
                    LeadershipState::Active
                } else {
                    LeadershipState::Probationary { since }
                }
            }
            (LeadershipState::Active, true) => LeadershipState::Active,
        };

        match (self.state, next) {
            (LeadershipState::NotLeader, LeadershipState::Probationary { .. }) => {
                info!("Leadership acquired, confirmation delay started");
            }
            (LeadershipState::Probationary { .. }, LeadershipState::Active) => {
                info!("Leadership confirmed, consumption enabled");
            }
            (LeadershipState::Active, LeadershipState::NotLeader) => {
                warn!("Leadership lost, consumption stopped");
            }
            (LeadershipState::Probationary { .. }, LeadershipState::NotLeader) => {
                debug!("Leadership lost during confirmation delay");
            }
            _ => {}
        }

        self.state = next;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(confirmation: Duration) -> LeadershipMonitor {
        LeadershipMonitor::new(Arc::new(StaticLeader(true)), confirmation)
    }

    #[test]
    fn test_probation_before_active() {
        let mut m = monitor(Duration::from_secs(10));
        let t0 = Instant::now();

        let state = m.advance(true, t0);
        assert!(matches!(state, LeadershipState::Probationary { .. }));
        assert!(!state.may_consume());

        // Still probationary before the delay elapses
        let state = m.advance(true, t0 + Duration::from_secs(5));
        assert!(!state.may_consume());

        let state = m.advance(true, t0 + Duration::from_secs(10));
        assert_eq!(state, LeadershipState::Active);
        assert!(state.may_consume());
    }

    #[test]
    fn test_negative_signal_drops_to_not_leader() {
        let mut m = monitor(Duration::from_secs(10));
        let t0 = Instant::now();

        m.advance(true, t0);
        m.advance(true, t0 + Duration::from_secs(10));
        assert_eq!(m.state(), LeadershipState::Active);

        let state = m.advance(false, t0 + Duration::from_secs(11));
        assert_eq!(state, LeadershipState::NotLeader);
    }

    #[test]
    fn test_loss_during_probation_restarts_delay() {
        let mut m = monitor(Duration::from_secs(10));
        let t0 = Instant::now();

        m.advance(true, t0);
        m.advance(false, t0 + Duration::from_secs(5));
        assert_eq!(m.state(), LeadershipState::NotLeader);

        // Re-election starts a fresh probation from the new instant
        let t1 = t0 + Duration::from_secs(6);
        m.advance(true, t1);
        let state = m.advance(true, t1 + Duration::from_secs(9));
        assert!(matches!(state, LeadershipState::Probationary { .. }));

        let state = m.advance(true, t1 + Duration::from_secs(10));
        assert_eq!(state, LeadershipState::Active);
    }

    #[test]
    fn test_zero_confirmation_activates_in_two_polls() {
        let mut m = monitor(Duration::ZERO);
        let t0 = Instant::now();

        m.advance(true, t0);
        let state = m.advance(true, t0);
        assert_eq!(state, LeadershipState::Active);
    }

    #[tokio::test]
    async fn test_static_leader_signal() {
        let mut m = LeadershipMonitor::new(Arc::new(StaticLeader(false)), Duration::ZERO);
        assert_eq!(m.poll().await, LeadershipState::NotLeader);
    }
}
