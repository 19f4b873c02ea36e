//! # Election State Machine
//!
//! Pure Bully-style election logic. Every input (message, timer expiry, API
//! call) returns the list of [`ElectionAction`]s the service must perform;
//! the machine itself never touches the transport or the clock.
//!
//! ```text
//! FOLLOWER ──timeout / vacancy──→ ELECTING ──no higher reply──→ LEADER
//!     ↑                               │                           │
//!     └──── COORDINATOR from higher ──┴──── step down / higher ───┘
//! ```
//!
//! Timer actions carry a token (`round` or `epoch`). An expiry whose token
//! no longer matches belongs to a superseded timer and is ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use shared_types::{InstanceId, Rank};
use tokio::time::Instant;

use super::messages::{ElectionMessage, MessageKind};

/// Election role of this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionState {
    Follower,
    Electing,
    Leader,
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Follower => write!(f, "FOLLOWER"),
            ElectionState::Electing => write!(f, "ELECTING"),
            ElectionState::Leader => write!(f, "LEADER"),
        }
    }
}

/// Change of the leader known to this instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipChange {
    /// Whether this instance is now the leader.
    pub is_leader: bool,
    pub previous_leader: Option<InstanceId>,
    pub current_leader: Option<InstanceId>,
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionAction {
    Broadcast(MessageKind),
    ArmElectionTimer { round: u64 },
    CancelElectionTimer,
    ArmLeadershipTimer { epoch: u64 },
    CancelLeadershipTimer,
    StartHeartbeats,
    StopHeartbeats,
    /// Start an election after a random jitter delay.
    ScheduleElection,
    LeadershipChanged(LeadershipChange),
    InstanceGone(InstanceId),
}

/// Registry entry for a peer heard on the election channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub priority: u64,
    pub last_seen: Instant,
}

/// Election state of one instance.
#[derive(Debug)]
pub struct ElectionCore {
    rank: Rank,
    state: ElectionState,
    round: u64,
    leader_epoch: u64,
    replies_from_higher: usize,
    awaiting_coordinator: bool,
    isolated: bool,
    current_leader: Option<Rank>,
    last_known_leader: Option<InstanceId>,
    leader_since: Option<Instant>,
    peers: BTreeMap<InstanceId, PeerRecord>,
}

impl ElectionCore {
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            state: ElectionState::Follower,
            round: 0,
            leader_epoch: 0,
            replies_from_higher: 0,
            awaiting_coordinator: false,
            isolated: false,
            current_leader: None,
            last_known_leader: None,
            leader_since: None,
            peers: BTreeMap::new(),
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn rank(&self) -> &Rank {
        &self.rank
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn is_leader(&self) -> bool {
        self.state == ElectionState::Leader
    }

    pub fn current_leader(&self) -> Option<&InstanceId> {
        self.current_leader.as_ref().map(|rank| &rank.instance_id)
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn leader_since(&self) -> Option<Instant> {
        self.leader_since
    }

    pub fn peers(&self) -> &BTreeMap<InstanceId, PeerRecord> {
        &self.peers
    }

    /// Outbound message of `kind` from this instance.
    pub fn message(&self, kind: MessageKind) -> ElectionMessage {
        ElectionMessage::new(kind, &self.rank)
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Begin a new election round.
    pub fn start_election(&mut self, now: Instant) -> Vec<ElectionAction> {
        let mut actions = Vec::new();
        if self.state == ElectionState::Leader {
            actions.push(ElectionAction::StopHeartbeats);
            self.set_leader(None, now, &mut actions);
        }

        self.round += 1;
        self.state = ElectionState::Electing;
        self.replies_from_higher = 0;
        self.awaiting_coordinator = false;
        self.isolated = false;

        actions.push(ElectionAction::CancelLeadershipTimer);
        actions.push(ElectionAction::Broadcast(MessageKind::Election));
        actions.push(ElectionAction::ArmElectionTimer { round: self.round });
        actions
    }

    /// The `ELECTION` broadcast of the current round could not be sent.
    pub fn mark_isolated(&mut self) {
        if self.state == ElectionState::Electing {
            self.isolated = true;
        }
    }

    /// Election timer expiry for `round`.
    pub fn on_election_timeout(&mut self, round: u64, now: Instant) -> Vec<ElectionAction> {
        if round != self.round || self.state != ElectionState::Electing {
            return Vec::new();
        }

        if self.isolated || self.awaiting_coordinator {
            // Unreachable peers, or a higher candidate that never announced.
            return self.start_election(now);
        }

        if self.replies_from_higher > 0 {
            self.awaiting_coordinator = true;
            return vec![ElectionAction::ArmElectionTimer { round }];
        }

        self.become_leader(now)
    }

    /// Leadership timer expiry for `epoch`.
    pub fn on_leadership_timeout(&mut self, epoch: u64, now: Instant) -> Vec<ElectionAction> {
        if epoch != self.leader_epoch || self.state != ElectionState::Follower {
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.set_leader(None, now, &mut actions);
        actions.extend(self.start_election(now));
        actions
    }

    /// Jittered re-election timer expiry.
    pub fn on_scheduled_election(&mut self, now: Instant) -> Vec<ElectionAction> {
        if self.state == ElectionState::Follower && self.current_leader.is_none() {
            self.start_election(now)
        } else {
            Vec::new()
        }
    }

    /// Periodic heartbeat tick.
    pub fn heartbeat(&self) -> Vec<ElectionAction> {
        if self.is_leader() {
            vec![ElectionAction::Broadcast(MessageKind::Heartbeat)]
        } else {
            Vec::new()
        }
    }

    /// Relinquish leadership and re-elect after a jitter delay.
    pub fn step_down(&mut self, now: Instant) -> Vec<ElectionAction> {
        if self.state != ElectionState::Leader {
            return Vec::new();
        }
        let mut actions = vec![
            ElectionAction::Broadcast(MessageKind::StepDown),
            ElectionAction::StopHeartbeats,
        ];
        self.state = ElectionState::Follower;
        self.set_leader(None, now, &mut actions);
        actions.push(ElectionAction::ScheduleElection);
        actions
    }

    /// Final transition before the instance leaves the bus.
    pub fn shutdown(&mut self, now: Instant) -> Vec<ElectionAction> {
        let mut actions = Vec::new();
        if self.state == ElectionState::Leader {
            actions.push(ElectionAction::StopHeartbeats);
        }
        actions.push(ElectionAction::Broadcast(MessageKind::Shutdown));
        self.state = ElectionState::Follower;
        self.set_leader(None, now, &mut actions);
        self.peers.clear();
        actions
    }

    /// Refresh the last-seen time of an already known peer.
    pub fn touch(&mut self, instance_id: &InstanceId, now: Instant) {
        if let Some(peer) = self.peers.get_mut(instance_id) {
            peer.last_seen = now;
        }
    }

    /// Evict peers unheard for longer than `max_silence`.
    pub fn sweep(&mut self, now: Instant, max_silence: Duration) -> Vec<ElectionAction> {
        let stale: Vec<InstanceId> = self
            .peers
            .iter()
            .filter(|(_, peer)| now.saturating_duration_since(peer.last_seen) > max_silence)
            .map(|(id, _)| id.clone())
            .collect();

        let mut actions = Vec::new();
        for id in stale {
            self.peers.remove(&id);
            actions.push(ElectionAction::InstanceGone(id.clone()));
            if self.current_leader() == Some(&id) && self.state == ElectionState::Follower {
                self.set_leader(None, now, &mut actions);
                actions.extend(self.start_election(now));
            }
        }
        actions
    }

    /// Handle one inbound message.
    pub fn on_message(&mut self, message: &ElectionMessage, now: Instant) -> Vec<ElectionAction> {
        if message.sender_id == self.rank.instance_id {
            return Vec::new();
        }
        let sender = message.sender_rank();

        if message.kind != MessageKind::Shutdown {
            self.peers.insert(
                sender.instance_id.clone(),
                PeerRecord {
                    priority: sender.priority,
                    last_seen: now,
                },
            );
        }

        match message.kind {
            MessageKind::Election => self.on_election(&sender, now),
            MessageKind::ElectionOk => {
                if self.state == ElectionState::Electing && sender > self.rank {
                    self.replies_from_higher += 1;
                }
                Vec::new()
            }
            MessageKind::Coordinator => self.on_coordinator(sender, now),
            MessageKind::Heartbeat => self.on_heartbeat(sender, now),
            MessageKind::StepDown => {
                if self.current_leader() != Some(&sender.instance_id) {
                    return Vec::new();
                }
                let mut actions = vec![ElectionAction::CancelLeadershipTimer];
                self.set_leader(None, now, &mut actions);
                actions.push(ElectionAction::ScheduleElection);
                actions
            }
            MessageKind::Shutdown => {
                self.peers.remove(&sender.instance_id);
                let mut actions = vec![ElectionAction::InstanceGone(sender.instance_id.clone())];
                if self.current_leader() == Some(&sender.instance_id) {
                    self.set_leader(None, now, &mut actions);
                    actions.extend(self.start_election(now));
                }
                actions
            }
        }
    }

    fn on_election(&mut self, sender: &Rank, now: Instant) -> Vec<ElectionAction> {
        if *sender > self.rank {
            return Vec::new();
        }

        let mut actions = vec![ElectionAction::Broadcast(MessageKind::ElectionOk)];
        match self.state {
            ElectionState::Leader => {
                actions.push(ElectionAction::Broadcast(MessageKind::Coordinator));
            }
            ElectionState::Electing => {}
            ElectionState::Follower => {
                let leader_outranks_us = self
                    .current_leader
                    .as_ref()
                    .is_some_and(|leader| *leader > self.rank);
                if !leader_outranks_us {
                    actions.extend(self.start_election(now));
                }
            }
        }
        actions
    }

    fn on_coordinator(&mut self, sender: Rank, now: Instant) -> Vec<ElectionAction> {
        if sender < self.rank {
            // A lower-ranked instance claims leadership.
            return match self.state {
                ElectionState::Leader => vec![ElectionAction::Broadcast(MessageKind::Coordinator)],
                _ => {
                    let mut actions = vec![ElectionAction::CancelElectionTimer];
                    actions.extend(self.start_election(now));
                    actions
                }
            };
        }
        self.follow(sender, now)
    }

    fn on_heartbeat(&mut self, sender: Rank, now: Instant) -> Vec<ElectionAction> {
        if sender > self.rank {
            if self.state == ElectionState::Leader {
                // Two leaders: the lower one yields.
                return self.step_down(now);
            }
            return self.follow(sender, now);
        }

        match self.state {
            ElectionState::Follower => self.start_election(now),
            // Challenge already in flight, or our own heartbeats will
            // make the lower leader yield.
            ElectionState::Electing | ElectionState::Leader => Vec::new(),
        }
    }

    fn become_leader(&mut self, now: Instant) -> Vec<ElectionAction> {
        let mut actions = vec![
            ElectionAction::CancelElectionTimer,
            ElectionAction::CancelLeadershipTimer,
        ];
        self.state = ElectionState::Leader;
        actions.push(ElectionAction::Broadcast(MessageKind::Coordinator));
        actions.push(ElectionAction::StartHeartbeats);
        self.set_leader(Some(self.rank.clone()), now, &mut actions);
        actions
    }

    fn follow(&mut self, leader: Rank, now: Instant) -> Vec<ElectionAction> {
        let mut actions = Vec::new();
        if self.state == ElectionState::Leader {
            actions.push(ElectionAction::StopHeartbeats);
        }
        if self.state == ElectionState::Electing {
            actions.push(ElectionAction::CancelElectionTimer);
        }
        self.state = ElectionState::Follower;
        self.awaiting_coordinator = false;
        self.set_leader(Some(leader), now, &mut actions);

        self.leader_epoch += 1;
        actions.push(ElectionAction::ArmLeadershipTimer {
            epoch: self.leader_epoch,
        });
        actions
    }

    fn set_leader(&mut self, leader: Option<Rank>, now: Instant, actions: &mut Vec<ElectionAction>) {
        if self.current_leader == leader {
            return;
        }

        let previous = self
            .current_leader
            .take()
            .map(|rank| rank.instance_id)
            .or_else(|| self.last_known_leader.clone());
        let is_leader = leader.as_ref() == Some(&self.rank);
        let current = leader.as_ref().map(|rank| rank.instance_id.clone());

        self.leader_since = if is_leader { Some(now) } else { None };
        if let Some(id) = &current {
            self.last_known_leader = Some(id.clone());
        }
        self.current_leader = leader;

        actions.push(ElectionAction::LeadershipChanged(LeadershipChange {
            is_leader,
            previous_leader: previous,
            current_leader: current,
        }));
    }
}
