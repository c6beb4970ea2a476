//! Queue state machine data and transitions
//!
//! `QueueState` holds everything mutable about one queue. It is always
//! owned behind the engine's lock; nothing here spawns tasks or sends
//! messages, so every method is synchronous and infallible.

use crate::types::{Team, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Lifecycle phase of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    /// Collecting players
    Waiting,
    /// Queue filled, waiting for ready confirmations
    ReadyCheck,
    /// All ready, collecting captain volunteers
    SelectingCaptains,
    /// Captains assigned, snake draft in progress
    Picking,
}

impl std::fmt::Display for QueuePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueuePhase::Waiting => write!(f, "waiting"),
            QueuePhase::ReadyCheck => write!(f, "ready check"),
            QueuePhase::SelectingCaptains => write!(f, "selecting captains"),
            QueuePhase::Picking => write!(f, "picking"),
        }
    }
}

/// A player's answer during a ready check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyResponse {
    Pending,
    Ready,
}

/// Which captain picks at a given point of the snake draft.
///
/// Red opens with a single pick, then sides alternate in pairs:
/// R, B, B, R, R, B, B, ...
pub fn current_picker(total_picked: usize) -> Team {
    if total_picked == 0 {
        return Team::Red;
    }
    match (total_picked - 1) % 4 {
        0 | 1 => Team::Blue,
        _ => Team::Red,
    }
}

/// Whether the captain on turn may take both of their back-to-back
/// picks at once. The final player is never picked, they are assigned.
pub fn allows_double_pick(total_picked: usize, remaining: usize) -> bool {
    remaining > 2 && current_picker(total_picked) == current_picker(total_picked + 1)
}

/// Read-only view of a queue for status displays
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub phase: QueuePhase,
    pub players: Vec<UserId>,
    pub waitlist: Vec<UserId>,
    pub pending: Vec<UserId>,
    pub red_captain: Option<UserId>,
    pub blue_captain: Option<UserId>,
    pub picked_red: Vec<UserId>,
    pub picked_blue: Vec<UserId>,
    pub unpicked: Vec<UserId>,
}

/// Mutable state of one queue
#[derive(Debug)]
pub struct QueueState {
    pub phase: QueuePhase,
    /// Bumped on every phase transition; stale timer wakeups compare
    /// against it and bail out
    pub epoch: u64,
    /// Main queue in join order
    pub players: Vec<UserId>,
    /// Overflow, promoted FIFO
    pub waitlist: VecDeque<UserId>,
    pub responses: HashMap<UserId, ReadyResponse>,
    /// When each player last answered a ready check; a fresh answer
    /// carries over into the next check
    pub sticky_ready: HashMap<UserId, Instant>,
    /// Synthetic players seeded in simulation mode, always auto-ready
    pub simulated: HashSet<UserId>,
    pub volunteers: Vec<UserId>,
    pub red_captain: Option<UserId>,
    pub blue_captain: Option<UserId>,
    pub picked_red: Vec<UserId>,
    pub picked_blue: Vec<UserId>,
    pub unpicked: Vec<UserId>,
    /// Queue order frozen when the ready check completes; pick numbers
    /// shown to captains are 1-based positions in this list
    pub initial_queue: Vec<UserId>,
    pub total_picked: usize,
    pub last_activity: Instant,
    pub recent_tiebreakers: VecDeque<String>,
    pub autopick: bool,
    pub dm_notifications: bool,
    pub simulation: bool,
    pub ready_timer: Option<JoinHandle<()>>,
    pub captain_timer: Option<JoinHandle<()>>,
    pub inactivity_timer: Option<JoinHandle<()>>,
    pub expire_timers: HashMap<UserId, JoinHandle<()>>,
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            phase: QueuePhase::Waiting,
            epoch: 0,
            players: Vec::new(),
            waitlist: VecDeque::new(),
            responses: HashMap::new(),
            sticky_ready: HashMap::new(),
            simulated: HashSet::new(),
            volunteers: Vec::new(),
            red_captain: None,
            blue_captain: None,
            picked_red: Vec::new(),
            picked_blue: Vec::new(),
            unpicked: Vec::new(),
            initial_queue: Vec::new(),
            total_picked: 0,
            last_activity: Instant::now(),
            recent_tiebreakers: VecDeque::new(),
            autopick: true,
            dm_notifications: true,
            simulation: false,
            ready_timer: None,
            captain_timer: None,
            inactivity_timer: None,
            expire_timers: HashMap::new(),
        }
    }

    pub fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.players.contains(&user)
    }

    pub fn waitlisted(&self, user: UserId) -> bool {
        self.waitlist.contains(&user)
    }

    pub fn all_ready(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .iter()
                .all(|p| self.responses.get(p) == Some(&ReadyResponse::Ready))
    }

    pub fn pending(&self) -> Vec<UserId> {
        self.players
            .iter()
            .filter(|p| self.responses.get(p) == Some(&ReadyResponse::Pending))
            .copied()
            .collect()
    }

    /// Whether a sticky ready answer is still fresh enough to carry over
    pub fn sticky_is_fresh(&self, user: UserId, window: Duration) -> bool {
        self.sticky_ready
            .get(&user)
            .map(|at| at.elapsed() < window)
            .unwrap_or(false)
    }

    pub fn remember_tiebreaker(&mut self, map: String, cooldown: usize) {
        self.recent_tiebreakers.push_front(map);
        self.recent_tiebreakers.truncate(cooldown);
    }

    pub fn captain_of(&self, team: Team) -> Option<UserId> {
        match team {
            Team::Red => self.red_captain,
            Team::Blue => self.blue_captain,
        }
    }

    pub fn cancel_ready_timer(&mut self) {
        if let Some(handle) = self.ready_timer.take() {
            handle.abort();
        }
    }

    pub fn cancel_captain_timer(&mut self) {
        if let Some(handle) = self.captain_timer.take() {
            handle.abort();
        }
    }

    pub fn cancel_inactivity_timer(&mut self) {
        if let Some(handle) = self.inactivity_timer.take() {
            handle.abort();
        }
    }

    pub fn cancel_expire_timer(&mut self, user: UserId) {
        if let Some(handle) = self.expire_timers.remove(&user) {
            handle.abort();
        }
    }

    pub fn cancel_all_expire_timers(&mut self) {
        for (_, handle) in self.expire_timers.drain() {
            handle.abort();
        }
    }

    /// Drop everything formation-related, keeping the queue itself
    pub fn reset_formation(&mut self) {
        self.cancel_ready_timer();
        self.cancel_captain_timer();
        self.responses.clear();
        self.volunteers.clear();
        self.red_captain = None;
        self.blue_captain = None;
        self.picked_red.clear();
        self.picked_blue.clear();
        self.unpicked.clear();
        self.initial_queue.clear();
        self.total_picked = 0;
    }

    /// Empty the queue entirely, then refill from the waiting list.
    /// Tiebreaker history and the per-queue toggles survive.
    pub fn hard_reset(&mut self, capacity: usize) {
        self.reset_formation();
        self.cancel_inactivity_timer();
        self.cancel_all_expire_timers();
        self.players.clear();
        self.simulated.clear();
        self.phase = QueuePhase::Waiting;
        self.bump_epoch();
        self.touch();
        while self.players.len() < capacity {
            match self.waitlist.pop_front() {
                Some(promoted) => self.players.push(promoted),
                None => break,
            }
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            phase: self.phase,
            players: self.players.clone(),
            waitlist: self.waitlist.iter().copied().collect(),
            pending: self.pending(),
            red_captain: self.red_captain,
            blue_captain: self.blue_captain,
            picked_red: self.picked_red.clone(),
            picked_blue: self.picked_blue.clone(),
            unpicked: self.unpicked.clone(),
        }
    }
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for QueueState {
    fn drop(&mut self) {
        self.cancel_ready_timer();
        self.cancel_captain_timer();
        self.cancel_inactivity_timer();
        self.cancel_all_expire_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_draft_order() {
        let order: Vec<Team> = (0..8).map(current_picker).collect();
        assert_eq!(
            order,
            vec![
                Team::Red,
                Team::Blue,
                Team::Blue,
                Team::Red,
                Team::Red,
                Team::Blue,
                Team::Blue,
                Team::Red,
            ]
        );
    }

    #[test]
    fn test_double_pick_windows() {
        // Opening pick is a single
        assert!(!allows_double_pick(0, 6));
        // Blue's back-to-back picks
        assert!(allows_double_pick(1, 5));
        // Red's back-to-back picks
        assert!(allows_double_pick(3, 3));
        // Never when it would consume the auto-assigned last player
        assert!(!allows_double_pick(1, 2));
        assert!(!allows_double_pick(3, 2));
    }

    #[test]
    fn test_all_ready_requires_every_player() {
        let mut state = QueueState::new();
        assert!(!state.all_ready());

        state.players = vec![1, 2];
        state.responses.insert(1, ReadyResponse::Ready);
        state.responses.insert(2, ReadyResponse::Pending);
        assert!(!state.all_ready());
        assert_eq!(state.pending(), vec![2]);

        state.responses.insert(2, ReadyResponse::Ready);
        assert!(state.all_ready());
    }

    #[test]
    fn test_sticky_ready_freshness() {
        let mut state = QueueState::new();
        state.sticky_ready.insert(1, Instant::now());
        assert!(state.sticky_is_fresh(1, Duration::from_secs(600)));
        assert!(!state.sticky_is_fresh(1, Duration::from_secs(0)));
        assert!(!state.sticky_is_fresh(2, Duration::from_secs(600)));
    }

    #[test]
    fn test_tiebreaker_history_truncates() {
        let mut state = QueueState::new();
        for map in ["a", "b", "c", "d"] {
            state.remember_tiebreaker(map.to_string(), 3);
        }
        assert_eq!(state.recent_tiebreakers, vec!["d", "c", "b"]);
    }

    #[test]
    fn test_hard_reset_promotes_waitlist_and_keeps_toggles() {
        let mut state = QueueState::new();
        state.players = vec![1, 2, 3];
        state.waitlist.push_back(9);
        state.autopick = false;
        state.phase = QueuePhase::ReadyCheck;
        let epoch = state.epoch;

        state.hard_reset(4);
        assert_eq!(state.players, vec![9]);
        assert!(state.waitlist.is_empty());
        assert!(!state.autopick);
        assert_eq!(state.phase, QueuePhase::Waiting);
        assert!(state.epoch > epoch);
    }
}
