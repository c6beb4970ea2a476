//! Queue engine implementation
//!
//! One `QueueEngine` drives one (channel, mode) queue through its whole
//! lifecycle: collecting players, the ready check, captain selection,
//! the snake draft and finalization. The engine is shared behind an
//! `Arc`; its state sits behind a mutex whose guard is never held
//! across an await. Timers are spawned tasks that capture the state
//! epoch at spawn time and bail out if the queue has moved on.

use crate::balance::balance_teams;
use crate::config::QueueSettings;
use crate::error::{PugError, Result};
use crate::queue::registry::QueueRegistry;
use crate::queue::state::{
    allows_double_pick, current_picker, QueuePhase, QueueSnapshot, QueueState, ReadyResponse,
};
use crate::store::{NewMatch, Store};
use crate::surface::MessageSink;
use crate::types::{ChannelId, GameMode, MatchRecord, ScopeId, Team, UserId};
use crate::utils;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Why an operation was refused. These are expected answers to user
/// commands, not errors; the host renders them back to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NotRegistered,
    TimedOut { until: DateTime<Utc> },
    AlreadyQueued,
    AlreadyWaitlisted,
    NotInQueue,
    MatchForming,
    NoReadyCheck,
    NoDraft,
    NotCaptain,
    NotYourTurn,
    NotPickable { user: UserId },
    BadPickCount,
    DoublePickNotAllowed,
    AlreadyVolunteered,
    CaptainsNotWanted,
    ExpireOutOfBounds { min: u64, max: u64 },
    NoExpireSet,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::NotRegistered => write!(f, "You are not registered"),
            Rejection::TimedOut { until } => {
                write!(f, "You are timed out until {}", until.format("%H:%M UTC"))
            }
            Rejection::AlreadyQueued => write!(f, "You are already in this queue"),
            Rejection::AlreadyWaitlisted => write!(f, "You are already on the waiting list"),
            Rejection::NotInQueue => write!(f, "You are not in this queue"),
            Rejection::MatchForming => write!(f, "A match is currently forming"),
            Rejection::NoReadyCheck => write!(f, "There is no ready check running"),
            Rejection::NoDraft => write!(f, "There is no draft in progress"),
            Rejection::NotCaptain => write!(f, "You are not a captain"),
            Rejection::NotYourTurn => write!(f, "It is not your turn to pick"),
            Rejection::NotPickable { user } => write!(f, "Player {user} cannot be picked"),
            Rejection::BadPickCount => write!(f, "Pick one player, or two on a double pick"),
            Rejection::DoublePickNotAllowed => write!(f, "You only have a single pick right now"),
            Rejection::AlreadyVolunteered => write!(f, "You already volunteered"),
            Rejection::CaptainsNotWanted => write!(f, "Captain volunteers are not being taken"),
            Rejection::ExpireOutOfBounds { min, max } => {
                write!(f, "Expire time must be between {min} and {max} minutes")
            }
            Rejection::NoExpireSet => write!(f, "You have no scheduled removal"),
        }
    }
}

/// Result of a join attempt
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined { position: usize, capacity: usize },
    Waitlisted { position: usize },
    Rejected(Rejection),
}

/// Result of a simple queue operation
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    Done,
    Rejected(Rejection),
}

/// Result of a draft pick
#[derive(Debug, Clone, PartialEq)]
pub enum PickOutcome {
    Picked { remaining: usize },
    Rejected(Rejection),
}

/// Work that has to happen after the state lock is released
enum FollowUp {
    None,
    Proceed,
    Finalize { red: Vec<UserId>, blue: Vec<UserId> },
}

/// The engine for one (channel, mode) queue
pub struct QueueEngine {
    scope: ScopeId,
    channel: ChannelId,
    mode: GameMode,
    settings: QueueSettings,
    store: Arc<dyn Store>,
    sink: Arc<dyn MessageSink>,
    registry: Weak<QueueRegistry>,
    state: Mutex<QueueState>,
}

impl QueueEngine {
    pub fn new(
        scope: ScopeId,
        channel: ChannelId,
        mode: GameMode,
        settings: QueueSettings,
        store: Arc<dyn Store>,
        sink: Arc<dyn MessageSink>,
        registry: Weak<QueueRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scope,
            channel,
            mode,
            settings,
            store,
            sink,
            registry,
            state: Mutex::new(QueueState::new()),
        })
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn mode(&self) -> &GameMode {
        &self.mode
    }

    fn capacity(&self) -> usize {
        self.mode.team_size
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(|_| {
            PugError::InternalError {
                message: "Failed to acquire queue state lock".to_string(),
            }
            .into()
        })
    }

    /// Display name lookup; names are cosmetic, so store failures fall
    /// back to a placeholder instead of propagating
    fn name_of(&self, user: UserId) -> String {
        match self.store.get_player(&self.scope, user) {
            Ok(Some(player)) => player.display_name,
            _ => utils::placeholder_name(user),
        }
    }

    fn names(&self, users: &[UserId]) -> String {
        users
            .iter()
            .map(|u| self.name_of(*u))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn label(&self) -> String {
        format!("[{}]", self.mode.display_name)
    }

    /// Messaging is best-effort; a refused message is logged and the
    /// lifecycle carries on without it
    async fn announce(&self, text: &str) {
        if let Err(err) = self.sink.announce(self.channel, text).await {
            warn!(error = %err, channel = self.channel, "Announcement failed");
        }
    }

    async fn notify(&self, user: UserId, text: &str) {
        if let Err(err) = self.sink.direct_message(user, text).await {
            warn!(error = %err, user, "Direct message failed");
        }
    }

    /// Point-in-time view for status displays
    pub fn snapshot(&self) -> Result<QueueSnapshot> {
        Ok(self.lock()?.snapshot())
    }

    /// Map a 1-based pick number (position in the frozen queue order)
    /// back to a player, if that player is still unpicked
    pub fn resolve_pick_number(&self, number: usize) -> Result<Option<UserId>> {
        let state = self.lock()?;
        Ok(state
            .initial_queue
            .get(number.wrapping_sub(1))
            .copied()
            .filter(|u| state.unpicked.contains(u)))
    }

    // Joining and leaving

    pub async fn join(self: &Arc<Self>, user: UserId) -> Result<JoinOutcome> {
        if !self.store.player_exists(&self.scope, user)? {
            return Ok(JoinOutcome::Rejected(Rejection::NotRegistered));
        }
        if let Some(until) = self.store.timeout_status(&self.scope, user)? {
            return Ok(JoinOutcome::Rejected(Rejection::TimedOut { until }));
        }

        let capacity = self.capacity();
        let (outcome, message, check_full, start_inactivity) = {
            let mut state = self.lock()?;
            if state.contains(user) {
                (
                    JoinOutcome::Rejected(Rejection::AlreadyQueued),
                    None,
                    false,
                    false,
                )
            } else if state.waitlisted(user) {
                (
                    JoinOutcome::Rejected(Rejection::AlreadyWaitlisted),
                    None,
                    false,
                    false,
                )
            } else if state.phase == QueuePhase::Waiting && state.players.len() < capacity {
                state.players.push(user);
                state.touch();
                let position = state.players.len();
                let start_inactivity = state.inactivity_timer.is_none();
                let message = format!(
                    "{} {} joined the queue ({}/{})",
                    self.label(),
                    self.name_of(user),
                    position,
                    capacity
                );
                (
                    JoinOutcome::Joined { position, capacity },
                    Some(message),
                    position == capacity,
                    start_inactivity,
                )
            } else {
                state.waitlist.push_back(user);
                state.touch();
                let position = state.waitlist.len();
                let message = format!(
                    "{} {} added to the waiting list (#{})",
                    self.label(),
                    self.name_of(user),
                    position
                );
                (
                    JoinOutcome::Waitlisted { position },
                    Some(message),
                    false,
                    false,
                )
            }
        };

        if let Some(message) = message {
            self.announce(&message).await;
        }
        if start_inactivity {
            self.ensure_inactivity_timer()?;
        }
        if check_full {
            self.try_begin_ready_check().await?;
        }
        Ok(outcome)
    }

    pub async fn leave(self: &Arc<Self>, user: UserId) -> Result<OpOutcome> {
        enum Left {
            Waitlist,
            Queue,
            Rejected(Rejection),
        }

        let (left, message) = {
            let mut state = self.lock()?;
            if state.waitlisted(user) {
                state.waitlist.retain(|u| *u != user);
                (
                    Left::Waitlist,
                    Some(format!(
                        "{} {} left the waiting list",
                        self.label(),
                        self.name_of(user)
                    )),
                )
            } else if !state.contains(user) {
                (Left::Rejected(Rejection::NotInQueue), None)
            } else {
                match state.phase {
                    QueuePhase::Waiting => {
                        self.remove_from_queue(&mut state, user);
                        let message = format!(
                            "{} {} left the queue ({}/{})",
                            self.label(),
                            self.name_of(user),
                            state.players.len(),
                            self.capacity()
                        );
                        (Left::Queue, Some(message))
                    }
                    QueuePhase::ReadyCheck => (Left::Queue, None),
                    QueuePhase::SelectingCaptains | QueuePhase::Picking => {
                        (Left::Rejected(Rejection::MatchForming), None)
                    }
                }
            }
        };

        match left {
            Left::Rejected(rejection) => Ok(OpOutcome::Rejected(rejection)),
            Left::Waitlist => {
                if let Some(message) = message {
                    self.announce(&message).await;
                }
                Ok(OpOutcome::Done)
            }
            Left::Queue => {
                if let Some(message) = message {
                    self.announce(&message).await;
                    Ok(OpOutcome::Done)
                } else {
                    // Leaving during a ready check is a decline
                    self.decline(user).await
                }
            }
        }
    }

    /// Remove a player from the main queue, in Waiting phase only.
    /// Backfills from the waiting list to keep the queue order fair.
    fn remove_from_queue(&self, state: &mut QueueState, user: UserId) {
        state.players.retain(|u| *u != user);
        state.responses.remove(&user);
        state.cancel_expire_timer(user);
        state.touch();
        while state.players.len() < self.capacity() {
            match state.waitlist.pop_front() {
                Some(promoted) => state.players.push(promoted),
                None => break,
            }
        }
        if state.players.is_empty() {
            state.cancel_inactivity_timer();
        }
    }

    // Ready check

    async fn try_begin_ready_check(self: &Arc<Self>) -> Result<()> {
        let sticky = self.settings.sticky_ready_window();
        let (epoch, pending, messages, dms) = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::Waiting || state.players.len() < self.capacity() {
                return Ok(());
            }
            state.phase = QueuePhase::ReadyCheck;
            let epoch = state.bump_epoch();
            state.cancel_all_expire_timers();
            state.touch();

            let responses = state
                .players
                .iter()
                .map(|&p| {
                    let response = if state.simulated.contains(&p)
                        || state.sticky_is_fresh(p, sticky)
                    {
                        ReadyResponse::Ready
                    } else {
                        ReadyResponse::Pending
                    };
                    (p, response)
                })
                .collect();
            state.responses = responses;

            let pending = state.pending();
            let mut messages = vec![format!(
                "{} Queue is full! Ready check: confirm within {} seconds",
                self.label(),
                self.settings.ready_check_seconds
            )];
            if !pending.is_empty() {
                messages.push(format!(
                    "{} Waiting on: {}",
                    self.label(),
                    self.names(&pending)
                ));
            }
            let dms = if state.dm_notifications {
                pending
                    .iter()
                    .filter(|p| !state.simulated.contains(p))
                    .copied()
                    .collect()
            } else {
                Vec::new()
            };
            (epoch, pending, messages, dms)
        };

        for message in &messages {
            self.announce(message).await;
        }
        let dm_text = format!(
            "Your {} queue is full! Confirm you are ready within {} seconds",
            self.mode.format_label(),
            self.settings.ready_check_seconds
        );
        for user in dms {
            self.notify(user, &dm_text).await;
        }

        if pending.is_empty() {
            info!(channel = self.channel, mode = %self.mode.name, "All players carried ready");
            self.proceed_all_ready().await
        } else {
            let handle = self.spawn_ready_timer(epoch);
            let mut state = self.lock()?;
            if state.epoch == epoch {
                state.ready_timer = Some(handle);
            } else {
                handle.abort();
            }
            Ok(())
        }
    }

    fn spawn_ready_timer(self: &Arc<Self>, epoch: u64) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let window = self.settings.ready_check_window();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(err) = engine.on_ready_timeout(epoch).await {
                warn!(error = %err, "Ready check timeout handling failed");
            }
        })
    }

    pub async fn mark_ready(self: &Arc<Self>, user: UserId) -> Result<OpOutcome> {
        let (outcome, message, proceed) = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::ReadyCheck {
                (OpOutcome::Rejected(Rejection::NoReadyCheck), None, false)
            } else if !state.contains(user) {
                (OpOutcome::Rejected(Rejection::NotInQueue), None, false)
            } else {
                state.responses.insert(user, ReadyResponse::Ready);
                state.sticky_ready.insert(user, Instant::now());
                state.touch();
                let ready = state
                    .responses
                    .values()
                    .filter(|r| **r == ReadyResponse::Ready)
                    .count();
                let message = format!(
                    "{} {} is ready ({}/{})",
                    self.label(),
                    self.name_of(user),
                    ready,
                    state.players.len()
                );
                (OpOutcome::Done, Some(message), state.all_ready())
            }
        };

        if let Some(message) = message {
            self.announce(&message).await;
        }
        if proceed {
            self.proceed_all_ready().await?;
        }
        Ok(outcome)
    }

    pub async fn decline(self: &Arc<Self>, user: UserId) -> Result<OpOutcome> {
        let in_check = {
            let state = self.lock()?;
            state.phase == QueuePhase::ReadyCheck && state.contains(user)
        };
        if !in_check {
            let state = self.lock()?;
            return Ok(OpOutcome::Rejected(if state.phase != QueuePhase::ReadyCheck {
                Rejection::NoReadyCheck
            } else {
                Rejection::NotInQueue
            }));
        }

        self.announce(&format!(
            "{} {} declined and left the queue",
            self.label(),
            self.name_of(user)
        ))
        .await;
        self.drop_from_ready_check(vec![user]).await?;
        Ok(OpOutcome::Done)
    }

    /// Admin shortcut: treat everyone as ready and move on
    pub async fn skip_ready_check(self: &Arc<Self>) -> Result<OpOutcome> {
        let skipped = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::ReadyCheck {
                false
            } else {
                let players = state.players.clone();
                for player in players {
                    state.responses.insert(player, ReadyResponse::Ready);
                }
                true
            }
        };
        if !skipped {
            return Ok(OpOutcome::Rejected(Rejection::NoReadyCheck));
        }
        self.announce(&format!("{} Ready check skipped", self.label()))
            .await;
        self.proceed_all_ready().await?;
        Ok(OpOutcome::Done)
    }

    async fn on_ready_timeout(self: &Arc<Self>, epoch: u64) -> Result<()> {
        let removed = {
            let state = self.lock()?;
            if state.epoch != epoch || state.phase != QueuePhase::ReadyCheck {
                return Ok(());
            }
            state.pending()
        };
        if removed.is_empty() {
            return Ok(());
        }
        self.announce(&format!(
            "{} Ready check expired, removing: {}",
            self.label(),
            self.names(&removed)
        ))
        .await;
        self.drop_from_ready_check(removed).await
    }

    /// Remove players mid-ready-check, backfill from the waiting list,
    /// and either proceed, keep waiting on answers, or fall back to the
    /// waiting phase when the queue is no longer full.
    async fn drop_from_ready_check(self: &Arc<Self>, removed: Vec<UserId>) -> Result<()> {
        let sticky = self.settings.sticky_ready_window();
        let (messages, dms, next) = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::ReadyCheck {
                return Ok(());
            }
            for user in &removed {
                state.players.retain(|u| u != user);
                state.responses.remove(user);
                state.cancel_expire_timer(*user);
            }
            state.touch();

            let mut messages = Vec::new();
            let mut dms = Vec::new();
            while state.players.len() < self.capacity() {
                let Some(promoted) = state.waitlist.pop_front() else {
                    break;
                };
                let response = if state.simulated.contains(&promoted)
                    || state.sticky_is_fresh(promoted, sticky)
                {
                    ReadyResponse::Ready
                } else {
                    ReadyResponse::Pending
                };
                state.players.push(promoted);
                state.responses.insert(promoted, response);
                messages.push(format!(
                    "{} {} promoted from the waiting list",
                    self.label(),
                    self.name_of(promoted)
                ));
                if response == ReadyResponse::Pending
                    && state.dm_notifications
                    && !state.simulated.contains(&promoted)
                {
                    dms.push(promoted);
                }
            }

            let next = if state.players.len() < self.capacity() {
                // Not enough players left, the check is off
                state.phase = QueuePhase::Waiting;
                state.bump_epoch();
                state.cancel_ready_timer();
                state.responses.clear();
                messages.push(format!(
                    "{} Back to waiting ({}/{})",
                    self.label(),
                    state.players.len(),
                    self.capacity()
                ));
                if state.players.is_empty() {
                    state.cancel_inactivity_timer();
                }
                FollowUp::None
            } else if state.all_ready() {
                FollowUp::Proceed
            } else {
                FollowUp::None
            };
            (messages, dms, next)
        };

        for message in &messages {
            self.announce(message).await;
        }
        let dm_text = format!(
            "You were promoted into the {} queue! Confirm you are ready",
            self.mode.format_label()
        );
        for user in dms {
            self.notify(user, &dm_text).await;
        }
        if matches!(next, FollowUp::Proceed) {
            self.proceed_all_ready().await?;
        }
        Ok(())
    }

    // Team formation

    async fn proceed_all_ready(self: &Arc<Self>) -> Result<()> {
        let (epoch, autopick, one_v_one) = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::ReadyCheck || !state.all_ready() {
                return Ok(());
            }
            state.cancel_ready_timer();
            state.initial_queue = state.players.clone();
            state.phase = QueuePhase::SelectingCaptains;
            let epoch = state.bump_epoch();
            state.touch();
            // A 1v1 has no draft, the two players are the teams
            let one_v_one = if self.capacity() == 2 {
                state.red_captain = Some(state.players[0]);
                state.blue_captain = Some(state.players[1]);
                Some((state.players[0], state.players[1]))
            } else {
                None
            };
            (epoch, state.autopick, one_v_one)
        };

        if let Some((red, blue)) = one_v_one {
            let red_avg = self.average_rating(&[red])?;
            let blue_avg = self.average_rating(&[blue])?;
            return self.finalize(vec![red], vec![blue], red_avg, blue_avg).await;
        }

        self.begin_formation(epoch, autopick).await
    }

    async fn begin_formation(self: &Arc<Self>, epoch: u64, autopick: bool) -> Result<()> {
        if autopick {
            self.run_autopick().await
        } else {
            self.announce(&format!(
                "{} Everyone is ready! Volunteer to captain within {} seconds",
                self.label(),
                self.settings.captain_wait_seconds
            ))
            .await;
            let handle = self.spawn_captain_timer(epoch);
            let mut state = self.lock()?;
            if state.epoch == epoch {
                state.captain_timer = Some(handle);
            } else {
                handle.abort();
            }
            Ok(())
        }
    }

    fn spawn_captain_timer(self: &Arc<Self>, epoch: u64) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let window = self.settings.captain_wait();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(err) = engine.on_captain_timeout(epoch).await {
                warn!(error = %err, "Captain selection timeout handling failed");
            }
        })
    }

    async fn run_autopick(self: &Arc<Self>) -> Result<()> {
        let players = {
            let state = self.lock()?;
            state.players.clone()
        };

        let mut pool = Vec::with_capacity(players.len());
        for player in &players {
            let record = self.store.get_player(&self.scope, *player)?.ok_or_else(|| {
                PugError::PlayerNotFound {
                    user_id: *player,
                    scope_id: self.scope.clone(),
                }
            })?;
            pool.push((*player, record.rating));
        }

        match balance_teams(&pool) {
            Ok(teams) => {
                self.finalize(teams.red, teams.blue, teams.red_avg, teams.blue_avg)
                    .await
            }
            Err(err) => {
                warn!(error = %err, "Team balancing failed, keeping the queue");
                {
                    let mut state = self.lock()?;
                    state.reset_formation();
                    state.phase = QueuePhase::Waiting;
                    state.bump_epoch();
                }
                self.announce(&format!(
                    "{} Team formation failed, the queue was kept as-is",
                    self.label()
                ))
                .await;
                Ok(())
            }
        }
    }

    pub async fn volunteer_captain(self: &Arc<Self>, user: UserId) -> Result<OpOutcome> {
        let (outcome, message, start) = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::SelectingCaptains || state.autopick {
                (OpOutcome::Rejected(Rejection::CaptainsNotWanted), None, false)
            } else if !state.contains(user) {
                (OpOutcome::Rejected(Rejection::NotInQueue), None, false)
            } else if state.volunteers.contains(&user) {
                (
                    OpOutcome::Rejected(Rejection::AlreadyVolunteered),
                    None,
                    false,
                )
            } else {
                state.volunteers.push(user);
                state.touch();
                let message = format!(
                    "{} {} volunteers to captain ({}/2)",
                    self.label(),
                    self.name_of(user),
                    state.volunteers.len()
                );
                let start = if state.volunteers.len() == 2 {
                    state.red_captain = Some(state.volunteers[0]);
                    state.blue_captain = Some(state.volunteers[1]);
                    true
                } else {
                    false
                };
                (OpOutcome::Done, Some(message), start)
            }
        };

        if let Some(message) = message {
            self.announce(&message).await;
        }
        if start {
            self.start_picking().await?;
        }
        Ok(outcome)
    }

    async fn on_captain_timeout(self: &Arc<Self>, epoch: u64) -> Result<()> {
        let filled = {
            let mut state = self.lock()?;
            if state.epoch != epoch || state.phase != QueuePhase::SelectingCaptains {
                return Ok(());
            }
            let mut candidates: Vec<UserId> = state
                .players
                .iter()
                .filter(|p| !state.volunteers.contains(p))
                .copied()
                .collect();
            candidates.shuffle(&mut rand::thread_rng());

            let mut captains = state.volunteers.clone();
            captains.extend(candidates);
            captains.truncate(2);
            state.red_captain = Some(captains[0]);
            state.blue_captain = Some(captains[1]);
            true
        };
        if filled {
            self.announce(&format!(
                "{} No more volunteers, captains were drawn at random",
                self.label()
            ))
            .await;
            self.start_picking().await?;
        }
        Ok(())
    }

    async fn start_picking(self: &Arc<Self>) -> Result<()> {
        let (red, blue, roster) = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::SelectingCaptains {
                return Ok(());
            }
            state.cancel_captain_timer();
            let red = state.red_captain.expect("captains set before picking");
            let blue = state.blue_captain.expect("captains set before picking");
            state.picked_red = vec![red];
            state.picked_blue = vec![blue];
            state.unpicked = state
                .players
                .iter()
                .filter(|p| **p != red && **p != blue)
                .copied()
                .collect();
            state.total_picked = 0;
            state.phase = QueuePhase::Picking;
            state.bump_epoch();
            state.touch();

            let roster = state
                .unpicked
                .iter()
                .map(|u| {
                    let number = state
                        .initial_queue
                        .iter()
                        .position(|q| q == u)
                        .map(|i| i + 1)
                        .unwrap_or(0);
                    format!("{}. {}", number, self.name_of(*u))
                })
                .collect::<Vec<_>>()
                .join("  ");
            (red, blue, roster)
        };

        self.announce(&format!(
            "{} Captains: {} (red) vs {} (blue)",
            self.label(),
            self.name_of(red),
            self.name_of(blue)
        ))
        .await;

        // In a 1v1 the captains are the whole roster
        if roster.is_empty() {
            let red_avg = self.average_rating(&[red])?;
            let blue_avg = self.average_rating(&[blue])?;
            return self.finalize(vec![red], vec![blue], red_avg, blue_avg).await;
        }

        self.announce(&format!("{} Available players: {}", self.label(), roster))
            .await;
        self.announce(&format!(
            "{} {} (red) picks first",
            self.label(),
            self.name_of(red)
        ))
        .await;
        Ok(())
    }

    /// Replace a team's captain with a still-unpicked player. The old
    /// captain drops back into the unpicked pool.
    pub async fn takeover_captain(self: &Arc<Self>, user: UserId, team: Team) -> Result<OpOutcome> {
        let (outcome, message) = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::Picking {
                (OpOutcome::Rejected(Rejection::NoDraft), None)
            } else if !state.unpicked.contains(&user) {
                (OpOutcome::Rejected(Rejection::NotPickable { user }), None)
            } else {
                let old = state
                    .captain_of(team)
                    .expect("both captains set during picking");
                state.unpicked.retain(|u| *u != user);
                state.unpicked.push(old);
                match team {
                    Team::Red => {
                        state.red_captain = Some(user);
                        state.picked_red[0] = user;
                    }
                    Team::Blue => {
                        state.blue_captain = Some(user);
                        state.picked_blue[0] = user;
                    }
                }
                state.touch();
                let message = format!(
                    "{} {} took over as {} captain from {}",
                    self.label(),
                    self.name_of(user),
                    team,
                    self.name_of(old)
                );
                (OpOutcome::Done, Some(message))
            }
        };
        if let Some(message) = message {
            self.announce(&message).await;
        }
        Ok(outcome)
    }

    pub async fn pick(self: &Arc<Self>, user: UserId, targets: &[UserId]) -> Result<PickOutcome> {
        let (outcome, messages, follow) = {
            let mut state = self.lock()?;
            if state.phase != QueuePhase::Picking {
                return Ok(PickOutcome::Rejected(Rejection::NoDraft));
            }
            let team = current_picker(state.total_picked);
            let captain = state
                .captain_of(team)
                .expect("both captains set during picking");
            if captain != user {
                let rejection = if state.captain_of(team.opponent()) == Some(user) {
                    Rejection::NotYourTurn
                } else {
                    Rejection::NotCaptain
                };
                return Ok(PickOutcome::Rejected(rejection));
            }
            if targets.is_empty() || targets.len() > 2 {
                return Ok(PickOutcome::Rejected(Rejection::BadPickCount));
            }
            if targets.len() == 2 {
                if !allows_double_pick(state.total_picked, state.unpicked.len()) {
                    return Ok(PickOutcome::Rejected(Rejection::DoublePickNotAllowed));
                }
                if targets[0] == targets[1] {
                    return Ok(PickOutcome::Rejected(Rejection::NotPickable {
                        user: targets[1],
                    }));
                }
            }
            for target in targets {
                if !state.unpicked.contains(target) {
                    return Ok(PickOutcome::Rejected(Rejection::NotPickable {
                        user: *target,
                    }));
                }
            }

            let mut messages = Vec::new();
            for target in targets {
                state.unpicked.retain(|u| u != target);
                match team {
                    Team::Red => state.picked_red.push(*target),
                    Team::Blue => state.picked_blue.push(*target),
                }
                state.total_picked += 1;
                messages.push(format!(
                    "{} {} picked {} for team {}",
                    self.label(),
                    self.name_of(user),
                    self.name_of(*target),
                    team
                ));
            }
            state.touch();

            // The final player is assigned, never picked
            if state.unpicked.len() == 1 {
                let last = state.unpicked.remove(0);
                let short = if state.picked_red.len() < self.mode.per_team() {
                    Team::Red
                } else {
                    Team::Blue
                };
                match short {
                    Team::Red => state.picked_red.push(last),
                    Team::Blue => state.picked_blue.push(last),
                }
                state.total_picked += 1;
                messages.push(format!(
                    "{} {} was assigned to team {}",
                    self.label(),
                    self.name_of(last),
                    short
                ));
            }

            let follow = if state.unpicked.is_empty() {
                FollowUp::Finalize {
                    red: state.picked_red.clone(),
                    blue: state.picked_blue.clone(),
                }
            } else {
                let next_team = current_picker(state.total_picked);
                let next_captain = state
                    .captain_of(next_team)
                    .expect("both captains set during picking");
                let hint = if allows_double_pick(state.total_picked, state.unpicked.len()) {
                    " (double pick)"
                } else {
                    ""
                };
                messages.push(format!(
                    "{} {} ({}) is up{}",
                    self.label(),
                    self.name_of(next_captain),
                    next_team,
                    hint
                ));
                FollowUp::None
            };

            (
                PickOutcome::Picked {
                    remaining: state.unpicked.len(),
                },
                messages,
                follow,
            )
        };

        for message in &messages {
            self.announce(message).await;
        }
        if let FollowUp::Finalize { red, blue } = follow {
            let red_avg = self.average_rating(&red)?;
            let blue_avg = self.average_rating(&blue)?;
            self.finalize(red, blue, red_avg, blue_avg).await?;
        }
        Ok(outcome)
    }

    fn average_rating(&self, roster: &[UserId]) -> Result<f64> {
        let mut ratings = Vec::with_capacity(roster.len());
        for user in roster {
            let record = self.store.get_player(&self.scope, *user)?.ok_or_else(|| {
                PugError::PlayerNotFound {
                    user_id: *user,
                    scope_id: self.scope.clone(),
                }
            })?;
            ratings.push(record.rating);
        }
        Ok(utils::average(&ratings))
    }

    // Finalization

    async fn finalize(
        self: &Arc<Self>,
        red: Vec<UserId>,
        blue: Vec<UserId>,
        red_avg: f64,
        blue_avg: f64,
    ) -> Result<()> {
        let tiebreaker = self.roll_tiebreaker()?;

        let record = self.store.add_match(NewMatch {
            scope_id: self.scope.clone(),
            mode: self.mode.name.clone(),
            red_team: red.clone(),
            blue_team: blue.clone(),
            avg_red_rating: red_avg,
            avg_blue_rating: blue_avg,
            tiebreaker_map: tiebreaker.clone(),
        })?;
        info!(
            match_id = record.id,
            channel = self.channel,
            mode = %self.mode.name,
            "Match formed"
        );

        let participants = record.participants();
        {
            let mut state = self.lock()?;
            state.reset_formation();
            state.players.clear();
            state.simulated.clear();
            state.phase = QueuePhase::Waiting;
            state.bump_epoch();
            state.touch();
            while state.players.len() < self.capacity() {
                match state.waitlist.pop_front() {
                    Some(promoted) => state.players.push(promoted),
                    None => break,
                }
            }
        }

        self.announce_match(&record).await;

        // Participants are swept from every other queue in the scope
        if let Some(registry) = self.registry.upgrade() {
            registry
                .remove_from_all(&participants, self.channel, &self.mode.name)
                .await?;
        }

        // Promotions may have refilled the queue. Boxed to keep the
        // recursive future finitely sized.
        Box::pin(self.try_begin_ready_check()).await
    }

    async fn announce_match(&self, record: &MatchRecord) {
        self.announce(&format!(
            "{} Match #{} is ready!",
            self.label(),
            record.id
        ))
        .await;
        self.announce(&format!(
            "{} Red (avg {:.0}): {}",
            self.label(),
            record.avg_red_rating,
            self.names(&record.red_team)
        ))
        .await;
        self.announce(&format!(
            "{} Blue (avg {:.0}): {}",
            self.label(),
            record.avg_blue_rating,
            self.names(&record.blue_team)
        ))
        .await;
        if let Some(map) = &record.tiebreaker_map {
            self.announce(&format!("{} Tiebreaker map: {}", self.label(), map))
                .await;
        }
    }

    /// Roll a tiebreaker map for full-size games, avoiding the maps
    /// rolled in the last few matches of this queue
    fn roll_tiebreaker(&self) -> Result<Option<String>> {
        if self.mode.team_size != 8 {
            return Ok(None);
        }
        let pool = self.store.map_pool(&self.scope)?;
        if pool.is_empty() {
            return Ok(None);
        }

        let mut state = self.lock()?;
        let eligible: Vec<&String> = pool
            .iter()
            .filter(|m| !state.recent_tiebreakers.contains(*m))
            .collect();
        let chosen = if eligible.is_empty() {
            pool.choose(&mut rand::thread_rng()).cloned()
        } else {
            eligible
                .choose(&mut rand::thread_rng())
                .map(|m| (*m).clone())
        };
        if let Some(map) = &chosen {
            let cooldown = self.settings.tiebreaker_cooldown;
            state.remember_tiebreaker(map.clone(), cooldown);
        }
        Ok(chosen)
    }

    // Scheduled removal

    pub async fn set_expire(self: &Arc<Self>, user: UserId, minutes: u64) -> Result<OpOutcome> {
        if !self.settings.expire_in_bounds(minutes) {
            return Ok(OpOutcome::Rejected(Rejection::ExpireOutOfBounds {
                min: self.settings.expire_min_minutes,
                max: self.settings.expire_max_minutes,
            }));
        }
        let accepted = {
            let state = self.lock()?;
            state.phase == QueuePhase::Waiting && state.contains(user)
        };
        if !accepted {
            return Ok(OpOutcome::Rejected(Rejection::NotInQueue));
        }

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(minutes * 60)).await;
            if let Err(err) = engine.on_expire(user).await {
                warn!(error = %err, user, "Scheduled removal failed");
            }
        });
        {
            let mut state = self.lock()?;
            state.cancel_expire_timer(user);
            state.expire_timers.insert(user, handle);
        }

        self.announce(&format!(
            "{} {} will be removed from the queue in {} minutes",
            self.label(),
            self.name_of(user),
            minutes
        ))
        .await;
        Ok(OpOutcome::Done)
    }

    pub async fn cancel_expire(&self, user: UserId) -> Result<OpOutcome> {
        let had_timer = {
            let mut state = self.lock()?;
            if state.expire_timers.contains_key(&user) {
                state.cancel_expire_timer(user);
                true
            } else {
                false
            }
        };
        if !had_timer {
            return Ok(OpOutcome::Rejected(Rejection::NoExpireSet));
        }
        self.announce(&format!(
            "{} Scheduled removal for {} cancelled",
            self.label(),
            self.name_of(user)
        ))
        .await;
        Ok(OpOutcome::Done)
    }

    /// Expire timers only act while the queue is still collecting
    /// players; a ready check cancels them
    async fn on_expire(self: &Arc<Self>, user: UserId) -> Result<()> {
        let removed = {
            let mut state = self.lock()?;
            state.expire_timers.remove(&user);
            if state.phase == QueuePhase::Waiting && state.contains(user) {
                self.remove_from_queue(&mut state, user);
                true
            } else {
                false
            }
        };
        if removed {
            self.announce(&format!(
                "{} {} was removed from the queue (scheduled)",
                self.label(),
                self.name_of(user)
            ))
            .await;
        }
        Ok(())
    }

    // Inactivity

    fn ensure_inactivity_timer(self: &Arc<Self>) -> Result<()> {
        let mut state = self.lock()?;
        if state.inactivity_timer.is_some() {
            return Ok(());
        }
        let engine = Arc::clone(self);
        let window = self.settings.inactivity_deadline();
        state.inactivity_timer = Some(tokio::spawn(async move {
            loop {
                let idle = match engine.idle_time() {
                    Ok(idle) => idle,
                    Err(_) => return,
                };
                match window.checked_sub(idle) {
                    Some(remaining) if !remaining.is_zero() => {
                        tokio::time::sleep(remaining).await;
                    }
                    _ => break,
                }
            }
            if let Err(err) = engine.on_inactivity().await {
                warn!(error = %err, "Inactivity reset failed");
            }
        }));
        Ok(())
    }

    fn idle_time(&self) -> Result<std::time::Duration> {
        Ok(self.lock()?.last_activity.elapsed())
    }

    async fn on_inactivity(self: &Arc<Self>) -> Result<()> {
        let (had_players, refilled) = {
            let mut state = self.lock()?;
            state.inactivity_timer = None;
            if state.players.is_empty() {
                (false, false)
            } else {
                debug!(channel = self.channel, mode = %self.mode.name, "Inactivity reset");
                state.hard_reset(self.capacity());
                (true, state.players.len() == self.capacity())
            }
        };
        if had_players {
            self.announce(&format!(
                "{} Queue was reset after a long period of inactivity",
                self.label()
            ))
            .await;
        }
        // Waitlisted players promoted by the reset may fill the queue
        if refilled {
            self.try_begin_ready_check().await?;
        }
        Ok(())
    }

    // Admin and toggles

    /// Abort any in-flight formation but keep everyone queued. A still
    /// full queue restarts team formation from the captain stage.
    pub async fn reset(self: &Arc<Self>) -> Result<()> {
        let restart = {
            let mut state = self.lock()?;
            state.reset_formation();
            state.touch();
            if state.players.len() == self.capacity() {
                state.initial_queue = state.players.clone();
                state.phase = QueuePhase::SelectingCaptains;
                let epoch = state.bump_epoch();
                Some((epoch, state.autopick))
            } else {
                state.phase = QueuePhase::Waiting;
                state.bump_epoch();
                None
            }
        };
        self.announce(&format!("{} Queue was reset", self.label()))
            .await;
        if let Some((epoch, autopick)) = restart {
            self.begin_formation(epoch, autopick).await?;
        }
        Ok(())
    }

    /// Clear the queue entirely, promoting waitlisted players into the
    /// emptied slots
    pub async fn hard_reset(self: &Arc<Self>) -> Result<()> {
        let refilled = {
            let mut state = self.lock()?;
            state.hard_reset(self.capacity());
            state.players.len() == self.capacity()
        };
        self.announce(&format!("{} Queue was cleared", self.label()))
            .await;
        if refilled {
            self.try_begin_ready_check().await?;
        }
        Ok(())
    }

    pub fn set_autopick(&self, enabled: bool) -> Result<()> {
        self.lock()?.autopick = enabled;
        Ok(())
    }

    pub fn set_dm_notifications(&self, enabled: bool) -> Result<()> {
        self.lock()?.dm_notifications = enabled;
        Ok(())
    }

    pub fn set_simulation(&self, enabled: bool) -> Result<()> {
        self.lock()?.simulation = enabled;
        Ok(())
    }

    /// Fill the queue with synthetic auto-ready players. Only available
    /// once simulation mode is switched on.
    pub async fn seed_simulated_players(self: &Arc<Self>, count: usize) -> Result<usize> {
        if !self.lock()?.simulation {
            return Ok(0);
        }

        let mut seeded = 0;
        for i in 0..count {
            let user = 1_000_000 + i as UserId;
            if self.lock()?.contains(user) {
                continue;
            }
            let spread = (i as f64 % 7.0 - 3.0) * 50.0;
            self.store.register_player(
                &self.scope,
                user,
                &format!("Sim_{}", i + 1),
                1000.0 + spread,
            )?;
            self.lock()?.simulated.insert(user);
            if let JoinOutcome::Joined { .. } | JoinOutcome::Waitlisted { .. } =
                self.join(user).await?
            {
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    /// Remove the given users wherever they sit in this queue. Used
    /// when a match formed elsewhere claims them.
    pub async fn sweep(self: &Arc<Self>, users: &[UserId]) -> Result<()> {
        let (removed, refilled) = {
            let mut state = self.lock()?;
            let mut removed = Vec::new();
            for user in users {
                if state.contains(*user) {
                    state.players.retain(|u| u != user);
                    state.responses.remove(user);
                    state.cancel_expire_timer(*user);
                    removed.push(*user);
                }
                state.waitlist.retain(|u| u != user);
            }
            let mut refilled = false;
            if !removed.is_empty() {
                state.touch();
                if state.phase != QueuePhase::Waiting {
                    // Formation can't continue with players missing
                    state.reset_formation();
                    state.phase = QueuePhase::Waiting;
                    state.bump_epoch();
                }
                while state.players.len() < self.capacity() {
                    match state.waitlist.pop_front() {
                        Some(promoted) => state.players.push(promoted),
                        None => break,
                    }
                }
                refilled = state.players.len() == self.capacity();
                if state.players.is_empty() {
                    state.cancel_inactivity_timer();
                }
            }
            (removed, refilled)
        };
        if !removed.is_empty() {
            self.announce(&format!(
                "{} Removed (match started elsewhere): {}",
                self.label(),
                self.names(&removed)
            ))
            .await;
        }
        // Promotions may leave the queue full again. Boxed because
        // finalization reaches sweep through the registry.
        if refilled {
            Box::pin(self.try_begin_ready_check()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::surface::RecordingSink;

    const SCOPE: &str = "test-scope";
    const CHANNEL: ChannelId = 100;

    fn fast_settings() -> QueueSettings {
        QueueSettings {
            ready_check_seconds: 1,
            captain_wait_seconds: 1,
            sticky_ready_seconds: 600,
            inactivity_seconds: 3600,
            expire_min_minutes: 1,
            expire_max_minutes: 120,
            winner_vote_seconds: 1,
            split_vote_seconds: 1,
            tiebreaker_cooldown: 3,
        }
    }

    fn mode(team_size: usize) -> GameMode {
        GameMode {
            name: "default".to_string(),
            display_name: format!("{}v{}", team_size / 2, team_size / 2),
            team_size,
            description: String::new(),
        }
    }

    fn build(
        team_size: usize,
    ) -> (Arc<QueueEngine>, Arc<MemoryStore>, Arc<RecordingSink>) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = QueueEngine::new(
            SCOPE.to_string(),
            CHANNEL,
            mode(team_size),
            fast_settings(),
            store.clone(),
            sink.clone(),
            Weak::new(),
        );
        (engine, store, sink)
    }

    fn register(store: &MemoryStore, users: std::ops::Range<UserId>) {
        for user in users {
            store
                .register_player(SCOPE, user, &format!("P{user}"), 1000.0)
                .unwrap();
        }
    }

    async fn ready_all(engine: &Arc<QueueEngine>, users: std::ops::Range<UserId>) {
        for user in users {
            engine.mark_ready(user).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_join_rejections() {
        let (engine, store, _) = build(4);
        assert_eq!(
            engine.join(1).await.unwrap(),
            JoinOutcome::Rejected(Rejection::NotRegistered)
        );

        register(&store, 1..2);
        assert!(matches!(
            engine.join(1).await.unwrap(),
            JoinOutcome::Joined { position: 1, capacity: 4 }
        ));
        assert_eq!(
            engine.join(1).await.unwrap(),
            JoinOutcome::Rejected(Rejection::AlreadyQueued)
        );
    }

    #[tokio::test]
    async fn test_timed_out_player_cannot_join() {
        let (engine, store, _) = build(4);
        register(&store, 1..2);
        let until = utils::current_timestamp() + chrono::Duration::minutes(30);
        store.add_timeout(SCOPE, 1, until).unwrap();

        assert_eq!(
            engine.join(1).await.unwrap(),
            JoinOutcome::Rejected(Rejection::TimedOut { until })
        );
    }

    #[tokio::test]
    async fn test_full_queue_starts_ready_check_and_autopick_finalizes() {
        let (engine, store, sink) = build(4);
        register(&store, 1..5);
        for user in 1..5 {
            engine.join(user).await.unwrap();
        }
        assert_eq!(engine.snapshot().unwrap().phase, QueuePhase::ReadyCheck);

        ready_all(&engine, 1..5).await;

        // Autopick runs synchronously once everyone is ready
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.phase, QueuePhase::Waiting);
        assert!(snapshot.players.is_empty());

        let matches = store.recent_matches(SCOPE, 10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].red_team.len(), 2);
        assert_eq!(matches[0].blue_team.len(), 2);
        assert!(sink
            .announcements()
            .iter()
            .any(|m| m.contains("Match #1 is ready")));
    }

    #[tokio::test]
    async fn test_overflow_goes_to_waitlist() {
        let (engine, store, _) = build(2);
        register(&store, 1..4);
        engine.join(1).await.unwrap();
        engine.join(2).await.unwrap();
        // Queue is in ready check now, the next join waits
        assert_eq!(
            engine.join(3).await.unwrap(),
            JoinOutcome::Waitlisted { position: 1 }
        );
        assert_eq!(
            engine.join(3).await.unwrap(),
            JoinOutcome::Rejected(Rejection::AlreadyWaitlisted)
        );
    }

    #[tokio::test]
    async fn test_decline_backfills_from_waitlist() {
        let (engine, store, sink) = build(2);
        register(&store, 1..4);
        engine.join(1).await.unwrap();
        engine.join(2).await.unwrap();
        engine.join(3).await.unwrap();

        engine.mark_ready(1).await.unwrap();
        engine.decline(2).await.unwrap();

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.phase, QueuePhase::ReadyCheck);
        assert_eq!(snapshot.players, vec![1, 3]);
        assert_eq!(snapshot.pending, vec![3]);
        assert!(sink.announcements().iter().any(|m| m.contains("promoted")));

        // Promoted player confirms, the match forms
        engine.mark_ready(3).await.unwrap();
        assert_eq!(store.recent_matches(SCOPE, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ready_timeout_drops_pending_and_reverts_to_waiting() {
        let (engine, store, sink) = build(2);
        register(&store, 1..3);
        engine.join(1).await.unwrap();
        engine.join(2).await.unwrap();
        engine.mark_ready(1).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.phase, QueuePhase::Waiting);
        assert_eq!(snapshot.players, vec![1]);
        assert!(sink
            .announcements()
            .iter()
            .any(|m| m.contains("Ready check expired")));
    }

    #[tokio::test]
    async fn test_sticky_ready_carries_into_next_check() {
        let (engine, store, _) = build(2);
        register(&store, 1..4);
        engine.join(1).await.unwrap();
        engine.join(2).await.unwrap();

        // Player 1 answers, player 2 never does and gets dropped
        engine.mark_ready(1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        assert_eq!(engine.snapshot().unwrap().players, vec![1]);

        // Player 3 fills the queue again; player 1's answer carries, so
        // only player 3 is pending
        engine.join(3).await.unwrap();
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.phase, QueuePhase::ReadyCheck);
        assert_eq!(snapshot.pending, vec![3]);
    }

    #[tokio::test]
    async fn test_captain_draft_full_flow() {
        let (engine, store, sink) = build(4);
        register(&store, 1..5);
        engine.set_autopick(false).unwrap();
        for user in 1..5 {
            engine.join(user).await.unwrap();
        }
        ready_all(&engine, 1..5).await;

        assert_eq!(
            engine.snapshot().unwrap().phase,
            QueuePhase::SelectingCaptains
        );
        engine.volunteer_captain(1).await.unwrap();
        assert_eq!(
            engine.volunteer_captain(1).await.unwrap(),
            OpOutcome::Rejected(Rejection::AlreadyVolunteered)
        );
        engine.volunteer_captain(2).await.unwrap();

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.phase, QueuePhase::Picking);
        assert_eq!(snapshot.red_captain, Some(1));
        assert_eq!(snapshot.blue_captain, Some(2));

        // Blue may not pick out of turn
        assert_eq!(
            engine.pick(2, &[3]).await.unwrap(),
            PickOutcome::Rejected(Rejection::NotYourTurn)
        );
        // Red picks, the last player is auto-assigned to blue
        assert_eq!(
            engine.pick(1, &[3]).await.unwrap(),
            PickOutcome::Picked { remaining: 0 }
        );

        let record = &store.recent_matches(SCOPE, 10).unwrap()[0];
        assert_eq!(record.red_team, vec![1, 3]);
        assert_eq!(record.blue_team, vec![2, 4]);
        assert!(sink.announcements().iter().any(|m| m.contains("assigned")));
    }

    #[tokio::test]
    async fn test_captain_timeout_draws_random_captains() {
        let (engine, store, _) = build(4);
        register(&store, 1..5);
        engine.set_autopick(false).unwrap();
        for user in 1..5 {
            engine.join(user).await.unwrap();
        }
        ready_all(&engine, 1..5).await;
        engine.volunteer_captain(2).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.phase, QueuePhase::Picking);
        // The lone volunteer keeps the red slot
        assert_eq!(snapshot.red_captain, Some(2));
        assert!(snapshot.blue_captain.is_some());
        assert_ne!(snapshot.blue_captain, Some(2));
    }

    #[tokio::test]
    async fn test_one_v_one_finalizes_straight_from_ready_check() {
        let (engine, store, _) = build(2);
        register(&store, 1..3);
        engine.set_autopick(false).unwrap();
        engine.join(1).await.unwrap();
        engine.join(2).await.unwrap();
        ready_all(&engine, 1..3).await;

        // No captain stage in a 1v1, the match forms immediately
        assert_eq!(
            engine.volunteer_captain(1).await.unwrap(),
            OpOutcome::Rejected(Rejection::CaptainsNotWanted)
        );
        let record = &store.recent_matches(SCOPE, 10).unwrap()[0];
        assert_eq!(record.red_team, vec![1]);
        assert_eq!(record.blue_team, vec![2]);
        assert_eq!(engine.snapshot().unwrap().phase, QueuePhase::Waiting);
    }

    #[tokio::test]
    async fn test_takeover_swaps_captain_during_draft() {
        let (engine, store, _) = build(4);
        register(&store, 1..5);
        engine.set_autopick(false).unwrap();
        for user in 1..5 {
            engine.join(user).await.unwrap();
        }
        ready_all(&engine, 1..5).await;
        engine.volunteer_captain(1).await.unwrap();
        engine.volunteer_captain(2).await.unwrap();

        assert_eq!(
            engine.takeover_captain(3, Team::Blue).await.unwrap(),
            OpOutcome::Done
        );
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.blue_captain, Some(3));
        assert!(snapshot.unpicked.contains(&2));

        // Seated captains cannot take over the other team
        assert_eq!(
            engine.takeover_captain(1, Team::Blue).await.unwrap(),
            OpOutcome::Rejected(Rejection::NotPickable { user: 1 })
        );
    }

    #[tokio::test]
    async fn test_snake_draft_with_double_pick() {
        let (engine, store, _) = build(8);
        register(&store, 1..9);
        engine.set_autopick(false).unwrap();
        for user in 1..9 {
            engine.join(user).await.unwrap();
        }
        ready_all(&engine, 1..9).await;
        engine.volunteer_captain(1).await.unwrap();
        engine.volunteer_captain(2).await.unwrap();

        // Red single, then blue double, then red double
        engine.pick(1, &[3]).await.unwrap();
        assert_eq!(
            engine.pick(2, &[4]).await.unwrap(),
            PickOutcome::Picked { remaining: 4 }
        );
        engine.pick(2, &[5]).await.unwrap();
        assert_eq!(
            engine.pick(1, &[6, 7]).await.unwrap(),
            // 8 is auto-assigned to blue
            PickOutcome::Picked { remaining: 0 }
        );

        let record = &store.recent_matches(SCOPE, 10).unwrap()[0];
        assert_eq!(record.red_team, vec![1, 3, 6, 7]);
        assert_eq!(record.blue_team, vec![2, 4, 5, 8]);
    }

    #[tokio::test]
    async fn test_simulation_seeding_fills_and_finalizes() {
        let (engine, store, _) = build(4);
        engine.set_simulation(true).unwrap();
        let seeded = engine.seed_simulated_players(4).await.unwrap();
        assert_eq!(seeded, 4);

        // Simulated players are auto-ready, the match forms immediately
        assert_eq!(store.recent_matches(SCOPE, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expire_bounds_and_cancel() {
        let (engine, store, _) = build(4);
        register(&store, 1..2);
        engine.join(1).await.unwrap();

        assert_eq!(
            engine.set_expire(1, 0).await.unwrap(),
            OpOutcome::Rejected(Rejection::ExpireOutOfBounds { min: 1, max: 120 })
        );
        assert_eq!(engine.set_expire(1, 30).await.unwrap(), OpOutcome::Done);
        assert_eq!(engine.cancel_expire(1).await.unwrap(), OpOutcome::Done);
        assert_eq!(
            engine.cancel_expire(1).await.unwrap(),
            OpOutcome::Rejected(Rejection::NoExpireSet)
        );
    }

    #[tokio::test]
    async fn test_sweep_removes_players_and_refills() {
        let (engine, store, sink) = build(4);
        register(&store, 1..6);
        for user in 1..4 {
            engine.join(user).await.unwrap();
        }
        engine.sweep(&[2, 3]).await.unwrap();

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.players, vec![1]);
        assert!(sink
            .announcements()
            .iter()
            .any(|m| m.contains("match started elsewhere")));
    }

    #[tokio::test]
    async fn test_tiebreaker_only_for_full_size_games() {
        let (engine, store, _) = build(8);
        register(&store, 1..9);
        store.add_map(SCOPE, "Fort").unwrap();
        for user in 1..9 {
            engine.join(user).await.unwrap();
        }
        ready_all(&engine, 1..9).await;

        let record = &store.recent_matches(SCOPE, 10).unwrap()[0];
        assert_eq!(record.tiebreaker_map, Some("Fort".to_string()));

        let (small, small_store, _) = build(4);
        register(&small_store, 1..5);
        small_store.add_map(SCOPE, "Fort").unwrap();
        for user in 1..5 {
            small.join(user).await.unwrap();
        }
        ready_all(&small, 1..5).await;
        let record = &small_store.recent_matches(SCOPE, 10).unwrap()[0];
        assert_eq!(record.tiebreaker_map, None);
    }

    #[tokio::test]
    async fn test_sweep_backfill_restarts_ready_check() {
        let (engine, store, _) = build(4);
        register(&store, 1..7);
        for user in 1..5 {
            engine.join(user).await.unwrap();
        }
        assert_eq!(engine.snapshot().unwrap().phase, QueuePhase::ReadyCheck);
        engine.join(5).await.unwrap();
        engine.join(6).await.unwrap();

        engine.sweep(&[1, 2]).await.unwrap();

        // The waitlist refilled the queue, a fresh ready check starts
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.players, vec![3, 4, 5, 6]);
        assert_eq!(snapshot.phase, QueuePhase::ReadyCheck);
    }

    #[tokio::test]
    async fn test_inactivity_reset_promotes_waitlist() {
        let mut settings = fast_settings();
        settings.inactivity_seconds = 1;
        settings.ready_check_seconds = 600;
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = QueueEngine::new(
            SCOPE.to_string(),
            CHANNEL,
            mode(2),
            settings,
            store.clone(),
            sink.clone(),
            Weak::new(),
        );
        register(&store, 1..4);
        engine.join(1).await.unwrap();
        engine.join(2).await.unwrap();
        engine.join(3).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1400)).await;

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.phase, QueuePhase::Waiting);
        assert_eq!(snapshot.players, vec![3]);
        assert!(snapshot.waitlist.is_empty());
    }

    #[tokio::test]
    async fn test_reset_keeps_queue_and_restarts_formation() {
        let (engine, store, _) = build(4);
        register(&store, 1..5);
        engine.set_autopick(false).unwrap();
        for user in 1..5 {
            engine.join(user).await.unwrap();
        }
        assert_eq!(engine.snapshot().unwrap().phase, QueuePhase::ReadyCheck);

        engine.reset().await.unwrap();

        // Everyone stays queued, formation restarts at the captain stage
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.players, vec![1, 2, 3, 4]);
        assert_eq!(snapshot.phase, QueuePhase::SelectingCaptains);

        engine.volunteer_captain(1).await.unwrap();
        engine.volunteer_captain(2).await.unwrap();
        assert_eq!(engine.snapshot().unwrap().phase, QueuePhase::Picking);
    }

    #[tokio::test]
    async fn test_hard_reset_clears_queue_and_promotes_waitlist() {
        let (engine, store, sink) = build(2);
        register(&store, 1..4);
        engine.join(1).await.unwrap();
        engine.join(2).await.unwrap();
        engine.join(3).await.unwrap();

        engine.hard_reset().await.unwrap();

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.players, vec![3]);
        assert!(snapshot.waitlist.is_empty());
        assert_eq!(snapshot.phase, QueuePhase::Waiting);
        assert!(sink
            .announcements()
            .iter()
            .any(|m| m.contains("Queue was cleared")));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_wedge_the_lifecycle() {
        use crate::surface::MockMessageSink;

        let mut mock = MockMessageSink::new();
        mock.expect_announce().returning(|_, _| {
            Err(PugError::InternalError {
                message: "sink down".to_string(),
            }
            .into())
        });
        mock.expect_direct_message().returning(|_, _| {
            Err(PugError::InternalError {
                message: "sink down".to_string(),
            }
            .into())
        });

        let store = Arc::new(MemoryStore::new());
        let engine = QueueEngine::new(
            SCOPE.to_string(),
            CHANNEL,
            mode(2),
            fast_settings(),
            store.clone(),
            Arc::new(mock),
            Weak::new(),
        );
        register(&store, 1..3);
        assert!(matches!(
            engine.join(1).await.unwrap(),
            JoinOutcome::Joined { .. }
        ));
        engine.join(2).await.unwrap();
        // The ready check still starts and its timer still runs
        assert_eq!(engine.snapshot().unwrap().phase, QueuePhase::ReadyCheck);

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        assert_eq!(engine.snapshot().unwrap().phase, QueuePhase::Waiting);
    }
}
