//! Result coordinator implementation

use crate::config::{QueueSettings, RatingSettings};
use crate::error::{PugError, Result};
use crate::rating::EloCalculator;
use crate::store::Store;
use crate::surface::MessageSink;
use crate::types::{
    ChannelId, MatchId, MatchRecord, MatchStatus, MatchWinner, ScopeId, Team, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// What a ballot is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    Winner(Team),
    Split,
    Cancel,
}

impl std::fmt::Display for VoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteKind::Winner(team) => write!(f, "{team} win"),
            VoteKind::Split => write!(f, "split"),
            VoteKind::Cancel => write!(f, "cancel"),
        }
    }
}

/// Why a ballot or admin action was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteRejection {
    NoOpenMatch,
    MatchNotFound { match_id: MatchId },
    NotParticipant,
    AlreadyVoted,
    DifferentVoteInProgress,
    AlreadySettled,
    MatchKilled,
    NotKilled,
    NothingToUndo,
    SplitIsFinal,
}

impl std::fmt::Display for VoteRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteRejection::NoOpenMatch => write!(f, "You have no open match to report"),
            VoteRejection::MatchNotFound { match_id } => write!(f, "Match #{match_id} not found"),
            VoteRejection::NotParticipant => write!(f, "You did not play in this match"),
            VoteRejection::AlreadyVoted => write!(f, "You already voted"),
            VoteRejection::DifferentVoteInProgress => {
                write!(f, "A different vote is already running for this match")
            }
            VoteRejection::AlreadySettled => write!(f, "This match already has a result"),
            VoteRejection::MatchKilled => write!(f, "This match was killed"),
            VoteRejection::NotKilled => write!(f, "This match is not killed"),
            VoteRejection::NothingToUndo => write!(f, "This match has no result to undo"),
            VoteRejection::SplitIsFinal => write!(f, "A split result cannot be changed"),
        }
    }
}

/// Result of casting a ballot
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    Settled { match_id: MatchId },
    Progress { match_id: MatchId, votes: usize, needed: usize },
    Rejected(VoteRejection),
}

/// Result of an admin override
#[derive(Debug, Clone, PartialEq)]
pub enum AdminOutcome {
    Done,
    Rejected(VoteRejection),
}

struct VotePoll {
    kind: VoteKind,
    channel: ChannelId,
    voters: HashSet<UserId>,
    threshold: usize,
    nonce: u64,
    timer: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for VotePoll {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

/// Coordinator for result votes and admin result overrides in one scope
pub struct ResultCoordinator {
    scope: ScopeId,
    settings: QueueSettings,
    calculator: EloCalculator,
    store: Arc<dyn Store>,
    sink: Arc<dyn MessageSink>,
    polls: Mutex<HashMap<MatchId, VotePoll>>,
    next_nonce: Mutex<u64>,
}

impl ResultCoordinator {
    pub fn new(
        scope: ScopeId,
        settings: QueueSettings,
        rating: &RatingSettings,
        store: Arc<dyn Store>,
        sink: Arc<dyn MessageSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scope,
            settings,
            calculator: EloCalculator::new(rating.k_factor, rating.starting_rating),
            store,
            sink,
            polls: Mutex::new(HashMap::new()),
            next_nonce: Mutex::new(0),
        })
    }

    fn lock_polls(&self) -> Result<MutexGuard<'_, HashMap<MatchId, VotePoll>>> {
        self.polls.lock().map_err(|_| {
            PugError::InternalError {
                message: "Failed to acquire polls lock".to_string(),
            }
            .into()
        })
    }

    fn take_nonce(&self) -> Result<u64> {
        let mut counter = self.next_nonce.lock().map_err(|_| PugError::InternalError {
            message: "Failed to acquire nonce lock".to_string(),
        })?;
        *counter += 1;
        Ok(*counter)
    }

    fn name_of(&self, user: UserId) -> String {
        match self.store.get_player(&self.scope, user) {
            Ok(Some(player)) => player.display_name,
            _ => crate::utils::placeholder_name(user),
        }
    }

    /// Messaging is best-effort; a refused message is logged and the
    /// settlement carries on without it
    async fn announce(&self, channel: ChannelId, text: &str) {
        if let Err(err) = self.sink.announce(channel, text).await {
            warn!(error = %err, channel, "Announcement failed");
        }
    }

    /// Majority of the participant count
    fn threshold(participants: usize) -> usize {
        participants / 2 + 1
    }

    /// Find the match a report refers to: an explicit id wins,
    /// otherwise the reporter's newest open match
    fn resolve_target(
        &self,
        reporter: UserId,
        explicit: Option<MatchId>,
    ) -> Result<Option<MatchRecord>> {
        if let Some(id) = explicit {
            return self.store.get_match(&self.scope, id);
        }
        let recent = self.store.recent_matches(&self.scope, 25)?;
        Ok(recent
            .into_iter()
            .find(|m| m.is_open() && m.contains(reporter)))
    }

    /// Cast a ballot, opening the poll if this is the first one. A
    /// majority settles the match immediately.
    pub async fn report(
        self: &Arc<Self>,
        channel: ChannelId,
        reporter: UserId,
        target: Option<MatchId>,
        kind: VoteKind,
    ) -> Result<VoteOutcome> {
        let record = match self.resolve_target(reporter, target)? {
            Some(record) => record,
            None => {
                let rejection = match target {
                    Some(match_id) => VoteRejection::MatchNotFound { match_id },
                    None => VoteRejection::NoOpenMatch,
                };
                return Ok(VoteOutcome::Rejected(rejection));
            }
        };
        if record.status == MatchStatus::Killed {
            return Ok(VoteOutcome::Rejected(VoteRejection::MatchKilled));
        }
        if record.winner.is_some() {
            return Ok(VoteOutcome::Rejected(VoteRejection::AlreadySettled));
        }
        if !record.contains(reporter) {
            return Ok(VoteOutcome::Rejected(VoteRejection::NotParticipant));
        }

        let threshold = Self::threshold(record.participants().len());
        let (settle, announce, nonce) = {
            let mut polls = self.lock_polls()?;
            match polls.get_mut(&record.id) {
                Some(poll) if poll.kind != kind => {
                    return Ok(VoteOutcome::Rejected(VoteRejection::DifferentVoteInProgress));
                }
                Some(poll) => {
                    if !poll.voters.insert(reporter) {
                        return Ok(VoteOutcome::Rejected(VoteRejection::AlreadyVoted));
                    }
                    let votes = poll.voters.len();
                    if votes >= poll.threshold {
                        polls.remove(&record.id);
                        (true, None, None)
                    } else {
                        let text = format!(
                            "Match #{}: {} voted {} ({}/{})",
                            record.id,
                            self.name_of(reporter),
                            kind,
                            votes,
                            threshold
                        );
                        (false, Some((text, votes)), None)
                    }
                }
                None => {
                    if threshold <= 1 {
                        (true, None, None)
                    } else {
                        let nonce = self.take_nonce()?;
                        polls.insert(
                            record.id,
                            VotePoll {
                                kind,
                                channel,
                                voters: HashSet::from([reporter]),
                                threshold,
                                nonce,
                                timer: None,
                            },
                        );
                        let window = match kind {
                            VoteKind::Split => self.settings.split_vote_seconds,
                            _ => self.settings.winner_vote_seconds,
                        };
                        let text = format!(
                            "Match #{}: {} opened a {} vote (1/{}), {} seconds to vote",
                            record.id,
                            self.name_of(reporter),
                            kind,
                            threshold,
                            window
                        );
                        (false, Some((text, 1)), Some(nonce))
                    }
                }
            }
        };

        if settle {
            self.settle(channel, &record, kind).await?;
            return Ok(VoteOutcome::Settled { match_id: record.id });
        }

        let (text, votes) = announce.expect("progress outcome always carries a message");
        self.announce(channel, &text).await;

        if let Some(nonce) = nonce {
            let handle = self.spawn_expiry(record.id, kind, nonce);
            let mut polls = self.lock_polls()?;
            match polls.get_mut(&record.id) {
                Some(poll) if poll.nonce == nonce => poll.timer = Some(handle),
                _ => handle.abort(),
            }
        }

        Ok(VoteOutcome::Progress {
            match_id: record.id,
            votes,
            needed: threshold,
        })
    }

    fn spawn_expiry(
        self: &Arc<Self>,
        match_id: MatchId,
        kind: VoteKind,
        nonce: u64,
    ) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let window = match kind {
            VoteKind::Split => self.settings.split_vote_window(),
            _ => self.settings.winner_vote_window(),
        };
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(err) = coordinator.on_vote_expired(match_id, nonce).await {
                warn!(error = %err, match_id, "Vote expiry handling failed");
            }
        })
    }

    async fn on_vote_expired(&self, match_id: MatchId, nonce: u64) -> Result<()> {
        let expired = {
            let mut polls = self.lock_polls()?;
            match polls.get(&match_id) {
                Some(poll) if poll.nonce == nonce => {
                    let channel = poll.channel;
                    let kind = poll.kind;
                    polls.remove(&match_id);
                    Some((channel, kind))
                }
                _ => None,
            }
        };
        if let Some((channel, kind)) = expired {
            self.announce(
                channel,
                &format!("Match #{match_id}: the {kind} vote expired without a majority"),
            )
            .await;
        }
        Ok(())
    }

    // Settlement

    async fn settle(&self, channel: ChannelId, record: &MatchRecord, kind: VoteKind) -> Result<()> {
        match kind {
            VoteKind::Winner(team) => self.settle_winner(channel, record, team).await,
            VoteKind::Split => self.settle_split(channel, record).await,
            VoteKind::Cancel => self.settle_cancel(channel, record).await,
        }
    }

    /// Shift every participant's rating by the team delta, computed
    /// from the averages frozen at match formation
    async fn settle_winner(
        &self,
        channel: ChannelId,
        record: &MatchRecord,
        team: Team,
    ) -> Result<()> {
        let (delta, _) = self
            .calculator
            .settle(record.avg_rating(team), record.avg_rating(team.opponent()));

        for user in record.roster(team) {
            self.store.apply_result(&self.scope, *user, true, delta)?;
        }
        for user in record.roster(team.opponent()) {
            self.store.apply_result(&self.scope, *user, false, -delta)?;
        }
        self.store
            .set_match_winner(&self.scope, record.id, Some(team.into()))?;
        info!(match_id = record.id, winner = %team, delta, "Match settled");

        self.announce(
            channel,
            &format!(
                "Match #{}: team {} wins! ({:+.0} / {:+.0} rating)",
                record.id, team, delta, -delta
            ),
        )
        .await;
        Ok(())
    }

    /// A split counts half a win for each side: ratings move toward the
    /// draw expectancy against the averages frozen at formation, and
    /// everyone's match count advances. Win/loss records and streaks
    /// stay put.
    async fn settle_split(&self, channel: ChannelId, record: &MatchRecord) -> Result<()> {
        let (red_delta, blue_delta) = self
            .calculator
            .settle_split(record.avg_red_rating, record.avg_blue_rating);
        for user in &record.red_team {
            self.store.apply_split(&self.scope, *user, red_delta)?;
        }
        for user in &record.blue_team {
            self.store.apply_split(&self.scope, *user, blue_delta)?;
        }
        self.store
            .set_match_winner(&self.scope, record.id, Some(MatchWinner::Split))?;
        info!(match_id = record.id, red_delta, blue_delta, "Match settled as a split");

        self.announce(
            channel,
            &format!(
                "Match #{}: declared a split ({:+.1} / {:+.1} rating)",
                record.id, red_delta, blue_delta
            ),
        )
        .await;
        Ok(())
    }

    async fn settle_cancel(&self, channel: ChannelId, record: &MatchRecord) -> Result<()> {
        self.store
            .set_match_status(&self.scope, record.id, MatchStatus::Killed)?;
        info!(match_id = record.id, "Match cancelled by vote");

        self.announce(
            channel,
            &format!("Match #{}: cancelled, it will not be rated", record.id),
        )
        .await;
        Ok(())
    }

    // Admin overrides

    /// Reverse a decisive result: ratings and win/loss/total counters
    /// roll back, streaks and peaks stay where they are. Splits are
    /// final and cannot be undone.
    pub async fn undo_winner(&self, channel: ChannelId, match_id: MatchId) -> Result<AdminOutcome> {
        let Some(record) = self.store.get_match(&self.scope, match_id)? else {
            return Ok(AdminOutcome::Rejected(VoteRejection::MatchNotFound {
                match_id,
            }));
        };
        let team = match record.winner {
            None => return Ok(AdminOutcome::Rejected(VoteRejection::NothingToUndo)),
            Some(MatchWinner::Split) => {
                return Ok(AdminOutcome::Rejected(VoteRejection::SplitIsFinal))
            }
            Some(MatchWinner::Red) => Team::Red,
            Some(MatchWinner::Blue) => Team::Blue,
        };

        let (delta, _) = self
            .calculator
            .settle(record.avg_rating(team), record.avg_rating(team.opponent()));
        for user in record.roster(team) {
            self.store.revert_result(&self.scope, *user, true, delta)?;
        }
        for user in record.roster(team.opponent()) {
            self.store
                .revert_result(&self.scope, *user, false, -delta)?;
        }
        self.store.set_match_winner(&self.scope, match_id, None)?;
        info!(match_id, "Match result undone");

        self.announce(
            channel,
            &format!("Match #{match_id}: result undone, ratings rolled back"),
        )
        .await;
        Ok(AdminOutcome::Done)
    }

    /// Force a winner. An existing decisive result is undone first so
    /// the correction nets out exactly.
    pub async fn set_winner(
        &self,
        channel: ChannelId,
        match_id: MatchId,
        team: Team,
    ) -> Result<AdminOutcome> {
        let Some(record) = self.store.get_match(&self.scope, match_id)? else {
            return Ok(AdminOutcome::Rejected(VoteRejection::MatchNotFound {
                match_id,
            }));
        };
        if record.status == MatchStatus::Killed {
            return Ok(AdminOutcome::Rejected(VoteRejection::MatchKilled));
        }
        match record.winner {
            Some(MatchWinner::Split) => {
                return Ok(AdminOutcome::Rejected(VoteRejection::SplitIsFinal))
            }
            Some(_) => {
                if let AdminOutcome::Rejected(rejection) =
                    self.undo_winner(channel, match_id).await?
                {
                    return Ok(AdminOutcome::Rejected(rejection));
                }
            }
            None => {}
        }

        // Re-read after a potential undo
        let record = self
            .store
            .get_match(&self.scope, match_id)?
            .ok_or(PugError::MatchNotFound { match_id })?;
        self.drop_poll(match_id)?;
        self.settle_winner(channel, &record, team).await?;
        Ok(AdminOutcome::Done)
    }

    /// Force a split result on a winnerless match, bypassing the vote
    pub async fn set_split(&self, channel: ChannelId, match_id: MatchId) -> Result<AdminOutcome> {
        let Some(record) = self.store.get_match(&self.scope, match_id)? else {
            return Ok(AdminOutcome::Rejected(VoteRejection::MatchNotFound {
                match_id,
            }));
        };
        if record.status == MatchStatus::Killed {
            return Ok(AdminOutcome::Rejected(VoteRejection::MatchKilled));
        }
        if record.winner.is_some() {
            return Ok(AdminOutcome::Rejected(VoteRejection::AlreadySettled));
        }

        self.drop_poll(match_id)?;
        self.settle_split(channel, &record).await?;
        Ok(AdminOutcome::Done)
    }

    /// Kill a winnerless match so it can no longer be reported
    pub async fn kill(&self, channel: ChannelId, match_id: MatchId) -> Result<AdminOutcome> {
        let Some(record) = self.store.get_match(&self.scope, match_id)? else {
            return Ok(AdminOutcome::Rejected(VoteRejection::MatchNotFound {
                match_id,
            }));
        };
        if record.winner.is_some() {
            return Ok(AdminOutcome::Rejected(VoteRejection::AlreadySettled));
        }
        if record.status == MatchStatus::Killed {
            return Ok(AdminOutcome::Rejected(VoteRejection::MatchKilled));
        }

        self.drop_poll(match_id)?;
        self.store
            .set_match_status(&self.scope, match_id, MatchStatus::Killed)?;
        self.announce(channel, &format!("Match #{match_id}: killed"))
            .await;
        Ok(AdminOutcome::Done)
    }

    /// Bring a killed, winnerless match back to life
    pub async fn restore(&self, channel: ChannelId, match_id: MatchId) -> Result<AdminOutcome> {
        let Some(record) = self.store.get_match(&self.scope, match_id)? else {
            return Ok(AdminOutcome::Rejected(VoteRejection::MatchNotFound {
                match_id,
            }));
        };
        if record.status != MatchStatus::Killed {
            return Ok(AdminOutcome::Rejected(VoteRejection::NotKilled));
        }
        if record.winner.is_some() {
            return Ok(AdminOutcome::Rejected(VoteRejection::AlreadySettled));
        }

        self.store
            .set_match_status(&self.scope, match_id, MatchStatus::Active)?;
        self.announce(channel, &format!("Match #{match_id}: restored"))
            .await;
        Ok(AdminOutcome::Done)
    }

    fn drop_poll(&self, match_id: MatchId) -> Result<()> {
        self.lock_polls()?.remove(&match_id);
        Ok(())
    }
}
