//! Point awards owed to each participant once a match ends.

use crate::{
    config::ScoringPolicy,
    state::matches::{Match, MatchStatus, UserId, Winner},
};

/// How a match ended, as far as awards are concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All rounds were played.
    Completed,
    /// The given participant gave up.
    Surrendered(UserId),
    /// The given participant dropped without leaving.
    Disconnected(UserId),
}

impl Outcome {
    /// Outcome recorded in a terminal match, `None` while it is still running.
    pub fn of(record: &Match) -> Option<Self> {
        if record.status != MatchStatus::Completed {
            return None;
        }
        match (&record.winner, &record.forfeited_by) {
            (Some(Winner::Disconnect), Some(uid)) => Some(Outcome::Disconnected(uid.clone())),
            (Some(Winner::Disconnect), None) => None,
            (_, Some(uid)) => Some(Outcome::Surrendered(uid.clone())),
            (_, None) => Some(Outcome::Completed),
        }
    }
}

/// Points owed to one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Award {
    /// Credited participant.
    pub user: UserId,
    /// Points to add to the profile.
    pub points: u32,
}

/// Awards for every participant. Forfeiting participants are listed with zero
/// points so that their profile still records the settlement.
pub fn plan_settlement(record: &Match, outcome: &Outcome, policy: &ScoringPolicy) -> Vec<Award> {
    record
        .participants()
        .map(|uid| {
            let points = match outcome {
                Outcome::Completed => record.score_of(uid),
                Outcome::Surrendered(by) | Outcome::Disconnected(by) if by == uid => 0,
                Outcome::Surrendered(_) => policy.surrender_bonus,
                Outcome::Disconnected(_) => {
                    policy.disconnect_points(record.question_limit, record.score_of(uid))
                }
            };
            Award {
                user: uid.clone(),
                points,
            }
        })
        .collect()
}

impl Match {
    /// End the match early because `user` gave up or dropped.
    ///
    /// Duels go to the opponent on surrender; multi matches go to the best
    /// remaining score. Disconnects are always recorded as such.
    pub fn forfeit(&mut self, user: &UserId, disconnected: bool) {
        let winner = if disconnected {
            Winner::Disconnect
        } else if self.mode.is_duel() {
            self.opponent_of(user)
                .cloned()
                .map(Winner::Player)
                .unwrap_or(Winner::Draw)
        } else {
            let remaining = self
                .scores
                .iter()
                .filter(|(uid, _)| *uid != user)
                .map(|(uid, score)| (uid.clone(), *score))
                .collect();
            Match::decide_winner(&remaining)
        };
        self.status = MatchStatus::Completed;
        self.winner = Some(winner);
        self.forfeited_by = Some(user.clone());
        self.current_answers.clear();
    }
}
