//! Reconciles a stable occupancy snapshot with the legal moves of the game.
//!
//! Every legal move (optionally every move + reply pair) is turned into the
//! placement it would produce and scored against the settled squares. The
//! resolver only mutates its own rejection streak; the caller decides whether
//! to apply a resolved line.

use log::debug;
use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Move, Square};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::occupancy::StableSnapshot;
use crate::piece::PieceClass;
use crate::rules::{placement, RulesError, RulesOracle};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Rules(#[from] RulesError),
}

fn default_max_conflict() -> f32 {
    0.5
}

fn default_greedy_max_conflict() -> f32 {
    1.5
}

fn default_min_margin() -> f32 {
    0.25
}

fn default_class_mismatch_weight() -> f32 {
    0.5
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverParams {
    /// Accept the best move even when it touches unsettled squares, with a
    /// looser conflict budget. Mistakes are corrected by undo.
    #[serde(default)]
    pub greedy: bool,
    /// Highest tolerated conflict for a candidate to be accepted.
    #[serde(default = "default_max_conflict")]
    pub max_conflict: f32,
    #[serde(default = "default_greedy_max_conflict")]
    pub greedy_max_conflict: f32,
    /// Score lead the best candidate needs over the runner-up.
    #[serde(default = "default_min_margin")]
    pub min_margin: f32,
    /// Penalty factor for a square that is occupied as expected but shows
    /// the wrong piece class.
    #[serde(default = "default_class_mismatch_weight")]
    pub class_mismatch_weight: f32,
    /// Also try move + reply pairs when no single move fits.
    #[serde(default)]
    pub two_ply: bool,
}

impl Default for ResolverParams {
    fn default() -> Self {
        Self {
            greedy: false,
            max_conflict: default_max_conflict(),
            greedy_max_conflict: default_greedy_max_conflict(),
            min_margin: default_min_margin(),
            class_mismatch_weight: default_class_mismatch_weight(),
            two_ply: false,
        }
    }
}

impl ResolverParams {
    pub fn conflict_budget(&self) -> f32 {
        if self.greedy {
            self.greedy_max_conflict
        } else {
            self.max_conflict
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverState {
    Idle,
    Observing,
    Resolved,
    Ambiguous,
    Rejected,
}

/// A legal move together with its notation and resulting position.
#[derive(Clone, Debug)]
pub struct CandidateMove {
    pub mv: Move,
    pub san: String,
    pub position: Chess,
}

/// One or two consecutive plies scored against the snapshot.
#[derive(Clone, Debug)]
pub struct ScoredLine {
    pub plies: Vec<CandidateMove>,
    pub score: f32,
    pub conflict: f32,
    pub touches_unstable: bool,
}

impl ScoredLine {
    pub fn sans(&self) -> Vec<String> {
        self.plies.iter().map(|p| p.san.clone()).collect()
    }

    /// Space separated SANs, used for display and tie breaking.
    pub fn label(&self) -> String {
        self.sans().join(" ")
    }

    pub fn final_position(&self) -> Option<&Chess> {
        self.plies.last().map(|p| &p.position)
    }
}

#[derive(Clone, Debug)]
pub enum Resolution {
    /// The board matches the game.
    Idle,
    /// Something changed but the evidence has not settled.
    Observing { unstable: usize },
    Resolved(ScoredLine),
    /// Several lines fit equally well; best first.
    Ambiguous(Vec<ScoredLine>),
    /// No legal line explains the board.
    Rejected {
        streak: u32,
        best_conflict: Option<f32>,
    },
}

impl Resolution {
    pub fn state(&self) -> ResolverState {
        match self {
            Resolution::Idle => ResolverState::Idle,
            Resolution::Observing { .. } => ResolverState::Observing,
            Resolution::Resolved(_) => ResolverState::Resolved,
            Resolution::Ambiguous(_) => ResolverState::Ambiguous,
            Resolution::Rejected { .. } => ResolverState::Rejected,
        }
    }
}

enum Verdict {
    Accept(ScoredLine),
    Defer,
    Ambiguous(Vec<ScoredLine>),
    NoFit(Option<f32>),
}

/// Move resolver with its rejection streak.
#[derive(Clone, Debug)]
pub struct MoveResolver {
    state: ResolverState,
    rejection_streak: u32,
}

impl Default for MoveResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveResolver {
    pub fn new() -> Self {
        Self {
            state: ResolverState::Idle,
            rejection_streak: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> ResolverState {
        self.state
    }

    #[inline]
    pub fn rejection_streak(&self) -> u32 {
        self.rejection_streak
    }

    pub fn reset(&mut self) {
        self.state = ResolverState::Idle;
        self.rejection_streak = 0;
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(greedy = params.greedy))
    )]
    pub fn resolve(
        &mut self,
        snapshot: &StableSnapshot,
        position: &Chess,
        rules: &dyn RulesOracle,
        params: &ResolverParams,
    ) -> Result<Resolution, ResolveError> {
        let resolution = self.evaluate(snapshot, position, rules, params)?;
        match &resolution {
            Resolution::Idle | Resolution::Resolved(_) => self.rejection_streak = 0,
            _ => {}
        }
        self.state = resolution.state();
        Ok(resolution)
    }

    fn evaluate(
        &mut self,
        snapshot: &StableSnapshot,
        position: &Chess,
        rules: &dyn RulesOracle,
        params: &ResolverParams,
    ) -> Result<Resolution, ResolveError> {
        let expected = placement(position);
        let changed = snapshot
            .iter()
            .filter(|(sq, obs)| {
                obs.is_some_and(|o| o.is_occupied() != expected[*sq as usize].is_some())
            })
            .count();
        if changed == 0 {
            return Ok(if snapshot.is_fully_stable() {
                Resolution::Idle
            } else {
                Resolution::Observing {
                    unstable: snapshot.unstable_count(),
                }
            });
        }

        let singles = expand(position, rules)?
            .into_iter()
            .map(|ply| score_line(vec![ply], &expected, snapshot, params))
            .collect::<Vec<_>>();
        let mut verdict = judge(singles, params);

        if params.two_ply && matches!(verdict, Verdict::NoFit(_)) {
            let mut pairs = Vec::new();
            for first in expand(position, rules)? {
                for reply in expand(&first.position, rules)? {
                    pairs.push(score_line(
                        vec![first.clone(), reply],
                        &expected,
                        snapshot,
                        params,
                    ));
                }
            }
            let paired = judge(pairs, params);
            if !matches!(paired, Verdict::NoFit(_)) {
                verdict = paired;
            }
        }

        Ok(match verdict {
            Verdict::Accept(line) => {
                debug!(
                    "resolved {} (score {:.2}, conflict {:.2})",
                    line.label(),
                    line.score,
                    line.conflict
                );
                Resolution::Resolved(line)
            }
            Verdict::Defer => Resolution::Observing {
                unstable: snapshot.unstable_count(),
            },
            Verdict::Ambiguous(lines) => {
                debug!(
                    "ambiguous between {:?}",
                    lines.iter().map(ScoredLine::label).collect::<Vec<_>>()
                );
                Resolution::Ambiguous(lines)
            }
            Verdict::NoFit(best_conflict) => {
                self.rejection_streak = self.rejection_streak.saturating_add(1);
                debug!(
                    "no legal move fits ({changed} squares differ), streak {}",
                    self.rejection_streak
                );
                Resolution::Rejected {
                    streak: self.rejection_streak,
                    best_conflict,
                }
            }
        })
    }
}

fn expand(position: &Chess, rules: &dyn RulesOracle) -> Result<Vec<CandidateMove>, RulesError> {
    rules
        .legal_moves(position)?
        .into_iter()
        .map(|mv| {
            let san = rules.san(position, &mv);
            let next = rules.apply(position, &mv)?;
            Ok(CandidateMove {
                mv,
                san,
                position: next,
            })
        })
        .collect()
}

fn score_line(
    plies: Vec<CandidateMove>,
    before: &[Option<PieceClass>; 64],
    snapshot: &StableSnapshot,
    params: &ResolverParams,
) -> ScoredLine {
    let after = match plies.last() {
        Some(last) => placement(&last.position),
        None => *before,
    };

    let mut score = 0.0f32;
    let mut conflict = 0.0f32;
    let mut touches_unstable = false;
    for sq in Square::ALL {
        let idx = sq as usize;
        let Some(obs) = snapshot.get(sq) else {
            if before[idx] != after[idx] {
                touches_unstable = true;
            }
            continue;
        };
        let want = after[idx];
        if want.is_some() != obs.is_occupied() {
            score -= obs.confidence;
            conflict += obs.confidence;
        } else if want != obs.class {
            let penalty = params.class_mismatch_weight * obs.confidence;
            score -= penalty;
            conflict += penalty;
        } else {
            score += obs.confidence;
        }
    }

    ScoredLine {
        plies,
        score,
        conflict,
        touches_unstable,
    }
}

fn judge(mut lines: Vec<ScoredLine>, params: &ResolverParams) -> Verdict {
    lines.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.label().cmp(&b.label()))
    });

    let budget = params.conflict_budget();
    let Some(best) = lines.first() else {
        return Verdict::NoFit(None);
    };
    if best.conflict > budget {
        return Verdict::NoFit(Some(best.conflict));
    }

    let cutoff = best.score - params.min_margin;
    let contenders = lines.iter().take_while(|l| l.score >= cutoff).count();
    if contenders > 1 {
        lines.truncate(contenders);
        return Verdict::Ambiguous(lines);
    }

    if best.touches_unstable && !params.greedy {
        return Verdict::Defer;
    }
    lines.truncate(1);
    match lines.pop() {
        Some(best) => Verdict::Accept(best),
        None => Verdict::NoFit(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::{OccupancySnapshot, SquareObservation};
    use crate::rules::{parse_san, StandardRules};

    fn after(sans: &[&str]) -> Chess {
        let rules = StandardRules;
        let mut pos = Chess::default();
        for san in sans {
            let mv = parse_san(&pos, san).unwrap();
            pos = rules.apply(&pos, &mv).unwrap();
        }
        pos
    }

    fn seen(position: &Chess) -> StableSnapshot {
        StableSnapshot::all_stable(&OccupancySnapshot::from_position(position))
    }

    fn resolve(snapshot: &StableSnapshot, position: &Chess, params: &ResolverParams) -> Resolution {
        MoveResolver::new()
            .resolve(snapshot, position, &StandardRules, params)
            .unwrap()
    }

    #[test]
    fn matching_board_is_idle() {
        let pos = Chess::default();
        let out = resolve(&seen(&pos), &pos, &ResolverParams::default());
        assert_eq!(out.state(), ResolverState::Idle);
    }

    #[test]
    fn class_noise_alone_stays_idle() {
        let pos = Chess::default();
        let mut snap = OccupancySnapshot::from_position(&pos);
        snap.set(
            Square::C1,
            SquareObservation::occupied(PieceClass::WhitePawn, 0.7),
        );
        let out = resolve(
            &StableSnapshot::all_stable(&snap),
            &pos,
            &ResolverParams::default(),
        );
        assert_eq!(out.state(), ResolverState::Idle);
    }

    #[test]
    fn pawn_push_resolves() {
        let pos = Chess::default();
        let out = resolve(&seen(&after(&["e4"])), &pos, &ResolverParams::default());
        match out {
            Resolution::Resolved(line) => assert_eq!(line.sans(), vec!["e4"]),
            other => panic!("expected e4, got {other:?}"),
        }
    }

    #[test]
    fn capture_resolves_against_class_evidence() {
        let pos = after(&["e4", "d5"]);
        let out = resolve(&seen(&after(&["e4", "d5", "exd5"])), &pos, &ResolverParams::default());
        match out {
            Resolution::Resolved(line) => assert_eq!(line.label(), "exd5"),
            other => panic!("expected exd5, got {other:?}"),
        }
    }

    #[test]
    fn castling_resolves() {
        let pos = after(&["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5"]);
        let next = after(&["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5", "O-O"]);
        match resolve(&seen(&next), &pos, &ResolverParams::default()) {
            Resolution::Resolved(line) => assert_eq!(line.label(), "O-O"),
            other => panic!("expected O-O, got {other:?}"),
        }
    }

    #[test]
    fn unsettled_destination_is_ambiguous_between_knights() {
        let pos = Chess::default();
        let mut raw = OccupancySnapshot::from_position(&pos);
        raw.set(Square::G1, SquareObservation::EMPTY);
        let mut snap = StableSnapshot::all_stable(&raw);
        snap.mark_unstable(Square::F3);
        snap.mark_unstable(Square::H3);
        match resolve(&snap, &pos, &ResolverParams::default()) {
            Resolution::Ambiguous(lines) => {
                let labels: Vec<_> = lines.iter().map(ScoredLine::label).collect();
                assert_eq!(labels, vec!["Nf3", "Nh3"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn unsettled_destination_is_deferred_unless_greedy() {
        let pos = Chess::default();
        let mut s = seen(&after(&["e4"]));
        s.mark_unstable(Square::E4);
        let out = resolve(&s, &pos, &ResolverParams::default());
        assert_eq!(out.state(), ResolverState::Observing);

        let greedy = ResolverParams {
            greedy: true,
            ..ResolverParams::default()
        };
        match resolve(&s, &pos, &greedy) {
            Resolution::Resolved(line) => assert_eq!(line.label(), "e4"),
            other => panic!("expected greedy e4, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_displacements_are_rejected_and_counted() {
        let pos = Chess::default();
        let mut raw = OccupancySnapshot::from_position(&pos);
        raw.set(Square::E2, SquareObservation::EMPTY);
        raw.set(
            Square::E4,
            SquareObservation::occupied(PieceClass::WhitePawn, 0.9),
        );
        raw.set(Square::B1, SquareObservation::EMPTY);
        raw.set(
            Square::C3,
            SquareObservation::occupied(PieceClass::WhiteKnight, 0.9),
        );
        let snap = StableSnapshot::all_stable(&raw);

        let mut resolver = MoveResolver::new();
        for expected in 1..=3 {
            match resolver
                .resolve(&snap, &pos, &StandardRules, &ResolverParams::default())
                .unwrap()
            {
                Resolution::Rejected { streak, best_conflict } => {
                    assert_eq!(streak, expected);
                    assert!(best_conflict.unwrap() > 1.0);
                }
                other => panic!("expected rejection, got {other:?}"),
            }
        }
        resolver
            .resolve(&seen(&pos), &pos, &StandardRules, &ResolverParams::default())
            .unwrap();
        assert_eq!(resolver.rejection_streak(), 0);
        assert_eq!(resolver.state(), ResolverState::Idle);
    }

    #[test]
    fn two_ply_lookahead_recovers_a_missed_reply() {
        let pos = Chess::default();
        let snap = seen(&after(&["e4", "e5"]));
        assert_eq!(
            resolve(&snap, &pos, &ResolverParams::default()).state(),
            ResolverState::Rejected
        );
        let lookahead = ResolverParams {
            two_ply: true,
            ..ResolverParams::default()
        };
        match resolve(&snap, &pos, &lookahead) {
            Resolution::Resolved(line) => {
                assert_eq!(line.label(), "e4 e5");
                let reached = line.final_position().map(|p| StandardRules.to_fen(p));
                assert_eq!(reached, Some(StandardRules.to_fen(&after(&["e4", "e5"]))));
            }
            other => panic!("expected e4 e5, got {other:?}"),
        }
    }

    fn line(san: &str, score: f32) -> ScoredLine {
        let pos = Chess::default();
        let mv = parse_san(&pos, san).unwrap();
        let position = StandardRules.apply(&pos, &mv).unwrap();
        ScoredLine {
            plies: vec![CandidateMove {
                mv,
                san: san.to_string(),
                position,
            }],
            score,
            conflict: 0.0,
            touches_unstable: false,
        }
    }

    #[test]
    fn lead_equal_to_the_margin_is_still_ambiguous() {
        let params = ResolverParams::default();
        assert_eq!(params.min_margin, 0.25);

        match judge(vec![line("Nh3", 4.75), line("Nf3", 5.0)], &params) {
            Verdict::Ambiguous(lines) => {
                let labels: Vec<String> = lines.iter().map(ScoredLine::label).collect();
                assert_eq!(labels, vec!["Nf3", "Nh3"]);
            }
            _ => panic!("a lead of exactly the margin must not resolve"),
        }

        match judge(vec![line("Nh3", 4.5), line("Nf3", 5.0)], &params) {
            Verdict::Accept(best) => assert_eq!(best.label(), "Nf3"),
            _ => panic!("a lead beyond the margin resolves"),
        }
    }
}
