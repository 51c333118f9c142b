//! Probe-against-gallery matching with accept and ambiguity thresholds.

use serde::Serialize;

use crate::types::{Embedding, FaceTemplate};

/// Thresholds applied by [`Matcher::best_match`]. Values are deployment
/// configuration; the engine never hard-codes them.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    /// Minimum top score for any identification at all.
    pub accept_threshold: f32,
    /// Minimum gap between the top two accepted candidates. Two enrolled
    /// users closer than this are never silently conflated.
    pub ambiguity_margin: f32,
}

/// One ranked identity candidate: a user's best template score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub user_id: String,
    pub score: f32,
}

/// Outcome of matching a probe against the gallery.
///
/// All three variants are ordinary business results the caller branches on.
/// `NoMatch` and `Ambiguous` prompt a retry or manual lookup at the kiosk;
/// they are never surfaced as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match { user_id: String, score: f32 },
    NoMatch { best_score: f32 },
    Ambiguous { best: Candidate, runner_up: Candidate },
}

/// Strategy for comparing a probe embedding against enrolled templates.
pub trait Matcher {
    /// Rank enrolled users by their best template score, descending.
    fn rank(&self, probe: &Embedding, templates: &[FaceTemplate]) -> Vec<Candidate>;

    /// Apply `policy` to the ranking.
    ///
    /// - top score below `accept_threshold` → `NoMatch`;
    /// - top and runner-up both accepted and closer than `ambiguity_margin`
    ///   → `Ambiguous`;
    /// - otherwise → `Match` with the top candidate.
    fn best_match(
        &self,
        probe: &Embedding,
        templates: &[FaceTemplate],
        policy: &MatchPolicy,
    ) -> MatchOutcome {
        let ranked = self.rank(probe, templates);

        let Some(top) = ranked.first() else {
            return MatchOutcome::NoMatch { best_score: 0.0 };
        };
        if top.score < policy.accept_threshold {
            return MatchOutcome::NoMatch {
                best_score: top.score,
            };
        }
        if let Some(second) = ranked.get(1) {
            if second.score >= policy.accept_threshold
                && (top.score - second.score) < policy.ambiguity_margin
            {
                return MatchOutcome::Ambiguous {
                    best: top.clone(),
                    runner_up: second.clone(),
                };
            }
        }
        MatchOutcome::Match {
            user_id: top.user_id.clone(),
            score: top.score,
        }
    }
}

/// Cosine similarity matcher. Always traverses the full gallery; a user with
/// several templates is ranked by the best one.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn rank(&self, probe: &Embedding, templates: &[FaceTemplate]) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for template in templates {
            let score = probe.similarity(&template.embedding);
            match candidates
                .iter_mut()
                .find(|c| c.user_id == template.user_id)
            {
                Some(existing) => {
                    if score > existing.score {
                        existing.score = score;
                    }
                }
                None => candidates.push(Candidate {
                    user_id: template.user_id.clone(),
                    score,
                }),
            }
        }

        // Descending by score; ties keep insertion order.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn template(id: &str, user: &str, values: &[f32]) -> FaceTemplate {
        FaceTemplate {
            id: id.to_string(),
            user_id: user.to_string(),
            embedding: Embedding::new(values.to_vec()),
            created_at: Utc::now(),
            active: true,
        }
    }

    fn policy() -> MatchPolicy {
        MatchPolicy {
            accept_threshold: 0.5,
            ambiguity_margin: 0.1,
        }
    }

    #[test]
    fn test_rank_orders_descending_and_keeps_best_per_user() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let templates = vec![
            template("1", "alice", &[0.0, 1.0]),
            template("2", "alice", &[1.0, 0.1]),
            template("3", "bob", &[0.7, 0.7]),
        ];

        let ranked = CosineMatcher.rank(&probe, &templates);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].user_id, "alice");
        assert!(ranked[0].score > ranked[1].score);
        // alice's score comes from her better template, not the decoy
        assert!(ranked[0].score > 0.9);
    }

    #[test]
    fn test_best_match_accepts_clear_winner() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let templates = vec![
            template("1", "alice", &[1.0, 0.05]),
            template("2", "bob", &[0.0, 1.0]),
        ];

        match CosineMatcher.best_match(&probe, &templates, &policy()) {
            MatchOutcome::Match { user_id, score } => {
                assert_eq!(user_id, "alice");
                assert!(score > 0.99);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_best_match_empty_gallery_is_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(
            CosineMatcher.best_match(&probe, &[], &policy()),
            MatchOutcome::NoMatch { best_score: 0.0 }
        );
    }

    #[test]
    fn test_best_match_below_threshold_is_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let templates = vec![template("1", "alice", &[0.1, 1.0])];

        match CosineMatcher.best_match(&probe, &templates, &policy()) {
            MatchOutcome::NoMatch { best_score } => assert!(best_score < 0.5),
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn test_best_match_near_tie_is_ambiguous() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        // Two users essentially equidistant from the probe.
        let templates = vec![
            template("1", "alice", &[1.0, 0.10]),
            template("2", "bob", &[1.0, 0.11]),
        ];

        match CosineMatcher.best_match(&probe, &templates, &policy()) {
            MatchOutcome::Ambiguous { best, runner_up } => {
                assert_ne!(best.user_id, runner_up.user_id);
                assert!((best.score - runner_up.score).abs() < 0.1);
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_best_match_runner_up_below_threshold_is_not_ambiguous() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        // Runner-up is within the margin of nothing: it fails the accept
        // threshold, so the top candidate wins outright.
        let templates = vec![
            template("1", "alice", &[1.0, 0.0]),
            template("2", "bob", &[0.3, 1.0]),
        ];
        let tight = MatchPolicy {
            accept_threshold: 0.9,
            ambiguity_margin: 2.0,
        };

        match CosineMatcher.best_match(&probe, &templates, &tight) {
            MatchOutcome::Match { user_id, .. } => assert_eq!(user_id, "alice"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_probe_dimension_mismatch_scores_zero_everywhere() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let templates = vec![template("1", "alice", &[1.0, 0.0])];

        match CosineMatcher.best_match(&probe, &templates, &policy()) {
            MatchOutcome::NoMatch { best_score } => assert_eq!(best_score, 0.0),
            other => panic!("expected no match, got {other:?}"),
        }
    }
}
