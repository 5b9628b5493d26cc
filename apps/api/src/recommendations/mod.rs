//! Recommendations — pluggable, trait-based matching of people to projects.
//!
//! Default: `SkillMatchRecommender` (local, deterministic, fully testable).
//! Alternative: `NlpRecommender`, which lets the NLP service rank and keeps the
//! local skill breakdown as the explanation.
//!
//! `AppState` holds an `Arc<dyn Recommender>`, chosen at startup via config.

pub mod cache;
pub mod handlers;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::allocations::free_capacity;
use crate::errors::AppError;
use crate::models::project::RequiredSkillRow;
use crate::models::skill::UserSkillDetail;
use crate::nlp_client::{CandidateProfile, NlpClient, ProjectProfile, ScoredMatch, SkillLevel};

const STRONG_THRESHOLD: f64 = 0.8;

// ────────────────────────────────────────────────────────────────────────────
// Inputs and outputs (shared across all backends)
// ────────────────────────────────────────────────────────────────────────────

/// A person who could be staffed, with today's load.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub user_id: Uuid,
    pub name: String,
    pub skills: Vec<UserSkillDetail>,
    pub current_load: i32,
}

impl Candidate {
    pub fn free_capacity(&self) -> i32 {
        free_capacity(self.current_load)
    }
}

/// A project that could take a person.
#[derive(Debug, Clone)]
pub struct Opening {
    pub project_id: Uuid,
    pub name: String,
    pub required: Vec<RequiredSkillRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMatch {
    pub skill_id: Uuid,
    pub skill_name: String,
    pub min_proficiency: i16,
    pub proficiency: Option<i16>,
    pub strength: f64, // 0.0 – 1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// User id for project recommendations, project id for user recommendations.
    pub id: Uuid,
    pub name: String,
    pub score: u32, // 0 – 100
    pub free_capacity: i32,
    pub strong_matches: Vec<SkillMatch>,  // strength ≥ 0.8
    pub partial_matches: Vec<SkillMatch>, // 0 < strength < 0.8
    pub missing_skills: Vec<SkillMatch>,
}

#[derive(Debug, Clone, Default)]
pub struct SkillBreakdown {
    /// Weighted strength across required skills, 0.0 – 1.0.
    pub fit: f64,
    pub strong: Vec<SkillMatch>,
    pub partial: Vec<SkillMatch>,
    pub missing: Vec<SkillMatch>,
}

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Implement this to swap ranking backends without touching handlers.
#[async_trait]
pub trait Recommender: Send + Sync {
    /// "skill_match" | "nlp"; part of the cache key.
    fn backend(&self) -> &'static str;

    async fn recommend_users_for_project(
        &self,
        opening: &Opening,
        candidates: &[Candidate],
    ) -> Result<Vec<Recommendation>, AppError>;

    async fn recommend_projects_for_user(
        &self,
        candidate: &Candidate,
        openings: &[Opening],
    ) -> Result<Vec<Recommendation>, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Scoring
// ────────────────────────────────────────────────────────────────────────────

/// Per-skill strength: 1.0 at or above the minimum, proficiency / minimum
/// below it, 0.0 when the skill is not held. Desired skills do not count.
/// The fit weights each skill by its minimum proficiency.
pub fn skill_breakdown(required: &[RequiredSkillRow], skills: &[UserSkillDetail]) -> SkillBreakdown {
    if required.is_empty() {
        return SkillBreakdown {
            fit: 1.0,
            ..Default::default()
        };
    }

    let mut breakdown = SkillBreakdown::default();
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for req in required {
        let min = f64::from(req.min_proficiency.max(1));
        let proficiency = skills
            .iter()
            .find(|s| s.skill_id == req.skill_id && !s.is_desired)
            .map(|s| s.proficiency);
        let strength = match proficiency {
            Some(p) if f64::from(p) >= min => 1.0,
            Some(p) => f64::from(p) / min,
            None => 0.0,
        };
        weighted += strength * min;
        total_weight += min;

        let entry = SkillMatch {
            skill_id: req.skill_id,
            skill_name: req.skill_name.clone(),
            min_proficiency: req.min_proficiency,
            proficiency,
            strength,
        };
        if strength >= STRONG_THRESHOLD {
            breakdown.strong.push(entry);
        } else if strength > 0.0 {
            breakdown.partial.push(entry);
        } else {
            breakdown.missing.push(entry);
        }
    }

    breakdown.fit = weighted / total_weight;
    breakdown
}

fn to_score(fraction: f64) -> u32 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u32
}

fn recommendation(
    id: Uuid,
    name: &str,
    score: u32,
    free_capacity: i32,
    breakdown: SkillBreakdown,
) -> Recommendation {
    Recommendation {
        id,
        name: name.to_string(),
        score,
        free_capacity,
        strong_matches: breakdown.strong,
        partial_matches: breakdown.partial,
        missing_skills: breakdown.missing,
    }
}

/// Highest score first; ties by name so results are stable.
pub fn rank(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| match b.score.cmp(&a.score) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
}

// ────────────────────────────────────────────────────────────────────────────
// SkillMatchRecommender — default
// ────────────────────────────────────────────────────────────────────────────

/// Candidate score = skill fit × 100 × free capacity ratio.
/// Project score for a user = skill fit × 100.
pub struct SkillMatchRecommender;

#[async_trait]
impl Recommender for SkillMatchRecommender {
    fn backend(&self) -> &'static str {
        "skill_match"
    }

    async fn recommend_users_for_project(
        &self,
        opening: &Opening,
        candidates: &[Candidate],
    ) -> Result<Vec<Recommendation>, AppError> {
        let mut out: Vec<Recommendation> = candidates
            .iter()
            .map(|c| {
                let breakdown = skill_breakdown(&opening.required, &c.skills);
                let capacity_ratio = f64::from(c.free_capacity()) / 100.0;
                let score = to_score(breakdown.fit * capacity_ratio);
                recommendation(c.user_id, &c.name, score, c.free_capacity(), breakdown)
            })
            .collect();
        rank(&mut out);
        Ok(out)
    }

    async fn recommend_projects_for_user(
        &self,
        candidate: &Candidate,
        openings: &[Opening],
    ) -> Result<Vec<Recommendation>, AppError> {
        let mut out: Vec<Recommendation> = openings
            .iter()
            .map(|o| {
                let breakdown = skill_breakdown(&o.required, &candidate.skills);
                let score = to_score(breakdown.fit);
                recommendation(o.project_id, &o.name, score, candidate.free_capacity(), breakdown)
            })
            .collect();
        rank(&mut out);
        Ok(out)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// NlpRecommender
// ────────────────────────────────────────────────────────────────────────────

/// Ranks through the NLP service. Ids the service returns that were not sent
/// are ignored; candidates it leaves out are not recommended.
pub struct NlpRecommender {
    nlp: NlpClient,
}

impl NlpRecommender {
    pub fn new(nlp: NlpClient) -> Self {
        Self { nlp }
    }
}

fn candidate_profile(candidate: &Candidate) -> CandidateProfile {
    CandidateProfile {
        id: candidate.user_id,
        skills: candidate
            .skills
            .iter()
            .filter(|s| !s.is_desired)
            .map(|s| SkillLevel {
                name: s.skill_name.clone(),
                proficiency: s.proficiency,
            })
            .collect(),
        free_capacity: candidate.free_capacity(),
    }
}

fn project_profile(opening: &Opening) -> ProjectProfile {
    ProjectProfile {
        id: opening.project_id,
        name: opening.name.clone(),
        required_skills: opening
            .required
            .iter()
            .map(|r| SkillLevel {
                name: r.skill_name.clone(),
                proficiency: r.min_proficiency,
            })
            .collect(),
    }
}

/// Joins service scores back onto local subjects.
fn merge_scores<T>(
    scored: &[ScoredMatch],
    subjects: &HashMap<Uuid, T>,
    build: impl Fn(&T, u32) -> Recommendation,
) -> Vec<Recommendation> {
    let mut seen = HashSet::new();
    let mut out: Vec<Recommendation> = scored
        .iter()
        .filter(|m| seen.insert(m.id))
        .filter_map(|m| subjects.get(&m.id).map(|s| build(s, to_score(m.score))))
        .collect();
    rank(&mut out);
    out
}

#[async_trait]
impl Recommender for NlpRecommender {
    fn backend(&self) -> &'static str {
        "nlp"
    }

    async fn recommend_users_for_project(
        &self,
        opening: &Opening,
        candidates: &[Candidate],
    ) -> Result<Vec<Recommendation>, AppError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let profiles: Vec<CandidateProfile> = candidates.iter().map(candidate_profile).collect();
        let scored = self
            .nlp
            .recommend_users(&project_profile(opening), &profiles)
            .await?;

        let by_id: HashMap<Uuid, &Candidate> =
            candidates.iter().map(|c| (c.user_id, c)).collect();
        Ok(merge_scores(&scored, &by_id, |c, score| {
            let breakdown = skill_breakdown(&opening.required, &c.skills);
            recommendation(c.user_id, &c.name, score, c.free_capacity(), breakdown)
        }))
    }

    async fn recommend_projects_for_user(
        &self,
        candidate: &Candidate,
        openings: &[Opening],
    ) -> Result<Vec<Recommendation>, AppError> {
        if openings.is_empty() {
            return Ok(Vec::new());
        }
        let profiles: Vec<ProjectProfile> = openings.iter().map(project_profile).collect();
        let scored = self
            .nlp
            .recommend_projects(&candidate_profile(candidate), &profiles)
            .await?;

        let by_id: HashMap<Uuid, &Opening> = openings.iter().map(|o| (o.project_id, o)).collect();
        Ok(merge_scores(&scored, &by_id, |o, score| {
            let breakdown = skill_breakdown(&o.required, &candidate.skills);
            recommendation(o.project_id, &o.name, score, candidate.free_capacity(), breakdown)
        }))
    }
}
