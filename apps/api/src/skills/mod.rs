//! Skill taxonomy, name resolution, and distribution aggregation.

pub mod handlers;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::skill::{SkillRow, UserSkillDetail, USER_SKILL_DETAIL_SELECT};

/// Lower-cases and collapses internal whitespace: "  Node   JS " → "node js".
pub fn normalize_skill_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalised, de-duplicated aliases, never including the skill's own name.
pub fn normalize_aliases(name: &str, aliases: &[String]) -> Vec<String> {
    let own = normalize_skill_name(name);
    let mut out: Vec<String> = aliases
        .iter()
        .map(|a| normalize_skill_name(a))
        .filter(|a| !a.is_empty() && *a != own)
        .collect();
    out.sort();
    out.dedup();
    out
}

pub fn validate_proficiency(proficiency: i16) -> Result<(), AppError> {
    if !(1..=5).contains(&proficiency) {
        return Err(AppError::Validation(
            "proficiency must be between 1 and 5".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchedSkill {
    /// The free-text name as it was extracted.
    pub input: String,
    pub skill_id: Uuid,
    pub skill_name: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillResolution {
    pub matched: Vec<MatchedSkill>,
    pub unmatched: Vec<String>,
}

/// Maps free-text skill names onto the taxonomy by name or alias.
/// Each taxonomy skill is matched at most once; unmatched names are de-duplicated.
pub fn resolve_skill_names(taxonomy: &[SkillRow], names: &[String]) -> SkillResolution {
    let mut index: BTreeMap<String, &SkillRow> = BTreeMap::new();
    for skill in taxonomy {
        index.insert(normalize_skill_name(&skill.name), skill);
        for alias in &skill.aliases {
            index.entry(normalize_skill_name(alias)).or_insert(skill);
        }
    }

    let mut resolution = SkillResolution::default();
    let mut seen_skills: HashSet<Uuid> = HashSet::new();
    let mut seen_unmatched: HashSet<String> = HashSet::new();

    for name in names {
        let key = normalize_skill_name(name);
        if key.is_empty() {
            continue;
        }
        match index.get(&key) {
            Some(skill) => {
                if seen_skills.insert(skill.id) {
                    resolution.matched.push(MatchedSkill {
                        input: name.trim().to_string(),
                        skill_id: skill.id,
                        skill_name: skill.name.clone(),
                        category: skill.category.clone(),
                    });
                }
            }
            None => {
                if seen_unmatched.insert(key) {
                    resolution.unmatched.push(name.trim().to_string());
                }
            }
        }
    }

    resolution
}

pub async fn user_skill_details(
    conn: &mut PgConnection,
    user_ids: &[Uuid],
) -> Result<Vec<UserSkillDetail>, sqlx::Error> {
    sqlx::query_as::<_, UserSkillDetail>(&format!(
        "{USER_SKILL_DETAIL_SELECT} WHERE us.user_id = ANY($1) ORDER BY s.name"
    ))
    .bind(user_ids)
    .fetch_all(&mut *conn)
    .await
}

pub async fn all_skills(conn: &mut PgConnection) -> Result<Vec<SkillRow>, sqlx::Error> {
    sqlx::query_as::<_, SkillRow>("SELECT * FROM skills ORDER BY name")
        .fetch_all(&mut *conn)
        .await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillStat {
    pub skill_id: Uuid,
    pub skill_name: String,
    pub category: String,
    /// Users who hold the skill (desired-only entries excluded).
    pub holders: usize,
    /// Users who want to grow into the skill.
    pub desired: usize,
    pub average_proficiency: f64,
    /// Holders per proficiency level 1..=5.
    pub histogram: [usize; 5],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStat {
    pub category: String,
    pub skills: usize,
    pub holdings: usize,
    pub desired: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDistribution {
    pub skills: Vec<SkillStat>,
    pub categories: Vec<CategoryStat>,
}

/// Aggregates user skills per taxonomy skill and per category.
/// Skills are ordered by holders (descending), then name.
pub fn aggregate_distribution(
    taxonomy: &[SkillRow],
    user_skills: &[UserSkillDetail],
) -> SkillDistribution {
    let mut skills: Vec<SkillStat> = taxonomy
        .iter()
        .map(|skill| {
            let mut stat = SkillStat {
                skill_id: skill.id,
                skill_name: skill.name.clone(),
                category: skill.category.clone(),
                holders: 0,
                desired: 0,
                average_proficiency: 0.0,
                histogram: [0; 5],
            };
            let mut total = 0i64;
            for us in user_skills.iter().filter(|us| us.skill_id == skill.id) {
                if us.is_desired {
                    stat.desired += 1;
                    continue;
                }
                stat.holders += 1;
                total += us.proficiency as i64;
                let level = us.proficiency.clamp(1, 5) as usize;
                stat.histogram[level - 1] += 1;
            }
            if stat.holders > 0 {
                stat.average_proficiency = total as f64 / stat.holders as f64;
            }
            stat
        })
        .collect();

    skills.sort_by(|a, b| {
        b.holders
            .cmp(&a.holders)
            .then_with(|| a.skill_name.cmp(&b.skill_name))
    });

    let mut by_category: BTreeMap<String, CategoryStat> = BTreeMap::new();
    for stat in &skills {
        let entry = by_category
            .entry(stat.category.clone())
            .or_insert_with(|| CategoryStat {
                category: stat.category.clone(),
                skills: 0,
                holdings: 0,
                desired: 0,
            });
        entry.skills += 1;
        entry.holdings += stat.holders;
        entry.desired += stat.desired;
    }

    SkillDistribution {
        skills,
        categories: by_category.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::projects::test_support::held;

    fn skill(name: &str, category: &str, aliases: &[&str]) -> SkillRow {
        SkillRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            category: category.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_skill_name() {
        assert_eq!(normalize_skill_name("  Node   JS "), "node js");
        assert_eq!(normalize_skill_name(""), "");
    }

    #[test]
    fn test_normalize_aliases_drops_own_name_and_duplicates() {
        let aliases = vec![
            "Postgres".to_string(),
            "postgres ".to_string(),
            "PostgreSQL".to_string(),
            " ".to_string(),
        ];
        assert_eq!(normalize_aliases("PostgreSQL", &aliases), vec!["postgres"]);
    }

    #[test]
    fn test_resolve_by_name_and_alias() {
        let taxonomy = vec![
            skill("PostgreSQL", "databases", &["postgres", "psql"]),
            skill("Rust", "languages", &[]),
        ];
        let names = vec![
            "rust".to_string(),
            "Postgres".to_string(),
            "PSQL".to_string(),
            "COBOL".to_string(),
            "cobol".to_string(),
        ];

        let resolution = resolve_skill_names(&taxonomy, &names);

        assert_eq!(resolution.matched.len(), 2);
        assert_eq!(resolution.matched[0].skill_name, "Rust");
        assert_eq!(resolution.matched[1].skill_name, "PostgreSQL");
        assert_eq!(resolution.matched[1].input, "Postgres");
        assert_eq!(resolution.unmatched, vec!["COBOL"]);
    }

    #[test]
    fn test_resolve_ignores_blank_names() {
        let resolution = resolve_skill_names(&[], &["  ".to_string()]);
        assert!(resolution.matched.is_empty());
        assert!(resolution.unmatched.is_empty());
    }

    #[test]
    fn test_distribution_counts_holders_and_desired_separately() {
        let rust = skill("Rust", "languages", &[]);
        let go = skill("Go", "languages", &[]);
        let sql = skill("SQL", "databases", &[]);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let mut wish = held(c, rust.id, "Rust", 1);
        wish.is_desired = true;
        let user_skills = vec![
            held(a, rust.id, "Rust", 4),
            held(b, rust.id, "Rust", 2),
            wish,
            held(a, sql.id, "SQL", 5),
        ];

        let dist = aggregate_distribution(&[go.clone(), rust.clone(), sql.clone()], &user_skills);

        let first = &dist.skills[0];
        assert_eq!(first.skill_name, "Rust");
        assert_eq!(first.holders, 2);
        assert_eq!(first.desired, 1);
        assert!((first.average_proficiency - 3.0).abs() < f64::EPSILON);
        assert_eq!(first.histogram, [0, 1, 0, 1, 0]);

        // Zero-holder skills still appear, last.
        assert_eq!(dist.skills[2].skill_name, "Go");
        assert_eq!(dist.skills[2].holders, 0);
        assert_eq!(dist.skills[2].average_proficiency, 0.0);

        assert_eq!(dist.categories.len(), 2);
        let languages = dist
            .categories
            .iter()
            .find(|c| c.category == "languages")
            .unwrap();
        assert_eq!(languages.skills, 2);
        assert_eq!(languages.holdings, 2);
        assert_eq!(languages.desired, 1);
    }
}
