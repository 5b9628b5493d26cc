use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub nlp_service_url: String,
    pub nlp_timeout_secs: u64,
    pub jwt_secret: String,
    pub recommender_backend: RecommenderBackend,
    pub recommendation_cache_ttl_secs: u64,
    /// Emails that receive the admin role on first sign-in.
    pub bootstrap_admin_emails: Vec<String>,
    pub port: u16,
    pub rust_log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommenderBackend {
    SkillMatch,
    Nlp,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            nlp_service_url: require_env("NLP_SERVICE_URL")?,
            nlp_timeout_secs: optional_env("NLP_TIMEOUT_SECS", "60")
                .parse::<u64>()
                .context("NLP_TIMEOUT_SECS must be a number of seconds")?,
            jwt_secret: require_env("JWT_SECRET")?,
            recommender_backend: parse_backend(&optional_env(
                "RECOMMENDER_BACKEND",
                "skill_match",
            ))?,
            recommendation_cache_ttl_secs: optional_env("RECOMMENDATION_CACHE_TTL_SECS", "300")
                .parse::<u64>()
                .context("RECOMMENDATION_CACHE_TTL_SECS must be a number of seconds")?,
            bootstrap_admin_emails: parse_email_list(&optional_env("BOOTSTRAP_ADMIN_EMAILS", "")),
            port: optional_env("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional_env("RUST_LOG", "info"),
        })
    }

    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        self.bootstrap_admin_emails
            .iter()
            .any(|e| e.eq_ignore_ascii_case(email.trim()))
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_backend(value: &str) -> Result<RecommenderBackend> {
    match value.trim().to_lowercase().as_str() {
        "skill_match" => Ok(RecommenderBackend::SkillMatch),
        "nlp" => Ok(RecommenderBackend::Nlp),
        other => anyhow::bail!("RECOMMENDER_BACKEND must be 'skill_match' or 'nlp', got '{other}'"),
    }
}

fn parse_email_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!(parse_backend("nlp").unwrap(), RecommenderBackend::Nlp);
        assert_eq!(
            parse_backend(" Skill_Match ").unwrap(),
            RecommenderBackend::SkillMatch
        );
        assert!(parse_backend("random").is_err());
    }

    #[test]
    fn test_parse_email_list_skips_blanks() {
        let emails = parse_email_list("Admin@Example.com, ,hr@example.com,");
        assert_eq!(emails, vec!["admin@example.com", "hr@example.com"]);
        assert!(parse_email_list("").is_empty());
    }
}
