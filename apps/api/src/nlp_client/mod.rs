/// NLP client — the single point of entry for all calls to the external NLP
/// service (CV entity extraction, skill extraction, recommendation scoring).
///
/// No other module may call the NLP service directly.
use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum NlpError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unavailable after {retries} retries")]
    Exhausted { retries: u32 },

    #[error("NLP service returned an empty response")]
    EmptyResponse,
}

/// A named entity found in a CV (person, organisation, degree, date...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvEntity {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillLevel {
    pub name: String,
    pub proficiency: i16,
}

/// A person as seen by the recommendation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub id: Uuid,
    pub skills: Vec<SkillLevel>,
    pub free_capacity: i32,
}

/// A project as seen by the recommendation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectProfile {
    pub id: Uuid,
    pub name: String,
    pub required_skills: Vec<SkillLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub id: Uuid,
    /// 0.0 – 1.0
    pub score: f64,
    #[serde(default)]
    pub matched_skills: Vec<String>,
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EntitiesResponse {
    entities: Vec<CvEntity>,
}

#[derive(Deserialize)]
struct SkillsResponse {
    skills: Vec<String>,
}

#[derive(Serialize)]
struct RecommendUsersRequest<'a> {
    project: &'a ProjectProfile,
    candidates: &'a [CandidateProfile],
}

#[derive(Serialize)]
struct RecommendProjectsRequest<'a> {
    user: &'a CandidateProfile,
    projects: &'a [ProjectProfile],
}

#[derive(Deserialize)]
struct RecommendationsResponse {
    recommendations: Vec<ScoredMatch>,
}

#[derive(Deserialize)]
struct NlpErrorBody {
    detail: String,
}

/// Wraps the NLP service's JSON API with retry logic.
#[derive(Clone)]
pub struct NlpClient {
    client: Client,
    base_url: String,
    retry_base_delay: Duration,
}

impl NlpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NlpError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        })
    }

    #[cfg(test)]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Named entities (names, employers, degrees, dates) found in CV text.
    pub async fn extract_entities(&self, text: &str) -> Result<Vec<CvEntity>, NlpError> {
        let response: EntitiesResponse = self
            .post_json("/extract/entities", &TextRequest { text })
            .await?;
        Ok(response.entities)
    }

    /// Free-text skill names mentioned in CV text. Names are trimmed and empty ones dropped.
    pub async fn extract_skills(&self, text: &str) -> Result<Vec<String>, NlpError> {
        let response: SkillsResponse = self
            .post_json("/extract/skills", &TextRequest { text })
            .await?;
        Ok(response
            .skills
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    pub async fn recommend_users(
        &self,
        project: &ProjectProfile,
        candidates: &[CandidateProfile],
    ) -> Result<Vec<ScoredMatch>, NlpError> {
        let response: RecommendationsResponse = self
            .post_json(
                "/recommend/users",
                &RecommendUsersRequest {
                    project,
                    candidates,
                },
            )
            .await?;
        Ok(response.recommendations)
    }

    pub async fn recommend_projects(
        &self,
        user: &CandidateProfile,
        projects: &[ProjectProfile],
    ) -> Result<Vec<ScoredMatch>, NlpError> {
        let response: RecommendationsResponse = self
            .post_json("/recommend/projects", &RecommendProjectsRequest { user, projects })
            .await?;
        Ok(response.recommendations)
    }

    /// POSTs a JSON body and decodes a JSON response.
    /// Retries on 429 (rate limit), 5xx and transport errors with exponential backoff.
    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NlpError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error: Option<NlpError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.retry_base_delay * (1 << (attempt - 1));
                warn!(
                    "NLP call to {} attempt {} failed, retrying after {}ms...",
                    path,
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.post(&url).json(body).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(NlpError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("NLP service returned {} for {}: {}", status, path, body);
                last_error = Some(NlpError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<NlpErrorBody>(&body)
                    .map(|e| e.detail)
                    .unwrap_or(body);
                return Err(NlpError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Err(NlpError::EmptyResponse);
            }
            let decoded = serde_json::from_slice::<T>(&bytes).map_err(|e| NlpError::Api {
                status: status.as_u16(),
                message: format!("malformed response body: {e}"),
            })?;

            debug!("NLP call to {} succeeded ({} bytes)", path, bytes.len());
            return Ok(decoded);
        }

        Err(last_error.unwrap_or(NlpError::Exhausted {
            retries: MAX_RETRIES,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> NlpClient {
        NlpClient::new(&server.url(), Duration::from_secs(5))
            .unwrap()
            .with_retry_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_extract_skills_trims_and_drops_blanks() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/extract/skills")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"skills": [" Rust ", "", "PostgreSQL"]}"#)
            .expect(1)
            .create_async()
            .await;

        let skills = client_for(&server)
            .extract_skills("Rust and PostgreSQL")
            .await
            .unwrap();

        assert_eq!(skills, vec!["Rust", "PostgreSQL"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_extract_entities_decodes_labels() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/extract/entities")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"entities": [{"label": "ORG", "text": "Acme"}]}"#)
            .create_async()
            .await;

        let entities = client_for(&server).extract_entities("Acme").await.unwrap();
        assert_eq!(
            entities,
            vec![CvEntity {
                label: "ORG".to_string(),
                text: "Acme".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/extract/skills")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let err = client_for(&server).extract_skills("x").await.unwrap_err();
        assert!(matches!(err, NlpError::Api { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast_with_detail() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/extract/entities")
            .with_status(422)
            .with_body(r#"{"detail": "text too long"}"#)
            .expect(1)
            .create_async()
            .await;

        let err = client_for(&server).extract_entities("x").await.unwrap_err();
        match err {
            NlpError::Api { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "text too long");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_recommend_users_posts_project_and_candidates() {
        let mut server = mockito::Server::new_async().await;
        let candidate_id = Uuid::new_v4();
        let mock = server
            .mock("POST", "/recommend/users")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "project": {"name": "Atlas"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"recommendations": [{{"id": "{candidate_id}", "score": 0.9}}]}}"#
            ))
            .create_async()
            .await;

        let project = ProjectProfile {
            id: Uuid::new_v4(),
            name: "Atlas".to_string(),
            required_skills: vec![],
        };
        let candidates = vec![CandidateProfile {
            id: candidate_id,
            skills: vec![],
            free_capacity: 100,
        }];

        let matches = client_for(&server)
            .recommend_users(&project, &candidates)
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, candidate_id);
        assert!(matches[0].matched_skills.is_empty());
        mock.assert_async().await;
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = NlpClient::new("http://nlp.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://nlp.local");
    }
}
