//! Redis cache for recommendation lists. Failures are logged and treated as misses.

use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::recommendations::Recommendation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Project(Uuid),
    User(Uuid),
}

pub fn cache_key(subject: Subject, backend: &str) -> String {
    match subject {
        Subject::Project(id) => format!("rscm:recommendations:project:{id}:{backend}"),
        Subject::User(id) => format!("rscm:recommendations:user:{id}:{backend}"),
    }
}

pub async fn get(redis: &redis::Client, key: &str) -> Option<Vec<Recommendation>> {
    let mut conn = match redis.get_multiplexed_async_connection().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Recommendation cache unavailable: {e}");
            return None;
        }
    };

    match conn.get::<_, Option<String>>(key).await {
        Ok(Some(json)) => match serde_json::from_str(&json) {
            Ok(recs) => {
                debug!("Recommendation cache hit for {key}");
                Some(recs)
            }
            Err(e) => {
                warn!("Discarding malformed cache entry {key}: {e}");
                None
            }
        },
        Ok(None) => {
            debug!("Recommendation cache miss for {key}");
            None
        }
        Err(e) => {
            warn!("Recommendation cache read failed for {key}: {e}");
            None
        }
    }
}

pub async fn put(redis: &redis::Client, key: &str, recs: &[Recommendation], ttl_secs: u64) {
    if ttl_secs == 0 {
        return;
    }
    let json = match serde_json::to_string(recs) {
        Ok(json) => json,
        Err(e) => {
            warn!("Could not serialize recommendations for {key}: {e}");
            return;
        }
    };
    let mut conn = match redis.get_multiplexed_async_connection().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Recommendation cache unavailable: {e}");
            return;
        }
    };
    if let Err(e) = conn.set_ex::<_, _, ()>(key, json, ttl_secs).await {
        warn!("Recommendation cache write failed for {key}: {e}");
    }
}
