//! CV text extraction, content hashing, and the confirmation merge.

pub mod handlers;

use std::collections::BTreeMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::AppError;
use crate::skills::validate_proficiency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvFormat {
    Pdf,
    PlainText,
}

impl CvFormat {
    /// Sniffs the PDF magic bytes first; the declared content type only
    /// decides between text and unsupported.
    pub fn detect(content_type: &str, data: &[u8]) -> Option<Self> {
        if data.starts_with(b"%PDF") || content_type == "application/pdf" {
            return Some(CvFormat::Pdf);
        }
        if content_type.starts_with("text/") || std::str::from_utf8(data).is_ok() {
            return Some(CvFormat::PlainText);
        }
        None
    }

    pub fn extension(&self) -> &'static str {
        match self {
            CvFormat::Pdf => "pdf",
            CvFormat::PlainText => "txt",
        }
    }
}

/// Trims lines and drops blank runs so that re-exports of the same CV hash alike.
pub fn normalize_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hex SHA-256 of the normalized text; the cache key for NLP results.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmedSkill {
    pub skill_id: Uuid,
    pub proficiency: i16,
}

/// Validates the selection and collapses repeated skills onto their highest proficiency.
pub fn merge_confirmations(selected: &[ConfirmedSkill]) -> Result<Vec<(Uuid, i16)>, AppError> {
    if selected.is_empty() {
        return Err(AppError::Validation(
            "select at least one skill to confirm".to_string(),
        ));
    }
    let mut merged: BTreeMap<Uuid, i16> = BTreeMap::new();
    for skill in selected {
        validate_proficiency(skill.proficiency)?;
        merged
            .entry(skill.skill_id)
            .and_modify(|p| *p = (*p).max(skill.proficiency))
            .or_insert(skill.proficiency);
    }
    Ok(merged.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            CvFormat::detect("application/octet-stream", b"%PDF-1.7 ..."),
            Some(CvFormat::Pdf)
        );
        assert_eq!(
            CvFormat::detect("text/plain", b"Jane Doe\nRust"),
            Some(CvFormat::PlainText)
        );
        assert_eq!(
            CvFormat::detect("application/octet-stream", &[0xff, 0xfe, 0x00, 0xd8]),
            None
        );
    }

    #[test]
    fn test_hash_ignores_layout_noise() {
        let a = normalize_text("Jane Doe\n\n  Rust, Go  \n");
        let b = normalize_text("  Jane Doe\r\nRust, Go\n\n\n");
        assert_eq!(a, b);
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
        assert_ne!(content_hash(&a), content_hash("Jane Doe\nRust"));
    }

    #[test]
    fn test_merge_keeps_highest_proficiency() {
        let rust = Uuid::new_v4();
        let go = Uuid::new_v4();
        let merged = merge_confirmations(&[
            ConfirmedSkill { skill_id: rust, proficiency: 2 },
            ConfirmedSkill { skill_id: go, proficiency: 3 },
            ConfirmedSkill { skill_id: rust, proficiency: 4 },
        ])
        .unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&(rust, 4)));
        assert!(merged.contains(&(go, 3)));
    }

    #[test]
    fn test_merge_rejects_empty_and_out_of_range() {
        assert!(merge_confirmations(&[]).is_err());
        assert!(merge_confirmations(&[ConfirmedSkill {
            skill_id: Uuid::new_v4(),
            proficiency: 9
        }])
        .is_err());
    }
}
