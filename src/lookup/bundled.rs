//! Bundled offline backend — serves a small built-in substance table.
//! Used for development and demos without network access; run with
//! `PSYCHOTROPIC_OFFLINE=1` to select it.

use chrono::Utc;

use super::{FetchError, SubjectRecord};

/// One row of the built-in table: key, display name, chemical class,
/// psychoactive class, summary lines.
type Row = (&'static str, &'static str, &'static str, &'static str, &'static [&'static str]);

const TABLE: &[Row] = &[
    ("caffeine", "Caffeine", "Xanthine", "Stimulant", &["Wakefulness", "Focus enhancement"]),
    ("aspirin", "Aspirin", "Salicylate", "Nonpsychoactive", &["Pain relief"]),
    ("lsd", "LSD", "Lysergamide", "Psychedelic", &["Geometry", "Euphoria", "Time distortion"]),
    ("mdma", "MDMA", "Amphetamine", "Entactogen", &["Empathy enhancement", "Stimulation"]),
    ("ketamine", "Ketamine", "Arylcyclohexylamine", "Dissociative", &["Dissociation", "Analgesia"]),
];

#[derive(Debug, Clone)]
pub struct BundledProvider;

impl BundledProvider {
    pub async fn fetch(&self, key: &str) -> Result<SubjectRecord, FetchError> {
        let (_, name, chemical, psychoactive, summary) = TABLE
            .iter()
            .find(|(k, ..)| *k == key)
            .ok_or(FetchError::NotFound)?;

        Ok(SubjectRecord {
            key: key.to_string(),
            name: name.to_string(),
            url: None,
            chemical_classes: vec![chemical.to_string()],
            psychoactive_classes: vec![psychoactive.to_string()],
            summary: summary.iter().map(|s| s.to_string()).collect(),
            schematic: None,
            last_fetched: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_key_resolves() {
        let p = BundledProvider;
        let record = p.fetch("caffeine").await.unwrap();
        assert_eq!(record.name, "Caffeine");
        assert_eq!(record.chemical_classes, vec!["Xanthine"]);
        assert!(!record.summary.is_empty());
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let p = BundledProvider;
        assert_eq!(p.fetch("unobtainium").await.unwrap_err(), FetchError::NotFound);
    }
}
