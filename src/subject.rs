use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Picks a random subject from the JSON name list that has not been used yet.
pub fn pick_subject(names_path: &Path, used_path: &Path) -> Result<String> {
    let data = fs::read_to_string(names_path).map_err(|e| {
        PipelineError::Configuration(format!(
            "subject list {} not readable: {}",
            names_path.display(),
            e
        ))
    })?;
    let names: Vec<String> = serde_json::from_str(&data).map_err(|e| {
        PipelineError::Configuration(format!("subject list {} is not a JSON string array: {}", names_path.display(), e))
    })?;

    let used = load_used_subjects(used_path)?;
    let candidates: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| {
            let fresh = !used.contains(*n);
            if !fresh {
                debug!("Skipping already used subject: {}", n);
            }
            fresh
        })
        .collect();

    let subject = candidates
        .choose(&mut rand::thread_rng())
        .ok_or_else(|| {
            PipelineError::validation(format!(
                "every subject in {} has already been used",
                names_path.display()
            ))
        })?;
    info!("Selected subject: {}", subject);
    Ok(subject.to_string())
}

fn load_used_subjects(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let data = fs::read_to_string(path).map_err(|e| PipelineError::io("reading used subjects", e))?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Appends `subject` to the ledger so later runs skip it.
pub fn record_used_subject(path: &Path, subject: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PipelineError::io("opening used subjects", e))?;
    writeln!(file, "{}", subject).map_err(|e| PipelineError::io("recording used subject", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_used_subjects() {
        let dir = tempfile::tempdir().unwrap();
        let names = dir.path().join("names.json");
        let used = dir.path().join("used.txt");
        fs::write(&names, r#"["Lion", " Okapi ", "", "Tapir"]"#).unwrap();
        record_used_subject(&used, "Lion").unwrap();
        record_used_subject(&used, "Tapir").unwrap();

        for _ in 0..10 {
            assert_eq!(pick_subject(&names, &used).unwrap(), "Okapi");
        }
    }

    #[test]
    fn test_all_used_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let names = dir.path().join("names.json");
        let used = dir.path().join("used.txt");
        fs::write(&names, r#"["Lion"]"#).unwrap();
        record_used_subject(&used, "Lion").unwrap();
        assert!(matches!(
            pick_subject(&names, &used),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_or_bad_list_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let used = dir.path().join("used.txt");
        assert!(pick_subject(&dir.path().join("nope.json"), &used).unwrap_err().is_fatal_config());

        let names = dir.path().join("names.json");
        fs::write(&names, r#"{"not": "a list"}"#).unwrap();
        assert!(pick_subject(&names, &used).unwrap_err().is_fatal_config());
    }

    #[test]
    fn test_ledger_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let used = dir.path().join("used.txt");
        record_used_subject(&used, "Lion").unwrap();
        record_used_subject(&used, "Red panda").unwrap();
        assert_eq!(fs::read_to_string(&used).unwrap(), "Lion\nRed panda\n");
        let set = load_used_subjects(&used).unwrap();
        assert!(set.contains("Red panda"));
    }
}
