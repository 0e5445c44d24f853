//! Artifact Emitter - document and sidecar to disk
//!
//! Both artifacts are serialized before anything touches the filesystem and
//! are written through temporary files, so a failed emit leaves no partial
//! output behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::{Classify, ErrorKind};
use crate::hashing::{compute_record_hash, sha256_hex};
use crate::pipeline::ComposedCard;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("card id {0:?} cannot be used as a file name")]
    InvalidId(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Classify for EmitError {
    fn kind(&self) -> ErrorKind {
        match self {
            EmitError::InvalidId(_) => ErrorKind::Validation,
            EmitError::Io { .. } => ErrorKind::Io,
            EmitError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

/// Where the artifacts went and what they hash to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitReport {
    pub card_id: String,
    pub document_path: PathBuf,
    pub sidecar_path: PathBuf,
    /// SHA-256 of the document bytes.
    pub document_hash: String,
    /// SHA-256 of the sidecar's canonical JSON.
    pub sidecar_hash: String,
}

/// Sidecar JSON as written to disk.
pub fn sidecar_json(card: &ComposedCard) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&card.sidecar)
}

/// Write `<card-id>.svg` and `<card-id>.json` into `out_dir`.
pub fn emit(card: &ComposedCard, out_dir: &Path) -> Result<EmitReport, EmitError> {
    let id = card.card_id.as_str();
    if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
        return Err(EmitError::InvalidId(id.to_string()));
    }

    let sidecar = sidecar_json(card)?;
    let sidecar_hash = compute_record_hash(&card.sidecar)?;
    let document_hash = sha256_hex(card.document.as_bytes());

    fs::create_dir_all(out_dir).map_err(|e| io_error(out_dir, e))?;
    let document_path = out_dir.join(format!("{id}.svg"));
    let sidecar_path = out_dir.join(format!("{id}.json"));

    let staged = [
        (document_path.clone(), card.document.as_bytes()),
        (sidecar_path.clone(), sidecar.as_bytes()),
    ];
    let mut written: Vec<PathBuf> = Vec::new();
    for (path, bytes) in &staged {
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        if let Err(e) = fs::write(&tmp, bytes) {
            discard(&written);
            let _ = fs::remove_file(&tmp);
            return Err(io_error(&tmp, e));
        }
        written.push(tmp);
    }
    let mut renamed: Vec<&Path> = Vec::new();
    for (tmp, (path, _)) in written.iter().zip(&staged) {
        if let Err(e) = fs::rename(tmp, path) {
            discard(&written);
            for done in renamed {
                let _ = fs::remove_file(done);
            }
            return Err(io_error(path, e));
        }
        renamed.push(path);
    }

    info!(card_id = id, document = %document_path.display(), "artifacts written");
    Ok(EmitReport {
        card_id: id.to_string(),
        document_path,
        sidecar_path,
        document_hash,
        sidecar_hash,
    })
}

fn discard(paths: &[PathBuf]) {
    for p in paths {
        let _ = fs::remove_file(p);
    }
}

fn io_error(path: &Path, source: std::io::Error) -> EmitError {
    EmitError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardType;
    use crate::metadata::{default_animation_targets, CardSidecar};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn card(id: &str) -> ComposedCard {
        ComposedCard {
            card_id: id.to_string(),
            card_type: CardType::Spell,
            template_version: "1.0.0".into(),
            document: "<svg xmlns=\"http://www.w3.org/2000/svg\"/>".into(),
            sidecar: CardSidecar {
                card_id: id.to_string(),
                interactive_zones: vec![],
                animation_targets: default_animation_targets(),
                game_state: BTreeMap::new(),
                version: "1.0.0".into(),
                generated_at: Utc::now(),
            },
            placements: vec![],
        }
    }

    #[test]
    fn writes_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let report = emit(&card("fireball"), dir.path()).unwrap();

        assert_eq!(report.document_path, dir.path().join("fireball.svg"));
        let svg = fs::read_to_string(&report.document_path).unwrap();
        assert_eq!(sha256_hex(svg.as_bytes()), report.document_hash);

        let json: CardSidecar = serde_json::from_str(&fs::read_to_string(&report.sidecar_path).unwrap()).unwrap();
        assert_eq!(json.card_id, "fireball");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_sidecar_rename_removes_written_document() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("clash.json");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        let err = emit(&card("clash"), dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!dir.path().join("clash.svg").exists());

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["clash.json".to_string()]);
    }

    #[test]
    fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let err = emit(&card("../escape"), dir.path()).unwrap_err();
        assert!(matches!(err, EmitError::InvalidId(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
