//! Persisted node identity.
//!
//! A device keeps the same [`PeerId`] across restarts so the rest of the
//! room recognizes it (and the election order stays stable). The id
//! lives in a small JSON file:
//!
//! ```json
//! { "peer_id": "peer-1f0c9a7e2b3d4c5e" }
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use meshroom_protocol::PeerId;
use serde::{Deserialize, Serialize};

use crate::MeshroomError;

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    peer_id: PeerId,
}

/// Loads the id stored at `path`, or creates a fresh random one and
/// stores it there (creating parent directories as needed).
///
/// # Errors
/// [`MeshroomError::Identity`] on IO failure, [`MeshroomError::Format`]
/// if the file exists but isn't a valid identity file.
pub fn load_or_create(path: impl AsRef<Path>) -> Result<PeerId, MeshroomError> {
    let path = path.as_ref();
    let io_err = |source: std::io::Error| MeshroomError::Identity {
        path: path.to_path_buf(),
        source,
    };

    match fs::read(path) {
        Ok(bytes) => {
            let file: IdentityFile =
                serde_json::from_slice(&bytes).map_err(|source| MeshroomError::Format {
                    path: path.to_path_buf(),
                    source,
                })?;
            if file.peer_id.is_empty() {
                return Err(io_err(std::io::Error::new(
                    ErrorKind::InvalidData,
                    "stored peer id is empty",
                )));
            }
            tracing::debug!(peer_id = %file.peer_id, path = %path.display(), "loaded identity");
            Ok(file.peer_id)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let peer_id = PeerId::random();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            let file = IdentityFile {
                peer_id: peer_id.clone(),
            };
            let json = serde_json::to_vec_pretty(&file).map_err(|source| MeshroomError::Format {
                path: path.to_path_buf(),
                source,
            })?;
            fs::write(path, json).map_err(io_err)?;
            tracing::info!(%peer_id, path = %path.display(), "created new identity");
            Ok(peer_id)
        }
        Err(e) => Err(io_err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_then_reloads_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        let first = load_or_create(&path).unwrap();
        assert!(path.exists());
        let second = load_or_create(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_files_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let a = load_or_create(dir.path().join("a.json")).unwrap();
        let b = load_or_create(dir.path().join("b.json")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_reads_hand_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, r#"{ "peer_id": "peer:kitchen-tablet" }"#).unwrap();

        let id = load_or_create(&path).unwrap();
        assert_eq!(id.as_str(), "peer:kitchen-tablet");
    }

    #[test]
    fn test_garbage_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, b"not json").unwrap();

        let err = load_or_create(&path).unwrap_err();
        assert!(matches!(err, MeshroomError::Format { .. }));
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, r#"{ "peer_id": "" }"#).unwrap();

        let err = load_or_create(&path).unwrap_err();
        assert!(matches!(err, MeshroomError::Identity { .. }));
    }
}
