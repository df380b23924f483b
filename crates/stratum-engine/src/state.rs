use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stratum_domain::StepId;

use crate::error::StateError;
use crate::fs_util::write_private_file;

/// What the last successful run recorded for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub fingerprint: String,
    pub output: serde_json::Value,
}

/// Outputs of previously created steps, keyed by step identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionState {
    #[serde(default)]
    pub steps: BTreeMap<String, StepRecord>,
}

impl ProvisionState {
    #[must_use]
    pub fn record(&self, id: &StepId) -> Option<&StepRecord> {
        self.steps.get(&id.to_string())
    }

    pub fn insert(&mut self, id: &StepId, record: StepRecord) {
        self.steps.insert(id.to_string(), record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Digest over the step identity and the canonical JSON of its resolved input.
///
/// `serde_json` maps are ordered, so equal inputs always serialize identically.
///
/// # Errors
///
/// Returns an error when the input cannot be serialized.
pub fn fingerprint<I: Serialize>(id: &StepId, input: &I) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_vec(input)?;
    let mut hasher = Sha256::new();
    hasher.update(id.to_string().as_bytes());
    hasher.update([0_u8]);
    hasher.update(&encoded);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Load state from `path`; a missing file is an empty state.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or decoded.
pub fn load_state(path: &Path) -> Result<ProvisionState, StateError> {
    let payload = match fs::read(path) {
        Ok(payload) => payload,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(ProvisionState::default()),
        Err(source) => {
            return Err(StateError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&payload).map_err(|source| StateError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist state as pretty JSON readable only by the owner.
///
/// # Errors
///
/// Returns an error when the state cannot be encoded or written.
pub fn save_state(path: &Path, state: &ProvisionState) -> Result<(), StateError> {
    let payload =
        serde_json::to_vec_pretty(state).map_err(|source| StateError::Encode { source })?;
    write_private_file(path, &payload).map_err(|source| StateError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// `<data-local-dir>/stratum/<stack>.state.json`
///
/// # Errors
///
/// Returns an error when the platform has no data directory.
pub fn default_state_path(stack: &str) -> Result<PathBuf, StateError> {
    let base = dirs::data_local_dir().ok_or(StateError::NoDataDir)?;
    Ok(base.join("stratum").join(format!("{stack}.state.json")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use serde_json::json;
    use stratum_domain::{ObjectKind, StepId, StepKind, StepName};
    use tempfile::TempDir;

    use super::{ProvisionState, StepRecord, fingerprint, load_state, save_state};

    fn id(name: &str) -> StepId {
        StepId::new(
            StepKind::Object(ObjectKind::Namespace),
            StepName::try_from(name).expect("name"),
        )
    }

    #[test]
    fn fingerprint_depends_on_identity_and_input() {
        let input = json!({"name": "efk-logging", "labels": {"b": "2", "a": "1"}});
        let same = json!({"labels": {"a": "1", "b": "2"}, "name": "efk-logging"});
        let base = fingerprint(&id("efk"), &input).expect("hash");

        assert_eq!(base, fingerprint(&id("efk"), &same).expect("hash"));
        assert_ne!(base, fingerprint(&id("other"), &input).expect("hash"));
        assert_ne!(
            base,
            fingerprint(&id("efk"), &json!({"name": "changed"})).expect("hash")
        );
    }

    #[test]
    fn missing_state_file_is_empty() {
        let temp = TempDir::new().expect("tempdir");
        let state = load_state(&temp.path().join("absent.json")).expect("load");
        assert!(state.is_empty());
    }

    #[test]
    fn save_then_load_keeps_records() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("nested/dev.state.json");
        let mut state = ProvisionState::default();
        state.insert(
            &id("efk"),
            StepRecord {
                fingerprint: "abc".to_string(),
                output: json!({"kind": "namespace"}),
            },
        );

        save_state(&path, &state).expect("save");
        let loaded = load_state(&path).expect("load");
        assert_eq!(loaded, state);
        assert_eq!(
            loaded.record(&id("efk")).map(|record| record.fingerprint.as_str()),
            Some("abc")
        );
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dev.state.json");
        save_state(&path, &ProvisionState::default()).expect("save");
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
