//! TOML file parsing into serde types.
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::ValidationError;

/// Read and deserialize a TOML file.
///
/// # Errors
///
/// Returns [`ValidationError::Io`] if the file cannot be read and
/// [`ValidationError::Parse`] if it is not valid TOML for `T`.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, ValidationError> {
    let content = std::fs::read_to_string(path).map_err(|source| ValidationError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&content, path)
}

/// Deserialize TOML `content`, attributing errors to `path`.
///
/// # Errors
///
/// Returns [`ValidationError::Parse`] if the content is not valid TOML for `T`.
pub fn parse_config<T: DeserializeOwned>(content: &str, path: &Path) -> Result<T, ValidationError> {
    toml::from_str(content).map_err(|e| ValidationError::Parse {
        path: path.display().to_string(),
        message: e.to_string().trim().to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        vars: BTreeMap<String, String>,
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config::<Sample>(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ValidationError::Io { .. }));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = parse_config::<Sample>("[vars\n", Path::new("m.toml")).unwrap_err();
        assert!(matches!(err, ValidationError::Parse { ref path, .. } if path == "m.toml"));
    }

    #[test]
    fn valid_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.toml");
        std::fs::write(&path, "[vars]\nuser = \"cameron\"\n").unwrap();
        let sample: Sample = load_config(&path).unwrap();
        assert_eq!(sample.vars.get("user").map(String::as_str), Some("cameron"));
    }
}
