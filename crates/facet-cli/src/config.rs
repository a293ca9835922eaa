use std::path::{Path, PathBuf};

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// TOML settings file with `[index]` and `[tracker]` sections.
    pub settings_path: Option<PathBuf>,
    /// Directory that relative index paths are resolved against.
    pub index_dir: PathBuf,
    /// Result count for `search` when `-k` is not given.
    pub default_results: usize,
    /// Similarity needed for `match` to report a best match.
    pub match_threshold: f32,
}

impl Config {
    /// Load configuration from `FACET_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            settings_path: std::env::var("FACET_SETTINGS").ok().map(PathBuf::from),
            index_dir: std::env::var("FACET_INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            default_results: env_usize("FACET_RESULTS", 5),
            match_threshold: env_f32("FACET_MATCH_THRESHOLD", 0.8),
        }
    }

    pub fn resolve_index(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.index_dir.join(path)
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &str) -> Config {
        Config {
            settings_path: None,
            index_dir: PathBuf::from(dir),
            default_results: 5,
            match_threshold: 0.8,
        }
    }

    #[test]
    fn test_resolve_relative_index() {
        let resolved = config("/var/lib/facet").resolve_index(Path::new("faces.idx"));
        assert_eq!(resolved, PathBuf::from("/var/lib/facet/faces.idx"));
    }

    #[test]
    fn test_resolve_absolute_index() {
        let resolved = config("/var/lib/facet").resolve_index(Path::new("/tmp/faces.idx"));
        assert_eq!(resolved, PathBuf::from("/tmp/faces.idx"));
    }

    #[test]
    fn test_env_parse_falls_back_to_default() {
        assert_eq!(env_usize("FACET_TEST_UNSET_VARIABLE", 7), 7);
        assert!((env_f32("FACET_TEST_UNSET_VARIABLE", 0.5) - 0.5).abs() < 1e-6);
    }
}
