use rollcall_core::CooldownScope;
use std::path::PathBuf;
use std::str::FromStr;

/// Which scorer the matcher runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScorerKind {
    /// Grayscale histogram, Bhattacharyya distance.
    #[default]
    Histogram,
    /// ArcFace embedding, cosine similarity.
    Embedding,
}

impl FromStr for ScorerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "histogram" => Ok(Self::Histogram),
            "embedding" | "arcface" => Ok(Self::Embedding),
            other => Err(format!("unknown scorer: {other}")),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub db_path: PathBuf,
    /// Directory for enrolled reference samples.
    pub samples_dir: PathBuf,
    pub scorer: ScorerKind,
    /// Overrides the scorer's own default threshold.
    pub match_threshold: Option<f32>,
    pub cooldown_secs: i64,
    pub cooldown_scope: CooldownScope,
    pub tick_ms: u64,
    /// Frames discarded after the stream starts (auto exposure settling).
    pub warmup_frames: usize,
    /// Keep identities and attendance in memory only.
    pub ephemeral: bool,
    pub system_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(rollcall_core::default_model_dir);

        let data_dir = var("ROLLCALL_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("rollcall")
        });

        Self {
            camera_device: var("ROLLCALL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir,
            db_path: var("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("attendance.db")),
            samples_dir: var("ROLLCALL_SAMPLES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("faces")),
            scorer: parsed(&var, "ROLLCALL_SCORER").unwrap_or_default(),
            match_threshold: parsed(&var, "ROLLCALL_MATCH_THRESHOLD"),
            cooldown_secs: parsed(&var, "ROLLCALL_COOLDOWN_SECS")
                .filter(|secs: &i64| *secs >= 0)
                .unwrap_or(rollcall_core::controller::DEFAULT_COOLDOWN_SECS),
            cooldown_scope: parsed(&var, "ROLLCALL_COOLDOWN_SCOPE").unwrap_or_default(),
            tick_ms: parsed(&var, "ROLLCALL_TICK_MS").filter(|ms| *ms > 0).unwrap_or(30),
            warmup_frames: parsed(&var, "ROLLCALL_WARMUP_FRAMES").unwrap_or(4),
            ephemeral: flag(&var, "ROLLCALL_EPHEMERAL"),
            system_bus: flag(&var, "ROLLCALL_SYSTEM_BUS"),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn flag(var: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    var(key).is_some_and(|v| !matches!(v.trim(), "" | "0" | "false" | "no"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("HOME", "/home/frontdesk")]);
        assert_eq!(cfg.camera_device, "/dev/video0");
        assert_eq!(cfg.db_path, PathBuf::from("/home/frontdesk/.local/share/rollcall/attendance.db"));
        assert_eq!(cfg.samples_dir, PathBuf::from("/home/frontdesk/.local/share/rollcall/faces"));
        assert_eq!(cfg.scorer, ScorerKind::Histogram);
        assert_eq!(cfg.match_threshold, None);
        assert_eq!(cfg.cooldown_secs, 60);
        assert_eq!(cfg.cooldown_scope, CooldownScope::PerIdentity);
        assert_eq!(cfg.tick_ms, 30);
        assert_eq!(cfg.warmup_frames, 4);
        assert!(!cfg.ephemeral);
        assert!(!cfg.system_bus);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("XDG_DATA_HOME", "/srv/data"),
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video2"),
            ("ROLLCALL_SCORER", "embedding"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.55"),
            ("ROLLCALL_COOLDOWN_SECS", "300"),
            ("ROLLCALL_COOLDOWN_SCOPE", "global"),
            ("ROLLCALL_EPHEMERAL", "1"),
            ("ROLLCALL_SYSTEM_BUS", "true"),
        ]);
        assert_eq!(cfg.camera_device, "/dev/video2");
        assert_eq!(cfg.db_path, PathBuf::from("/srv/data/rollcall/attendance.db"));
        assert_eq!(cfg.scorer, ScorerKind::Embedding);
        assert_eq!(cfg.match_threshold, Some(0.55));
        assert_eq!(cfg.cooldown_secs, 300);
        assert_eq!(cfg.cooldown_scope, CooldownScope::Global);
        assert!(cfg.ephemeral);
        assert!(cfg.system_bus);
    }

    #[test]
    fn test_explicit_paths_win() {
        let cfg = config(&[
            ("ROLLCALL_DATA_DIR", "/var/lib/rollcall"),
            ("ROLLCALL_DB_PATH", "/tmp/a.db"),
        ]);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/a.db"));
        assert_eq!(cfg.samples_dir, PathBuf::from("/var/lib/rollcall/faces"));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg = config(&[
            ("ROLLCALL_SCORER", "eigenfaces"),
            ("ROLLCALL_COOLDOWN_SECS", "-5"),
            ("ROLLCALL_TICK_MS", "0"),
            ("ROLLCALL_WARMUP_FRAMES", "many"),
            ("ROLLCALL_EPHEMERAL", "0"),
        ]);
        assert_eq!(cfg.scorer, ScorerKind::Histogram);
        assert_eq!(cfg.cooldown_secs, 60);
        assert_eq!(cfg.tick_ms, 30);
        assert_eq!(cfg.warmup_frames, 4);
        assert!(!cfg.ephemeral);
    }

    #[test]
    fn test_model_paths() {
        let cfg = config(&[("ROLLCALL_MODEL_DIR", "/opt/models")]);
        assert_eq!(cfg.scrfd_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(cfg.arcface_model_path(), "/opt/models/w600k_r50.onnx");
    }
}
