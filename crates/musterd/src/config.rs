use std::path::PathBuf;

/// Daemon configuration, loaded from `MUSTER_*` environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Minutes of grace after the required check-in time before an arrival
    /// counts as late.
    pub grace_minutes: i64,
    /// Timeout in seconds for one detection/embedding request.
    pub infer_timeout_secs: u64,
    /// Serve on the session bus (default) or the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `MUSTER_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("MUSTER_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| muster_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("muster");

        let db_path = std::env::var("MUSTER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("muster.db"));

        Self {
            model_dir,
            db_path,
            similarity_threshold: env_f32(
                "MUSTER_SIMILARITY_THRESHOLD",
                muster_core::DEFAULT_SIMILARITY_THRESHOLD,
            ),
            grace_minutes: env_i64(
                "MUSTER_GRACE_MINUTES",
                crate::attendance::DEFAULT_GRACE_MINUTES,
            ),
            infer_timeout_secs: env_u64("MUSTER_INFER_TIMEOUT_SECS", 10),
            session_bus: std::env::var("MUSTER_SESSION_BUS")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
