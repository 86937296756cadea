//! Localizer configuration – read from `tagloc.toml`.
//!
//! The file path is the first command-line argument, else `TAGLOC_CONFIG`,
//! else `tagloc.toml` in the working directory.  Every field except
//! `[[cameras]]` has a default.

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tagloc_hal::sim::{ScriptedDetector, SimCamera};
use tagloc_hal::{CameraPipeline, DetectionSource, PlaybackSource};
use tagloc_perception::StrategyConfig;
use tagloc_perception::transform::DEFAULT_AXIS_ADJUSTMENT_RPY;
use tagloc_types::{
    CameraExtrinsics, CameraIntrinsics, DEFAULT_TAG_CAPACITY, Detection, LocalizationError,
    PoseSolution, RigidPose,
};

pub const DEFAULT_CONFIG_FILE: &str = "tagloc.toml";

/// Where published poses go besides the in-process bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseSinkKind {
    #[default]
    None,
    /// One JSON record per line on stdout.
    Stdout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identifies this robot on the external pose bus.
    #[serde(default)]
    pub team_number: u32,

    /// Field tag layout (`.fmap` JSON).
    #[serde(default = "default_fmap_file")]
    pub fmap_file: PathBuf,

    /// Write the robot trajectory to [`trajectory_file`](Self::trajectory_file).
    #[serde(default)]
    pub pose_logging: bool,

    #[serde(default = "default_trajectory_file")]
    pub trajectory_file: PathBuf,

    #[serde(default = "default_fusion_hz")]
    pub fusion_hz: f64,

    #[serde(default = "default_publish_hz")]
    pub publish_hz: f64,

    /// Restart workers after recoverable errors.
    #[serde(default = "default_true")]
    pub stay_alive: bool,

    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,

    /// Highest tag id tracked.
    #[serde(default = "default_tag_capacity")]
    pub tag_capacity: usize,

    /// Detector → field axis adjustment as roll/pitch/yaw degrees.
    #[serde(default = "default_axis_adjustment")]
    pub axis_adjustment_rpy: [f64; 3],

    #[serde(default)]
    pub pose_sink: PoseSinkKind,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

fn default_fmap_file() -> PathBuf {
    PathBuf::from("field.fmap")
}
fn default_trajectory_file() -> PathBuf {
    PathBuf::from("trajectory.csv")
}
fn default_fusion_hz() -> f64 {
    100.0
}
fn default_publish_hz() -> f64 {
    50.0
}
fn default_true() -> bool {
    true
}
fn default_restart_backoff_ms() -> u64 {
    5_000
}
fn default_tag_capacity() -> usize {
    DEFAULT_TAG_CAPACITY
}
fn default_axis_adjustment() -> [f64; 3] {
    DEFAULT_AXIS_ADJUSTMENT_RPY
}
fn default_camera_hz() -> f64 {
    30.0
}
fn default_tag_size() -> f64 {
    0.1651
}

/// Camera mounting on the robot: translation in metres, rotation as
/// roll/pitch/yaw degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(default)]
    pub translation: [f64; 3],
    #[serde(default)]
    pub rpy: [f64; 3],
}

impl MountConfig {
    fn pose(&self) -> RigidPose {
        RigidPose::from_rpy_degrees(Vector3::from(self.translation), self.rpy)
    }
}

/// A tag the simulated camera reports on every frame, in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimTagConfig {
    pub tag_id: u32,
    pub translation: [f64; 3],
    #[serde(default)]
    pub rpy: [f64; 3],
    #[serde(default = "default_sim_error")]
    pub reprojection_error: f64,
}

fn default_sim_error() -> f64 {
    0.1
}

impl SimTagConfig {
    fn detection(&self) -> Detection {
        let pose = RigidPose::from_rpy_degrees(Vector3::from(self.translation), self.rpy);
        Detection {
            tag_id: self.tag_id,
            primary: PoseSolution::new(pose, self.reprojection_error),
            alternative: None,
            pixels: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// A simulated camera that sees a fixed set of tags.
    Sim {
        #[serde(default)]
        tags: Vec<SimTagConfig>,
    },
    /// Recorded detections, one JSON frame per line.
    Playback { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: u32,
    pub name: String,
    #[serde(default = "default_camera_hz")]
    pub frequency_hz: f64,
    #[serde(default = "default_tag_size")]
    pub tag_size: f64,
    #[serde(default)]
    pub mount: MountConfig,
    pub intrinsics: CameraIntrinsics,
    pub source: SourceConfig,
}

impl CameraConfig {
    pub fn extrinsics(&self) -> CameraExtrinsics {
        CameraExtrinsics {
            camera_id: self.camera_id,
            name: self.name.clone(),
            mount: self.mount.pose(),
            intrinsics: self.intrinsics,
            tag_size: self.tag_size,
        }
    }

    /// Build the detection source this camera reads from.
    pub fn build_source(&self) -> Box<dyn DetectionSource> {
        match &self.source {
            SourceConfig::Sim { tags } => {
                let detections = tags.iter().map(SimTagConfig::detection).collect();
                Box::new(CameraPipeline::new(
                    SimCamera::new(self.name.clone()),
                    ScriptedDetector::repeating(detections),
                    self.extrinsics(),
                ))
            }
            SourceConfig::Playback { path } => Box::new(PlaybackSource::new(self.name.clone(), path)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Pick the configuration file: explicit argument, then `TAGLOC_CONFIG`,
/// then [`DEFAULT_CONFIG_FILE`].
pub fn config_path(arg: Option<String>) -> PathBuf {
    resolve_path(arg, std::env::var("TAGLOC_CONFIG").ok())
}

pub(crate) fn resolve_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Read, apply `TAGLOC_*` overrides and validate.
///
/// # Errors
///
/// [`LocalizationError::StartupConfig`] for an unreadable file, bad TOML or
/// a configuration that fails [`validate`].
pub fn load_from(path: &Path) -> Result<Config, LocalizationError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        LocalizationError::StartupConfig(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

pub fn parse(raw: &str) -> Result<Config, LocalizationError> {
    toml::from_str(raw)
        .map_err(|e| LocalizationError::StartupConfig(format!("failed to parse config: {e}")))
}

/// Apply `TAGLOC_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TAGLOC_FMAP_FILE` | `fmap_file` |
/// | `TAGLOC_TEAM_NUMBER` | `team_number` |
/// | `TAGLOC_POSE_LOGGING` | `pose_logging` (`true`/`false`/`1`/`0`) |
/// | `TAGLOC_FUSION_HZ` | `fusion_hz` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TAGLOC_FMAP_FILE") {
        cfg.fmap_file = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("TAGLOC_TEAM_NUMBER")
        && let Ok(team) = v.trim().parse::<u32>()
    {
        cfg.team_number = team;
    }
    if let Ok(v) = std::env::var("TAGLOC_POSE_LOGGING")
        && let Some(on) = parse_flag(&v)
    {
        cfg.pose_logging = on;
    }
    if let Ok(v) = std::env::var("TAGLOC_FUSION_HZ")
        && let Ok(hz) = v.trim().parse::<f64>()
    {
        cfg.fusion_hz = hz;
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// # Errors
///
/// [`LocalizationError::StartupConfig`] naming the first problem found.
pub fn validate(cfg: &Config) -> Result<(), LocalizationError> {
    let bad = |msg: String| -> Result<(), LocalizationError> {
        Err(LocalizationError::StartupConfig(msg))
    };
    if cfg.cameras.is_empty() {
        return bad("at least one [[cameras]] entry is required".into());
    }
    if cfg.tag_capacity == 0 {
        return bad("tag_capacity must be at least 1".into());
    }
    for (name, hz) in [("fusion_hz", cfg.fusion_hz), ("publish_hz", cfg.publish_hz)] {
        if !(hz.is_finite() && hz > 0.0) {
            return bad(format!("{name} must be positive, got {hz}"));
        }
    }
    let mut seen = Vec::with_capacity(cfg.cameras.len());
    for camera in &cfg.cameras {
        if seen.contains(&camera.camera_id) {
            return bad(format!("duplicate camera_id {}", camera.camera_id));
        }
        seen.push(camera.camera_id);
        if !(camera.frequency_hz.is_finite() && camera.frequency_hz > 0.0) {
            return bad(format!("camera {} frequency_hz must be positive", camera.name));
        }
        if camera.tag_size <= 0.0 {
            return bad(format!("camera {} tag_size must be positive", camera.name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
team_number = 1234
fmap_file = "field.fmap"
pose_logging = true

[strategy]
kind = "kmeans"
k = 4

[[cameras]]
camera_id = 0
name = "front"
frequency_hz = 60.0
mount = { translation = [0.2, 0.0, 0.5], rpy = [0.0, -15.0, 0.0] }
intrinsics = { fx = 600.0, fy = 600.0, cx = 320.0, cy = 240.0 }
source = { kind = "sim", tags = [{ tag_id = 1, translation = [0.0, 0.0, 2.0] }] }

[[cameras]]
camera_id = 1
name = "rear"
intrinsics = { fx = 600.0, fy = 600.0, cx = 320.0, cy = 240.0 }
source = { kind = "playback", path = "rear.jsonl" }
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let cfg = parse(SAMPLE).unwrap();
        assert_eq!(cfg.team_number, 1234);
        assert!(cfg.pose_logging);
        assert_eq!(cfg.fusion_hz, 100.0);
        assert_eq!(cfg.publish_hz, 50.0);
        assert_eq!(cfg.restart_backoff_ms, 5_000);
        assert_eq!(cfg.tag_capacity, DEFAULT_TAG_CAPACITY);
        assert_eq!(cfg.axis_adjustment_rpy, [0.0, 0.0, 90.0]);
        assert_eq!(cfg.pose_sink, PoseSinkKind::None);
        assert_eq!(
            cfg.strategy,
            StrategyConfig::KMeans {
                k: 4,
                max_iterations: 50
            }
        );
        assert_eq!(cfg.cameras.len(), 2);
        assert_eq!(cfg.cameras[1].frequency_hz, 30.0);
        assert_eq!(
            cfg.cameras[1].source,
            SourceConfig::Playback {
                path: PathBuf::from("rear.jsonl")
            }
        );
        validate(&cfg).unwrap();
    }

    #[test]
    fn camera_extrinsics_follow_mount() {
        let cfg = parse(SAMPLE).unwrap();
        let ext = cfg.cameras[0].extrinsics();
        assert_eq!(ext.camera_id, 0);
        assert!((ext.mount.translation.z - 0.5).abs() < 1e-12);
        let [_, pitch, _] = ext.mount.rpy_degrees();
        assert!((pitch + 15.0).abs() < 1e-9);
    }

    #[test]
    fn sim_source_reports_configured_tags() {
        let cfg = parse(SAMPLE).unwrap();
        let mut source = cfg.cameras[0].build_source();
        source.open().unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.detections.len(), 1);
        assert_eq!(frame.detections[0].tag_id, 1);
        assert!((frame.detections[0].primary.reprojection_error - 0.1).abs() < 1e-12);
        assert_eq!(source.name(), "front");
    }

    #[test]
    fn rejects_config_without_cameras() {
        let cfg = parse("team_number = 1").unwrap();
        assert!(matches!(validate(&cfg), Err(LocalizationError::StartupConfig(_))));
    }

    #[test]
    fn rejects_duplicate_camera_ids() {
        let mut cfg = parse(SAMPLE).unwrap();
        cfg.cameras[1].camera_id = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_bad_frequency() {
        let mut cfg = parse(SAMPLE).unwrap();
        cfg.fusion_hz = 0.0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn malformed_toml_is_startup_error() {
        assert!(matches!(
            parse("team_number = ["),
            Err(LocalizationError::StartupConfig(_))
        ));
    }

    #[test]
    fn load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, LocalizationError::StartupConfig(_)));
    }

    #[test]
    fn load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = load_from(file.path()).unwrap();
        assert_eq!(cfg.cameras[0].name, "front");
    }

    #[test]
    fn path_resolution_order() {
        assert_eq!(
            resolve_path(Some("a.toml".into()), Some("b.toml".into())),
            PathBuf::from("a.toml")
        );
        assert_eq!(resolve_path(None, Some("b.toml".into())), PathBuf::from("b.toml"));
        assert_eq!(resolve_path(None, None), PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(resolve_path(Some(" ".into()), None), PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn env_overrides_apply() {
        // SAFETY: the only test in this crate that touches TAGLOC_* variables.
        unsafe {
            std::env::set_var("TAGLOC_FMAP_FILE", "/srv/fields/2024.fmap");
            std::env::set_var("TAGLOC_TEAM_NUMBER", "971");
            std::env::set_var("TAGLOC_POSE_LOGGING", "off");
            std::env::set_var("TAGLOC_FUSION_HZ", "not-a-number");
        }
        let mut cfg = parse(SAMPLE).unwrap();
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("TAGLOC_FMAP_FILE");
            std::env::remove_var("TAGLOC_TEAM_NUMBER");
            std::env::remove_var("TAGLOC_POSE_LOGGING");
            std::env::remove_var("TAGLOC_FUSION_HZ");
        }
        assert_eq!(cfg.fmap_file, PathBuf::from("/srv/fields/2024.fmap"));
        assert_eq!(cfg.team_number, 971);
        assert!(!cfg.pose_logging);
        assert_eq!(cfg.fusion_hz, 100.0);
    }
}
