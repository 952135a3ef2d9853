use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::DEFAULT_COMPRESSION_LEVEL;
use crate::ocr::PipelineConfig;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub detector_command: Vec<String>,
    pub detector_version: String,
    pub recognizer_languages: String,
    pub recognizer_vertical_languages: String,
    pub compression_level: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            detector_command: Vec::new(),
            detector_version: "unknown".to_string(),
            recognizer_languages: "jpn".to_string(),
            recognizer_vertical_languages: "jpn_vert".to_string(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    pipeline: Option<PipelineSettings>,
    detector: Option<DetectorSettings>,
    recognizer: Option<RecognizerSettings>,
    output: Option<OutputSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSettings {
    text_height: Option<i64>,
    max_ratio_vert: Option<f32>,
    max_ratio_hor: Option<f32>,
    anchor_window: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectorSettings {
    command: Option<Vec<String>>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RecognizerSettings {
    languages: Option<String>,
    vertical_languages: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputSettings {
    compression_level: Option<i64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults);
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(pipeline) = incoming.pipeline {
            if let Some(height) = pipeline.text_height.and_then(positive_u32) {
                self.pipeline.text_height = height;
            }
            if let Some(ratio) = pipeline.max_ratio_vert {
                if ratio.is_finite() && ratio > 0.0 {
                    self.pipeline.max_ratio_vert = ratio;
                }
            }
            if let Some(ratio) = pipeline.max_ratio_hor {
                if ratio.is_finite() && ratio > 0.0 {
                    self.pipeline.max_ratio_hor = ratio;
                }
            }
            if let Some(window) = pipeline.anchor_window {
                if let Ok(window) = u32::try_from(window) {
                    self.pipeline.anchor_window = window;
                }
            }
        }
        if let Some(detector) = incoming.detector {
            if let Some(command) = detector.command {
                let command: Vec<String> = command
                    .into_iter()
                    .filter(|arg| !arg.trim().is_empty())
                    .collect();
                if !command.is_empty() {
                    self.detector_command = command;
                }
            }
            if let Some(version) = detector.version {
                if !version.trim().is_empty() {
                    self.detector_version = version;
                }
            }
        }
        if let Some(recognizer) = incoming.recognizer {
            if let Some(languages) = recognizer.languages {
                if !languages.trim().is_empty() {
                    self.recognizer_languages = languages;
                }
            }
            if let Some(languages) = recognizer.vertical_languages {
                if !languages.trim().is_empty() {
                    self.recognizer_vertical_languages = languages;
                }
            }
        }
        if let Some(output) = incoming.output {
            if let Some(level) = output.compression_level {
                if (0..=9).contains(&level) {
                    self.compression_level = level as i32;
                }
            }
        }
    }
}

fn positive_u32(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|value| *value > 0)
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".mokuro-rust"))
        }
    })
}
