//! Persisted player state and the status/log sink.
//!
//! Settings are a line-delimited `key=value` text file next to the
//! executable. Unknown keys are ignored on load and preserved nowhere;
//! missing files mean defaults. Paths are stored absolute, with the special
//! value `__builtin__` meaning the compiled-in bank.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;

use crate::dtype::SfError;
use crate::engine::ReverbType;

/// Marker for the built-in bank in `last_bank`.
pub const BUILTIN_BANK: &str = "__builtin__";

/// Status messages are clipped to this many bytes.
pub const STATUS_MESSAGE_MAX: usize = 256;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub last_bank: Option<String>,
    pub reverb_type: Option<i32>,
    pub loop_enabled: Option<bool>,
    pub window_x: Option<i32>,
    pub window_y: Option<i32>,
    pub volume_curve: Option<i32>,
    pub stereo: Option<bool>,
    pub sample_rate: Option<u32>,
    pub export_codec: Option<usize>,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

impl Settings {
    /// Load from `path`; a missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Settings {
        let mut settings = Settings::default();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return settings,
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "last_bank" => settings.last_bank = Some(value.to_string()),
                "reverb_type" => settings.reverb_type = value.parse().ok(),
                "loop_enabled" => settings.loop_enabled = parse_bool(value),
                "window_x" => settings.window_x = value.parse().ok(),
                "window_y" => settings.window_y = value.parse().ok(),
                "volume_curve" => settings.volume_curve = value.parse().ok(),
                "stereo" => settings.stereo = parse_bool(value),
                "sample_rate" => settings.sample_rate = value.parse().ok(),
                "export_codec" => settings.export_codec = value.parse().ok(),
                _ => {}
            }
        }
        settings
    }

    pub fn save(&self, path: &Path) -> Result<(), SfError> {
        let mut out = String::new();
        if let Some(bank) = &self.last_bank {
            out.push_str(&format!("last_bank={}\n", bank));
        }
        if let Some(reverb) = self.reverb_type {
            out.push_str(&format!("reverb_type={}\n", reverb));
        }
        if let Some(looping) = self.loop_enabled {
            out.push_str(&format!("loop_enabled={}\n", looping as u8));
        }
        if let Some(x) = self.window_x {
            out.push_str(&format!("window_x={}\n", x));
        }
        if let Some(y) = self.window_y {
            out.push_str(&format!("window_y={}\n", y));
        }
        if let Some(curve) = self.volume_curve {
            out.push_str(&format!("volume_curve={}\n", curve));
        }
        if let Some(stereo) = self.stereo {
            out.push_str(&format!("stereo={}\n", stereo as u8));
        }
        if let Some(rate) = self.sample_rate {
            out.push_str(&format!("sample_rate={}\n", rate));
        }
        if let Some(codec) = self.export_codec {
            out.push_str(&format!("export_codec={}\n", codec));
        }
        fs::write(path, out)?;
        Ok(())
    }

    /// The reverb to apply at startup. First run defaults to Small
    /// Reflections; a persisted 0 (the hidden "No Change" slot) is coerced
    /// to None, matching the long-standing load behavior.
    pub fn effective_reverb(&self) -> ReverbType {
        match self.reverb_type {
            None => ReverbType::SmallReflections,
            Some(0) => ReverbType::NoReverb,
            Some(v) => ReverbType::from_index(v).unwrap_or(ReverbType::SmallReflections),
        }
    }

    /// Record the bank path as stored on disk, absolute unless built-in.
    pub fn set_last_bank(&mut self, path: &Path) {
        if path.as_os_str() == BUILTIN_BANK {
            self.last_bank = Some(BUILTIN_BANK.to_string());
            return;
        }
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        self.last_bank = Some(absolute.display().to_string());
    }
}

/// Single-line status reporting plus an append-only log file with
/// timestamps. Every error surfaced to the user also lands in the log.
pub struct StatusLog {
    log_path: PathBuf,
    message: String,
}

impl StatusLog {
    pub fn new(log_path: PathBuf) -> StatusLog {
        StatusLog {
            log_path,
            message: String::new(),
        }
    }

    pub fn status(&mut self, message: &str) {
        let mut clipped = message.to_string();
        clipped.truncate(STATUS_MESSAGE_MAX);
        info!("{}", clipped);
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Ok(mut file) = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
        {
            let _ = writeln!(file, "[{}] {}", stamp, clipped);
        }
        self.message = clipped;
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
