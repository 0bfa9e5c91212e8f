// Configuration - config.toml defaults overlaid with command-line flags.
//
// Everything the core needs arrives here as plain values; parsing problems
// are reported (with usage) before any graphics setup starts.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Prism Demo".to_string(),
            width: 320,
            height: 240,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Requested number of presentable images; clamped against surface caps
    /// at swapchain creation (2 = double buffering, 3 = triple, ...).
    pub backbuffers: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self { backbuffers: 2 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation: bool,
    /// One of "error", "warn", "info", "debug".
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation: false,
            log_level: "error".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from config.toml, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            eprintln!("Failed to load config.toml: {e}. Using defaults.");
            Config::default()
        })
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path:?}"))?;
        Ok(config)
    }

    /// Overlay command-line flags onto the loaded configuration.
    pub fn apply_args<I>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" => bail!("help requested"),
                "--validate" => self.debug.validation = true,
                "--fullscreen" => self.window.fullscreen = true,
                "--width" => self.window.width = parse_value(&arg, args.next())?,
                "--height" => self.window.height = parse_value(&arg, args.next())?,
                "--backbuffers" => self.graphics.backbuffers = parse_value(&arg, args.next())?,
                "--log-level" => {
                    let level = args.next().context("--log-level requires a value")?;
                    match level.as_str() {
                        "error" | "warn" | "info" | "debug" => self.debug.log_level = level,
                        other => bail!("unknown log level '{other}'"),
                    }
                }
                other => bail!("unknown option '{other}'"),
            }
        }
        Ok(())
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        match self.debug.log_level.as_str() {
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            _ => log::LevelFilter::Error,
        }
    }
}

fn parse_value(flag: &str, value: Option<String>) -> Result<u32> {
    let value = value.with_context(|| format!("{flag} requires a value"))?;
    value
        .parse::<u32>()
        .with_context(|| format!("{flag} expects a number, got '{value}'"))
}

pub fn print_usage(program: &str) {
    eprintln!("Usage: {program} [OPTIONS]");
    eprintln!("  --help                       Print this usage information");
    eprintln!("  --fullscreen                 Enable fullscreen render");
    eprintln!("  --validate                   Enable Vulkan validation");
    eprintln!("  --log-level <error|warn|info|debug>");
    eprintln!("  --width <val>                Set window width");
    eprintln!("  --height <val>               Set window height");
    eprintln!("  --backbuffers <val>          Number of backbuffers (2=double, 3=triple)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_override_defaults() {
        let mut config = Config::default();
        config
            .apply_args(args(&[
                "--width",
                "800",
                "--height",
                "600",
                "--backbuffers",
                "3",
                "--validate",
                "--log-level",
                "info",
            ]))
            .unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.backbuffers, 3);
        assert!(config.debug.validation);
        assert_eq!(config.log_level_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let mut config = Config::default();
        assert!(config.apply_args(args(&["--bogus"])).is_err());
    }

    #[test]
    fn missing_value_is_rejected() {
        let mut config = Config::default();
        assert!(config.apply_args(args(&["--width"])).is_err());
        assert!(config.apply_args(args(&["--width", "abc"])).is_err());
    }
}
