//! Bridge configuration loading (`mibridge.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::{MiError, Result};

const DEFAULT_DEBUGGER: &str = "gdb";
const DEFAULT_DEBUGGER_ARGS: &[&str] = &["--interpreter=mi2", "--quiet", "--nx"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiConfig {
    pub debugger_path: PathBuf,
    pub debugger_args: Vec<String>,
    pub command_timeout: Option<Duration>,
    pub transcript: Option<PathBuf>,
    pub log_level: SmolStr,
}

impl Default for MiConfig {
    fn default() -> Self {
        Self {
            debugger_path: PathBuf::from(DEFAULT_DEBUGGER),
            debugger_args: DEFAULT_DEBUGGER_ARGS
                .iter()
                .map(|arg| (*arg).to_string())
                .collect(),
            command_timeout: None,
            transcript: None,
            log_level: SmolStr::new("info"),
        }
    }
}

impl MiConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| MiError::Config(format!("{}: {err}", path.display()).into()))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: ConfigToml =
            toml::from_str(text).map_err(|err| MiError::Config(err.to_string().into()))?;
        raw.into_config()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    debugger: Option<DebuggerSection>,
    session: Option<SessionSection>,
    log: Option<LogSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DebuggerSection {
    path: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionSection {
    command_timeout_ms: Option<u64>,
    transcript: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    level: String,
}

impl ConfigToml {
    fn into_config(self) -> Result<MiConfig> {
        let mut config = MiConfig::default();
        if let Some(debugger) = self.debugger {
            if let Some(path) = debugger.path {
                if path.trim().is_empty() {
                    return Err(MiError::Config("debugger.path must not be empty".into()));
                }
                config.debugger_path = PathBuf::from(path.trim());
            }
            if let Some(args) = debugger.args {
                config.debugger_args = args;
            }
        }
        if let Some(session) = self.session {
            config.command_timeout = match session.command_timeout_ms {
                Some(0) => {
                    return Err(MiError::Config(
                        "session.command_timeout_ms must be greater than zero".into(),
                    ))
                }
                Some(ms) => Some(Duration::from_millis(ms)),
                None => None,
            };
            config.transcript = session.transcript.map(PathBuf::from);
        }
        if let Some(log) = self.log {
            let level = log.level.trim().to_ascii_lowercase();
            if !LOG_LEVELS.contains(&level.as_str()) {
                return Err(MiError::Config(
                    format!("invalid log.level '{}'", log.level).into(),
                ));
            }
            config.log_level = SmolStr::new(level);
        }
        Ok(config)
    }
}
