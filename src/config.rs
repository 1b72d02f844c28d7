//! Adapter configuration file and launch/attach arguments.

use crate::remote::{LinkOptions, RetryPolicy};
use crate::session::format::RegisterFormat;
use crate::{muted_error, weak_error};
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub connection: ConnectionConfig,
    pub timeouts: TimeoutConfig,
    pub framing: FramingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub retry_interval_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 250,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long `launch`/`attach` wait for `configurationDone`.
    pub configuration_done_ms: u64,
    /// How long `setBreakpoints` waits for the remote socket to open.
    pub transport_ready_ms: u64,
    /// How long a call waits for its reply.
    pub reply_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            configuration_done_ms: 1500,
            transport_ready_ms: 1600,
            reply_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    pub max_pending_bytes: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_pending_bytes: crate::remote::frame::DEFAULT_MAX_PENDING,
        }
    }
}

impl AdapterConfig {
    const DEFAULT_PATH: &'static str = ".config/mipsdap/config.toml";

    /// Load config from `path` or the default location. Missing or broken
    /// files fall back to defaults.
    pub fn from_file(path: Option<&Path>) -> Self {
        let data = match path {
            None => {
                let Some(home) = home::home_dir() else {
                    return Self::default();
                };
                match muted_error!(read_to_string(home.join(Self::DEFAULT_PATH))) {
                    Some(data) => data,
                    None => return Self::default(),
                }
            }
            Some(path) => match read_to_string(path) {
                Ok(data) => data,
                Err(err) => {
                    log::error!(target: "session", "Error while load config file {}: {err}", path.display());
                    return Self::default();
                }
            },
        };
        Self::from_toml(&data).unwrap_or_default()
    }

    pub fn from_toml(data: &str) -> Option<Self> {
        weak_error!(toml::de::from_str(data), "invalid adapter config:")
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            retry: RetryPolicy {
                interval: Duration::from_millis(self.connection.retry_interval_ms),
                max_attempts: self.connection.max_attempts,
            },
            max_pending: self.framing.max_pending_bytes,
        }
    }

    pub fn configuration_done_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.configuration_done_ms)
    }

    pub fn transport_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.transport_ready_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.reply_ms)
    }
}

/// Where the editor should start the remote debugger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Console {
    #[default]
    IntegratedTerminal,
    ExternalTerminal,
    /// The remote debugger is started by someone else.
    None,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    2390
}

fn default_debugger_command() -> String {
    "python -m dashmips debug".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: String,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub register_format: RegisterFormat,
    #[serde(default)]
    pub console: Console,
    /// Arguments of the debugged program.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_debugger_command")]
    pub debugger_command: String,
    #[serde(default)]
    pub debugger_args: Vec<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl LaunchArguments {
    /// Terminal kind and command line for the `runInTerminal` reverse request.
    pub fn terminal_command(&self) -> Option<(&'static str, Vec<String>)> {
        let kind = match self.console {
            Console::IntegratedTerminal => "integrated",
            Console::ExternalTerminal => "external",
            Console::None => return None,
        };
        let mut cmd: Vec<String> = self
            .debugger_command
            .split_whitespace()
            .map(ToString::to_string)
            .collect();
        cmd.extend(self.debugger_args.iter().cloned());
        cmd.push(self.program.clone());
        if !self.args.is_empty() {
            cmd.push("-a".to_string());
            cmd.extend(self.args.iter().cloned());
        }
        Some((kind, cmd))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachArguments {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub register_format: RegisterFormat,
}

/// A `launch` or `attach` request, both end up dialing the remote debugger.
#[derive(Debug, Clone)]
pub enum StartArguments {
    Launch(LaunchArguments),
    Attach(AttachArguments),
}

impl StartArguments {
    pub fn endpoint(&self) -> (&str, u16) {
        match self {
            StartArguments::Launch(a) => (&a.host, a.port),
            StartArguments::Attach(a) => (&a.host, a.port),
        }
    }

    pub fn stop_on_entry(&self) -> bool {
        match self {
            StartArguments::Launch(a) => a.stop_on_entry,
            StartArguments::Attach(a) => a.stop_on_entry,
        }
    }

    pub fn register_format(&self) -> RegisterFormat {
        match self {
            StartArguments::Launch(a) => a.register_format,
            StartArguments::Attach(a) => a.register_format,
        }
    }
}
