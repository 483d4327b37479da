use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;

use crate::engine::Status;
use crate::output::status_line;

#[derive(Parser, Debug)]
#[command(name = "code-runner", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file; built-in defaults are used without it
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Override the address to bind to
    #[arg(long = "bind-address")]
    pub bind_address: Option<String>,

    /// Override the port to bind to
    #[arg(long = "bind-port", short = 'p')]
    pub bind_port: Option<u16>,
}

impl CliArgs {
    /// Load the configuration from the specified file and apply overrides
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(address) = &self.bind_address {
            config.server.bind_address = address.clone();
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = port;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub runner: RunnerConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub bind_port: u16,
    /// actix worker threads; `None` means one per core
    pub workers: Option<usize>,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct RunnerConfig {
    /// Executions allowed in flight at once
    pub max_outstanding: usize,
    /// Wall-clock limit for one execution
    pub timeout: MilliSecond,
    /// Ceiling on returned output
    pub output_limit: ByteSize,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: BackendConfig,
    /// Host directory bind-mounted into the sandbox
    pub staging_dir: Option<PathBuf>,
    /// Where third-party headers and jars live on the host
    pub assets_dir: PathBuf,
    /// Launcher prefixed to every command run inside the sandbox
    pub wrapper: Vec<String>,
    pub restart_limit: u32,
    pub restart_backoff: MilliSecond,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Lxc(LxcConfig),
    Host,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LxcConfig {
    pub base_container: String,
    pub command_prefix: Vec<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Seconds `lxc-stop` may take
    pub stop_timeout: u32,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub usize);

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 8080,
            workers: None,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_outstanding: 1,
            timeout: MilliSecond(5000),
            output_limit: ByteSize(10 * 1024),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            staging_dir: None,
            assets_dir: PathBuf::from("/usr/local/share/code-runner"),
            wrapper: vec!["/usr/local/bin/sandbox".to_string()],
            restart_limit: 5,
            restart_backoff: MilliSecond(1000),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Lxc(LxcConfig::default())
    }
}

impl Default for LxcConfig {
    fn default() -> Self {
        Self {
            base_container: "ubase".to_string(),
            command_prefix: vec![],
            uid: None,
            gid: None,
            stop_timeout: 1,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open configuration file {path}"))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).with_context(|| format!("invalid configuration in {path}"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner.max_outstanding == 0 {
            bail!("runner.max_outstanding must not be 0");
        }
        if self.runner.timeout.0 == 0 {
            bail!("runner.timeout must not be 0");
        }
        let longest_status = status_line(&Status::Timeout).map_or(0, |s| s.len());
        if self.runner.output_limit.0 <= longest_status {
            bail!("runner.output_limit must be larger than {longest_status} bytes");
        }
        if self.sandbox.restart_limit == 0 {
            bail!("sandbox.restart_limit must not be 0");
        }
        Ok(())
    }
}

impl SandboxConfig {
    /// The configured staging directory, or one under the user cache dir
    pub fn staging_dir(&self) -> anyhow::Result<PathBuf> {
        use directories::ProjectDirs;

        if let Some(dir) = &self.staging_dir {
            return Ok(dir.clone());
        }
        let proj_dirs = ProjectDirs::from("", "", "code-runner")
            .context("Unable to find user directory")?;
        Ok(proj_dirs.cache_dir().join("staging"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let config = Config::from_file("data/example.json").unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.bind_port, 8080);
        assert_eq!(config.runner.timeout, MilliSecond(5000));
        assert_eq!(config.runner.output_limit, ByteSize(10240));
        assert_eq!(
            config.sandbox.backend,
            BackendConfig::Lxc(LxcConfig {
                base_container: "ubase".to_string(),
                command_prefix: vec!["sudo".to_string()],
                uid: Some(1000),
                gid: Some(1000),
                stop_timeout: 1,
            })
        );
        assert_eq!(
            config.sandbox.staging_dir.as_deref(),
            Some(std::path::Path::new("/tmp/foo"))
        );
    }

    #[test]
    fn test_defaults_match_reference_limits() {
        let config: Config = serde_json::from_str("{}").unwrap();
        config.validate().unwrap();
        assert_eq!(config.runner.max_outstanding, 1);
        assert_eq!(config.runner.timeout, MilliSecond(5000));
        assert_eq!(config.runner.output_limit, ByteSize(10 * 1024));
        assert_eq!(config.sandbox.restart_limit, 5);
        assert_eq!(config.sandbox.restart_backoff, MilliSecond(1000));
        assert_eq!(config.sandbox.backend, BackendConfig::Lxc(LxcConfig::default()));
    }

    #[test]
    fn test_host_backend() {
        let config: Config =
            serde_json::from_str(r#"{"sandbox": {"backend": {"type": "host"}}}"#).unwrap();
        assert_eq!(config.sandbox.backend, BackendConfig::Host);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        for json in [
            r#"{"runner": {"max_outstanding": 0}}"#,
            r#"{"runner": {"timeout": 0}}"#,
            r#"{"runner": {"output_limit": 10}}"#,
            r#"{"sandbox": {"restart_limit": 0}}"#,
        ] {
            let config: Config = serde_json::from_str(json).unwrap();
            assert!(config.validate().is_err(), "{json} should be rejected");
        }
    }

    #[test]
    fn test_cli_overrides() {
        let cli = CliArgs::parse_from(["code-runner", "--bind-port", "9000"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.server.bind_port, 9000);
        assert_eq!(config.server.bind_address, "127.0.0.1");
    }
}
