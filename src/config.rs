use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::playground::DEFAULT_TIME_LIMIT;

#[derive(Parser)]
#[command(name = "playground", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Address to listen on, overriding the configuration file
    #[arg(long = "bind-address")]
    pub bind_address: Option<String>,

    /// Port to listen on, overriding the configuration file
    #[arg(long = "bind-port")]
    pub bind_port: Option<u16>,
}

impl CliArgs {
    /// Load the configuration from the specified file, then apply overrides
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)?
            }
            None => Config::default(),
        };

        if let Some(address) = &self.bind_address {
            config.server.bind_address = Some(address.clone());
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = Some(port);
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub playground: PlaygroundConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PlaygroundConfig {
    /// Go toolchain binary, looked up on PATH when not absolute
    pub toolchain: PathBuf,
    /// Names of the only host variables the toolchain gets to see
    pub toolchain_env: Vec<String>,
    pub run_time_limit: MilliSecond,
    pub build_time_limit: MilliSecond,
    /// Where per-request workspaces are created; the system temp dir if unset
    pub workspace_root: Option<PathBuf>,
    /// Bytes of program output kept per run; everything is kept if unset
    pub output_limit: Option<usize>,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            toolchain: PathBuf::from("go"),
            toolchain_env: vec!["GOPATH".to_string(), "GOROOT".to_string()],
            run_time_limit: MilliSecond::from(DEFAULT_TIME_LIMIT),
            build_time_limit: MilliSecond::from(DEFAULT_TIME_LIMIT),
            workspace_root: None,
            output_limit: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}

impl From<Duration> for MilliSecond {
    fn from(value: Duration) -> Self {
        MilliSecond(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let file = std::fs::File::open("data/example.json").unwrap();
        let reader = std::io::BufReader::new(file);
        let config: Config = serde_json::from_reader(reader).unwrap();
        assert_eq!(config.server.bind_address, Some("127.0.0.1".to_string()));
        assert_eq!(config.server.bind_port, Some(8080));
        assert_eq!(config.playground.toolchain, PathBuf::from("/usr/local/go/bin/go"));
        assert_eq!(
            config.playground.toolchain_env,
            vec!["GOPATH", "GOROOT", "GOCACHE"]
        );
        assert_eq!(config.playground.run_time_limit, MilliSecond(10000));
        assert_eq!(config.playground.build_time_limit, MilliSecond(60000));
        assert_eq!(config.playground.output_limit, Some(1048576));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"playground": {"run_time_limit": 500}}"#).unwrap();
        assert_eq!(config.server.bind_port, None);
        assert_eq!(config.playground.toolchain, PathBuf::from("go"));
        assert_eq!(config.playground.toolchain_env, vec!["GOPATH", "GOROOT"]);
        assert_eq!(
            Duration::from(config.playground.run_time_limit),
            Duration::from_millis(500)
        );
        assert_eq!(
            Duration::from(config.playground.build_time_limit),
            DEFAULT_TIME_LIMIT
        );
        assert_eq!(config.playground.workspace_root, None);
        assert_eq!(config.playground.output_limit, None);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = CliArgs::parse_from(["playground", "--bind-port", "9000"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.server.bind_port, Some(9000));
        assert_eq!(config.server.bind_address, None);
    }
}
