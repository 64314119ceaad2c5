//! 数据库配置
//!
//! 配置来源依次为默认值、`cardiodb.toml` 配置文件、`CARDIODB__*` 环境变量。

use cardiodb_core::{CardioError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 数据库环境
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// 开发库
    Dev,
    /// 部署库
    Deploy,
    /// 进程内存储，启动时载入测试数据
    InMemory,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Dev => "dev",
            Profile::Deploy => "deploy",
            Profile::InMemory => "inmemory",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = CardioError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(Profile::Dev),
            "deploy" => Ok(Profile::Deploy),
            "inmemory" => Ok(Profile::InMemory),
            _ => Err(CardioError::Config(format!("DB not supported: {}", s))),
        }
    }
}

/// 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// MongoDB 连接字符串
    pub conn_str: String,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// 数据库名
    pub database: String,
    /// 需要载入测试数据的集合
    pub collections: Vec<String>,
    /// 测试数据目录，文件名为 `test_<collection>.json`
    #[serde(default)]
    pub seed_dir: Option<PathBuf>,
    /// 按环境名索引的连接配置
    #[serde(default)]
    pub connections: HashMap<String, ConnectionSettings>,
}

impl Settings {
    pub const DEFAULT_FILE: &'static str = "cardiodb";
    pub const ENV_PREFIX: &'static str = "CARDIODB";

    /// 加载配置，未指定路径时读取可选的 `cardiodb.toml`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(Self::DEFAULT_FILE).required(false),
        };

        Config::builder()
            .set_default("database", "cardiodb")
            .and_then(|b| {
                b.set_default(
                    "collections",
                    vec!["patient", "models", "imaging", "patient-cohort"],
                )
            })
            .map_err(config_err)?
            .add_source(file)
            .add_source(Environment::with_prefix(Self::ENV_PREFIX).separator("__"))
            .build()
            .map_err(config_err)?
            .try_deserialize::<Settings>()
            .map_err(config_err)
    }

    /// 获取指定环境的连接字符串
    pub fn connection_string(&self, profile: Profile) -> Result<&str> {
        self.connections
            .get(profile.as_str())
            .map(|c| c.conn_str.as_str())
            .ok_or_else(|| {
                CardioError::Config(format!("no connection string for profile '{}'", profile))
            })
    }
}

fn config_err(err: config::ConfigError) -> CardioError {
    CardioError::Config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_profile_parsing() {
        assert_eq!("dev".parse::<Profile>().unwrap(), Profile::Dev);
        assert_eq!("inmemory".parse::<Profile>().unwrap(), Profile::InMemory);
        assert!(matches!(
            "staging".parse::<Profile>(),
            Err(CardioError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
database = "heart"
seed_dir = "tests/data"

[connections.dev]
conn_str = "mongodb://localhost:27017"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.database, "heart");
        assert_eq!(settings.collections.len(), 4);
        assert_eq!(settings.seed_dir, Some(PathBuf::from("tests/data")));
        assert_eq!(
            settings.connection_string(Profile::Dev).unwrap(),
            "mongodb://localhost:27017"
        );
        assert!(settings.connection_string(Profile::Deploy).is_err());
    }
}
