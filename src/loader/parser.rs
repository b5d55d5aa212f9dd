// 配置文件格式识别与解析

use serde_json::Value as JsonValue;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Json5,
    Yaml,
    Toml,
}

impl Format {
    /// 按扩展名识别格式，大小写不敏感
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Json5 => "json5",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
        }
    }

    /// 解析文本为 JSON 值，失败时返回 ParseError
    pub fn parse(&self, source_id: &str, content: &str) -> Result<JsonValue, ConfigError> {
        let result: Result<JsonValue, String> = match self {
            Format::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Format::Json5 => json5::from_str(content).map_err(|e| e.to_string()),
            Format::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        };

        result.map_err(|reason| ConfigError::ParseError {
            source_id: source_id.to_string(),
            format: self.as_str().to_string(),
            reason,
        })
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "json5" => Ok(Format::Json5),
            "yaml" | "yml" => Ok(Format::Yaml),
            "toml" => Ok(Format::Toml),
            other => Err(format!("不支持的文件格式: {}", other)),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_path() {
        assert_eq!(Format::from_path("config/app-1.0.json"), Some(Format::Json));
        assert_eq!(Format::from_path("app.JSON5"), Some(Format::Json5));
        assert_eq!(Format::from_path("app.yml"), Some(Format::Yaml));
        assert_eq!(Format::from_path("app.yaml"), Some(Format::Yaml));
        assert_eq!(Format::from_path("app.toml"), Some(Format::Toml));
        assert_eq!(Format::from_path("app.ini"), None);
        assert_eq!(Format::from_path("app"), None);
    }

    #[test]
    fn test_parse_formats() {
        let expected = json!({"app": "demo", "port": 8080});

        let value = Format::Json
            .parse("t", r#"{"app": "demo", "port": 8080}"#)
            .unwrap();
        assert_eq!(value, expected);

        let value = Format::Json5
            .parse("t", "{app: 'demo', port: 8080, /* comment */}")
            .unwrap();
        assert_eq!(value, expected);

        let value = Format::Yaml.parse("t", "app: demo\nport: 8080\n").unwrap();
        assert_eq!(value, expected);

        let value = Format::Toml.parse("t", "app = \"demo\"\nport = 8080\n").unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn test_parse_error() {
        let err = Format::Json.parse("file:app", r#"{"app": "#).unwrap_err();
        match err {
            ConfigError::ParseError {
                source_id, format, ..
            } => {
                assert_eq!(source_id, "file:app");
                assert_eq!(format, "json");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
