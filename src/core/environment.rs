//! Stage environment loaded from an external dotenv-style file.
//!
//! Values are credentials and region settings. They are applied to stage
//! processes and nowhere else: `Debug` redacts them and the type does not
//! implement `Serialize`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load an environment file. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::config_env_file_not_found(
                path.to_string_lossy().to_string(),
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
        })?;

        Self::parse(&content).map_err(|err| {
            err.with_hint(format!("Check the syntax of {}", path.display()))
        })
    }

    /// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped, an
    /// `export ` prefix is accepted, and matching single or double quotes
    /// around a value are stripped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut vars = BTreeMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

            // Error details carry the line number only: the line may hold a secret.
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::config_invalid_value(
                    "env_file",
                    None,
                    format!("line {}: expected KEY=VALUE", idx + 1),
                )
            })?;

            let key = key.trim();
            if !is_valid_key(key) {
                return Err(Error::config_invalid_value(
                    "env_file",
                    None,
                    format!("line {}: invalid variable name", idx + 1),
                ));
            }

            vars.insert(key.to_string(), unquote(value.trim()).to_string());
        }

        Ok(Self { vars })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.vars.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handles_comments_exports_and_quotes() {
        let env = Environment::parse(
            "# credentials\n\
             AWS_ACCESS_KEY_ID=AKIAEXAMPLE\n\
             export AWS_DEFAULT_REGION=eu-west-1\n\
             \n\
             AWS_SECRET_ACCESS_KEY=\"with spaces = and equals\"\n\
             EMPTY=\n\
             SINGLE='x'\n",
        )
        .unwrap();

        assert_eq!(env.len(), 5);
        assert_eq!(env.get("AWS_ACCESS_KEY_ID"), Some("AKIAEXAMPLE"));
        assert_eq!(env.get("AWS_DEFAULT_REGION"), Some("eu-west-1"));
        assert_eq!(
            env.get("AWS_SECRET_ACCESS_KEY"),
            Some("with spaces = and equals")
        );
        assert_eq!(env.get("EMPTY"), Some(""));
        assert_eq!(env.get("SINGLE"), Some("x"));
    }

    #[test]
    fn parse_error_does_not_leak_line_content() {
        let err = Environment::parse("OK=1\nsupersecretvalue\n").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
        let rendered = err.details.to_string();
        assert!(rendered.contains("line 2"));
        assert!(!rendered.contains("supersecretvalue"));
    }

    #[test]
    fn parse_rejects_invalid_names() {
        assert!(Environment::parse("1BAD=x").is_err());
        assert!(Environment::parse("BAD-NAME=x").is_err());
    }

    #[test]
    fn debug_redacts_values() {
        let env = Environment::from_pairs([("AWS_SECRET_ACCESS_KEY", "hunter2")]);
        let debug = format!("{:?}", env);
        assert!(debug.contains("AWS_SECRET_ACCESS_KEY"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Environment::load(&dir.path().join("absent.env")).unwrap_err();
        assert_eq!(err.code.as_str(), "config.env_file_not_found");
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "AWS_DEFAULT_REGION=us-east-1\n").unwrap();
        let env = Environment::load(&path).unwrap();
        assert_eq!(env.keys(), vec!["AWS_DEFAULT_REGION".to_string()]);
    }
}
