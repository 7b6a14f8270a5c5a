//! String template rendering utilities.
//!
//! Placeholders use the `{{name}}` form. Rendering is strict: a placeholder
//! with no matching variable is an error rather than an empty substitution.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{Error, Result};
use crate::utils::shell;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

pub struct TemplateVars;

impl TemplateVars {
    pub const COMPOSE_FILE: &'static str = "compose_file";
    pub const BUILD_DIR: &'static str = "build_dir";
    pub const OUTPUT_DIR: &'static str = "output_dir";
    pub const APP_NAME: &'static str = "app_name";
    pub const LAYER_NAME: &'static str = "layer_name";
    pub const PYTHON_VERSION: &'static str = "python_version";
    pub const BUCKET: &'static str = "bucket";
    pub const PREFIX: &'static str = "prefix";
}

/// Placeholder names referenced by a template, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Render a template, substituting values verbatim.
pub fn render(template: &str, variables: &BTreeMap<String, String>) -> Result<String> {
    render_with(template, variables, |value| value.to_string())
}

/// Render a template for `sh -c`, quoting each substituted value.
pub fn render_shell(template: &str, variables: &BTreeMap<String, String>) -> Result<String> {
    render_with(template, variables, shell::quote_arg)
}

fn render_with(
    template: &str,
    variables: &BTreeMap<String, String>,
    encode: impl Fn(&str) -> String,
) -> Result<String> {
    if let Some(missing) = placeholders(template)
        .into_iter()
        .find(|name| !variables.contains_key(name))
    {
        return Err(Error::config_missing_key(missing, Some(template.to_string())));
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        variables
            .get(&caps[1])
            .map(|value| encode(value))
            .unwrap_or_default()
    });

    Ok(rendered.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn render_substitutes_all_occurrences() {
        let rendered = render("{{a}}/{{ b }}/{{a}}", &vars(&[("a", "x"), ("b", "y")])).unwrap();
        assert_eq!(rendered, "x/y/x");
    }

    #[test]
    fn render_fails_on_unknown_placeholder() {
        let err = render("s3://{{bucket}}/{{prefix}}", &vars(&[("bucket", "b")])).unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
        assert_eq!(err.details["key"], "prefix");
    }

    #[test]
    fn render_shell_quotes_values() {
        let rendered = render_shell("rm -rf {{dir}}", &vars(&[("dir", "my dist")])).unwrap();
        assert_eq!(rendered, "rm -rf 'my dist'");
    }

    #[test]
    fn placeholders_are_deduplicated() {
        assert_eq!(placeholders("{{a}} {{b}} {{a}}"), vec!["a", "b"]);
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        assert_eq!(render("docker compose down", &vars(&[])).unwrap(), "docker compose down");
    }
}
