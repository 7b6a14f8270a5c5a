//! Built-in stage registry and variable defaults.
//!
//! Every stage shells out to a service in the project's compose file, so the
//! host only needs a container runtime. The storage upload in `deploy` runs the
//! cloud CLI image from the same compose file.

use std::collections::BTreeMap;

use crate::stage::Stage;
use crate::utils::template::TemplateVars;

pub const CONFIG_FILE: &str = "packline.toml";
pub const ENV_FILE: &str = ".env";

pub const LOCK: &str = "lock";
pub const BUILD: &str = "build";
pub const PACKAGE: &str = "package";
pub const DEPLOY: &str = "deploy";
pub const TEST: &str = "test";
pub const CLEAN: &str = "clean";

/// Default values for template variables. `bucket` has no default: deploying
/// without one configured fails before anything runs.
pub fn default_vars() -> BTreeMap<String, String> {
    [
        (TemplateVars::COMPOSE_FILE, "docker-compose.yml"),
        (TemplateVars::BUILD_DIR, "build"),
        (TemplateVars::OUTPUT_DIR, "dist"),
        (TemplateVars::APP_NAME, "app"),
        (TemplateVars::LAYER_NAME, "layer"),
        (TemplateVars::PYTHON_VERSION, "3.12"),
        (TemplateVars::PREFIX, "releases"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(LOCK, "docker compose -f {{compose_file}} run --rm lock")
            .label("Lock dependencies")
            .needs(&["Pipfile"])
            .produces(&["Pipfile.lock", "requirements.txt"]),
        Stage::new(BUILD, "docker compose -f {{compose_file}} run --rm build")
            .label("Install dependencies into the build volume")
            .needs(&["requirements.txt"])
            .produces(&["{{build_dir}}/python"])
            .after(&[LOCK]),
        Stage::new(PACKAGE, "docker compose -f {{compose_file}} run --rm package")
            .label("Archive the layer and the function code")
            .needs(&["{{build_dir}}/python"])
            .produces(&[
                "{{output_dir}}/{{layer_name}}.zip",
                "{{output_dir}}/{{app_name}}.zip",
            ])
            .after(&[BUILD]),
        Stage::new(
            DEPLOY,
            "docker compose -f {{compose_file}} run --rm aws s3 cp {{output_dir}} \
             s3://{{bucket}}/{{prefix}}/ --recursive --exclude '*' --include '*.zip'",
        )
        .label("Upload archives to object storage")
        .needs(&[
            "{{output_dir}}/{{layer_name}}.zip",
            "{{output_dir}}/{{app_name}}.zip",
        ])
        .after(&[PACKAGE]),
        Stage::new(TEST, "docker compose -f {{compose_file}} run --rm test")
            .label("Run the test suite in the runtime image")
            .standalone(),
        Stage::new(
            CLEAN,
            "docker compose -f {{compose_file}} down --volumes --remove-orphans \
             && rm -rf {{build_dir}} {{output_dir}}",
        )
        .label("Remove containers, volumes and build output")
        .standalone(),
    ]
}
