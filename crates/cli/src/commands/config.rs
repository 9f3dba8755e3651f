use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use quoteflow_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use toml::Value;

/// Renders the effective configuration, one line per key, with the layer
/// each value came from.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: [(&str, String, &[&str]); 12] = [
        ("database.url", config.database.url.clone(), &["QUOTEFLOW_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["QUOTEFLOW_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["QUOTEFLOW_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            &["QUOTEFLOW_SERVER_BIND_ADDRESS"],
        ),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["QUOTEFLOW_SERVER_HEALTH_CHECK_PORT"],
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["QUOTEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "approvals.sweep_interval_secs",
            config.approvals.sweep_interval_secs.to_string(),
            &["QUOTEFLOW_APPROVALS_SWEEP_INTERVAL_SECS"],
        ),
        (
            "approvals.system_actor",
            config.approvals.system_actor.clone(),
            &["QUOTEFLOW_APPROVALS_SYSTEM_ACTOR"],
        ),
        (
            "approvals.auto_approval_comment",
            config.approvals.auto_approval_comment.clone(),
            &["QUOTEFLOW_APPROVALS_AUTO_APPROVAL_COMMENT"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["QUOTEFLOW_LOGGING_LEVEL", "QUOTEFLOW_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["QUOTEFLOW_LOGGING_FORMAT", "QUOTEFLOW_LOG_FORMAT"],
        ),
        ("config.file", render_path(config_file_path.as_deref()), &[]),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source = if key == "config.file" {
            "discovery".to_string()
        } else {
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
        };
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_path(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string()).unwrap_or_else(|| "<none>".to_string())
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn dotted_paths_resolve_through_tables() {
        let doc: toml::Value = "[approvals]\nsystem_actor = \"svc\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "approvals.system_actor"));
        assert!(!contains_path(&doc, "approvals.sweep_interval_secs"));
        assert!(!contains_path(&doc, "database.url"));
    }
}
