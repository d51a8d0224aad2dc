//! Multi-tier TOML configuration for Tollgate.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > project > global > defaults
//!
//! Hook rules are not overridden but merged per event: global rules first,
//! then project rules.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tollgate_hooks::{HookRegistry, HooksConfig};
use tollgate_types::ConfigError;

/// The default Anthropic API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";

/// The default model for prompt hooks.
pub const DEFAULT_HOOK_MODEL: &str = "claude-haiku-4-5-20251001";

/// File name of both the global and the project settings file.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory under the project root that holds project settings.
pub const PROJECT_DIR_NAME: &str = ".tollgate";

/// Resolved configuration for one Tollgate invocation.
#[derive(Debug, Clone)]
pub struct TollgateConfig {
    /// Feature flag: when false, no hook is ever consulted.
    pub hooks_enabled: bool,
    pub hooks: HooksConfig,
    /// Prompt hooks only run when a key is available.
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub hook_model: String,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub features: FeatureSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub hooks: HooksConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureSettings {
    pub hooks: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Default model for prompt hooks.
    pub model: Option<String>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Explicit settings file used in place of the global one. Errors in it are fatal.
    pub config_path: Option<PathBuf>,
    /// Project root; defaults to the current directory.
    pub project_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub hooks_enabled: Option<bool>,
}

impl TollgateConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Project config (<project>/.tollgate/config.toml)
    /// 4. Global config (~/.tollgate/config.toml, or the `--config` file)
    /// 5. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let global = match &overrides.config_path {
            Some(path) => load_settings_file_strict(path)?,
            None => load_settings_file(&config_dir.join(CONFIG_FILE_NAME)),
        };

        let project = overrides
            .project_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .map(|dir| load_settings_file(&dir.join(PROJECT_DIR_NAME).join(CONFIG_FILE_NAME)))
            .unwrap_or_default();

        Ok(Self::resolve(
            overrides,
            |key| std::env::var(key).ok(),
            global,
            project,
            config_dir,
        ))
    }

    /// Combine already-loaded sources. `env` looks up an environment variable.
    pub fn resolve(
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
        global: SettingsFile,
        project: SettingsFile,
        config_dir: PathBuf,
    ) -> Self {
        let env = |key: &str| env(key).filter(|value| !value.is_empty());

        // Hooks feature flag: CLI > env kill switch > project > global > on
        let hooks_enabled = overrides
            .hooks_enabled
            .or_else(|| env("TOLLGATE_HOOKS_DISABLED").map(|value| !is_truthy(&value)))
            .or(project.features.hooks)
            .or(global.features.hooks)
            .unwrap_or(true);

        let api_key = overrides
            .api_key
            .or_else(|| env("ANTHROPIC_API_KEY"))
            .or(project.api.api_key)
            .or(global.api.api_key);

        let api_base_url = env("ANTHROPIC_API_BASE_URL")
            .or(project.api.base_url)
            .or(global.api.base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let hook_model = overrides
            .model
            .or_else(|| env("TOLLGATE_HOOK_MODEL"))
            .or(project.api.model)
            .or(global.api.model)
            .unwrap_or_else(|| DEFAULT_HOOK_MODEL.to_string());

        let mut hooks = global.hooks;
        hooks.merge(project.hooks);

        TollgateConfig {
            hooks_enabled,
            hooks,
            api_key,
            api_base_url,
            hook_model,
            config_dir,
        }
    }

    /// Hook rules to evaluate, or `None` when the hooks feature is off.
    pub fn active_hooks(&self) -> Option<&HooksConfig> {
        self.hooks_enabled.then_some(&self.hooks)
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false")
}

/// Get the Tollgate config directory path (~/.tollgate/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TOLLGATE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PROJECT_DIR_NAME)
}

/// Parse settings from TOML text. `path` is only used for error messages.
pub fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load and parse a TOML settings file, returning defaults on any error.
pub fn load_settings_file(path: &Path) -> SettingsFile {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return SettingsFile::default(),
    };
    match parse_settings(&content, path) {
        Ok(settings) => {
            for invalid in HookRegistry::validate(&settings.hooks) {
                tracing::warn!(
                    "{}: matcher '{}' for {} never matches: {}",
                    path.display(),
                    invalid.pattern,
                    invalid.event,
                    invalid.message
                );
            }
            settings
        }
        Err(e) => {
            tracing::warn!("{e}");
            SettingsFile::default()
        }
    }
}

/// Load a settings file the user named explicitly. Missing files, parse
/// errors and invalid matchers are all errors.
pub fn load_settings_file_strict(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let settings = parse_settings(&content, path)?;
    if let Some(invalid) = HookRegistry::validate(&settings.hooks).into_iter().next() {
        return Err(ConfigError::InvalidValue {
            key: format!("hooks.{}.matcher", invalid.event),
            message: format!("'{}': {}", invalid.pattern, invalid.message),
        });
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tollgate_hooks::{CommandSpec, HandlerDescriptor, HookEvent};

    fn parse(toml_str: &str) -> SettingsFile {
        parse_settings(toml_str, Path::new("test.toml")).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn resolve_with_env(
        overrides: CliOverrides,
        vars: &[(&str, &str)],
        global: SettingsFile,
        project: SettingsFile,
    ) -> TollgateConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TollgateConfig::resolve(
            overrides,
            |key| vars.get(key).cloned(),
            global,
            project,
            PathBuf::from("/tmp/tollgate"),
        )
    }

    #[test]
    fn test_default_settings() {
        let config = TollgateConfig::resolve(
            CliOverrides::default(),
            no_env,
            SettingsFile::default(),
            SettingsFile::default(),
            PathBuf::from("/tmp/tollgate"),
        );
        assert!(config.hooks_enabled);
        assert!(config.hooks.is_empty());
        assert!(config.api_key.is_none());
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.hook_model, DEFAULT_HOOK_MODEL);
    }

    #[test]
    fn test_settings_toml_parse() {
        let settings = parse(
            r#"
[features]
hooks = false

[api]
model = "claude-opus-4-6"
base_url = "http://localhost:8080"

[[hooks.PreToolUse]]
matcher = "Bash"

[[hooks.PreToolUse.hooks]]
type = "command"
command = "/usr/local/bin/audit.sh --strict"
timeout = 5

[[hooks.PreToolUse.hooks]]
type = "prompt"
prompt = "Deny anything that deletes files"
model = "claude-haiku-4-5"

[[hooks.Stop]]
handlers = [{ type = "command", command = ["notify", "done"] }]
"#,
        );
        assert_eq!(settings.features.hooks, Some(false));
        assert_eq!(settings.api.model.as_deref(), Some("claude-opus-4-6"));

        let rules = settings.hooks.rules(HookEvent::PreToolUse);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].matcher, "Bash");
        assert_eq!(rules[0].handlers.len(), 2);
        match &rules[0].handlers[0] {
            HandlerDescriptor::Command(hook) => {
                assert_eq!(
                    hook.command,
                    CommandSpec::Line("/usr/local/bin/audit.sh --strict".into())
                );
                assert_eq!(hook.timeout_seconds, Some(5));
            }
            other => panic!("expected command hook, got {other:?}"),
        }
        assert_eq!(rules[0].handlers[1].kind(), "prompt");

        let stop = settings.hooks.rules(HookEvent::Stop);
        assert_eq!(stop[0].matcher, "*");
        assert_eq!(stop[0].handlers[0].identity(), "command:notify done");
    }

    #[test]
    fn test_unknown_handler_type_is_kept() {
        let settings = parse(
            r#"
[[hooks.PreToolUse]]
hooks = [{ type = "webhook", url = "https://example.com" }]
"#,
        );
        let rules = settings.hooks.rules(HookEvent::PreToolUse);
        assert_eq!(
            rules[0].handlers[0],
            HandlerDescriptor::Unknown {
                kind: "webhook".into()
            }
        );
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let settings = parse("[api]\nmodel = \"m\"\n");
        assert!(settings.hooks.is_empty());
        assert!(settings.features.hooks.is_none());
    }

    #[test]
    fn test_parse_error_names_path() {
        let err = parse_settings("[api\n", Path::new("/x/config.toml")).unwrap_err();
        assert!(err.to_string().contains("/x/config.toml"));
    }

    #[test]
    fn test_project_rules_follow_global_rules() {
        let global = parse(
            r#"
[[hooks.PreToolUse]]
hooks = [{ type = "command", command = "global-check" }]
"#,
        );
        let project = parse(
            r#"
[[hooks.PreToolUse]]
matcher = "Bash"
hooks = [{ type = "command", command = "project-check" }]

[[hooks.PostToolUse]]
hooks = [{ type = "command", command = "log" }]
"#,
        );
        let config = resolve_with_env(CliOverrides::default(), &[], global, project);
        let ids: Vec<String> = config
            .hooks
            .rules(HookEvent::PreToolUse)
            .iter()
            .flat_map(|rule| rule.handlers.iter().map(HandlerDescriptor::identity))
            .collect();
        assert_eq!(ids, vec!["command:global-check", "command:project-check"]);
        assert_eq!(config.hooks.rules(HookEvent::PostToolUse).len(), 1);
    }

    #[test]
    fn test_precedence_cli_env_project_global() {
        let global = parse("[api]\nmodel = \"global\"\napi_key = \"g-key\"\n");
        let project = parse("[api]\nmodel = \"project\"\n");

        let config = resolve_with_env(
            CliOverrides::default(),
            &[],
            global.clone(),
            project.clone(),
        );
        assert_eq!(config.hook_model, "project");
        assert_eq!(config.api_key.as_deref(), Some("g-key"));

        let config = resolve_with_env(
            CliOverrides::default(),
            &[("TOLLGATE_HOOK_MODEL", "env"), ("ANTHROPIC_API_KEY", "e-key")],
            global.clone(),
            project.clone(),
        );
        assert_eq!(config.hook_model, "env");
        assert_eq!(config.api_key.as_deref(), Some("e-key"));

        let overrides = CliOverrides {
            model: Some("cli".into()),
            ..Default::default()
        };
        let config = resolve_with_env(
            overrides,
            &[("TOLLGATE_HOOK_MODEL", "env")],
            global,
            project,
        );
        assert_eq!(config.hook_model, "cli");
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let global = parse("[api]\napi_key = \"g-key\"\n");
        let config = resolve_with_env(
            CliOverrides::default(),
            &[("ANTHROPIC_API_KEY", "")],
            global,
            SettingsFile::default(),
        );
        assert_eq!(config.api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn test_hooks_feature_flag() {
        let off = parse("[features]\nhooks = false\n");
        let config = resolve_with_env(
            CliOverrides::default(),
            &[],
            SettingsFile::default(),
            off.clone(),
        );
        assert!(!config.hooks_enabled);
        assert!(config.active_hooks().is_none());

        let overrides = CliOverrides {
            hooks_enabled: Some(true),
            ..Default::default()
        };
        let config = resolve_with_env(overrides, &[], SettingsFile::default(), off);
        assert!(config.active_hooks().is_some());
    }

    #[test]
    fn test_hooks_disabled_env() {
        for (value, enabled) in [("1", false), ("yes", false), ("0", true), ("false", true)] {
            let config = resolve_with_env(
                CliOverrides::default(),
                &[("TOLLGATE_HOOKS_DISABLED", value)],
                SettingsFile::default(),
                SettingsFile::default(),
            );
            assert_eq!(config.hooks_enabled, enabled, "TOLLGATE_HOOKS_DISABLED={value}");
        }
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[[hooks.PreToolUse]\nbroken").unwrap();
        let settings = load_settings_file(&path);
        assert!(settings.hooks.is_empty());

        assert!(load_settings_file(&dir.path().join("missing.toml")).hooks.is_empty());
    }

    #[test]
    fn test_strict_load_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = load_settings_file_strict(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let bad_toml = dir.path().join("bad.toml");
        std::fs::write(&bad_toml, "[features\n").unwrap();
        assert!(matches!(
            load_settings_file_strict(&bad_toml).unwrap_err(),
            ConfigError::Parse { .. }
        ));

        let bad_glob = dir.path().join("glob.toml");
        std::fs::write(
            &bad_glob,
            "[[hooks.PreToolUse]]\nmatcher = \"[Bash\"\nhooks = [{ type = \"command\", command = \"x\" }]\n",
        )
        .unwrap();
        match load_settings_file_strict(&bad_glob).unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "hooks.PreToolUse.matcher"),
            other => panic!("expected invalid value, got {other:?}"),
        }
    }

    #[test]
    fn test_load_reads_project_file() {
        let project = tempfile::tempdir().unwrap();
        let settings_dir = project.path().join(PROJECT_DIR_NAME);
        std::fs::create_dir_all(&settings_dir).unwrap();
        std::fs::write(
            settings_dir.join(CONFIG_FILE_NAME),
            "[[hooks.PreToolUse]]\nmatcher = \"Write\"\nhooks = [{ type = \"command\", command = \"lint\" }]\n",
        )
        .unwrap();
        let global = tempfile::tempdir().unwrap();
        let global_file = global.path().join(CONFIG_FILE_NAME);
        std::fs::write(&global_file, "[api]\nmodel = \"from-file\"\n").unwrap();

        let config = TollgateConfig::load(CliOverrides {
            config_path: Some(global_file),
            project_dir: Some(project.path().to_path_buf()),
            model: Some("cli-model".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.hooks.rules(HookEvent::PreToolUse)[0].matcher, "Write");
        assert_eq!(config.hook_model, "cli-model");
    }
}
