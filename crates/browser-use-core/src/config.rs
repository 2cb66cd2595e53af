//! Environment-driven settings.
//!
//! Every value has a typed default. Malformed numbers never abort a run: the default is used,
//! a warning is logged, and the warning is kept in [`Settings::warnings`] so `doctor` can
//! show it.

use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;

pub const DEFAULT_MODEL_PROVIDER: &str = "anthropic";
pub const DEFAULT_MODEL_NAME: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_TEMPERATURE: f64 = 0.3;
pub const DEFAULT_MAX_STEPS: usize = 30;
pub const DEFAULT_MAX_ACTIONS_PER_STEP: usize = 5;
pub const DEFAULT_DEBUGGING_PORT: u16 = 9222;
pub const DEFAULT_DEBUGGING_HOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSettings {
    pub model_provider: String,
    pub model_name: String,
    pub temperature: f64,
    pub max_steps: usize,
    pub use_vision: bool,
    pub max_actions_per_step: usize,
    pub tool_call_in_content: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model_provider: DEFAULT_MODEL_PROVIDER.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_steps: DEFAULT_MAX_STEPS,
            use_vision: true,
            max_actions_per_step: DEFAULT_MAX_ACTIONS_PER_STEP,
            tool_call_in_content: true,
        }
    }
}

/// Reuse of an existing Chrome profile / remote-debugging endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserPersistenceConfig {
    pub persistent_session: bool,
    pub user_data_dir: Option<String>,
    pub debugging_port: u16,
    pub debugging_host: String,
}

impl Default for BrowserPersistenceConfig {
    fn default() -> Self {
        Self {
            persistent_session: false,
            user_data_dir: None,
            debugging_port: DEFAULT_DEBUGGING_PORT,
            debugging_host: DEFAULT_DEBUGGING_HOST.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrowserSettings {
    pub chrome_path: Option<String>,
    pub persistence: BrowserPersistenceConfig,
    /// Keep the browser and context alive across runs instead of closing them in teardown.
    pub keep_open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Settings {
    pub agent: AgentSettings,
    pub browser: BrowserSettings,
    pub warnings: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut r = EnvReader {
            lookup,
            warnings: Vec::new(),
        };

        let agent = AgentSettings {
            model_provider: r.string("MCP_MODEL_PROVIDER", DEFAULT_MODEL_PROVIDER),
            model_name: r.string("MCP_MODEL_NAME", DEFAULT_MODEL_NAME),
            temperature: r.parse("MCP_TEMPERATURE", DEFAULT_TEMPERATURE),
            max_steps: r.parse("MCP_MAX_STEPS", DEFAULT_MAX_STEPS),
            use_vision: r.flag("MCP_USE_VISION", true),
            max_actions_per_step: r.parse("MCP_MAX_ACTIONS_PER_STEP", DEFAULT_MAX_ACTIONS_PER_STEP),
            tool_call_in_content: r.flag("MCP_TOOL_CALL_IN_CONTENT", true),
        };

        let browser = BrowserSettings {
            chrome_path: r.optional("CHROME_PATH"),
            persistence: BrowserPersistenceConfig {
                persistent_session: r.flag("CHROME_PERSISTENT_SESSION", false),
                user_data_dir: r.optional("CHROME_USER_DATA"),
                debugging_port: r.parse("CHROME_DEBUGGING_PORT", DEFAULT_DEBUGGING_PORT),
                debugging_host: r.string("CHROME_DEBUGGING_HOST", DEFAULT_DEBUGGING_HOST),
            },
            keep_open: r.flag("CHROME_KEEP_OPEN", false),
        };

        Self {
            agent,
            browser,
            warnings: r.warnings,
        }
    }
}

struct EnvReader<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    /// Unset and empty both mean "not provided".
    fn optional(&self, key: &str) -> Option<String> {
        self.raw(key).filter(|v| !v.trim().is_empty())
    }

    /// Only a case-insensitive "true" enables a flag once the variable is set.
    fn flag(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some(v) => v.trim().eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    fn parse<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + Display + Copy,
    {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    var = key,
                    value = %raw,
                    default = %default,
                    "invalid value in environment, using default"
                );
                self.warnings
                    .push(format!("Invalid value for {key}, using default={default}"));
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let s = Settings::from_lookup(|_| None);
        assert_eq!(s.agent, AgentSettings::default());
        assert_eq!(s.browser, BrowserSettings::default());
        assert!(s.warnings.is_empty());
        assert_eq!(s.agent.temperature, 0.3);
        assert_eq!(s.agent.max_steps, 30);
        assert_eq!(s.browser.persistence.debugging_port, 9222);
        assert_eq!(s.browser.persistence.debugging_host, "localhost");
    }

    #[test]
    fn invalid_temperature_falls_back_with_warning() {
        let s = Settings::from_lookup(lookup(&[("MCP_TEMPERATURE", "not-a-number")]));
        assert_eq!(s.agent.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(s.warnings.len(), 1);
        assert!(s.warnings[0].contains("MCP_TEMPERATURE"));
    }

    #[test]
    fn invalid_integers_fall_back_independently() {
        let s = Settings::from_lookup(lookup(&[
            ("MCP_MAX_STEPS", "-4"),
            ("MCP_MAX_ACTIONS_PER_STEP", "7"),
            ("CHROME_DEBUGGING_PORT", "92a2"),
        ]));
        assert_eq!(s.agent.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(s.agent.max_actions_per_step, 7);
        assert_eq!(s.browser.persistence.debugging_port, DEFAULT_DEBUGGING_PORT);
        assert_eq!(s.warnings.len(), 2);
    }

    #[test]
    fn numbers_are_trimmed() {
        let s = Settings::from_lookup(lookup(&[("MCP_TEMPERATURE", " 0.9 "), ("MCP_MAX_STEPS", "12\n")]));
        assert_eq!(s.agent.temperature, 0.9);
        assert_eq!(s.agent.max_steps, 12);
        assert!(s.warnings.is_empty());
    }

    #[test]
    fn flags_only_accept_true() {
        let s = Settings::from_lookup(lookup(&[
            ("MCP_USE_VISION", "TRUE"),
            ("MCP_TOOL_CALL_IN_CONTENT", "yes"),
            ("CHROME_PERSISTENT_SESSION", "true"),
        ]));
        assert!(s.agent.use_vision);
        assert!(!s.agent.tool_call_in_content);
        assert!(s.browser.persistence.persistent_session);
    }

    #[test]
    fn empty_chrome_path_means_unset() {
        let s = Settings::from_lookup(lookup(&[("CHROME_PATH", ""), ("CHROME_USER_DATA", "/tmp/profile")]));
        assert_eq!(s.browser.chrome_path, None);
        assert_eq!(s.browser.persistence.user_data_dir.as_deref(), Some("/tmp/profile"));
    }

    // Env vars are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn from_env_reads_process_environment() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let prev = std::env::var("MCP_MODEL_NAME").ok();
        std::env::set_var("MCP_MODEL_NAME", "gpt-4o");
        let s = Settings::from_env();
        match prev {
            Some(v) => std::env::set_var("MCP_MODEL_NAME", v),
            None => std::env::remove_var("MCP_MODEL_NAME"),
        }
        assert_eq!(s.agent.model_name, "gpt-4o");
    }
}
