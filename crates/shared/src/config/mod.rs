// Configuration module
// Reads INI-style tool configuration files with environment variable overrides
//
// Keys that appear below a `[Section]` header are stored as `Section.Key`.
// Environment overrides use the prefix plus the key with '.' replaced by '_',
// e.g. `Navtool_Build_Threads` overrides `Threads` in the `[Build]` section.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// Global configuration singleton
static CONFIG: once_cell::sync::Lazy<Mutex<Config>> =
    once_cell::sync::Lazy::new(|| Mutex::new(Config::new()));

/// Get a reference to the global config instance
pub fn get_config() -> &'static Mutex<Config> {
    &CONFIG
}

/// Configuration file parser
pub struct Config {
    values: HashMap<String, String>,
    filename: String,
    env_prefix: String,
}

impl Config {
    pub fn new() -> Self {
        Config {
            values: HashMap::new(),
            filename: String::new(),
            env_prefix: String::new(),
        }
    }

    /// Load configuration from a file
    /// env_prefix is used to check environment variables (e.g., "Navtool_")
    pub fn set_source(&mut self, filename: &str, env_prefix: &str) -> bool {
        self.filename = filename.to_string();
        self.env_prefix = env_prefix.to_string();
        self.reload()
    }

    /// Reload the configuration file
    pub fn reload(&mut self) -> bool {
        let content = match std::fs::read_to_string(Path::new(&self.filename)) {
            Ok(c) => c,
            Err(_) => {
                self.values.clear();
                return false;
            }
        };
        self.load_str(&content);
        true
    }

    /// Replace the current values with the contents of an INI document
    pub fn load_str(&mut self, content: &str) {
        self.values.clear();
        let mut section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }

            if let Some(eq_pos) = trimmed.find('=') {
                let key = trimmed[..eq_pos].trim();
                let mut value = trimmed[eq_pos + 1..].trim();

                if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                    value = &value[1..value.len() - 1];
                }

                let full_key = if section.is_empty() {
                    key.to_string()
                } else {
                    format!("{}.{}", section, key)
                };
                self.values.insert(full_key, value.to_string());
            }
        }
    }

    /// Check if a key is set
    pub fn is_set(&self, key: &str) -> bool {
        self.get_env_or_config(key).is_some()
    }

    /// Get a string value with a default
    pub fn get_string_default(&self, key: &str, default: &str) -> String {
        self.get_env_or_config(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a string value (empty string default)
    pub fn get_string(&self, key: &str) -> String {
        self.get_string_default(key, "")
    }

    pub fn get_bool_default(&self, key: &str, default: bool) -> bool {
        match self.get_env_or_config(key) {
            Some(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes"),
            None => default,
        }
    }

    pub fn get_int_default(&self, key: &str, default: i32) -> i32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    pub fn get_float_default(&self, key: &str, default: f32) -> f32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Try environment variable first, then config file
    fn get_env_or_config(&self, key: &str) -> Option<String> {
        if !self.env_prefix.is_empty() {
            let env_key = format!("{}{}", self.env_prefix, key.replace('.', "_"));
            if let Ok(val) = std::env::var(&env_key) {
                return Some(val);
            }
        }

        self.values.get(key).cloned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.get_int_default("nonexistent", 42), 42);
        assert_eq!(config.get_string_default("nonexistent", "hello"), "hello");
        assert!(config.get_bool_default("nonexistent", true));
    }

    #[test]
    fn test_sections_and_quotes() {
        let mut config = Config::new();
        config.load_str(
            "# navtool\nLogLevel = 3\n[Build]\nThreads = 4\nSettingsFile = \"settings.json\"\nKeepIntermediate = yes\n",
        );
        assert_eq!(config.get_int_default("LogLevel", 2), 3);
        assert_eq!(config.get_int_default("Build.Threads", 1), 4);
        assert_eq!(config.get_string("Build.SettingsFile"), "settings.json");
        assert!(config.get_bool_default("Build.KeepIntermediate", false));
        assert!(!config.is_set("Threads"));
    }

    #[test]
    fn test_missing_file() {
        let mut config = Config::new();
        assert!(!config.set_source("/definitely/not/here/navtool.conf", "Navtool_"));
    }
}
