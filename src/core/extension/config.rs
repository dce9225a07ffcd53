use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default per-extension RPC timeout, seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Transport configuration for one extension, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtensionConfig {
    Sse {
        name: String,
        #[serde(default)]
        description: String,
        uri: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        envs: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        env_keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        available_tools: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    Stdio {
        name: String,
        #[serde(default)]
        description: String,
        cmd: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        envs: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        env_keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        available_tools: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    Builtin {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default)]
        description: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        available_tools: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    Platform {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        available_tools: Vec<String>,
    },
    StreamableHttp {
        name: String,
        #[serde(default)]
        description: String,
        uri: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        envs: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        env_keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        available_tools: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    Frontend {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        tools: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        available_tools: Vec<String>,
    },
    InlinePython {
        name: String,
        #[serde(default)]
        description: String,
        code: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        dependencies: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        available_tools: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
}

impl ExtensionConfig {
    pub fn name(&self) -> &str {
        match self {
            ExtensionConfig::Sse { name, .. }
            | ExtensionConfig::Stdio { name, .. }
            | ExtensionConfig::Builtin { name, .. }
            | ExtensionConfig::Platform { name, .. }
            | ExtensionConfig::StreamableHttp { name, .. }
            | ExtensionConfig::Frontend { name, .. }
            | ExtensionConfig::InlinePython { name, .. } => name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ExtensionConfig::Sse { description, .. }
            | ExtensionConfig::Stdio { description, .. }
            | ExtensionConfig::Builtin { description, .. }
            | ExtensionConfig::Platform { description, .. }
            | ExtensionConfig::StreamableHttp { description, .. }
            | ExtensionConfig::Frontend { description, .. }
            | ExtensionConfig::InlinePython { description, .. } => description,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ExtensionConfig::Sse { .. } => "sse",
            ExtensionConfig::Stdio { .. } => "stdio",
            ExtensionConfig::Builtin { .. } => "builtin",
            ExtensionConfig::Platform { .. } => "platform",
            ExtensionConfig::StreamableHttp { .. } => "streamable_http",
            ExtensionConfig::Frontend { .. } => "frontend",
            ExtensionConfig::InlinePython { .. } => "inline_python",
        }
    }

    pub fn key(&self) -> String {
        name_to_key(self.name())
    }

    pub fn timeout_secs(&self) -> u64 {
        match self {
            ExtensionConfig::Sse { timeout, .. }
            | ExtensionConfig::Stdio { timeout, .. }
            | ExtensionConfig::Builtin { timeout, .. }
            | ExtensionConfig::StreamableHttp { timeout, .. }
            | ExtensionConfig::InlinePython { timeout, .. } => {
                timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)
            }
            _ => DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn envs(&self) -> HashMap<String, String> {
        match self {
            ExtensionConfig::Sse { envs, .. }
            | ExtensionConfig::Stdio { envs, .. }
            | ExtensionConfig::StreamableHttp { envs, .. } => envs.clone(),
            _ => HashMap::new(),
        }
    }

    pub fn env_keys(&self) -> &[String] {
        match self {
            ExtensionConfig::Sse { env_keys, .. }
            | ExtensionConfig::Stdio { env_keys, .. }
            | ExtensionConfig::StreamableHttp { env_keys, .. } => env_keys,
            _ => &[],
        }
    }

    pub fn available_tools(&self) -> &[String] {
        match self {
            ExtensionConfig::Sse {
                available_tools, ..
            }
            | ExtensionConfig::Stdio {
                available_tools, ..
            }
            | ExtensionConfig::Builtin {
                available_tools, ..
            }
            | ExtensionConfig::Platform {
                available_tools, ..
            }
            | ExtensionConfig::StreamableHttp {
                available_tools, ..
            }
            | ExtensionConfig::Frontend {
                available_tools, ..
            }
            | ExtensionConfig::InlinePython {
                available_tools, ..
            } => available_tools,
        }
    }

    /// An empty `available_tools` list allows every tool.
    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        let allowed = self.available_tools();
        allowed.is_empty() || allowed.iter().any(|t| t == tool_name)
    }

    /// Substitute `${VAR}` / `$VAR` in uri, cmd, args and header values,
    /// drawing first from `envs` and then from the process environment.
    /// Unresolved placeholders stay literal.
    pub fn substitute_env_vars(&mut self, envs: &HashMap<String, String>) {
        match self {
            ExtensionConfig::Sse { uri, .. } => {
                *uri = substitute(uri, envs);
            }
            ExtensionConfig::Stdio { cmd, args, .. } => {
                *cmd = substitute(cmd, envs);
                for arg in args.iter_mut() {
                    *arg = substitute(arg, envs);
                }
            }
            ExtensionConfig::StreamableHttp { uri, headers, .. } => {
                *uri = substitute(uri, envs);
                for value in headers.values_mut() {
                    *value = substitute(value, envs);
                }
            }
            _ => {}
        }
    }
}

/// Normalise an extension name to its map key: lowercase, whitespace
/// stripped.
pub fn name_to_key(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split a prefixed tool name on the first `__`.
pub fn parse_prefixed_tool_name(prefixed: &str) -> Option<(&str, &str)> {
    prefixed.split_once("__")
}

pub fn prefix_tool_name(extension_key: &str, tool_name: &str) -> String {
    format!("{}__{}", extension_key, tool_name)
}

/// Environment variables an extension is never allowed to set.
const DISALLOWED_ENV_KEYS: &[&str] = &[
    // Binary path manipulation
    "PATH",
    "PATHEXT",
    "SystemRoot",
    "windir",
    // Dynamic linker hijacking (Linux)
    "LD_LIBRARY_PATH",
    "LD_PRELOAD",
    "LD_AUDIT",
    "LD_DEBUG",
    "LD_BIND_NOW",
    "LD_ASSUME_KERNEL",
    // macOS dynamic linker
    "DYLD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_FRAMEWORK_PATH",
    // Interpreter and toolchain hijacking
    "PYTHONPATH",
    "PYTHONHOME",
    "NODE_OPTIONS",
    "RUBYOPT",
    "GEM_PATH",
    "GEM_HOME",
    "CLASSPATH",
    "GO111MODULE",
    "GOROOT",
    // Windows process & DLL hijacking
    "APPINIT_DLLS",
    "SESSIONNAME",
    "ComSpec",
    "TEMP",
    "TMP",
    "LOCALAPPDATA",
    "USERPROFILE",
    "HOMEDRIVE",
    "HOMEPATH",
];

pub fn is_env_key_disallowed(key: &str) -> bool {
    DISALLOWED_ENV_KEYS
        .iter()
        .any(|d| d.eq_ignore_ascii_case(key))
}

/// Drop disallowed keys (case-insensitively) from an env map.
pub fn validate_envs(envs: &HashMap<String, String>) -> HashMap<String, String> {
    envs.iter()
        .filter(|(k, _)| !is_env_key_disallowed(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn substitute(input: &str, envs: &HashMap<String, String>) -> String {
    static ENV_VAR_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = ENV_VAR_RE.get_or_init(|| {
        Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("static env pattern")
    });
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let var = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        if let Some(value) = envs.get(var) {
            return value.clone();
        }
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return value;
            }
        }
        caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_lowercased_and_whitespace_stripped() {
        assert_eq!(name_to_key("My Cool  Extension"), "mycoolextension");
        assert_eq!(name_to_key("Tabs\tToo"), "tabstoo");
        assert_eq!(name_to_key("  \t "), "");
    }

    #[test]
    fn prefixing_splits_on_first_double_underscore() {
        let prefixed = prefix_tool_name("dev", "run__tests");
        assert_eq!(prefixed, "dev__run__tests");
        let (key, tool) = parse_prefixed_tool_name(&prefixed).unwrap();
        assert_eq!(key, "dev");
        assert_eq!(tool, "run__tests");
        assert!(parse_prefixed_tool_name("noseparator").is_none());
    }

    #[test]
    fn prefixing_is_a_bijection_without_double_underscores() {
        for (key, tool) in [("todo", "add"), ("a", "b"), ("my_ext", "do_thing")] {
            let prefixed = prefix_tool_name(key, tool);
            let (k, t) = parse_prefixed_tool_name(&prefixed).unwrap();
            assert_eq!((k, t), (key, tool));
        }
    }

    #[test]
    fn disallowed_envs_are_dropped_case_insensitively() {
        let mut envs = HashMap::new();
        envs.insert("PATH".to_string(), "/evil".to_string());
        envs.insert("ld_preload".to_string(), "/evil.so".to_string());
        envs.insert("Pythonpath".to_string(), "/evil".to_string());
        envs.insert("API_KEY".to_string(), "ok".to_string());

        let validated = validate_envs(&envs);
        assert_eq!(validated.len(), 1);
        assert_eq!(validated.get("API_KEY").map(String::as_str), Some("ok"));
    }

    #[test]
    fn every_disallowed_key_is_rejected() {
        for key in super::DISALLOWED_ENV_KEYS {
            let mut envs = HashMap::new();
            envs.insert(key.to_string(), "x".to_string());
            envs.insert(key.to_uppercase(), "x".to_string());
            envs.insert(key.to_lowercase(), "x".to_string());
            assert!(validate_envs(&envs).is_empty(), "{} leaked through", key);
        }
    }

    #[test]
    fn substitution_prefers_merged_envs_and_keeps_unresolved() {
        let mut envs = HashMap::new();
        envs.insert("TOKEN".to_string(), "secret".to_string());

        let mut config = ExtensionConfig::StreamableHttp {
            name: "remote".into(),
            description: String::new(),
            uri: "https://api.example.com/${TOKEN}/$MISSING_THING".into(),
            headers: HashMap::from([(
                "Authorization".to_string(),
                "Bearer ${TOKEN}".to_string(),
            )]),
            envs: HashMap::new(),
            env_keys: vec![],
            available_tools: vec![],
            timeout: None,
        };
        config.substitute_env_vars(&envs);

        match config {
            ExtensionConfig::StreamableHttp { uri, headers, .. } => {
                assert_eq!(uri, "https://api.example.com/secret/$MISSING_THING");
                assert_eq!(headers["Authorization"], "Bearer secret");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_available_tools_allows_all() {
        let config = ExtensionConfig::Platform {
            name: "todo".into(),
            description: String::new(),
            available_tools: vec![],
        };
        assert!(config.is_tool_available("anything"));

        let restricted = ExtensionConfig::Platform {
            name: "todo".into(),
            description: String::new(),
            available_tools: vec!["list".into()],
        };
        assert!(restricted.is_tool_available("list"));
        assert!(!restricted.is_tool_available("add"));
    }

    #[test]
    fn config_round_trips_with_type_tag() {
        let config = ExtensionConfig::Stdio {
            name: "dev tools".into(),
            description: "local tools".into(),
            cmd: "npx".into(),
            args: vec!["-y".into(), "server".into()],
            envs: HashMap::new(),
            env_keys: vec!["API_KEY".into()],
            available_tools: vec![],
            timeout: Some(60),
        };
        let encoded = serde_json::to_value(&config).unwrap();
        assert_eq!(encoded["type"], "stdio");
        let decoded: ExtensionConfig = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, config);
        assert_eq!(decoded.key(), "devtools");
    }
}
