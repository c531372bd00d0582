use std::path::PathBuf;

/// Overrides the directory holding the store database and the engine work dir.
pub const HOME_VAR: &str = "PHPBOX_HOME";

pub fn env_truthy_with<F>(var: &str, env_get: &F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    env_get(var).map(|value| is_truthy(&value)).unwrap_or(false)
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `$PHPBOX_HOME`, else `<config dir>/phpbox`, else `./.phpbox`.
pub fn data_dir_with<F>(env_get: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(home) = env_get(HOME_VAR).filter(|value| !value.trim().is_empty()) {
        return PathBuf::from(home);
    }
    dirs::config_dir()
        .map(|dir| dir.join("phpbox"))
        .unwrap_or_else(|| PathBuf::from(".phpbox"))
}

pub fn data_dir() -> PathBuf {
    data_dir_with(&|key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for value in ["1", "true", "YES", " on "] {
            assert!(is_truthy(value), "{} should be truthy", value);
        }
        for value in ["0", "false", "", "off", "maybe"] {
            assert!(!is_truthy(value), "{} should be falsy", value);
        }
    }

    #[test]
    fn env_truthy_reads_through_getter() {
        let get = |key: &str| (key == "PHPBOX_DEBUG").then(|| "1".to_string());
        assert!(env_truthy_with("PHPBOX_DEBUG", &get));
        assert!(!env_truthy_with("OTHER", &get));
    }

    #[test]
    fn home_override_wins() {
        let get = |key: &str| (key == HOME_VAR).then(|| "/tmp/phpbox-home".to_string());
        assert_eq!(data_dir_with(&get), PathBuf::from("/tmp/phpbox-home"));
    }
}
