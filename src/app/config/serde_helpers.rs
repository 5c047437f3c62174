use super::ConfigError;

/// Parses `name` into `target` when the variable is set; keeps the current
/// value otherwise.
pub fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

pub fn load_env_var_opt<T>(name: &str, target: &mut Option<T>) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        let parsed = value
            .trim()
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
        *target = Some(parsed);
    }
    Ok(())
}

pub fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

/// Like [`load_env_var`] for clap value enums, matched case-insensitively.
pub fn load_env_enum<T: clap::ValueEnum>(name: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(name) {
        *target = T::from_str(value.trim(), true)
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

/// Accepts the spellings people actually put in environment files.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn load_env_bool(name: &str, target: &mut bool) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(name) {
        *target = parse_bool(&value)
            .ok_or_else(|| ConfigError::EnvError(format!("Invalid {name}: {value}")))?;
    }
    Ok(())
}
