use std::{env, str::FromStr};

/// Parse an `envvar` as `T`. Return `fallback` if env missing or parsing fails.
pub fn parse_env_or<T: FromStr>(envvar: &str, fallback: T) -> T {
    env::var(envvar)
        .map(|s| T::from_str(&s).ok())
        .ok()
        .flatten()
        .unwrap_or(fallback)
}

/// Read an optional env var, treating an empty string as unset.
pub fn env_opt(envvar: &str) -> Option<String> {
    env::var(envvar).ok().filter(|s| !s.is_empty())
}
