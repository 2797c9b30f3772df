//! Secret references in `config.toml`.
//!
//! A value may point at a secret kept outside the file:
//!
//! - `pass::path/in/store` runs `pass show path/in/store` and takes the first line
//! - `env::VAR_NAME` reads `$VAR_NAME`
//!
//! Anything else is used verbatim.

pub fn resolve(value: &str) -> Result<String, String> {
    if let Some(path) = value.strip_prefix("pass::") {
        from_pass(path)
    } else if let Some(var) = value.strip_prefix("env::") {
        std::env::var(var).map_err(|_| format!("environment variable `{var}` is not set"))
    } else {
        Ok(value.to_string())
    }
}

/// Resolves an optional value, failing with `missing` when it is absent.
pub fn resolve_required(value: Option<&str>, missing: &str) -> Result<String, String> {
    let raw = value.ok_or_else(|| missing.to_string())?;
    let resolved = resolve(raw)?;
    if resolved.trim().is_empty() {
        return Err(missing.to_string());
    }
    Ok(resolved)
}

fn from_pass(path: &str) -> Result<String, String> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| format!("failed to run `pass show {path}`: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "`pass show {path}` failed ({}): {}",
            output.status,
            stderr.trim()
        ));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| format!("`pass show {path}` produced no output"))
}
