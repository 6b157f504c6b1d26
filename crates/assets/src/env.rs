//! Snapshot of the process environment used for workspace detection.
//!
//! Detection never reads `std::env` directly; it works on an
//! [`Environment`] value so tests can inject any combination of variables,
//! home directory and working directory.

use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
    home: Option<PathBuf>,
    cwd: Option<PathBuf>,
}

impl Environment {
    /// Capture the real process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
            home: dirs::home_dir(),
            cwd: std::env::current_dir().ok(),
        }
    }

    /// An environment with no variables, home or working directory.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// A variable's value, with blank values treated as unset.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn home(&self) -> Option<&PathBuf> {
        self.home.as_ref()
    }

    pub fn cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }

    /// Home directory, or the OS temp directory when no home is known.
    pub fn home_or_temp(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::Environment;

    #[test]
    fn blank_variables_are_unset() {
        let env = Environment::empty()
            .with_var("PWD", "   ")
            .with_var("INIT_CWD", " /work ");
        assert_eq!(env.var("PWD"), None);
        assert_eq!(env.var("INIT_CWD"), Some("/work"));
        assert_eq!(env.var("MISSING"), None);
    }

    #[test]
    fn home_falls_back_to_temp() {
        let env = Environment::empty();
        assert_eq!(env.home_or_temp(), std::env::temp_dir());
        let env = env.with_home("/home/ana");
        assert_eq!(env.home_or_temp(), std::path::PathBuf::from("/home/ana"));
    }
}
