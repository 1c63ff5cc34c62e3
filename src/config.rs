//! Environment-sourced runtime configuration.
//!
//! Unlike the full provider/framework configuration a general-purpose runner
//! might read from a project file, `3pio`'s wrapping model takes its one
//! real input (the command to run) straight from argv — there is no config
//! file to load. What remains is a small set of environment-controlled
//! knobs, read once at startup into [`RunConfig`].

use std::env;

/// Runtime knobs sourced from the process environment. Constructed once in
/// `main` and threaded down to whatever needs it, rather than read from
/// `std::env` ad hoc throughout the codebase.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// `THREEPIO_DEBUG=1` raises the terminal log level to DEBUG and widens
    /// the adapters' own `.adapter.log` verbosity to match.
    pub debug: bool,
}

impl RunConfig {
    pub fn from_env() -> Self {
        Self {
            debug: env_flag("THREEPIO_DEBUG"),
        }
    }

    /// The log level baked into extracted adapters and used for the
    /// terminal subscriber's filter.
    pub fn log_level(&self) -> &'static str {
        if self.debug { "DEBUG" } else { "WARN" }
    }
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_follows_debug_flag() {
        let quiet = RunConfig { debug: false };
        let verbose = RunConfig { debug: true };
        assert_eq!(quiet.log_level(), "WARN");
        assert_eq!(verbose.log_level(), "DEBUG");
    }

    #[test]
    fn env_flag_accepts_common_truthy_spellings() {
        // SAFETY: tests run single-threaded within this process for this var.
        unsafe { env::set_var("THREEPIO_DEBUG_TEST_FLAG", "true") };
        assert!(env_flag("THREEPIO_DEBUG_TEST_FLAG"));
        unsafe { env::remove_var("THREEPIO_DEBUG_TEST_FLAG") };
        assert!(!env_flag("THREEPIO_DEBUG_TEST_FLAG"));
    }
}
