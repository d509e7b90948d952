//! Shim configuration, read from the environment at startup.

use crate::error::ShimError;
use crate::function::{FunctionContext, Handler, DEFAULT_MAX_OUTPUT};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the shim server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Directory holding the function module.
    pub module_dir: PathBuf,
    /// Module (worker executable) name.
    pub module_name: String,
    /// Handler name passed to the module.
    pub handler_name: String,
    /// Invocation timeout in seconds.
    pub timeout: f64,
    /// Runtime label.
    pub runtime: Option<String>,
    /// Memory limit label.
    pub memory_limit: Option<String>,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Maximum size in bytes of a worker's stdout.
    pub max_response_size: usize,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            module_dir: PathBuf::from("/kubeless"),
            module_name: String::new(),
            handler_name: String::new(),
            timeout: 180.0,
            runtime: None,
            memory_limit: None,
            max_body_size: 10 * 1024 * 1024, // 10MB
            max_response_size: DEFAULT_MAX_OUTPUT,
        }
    }
}

impl ShimConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ShimError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// `MOD_NAME` and `FUNC_HANDLER` are required; everything else falls
    /// back to [`ShimConfig::default`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ShimError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(ShimError::MissingEnv(name))
        };

        let config = Self {
            host: lookup("FUNC_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "FUNC_PORT", defaults.port)?,
            module_dir: lookup("FUNC_MODULE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.module_dir),
            module_name: required("MOD_NAME")?,
            handler_name: required("FUNC_HANDLER")?,
            timeout: parse_var(&lookup, "FUNC_TIMEOUT", defaults.timeout)?,
            runtime: lookup("FUNC_RUNTIME"),
            memory_limit: lookup("FUNC_MEMORY_LIMIT"),
            max_body_size: parse_var(&lookup, "FUNC_MAX_BODY_SIZE", defaults.max_body_size)?,
            max_response_size: parse_var(
                &lookup,
                "FUNC_MAX_RESPONSE_SIZE",
                defaults.max_response_size,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ShimError> {
        let invalid_timeout = |reason: &str| ShimError::InvalidEnv {
            name: "FUNC_TIMEOUT",
            value: self.timeout.to_string(),
            reason: reason.to_string(),
        };

        if !self.timeout.is_finite() {
            return Err(invalid_timeout("timeout must be a finite number of seconds"));
        }
        if self.timeout > 0.0 && Duration::try_from_secs_f64(self.timeout).is_err() {
            return Err(invalid_timeout("timeout is too large"));
        }
        Ok(())
    }

    /// Set the module directory, module name and handler name.
    pub fn module(
        mut self,
        module_dir: impl Into<PathBuf>,
        module_name: impl Into<String>,
        handler_name: impl Into<String>,
    ) -> Self {
        self.module_dir = module_dir.into();
        self.module_name = module_name.into();
        self.handler_name = handler_name.into();
        self
    }

    /// Set the timeout in seconds.
    pub fn timeout(mut self, timeout: f64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the runtime label.
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    /// Set the memory limit label.
    pub fn memory_limit(mut self, memory_limit: impl Into<String>) -> Self {
        self.memory_limit = Some(memory_limit.into());
        self
    }

    /// Set the maximum request body size.
    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Set the maximum worker output size.
    pub fn max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The context every invocation of `handler` receives.
    pub fn function_context(&self, handler: &Handler) -> FunctionContext {
        let mut context = FunctionContext::new(handler.name()).with_timeout(self.timeout);
        if let Some(runtime) = &self.runtime {
            context = context.with_runtime(runtime);
        }
        if let Some(memory_limit) = &self.memory_limit {
            context = context.with_memory_limit(memory_limit);
        }
        context
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ShimError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ShimError::InvalidEnv {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}
