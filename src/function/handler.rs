//! Function handler reference, its resolution, and the context passed to it.

use crate::error::ShimError;
use crate::runtime::ShimConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

/// Execution context shared by every invocation.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionContext {
    /// Name of the resolved handler.
    pub function_name: String,
    /// Invocation timeout in seconds.
    pub timeout: f64,
    /// Runtime label.
    pub runtime: Option<String>,
    /// Memory limit label.
    pub memory_limit: Option<String>,
}

impl FunctionContext {
    /// Create a new function context with the default 180s timeout.
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            timeout: 180.0,
            runtime: None,
            memory_limit: None,
        }
    }

    /// Set the timeout in seconds.
    pub fn with_timeout(mut self, timeout: f64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the runtime label.
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    /// Set the memory limit label.
    pub fn with_memory_limit(mut self, memory_limit: impl Into<String>) -> Self {
        self.memory_limit = Some(memory_limit.into());
        self
    }

    /// Copy handed to worker processes.
    pub fn to_wire(&self) -> fnshim_sdk::Context {
        fnshim_sdk::Context {
            function_name: self.function_name.clone(),
            timeout: self.timeout,
            runtime: self.runtime.clone(),
            memory_limit: self.memory_limit.clone(),
        }
    }
}

/// Converts a timeout in seconds to a `Duration`.
///
/// Zero, negative and NaN timeouts yield `None`; values too large to
/// represent saturate to `Duration::MAX`.
pub fn timeout_duration(seconds: f64) -> Option<Duration> {
    if !(seconds > 0.0) {
        return None;
    }
    Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}

/// A resolved handler: the program a worker process runs for each invocation.
///
/// Opaque to the request pipeline, which only hands it to an invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Handler {
    /// Create a handler that runs `program` with no arguments.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append a program argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable for the worker.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command for one worker: piped stdin/stdout, inherited stderr, killed
    /// when the owning `Child` is dropped. On Unix the worker leads a new
    /// process group so everything it starts can be killed with it.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

/// Resolves the configured function into a [`Handler`], once, at startup.
pub trait HandlerProvider {
    fn resolve(&self) -> Result<Handler, ShimError>;
}

/// Resolves `MOD_NAME` to an executable inside the module directory and
/// passes `FUNC_HANDLER` to it as its first argument.
#[derive(Debug, Clone)]
pub struct ModuleProvider {
    module_dir: PathBuf,
    module_name: String,
    handler_name: String,
    worker_env: Vec<(String, String)>,
}

impl ModuleProvider {
    pub fn new(
        module_dir: impl Into<PathBuf>,
        module_name: impl Into<String>,
        handler_name: impl Into<String>,
    ) -> Self {
        Self {
            module_dir: module_dir.into(),
            module_name: module_name.into(),
            handler_name: handler_name.into(),
            worker_env: Vec::new(),
        }
    }

    /// Provider for the module named in `config`. Workers also receive the
    /// function's timeout and labels in their environment.
    pub fn from_config(config: &ShimConfig) -> Self {
        let mut provider = Self::new(
            &config.module_dir,
            &config.module_name,
            &config.handler_name,
        );
        provider
            .worker_env
            .push(("FUNC_TIMEOUT".to_string(), config.timeout.to_string()));
        if let Some(runtime) = &config.runtime {
            provider
                .worker_env
                .push(("FUNC_RUNTIME".to_string(), runtime.clone()));
        }
        if let Some(memory_limit) = &config.memory_limit {
            provider
                .worker_env
                .push(("FUNC_MEMORY_LIMIT".to_string(), memory_limit.clone()));
        }
        provider
    }
}

impl HandlerProvider for ModuleProvider {
    fn resolve(&self) -> Result<Handler, ShimError> {
        let program = self.module_dir.join(&self.module_name);
        if !program.is_file() {
            return Err(ShimError::ModuleNotFound(program));
        }

        let mut handler = Handler::new(
            format!("{}.{}", self.module_name, self.handler_name),
            program,
        )
        .arg(&self.handler_name)
        .env("MOD_NAME", &self.module_name)
        .env("FUNC_HANDLER", &self.handler_name);
        for (key, value) in &self.worker_env {
            handler = handler.env(key, value);
        }

        info!(
            "Resolved handler '{}' to {}",
            handler.name(),
            handler.program().display()
        );
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_duration() {
        assert_eq!(timeout_duration(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(timeout_duration(0.0), None);
        assert_eq!(timeout_duration(-3.0), None);
        assert_eq!(timeout_duration(f64::NAN), None);
        assert_eq!(timeout_duration(f64::INFINITY), Some(Duration::MAX));
    }

    #[test]
    fn test_context_to_wire() {
        let ctx = FunctionContext::new("hello.handler")
            .with_timeout(3.0)
            .with_runtime("rust1.80")
            .with_memory_limit("128Mi");
        let wire = ctx.to_wire();
        assert_eq!(wire.function_name, "hello.handler");
        assert_eq!(wire.timeout, 3.0);
        assert_eq!(wire.runtime.as_deref(), Some("rust1.80"));
        assert_eq!(wire.memory_limit.as_deref(), Some("128Mi"));
    }

    #[test]
    fn test_module_not_found() {
        let provider = ModuleProvider::new("/nonexistent-fnshim-dir", "hello", "handler");
        match provider.resolve() {
            Err(ShimError::ModuleNotFound(path)) => {
                assert_eq!(path, PathBuf::from("/nonexistent-fnshim-dir/hello"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_module_resolves_to_executable() {
        let provider = ModuleProvider::new("/bin", "sh", "handler");
        let handler = provider.resolve().unwrap();
        assert_eq!(handler.name(), "sh.handler");
        assert_eq!(handler.program(), Path::new("/bin/sh"));
        assert_eq!(handler.args, vec!["handler".to_string()]);
        assert!(handler
            .env
            .contains(&("FUNC_HANDLER".to_string(), "handler".to_string())));
    }

    #[test]
    fn test_provider_from_config_passes_labels() {
        let config = ShimConfig::new()
            .module("/bin", "sh", "main")
            .runtime("custom")
            .timeout(2.5);
        let handler = ModuleProvider::from_config(&config).resolve().unwrap();
        assert!(handler
            .env
            .contains(&("FUNC_RUNTIME".to_string(), "custom".to_string())));
        assert!(handler
            .env
            .contains(&("FUNC_TIMEOUT".to_string(), "2.5".to_string())));
    }
}
