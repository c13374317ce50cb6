//! Code step runner: user transforms in a restricted Lua sandbox.
//!
//! A code step's source is a Lua chunk that evaluates to one function,
//! `function(input) ... end`. The sandbox has no `io`, `os`, `package` or
//! `debug` libraries, no way to load further code, and no `pcall`/`xpcall`
//! to swallow the timeout error. Memory is capped and an instruction hook
//! enforces a hard wall-clock timeout.
//!
//! A single long C call (a backtracking `string.find`, say) never reaches
//! the hook. The caller stops waiting once the timeout plus a short grace
//! period has passed; the interpreter thread is abandoned and finishes on
//! its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, Value, VmState};
use regex::Regex;
use tracing::{debug, instrument, warn};

use docflow_shared::{CodeConfig, DocflowError, Result};

use crate::input::StepInput;

/// Instructions between deadline checks.
const HOOK_INSTRUCTION_INTERVAL: u32 = 1_000;

/// Extra wait past the timeout before the caller gives up on the sandbox thread.
const JOIN_GRACE: Duration = Duration::from_millis(100);

/// Globals removed from the base library.
const BLOCKED_GLOBALS: &[&str] = &[
    "load",
    "loadfile",
    "dofile",
    "require",
    "collectgarbage",
    "pcall",
    "xpcall",
];

/// Output of a single code step invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeOutput {
    pub text: String,
    /// Time spent inside the transform function.
    pub timing_ms: f64,
}

/// Executes code steps under fixed resource limits.
#[derive(Debug, Clone)]
pub struct CodeRunner {
    timeout: Duration,
    memory_limit_bytes: usize,
}

impl Default for CodeRunner {
    fn default() -> Self {
        Self::new(&CodeConfig::default())
    }
}

impl CodeRunner {
    pub fn new(config: &CodeConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            memory_limit_bytes: config.memory_limit_mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load `code` into a fresh sandbox and call it with `input`.
    ///
    /// The interpreter runs on the blocking pool; the caller is suspended
    /// until the transform returns or the timeout (plus grace) expires.
    #[instrument(skip_all, fields(step = step_id))]
    pub async fn execute(
        &self,
        step_id: &str,
        code: &str,
        input: StepInput,
    ) -> Result<CodeOutput> {
        let runtime_err = |message: String| DocflowError::CodeRuntime {
            step_id: step_id.to_string(),
            message,
        };

        let source = strip_code_fences(code);
        let runner = self.clone();
        let id = step_id.to_string();
        let task = tokio::task::spawn_blocking(move || runner.run_blocking(&id, &source, input));

        let joined = match tokio::time::timeout(self.timeout + JOIN_GRACE, task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("sandbox did not yield after the timeout, abandoning it");
                return Err(runtime_err(self.timeout_message()));
            }
        };
        let output = joined.map_err(|e| runtime_err(format!("sandbox task failed: {e}")))??;

        debug!(timing_ms = output.timing_ms, "code step finished");
        Ok(output)
    }

    fn run_blocking(&self, step_id: &str, source: &str, input: StepInput) -> Result<CodeOutput> {
        let load_err = |message: String| DocflowError::ModuleLoad {
            step_id: step_id.to_string(),
            message,
        };
        let runtime_err = |message: String| DocflowError::CodeRuntime {
            step_id: step_id.to_string(),
            message,
        };

        let deadline = Instant::now() + self.timeout;
        let timed_out = Arc::new(AtomicBool::new(false));
        let lua = self
            .sandbox(deadline, timed_out.clone())
            .map_err(|e| load_err(format!("sandbox setup failed: {e}")))?;

        let transform = match lua
            .load(source)
            .set_name(format!("step:{step_id}"))
            .eval::<Value>()
        {
            Ok(Value::Function(f)) => f,
            Ok(other) => {
                return Err(load_err(format!(
                    "code must evaluate to a function, got {}",
                    other.type_name()
                )));
            }
            Err(e) => return Err(load_err(self.describe(&e, &timed_out))),
        };

        let arg = match input {
            StepInput::Text(text) => lua.create_string(&text).map(Value::String),
            StepInput::List(items) => lua.create_sequence_from(items).map(Value::Table),
        }
        .map_err(|e| runtime_err(format!("could not pass input: {e}")))?;

        let started = Instant::now();
        let returned = call(&transform, arg)
            .map_err(|e| runtime_err(self.describe(&e, &timed_out)))?;
        let elapsed = started.elapsed();

        // The hook may have fired inside a finalizer, or a C call may have
        // overrun the deadline between checks.
        if timed_out.load(Ordering::Relaxed) || Instant::now() >= deadline {
            return Err(runtime_err(self.timeout_message()));
        }

        let text = match returned {
            Value::String(s) => s.to_string_lossy().to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Boolean(b) => b.to_string(),
            table @ Value::Table(_) => {
                let json: serde_json::Value = lua
                    .from_value(table)
                    .map_err(|e| runtime_err(format!("could not convert returned table: {e}")))?;
                serde_json::to_string(&json)
                    .map_err(|e| runtime_err(format!("could not serialize returned table: {e}")))?
            }
            Value::Nil => return Err(runtime_err("transform returned nil".into())),
            other => {
                return Err(runtime_err(format!(
                    "transform returned unsupported type {}",
                    other.type_name()
                )));
            }
        };

        Ok(CodeOutput {
            text,
            timing_ms: elapsed.as_secs_f64() * 1000.0,
        })
    }

    fn sandbox(&self, deadline: Instant, timed_out: Arc<AtomicBool>) -> mlua::Result<Lua> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )?;
        lua.set_memory_limit(self.memory_limit_bytes)?;

        let globals = lua.globals();
        for name in BLOCKED_GLOBALS {
            globals.set(*name, Value::Nil)?;
        }

        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
            move |_lua, _debug| {
                if Instant::now() >= deadline {
                    timed_out.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::runtime("execution timed out"));
                }
                Ok(VmState::Continue)
            },
        );

        Ok(lua)
    }

    fn describe(&self, err: &mlua::Error, timed_out: &AtomicBool) -> String {
        if timed_out.load(Ordering::Relaxed) {
            return self.timeout_message();
        }
        match err {
            mlua::Error::MemoryError(_) => format!(
                "exceeded memory limit of {} MiB",
                self.memory_limit_bytes / (1024 * 1024)
            ),
            other => other.to_string(),
        }
    }

    fn timeout_message(&self) -> String {
        format!("exceeded timeout of {} ms", self.timeout.as_millis())
    }
}

fn call(transform: &Function, arg: Value) -> mlua::Result<Value> {
    transform.call::<Value>(arg)
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
pub fn strip_code_fences(code: &str) -> String {
    static OPEN_FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*```[^\n]*\n").expect("valid regex"));
    static CLOSE_FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n?```\s*$").expect("valid regex"));

    let without_open = OPEN_FENCE_RE.replace(code, "");
    CLOSE_FENCE_RE.replace(&without_open, "").into_owned()
}
