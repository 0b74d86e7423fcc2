use crate::{Error, RawConnection, Result, Value};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::{any::Any, fmt::Write as _, io::Write, sync::Arc, time::Duration};

/// Observes (and may veto) the statements a connection runs. All methods
/// default to doing nothing, implementors pick the ones they care about.
/// An error from [`Tracer::connection_raw_execute`] aborts the statement
/// before it reaches the backend.
pub trait Tracer: Send + Sync {
    fn connection_raw_execute(
        &self,
        _raw: &mut dyn RawConnection,
        _statement: &str,
        _params: &[Value],
    ) -> Result<()> {
        Ok(())
    }

    fn connection_raw_execute_success(&self, _statement: &str, _params: &[Value]) {}

    fn connection_raw_execute_error(&self, _statement: &str, _params: &[Value], _error: &Error) {}

    fn connection_commit(&self) {}

    fn connection_rollback(&self) {}

    /// For [`remove_tracer_type`].
    fn as_any(&self) -> &dyn Any;
}

static TRACERS: Lazy<RwLock<Vec<Arc<dyn Tracer>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// The installed tracers, in installation order.
pub fn tracers() -> Vec<Arc<dyn Tracer>> {
    TRACERS.read().clone()
}

pub fn install_tracer(tracer: Arc<dyn Tracer>) {
    TRACERS.write().push(tracer);
}

/// Remove one specific tracer instance.
pub fn remove_tracer(tracer: &Arc<dyn Tracer>) {
    TRACERS.write().retain(|t| !Arc::ptr_eq(t, tracer));
}

/// Remove every installed tracer of a concrete type.
pub fn remove_tracer_type<T: Tracer + 'static>() {
    TRACERS.write().retain(|t| !t.as_any().is::<T>());
}

pub fn remove_all_tracers() {
    TRACERS.write().clear();
}

/// Toggle statement debugging: installs or removes a [`DebugTracer`].
pub fn debug(flag: bool) {
    remove_tracer_type::<DebugTracer>();
    if flag {
        install_tracer(Arc::new(DebugTracer::new()));
    }
}

enum DebugSink {
    Log,
    Writer(Mutex<Box<dyn Write + Send>>),
}

/// Logs every statement with its parameters and outcome.
pub struct DebugTracer {
    sink: DebugSink,
}

impl DebugTracer {
    /// Goes through the `log` crate at debug level.
    pub fn new() -> Self {
        Self {
            sink: DebugSink::Log,
        }
    }

    /// Writes lines to `writer` instead.
    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: DebugSink::Writer(Mutex::new(Box::new(writer))),
        }
    }

    fn line(&self, message: &str) {
        match &self.sink {
            DebugSink::Log => log::debug!("{message}"),
            DebugSink::Writer(writer) => {
                let now = time::OffsetDateTime::now_utc().time();
                let _ = writeln!(writer.lock(), "[{now}] {message}");
            }
        }
    }
}

impl Default for DebugTracer {
    fn default() -> Self {
        Self::new()
    }
}

fn render_params(params: &[Value]) -> String {
    let mut out = String::from("(");
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{param}");
    }
    out.push(')');
    out
}

impl Tracer for DebugTracer {
    fn connection_raw_execute(
        &self,
        _raw: &mut dyn RawConnection,
        statement: &str,
        params: &[Value],
    ) -> Result<()> {
        self.line(&format!("EXECUTE: {statement} {}", render_params(params)));
        Ok(())
    }

    fn connection_raw_execute_success(&self, _statement: &str, _params: &[Value]) {
        self.line("DONE");
    }

    fn connection_raw_execute_error(&self, _statement: &str, _params: &[Value], error: &Error) {
        self.line(&format!("ERROR: {error}"));
    }

    fn connection_commit(&self) {
        self.line("COMMIT");
    }

    fn connection_rollback(&self) {
        self.line("ROLLBACK");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Enforces a per-transaction time budget. Before each statement the
/// remaining budget is asked of `remaining`; a zero budget aborts the
/// statement, otherwise the backend's statement timeout is updated
/// whenever it drifted by more than `granularity` from the last value
/// set, to avoid hammering the backend with timeout changes.
pub struct TimeoutTracer {
    remaining: Box<dyn Fn() -> Duration + Send + Sync>,
    granularity: Duration,
    last_set: Mutex<Option<Duration>>,
}

impl TimeoutTracer {
    pub fn new(remaining: impl Fn() -> Duration + Send + Sync + 'static) -> Self {
        Self {
            remaining: Box::new(remaining),
            granularity: Duration::from_secs(5),
            last_set: Mutex::new(None),
        }
    }

    pub fn with_granularity(mut self, granularity: Duration) -> Self {
        self.granularity = granularity;
        self
    }
}

impl Tracer for TimeoutTracer {
    fn connection_raw_execute(
        &self,
        raw: &mut dyn RawConnection,
        _statement: &str,
        _params: &[Value],
    ) -> Result<()> {
        let remaining = (self.remaining)();
        if remaining.is_zero() {
            return Err(Error::Timeout("transaction time budget exhausted".into()));
        }
        let mut last_set = self.last_set.lock();
        let drifted = match *last_set {
            Some(last) => {
                let drift = if last > remaining {
                    last - remaining
                } else {
                    remaining - last
                };
                drift >= self.granularity
            }
            None => true,
        };
        if drifted {
            raw.set_statement_timeout(remaining)?;
            *last_set = Some(remaining);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Records statements for inspection; meant for tests.
#[derive(Default)]
pub struct CaptureTracer {
    log: Mutex<Vec<(String, Vec<Value>)>>,
}

impl CaptureTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn entries(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl Tracer for CaptureTracer {
    fn connection_raw_execute(
        &self,
        _raw: &mut dyn RawConnection,
        statement: &str,
        params: &[Value],
    ) -> Result<()> {
        self.log
            .lock()
            .push((statement.to_string(), params.to_vec()));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
