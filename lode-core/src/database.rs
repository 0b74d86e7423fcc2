use crate::{
    Compile, DatabaseError, DatabaseErrorKind, Error, Expr, Result, Statement, Uri, Value,
    tracer::tracers,
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// What a driver hands back for one statement.
#[derive(Clone, Debug, Default)]
pub struct RawResult {
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
    /// Identity generated for an INSERT, when the backend has one.
    pub last_insert_id: Option<i64>,
}

impl RawResult {
    /// The single row of a query expected to return at most one.
    pub fn get_one(mut self) -> Option<Vec<Value>> {
        if self.rows.is_empty() {
            None
        } else {
            Some(self.rows.swap_remove(0))
        }
    }
}

/// The contract a driver implements: synchronous statement execution over
/// one open connection. Statements arrive with the dialect's parameter
/// markers already in place.
pub trait RawConnection {
    fn execute(
        &mut self,
        statement: &str,
        params: &[Value],
    ) -> std::result::Result<RawResult, DatabaseError>;

    fn commit(&mut self) -> std::result::Result<(), DatabaseError>;

    fn rollback(&mut self) -> std::result::Result<(), DatabaseError>;

    fn close(&mut self);

    /// Cap the running time of subsequent statements. Backends without
    /// the capability keep the default.
    fn set_statement_timeout(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<(), DatabaseError> {
        Err(DatabaseError::new(
            DatabaseErrorKind::NotSupported,
            "statement timeouts are not supported by this backend",
        ))
    }
}

/// A live connection: compiles expressions with its dialect, translates
/// parameter markers, runs the tracer chain around every statement and
/// classifies driver failures.
pub struct Connection {
    raw: Box<dyn RawConnection>,
    compile: Arc<Compile>,
    param_mark: &'static str,
    closed: bool,
}

impl Connection {
    pub fn new(raw: Box<dyn RawConnection>, compile: Arc<Compile>, param_mark: &'static str) -> Self {
        Self {
            raw,
            compile,
            param_mark,
            closed: false,
        }
    }

    pub fn compile(&self) -> &Arc<Compile> {
        &self.compile
    }

    /// Compile and run an expression statement.
    pub fn execute(&mut self, expr: &Expr) -> Result<RawResult> {
        let statement = self.compile.compile(expr)?;
        let params = statement.parameter_values()?;
        self.execute_statement(&statement, &params)
    }

    pub fn execute_statement(&mut self, statement: &Statement, params: &[Value]) -> Result<RawResult> {
        self.execute_raw(&statement.text, params)
    }

    /// Run literal SQL written with `?` markers.
    pub fn execute_raw(&mut self, statement: &str, params: &[Value]) -> Result<RawResult> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let statement = convert_param_marks(statement, "?", self.param_mark);
        for tracer in tracers() {
            tracer.connection_raw_execute(self.raw.as_mut(), &statement, params)?;
        }
        match self.raw.execute(&statement, params) {
            Ok(result) => {
                for tracer in tracers() {
                    tracer.connection_raw_execute_success(&statement, params);
                }
                Ok(result)
            }
            Err(error) => {
                let error = Error::Database(error);
                for tracer in tracers() {
                    tracer.connection_raw_execute_error(&statement, params, &error);
                }
                Err(error)
            }
        }
    }

    pub fn commit(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.raw.commit()?;
        for tracer in tracers() {
            tracer.connection_commit();
        }
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.raw.rollback()?;
        for tracer in tracers() {
            tracer.connection_rollback();
        }
        Ok(())
    }

    /// Close is idempotent; anything executed afterwards fails with a
    /// closed-connection error.
    pub fn close(&mut self) {
        if !self.closed {
            self.raw.close();
            self.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Swap parameter markers outside of string literals. The statement is
/// split on single quotes; every other piece is literal text where no
/// replacement may happen.
pub fn convert_param_marks(statement: &str, from: &str, to: &str) -> String {
    if from == to || !statement.contains(from) {
        return statement.to_string();
    }
    let mut out = String::with_capacity(statement.len());
    for (i, piece) in statement.split('\'').enumerate() {
        if i > 0 {
            out.push('\'');
        }
        if i % 2 == 0 {
            out.push_str(&piece.replace(from, to));
        } else {
            out.push_str(piece);
        }
    }
    out
}

/// A database a store can connect to.
pub trait Database {
    fn connect(&self) -> Result<Connection>;
}

pub type DatabaseFactory = fn(&Uri) -> Result<Box<dyn Database>>;

static SCHEMES: Lazy<RwLock<HashMap<String, DatabaseFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Make `scheme://...` URIs resolve to databases built by `factory`.
pub fn register_scheme(scheme: &str, factory: DatabaseFactory) {
    SCHEMES.write().insert(scheme.to_string(), factory);
}

/// Resolve a URI to a database through the scheme registry. The in-tree
/// `memory:` scheme is always available.
pub fn create_database(uri: &str) -> Result<Box<dyn Database>> {
    crate::memory::register_builtin_scheme();
    let uri = Uri::parse(uri)?;
    let factory = SCHEMES
        .read()
        .get(&uri.scheme)
        .copied()
        .ok_or_else(|| Error::Uri(format!("unknown scheme {:?}", uri.scheme).into()))?;
    factory(&uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_marks_skip_string_literals() {
        assert_eq!(
            convert_param_marks("SELECT ? WHERE x = '?' AND y = ?", "?", "%s"),
            "SELECT %s WHERE x = '?' AND y = %s",
        );
        assert_eq!(convert_param_marks("SELECT 1", "?", "%s"), "SELECT 1");
    }
}
