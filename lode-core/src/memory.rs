use crate::{
    Connection, Database, DatabaseError, RawConnection, RawResult, Result, Uri, Value,
    register_scheme, standard_compile,
};
use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
    sync::Once,
    time::Duration,
};

/// Shared state behind a memory database: the statement log, the scripted
/// results to hand out and transaction counters. Tests keep a handle on
/// it to script responses and to assert on what was executed.
#[derive(Default)]
pub struct MemoryState {
    pub statements: Vec<(String, Vec<Value>)>,
    pub results: VecDeque<RawResult>,
    pub next_id: i64,
    pub commits: usize,
    pub rollbacks: usize,
    pub statement_timeout: Option<Duration>,
    pub fail_next: Option<DatabaseError>,
}

/// An in-memory scripted backend. It executes nothing: statements are
/// recorded, responses come from a queue (an empty queue yields empty
/// results), and INSERTs get an automatic incrementing identity. This is
/// the backend the test suites run stores against.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Rc<RefCell<MemoryState>> {
        self.state.clone()
    }

    /// Script the response for an upcoming statement.
    pub fn queue_result(&self, result: RawResult) {
        self.state.borrow_mut().results.push_back(result);
    }

    pub fn queue_rows(&self, rows: Vec<Vec<Value>>) {
        self.queue_result(RawResult {
            rows,
            ..RawResult::default()
        });
    }

    /// Make the next statement fail with `error`.
    pub fn fail_next(&self, error: DatabaseError) {
        self.state.borrow_mut().fail_next = Some(error);
    }

    pub fn statements(&self) -> Vec<String> {
        self.state
            .borrow()
            .statements
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.borrow().statements.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().statements.clear();
    }

    pub fn commits(&self) -> usize {
        self.state.borrow().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.borrow().rollbacks
    }
}

impl Database for MemoryDatabase {
    fn connect(&self) -> Result<Connection> {
        let raw = MemoryConnection {
            state: self.state.clone(),
        };
        Ok(Connection::new(
            Box::new(raw),
            standard_compile().clone(),
            "?",
        ))
    }
}

struct MemoryConnection {
    state: Rc<RefCell<MemoryState>>,
}

impl RawConnection for MemoryConnection {
    fn execute(
        &mut self,
        statement: &str,
        params: &[Value],
    ) -> std::result::Result<RawResult, DatabaseError> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state
            .statements
            .push((statement.to_string(), params.to_vec()));
        let mut result = state.results.pop_front().unwrap_or_default();
        if statement.trim_start().to_ascii_uppercase().starts_with("INSERT") {
            if result.last_insert_id.is_none() {
                state.next_id += 1;
                result.last_insert_id = Some(state.next_id);
            }
            if result.rows_affected == 0 {
                result.rows_affected = 1;
            }
        }
        Ok(result)
    }

    fn commit(&mut self) -> std::result::Result<(), DatabaseError> {
        self.state.borrow_mut().commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), DatabaseError> {
        self.state.borrow_mut().rollbacks += 1;
        Ok(())
    }

    fn close(&mut self) {}

    fn set_statement_timeout(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<(), DatabaseError> {
        self.state.borrow_mut().statement_timeout = Some(timeout);
        Ok(())
    }
}

fn memory_factory(_uri: &Uri) -> Result<Box<dyn Database>> {
    Ok(Box::new(MemoryDatabase::new()))
}

pub(crate) fn register_builtin_scheme() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| register_scheme("memory", memory_factory));
}
