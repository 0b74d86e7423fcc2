use crate::{Expr, Variable};

/// What kind of emission the surrounding handler expects. Mostly relevant
/// to columns (prefixed or bare) and aliases (declaration or use).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Context {
    /// Inside a WHERE/ON/HAVING expression.
    Expr,
    /// Inside a SELECT column list.
    Column,
    /// Column name position of INSERT/UPDATE, no table prefix.
    ColumnName,
    /// Only the qualifying prefix of a column is wanted.
    ColumnPrefix,
    /// Inside a FROM list.
    Table,
    /// Directly under a SELECT.
    Select,
}

enum Frame {
    Context(Context),
    AutoTables(Vec<Expr>),
}

/// Mutable state threaded through one compilation: the precedence of the
/// enclosing operator, the emission context, the positional parameters
/// collected so far and the tables deduced for FROM. Context and
/// auto-tables are saved and restored as a stack so handlers can scope
/// their changes.
pub struct State {
    pub precedence: i32,
    pub context: Context,
    pub parameters: Vec<Variable>,
    pub auto_tables: Vec<Expr>,
    stack: Vec<Frame>,
}

impl State {
    pub fn new() -> Self {
        Self {
            precedence: 0,
            context: Context::Expr,
            parameters: Vec::new(),
            auto_tables: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Enter a context; the previous one comes back on [`State::pop`].
    pub fn push_context(&mut self, context: Context) {
        self.stack.push(Frame::Context(self.context));
        self.context = context;
    }

    /// Start an empty auto-tables scope, as each SELECT does.
    pub fn push_auto_tables(&mut self) {
        self.stack
            .push(Frame::AutoTables(std::mem::take(&mut self.auto_tables)));
    }

    /// Undo the innermost push.
    pub fn pop(&mut self) {
        match self.stack.pop() {
            Some(Frame::Context(context)) => self.context = context,
            Some(Frame::AutoTables(tables)) => self.auto_tables = tables,
            None => {}
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
