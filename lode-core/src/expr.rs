use crate::{AsValue, Result, Value, VariableFactory};
use rust_decimal::Decimal;
use std::sync::Arc;
use time::{Date, Duration, OffsetDateTime, Time};
use uuid::Uuid;

/// A column of a mapped table: its SQL name, the table it belongs to, the
/// factory stamping out its variables, and where it sits in the class
/// (`index`) and in the primary key (`primary`, 1-based, 0 when not part
/// of it).
#[derive(Debug)]
pub struct Column {
    pub name: String,
    pub table: String,
    pub factory: VariableFactory,
    pub index: usize,
    pub primary: usize,
}

pub type ColumnRef = Arc<Column>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LShift,
    RShift,
}

impl BinOp {
    pub fn sql(self) -> &'static str {
        match self {
            BinOp::Eq => " = ",
            BinOp::Ne => " != ",
            BinOp::Lt => " < ",
            BinOp::Gt => " > ",
            BinOp::Le => " <= ",
            BinOp::Ge => " >= ",
            BinOp::Add => " + ",
            BinOp::Sub => " - ",
            BinOp::Mul => " * ",
            BinOp::Div => " / ",
            BinOp::Mod => " % ",
            BinOp::LShift => " << ",
            BinOp::RShift => " >> ",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinKind {
    Plain,
    Inner,
    Left,
    Right,
    Full,
    Natural,
}

impl JoinKind {
    pub fn sql(self) -> &'static str {
        match self {
            JoinKind::Plain => "JOIN",
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Natural => "NATURAL JOIN",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetOpKind {
    Union,
    UnionAll,
    Except,
    Intersect,
}

impl SetOpKind {
    pub fn sql(self) -> &'static str {
        match self {
            SetOpKind::Union => " UNION ",
            SetOpKind::UnionAll => " UNION ALL ",
            SetOpKind::Except => " EXCEPT ",
            SetOpKind::Intersect => " INTERSECT ",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Select {
    pub columns: Vec<Expr>,
    pub where_clause: Option<Expr>,
    pub tables: Vec<Expr>,
    /// Used when neither explicit tables nor auto-deduced tables exist.
    pub default_tables: Vec<Expr>,
    pub order_by: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Insert {
    pub columns: Vec<Expr>,
    pub values: Vec<Vec<Expr>>,
    /// INSERT INTO ... SELECT form; mutually exclusive with `values`.
    pub source: Option<Expr>,
    pub table: Option<Expr>,
    pub default_table: Option<Expr>,
}

#[derive(Clone, Debug, Default)]
pub struct Update {
    pub set: Vec<(Expr, Expr)>,
    pub where_clause: Option<Expr>,
    pub table: Option<Expr>,
    pub default_table: Option<Expr>,
}

#[derive(Clone, Debug, Default)]
pub struct Delete {
    pub where_clause: Option<Expr>,
    pub table: Option<Expr>,
    pub default_table: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct Join {
    pub kind: JoinKind,
    /// Left side is optional so a join can ride on the preceding FROM item.
    pub left: Option<Box<Expr>>,
    pub right: Box<Expr>,
    pub on: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct SetOp {
    pub kind: SetOpKind,
    pub exprs: Vec<Expr>,
    pub order_by: Vec<Expr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// The expression algebra. Queries and statements are trees of these;
/// nothing here knows SQL text, that is the compiler's job.
#[derive(Clone, Debug)]
pub enum Expr {
    /// A positional parameter carrying a value coerced by `factory` when
    /// the statement is compiled.
    Param {
        factory: VariableFactory,
        value: Value,
    },
    /// Literal SQL with pre-bound parameters and tables to feed the
    /// FROM deduction.
    Raw {
        sql: String,
        params: Vec<Value>,
        tables: Vec<Expr>,
    },
    /// An identifier, quoted by the dialect when needed.
    Token(String),
    Column(ColumnRef),
    Table(String),
    Alias {
        expr: Box<Expr>,
        name: String,
    },
    /// Injects tables into the statement's FROM deduction while
    /// compiling `expr`.
    AutoTables {
        expr: Box<Expr>,
        tables: Vec<Expr>,
        replace: bool,
    },
    Sequence(String),
    Row(Vec<Expr>),
    Select(Box<Select>),
    Insert(Box<Insert>),
    Update(Box<Update>),
    Delete(Box<Delete>),
    Join(Box<Join>),
    SetOp(Box<SetOp>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Exists(Box<Expr>),
    Bin {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Like {
        left: Box<Expr>,
        right: Box<Expr>,
        escape: Option<Box<Expr>>,
    },
    In {
        left: Box<Expr>,
        items: Vec<Expr>,
    },
    Func {
        name: String,
        args: Vec<Expr>,
    },
    Count {
        expr: Option<Box<Expr>>,
        distinct: bool,
    },
    Cast {
        expr: Box<Expr>,
        ty: String,
    },
    Asc(Box<Expr>),
    Desc(Box<Expr>),
}

/// Discriminant used to pick a compile handler and a precedence. Binary
/// operators get one kind each so dialects can reprioritize them
/// individually.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ExprKind {
    Param,
    Raw,
    Token,
    Column,
    Table,
    Alias,
    AutoTables,
    Sequence,
    Row,
    Select,
    Insert,
    Update,
    Delete,
    Join,
    SetOp,
    And,
    Or,
    Not,
    Neg,
    Exists,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LShift,
    RShift,
    Like,
    In,
    Func,
    Count,
    Cast,
    Asc,
    Desc,
}

impl Expr {
    pub fn kind(&self) -> ExprKind {
        match self {
            Expr::Param { .. } => ExprKind::Param,
            Expr::Raw { .. } => ExprKind::Raw,
            Expr::Token(..) => ExprKind::Token,
            Expr::Column(..) => ExprKind::Column,
            Expr::Table(..) => ExprKind::Table,
            Expr::Alias { .. } => ExprKind::Alias,
            Expr::AutoTables { .. } => ExprKind::AutoTables,
            Expr::Sequence(..) => ExprKind::Sequence,
            Expr::Row(..) => ExprKind::Row,
            Expr::Select(..) => ExprKind::Select,
            Expr::Insert(..) => ExprKind::Insert,
            Expr::Update(..) => ExprKind::Update,
            Expr::Delete(..) => ExprKind::Delete,
            Expr::Join(..) => ExprKind::Join,
            Expr::SetOp(..) => ExprKind::SetOp,
            Expr::And(..) => ExprKind::And,
            Expr::Or(..) => ExprKind::Or,
            Expr::Not(..) => ExprKind::Not,
            Expr::Neg(..) => ExprKind::Neg,
            Expr::Exists(..) => ExprKind::Exists,
            Expr::Bin { op, .. } => match op {
                BinOp::Eq => ExprKind::Eq,
                BinOp::Ne => ExprKind::Ne,
                BinOp::Lt => ExprKind::Lt,
                BinOp::Gt => ExprKind::Gt,
                BinOp::Le => ExprKind::Le,
                BinOp::Ge => ExprKind::Ge,
                BinOp::Add => ExprKind::Add,
                BinOp::Sub => ExprKind::Sub,
                BinOp::Mul => ExprKind::Mul,
                BinOp::Div => ExprKind::Div,
                BinOp::Mod => ExprKind::Mod,
                BinOp::LShift => ExprKind::LShift,
                BinOp::RShift => ExprKind::RShift,
            },
            Expr::Like { .. } => ExprKind::Like,
            Expr::In { .. } => ExprKind::In,
            Expr::Func { .. } => ExprKind::Func,
            Expr::Count { .. } => ExprKind::Count,
            Expr::Cast { .. } => ExprKind::Cast,
            Expr::Asc(..) => ExprKind::Asc,
            Expr::Desc(..) => ExprKind::Desc,
        }
    }

    pub fn raw(sql: impl Into<String>) -> Expr {
        Expr::Raw {
            sql: sql.into(),
            params: Vec::new(),
            tables: Vec::new(),
        }
    }

    pub fn value(value: impl AsValue) -> Expr {
        Expr::Param {
            factory: VariableFactory::any(),
            value: value.as_value(),
        }
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Func {
            name: name.into(),
            args,
        }
    }

    /// Folds expressions into one AND, or None when the list is empty.
    pub fn and_all(exprs: Vec<Expr>) -> Option<Expr> {
        let mut iter = exprs.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, e| acc.and(e)))
    }

    /// The factory a bare value compared against this expression should be
    /// coerced with.
    fn operand_factory(&self) -> VariableFactory {
        match self {
            Expr::Column(column) => column.factory.clone(),
            Expr::Alias { expr, .. } | Expr::Asc(expr) | Expr::Desc(expr) => {
                expr.operand_factory()
            }
            _ => VariableFactory::any(),
        }
    }

    fn binary(self, op: BinOp, other: impl IntoOperand) -> Expr {
        let factory = self.operand_factory();
        let right = other.into_operand(&factory);
        Expr::Bin {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: impl IntoOperand) -> Expr {
        self.binary(BinOp::Eq, other)
    }
    pub fn ne(self, other: impl IntoOperand) -> Expr {
        self.binary(BinOp::Ne, other)
    }
    pub fn lt(self, other: impl IntoOperand) -> Expr {
        self.binary(BinOp::Lt, other)
    }
    pub fn gt(self, other: impl IntoOperand) -> Expr {
        self.binary(BinOp::Gt, other)
    }
    pub fn le(self, other: impl IntoOperand) -> Expr {
        self.binary(BinOp::Le, other)
    }
    pub fn ge(self, other: impl IntoOperand) -> Expr {
        self.binary(BinOp::Ge, other)
    }

    pub fn like(self, other: impl IntoOperand) -> Expr {
        let factory = VariableFactory::text();
        let right = other.into_operand(&factory);
        Expr::Like {
            left: Box::new(self),
            right: Box::new(right),
            escape: None,
        }
    }

    pub fn like_escape(self, other: impl IntoOperand, escape: impl IntoOperand) -> Expr {
        let factory = VariableFactory::text();
        let right = other.into_operand(&factory);
        let escape = escape.into_operand(&factory);
        Expr::Like {
            left: Box::new(self),
            right: Box::new(right),
            escape: Some(Box::new(escape)),
        }
    }

    pub fn is_in<I>(self, items: I) -> Expr
    where
        I: IntoIterator,
        I::Item: IntoOperand,
    {
        let factory = self.operand_factory();
        let items = items
            .into_iter()
            .map(|item| item.into_operand(&factory))
            .collect();
        Expr::In {
            left: Box::new(self),
            items,
        }
    }

    pub fn in_select(self, select: Select) -> Expr {
        Expr::In {
            left: Box::new(self),
            items: vec![Expr::Select(Box::new(select))],
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut items) => {
                items.push(other);
                Expr::And(items)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut items) => {
                items.push(other);
                Expr::Or(items)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    pub fn alias(self, name: impl Into<String>) -> Expr {
        Expr::Alias {
            expr: Box::new(self),
            name: name.into(),
        }
    }

    pub fn asc(self) -> Expr {
        Expr::Asc(Box::new(self))
    }

    pub fn desc(self) -> Expr {
        Expr::Desc(Box::new(self))
    }

    pub fn cast(self, ty: impl Into<String>) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            ty: ty.into(),
        }
    }

    pub fn exists(select: Select) -> Expr {
        Expr::Exists(Box::new(Expr::Select(Box::new(select))))
    }

    pub fn count() -> Expr {
        Expr::Count {
            expr: None,
            distinct: false,
        }
    }

    pub fn count_of(self) -> Expr {
        Expr::Count {
            expr: Some(Box::new(self)),
            distinct: false,
        }
    }

    pub fn max(self) -> Expr {
        Expr::func("MAX", vec![self])
    }
    pub fn min(self) -> Expr {
        Expr::func("MIN", vec![self])
    }
    pub fn sum(self) -> Expr {
        Expr::func("SUM", vec![self])
    }
    pub fn avg(self) -> Expr {
        Expr::func("AVG", vec![self])
    }
    pub fn lower(self) -> Expr {
        Expr::func("LOWER", vec![self])
    }
    pub fn upper(self) -> Expr {
        Expr::func("UPPER", vec![self])
    }

    /// Inverts ASC/DESC, for walking an ordered result backwards. Bare
    /// expressions order ascending, so they invert to DESC.
    pub fn inverted_direction(self) -> Expr {
        match self {
            Expr::Asc(expr) => Expr::Desc(expr),
            Expr::Desc(expr) => Expr::Asc(expr),
            expr => Expr::Desc(Box::new(expr)),
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

macro_rules! impl_arith {
    ($trait:ident, $method:ident, $op:ident) => {
        impl<R: IntoOperand> std::ops::$trait<R> for Expr {
            type Output = Expr;
            fn $method(self, other: R) -> Expr {
                self.binary(BinOp::$op, other)
            }
        }
    };
}

impl_arith!(Add, add, Add);
impl_arith!(Sub, sub, Sub);
impl_arith!(Mul, mul, Mul);
impl_arith!(Div, div, Div);
impl_arith!(Rem, rem, Mod);
impl_arith!(Shl, shl, LShift);
impl_arith!(Shr, shr, RShift);

impl From<&ColumnRef> for Expr {
    fn from(column: &ColumnRef) -> Expr {
        Expr::Column(column.clone())
    }
}

impl From<ColumnRef> for Expr {
    fn from(column: ColumnRef) -> Expr {
        Expr::Column(column)
    }
}

impl From<Select> for Expr {
    fn from(select: Select) -> Expr {
        Expr::Select(Box::new(select))
    }
}

/// Right-hand sides of comparisons: expressions pass through, plain values
/// become parameters coerced by the left-hand side's variable factory.
pub trait IntoOperand {
    fn into_operand(self, factory: &VariableFactory) -> Expr;
}

impl IntoOperand for Expr {
    fn into_operand(self, _factory: &VariableFactory) -> Expr {
        self
    }
}

impl IntoOperand for &ColumnRef {
    fn into_operand(self, _factory: &VariableFactory) -> Expr {
        Expr::Column(self.clone())
    }
}

impl IntoOperand for ColumnRef {
    fn into_operand(self, _factory: &VariableFactory) -> Expr {
        Expr::Column(self)
    }
}

macro_rules! impl_operand {
    ($($type:ty),* $(,)?) => {
        $(
            impl IntoOperand for $type {
                fn into_operand(self, factory: &VariableFactory) -> Expr {
                    Expr::Param {
                        factory: factory.clone(),
                        value: self.as_value(),
                    }
                }
            }
            impl IntoOperand for Option<$type> {
                fn into_operand(self, factory: &VariableFactory) -> Expr {
                    Expr::Param {
                        factory: factory.clone(),
                        value: self.as_value(),
                    }
                }
            }
        )*
    };
}

impl_operand!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    &str,
    String,
    Decimal,
    Vec<u8>,
    Date,
    Time,
    OffsetDateTime,
    Duration,
    Uuid,
    serde_json::Value,
);

impl IntoOperand for Value {
    fn into_operand(self, factory: &VariableFactory) -> Expr {
        Expr::Param {
            factory: factory.clone(),
            value: self,
        }
    }
}

/// Pairwise equality of key columns against already-stored values, ANDed.
/// The values are in stored form and converted to their database form for
/// binding.
pub fn compare_columns(columns: &[ColumnRef], values: &[Value]) -> Result<Expr> {
    debug_assert_eq!(columns.len(), values.len());
    let mut parts = Vec::with_capacity(columns.len());
    for (column, value) in columns.iter().zip(values) {
        let bound = column.factory.get(value, true)?;
        parts.push(Expr::Column(column.clone()).eq(bound));
    }
    Expr::and_all(parts).ok_or_else(|| crate::Error::compile("no key columns to compare"))
}
