use crate::{
    AsValue, Column, ColumnRef, Error, Event, EventSystem, Expr, LazyValue, Result, Value,
    Variable, VariableFactory, reference::LinkState, store::StoreInner,
};
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    marker::PhantomData,
    rc::{Rc, Weak},
    sync::Arc,
};

/// Identifies a registered class. Stable for the lifetime of the program
/// because class metadata lives in `Arc`s that are never dropped while in
/// use; two classes are the same exactly when their tokens are equal.
pub type ClassToken = usize;

/// Immutable description of a mapped class: table, columns, primary key
/// and default result order. Built once through [`ClassInfoBuilder`] and
/// shared from then on.
#[derive(Debug)]
pub struct ClassInfo {
    pub class_name: String,
    pub table: String,
    pub columns: Vec<ColumnRef>,
    /// Indexes into `columns`, in key order.
    pub primary_key: Vec<usize>,
    pub default_order: Vec<Expr>,
}

impl ClassInfo {
    pub fn builder(class_name: impl Into<String>, table: impl Into<String>) -> ClassInfoBuilder {
        ClassInfoBuilder::new(class_name, table)
    }

    pub fn token(self: &Arc<Self>) -> ClassToken {
        Arc::as_ptr(self) as ClassToken
    }

    pub fn column(&self, name: &str) -> Option<ColumnRef> {
        self.columns.iter().find(|c| c.name == name).cloned()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                Error::Class(format!("{} has no column named {name}", self.class_name).into())
            })
    }

    pub fn primary_columns(&self) -> Vec<ColumnRef> {
        self.primary_key
            .iter()
            .map(|i| self.columns[*i].clone())
            .collect()
    }

    pub fn table_expr(&self) -> Expr {
        Expr::Table(self.table.clone())
    }
}

pub struct ClassInfoBuilder {
    class_name: String,
    table: String,
    columns: Vec<(String, VariableFactory)>,
    primary: Vec<String>,
    order: Vec<String>,
}

impl ClassInfoBuilder {
    pub fn new(class_name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            table: table.into(),
            columns: Vec::new(),
            primary: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, factory: VariableFactory) -> Self {
        self.columns.push((name.into(), factory));
        self
    }

    /// Names of the key columns, in key order.
    pub fn primary<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.primary = names.into_iter().map(Into::into).collect();
        self
    }

    /// Default ordering for result sets over this class. A leading `-`
    /// orders that column descending.
    pub fn order_by<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.order = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<Arc<ClassInfo>> {
        if self.table.is_empty() {
            return Err(Error::Class(
                format!("{} declares no table", self.class_name).into(),
            ));
        }
        if self.columns.is_empty() {
            return Err(Error::Class(
                format!("{} declares no columns", self.class_name).into(),
            ));
        }
        if self.primary.is_empty() {
            return Err(Error::Class(
                format!("{} declares no primary key", self.class_name).into(),
            ));
        }
        let mut names: Vec<&str> = self.columns.iter().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Class(
                format!("{} declares a column twice", self.class_name).into(),
            ));
        }
        let find = |name: &str| -> Result<usize> {
            self.columns
                .iter()
                .position(|(n, _)| n == name)
                .ok_or_else(|| {
                    Error::Class(
                        format!("{} has no column named {name}", self.class_name).into(),
                    )
                })
        };
        let mut primary_key = Vec::with_capacity(self.primary.len());
        for name in &self.primary {
            primary_key.push(find(name)?);
        }
        let columns: Vec<ColumnRef> = self
            .columns
            .iter()
            .enumerate()
            .map(|(index, (name, factory))| {
                Arc::new(Column {
                    name: name.clone(),
                    table: self.table.clone(),
                    factory: factory
                        .clone()
                        .labeled(format!("{}.{name}", self.table)),
                    index,
                    primary: primary_key
                        .iter()
                        .position(|i| *i == index)
                        .map(|p| p + 1)
                        .unwrap_or(0),
                })
            })
            .collect();
        let mut default_order = Vec::with_capacity(self.order.len());
        for name in &self.order {
            let (name, descending) = match name.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (name.as_str(), false),
            };
            let expr = Expr::Column(columns[find(name)?].clone());
            default_order.push(if descending { expr.desc() } else { expr });
        }
        Ok(Arc::new(ClassInfo {
            class_name: self.class_name,
            table: self.table,
            columns,
            primary_key,
            default_order,
        }))
    }
}

/// A mapped class. Implementations are usually unit structs whose
/// metadata lives in a `Lazy<Arc<ClassInfo>>`.
pub trait Entity: 'static {
    fn class_info() -> Arc<ClassInfo>;
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Pending {
    #[default]
    None,
    /// Added to a store, INSERT outstanding.
    Add,
    /// Removed from a store, DELETE outstanding.
    Remove,
}

/// The per-object bookkeeping every store-managed object carries: its
/// variables, its event system, the pending flag and the key it is filed
/// under in the identity map.
pub struct ObjectInfo {
    class_info: Arc<ClassInfo>,
    variables: RefCell<Vec<Variable>>,
    pub event: EventSystem,
    pending: Cell<Pending>,
    saved_pending: Cell<Pending>,
    /// Stored-form key values as last filed in the identity map.
    primary_values: RefCell<Option<Vec<Value>>>,
    pub(crate) store: RefCell<Option<Weak<StoreInner>>>,
    pub(crate) dirty_token: Cell<Option<u64>>,
    pub(crate) relations: RefCell<HashMap<u64, LinkState>>,
}

impl ObjectInfo {
    pub fn new(class_info: Arc<ClassInfo>) -> Rc<Self> {
        let variables = class_info
            .columns
            .iter()
            .map(|column| {
                let mut variable = column.factory.build();
                variable.set_column(column.index);
                variable
            })
            .collect();
        let info = Rc::new(Self {
            class_info,
            variables: RefCell::new(variables),
            event: EventSystem::new(),
            pending: Cell::new(Pending::None),
            saved_pending: Cell::new(Pending::None),
            primary_values: RefCell::new(None),
            store: RefCell::new(None),
            dirty_token: Cell::new(None),
            relations: RefCell::new(HashMap::new()),
        });
        info.event.bind(&info);
        info
    }

    pub fn class_info(&self) -> &Arc<ClassInfo> {
        &self.class_info
    }

    pub fn class_token(&self) -> ClassToken {
        self.class_info.token()
    }

    pub fn pending(&self) -> Pending {
        self.pending.get()
    }

    pub(crate) fn set_pending(&self, pending: Pending) {
        self.pending.set(pending);
    }

    /// App-side value of a column. A lazy marker gets one chance to be
    /// resolved by whoever listens on the resolve channel.
    pub fn get(&self, column: usize) -> Result<Value> {
        let lazy = self.variables.borrow()[column].lazy().cloned();
        if let Some(lazy) = lazy {
            self.event.emit(Event::ResolveLazy { column, lazy });
        }
        self.variables.borrow()[column].get()
    }

    pub fn get_to_db(&self, column: usize) -> Result<Value> {
        self.variables.borrow()[column].get_to_db()
    }

    pub fn is_defined(&self, column: usize) -> bool {
        self.variables.borrow()[column].is_defined()
    }

    pub fn lazy(&self, column: usize) -> Option<LazyValue> {
        self.variables.borrow()[column].lazy().cloned()
    }

    /// Set a column. The changed event fires after all borrows are
    /// released, so hooks may read and write this object freely.
    pub fn set(&self, column: usize, value: Value, from_db: bool) -> Result<()> {
        let changed = self.variables.borrow_mut()[column].set(value, from_db)?;
        if let Some(changed) = changed {
            self.event.emit(Event::Changed {
                column,
                old_value: changed.old_value,
                new_value: changed.new_value,
                lazy: None,
                from_db,
            });
        }
        Ok(())
    }

    pub fn set_lazy(&self, column: usize, lazy: LazyValue) {
        let changed = self.variables.borrow_mut()[column].set_lazy(lazy);
        self.event.emit(Event::Changed {
            column,
            old_value: changed.old_value,
            new_value: None,
            lazy: changed.lazy,
            from_db: false,
        });
    }

    pub fn unset(&self, column: usize) {
        let changed = self.variables.borrow_mut()[column].delete();
        if let Some(changed) = changed {
            self.event.emit(Event::Changed {
                column,
                old_value: changed.old_value,
                new_value: None,
                lazy: None,
                from_db: false,
            });
        }
    }

    pub fn has_changed(&self) -> bool {
        self.variables.borrow().iter().any(Variable::has_changed)
    }

    pub fn checkpoint_all(&self) {
        for variable in self.variables.borrow_mut().iter_mut() {
            variable.checkpoint();
        }
    }

    /// Transaction snapshot: variables, pending flag and hooks.
    pub fn save_all(&self) {
        for variable in self.variables.borrow_mut().iter_mut() {
            variable.save();
        }
        self.saved_pending.set(self.pending.get());
        self.event.save();
    }

    pub fn restore_all(&self) {
        for variable in self.variables.borrow_mut().iter_mut() {
            variable.restore();
        }
        self.pending.set(self.saved_pending.get());
        self.event.restore();
    }

    /// Stored-form values of the key columns, when all of them are set.
    pub fn primary_stored(&self) -> Option<Vec<Value>> {
        let variables = self.variables.borrow();
        self.class_info
            .primary_key
            .iter()
            .map(|i| variables[*i].stored().cloned())
            .collect()
    }

    pub(crate) fn filed_primary(&self) -> Option<Vec<Value>> {
        self.primary_values.borrow().clone()
    }

    pub(crate) fn set_filed_primary(&self, values: Option<Vec<Value>>) {
        *self.primary_values.borrow_mut() = values;
    }

    /// Run `f` with read access to the variables.
    pub fn with_variables<R>(&self, f: impl FnOnce(&[Variable]) -> R) -> R {
        f(&self.variables.borrow())
    }

    pub(crate) fn with_variables_mut<R>(&self, f: impl FnOnce(&mut [Variable]) -> R) -> R {
        f(&mut self.variables.borrow_mut())
    }
}

/// A typed handle on a store-managed object. Cheap to clone; two handles
/// to the same row compare equal through [`Obj::same`].
pub struct Obj<E: Entity> {
    info: Rc<ObjectInfo>,
    _marker: PhantomData<E>,
}

impl<E: Entity> Obj<E> {
    /// A detached object with every column undefined. It starts tracking
    /// against a database only once added to a store.
    pub fn new() -> Self {
        Self::from_info(ObjectInfo::new(E::class_info()))
    }

    pub(crate) fn from_info(info: Rc<ObjectInfo>) -> Self {
        debug_assert_eq!(info.class_token(), E::class_info().token());
        Self {
            info,
            _marker: PhantomData,
        }
    }

    pub fn info(&self) -> &Rc<ObjectInfo> {
        &self.info
    }

    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.info, &other.info)
    }

    pub fn get(&self, column: &str) -> Result<Value> {
        let index = self.info.class_info().column_index(column)?;
        self.info.get(index)
    }

    pub fn set(&self, column: &str, value: impl AsValue) -> Result<()> {
        let index = self.info.class_info().column_index(column)?;
        self.info.set(index, value.as_value(), false)
    }

    pub fn set_lazy(&self, column: &str, lazy: LazyValue) -> Result<()> {
        let index = self.info.class_info().column_index(column)?;
        self.info.set_lazy(index, lazy);
        Ok(())
    }

    pub fn unset(&self, column: &str) -> Result<()> {
        let index = self.info.class_info().column_index(column)?;
        self.info.unset(index);
        Ok(())
    }
}

impl<E: Entity> Clone for Obj<E> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> Default for Obj<E> {
    fn default() -> Self {
        Self::new()
    }
}
