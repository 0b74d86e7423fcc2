use crate::{
    Cache, ClassInfo, ClassToken, Connection, Database, Entity, Error, Event, EventKind, Expr,
    GenerationalCache, Insert, LazyValue, Obj, ObjectInfo, Pending, RawResult, Result, ResultSet,
    Update, Value, VariableKind, compare_columns, create_database,
    expr::Delete as DeleteExpr,
};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap},
    rc::{Rc, Weak},
    sync::Arc,
};

fn ptr(info: &Rc<ObjectInfo>) -> usize {
    Rc::as_ptr(info) as usize
}

pub(crate) struct StoreInner {
    connection: RefCell<Connection>,
    /// Live objects keyed by (class, stored primary values). Weak, so an
    /// object nobody references can go away; the cache below is what
    /// keeps recently used objects alive.
    identity: RefCell<HashMap<(ClassToken, Vec<Value>), Weak<ObjectInfo>>>,
    /// Objects awaiting flush, in dirtying order.
    dirty: RefCell<BTreeMap<u64, Rc<ObjectInfo>>>,
    dirty_seq: Cell<u64>,
    /// (before, after) object pairs with how many times the constraint
    /// was requested.
    flush_order: RefCell<HashMap<(usize, usize), i32>>,
    cache: RefCell<Box<dyn Cache>>,
    flushing: Cell<bool>,
}

/// The unit of work: tracks objects loaded from one database connection,
/// notices what changed and writes everything back in [`Store::flush`].
/// One identity map per store guarantees one object per row.
///
/// Cheap to clone; clones share everything.
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Store {
            inner: self.inner.clone(),
        }
    }
}

impl Store {
    pub fn new(database: &dyn Database) -> Result<Store> {
        Self::with_cache(database, Box::new(GenerationalCache::new(1000)))
    }

    pub fn with_cache(database: &dyn Database, cache: Box<dyn Cache>) -> Result<Store> {
        Ok(Store {
            inner: Rc::new(StoreInner {
                connection: RefCell::new(database.connect()?),
                identity: RefCell::new(HashMap::new()),
                dirty: RefCell::new(BTreeMap::new()),
                dirty_seq: Cell::new(0),
                flush_order: RefCell::new(HashMap::new()),
                cache: RefCell::new(cache),
                flushing: Cell::new(false),
            }),
        })
    }

    /// Resolve `uri` through the scheme registry and open a store on it.
    pub fn open(uri: &str) -> Result<Store> {
        let database = create_database(uri)?;
        Store::new(database.as_ref())
    }

    /// The store an object belongs to, if any.
    pub fn of(info: &Rc<ObjectInfo>) -> Option<Store> {
        info.store
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Store { inner })
    }

    pub fn same(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn is_mine(&self, info: &Rc<ObjectInfo>) -> bool {
        match Store::of(info) {
            Some(store) => store.same(self),
            None => false,
        }
    }

    /// Register a detached object for insertion at the next flush.
    pub fn add(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        if let Some(owner) = Store::of(info) {
            if !owner.same(self) {
                return Err(Error::store("object is already part of another store"));
            }
            match info.pending() {
                Pending::Remove => {
                    // Removal not flushed yet; adding back cancels it.
                    info.set_pending(Pending::None);
                    self.mark_dirty(info);
                }
                _ => {}
            }
            return Ok(());
        }
        *info.store.borrow_mut() = Some(Rc::downgrade(&self.inner));
        self.install_hooks(info);
        info.set_pending(Pending::Add);
        self.mark_dirty(info);
        info.event.emit(Event::Added);
        Ok(())
    }

    /// Schedule an object's row for deletion at the next flush.
    pub fn remove(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        if !self.is_mine(info) {
            return Err(Error::store("object is not in this store"));
        }
        match info.pending() {
            Pending::Add => {
                // Never hit the database; just forget it.
                self.unmark_dirty(info);
                self.detach(info);
            }
            Pending::None => {
                info.set_pending(Pending::Remove);
                self.mark_dirty(info);
                info.event.emit(Event::Removed);
            }
            Pending::Remove => {}
        }
        Ok(())
    }

    pub fn add_obj<E: Entity>(&self, obj: &Obj<E>) -> Result<()> {
        self.add(obj.info())
    }

    pub fn remove_obj<E: Entity>(&self, obj: &Obj<E>) -> Result<()> {
        self.remove(obj.info())
    }

    /// Fetch one object by primary key, serving it from the identity map
    /// when it is already loaded. Pending changes are flushed first so
    /// the database sees a consistent picture.
    pub fn get<E: Entity>(&self, key: impl crate::AsValue) -> Result<Option<Obj<E>>> {
        self.flush()?;
        let class_info = E::class_info();
        let raw = key.as_value();
        let parts = match raw {
            Value::List(values) => values,
            value => vec![value],
        };
        if parts.len() != class_info.primary_key.len() {
            return Err(Error::store(format!(
                "{} takes {} key values, got {}",
                class_info.class_name,
                class_info.primary_key.len(),
                parts.len()
            )));
        }
        let mut stored = Vec::with_capacity(parts.len());
        for (value, column) in parts.into_iter().zip(class_info.primary_columns()) {
            stored.push(column.factory.coerce(value, false)?);
        }
        if let Some(info) = self.lookup(&class_info, &stored) {
            return Ok(Some(Obj::from_info(info)));
        }
        let where_clause = compare_columns(&class_info.primary_columns(), &stored)?;
        let select = crate::Select {
            columns: class_info.columns.iter().map(Expr::from).collect(),
            where_clause: Some(where_clause),
            default_tables: vec![class_info.table_expr()],
            ..crate::Select::default()
        };
        let result = self
            .inner
            .connection
            .borrow_mut()
            .execute(&Expr::Select(Box::new(select)))?;
        match result.get_one() {
            Some(row) => Ok(Some(Obj::from_info(self.load_object(&class_info, &row)?))),
            None => Ok(None),
        }
    }

    /// A lazy query over one class. `where_clause` of `None` selects
    /// every row.
    pub fn find<E: Entity>(&self, where_clause: impl Into<Option<Expr>>) -> Result<ResultSet<E>> {
        self.flush()?;
        Ok(ResultSet::new(self.clone(), where_clause.into()))
    }

    /// Write every pending change out, inserting, updating and deleting
    /// in dirtying order, except where flush-order constraints reorder.
    pub fn flush(&self) -> Result<()> {
        if self.inner.flushing.get() {
            return Ok(());
        }
        self.inner.flushing.set(true);
        let result = self.flush_inner();
        self.inner.flushing.set(false);
        result
    }

    fn flush_inner(&self) -> Result<()> {
        let announced: Vec<_> = self.inner.dirty.borrow().values().cloned().collect();
        for info in &announced {
            info.event.emit(Event::Flush);
        }
        let mut remaining: Vec<_> = self.inner.dirty.borrow().values().cloned().collect();
        while !remaining.is_empty() {
            let mut progress = false;
            let mut i = 0;
            while i < remaining.len() {
                let info = remaining[i].clone();
                let blocked = {
                    let order = self.inner.flush_order.borrow();
                    remaining.iter().any(|before| {
                        !Rc::ptr_eq(before, &info)
                            && order
                                .get(&(ptr(before), ptr(&info)))
                                .is_some_and(|count| *count > 0)
                    })
                };
                if blocked {
                    i += 1;
                    continue;
                }
                self.flush_one(&info)?;
                remaining.remove(i);
                progress = true;
            }
            if !progress {
                return Err(Error::OrderLoop);
            }
        }
        Ok(())
    }

    fn flush_one(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        match info.pending() {
            Pending::Remove => self.flush_delete(info)?,
            Pending::Add => self.flush_insert(info)?,
            Pending::None => self.flush_update(info)?,
        }
        self.unmark_dirty(info);
        Ok(())
    }

    fn flush_delete(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        let class_info = info.class_info().clone();
        let filed = info
            .filed_primary()
            .or_else(|| info.primary_stored())
            .ok_or_else(|| Error::NotFlushed("removed object has no primary key".into()))?;
        let delete = DeleteExpr {
            where_clause: Some(compare_columns(&class_info.primary_columns(), &filed)?),
            table: Some(class_info.table_expr()),
            default_table: None,
        };
        self.inner
            .connection
            .borrow_mut()
            .execute(&Expr::Delete(Box::new(delete)))?;
        info.set_pending(Pending::None);
        self.unfile(info);
        self.inner.cache.borrow_mut().remove(info);
        self.detach(info);
        Ok(())
    }

    fn flush_insert(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        let class_info = info.class_info().clone();
        let mut columns = Vec::new();
        let mut row = Vec::new();
        let plan: Result<()> = info.with_variables(|variables| {
            for (column, variable) in class_info.columns.iter().zip(variables) {
                let value = match variable.state() {
                    crate::VarState::Set(..) => Expr::value(variable.get_to_db()?),
                    crate::VarState::Lazy(LazyValue::Sequence(name)) => {
                        Expr::Sequence(name.clone())
                    }
                    crate::VarState::Lazy(LazyValue::Expr(expr)) => (**expr).clone(),
                    _ => continue,
                };
                columns.push(Expr::from(column));
                row.push(value);
            }
            Ok(())
        });
        plan?;
        if columns.is_empty() {
            return Err(Error::store(format!(
                "cannot insert a {} with no values",
                class_info.class_name
            )));
        }
        let insert = Insert {
            columns,
            values: vec![row],
            source: None,
            table: Some(class_info.table_expr()),
            default_table: None,
        };
        let result = self
            .inner
            .connection
            .borrow_mut()
            .execute(&Expr::Insert(Box::new(insert)))?;
        self.fill_missing(info, &class_info, &result)?;
        info.set_pending(Pending::None);
        self.file(info)?;
        self.inner.cache.borrow_mut().add(info);
        info.checkpoint_all();
        info.event.emit(Event::Flushed);
        Ok(())
    }

    /// After an INSERT the key may have been generated by the backend,
    /// and any column left out gets read back lazily on first use.
    fn fill_missing(
        &self,
        info: &Rc<ObjectInfo>,
        class_info: &Arc<ClassInfo>,
        result: &RawResult,
    ) -> Result<()> {
        let missing_keys: Vec<usize> = class_info
            .primary_key
            .iter()
            .copied()
            .filter(|i| !info.is_defined(*i))
            .collect();
        if !missing_keys.is_empty() {
            let index = missing_keys[0];
            let generated = result.last_insert_id.ok_or_else(|| {
                Error::NotFlushed("backend reported no identity for the inserted row".into())
            })?;
            let is_int_key = matches!(
                class_info.columns[index].factory.kind(),
                VariableKind::Int | VariableKind::Any
            );
            if missing_keys.len() > 1 || !is_int_key {
                return Err(Error::NotFlushed(
                    "cannot deduce the primary key of the inserted row".into(),
                ));
            }
            info.set(index, Value::Int(generated), true)?;
        }
        for column in &class_info.columns {
            if class_info.primary_key.contains(&column.index) {
                continue;
            }
            if !info.is_defined(column.index) {
                info.set_lazy(column.index, LazyValue::AutoReload);
            }
        }
        Ok(())
    }

    fn flush_update(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        let class_info = info.class_info().clone();
        let filed = info
            .filed_primary()
            .or_else(|| info.primary_stored())
            .ok_or_else(|| Error::NotFlushed("object has no primary key".into()))?;
        let mut sets = Vec::new();
        let mut reload_after = Vec::new();
        let plan: Result<()> = info.with_variables(|variables| {
            for (column, variable) in class_info.columns.iter().zip(variables) {
                if !variable.has_changed() {
                    continue;
                }
                let value = match variable.state() {
                    crate::VarState::Set(..) => Expr::value(variable.get_to_db()?),
                    crate::VarState::Lazy(LazyValue::Sequence(name)) => {
                        reload_after.push(column.index);
                        Expr::Sequence(name.clone())
                    }
                    crate::VarState::Lazy(LazyValue::Expr(expr)) => {
                        reload_after.push(column.index);
                        (**expr).clone()
                    }
                    _ => continue,
                };
                sets.push((Expr::from(column), value));
            }
            Ok(())
        });
        plan?;
        if !sets.is_empty() {
            let update = Update {
                set: sets,
                where_clause: Some(compare_columns(&class_info.primary_columns(), &filed)?),
                table: Some(class_info.table_expr()),
                default_table: None,
            };
            self.inner
                .connection
                .borrow_mut()
                .execute(&Expr::Update(Box::new(update)))?;
            for index in reload_after {
                info.set_lazy(index, LazyValue::AutoReload);
            }
        }
        self.refile(info)?;
        info.checkpoint_all();
        info.event.emit(Event::Flushed);
        Ok(())
    }

    /// Flush, then write everything to disk for good.
    pub fn commit(&self) -> Result<()> {
        self.flush()?;
        let committed = self.inner.connection.borrow_mut().commit();
        if let Err(error) = committed {
            // Leave the backend transaction in a known state before failing.
            if let Err(rollback_error) = self.inner.connection.borrow_mut().rollback() {
                log::error!("rollback after failed commit also failed: {rollback_error}");
            }
            return Err(error);
        }
        for info in self.live_objects(None) {
            info.save_all();
        }
        Ok(())
    }

    /// Throw pending changes away and go back to the last commit. Objects
    /// loaded in the aborted transaction are invalidated: their next read
    /// goes back to the database.
    pub fn rollback(&self) -> Result<()> {
        let dirty: Vec<_> = self.inner.dirty.borrow().values().cloned().collect();
        for info in &dirty {
            if info.pending() == Pending::Add {
                self.unfile(info);
                self.detach(info);
                info.set_pending(Pending::None);
            }
        }
        self.inner.dirty.borrow_mut().clear();
        self.inner.flush_order.borrow_mut().clear();
        for info in self.live_objects(None) {
            info.restore_all();
            info.dirty_token.set(None);
            self.invalidate(&info);
        }
        self.inner.connection.borrow_mut().rollback()
    }

    /// Forget the in-memory value of every non-key column, forcing the
    /// next read through to the database.
    pub fn invalidate(&self, info: &Rc<ObjectInfo>) {
        let class_info = info.class_info().clone();
        for column in &class_info.columns {
            if class_info.primary_key.contains(&column.index) {
                continue;
            }
            info.set_lazy(column.index, LazyValue::AutoReload);
        }
    }

    pub fn invalidate_all(&self) {
        for info in self.live_objects(None) {
            self.invalidate(&info);
        }
    }

    /// Re-fetch an object's row and overwrite its variables.
    pub fn reload(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        if !self.is_mine(info) {
            return Err(Error::store("object is not in this store"));
        }
        let class_info = info.class_info().clone();
        let filed = info
            .filed_primary()
            .or_else(|| info.primary_stored())
            .ok_or_else(|| Error::NotFlushed("object has no primary key to reload by".into()))?;
        let select = crate::Select {
            columns: class_info.columns.iter().map(Expr::from).collect(),
            where_clause: Some(compare_columns(&class_info.primary_columns(), &filed)?),
            default_tables: vec![class_info.table_expr()],
            ..crate::Select::default()
        };
        let result = self
            .inner
            .connection
            .borrow_mut()
            .execute(&Expr::Select(Box::new(select)))?;
        let row = result
            .get_one()
            .ok_or_else(|| Error::store("object's row is gone from the database"))?;
        self.set_values(info, &class_info, &row)?;
        self.refile(info)?;
        Ok(())
    }

    /// Run an arbitrary statement, flushing first.
    pub fn execute(&self, expr: &Expr) -> Result<RawResult> {
        self.flush()?;
        self.inner.connection.borrow_mut().execute(expr)
    }

    /// Literal SQL with `?` markers, flushing first.
    pub fn execute_raw(&self, statement: &str, params: &[Value]) -> Result<RawResult> {
        self.flush()?;
        self.inner.connection.borrow_mut().execute_raw(statement, params)
    }

    pub fn close(&self) {
        self.inner.connection.borrow_mut().close();
    }

    /// Require earlier-flushing of `before` relative to `after`.
    pub fn add_flush_order(&self, before: &Rc<ObjectInfo>, after: &Rc<ObjectInfo>) {
        *self
            .inner
            .flush_order
            .borrow_mut()
            .entry((ptr(before), ptr(after)))
            .or_insert(0) += 1;
    }

    pub fn remove_flush_order(&self, before: &Rc<ObjectInfo>, after: &Rc<ObjectInfo>) {
        let mut order = self.inner.flush_order.borrow_mut();
        if let Some(count) = order.get_mut(&(ptr(before), ptr(after))) {
            *count -= 1;
            if *count <= 0 {
                order.remove(&(ptr(before), ptr(after)));
            }
        }
    }

    /// Live objects of one class (or all of them), for local filtering.
    pub(crate) fn live_objects(&self, class: Option<ClassToken>) -> Vec<Rc<ObjectInfo>> {
        let mut identity = self.inner.identity.borrow_mut();
        identity.retain(|_, weak| weak.strong_count() > 0);
        identity
            .iter()
            .filter(|((token, _), _)| class.is_none_or(|c| c == *token))
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    pub(crate) fn execute_unflushed(&self, expr: &Expr) -> Result<RawResult> {
        self.inner.connection.borrow_mut().execute(expr)
    }

    pub(crate) fn mark_dirty(&self, info: &Rc<ObjectInfo>) {
        if info.dirty_token.get().is_some() {
            return;
        }
        let token = self.inner.dirty_seq.get();
        self.inner.dirty_seq.set(token + 1);
        info.dirty_token.set(Some(token));
        self.inner.dirty.borrow_mut().insert(token, info.clone());
    }

    fn unmark_dirty(&self, info: &Rc<ObjectInfo>) {
        if let Some(token) = info.dirty_token.take() {
            self.inner.dirty.borrow_mut().remove(&token);
        }
    }

    fn detach(&self, info: &Rc<ObjectInfo>) {
        *info.store.borrow_mut() = None;
        info.set_filed_primary(None);
    }

    fn lookup(&self, class_info: &Arc<ClassInfo>, stored: &[Value]) -> Option<Rc<ObjectInfo>> {
        let key = (class_info.token(), stored.to_vec());
        let mut identity = self.inner.identity.borrow_mut();
        match identity.get(&key).and_then(Weak::upgrade) {
            Some(info) => {
                self.inner.cache.borrow_mut().add(&info);
                Some(info)
            }
            None => {
                identity.remove(&key);
                None
            }
        }
    }

    fn file(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        let stored = info
            .primary_stored()
            .ok_or_else(|| Error::NotFlushed("object has an incomplete primary key".into()))?;
        let key = (info.class_token(), stored.clone());
        self.inner
            .identity
            .borrow_mut()
            .insert(key, Rc::downgrade(info));
        info.set_filed_primary(Some(stored));
        Ok(())
    }

    fn unfile(&self, info: &Rc<ObjectInfo>) {
        if let Some(filed) = info.filed_primary() {
            self.inner
                .identity
                .borrow_mut()
                .remove(&(info.class_token(), filed));
        }
        info.set_filed_primary(None);
    }

    /// Key columns may change; the identity map entry follows them.
    fn refile(&self, info: &Rc<ObjectInfo>) -> Result<()> {
        let current = info.primary_stored();
        let filed = info.filed_primary();
        if current != filed {
            self.unfile(info);
            self.file(info)?;
        }
        Ok(())
    }

    /// Turn a database row into a live, identity-mapped object. An
    /// already-loaded object is returned as is, local changes intact.
    pub(crate) fn load_object(
        &self,
        class_info: &Arc<ClassInfo>,
        row: &[Value],
    ) -> Result<Rc<ObjectInfo>> {
        if row.len() < class_info.columns.len() {
            return Err(Error::store(format!(
                "row has {} values but {} has {} columns",
                row.len(),
                class_info.class_name,
                class_info.columns.len()
            )));
        }
        let mut stored = Vec::with_capacity(class_info.primary_key.len());
        for index in &class_info.primary_key {
            let column = &class_info.columns[*index];
            stored.push(column.factory.coerce(row[*index].clone(), true)?);
        }
        if let Some(info) = self.lookup(class_info, &stored) {
            return Ok(info);
        }
        let info = ObjectInfo::new(class_info.clone());
        self.set_values(&info, class_info, row)?;
        *info.store.borrow_mut() = Some(Rc::downgrade(&self.inner));
        self.install_hooks(&info);
        self.file(&info)?;
        self.inner.cache.borrow_mut().add(&info);
        info.save_all();
        Ok(info)
    }

    fn set_values(
        &self,
        info: &Rc<ObjectInfo>,
        class_info: &Arc<ClassInfo>,
        row: &[Value],
    ) -> Result<()> {
        for (index, _) in class_info.columns.iter().enumerate() {
            info.set(index, row[index].clone(), true)?;
        }
        Ok(())
    }

    /// Subscribe this store to the object's lifecycle. The hooks hold a
    /// weak reference and unregister themselves once the object leaves
    /// this store.
    fn install_hooks(&self, info: &Rc<ObjectInfo>) {
        let weak = Rc::downgrade(&self.inner);
        info.event.hook(
            EventKind::Changed,
            Rc::new(move |owner, event| {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                if !owned_by(owner, &inner) {
                    return false;
                }
                if let Event::Changed {
                    new_value,
                    lazy,
                    from_db,
                    ..
                } = event
                {
                    let dirtying = !from_db
                        && (new_value.is_some()
                            || matches!(
                                lazy,
                                Some(LazyValue::Sequence(..)) | Some(LazyValue::Expr(..))
                            ));
                    if dirtying {
                        Store { inner }.mark_dirty(owner);
                    }
                }
                true
            }),
        );
        let weak = Rc::downgrade(&self.inner);
        info.event.hook(
            EventKind::ResolveLazy,
            Rc::new(move |owner, event| {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                if !owned_by(owner, &inner) {
                    return false;
                }
                if let Event::ResolveLazy { lazy, .. } = event {
                    let store = Store { inner };
                    let resolved = match lazy {
                        LazyValue::AutoReload => store.reload(owner),
                        _ => store.flush(),
                    };
                    if let Err(error) = resolved {
                        log::warn!("could not resolve a lazy column: {error}");
                    }
                }
                true
            }),
        );
    }
}

fn owned_by(info: &Rc<ObjectInfo>, inner: &Rc<StoreInner>) -> bool {
    info.store
        .borrow()
        .as_ref()
        .and_then(Weak::upgrade)
        .is_some_and(|owner| Rc::ptr_eq(&owner, inner))
}
