use crate::{
    Column, ColumnRef, Entity, Error, Event, EventKind, Expr, Insert, Obj, ObjectInfo, Result,
    ResultSet, Store, Value,
    expr::Delete,
};
use std::{
    marker::PhantomData,
    rc::{Rc, Weak},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

static NEXT_RELATION_ID: AtomicU64 = AtomicU64::new(1);

/// One foreign-key relationship: which columns on one side point at
/// which columns on the other.
struct Relation {
    id: u64,
    local_key: Vec<ColumnRef>,
    remote_key: Vec<ColumnRef>,
}

impl Relation {
    fn new(local_key: Vec<ColumnRef>, remote_key: Vec<ColumnRef>) -> Result<Arc<Relation>> {
        if local_key.is_empty() || local_key.len() != remote_key.len() {
            return Err(Error::store(
                "a relation needs matching, non-empty key column lists",
            ));
        }
        Ok(Arc::new(Relation {
            id: NEXT_RELATION_ID.fetch_add(1, Ordering::Relaxed),
            local_key,
            remote_key,
        }))
    }
}

/// A link to an object whose key does not exist yet. Kept on the side
/// that will receive the key values once the other side is flushed.
pub(crate) struct LinkState {
    pub(crate) peer: Weak<ObjectInfo>,
}

fn resolve_columns(class_info: &Arc<crate::ClassInfo>, names: &[&str]) -> Result<Vec<ColumnRef>> {
    names
        .iter()
        .map(|name| {
            class_info
                .column(name)
                .ok_or_else(|| {
                    Error::Class(
                        format!("{} has no column named {name}", class_info.class_name).into(),
                    )
                })
        })
        .collect()
}

fn stored_key(info: &Rc<ObjectInfo>, columns: &[ColumnRef]) -> Option<Vec<Value>> {
    columns
        .iter()
        .map(|column| info.with_variables(|variables| variables[column.index].stored().cloned()))
        .collect()
}

/// Put both objects in the same store, or fail if they already disagree.
fn merge_stores(a: &Rc<ObjectInfo>, b: &Rc<ObjectInfo>) -> Result<()> {
    match (Store::of(a), Store::of(b)) {
        (Some(left), Some(right)) if !left.same(&right) => {
            Err(Error::store("objects belong to different stores"))
        }
        (Some(store), None) => store.add(b),
        (None, Some(store)) => store.add(a),
        _ => Ok(()),
    }
}

/// Copy the source's key into the target's columns, or if the key is
/// not generated yet, remember the link and finish it when the source
/// gets flushed. The source is constrained to flush before the target
/// while the link is pending, and a manual write to the target's key
/// columns drops the pending link.
fn link(
    relation: &Arc<Relation>,
    source: &Rc<ObjectInfo>,
    source_key: &[ColumnRef],
    target: &Rc<ObjectInfo>,
    target_key: &[ColumnRef],
) -> Result<()> {
    merge_stores(source, target)?;
    if let Some(values) = stored_key(source, source_key) {
        drop_link(relation, target);
        for (column, value) in target_key.iter().zip(values) {
            target.set(column.index, value, false)?;
        }
        return Ok(());
    }
    target.relations.borrow_mut().insert(
        relation.id,
        LinkState {
            peer: Rc::downgrade(source),
        },
    );
    if let Some(store) = Store::of(target) {
        store.add_flush_order(source, target);
    } else {
        // Not stored yet; establish the ordering once it is.
        let relation = relation.clone();
        let weak_source = Rc::downgrade(source);
        target.event.hook(
            EventKind::Added,
            Rc::new(move |owner, _| {
                if !owner.relations.borrow().contains_key(&relation.id) {
                    return false;
                }
                let Some(source) = weak_source.upgrade() else {
                    return false;
                };
                if let Some(store) = Store::of(owner) {
                    if let Err(error) = store.add(&source) {
                        log::warn!("could not add a referenced object: {error}");
                    }
                    store.add_flush_order(&source, owner);
                }
                false
            }),
        );
    }
    let hook_relation = relation.clone();
    let weak_target = Rc::downgrade(target);
    let source_key: Vec<ColumnRef> = source_key.to_vec();
    let target_key_copy: Vec<ColumnRef> = target_key.to_vec();
    source.event.hook(
        EventKind::Flushed,
        Rc::new(move |source_owner, _| {
            let Some(target) = weak_target.upgrade() else {
                return false;
            };
            let still_linked = target
                .relations
                .borrow()
                .get(&hook_relation.id)
                .and_then(|state| state.peer.upgrade())
                .is_some_and(|peer| Rc::ptr_eq(&peer, source_owner));
            if !still_linked {
                return false;
            }
            let Some(values) = stored_key(source_owner, &source_key) else {
                return true;
            };
            drop_link(&hook_relation, &target);
            for (column, value) in target_key_copy.iter().zip(values) {
                if let Err(error) = target.set(column.index, value, false) {
                    log::warn!("could not complete a deferred reference: {error}");
                }
            }
            false
        }),
    );
    let hook_relation = relation.clone();
    let key_indexes: Vec<usize> = target_key.iter().map(|c| c.index).collect();
    target.event.hook(
        EventKind::Changed,
        Rc::new(move |owner, event| {
            let Event::Changed { column, .. } = event else {
                return true;
            };
            if !key_indexes.contains(column) {
                return true;
            }
            // The deferred copy clears the link before writing, so any
            // key change seen here is a manual one and severs the link.
            drop_link(&hook_relation, owner);
            false
        }),
    );
    Ok(())
}

fn drop_link(relation: &Arc<Relation>, target: &Rc<ObjectInfo>) {
    let state = target.relations.borrow_mut().remove(&relation.id);
    if let Some(state) = state {
        if let (Some(store), Some(peer)) = (Store::of(target), state.peer.upgrade()) {
            store.remove_flush_order(&peer, target);
        }
    }
}

fn linked_peer(relation: &Arc<Relation>, target: &Rc<ObjectInfo>) -> Option<Rc<ObjectInfo>> {
    target
        .relations
        .borrow()
        .get(&relation.id)
        .and_then(|state| state.peer.upgrade())
}

/// A to-one relationship: objects of `L` carry key columns pointing at
/// one object of `R`.
pub struct Reference<L: Entity, R: Entity> {
    relation: Arc<Relation>,
    on_remote: bool,
    _marker: PhantomData<(L, R)>,
}

impl<L: Entity, R: Entity> Reference<L, R> {
    pub fn new(local_columns: &[&str], remote_columns: &[&str]) -> Result<Self> {
        Ok(Self {
            relation: Relation::new(
                resolve_columns(&L::class_info(), local_columns)?,
                resolve_columns(&R::class_info(), remote_columns)?,
            )?,
            on_remote: false,
            _marker: PhantomData,
        })
    }

    /// Like [`Reference::new`], but the key columns live on the remote
    /// side: `remote_columns` on `R` point back at `local_columns` on
    /// `L`, a one to one owned by the other table.
    pub fn on_remote(local_columns: &[&str], remote_columns: &[&str]) -> Result<Self> {
        Ok(Self {
            relation: Relation::new(
                resolve_columns(&L::class_info(), local_columns)?,
                resolve_columns(&R::class_info(), remote_columns)?,
            )?,
            on_remote: true,
            _marker: PhantomData,
        })
    }

    /// The referenced object, `None` when the key columns are NULL. A
    /// pending link resolves without touching the database.
    pub fn get(&self, local: &Obj<L>) -> Result<Option<Obj<R>>> {
        let info = local.info();
        if let Some(peer) = linked_peer(&self.relation, info) {
            return Ok(Some(Obj::from_info(peer)));
        }
        let mut values = Vec::with_capacity(self.relation.local_key.len());
        for column in &self.relation.local_key {
            match info.get(column.index)? {
                Value::Null => return Ok(None),
                value => values.push(value),
            }
        }
        let store =
            Store::of(info).ok_or_else(|| Error::store("object is not in a store"))?;
        let remote_info = R::class_info();
        let targets_primary_key = self.relation.remote_key.len() == remote_info.primary_key.len()
            && self
                .relation
                .remote_key
                .iter()
                .all(|column| remote_info.primary_key.contains(&column.index));
        if targets_primary_key {
            return store.get::<R>(Value::List(values));
        }
        // Keys that are not the remote's primary key cannot use the
        // identity map directly; resolve with a query instead.
        let conditions: Vec<Expr> = self
            .relation
            .remote_key
            .iter()
            .zip(values)
            .map(|(column, value)| Expr::from(column).eq(value))
            .collect();
        store.find::<R>(Expr::and_all(conditions))?.one()
    }

    /// Point `local` at `remote`, or at nothing. Linking to an object
    /// whose key is yet to be generated defers the key copy to its
    /// flush.
    pub fn set(&self, local: &Obj<L>, remote: Option<&Obj<R>>) -> Result<()> {
        let info = local.info();
        match remote {
            None => {
                if self.on_remote {
                    // The key sits on the other side; detach whoever
                    // currently points back at us.
                    if let Some(current) = self.get(local)? {
                        drop_link(&self.relation, current.info());
                        for column in &self.relation.remote_key {
                            current.info().set(column.index, Value::Null, false)?;
                        }
                    }
                    return Ok(());
                }
                drop_link(&self.relation, info);
                for column in &self.relation.local_key {
                    info.set(column.index, Value::Null, false)?;
                }
                Ok(())
            }
            Some(remote) if self.on_remote => link(
                &self.relation,
                info,
                &self.relation.local_key,
                remote.info(),
                &self.relation.remote_key,
            ),
            Some(remote) => link(
                &self.relation,
                remote.info(),
                &self.relation.remote_key,
                info,
                &self.relation.local_key,
            ),
        }
    }
}

/// A to-many relationship: objects of `R` carry key columns pointing
/// back at one object of `L`.
pub struct ReferenceSet<L: Entity, R: Entity> {
    relation: Arc<Relation>,
    _marker: PhantomData<(L, R)>,
}

impl<L: Entity, R: Entity> ReferenceSet<L, R> {
    /// `local_columns` are on `L` (usually its key), `remote_columns`
    /// the foreign-key columns on `R`.
    pub fn new(local_columns: &[&str], remote_columns: &[&str]) -> Result<Self> {
        Ok(Self {
            relation: Relation::new(
                resolve_columns(&L::class_info(), local_columns)?,
                resolve_columns(&R::class_info(), remote_columns)?,
            )?,
            _marker: PhantomData,
        })
    }

    fn local_values(&self, local: &Obj<L>) -> Result<Vec<Value>> {
        let store = Store::of(local.info())
            .ok_or_else(|| Error::store("object is not in a store"))?;
        store.flush()?;
        let info = local.info();
        self.relation
            .local_key
            .iter()
            .map(|column| info.get(column.index))
            .collect()
    }

    /// The members, as a narrowable result set.
    pub fn find(&self, local: &Obj<L>) -> Result<ResultSet<R>> {
        let values = self.local_values(local)?;
        let conditions: Vec<Expr> = self
            .relation
            .remote_key
            .iter()
            .zip(values)
            .map(|(column, value)| Expr::from(column).eq(value))
            .collect();
        let store = Store::of(local.info())
            .ok_or_else(|| Error::store("object is not in a store"))?;
        store.find::<R>(Expr::and_all(conditions))
    }

    /// Make `remote` a member by writing the owner's key into it.
    pub fn add(&self, local: &Obj<L>, remote: &Obj<R>) -> Result<()> {
        link(
            &self.relation,
            local.info(),
            &self.relation.local_key,
            remote.info(),
            &self.relation.remote_key,
        )
    }

    /// Detach `remote` by nulling its foreign-key columns.
    pub fn remove(&self, remote: &Obj<R>) -> Result<()> {
        let info = remote.info();
        drop_link(&self.relation, info);
        for column in &self.relation.remote_key {
            info.set(column.index, Value::Null, false)?;
        }
        Ok(())
    }

    /// Detach every member with one statement.
    pub fn clear(&self, local: &Obj<L>) -> Result<u64> {
        let changes: Vec<(&str, Expr)> = self
            .relation
            .remote_key
            .iter()
            .map(|column| (column.name.as_str(), Expr::value(Value::Null)))
            .collect();
        self.find(local)?.set(&changes)
    }
}

/// A many-to-many relationship through a link table that is not itself
/// mapped: rows pair the key of an `L` with the key of an `R`.
pub struct IndirectReferenceSet<L: Entity, R: Entity> {
    local_key: Vec<ColumnRef>,
    link_local_key: Vec<ColumnRef>,
    link_remote_key: Vec<ColumnRef>,
    remote_key: Vec<ColumnRef>,
    link_table: String,
    _marker: PhantomData<(L, R)>,
}

impl<L: Entity, R: Entity> IndirectReferenceSet<L, R> {
    pub fn new(
        link_table: &str,
        local_columns: &[&str],
        link_local_columns: &[&str],
        link_remote_columns: &[&str],
        remote_columns: &[&str],
    ) -> Result<Self> {
        let local_key = resolve_columns(&L::class_info(), local_columns)?;
        let remote_key = resolve_columns(&R::class_info(), remote_columns)?;
        if link_local_columns.len() != local_key.len()
            || link_remote_columns.len() != remote_key.len()
        {
            return Err(Error::store(
                "link table columns do not pair up with the keys they carry",
            ));
        }
        let link_column = |index: usize, name: &&str, like: &ColumnRef| {
            Arc::new(Column {
                name: (*name).to_string(),
                table: link_table.to_string(),
                factory: like.factory.clone(),
                index,
                primary: 0,
            })
        };
        let link_local_key = link_local_columns
            .iter()
            .zip(&local_key)
            .enumerate()
            .map(|(i, (name, like))| link_column(i, name, like))
            .collect();
        let link_remote_key = link_remote_columns
            .iter()
            .zip(&remote_key)
            .enumerate()
            .map(|(i, (name, like))| link_column(link_local_columns.len() + i, name, like))
            .collect();
        Ok(Self {
            local_key,
            link_local_key,
            link_remote_key,
            remote_key,
            link_table: link_table.to_string(),
            _marker: PhantomData,
        })
    }

    fn keys(&self, store: &Store, info: &Rc<ObjectInfo>, key: &[ColumnRef]) -> Result<Vec<Value>> {
        store.flush()?;
        key.iter().map(|column| info.get(column.index)).collect()
    }

    /// The members, joined through the link table.
    pub fn all(&self, local: &Obj<L>) -> Result<Vec<Obj<R>>> {
        let store = Store::of(local.info())
            .ok_or_else(|| Error::store("object is not in a store"))?;
        let values = self.keys(&store, local.info(), &self.local_key)?;
        let class_info = R::class_info();
        let mut conditions: Vec<Expr> = self
            .link_local_key
            .iter()
            .zip(values)
            .map(|(column, value)| Expr::from(column).eq(value))
            .collect();
        for (link_column, remote_column) in self.link_remote_key.iter().zip(&self.remote_key) {
            conditions.push(Expr::from(link_column).eq(Expr::from(remote_column)));
        }
        let select = crate::Select {
            columns: class_info.columns.iter().map(Expr::from).collect(),
            where_clause: Expr::and_all(conditions),
            tables: vec![
                class_info.table_expr(),
                Expr::Table(self.link_table.clone()),
            ],
            order_by: class_info.default_order.clone(),
            ..crate::Select::default()
        };
        let result = store.execute(&Expr::Select(Box::new(select)))?;
        let mut objects = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            objects.push(Obj::from_info(store.load_object(&class_info, row)?));
        }
        Ok(objects)
    }

    fn pair(&self, local: &Obj<L>, remote: &Obj<R>) -> Result<(Store, Vec<Value>, Vec<Value>)> {
        merge_stores(local.info(), remote.info())?;
        let store = Store::of(local.info())
            .ok_or_else(|| Error::store("object is not in a store"))?;
        let local_values = self.keys(&store, local.info(), &self.local_key)?;
        let remote_values = self.keys(&store, remote.info(), &self.remote_key)?;
        Ok((store, local_values, remote_values))
    }

    /// Insert a link row pairing the two objects.
    pub fn add(&self, local: &Obj<L>, remote: &Obj<R>) -> Result<()> {
        let (store, local_values, remote_values) = self.pair(local, remote)?;
        let columns: Vec<Expr> = self
            .link_local_key
            .iter()
            .chain(&self.link_remote_key)
            .map(Expr::from)
            .collect();
        let row: Vec<Expr> = local_values
            .into_iter()
            .chain(remote_values)
            .map(Expr::value)
            .collect();
        let insert = Insert {
            columns,
            values: vec![row],
            source: None,
            table: Some(Expr::Table(self.link_table.clone())),
            default_table: None,
        };
        store.execute(&Expr::Insert(Box::new(insert)))?;
        Ok(())
    }

    /// Delete the link row pairing the two objects.
    pub fn remove(&self, local: &Obj<L>, remote: &Obj<R>) -> Result<()> {
        let (store, local_values, remote_values) = self.pair(local, remote)?;
        let conditions: Vec<Expr> = self
            .link_local_key
            .iter()
            .zip(local_values)
            .chain(self.link_remote_key.iter().zip(remote_values))
            .map(|(column, value)| Expr::from(column).eq(value))
            .collect();
        let delete = Delete {
            where_clause: Expr::and_all(conditions),
            table: Some(Expr::Table(self.link_table.clone())),
            default_table: None,
        };
        store.execute(&Expr::Delete(Box::new(delete)))?;
        Ok(())
    }

    /// Delete every link row of `local`.
    pub fn clear(&self, local: &Obj<L>) -> Result<u64> {
        let store = Store::of(local.info())
            .ok_or_else(|| Error::store("object is not in a store"))?;
        let values = self.keys(&store, local.info(), &self.local_key)?;
        let conditions: Vec<Expr> = self
            .link_local_key
            .iter()
            .zip(values)
            .map(|(column, value)| Expr::from(column).eq(value))
            .collect();
        let delete = Delete {
            where_clause: Expr::and_all(conditions),
            table: Some(Expr::Table(self.link_table.clone())),
            default_table: None,
        };
        let result = store.execute(&Expr::Delete(Box::new(delete)))?;
        Ok(result.rows_affected)
    }
}
