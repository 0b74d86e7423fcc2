use crate::{
    Entity, Error, Expr, LazyValue, Obj, ObjectInfo, Result, Select, Store, Update, Value,
    compile::{eval_local, match_local},
};
use std::{marker::PhantomData, rc::Rc, sync::Arc};

/// A lazy query over one class: nothing runs until results are asked for,
/// and narrowing, ordering or slicing just builds a new set. Created by
/// [`Store::find`].
pub struct ResultSet<E: Entity> {
    store: Store,
    where_clause: Option<Expr>,
    order_by: Vec<Expr>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
    _marker: PhantomData<E>,
}

impl<E: Entity> Clone for ResultSet<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            where_clause: self.where_clause.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            distinct: self.distinct,
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> ResultSet<E> {
    pub(crate) fn new(store: Store, where_clause: Option<Expr>) -> Self {
        Self {
            store,
            where_clause,
            order_by: E::class_info().default_order.clone(),
            limit: None,
            offset: None,
            distinct: false,
            _marker: PhantomData,
        }
    }

    /// Narrow with a further condition, ANDed onto the current one.
    pub fn find(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(current) => current.and(condition),
            None => condition,
        });
        self
    }

    /// Replace the ordering. An empty list leaves the set unordered.
    pub fn order_by(mut self, order: impl IntoIterator<Item = Expr>) -> Self {
        self.order_by = order.into_iter().collect();
        self
    }

    /// Keep `limit` rows starting `offset` rows in, composing with any
    /// earlier slice.
    pub fn slice(mut self, offset: u64, limit: Option<u64>) -> Self {
        let base = self.offset.unwrap_or(0);
        self.offset = Some(base + offset);
        self.limit = match (self.limit, limit) {
            (Some(current), Some(new)) => Some(new.min(current.saturating_sub(offset))),
            (Some(current), None) => Some(current.saturating_sub(offset)),
            (None, new) => new,
        };
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    fn select(&self) -> Select {
        let class_info = E::class_info();
        Select {
            columns: class_info.columns.iter().map(Expr::from).collect(),
            where_clause: self.where_clause.clone(),
            default_tables: vec![class_info.table_expr()],
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            distinct: self.distinct,
            ..Select::default()
        }
    }

    fn load_rows(&self, select: Select) -> Result<Vec<Obj<E>>> {
        let class_info = E::class_info();
        let result = self.store.execute(&Expr::Select(Box::new(select)))?;
        let mut objects = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            objects.push(Obj::from_info(self.store.load_object(&class_info, row)?));
        }
        Ok(objects)
    }

    /// Run the query and materialize every matching object.
    pub fn all(&self) -> Result<Vec<Obj<E>>> {
        self.load_rows(self.select())
    }

    /// The single result, `None` when there is none. More than one match
    /// is an error.
    pub fn one(&self) -> Result<Option<Obj<E>>> {
        let mut select = self.select();
        // Fetching two suffices to detect excess.
        select.limit = Some(self.limit.unwrap_or(u64::MAX).min(2));
        let mut objects = self.load_rows(select)?;
        if objects.len() > 1 {
            return Err(Error::NotOne);
        }
        Ok(objects.pop())
    }

    /// Any one result, in no particular order.
    pub fn any(&self) -> Result<Option<Obj<E>>> {
        let mut select = self.select();
        select.limit = Some(1);
        Ok(self.load_rows(select)?.pop())
    }

    /// The first result by the set's order. Meaningless, and an error,
    /// without one.
    pub fn first(&self) -> Result<Option<Obj<E>>> {
        if self.order_by.is_empty() {
            return Err(Error::Unordered);
        }
        let mut select = self.select();
        select.limit = Some(1);
        Ok(self.load_rows(select)?.pop())
    }

    /// The last result by the set's order, fetched by walking the order
    /// backwards.
    pub fn last(&self) -> Result<Option<Obj<E>>> {
        if self.order_by.is_empty() {
            return Err(Error::Unordered);
        }
        if self.limit.is_some() || self.offset.is_some() {
            return Err(Error::FeatureUnsupported(
                "last() on a sliced result set".into(),
            ));
        }
        let mut select = self.select();
        select.limit = Some(1);
        select.order_by = self
            .order_by
            .iter()
            .cloned()
            .map(Expr::inverted_direction)
            .collect();
        Ok(self.load_rows(select)?.pop())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.any()?.is_none())
    }

    fn aggregate(&self, column: Expr) -> Result<Value> {
        let mut select = self.select();
        select.columns = vec![column];
        select.order_by = Vec::new();
        let result = self.store.execute(&Expr::Select(Box::new(select)))?;
        match result.get_one() {
            Some(row) if !row.is_empty() => Ok(row[0].clone()),
            _ => Ok(Value::Null),
        }
    }

    pub fn count(&self) -> Result<i64> {
        let column = if self.distinct {
            let class_info = E::class_info();
            let mut keys: Vec<Expr> = class_info
                .primary_columns()
                .iter()
                .map(Expr::from)
                .collect();
            let key = if keys.len() == 1 {
                keys.remove(0)
            } else {
                Expr::Row(keys)
            };
            Expr::Count {
                expr: Some(Box::new(key)),
                distinct: true,
            }
        } else {
            Expr::count()
        };
        match self.aggregate(column)? {
            Value::Int(count) => Ok(count),
            Value::Null => Ok(0),
            other => Err(Error::value(format!(
                "backend returned a {} for a count",
                other.type_name()
            ))),
        }
    }

    pub fn max(&self, column: &str) -> Result<Value> {
        self.aggregate(self.column(column)?.max())
    }

    pub fn min(&self, column: &str) -> Result<Value> {
        self.aggregate(self.column(column)?.min())
    }

    pub fn sum(&self, column: &str) -> Result<Value> {
        self.aggregate(self.column(column)?.sum())
    }

    pub fn avg(&self, column: &str) -> Result<Value> {
        self.aggregate(self.column(column)?.avg())
    }

    fn column(&self, name: &str) -> Result<Expr> {
        let class_info = E::class_info();
        let index = class_info.column_index(name)?;
        Ok(Expr::from(&class_info.columns[index]))
    }

    /// Delete every matching row with one statement. Objects already
    /// loaded are not touched.
    pub fn remove(&self) -> Result<u64> {
        if self.limit.is_some() || self.offset.is_some() {
            return Err(Error::FeatureUnsupported(
                "remove() on a sliced result set".into(),
            ));
        }
        let class_info = E::class_info();
        let delete = crate::expr::Delete {
            where_clause: self.where_clause.clone(),
            table: Some(class_info.table_expr()),
            default_table: None,
        };
        let result = self.store.execute(&Expr::Delete(Box::new(delete)))?;
        Ok(result.rows_affected)
    }

    /// Update every matching row with one statement, then replay the
    /// change onto already-loaded matching objects so they agree with
    /// the database. An expression that cannot be evaluated locally
    /// invalidates the column instead, deferring to the next read.
    pub fn set(&self, changes: &[(&str, Expr)]) -> Result<u64> {
        if self.limit.is_some() || self.offset.is_some() {
            return Err(Error::FeatureUnsupported(
                "set() on a sliced result set".into(),
            ));
        }
        if changes.is_empty() {
            return Ok(0);
        }
        let class_info = E::class_info();
        let mut sets = Vec::with_capacity(changes.len());
        let mut indexed = Vec::with_capacity(changes.len());
        for (name, expr) in changes {
            let index = class_info.column_index(name)?;
            sets.push((Expr::from(&class_info.columns[index]), expr.clone()));
            indexed.push((index, expr));
        }
        let update = Update {
            set: sets,
            where_clause: self.where_clause.clone(),
            table: Some(class_info.table_expr()),
            default_table: None,
        };
        let result = self.store.execute(&Expr::Update(Box::new(update)))?;
        for info in self.matching_cached()? {
            for (index, expr) in &indexed {
                let getter = object_getter(&info);
                match eval_local(expr, &getter) {
                    Ok(value) => info.set(*index, value, true)?,
                    Err(_) => info.set_lazy(*index, LazyValue::AutoReload),
                }
            }
        }
        Ok(result.rows_affected)
    }

    /// The already-loaded objects this set's condition matches, found by
    /// scanning the identity map instead of the database. A condition
    /// that cannot be evaluated locally is an error.
    pub fn cached(&self) -> Result<Vec<Obj<E>>> {
        Ok(self
            .matching_cached()?
            .into_iter()
            .map(Obj::from_info)
            .collect())
    }

    fn matching_cached(&self) -> Result<Vec<Rc<ObjectInfo>>> {
        let class_info = E::class_info();
        let live = self.store.live_objects(Some(class_info.token()));
        let Some(where_clause) = &self.where_clause else {
            return Ok(live);
        };
        let mut matching = Vec::new();
        for info in live {
            let getter = object_getter(&info);
            if match_local(where_clause, &getter)? {
                matching.push(info);
            }
        }
        Ok(matching)
    }
}

fn object_getter(info: &Rc<ObjectInfo>) -> impl Fn(&str) -> Option<Value> + use<> {
    let class_info: Arc<crate::ClassInfo> = info.class_info().clone();
    let info = info.clone();
    move |name: &str| {
        let index = class_info.column_index(name).ok()?;
        info.with_variables(|variables| variables[index].stored().cloned())
    }
}
