use crate::{ClassInfo, ColumnRef, Error, Result};
use std::sync::Arc;

/// Resolves dotted paths like `"myapp.model.User.name"` to columns.
/// Lookups may use any unambiguous suffix of a registered path, so
/// `"User.name"` and plain `"name"` work as long as only one registered
/// column matches.
#[derive(Default)]
pub struct PropertyRegistry {
    entries: Vec<(String, Arc<ClassInfo>, ColumnRef)>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every column of `class_info` under
    /// `"{prefix}.{class_name}.{column}"` (or without the prefix when
    /// it is empty).
    pub fn add_class(&mut self, prefix: &str, class_info: &Arc<ClassInfo>) {
        for column in &class_info.columns {
            let path = if prefix.is_empty() {
                format!("{}.{}", class_info.class_name, column.name)
            } else {
                format!("{prefix}.{}.{}", class_info.class_name, column.name)
            };
            self.entries.retain(|(p, _, _)| *p != path);
            self.entries
                .push((path, class_info.clone(), column.clone()));
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Find the one column whose registered path ends with `path`.
    pub fn get(&self, path: &str) -> Result<(Arc<ClassInfo>, ColumnRef)> {
        let mut found = None;
        for (registered, class_info, column) in &self.entries {
            if !matches_suffix(registered, path) {
                continue;
            }
            if found.is_some() {
                return Err(Error::PropertyPath(
                    format!("path {path:?} matches multiple properties").into(),
                ));
            }
            found = Some((class_info.clone(), column.clone()));
        }
        found.ok_or_else(|| {
            Error::PropertyPath(format!("path {path:?} matches no property").into())
        })
    }
}

/// A suffix match on dot boundaries: `"User.name"` matches
/// `"app.model.User.name"` but not `"app.model.SuperUser.name"`.
fn matches_suffix(registered: &str, path: &str) -> bool {
    registered == path
        || registered
            .strip_suffix(path)
            .is_some_and(|head| head.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VariableFactory;

    fn registry() -> PropertyRegistry {
        let user = ClassInfo::builder("User", "user")
            .column("id", VariableFactory::int())
            .column("name", VariableFactory::text())
            .primary(["id"])
            .build()
            .unwrap();
        let group = ClassInfo::builder("Group", "grp")
            .column("id", VariableFactory::int())
            .column("name", VariableFactory::text())
            .primary(["id"])
            .build()
            .unwrap();
        let mut registry = PropertyRegistry::new();
        registry.add_class("app.model", &user);
        registry.add_class("app.model", &group);
        registry
    }

    #[test]
    fn exact_and_suffix_lookup() {
        let registry = registry();
        let (_, column) = registry.get("app.model.User.name").unwrap();
        assert_eq!(column.table, "user");
        let (_, column) = registry.get("Group.name").unwrap();
        assert_eq!(column.table, "grp");
    }

    #[test]
    fn ambiguous_suffix_is_an_error() {
        let registry = registry();
        assert!(matches!(
            registry.get("name"),
            Err(Error::PropertyPath(..))
        ));
    }

    #[test]
    fn unknown_path_is_an_error() {
        let registry = registry();
        assert!(matches!(
            registry.get("User.email"),
            Err(Error::PropertyPath(..))
        ));
    }

    #[test]
    fn suffix_respects_dot_boundaries() {
        let registry = registry();
        // "ser.name" is a suffix of "User.name" textually but not on a
        // path boundary.
        assert!(registry.get("ser.name").is_err());
    }
}
