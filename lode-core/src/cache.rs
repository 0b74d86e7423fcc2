use crate::ObjectInfo;
use std::{
    collections::{HashMap, VecDeque},
    mem,
    rc::Rc,
};

fn key(info: &Rc<ObjectInfo>) -> usize {
    Rc::as_ptr(info) as usize
}

/// Keeps strong references to recently used objects so they survive while
/// the rest of the program holds none. The identity map itself is weak;
/// without a cache every object would be refetched the moment its last
/// handle is dropped.
pub trait Cache {
    /// Note that `info` was used. May evict something older.
    fn add(&mut self, info: &Rc<ObjectInfo>);

    /// Drop `info` if cached; reports whether it was.
    fn remove(&mut self, info: &Rc<ObjectInfo>) -> bool;

    fn clear(&mut self);

    /// Change the capacity, evicting as needed. Zero disables caching.
    fn set_size(&mut self, size: usize);

    /// The cached objects, most recently used first where the policy
    /// tracks that.
    fn cached(&self) -> Vec<Rc<ObjectInfo>>;
}

/// Strict least-recently-used eviction. Precise but pays a queue
/// reshuffle on every hit.
pub struct LruCache {
    size: usize,
    order: VecDeque<usize>,
    objects: HashMap<usize, Rc<ObjectInfo>>,
}

impl LruCache {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            order: VecDeque::new(),
            objects: HashMap::new(),
        }
    }

    fn evict(&mut self) {
        while self.objects.len() > self.size {
            match self.order.pop_back() {
                Some(oldest) => {
                    self.objects.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

impl Cache for LruCache {
    fn add(&mut self, info: &Rc<ObjectInfo>) {
        if self.size == 0 {
            return;
        }
        let key = key(info);
        if self.objects.insert(key, info.clone()).is_some() {
            self.order.retain(|k| *k != key);
        }
        self.order.push_front(key);
        self.evict();
    }

    fn remove(&mut self, info: &Rc<ObjectInfo>) -> bool {
        let key = key(info);
        if self.objects.remove(&key).is_some() {
            self.order.retain(|k| *k != key);
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.objects.clear();
    }

    fn set_size(&mut self, size: usize) {
        self.size = size;
        self.evict();
    }

    fn cached(&self) -> Vec<Rc<ObjectInfo>> {
        self.order
            .iter()
            .filter_map(|k| self.objects.get(k).cloned())
            .collect()
    }
}

/// Two-generation caching: additions go into the new generation and when
/// it fills up, the old generation is discarded wholesale and the new one
/// takes its place. Usage order within a generation is not tracked, which
/// makes hits O(1), at the cost of holding up to twice `size` objects.
pub struct GenerationalCache {
    size: usize,
    new: HashMap<usize, Rc<ObjectInfo>>,
    old: HashMap<usize, Rc<ObjectInfo>>,
}

impl GenerationalCache {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            new: HashMap::new(),
            old: HashMap::new(),
        }
    }

    fn shift(&mut self) {
        self.old = mem::take(&mut self.new);
    }
}

impl Cache for GenerationalCache {
    fn add(&mut self, info: &Rc<ObjectInfo>) {
        if self.size == 0 {
            return;
        }
        self.new.insert(key(info), info.clone());
        if self.new.len() >= self.size {
            self.shift();
        }
    }

    fn remove(&mut self, info: &Rc<ObjectInfo>) -> bool {
        let key = key(info);
        let in_new = self.new.remove(&key).is_some();
        let in_old = self.old.remove(&key).is_some();
        in_new || in_old
    }

    fn clear(&mut self) {
        self.new.clear();
        self.old.clear();
    }

    fn set_size(&mut self, size: usize) {
        self.size = size;
        if size == 0 {
            self.clear();
        } else if self.new.len() >= size {
            self.shift();
        }
    }

    fn cached(&self) -> Vec<Rc<ObjectInfo>> {
        let mut objects: Vec<_> = self.new.values().cloned().collect();
        for (key, info) in &self.old {
            if !self.new.contains_key(key) {
                objects.push(info.clone());
            }
        }
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassInfo, VariableFactory};
    use std::sync::Arc;

    fn class() -> Arc<ClassInfo> {
        ClassInfo::builder("Thing", "thing")
            .column("id", VariableFactory::int())
            .primary(["id"])
            .build()
            .unwrap()
    }

    #[test]
    fn lru_evicts_oldest() {
        let class = class();
        let mut cache = LruCache::new(2);
        let a = ObjectInfo::new(class.clone());
        let b = ObjectInfo::new(class.clone());
        let c = ObjectInfo::new(class);
        cache.add(&a);
        cache.add(&b);
        cache.add(&a);
        cache.add(&c);
        let cached = cache.cached();
        assert_eq!(cached.len(), 2);
        assert!(cached.iter().any(|i| Rc::ptr_eq(i, &c)));
        assert!(cached.iter().any(|i| Rc::ptr_eq(i, &a)));
        assert!(!cached.iter().any(|i| Rc::ptr_eq(i, &b)));
    }

    #[test]
    fn lru_zero_size_caches_nothing() {
        let mut cache = LruCache::new(0);
        let a = ObjectInfo::new(class());
        cache.add(&a);
        assert!(cache.cached().is_empty());
        assert!(!cache.remove(&a));
    }

    #[test]
    fn generational_keeps_previous_generation() {
        let class = class();
        let mut cache = GenerationalCache::new(2);
        let a = ObjectInfo::new(class.clone());
        let b = ObjectInfo::new(class.clone());
        let c = ObjectInfo::new(class);
        cache.add(&a);
        cache.add(&b);
        // The first generation just shifted; a and b are still held.
        cache.add(&c);
        let cached = cache.cached();
        assert!(cached.iter().any(|i| Rc::ptr_eq(i, &a)));
        assert!(cached.iter().any(|i| Rc::ptr_eq(i, &b)));
        assert!(cached.iter().any(|i| Rc::ptr_eq(i, &c)));
    }

    #[test]
    fn shrinking_drops_objects() {
        let class = class();
        let mut cache = LruCache::new(3);
        let objects: Vec<_> = (0..3).map(|_| ObjectInfo::new(class.clone())).collect();
        for info in &objects {
            cache.add(info);
        }
        cache.set_size(1);
        assert_eq!(cache.cached().len(), 1);
    }
}
