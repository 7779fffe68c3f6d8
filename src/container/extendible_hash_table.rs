use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

/// A bucket holding up to `capacity` key/value pairs at a given local depth.
#[derive(Debug)]
struct Bucket<K, V> {
    items: Vec<(K, V)>,
    depth: usize,
}

impl<K: PartialEq + Copy, V: Copy> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            items: Vec::new(),
            depth,
        }
    }

    fn find(&self, key: &K) -> Option<V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    fn remove(&mut self, key: &K) -> bool {
        let before = self.items.len();
        self.items.retain(|(k, _)| k != key);
        self.items.len() < before
    }

    /// Inserts or overwrites. Returns false when the bucket is full and the
    /// key is not already present.
    fn insert(&mut self, key: K, value: V, capacity: usize) -> bool {
        if let Some(slot) = self.items.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return true;
        }
        if self.items.len() >= capacity {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

/// Directory of shared bucket references, doubling as buckets overflow.
///
/// A key hashes to directory slot `hash(key) & ((1 << global_depth) - 1)`.
/// Two slots reference the same bucket exactly when their low `local_depth`
/// bits agree. A single mutex serializes all public operations; the
/// directory doubles atomically under it.
pub struct ExtendibleHashTable<K, V> {
    bucket_capacity: usize,
    inner: Mutex<Directory<K, V>>,
}

struct Directory<K, V> {
    global_depth: usize,
    dir: Vec<Arc<Mutex<Bucket<K, V>>>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + PartialEq + Copy,
    V: Copy,
{
    /// Creates a table with one empty bucket of the given capacity.
    pub fn new(bucket_capacity: usize) -> Self {
        assert!(bucket_capacity > 0);
        Self {
            bucket_capacity,
            inner: Mutex::new(Directory {
                global_depth: 0,
                dir: vec![Arc::new(Mutex::new(Bucket::new(0)))],
            }),
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        let depth = inner.dir[dir_index].lock().depth;
        depth
    }

    pub fn num_buckets(&self) -> usize {
        let inner = self.inner.lock();
        let mut count = 0;
        for (i, bucket) in inner.dir.iter().enumerate() {
            // Count each bucket once, at the first slot referencing it.
            if !inner.dir[..i].iter().any(|b| Arc::ptr_eq(b, bucket)) {
                count += 1;
            }
        }
        count
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let index = Self::index_of(key, inner.global_depth);
        let result = inner.dir[index].lock().find(key);
        result
    }

    pub fn remove(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        let index = Self::index_of(key, inner.global_depth);
        let result = inner.dir[index].lock().remove(key);
        result
    }

    /// Inserts the pair, updating in place on a duplicate key. Splits the
    /// target bucket (doubling the directory when the bucket is already at
    /// global depth) until the insert fits.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        loop {
            let index = Self::index_of(&key, inner.global_depth);
            let bucket = Arc::clone(&inner.dir[index]);
            if bucket.lock().insert(key, value, self.bucket_capacity) {
                return;
            }
            Self::split_bucket(&mut inner, &bucket, self.bucket_capacity);
        }
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1 << global_depth) - 1)
    }

    /// Replaces a full bucket by two fresh ones of depth `d + 1`,
    /// partitioning its entries by bit `d` of the key hash and rewriting
    /// every directory slot that referenced it.
    fn split_bucket(
        inner: &mut Directory<K, V>,
        full: &Arc<Mutex<Bucket<K, V>>>,
        capacity: usize,
    ) {
        let depth = full.lock().depth;
        if depth == inner.global_depth {
            // Double the directory by duplicating every reference.
            let doubled: Vec<_> = inner.dir.iter().chain(inner.dir.iter()).cloned().collect();
            inner.dir = doubled;
            inner.global_depth += 1;
        }

        let zero = Arc::new(Mutex::new(Bucket::new(depth + 1)));
        let one = Arc::new(Mutex::new(Bucket::new(depth + 1)));
        let bit = 1usize << depth;

        {
            let full_guard = full.lock();
            let mut zero_guard = zero.lock();
            let mut one_guard = one.lock();
            for &(k, v) in &full_guard.items {
                let mut hasher = DefaultHasher::new();
                k.hash(&mut hasher);
                if (hasher.finish() as usize) & bit == 0 {
                    zero_guard.insert(k, v, capacity);
                } else {
                    one_guard.insert(k, v, capacity);
                }
            }
        }

        for (slot, entry) in inner.dir.iter_mut().enumerate() {
            if Arc::ptr_eq(entry, full) {
                *entry = if slot & bit == 0 {
                    Arc::clone(&zero)
                } else {
                    Arc::clone(&one)
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find() {
        let table = ExtendibleHashTable::<u32, u32>::new(4);

        table.insert(1, 10);
        table.insert(2, 20);
        table.insert(3, 30);

        assert_eq!(table.find(&1), Some(10));
        assert_eq!(table.find(&2), Some(20));
        assert_eq!(table.find(&3), Some(30));
        assert_eq!(table.find(&4), None);
    }

    #[test]
    fn test_duplicate_key_updates() {
        let table = ExtendibleHashTable::<u32, u32>::new(4);

        table.insert(7, 1);
        table.insert(7, 2);

        assert_eq!(table.find(&7), Some(2));
    }

    #[test]
    fn test_remove() {
        let table = ExtendibleHashTable::<u32, u32>::new(4);

        table.insert(5, 50);
        assert!(table.remove(&5));
        assert_eq!(table.find(&5), None);
        assert!(!table.remove(&5));
    }

    #[test]
    fn test_split_grows_directory() {
        let table = ExtendibleHashTable::<u32, u32>::new(2);
        assert_eq!(table.global_depth(), 0);

        for i in 0..64 {
            table.insert(i, i * 10);
        }

        assert!(table.global_depth() > 0);
        assert!(table.num_buckets() > 1);
        for i in 0..64 {
            assert_eq!(table.find(&i), Some(i * 10), "key {} lost after splits", i);
        }
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;

        let table = Arc::new(ExtendibleHashTable::<u32, u32>::new(4));
        let mut handles = Vec::new();

        for t in 0..4u32 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for i in 0..256u32 {
                    let key = t * 1000 + i;
                    table.insert(key, key + 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        for t in 0..4u32 {
            for i in 0..256u32 {
                let key = t * 1000 + i;
                assert_eq!(table.find(&key), Some(key + 1));
            }
        }
    }
}
