use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use super::{
    Bucket, BucketMut, Db, Entry, EntryIter, Order, RangeOptions, empty_bucket_name,
    not_found_bucket,
};
use crate::errors::Result;

/// In-memory store. Updates run against a copy of the tree which replaces
/// the live tree only when the closure succeeds.
#[derive(Debug, Default)]
pub struct MemoryDb {
    root: RwLock<Node>,
}

#[derive(Debug, Default, Clone)]
struct Node {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    children: BTreeMap<Vec<u8>, Node>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Db for MemoryDb {
    fn view(&self, f: &mut dyn FnMut(&dyn Bucket) -> Result<()>) -> Result<()> {
        let root = self.root.read()?;
        f(&NodeRef(&root))
    }

    fn update(&self, f: &mut dyn FnMut(&mut dyn BucketMut) -> Result<()>) -> Result<()> {
        let mut live = self.root.write()?;
        let mut scratch = live.clone();
        f(&mut NodeMut(&mut scratch))?;
        *live = scratch;
        Ok(())
    }
}

impl Node {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn first(&self) -> Option<Entry> {
        self.entries
            .first_key_value()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn last(&self) -> Option<Entry> {
        self.entries
            .last_key_value()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn range(&self, options: RangeOptions) -> EntryIter<'_> {
        let clone = |(k, v): (&Vec<u8>, &Vec<u8>)| -> Result<Entry> { Ok((k.clone(), v.clone())) };
        match (options.order, options.start) {
            (Order::Ascending, None) => Box::new(self.entries.iter().map(clone)),
            (Order::Descending, None) => Box::new(self.entries.iter().rev().map(clone)),
            (Order::Ascending, Some(start)) => Box::new(
                self.entries
                    .range::<Vec<u8>, _>((Bound::Included(start), Bound::Unbounded))
                    .map(clone),
            ),
            (Order::Descending, Some(start)) => Box::new(
                self.entries
                    .range::<Vec<u8>, _>((Bound::Unbounded, Bound::Included(start)))
                    .rev()
                    .map(clone),
            ),
        }
    }
}

struct NodeRef<'a>(&'a Node);

struct NodeMut<'a>(&'a mut Node);

impl Bucket for NodeRef<'_> {
    fn bucket(&self, name: &[u8]) -> Result<Box<dyn Bucket + '_>> {
        let child = self.0.children.get(name).ok_or_else(|| not_found_bucket(name))?;
        Ok(Box::new(NodeRef(child)))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.0.get(key))
    }

    fn first(&self) -> Result<Option<Entry>> {
        Ok(self.0.first())
    }

    fn last(&self) -> Result<Option<Entry>> {
        Ok(self.0.last())
    }

    fn range(&self, options: RangeOptions) -> Result<EntryIter<'_>> {
        Ok(self.0.range(options))
    }
}

impl Bucket for NodeMut<'_> {
    fn bucket(&self, name: &[u8]) -> Result<Box<dyn Bucket + '_>> {
        let child = self.0.children.get(name).ok_or_else(|| not_found_bucket(name))?;
        Ok(Box::new(NodeRef(child)))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.0.get(key))
    }

    fn first(&self) -> Result<Option<Entry>> {
        Ok(self.0.first())
    }

    fn last(&self) -> Result<Option<Entry>> {
        Ok(self.0.last())
    }

    fn range(&self, options: RangeOptions) -> Result<EntryIter<'_>> {
        Ok(self.0.range(options))
    }
}

impl BucketMut for NodeMut<'_> {
    fn bucket_mut(&mut self, name: &[u8]) -> Result<Box<dyn BucketMut + '_>> {
        let child = self
            .0
            .children
            .get_mut(name)
            .ok_or_else(|| not_found_bucket(name))?;
        Ok(Box::new(NodeMut(child)))
    }

    fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> Result<Box<dyn BucketMut + '_>> {
        if name.is_empty() {
            return Err(empty_bucket_name());
        }
        let child = self.0.children.entry(name.to_vec()).or_default();
        Ok(Box::new(NodeMut(child)))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.0.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::DbExt;

    fn seeded() -> MemoryDb {
        let db = MemoryDb::new();
        db.write(|root| {
            let mut b = root.create_bucket_if_not_exists(b"items")?;
            for key in ["b", "d", "a", "c"] {
                b.put(key.as_bytes(), key.to_uppercase().as_bytes())?;
            }
            Ok(())
        })
        .unwrap();
        db
    }

    fn keys(db: &MemoryDb, options: RangeOptions) -> Vec<String> {
        db.read(|root| {
            let b = root.bucket(b"items")?;
            let keys = b
                .range(options)?
                .map(|e| e.map(|(k, _)| String::from_utf8(k).unwrap()))
                .collect::<Result<Vec<_>>>()?;
            Ok(keys)
        })
        .unwrap()
    }

    #[test]
    fn test_range_orders_and_starts() {
        let db = seeded();
        assert_eq!(keys(&db, RangeOptions::ascending()), ["a", "b", "c", "d"]);
        assert_eq!(keys(&db, RangeOptions::descending()), ["d", "c", "b", "a"]);
        assert_eq!(
            keys(&db, RangeOptions::ascending().with_start("b")),
            ["b", "c", "d"]
        );
        assert_eq!(
            keys(&db, RangeOptions::descending().with_start("bb")),
            ["b", "a"]
        );
    }

    #[test]
    fn test_failed_update_leaves_no_trace() {
        let db = seeded();
        let result: Result<()> = db.write(|root| {
            let mut b = root.bucket_mut(b"items")?;
            b.put(b"z", b"Z")?;
            Err(crate::errors::Error::Configuration("abort".into()))
        });
        assert!(result.is_err());
        let z = db.read(|root| root.bucket(b"items")?.get(b"z")).unwrap();
        assert!(z.is_none());
    }
}
