//! Aliasing table from symbolic references to realized values.
//!
//! The heap is a list of snapshots. A checkpoint deep-copies the newest
//! snapshot, so older snapshots keep the values as they were (for example to
//! evaluate "old" values in a postcondition). Which entry a reference
//! resolves to is a solver decision, made by
//! [`StateSpace::find_key_in_heap`](crate::StateSpace::find_key_in_heap).

use std::fmt;

/// Logical type of a heap entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeTag {
    pub name: String,
    pub params: Vec<TypeTag>,
}

impl TypeTag {
    const ANY: &'static str = "Any";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn generic(name: impl Into<String>, params: Vec<TypeTag>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// The type that unifies with every other type.
    pub fn any() -> Self {
        Self::new(Self::ANY)
    }

    pub fn is_any(&self) -> bool {
        self.name == Self::ANY
    }

    /// Whether a value of one type could be a value of the other.
    pub fn unifies_with(&self, other: &TypeTag) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        self.name == other.name
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.unifies_with(b))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
            write!(f, "[{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Index of a heap snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotRef(usize);

impl SnapshotRef {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Location of one entry within one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapHandle {
    pub snapshot: SnapshotRef,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct HeapEntry<R, V> {
    pub reference: R,
    pub ty: TypeTag,
    pub value: V,
}

/// Snapshots of (reference, type, value) entries. `V::clone` is the deep copy.
#[derive(Debug, Clone)]
pub struct SymbolicHeap<R, V> {
    snapshots: Vec<Vec<HeapEntry<R, V>>>,
}

impl<R: Clone, V: Clone> SymbolicHeap<R, V> {
    pub fn new() -> Self {
        Self {
            snapshots: vec![Vec::new()],
        }
    }

    pub fn current_snapshot(&self) -> SnapshotRef {
        SnapshotRef(self.snapshots.len() - 1)
    }

    /// Deep-copy the newest snapshot and make the copy the live one.
    pub fn checkpoint(&mut self) -> SnapshotRef {
        let copy = self.snapshots.last().cloned().unwrap_or_default();
        self.snapshots.push(copy);
        self.current_snapshot()
    }

    pub fn entries(&self, snapshot: SnapshotRef) -> &[HeapEntry<R, V>] {
        self.snapshots
            .get(snapshot.0)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Add a value to the live snapshot and to every snapshot from `since`
    /// on, since the value already existed when those were taken.
    pub fn add_value_since(
        &mut self,
        since: SnapshotRef,
        reference: R,
        ty: TypeTag,
        value: V,
    ) -> HeapHandle {
        let live = self.snapshots.len() - 1;
        let first = since.0.min(live);
        for heap in &mut self.snapshots[first..live] {
            heap.push(HeapEntry {
                reference: reference.clone(),
                ty: ty.clone(),
                value: value.clone(),
            });
        }
        let heap = &mut self.snapshots[live];
        heap.push(HeapEntry {
            reference,
            ty,
            value,
        });
        HeapHandle {
            snapshot: SnapshotRef(live),
            index: heap.len() - 1,
        }
    }

    /// Add a value that predates every snapshot.
    pub fn add_value_to_heaps(&mut self, reference: R, ty: TypeTag, value: V) -> HeapHandle {
        self.add_value_since(SnapshotRef(0), reference, ty, value)
    }

    pub fn get(&self, handle: HeapHandle) -> Option<&V> {
        self.snapshots
            .get(handle.snapshot.0)?
            .get(handle.index)
            .map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, handle: HeapHandle) -> Option<&mut V> {
        self.snapshots
            .get_mut(handle.snapshot.0)?
            .get_mut(handle.index)
            .map(|entry| &mut entry.value)
    }
}

impl<R: Clone, V: Clone> Default for SymbolicHeap<R, V> {
    fn default() -> Self {
        Self::new()
    }
}
