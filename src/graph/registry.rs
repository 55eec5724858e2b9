use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::model::{Output, Script, Transaction};
use crate::types::{EntityKind, OutputId, ScriptId, TxId};

/// An entity type that lives in a [`Registry`].
pub trait Keyed {
    /// Identity type.
    type Id: Copy + Eq + Hash;
    /// Kind tag.
    const KIND: EntityKind;
    /// Creates an entity with only its identity set.
    fn create(id: Self::Id) -> Self;
}

impl Keyed for Transaction {
    type Id = TxId;
    const KIND: EntityKind = EntityKind::Tx;
    fn create(id: TxId) -> Self {
        Transaction::new(id)
    }
}

impl Keyed for Output {
    type Id = OutputId;
    const KIND: EntityKind = EntityKind::Output;
    fn create(id: OutputId) -> Self {
        Output::new(id)
    }
}

impl Keyed for Script {
    type Id = ScriptId;
    const KIND: EntityKind = EntityKind::Script;
    fn create(id: ScriptId) -> Self {
        Script::new(id)
    }
}

/// Identity to canonical entity map for one kind.
///
/// Entries are created on the first explicit [`Registry::find_or_create`]
/// and never removed.
pub struct Registry<E: Keyed> {
    entries: RefCell<FxHashMap<E::Id, Rc<E>>>,
}

impl<E: Keyed> Registry<E> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(FxHashMap::default()),
        }
    }

    /// Returns the canonical entity for `id`, creating it if this is the first reference.
    pub fn find_or_create(&self, id: E::Id) -> Rc<E> {
        let mut entries = self.entries.borrow_mut();
        Rc::clone(entries.entry(id).or_insert_with(|| Rc::new(E::create(id))))
    }

    /// Returns the canonical entity for `id` without creating one.
    pub fn get(&self, id: E::Id) -> Option<Rc<E>> {
        self.entries.borrow().get(&id).cloned()
    }

    pub fn contains(&self, id: E::Id) -> bool {
        self.entries.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<E: Keyed> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}
