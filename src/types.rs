//! Typed identities shared by the graph, the store and the loader.

use std::fmt;

/// Store-assigned identity of a transaction row.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxId(pub i64);
/// Store-assigned identity of an output row.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct OutputId(pub i64);
/// Store-assigned identity of a script row.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ScriptId(pub i64);
/// Identifier returned by the store for a recorded remote response.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ResponseId(pub i64);

/// The three kinds of graph entity.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum EntityKind {
    /// A transaction.
    Tx,
    /// A transaction output, optionally joined with the input spending it.
    Output,
    /// A locking script and the pagination state of its history.
    Script,
}

impl EntityKind {
    /// Short lowercase name used in messages.
    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Tx => "tx",
            EntityKind::Output => "output",
            EntityKind::Script => "script",
        }
    }
}

/// Kind plus identity: names exactly one canonical entity in a graph.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum EntityRef {
    /// A transaction.
    Tx(TxId),
    /// An output.
    Output(OutputId),
    /// A script.
    Script(ScriptId),
}

impl EntityRef {
    /// Kind of the referenced entity.
    pub fn kind(self) -> EntityKind {
        match self {
            EntityRef::Tx(_) => EntityKind::Tx,
            EntityRef::Output(_) => EntityKind::Output,
            EntityRef::Script(_) => EntityKind::Script,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Tx(id) => write!(f, "tx#{}", id.0),
            EntityRef::Output(id) => write!(f, "output#{}", id.0),
            EntityRef::Script(id) => write!(f, "script#{}", id.0),
        }
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TxId> for EntityRef {
    fn from(value: TxId) -> Self {
        EntityRef::Tx(value)
    }
}

impl From<OutputId> for EntityRef {
    fn from(value: OutputId) -> Self {
        EntityRef::Output(value)
    }
}

impl From<ScriptId> for EntityRef {
    fn from(value: ScriptId) -> Self {
        EntityRef::Script(value)
    }
}
