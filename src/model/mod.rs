//! Graph entities, their snapshots, and the rules for updating their fields.
//!
//! Entities hold every field in a cell so that a field which is not yet
//! known can be awaited instead of erroring. The [`fields`] module is the
//! single place describing how each field is merged and loaded.

/// Async-readable field holders.
pub mod cell;
/// Field descriptors, disciplines and join policies.
pub mod fields;
/// Plain store snapshots.
pub mod row;

mod output;
mod script;
mod tx;

pub use cell::{CellConflict, Monotonic, OneShot, Volatile};
pub use fields::{
    CellKind, Discipline, FieldSpec, Join, JoinPolicy, LoadPolicy, MaxHeight, OutputField,
    ScriptField, TxField,
};
pub use output::Output;
pub use row::{OutputRow, Pagination, ScriptRow, TxRow};
pub use script::Script;
pub use tx::{Io, Transaction};
