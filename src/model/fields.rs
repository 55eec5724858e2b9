//! Field descriptors and the two update disciplines.
//!
//! Every attribute of every graph entity is described once, in a static
//! table, by a [`FieldSpec`]: how re-assignments are reconciled, which cell
//! flavour holds it, and how the loader populates it when it is read before
//! being known.

use std::collections::BTreeSet;

use crate::error::{GraphError, Result};
use crate::types::EntityRef;

use super::cell::{CellConflict, Monotonic, OneShot};

/// How a field reconciles a new value with the one it already holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Discipline {
    /// Set once; equal re-sets are no-ops, different ones are a conflict.
    Idempotent,
    /// Combined with the held value through a join that never loses information.
    Monotonic(JoinPolicy),
}

/// Join functions used by monotonic fields.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinPolicy {
    /// Set union.
    Union,
    /// Maximum while unspent; fixed to the spender's height once spent.
    SettlementMax,
    /// Script pagination bookkeeping, replaced wholesale with guarded transitions.
    Pagination,
}

/// Which cell flavour backs a field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CellKind {
    /// Completed once.
    OneShot,
    /// Completed repeatedly with replacement values.
    Volatile,
    /// Seeded, then joined.
    Monotonic,
}

/// How the loader populates a field that is read before it is known.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadPolicy {
    /// Transaction row from the store, downloading the transaction on a miss.
    TxRow,
    /// Output rows of the transaction, after its output count is known.
    TxOutputs,
    /// Spent outputs of the transaction, after its input count is known.
    TxInputs,
    /// Output row from the store, after the funding transaction is downloaded.
    OutputRow,
    /// Like `OutputRow`, falling back to the funding transaction's spend report.
    SpendStatus,
    /// Script row from the store only.
    ScriptRow,
    /// Script row, then the paginated address history.
    ScriptHistory,
}

/// Static description of one entity field.
#[derive(Copy, Clone, Debug)]
pub struct FieldSpec {
    /// Field name as it appears in store rows.
    pub name: &'static str,
    /// Update discipline.
    pub discipline: Discipline,
    /// Backing cell flavour.
    pub cell: CellKind,
    /// Load policy.
    pub load: LoadPolicy,
    /// Whether a completed load may legitimately leave the field unset
    /// (unspent outputs, unconfirmed transactions, scripts without an address).
    pub may_stay_open: bool,
}

const fn field(
    name: &'static str,
    discipline: Discipline,
    cell: CellKind,
    load: LoadPolicy,
    may_stay_open: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        discipline,
        cell,
        load,
        may_stay_open,
    }
}

use CellKind as C;
use Discipline::{Idempotent, Monotonic as Mono};
use LoadPolicy as L;

/// Transaction fields.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TxField {
    Txid,
    Height,
    InputCount,
    OutputCount,
    Inputs,
    Outputs,
    PartialInputs,
    PartialOutputs,
}

impl TxField {
    /// Every transaction field, in descriptor order.
    pub const ALL: [TxField; 8] = [
        TxField::Txid,
        TxField::Height,
        TxField::InputCount,
        TxField::OutputCount,
        TxField::Inputs,
        TxField::Outputs,
        TxField::PartialInputs,
        TxField::PartialOutputs,
    ];

    /// Descriptor for this field.
    pub fn spec(self) -> &'static FieldSpec {
        &TX_FIELDS[self as usize]
    }
}

static TX_FIELDS: [FieldSpec; 8] = [
    field("txid", Idempotent, C::OneShot, L::TxRow, false),
    field("height", Idempotent, C::OneShot, L::TxRow, true),
    field("input_count", Idempotent, C::OneShot, L::TxRow, false),
    field("output_count", Idempotent, C::OneShot, L::TxRow, false),
    field("inputs", Idempotent, C::OneShot, L::TxInputs, true),
    field("outputs", Idempotent, C::OneShot, L::TxOutputs, false),
    field("partial_inputs", Mono(JoinPolicy::Union), C::Monotonic, L::TxInputs, true),
    field("partial_outputs", Mono(JoinPolicy::Union), C::Monotonic, L::TxOutputs, true),
];

/// Output fields.
///
/// The relationship fields (funding and spending transaction, script) are
/// resolved from the foreign-key scalars and have no storage of their own.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OutputField {
    FundingTxId,
    Vout,
    ScriptId,
    Sats,
    InputId,
    SpendingTxId,
    Vin,
    Height,
}

impl OutputField {
    /// Every output field, in descriptor order.
    pub const ALL: [OutputField; 8] = [
        OutputField::FundingTxId,
        OutputField::Vout,
        OutputField::ScriptId,
        OutputField::Sats,
        OutputField::InputId,
        OutputField::SpendingTxId,
        OutputField::Vin,
        OutputField::Height,
    ];

    /// Descriptor for this field.
    pub fn spec(self) -> &'static FieldSpec {
        &OUTPUT_FIELDS[self as usize]
    }
}

static OUTPUT_FIELDS: [FieldSpec; 8] = [
    field("funding_tx_id", Idempotent, C::OneShot, L::OutputRow, false),
    field("vout", Idempotent, C::OneShot, L::OutputRow, false),
    field("script_id", Idempotent, C::OneShot, L::OutputRow, false),
    field("sats", Idempotent, C::OneShot, L::OutputRow, false),
    field("input_id", Idempotent, C::OneShot, L::SpendStatus, true),
    field("spending_tx_id", Idempotent, C::OneShot, L::SpendStatus, true),
    field("vin", Idempotent, C::OneShot, L::SpendStatus, true),
    field(
        "height",
        Mono(JoinPolicy::SettlementMax),
        C::Monotonic,
        L::SpendStatus,
        true,
    ),
];

/// Script fields.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ScriptField {
    Address,
    ContiguousBoundTx,
    FetchNewestTx,
    FetchNewestTxReadHeight,
    FetchOldestTx,
}

impl ScriptField {
    /// Every script field, in descriptor order.
    pub const ALL: [ScriptField; 5] = [
        ScriptField::Address,
        ScriptField::ContiguousBoundTx,
        ScriptField::FetchNewestTx,
        ScriptField::FetchNewestTxReadHeight,
        ScriptField::FetchOldestTx,
    ];

    /// Descriptor for this field.
    pub fn spec(self) -> &'static FieldSpec {
        &SCRIPT_FIELDS[self as usize]
    }
}

const PAGINATION: Discipline = Mono(JoinPolicy::Pagination);

static SCRIPT_FIELDS: [FieldSpec; 5] = [
    field("address", Idempotent, C::OneShot, L::ScriptRow, true),
    field("contiguous_bound_tx", PAGINATION, C::Volatile, L::ScriptHistory, false),
    field("fetch_newest_tx", PAGINATION, C::Volatile, L::ScriptHistory, false),
    field("fetch_newest_tx_read_height", PAGINATION, C::Volatile, L::ScriptHistory, false),
    field("fetch_oldest_tx", PAGINATION, C::Volatile, L::ScriptHistory, false),
];

/// A commutative, idempotent, information-preserving merge.
pub trait Join {
    /// Least upper bound of `self` and `other`.
    fn join(&self, other: &Self) -> Self;
}

impl<T: Ord + Clone> Join for BTreeSet<T> {
    fn join(&self, other: &Self) -> Self {
        self.union(other).cloned().collect()
    }
}

/// Height joined by maximum.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MaxHeight(pub u64);

impl Join for MaxHeight {
    fn join(&self, other: &Self) -> Self {
        MaxHeight(self.0.max(other.0))
    }
}

/// Adapter from [`Join`] to the plain function pointer stored by [`Monotonic`].
pub fn join_fn<T: Join>(a: &T, b: &T) -> T {
    a.join(b)
}

/// Applies an idempotent assignment, naming the field on conflict.
pub(crate) fn set_idempotent<T: Clone + PartialEq>(
    cell: &OneShot<T>,
    value: T,
    entity: EntityRef,
    field: &'static str,
) -> Result<bool> {
    cell.complete(value)
        .map_err(|CellConflict| GraphError::Conflict { entity, field })
}

/// Applies a set-union update to a monotonic set cell.
pub(crate) fn set_union<T: Ord + Clone>(
    cell: &Monotonic<BTreeSet<T>>,
    additional: &BTreeSet<T>,
) -> bool {
    cell.update(additional)
}
