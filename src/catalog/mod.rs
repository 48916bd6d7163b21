//! # Statistics Catalog
//!
//! The statistics injection engine: the five-slot catalog row model, the
//! translator from estimates to rows, the values-array encoding chain, and
//! the writer that applies and verifies rows against `pg_statistic`.

mod encoding;
mod errors;
mod identity;
mod kind;
mod row;
mod snapshot;
mod translator;
mod writer;

pub use encoding::{
    chain_preferring, encode_array_in, encode_scalar_list, encode_typed_cast, normalize_elements,
    EncodedArray, EncodingTechnique, CHAIN,
};
pub use errors::{CatalogError, CatalogResult, EncodingError};
pub use identity::IdentityResolver;
pub use kind::{StatsKind, SLOT_COUNT};
pub use row::{
    CatalogSlot, CatalogSlotRow, ColumnIdentity, ColumnTypeInfo, ScalarPatch, SlotHeader, TableRef,
    TypeCategory,
};
pub use snapshot::{CatalogSnapshot, PlannerStatsRow, RawCatalogRow, RawSlot};
pub use translator::{allocate_slots, build_row, TranslationFailure, TranslationOutcome, Translator};
pub use writer::{
    ApplyReport, AutoRefreshLedger, CatalogWriter, FieldCheck, FieldFailure, FieldStatus,
    RowVerification, WriterOptions,
};
