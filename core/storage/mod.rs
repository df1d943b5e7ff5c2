//! The storage layer boundary.
//!
//! The virtual machine does not read pages or talk to the file system
//! itself. Everything below the cursor line — trees, transactions,
//! journals, durability — is reached through the [`DatabaseFile`] and
//! [`Cursor`] traits defined here. [`memtree`] provides the in-memory
//! implementation used for ephemeral databases and by the test suite;
//! a page-backed engine plugs in behind the same traits.

pub mod memtree;
pub mod ondisk;

use std::rc::Rc;

use crate::types::{KeyInfo, UnpackedRecord};
use crate::Result;

/// Outcome of a transaction-open request; `Busy` means a conflicting
/// lock holder and the caller may retry.
#[must_use]
pub enum TxResult {
    Ok,
    Busy,
}

/// The fixed table of small persisted meta values every database file
/// carries. The slot layout is part of the file format; rebuild-style
/// operations must preserve all slots and bump the schema cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaSlot {
    SchemaCookie = 0,
    FileFormat = 1,
    DefaultCacheSize = 2,
    TextEncoding = 3,
    UserVersion = 4,
}

pub const N_META_SLOTS: usize = 5;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum SeekOp {
    EQ,
    GE,
    GT,
}

#[derive(Clone, Debug)]
pub enum SeekKey<'a> {
    TableRowId(i64),
    IndexKey(&'a UnpackedRecord),
}

/// A live position into one tree of a database file.
pub trait Cursor {
    fn is_empty(&self) -> bool;
    /// Position on the first entry; false when the tree is empty.
    fn rewind(&mut self) -> Result<bool>;
    /// Position on the last entry; false when the tree is empty.
    fn last(&mut self) -> Result<bool>;
    fn next(&mut self) -> Result<bool>;
    fn prev(&mut self) -> Result<bool>;
    fn rowid(&self) -> Result<Option<i64>>;
    fn seek(&mut self, key: SeekKey<'_>, op: SeekOp) -> Result<bool>;
    /// Serialized payload of the current entry, shared without copying.
    fn record(&self) -> Result<Option<Rc<[u8]>>>;
    /// Insert a record. Table cursors key by `rowid`; index cursors key
    /// by the record itself and ignore `rowid`.
    fn insert(&mut self, rowid: Option<i64>, record: &[u8]) -> Result<()>;
    /// Delete the current entry. The cursor stays keyed on the deleted
    /// position so `next` finds the following entry.
    fn delete(&mut self) -> Result<()>;
    fn exists(&mut self, key: &SeekKey<'_>) -> Result<bool>;
}

/// One attached database file: a set of trees plus file-level
/// transaction state. Commit is split into two phases so a coordinator
/// can make a multi-file commit atomic through a master journal.
pub trait DatabaseFile {
    fn path(&self) -> &str;
    fn journal_path(&self) -> String {
        format!("{}-journal", self.path())
    }
    /// Ephemeral files have no durable identity and never participate
    /// in a master journal.
    fn is_ephemeral(&self) -> bool;

    fn begin_read_tx(&self) -> Result<TxResult>;
    fn begin_write_tx(&self) -> Result<TxResult>;
    fn end_read_tx(&self) -> Result<()>;
    fn in_write_tx(&self) -> bool;

    /// Durably persist the transaction. When `master_journal` is given,
    /// its name is embedded in this file's journal so crash recovery
    /// can tell whether the overall commit happened.
    fn commit_phase_one(&self, master_journal: Option<&str>) -> Result<()>;
    /// Release the journal and locks. Only valid after phase one.
    fn commit_phase_two(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    /// Statement sub-transactions: a cheaper rollback point inside the
    /// main write transaction.
    fn begin_statement(&self) -> Result<()>;
    fn commit_statement(&self) -> Result<()>;
    fn rollback_statement(&self) -> Result<()>;

    fn get_meta(&self, slot: MetaSlot) -> u32;
    fn update_meta(&self, slot: MetaSlot, value: u32) -> Result<()>;

    fn create_table_tree(&self) -> Result<usize>;
    fn create_index_tree(&self, key_info: Rc<KeyInfo>) -> Result<usize>;
    fn destroy_tree(&self, root: usize) -> Result<()>;

    fn open_table_cursor(self: Rc<Self>, root: usize) -> Result<Box<dyn Cursor>>;
    fn open_index_cursor(self: Rc<Self>, root: usize) -> Result<Box<dyn Cursor>>;

    /// Master journal name embedded in this file's journal, if a
    /// phase-one commit was interrupted before phase two.
    fn pending_master(&self) -> Result<Option<String>>;
    /// Finish an interrupted commit: the new image is already durable,
    /// only the journal release is outstanding.
    fn recover_commit(&self) -> Result<()>;
    /// Undo an interrupted commit from the journal's saved image.
    fn recover_rollback(&self) -> Result<()>;
}
