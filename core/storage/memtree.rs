//! An ordered in-memory storage backend.
//!
//! Backs ephemeral databases and the test suite. Durability is modeled
//! through the [`Vfs`]: the committed image and the rollback journal
//! are ordinary files there, so a simulated crash keeps exactly what a
//! real file system would keep — synced files — and loses everything
//! held in engine structs.
//!
//! The journal is a rollback journal: it stores the pre-transaction
//! image plus the master-journal name (if any). Phase one writes the
//! journal, syncs it, then overwrites the database image; phase two
//! deletes the journal. A journal found at open time therefore means an
//! interrupted transaction, and the embedded master-journal name tells
//! the commit coordinator which way to resolve it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

use crate::collate::CollationSeq;
use crate::io::Vfs;
use crate::storage::ondisk::{read_varint, write_varint_to_vec};
use crate::storage::{
    Cursor, DatabaseFile, MetaSlot, SeekKey, SeekOp, TxResult, N_META_SLOTS,
};
use crate::types::{compare_record, KeyColumn, KeyInfo, SortOrder, TieBreak, UnpackedRecord};
use crate::Result;

const IMAGE_MAGIC: &[u8; 4] = b"vmdb";
const JOURNAL_MAGIC: &[u8; 4] = b"vmjr";

#[derive(Clone)]
enum Tree {
    Table(BTreeMap<i64, Rc<[u8]>>),
    Index {
        rows: Vec<Rc<[u8]>>,
        key_info: Rc<KeyInfo>,
    },
}

#[derive(Clone)]
struct Snapshot {
    trees: BTreeMap<usize, Tree>,
    meta: [u32; N_META_SLOTS],
    next_root: usize,
}

#[derive(Clone, Copy, PartialEq)]
enum TxState {
    None,
    Read,
    Write,
}

struct DbInner {
    trees: BTreeMap<usize, Tree>,
    meta: [u32; N_META_SLOTS],
    next_root: usize,
    tx: TxState,
    shadow: Option<Snapshot>,
    stmt_shadow: Option<Snapshot>,
    phase_one_done: bool,
}

impl DbInner {
    fn fresh() -> Self {
        let mut meta = [0u32; N_META_SLOTS];
        meta[MetaSlot::FileFormat as usize] = 4;
        meta[MetaSlot::TextEncoding as usize] = 1;
        Self {
            trees: BTreeMap::new(),
            meta,
            next_root: 1,
            tx: TxState::None,
            shadow: None,
            stmt_shadow: None,
            phase_one_done: false,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            trees: self.trees.clone(),
            meta: self.meta,
            next_root: self.next_root,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.trees = snapshot.trees;
        self.meta = snapshot.meta;
        self.next_root = snapshot.next_root;
    }
}

pub struct MemDatabase {
    path: String,
    ephemeral: bool,
    vfs: Rc<dyn Vfs>,
    inner: RefCell<DbInner>,
}

impl MemDatabase {
    /// Open (or create) a database image at `path`. An interrupted
    /// single-file transaction is rolled back here; an interrupted
    /// multi-file commit is left for the coordinator's recovery pass,
    /// which knows about the other participants.
    pub fn open(vfs: Rc<dyn Vfs>, path: &str) -> Result<Rc<Self>> {
        let inner = match vfs.read_file(path)? {
            Some(bytes) => decode_image(&bytes)?,
            None => DbInner::fresh(),
        };
        let db = Rc::new(Self {
            path: path.to_string(),
            ephemeral: false,
            vfs,
            inner: RefCell::new(inner),
        });
        if db.vfs.exists(&db.journal_path()) {
            let master = db.pending_master()?;
            if master.is_none() {
                db.recover_rollback()?;
            }
        }
        Ok(db)
    }

    /// An ephemeral database: lives only in memory, never written to
    /// the VFS, excluded from master-journal accounting.
    pub fn ephemeral(path: &str) -> Rc<Self> {
        Rc::new(Self {
            path: path.to_string(),
            ephemeral: true,
            vfs: crate::io::MemoryVfs::new(),
            inner: RefCell::new(DbInner::fresh()),
        })
    }

    fn require_write_tx(&self) -> Result<()> {
        if self.inner.borrow().tx != TxState::Write {
            crate::bail_misuse_error!("write attempted outside a write transaction");
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let image = encode_image(&self.inner.borrow());
        self.vfs.write_file(&self.path, &image)?;
        self.vfs.sync(&self.path)?;
        Ok(())
    }
}

impl DatabaseFile for MemDatabase {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    fn begin_read_tx(&self) -> Result<TxResult> {
        let mut inner = self.inner.borrow_mut();
        if inner.tx == TxState::None {
            inner.tx = TxState::Read;
        }
        Ok(TxResult::Ok)
    }

    fn begin_write_tx(&self) -> Result<TxResult> {
        let mut inner = self.inner.borrow_mut();
        if inner.tx != TxState::Write {
            inner.shadow = Some(inner.snapshot());
            inner.tx = TxState::Write;
        }
        Ok(TxResult::Ok)
    }

    fn end_read_tx(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.tx == TxState::Read {
            inner.tx = TxState::None;
        }
        Ok(())
    }

    fn in_write_tx(&self) -> bool {
        self.inner.borrow().tx == TxState::Write
    }

    fn commit_phase_one(&self, master_journal: Option<&str>) -> Result<()> {
        {
            let inner = self.inner.borrow();
            if inner.tx != TxState::Write {
                return Ok(());
            }
            let old_image = match &inner.shadow {
                Some(shadow) => encode_snapshot(shadow),
                None => return Ok(()),
            };
            if !self.ephemeral {
                let journal = encode_journal(master_journal.unwrap_or(""), &old_image);
                let journal_path = self.journal_path();
                self.vfs.write_file(&journal_path, &journal)?;
                self.vfs.sync(&journal_path)?;
            }
        }
        if !self.ephemeral {
            self.persist()?;
        }
        self.inner.borrow_mut().phase_one_done = true;
        Ok(())
    }

    fn commit_phase_two(&self) -> Result<()> {
        let journal_path = self.journal_path();
        if self.vfs.exists(&journal_path) {
            self.vfs.delete_file(&journal_path)?;
        }
        let mut inner = self.inner.borrow_mut();
        inner.shadow = None;
        inner.stmt_shadow = None;
        inner.phase_one_done = false;
        inner.tx = TxState::None;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(shadow) = inner.shadow.take() {
            inner.restore(shadow);
        }
        let phase_one_done = inner.phase_one_done;
        inner.stmt_shadow = None;
        inner.phase_one_done = false;
        inner.tx = TxState::None;
        drop(inner);
        if phase_one_done && !self.ephemeral {
            self.persist()?;
        }
        let journal_path = self.journal_path();
        if self.vfs.exists(&journal_path) {
            self.vfs.delete_file(&journal_path)?;
        }
        Ok(())
    }

    fn begin_statement(&self) -> Result<()> {
        self.require_write_tx()?;
        let mut inner = self.inner.borrow_mut();
        let snapshot = inner.snapshot();
        inner.stmt_shadow = Some(snapshot);
        Ok(())
    }

    fn commit_statement(&self) -> Result<()> {
        self.inner.borrow_mut().stmt_shadow = None;
        Ok(())
    }

    fn rollback_statement(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(snapshot) = inner.stmt_shadow.take() {
            inner.restore(snapshot);
        }
        Ok(())
    }

    fn get_meta(&self, slot: MetaSlot) -> u32 {
        self.inner.borrow().meta[slot as usize]
    }

    fn update_meta(&self, slot: MetaSlot, value: u32) -> Result<()> {
        self.require_write_tx()?;
        self.inner.borrow_mut().meta[slot as usize] = value;
        Ok(())
    }

    fn create_table_tree(&self) -> Result<usize> {
        self.require_write_tx()?;
        let mut inner = self.inner.borrow_mut();
        let root = inner.next_root;
        inner.next_root += 1;
        inner.trees.insert(root, Tree::Table(BTreeMap::new()));
        Ok(root)
    }

    fn create_index_tree(&self, key_info: Rc<KeyInfo>) -> Result<usize> {
        self.require_write_tx()?;
        let mut inner = self.inner.borrow_mut();
        let root = inner.next_root;
        inner.next_root += 1;
        inner.trees.insert(
            root,
            Tree::Index {
                rows: Vec::new(),
                key_info,
            },
        );
        Ok(root)
    }

    fn destroy_tree(&self, root: usize) -> Result<()> {
        self.require_write_tx()?;
        let mut inner = self.inner.borrow_mut();
        if inner.trees.remove(&root).is_none() {
            crate::bail_corrupt_error!("no tree with root {}", root);
        }
        Ok(())
    }

    fn open_table_cursor(self: Rc<Self>, root: usize) -> Result<Box<dyn Cursor>> {
        match self.inner.borrow().trees.get(&root) {
            Some(Tree::Table(_)) => {}
            Some(Tree::Index { .. }) => {
                crate::bail_misuse_error!("root {} is an index tree", root)
            }
            None => crate::bail_corrupt_error!("no tree with root {}", root),
        }
        Ok(Box::new(MemTableCursor {
            db: self,
            root,
            pos: None,
        }))
    }

    fn open_index_cursor(self: Rc<Self>, root: usize) -> Result<Box<dyn Cursor>> {
        match self.inner.borrow().trees.get(&root) {
            Some(Tree::Index { .. }) => {}
            Some(Tree::Table(_)) => {
                crate::bail_misuse_error!("root {} is a table tree", root)
            }
            None => crate::bail_corrupt_error!("no tree with root {}", root),
        }
        Ok(Box::new(MemIndexCursor {
            db: self,
            root,
            pos: -1,
        }))
    }

    fn pending_master(&self) -> Result<Option<String>> {
        let journal_path = self.journal_path();
        let bytes = match self.vfs.read_file(&journal_path)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let (master, _) = decode_journal(&bytes)?;
        if master.is_empty() {
            Ok(None)
        } else {
            Ok(Some(master))
        }
    }

    fn recover_commit(&self) -> Result<()> {
        // the new image is already in the database file; releasing the
        // journal completes the commit
        let journal_path = self.journal_path();
        if self.vfs.exists(&journal_path) {
            self.vfs.delete_file(&journal_path)?;
        }
        Ok(())
    }

    fn recover_rollback(&self) -> Result<()> {
        let journal_path = self.journal_path();
        if let Some(bytes) = self.vfs.read_file(&journal_path)? {
            let (_, old_image) = decode_journal(&bytes)?;
            let old = decode_image(&old_image)?;
            *self.inner.borrow_mut() = old;
            self.persist()?;
            self.vfs.delete_file(&journal_path)?;
        }
        Ok(())
    }
}

struct MemTableCursor {
    db: Rc<MemDatabase>,
    root: usize,
    /// Last visited rowid; need not still exist in the tree.
    pos: Option<i64>,
}

impl MemTableCursor {
    fn with_table<T>(&self, f: impl FnOnce(&BTreeMap<i64, Rc<[u8]>>) -> T) -> Result<T> {
        let inner = self.db.inner.borrow();
        match inner.trees.get(&self.root) {
            Some(Tree::Table(rows)) => Ok(f(rows)),
            _ => crate::bail_corrupt_error!("table tree {} disappeared", self.root),
        }
    }

    fn with_table_mut<T>(&self, f: impl FnOnce(&mut BTreeMap<i64, Rc<[u8]>>) -> T) -> Result<T> {
        let mut inner = self.db.inner.borrow_mut();
        match inner.trees.get_mut(&self.root) {
            Some(Tree::Table(rows)) => Ok(f(rows)),
            _ => crate::bail_corrupt_error!("table tree {} disappeared", self.root),
        }
    }
}

impl Cursor for MemTableCursor {
    fn is_empty(&self) -> bool {
        self.with_table(|rows| rows.is_empty()).unwrap_or(true)
    }

    fn rewind(&mut self) -> Result<bool> {
        let first = self.with_table(|rows| rows.keys().next().copied())?;
        self.pos = first;
        Ok(first.is_some())
    }

    fn last(&mut self) -> Result<bool> {
        let last = self.with_table(|rows| rows.keys().next_back().copied())?;
        self.pos = last;
        Ok(last.is_some())
    }

    fn next(&mut self) -> Result<bool> {
        let cur = match self.pos {
            Some(id) => id,
            None => return self.rewind(),
        };
        let next = self.with_table(|rows| {
            rows.range((Bound::Excluded(cur), Bound::Unbounded))
                .next()
                .map(|(k, _)| *k)
        })?;
        match next {
            Some(id) => {
                self.pos = Some(id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn prev(&mut self) -> Result<bool> {
        let cur = match self.pos {
            Some(id) => id,
            None => return self.last(),
        };
        let prev = self.with_table(|rows| {
            rows.range((Bound::Unbounded, Bound::Excluded(cur)))
                .next_back()
                .map(|(k, _)| *k)
        })?;
        match prev {
            Some(id) => {
                self.pos = Some(id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn rowid(&self) -> Result<Option<i64>> {
        Ok(self.pos)
    }

    fn seek(&mut self, key: SeekKey<'_>, op: SeekOp) -> Result<bool> {
        let target = match key {
            SeekKey::TableRowId(id) => id,
            SeekKey::IndexKey(_) => {
                crate::bail_misuse_error!("index key seek on a table cursor")
            }
        };
        let found = self.with_table(|rows| match op {
            SeekOp::EQ => rows.contains_key(&target).then_some(target),
            SeekOp::GE => rows
                .range((Bound::Included(target), Bound::Unbounded))
                .next()
                .map(|(k, _)| *k),
            SeekOp::GT => rows
                .range((Bound::Excluded(target), Bound::Unbounded))
                .next()
                .map(|(k, _)| *k),
        })?;
        match found {
            Some(id) => {
                self.pos = Some(id);
                Ok(true)
            }
            None => {
                self.pos = Some(target);
                Ok(false)
            }
        }
    }

    fn record(&self) -> Result<Option<Rc<[u8]>>> {
        let cur = match self.pos {
            Some(id) => id,
            None => return Ok(None),
        };
        self.with_table(|rows| rows.get(&cur).cloned())
    }

    fn insert(&mut self, rowid: Option<i64>, record: &[u8]) -> Result<()> {
        self.db.require_write_tx()?;
        let id = match rowid {
            Some(id) => id,
            None => crate::bail_misuse_error!("table insert needs a rowid"),
        };
        self.with_table_mut(|rows| {
            rows.insert(id, Rc::from(record.to_vec().into_boxed_slice()));
        })?;
        self.pos = Some(id);
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.db.require_write_tx()?;
        let cur = match self.pos {
            Some(id) => id,
            None => crate::bail_misuse_error!("delete on an unpositioned cursor"),
        };
        self.with_table_mut(|rows| {
            rows.remove(&cur);
        })
    }

    fn exists(&mut self, key: &SeekKey<'_>) -> Result<bool> {
        match key {
            SeekKey::TableRowId(id) => self.with_table(|rows| rows.contains_key(id)),
            SeekKey::IndexKey(_) => {
                crate::bail_misuse_error!("index key lookup on a table cursor")
            }
        }
    }
}

struct MemIndexCursor {
    db: Rc<MemDatabase>,
    root: usize,
    /// Index into the sorted row vector; -1 is before-first.
    pos: isize,
}

impl MemIndexCursor {
    fn with_index<T>(&self, f: impl FnOnce(&[Rc<[u8]>], &Rc<KeyInfo>) -> T) -> Result<T> {
        let inner = self.db.inner.borrow();
        match inner.trees.get(&self.root) {
            Some(Tree::Index { rows, key_info }) => Ok(f(rows, key_info)),
            _ => crate::bail_corrupt_error!("index tree {} disappeared", self.root),
        }
    }

    /// First position whose row satisfies `op` against the probe.
    fn lower_bound(&self, probe: &UnpackedRecord, op: SeekOp) -> Result<Option<usize>> {
        self.with_index(|rows, _| {
            let mut lo = 0usize;
            let mut hi = rows.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                let cmp = compare_record(&rows[mid], probe)?;
                let below = match op {
                    SeekOp::EQ | SeekOp::GE => cmp == std::cmp::Ordering::Less,
                    SeekOp::GT => cmp != std::cmp::Ordering::Greater,
                };
                if below {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            Ok(if lo < rows.len() { Some(lo) } else { None })
        })?
    }
}

impl Cursor for MemIndexCursor {
    fn is_empty(&self) -> bool {
        self.with_index(|rows, _| rows.is_empty()).unwrap_or(true)
    }

    fn rewind(&mut self) -> Result<bool> {
        let len = self.with_index(|rows, _| rows.len())?;
        self.pos = 0;
        Ok(len > 0)
    }

    fn last(&mut self) -> Result<bool> {
        let len = self.with_index(|rows, _| rows.len())?;
        self.pos = len as isize - 1;
        Ok(len > 0)
    }

    fn next(&mut self) -> Result<bool> {
        let len = self.with_index(|rows, _| rows.len())?;
        if self.pos + 1 < len as isize {
            self.pos += 1;
            Ok(true)
        } else {
            self.pos = len as isize;
            Ok(false)
        }
    }

    fn prev(&mut self) -> Result<bool> {
        if self.pos > 0 {
            self.pos -= 1;
            Ok(true)
        } else {
            self.pos = -1;
            Ok(false)
        }
    }

    fn rowid(&self) -> Result<Option<i64>> {
        // index records carry the rowid as their trailing column
        let record = match self.record()? {
            Some(r) => r,
            None => return Ok(None),
        };
        let values = crate::storage::ondisk::read_record(&record)?;
        Ok(values.last().map(|v| v.as_integer()))
    }

    fn seek(&mut self, key: SeekKey<'_>, op: SeekOp) -> Result<bool> {
        let probe = match key {
            SeekKey::IndexKey(probe) => probe,
            SeekKey::TableRowId(_) => {
                crate::bail_misuse_error!("rowid seek on an index cursor")
            }
        };
        match self.lower_bound(probe, op)? {
            Some(i) => {
                self.pos = i as isize;
                if op == SeekOp::EQ {
                    let eq = self.with_index(|rows, _| {
                        compare_record(&rows[i], probe).map(|c| c == std::cmp::Ordering::Equal)
                    })??;
                    Ok(eq)
                } else {
                    Ok(true)
                }
            }
            None => {
                self.pos = self.with_index(|rows, _| rows.len())? as isize;
                Ok(false)
            }
        }
    }

    fn record(&self) -> Result<Option<Rc<[u8]>>> {
        if self.pos < 0 {
            return Ok(None);
        }
        self.with_index(|rows, _| rows.get(self.pos as usize).cloned())
    }

    fn insert(&mut self, _rowid: Option<i64>, record: &[u8]) -> Result<()> {
        self.db.require_write_tx()?;
        let rc: Rc<[u8]> = Rc::from(record.to_vec().into_boxed_slice());
        let key_info = self.with_index(|_, ki| ki.clone())?;
        let probe = crate::types::unpack_record(key_info, &rc)?;
        // insert after any equal keys
        let mut insert_at = None;
        {
            let inner = self.db.inner.borrow();
            if let Some(Tree::Index { rows, .. }) = inner.trees.get(&self.root) {
                let mut lo = 0usize;
                let mut hi = rows.len();
                while lo < hi {
                    let mid = (lo + hi) / 2;
                    if compare_record(&rows[mid], &probe)? != std::cmp::Ordering::Greater {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                insert_at = Some(lo);
            }
        }
        let at = match insert_at {
            Some(at) => at,
            None => crate::bail_corrupt_error!("index tree {} disappeared", self.root),
        };
        let mut inner = self.db.inner.borrow_mut();
        if let Some(Tree::Index { rows, .. }) = inner.trees.get_mut(&self.root) {
            rows.insert(at, rc);
        }
        self.pos = at as isize;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.db.require_write_tx()?;
        if self.pos < 0 {
            crate::bail_misuse_error!("delete on an unpositioned cursor");
        }
        let at = self.pos as usize;
        let mut inner = self.db.inner.borrow_mut();
        if let Some(Tree::Index { rows, .. }) = inner.trees.get_mut(&self.root) {
            if at < rows.len() {
                rows.remove(at);
            }
        }
        drop(inner);
        self.pos -= 1;
        Ok(())
    }

    fn exists(&mut self, key: &SeekKey<'_>) -> Result<bool> {
        match key {
            SeekKey::IndexKey(probe) => match self.lower_bound(probe, SeekOp::EQ)? {
                Some(i) => self.with_index(|rows, _| {
                    compare_record(&rows[i], probe).map(|c| c == std::cmp::Ordering::Equal)
                })?,
                None => Ok(false),
            },
            SeekKey::TableRowId(_) => {
                crate::bail_misuse_error!("rowid lookup on an index cursor")
            }
        }
    }
}

fn encode_key_info(key_info: &KeyInfo, buf: &mut Vec<u8>) {
    write_varint_to_vec(key_info.columns.len() as u64, buf);
    for col in &key_info.columns {
        buf.push(match col.collation {
            CollationSeq::Binary => 0,
            CollationSeq::NoCase => 1,
            CollationSeq::Rtrim => 2,
        });
        buf.push(match col.order {
            SortOrder::Asc => 0,
            SortOrder::Desc => 1,
        });
    }
}

fn decode_key_info(buf: &[u8], pos: &mut usize) -> Result<KeyInfo> {
    let (n, len) = read_varint(&buf[*pos..])?;
    *pos += len;
    let mut columns = Vec::with_capacity(n as usize);
    for _ in 0..n {
        if *pos + 2 > buf.len() {
            crate::bail_corrupt_error!("truncated key info");
        }
        let collation = match buf[*pos] {
            0 => CollationSeq::Binary,
            1 => CollationSeq::NoCase,
            2 => CollationSeq::Rtrim,
            other => crate::bail_corrupt_error!("bad collation tag {}", other),
        };
        let order = match buf[*pos + 1] {
            0 => SortOrder::Asc,
            1 => SortOrder::Desc,
            other => crate::bail_corrupt_error!("bad sort order tag {}", other),
        };
        *pos += 2;
        columns.push(KeyColumn { collation, order });
    }
    Ok(KeyInfo {
        columns,
        tie_break: TieBreak::Default,
    })
}

fn encode_snapshot(snapshot: &Snapshot) -> Vec<u8> {
    encode_parts(&snapshot.trees, &snapshot.meta, snapshot.next_root)
}

fn encode_image(inner: &DbInner) -> Vec<u8> {
    encode_parts(&inner.trees, &inner.meta, inner.next_root)
}

fn encode_parts(
    trees: &BTreeMap<usize, Tree>,
    meta: &[u32; N_META_SLOTS],
    next_root: usize,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(IMAGE_MAGIC);
    for m in meta {
        buf.extend_from_slice(&m.to_be_bytes());
    }
    write_varint_to_vec(next_root as u64, &mut buf);
    write_varint_to_vec(trees.len() as u64, &mut buf);
    for (root, tree) in trees {
        write_varint_to_vec(*root as u64, &mut buf);
        match tree {
            Tree::Table(rows) => {
                buf.push(0);
                write_varint_to_vec(rows.len() as u64, &mut buf);
                for (rowid, record) in rows {
                    write_varint_to_vec(*rowid as u64, &mut buf);
                    write_varint_to_vec(record.len() as u64, &mut buf);
                    buf.extend_from_slice(record);
                }
            }
            Tree::Index { rows, key_info } => {
                buf.push(1);
                encode_key_info(key_info, &mut buf);
                write_varint_to_vec(rows.len() as u64, &mut buf);
                for record in rows {
                    write_varint_to_vec(record.len() as u64, &mut buf);
                    buf.extend_from_slice(record);
                }
            }
        }
    }
    buf
}

fn decode_image(buf: &[u8]) -> Result<DbInner> {
    if buf.len() < 4 || &buf[..4] != IMAGE_MAGIC {
        crate::bail_corrupt_error!("not a database image");
    }
    let mut pos = 4;
    let mut meta = [0u32; N_META_SLOTS];
    for m in meta.iter_mut() {
        if pos + 4 > buf.len() {
            crate::bail_corrupt_error!("truncated meta table");
        }
        *m = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
        pos += 4;
    }
    let (next_root, n) = read_varint(&buf[pos..])?;
    pos += n;
    let (n_trees, n) = read_varint(&buf[pos..])?;
    pos += n;
    let mut trees = BTreeMap::new();
    for _ in 0..n_trees {
        let (root, n) = read_varint(&buf[pos..])?;
        pos += n;
        if pos >= buf.len() {
            crate::bail_corrupt_error!("truncated tree header");
        }
        let kind = buf[pos];
        pos += 1;
        let tree = match kind {
            0 => {
                let (n_rows, n) = read_varint(&buf[pos..])?;
                pos += n;
                let mut rows = BTreeMap::new();
                for _ in 0..n_rows {
                    let (rowid, n) = read_varint(&buf[pos..])?;
                    pos += n;
                    let (len, n) = read_varint(&buf[pos..])?;
                    pos += n;
                    let len = len as usize;
                    if pos + len > buf.len() {
                        crate::bail_corrupt_error!("truncated row payload");
                    }
                    rows.insert(
                        rowid as i64,
                        Rc::from(buf[pos..pos + len].to_vec().into_boxed_slice()),
                    );
                    pos += len;
                }
                Tree::Table(rows)
            }
            1 => {
                let key_info = Rc::new(decode_key_info(buf, &mut pos)?);
                let (n_rows, n) = read_varint(&buf[pos..])?;
                pos += n;
                let mut rows = Vec::with_capacity(n_rows as usize);
                for _ in 0..n_rows {
                    let (len, n) = read_varint(&buf[pos..])?;
                    pos += n;
                    let len = len as usize;
                    if pos + len > buf.len() {
                        crate::bail_corrupt_error!("truncated index payload");
                    }
                    rows.push(Rc::from(buf[pos..pos + len].to_vec().into_boxed_slice()));
                    pos += len;
                }
                Tree::Index { rows, key_info }
            }
            other => crate::bail_corrupt_error!("bad tree kind {}", other),
        };
        trees.insert(root as usize, tree);
    }
    let mut inner = DbInner::fresh();
    inner.trees = trees;
    inner.meta = meta;
    inner.next_root = next_root as usize;
    Ok(inner)
}

fn encode_journal(master: &str, old_image: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(JOURNAL_MAGIC);
    write_varint_to_vec(master.len() as u64, &mut buf);
    buf.extend_from_slice(master.as_bytes());
    buf.extend_from_slice(old_image);
    buf
}

fn decode_journal(buf: &[u8]) -> Result<(String, Vec<u8>)> {
    if buf.len() < 4 || &buf[..4] != JOURNAL_MAGIC {
        crate::bail_corrupt_error!("not a journal file");
    }
    let mut pos = 4;
    let (master_len, n) = read_varint(&buf[pos..])?;
    pos += n;
    let master_len = master_len as usize;
    if pos + master_len > buf.len() {
        crate::bail_corrupt_error!("truncated journal header");
    }
    let master = String::from_utf8_lossy(&buf[pos..pos + master_len]).into_owned();
    pos += master_len;
    Ok((master, buf[pos..].to_vec()))
}
