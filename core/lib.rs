mod collate;
mod error;
mod io;
mod pseudo;
mod storage;
mod types;
mod vdbe;

#[cfg(not(target_family = "wasm"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::trace;

pub use collate::CollationSeq;
pub use error::VellumError;
#[cfg(not(target_family = "wasm"))]
pub use io::FsVfs;
pub use io::{MemoryVfs, Vfs};
pub use storage::memtree::MemDatabase;
pub use storage::ondisk::{
    read_record, read_varint, serial_type_of, serialize_record, write_varint, SerialType,
};
pub use storage::{Cursor, DatabaseFile, MetaSlot, SeekKey, SeekOp, TxResult, N_META_SLOTS};
pub use types::{
    compare_record, compare_values, unpack_record, AggContext, AggFunc, Blob, Buffer, FromValue,
    KeyColumn, KeyInfo, Record, SortOrder, Text, TextEncoding, TieBreak, UnpackedRecord, Value,
    ValueRef,
};
pub use vdbe::builder::{CursorType, ProgramBuilder};
pub use vdbe::commit::recover;
pub use vdbe::insn::{ErrorAction, Insn, P4};
pub use vdbe::{BranchOffset, Program, ProgramState, StepResult};

pub type Result<T> = std::result::Result<T, error::VellumError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    None,
    Read,
    Write,
}

type CommitHook = Box<dyn Fn() -> bool>;

/// A connection: the attached database files plus the cross-statement
/// state every program on it shares — autocommit mode, change counters,
/// the last-error slot, the interrupt flag, and the generation counters
/// that invalidate cursor caches after writes and trip cursors after a
/// rollback.
pub struct Connection {
    vfs: Rc<dyn Vfs>,
    files: RefCell<Vec<Rc<dyn DatabaseFile>>>,
    pub(crate) auto_commit: Cell<bool>,
    pub(crate) transaction_state: Cell<TransactionState>,
    pub(crate) change_count: Cell<i64>,
    pub(crate) total_changes: Cell<i64>,
    pub(crate) last_insert_rowid: Cell<i64>,
    last_error: RefCell<Option<VellumError>>,
    pub(crate) interrupted: Cell<bool>,
    commit_hook: RefCell<Option<CommitHook>>,
    pub(crate) active_statements: Cell<usize>,
    pub(crate) write_generation: Cell<u64>,
    pub(crate) trip_generation: Cell<u64>,
}

impl Connection {
    fn new(vfs: Rc<dyn Vfs>, main: Rc<dyn DatabaseFile>) -> Rc<Connection> {
        Rc::new(Connection {
            vfs,
            files: RefCell::new(vec![main]),
            auto_commit: Cell::new(true),
            transaction_state: Cell::new(TransactionState::None),
            change_count: Cell::new(0),
            total_changes: Cell::new(0),
            last_insert_rowid: Cell::new(0),
            last_error: RefCell::new(None),
            interrupted: Cell::new(false),
            commit_hook: RefCell::new(None),
            active_statements: Cell::new(0),
            write_generation: Cell::new(0),
            trip_generation: Cell::new(0),
        })
    }

    /// A connection whose main database lives only in memory.
    pub fn open_memory() -> Rc<Connection> {
        Self::new(MemoryVfs::new(), MemDatabase::ephemeral(":memory:"))
    }

    /// Open the main database at `path` on the given VFS. Interrupted
    /// single-file transactions roll back here; after attaching every
    /// additional file, call [`recover`] to resolve interrupted
    /// multi-file commits.
    pub fn open_with_vfs(vfs: Rc<dyn Vfs>, path: &str) -> Result<Rc<Connection>> {
        let main = MemDatabase::open(vfs.clone(), path)?;
        Ok(Self::new(vfs, main))
    }

    /// Attach another database file; returns its index.
    pub fn attach(&self, path: &str) -> Result<usize> {
        if self.transaction_state.get() != TransactionState::None {
            crate::bail_misuse_error!("cannot attach inside a transaction");
        }
        let file = MemDatabase::open(self.vfs.clone(), path)?;
        let mut files = self.files.borrow_mut();
        files.push(file);
        Ok(files.len() - 1)
    }

    pub fn file(&self, db: usize) -> Result<Rc<dyn DatabaseFile>> {
        match self.files.borrow().get(db) {
            Some(file) => Ok(file.clone()),
            None => crate::bail_misuse_error!("no database at index {}", db),
        }
    }

    pub fn files_snapshot(&self) -> Vec<Rc<dyn DatabaseFile>> {
        self.files.borrow().clone()
    }

    pub fn vfs(&self) -> Rc<dyn Vfs> {
        self.vfs.clone()
    }

    /// Rows changed by the most recently halted statement.
    pub fn changes(&self) -> i64 {
        self.change_count.get()
    }

    pub fn total_changes(&self) -> i64 {
        self.total_changes.get()
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.last_insert_rowid.get()
    }

    /// Error recorded by the last statement reset, if any.
    pub fn last_error(&self) -> Option<VellumError> {
        self.last_error.borrow().clone()
    }

    pub(crate) fn set_last_error(&self, err: VellumError) {
        *self.last_error.borrow_mut() = Some(err);
    }

    /// Cooperative cancellation: running statements observe the flag at
    /// their next instruction dispatch and halt with an interrupt
    /// error. Cleared once no statement is active.
    pub fn interrupt(&self) {
        self.interrupted.set(true);
    }

    pub fn is_autocommit(&self) -> bool {
        self.auto_commit.get()
    }

    /// Install (or clear) the commit hook. A hook returning true vetoes
    /// the commit, which then fails with a constraint violation.
    pub fn set_commit_hook(&self, hook: Option<CommitHook>) {
        *self.commit_hook.borrow_mut() = hook;
    }

    pub(crate) fn invoke_commit_hook(&self) -> bool {
        match &*self.commit_hook.borrow() {
            Some(hook) => hook(),
            None => false,
        }
    }

    pub(crate) fn bump_write_generation(&self) {
        self.write_generation.set(self.write_generation.get() + 1);
    }

    pub(crate) fn bump_trip_generation(&self) {
        self.trip_generation.set(self.trip_generation.get() + 1);
    }
}

/// A prepared statement handle: a program plus its run state. Step it
/// to a row or to completion, read columns through the coercing
/// accessors, reset to run again, finalize to retire it.
pub struct Statement {
    program: Rc<Program>,
    state: ProgramState,
    connection: Rc<Connection>,
}

impl Statement {
    pub fn new(program: Rc<Program>, connection: Rc<Connection>) -> Self {
        let state = ProgramState::new(program.max_registers);
        trace!("statement ready: {} insns", program.insns.len());
        Self {
            program,
            state,
            connection,
        }
    }

    /// Advance to the next result row, or run to completion for
    /// programs that produce none.
    pub fn step(&mut self) -> Result<RowResult<'_>> {
        // The `Ok(StepResult::Row)` arm returns a borrow of `self.state`
        // that lives for the whole return lifetime, which forces the
        // `step` call's `&mut self.state` region to span the entire match.
        // The borrow checker (without Polonius) therefore cannot see that
        // on the `Err` path the step borrow is already dead, so the
        // `halt_on_error` re-borrow below would be rejected. Route the
        // state borrow through a raw pointer to express what actually
        // happens: the two `&mut *state` reborrows are never live at the
        // same time (the `Ok` path only ever uses the first; the `Err`
        // path uses the first during `step`, which is dead before the
        // second is created). Behavior is identical to the direct form.
        let state: *mut ProgramState = &mut self.state;
        // SAFETY: `*state` points at `self.state`, which is uniquely
        // borrowed for the duration of `step`. No two reborrows alias at
        // runtime (see the note above); this only works around the
        // conservative region inference on the returned borrow.
        match self.program.step(unsafe { &mut *state }) {
            Ok(StepResult::Row(record)) => Ok(RowResult::Row(Row {
                values: record.values,
            })),
            Ok(StepResult::Done) => Ok(RowResult::Done),
            Ok(StepResult::Busy) => Ok(RowResult::Busy),
            Err(err) => Err(self.program.halt_on_error(unsafe { &mut *state }, err)),
        }
    }

    /// Run a non-row-producing statement to completion.
    pub fn execute(&mut self) -> Result<()> {
        loop {
            match self.step()? {
                RowResult::Row(_) => continue,
                RowResult::Done => return Ok(()),
                RowResult::Busy => return Err(VellumError::Busy),
            }
        }
    }

    /// Back to the ready state for re-execution. Any pending error from
    /// the previous run moves into the connection's last-error slot.
    pub fn reset(&mut self) {
        if let Some(err) = self.program.reset_program(&mut self.state) {
            self.connection.set_last_error(err);
        }
    }

    /// Retire the statement, reporting the error of its final run.
    pub fn finalize(mut self) -> Result<()> {
        let pending = match self.program.reset_program(&mut self.state) {
            Some(err) => {
                self.connection.set_last_error(err.clone());
                Some(err)
            }
            None => None,
        };
        match pending {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn interrupt(&self) {
        self.connection.interrupt();
    }
}

#[derive(Debug)]
pub enum RowResult<'a> {
    Row(Row<'a>),
    Done,
    Busy,
}

#[derive(Debug)]
pub struct Row<'a> {
    pub values: Vec<ValueRef<'a>>,
}

impl<'a> Row<'a> {
    pub fn get<T: types::FromValue<'a> + 'a>(&self, idx: usize) -> Result<T> {
        let value = &self.values[idx];
        T::from_value(value)
    }

    /// Coercing accessors: never fail on a type mismatch, following the
    /// value cell's total coercion rules.
    pub fn column_int(&self, idx: usize) -> i64 {
        self.values[idx].as_integer()
    }

    pub fn column_float(&self, idx: usize) -> f64 {
        self.values[idx].as_float()
    }

    pub fn column_text(&self, idx: usize) -> Option<String> {
        match &self.values[idx] {
            ValueRef::Null => None,
            ValueRef::Text(t) => Some(t.to_utf8().into_owned()),
            ValueRef::Integer(i) => Some(format!("{}", i)),
            ValueRef::Float(f) => Some(types::format_float(*f)),
            ValueRef::Blob(b) => Some(String::from_utf8_lossy(&b.to_vec()).into_owned()),
            ValueRef::Agg(a) => Some(format!("{}", a.final_value())),
        }
    }

    pub fn column_blob(&self, idx: usize) -> Option<Vec<u8>> {
        match &self.values[idx] {
            ValueRef::Null => None,
            ValueRef::Blob(b) => Some(b.to_vec()),
            ValueRef::Text(t) => Some(t.as_bytes().to_vec()),
            other => Some(format!("{}", other.as_integer()).into_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdbe::insn::P4;

    fn halt_ok() -> Insn {
        Insn::Halt {
            err_code: 0,
            error_action: ErrorAction::Abort,
            description: String::new(),
        }
    }

    fn prepare(builder: ProgramBuilder, conn: &Rc<Connection>) -> Statement {
        let program = Rc::new(builder.build(Rc::downgrade(conn)));
        Statement::new(program, conn.clone())
    }

    /// Create a table tree on the main file and leave the connection
    /// idle, with everything committed.
    fn setup_table(conn: &Rc<Connection>) -> usize {
        let file = conn.file(0).unwrap();
        let _ = file.begin_write_tx().unwrap();
        let root = file.create_table_tree().unwrap();
        vdbe::commit::commit_all(conn).unwrap();
        root
    }

    #[test]
    fn test_int64_p4_program_end_to_end() {
        let conn = Connection::open_memory();
        let mut builder = ProgramBuilder::new();
        let reg = builder.alloc_register();
        let addr = builder.emit_insn(Insn::Int64 {
            value: P4::None,
            dest: reg,
        });
        builder.change_p4(addr, P4::Int64(42)).unwrap();
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);

        assert!(matches!(stmt.step().unwrap(), RowResult::Done));
        assert_eq!(*stmt.state.register(1), Value::Integer(42));
        assert!(stmt.state.is_halted());
        assert_eq!(conn.changes(), 0);
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_insert_then_scan() {
        let conn = Connection::open_memory();
        let root = setup_table(&conn);

        // INSERT-shaped program
        let mut builder = ProgramBuilder::new();
        let rowid_reg = builder.alloc_register();
        let col_reg = builder.alloc_register();
        let rec_reg = builder.alloc_register();
        let cursor = builder.alloc_cursor_id(Some("t".to_string()), CursorType::BTreeTable);
        builder.emit_insn(Insn::Transaction { db: 0, write: true });
        builder.emit_insn(Insn::OpenWrite {
            cursor_id: cursor,
            root_page: root,
            db: 0,
        });
        builder.emit_insn(Insn::NewRowid {
            cursor_id: cursor,
            rowid_reg,
        });
        builder.emit_insn(Insn::String8 {
            value: "hello".to_string(),
            dest: col_reg,
        });
        builder.emit_insn(Insn::MakeRecord {
            start_reg: col_reg,
            count: 1,
            dest_reg: rec_reg,
        });
        builder.emit_insn(Insn::Insert {
            cursor_id: cursor,
            key_reg: rowid_reg,
            record_reg: rec_reg,
            count_change: true,
        });
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);
        stmt.execute().unwrap();
        assert_eq!(conn.changes(), 1);
        assert_eq!(conn.total_changes(), 1);
        assert_eq!(conn.last_insert_rowid(), 1);

        // SELECT-shaped program
        let mut builder = ProgramBuilder::new();
        let val_reg = builder.alloc_register();
        let id_reg = builder.alloc_register();
        let cursor = builder.alloc_cursor_id(Some("t".to_string()), CursorType::BTreeTable);
        let done = builder.allocate_label();
        builder.emit_insn(Insn::Transaction {
            db: 0,
            write: false,
        });
        builder.emit_insn(Insn::OpenRead {
            cursor_id: cursor,
            root_page: root,
            db: 0,
        });
        builder.emit_insn(Insn::Rewind {
            cursor_id: cursor,
            pc_if_empty: done,
        });
        let loop_top = builder.offset();
        builder.emit_insn(Insn::RowId {
            cursor_id: cursor,
            dest: id_reg,
        });
        builder.emit_insn(Insn::Column {
            cursor_id: cursor,
            column: 0,
            dest: val_reg,
        });
        builder.emit_insn(Insn::ResultRow {
            start_reg: val_reg,
            count: 2,
        });
        builder.emit_insn(Insn::Next {
            cursor_id: cursor,
            pc_if_next: loop_top,
        });
        builder.preassign_label_to_next_insn(done);
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);

        match stmt.step().unwrap() {
            RowResult::Row(row) => {
                assert_eq!(row.get::<String>(0).unwrap(), "hello");
                assert_eq!(row.column_int(1), 1);
                // total coercion on a text column
                assert_eq!(row.column_int(0), 0);
                assert_eq!(row.column_text(1).unwrap(), "1");
            }
            _ => panic!("expected a row"),
        }
        assert!(matches!(stmt.step().unwrap(), RowResult::Done));
        // a pure read reports no changes
        assert_eq!(conn.changes(), 0);
    }

    #[test]
    fn test_constraint_halt_rolls_back_autocommit_statement() {
        let conn = Connection::open_memory();
        let root = setup_table(&conn);

        let mut builder = ProgramBuilder::new();
        let rowid_reg = builder.alloc_register();
        let rec_reg = builder.alloc_register();
        let cursor = builder.alloc_cursor_id(None, CursorType::BTreeTable);
        builder.emit_insn(Insn::Transaction { db: 0, write: true });
        builder.emit_insn(Insn::OpenWrite {
            cursor_id: cursor,
            root_page: root,
            db: 0,
        });
        builder.emit_insn(Insn::Integer {
            value: 7,
            dest: rowid_reg,
        });
        builder.emit_insn(Insn::MakeRecord {
            start_reg: rowid_reg,
            count: 1,
            dest_reg: rec_reg,
        });
        builder.emit_insn(Insn::Insert {
            cursor_id: cursor,
            key_reg: rowid_reg,
            record_reg: rec_reg,
            count_change: true,
        });
        builder.emit_insn(Insn::Halt {
            err_code: error::VELLUM_CONSTRAINT_PRIMARYKEY,
            error_action: ErrorAction::Abort,
            description: "UNIQUE constraint failed: t.id".to_string(),
        });
        let mut stmt = prepare(builder, &conn);

        assert!(matches!(
            stmt.execute().unwrap_err(),
            VellumError::Constraint(_)
        ));
        // the statement's insert was rolled back with the implicit
        // transaction, and the connection is back in autocommit
        assert_eq!(conn.changes(), 0);
        assert!(conn.is_autocommit());
        let file = conn.file(0).unwrap();
        let _ = file.begin_read_tx().unwrap();
        let mut cursor = file.clone().open_table_cursor(root).unwrap();
        assert!(!cursor.exists(&SeekKey::TableRowId(7)).unwrap());

        stmt.reset();
        assert!(matches!(
            conn.last_error(),
            Some(VellumError::Constraint(_))
        ));
    }

    #[test]
    fn test_interrupt_surfaces_and_clears() {
        let conn = Connection::open_memory();
        let mut builder = ProgramBuilder::new();
        let top = builder.allocate_label();
        builder.preassign_label_to_next_insn(top);
        builder.emit_insn(Insn::Goto { target_pc: top });
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);

        conn.interrupt();
        assert!(matches!(
            stmt.step().unwrap_err(),
            VellumError::Interrupted
        ));
        // the flag clears once no statement is active
        assert!(!conn.interrupted.get());
        stmt.reset();
        assert!(matches!(conn.last_error(), Some(VellumError::Interrupted)));
    }

    #[test]
    fn test_reset_allows_rerun() {
        let conn = Connection::open_memory();
        let mut builder = ProgramBuilder::new();
        let reg = builder.alloc_register();
        builder.emit_insn(Insn::Integer {
            value: 5,
            dest: reg,
        });
        builder.emit_insn(Insn::ResultRow {
            start_reg: reg,
            count: 1,
        });
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);

        for _ in 0..3 {
            match stmt.step().unwrap() {
                RowResult::Row(row) => assert_eq!(row.column_int(0), 5),
                _ => panic!("expected a row"),
            }
            assert!(matches!(stmt.step().unwrap(), RowResult::Done));
            // stepping a halted statement without reset is a misuse
            assert!(matches!(
                stmt.step().unwrap_err(),
                VellumError::Misuse(_)
            ));
            stmt.reset();
        }
        stmt.finalize().unwrap();
    }

    #[test]
    fn test_arithmetic_and_jump_program() {
        let conn = Connection::open_memory();
        let mut builder = ProgramBuilder::new();
        let a = builder.alloc_register();
        let b = builder.alloc_register();
        let sum = builder.alloc_register();
        let out = builder.alloc_register();
        let else_branch = builder.allocate_label();
        let end = builder.allocate_label();
        builder.emit_insn(Insn::Integer { value: 2, dest: a });
        builder.emit_insn(Insn::Integer { value: 3, dest: b });
        builder.emit_insn(Insn::Add {
            lhs: a,
            rhs: b,
            dest: sum,
        });
        builder.emit_insn(Insn::Integer { value: 5, dest: a });
        builder.emit_insn(Insn::Ne {
            lhs: sum,
            rhs: a,
            target_pc: else_branch,
            jump_if_null: false,
        });
        builder.emit_insn(Insn::String8 {
            value: "equal".to_string(),
            dest: out,
        });
        builder.emit_insn(Insn::Goto { target_pc: end });
        builder.preassign_label_to_next_insn(else_branch);
        builder.emit_insn(Insn::String8 {
            value: "different".to_string(),
            dest: out,
        });
        builder.preassign_label_to_next_insn(end);
        builder.emit_insn(Insn::ResultRow {
            start_reg: out,
            count: 1,
        });
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);
        match stmt.step().unwrap() {
            RowResult::Row(row) => assert_eq!(row.get::<String>(0).unwrap(), "equal"),
            _ => panic!("expected a row"),
        }
    }

    #[test]
    fn test_aggregate_program() {
        let conn = Connection::open_memory();
        let root = setup_table(&conn);

        // seed three rows directly
        let file = conn.file(0).unwrap();
        let _ = file.begin_write_tx().unwrap();
        {
            let mut cursor = file.clone().open_table_cursor(root).unwrap();
            for (id, v) in [(1i64, 10i64), (2, 20), (3, 12)] {
                let record = storage::ondisk::serialize_record(&[Value::Integer(v)], 4);
                cursor.insert(Some(id), &record).unwrap();
            }
        }
        vdbe::commit::commit_all(&conn).unwrap();

        let mut builder = ProgramBuilder::new();
        let acc = builder.alloc_register();
        let col = builder.alloc_register();
        let cursor = builder.alloc_cursor_id(None, CursorType::BTreeTable);
        let done = builder.allocate_label();
        builder.emit_insn(Insn::Transaction {
            db: 0,
            write: false,
        });
        builder.emit_insn(Insn::OpenRead {
            cursor_id: cursor,
            root_page: root,
            db: 0,
        });
        builder.emit_insn(Insn::Rewind {
            cursor_id: cursor,
            pc_if_empty: done,
        });
        let loop_top = builder.offset();
        builder.emit_insn(Insn::Column {
            cursor_id: cursor,
            column: 0,
            dest: col,
        });
        builder.emit_insn(Insn::AggStep {
            acc_reg: acc,
            col,
            func: types::AggFunc::Max,
        });
        builder.emit_insn(Insn::Next {
            cursor_id: cursor,
            pc_if_next: loop_top,
        });
        builder.preassign_label_to_next_insn(done);
        builder.emit_insn(Insn::AggFinal {
            register: acc,
            func: types::AggFunc::Max,
        });
        builder.emit_insn(Insn::ResultRow {
            start_reg: acc,
            count: 1,
        });
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);
        match stmt.step().unwrap() {
            RowResult::Row(row) => assert_eq!(row.column_int(0), 20),
            _ => panic!("expected a row"),
        }
    }

    #[test]
    fn test_delete_counts_changes() {
        let conn = Connection::open_memory();
        let root = setup_table(&conn);
        let file = conn.file(0).unwrap();
        let _ = file.begin_write_tx().unwrap();
        {
            let mut cursor = file.clone().open_table_cursor(root).unwrap();
            for id in [1i64, 2, 3] {
                let record = storage::ondisk::serialize_record(&[Value::Integer(id)], 4);
                cursor.insert(Some(id), &record).unwrap();
            }
        }
        vdbe::commit::commit_all(&conn).unwrap();

        let mut builder = ProgramBuilder::new();
        let id_reg = builder.alloc_register();
        let cursor = builder.alloc_cursor_id(None, CursorType::BTreeTable);
        let missing = builder.allocate_label();
        builder.emit_insn(Insn::Transaction { db: 0, write: true });
        builder.emit_insn(Insn::OpenWrite {
            cursor_id: cursor,
            root_page: root,
            db: 0,
        });
        builder.emit_insn(Insn::Integer {
            value: 2,
            dest: id_reg,
        });
        builder.emit_insn(Insn::SeekRowid {
            cursor_id: cursor,
            src_reg: id_reg,
            target_pc: missing,
        });
        builder.emit_insn(Insn::Delete {
            cursor_id: cursor,
            count_change: true,
        });
        builder.preassign_label_to_next_insn(missing);
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);
        stmt.execute().unwrap();
        assert_eq!(conn.changes(), 1);

        let file = conn.file(0).unwrap();
        let _ = file.begin_read_tx().unwrap();
        let mut cursor = file.clone().open_table_cursor(root).unwrap();
        assert!(!cursor.exists(&SeekKey::TableRowId(2)).unwrap());
        assert!(cursor.exists(&SeekKey::TableRowId(3)).unwrap());
    }

    #[test]
    fn test_register_copy_and_zeroblob() {
        let conn = Connection::open_memory();
        let mut builder = ProgramBuilder::new();
        let a = builder.alloc_register();
        let shallow = builder.alloc_register();
        let deep = builder.alloc_register();
        let moved = builder.alloc_register();
        builder.emit_insn(Insn::ZeroBlob { count: 3, dest: a });
        builder.emit_insn(Insn::SCopy {
            src_reg: a,
            dst_reg: shallow,
        });
        builder.emit_insn(Insn::Copy {
            src_reg: a,
            dst_reg: deep,
        });
        builder.emit_insn(Insn::Move {
            source_reg: deep,
            dest_reg: moved,
            count: 1,
        });
        builder.emit_insn(Insn::ResultRow {
            start_reg: moved,
            count: 1,
        });
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);
        match stmt.step().unwrap() {
            RowResult::Row(row) => {
                assert_eq!(row.column_blob(0).unwrap(), vec![0u8; 3]);
            }
            _ => panic!("expected a row"),
        }
        // move leaves NULL behind, the aliased copy is untouched
        assert_eq!(*stmt.state.register(3), Value::Null);
        assert_eq!(stmt.state.register(2).as_value_ref().as_integer(), 0);
        match stmt.state.register(1) {
            Value::Blob(b) => assert_eq!(b.len(), 3),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_meta_cookie_round_trip() {
        let conn = Connection::open_memory();
        let mut builder = ProgramBuilder::new();
        let reg = builder.alloc_register();
        builder.emit_insn(Insn::Transaction { db: 0, write: true });
        builder.emit_insn(Insn::SetCookie {
            db: 0,
            slot: MetaSlot::SchemaCookie,
            value: 3,
        });
        builder.emit_insn(Insn::ReadCookie {
            db: 0,
            slot: MetaSlot::SchemaCookie,
            dest: reg,
        });
        builder.emit_insn(Insn::ResultRow {
            start_reg: reg,
            count: 1,
        });
        builder.emit_insn(halt_ok());
        let mut stmt = prepare(builder, &conn);
        match stmt.step().unwrap() {
            RowResult::Row(row) => assert_eq!(row.column_int(0), 3),
            _ => panic!("expected a row"),
        }
        assert!(matches!(stmt.step().unwrap(), RowResult::Done));
        assert_eq!(conn.file(0).unwrap().get_meta(MetaSlot::SchemaCookie), 3);
    }
}
