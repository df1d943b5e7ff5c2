//! The virtual database engine (VDBE).
//!
//! The VDBE is a register-based virtual machine that executes bytecode
//! programs representing SQL statements. A front-end compiles a
//! statement into a sequence of instructions through
//! [`builder::ProgramBuilder`]; the engine runs them against open
//! cursors and a register file, and on completion or failure hands the
//! outcome to the commit coordinator in [`commit`].
//!
//! The instruction set follows the classic embedded-database shape:
//! every opcode has up to three small integer operands plus one
//! polymorphic operand, jumps are resolved from negative label
//! placeholders to concrete addresses before a program becomes
//! runnable, and cursor I/O is synchronous — the loop has no internal
//! suspension points, and cancellation is a flag polled once per
//! dispatch.

pub mod builder;
pub mod commit;
pub mod explain;
pub mod insn;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use log::trace;
use rand::{thread_rng, Rng};

use crate::collate::CollationSeq;
use crate::error::VellumError;
use crate::pseudo::PseudoCursor;
use crate::storage::ondisk;
use crate::storage::{Cursor as StorageCursor, MetaSlot, SeekKey, SeekOp, TxResult};
use crate::types::{
    compare_unpacked, compare_values, AggContext, AggFunc, Record, UnpackedRecord, Value,
};
use crate::{Connection, Result, TransactionState};

use builder::CursorType;
use insn::{
    exec_add, exec_bit_and, exec_bit_not, exec_bit_or, exec_divide, exec_multiply, exec_remainder,
    exec_subtract, ErrorAction, Insn, P4,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// A jump-instruction target.
pub enum BranchOffset {
    /// A label: a forward reference that must be resolved to an Offset
    /// before the program runs.
    Label(i32),
    /// A concrete index into the instruction list.
    Offset(InsnReference),
}

impl BranchOffset {
    pub fn is_label(&self) -> bool {
        matches!(self, BranchOffset::Label(_))
    }

    pub fn is_offset(&self) -> bool {
        matches!(self, BranchOffset::Offset(_))
    }

    /// The concrete address. Panics on an unresolved label.
    pub fn to_offset_int(&self) -> InsnReference {
        match self {
            BranchOffset::Label(v) => unreachable!("Unresolved label: {}", v),
            BranchOffset::Offset(v) => *v,
        }
    }

    /// Signed view for explain output, where an unresolved label must
    /// not panic.
    pub fn to_debug_int(&self) -> i32 {
        match self {
            BranchOffset::Label(v) => *v,
            BranchOffset::Offset(v) => *v as i32,
        }
    }
}

pub type CursorID = usize;

pub type PageIdx = usize;

// Index of an insn in the list of insns.
pub type InsnReference = u32;

pub enum StepResult<'a> {
    Done,
    Row(Record<'a>),
    Busy,
}

/// Saved counters around a nested subprogram invocation (trigger-style
/// execution), restored when the subprogram returns.
#[derive(Debug, Clone, Copy)]
pub struct SavedContext {
    pub last_insert_rowid: i64,
    pub n_change: i64,
}

enum VdbeCursorKind {
    Btree(Box<dyn StorageCursor>),
    Pseudo(PseudoCursor),
}

/// A cursor slot: the storage cursor plus the VM-side bookkeeping the
/// engine layers on top of it.
struct VdbeCursor {
    kind: VdbeCursorKind,
    #[allow(dead_code)]
    db: usize,
    null_row: bool,
    /// Generation the column cache was built under; stale when the
    /// connection's write generation has advanced.
    cache_generation: u64,
    cached_columns: Option<Vec<Value>>,
    /// Generation at open time; a lower value than the connection's
    /// trip generation means a rollback restructured trees under us.
    trip_generation: u64,
}

impl VdbeCursor {
    fn btree(&mut self, insn_name: &str) -> Result<&mut Box<dyn StorageCursor>> {
        match &mut self.kind {
            VdbeCursorKind::Btree(cursor) => Ok(cursor),
            VdbeCursorKind::Pseudo(_) => {
                crate::bail_misuse_error!("{} on a pseudo cursor", insn_name)
            }
        }
    }

    fn invalidate_cache(&mut self) {
        self.cached_columns = None;
    }
}

/// The program state describes the environment in which the program
/// executes: the register file, cursor slots, and run-position.
pub struct ProgramState {
    pub pc: InsnReference,
    cursors: BTreeMap<CursorID, VdbeCursor>,
    registers: Vec<Value>,
    last_compare: Option<Ordering>,
    deferred_seek: Option<(CursorID, CursorID)>,
    context_stack: Vec<SavedContext>,
    stmt_tx_dbs: Vec<usize>,
    n_change: i64,
    started: bool,
    halted: bool,
    pending_error: Option<VellumError>,
}

impl ProgramState {
    pub fn new(max_registers: usize) -> Self {
        let mut registers = Vec::with_capacity(max_registers);
        registers.resize(max_registers, Value::Null);
        Self {
            pc: 0,
            cursors: BTreeMap::new(),
            registers,
            last_compare: None,
            deferred_seek: None,
            context_stack: Vec::new(),
            stmt_tx_dbs: Vec::new(),
            n_change: 0,
            started: false,
            halted: false,
            pending_error: None,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn register(&self, i: usize) -> &Value {
        &self.registers[i]
    }

    pub fn push_context(&mut self, ctx: SavedContext) {
        self.context_stack.push(ctx);
    }

    pub fn pop_context(&mut self) -> Option<SavedContext> {
        self.context_stack.pop()
    }
}

#[derive(Debug)]
pub struct Program {
    pub max_registers: usize,
    pub insns: Vec<Insn>,
    pub cursor_ref: Vec<(Option<String>, CursorType)>,
    pub comments: HashMap<InsnReference, &'static str>,
    pub connection: Weak<Connection>,
    /// No instruction writes through the storage layer; halting never
    /// needs a commit or rollback decision beyond releasing read locks.
    pub read_only: bool,
    /// The program kept its Statement opcodes: some instruction can
    /// force a statement-granularity rollback.
    pub uses_statement_tx: bool,
}

macro_rules! get_cursor {
    ($state:expr, $cursor_id:expr) => {
        match $state.cursors.get_mut($cursor_id) {
            Some(cursor) => cursor,
            None => crate::bail_misuse_error!("cursor {} is not open", $cursor_id),
        }
    };
}

impl Program {
    pub fn explain(&self) {
        println!("addr  opcode             p1    p2    p3    p4             p5  comment");
        println!("----  -----------------  ----  ----  ----  -------------  --  -------");
        for (addr, insn) in self.insns.iter().enumerate() {
            let s = explain::insn_to_str(
                self,
                addr as InsnReference,
                insn,
                String::new(),
                self.comments.get(&(addr as InsnReference)).copied(),
            );
            println!("{}", s);
        }
    }

    fn conn(&self) -> Result<Rc<Connection>> {
        match self.connection.upgrade() {
            Some(conn) => Ok(conn),
            None => crate::bail_misuse_error!("program outlived its connection"),
        }
    }

    pub fn step<'a>(&self, state: &'a mut ProgramState) -> Result<StepResult<'a>> {
        let conn = self.conn()?;
        if state.halted {
            crate::bail_misuse_error!("step on a halted program without reset");
        }
        if !state.started {
            state.started = true;
            conn.active_statements.set(conn.active_statements.get() + 1);
        }
        loop {
            if conn.interrupted.get() {
                return Err(VellumError::Interrupted);
            }
            let insn = match self.insns.get(state.pc as usize) {
                Some(insn) => insn,
                None => {
                    return Err(VellumError::InternalError(
                        "program ran off the end of the instruction list".to_string(),
                    ))
                }
            };
            trace!("step: pc={} insn={:?}", state.pc, insn);
            match insn {
                Insn::Init { target_pc } => {
                    state.pc = target_pc.to_offset_int();
                }
                Insn::Noop => {
                    state.pc += 1;
                }
                Insn::Null { dest, dest_end } => {
                    let end = dest_end.unwrap_or(*dest);
                    for i in *dest..=end {
                        state.registers[i].set_null();
                    }
                    state.pc += 1;
                }
                Insn::NullRow { cursor_id } => {
                    let cursor = get_cursor!(state, cursor_id);
                    cursor.null_row = true;
                    state.pc += 1;
                }
                Insn::Integer { value, dest } => {
                    state.registers[*dest].set_integer(*value);
                    state.pc += 1;
                }
                Insn::Int64 { value, dest } => {
                    let v = match value {
                        P4::Int64(v) => *v,
                        other => {
                            return Err(VellumError::InternalError(format!(
                                "Int64 carries P4 tag {:?}",
                                other
                            )))
                        }
                    };
                    state.registers[*dest].set_integer(v);
                    state.pc += 1;
                }
                Insn::Real { value, dest } => {
                    state.registers[*dest].set_float(*value);
                    state.pc += 1;
                }
                Insn::RealAffinity { register } => {
                    if let Value::Integer(i) = &state.registers[*register] {
                        let f = *i as f64;
                        state.registers[*register].set_float(f);
                    }
                    state.pc += 1;
                }
                Insn::String8 { value, dest } => {
                    state.registers[*dest].set_text(value);
                    state.pc += 1;
                }
                Insn::Blob { value, dest } => {
                    state.registers[*dest].set_blob(value.clone());
                    state.pc += 1;
                }
                Insn::ZeroBlob { count, dest } => {
                    state.registers[*dest].set_zeroblob(*count);
                    state.pc += 1;
                }
                Insn::Move {
                    source_reg,
                    dest_reg,
                    count,
                } => {
                    for i in 0..*count {
                        let value = state.registers[*source_reg + i].take();
                        state.registers[*dest_reg + i] = value;
                    }
                    state.pc += 1;
                }
                Insn::Copy { src_reg, dst_reg } => {
                    state.registers[*dst_reg] = state.registers[*src_reg].deep_copy();
                    state.pc += 1;
                }
                Insn::SCopy { src_reg, dst_reg } => {
                    let alias = state.registers[*src_reg].shallow_copy();
                    state.registers[*dst_reg] = alias;
                    state.pc += 1;
                }
                Insn::Add { lhs, rhs, dest } => {
                    state.registers[*dest] =
                        exec_add(&state.registers[*lhs], &state.registers[*rhs]);
                    state.pc += 1;
                }
                Insn::Subtract { lhs, rhs, dest } => {
                    state.registers[*dest] =
                        exec_subtract(&state.registers[*lhs], &state.registers[*rhs]);
                    state.pc += 1;
                }
                Insn::Multiply { lhs, rhs, dest } => {
                    state.registers[*dest] =
                        exec_multiply(&state.registers[*lhs], &state.registers[*rhs]);
                    state.pc += 1;
                }
                Insn::Divide { lhs, rhs, dest } => {
                    state.registers[*dest] =
                        exec_divide(&state.registers[*lhs], &state.registers[*rhs]);
                    state.pc += 1;
                }
                Insn::Remainder { lhs, rhs, dest } => {
                    state.registers[*dest] =
                        exec_remainder(&state.registers[*lhs], &state.registers[*rhs]);
                    state.pc += 1;
                }
                Insn::BitAnd { lhs, rhs, dest } => {
                    state.registers[*dest] =
                        exec_bit_and(&state.registers[*lhs], &state.registers[*rhs]);
                    state.pc += 1;
                }
                Insn::BitOr { lhs, rhs, dest } => {
                    state.registers[*dest] =
                        exec_bit_or(&state.registers[*lhs], &state.registers[*rhs]);
                    state.pc += 1;
                }
                Insn::BitNot { reg, dest } => {
                    state.registers[*dest] = exec_bit_not(&state.registers[*reg]);
                    state.pc += 1;
                }
                Insn::MustBeInt { reg } => {
                    let mut v = state.registers[*reg].clone();
                    v.numerify();
                    match v {
                        Value::Integer(i) => {
                            state.registers[*reg].set_integer(i);
                            state.pc += 1;
                        }
                        _ => {
                            return Err(VellumError::ConversionError(format!(
                                "register {} is not an integer",
                                reg
                            )))
                        }
                    }
                }
                Insn::Compare {
                    start_reg_a,
                    start_reg_b,
                    count,
                    key_info,
                } => {
                    if *start_reg_a + *count > *start_reg_b {
                        return Err(VellumError::InternalError(
                            "Compare registers overlap".to_string(),
                        ));
                    }
                    let a = &state.registers[*start_reg_a..*start_reg_a + *count];
                    let b = &state.registers[*start_reg_b..*start_reg_b + *count];
                    state.last_compare = Some(compare_unpacked(a, b, key_info));
                    state.pc += 1;
                }
                Insn::Jump {
                    target_pc_lt,
                    target_pc_eq,
                    target_pc_gt,
                } => {
                    let cmp = match state.last_compare.take() {
                        Some(cmp) => cmp,
                        None => {
                            return Err(VellumError::InternalError(
                                "Jump without a preceding Compare".to_string(),
                            ))
                        }
                    };
                    let target = match cmp {
                        Ordering::Less => target_pc_lt,
                        Ordering::Equal => target_pc_eq,
                        Ordering::Greater => target_pc_gt,
                    };
                    state.pc = target.to_offset_int();
                }
                Insn::Eq {
                    lhs,
                    rhs,
                    target_pc,
                    jump_if_null,
                } => {
                    exec_comparison_jump(state, *lhs, *rhs, *target_pc, *jump_if_null, |o| {
                        o == Ordering::Equal
                    });
                }
                Insn::Ne {
                    lhs,
                    rhs,
                    target_pc,
                    jump_if_null,
                } => {
                    exec_comparison_jump(state, *lhs, *rhs, *target_pc, *jump_if_null, |o| {
                        o != Ordering::Equal
                    });
                }
                Insn::Lt {
                    lhs,
                    rhs,
                    target_pc,
                    jump_if_null,
                } => {
                    exec_comparison_jump(state, *lhs, *rhs, *target_pc, *jump_if_null, |o| {
                        o == Ordering::Less
                    });
                }
                Insn::Le {
                    lhs,
                    rhs,
                    target_pc,
                    jump_if_null,
                } => {
                    exec_comparison_jump(state, *lhs, *rhs, *target_pc, *jump_if_null, |o| {
                        o != Ordering::Greater
                    });
                }
                Insn::Gt {
                    lhs,
                    rhs,
                    target_pc,
                    jump_if_null,
                } => {
                    exec_comparison_jump(state, *lhs, *rhs, *target_pc, *jump_if_null, |o| {
                        o == Ordering::Greater
                    });
                }
                Insn::Ge {
                    lhs,
                    rhs,
                    target_pc,
                    jump_if_null,
                } => {
                    exec_comparison_jump(state, *lhs, *rhs, *target_pc, *jump_if_null, |o| {
                        o != Ordering::Less
                    });
                }
                Insn::If {
                    reg,
                    target_pc,
                    jump_if_null,
                } => {
                    let jump = match truthiness(&state.registers[*reg]) {
                        Some(b) => b,
                        None => *jump_if_null,
                    };
                    if jump {
                        state.pc = target_pc.to_offset_int();
                    } else {
                        state.pc += 1;
                    }
                }
                Insn::IfNot {
                    reg,
                    target_pc,
                    jump_if_null,
                } => {
                    let jump = match truthiness(&state.registers[*reg]) {
                        Some(b) => !b,
                        None => *jump_if_null,
                    };
                    if jump {
                        state.pc = target_pc.to_offset_int();
                    } else {
                        state.pc += 1;
                    }
                }
                Insn::IsNull { src, target_pc } => {
                    if matches!(state.registers[*src], Value::Null) {
                        state.pc = target_pc.to_offset_int();
                    } else {
                        state.pc += 1;
                    }
                }
                Insn::NotNull { reg, target_pc } => {
                    if matches!(state.registers[*reg], Value::Null) {
                        state.pc += 1;
                    } else {
                        state.pc = target_pc.to_offset_int();
                    }
                }
                Insn::IfPos {
                    reg,
                    target_pc,
                    decrement_by,
                } => match &state.registers[*reg] {
                    Value::Integer(n) if *n > 0 => {
                        let n = *n;
                        state.registers[*reg].set_integer(n - *decrement_by as i64);
                        state.pc = target_pc.to_offset_int();
                    }
                    Value::Integer(_) => {
                        state.pc += 1;
                    }
                    _ => {
                        return Err(VellumError::InternalError(
                            "IfPos on a non-integer register".to_string(),
                        ))
                    }
                },
                Insn::DecrJumpZero { reg, target_pc } => match &state.registers[*reg] {
                    Value::Integer(n) => {
                        let n = n - 1;
                        state.registers[*reg].set_integer(n);
                        if n == 0 {
                            state.pc = target_pc.to_offset_int();
                        } else {
                            state.pc += 1;
                        }
                    }
                    _ => {
                        return Err(VellumError::InternalError(
                            "DecrJumpZero on a non-integer register".to_string(),
                        ))
                    }
                },
                Insn::Goto { target_pc } => {
                    state.pc = target_pc.to_offset_int();
                }
                Insn::Gosub {
                    target_pc,
                    return_reg,
                } => {
                    state.registers[*return_reg].set_integer((state.pc + 1) as i64);
                    state.pc = target_pc.to_offset_int();
                }
                Insn::Return { return_reg } => match &state.registers[*return_reg] {
                    Value::Integer(pc) if *pc >= 0 => {
                        state.pc = *pc as InsnReference;
                    }
                    _ => {
                        return Err(VellumError::InternalError(
                            "Return register does not hold an address".to_string(),
                        ))
                    }
                },
                Insn::OpenRead {
                    cursor_id,
                    root_page,
                    db,
                }
                | Insn::OpenWrite {
                    cursor_id,
                    root_page,
                    db,
                } => {
                    let file = conn.file(*db)?;
                    let cursor = match &self.cursor_ref[*cursor_id].1 {
                        CursorType::BTreeTable => file.open_table_cursor(*root_page)?,
                        CursorType::BTreeIndex(_) => file.open_index_cursor(*root_page)?,
                        CursorType::Pseudo => {
                            crate::bail_misuse_error!("OpenRead on a pseudo cursor slot")
                        }
                    };
                    state.cursors.insert(
                        *cursor_id,
                        VdbeCursor {
                            kind: VdbeCursorKind::Btree(cursor),
                            db: *db,
                            null_row: false,
                            cache_generation: conn.write_generation.get(),
                            cached_columns: None,
                            trip_generation: conn.trip_generation.get(),
                        },
                    );
                    state.pc += 1;
                }
                Insn::OpenPseudo {
                    cursor_id,
                    content_reg,
                    num_fields,
                } => {
                    state.cursors.insert(
                        *cursor_id,
                        VdbeCursor {
                            kind: VdbeCursorKind::Pseudo(PseudoCursor::new(
                                *content_reg,
                                *num_fields,
                            )),
                            db: 0,
                            null_row: false,
                            cache_generation: conn.write_generation.get(),
                            cached_columns: None,
                            trip_generation: conn.trip_generation.get(),
                        },
                    );
                    state.pc += 1;
                }
                Insn::Close { cursor_id } => {
                    state.cursors.remove(cursor_id);
                    state.pc += 1;
                }
                Insn::Rewind {
                    cursor_id,
                    pc_if_empty,
                } => {
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.null_row = false;
                    cursor.invalidate_cache();
                    let has_row = cursor.btree("Rewind")?.rewind()?;
                    if has_row {
                        state.pc += 1;
                    } else {
                        state.pc = pc_if_empty.to_offset_int();
                    }
                }
                Insn::Last {
                    cursor_id,
                    pc_if_empty,
                } => {
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.null_row = false;
                    cursor.invalidate_cache();
                    let has_row = cursor.btree("Last")?.last()?;
                    if has_row {
                        state.pc += 1;
                    } else {
                        state.pc = pc_if_empty.to_offset_int();
                    }
                }
                Insn::Next {
                    cursor_id,
                    pc_if_next,
                } => {
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.invalidate_cache();
                    let has_row = cursor.btree("Next")?.next()?;
                    if has_row {
                        state.pc = pc_if_next.to_offset_int();
                    } else {
                        state.pc += 1;
                    }
                }
                Insn::Prev {
                    cursor_id,
                    pc_if_prev,
                } => {
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.invalidate_cache();
                    let has_row = cursor.btree("Prev")?.prev()?;
                    if has_row {
                        state.pc = pc_if_prev.to_offset_int();
                    } else {
                        state.pc += 1;
                    }
                }
                Insn::Column {
                    cursor_id,
                    column,
                    dest,
                } => {
                    self.resolve_deferred_seek(state)?;
                    let generation = conn.write_generation.get();
                    let value = {
                        let cursor = get_cursor!(state, cursor_id);
                        self.check_trip(cursor, &conn)?;
                        if cursor.null_row {
                            Value::Null
                        } else {
                            match &mut cursor.kind {
                                VdbeCursorKind::Pseudo(pseudo) => {
                                    let content = &state.registers[pseudo.content_reg];
                                    let columns = pseudo.columns(content)?;
                                    columns.get(*column).cloned().unwrap_or(Value::Null)
                                }
                                VdbeCursorKind::Btree(btree) => {
                                    if cursor.cached_columns.is_none()
                                        || cursor.cache_generation != generation
                                    {
                                        let columns = match btree.record()? {
                                            Some(payload) => ondisk::read_record(&payload)?,
                                            None => Vec::new(),
                                        };
                                        cursor.cached_columns = Some(columns);
                                        cursor.cache_generation = generation;
                                    }
                                    cursor
                                        .cached_columns
                                        .as_ref()
                                        .and_then(|cols| cols.get(*column))
                                        .cloned()
                                        .unwrap_or(Value::Null)
                                }
                            }
                        }
                    };
                    // column values alias the record buffer; own them
                    // before they land in a register that outlives it
                    let mut value = value;
                    value.make_writeable();
                    state.registers[*dest] = value;
                    state.pc += 1;
                }
                Insn::RowId { cursor_id, dest } => {
                    self.resolve_deferred_seek(state)?;
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    if cursor.null_row {
                        state.registers[*dest].set_null();
                    } else {
                        match cursor.btree("RowId")?.rowid()? {
                            Some(rowid) => state.registers[*dest].set_integer(rowid),
                            None => state.registers[*dest].set_null(),
                        }
                    }
                    state.pc += 1;
                }
                Insn::NewRowid {
                    cursor_id,
                    rowid_reg,
                } => {
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.invalidate_cache();
                    let btree = cursor.btree("NewRowid")?;
                    let rowid = new_rowid(btree.as_mut())?;
                    state.registers[*rowid_reg].set_integer(rowid);
                    state.pc += 1;
                }
                Insn::SeekRowid {
                    cursor_id,
                    src_reg,
                    target_pc,
                } => {
                    let rowid = state.registers[*src_reg].as_integer();
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.null_row = false;
                    cursor.invalidate_cache();
                    let found = cursor
                        .btree("SeekRowid")?
                        .seek(SeekKey::TableRowId(rowid), SeekOp::EQ)?;
                    if found {
                        state.pc += 1;
                    } else {
                        state.pc = target_pc.to_offset_int();
                    }
                }
                Insn::NotExists {
                    cursor,
                    rowid_reg,
                    target_pc,
                } => {
                    let rowid = state.registers[*rowid_reg].as_integer();
                    let vdbe_cursor = get_cursor!(state, cursor);
                    self.check_trip(vdbe_cursor, &conn)?;
                    vdbe_cursor.invalidate_cache();
                    let btree = vdbe_cursor.btree("NotExists")?;
                    let exists = btree.exists(&SeekKey::TableRowId(rowid))?;
                    if exists {
                        let _ = btree.seek(SeekKey::TableRowId(rowid), SeekOp::EQ)?;
                        state.pc += 1;
                    } else {
                        state.pc = target_pc.to_offset_int();
                    }
                }
                Insn::DeferredSeek {
                    index_cursor_id,
                    table_cursor_id,
                } => {
                    state.deferred_seek = Some((*index_cursor_id, *table_cursor_id));
                    state.pc += 1;
                }
                Insn::SeekGE {
                    is_index,
                    cursor_id,
                    start_reg,
                    num_regs,
                    target_pc,
                }
                | Insn::SeekGT {
                    is_index,
                    cursor_id,
                    start_reg,
                    num_regs,
                    target_pc,
                } => {
                    let op = match insn {
                        Insn::SeekGE { .. } => SeekOp::GE,
                        _ => SeekOp::GT,
                    };
                    let found = if *is_index {
                        let probe = self.unpacked_probe(state, *cursor_id, *start_reg, *num_regs)?;
                        let cursor = get_cursor!(state, cursor_id);
                        self.check_trip(cursor, &conn)?;
                        cursor.null_row = false;
                        cursor.invalidate_cache();
                        cursor.btree("Seek")?.seek(SeekKey::IndexKey(&probe), op)?
                    } else {
                        let rowid = state.registers[*start_reg].as_integer();
                        let cursor = get_cursor!(state, cursor_id);
                        self.check_trip(cursor, &conn)?;
                        cursor.null_row = false;
                        cursor.invalidate_cache();
                        cursor.btree("Seek")?.seek(SeekKey::TableRowId(rowid), op)?
                    };
                    if found {
                        state.pc += 1;
                    } else {
                        state.pc = target_pc.to_offset_int();
                    }
                }
                Insn::IdxGE {
                    cursor_id,
                    start_reg,
                    num_regs,
                    target_pc,
                }
                | Insn::IdxGT {
                    cursor_id,
                    start_reg,
                    num_regs,
                    target_pc,
                } => {
                    let strict = matches!(insn, Insn::IdxGT { .. });
                    let probe = self.unpacked_probe(state, *cursor_id, *start_reg, *num_regs)?;
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    let record = cursor.btree("IdxGE")?.record()?;
                    let jump = match record {
                        Some(payload) => {
                            let cmp = crate::types::compare_record(&payload, &probe)?;
                            if strict {
                                cmp == Ordering::Greater
                            } else {
                                cmp != Ordering::Less
                            }
                        }
                        None => true,
                    };
                    if jump {
                        state.pc = target_pc.to_offset_int();
                    } else {
                        state.pc += 1;
                    }
                }
                Insn::IdxInsert {
                    cursor_id,
                    record_reg,
                } => {
                    let record = record_bytes(&state.registers[*record_reg])?;
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.invalidate_cache();
                    cursor.btree("IdxInsert")?.insert(None, &record)?;
                    conn.bump_write_generation();
                    state.pc += 1;
                }
                Insn::MakeRecord {
                    start_reg,
                    count,
                    dest_reg,
                } => {
                    let file_format = conn.file(0)?.get_meta(MetaSlot::FileFormat);
                    let values = &state.registers[*start_reg..*start_reg + *count];
                    let payload = ondisk::serialize_record(values, file_format);
                    state.registers[*dest_reg].set_blob(payload);
                    state.pc += 1;
                }
                Insn::ResultRow { start_reg, count } => {
                    state.pc += 1;
                    let values = state.registers[*start_reg..*start_reg + *count]
                        .iter()
                        .map(|v| v.as_value_ref())
                        .collect();
                    return Ok(StepResult::Row(Record::new(values)));
                }
                Insn::Insert {
                    cursor_id,
                    key_reg,
                    record_reg,
                    count_change,
                } => {
                    let rowid = state.registers[*key_reg].as_integer();
                    let record = record_bytes(&state.registers[*record_reg])?;
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.invalidate_cache();
                    cursor.btree("Insert")?.insert(Some(rowid), &record)?;
                    if *count_change {
                        state.n_change += 1;
                    }
                    conn.last_insert_rowid.set(rowid);
                    conn.bump_write_generation();
                    state.pc += 1;
                }
                Insn::Delete {
                    cursor_id,
                    count_change,
                } => {
                    let cursor = get_cursor!(state, cursor_id);
                    self.check_trip(cursor, &conn)?;
                    cursor.invalidate_cache();
                    cursor.btree("Delete")?.delete()?;
                    if *count_change {
                        state.n_change += 1;
                    }
                    conn.bump_write_generation();
                    state.pc += 1;
                }
                Insn::AggStep { acc_reg, col, func } => {
                    let value = state.registers[*col].clone();
                    let acc = &mut state.registers[*acc_reg];
                    if !matches!(acc, Value::Agg(_)) {
                        *acc = Value::Agg(Box::new(match func {
                            AggFunc::Avg => AggContext::Avg(Value::Integer(0), 0),
                            AggFunc::Count => AggContext::Count(0),
                            AggFunc::Max => AggContext::Max(None),
                            AggFunc::Min => AggContext::Min(None),
                            AggFunc::Sum => AggContext::Sum(Value::Null),
                        }));
                    }
                    if let Value::Agg(ctx) = acc {
                        agg_step(ctx, value);
                    }
                    state.pc += 1;
                }
                Insn::AggFinal { register, func } => {
                    let value = match &state.registers[*register] {
                        Value::Agg(ctx) => ctx.final_value(),
                        // no rows were aggregated
                        _ => match func {
                            AggFunc::Count => Value::Integer(0),
                            _ => Value::Null,
                        },
                    };
                    state.registers[*register] = value;
                    state.pc += 1;
                }
                Insn::Transaction { db, write } => {
                    let file = conn.file(*db)?;
                    let result = if *write {
                        file.begin_write_tx()?
                    } else {
                        file.begin_read_tx()?
                    };
                    if let TxResult::Busy = result {
                        trace!("begin tx busy on db {}", db);
                        return Ok(StepResult::Busy);
                    }
                    let current = conn.transaction_state.get();
                    let new_state = match (current, *write) {
                        (TransactionState::Write, _) => TransactionState::Write,
                        (_, true) => TransactionState::Write,
                        (TransactionState::Read, false) => TransactionState::Read,
                        (TransactionState::None, false) => TransactionState::Read,
                    };
                    conn.transaction_state.set(new_state);
                    state.pc += 1;
                }
                Insn::Statement { db } => {
                    let file = conn.file(*db)?;
                    file.begin_statement()?;
                    if !state.stmt_tx_dbs.contains(db) {
                        state.stmt_tx_dbs.push(*db);
                    }
                    state.pc += 1;
                }
                Insn::Destroy { db, root_page } => {
                    let file = conn.file(*db)?;
                    file.destroy_tree(*root_page)?;
                    conn.bump_write_generation();
                    conn.bump_trip_generation();
                    state.pc += 1;
                }
                Insn::ReadCookie { db, slot, dest } => {
                    let file = conn.file(*db)?;
                    state.registers[*dest].set_integer(file.get_meta(*slot) as i64);
                    state.pc += 1;
                }
                Insn::SetCookie { db, slot, value } => {
                    let file = conn.file(*db)?;
                    file.update_meta(*slot, *value)?;
                    state.pc += 1;
                }
                Insn::Halt {
                    err_code,
                    error_action,
                    description,
                } => {
                    trace!("Halt err_code={} auto_commit={}", err_code, conn.auto_commit.get());
                    let outcome = if *err_code == 0 {
                        None
                    } else {
                        Some((
                            VellumError::Constraint(format!("{} ({})", description, err_code)),
                            *error_action,
                        ))
                    };
                    return self.halt_program(state, outcome).map(|_| StepResult::Done);
                }
            }
        }
    }

    fn check_trip(&self, cursor: &VdbeCursor, conn: &Connection) -> Result<()> {
        if cursor.trip_generation != conn.trip_generation.get() {
            crate::bail_misuse_error!("cursor invalidated by a rollback");
        }
        Ok(())
    }

    /// Build an unpacked probe key from a register range, under the key
    /// configuration the compiler attached to the cursor.
    fn unpacked_probe(
        &self,
        state: &ProgramState,
        cursor_id: CursorID,
        start_reg: usize,
        num_regs: usize,
    ) -> Result<UnpackedRecord> {
        let key_info = match &self.cursor_ref.get(cursor_id).map(|(_, t)| t) {
            Some(CursorType::BTreeIndex(key_info)) => key_info.clone(),
            _ => crate::bail_misuse_error!("cursor {} is not an index cursor", cursor_id),
        };
        let values: Vec<Value> = state.registers[start_reg..start_reg + num_regs]
            .iter()
            .map(|v| v.deep_copy())
            .collect();
        Ok(UnpackedRecord::new(values, key_info))
    }

    fn resolve_deferred_seek(&self, state: &mut ProgramState) -> Result<()> {
        let (index_cursor_id, table_cursor_id) = match state.deferred_seek.take() {
            Some(pair) => pair,
            None => return Ok(()),
        };
        let rowid = {
            let index_cursor = get_cursor!(state, &index_cursor_id);
            match index_cursor.btree("DeferredSeek")?.rowid()? {
                Some(rowid) => rowid,
                None => crate::bail_corrupt_error!("index entry without a rowid"),
            }
        };
        let table_cursor = get_cursor!(state, &table_cursor_id);
        table_cursor.invalidate_cache();
        let found = table_cursor
            .btree("DeferredSeek")?
            .seek(SeekKey::TableRowId(rowid), SeekOp::EQ)?;
        if !found {
            crate::bail_corrupt_error!("index references missing rowid {}", rowid);
        }
        Ok(())
    }

    /// Transition to Halted and make the commit-or-rollback decision,
    /// exactly once. Safe to call again after halting; later calls just
    /// replay the outcome without touching the transaction again.
    pub(crate) fn halt_program(
        &self,
        state: &mut ProgramState,
        outcome: Option<(VellumError, ErrorAction)>,
    ) -> Result<()> {
        if state.halted {
            return match outcome {
                Some((err, _)) => Err(err),
                None => Ok(()),
            };
        }
        state.halted = true;
        let conn = match self.connection.upgrade() {
            Some(conn) => conn,
            None => {
                return match outcome {
                    Some((err, _)) => Err(err),
                    None => Ok(()),
                }
            }
        };
        if !state.started {
            // execution never began; no commit or rollback is owed
            return match outcome {
                Some((err, _)) => Err(err),
                None => Ok(()),
            };
        }

        state.cursors.clear();
        state.deferred_seek = None;

        let only_statement = conn.active_statements.get() == 1;
        let mut rolled_back = false;
        let result: Result<()> = match outcome {
            None => {
                let mut r = Ok(());
                for db in state.stmt_tx_dbs.drain(..) {
                    if let Err(e) = conn.file(db).and_then(|f| f.commit_statement()) {
                        r = Err(e);
                        break;
                    }
                }
                if r.is_ok() && conn.auto_commit.get() && only_statement {
                    if self.read_only {
                        for file in conn.files_snapshot() {
                            let _ = file.end_read_tx();
                        }
                        conn.transaction_state.set(TransactionState::None);
                    } else {
                        r = commit::commit_all(&conn);
                        if r.is_err() {
                            let _ = commit::rollback_all(&conn);
                            rolled_back = true;
                        }
                    }
                }
                r
            }
            Some((err, action)) => {
                if self.read_only {
                    if conn.auto_commit.get() && only_statement {
                        for file in conn.files_snapshot() {
                            let _ = file.end_read_tx();
                        }
                        conn.transaction_state.set(TransactionState::None);
                    }
                } else if err.is_fatal()
                    || matches!(action, ErrorAction::Rollback)
                    || state.stmt_tx_dbs.is_empty()
                {
                    // without a statement sub-transaction there is no
                    // cheaper rollback point than the whole transaction
                    let _ = commit::rollback_all(&conn);
                    rolled_back = true;
                } else if matches!(action, ErrorAction::Fail) {
                    // keep this statement's partial changes
                    for db in state.stmt_tx_dbs.drain(..) {
                        if let Ok(file) = conn.file(db) {
                            let _ = file.commit_statement();
                        }
                    }
                    if conn.auto_commit.get() && only_statement {
                        if commit::commit_all(&conn).is_err() {
                            let _ = commit::rollback_all(&conn);
                            rolled_back = true;
                        }
                    }
                } else {
                    // statement-granularity recovery
                    for db in state.stmt_tx_dbs.drain(..) {
                        if let Ok(file) = conn.file(db) {
                            let _ = file.rollback_statement();
                        }
                    }
                    rolled_back = true;
                    if conn.auto_commit.get() && only_statement {
                        // the implicit transaction was this statement's
                        let _ = commit::rollback_all(&conn);
                    }
                }
                Err(err)
            }
        };

        if rolled_back || result.is_err() {
            conn.change_count.set(0);
        } else {
            conn.change_count.set(state.n_change);
            conn.total_changes.set(conn.total_changes.get() + state.n_change);
        }
        conn.active_statements
            .set(conn.active_statements.get().saturating_sub(1));
        if conn.active_statements.get() == 0 {
            conn.interrupted.set(false);
        }
        if let Err(e) = &result {
            state.pending_error = Some(e.clone());
        }
        result
    }

    /// Runtime-error path: halt with the statement's default Abort
    /// action and hand back the (possibly reclassified) error.
    pub(crate) fn halt_on_error(&self, state: &mut ProgramState, err: VellumError) -> VellumError {
        match self.halt_program(state, Some((err, ErrorAction::Abort))) {
            Err(e) => e,
            Ok(()) => VellumError::InternalError("error halt reported success".to_string()),
        }
    }

    /// Back to Ready: release register contents, close cursors, clear
    /// the context stack, and surface the pending error to the caller.
    pub(crate) fn reset_program(&self, state: &mut ProgramState) -> Option<VellumError> {
        if state.started && !state.halted {
            let _ = self.halt_program(state, None);
        }
        let pending = state.pending_error.take();
        for register in state.registers.iter_mut() {
            register.set_null();
        }
        state.cursors.clear();
        state.context_stack.clear();
        state.last_compare = None;
        state.deferred_seek = None;
        state.stmt_tx_dbs.clear();
        state.n_change = 0;
        state.pc = 0;
        state.started = false;
        state.halted = false;
        pending
    }
}

fn truthiness(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(*i != 0),
        Value::Float(f) => Some(*f != 0.0),
        _ => Some(value.as_float() != 0.0),
    }
}

fn exec_comparison_jump(
    state: &mut ProgramState,
    lhs: usize,
    rhs: usize,
    target_pc: BranchOffset,
    jump_if_null: bool,
    predicate: impl Fn(Ordering) -> bool,
) {
    let (l, r) = (&state.registers[lhs], &state.registers[rhs]);
    let jump = if matches!(l, Value::Null) || matches!(r, Value::Null) {
        jump_if_null
    } else {
        predicate(compare_values(l, r, CollationSeq::Binary))
    };
    if jump {
        state.pc = target_pc.to_offset_int();
    } else {
        state.pc += 1;
    }
}

fn record_bytes(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Blob(b) => Ok(b.to_vec()),
        _ => crate::bail_misuse_error!("register does not hold a record"),
    }
}

/// Pick a rowid one past the current maximum; when the table has
/// reached the top of the rowid space, probe randomly for a free one.
fn new_rowid(cursor: &mut dyn StorageCursor) -> Result<i64> {
    let max = if cursor.last()? {
        cursor.rowid()?.unwrap_or(0)
    } else {
        0
    };
    if max < i64::MAX {
        return Ok(max + 1);
    }
    let mut rng = thread_rng();
    for _ in 0..100 {
        let candidate: i64 = rng.gen_range(1..i64::MAX);
        if !cursor.exists(&SeekKey::TableRowId(candidate))? {
            return Ok(candidate);
        }
    }
    Err(VellumError::Full)
}

fn agg_step(ctx: &mut AggContext, value: Value) {
    match ctx {
        AggContext::Count(n) => {
            if !matches!(value, Value::Null) {
                *n += 1;
            }
        }
        AggContext::Sum(acc) => {
            if !matches!(value, Value::Null) {
                if matches!(acc, Value::Null) {
                    *acc = value;
                } else {
                    *acc = exec_add(acc, &value);
                }
            }
        }
        AggContext::Avg(acc, n) => {
            if !matches!(value, Value::Null) {
                *acc = exec_add(acc, &value);
                *n += 1;
            }
        }
        AggContext::Max(max) => {
            if !matches!(value, Value::Null) {
                let replace = match max {
                    Some(current) => {
                        compare_values(&value, current, CollationSeq::Binary) == Ordering::Greater
                    }
                    None => true,
                };
                if replace {
                    *max = Some(value);
                }
            }
        }
        AggContext::Min(min) => {
            if !matches!(value, Value::Null) {
                let replace = match min {
                    Some(current) => {
                        compare_values(&value, current, CollationSeq::Binary) == Ordering::Less
                    }
                    None => true,
                };
                if replace {
                    *min = Some(value);
                }
            }
        }
    }
}
