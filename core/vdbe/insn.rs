use std::rc::Rc;

use super::{BranchOffset, CursorID, PageIdx};
use crate::storage::MetaSlot;
use crate::types::{AggFunc, KeyInfo, Value};

/// Conflict-resolution policy attached to a constraint halt. Chosen
/// per statement by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Undo this statement's changes and fail the statement.
    Abort,
    /// Fail the statement but keep prior changes.
    Fail,
    /// Skip the offending row and continue.
    Ignore,
    /// Replace the conflicting row and continue.
    Replace,
    /// Roll back the whole transaction.
    Rollback,
}

/// The polymorphic large operand an instruction may carry. Each tag
/// fully determines ownership: `Text` and `Value` own their payload and
/// are freed when the instruction is dropped or the operand replaced,
/// `KeyInfo` shares a refcounted descriptor.
#[derive(Debug, Clone)]
pub enum P4 {
    None,
    Int32(i32),
    Int64(i64),
    Real(f64),
    Text(String),
    KeyInfo(Rc<KeyInfo>),
    Value(Value),
}

impl std::fmt::Display for P4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            P4::None => write!(f, ""),
            P4::Int32(v) => write!(f, "{}", v),
            P4::Int64(v) => write!(f, "{}", v),
            P4::Real(v) => write!(f, "{}", v),
            P4::Text(s) => write!(f, "{}", s),
            P4::KeyInfo(k) => write!(f, "k({})", k.num_columns()),
            P4::Value(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug)]
pub enum Insn {
    // Initialize the program state and jump to the given PC.
    Init {
        target_pc: BranchOffset,
    },
    // Do nothing. Statement opcodes are demoted to this when the
    // program provably never needs a statement rollback.
    Noop,
    // Write a NULL into register dest. If dest_end is Some, also write NULL into every register between dest and dest_end inclusive.
    Null {
        dest: usize,
        dest_end: Option<usize>,
    },
    // Move the cursor to a null row. Column operations on the null row always produce NULL.
    NullRow {
        cursor_id: CursorID,
    },
    // Write an integer value into a register.
    Integer {
        value: i64,
        dest: usize,
    },
    // Write a 64-bit integer carried in the P4 operand into a register.
    Int64 {
        value: P4,
        dest: usize,
    },
    // Write a float value into a register.
    Real {
        value: f64,
        dest: usize,
    },
    // If register holds an integer, transform it to a float.
    RealAffinity {
        register: usize,
    },
    // Write a string value into a register.
    String8 {
        value: String,
        dest: usize,
    },
    // Write a blob value into a register.
    Blob {
        value: Vec<u8>,
        dest: usize,
    },
    // Write a zero-blob of the given length into a register. The zero
    // bytes are not materialized until the value is expanded.
    ZeroBlob {
        count: usize,
        dest: usize,
    },
    // Move count values from source_reg.. to dest_reg.., leaving NULL behind.
    Move {
        source_reg: usize,
        dest_reg: usize,
        count: usize,
    },
    // Deep copy of one register into another.
    Copy {
        src_reg: usize,
        dst_reg: usize,
    },
    // Shallow copy: dst aliases src's payload. src must outlive the alias.
    SCopy {
        src_reg: usize,
        dst_reg: usize,
    },
    // Add two registers and store the result in a third register.
    Add {
        lhs: usize,
        rhs: usize,
        dest: usize,
    },
    // Subtract rhs from lhs and store in dest.
    Subtract {
        lhs: usize,
        rhs: usize,
        dest: usize,
    },
    // Multiply two registers and store the result in a third register.
    Multiply {
        lhs: usize,
        rhs: usize,
        dest: usize,
    },
    // Divide lhs by rhs and store the result in a third register. Division by zero yields NULL.
    Divide {
        lhs: usize,
        rhs: usize,
        dest: usize,
    },
    // Divide lhs by rhs and place the remainder in dest.
    Remainder {
        lhs: usize,
        rhs: usize,
        dest: usize,
    },
    // Place the result of rhs bitwise AND lhs in dest.
    BitAnd {
        lhs: usize,
        rhs: usize,
        dest: usize,
    },
    // Place the result of rhs bitwise OR lhs in dest.
    BitOr {
        lhs: usize,
        rhs: usize,
        dest: usize,
    },
    // Place the result of bitwise NOT of reg in dest.
    BitNot {
        reg: usize,
        dest: usize,
    },
    // Halt with a conversion error unless the register holds an integer
    // or can be losslessly converted to one.
    MustBeInt {
        reg: usize,
    },
    // Compare two register vectors under a key and save the result for the next Jump.
    Compare {
        start_reg_a: usize,
        start_reg_b: usize,
        count: usize,
        key_info: Rc<KeyInfo>,
    },
    // Jump to one of three addresses depending on the saved Compare result.
    Jump {
        target_pc_lt: BranchOffset,
        target_pc_eq: BranchOffset,
        target_pc_gt: BranchOffset,
    },
    // Compare two registers and jump to target_pc if they are equal.
    Eq {
        lhs: usize,
        rhs: usize,
        target_pc: BranchOffset,
        /// Jump if either operand is NULL. Used for "jump when false" logic.
        jump_if_null: bool,
    },
    // Compare two registers and jump to target_pc if they are not equal.
    Ne {
        lhs: usize,
        rhs: usize,
        target_pc: BranchOffset,
        jump_if_null: bool,
    },
    Lt {
        lhs: usize,
        rhs: usize,
        target_pc: BranchOffset,
        jump_if_null: bool,
    },
    Le {
        lhs: usize,
        rhs: usize,
        target_pc: BranchOffset,
        jump_if_null: bool,
    },
    Gt {
        lhs: usize,
        rhs: usize,
        target_pc: BranchOffset,
        jump_if_null: bool,
    },
    Ge {
        lhs: usize,
        rhs: usize,
        target_pc: BranchOffset,
        jump_if_null: bool,
    },
    // Jump to target_pc if the register is truthy.
    If {
        reg: usize,
        target_pc: BranchOffset,
        /// If the register is NULL, jump iff this is set.
        jump_if_null: bool,
    },
    // Jump to target_pc if the register is falsy.
    IfNot {
        reg: usize,
        target_pc: BranchOffset,
        jump_if_null: bool,
    },
    // Jump if the register is NULL.
    IsNull {
        src: usize,
        target_pc: BranchOffset,
    },
    // Jump if the register is not NULL.
    NotNull {
        reg: usize,
        target_pc: BranchOffset,
    },
    // If the register is a positive integer, decrement it and jump.
    IfPos {
        reg: usize,
        target_pc: BranchOffset,
        decrement_by: usize,
    },
    // Decrement the register and jump if the result is zero.
    DecrJumpZero {
        reg: usize,
        target_pc: BranchOffset,
    },
    // Branch to the given PC.
    Goto {
        target_pc: BranchOffset,
    },
    // Store the next PC in return_reg, then jump to target_pc.
    Gosub {
        target_pc: BranchOffset,
        return_reg: usize,
    },
    // Jump to the PC stored in return_reg.
    Return {
        return_reg: usize,
    },
    // Open a read cursor on the given tree. Whether the tree is a table
    // or an index comes from the program's cursor table.
    OpenRead {
        cursor_id: CursorID,
        root_page: PageIdx,
        db: usize,
    },
    // Open a write cursor on the given tree.
    OpenWrite {
        cursor_id: CursorID,
        root_page: PageIdx,
        db: usize,
    },
    // Open a cursor over the single row serialized in content_reg.
    OpenPseudo {
        cursor_id: CursorID,
        content_reg: usize,
        num_fields: usize,
    },
    // Close a cursor and release its slot.
    Close {
        cursor_id: CursorID,
    },
    // Rewind the cursor to the first entry; jump if the tree is empty.
    Rewind {
        cursor_id: CursorID,
        pc_if_empty: BranchOffset,
    },
    // Position on the last entry; jump if the tree is empty.
    Last {
        cursor_id: CursorID,
        pc_if_empty: BranchOffset,
    },
    // Advance the cursor; jump to pc_if_next while rows remain.
    Next {
        cursor_id: CursorID,
        pc_if_next: BranchOffset,
    },
    // Step the cursor backwards; jump to pc_if_prev while rows remain.
    Prev {
        cursor_id: CursorID,
        pc_if_prev: BranchOffset,
    },
    // Read a column from the current row of the cursor.
    Column {
        cursor_id: CursorID,
        column: usize,
        dest: usize,
    },
    // Read the rowid of the current row.
    RowId {
        cursor_id: CursorID,
        dest: usize,
    },
    // Allocate an unused rowid for the table and store it in rowid_reg.
    NewRowid {
        cursor_id: CursorID,
        rowid_reg: usize,
    },
    // Seek to a rowid. If not found, jump to target_pc.
    SeekRowid {
        cursor_id: CursorID,
        src_reg: usize,
        target_pc: BranchOffset,
    },
    // Jump to target_pc if the rowid in rowid_reg is absent from the table.
    NotExists {
        cursor: CursorID,
        rowid_reg: usize,
        target_pc: BranchOffset,
    },
    // Defer seeking the table cursor to the row named by the index
    // cursor until row data is actually read.
    DeferredSeek {
        index_cursor_id: CursorID,
        table_cursor_id: CursorID,
    },
    // Seek to the first entry >= the key in start_reg..start_reg+num_regs.
    // Jump to target_pc if no such entry exists.
    SeekGE {
        is_index: bool,
        cursor_id: CursorID,
        start_reg: usize,
        num_regs: usize,
        target_pc: BranchOffset,
    },
    // Seek to the first entry > the key. Jump to target_pc if none.
    SeekGT {
        is_index: bool,
        cursor_id: CursorID,
        start_reg: usize,
        num_regs: usize,
        target_pc: BranchOffset,
    },
    // Compare the current index entry against the unpacked key in
    // start_reg..; jump if the entry is >= the key.
    IdxGE {
        cursor_id: CursorID,
        start_reg: usize,
        num_regs: usize,
        target_pc: BranchOffset,
    },
    // Like IdxGE with a strict comparison.
    IdxGT {
        cursor_id: CursorID,
        start_reg: usize,
        num_regs: usize,
        target_pc: BranchOffset,
    },
    // Insert the record in record_reg into an index tree.
    IdxInsert {
        cursor_id: CursorID,
        record_reg: usize,
    },
    // Serialize registers start_reg..start_reg+count into a record.
    MakeRecord {
        start_reg: usize,
        count: usize,
        dest_reg: usize,
    },
    // Emit a row of results.
    ResultRow {
        start_reg: usize,
        count: usize,
    },
    // Insert the record in record_reg under the rowid in key_reg.
    Insert {
        cursor_id: CursorID,
        key_reg: usize,
        record_reg: usize,
        /// Count this insert in the change counter.
        count_change: bool,
    },
    // Delete the row the cursor is on.
    Delete {
        cursor_id: CursorID,
        count_change: bool,
    },
    // Accumulate one row into the aggregate state in acc_reg.
    AggStep {
        acc_reg: usize,
        col: usize,
        func: AggFunc,
    },
    // Replace the aggregate state in register with its final value.
    AggFinal {
        register: usize,
        func: AggFunc,
    },
    // Start a transaction on the given database file.
    Transaction {
        db: usize,
        write: bool,
    },
    // Open a statement sub-transaction, a cheap rollback point covering
    // just this statement. Demoted to Noop when the program cannot
    // trigger a statement rollback.
    Statement {
        db: usize,
    },
    // Delete an entire tree. Irreversible at statement granularity.
    Destroy {
        db: usize,
        root_page: PageIdx,
    },
    // Read a meta slot into a register.
    ReadCookie {
        db: usize,
        slot: MetaSlot,
        dest: usize,
    },
    // Write a meta slot.
    SetCookie {
        db: usize,
        slot: MetaSlot,
        value: u32,
    },
    // Halt the program. A non-zero err_code reports a constraint
    // violation handled per error_action.
    Halt {
        err_code: usize,
        error_action: ErrorAction,
        description: String,
    },
}

impl Insn {
    /// Every branch-target operand of this instruction. The label
    /// resolver patches through these; after the finalize pass they must
    /// all be concrete offsets.
    pub fn branch_targets_mut(&mut self) -> Vec<&mut BranchOffset> {
        match self {
            Insn::Init { target_pc }
            | Insn::Goto { target_pc }
            | Insn::Gosub { target_pc, .. }
            | Insn::Eq { target_pc, .. }
            | Insn::Ne { target_pc, .. }
            | Insn::Lt { target_pc, .. }
            | Insn::Le { target_pc, .. }
            | Insn::Gt { target_pc, .. }
            | Insn::Ge { target_pc, .. }
            | Insn::If { target_pc, .. }
            | Insn::IfNot { target_pc, .. }
            | Insn::IsNull { target_pc, .. }
            | Insn::NotNull { target_pc, .. }
            | Insn::IfPos { target_pc, .. }
            | Insn::DecrJumpZero { target_pc, .. }
            | Insn::SeekRowid { target_pc, .. }
            | Insn::NotExists { target_pc, .. }
            | Insn::SeekGE { target_pc, .. }
            | Insn::SeekGT { target_pc, .. }
            | Insn::IdxGE { target_pc, .. }
            | Insn::IdxGT { target_pc, .. } => vec![target_pc],
            Insn::Rewind { pc_if_empty, .. } | Insn::Last { pc_if_empty, .. } => {
                vec![pc_if_empty]
            }
            Insn::Next { pc_if_next, .. } => vec![pc_if_next],
            Insn::Prev { pc_if_prev, .. } => vec![pc_if_prev],
            Insn::Jump {
                target_pc_lt,
                target_pc_eq,
                target_pc_gt,
            } => vec![target_pc_lt, target_pc_eq, target_pc_gt],
            _ => vec![],
        }
    }

    pub fn branch_targets(&self) -> Vec<BranchOffset> {
        // read-only twin of branch_targets_mut, for the verify pass
        match self {
            Insn::Init { target_pc }
            | Insn::Goto { target_pc }
            | Insn::Gosub { target_pc, .. }
            | Insn::Eq { target_pc, .. }
            | Insn::Ne { target_pc, .. }
            | Insn::Lt { target_pc, .. }
            | Insn::Le { target_pc, .. }
            | Insn::Gt { target_pc, .. }
            | Insn::Ge { target_pc, .. }
            | Insn::If { target_pc, .. }
            | Insn::IfNot { target_pc, .. }
            | Insn::IsNull { target_pc, .. }
            | Insn::NotNull { target_pc, .. }
            | Insn::IfPos { target_pc, .. }
            | Insn::DecrJumpZero { target_pc, .. }
            | Insn::SeekRowid { target_pc, .. }
            | Insn::NotExists { target_pc, .. }
            | Insn::SeekGE { target_pc, .. }
            | Insn::SeekGT { target_pc, .. }
            | Insn::IdxGE { target_pc, .. }
            | Insn::IdxGT { target_pc, .. } => vec![*target_pc],
            Insn::Rewind { pc_if_empty, .. } | Insn::Last { pc_if_empty, .. } => {
                vec![*pc_if_empty]
            }
            Insn::Next { pc_if_next, .. } => vec![*pc_if_next],
            Insn::Prev { pc_if_prev, .. } => vec![*pc_if_prev],
            Insn::Jump {
                target_pc_lt,
                target_pc_eq,
                target_pc_gt,
            } => vec![*target_pc_lt, *target_pc_eq, *target_pc_gt],
            _ => vec![],
        }
    }

    /// True for instructions that can trigger a rollback of just this
    /// statement: a constraint halt that undoes the statement, or a
    /// tree-destroying operation. Programs without any of these have
    /// their Statement opcodes elided.
    pub fn may_abort_statement(&self) -> bool {
        match self {
            Insn::Halt {
                err_code,
                error_action,
                ..
            } => {
                *err_code != 0
                    && matches!(error_action, ErrorAction::Abort | ErrorAction::Rollback)
            }
            Insn::Destroy { .. } => true,
            _ => false,
        }
    }

    /// True for instructions that write through the storage layer. A
    /// program with none of these is read-only and never needs a
    /// commit or rollback on halt.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Insn::OpenWrite { .. }
                | Insn::Insert { .. }
                | Insn::IdxInsert { .. }
                | Insn::Delete { .. }
                | Insn::Destroy { .. }
                | Insn::SetCookie { .. }
                | Insn::Transaction { write: true, .. }
        )
    }
}

pub fn exec_add(lhs: &Value, rhs: &Value) -> Value {
    let (l_final, r_final);
    let lhs = if let Value::Agg(agg) = lhs {
        l_final = agg.final_value();
        &l_final
    } else {
        lhs
    };
    let rhs = if let Value::Agg(agg) = rhs {
        r_final = agg.final_value();
        &r_final
    } else {
        rhs
    };
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Integer(l), Value::Integer(r)) => match l.checked_add(*r) {
            Some(result) => Value::Integer(result),
            None => Value::Float(*l as f64 + *r as f64),
        },
        (Value::Float(l), Value::Float(r)) => Value::Float(l + r),
        (Value::Float(f), Value::Integer(i)) | (Value::Integer(i), Value::Float(f)) => {
            Value::Float(*f + *i as f64)
        }
        (l, r) => exec_add(&to_numeric(l), &to_numeric(r)),
    }
}

pub fn exec_subtract(lhs: &Value, rhs: &Value) -> Value {
    let (l_final, r_final);
    let lhs = if let Value::Agg(agg) = lhs {
        l_final = agg.final_value();
        &l_final
    } else {
        lhs
    };
    let rhs = if let Value::Agg(agg) = rhs {
        r_final = agg.final_value();
        &r_final
    } else {
        rhs
    };
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Integer(l), Value::Integer(r)) => match l.checked_sub(*r) {
            Some(result) => Value::Integer(result),
            None => Value::Float(*l as f64 - *r as f64),
        },
        (Value::Float(l), Value::Float(r)) => Value::Float(l - r),
        (Value::Float(l), Value::Integer(r)) => Value::Float(l - *r as f64),
        (Value::Integer(l), Value::Float(r)) => Value::Float(*l as f64 - r),
        (l, r) => exec_subtract(&to_numeric(l), &to_numeric(r)),
    }
}

pub fn exec_multiply(lhs: &Value, rhs: &Value) -> Value {
    let (l_final, r_final);
    let lhs = if let Value::Agg(agg) = lhs {
        l_final = agg.final_value();
        &l_final
    } else {
        lhs
    };
    let rhs = if let Value::Agg(agg) = rhs {
        r_final = agg.final_value();
        &r_final
    } else {
        rhs
    };
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Integer(l), Value::Integer(r)) => match l.checked_mul(*r) {
            Some(result) => Value::Integer(result),
            None => Value::Float(*l as f64 * *r as f64),
        },
        (Value::Float(l), Value::Float(r)) => Value::Float(l * r),
        (Value::Float(f), Value::Integer(i)) | (Value::Integer(i), Value::Float(f)) => {
            Value::Float(*f * *i as f64)
        }
        (l, r) => exec_multiply(&to_numeric(l), &to_numeric(r)),
    }
}

pub fn exec_divide(lhs: &Value, rhs: &Value) -> Value {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Integer(_), Value::Integer(0)) => Value::Null,
        (Value::Integer(l), Value::Integer(r)) => match l.checked_div(*r) {
            Some(result) => Value::Integer(result),
            None => Value::Float(*l as f64 / *r as f64),
        },
        (Value::Float(l), Value::Float(r)) => {
            if *r == 0.0 {
                Value::Null
            } else {
                Value::Float(l / r)
            }
        }
        (Value::Float(l), Value::Integer(r)) => {
            if *r == 0 {
                Value::Null
            } else {
                Value::Float(l / *r as f64)
            }
        }
        (Value::Integer(l), Value::Float(r)) => {
            if *r == 0.0 {
                Value::Null
            } else {
                Value::Float(*l as f64 / r)
            }
        }
        (l, r) => exec_divide(&to_numeric(l), &to_numeric(r)),
    }
}

pub fn exec_remainder(lhs: &Value, rhs: &Value) -> Value {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Integer(_), Value::Integer(0)) => Value::Null,
        (Value::Integer(l), Value::Integer(r)) => {
            Value::Integer(l.wrapping_rem(*r))
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let (l, r) = (lhs.as_integer(), rhs.as_integer());
            if r == 0 {
                Value::Null
            } else {
                Value::Float(l.wrapping_rem(r) as f64)
            }
        }
        (l, r) => exec_remainder(&to_numeric(l), &to_numeric(r)),
    }
}

pub fn exec_bit_and(lhs: &Value, rhs: &Value) -> Value {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        _ => Value::Integer(lhs.as_integer() & rhs.as_integer()),
    }
}

pub fn exec_bit_or(lhs: &Value, rhs: &Value) -> Value {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        _ => Value::Integer(lhs.as_integer() | rhs.as_integer()),
    }
}

pub fn exec_bit_not(reg: &Value) -> Value {
    match reg {
        Value::Null => Value::Null,
        _ => Value::Integer(!reg.as_integer()),
    }
}

fn to_numeric(value: &Value) -> Value {
    let mut v = value.clone();
    v.numerify();
    match v {
        Value::Integer(_) | Value::Float(_) => v,
        Value::Null => Value::Null,
        _ => Value::Integer(value.as_integer()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_add_overflow_promotes_to_float() {
        assert_eq!(
            exec_add(&Value::Integer(1), &Value::Integer(2)),
            Value::Integer(3)
        );
        assert_eq!(
            exec_add(&Value::Integer(i64::MAX), &Value::Integer(1)),
            Value::Float(i64::MAX as f64 + 1.0)
        );
        assert_eq!(exec_add(&Value::Null, &Value::Integer(2)), Value::Null);
        assert_eq!(
            exec_add(&Value::build_text("3"), &Value::Integer(2)),
            Value::Integer(5)
        );
    }

    #[test]
    fn test_exec_divide_by_zero_is_null() {
        assert_eq!(
            exec_divide(&Value::Integer(6), &Value::Integer(2)),
            Value::Integer(3)
        );
        assert_eq!(exec_divide(&Value::Integer(6), &Value::Integer(0)), Value::Null);
        assert_eq!(exec_divide(&Value::Float(6.0), &Value::Float(0.0)), Value::Null);
        assert_eq!(
            exec_remainder(&Value::Integer(7), &Value::Integer(0)),
            Value::Null
        );
        assert_eq!(
            exec_remainder(&Value::Integer(7), &Value::Integer(4)),
            Value::Integer(3)
        );
    }

    #[test]
    fn test_exec_bit_ops() {
        assert_eq!(
            exec_bit_and(&Value::Integer(0b1100), &Value::Integer(0b1010)),
            Value::Integer(0b1000)
        );
        assert_eq!(
            exec_bit_or(&Value::Integer(0b1100), &Value::Integer(0b1010)),
            Value::Integer(0b1110)
        );
        assert_eq!(exec_bit_not(&Value::Integer(0)), Value::Integer(-1));
        assert_eq!(exec_bit_not(&Value::Null), Value::Null);
        assert_eq!(
            exec_bit_and(&Value::build_text("6"), &Value::Integer(3)),
            Value::Integer(2)
        );
    }

    #[test]
    fn test_may_abort_statement_classification() {
        let halt_ok = Insn::Halt {
            err_code: 0,
            error_action: ErrorAction::Abort,
            description: String::new(),
        };
        assert!(!halt_ok.may_abort_statement());
        let halt_abort = Insn::Halt {
            err_code: crate::error::VELLUM_CONSTRAINT,
            error_action: ErrorAction::Abort,
            description: String::new(),
        };
        assert!(halt_abort.may_abort_statement());
        let halt_fail = Insn::Halt {
            err_code: crate::error::VELLUM_CONSTRAINT,
            error_action: ErrorAction::Fail,
            description: String::new(),
        };
        assert!(!halt_fail.may_abort_statement());
        assert!(Insn::Destroy { db: 0, root_page: 2 }.may_abort_statement());
        assert!(!Insn::Noop.may_abort_statement());
    }
}
