use std::{collections::HashMap, rc::Rc, rc::Weak};

use crate::types::KeyInfo;
use crate::Connection;
use crate::Result;

use super::insn::P4;
use super::{BranchOffset, CursorID, Insn, InsnReference, Program};

/// What kind of object a cursor slot will be opened over. Recorded at
/// compile time so open-cursor opcodes stay small.
#[derive(Debug, Clone)]
pub enum CursorType {
    BTreeTable,
    BTreeIndex(Rc<KeyInfo>),
    Pseudo,
}

pub struct ProgramBuilder {
    next_free_register: usize,
    next_free_label: i32,
    insns: Vec<Insn>,
    // instructions deferred to the end of the program, after the
    // transaction opcode, so loop bodies don't recompute constants
    constant_insns: Vec<Insn>,
    // per label: instructions waiting for it, indexed by label id
    unresolved_labels: Vec<Vec<InsnReference>>,
    // per label: the resolved address, once known
    label_addresses: Vec<Option<InsnReference>>,
    next_insn_label: Option<BranchOffset>,
    // Cursors referenced by the program. Indexed by CursorID.
    pub cursor_ref: Vec<(Option<String>, CursorType)>,
    // map of instruction index to manual comment (used in EXPLAIN)
    comments: HashMap<InsnReference, &'static str>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            next_free_register: 1,
            next_free_label: 0,
            insns: Vec::new(),
            constant_insns: Vec::new(),
            unresolved_labels: Vec::new(),
            label_addresses: Vec::new(),
            next_insn_label: None,
            cursor_ref: Vec::new(),
            comments: HashMap::new(),
        }
    }

    pub fn alloc_register(&mut self) -> usize {
        let reg = self.next_free_register;
        self.next_free_register += 1;
        reg
    }

    pub fn alloc_registers(&mut self, amount: usize) -> usize {
        let reg = self.next_free_register;
        self.next_free_register += amount;
        reg
    }

    pub fn next_free_register(&self) -> usize {
        self.next_free_register
    }

    pub fn alloc_cursor_id(
        &mut self,
        table_identifier: Option<String>,
        cursor_type: CursorType,
    ) -> usize {
        let cursor = self.cursor_ref.len();
        self.cursor_ref.push((table_identifier, cursor_type));
        cursor
    }

    /// Append an instruction and return its address. Any label operand
    /// that is already resolved is patched immediately; unresolved ones
    /// are recorded for the resolution pass.
    pub fn emit_insn(&mut self, insn: Insn) -> InsnReference {
        let addr = self.insns.len() as InsnReference;
        self.insns.push(insn);
        self.register_label_references(addr);
        if let Some(label) = self.next_insn_label.take() {
            self.resolve_label(label, BranchOffset::Offset(addr));
        }
        addr
    }

    fn register_label_references(&mut self, addr: InsnReference) {
        let mut patches: Vec<(usize, InsnReference)> = Vec::new();
        for target in self.insns[addr as usize].branch_targets_mut() {
            if let BranchOffset::Label(label) = target {
                let idx = label_index(*label);
                match self.label_addresses.get(idx).copied().flatten() {
                    Some(resolved) => *target = BranchOffset::Offset(resolved),
                    None => patches.push((idx, addr)),
                }
            }
        }
        for (idx, addr) in patches {
            self.unresolved_labels[idx].push(addr);
        }
    }

    pub fn add_comment(&mut self, insn_index: InsnReference, comment: &'static str) {
        self.comments.insert(insn_index, comment);
    }

    // Move the last emitted instruction to the constant pool emitted
    // after the transaction opcode, outside any scan loop.
    pub fn mark_last_insn_constant(&mut self) {
        self.constant_insns.push(self.insns.pop().unwrap());
    }

    pub fn emit_constant_insns(&mut self) {
        for insn in std::mem::take(&mut self.constant_insns) {
            self.emit_insn(insn);
        }
    }

    pub fn offset(&self) -> BranchOffset {
        BranchOffset::Offset(self.insns.len() as InsnReference)
    }

    /// Issue a fresh label: a placeholder jump target usable before its
    /// destination address is known.
    pub fn allocate_label(&mut self) -> BranchOffset {
        self.next_free_label -= 1;
        self.unresolved_labels.push(Vec::new());
        self.label_addresses.push(None);
        BranchOffset::Label(self.next_free_label)
    }

    // Effectively a GOTO <next insn> without emitting an explicit GOTO:
    // the label resolves to whatever instruction is emitted next.
    pub fn preassign_label_to_next_insn(&mut self, label: BranchOffset) {
        self.next_insn_label = Some(label);
    }

    /// Bind a label to a concrete address and patch every instruction
    /// that was waiting for it.
    pub fn resolve_label(&mut self, label: BranchOffset, to_offset: BranchOffset) {
        let label = match label {
            BranchOffset::Label(v) => v,
            _ => panic!("resolve_label called without a label"),
        };
        let offset = match to_offset {
            BranchOffset::Offset(v) => v,
            _ => panic!("resolve_label called without a concrete offset"),
        };
        let idx = label_index(label);
        assert!(
            idx < self.label_addresses.len(),
            "resolve of a label that was never allocated"
        );
        assert!(
            self.label_addresses[idx].is_none(),
            "label {} resolved twice",
            label
        );
        self.label_addresses[idx] = Some(offset);
        let pending = std::mem::take(&mut self.unresolved_labels[idx]);
        for insn_ref in pending {
            for target in self.insns[insn_ref as usize].branch_targets_mut() {
                if matches!(target, BranchOffset::Label(l) if *l == label) {
                    *target = BranchOffset::Offset(offset);
                }
            }
        }
    }

    // translate table to cursor id
    pub fn resolve_cursor_id(&self, table_identifier: &str) -> CursorID {
        self.cursor_ref
            .iter()
            .position(|(t_ident, _)| {
                t_ident
                    .as_ref()
                    .is_some_and(|ident| ident == table_identifier)
            })
            .unwrap()
    }

    /// Replace an instruction's polymorphic operand. The old payload is
    /// dropped; a tag that does not match the instruction is a misuse.
    pub fn change_p4(&mut self, addr: InsnReference, p4: P4) -> Result<()> {
        let insn = match self.insns.get_mut(addr as usize) {
            Some(insn) => insn,
            None => crate::bail_misuse_error!("no instruction at address {}", addr),
        };
        match (insn, p4) {
            (Insn::Int64 { value, .. }, p4 @ P4::Int64(_)) => *value = p4,
            (Insn::String8 { value, .. }, P4::Text(s)) => *value = s,
            (Insn::Compare { key_info, .. }, P4::KeyInfo(k)) => *key_info = k,
            (insn, p4) => crate::bail_misuse_error!(
                "P4 tag {:?} does not fit instruction {:?}",
                p4,
                insn
            ),
        }
        Ok(())
    }

    /// Finalize the program: verify every jump resolved, demote
    /// Statement opcodes when no instruction can force a statement
    /// rollback, and compute the static read-only classification.
    pub fn build(mut self, connection: Weak<Connection>) -> Program {
        assert!(
            self.constant_insns.is_empty(),
            "constant_insns is not empty when build() is called, did you forget to call emit_constant_insns()?"
        );
        assert!(
            self.unresolved_labels.iter().all(|refs| refs.is_empty()),
            "unresolved labels remain when build() is called"
        );
        for insn in &self.insns {
            for target in insn.branch_targets() {
                assert!(
                    matches!(target, BranchOffset::Offset(_)),
                    "unresolved branch target {:?} in {:?}",
                    target,
                    insn
                );
            }
        }

        let needs_statement_tx = self.insns.iter().any(|insn| insn.may_abort_statement());
        if !needs_statement_tx {
            for insn in self.insns.iter_mut() {
                if matches!(insn, Insn::Statement { .. }) {
                    *insn = Insn::Noop;
                }
            }
        }
        let read_only = !self.insns.iter().any(|insn| insn.is_write());

        Program {
            max_registers: self.next_free_register,
            insns: self.insns,
            cursor_ref: self.cursor_ref,
            comments: self.comments,
            connection,
            read_only,
            uses_statement_tx: needs_statement_tx,
        }
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn label_index(label: i32) -> usize {
    assert!(label < 0);
    (label.unsigned_abs() - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdbe::insn::ErrorAction;
    use crate::vdbe::Insn;

    fn build(builder: ProgramBuilder) -> Program {
        builder.build(Weak::new())
    }

    fn halt_ok() -> Insn {
        Insn::Halt {
            err_code: 0,
            error_action: ErrorAction::Abort,
            description: String::new(),
        }
    }

    #[test]
    fn test_forward_label_resolution() {
        let mut builder = ProgramBuilder::new();
        let end = builder.allocate_label();
        builder.emit_insn(Insn::Goto { target_pc: end });
        builder.emit_insn(Insn::Integer { value: 1, dest: 1 });
        let halt_addr = builder.emit_insn(halt_ok());
        builder.resolve_label(end, BranchOffset::Offset(halt_addr));
        let program = build(builder);
        match program.insns[0] {
            Insn::Goto {
                target_pc: BranchOffset::Offset(2),
            } => {}
            ref other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_label_emitted_after_resolution_is_patched_immediately() {
        let mut builder = ProgramBuilder::new();
        let top = builder.allocate_label();
        builder.preassign_label_to_next_insn(top);
        builder.emit_insn(Insn::Integer { value: 1, dest: 1 });
        builder.emit_insn(Insn::Goto { target_pc: top });
        builder.emit_insn(halt_ok());
        let program = build(builder);
        match program.insns[1] {
            Insn::Goto {
                target_pc: BranchOffset::Offset(0),
            } => {}
            ref other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_every_branch_target_is_an_offset_after_build() {
        let mut builder = ProgramBuilder::new();
        let a = builder.allocate_label();
        let b = builder.allocate_label();
        builder.emit_insn(Insn::Goto { target_pc: a });
        builder.emit_insn(Insn::IsNull {
            src: 1,
            target_pc: b,
        });
        let addr = builder.emit_insn(halt_ok());
        builder.resolve_label(a, BranchOffset::Offset(addr));
        builder.resolve_label(b, BranchOffset::Offset(addr));
        let program = build(builder);
        for insn in &program.insns {
            for target in insn.branch_targets() {
                assert!(matches!(target, BranchOffset::Offset(_)));
            }
        }
    }

    #[test]
    #[should_panic(expected = "unresolved labels remain")]
    fn test_build_panics_on_unresolved_label() {
        let mut builder = ProgramBuilder::new();
        let dangling = builder.allocate_label();
        builder.emit_insn(Insn::Goto {
            target_pc: dangling,
        });
        build(builder);
    }

    #[test]
    fn test_statement_opcodes_elided_when_no_abort_possible() {
        let mut builder = ProgramBuilder::new();
        builder.emit_insn(Insn::Transaction { db: 0, write: true });
        builder.emit_insn(Insn::Statement { db: 0 });
        builder.emit_insn(Insn::Integer { value: 1, dest: 1 });
        builder.emit_insn(halt_ok());
        let program = build(builder);
        assert!(matches!(program.insns[1], Insn::Noop));
        assert!(!program.uses_statement_tx);
    }

    #[test]
    fn test_statement_opcodes_kept_when_constraint_abort_present() {
        let mut builder = ProgramBuilder::new();
        builder.emit_insn(Insn::Transaction { db: 0, write: true });
        builder.emit_insn(Insn::Statement { db: 0 });
        builder.emit_insn(Insn::Halt {
            err_code: crate::error::VELLUM_CONSTRAINT,
            error_action: ErrorAction::Abort,
            description: "constraint failed".to_string(),
        });
        builder.emit_insn(halt_ok());
        let program = build(builder);
        assert!(matches!(program.insns[1], Insn::Statement { db: 0 }));
        assert!(program.uses_statement_tx);
    }

    #[test]
    fn test_change_p4_replaces_matching_tag() {
        let mut builder = ProgramBuilder::new();
        let addr = builder.emit_insn(Insn::Int64 {
            value: P4::Int64(0),
            dest: 1,
        });
        builder.change_p4(addr, P4::Int64(42)).unwrap();
        assert!(builder.change_p4(addr, P4::Text("no".to_string())).is_err());
        builder.emit_insn(halt_ok());
        let program = build(builder);
        match &program.insns[0] {
            Insn::Int64 {
                value: P4::Int64(42),
                ..
            } => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_constant_insns_moved_to_end() {
        let mut builder = ProgramBuilder::new();
        builder.emit_insn(Insn::Integer { value: 5, dest: 1 });
        builder.mark_last_insn_constant();
        builder.emit_insn(Insn::Transaction {
            db: 0,
            write: false,
        });
        builder.emit_constant_insns();
        builder.emit_insn(halt_ok());
        let program = build(builder);
        assert!(matches!(program.insns[0], Insn::Transaction { .. }));
        assert!(matches!(program.insns[1], Insn::Integer { value: 5, .. }));
    }

    #[test]
    fn test_read_only_classification() {
        let mut builder = ProgramBuilder::new();
        builder.emit_insn(Insn::Transaction {
            db: 0,
            write: false,
        });
        builder.emit_insn(halt_ok());
        assert!(build(builder).read_only);

        let mut builder = ProgramBuilder::new();
        builder.emit_insn(Insn::Transaction { db: 0, write: true });
        builder.emit_insn(halt_ok());
        assert!(!build(builder).read_only);
    }
}
