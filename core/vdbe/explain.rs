use super::{Insn, InsnReference, Program};

pub fn insn_to_str(
    program: &Program,
    addr: InsnReference,
    insn: &Insn,
    indent: String,
    manual_comment: Option<&'static str>,
) -> String {
    let (opcode, p1, p2, p3, p4, p5, comment): (&str, i32, i32, i32, String, u16, String) =
        match insn {
            Insn::Init { target_pc } => (
                "Init",
                0,
                target_pc.to_debug_int(),
                0,
                String::new(),
                0,
                format!("Start at {}", target_pc.to_debug_int()),
            ),
            Insn::Noop => ("Noop", 0, 0, 0, String::new(), 0, String::new()),
            Insn::Null { dest, dest_end } => (
                "Null",
                0,
                *dest as i32,
                dest_end.map_or(0, |end| end as i32),
                String::new(),
                0,
                dest_end.map_or(format!("r[{}]=NULL", dest), |end| {
                    format!("r[{}..{}]=NULL", dest, end)
                }),
            ),
            Insn::NullRow { cursor_id } => (
                "NullRow",
                *cursor_id as i32,
                0,
                0,
                String::new(),
                0,
                format!("Set cursor {} to a (pseudo) NULL row", cursor_id),
            ),
            Insn::Integer { value, dest } => (
                "Integer",
                *value as i32,
                *dest as i32,
                0,
                String::new(),
                0,
                format!("r[{}]={}", dest, value),
            ),
            Insn::Int64 { value, dest } => (
                "Int64",
                0,
                *dest as i32,
                0,
                format!("{}", value),
                0,
                format!("r[{}]={}", dest, value),
            ),
            Insn::Real { value, dest } => (
                "Real",
                0,
                *dest as i32,
                0,
                format!("{}", value),
                0,
                format!("r[{}]={}", dest, value),
            ),
            Insn::RealAffinity { register } => (
                "RealAffinity",
                *register as i32,
                0,
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::String8 { value, dest } => (
                "String8",
                0,
                *dest as i32,
                0,
                value.clone(),
                0,
                format!("r[{}]='{}'", dest, value),
            ),
            Insn::Blob { value, dest } => (
                "Blob",
                0,
                *dest as i32,
                0,
                format!("{:?}", value),
                0,
                format!("r[{}]={} byte blob", dest, value.len()),
            ),
            Insn::ZeroBlob { count, dest } => (
                "ZeroBlob",
                *count as i32,
                *dest as i32,
                0,
                String::new(),
                0,
                format!("r[{}]=zeroblob({})", dest, count),
            ),
            Insn::Move {
                source_reg,
                dest_reg,
                count,
            } => (
                "Move",
                *source_reg as i32,
                *dest_reg as i32,
                *count as i32,
                String::new(),
                0,
                format!(
                    "r[{}..{}]=r[{}..{}]",
                    dest_reg,
                    dest_reg + count - 1,
                    source_reg,
                    source_reg + count - 1
                ),
            ),
            Insn::Copy { src_reg, dst_reg } => (
                "Copy",
                *src_reg as i32,
                *dst_reg as i32,
                0,
                String::new(),
                0,
                format!("r[{}]=r[{}]", dst_reg, src_reg),
            ),
            Insn::SCopy { src_reg, dst_reg } => (
                "SCopy",
                *src_reg as i32,
                *dst_reg as i32,
                0,
                String::new(),
                0,
                format!("r[{}]=r[{}] (shallow)", dst_reg, src_reg),
            ),
            Insn::Add { lhs, rhs, dest } => (
                "Add",
                *lhs as i32,
                *rhs as i32,
                *dest as i32,
                String::new(),
                0,
                format!("r[{}]=r[{}]+r[{}]", dest, lhs, rhs),
            ),
            Insn::Subtract { lhs, rhs, dest } => (
                "Subtract",
                *lhs as i32,
                *rhs as i32,
                *dest as i32,
                String::new(),
                0,
                format!("r[{}]=r[{}]-r[{}]", dest, lhs, rhs),
            ),
            Insn::Multiply { lhs, rhs, dest } => (
                "Multiply",
                *lhs as i32,
                *rhs as i32,
                *dest as i32,
                String::new(),
                0,
                format!("r[{}]=r[{}]*r[{}]", dest, lhs, rhs),
            ),
            Insn::Divide { lhs, rhs, dest } => (
                "Divide",
                *lhs as i32,
                *rhs as i32,
                *dest as i32,
                String::new(),
                0,
                format!("r[{}]=r[{}]/r[{}]", dest, lhs, rhs),
            ),
            Insn::Remainder { lhs, rhs, dest } => (
                "Remainder",
                *lhs as i32,
                *rhs as i32,
                *dest as i32,
                String::new(),
                0,
                format!("r[{}]=r[{}]%r[{}]", dest, lhs, rhs),
            ),
            Insn::BitAnd { lhs, rhs, dest } => (
                "BitAnd",
                *lhs as i32,
                *rhs as i32,
                *dest as i32,
                String::new(),
                0,
                format!("r[{}]=r[{}]&r[{}]", dest, lhs, rhs),
            ),
            Insn::BitOr { lhs, rhs, dest } => (
                "BitOr",
                *lhs as i32,
                *rhs as i32,
                *dest as i32,
                String::new(),
                0,
                format!("r[{}]=r[{}]|r[{}]", dest, lhs, rhs),
            ),
            Insn::BitNot { reg, dest } => (
                "BitNot",
                *reg as i32,
                *dest as i32,
                0,
                String::new(),
                0,
                format!("r[{}]=~r[{}]", dest, reg),
            ),
            Insn::MustBeInt { reg } => (
                "MustBeInt",
                *reg as i32,
                0,
                0,
                String::new(),
                0,
                format!("r[{}] must be an integer", reg),
            ),
            Insn::Compare {
                start_reg_a,
                start_reg_b,
                count,
                key_info,
            } => (
                "Compare",
                *start_reg_a as i32,
                *start_reg_b as i32,
                *count as i32,
                format!("k({})", key_info.num_columns()),
                0,
                format!(
                    "r[{}..{}]<->r[{}..{}]",
                    start_reg_a,
                    start_reg_a + count - 1,
                    start_reg_b,
                    start_reg_b + count - 1
                ),
            ),
            Insn::Jump {
                target_pc_lt,
                target_pc_eq,
                target_pc_gt,
            } => (
                "Jump",
                target_pc_lt.to_debug_int(),
                target_pc_eq.to_debug_int(),
                target_pc_gt.to_debug_int(),
                String::new(),
                0,
                String::new(),
            ),
            Insn::Eq {
                lhs,
                rhs,
                target_pc,
                ..
            } => (
                "Eq",
                *lhs as i32,
                target_pc.to_debug_int(),
                *rhs as i32,
                String::new(),
                0,
                format!("if r[{}]==r[{}] goto {}", lhs, rhs, target_pc.to_debug_int()),
            ),
            Insn::Ne {
                lhs,
                rhs,
                target_pc,
                ..
            } => (
                "Ne",
                *lhs as i32,
                target_pc.to_debug_int(),
                *rhs as i32,
                String::new(),
                0,
                format!("if r[{}]!=r[{}] goto {}", lhs, rhs, target_pc.to_debug_int()),
            ),
            Insn::Lt {
                lhs,
                rhs,
                target_pc,
                ..
            } => (
                "Lt",
                *lhs as i32,
                target_pc.to_debug_int(),
                *rhs as i32,
                String::new(),
                0,
                format!("if r[{}]<r[{}] goto {}", lhs, rhs, target_pc.to_debug_int()),
            ),
            Insn::Le {
                lhs,
                rhs,
                target_pc,
                ..
            } => (
                "Le",
                *lhs as i32,
                target_pc.to_debug_int(),
                *rhs as i32,
                String::new(),
                0,
                format!("if r[{}]<=r[{}] goto {}", lhs, rhs, target_pc.to_debug_int()),
            ),
            Insn::Gt {
                lhs,
                rhs,
                target_pc,
                ..
            } => (
                "Gt",
                *lhs as i32,
                target_pc.to_debug_int(),
                *rhs as i32,
                String::new(),
                0,
                format!("if r[{}]>r[{}] goto {}", lhs, rhs, target_pc.to_debug_int()),
            ),
            Insn::Ge {
                lhs,
                rhs,
                target_pc,
                ..
            } => (
                "Ge",
                *lhs as i32,
                target_pc.to_debug_int(),
                *rhs as i32,
                String::new(),
                0,
                format!("if r[{}]>=r[{}] goto {}", lhs, rhs, target_pc.to_debug_int()),
            ),
            Insn::If {
                reg,
                target_pc,
                jump_if_null,
            } => (
                "If",
                *reg as i32,
                target_pc.to_debug_int(),
                *jump_if_null as i32,
                String::new(),
                0,
                format!("if r[{}] goto {}", reg, target_pc.to_debug_int()),
            ),
            Insn::IfNot {
                reg,
                target_pc,
                jump_if_null,
            } => (
                "IfNot",
                *reg as i32,
                target_pc.to_debug_int(),
                *jump_if_null as i32,
                String::new(),
                0,
                format!("if !r[{}] goto {}", reg, target_pc.to_debug_int()),
            ),
            Insn::IsNull { src, target_pc } => (
                "IsNull",
                *src as i32,
                target_pc.to_debug_int(),
                0,
                String::new(),
                0,
                format!("if r[{}]==NULL goto {}", src, target_pc.to_debug_int()),
            ),
            Insn::NotNull { reg, target_pc } => (
                "NotNull",
                *reg as i32,
                target_pc.to_debug_int(),
                0,
                String::new(),
                0,
                format!("if r[{}]!=NULL goto {}", reg, target_pc.to_debug_int()),
            ),
            Insn::IfPos {
                reg,
                target_pc,
                decrement_by,
            } => (
                "IfPos",
                *reg as i32,
                target_pc.to_debug_int(),
                *decrement_by as i32,
                String::new(),
                0,
                format!(
                    "r[{}]>0 -> r[{}]-={}, goto {}",
                    reg,
                    reg,
                    decrement_by,
                    target_pc.to_debug_int()
                ),
            ),
            Insn::DecrJumpZero { reg, target_pc } => (
                "DecrJumpZero",
                *reg as i32,
                target_pc.to_debug_int(),
                0,
                String::new(),
                0,
                format!("if (--r[{}]==0) goto {}", reg, target_pc.to_debug_int()),
            ),
            Insn::Goto { target_pc } => (
                "Goto",
                0,
                target_pc.to_debug_int(),
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Gosub {
                target_pc,
                return_reg,
            } => (
                "Gosub",
                *return_reg as i32,
                target_pc.to_debug_int(),
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Return { return_reg } => (
                "Return",
                *return_reg as i32,
                0,
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::OpenRead {
                cursor_id,
                root_page,
                db,
            } => (
                "OpenRead",
                *cursor_id as i32,
                *root_page as i32,
                *db as i32,
                String::new(),
                0,
                format!(
                    "table={}, root={}",
                    program.cursor_ref[*cursor_id]
                        .0
                        .as_deref()
                        .unwrap_or("(anonymous)"),
                    root_page
                ),
            ),
            Insn::OpenWrite {
                cursor_id,
                root_page,
                db,
            } => (
                "OpenWrite",
                *cursor_id as i32,
                *root_page as i32,
                *db as i32,
                String::new(),
                0,
                format!(
                    "table={}, root={}",
                    program.cursor_ref[*cursor_id]
                        .0
                        .as_deref()
                        .unwrap_or("(anonymous)"),
                    root_page
                ),
            ),
            Insn::OpenPseudo {
                cursor_id,
                content_reg,
                num_fields,
            } => (
                "OpenPseudo",
                *cursor_id as i32,
                *content_reg as i32,
                *num_fields as i32,
                String::new(),
                0,
                format!("{} columns in r[{}]", num_fields, content_reg),
            ),
            Insn::Close { cursor_id } => (
                "Close",
                *cursor_id as i32,
                0,
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Rewind {
                cursor_id,
                pc_if_empty,
            } => (
                "Rewind",
                *cursor_id as i32,
                pc_if_empty.to_debug_int(),
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Last {
                cursor_id,
                pc_if_empty,
            } => (
                "Last",
                *cursor_id as i32,
                pc_if_empty.to_debug_int(),
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Next {
                cursor_id,
                pc_if_next,
            } => (
                "Next",
                *cursor_id as i32,
                pc_if_next.to_debug_int(),
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Prev {
                cursor_id,
                pc_if_prev,
            } => (
                "Prev",
                *cursor_id as i32,
                pc_if_prev.to_debug_int(),
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Column {
                cursor_id,
                column,
                dest,
            } => (
                "Column",
                *cursor_id as i32,
                *column as i32,
                *dest as i32,
                String::new(),
                0,
                format!("r[{}]=cursor {} column {}", dest, cursor_id, column),
            ),
            Insn::RowId { cursor_id, dest } => (
                "RowId",
                *cursor_id as i32,
                *dest as i32,
                0,
                String::new(),
                0,
                format!("r[{}]=rowid of cursor {}", dest, cursor_id),
            ),
            Insn::NewRowid {
                cursor_id,
                rowid_reg,
            } => (
                "NewRowid",
                *cursor_id as i32,
                *rowid_reg as i32,
                0,
                String::new(),
                0,
                format!("r[{}]=new rowid", rowid_reg),
            ),
            Insn::SeekRowid {
                cursor_id,
                src_reg,
                target_pc,
            } => (
                "SeekRowid",
                *cursor_id as i32,
                *src_reg as i32,
                target_pc.to_debug_int(),
                String::new(),
                0,
                format!(
                    "if (r[{}]!=rowid) goto {}",
                    src_reg,
                    target_pc.to_debug_int()
                ),
            ),
            Insn::NotExists {
                cursor,
                rowid_reg,
                target_pc,
            } => (
                "NotExists",
                *cursor as i32,
                target_pc.to_debug_int(),
                *rowid_reg as i32,
                String::new(),
                0,
                String::new(),
            ),
            Insn::DeferredSeek {
                index_cursor_id,
                table_cursor_id,
            } => (
                "DeferredSeek",
                *index_cursor_id as i32,
                *table_cursor_id as i32,
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::SeekGE {
                cursor_id,
                start_reg,
                num_regs,
                target_pc,
                ..
            } => (
                "SeekGE",
                *cursor_id as i32,
                target_pc.to_debug_int(),
                *start_reg as i32,
                format!("{}", num_regs),
                0,
                String::new(),
            ),
            Insn::SeekGT {
                cursor_id,
                start_reg,
                num_regs,
                target_pc,
                ..
            } => (
                "SeekGT",
                *cursor_id as i32,
                target_pc.to_debug_int(),
                *start_reg as i32,
                format!("{}", num_regs),
                0,
                String::new(),
            ),
            Insn::IdxGE {
                cursor_id,
                start_reg,
                num_regs,
                target_pc,
            } => (
                "IdxGE",
                *cursor_id as i32,
                target_pc.to_debug_int(),
                *start_reg as i32,
                format!("{}", num_regs),
                0,
                String::new(),
            ),
            Insn::IdxGT {
                cursor_id,
                start_reg,
                num_regs,
                target_pc,
            } => (
                "IdxGT",
                *cursor_id as i32,
                target_pc.to_debug_int(),
                *start_reg as i32,
                format!("{}", num_regs),
                0,
                String::new(),
            ),
            Insn::IdxInsert {
                cursor_id,
                record_reg,
            } => (
                "IdxInsert",
                *cursor_id as i32,
                *record_reg as i32,
                0,
                String::new(),
                0,
                format!("key=r[{}]", record_reg),
            ),
            Insn::MakeRecord {
                start_reg,
                count,
                dest_reg,
            } => (
                "MakeRecord",
                *start_reg as i32,
                *count as i32,
                *dest_reg as i32,
                String::new(),
                0,
                format!(
                    "r[{}]=mkrec(r[{}..{}])",
                    dest_reg,
                    start_reg,
                    start_reg + count - 1
                ),
            ),
            Insn::ResultRow { start_reg, count } => (
                "ResultRow",
                *start_reg as i32,
                *count as i32,
                0,
                String::new(),
                0,
                if *count == 1 {
                    format!("output=r[{}]", start_reg)
                } else {
                    format!("output=r[{}..{}]", start_reg, start_reg + count - 1)
                },
            ),
            Insn::Insert {
                cursor_id,
                key_reg,
                record_reg,
                ..
            } => (
                "Insert",
                *cursor_id as i32,
                *record_reg as i32,
                *key_reg as i32,
                String::new(),
                0,
                format!("intkey=r[{}] data=r[{}]", key_reg, record_reg),
            ),
            Insn::Delete { cursor_id, .. } => (
                "Delete",
                *cursor_id as i32,
                0,
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::AggStep { acc_reg, col, func } => (
                "AggStep",
                0,
                *col as i32,
                *acc_reg as i32,
                func.name().to_string(),
                0,
                format!("accum=r[{}] step(r[{}])", acc_reg, col),
            ),
            Insn::AggFinal { register, func } => (
                "AggFinal",
                0,
                *register as i32,
                0,
                func.name().to_string(),
                0,
                format!("accum=r[{}]", register),
            ),
            Insn::Transaction { db, write } => (
                "Transaction",
                *db as i32,
                *write as i32,
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Statement { db } => (
                "Statement",
                *db as i32,
                0,
                0,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Destroy { db, root_page } => (
                "Destroy",
                *root_page as i32,
                0,
                *db as i32,
                String::new(),
                0,
                String::new(),
            ),
            Insn::ReadCookie { db, slot, dest } => (
                "ReadCookie",
                *db as i32,
                *dest as i32,
                *slot as i32,
                String::new(),
                0,
                String::new(),
            ),
            Insn::SetCookie { db, slot, value } => (
                "SetCookie",
                *db as i32,
                *slot as i32,
                *value as i32,
                String::new(),
                0,
                String::new(),
            ),
            Insn::Halt {
                err_code,
                description,
                ..
            } => (
                "Halt",
                *err_code as i32,
                0,
                0,
                String::new(),
                0,
                description.clone(),
            ),
        };
    format!(
        "{}{:<4}  {:<17}  {:<4}  {:<4}  {:<4}  {:<13}  {:<2}  {}",
        indent,
        addr,
        opcode,
        p1,
        p2,
        p3,
        p4,
        p5,
        manual_comment.map_or(comment.clone(), |c| format!("{}; {}", comment, c))
    )
}
