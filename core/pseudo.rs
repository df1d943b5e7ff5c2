use std::rc::Rc;

use crate::storage::ondisk;
use crate::types::Value;
use crate::Result;

/// A single-row cursor whose content lives in a register instead of a
/// tree. Used for trigger OLD/NEW row images and other places the
/// compiler needs column access over an already-materialized record.
pub struct PseudoCursor {
    pub content_reg: usize,
    pub num_fields: usize,
}

impl PseudoCursor {
    pub fn new(content_reg: usize, num_fields: usize) -> Self {
        Self {
            content_reg,
            num_fields,
        }
    }

    /// Decode the column values of the record currently held in the
    /// content register. An empty or NULL register reads as no row.
    pub fn columns(&self, register: &Value) -> Result<Vec<Value>> {
        match register {
            Value::Blob(b) => {
                let payload: Rc<[u8]> = Rc::from(b.to_vec().into_boxed_slice());
                ondisk::read_record(&payload)
            }
            Value::Null => Ok(Vec::new()),
            _ => crate::bail_misuse_error!("pseudo cursor register does not hold a record"),
        }
    }
}
