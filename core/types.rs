use std::cmp::Ordering;
use std::fmt::Display;
use std::ops::Range;
use std::rc::Rc;

use crate::collate::CollationSeq;
use crate::error::VellumError;
use crate::storage::ondisk;
use crate::Result;

/// Text encodings a cell payload can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

/// Backing storage of a text or blob payload.
///
/// `Owned` is a dynamically allocated buffer the cell is responsible for.
/// `Static` points into constant program data. `Shared` is an ephemeral
/// alias into a buffer owned elsewhere (typically a record payload); the
/// alias must not be retained past the buffer without `make_writeable`.
#[derive(Debug, Clone)]
pub enum Buffer {
    Owned(Vec<u8>),
    Static(&'static [u8]),
    Shared(Rc<[u8]>, Range<usize>),
}

impl Buffer {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Owned(v) => v.as_slice(),
            Buffer::Static(s) => s,
            Buffer::Shared(rc, range) => &rc[range.clone()],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Owned(v) => v.len(),
            Buffer::Static(s) => s.len(),
            Buffer::Shared(_, range) => range.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Buffer::Owned(_))
    }

    /// Copy the contents into an `Owned` buffer if they are not already.
    pub fn make_owned(&mut self) {
        if !self.is_owned() {
            *self = Buffer::Owned(self.as_slice().to_vec());
        }
    }

    /// Demote an `Owned` buffer to `Shared` so it can be aliased without
    /// copying. No-op for `Static` and `Shared`.
    pub fn share(&mut self) {
        if let Buffer::Owned(v) = self {
            let rc: Rc<[u8]> = Rc::from(std::mem::take(v).into_boxed_slice());
            let len = rc.len();
            *self = Buffer::Shared(rc, 0..len);
        }
    }

    /// An aliasing copy. Callers must `share()` first if the buffer is
    /// `Owned`; aliasing an `Owned` buffer falls back to a copy.
    pub fn alias(&self) -> Buffer {
        match self {
            Buffer::Owned(v) => Buffer::Owned(v.clone()),
            Buffer::Static(s) => Buffer::Static(s),
            Buffer::Shared(rc, range) => Buffer::Shared(rc.clone(), range.clone()),
        }
    }
}

/// A text payload plus the encoding its bytes are stored in.
#[derive(Debug, Clone)]
pub struct Text {
    pub buf: Buffer,
    pub encoding: TextEncoding,
}

impl Text {
    pub fn new(s: &str) -> Self {
        Self {
            buf: Buffer::Owned(s.as_bytes().to_vec()),
            encoding: TextEncoding::Utf8,
        }
    }

    pub fn from_string(s: String) -> Self {
        Self {
            buf: Buffer::Owned(s.into_bytes()),
            encoding: TextEncoding::Utf8,
        }
    }

    pub fn from_static(s: &'static str) -> Self {
        Self {
            buf: Buffer::Static(s.as_bytes()),
            encoding: TextEncoding::Utf8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// UTF-8 view of the payload. Transcodes UTF-16 payloads; borrows
    /// when the payload is already valid UTF-8.
    pub fn to_utf8(&self) -> std::borrow::Cow<'_, str> {
        match self.encoding {
            TextEncoding::Utf8 => String::from_utf8_lossy(self.as_bytes()),
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
                std::borrow::Cow::Owned(decode_utf16(self.as_bytes(), self.encoding))
            }
        }
    }

    /// Borrowed `&str` view. Only meaningful for UTF-8 payloads; invalid
    /// bytes yield an empty string rather than a panic.
    pub fn as_str(&self) -> &str {
        debug_assert!(self.encoding == TextEncoding::Utf8);
        std::str::from_utf8(self.as_bytes()).unwrap_or("")
    }
}

/// A blob payload. `zero_tail` counts trailing zero bytes that are part
/// of the value but not materialized in the buffer; a zero-blob of n
/// bytes is an empty buffer with `zero_tail == n`.
#[derive(Debug, Clone)]
pub struct Blob {
    pub buf: Buffer,
    pub zero_tail: usize,
}

impl Blob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            buf: Buffer::Owned(bytes),
            zero_tail: 0,
        }
    }

    pub fn zero(n: usize) -> Self {
        Self {
            buf: Buffer::Owned(Vec::new()),
            zero_tail: n,
        }
    }

    /// Logical length, including the unmaterialized zero tail.
    pub fn len(&self) -> usize {
        self.buf.len() + self.zero_tail
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.buf
            .as_slice()
            .iter()
            .copied()
            .chain(std::iter::repeat(0).take(self.zero_tail))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut v = self.buf.as_slice().to_vec();
        v.resize(v.len() + self.zero_tail, 0);
        v
    }
}

fn decode_utf16(bytes: &[u8], encoding: TextEncoding) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| match encoding {
            TextEncoding::Utf16Le => u16::from_le_bytes([c[0], c[1]]),
            _ => u16::from_be_bytes([c[0], c[1]]),
        })
        .collect();
    String::from_utf16_lossy(&units)
}

fn encode_text(s: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf8 => s.as_bytes().to_vec(),
        TextEncoding::Utf16Le => s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect(),
        TextEncoding::Utf16Be => s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect(),
    }
}

/// One typed storage slot: a VM register or a column value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(Text),
    Blob(Blob),
    Agg(Box<AggContext>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Integer,
    Float,
    Text,
    Blob,
    Agg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Avg,
    Count,
    Max,
    Min,
    Sum,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Avg => "avg",
            AggFunc::Count => "count",
            AggFunc::Max => "max",
            AggFunc::Min => "min",
            AggFunc::Sum => "sum",
        }
    }
}

/// In-progress aggregate state held in a register while an aggregation
/// loop runs.
#[derive(Debug, Clone, PartialEq)]
pub enum AggContext {
    Avg(Value, i64),
    Count(i64),
    Max(Option<Value>),
    Min(Option<Value>),
    Sum(Value),
}

const NULL: Value = Value::Null;

impl AggContext {
    pub fn final_value(&self) -> Value {
        match self {
            AggContext::Avg(acc, count) => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Float(acc.as_float() / *count as f64)
                }
            }
            AggContext::Count(count) => Value::Integer(*count),
            AggContext::Max(max) => max.clone().unwrap_or(NULL),
            AggContext::Min(min) => min.clone().unwrap_or(NULL),
            AggContext::Sum(acc) => acc.clone(),
        }
    }
}

impl Value {
    pub fn build_text(s: &str) -> Self {
        Value::Text(Text::new(s))
    }

    pub fn build_blob(bytes: Vec<u8>) -> Self {
        Value::Blob(Blob::new(bytes))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Blob(_) => ValueType::Blob,
            Value::Agg(_) => ValueType::Agg,
        }
    }

    pub fn set_null(&mut self) {
        *self = Value::Null;
    }

    pub fn set_integer(&mut self, i: i64) {
        *self = Value::Integer(i);
    }

    pub fn set_float(&mut self, f: f64) {
        *self = Value::Float(f);
    }

    pub fn set_text(&mut self, s: &str) {
        *self = Value::build_text(s);
    }

    pub fn set_blob(&mut self, bytes: Vec<u8>) {
        *self = Value::build_blob(bytes);
    }

    /// Install a zero-blob of `n` bytes without materializing it.
    pub fn set_zeroblob(&mut self, n: usize) {
        *self = Value::Blob(Blob::zero(n));
    }

    /// Materialize the zero tail of a zero-blob into an owned buffer,
    /// clearing the tail count. No-op for everything else.
    pub fn expand_zeroblob(&mut self) {
        if let Value::Blob(b) = self {
            if b.zero_tail > 0 {
                *b = Blob::new(b.to_vec());
            }
        }
    }

    /// Ensure text/blob payloads are backed by an owned buffer, so the
    /// value survives invalidation of whatever it was borrowed from.
    pub fn make_writeable(&mut self) {
        match self {
            Value::Text(t) => t.buf.make_owned(),
            Value::Blob(b) => b.buf.make_owned(),
            _ => {}
        }
    }

    /// Convert an integer or float cell to its decimal text form in the
    /// requested encoding. Other variants are untouched.
    pub fn stringify(&mut self, encoding: TextEncoding) {
        let text = match self {
            Value::Integer(i) => format!("{}", i),
            Value::Float(f) => format_float(*f),
            _ => return,
        };
        *self = Value::Text(Text {
            buf: Buffer::Owned(encode_text(&text, encoding)),
            encoding,
        });
    }

    /// Transcode a text cell in place. No-op for non-text cells and for
    /// text already in the desired encoding.
    pub fn change_encoding(&mut self, desired: TextEncoding) {
        if let Value::Text(t) = self {
            if t.encoding == desired {
                return;
            }
            let s = t.to_utf8().into_owned();
            *t = Text {
                buf: Buffer::Owned(encode_text(&s, desired)),
                encoding: desired,
            };
        }
    }

    /// Total integer coercion: never fails. NULL is 0, text and blobs
    /// parse their longest numeric prefix, non-numeric prefixes are 0.
    pub fn as_integer(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Integer(i) => *i,
            Value::Float(f) => {
                if f.is_nan() {
                    0
                } else if *f >= i64::MAX as f64 {
                    i64::MAX
                } else if *f <= i64::MIN as f64 {
                    i64::MIN
                } else {
                    *f as i64
                }
            }
            Value::Text(t) => str_to_i64(&t.to_utf8()),
            Value::Blob(b) => str_to_i64(&String::from_utf8_lossy(&b.to_vec())),
            Value::Agg(a) => a.final_value().as_integer(),
        }
    }

    /// Total float coercion; same rules as [`Value::as_integer`].
    pub fn as_float(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Integer(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Text(t) => str_to_f64(&t.to_utf8()),
            Value::Blob(b) => str_to_f64(&String::from_utf8_lossy(&b.to_vec())),
            Value::Agg(a) => a.final_value().as_float(),
        }
    }

    /// Convert a text cell to its best numeric representation: integer
    /// when the double -> int64 -> double round-trip is lossless, float
    /// otherwise. Floats are demoted to integers under the same rule.
    pub fn numerify(&mut self) {
        match self {
            Value::Text(t) => {
                let s = t.to_utf8().into_owned();
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    *self = Value::Integer(i);
                } else {
                    let f = str_to_f64(&s);
                    *self = match float_as_lossless_int(f) {
                        Some(i) => Value::Integer(i),
                        None => Value::Float(f),
                    };
                }
            }
            Value::Float(f) => {
                if let Some(i) = float_as_lossless_int(*f) {
                    *self = Value::Integer(i);
                }
            }
            _ => {}
        }
    }

    /// Aliasing copy. Text/blob payloads are shared, not duplicated; the
    /// source's owned buffer is demoted to a shared one first so both
    /// cells reference the same allocation.
    pub fn shallow_copy(&mut self) -> Value {
        match self {
            Value::Text(t) => {
                t.buf.share();
                Value::Text(Text {
                    buf: t.buf.alias(),
                    encoding: t.encoding,
                })
            }
            Value::Blob(b) => {
                b.buf.share();
                Value::Blob(Blob {
                    buf: b.buf.alias(),
                    zero_tail: b.zero_tail,
                })
            }
            other => other.clone(),
        }
    }

    /// Copy with an independently owned payload, except static payloads
    /// which stay static.
    pub fn deep_copy(&self) -> Value {
        let mut copy = self.clone();
        match &mut copy {
            Value::Text(t) => {
                if !matches!(t.buf, Buffer::Static(_)) {
                    t.buf.make_owned();
                }
            }
            Value::Blob(b) => {
                if !matches!(b.buf, Buffer::Static(_)) {
                    b.buf.make_owned();
                }
            }
            _ => {}
        }
        copy
    }

    /// Transfer the value out, leaving NULL behind.
    pub fn take(&mut self) -> Value {
        std::mem::replace(self, Value::Null)
    }

    pub fn as_value_ref(&self) -> ValueRef<'_> {
        match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Float(f) => ValueRef::Float(*f),
            Value::Text(t) => ValueRef::Text(t),
            Value::Blob(b) => ValueRef::Blob(b),
            Value::Agg(a) => ValueRef::Agg(a),
        }
    }
}

/// `%.15g`-class float formatting: integral values render with one
/// decimal, everything else rounds to 15 significant digits.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        let rounded: f64 = format!("{:.14e}", v).parse().unwrap_or(v);
        format!("{}", rounded)
    }
}

fn float_as_lossless_int(f: f64) -> Option<i64> {
    if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return None;
    }
    let i = f as i64;
    if i as f64 == f {
        Some(i)
    } else {
        None
    }
}

/// Longest decimal-integer prefix, saturating on overflow.
pub fn str_to_i64(s: &str) -> i64 {
    let t = s.trim_start();
    let (neg, rest) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    // accumulate negatively so i64::MIN parses exactly
    let mut v: i64 = 0;
    for c in rest.bytes() {
        if !c.is_ascii_digit() {
            break;
        }
        let digit = (c - b'0') as i64;
        v = v.saturating_mul(10).saturating_sub(digit);
    }
    if neg {
        v
    } else {
        v.checked_neg().unwrap_or(i64::MAX)
    }
}

/// Longest floating-point prefix; no prefix parses as 0.0.
pub fn str_to_f64(s: &str) -> f64 {
    let t = s.trim_start();
    let b = t.as_bytes();
    let mut i = 0;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;
    let mut frac_digits = 0;
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
    }
    if int_digits == 0 && frac_digits == 0 {
        return 0.0;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        let mut j = i + 1;
        if j < b.len() && (b[j] == b'+' || b[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    t[..i].parse().unwrap_or(0.0)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a.to_utf8() == b.to_utf8(),
            (Value::Blob(a), Value::Blob(b)) => a.len() == b.len() && a.bytes().eq(b.bytes()),
            (Value::Agg(a), Value::Agg(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", format_float(*fl)),
            Value::Text(t) => write!(f, "{}", t.to_utf8()),
            Value::Blob(b) => write!(f, "{:?}", b.to_vec()),
            Value::Agg(a) => write!(f, "{}", a.final_value()),
        }
    }
}

fn numeric_cmp_int_float(int_val: i64, float_val: f64) -> Ordering {
    (int_val as f64).partial_cmp(&float_val).unwrap_or(Ordering::Equal)
}

/// Compare two cells under the engine's total type ordering:
/// NULL < numeric < text < blob. Numerics compare by value regardless of
/// representation; text compares under `collation` after transcoding
/// both sides to UTF-8; blobs compare byte-wise then by length.
pub fn compare_values(a: &Value, b: &Value, collation: CollationSeq) -> Ordering {
    let (a, b) = (deref_agg(a), deref_agg(b));
    match (&a, &b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,

        (Value::Integer(l), Value::Integer(r)) => l.cmp(r),
        (Value::Integer(l), Value::Float(r)) => numeric_cmp_int_float(*l, *r),
        (Value::Float(l), Value::Integer(r)) => numeric_cmp_int_float(*r, *l).reverse(),
        (Value::Float(l), Value::Float(r)) => l.partial_cmp(r).unwrap_or(Ordering::Equal),

        (Value::Integer(_) | Value::Float(_), _) => Ordering::Less,
        (_, Value::Integer(_) | Value::Float(_)) => Ordering::Greater,

        (Value::Text(l), Value::Text(r)) => collation.compare_strings(&l.to_utf8(), &r.to_utf8()),
        (Value::Text(_), Value::Blob(_)) => Ordering::Less,
        (Value::Blob(_), Value::Text(_)) => Ordering::Greater,

        (Value::Blob(l), Value::Blob(r)) => l.bytes().cmp(r.bytes()),
        _ => Ordering::Equal,
    }
}

fn deref_agg(v: &Value) -> Value {
    match v {
        Value::Agg(a) => a.final_value(),
        other => other.clone(),
    }
}

impl Eq for Value {}

#[allow(clippy::non_canonical_partial_ord_impl)]
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(compare_values(self, other, CollationSeq::Binary))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(self, other, CollationSeq::Binary)
    }
}

/// Borrowed view of a cell, handed to callers reading a result row.
#[derive(Debug, Clone, Copy)]
pub enum ValueRef<'a> {
    Null,
    Integer(i64),
    Float(f64),
    Text(&'a Text),
    Blob(&'a Blob),
    Agg(&'a AggContext),
}

impl<'a> ValueRef<'a> {
    pub fn as_integer(&self) -> i64 {
        self.to_owned_value().as_integer()
    }

    pub fn as_float(&self) -> f64 {
        self.to_owned_value().as_float()
    }

    fn to_owned_value(&self) -> Value {
        match self {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(*i),
            ValueRef::Float(f) => Value::Float(*f),
            ValueRef::Text(t) => Value::Text((*t).clone()),
            ValueRef::Blob(b) => Value::Blob((*b).clone()),
            ValueRef::Agg(a) => Value::Agg(Box::new((*a).clone())),
        }
    }
}

pub trait FromValue<'a> {
    fn from_value(value: &ValueRef<'a>) -> Result<Self>
    where
        Self: Sized + 'a;
}

impl<'a> FromValue<'a> for i64 {
    fn from_value(value: &ValueRef<'a>) -> Result<Self> {
        match value {
            ValueRef::Integer(i) => Ok(*i),
            _ => Err(VellumError::ConversionError("Expected integer value".into())),
        }
    }
}

impl<'a> FromValue<'a> for f64 {
    fn from_value(value: &ValueRef<'a>) -> Result<Self> {
        match value {
            ValueRef::Float(f) => Ok(*f),
            _ => Err(VellumError::ConversionError("Expected float value".into())),
        }
    }
}

impl<'a> FromValue<'a> for String {
    fn from_value(value: &ValueRef<'a>) -> Result<Self> {
        match value {
            ValueRef::Text(t) => Ok(t.to_utf8().into_owned()),
            _ => Err(VellumError::ConversionError("Expected text value".into())),
        }
    }
}

impl<'a> FromValue<'a> for &'a str {
    fn from_value(value: &ValueRef<'a>) -> Result<&'a str> {
        match value {
            ValueRef::Text(t) => Ok(t.as_str()),
            _ => Err(VellumError::ConversionError("Expected text value".into())),
        }
    }
}

/// A result row: borrowed views into the register file.
#[derive(Debug)]
pub struct Record<'a> {
    pub values: Vec<ValueRef<'a>>,
}

impl<'a> Record<'a> {
    pub fn new(values: Vec<ValueRef<'a>>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// How the comparator breaks ties when one key runs out of columns while
/// every shared column compared equal. Injected by the planner layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// The exhausted (shorter) key sorts after the longer one.
    #[default]
    Default,
    /// A shared prefix counts as equal.
    PrefixEqual,
    /// The shorter key always sorts before any key it prefixes. Used for
    /// range-scan bound probes built from truncated keys.
    IncrKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyColumn {
    pub collation: CollationSeq,
    pub order: SortOrder,
}

/// Per-comparison configuration: one entry per key column, plus the
/// tie-break policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub columns: Vec<KeyColumn>,
    pub tie_break: TieBreak,
}

impl KeyInfo {
    /// All-ascending binary collation over `n` columns.
    pub fn binary(n: usize) -> Self {
        Self {
            columns: vec![
                KeyColumn {
                    collation: CollationSeq::Binary,
                    order: SortOrder::Asc,
                };
                n
            ],
            tie_break: TieBreak::Default,
        }
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    fn column(&self, i: usize) -> KeyColumn {
        self.columns.get(i).copied().unwrap_or(KeyColumn {
            collation: CollationSeq::Binary,
            order: SortOrder::Asc,
        })
    }
}

/// A record already decoded into cells, to avoid re-parsing a comparison
/// key on every probe.
#[derive(Debug, Clone)]
pub struct UnpackedRecord {
    pub values: Vec<Value>,
    pub key_info: Rc<KeyInfo>,
}

impl UnpackedRecord {
    pub fn new(values: Vec<Value>, key_info: Rc<KeyInfo>) -> Self {
        Self { values, key_info }
    }
}

/// Decode a serialized record into an [`UnpackedRecord`], capped at the
/// key's declared column count. A payload shorter than its header claims
/// yields a short record, not an error, so truncated prefix keys can be
/// compared.
pub fn unpack_record(key_info: Rc<KeyInfo>, payload: &Rc<[u8]>) -> Result<UnpackedRecord> {
    let (header_size, mut header_pos) = ondisk::read_varint(payload)?;
    let header_size = header_size as usize;
    if header_size > payload.len() {
        crate::bail_corrupt_error!(
            "record header claims {} bytes but payload is {}",
            header_size,
            payload.len()
        );
    }
    let mut data_pos = header_size;
    let mut values = Vec::new();
    while header_pos < header_size && values.len() < key_info.num_columns() {
        let (code, n) = ondisk::read_varint(&payload[header_pos..])?;
        header_pos += n;
        let serial_type = ondisk::SerialType::from_code(code)?;
        if data_pos + serial_type.payload_len() > payload.len() {
            break;
        }
        let (value, n) = ondisk::read_value(payload, data_pos, &serial_type)?;
        data_pos += n;
        values.push(value);
    }
    Ok(UnpackedRecord::new(values, key_info))
}

/// Compare a serialized record against an already-unpacked key.
///
/// Walks the record's header one column at a time, decoding lazily and
/// short-circuiting on the first non-equal column; remaining columns are
/// never decoded. Ordering per column follows [`compare_values`], with
/// descending columns negated. Exhaustion ties follow the key's
/// [`TieBreak`]: with `IncrKey` the shorter side sorts strictly before
/// the longer, with `Default` strictly after, with `PrefixEqual` they
/// compare equal.
pub fn compare_record(payload: &Rc<[u8]>, unpacked: &UnpackedRecord) -> Result<Ordering> {
    let key_info = &unpacked.key_info;
    let (header_size, mut header_pos) = ondisk::read_varint(payload)?;
    let header_size = header_size as usize;
    if header_size > payload.len() {
        crate::bail_corrupt_error!(
            "record header claims {} bytes but payload is {}",
            header_size,
            payload.len()
        );
    }
    let mut data_pos = header_size;
    let mut i = 0;
    let mut truncated = false;
    while header_pos < header_size && i < unpacked.values.len() {
        let (code, n) = ondisk::read_varint(&payload[header_pos..])?;
        header_pos += n;
        let serial_type = ondisk::SerialType::from_code(code)?;
        if data_pos + serial_type.payload_len() > payload.len() {
            // short record: the remaining columns are absent
            truncated = true;
            break;
        }
        let (value, n) = ondisk::read_value(payload, data_pos, &serial_type)?;
        data_pos += n;
        let col = key_info.column(i);
        let cmp = compare_values(&value, &unpacked.values[i], col.collation);
        if cmp != Ordering::Equal {
            return Ok(match col.order {
                SortOrder::Asc => cmp,
                SortOrder::Desc => cmp.reverse(),
            });
        }
        i += 1;
    }
    let serialized_exhausted = truncated || header_pos >= header_size;
    let unpacked_exhausted = i >= unpacked.values.len();
    Ok(match (serialized_exhausted, unpacked_exhausted) {
        (true, true) => Ordering::Equal,
        _ => match key_info.tie_break {
            TieBreak::PrefixEqual => Ordering::Equal,
            TieBreak::IncrKey => {
                if serialized_exhausted {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            TieBreak::Default => {
                if serialized_exhausted {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
        },
    })
}

/// Compare two unpacked value arrays under a key. Used when both sides
/// are already decoded (register-vector compares).
pub fn compare_unpacked(a: &[Value], b: &[Value], key_info: &KeyInfo) -> Ordering {
    let shared = a.len().min(b.len());
    for i in 0..shared {
        let col = key_info.column(i);
        let cmp = compare_values(&a[i], &b[i], col.collation);
        if cmp != Ordering::Equal {
            return match col.order {
                SortOrder::Asc => cmp,
                SortOrder::Desc => cmp.reverse(),
            };
        }
    }
    match (a.len() == shared, b.len() == shared) {
        (true, true) => Ordering::Equal,
        _ => match key_info.tie_break {
            TieBreak::PrefixEqual => Ordering::Equal,
            TieBreak::IncrKey => {
                if a.len() == shared {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            TieBreak::Default => {
                if a.len() == shared {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ondisk::serialize_record;

    fn rc(bytes: Vec<u8>) -> Rc<[u8]> {
        Rc::from(bytes.into_boxed_slice())
    }

    #[test]
    fn test_total_integer_coercion() {
        assert_eq!(Value::Null.as_integer(), 0);
        assert_eq!(Value::Integer(42).as_integer(), 42);
        assert_eq!(Value::Float(3.7).as_integer(), 3);
        assert_eq!(Value::build_text("123abc").as_integer(), 123);
        assert_eq!(Value::build_text("  -17").as_integer(), -17);
        assert_eq!(Value::build_text("xyz").as_integer(), 0);
        assert_eq!(Value::build_blob(b"99 bottles".to_vec()).as_integer(), 99);
    }

    #[test]
    fn test_total_float_coercion() {
        assert_eq!(Value::Null.as_float(), 0.0);
        assert_eq!(Value::build_text("2.5e1x").as_float(), 25.0);
        assert_eq!(Value::build_text(".5").as_float(), 0.5);
        assert_eq!(Value::build_text("e5").as_float(), 0.0);
        assert_eq!(Value::build_text("1e").as_float(), 1.0);
    }

    #[test]
    fn test_numerify_prefers_lossless_integer() {
        let mut v = Value::build_text("42");
        v.numerify();
        assert_eq!(v, Value::Integer(42));

        let mut v = Value::build_text("42.5");
        v.numerify();
        assert_eq!(v, Value::Float(42.5));

        let mut v = Value::Float(8.0);
        v.numerify();
        assert_eq!(v, Value::Integer(8));

        // 2^63 is not losslessly representable as i64
        let mut v = Value::Float(9.3e18);
        v.numerify();
        assert_eq!(v, Value::Float(9.3e18));
    }

    #[test]
    fn test_stringify_and_encoding_change() {
        let mut v = Value::Integer(-7);
        v.stringify(TextEncoding::Utf8);
        assert_eq!(v, Value::build_text("-7"));

        let mut v = Value::Float(3.0);
        v.stringify(TextEncoding::Utf8);
        assert_eq!(v, Value::build_text("3.0"));

        let mut v = Value::build_text("hi");
        v.change_encoding(TextEncoding::Utf16Le);
        if let Value::Text(t) = &v {
            assert_eq!(t.as_bytes(), &[b'h', 0, b'i', 0]);
            assert_eq!(t.encoding, TextEncoding::Utf16Le);
        } else {
            panic!("expected text");
        }
        v.change_encoding(TextEncoding::Utf8);
        assert_eq!(v, Value::build_text("hi"));
    }

    #[test]
    fn test_zeroblob_expand() {
        let mut v = Value::Null;
        v.set_zeroblob(5);
        if let Value::Blob(b) = &v {
            assert_eq!(b.len(), 5);
            assert_eq!(b.zero_tail, 5);
            assert_eq!(b.buf.len(), 0);
        } else {
            panic!("expected blob");
        }
        v.expand_zeroblob();
        if let Value::Blob(b) = &v {
            assert_eq!(b.zero_tail, 0);
            assert!(b.buf.is_owned());
            assert_eq!(b.to_vec(), vec![0u8; 5]);
        } else {
            panic!("expected blob");
        }
    }

    #[test]
    fn test_shallow_copy_aliases_deep_copy_owns() {
        let mut v = Value::build_text("shared payload");
        let alias = v.shallow_copy();
        if let (Value::Text(a), Value::Text(b)) = (&v, &alias) {
            assert!(matches!(a.buf, Buffer::Shared(..)));
            assert!(matches!(b.buf, Buffer::Shared(..)));
        } else {
            panic!("expected text");
        }
        let deep = v.deep_copy();
        if let Value::Text(d) = &deep {
            assert!(d.buf.is_owned());
        } else {
            panic!("expected text");
        }
        let moved = v.take();
        assert_eq!(v, Value::Null);
        assert_eq!(moved, alias);
    }

    #[test]
    fn test_make_writeable_copies_shared_payload() {
        let payload = rc(b"abcdef".to_vec());
        let mut v = Value::Blob(Blob {
            buf: Buffer::Shared(payload, 2..5),
            zero_tail: 0,
        });
        v.make_writeable();
        if let Value::Blob(b) = &v {
            assert!(b.buf.is_owned());
            assert_eq!(b.buf.as_slice(), b"cde");
        } else {
            panic!("expected blob");
        }
    }

    #[test]
    fn test_compare_type_ordering() {
        let null = Value::Null;
        let int = Value::Integer(3);
        let real = Value::Float(3.0);
        let text = Value::build_text("a");
        let blob = Value::build_blob(vec![0x61]);

        assert_eq!(compare_values(&null, &null, CollationSeq::Binary), Ordering::Equal);
        assert_eq!(compare_values(&null, &int, CollationSeq::Binary), Ordering::Less);
        assert_eq!(compare_values(&int, &real, CollationSeq::Binary), Ordering::Equal);
        assert_eq!(compare_values(&int, &text, CollationSeq::Binary), Ordering::Less);
        assert_eq!(compare_values(&text, &blob, CollationSeq::Binary), Ordering::Less);
        assert_eq!(compare_values(&blob, &int, CollationSeq::Binary), Ordering::Greater);
    }

    #[test]
    fn test_compare_antisymmetry() {
        let values = [
            Value::Null,
            Value::Integer(-1),
            Value::Integer(7),
            Value::Float(6.5),
            Value::build_text("abc"),
            Value::build_blob(vec![1, 2, 3]),
        ];
        for a in &values {
            for b in &values {
                let ab = compare_values(a, b, CollationSeq::Binary);
                let ba = compare_values(b, a, CollationSeq::Binary);
                assert_eq!(ab, ba.reverse(), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_blob_compare_bytewise_then_length() {
        let a = Value::build_blob(vec![1, 2]);
        let b = Value::build_blob(vec![1, 2, 0]);
        assert_eq!(compare_values(&a, &b, CollationSeq::Binary), Ordering::Less);
        let z = Value::Blob(Blob::zero(2));
        let w = Value::build_blob(vec![0, 0]);
        assert_eq!(compare_values(&z, &w, CollationSeq::Binary), Ordering::Equal);
    }

    #[test]
    fn test_unpack_record_caps_at_field_count() {
        let values = vec![
            Value::Integer(1),
            Value::build_text("two"),
            Value::Float(3.0),
        ];
        let payload = rc(serialize_record(&values, 4));
        let key_info = Rc::new(KeyInfo::binary(2));
        let unpacked = unpack_record(key_info, &payload).unwrap();
        assert_eq!(unpacked.values.len(), 2);
        assert_eq!(unpacked.values[0], Value::Integer(1));
        assert_eq!(unpacked.values[1], Value::build_text("two"));
    }

    #[test]
    fn test_unpack_record_tolerates_short_payload() {
        let values = vec![Value::Integer(1), Value::Integer(0x1234_5678)];
        let full = serialize_record(&values, 4);
        // drop the last two payload bytes: the second column can no
        // longer be decoded in full
        let short = rc(full[..full.len() - 2].to_vec());
        let unpacked = unpack_record(Rc::new(KeyInfo::binary(2)), &short).unwrap();
        assert_eq!(unpacked.values.len(), 1);
        assert_eq!(unpacked.values[0], Value::Integer(1));
    }

    #[test]
    fn test_compare_record_short_circuit_and_collation() {
        let key = Rc::new(KeyInfo {
            columns: vec![
                KeyColumn {
                    collation: CollationSeq::NoCase,
                    order: SortOrder::Asc,
                },
                KeyColumn {
                    collation: CollationSeq::Binary,
                    order: SortOrder::Asc,
                },
            ],
            tie_break: TieBreak::Default,
        });
        let probe = UnpackedRecord::new(
            vec![Value::build_text("ABC"), Value::Integer(5)],
            key.clone(),
        );
        let payload = rc(serialize_record(
            &[Value::build_text("abc"), Value::Integer(9)],
            4,
        ));
        // first column is NOCASE-equal, second decides
        assert_eq!(compare_record(&payload, &probe).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_compare_record_descending_negates() {
        let key = Rc::new(KeyInfo {
            columns: vec![KeyColumn {
                collation: CollationSeq::Binary,
                order: SortOrder::Desc,
            }],
            tie_break: TieBreak::Default,
        });
        let probe = UnpackedRecord::new(vec![Value::Integer(5)], key);
        let payload = rc(serialize_record(&[Value::Integer(9)], 4));
        assert_eq!(compare_record(&payload, &probe).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_prefix_tie_break_modes() {
        let full = [Value::Integer(1), Value::build_text("k"), Value::Integer(9)];
        let prefix = &full[..2];

        // serialized prefix P vs unpacked full key K
        let p_payload = rc(serialize_record(prefix, 4));

        let incr = Rc::new(KeyInfo::binary(3).with_tie_break(TieBreak::IncrKey));
        let probe = UnpackedRecord::new(full.to_vec(), incr);
        assert_eq!(compare_record(&p_payload, &probe).unwrap(), Ordering::Less);

        let default = Rc::new(KeyInfo::binary(3));
        let probe = UnpackedRecord::new(full.to_vec(), default);
        assert_eq!(compare_record(&p_payload, &probe).unwrap(), Ordering::Greater);

        let prefix_eq = Rc::new(KeyInfo::binary(3).with_tie_break(TieBreak::PrefixEqual));
        let probe = UnpackedRecord::new(full.to_vec(), prefix_eq);
        assert_eq!(compare_record(&p_payload, &probe).unwrap(), Ordering::Equal);

        // equal column counts compare equal in every mode
        let full_payload = rc(serialize_record(&full, 4));
        let probe = UnpackedRecord::new(
            full.to_vec(),
            Rc::new(KeyInfo::binary(3).with_tie_break(TieBreak::IncrKey)),
        );
        assert_eq!(compare_record(&full_payload, &probe).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_compare_unpacked_matches_record_compare() {
        let a = vec![Value::Integer(1), Value::build_text("b")];
        let b = vec![Value::Integer(1), Value::build_text("c")];
        let key = KeyInfo::binary(2);
        assert_eq!(compare_unpacked(&a, &b, &key), Ordering::Less);
        let key = KeyInfo {
            columns: vec![
                KeyColumn {
                    collation: CollationSeq::Binary,
                    order: SortOrder::Asc,
                },
                KeyColumn {
                    collation: CollationSeq::Binary,
                    order: SortOrder::Desc,
                },
            ],
            tie_break: TieBreak::Default,
        };
        assert_eq!(compare_unpacked(&a, &b, &key), Ordering::Greater);
    }

    #[test]
    fn test_agg_final_values() {
        let mut acc = AggContext::Sum(Value::Integer(0));
        if let AggContext::Sum(v) = &mut acc {
            *v = Value::Integer(10);
        }
        assert_eq!(acc.final_value(), Value::Integer(10));
        assert_eq!(AggContext::Count(3).final_value(), Value::Integer(3));
        assert_eq!(AggContext::Max(None).final_value(), Value::Null);
        assert_eq!(
            AggContext::Avg(Value::Integer(10), 4).final_value(),
            Value::Float(2.5)
        );
    }
}
