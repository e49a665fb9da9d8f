//! Vectorized predicate kernels
//!
//! Kernels fill one output bit per row, word by word, only for words whose
//! mask is non-zero. The predicate shape is matched once per chunk and each
//! shape gets its own monomorphized inner loop over the typed buffer.

use std::cmp::Ordering;
use std::hash::Hash;
use std::ops::Bound;

use ahash::AHashSet;

use crate::data::{canonical_f64, float_cmp, Value};
use crate::query::predicate::PredicateKind;
use crate::storage::inverted::tokenize;

// ============================================================================
// Native element types
// ============================================================================

/// Element type of a physical value buffer
pub trait NativeType: Clone + Send + Sync + 'static {
    /// Hash-set key; must agree with `native_cmp` equality
    type Key: Hash + Eq + Send + Sync;

    /// Borrow the native payload of a literal of this physical type
    fn extract(value: &Value) -> Option<&Self>;

    /// Total order, identical to the order of the corresponding `Value`s
    fn native_cmp(a: &Self, b: &Self) -> Ordering;

    fn key(v: &Self) -> Self::Key;

    #[inline]
    fn set_contains(set: &AHashSet<Self::Key>, v: &Self) -> bool {
        set.contains(&Self::key(v))
    }

    #[inline]
    fn as_str(_v: &Self) -> Option<&str> {
        None
    }
}

impl NativeType for bool {
    type Key = bool;

    fn extract(value: &Value) -> Option<&Self> {
        match value {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    #[inline]
    fn native_cmp(a: &Self, b: &Self) -> Ordering {
        a.cmp(b)
    }

    #[inline]
    fn key(v: &Self) -> bool {
        *v
    }
}

impl NativeType for i32 {
    type Key = i32;

    fn extract(value: &Value) -> Option<&Self> {
        match value {
            Value::Int32(x) | Value::Date(x) => Some(x),
            _ => None,
        }
    }

    #[inline]
    fn native_cmp(a: &Self, b: &Self) -> Ordering {
        a.cmp(b)
    }

    #[inline]
    fn key(v: &Self) -> i32 {
        *v
    }
}

impl NativeType for i64 {
    type Key = i64;

    fn extract(value: &Value) -> Option<&Self> {
        match value {
            Value::Int64(x) | Value::Timestamp(x) => Some(x),
            _ => None,
        }
    }

    #[inline]
    fn native_cmp(a: &Self, b: &Self) -> Ordering {
        a.cmp(b)
    }

    #[inline]
    fn key(v: &Self) -> i64 {
        *v
    }
}

impl NativeType for f64 {
    // canonical bit pattern, matching float_cmp equality
    type Key = u64;

    fn extract(value: &Value) -> Option<&Self> {
        match value {
            Value::Float64(x) => Some(x),
            _ => None,
        }
    }

    #[inline]
    fn native_cmp(a: &Self, b: &Self) -> Ordering {
        float_cmp(*a, *b)
    }

    #[inline]
    fn key(v: &Self) -> u64 {
        canonical_f64(*v).to_bits()
    }
}

impl NativeType for String {
    type Key = String;

    fn extract(value: &Value) -> Option<&Self> {
        match value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    fn native_cmp(a: &Self, b: &Self) -> Ordering {
        a.cmp(b)
    }

    fn key(v: &Self) -> String {
        v.clone()
    }

    #[inline]
    fn set_contains(set: &AHashSet<String>, v: &Self) -> bool {
        set.contains(v)
    }

    #[inline]
    fn as_str(v: &Self) -> Option<&str> {
        Some(v)
    }
}

// ============================================================================
// Literal sets
// ============================================================================

/// Membership structure for IN / NOT IN literals
pub enum LiteralSet<T: NativeType> {
    /// Small lists: linear scan, no hashing
    Flat(Vec<T>),
    Hashed(AHashSet<T::Key>),
}

impl<T: NativeType> LiteralSet<T> {
    /// `None` when some literal is not of type `T`
    pub fn build(literals: &[Value], linear_threshold: usize) -> Option<Self> {
        let natives = literals
            .iter()
            .map(|v| T::extract(v).cloned())
            .collect::<Option<Vec<T>>>()?;
        if natives.len() <= linear_threshold {
            Some(LiteralSet::Flat(natives))
        } else {
            Some(LiteralSet::Hashed(natives.iter().map(T::key).collect()))
        }
    }

    #[inline]
    pub fn contains(&self, v: &T) -> bool {
        match self {
            LiteralSet::Flat(lits) => lits
                .iter()
                .fold(false, |hit, l| hit | (T::native_cmp(l, v) == Ordering::Equal)),
            LiteralSet::Hashed(set) => T::set_contains(set, v),
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, LiteralSet::Flat(_))
    }
}

/// Dictionary code membership
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeSet {
    /// One bit per dictionary code
    Mask { bits: Vec<u64>, members: usize },
    /// Dictionaries too large for a direct mask
    Hashed(AHashSet<u32>),
}

impl CodeSet {
    pub fn from_codes(codes: &[u32], cardinality: usize, mask_max_cardinality: usize) -> Self {
        if cardinality <= mask_max_cardinality {
            let mut bits = vec![0u64; (cardinality + 63) / 64];
            let mut members = 0;
            for &c in codes {
                let (w, b) = (c as usize / 64, c as usize % 64);
                if let Some(word) = bits.get_mut(w) {
                    if *word & (1 << b) == 0 {
                        *word |= 1 << b;
                        members += 1;
                    }
                }
            }
            CodeSet::Mask { bits, members }
        } else {
            CodeSet::Hashed(codes.iter().copied().collect())
        }
    }

    #[inline]
    pub fn contains(&self, code: u32) -> bool {
        match self {
            CodeSet::Mask { bits, .. } => bits
                .get(code as usize / 64)
                .map_or(false, |w| (w >> (code % 64)) & 1 == 1),
            CodeSet::Hashed(set) => set.contains(&code),
        }
    }

    /// Number of distinct member codes
    pub fn len(&self) -> usize {
        match self {
            CodeSet::Mask { members, .. } => *members,
            CodeSet::Hashed(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member codes in ascending order
    pub fn codes(&self) -> Vec<u32> {
        match self {
            CodeSet::Mask { bits, .. } => bits
                .iter()
                .enumerate()
                .flat_map(|(w, &word)| {
                    (0..64u32).filter(move |b| (word >> b) & 1 == 1).map(move |b| w as u32 * 64 + b)
                })
                .collect(),
            CodeSet::Hashed(set) => {
                let mut codes: Vec<u32> = set.iter().copied().collect();
                codes.sort_unstable();
                codes
            }
        }
    }
}

// ============================================================================
// Word kernels
// ============================================================================

/// For each word with a non-zero mask, set `out` bits where `pred(row)`
/// holds, restricted to the mask. Words with a zero mask are left at zero.
#[inline]
pub fn fill_words<F>(mask: &[u64], len: usize, out: &mut [u64], pred: F)
where
    F: Fn(usize) -> bool,
{
    for (w, (&m, o)) in mask.iter().zip(out.iter_mut()).enumerate() {
        if m == 0 {
            continue;
        }
        let base = w * 64;
        let end = (base + 64).min(len);
        let mut bits = 0u64;
        for row in base..end {
            bits |= (pred(row) as u64) << (row - base);
        }
        *o = bits & m;
    }
}

#[inline]
fn above<T: NativeType>(v: &T, lower: Bound<&T>) -> bool {
    match lower {
        Bound::Unbounded => true,
        Bound::Included(l) => T::native_cmp(v, l) != Ordering::Less,
        Bound::Excluded(l) => T::native_cmp(v, l) == Ordering::Greater,
    }
}

#[inline]
fn below<T: NativeType>(v: &T, upper: Bound<&T>) -> bool {
    match upper {
        Bound::Unbounded => true,
        Bound::Included(u) => T::native_cmp(v, u) != Ordering::Greater,
        Bound::Excluded(u) => T::native_cmp(v, u) == Ordering::Less,
    }
}

fn native_bound<T: NativeType>(bound: &Bound<Value>) -> Option<Bound<&T>> {
    Some(match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(v) => Bound::Included(T::extract(v)?),
        Bound::Excluded(v) => Bound::Excluded(T::extract(v)?),
    })
}

/// Evaluate a value predicate over a typed buffer.
///
/// Null rows are not handled here; the caller masks them out. Returns
/// `None` when a literal is not of the buffer's type, in which case the
/// caller falls back to row-at-a-time evaluation.
pub fn eval_typed<T: NativeType>(
    values: &[T],
    kind: &PredicateKind,
    linear_threshold: usize,
    mask: &[u64],
    out: &mut [u64],
) -> Option<()> {
    let len = values.len();
    match kind {
        PredicateKind::Equals(lit) => {
            let lit = T::extract(lit)?;
            fill_words(mask, len, out, |i| T::native_cmp(&values[i], lit) == Ordering::Equal);
        }
        PredicateKind::Range { lower, upper } => {
            let lower = native_bound::<T>(lower)?;
            let upper = native_bound::<T>(upper)?;
            fill_words(mask, len, out, |i| above(&values[i], lower) & below(&values[i], upper));
        }
        PredicateKind::InSet(lits) => {
            let set = LiteralSet::<T>::build(lits, linear_threshold)?;
            fill_words(mask, len, out, |i| set.contains(&values[i]));
        }
        PredicateKind::NotInSet(lits) => {
            let set = LiteralSet::<T>::build(lits, linear_threshold)?;
            fill_words(mask, len, out, |i| !set.contains(&values[i]));
        }
        PredicateKind::ContainsToken(token) => {
            fill_words(mask, len, out, |i| {
                T::as_str(&values[i]).map_or(false, |s| tokenize(s).any(|t| t == *token))
            });
        }
        PredicateKind::Never => {}
        // resolved from the null bitmap by the evaluator
        PredicateKind::IsNull | PredicateKind::IsNotNull => return None,
    }
    Some(())
}
