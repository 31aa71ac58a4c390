//! Element kinds and typed value columns.
//!
//! Every variable holds elements of one [`ElementKind`]. Columns of data
//! travel as [`ElementValues`], a tagged vector that can be dispatched back
//! to its concrete element type with [`ElementValues::visit`].

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// The closed set of element types a variable can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Int32,
    Int64,
    Float32,
    Float64,
    Char,
    String,
    DateTime,
}

impl ElementKind {
    /// Parse from string (case-insensitive). Returns `None` for unsupported kinds.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "int32" | "int" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "float32" | "float" => Some(Self::Float32),
            "float64" | "double" => Some(Self::Float64),
            "char" => Some(Self::Char),
            "string" => Some(Self::String),
            "datetime" => Some(Self::DateTime),
            _ => None,
        }
    }

    /// Get the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Char => "char",
            Self::String => "string",
            Self::DateTime => "datetime",
        }
    }

    /// Conventional missing value used as the default fill value.
    pub fn missing_value(&self) -> ElementValue {
        match self {
            Self::Int32 => ElementValue::Int32(-2_147_483_647),
            Self::Int64 => ElementValue::Int64(-9_223_372_036_854_775_806),
            Self::Float32 => ElementValue::Float32(-3.368_795_3e38),
            Self::Float64 => ElementValue::Float64(-3.368_795_3e38),
            Self::Char => ElementValue::Char(0),
            Self::String => ElementValue::String("*** MISSING ***".to_string()),
            Self::DateTime => ElementValue::DateTime(missing_datetime()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32 | Self::Int64 | Self::Float32 | Self::Float64
        )
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn missing_datetime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9996, 2, 29, 23, 58, 57)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A single element, used for fill values and sort keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ElementValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Char(u8),
    String(String),
    DateTime(DateTime<Utc>),
}

impl ElementValue {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Int32(_) => ElementKind::Int32,
            Self::Int64(_) => ElementKind::Int64,
            Self::Float32(_) => ElementKind::Float32,
            Self::Float64(_) => ElementKind::Float64,
            Self::Char(_) => ElementKind::Char,
            Self::String(_) => ElementKind::String,
            Self::DateTime(_) => ElementKind::DateTime,
        }
    }

    /// Numeric view of the value. Date times map to epoch seconds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::Float32(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            Self::Char(v) => Some(*v as f64),
            Self::DateTime(v) => Some(v.timestamp() as f64),
            Self::String(_) => None,
        }
    }
}

impl PartialOrd for ElementValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int32(a), Self::Int32(b)) => a.partial_cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.partial_cmp(b),
            (Self::Float32(a), Self::Float32(b)) => a.partial_cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.partial_cmp(b),
            (Self::Char(a), Self::Char(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => a.partial_cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl std::fmt::Display for ElementValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Float32(v) => write!(f, "{}", v),
            Self::Float64(v) => write!(f, "{}", v),
            Self::Char(v) => write!(f, "{}", *v as char),
            Self::String(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

/// A concrete element type that can live in an [`ElementValues`] column.
pub trait Element: Clone + PartialOrd + Send + Sync + std::fmt::Debug + 'static {
    const KIND: ElementKind;

    fn wrap(values: Vec<Self>) -> ElementValues;
    fn unwrap(values: ElementValues) -> Option<Vec<Self>>;
    fn slice(values: &ElementValues) -> Option<&[Self]>;
    fn vec_mut(values: &mut ElementValues) -> Option<&mut Vec<Self>>;
    fn to_value(&self) -> ElementValue;
    fn from_value(value: &ElementValue) -> Option<Self>;

    /// Whether this element equals the given fill value.
    fn is_missing(&self, fill: &Self) -> bool {
        self == fill
    }
}

macro_rules! impl_element {
    (@impl $t:ty, $variant:ident, { $($extra:tt)* }) => {
        impl Element for $t {
            const KIND: ElementKind = ElementKind::$variant;

            fn wrap(values: Vec<Self>) -> ElementValues {
                ElementValues::$variant(values)
            }

            fn unwrap(values: ElementValues) -> Option<Vec<Self>> {
                match values {
                    ElementValues::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn slice(values: &ElementValues) -> Option<&[Self]> {
                match values {
                    ElementValues::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn vec_mut(values: &mut ElementValues) -> Option<&mut Vec<Self>> {
                match values {
                    ElementValues::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn to_value(&self) -> ElementValue {
                ElementValue::$variant(self.clone())
            }

            fn from_value(value: &ElementValue) -> Option<Self> {
                match value {
                    ElementValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }

            $($extra)*
        }
    };
    ($t:ty, $variant:ident) => {
        impl_element!(@impl $t, $variant, {});
    };
    ($t:ty, $variant:ident, nan) => {
        impl_element!(@impl $t, $variant, {
            fn is_missing(&self, fill: &Self) -> bool {
                self.is_nan() || self == fill
            }
        });
    };
}

impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(f32, Float32, nan);
impl_element!(f64, Float64, nan);
impl_element!(u8, Char);
impl_element!(String, String);
impl_element!(DateTime<Utc>, DateTime);

/// Generic operation over a column whose element type is only known at runtime.
pub trait ElementVisitor {
    type Output;

    fn visit<T: Element>(self, values: &[T]) -> Self::Output;
}

/// A column of elements of one kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValues {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Char(Vec<u8>),
    String(Vec<String>),
    DateTime(Vec<DateTime<Utc>>),
}

macro_rules! with_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            ElementValues::Int32($v) => $body,
            ElementValues::Int64($v) => $body,
            ElementValues::Float32($v) => $body,
            ElementValues::Float64($v) => $body,
            ElementValues::Char($v) => $body,
            ElementValues::String($v) => $body,
            ElementValues::DateTime($v) => $body,
        }
    };
}

fn gather_from<T: Element>(values: &[T], indices: &[usize]) -> ElementValues {
    T::wrap(indices.iter().map(|&i| values[i].clone()).collect())
}

fn scatter_into<T: Element>(dst: &mut [T], indices: &[usize], src: &ElementValues) -> bool {
    match T::slice(src) {
        Some(src) => {
            for (&i, value) in indices.iter().zip(src) {
                dst[i] = value.clone();
            }
            true
        }
        None => false,
    }
}

fn extend_from<T: Element>(dst: &mut Vec<T>, src: &ElementValues) -> bool {
    match T::slice(src) {
        Some(src) => {
            dst.extend_from_slice(src);
            true
        }
        None => false,
    }
}

fn resize_with<T: Element>(dst: &mut Vec<T>, len: usize, fill: &ElementValue) -> bool {
    match T::from_value(fill) {
        Some(fill) => {
            dst.resize(len, fill);
            true
        }
        None => false,
    }
}

fn missing_at<T: Element>(values: &[T], index: usize, fill: &ElementValue) -> bool {
    match (values.get(index), T::from_value(fill)) {
        (Some(v), Some(fill)) => v.is_missing(&fill),
        _ => false,
    }
}

fn kind_mismatch(context: &str, expected: ElementKind, actual: ElementKind) -> StoreError {
    StoreError::KindMismatch {
        name: context.to_string(),
        expected,
        actual,
    }
}

impl ElementValues {
    /// An empty column of the given kind.
    pub fn empty(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Int32 => Self::Int32(Vec::new()),
            ElementKind::Int64 => Self::Int64(Vec::new()),
            ElementKind::Float32 => Self::Float32(Vec::new()),
            ElementKind::Float64 => Self::Float64(Vec::new()),
            ElementKind::Char => Self::Char(Vec::new()),
            ElementKind::String => Self::String(Vec::new()),
            ElementKind::DateTime => Self::DateTime(Vec::new()),
        }
    }

    /// A column of `len` copies of `fill`.
    pub fn filled(fill: &ElementValue, len: usize) -> Self {
        match fill {
            ElementValue::Int32(v) => Self::Int32(vec![*v; len]),
            ElementValue::Int64(v) => Self::Int64(vec![*v; len]),
            ElementValue::Float32(v) => Self::Float32(vec![*v; len]),
            ElementValue::Float64(v) => Self::Float64(vec![*v; len]),
            ElementValue::Char(v) => Self::Char(vec![*v; len]),
            ElementValue::String(v) => Self::String(vec![v.clone(); len]),
            ElementValue::DateTime(v) => Self::DateTime(vec![*v; len]),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Int32(_) => ElementKind::Int32,
            Self::Int64(_) => ElementKind::Int64,
            Self::Float32(_) => ElementKind::Float32,
            Self::Float64(_) => ElementKind::Float64,
            Self::Char(_) => ElementKind::Char,
            Self::String(_) => ElementKind::String,
            Self::DateTime(_) => ElementKind::DateTime,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch to the concrete element type.
    pub fn visit<V: ElementVisitor>(&self, visitor: V) -> V::Output {
        with_values!(self, v => visitor.visit(v.as_slice()))
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(self)
    }

    pub fn into_vec<T: Element>(self) -> Option<Vec<T>> {
        T::unwrap(self)
    }

    pub fn get(&self, index: usize) -> Option<ElementValue> {
        with_values!(self, v => v.get(index).map(Element::to_value))
    }

    /// New column holding the elements at `indices`, in that order.
    ///
    /// Panics if an index is out of range; callers validate selections first.
    pub fn gather(&self, indices: &[usize]) -> ElementValues {
        with_values!(self, v => gather_from(v, indices))
    }

    /// Overwrite the elements at `indices` with the elements of `src`, in order.
    pub fn scatter(&mut self, indices: &[usize], src: &ElementValues) -> Result<()> {
        let (expected, actual) = (self.kind(), src.kind());
        if with_values!(self, v => scatter_into(v, indices, src)) {
            Ok(())
        } else {
            Err(kind_mismatch("scatter", expected, actual))
        }
    }

    /// Append all elements of `other`.
    pub fn append(&mut self, other: &ElementValues) -> Result<()> {
        let (expected, actual) = (self.kind(), other.kind());
        if with_values!(self, v => extend_from(v, other)) {
            Ok(())
        } else {
            Err(kind_mismatch("append", expected, actual))
        }
    }

    /// Truncate or pad with `fill` to exactly `len` elements.
    pub fn resize(&mut self, len: usize, fill: &ElementValue) -> Result<()> {
        let (expected, actual) = (self.kind(), fill.kind());
        if with_values!(self, v => resize_with(v, len, fill)) {
            Ok(())
        } else {
            Err(kind_mismatch("resize", expected, actual))
        }
    }

    /// Whether the element at `index` equals `fill` (or is NaN).
    pub fn is_missing(&self, index: usize, fill: &ElementValue) -> bool {
        with_values!(self, v => missing_at(v, index, fill))
    }

    /// Numeric view of the column, if the kind is numeric.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Self::Int32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Self::Int64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Self::Float32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Self::Float64(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl<T: Element> From<Vec<T>> for ElementValues {
    fn from(values: Vec<T>) -> Self {
        T::wrap(values)
    }
}
