//! Value model types.
//!
//! These types describe what a variable holds and how a read result is
//! reported:
//! - `DataType` / `ValueRank` declared on a variable
//! - `Variant` typed runtime values
//! - `StatusCode` and `DataValue` for read results and notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar data types a variable can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    UInt32,
    Int64,
    Float,
    Double,
    String,
}

/// Shape of a variable's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueRank {
    Scalar,
    OneDimension,
}

/// Read/write permissions of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLevel {
    pub readable: bool,
    pub writable: bool,
}

impl AccessLevel {
    pub const READ_ONLY: AccessLevel = AccessLevel {
        readable: true,
        writable: false,
    };

    pub const READ_WRITE: AccessLevel = AccessLevel {
        readable: true,
        writable: true,
    };
}

impl Default for AccessLevel {
    fn default() -> Self {
        Self::READ_ONLY
    }
}

/// A one-dimensional array value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayValue {
    pub element_type: DataType,
    pub values: Vec<Variant>,
}

/// A typed runtime value.
///
/// Serialized adjacently tagged, e.g. `{"type":"Double","value":21.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Variant {
    Empty,
    Boolean(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Array(ArrayValue),
}

impl Variant {
    /// Build a one-dimensional array from scalars of the given type.
    pub fn array(element_type: DataType, values: Vec<Variant>) -> Self {
        Variant::Array(ArrayValue {
            element_type,
            values,
        })
    }

    /// Convenience for `Double` arrays.
    pub fn double_array(values: &[f64]) -> Self {
        Self::array(
            DataType::Double,
            values.iter().copied().map(Variant::Double).collect(),
        )
    }

    /// The scalar data type, or `None` for `Empty` and arrays.
    pub fn scalar_type(&self) -> Option<DataType> {
        match self {
            Variant::Empty | Variant::Array(_) => None,
            Variant::Boolean(_) => Some(DataType::Boolean),
            Variant::Int32(_) => Some(DataType::Int32),
            Variant::UInt32(_) => Some(DataType::UInt32),
            Variant::Int64(_) => Some(DataType::Int64),
            Variant::Float(_) => Some(DataType::Float),
            Variant::Double(_) => Some(DataType::Double),
            Variant::String(_) => Some(DataType::String),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Int32(v) => Some(*v as f64),
            Variant::UInt32(v) => Some(*v as f64),
            Variant::Int64(v) => Some(*v as f64),
            Variant::Float(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Check that this value matches a declared type and shape.
    ///
    /// For arrays every element must be a scalar of `data_type`, and when a
    /// non-zero dimension is declared the length must equal it.
    pub fn conforms_to(
        &self,
        data_type: DataType,
        rank: ValueRank,
        array_dimension: Option<u32>,
    ) -> bool {
        match (rank, self) {
            (ValueRank::Scalar, v) => v.scalar_type() == Some(data_type),
            (ValueRank::OneDimension, Variant::Array(arr)) => {
                if arr.element_type != data_type {
                    return false;
                }
                if let Some(dim) = array_dimension {
                    if dim != 0 && arr.values.len() != dim as usize {
                        return false;
                    }
                }
                arr.values
                    .iter()
                    .all(|v| v.scalar_type() == Some(data_type))
            }
            (ValueRank::OneDimension, _) => false,
        }
    }

    /// Type-appropriate equality used for change detection.
    ///
    /// Floating point values compare within `epsilon` when one is given,
    /// otherwise exactly. Two NaNs are considered equal so a source stuck at
    /// NaN does not report a change on every sample.
    pub fn same_as(&self, other: &Variant, epsilon: Option<f64>) -> bool {
        match (self, other) {
            (Variant::Double(a), Variant::Double(b)) => float_eq(*a, *b, epsilon),
            (Variant::Float(a), Variant::Float(b)) => float_eq(*a as f64, *b as f64, epsilon),
            (Variant::Array(a), Variant::Array(b)) => {
                a.element_type == b.element_type
                    && a.values.len() == b.values.len()
                    && a
                        .values
                        .iter()
                        .zip(b.values.iter())
                        .all(|(x, y)| x.same_as(y, epsilon))
            }
            (a, b) => a == b,
        }
    }
}

fn float_eq(a: f64, b: f64, epsilon: Option<f64>) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    match epsilon {
        Some(eps) => (a - b).abs() <= eps,
        None => a == b,
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "<empty>"),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{:?}", v),
            Variant::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int32(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

/// Result/health indicator attached to reads and notifications.
///
/// Values follow the OPC UA layout: the top two bits carry the severity
/// (00 good, 01 uncertain, 10 bad).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    /// A value source failed to evaluate. Sent as BadInternalError.
    pub const BAD_SOURCE: StatusCode = StatusCode(0x8002_0000);
    pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8007_0000);
    pub const BAD_SHUTDOWN: StatusCode = StatusCode(0x800C_0000);
    pub const BAD_SUBSCRIPTION_ID_INVALID: StatusCode = StatusCode(0x8028_0000);
    pub const BAD_NODE_ID_INVALID: StatusCode = StatusCode(0x8033_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803A_0000);
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);
    pub const BAD_NOTHING_TO_DO: StatusCode = StatusCode(0x800F_0000);
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    pub const BAD_NODE_ID_EXISTS: StatusCode = StatusCode(0x805E_0000);
    pub const BAD_INVALID_ARGUMENT: StatusCode = StatusCode(0x80AB_0000);

    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Symbolic name for the codes this server produces.
    pub fn name(self) -> &'static str {
        match self {
            StatusCode::GOOD => "Good",
            StatusCode::BAD_SOURCE => "BadInternalError",
            StatusCode::BAD_DECODING_ERROR => "BadDecodingError",
            StatusCode::BAD_SHUTDOWN => "BadShutdown",
            StatusCode::BAD_SUBSCRIPTION_ID_INVALID => "BadSubscriptionIdInvalid",
            StatusCode::BAD_NODE_ID_INVALID => "BadNodeIdInvalid",
            StatusCode::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            StatusCode::BAD_NOT_READABLE => "BadNotReadable",
            StatusCode::BAD_NOT_WRITABLE => "BadNotWritable",
            StatusCode::BAD_NOTHING_TO_DO => "BadNothingToDo",
            StatusCode::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            StatusCode::BAD_NODE_ID_EXISTS => "BadNodeIdExists",
            StatusCode::BAD_INVALID_ARGUMENT => "BadInvalidArgument",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

/// A value with its status and source timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_timestamp: DateTime<Utc>,
}

impl DataValue {
    pub fn good(value: Variant, source_timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            status: StatusCode::GOOD,
            source_timestamp,
        }
    }

    /// A failed read: empty value carrying `status`.
    pub fn bad(status: StatusCode, source_timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Variant::Empty,
            status,
            source_timestamp,
        }
    }

    /// Whether `other` should be reported as a change relative to `self`.
    pub fn differs_from(&self, other: &DataValue, epsilon: Option<f64>) -> bool {
        self.status != other.status || !self.value.same_as(&other.value, epsilon)
    }
}
