use serde::Serialize;
use std::fmt;

/// Vendor return code attached to a metric that could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    Uninitialized,
    InvalidArgument,
    NotSupported,
    NoPermission,
    NotFound,
    InsufficientSize,
    InsufficientPower,
    DriverNotLoaded,
    Timeout,
    GpuIsLost,
    NoData,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Uninitialized => "NVML_ERROR_UNINITIALIZED",
            ErrorCode::InvalidArgument => "NVML_ERROR_INVALID_ARGUMENT",
            ErrorCode::NotSupported => "NVML_ERROR_NOT_SUPPORTED",
            ErrorCode::NoPermission => "NVML_ERROR_NO_PERMISSION",
            ErrorCode::NotFound => "NVML_ERROR_NOT_FOUND",
            ErrorCode::InsufficientSize => "NVML_ERROR_INSUFFICIENT_SIZE",
            ErrorCode::InsufficientPower => "NVML_ERROR_INSUFFICIENT_POWER",
            ErrorCode::DriverNotLoaded => "NVML_ERROR_DRIVER_NOT_LOADED",
            ErrorCode::Timeout => "NVML_ERROR_TIMEOUT",
            ErrorCode::GpuIsLost => "NVML_ERROR_GPU_IS_LOST",
            ErrorCode::NoData => "NVML_ERROR_NO_DATA",
            ErrorCode::Unknown => "NVML_ERROR_UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single metric query: either the value or the code the
/// vendor API returned instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Value(T),
    Failure(ErrorCode),
}

impl<T> Field<T> {
    pub fn from_result(result: Result<T, ErrorCode>) -> Self {
        match result {
            Ok(value) => Field::Value(value),
            Err(code) => Field::Failure(code),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            Field::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<ErrorCode> {
        match self {
            Field::Value(_) => None,
            Field::Failure(code) => Some(*code),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Field<U> {
        match self {
            Field::Value(v) => Field::Value(f(v)),
            Field::Failure(code) => Field::Failure(code),
        }
    }
}

impl<T> From<Result<T, ErrorCode>> for Field<T> {
    fn from(result: Result<T, ErrorCode>) -> Self {
        Field::from_result(result)
    }
}

/// Typed metric value. The variant decides the line-protocol literal form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Bool(bool),
    U32(u32),
    U64(u64),
    F64(f64),
    Str(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U32(v as u32)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_result_keeps_value_or_code() {
        let ok: Field<u32> = Field::from_result(Ok(7));
        assert_eq!(ok.value(), Some(&7));
        assert_eq!(ok.failure(), None);

        let failed: Field<u32> = Field::from_result(Err(ErrorCode::NotSupported));
        assert!(failed.value().is_none());
        assert_eq!(failed.failure(), Some(ErrorCode::NotSupported));
    }

    #[test]
    fn map_preserves_failure() {
        let failed: Field<u32> = Err(ErrorCode::GpuIsLost).into();
        assert_eq!(failed.map(Value::from), Field::Failure(ErrorCode::GpuIsLost));

        let ok: Field<u32> = Ok(3).into();
        assert_eq!(ok.map(Value::from), Field::Value(Value::U32(3)));
    }

    #[test]
    fn error_code_uses_vendor_spelling() {
        assert_eq!(ErrorCode::NotSupported.to_string(), "NVML_ERROR_NOT_SUPPORTED");
        assert_eq!(ErrorCode::NoPermission.as_str(), "NVML_ERROR_NO_PERMISSION");
    }
}
