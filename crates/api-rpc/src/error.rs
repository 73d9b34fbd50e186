//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use courier_core::domain::DomainError;
use courier_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

fn error_code(err: &AppError) -> i32 {
    match err {
        AppError::Validation(_) | AppError::Serialization(_) => code::VALIDATION_ERROR,
        AppError::Domain(DomainError::InvalidStatusTransition { .. }) => code::CONFLICT,
        AppError::Domain(_) => code::VALIDATION_ERROR,
        AppError::NotFound(_) => code::NOT_FOUND,
        AppError::InvalidState(_) => code::CONFLICT,
        AppError::Database(_) => code::DB_ERROR,
        AppError::Config(_) | AppError::Internal(_) => code::INTERNAL_ERROR,
    }
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(error_code(&err), err.to_string(), None::<()>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            to_rpc_error(AppError::Validation("bad".into())).code(),
            code::VALIDATION_ERROR
        );
        assert_eq!(
            to_rpc_error(AppError::NotFound("job 7".into())).code(),
            code::NOT_FOUND
        );
        assert_eq!(
            to_rpc_error(AppError::Database("locked".into())).code(),
            code::DB_ERROR
        );
        assert_eq!(
            to_rpc_error(AppError::Domain(DomainError::InvalidStatusTransition {
                from: "completed".into(),
                to: "failed".into(),
            }))
            .code(),
            code::CONFLICT
        );
    }
}
