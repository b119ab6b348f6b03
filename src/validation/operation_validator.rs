use crate::api::middleware::AppError;
use crate::models::OperationKind;

/// Allow-list check for document-store operations
pub struct OperationValidator;

impl OperationValidator {
    /// Resolve an operation name against the allow-list.
    ///
    /// Rejects anything outside the nine supported kinds, naming the offender.
    pub fn validate(function: &str) -> Result<OperationKind, AppError> {
        OperationKind::from_name(function)
            .ok_or_else(|| AppError::Validation(format!("Unsupported function: {}", function)))
    }

    /// Names accepted by `validate`, in wire form
    pub fn allowed_functions() -> Vec<&'static str> {
        OperationKind::ALL.iter().map(|kind| kind.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_allowed_functions() {
        assert_eq!(OperationValidator::validate("find").unwrap(), OperationKind::Find);
        assert_eq!(
            OperationValidator::validate("countDocuments").unwrap(),
            OperationKind::CountDocuments
        );
        assert_eq!(OperationValidator::validate("delete").unwrap(), OperationKind::Delete);
        assert_eq!(OperationValidator::allowed_functions().len(), 9);
    }

    #[test]
    fn test_validate_rejects_unknown_functions() {
        for name in ["drop", "findMany", "updateMany", "deleteOne", "FIND", "", "mapReduce"] {
            let err = OperationValidator::validate(name).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
            assert!(
                err.to_string().contains(&format!("Unsupported function: {}", name)),
                "error should name '{}': {}",
                name,
                err
            );
        }
    }
}
