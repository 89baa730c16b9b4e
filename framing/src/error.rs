use serde::{Deserialize, Serialize};

/// The closed set of recoverable error codes a reply may carry.
///
/// Fatal conditions (malformed frames, a dead stream) never appear here,
/// they terminate the child process instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrCode {
    Exception,
    InstantiatedModelNotFound,
    InvalidArgument,
    OperationClosed,
    DuplicateKey,
    LimitExceeded,
    ValueTooLarge,
}

/// The structured error body of a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrBody {
    pub code: ErrCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrBody {
    /// Builds an error body.
    ///
    /// # Arguments
    /// * `code` - The wire error code.
    /// * `details` - Diagnostic text for the host, if any.
    pub fn new(code: ErrCode, details: Option<String>) -> Self {
        Self { code, details }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_use_snake_case_on_the_wire() {
        let body = ErrBody::new(ErrCode::InstantiatedModelNotFound, None);
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"code":"instantiated_model_not_found"}"#);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let err = serde_json::from_str::<ErrBody>(r#"{"code":"reconnect_pending"}"#);
        assert!(err.is_err());
    }
}
