use bragi::{BragiError, Result};

#[test]
fn test_error_display() {
    let err = BragiError::TextTooLong { len: 250, max: 200 };
    assert!(err.to_string().contains("250"));
    assert!(err.to_string().contains("200"));
}

#[test]
fn test_upstream_display() {
    let err = BragiError::Upstream {
        status: 400,
        message: "unknown voice".into(),
    };
    assert_eq!(
        err.to_string(),
        "upstream rejected request (400): unknown voice"
    );
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(BragiError::Overloaded)
    }
    assert!(returns_error().is_err());
}

// ============================================================================
// Transient error classification
// ============================================================================

#[test]
fn transient_errors() {
    assert!(BragiError::Unreachable { attempts: 4 }.is_transient());
    assert!(BragiError::Http("connection reset".into()).is_transient());
    for status in [429, 500, 502, 503] {
        assert!(
            BragiError::Upstream {
                status,
                message: String::new()
            }
            .is_transient(),
            "{status} should be transient"
        );
    }
}

#[test]
fn permanent_errors() {
    for status in [400, 401, 403, 404, 422] {
        assert!(
            !BragiError::Upstream {
                status,
                message: String::new()
            }
            .is_transient(),
            "{status} should not be transient"
        );
    }
    assert!(!BragiError::EmptyText.is_transient());
    assert!(!BragiError::Overloaded.is_transient());
    assert!(!BragiError::EmptyResponse.is_transient());
    assert!(!BragiError::Configuration("bad".into()).is_transient());
}

#[test]
fn overload_is_distinguishable() {
    assert!(BragiError::Overloaded.is_overloaded());
    assert!(!BragiError::ShuttingDown.is_overloaded());
}

#[test]
fn io_errors_convert() {
    let err: BragiError = std::io::Error::other("disk gone").into();
    assert!(matches!(err, BragiError::Io(ref m) if m.contains("disk gone")));
}
