use std::error::Error;
use tablelog::errors::TransportError;

#[test]
fn test_transport_error_implements_error_trait() {
    fn assert_error<T: Error + Send + Sync + 'static>(_: &T) {}

    let error = TransportError::Config("test error".to_string());
    assert_error(&error);
}

#[test]
fn test_transport_error_display() {
    let error = TransportError::Config("azure storage account name required.".to_string());
    assert_eq!(
        format!("{error}"),
        "Invalid transport configuration: azure storage account name required."
    );

    let error = TransportError::Http("Connection error".to_string());
    assert_eq!(
        format!("{error}"),
        "Failed to send HTTP request: Connection error"
    );

    let error = TransportError::Service {
        status: 404,
        code: "TableNotFound".to_string(),
        message: "The table specified does not exist.".to_string(),
    };
    assert_eq!(
        format!("{error}"),
        "Table service returned 404 (TableNotFound): The table specified does not exist."
    );
    assert_eq!(error.service_code(), Some("TableNotFound"));
}

#[test]
fn test_transport_error_from_conversions() {
    let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let transport_err: TransportError = err.into();
    assert!(matches!(transport_err, TransportError::Serialization(_)));

    let err = url::Url::parse("not a url").unwrap_err();
    let transport_err: TransportError = err.into();
    match transport_err {
        TransportError::Config(msg) => assert!(msg.contains("invalid endpoint URL")),
        other => panic!("Unexpected error type: {other:?}"),
    }

    // reqwest::Error has no public constructor; this only checks the
    // conversion exists.
    #[allow(unused)]
    fn _check_reqwest_conversion(err: reqwest::Error) -> TransportError {
        TransportError::from(err)
    }
}
