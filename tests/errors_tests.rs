use std::error::Error;

use sqs_bridge::core::models::FailedSend;
use sqs_bridge::errors::SqsError;

#[test]
fn test_sqs_error_implements_error_trait() {
    fn assert_error<T: Error + Send + Sync + 'static>(_: &T) {}

    let error = SqsError::DuplicateProducer("test1".to_string());
    assert_error(&error);
}

#[test]
fn test_sqs_error_display() {
    let error = SqsError::DuplicateProducer("test1".to_string());
    assert_eq!(format!("{error}"), "Producer already exists: test1");

    let error = SqsError::DuplicateConsumer("test2".to_string());
    assert_eq!(format!("{error}"), "Consumer already exists: test2");

    let error = SqsError::ProducerNotFound("missing".to_string());
    assert_eq!(format!("{error}"), "Producer does not exist: missing");

    let error = SqsError::QueueNotFound("missing".to_string());
    assert_eq!(
        format!("{error}"),
        "Consumer/Producer does not exist: missing"
    );

    let error = SqsError::SendFailed {
        queue: "orders".to_string(),
        failed: vec![FailedSend {
            id: "1".to_string(),
            code: "MissingParameter".to_string(),
            message: None,
            sender_fault: true,
        }],
    };
    assert_eq!(format!("{error}"), "Failed to send 1 message(s) to orders");
}

#[test]
fn test_sqs_error_from_conversions() {
    let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let sqs_err: SqsError = err.into();
    assert!(matches!(sqs_err, SqsError::Serialization(_)));

    // Verifies the generic SDK conversion exists for an operation error type.
    #[allow(unused)]
    #[allow(clippy::items_after_statements)]
    fn _check_sdk_conversion(
        err: aws_sdk_sqs::error::SdkError<aws_sdk_sqs::operation::purge_queue::PurgeQueueError>,
    ) -> SqsError {
        SqsError::from(err)
    }
}

#[test]
fn test_handler_errors_convert_to_anyhow() {
    let err = anyhow::Error::from(SqsError::AwsError("throttled".to_string()));
    assert!(err.to_string().contains("throttled"));
    assert!(err.downcast_ref::<SqsError>().is_some());
}
