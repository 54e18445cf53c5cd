use anyhow::Error;
use aws_sdk_s3::operation::delete_object::DeleteObjectError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum S3mirrorError {
    #[error("cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    ConfigError(String),
    #[error("insufficient disk space: need {need} bytes, have {have} bytes available")]
    InsufficientDiskSpace { need: u64, have: u64 },
}

pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<S3mirrorError>() {
        return *err == S3mirrorError::Cancelled;
    }

    false
}

/// Typed classification of transfer-layer failures. SDK errors are
/// classified by their service error code where available; errors of opaque
/// type fall back to textual matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    RequestError,
    SerializationError,
    AccessDenied,
    NoSuchBucket,
    NoObjectFound,
    IntegrityMismatch,
    Other,
}

impl TransferErrorKind {
    /// Listing errors of these kinds stop the whole sync regardless of
    /// `--exit-on-error`.
    pub fn is_fatal_sync_error(&self) -> bool {
        matches!(
            self,
            TransferErrorKind::RequestError
                | TransferErrorKind::SerializationError
                | TransferErrorKind::AccessDenied
                | TransferErrorKind::NoSuchBucket
        )
    }
}

pub fn classify_error(e: &Error) -> TransferErrorKind {
    if let Some(kind) = classify_sdk_error::<ListObjectsV2Error>(e) {
        return kind;
    }
    if let Some(kind) = classify_sdk_error::<HeadObjectError>(e) {
        return kind;
    }
    if let Some(kind) = classify_sdk_error::<GetObjectError>(e) {
        return kind;
    }
    if let Some(kind) = classify_sdk_error::<PutObjectError>(e) {
        return kind;
    }
    if let Some(kind) = classify_sdk_error::<DeleteObjectError>(e) {
        return kind;
    }

    if let Some(io_error) = e.downcast_ref::<std::io::Error>() {
        if io_error.kind() == std::io::ErrorKind::NotFound {
            return TransferErrorKind::NoObjectFound;
        }
    }

    classify_error_text(&format!("{e:#}"))
}

/// The single point deciding whether a per-item error aborts the whole
/// sync.
pub fn should_stop_sync(e: &Error, exit_on_error: bool) -> bool {
    if is_cancelled_error(e) {
        return true;
    }

    let kind = classify_error(e);
    if kind == TransferErrorKind::NoObjectFound {
        return false;
    }
    if kind.is_fatal_sync_error() {
        return true;
    }

    exit_on_error
}

fn classify_sdk_error<E>(e: &Error) -> Option<TransferErrorKind>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let sdk_error = e.downcast_ref::<SdkError<E, Response>>()?;

    let kind = match sdk_error {
        SdkError::ConstructionFailure(_) => TransferErrorKind::SerializationError,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            TransferErrorKind::RequestError
        }
        SdkError::ServiceError(service_error) => {
            classify_error_code(service_error.err().meta().code())
        }
        _ => TransferErrorKind::Other,
    };

    Some(kind)
}

fn classify_error_code(code: Option<&str>) -> TransferErrorKind {
    match code {
        Some("AccessDenied") => TransferErrorKind::AccessDenied,
        Some("NoSuchBucket") => TransferErrorKind::NoSuchBucket,
        Some("NoSuchKey") | Some("NotFound") => TransferErrorKind::NoObjectFound,
        Some("RequestError") => TransferErrorKind::RequestError,
        Some("SerializationError") => TransferErrorKind::SerializationError,
        Some("InvalidDigest") | Some("XAmzContentSHA256Mismatch") => {
            TransferErrorKind::IntegrityMismatch
        }
        _ => TransferErrorKind::Other,
    }
}

fn classify_error_text(message: &str) -> TransferErrorKind {
    let message = message.to_lowercase();

    if message.contains("accessdenied") || message.contains("access denied") {
        return TransferErrorKind::AccessDenied;
    }
    if message.contains("nosuchbucket") || message.contains("no such bucket") {
        return TransferErrorKind::NoSuchBucket;
    }
    if message.contains("nosuchkey")
        || message.contains("no such key")
        || message.contains("no object found")
    {
        return TransferErrorKind::NoObjectFound;
    }
    if message.contains("serializationerror") {
        return TransferErrorKind::SerializationError;
    }
    if message.contains("requesterror") {
        return TransferErrorKind::RequestError;
    }
    if message.contains("invaliddigest") || message.contains("xamzcontentsha256mismatch") {
        return TransferErrorKind::IntegrityMismatch;
    }

    TransferErrorKind::Other
}
