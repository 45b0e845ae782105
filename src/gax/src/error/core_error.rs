// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::rpc::{Code, Status};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

type BoxError = Box<dyn StdError + Send + Sync>;
type SharedError = Arc<dyn StdError + Send + Sync>;

/// The core error returned by every callable.
///
/// Errors come from multiple sources. The service may return an error, the
/// transport may be unable to reach the service, an attempt may exceed its
/// deadline, the retry policy may be exhausted, the caller may cancel the
/// call, or the library may be unable to encode the request.
///
/// Most applications just return the error or log it. Applications that need
/// to interrogate the error can use [Error::code] to classify it, the `is_*`
/// predicates to find out where it was produced, and
/// [source][std::error::Error::source] for deeper information.
///
/// The error is cheap to clone: a single failed physical RPC is reported to
/// every logical call that was bundled into it.
///
/// # Example
/// ```
/// use gax::error::Error;
/// use gax::error::rpc::{Code, Status};
/// match example_function() {
///     Err(e) if e.code() == Code::NotFound => println!("not there {e}"),
///     Err(e) if e.is_timeout() => println!("not enough time {e}"),
///     Err(e) => println!("some other error {e}"),
///     Ok(_) => println!("success, how boring"),
/// }
///
/// fn example_function() -> Result<String, Error> {
///     Err(Error::service(Status::default().set_code(Code::NotFound).set_message("NOT FOUND")))
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<SharedError>,
    retry: Option<RetryDetails>,
}

impl Error {
    /// Creates an error with the status returned by the service.
    ///
    /// # Example
    /// ```
    /// use gax::error::Error;
    /// use gax::error::rpc::{Code, Status};
    /// let status = Status::default().set_code(Code::NotFound).set_message("NOT FOUND");
    /// let error = Error::service(status.clone());
    /// assert_eq!(error.status(), Some(&status));
    /// ```
    pub fn service(status: Status) -> Self {
        Self::new(ErrorKind::Service(Box::new(status)), None)
    }

    /// Creates an error representing a timeout.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use gax::error::Error;
    /// let error = Error::timeout("simulated timeout");
    /// assert!(error.is_timeout());
    /// assert!(error.source().is_some());
    /// ```
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Timeout, Some(source.into()))
    }

    /// The request could not be completed before its deadline.
    ///
    /// This is always a client-side generated error. The request may or may
    /// not have started, and it may or may not complete in the service.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Creates an error representing an exhausted retry policy.
    ///
    /// The source should be the error returned by the last attempt.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use gax::error::Error;
    /// let error = Error::exhausted("too many retry attempts");
    /// assert!(error.is_exhausted());
    /// assert!(error.source().is_some());
    /// ```
    pub fn exhausted<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Exhausted, Some(source.into()))
    }

    /// The request could not complete before the retry policy expired.
    ///
    /// This is always a client-side generated error, but it is the result of
    /// one or more errors received from the service. [Error::code] reports
    /// the code of the last of those errors.
    ///
    /// # Troubleshooting
    ///
    /// The most common cause of this problem is a transient problem that lasts
    /// longer than your retry policy. If your application can tolerate longer
    /// recovery times then extend the total timeout in the retry settings.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::Exhausted)
    }

    /// Creates an error representing a cancelled call.
    ///
    /// # Example
    /// ```
    /// use gax::error::Error;
    /// use gax::error::rpc::Code;
    /// let error = Error::cancelled();
    /// assert!(error.is_cancelled());
    /// assert_eq!(error.code(), Code::Cancelled);
    /// ```
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, None)
    }

    /// The caller cancelled the request.
    ///
    /// Cancellation is always terminal, the request is never retried after
    /// the caller cancels it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Creates an error representing an I/O problem in the transport.
    ///
    /// # Example
    /// ```
    /// use gax::error::Error;
    /// use gax::error::rpc::Code;
    /// let error = Error::io("connection reset");
    /// assert!(error.is_io());
    /// assert_eq!(error.code(), Code::Unavailable);
    /// ```
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Io, Some(source.into()))
    }

    /// The transport could not send the request or receive the response.
    ///
    /// The request may or may not have reached the service.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// Creates an error representing a serialization problem.
    pub fn ser<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Serialization, Some(source.into()))
    }

    /// The request could not be serialized.
    ///
    /// This is always a client-side generated error, generated before the
    /// request is made. This error is never transient, the serialization is
    /// deterministic and will fail on future attempts with the same input.
    pub fn is_serialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Serialization)
    }

    /// Creates an error representing a deserialization problem.
    pub fn deser<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Deserialization, Some(source.into()))
    }

    /// The response could not be deserialized.
    ///
    /// The request may have completed in the service, but the client cannot
    /// interpret the response.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Deserialization)
    }

    /// Creates an error that does not fit any other classification.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Other, Some(source.into()))
    }

    /// The [Status] payload associated with this error, if any.
    ///
    /// If the error is an [exhausted][Error::is_exhausted] retry loop, this
    /// returns the status of the last attempt.
    pub fn status(&self) -> Option<&Status> {
        match &self.kind {
            ErrorKind::Service(s) => Some(s.as_ref()),
            ErrorKind::Exhausted => self.inner().and_then(|e| e.status()),
            _ => None,
        }
    }

    /// Classifies the error using the canonical status codes.
    ///
    /// Retry policies use this classification to decide if an error is
    /// retryable. Errors created on the client side map to the code a server
    /// would use for the same condition.
    pub fn code(&self) -> Code {
        match &self.kind {
            ErrorKind::Service(s) => s.code,
            ErrorKind::Timeout => Code::DeadlineExceeded,
            ErrorKind::Cancelled => Code::Cancelled,
            ErrorKind::Io => Code::Unavailable,
            ErrorKind::Serialization => Code::InvalidArgument,
            ErrorKind::Deserialization => Code::Internal,
            ErrorKind::Exhausted => self.inner().map(Error::code).unwrap_or(Code::Unknown),
            ErrorKind::Other => Code::Unknown,
        }
    }

    /// The number of attempts made before this error was returned.
    ///
    /// Only set on errors returned by a retry loop.
    pub fn attempt_count(&self) -> Option<u32> {
        self.retry.as_ref().map(|r| r.attempt_count)
    }

    /// The time elapsed between the first attempt and the moment the retry
    /// loop gave up.
    ///
    /// Only set on errors returned by a retry loop.
    pub fn elapsed(&self) -> Option<Duration> {
        self.retry.as_ref().map(|r| r.elapsed)
    }

    pub(crate) fn with_retry_details(mut self, attempt_count: u32, elapsed: Duration) -> Self {
        self.retry = Some(RetryDetails {
            attempt_count,
            elapsed,
        });
        self
    }

    fn new(kind: ErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source: source.map(SharedError::from),
            retry: None,
        }
    }

    fn inner(&self) -> Option<&Error> {
        self.source.as_ref().and_then(|e| e.downcast_ref::<Error>())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Service(s), _) => write!(
                f,
                "the service reports an error with code {} described as: {}",
                s.code, s.message
            )?,
            (ErrorKind::Cancelled, _) => write!(f, "the request was cancelled by the caller")?,
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the request exceeded the request deadline {e}")?
            }
            (ErrorKind::Exhausted, Some(e)) => write!(f, "retry policy exhausted: {e}")?,
            (ErrorKind::Io, Some(e)) => write!(f, "the transport reports an error: {e}")?,
            (ErrorKind::Serialization, Some(e)) => write!(f, "cannot serialize the request {e}")?,
            (ErrorKind::Deserialization, Some(e)) => {
                write!(f, "cannot deserialize the response {e}")?
            }
            (ErrorKind::Other, Some(e)) => {
                write!(f, "an unclassified problem making a request: {e}")?
            }
            (_, None) => unreachable!("no constructor allows this"),
        }
        if let Some(r) = &self.retry {
            write!(
                f,
                " (after {} attempt(s) in {:?})",
                r.attempt_count, r.elapsed
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error))
    }
}

/// The type of error held by an [Error] instance.
#[derive(Clone, Debug)]
enum ErrorKind {
    Service(Box<Status>),
    Timeout,
    Exhausted,
    Cancelled,
    Io,
    Serialization,
    Deserialization,
    Other,
}

#[derive(Clone, Debug)]
struct RetryDetails {
    attempt_count: u32,
    elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use test_case::test_case;

    #[derive(Debug, thiserror::Error)]
    #[error("test-only source")]
    struct TestSource;

    #[test]
    fn service() {
        let status = Status::default()
            .set_code(Code::NotFound)
            .set_message("NOT FOUND");
        let error = Error::service(status.clone());
        assert!(error.source().is_none(), "{error:?}");
        assert_eq!(error.status(), Some(&status));
        assert_eq!(error.code(), Code::NotFound);
        assert!(error.to_string().contains("NOT FOUND"), "{error}");
        assert!(error.to_string().contains(Code::NotFound.name()), "{error}");
        assert!(error.attempt_count().is_none(), "{error:?}");
    }

    #[test]
    fn timeout() {
        let error = Error::timeout(TestSource);
        assert!(error.is_timeout(), "{error:?}");
        let got = error.source().and_then(|e| e.downcast_ref::<TestSource>());
        assert!(got.is_some(), "{error:?}");
        assert!(error.to_string().contains("test-only source"), "{error}");
        assert_eq!(error.code(), Code::DeadlineExceeded);
        assert!(error.status().is_none(), "{error:?}");
    }

    #[test]
    fn cancelled() {
        let error = Error::cancelled();
        assert!(error.is_cancelled(), "{error:?}");
        assert!(error.source().is_none(), "{error:?}");
        assert_eq!(error.code(), Code::Cancelled);
        assert!(error.to_string().contains("cancelled"), "{error}");
    }

    #[test]
    fn exhausted_reports_last_error() {
        let status = Status::default()
            .set_code(Code::Unavailable)
            .set_message("try-again");
        let error = Error::exhausted(Error::service(status.clone()));
        assert!(error.is_exhausted(), "{error:?}");
        assert_eq!(error.code(), Code::Unavailable);
        assert_eq!(error.status(), Some(&status));
        let got = error
            .source()
            .and_then(|e| e.downcast_ref::<Error>())
            .and_then(|e| e.status());
        assert_eq!(got, Some(&status));
        assert!(error.to_string().contains("try-again"), "{error}");
    }

    #[test]
    fn exhausted_without_inner_error() {
        let error = Error::exhausted(TestSource);
        assert_eq!(error.code(), Code::Unknown);
        assert!(error.status().is_none(), "{error:?}");
    }

    #[test_case(Error::io(TestSource), Code::Unavailable; "io")]
    #[test_case(Error::ser(TestSource), Code::InvalidArgument; "serialization")]
    #[test_case(Error::deser(TestSource), Code::Internal; "deserialization")]
    #[test_case(Error::other(TestSource), Code::Unknown; "other")]
    fn client_side_codes(error: Error, want: Code) {
        assert_eq!(error.code(), want, "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
        assert!(error.to_string().contains("test-only source"), "{error}");
    }

    #[test]
    fn predicates() {
        assert!(Error::io(TestSource).is_io());
        assert!(Error::ser(TestSource).is_serialization());
        assert!(Error::deser(TestSource).is_deserialization());
        assert!(!Error::other(TestSource).is_io());
    }

    #[test]
    fn retry_details() {
        let error = Error::exhausted(Error::io(TestSource))
            .with_retry_details(3, Duration::from_millis(300));
        assert_eq!(error.attempt_count(), Some(3));
        assert_eq!(error.elapsed(), Some(Duration::from_millis(300)));
        assert!(error.to_string().contains("after 3 attempt(s)"), "{error}");
    }

    #[test]
    fn clone_shares_source() {
        let error = Error::io(TestSource);
        let clone = error.clone();
        assert!(clone.is_io(), "{clone:?}");
        assert_eq!(error.to_string(), clone.to_string());
    }

    #[test]
    fn send_and_sync() {
        static_assertions::assert_impl_all!(Error: Send, Sync, Clone);
    }
}
