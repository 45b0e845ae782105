// Copyright 2025 Google LLC
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

#[cfg(test)]
mod tests {
    use gax::error::Error;
    use gax::error::rpc::{Code, Status};
    use std::error::Error as _;

    #[derive(Debug, Default)]
    struct LeafError {}

    impl LeafError {
        fn hey(&self) -> &'static str {
            "hey"
        }
    }

    impl std::fmt::Display for LeafError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "leaf error")
        }
    }

    impl std::error::Error for LeafError {}

    #[test]
    fn source_chain() {
        let err = Error::io(LeafError::default());
        assert!(err.is_io(), "{err:?}");
        assert_eq!(err.code(), Code::Unavailable);
        let leaf = err
            .source()
            .and_then(|e| e.downcast_ref::<LeafError>())
            .map(LeafError::hey);
        assert_eq!(leaf, Some("hey"));
        assert!(err.to_string().contains("leaf error"), "{err}");
    }

    #[test]
    fn service_errors() {
        let err = Error::service(
            Status::default()
                .set_code(Code::ResourceExhausted)
                .set_message("quota exceeded"),
        );
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert_eq!(
            err.status().map(|s| s.message.as_str()),
            Some("quota exceeded")
        );
        assert!(err.to_string().contains("quota exceeded"), "{err}");
        assert!(err.attempt_count().is_none());
    }

    #[test]
    fn client_side_codes() {
        assert_eq!(Error::timeout("slow").code(), Code::DeadlineExceeded);
        assert_eq!(Error::cancelled().code(), Code::Cancelled);
        assert_eq!(Error::ser("bad request").code(), Code::InvalidArgument);
        assert_eq!(Error::deser("bad response").code(), Code::Internal);
        assert_eq!(Error::other("unknown").code(), Code::Unknown);
    }

    #[test]
    fn exhausted_keeps_last_error() {
        let last = Error::service(Status::default().set_code(Code::Unavailable));
        let err = Error::exhausted(last);
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(err.code(), Code::Unavailable);
        assert!(err.status().is_some());
        let inner = err.source().and_then(|e| e.downcast_ref::<Error>());
        assert!(inner.is_some_and(|e| e.code() == Code::Unavailable), "{err:?}");
    }

    #[test]
    fn send_sync() {
        static_assertions::assert_impl_all!(Error: Send, Sync, Clone, std::error::Error);
    }
}
