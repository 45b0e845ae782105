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

//! Credential sources accepted when creating a client.
//!
//! A client accepts credentials in several shapes: a key file on disk, the
//! contents of a key file, a channel created by the application, or a callback
//! returning access tokens. [CredentialSource::resolve] turns any of them into
//! a single [Transport], once, when the client is created.
//!
//! Creating secure channels is the job of the [ChannelFactory] provided by the
//! transport layer.

use crate::Result;
use crate::error::Error;
use crate::transport::Transport;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;

/// A callback returning a fresh access token.
pub type TokenUpdater = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// The credentials used to create the client channel.
#[derive(Clone)]
#[non_exhaustive]
pub enum CredentialSource {
    /// The path of a service account key file.
    KeyFilePath(PathBuf),
    /// The contents of a service account key file.
    KeyFileContents(Bytes),
    /// A channel created by the application, used as-is.
    PrebuiltChannel(Arc<dyn Transport>),
    /// A callback returning access tokens.
    TokenUpdater(TokenUpdater),
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key contents.
        match self {
            Self::KeyFilePath(path) => f.debug_tuple("KeyFilePath").field(path).finish(),
            Self::KeyFileContents(bytes) => f
                .debug_struct("KeyFileContents")
                .field("len", &bytes.len())
                .finish(),
            Self::PrebuiltChannel(channel) => {
                f.debug_tuple("PrebuiltChannel").field(channel).finish()
            }
            Self::TokenUpdater(_) => f.write_str("TokenUpdater"),
        }
    }
}

/// Creates channels from credentials.
#[async_trait::async_trait]
pub trait ChannelFactory: std::fmt::Debug + Send + Sync {
    /// Creates a channel authenticated with the contents of a key file.
    async fn from_key_file(&self, contents: Bytes) -> Result<Arc<dyn Transport>>;

    /// Creates a channel that attaches the tokens returned by `updater`.
    async fn from_token_updater(&self, updater: TokenUpdater) -> Result<Arc<dyn Transport>>;
}

impl CredentialSource {
    /// Creates the channel for these credentials.
    ///
    /// Key files are read from disk here. Read failures are reported as
    /// [Error::io], empty key files as [Error::other].
    pub async fn resolve(self, factory: &dyn ChannelFactory) -> Result<Arc<dyn Transport>> {
        match self {
            Self::PrebuiltChannel(channel) => Ok(channel),
            Self::TokenUpdater(updater) => factory.from_token_updater(updater).await,
            Self::KeyFileContents(contents) => key_file(factory, contents).await,
            Self::KeyFilePath(path) => {
                let contents = tokio::fs::read(&path).await.map_err(Error::io)?;
                tracing::debug!(path = %path.display(), "loaded key file");
                key_file(factory, Bytes::from(contents)).await
            }
        }
    }
}

async fn key_file(factory: &dyn ChannelFactory, contents: Bytes) -> Result<Arc<dyn Transport>> {
    if contents.is_empty() {
        return Err(Error::other("the key file is empty"));
    }
    factory.from_key_file(contents).await
}

/// The environment variable naming the application default key file.
pub const KEY_FILE_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

impl CredentialSource {
    /// The key file named by `GOOGLE_APPLICATION_CREDENTIALS`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(KEY_FILE_VAR)
            .filter(|v| !v.is_empty())
            .map(|v| Self::KeyFilePath(PathBuf::from(v)))
    }
}

impl From<Arc<dyn Transport>> for CredentialSource {
    fn from(value: Arc<dyn Transport>) -> Self {
        Self::PrebuiltChannel(value)
    }
}

impl From<PathBuf> for CredentialSource {
    fn from(value: PathBuf) -> Self {
        Self::KeyFilePath(value)
    }
}

impl From<Bytes> for CredentialSource {
    fn from(value: Bytes) -> Self {
        Self::KeyFileContents(value)
    }
}
