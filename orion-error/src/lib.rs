// SPDX-FileCopyrightText: © 2025 Huawei Cloud Computing Technologies Co., Ltd
// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Huawei Cloud Computing Technologies Co., Ltd
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

mod status;

pub use status::{Status, StatusCode};

use std::{
    borrow::Cow,
    error::Error as StdError,
    fmt::{self, Debug, Display},
    result::Result as StdResult,
};

type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = StdResult<T, Error>;

/// Type-erased error carrying an optional chain of context messages.
///
/// `Error` does not implement [`std::error::Error`], which leaves room for the blanket `From<E>` covering
/// `&str` and `String` too. The wrapped value does and is reachable through [`Error::inner`] or [`AsRef`].
pub struct Error(Chained);

enum Chained {
    Root(BoxedError),
    Context { message: Cow<'static, str>, cause: BoxedError },
}

impl Error {
    #[must_use]
    pub fn context<M: Into<Cow<'static, str>>>(self, message: M) -> Self {
        Self(Chained::Context { message: message.into(), cause: Box::new(self.0) })
    }

    pub fn inner(self) -> impl StdError + Send + Sync + 'static {
        self.0
    }

    /// Walks the chain of causes and returns the first [`Status`] found, if any.
    pub fn status(&self) -> Option<&Status> {
        let mut next: Option<&(dyn StdError + 'static)> = Some(&self.0);
        while let Some(err) = next {
            if let Some(status) = err.downcast_ref::<Status>() {
                return Some(status);
            }
            next = match err.downcast_ref::<Chained>() {
                Some(Chained::Root(root)) => Some(root.as_ref()),
                _ => err.source(),
            };
        }
        None
    }
}

impl<E: Into<BoxedError>> From<E> for Error {
    fn from(value: E) -> Self {
        Self(Chained::Root(value.into()))
    }
}

impl AsRef<dyn StdError + Send + Sync + 'static> for Error {
    fn as_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &self.0
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl StdError for Chained {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Root(root) => root.source(),
            Self::Context { cause, .. } => Some(cause.as_ref()),
        }
    }
}

impl Display for Chained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(root) => Display::fmt(root, f),
            Self::Context { message, .. } => f.write_str(message),
        }
    }
}

impl Debug for Chained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)?;
        let causes: Vec<_> = std::iter::successors(self.source(), |&err| err.source()).collect();
        match causes.as_slice() {
            [] => Ok(()),
            [single] => write!(f, "\n\ncaused by:\n    {single}"),
            many => {
                f.write_str("\n\ncaused by:")?;
                for (level, cause) in many.iter().enumerate() {
                    write!(f, "\n{level: >4}: {cause}")?;
                }
                Ok(())
            },
        }
    }
}

/// Adds `.context(..)` to any standard error.
pub trait ErrorExtension {
    #[must_use]
    fn context<M: Into<Cow<'static, str>>>(self, message: M) -> Error;
}

impl<E: StdError + Send + Sync + 'static> ErrorExtension for E {
    fn context<M: Into<Cow<'static, str>>>(self, message: M) -> Error {
        Error(Chained::Context { message: message.into(), cause: Box::new(self) })
    }
}

/// Adds `.context(..)` and `.with_context(..)` to results.
pub trait ResultExtension {
    type T;
    fn context<M: Into<Cow<'static, str>>>(self, message: M) -> Result<Self::T>;
    fn with_context<F: FnOnce() -> M, M: Into<Cow<'static, str>>>(self, message_fn: F) -> Result<Self::T>;
}

impl<T, E: StdError + Send + Sync + 'static> ResultExtension for StdResult<T, E> {
    type T = T;
    fn context<M: Into<Cow<'static, str>>>(self, message: M) -> Result<T> {
        self.map_err(|e| ErrorExtension::context(e, message))
    }
    fn with_context<F: FnOnce() -> M, M: Into<Cow<'static, str>>>(self, message_fn: F) -> Result<T> {
        self.map_err(|e| ErrorExtension::context(e, message_fn()))
    }
}

// `Error` is not a `std::error::Error`, so it needs its own impl
impl<T> ResultExtension for Result<T> {
    type T = T;
    fn context<M: Into<Cow<'static, str>>>(self, message: M) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
    fn with_context<F: FnOnce() -> M, M: Into<Cow<'static, str>>>(self, message_fn: F) -> Result<T> {
        self.map_err(|e| e.context(message_fn()))
    }
}
