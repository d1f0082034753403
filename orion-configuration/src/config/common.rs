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

use regex::Regex;
use std::{
    borrow::Cow,
    error::Error,
    fmt::{self, Debug, Display},
};

pub(crate) fn is_default<T: PartialEq + Default>(value: &T) -> bool {
    *value == T::default()
}

pub(crate) trait RegexExtension {
    fn matches_full(&self, to_match: &str) -> bool;
}

impl RegexExtension for Regex {
    fn matches_full(&self, to_match: &str) -> bool {
        self.find(to_match).is_some_and(|found| found.start() == 0 && found.end() == to_match.len())
    }
}

enum PathSegment {
    Field(Cow<'static, str>),
    Name(Cow<'static, str>),
    Index(usize),
}

/// Location of a validation error inside the configuration tree, innermost segment first.
pub struct FieldPath(Vec<PathSegment>);

impl Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().rev().enumerate() {
            match segment {
                PathSegment::Field(field) if i == 0 => f.write_str(field)?,
                PathSegment::Field(field) => write!(f, ".{field}")?,
                PathSegment::Name(name) => write!(f, "[\"{name}\"]")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum GenericError {
    #[error("Error parsing field {0}")]
    TracedError(FieldPath, #[source] Box<Self>),
    #[error("{0}")]
    MessageWithCause(Cow<'static, str>, #[source] Box<dyn Error + Send + Sync + 'static>),
    #[error("{0}")]
    Message(Cow<'static, str>),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Unsupported field: {0}")]
    UnsupportedField(&'static str),
}

impl GenericError {
    #[must_use]
    pub(crate) fn with_node<T: Into<Cow<'static, str>>>(self, node: T) -> Self {
        self.push_segment(PathSegment::Field(node.into()))
    }

    #[must_use]
    pub(crate) fn with_index(self, index: usize) -> Self {
        self.push_segment(PathSegment::Index(index))
    }

    #[must_use]
    pub(crate) fn with_name<T: Into<Cow<'static, str>>>(self, name: T) -> Self {
        self.push_segment(PathSegment::Name(name.into()))
    }

    fn push_segment(self, segment: PathSegment) -> Self {
        match self {
            Self::TracedError(FieldPath(mut path), error) => {
                path.push(segment);
                Self::TracedError(FieldPath(path), error)
            },
            other => Self::TracedError(FieldPath(vec![segment]), Box::new(other)),
        }
    }

    pub fn from_msg<T: Into<Cow<'static, str>>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn from_msg_with_cause<T: Into<Cow<'static, str>>, E: Error + Send + Sync + 'static>(msg: T, cause: E) -> Self {
        Self::MessageWithCause(msg.into(), cause.into())
    }
}

pub(crate) trait WithNodeOnResult {
    fn with_node<T: Into<Cow<'static, str>>>(self, node: T) -> Self;
    fn with_index(self, index: usize) -> Self;
    fn with_name<T: Into<Cow<'static, str>>>(self, name: T) -> Self;
}

impl<T> WithNodeOnResult for Result<T, GenericError> {
    fn with_node<Node: Into<Cow<'static, str>>>(self, node: Node) -> Self {
        self.map_err(|e| e.with_node(node))
    }

    fn with_index(self, index: usize) -> Self {
        self.map_err(|e| e.with_index(index))
    }

    fn with_name<Node: Into<Cow<'static, str>>>(self, name: Node) -> Self {
        self.map_err(|e| e.with_name(name))
    }
}
