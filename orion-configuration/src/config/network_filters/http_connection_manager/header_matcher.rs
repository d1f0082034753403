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

use crate::config::{common::*, core::StringMatcher};
use http::{HeaderMap, HeaderName};
use serde::{de::Visitor, Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeaderNames {
    Path,
    NormalHeader(HeaderName),
}

impl Serialize for HeaderNames {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Path => serializer.serialize_str(":path"),
            Self::NormalHeader(header) => http_serde_ext::header_name::serialize(header, serializer),
        }
    }
}

impl<'de> Deserialize<'de> for HeaderNames {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct StrVisitor;
        impl Visitor<'_> for StrVisitor {
            type Value = HeaderNames;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("`str`")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }
        deserializer.deserialize_str(StrVisitor)
    }
}

impl From<HeaderName> for HeaderNames {
    fn from(value: HeaderName) -> Self {
        Self::NormalHeader(value)
    }
}

impl FromStr for HeaderNames {
    type Err = GenericError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ":path" => Ok(Self::Path),
            s => HeaderName::from_str(s).map(Self::NormalHeader).map_err(|e| {
                GenericError::from_msg_with_cause(format!("couldn't convert \"{s}\" into a HeaderName"), e)
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeaderMatcher {
    #[serde(rename = "name")]
    pub header_name: HeaderNames,
    #[serde(skip_serializing_if = "std::ops::Not::not", default = "Default::default")]
    pub invert_match: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default = "Default::default")]
    pub treat_missing_header_as_empty: bool,
    #[serde(flatten)]
    pub header_matcher: StringMatcher,
}

impl HeaderMatcher {
    /// Checks the matcher against the metadata of a call.
    ///
    /// Binary (`-bin`) headers never match. Values that are not visible ascii are skipped.
    pub fn call_matches(&self, path: &str, headers: &HeaderMap) -> bool {
        match &self.header_name {
            HeaderNames::Path => self.header_matcher.matches(path) ^ self.invert_match,
            HeaderNames::NormalHeader(name) if name.as_str().ends_with("-bin") => false,
            HeaderNames::NormalHeader(name) => {
                let mut header_values = headers.get_all(name).into_iter().map(|hv| hv.to_str().ok());
                match header_values.next() {
                    None => {
                        if self.treat_missing_header_as_empty {
                            self.header_matcher.matches("") ^ self.invert_match
                        } else {
                            // missing headers don't get inverted
                            false
                        }
                    },
                    Some(first) => {
                        let first_result = first.is_some_and(|s| self.header_matcher.matches(s));
                        let any_matched =
                            first_result || header_values.any(|hv| hv.is_some_and(|s| self.header_matcher.matches(s)));
                        any_matched ^ self.invert_match
                    },
                }
            },
        }
    }
}
