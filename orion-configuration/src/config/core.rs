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

use crate::config::common::*;
use base64::engine::general_purpose::STANDARD;
use base64_serde::base64_serde_type;
use compact_str::CompactString;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Cursor, Read};
base64_serde_type!(Base64Standard, STANDARD);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Path(CompactString),
    InlineBytes(#[serde(with = "Base64Standard")] Vec<u8>),
    InlineString(CompactString),
    EnvironmentVariable(CompactString),
}

#[derive(thiserror::Error, Debug)]
pub enum DataSourceReadError {
    #[error("failed to read file \"{0}\"")]
    IoError(CompactString, #[source] std::io::Error),
    #[error("failed to read environment variable \"{0}\"")]
    EnvError(CompactString, #[source] std::env::VarError),
}

impl DataSource {
    pub fn to_bytes_blocking(&self) -> Result<Vec<u8>, DataSourceReadError> {
        match self {
            Self::InlineString(s) => Ok(s.as_bytes().to_vec()),
            Self::InlineBytes(b) => Ok(b.clone()),
            Self::Path(path) => std::fs::read(path).map_err(|e| DataSourceReadError::IoError(path.clone(), e)),
            Self::EnvironmentVariable(key) => {
                std::env::var(key).map(String::into_bytes).map_err(|e| DataSourceReadError::EnvError(key.clone(), e))
            },
        }
    }

    /// Buffered reader over the source, files are streamed and everything else is read up front.
    pub fn reader(&self) -> Result<Box<dyn std::io::BufRead + Send + '_>, DataSourceReadError> {
        Ok(match self {
            Self::Path(path) => {
                let file = std::fs::File::open(path).map_err(|e| DataSourceReadError::IoError(path.clone(), e))?;
                Box::new(BufReader::new(file))
            },
            Self::InlineString(s) => Box::new(Cursor::new(s.as_bytes())),
            Self::InlineBytes(b) => Box::new(Cursor::new(b.as_slice())),
            Self::EnvironmentVariable(_) => Box::new(Cursor::new(self.to_bytes_blocking()?)),
        })
    }

    pub fn read_to_string(&self) -> Result<String, DataSourceReadError> {
        let mut out = String::new();
        self.reader()?
            .read_to_string(&mut out)
            .map_err(|e| DataSourceReadError::IoError(self.describe(), e))?;
        Ok(out)
    }

    fn describe(&self) -> CompactString {
        match self {
            Self::Path(path) => path.clone(),
            Self::EnvironmentVariable(key) => key.clone(),
            Self::InlineBytes(_) | Self::InlineString(_) => "<inline>".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StringMatcher {
    // does not apply to regex
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub ignore_case: bool,
    #[serde(flatten)]
    pub pattern: StringMatcherPattern,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMatcherPattern {
    Exact(CompactString),
    Prefix(CompactString),
    Suffix(CompactString),
    Contains(CompactString),
    Regex(#[serde(with = "serde_regex")] Regex),
}

impl PartialEq for StringMatcherPattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Regex(r1), Self::Regex(r2)) => r1.as_str() == r2.as_str(),
            (Self::Exact(s1), Self::Exact(s2))
            | (Self::Prefix(s1), Self::Prefix(s2))
            | (Self::Suffix(s1), Self::Suffix(s2))
            | (Self::Contains(s1), Self::Contains(s2)) => s1 == s2,
            _ => false,
        }
    }
}

impl Eq for StringMatcherPattern {}

/// Case (in)sensitive comparisons on a haystack, `.0` is true when the comparison is case sensitive.
pub(crate) struct CaseSensitive<'a>(pub bool, pub &'a str);

impl CaseSensitive<'_> {
    #[inline]
    pub fn equals(&self, other: &str) -> bool {
        if self.0 {
            self.1 == other
        } else {
            self.1.eq_ignore_ascii_case(other)
        }
    }

    #[inline]
    pub fn starts_with(&self, prefix: &str) -> bool {
        if self.0 {
            self.1.starts_with(prefix)
        } else {
            self.1.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        }
    }

    #[inline]
    pub fn ends_with(&self, suffix: &str) -> bool {
        if self.0 {
            self.1.ends_with(suffix)
        } else {
            self.1
                .len()
                .checked_sub(suffix.len())
                .and_then(|start| self.1.get(start..))
                .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
        }
    }

    #[inline]
    pub fn contains(&self, needle: &str) -> bool {
        if self.0 {
            self.1.contains(needle)
        } else {
            self.1.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
        }
    }
}

impl StringMatcher {
    pub fn matches(&self, to_match: &str) -> bool {
        let haystack = CaseSensitive(!self.ignore_case, to_match);
        match &self.pattern {
            StringMatcherPattern::Exact(s) => haystack.equals(s),
            StringMatcherPattern::Prefix(prefix) => haystack.starts_with(prefix),
            StringMatcherPattern::Suffix(suffix) => haystack.ends_with(suffix),
            StringMatcherPattern::Contains(needle) => haystack.contains(needle),
            StringMatcherPattern::Regex(r) => r.matches_full(to_match),
        }
    }
}
