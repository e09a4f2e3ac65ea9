// Copyright 2025 The Druid Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("object has no namespace associated"))]
    NoNamespace,

    #[snafu(display("invalid DruidSpec: {}", msg))]
    InvalidSpec { msg: String },

    #[snafu(display("unknown {} dependency type '{}'", dependency, type_name))]
    UnknownDependencyType {
        dependency: String,
        type_name: String,
    },

    #[snafu(display(
        "{} spec of type '{}' is missing the 'properties' key",
        dependency,
        type_name
    ))]
    DependencyPropertiesMissing {
        dependency: String,
        type_name: String,
    },

    #[snafu(display("internal error: {}", msg))]
    InternalError { msg: String },

    #[snafu(display("serde_json error: {}", source))]
    SerdeJson { source: serde_json::Error },
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::SerdeJson { source }
    }
}
