//  Copyright 2024 MrCroxx
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use thiserror::Error;

/// Fatal error conditions raised by the core engine.
///
/// `MemoryPressure` and `Arithmetic` from the error-kind table are not
/// represented here: the former is a degraded-mode flag threaded through
/// synthesis results and logged via `tracing::warn!`, the latter is
/// recovered inline at its one or two division sites.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing `use_columns`, unreadable header, or a config referencing an
    /// unknown column.
    #[error("input schema error: {0}")]
    InputSchema(String),

    /// Unknown synthesis mode, unknown threshold type, missing DP parameters
    /// when `dp_aggregates=true`, or sigma proportions not summing to 1.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A DP run requested more per-length budget than epsilon allows.
    #[error("privacy budget exceeded: {0}")]
    Budget(String),

    /// Output directory missing/unwritable, or a malformed input stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, CoreError>;
