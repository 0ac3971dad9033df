// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Formats a byte count with base-1000 units, truncating to an integer.
///
/// `0 -> "0B"`, `1500 -> "1KB"`, `10_000_000 -> "10MB"`. Anything past the
/// largest unit stays in petabytes.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1000 && unit < UNITS.len() - 1 {
        value /= 1000;
        unit += 1;
    }
    format!("{value}{}", UNITS[unit])
}
