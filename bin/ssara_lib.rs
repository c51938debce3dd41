/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Test IR tooling shared by the `ssara` binary and the fuzz targets.

pub mod fuzzing;
pub mod test_cases;
pub mod test_framework;
pub mod validator;
