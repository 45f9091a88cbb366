/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 */

use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;

use crate::compile::{self, N2kCompiledRegistry};
use crate::dialect;
use sockcan::prelude::CanError;

static SHARED_REGISTRY: OnceCell<Arc<N2kCompiledRegistry>> = OnceCell::new();

/// Parses and compiles a dialect file into a fresh registry. Prefer this
/// explicit construction and share the `Arc` across parsers and handlers.
///
/// # Errors
/// Propagates dialect-parse and compile failures.
pub fn load_registry_from_file(path: &Path) -> Result<Arc<N2kCompiledRegistry>, CanError> {
    let definitions = dialect::parse_from_file(path)?;
    Ok(Arc::new(compile::compile(&definitions)?))
}

/// Same as [`load_registry_from_file`] for an in-memory dialect document.
///
/// # Errors
/// Propagates dialect-parse and compile failures.
pub fn load_registry_from_str(xml: &str) -> Result<Arc<N2kCompiledRegistry>, CanError> {
    let definitions = dialect::parse_from_str(xml)?;
    Ok(Arc::new(compile::compile(&definitions)?))
}

/// Process-wide registry guarded by a single initializer: the first caller's
/// dialect wins and is published complete; later paths are ignored.
///
/// # Errors
/// Propagates the first initialization failure; a failed attempt leaves the
/// cell empty so a later call can retry.
pub fn shared_registry(path: &Path) -> Result<Arc<N2kCompiledRegistry>, CanError> {
    SHARED_REGISTRY.get_or_try_init(|| load_registry_from_file(path)).map(Arc::clone)
}
