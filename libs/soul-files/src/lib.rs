// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Blob file I/O collaborator: opaque byte and JSON-text persistence with an
//! optional symmetric obfuscation pass, plus an async façade that runs the
//! blocking I/O on the shared worker pool.

mod encryption;
mod manager;

pub use encryption::Encryption;
pub use manager::{AsyncFileManager, FileManager};
