#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script named `name` into `dir`.
///
/// `body` is everything after the shebang line.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write test script");
    let mut perms = fs::metadata(&path).expect("stat test script").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod test script");
    path
}
