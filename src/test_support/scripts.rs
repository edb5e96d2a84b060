//! Stand-in executables for exercising process supervision without a server.

use camino::{Utf8Path, Utf8PathBuf};

use crate::resolver::BinarySet;

/// Writes an executable `/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
pub(crate) fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

#[cfg(unix)]
/// Wraps an installation root holding `bin/` as a [`BinarySet`].
pub(crate) fn fake_binary_set(root: &Utf8Path) -> BinarySet {
    BinarySet::from_root("16.4.0", root)
}
