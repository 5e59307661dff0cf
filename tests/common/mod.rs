use std::path::PathBuf;

/// Per-test disk image path under the system temp directory.
pub fn disk_path(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("sfs-it-{}-{}.img", name, std::process::id()));
    p
}

pub fn destroy(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
}
