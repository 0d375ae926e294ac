use nix::unistd::{access, AccessFlags};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// Recursively lists every regular, executable file under `root`.
///
/// Keys are absolute paths, values the files' modification times. Any
/// unreadable directory fails the whole scan. Symlinked directories are not
/// descended into; symlinked files are followed.
pub fn scan_executables(root: &Path) -> Result<BTreeMap<PathBuf, SystemTime>> {
	let scan_err = |source: io::Error| Error::Scan {
		dir: root.to_path_buf(),
		source,
	};
	let top = fs::canonicalize(root).map_err(scan_err)?;
	let mut found = BTreeMap::new();
	traverse(&top, &mut found)?;
	Ok(found)
}

fn traverse(dir: &Path, found: &mut BTreeMap<PathBuf, SystemTime>) -> Result<()> {
	let scan_err = |source: io::Error| Error::Scan {
		dir: dir.to_path_buf(),
		source,
	};

	for entry in fs::read_dir(dir).map_err(scan_err)? {
		let entry = entry.map_err(scan_err)?;
		let path = entry.path();
		let file_type = match entry.file_type() {
			Ok(t) => t,
			Err(_) => continue,
		};

		if file_type.is_dir() {
			traverse(&path, found)?;
			continue;
		}

		// follows symlinks; dangling links and vanished files are skipped
		let meta = match fs::metadata(&path) {
			Ok(m) => m,
			Err(_) => continue,
		};
		if !meta.is_file() || access(&path, AccessFlags::X_OK).is_err() {
			continue;
		}
		if let Ok(modified) = meta.modified() {
			found.insert(path, modified);
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::os::unix::fs::PermissionsExt;

	fn write_file(path: &Path, mode: u32) {
		fs::write(path, "#!/bin/sh\n").unwrap();
		fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
	}

	#[test]
	fn finds_nested_executables_only() {
		let dir = tempfile::tempdir().unwrap();
		fs::create_dir_all(dir.path().join("a/b")).unwrap();
		write_file(&dir.path().join("top.sh"), 0o755);
		write_file(&dir.path().join("a/b/deep.sh"), 0o700);
		write_file(&dir.path().join("a/readme.txt"), 0o644);

		let found = scan_executables(dir.path()).unwrap();
		let root = fs::canonicalize(dir.path()).unwrap();
		let paths: Vec<PathBuf> = found.keys().cloned().collect();
		assert_eq!(paths, vec![root.join("a/b/deep.sh"), root.join("top.sh")]);
		assert!(paths.iter().all(|p| p.is_absolute()));
	}

	#[test]
	fn missing_root_is_a_scan_error() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("nope");
		match scan_executables(&missing) {
			Err(Error::Scan { dir, .. }) => assert_eq!(dir, missing),
			other => panic!("expected scan error, got {:?}", other),
		}
	}

	#[test]
	fn symlinked_directories_are_not_followed() {
		let dir = tempfile::tempdir().unwrap();
		write_file(&dir.path().join("run.sh"), 0o755);
		std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

		let found = scan_executables(dir.path()).unwrap();
		assert_eq!(found.len(), 1);
	}
}
