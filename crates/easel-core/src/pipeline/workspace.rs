//! Filesystem layout for a build: temporary source trees, the compiled
//! output directory and auxiliary resources.

use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use super::SourceUnit;
use crate::error::{Error, Result};

/// A uniquely named scratch directory holding the sources of one build.
///
/// ```text
/// <base>/easel_<uuid>/
///     src/<path of unit relative to the input root, image extension stripped>
/// ```
///
/// The whole tree is removed on drop.
#[derive(Debug)]
pub struct SourceTree {
    root: PathBuf,
    src: PathBuf,
}

impl SourceTree {
    /// Create a tree under the system temporary directory.
    pub fn create() -> Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    pub fn create_in(base: &Path) -> Result<Self> {
        let root = base.join(format!("easel_{}", Uuid::new_v4().simple()));
        let src = root.join("src");
        fs::create_dir_all(&src)
            .map_err(|e| Error::io(format!("failed to create {}", src.display()), e))?;
        debug!(root = %root.display(), "source tree created");
        Ok(Self { root, src })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src(&self) -> &Path {
        &self.src
    }

    /// Write every unit below `src/`, returning the written paths in unit
    /// order.
    pub fn write_units(
        &self,
        units: &[SourceUnit],
        input_root: &Path,
        extensions: &[String],
    ) -> Result<Vec<PathBuf>> {
        write_units(&self.src, units, input_root, extensions)
    }
}

impl Drop for SourceTree {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!(root = %self.root.display(), error = %e, "failed to remove source tree");
        }
    }
}

/// Where a unit lands relative to the destination root.
///
/// The origin's path below `input_root` is kept; a unit outside the input
/// root falls back to its bare file name. A trailing extension from
/// `extensions` is removed once, so `Main.java.png` becomes `Main.java`.
pub fn mirror_path(origin: &Path, input_root: &Path, extensions: &[String]) -> Result<PathBuf> {
    let relative = match origin.strip_prefix(input_root) {
        Ok(rel)
            if rel.file_name().is_some()
                && rel.components().all(|c| matches!(c, Component::Normal(_))) =>
        {
            rel.to_path_buf()
        }
        _ => {
            let name = origin.file_name().ok_or_else(|| {
                Error::InvalidState(format!("source unit {} has no file name", origin.display()))
            })?;
            warn!(
                origin = %origin.display(),
                input_root = %input_root.display(),
                "source unit is not below the input root, using its file name"
            );
            PathBuf::from(name)
        }
    };

    let strip = relative
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
    Ok(if strip {
        relative.with_extension("")
    } else {
        relative
    })
}

/// Write `units` below `dest`, mirroring their layout.
pub fn write_units(
    dest: &Path,
    units: &[SourceUnit],
    input_root: &Path,
    extensions: &[String],
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(units.len());
    for unit in units {
        let path = dest.join(mirror_path(&unit.origin, input_root, extensions)?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
        }
        fs::write(&path, &unit.text)
            .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))?;
        debug!(origin = %unit.origin.display(), path = %path.display(), "source unit written");
        written.push(path);
    }
    Ok(written)
}

/// Remove `dir` with everything in it, then create it empty.
pub fn recreate_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(format!("failed to clear {}", dir.display()), e)),
    }
    fs::create_dir_all(dir).map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))
}

pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("failed to remove {}", path.display()), e)),
    }
}

/// Copy auxiliary files into `dest`.
///
/// A directory's contents are copied recursively into `dest`; a single
/// file is copied into `dest` under its own name.
pub fn copy_resources(source: &Path, dest: &Path) -> Result<()> {
    if source.is_dir() {
        copy_dir_contents(source, dest)
    } else {
        let name = source.file_name().ok_or_else(|| {
            Error::InvalidState(format!("resource path {} has no file name", source.display()))
        })?;
        copy_file(source, &dest.join(name))
    }
}

fn copy_dir_contents(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .map_err(|e| Error::io(format!("failed to create {}", dest.display()), e))?;
    let entries = fs::read_dir(source)
        .map_err(|e| Error::io(format!("failed to read {}", source.display()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::io(format!("failed to read {}", source.display()), e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_dir_contents(&from, &to)?;
        } else {
            copy_file(&from, &to)?;
        }
    }
    Ok(())
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map_err(|e| {
        Error::io(
            format!("failed to copy {} to {}", from.display(), to.display()),
            e,
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> Vec<String> {
        vec!["png".to_string()]
    }

    #[test]
    fn mirror_strips_image_extension_once() {
        let path = mirror_path(
            Path::new("/in/com/acme/Main.java.png"),
            Path::new("/in"),
            &png(),
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("com/acme/Main.java"));

        let path = mirror_path(Path::new("/in/a.png.png"), Path::new("/in"), &png()).unwrap();
        assert_eq!(path, PathBuf::from("a.png"));
    }

    #[test]
    fn mirror_keeps_other_extensions() {
        let path = mirror_path(Path::new("/in/Util.java"), Path::new("/in"), &png()).unwrap();
        assert_eq!(path, PathBuf::from("Util.java"));
    }

    #[test]
    fn mirror_never_climbs_out_of_the_tree() {
        let path =
            mirror_path(Path::new("/in/../../x.java.png"), Path::new("/in"), &png()).unwrap();
        assert_eq!(path, PathBuf::from("x.java"));

        let path = mirror_path(Path::new("/in/a/../../b/Main.java.png"), Path::new("/in"), &png())
            .unwrap();
        assert_eq!(path, PathBuf::from("Main.java"));
    }

    #[test]
    fn mirror_outside_root_uses_file_name() {
        let path = mirror_path(Path::new("/elsewhere/x/Main.java.PNG"), Path::new("/in"), &png())
            .unwrap();
        assert_eq!(path, PathBuf::from("Main.java"));
    }

    #[test]
    fn source_tree_is_unique_and_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let a = SourceTree::create_in(base.path()).unwrap();
        let b = SourceTree::create_in(base.path()).unwrap();
        assert_ne!(a.root(), b.root());
        assert!(a.src().is_dir());
        assert!(
            a.root()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("easel_")
        );

        let units = vec![SourceUnit::new("/in/pkg/Main.java.png", "class Main {}")];
        let written = a.write_units(&units, Path::new("/in"), &png()).unwrap();
        assert_eq!(written, vec![a.src().join("pkg/Main.java")]);
        assert_eq!(fs::read_to_string(&written[0]).unwrap(), "class Main {}");

        let root = a.root().to_path_buf();
        drop(a);
        assert!(!root.exists());
    }

    #[test]
    fn recreate_dir_empties_existing_directory() {
        let base = tempfile::tempdir().unwrap();
        let out = base.path().join("out");
        fs::create_dir_all(out.join("stale")).unwrap();
        fs::write(out.join("stale/Old.class"), b"x").unwrap();

        recreate_dir(&out).unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn remove_missing_file_is_ok() {
        let base = tempfile::tempdir().unwrap();
        remove_file_if_exists(&base.path().join("missing.jar")).unwrap();
    }

    #[test]
    fn copies_resource_directory_recursively_and_single_files() {
        let base = tempfile::tempdir().unwrap();
        let res = base.path().join("res");
        fs::create_dir_all(res.join("img")).unwrap();
        fs::write(res.join("config.properties"), b"a=1").unwrap();
        fs::write(res.join("img/logo.bin"), b"\x00\x01").unwrap();
        let single = base.path().join("notes.txt");
        fs::write(&single, b"hi").unwrap();

        let out = base.path().join("out");
        copy_resources(&res, &out).unwrap();
        copy_resources(&single, &out).unwrap();

        assert_eq!(fs::read(out.join("config.properties")).unwrap(), b"a=1");
        assert_eq!(fs::read(out.join("img/logo.bin")).unwrap(), b"\x00\x01");
        assert_eq!(fs::read(out.join("notes.txt")).unwrap(), b"hi");
    }
}
