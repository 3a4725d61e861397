use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use git2::{Commit, Index, IndexEntry, IndexTime, ObjectType, Oid, Repository, Signature, Tree};

use crate::errors::{Error, Result};
use crate::fs::{FileInfo, Filesystem, clean_path};

#[derive(Debug, Clone)]
enum Change {
    Write(Vec<u8>),
    Remove,
}

/// Filesystem view of one commit's tree.
///
/// Reads come from the tree; writes and removals accumulate in an overlay
/// and become a new commit through `commit`.
pub(crate) struct TreeFilesystem<'r> {
    repo: &'r Repository,
    base: Option<Commit<'r>>,
    tree: Option<Tree<'r>>,
    overlay: RefCell<BTreeMap<String, Change>>,
    writable: bool,
}

impl<'r> TreeFilesystem<'r> {
    /// Read-only view of `commit`.
    pub(crate) fn read_only(repo: &'r Repository, commit: Oid) -> Result<Self> {
        Self::open(repo, Some(commit), false)
    }

    /// Writable view atop `base`, or atop an empty tree when `None`.
    pub(crate) fn writable(repo: &'r Repository, base: Option<Oid>) -> Result<Self> {
        Self::open(repo, base, true)
    }

    fn open(repo: &'r Repository, base: Option<Oid>, writable: bool) -> Result<Self> {
        let (base, tree) = match base {
            Some(oid) => {
                let commit = repo.find_commit(oid)?;
                let tree = commit.tree()?;
                (Some(commit), Some(tree))
            }
            None => (None, None),
        };
        Ok(Self {
            repo,
            base,
            tree,
            overlay: RefCell::new(BTreeMap::new()),
            writable,
        })
    }

    /// Write the overlay as a commit on top of the base.
    ///
    /// Fails with `NoChange` when the resulting tree equals the base tree.
    /// No reference is moved; the caller decides where the commit goes.
    pub(crate) fn commit(&self, signature: &Signature<'_>, message: &str) -> Result<Oid> {
        let mut index = Index::new()?;
        if let Some(tree) = &self.tree {
            index.read_tree(tree)?;
        }

        let overlay = self.overlay.borrow();
        for (path, change) in overlay.iter() {
            if matches!(change, Change::Remove) {
                index.remove_path(Path::new(path))?;
                index.remove_dir(Path::new(path), 0)?;
            }
        }
        for (path, change) in overlay.iter() {
            if let Change::Write(data) = change {
                let blob = self.repo.blob(data)?;
                index.add(&IndexEntry {
                    ctime: IndexTime::new(0, 0),
                    mtime: IndexTime::new(0, 0),
                    dev: 0,
                    ino: 0,
                    mode: 0o100644,
                    uid: 0,
                    gid: 0,
                    file_size: data.len() as u32,
                    id: blob,
                    flags: (path.len() & 0xfff) as u16,
                    flags_extended: 0,
                    path: path.as_bytes().to_vec(),
                })?;
            }
        }

        let tree_id = index.write_tree_to(self.repo)?;
        if self.tree.as_ref().map(|t| t.id()) == Some(tree_id) {
            return Err(Error::NoChange("commit produced an identical tree".into()));
        }

        let tree = self.repo.find_tree(tree_id)?;
        let parents: Vec<&Commit<'_>> = self.base.iter().collect();
        let oid = self
            .repo
            .commit(None, signature, signature, message, &tree, &parents)?;
        Ok(oid)
    }

    fn ensure_writable(&self) -> io::Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "filesystem is read-only",
            ))
        }
    }

    /// Whether `path` or one of its ancestors was removed in the overlay.
    fn removed(&self, path: &str) -> bool {
        let overlay = self.overlay.borrow();
        let mut current = path;
        loop {
            if matches!(overlay.get(current), Some(Change::Remove)) {
                return true;
            }
            match current.rfind('/') {
                Some(idx) => current = &current[..idx],
                None => return false,
            }
        }
    }

    /// Whether any overlay write lives below directory `dir`.
    fn overlay_has_children(&self, dir: &str) -> bool {
        let prefix = format!("{dir}/");
        self.overlay
            .borrow()
            .iter()
            .any(|(p, c)| matches!(c, Change::Write(_)) && p.starts_with(&prefix))
    }

    fn tree_entry(&self, path: &str) -> Option<(ObjectType, Oid)> {
        let tree = self.tree.as_ref()?;
        let entry = tree.get_path(Path::new(path)).ok()?;
        Some((entry.kind()?, entry.id()))
    }

    fn base_kind(&self, path: &str) -> Option<ObjectType> {
        if self.removed(path) {
            return None;
        }
        self.tree_entry(path).map(|(kind, _)| kind)
    }
}

fn name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path}: no such file"))
}

fn git_io(e: git2::Error) -> io::Error {
    io::Error::other(e)
}

impl Filesystem for TreeFilesystem<'_> {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let path = clean_path(path)?;
        if let Some(Change::Write(data)) = self.overlay.borrow().get(&path) {
            return Ok(data.clone());
        }
        if self.removed(&path) {
            return Err(not_found(&path));
        }
        match self.tree_entry(&path) {
            Some((ObjectType::Blob, id)) => {
                let blob = self.repo.find_blob(id).map_err(git_io)?;
                Ok(blob.content().to_vec())
            }
            Some(_) => Err(io::Error::other(format!("{path}: is a directory"))),
            None => Err(not_found(&path)),
        }
    }

    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        self.ensure_writable()?;
        let path = clean_path(path)?;
        if path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot write to the root directory",
            ));
        }
        self.overlay
            .borrow_mut()
            .insert(path, Change::Write(contents.to_vec()));
        Ok(())
    }

    fn stat(&self, path: &str) -> io::Result<FileInfo> {
        let path = clean_path(path)?;
        if path.is_empty() {
            return Ok(FileInfo {
                name: String::new(),
                size: 0,
                is_dir: true,
            });
        }
        if let Some(Change::Write(data)) = self.overlay.borrow().get(&path) {
            return Ok(FileInfo {
                name: name_of(&path),
                size: data.len() as u64,
                is_dir: false,
            });
        }
        if self.overlay_has_children(&path) {
            return Ok(FileInfo {
                name: name_of(&path),
                size: 0,
                is_dir: true,
            });
        }
        if self.removed(&path) {
            return Err(not_found(&path));
        }
        match self.tree_entry(&path) {
            Some((ObjectType::Blob, id)) => {
                let blob = self.repo.find_blob(id).map_err(git_io)?;
                Ok(FileInfo {
                    name: name_of(&path),
                    size: blob.size() as u64,
                    is_dir: false,
                })
            }
            Some(_) => Ok(FileInfo {
                name: name_of(&path),
                size: 0,
                is_dir: true,
            }),
            None => Err(not_found(&path)),
        }
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.ensure_writable()?;
        let path = clean_path(path)?;
        if path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot remove the root directory",
            ));
        }
        if !self.exists(&path)? {
            return Err(not_found(&path));
        }

        let in_base = self.base_kind(&path).is_some();
        let prefix = format!("{path}/");
        let mut overlay = self.overlay.borrow_mut();
        overlay.retain(|p, _| p != &path && !p.starts_with(&prefix));
        if in_base {
            overlay.insert(path, Change::Remove);
        }
        Ok(())
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        let path = clean_path(path)?;
        let info = self.stat(&path)?;
        if !info.is_dir {
            return Err(io::Error::other(format!("{path}: not a directory")));
        }

        let mut entries: BTreeMap<String, FileInfo> = BTreeMap::new();

        let dir_removed = !path.is_empty() && self.removed(&path);
        if !dir_removed && let Some(root) = &self.tree {
            let subtree = if path.is_empty() {
                Some(root.clone())
            } else {
                match self.tree_entry(&path) {
                    Some((ObjectType::Tree, id)) => Some(self.repo.find_tree(id).map_err(git_io)?),
                    _ => None,
                }
            };
            if let Some(subtree) = subtree {
                for entry in subtree.iter() {
                    let Some(name) = entry.name() else { continue };
                    let is_dir = entry.kind() == Some(ObjectType::Tree);
                    let size = if is_dir {
                        0
                    } else {
                        self.repo.find_blob(entry.id()).map_err(git_io)?.size() as u64
                    };
                    entries.insert(
                        name.to_string(),
                        FileInfo {
                            name: name.to_string(),
                            size,
                            is_dir,
                        },
                    );
                }
            }
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        for (p, change) in self.overlay.borrow().iter() {
            let Some(rest) = p.strip_prefix(&prefix) else {
                continue;
            };
            match (rest.split_once('/'), change) {
                (Some((dir, _)), Change::Write(_)) => {
                    entries.insert(
                        dir.to_string(),
                        FileInfo {
                            name: dir.to_string(),
                            size: 0,
                            is_dir: true,
                        },
                    );
                }
                (None, Change::Write(data)) => {
                    entries.insert(
                        rest.to_string(),
                        FileInfo {
                            name: rest.to_string(),
                            size: data.len() as u64,
                            is_dir: false,
                        },
                    );
                }
                (None, Change::Remove) => {
                    entries.remove(rest);
                }
                (Some(_), Change::Remove) => {}
            }
        }

        Ok(entries.into_values().collect())
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        self.ensure_writable()?;
        clean_path(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    fn sig() -> Signature<'static> {
        Signature::now("glu test", "test@glu.dev").unwrap()
    }

    #[test]
    fn test_writes_become_a_commit_readable_by_a_fresh_view() {
        let (_dir, repo) = repo();
        let fs = TreeFilesystem::writable(&repo, None).unwrap();
        fs.write("env/staging/app.json", b"{\"digest\":\"a\"}").unwrap();
        fs.write("README.md", b"# hello").unwrap();
        let first = fs.commit(&sig(), "seed").unwrap();

        let view = TreeFilesystem::read_only(&repo, first).unwrap();
        assert_eq!(view.read_to_string("README.md").unwrap(), "# hello");
        assert!(view.stat("env").unwrap().is_dir);
        let names: Vec<_> = view
            .read_dir("env/staging")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["app.json"]);

        let err = view.write("x", b"y").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_identical_tree_is_no_change() {
        let (_dir, repo) = repo();
        let fs = TreeFilesystem::writable(&repo, None).unwrap();
        fs.write("a.txt", b"a").unwrap();
        let first = fs.commit(&sig(), "seed").unwrap();

        let fs = TreeFilesystem::writable(&repo, Some(first)).unwrap();
        fs.write("a.txt", b"a").unwrap();
        let err = fs.commit(&sig(), "again").unwrap_err();
        assert!(err.is_no_change());
    }

    #[test]
    fn test_removals_and_overlay_reads() {
        let (_dir, repo) = repo();
        let fs = TreeFilesystem::writable(&repo, None).unwrap();
        fs.write("dir/one.txt", b"1").unwrap();
        fs.write("dir/two.txt", b"2").unwrap();
        fs.write("keep.txt", b"k").unwrap();
        let first = fs.commit(&sig(), "seed").unwrap();

        let fs = TreeFilesystem::writable(&repo, Some(first)).unwrap();
        fs.remove("dir").unwrap();
        assert!(!fs.exists("dir/one.txt").unwrap());
        fs.write("dir/three.txt", b"3").unwrap();
        let second = fs.commit(&sig(), "replace dir").unwrap();

        let view = TreeFilesystem::read_only(&repo, second).unwrap();
        let names: Vec<_> = view
            .read_dir("dir")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["three.txt"]);
        assert_eq!(view.read("keep.txt").unwrap(), b"k");

        let parent = repo.find_commit(second).unwrap().parent_id(0).unwrap();
        assert_eq!(parent, first);
    }

    #[test]
    fn test_removing_missing_path_is_not_found() {
        let (_dir, repo) = repo();
        let fs = TreeFilesystem::writable(&repo, None).unwrap();
        let err = fs.remove("nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
