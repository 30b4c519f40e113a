//! Path resolution: walks path components from the current
//! root (or per-component override for absolute paths), following mount
//! points downward, following symlinks up to a 64-link limit, handling
//! `.` and `..` (with `..` at a mount root crossing back to the covering
//! directory). The walk yields the terminal node and its parent
//! directory.

use super::{node::NodeKind, Node, VfsError, MAX_SYMLINKS};
use alloc::{sync::Arc, vec::Vec};

pub struct ResolvedPath {
    pub node: Arc<Node>,
    pub parent: Arc<Node>,
}

/// Enters `child` if it has a filesystem mounted over it, descending
/// into the mounted superblock's root.
fn enter_mounts(child: Arc<Node>) -> Arc<Node> {
    match child.mounted_fs() {
        Some(sb) => sb.root(),
        None => child,
    }
}

pub fn resolve(root: &Arc<Node>, cwd: &Arc<Node>, path: &str) -> Result<ResolvedPath, VfsError> {
    if path.is_empty() {
        return Err(VfsError::InvalidPath);
    }
    let mut symlinks = 0u32;
    let start = if path.starts_with('/') { root.clone() } else { cwd.clone() };
    walk(root, start, path, &mut symlinks)
}

fn walk(
    root: &Arc<Node>,
    start: Arc<Node>,
    path: &str,
    symlinks: &mut u32,
) -> Result<ResolvedPath, VfsError> {
    let mut stack: Vec<Arc<Node>> = Vec::new();
    let mut current = enter_mounts(start);
    let mut parent = current.clone();

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let mut idx = 0;
    while idx < components.len() {
        let component = components[idx];
        idx += 1;

        if component == "." {
            continue;
        }
        if component == ".." {
            // A mounted root's covering directory is exactly what got
            // pushed onto `stack` when we descended into it, so no
            // separate mount-boundary special case is needed.
            if let Some(prev) = stack.pop() {
                parent = stack.last().cloned().unwrap_or_else(|| prev.clone());
                current = prev;
            }
            continue;
        }

        if !current.is_directory() {
            return Err(VfsError::NotADirectory);
        }
        let child = current.lookup(component)?;
        let child = enter_mounts(child);

        if child.kind == NodeKind::Symlink {
            *symlinks += 1;
            if *symlinks > MAX_SYMLINKS {
                return Err(VfsError::SymlinkLoop);
            }
            let target = child.readlink()?;
            let base = if target.starts_with('/') { root.clone() } else { current.clone() };
            let resolved = walk(root, base, &target, symlinks)?;
            // Splice the symlink's resolved node in as if it had been the
            // literal next component, then keep walking any remaining
            // trailing components against it.
            stack.push(current.clone());
            parent = current.clone();
            current = resolved.node;
            continue;
        }

        stack.push(current.clone());
        parent = current;
        current = child;
    }

    Ok(ResolvedPath { node: current, parent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::node::{DirectoryOps, FileOps, NodeAttr, NodeKind, ReaddirCallback};
    use crate::fs::Superblock;
    use alloc::{string::String, sync::Arc};
    use util::mutex::Mutex;

    /// A minimal in-memory directory tree, just enough to exercise the
    /// resolver's own logic independent of any real filesystem.
    struct TestDir {
        entries: Mutex<alloc::vec::Vec<(String, Arc<Node>)>>,
    }

    impl DirectoryOps for TestDir {
        fn lookup(&self, _dir: &Node, name: &str) -> Result<Arc<Node>, VfsError> {
            self.entries
                .lock()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, n)| n.clone())
                .ok_or(VfsError::NotFound)
        }
        fn readdir(&self, _dir: &Node, _offset: u64, _cb: &mut dyn ReaddirCallback) -> Result<(), VfsError> {
            Ok(())
        }
        fn mknode(&self, _dir: &Node, name: &str, kind: NodeKind, mode: u32) -> Result<Arc<Node>, VfsError> {
            let sb = Superblock::new("testfs", 0);
            let node = Node::new(sb.clone(), sb.alloc_ino(), kind, NodeAttr::new(mode), None, None, None);
            self.entries.lock().push((String::from(name), node.clone()));
            Ok(node)
        }
        fn link(&self, _dir: &Node, name: &str, target: &Node) -> Result<(), VfsError> {
            let _ = (name, target);
            Err(VfsError::NotSupported)
        }
        fn unlink(&self, _dir: &Node, name: &str) -> Result<(), VfsError> {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|(n, _)| n != name);
            if entries.len() == before { Err(VfsError::NotFound) } else { Ok(()) }
        }
        fn rmdir(&self, dir: &Node, name: &str) -> Result<(), VfsError> {
            self.unlink(dir, name)
        }
        fn symlink(&self, dir: &Node, name: &str, target: &str) -> Result<Arc<Node>, VfsError> {
            let sb = &dir.superblock;
            let node = Node::new(
                sb.clone(),
                sb.alloc_ino(),
                NodeKind::Symlink,
                NodeAttr::new(0o777),
                None,
                None,
                Some(Arc::new(TestSymlink { target: String::from(target) })),
            );
            self.entries.lock().push((String::from(name), node.clone()));
            Ok(node)
        }
        fn rename(&self, _dir: &Node, _name: &str, _new_dir: &Node, _new_name: &str) -> Result<(), VfsError> {
            Err(VfsError::NotSupported)
        }
    }

    struct TestSymlink {
        target: String,
    }
    impl crate::fs::node::SymlinkOps for TestSymlink {
        fn readlink(&self, _node: &Node) -> Result<String, VfsError> {
            Ok(self.target.clone())
        }
    }

    #[test]
    fn resolves_dot_and_double_dot_literally() {
        let sb = Superblock::new("testfs", 0);
        let root_ops = Arc::new(TestDir { entries: Mutex::new(alloc::vec::Vec::new()) });
        let root = Node::new(sb.clone(), sb.alloc_ino(), NodeKind::Directory, NodeAttr::new(0o755), Some(root_ops.clone()), None, None);
        sb.set_root(root.clone());

        let a_ops = Arc::new(TestDir { entries: Mutex::new(alloc::vec::Vec::new()) });
        let a = Node::new(sb.clone(), sb.alloc_ino(), NodeKind::Directory, NodeAttr::new(0o755), Some(a_ops.clone()), None, None);
        root_ops.entries.lock().push((String::from("a"), a.clone()));

        let b_ops = Arc::new(TestDir { entries: Mutex::new(alloc::vec::Vec::new()) });
        let b = Node::new(sb.clone(), sb.alloc_ino(), NodeKind::Directory, NodeAttr::new(0o755), Some(b_ops.clone()), None, None);
        a_ops.entries.lock().push((String::from("b"), b.clone()));

        let direct = resolve(&root, &root, "/a/b").unwrap();
        let via_dotdot = resolve(&root, &root, "/a/b/../b").unwrap();
        assert!(Arc::ptr_eq(&direct.node, &via_dotdot.node));
    }

    #[test]
    fn symlink_loop_is_rejected() {
        let sb = Superblock::new("testfs", 0);
        let root_ops = Arc::new(TestDir { entries: Mutex::new(alloc::vec::Vec::new()) });
        let root = Node::new(sb.clone(), sb.alloc_ino(), NodeKind::Directory, NodeAttr::new(0o755), Some(root_ops.clone()), None, None);
        sb.set_root(root.clone());

        root.symlink("a", "/b").unwrap();
        root.symlink("b", "/a").unwrap();

        let err = resolve(&root, &root, "/a").unwrap_err();
        assert_eq!(err, VfsError::SymlinkLoop);
    }
}
