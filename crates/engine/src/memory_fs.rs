use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Mutex, MutexGuard};

use store::Namespace;

use crate::error::FsError;
use crate::fs::{FileSystem, FsResult, SyncDirection, path_components};

/// In-memory file tree, optionally persisted to a store namespace.
///
/// Only the subtree under the mount point is persisted. Keys are paths
/// relative to the mount, directories end in `/` and carry no content.
#[derive(Debug)]
pub struct MemoryFs {
    root: Mutex<Node>,
    persist: Option<Persist>,
}

#[derive(Debug)]
struct Persist {
    mount: String,
    namespace: Namespace,
}

#[derive(Debug)]
enum Node {
    File(Vec<u8>),
    Directory(BTreeMap<String, Node>),
}

impl Node {
    fn directory() -> Self {
        Node::Directory(BTreeMap::new())
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Node::directory()),
            persist: None,
        }
    }

    /// A tree whose `mount` subtree syncs with `namespace`.
    pub fn persistent(mount: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            root: Mutex::new(Node::directory()),
            persist: Some(Persist {
                mount: mount.into(),
                namespace,
            }),
        }
    }

    pub fn mount(&self) -> Option<&str> {
        self.persist.as_ref().map(|persist| persist.mount.as_str())
    }

    fn lock(&self) -> MutexGuard<'_, Node> {
        self.root.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn load(&self, persist: &Persist) -> FsResult<()> {
        let entries = persist
            .namespace
            .entries()
            .map_err(|err| FsError::Sync(err.to_string()))?;
        let mount = path_components(&persist.mount)?;

        let mut root = self.lock();
        let subtree = ensure_dir(&mut root, &mount, &persist.mount)?;
        *subtree = Node::directory();
        for (key, value) in entries {
            let relative = path_components(&key)?;
            if relative.is_empty() {
                continue;
            }
            if key.ends_with('/') {
                ensure_dir(subtree, &relative, &key)?;
            } else {
                let (name, parents) = relative
                    .split_last()
                    .ok_or_else(|| FsError::NotFound(key.clone()))?;
                let parent = ensure_dir(subtree, parents, &key)?;
                as_dir_mut(parent, &key)?.insert(name.clone(), Node::File(value));
            }
        }
        tracing::debug!("loaded {} from {}", persist.mount, persist.namespace.name());
        Ok(())
    }

    fn flush(&self, persist: &Persist) -> FsResult<()> {
        let mount = path_components(&persist.mount)?;
        let mut entries = Vec::new();
        {
            let root = self.lock();
            if let Ok(subtree) = get_node(&root, &mount, &persist.mount) {
                collect_entries(subtree, String::new(), &mut entries);
            }
        }
        let written = persist
            .namespace
            .replace_all(entries.iter().map(|(key, value)| (key.as_str(), value.as_slice())))
            .map_err(|err| FsError::Sync(err.to_string()))?;
        tracing::debug!("flushed {} entries from {}", written, persist.mount);
        Ok(())
    }
}

impl FileSystem for MemoryFs {
    fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let components = path_components(path)?;
        let root = self.lock();
        match get_node(&root, &components, path)? {
            Node::File(data) => Ok(data.clone()),
            Node::Directory(_) => Err(FsError::IsADirectory(path.to_string())),
        }
    }

    fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let components = path_components(path)?;
        let (name, parents) = components
            .split_last()
            .ok_or_else(|| FsError::IsADirectory(path.to_string()))?;
        let mut root = self.lock();
        let parent = get_node_mut(&mut root, parents, path)?;
        let children = as_dir_mut(parent, path)?;
        match children.get_mut(name) {
            Some(Node::File(contents)) => {
                contents.clear();
                contents.extend_from_slice(data);
            }
            Some(Node::Directory(_)) => return Err(FsError::IsADirectory(path.to_string())),
            None => {
                children.insert(name.clone(), Node::File(data.to_vec()));
            }
        }
        Ok(())
    }

    fn create_dir_all(&self, path: &str) -> FsResult<()> {
        let components = path_components(path)?;
        let mut root = self.lock();
        ensure_dir(&mut root, &components, path)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        let Ok(components) = path_components(path) else {
            return false;
        };
        let root = self.lock();
        get_node(&root, &components, path).is_ok()
    }

    fn sync(&self, direction: SyncDirection) -> FsResult<()> {
        let Some(persist) = &self.persist else {
            return Ok(());
        };
        match direction {
            SyncDirection::Load => self.load(persist),
            SyncDirection::Flush => self.flush(persist),
        }
    }
}

fn collect_entries(node: &Node, prefix: String, out: &mut Vec<(String, Vec<u8>)>) {
    let Node::Directory(children) = node else {
        return;
    };
    for (name, child) in children {
        match child {
            Node::File(data) => out.push((format!("{}{}", prefix, name), data.clone())),
            Node::Directory(_) => {
                let dir = format!("{}{}/", prefix, name);
                out.push((dir.clone(), Vec::new()));
                collect_entries(child, dir, out);
            }
        }
    }
}

fn ensure_dir<'a>(node: &'a mut Node, components: &[String], path: &str) -> FsResult<&'a mut Node> {
    let mut current = node;
    for component in components {
        let children = as_dir_mut(current, path)?;
        current = match children.entry(component.clone()) {
            Entry::Occupied(entry) => {
                if !matches!(entry.get(), Node::Directory(_)) {
                    return Err(FsError::NotADirectory(path.to_string()));
                }
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(Node::directory()),
        };
    }
    Ok(current)
}

fn get_node<'a>(node: &'a Node, components: &[String], path: &str) -> FsResult<&'a Node> {
    let mut current = node;
    for component in components {
        match current {
            Node::Directory(children) => {
                current = children
                    .get(component)
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            }
            Node::File(_) => return Err(FsError::NotADirectory(path.to_string())),
        }
    }
    Ok(current)
}

fn get_node_mut<'a>(node: &'a mut Node, components: &[String], path: &str) -> FsResult<&'a mut Node> {
    let mut current = node;
    for component in components {
        match current {
            Node::Directory(children) => {
                current = children
                    .get_mut(component)
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            }
            Node::File(_) => return Err(FsError::NotADirectory(path.to_string())),
        }
    }
    Ok(current)
}

fn as_dir_mut<'a>(node: &'a mut Node, path: &str) -> FsResult<&'a mut BTreeMap<String, Node>> {
    match node {
        Node::Directory(children) => Ok(children),
        Node::File(_) => Err(FsError::NotADirectory(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::Store;

    #[test]
    fn write_requires_parent_directory() {
        let fs = MemoryFs::new();
        assert_eq!(
            fs.write_file("/www/index.php", b"<?php"),
            Err(FsError::NotFound("/www/index.php".to_string()))
        );
        fs.create_dir_all("/www").unwrap();
        fs.write_file("/www/index.php", b"<?php").unwrap();
        fs.write_file("/www/index.php", b"<?php echo 1;").unwrap();
        assert_eq!(fs.read_file("/www/index.php").unwrap(), b"<?php echo 1;");
        assert!(fs.exists("/www"));
        assert!(!fs.exists("/www/missing.php"));
    }

    #[test]
    fn directories_and_files_do_not_overlap() {
        let fs = MemoryFs::new();
        fs.create_dir_all("/www/app").unwrap();
        assert_eq!(
            fs.write_file("/www/app", b"x"),
            Err(FsError::IsADirectory("/www/app".to_string()))
        );
        fs.write_file("/www/file", b"x").unwrap();
        assert_eq!(
            fs.create_dir_all("/www/file/sub"),
            Err(FsError::NotADirectory("/www/file/sub".to_string()))
        );
    }

    #[test]
    fn flush_then_load_restores_the_mount() {
        let store = Store::in_memory().unwrap();
        let namespace = store.namespace("/www");

        let first = MemoryFs::persistent("/www", namespace.clone());
        first.create_dir_all("/www/lib").unwrap();
        first.write_file("/www/index.php", b"<?php echo 'hi';").unwrap();
        first.write_file("/www/lib/util.php", b"<?php").unwrap();
        first.create_dir_all("/tmp").unwrap();
        first.write_file("/tmp/scratch", b"not persisted").unwrap();
        first.sync(SyncDirection::Flush).unwrap();

        let keys: Vec<String> = namespace.entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["index.php", "lib/", "lib/util.php"]);

        let second = MemoryFs::persistent("/www", namespace);
        second.sync(SyncDirection::Load).unwrap();
        assert_eq!(second.read_file("/www/index.php").unwrap(), b"<?php echo 'hi';");
        assert!(second.exists("/www/lib"));
        assert!(!second.exists("/tmp/scratch"));
    }

    #[test]
    fn load_replaces_unflushed_changes() {
        let store = Store::in_memory().unwrap();
        let fs = MemoryFs::persistent("/www", store.namespace("/www"));
        fs.create_dir_all("/www").unwrap();
        fs.write_file("/www/draft.php", b"x").unwrap();
        fs.sync(SyncDirection::Load).unwrap();
        assert!(!fs.exists("/www/draft.php"));
        assert!(fs.exists("/www"));
    }

    #[test]
    fn unbound_sync_is_a_no_op() {
        let fs = MemoryFs::new();
        fs.sync(SyncDirection::Flush).unwrap();
        fs.sync(SyncDirection::Load).unwrap();
        assert_eq!(fs.mount(), None);
    }
}
