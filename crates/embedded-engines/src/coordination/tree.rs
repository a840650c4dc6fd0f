//! Hierarchical node store backing the coordination service.

use super::protocol::CoordinationErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A single node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Znode {
    /// Payload
    pub data: String,
    /// Number of payload replacements
    pub version: u32,
    /// Creation time
    pub ctime: DateTime<Utc>,
    /// Last modification time
    pub mtime: DateTime<Utc>,
    /// Owning session for ephemeral nodes
    #[serde(skip)]
    pub ephemeral_owner: Option<u64>,
}

impl Znode {
    fn new(data: String, ephemeral_owner: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            data,
            version: 0,
            ctime: now,
            mtime: now,
            ephemeral_owner,
        }
    }
}

type TreeResult<T> = std::result::Result<T, CoordinationErrorCode>;

/// Node tree with optional JSON snapshot of its persistent nodes
pub struct ZnodeTree {
    nodes: BTreeMap<String, Znode>,
    snapshot: Option<PathBuf>,
    zxid: u64,
}

impl ZnodeTree {
    /// Create an empty, memory-only tree
    pub fn in_memory() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Znode::new(String::new(), None));
        Self {
            nodes,
            snapshot: None,
            zxid: 0,
        }
    }

    /// Open a tree backed by a snapshot file, loading it when present
    pub fn open(snapshot: PathBuf) -> std::io::Result<Self> {
        let mut tree = Self::in_memory();

        if snapshot.exists() {
            let raw = std::fs::read_to_string(&snapshot)?;
            let stored: BTreeMap<String, Znode> = serde_json::from_str(&raw)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            debug!("Loaded {} nodes from {:?}", stored.len(), snapshot);
            tree.nodes.extend(stored);
        }

        tree.snapshot = Some(snapshot);
        Ok(tree)
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only the root exists
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Number of ephemeral nodes
    pub fn ephemeral_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.ephemeral_owner.is_some())
            .count()
    }

    /// Ephemeral node paths grouped by owning session
    pub fn ephemerals_by_session(&self) -> BTreeMap<u64, Vec<String>> {
        let mut sessions: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for (path, node) in &self.nodes {
            if let Some(owner) = node.ephemeral_owner {
                sessions.entry(owner).or_default().push(path.clone());
            }
        }
        sessions
    }

    /// Last transaction id
    pub fn zxid(&self) -> u64 {
        self.zxid
    }

    /// Create a node, creating missing parents as persistent empty nodes
    pub fn create(&mut self, path: &str, data: String, owner: Option<u64>) -> TreeResult<()> {
        validate_path(path)?;
        if self.nodes.contains_key(path) {
            return Err(CoordinationErrorCode::NodeExists);
        }

        let mut persistent_change = owner.is_none();
        for parent in ancestors(path) {
            if !self.nodes.contains_key(parent) {
                self.nodes
                    .insert(parent.to_string(), Znode::new(String::new(), None));
                persistent_change = true;
            }
        }

        self.nodes.insert(path.to_string(), Znode::new(data, owner));
        self.zxid += 1;
        if persistent_change {
            self.persist();
        }
        Ok(())
    }

    /// Read a node
    pub fn get(&self, path: &str) -> TreeResult<&Znode> {
        validate_path(path)?;
        self.nodes.get(path).ok_or(CoordinationErrorCode::NoNode)
    }

    /// Replace a node's payload
    pub fn set(&mut self, path: &str, data: String) -> TreeResult<()> {
        validate_path(path)?;
        let node = self
            .nodes
            .get_mut(path)
            .ok_or(CoordinationErrorCode::NoNode)?;

        node.data = data;
        node.version += 1;
        node.mtime = Utc::now();
        let persistent = node.ephemeral_owner.is_none();

        self.zxid += 1;
        if persistent {
            self.persist();
        }
        Ok(())
    }

    /// Delete a childless node
    pub fn delete(&mut self, path: &str) -> TreeResult<()> {
        validate_path(path)?;
        if path == "/" {
            return Err(CoordinationErrorCode::BadArguments);
        }
        if !self.nodes.contains_key(path) {
            return Err(CoordinationErrorCode::NoNode);
        }
        if !self.child_names(path).is_empty() {
            return Err(CoordinationErrorCode::NotEmpty);
        }

        let removed = self.nodes.remove(path);
        self.zxid += 1;
        if removed.is_some_and(|n| n.ephemeral_owner.is_none()) {
            self.persist();
        }
        Ok(())
    }

    /// Direct children of a node, sorted
    pub fn children(&self, path: &str) -> TreeResult<Vec<String>> {
        validate_path(path)?;
        if !self.nodes.contains_key(path) {
            return Err(CoordinationErrorCode::NoNode);
        }
        Ok(self.child_names(path))
    }

    /// Whether a node exists
    pub fn exists(&self, path: &str) -> TreeResult<bool> {
        validate_path(path)?;
        Ok(self.nodes.contains_key(path))
    }

    /// Remove every ephemeral node owned by a session, returning their paths
    pub fn expire_session(&mut self, session: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        for path in &expired {
            self.nodes.remove(path);
        }
        if !expired.is_empty() {
            self.zxid += 1;
        }
        expired
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };

        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn persist(&self) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };

        if let Err(e) = write_snapshot(snapshot, &self.nodes) {
            warn!("Failed to write coordination snapshot {:?}: {}", snapshot, e);
        }
    }
}

fn write_snapshot(snapshot: &Path, nodes: &BTreeMap<String, Znode>) -> std::io::Result<()> {
    let persistent: BTreeMap<&String, &Znode> = nodes
        .iter()
        .filter(|(path, node)| path.as_str() != "/" && node.ephemeral_owner.is_none())
        .collect();

    if let Some(dir) = snapshot.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let json = serde_json::to_string_pretty(&persistent)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let staging = snapshot.with_extension("tmp");
    std::fs::write(&staging, json)?;
    std::fs::rename(staging, snapshot)
}

fn validate_path(path: &str) -> TreeResult<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(CoordinationErrorCode::BadArguments);
    }
    Ok(())
}

/// Proper ancestors of a path, shallowest first, root excluded
fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .map(|(index, _)| &path[..index])
        .filter(|prefix| !prefix.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_with_parents() {
        let mut tree = ZnodeTree::in_memory();
        tree.create("/brokers/ids/0", "{}".to_string(), None).unwrap();

        assert!(tree.exists("/brokers").unwrap());
        assert!(tree.exists("/brokers/ids").unwrap());
        assert_eq!(tree.children("/brokers/ids").unwrap(), vec!["0"]);
        assert_eq!(tree.children("/").unwrap(), vec!["brokers"]);
        assert_eq!(
            tree.create("/brokers/ids/0", String::new(), None),
            Err(CoordinationErrorCode::NodeExists)
        );
    }

    #[test]
    fn test_children_are_direct_only() {
        let mut tree = ZnodeTree::in_memory();
        tree.create("/brokers/topics/a", String::new(), None).unwrap();
        tree.create("/brokers/topics/b", String::new(), None).unwrap();
        tree.create("/brokers/topics/b/partitions", String::new(), None)
            .unwrap();
        tree.create("/brokers/topicsx", String::new(), None).unwrap();

        assert_eq!(tree.children("/brokers/topics").unwrap(), vec!["a", "b"]);
        assert_eq!(
            tree.children("/missing"),
            Err(CoordinationErrorCode::NoNode)
        );
    }

    #[test]
    fn test_set_and_delete() {
        let mut tree = ZnodeTree::in_memory();
        tree.create("/config/topics/t", "{}".to_string(), None).unwrap();
        tree.set("/config/topics/t", "{\"a\":\"b\"}".to_string())
            .unwrap();

        let node = tree.get("/config/topics/t").unwrap();
        assert_eq!(node.version, 1);
        assert_eq!(node.data, "{\"a\":\"b\"}");

        assert_eq!(
            tree.delete("/config/topics"),
            Err(CoordinationErrorCode::NotEmpty)
        );
        tree.delete("/config/topics/t").unwrap();
        assert!(!tree.exists("/config/topics/t").unwrap());
        assert_eq!(tree.delete("/"), Err(CoordinationErrorCode::BadArguments));
    }

    #[test]
    fn test_expire_session_removes_ephemerals() {
        let mut tree = ZnodeTree::in_memory();
        tree.create("/brokers/ids/0", String::new(), Some(7)).unwrap();
        tree.create("/brokers/ids/1", String::new(), Some(8)).unwrap();
        assert_eq!(tree.ephemeral_count(), 2);

        let expired = tree.expire_session(7);
        assert_eq!(expired, vec!["/brokers/ids/0"]);
        assert_eq!(tree.children("/brokers/ids").unwrap(), vec!["1"]);
        assert!(tree.exists("/brokers/ids").unwrap());
    }

    #[test]
    fn test_bad_paths() {
        let mut tree = ZnodeTree::in_memory();
        for path in ["relative", "/trailing/", "/double//slash"] {
            assert_eq!(
                tree.create(path, String::new(), None),
                Err(CoordinationErrorCode::BadArguments)
            );
        }
    }

    #[test]
    fn test_snapshot_keeps_only_persistent_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("version-2").join("snapshot.json");

        {
            let mut tree = ZnodeTree::open(snapshot.clone()).unwrap();
            tree.create("/brokers/topics/basic01", "{}".to_string(), None)
                .unwrap();
            tree.create("/brokers/ids/0", String::new(), Some(1)).unwrap();
        }

        let reopened = ZnodeTree::open(snapshot).unwrap();
        assert!(reopened.exists("/brokers/topics/basic01").unwrap());
        assert!(reopened.exists("/brokers/ids").unwrap());
        assert!(!reopened.exists("/brokers/ids/0").unwrap());
    }
}
