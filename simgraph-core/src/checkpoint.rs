//! Checkpoints
//!
//! A checkpoint file is a sequence of MessagePack frames. The first frame is
//! a header describing the structure below a root, together with the
//! parameter values at save time. Each later frame is a snapshot holding one
//! value per parameter path.
//!
//! Nodes are addressed by the path of their first encounter in a pre-order
//! walk from the root, `'/'`-joined from the root's name. A node shared by
//! several parents is recorded once; other parents refer to it by path.
//!
//! ```no_run
//! use simgraph_core::{Checkpoint, Graph, Param};
//!
//! let mut graph = Graph::new();
//! let root = graph.add_module("sim").unwrap();
//! let x = graph.add_param_to(root, Param::builder("x").value(1.0)).unwrap();
//!
//! graph.save_state(root, "run.msgpack", true).unwrap();
//! graph.set_value(x, 2.0).unwrap();
//! graph.append_state(root, "run.msgpack").unwrap();
//!
//! let checkpoint = Checkpoint::open("run.msgpack").unwrap();
//! let history = checkpoint.series("sim/x").unwrap();
//! assert_eq!(history.shape(), &[2]);
//! ```

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::backend::{self, Array};
use crate::error::{CheckpointError, Error, GraphError, Result};
use crate::graph::{Graph, NodeId, NodeKind, SEPARATOR};
use crate::param::{ParamState, ValidRange};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Host copy of an array as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl StoredArray {
    fn from_array(array: &Array) -> Self {
        let (shape, data) = backend::current().to_host(array);
        Self { shape, data }
    }

    fn to_array(&self) -> Result<Array> {
        backend::current().from_host(&self.shape, self.data.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParamRecord {
    state: String,
    value: Option<StoredArray>,
    units: Option<String>,
    cyclic: bool,
    lower: Option<StoredArray>,
    upper: Option<StoredArray>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GroupRecord {
    kind: String,
    /// Child key to the child's path.
    children: IndexMap<String, String>,
    param: Option<ParamRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    version: u32,
    appendable: bool,
    root: String,
    groups: IndexMap<String, GroupRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    values: IndexMap<String, Option<StoredArray>>,
}

/// Structure of a live graph in checkpoint form.
struct Layout {
    root: String,
    paths: IndexMap<String, NodeId>,
    groups: IndexMap<String, GroupRecord>,
}

impl Layout {
    fn header(self, appendable: bool) -> Header {
        Header {
            version: FORMAT_VERSION,
            appendable,
            root: self.root,
            groups: self.groups,
        }
    }

    fn snapshot(&self) -> Snapshot {
        let values = self
            .groups
            .iter()
            .filter_map(|(path, group)| {
                let param = group.param.as_ref()?;
                Some((path.clone(), param.value.clone()))
            })
            .collect();
        Snapshot { values }
    }

    /// First structural difference between the file and the live graph.
    fn mismatch(&self, header: &Header) -> Option<String> {
        if header.root != self.root {
            return Some(format!(
                "file root is \"{}\" but the graph root is \"{}\"",
                header.root, self.root
            ));
        }
        for (path, live) in &self.groups {
            let Some(stored) = header.groups.get(path) else {
                return Some(format!("\"{path}\" is not in the file"));
            };
            if stored.kind != live.kind {
                return Some(format!(
                    "\"{path}\" is a {} in the file but a {} in the graph",
                    stored.kind, live.kind
                ));
            }
            if stored.children != live.children {
                let stored: Vec<&String> = stored.children.keys().collect();
                let live: Vec<&String> = live.children.keys().collect();
                return Some(format!(
                    "children of \"{path}\" differ: file has {stored:?}, graph has {live:?}"
                ));
            }
        }
        header
            .groups
            .keys()
            .find(|path| !self.groups.contains_key(*path))
            .map(|path| format!("\"{path}\" is in the file but not in the graph"))
    }
}

impl Graph {
    fn layout(&self, root: NodeId) -> Result<Layout> {
        let mut layout = Layout {
            root: self.name(root)?.to_string(),
            paths: IndexMap::new(),
            groups: IndexMap::new(),
        };
        let mut seen = HashMap::new();
        self.record(root, layout.root.clone(), &mut seen, &mut layout)?;
        Ok(layout)
    }

    /// Record `id` at `path` unless already seen, returning its path.
    fn record(
        &self,
        id: NodeId,
        path: String,
        seen: &mut HashMap<NodeId, String>,
        layout: &mut Layout,
    ) -> Result<String> {
        if let Some(existing) = seen.get(&id) {
            return Ok(existing.clone());
        }
        seen.insert(id, path.clone());

        let node = self.node(id)?;
        let param = match node.kind() {
            NodeKind::Param => Some(self.param_record(id)?),
            _ => None,
        };
        // Placeholder keeps pre-order positions for the subtree
        layout.paths.insert(path.clone(), id);
        layout.groups.insert(
            path.clone(),
            GroupRecord {
                kind: node.kind().as_str().to_string(),
                children: IndexMap::new(),
                param,
            },
        );

        let mut children = IndexMap::new();
        for (key, child) in node.children() {
            let child_path = format!("{path}{SEPARATOR}{key}");
            let child_path = self.record(*child, child_path, seen, layout)?;
            children.insert(key.clone(), child_path);
        }
        if let Some(group) = layout.groups.get_mut(&path) {
            group.children = children;
        }
        Ok(path)
    }

    fn param_record(&self, id: NodeId) -> Result<ParamRecord> {
        let param = self.param(id)?;
        let value = match param.state() {
            ParamState::Pointer(_) => None,
            _ => param.current().map(StoredArray::from_array),
        };
        Ok(ParamRecord {
            state: param.state().as_str().to_string(),
            value,
            units: param.units().map(str::to_string),
            cyclic: param.cyclic(),
            lower: param.valid().lower.as_ref().map(StoredArray::from_array),
            upper: param.valid().upper.as_ref().map(StoredArray::from_array),
        })
    }

    /// Write a new checkpoint for everything below `root`, replacing `path`.
    pub fn save_state(
        &self,
        root: NodeId,
        path: impl AsRef<Path>,
        appendable: bool,
    ) -> Result<()> {
        let path = path.as_ref();
        let header = self.layout(root)?.header(appendable);
        let bytes = rmp_serde::to_vec_named(&header).map_err(CheckpointError::from)?;
        fs::write(path, bytes).map_err(CheckpointError::from)?;
        tracing::info!(
            path = %path.display(),
            groups = header.groups.len(),
            appendable,
            "saved checkpoint"
        );
        Ok(())
    }

    /// Append the current values below `root` as one more snapshot.
    ///
    /// The file is checked to be appendable and structurally identical to
    /// the graph before anything is written.
    pub fn append_state(&self, root: NodeId, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let checkpoint = Checkpoint::open(path)?;
        if !checkpoint.header.appendable {
            return Err(CheckpointError::NotAppendable(path.to_path_buf()).into());
        }
        let layout = self.layout(root)?;
        if let Some(reason) = layout.mismatch(&checkpoint.header) {
            return Err(GraphError::StructureMismatch(reason).into());
        }

        let bytes = rmp_serde::to_vec_named(&layout.snapshot()).map_err(CheckpointError::from)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(CheckpointError::from)?;
        file.write_all(&bytes).map_err(CheckpointError::from)?;
        tracing::debug!(
            path = %path.display(),
            snapshot = checkpoint.len(),
            "appended checkpoint snapshot"
        );
        Ok(())
    }

    /// Load snapshot `index` from `path` into the graph below `root`.
    ///
    /// Index 0 is the header's values, negative indices count from the
    /// latest snapshot. Static params take the stored value, dynamic params
    /// take it as their default, pointers are left alone. Stored units,
    /// valid ranges and cyclic flags are restored. Every entry is decoded
    /// and checked before the first one is applied, so a rejected load
    /// leaves the graph as it was.
    pub fn load_state(&mut self, root: NodeId, path: impl AsRef<Path>, index: isize) -> Result<()> {
        let path = path.as_ref();
        if self.is_active(root)? {
            return Err(GraphError::Active {
                op: "load state into",
                node: self.name(root)?.to_string(),
            }
            .into());
        }
        let checkpoint = Checkpoint::open(path)?;
        let layout = self.layout(root)?;
        if let Some(reason) = layout.mismatch(&checkpoint.header) {
            return Err(GraphError::StructureMismatch(reason).into());
        }
        let index = checkpoint.resolve(index)?;

        let mut restores = Vec::new();
        for (node_path, id) in &layout.paths {
            if self.kind(*id)? == NodeKind::Param {
                restores.push(self.restore(&checkpoint, node_path, *id, index)?);
            }
        }

        for restore in restores {
            let id = restore.id;
            self.set_units(id, restore.units.as_deref())?;
            if let Some((valid, cyclic)) = restore.valid {
                let param = self.param_mut(id)?;
                param.valid = valid;
                param.cyclic = cyclic;
            }
            let Some(value) = restore.value else {
                continue;
            };
            if self.param(id)?.is_static() {
                self.set_value(id, value)?;
            } else {
                self.set_dynamic_value(id, Some(value))?;
            }
        }

        tracing::info!(path = %path.display(), index, "loaded checkpoint");
        Ok(())
    }

    /// Decode and check what `load_state` will write into one param.
    fn restore(
        &self,
        checkpoint: &Checkpoint,
        node_path: &str,
        id: NodeId,
        index: usize,
    ) -> Result<Restore> {
        let param = self.param(id)?;
        let mut restore = Restore {
            id,
            units: param.units().map(str::to_string),
            valid: None,
            value: None,
        };
        let Some(record) = checkpoint
            .header
            .groups
            .get(node_path)
            .and_then(|group| group.param.as_ref())
        else {
            return Ok(restore);
        };
        restore.units = record.units.clone();
        if param.is_pointer() {
            return Ok(restore);
        }

        let valid = ValidRange::new(
            record.lower.as_ref().map(StoredArray::to_array).transpose()?,
            record.upper.as_ref().map(StoredArray::to_array).transpose()?,
        );
        valid.check(record.cyclic)?;
        restore.valid = Some((valid, record.cyclic));

        if let Some(stored) = checkpoint.stored(node_path, index)? {
            let value = stored.to_array()?;
            if !param.accepts(value.shape()) {
                return Err(Error::ParamConfiguration(format!(
                    "stored value of shape {:?} at \"{node_path}\" does not fit param shape {:?}",
                    value.shape(),
                    param.shape().unwrap_or_default()
                )));
            }
            restore.value = Some(value);
        }
        Ok(restore)
    }
}

/// Everything a load writes into one param.
struct Restore {
    id: NodeId,
    units: Option<String>,
    valid: Option<(ValidRange, bool)>,
    value: Option<Array>,
}

/// A checkpoint file read back into memory.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    header: Header,
    snapshots: Vec<Snapshot>,
}

impl Checkpoint {
    /// Read every frame of a checkpoint file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(CheckpointError::from)?;
        let len = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);

        let header: Header = rmp_serde::from_read(&mut cursor).map_err(CheckpointError::from)?;
        if header.version != FORMAT_VERSION {
            return Err(CheckpointError::Version(header.version).into());
        }
        let mut snapshots = Vec::new();
        while cursor.position() < len {
            let snapshot: Snapshot =
                rmp_serde::from_read(&mut cursor).map_err(CheckpointError::from)?;
            snapshots.push(snapshot);
        }

        Ok(Self {
            path: path.to_path_buf(),
            header,
            snapshots,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored value sets, the header's included.
    pub fn len(&self) -> usize {
        self.snapshots.len() + 1
    }

    /// Whether nothing was appended after the header.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn appendable(&self) -> bool {
        self.header.appendable
    }

    /// Name of the root the file was saved from.
    pub fn root(&self) -> &str {
        &self.header.root
    }

    /// Every stored path, in pre-order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.header.groups.keys().map(String::as_str)
    }

    /// Paths that hold parameters.
    pub fn param_paths(&self) -> impl Iterator<Item = &str> {
        self.header
            .groups
            .iter()
            .filter(|(_, group)| group.param.is_some())
            .map(|(path, _)| path.as_str())
    }

    /// Stored kind of the node at `path`.
    pub fn kind(&self, path: &str) -> Result<NodeKind> {
        let group = self
            .header
            .groups
            .get(path)
            .ok_or_else(|| CheckpointError::UnknownPath(path.to_string()))?;
        NodeKind::parse(&group.kind).ok_or_else(|| {
            Error::Checkpoint(CheckpointError::UnknownPath(format!(
                "{path} (unknown kind \"{}\")",
                group.kind
            )))
        })
    }

    /// Value of the parameter at `path` in snapshot `index`.
    pub fn value(&self, path: &str, index: isize) -> Result<Option<Array>> {
        let index = self.resolve(index)?;
        self.stored(path, index)?
            .map(StoredArray::to_array)
            .transpose()
    }

    /// Every stored value of one parameter, stacked along a leading axis.
    pub fn series(&self, path: &str) -> Result<Array> {
        let mut values = Vec::with_capacity(self.len());
        for index in 0..self.len() {
            let value = self
                .stored(path, index)?
                .ok_or_else(|| Error::MissingValue {
                    name: format!("{path} (snapshot {index})"),
                })?;
            values.push(value.to_array()?);
        }
        Array::stack(&values)
    }

    fn resolve(&self, index: isize) -> Result<usize> {
        let len = self.len();
        let resolved = if index < 0 {
            len.checked_sub(index.unsigned_abs())
        } else {
            Some(index.unsigned_abs()).filter(|i| *i < len)
        };
        resolved.ok_or_else(|| CheckpointError::IndexOutOfRange { index, len }.into())
    }

    fn stored(&self, path: &str, index: usize) -> Result<Option<&StoredArray>> {
        let param = self
            .header
            .groups
            .get(path)
            .and_then(|group| group.param.as_ref())
            .ok_or_else(|| CheckpointError::UnknownPath(path.to_string()))?;
        if index == 0 {
            return Ok(param.value.as_ref());
        }
        let snapshot = self
            .snapshots
            .get(index - 1)
            .ok_or(CheckpointError::IndexOutOfRange {
                index: index as isize,
                len: self.len(),
            })?;
        Ok(snapshot.values.get(path).and_then(Option::as_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Param;

    fn shared_tree(graph: &mut Graph) -> (NodeId, NodeId) {
        let root = graph.add_module("root").unwrap();
        let left = graph.add_module_to(root, "left").unwrap();
        let right = graph.add_module_to(root, "right").unwrap();
        let shared = graph
            .add_param_to(left, Param::builder("shared").value(1.0))
            .unwrap();
        graph.link(right, "alias", shared).unwrap();
        (root, shared)
    }

    #[test]
    fn shared_nodes_use_first_path() {
        let mut graph = Graph::new();
        let (root, _) = shared_tree(&mut graph);
        let layout = graph.layout(root).unwrap();
        let paths: Vec<&str> = layout.groups.keys().map(String::as_str).collect();
        assert_eq!(paths, ["root", "root/left", "root/left/shared", "root/right"]);
        assert_eq!(
            layout.groups["root/right"].children["alias"],
            "root/left/shared"
        );
    }

    #[test]
    fn pointer_params_store_no_value() {
        let mut graph = Graph::new();
        let root = graph.add_module("root").unwrap();
        let a = graph
            .add_param_to(root, Param::builder("a").value(2.0))
            .unwrap();
        graph
            .add_param_to(root, Param::builder("b").value(a))
            .unwrap();
        let layout = graph.layout(root).unwrap();
        let b = layout.groups["root/b"].param.as_ref().unwrap();
        assert_eq!(b.state, "pointer");
        assert!(b.value.is_none());
        assert!(layout.groups["root/a"].param.as_ref().unwrap().value.is_some());
    }

    #[test]
    fn mismatch_names_the_difference() {
        let mut graph = Graph::new();
        let (root, _) = shared_tree(&mut graph);
        let header = graph.layout(root).unwrap().header(true);

        let right = graph.find(root, "right").unwrap();
        graph
            .add_param_to(right, Param::builder("extra").value(0.0))
            .unwrap();
        let reason = graph.layout(root).unwrap().mismatch(&header).unwrap();
        assert!(reason.contains("root/right"), "{reason}");
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let checkpoint = Checkpoint {
            path: PathBuf::new(),
            header: Header {
                version: FORMAT_VERSION,
                appendable: true,
                root: "root".to_string(),
                groups: IndexMap::new(),
            },
            snapshots: vec![
                Snapshot {
                    values: IndexMap::new()
                };
                2
            ],
        };
        assert_eq!(checkpoint.resolve(-1).unwrap(), 2);
        assert_eq!(checkpoint.resolve(-3).unwrap(), 0);
        assert_eq!(checkpoint.resolve(2).unwrap(), 2);
        assert!(checkpoint.resolve(3).is_err());
        assert!(matches!(
            checkpoint.resolve(-4),
            Err(Error::Checkpoint(CheckpointError::IndexOutOfRange { index: -4, len: 3 }))
        ));
    }

    #[test]
    fn save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.msgpack");
        let mut graph = Graph::new();
        let (root, shared) = shared_tree(&mut graph);
        graph.set_units(shared, Some("m")).unwrap();
        graph.save_state(root, &path, false).unwrap();

        let checkpoint = Checkpoint::open(&path).unwrap();
        assert_eq!(checkpoint.len(), 1);
        assert!(!checkpoint.appendable());
        assert_eq!(checkpoint.root(), "root");
        assert_eq!(checkpoint.kind("root/left").unwrap(), NodeKind::Module);
        assert_eq!(
            checkpoint.param_paths().collect::<Vec<_>>(),
            ["root/left/shared"]
        );
        assert_eq!(
            checkpoint.value("root/left/shared", 0).unwrap(),
            Some(Array::scalar(1.0))
        );
        assert!(checkpoint.value("root/right/alias", 0).is_err());
    }
}
