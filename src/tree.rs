use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::{
    error::{LabelCollision, NodeKind, Result},
    repo::{Commit, DecodedRecord},
};

/// # Tree

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNode {
    Folder {
        label: String,
        children: Vec<TreeNode>,
        aggregate_size: u64,
    },
    File {
        label: String,
        collection: String,
        byte_size: u64,
        created_at: Option<DateTime<Utc>>,
    },
}

impl TreeNode {
    pub fn label(&self) -> &str {
        match self {
            TreeNode::Folder { label, .. } | TreeNode::File { label, .. } => label,
        }
    }

    /// Own size for a file, subtree size for a folder.
    pub fn size(&self) -> u64 {
        match self {
            TreeNode::Folder { aggregate_size, .. } => *aggregate_size,
            TreeNode::File { byte_size, .. } => *byte_size,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, TreeNode::Folder { .. })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::Folder { .. } => NodeKind::Folder,
            TreeNode::File { .. } => NodeKind::File,
        }
    }

    /// Children of a folder; empty for a file.
    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::Folder { children, .. } => children,
            TreeNode::File { .. } => &[],
        }
    }
}

/// A projected repository. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepositoryIndex {
    pub root: Vec<TreeNode>,
    /// Sum of every decoded record's size, tallied as records arrive.
    pub total_size: u64,
    pub record_count: u64,
    pub did: Option<String>,
    pub rev: Option<String>,
    /// Records left out of the tree.
    pub warnings: Vec<LabelCollision>,
}

impl RepositoryIndex {
    /// Resolve a navigation path of labels.
    ///
    /// An empty path gives the top level. A path through folders gives that folder's
    /// children. Reaching a file gives just the file, since nothing lies beneath it. A label
    /// with no match gives nothing.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Vec<&TreeNode> {
        let mut level: &[TreeNode] = &self.root;

        for segment in path {
            match level.iter().find(|node| node.label() == segment.as_ref()) {
                Some(file @ TreeNode::File { .. }) => return vec![file],
                Some(TreeNode::Folder { children, .. }) => level = children,
                None => return Vec::new(),
            }
        }

        level.iter().collect()
    }

    /// Every file with the labels of the folders above it, depth first in insertion order.
    pub fn files(&self) -> Vec<(Vec<&str>, &TreeNode)> {
        let mut files = vec![];
        let mut stack: Vec<(Vec<&str>, &TreeNode)> =
            self.root.iter().rev().map(|node| (vec![], node)).collect();

        while let Some((path, node)) = stack.pop() {
            match node {
                TreeNode::File { .. } => files.push((path, node)),
                TreeNode::Folder { label, children, .. } => {
                    for child in children.iter().rev() {
                        let mut child_path = path.clone();
                        child_path.push(label.as_str());
                        stack.push((child_path, child));
                    }
                }
            }
        }

        files
    }

    pub fn folder_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&TreeNode> = self.root.iter().collect();
        while let Some(node) = stack.pop() {
            if let TreeNode::Folder { children, .. } = node {
                count += 1;
                stack.extend(children);
            }
        }
        count
    }
}

/// Folder labels for a collection: the first two dot segments joined, then the rest.
pub fn folder_segments(collection: &str) -> Vec<String> {
    let mut parts = collection.split('.');
    let first = parts.next().unwrap_or_default();
    let head = match parts.next() {
        Some(second) => format!("{}.{}", first, second),
        None => first.to_owned(),
    };

    std::iter::once(head)
        .chain(parts.map(str::to_owned))
        .collect()
}

/// # Projection

enum Slot {
    Folder {
        label: String,
        children: Vec<usize>,
        size: u64,
    },
    File(DecodedRecord),
}

impl Slot {
    fn label(&self) -> &str {
        match self {
            Slot::Folder { label, .. } => label,
            Slot::File(record) => &record.key,
        }
    }

    fn size(&self) -> u64 {
        match self {
            Slot::Folder { size, .. } => *size,
            Slot::File(record) => record.byte_size,
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            Slot::Folder { .. } => NodeKind::Folder,
            Slot::File(_) => NodeKind::File,
        }
    }
}

/// Builds a [`RepositoryIndex`] one record at a time.
///
/// Nodes live in an arena and refer to their children by index, so a child always has a
/// larger index than its parent. Dropping a projector before [`finish`](Self::finish)
/// discards everything inserted so far.
#[derive(Default)]
pub struct Projector {
    slots: Vec<Slot>,
    root: Vec<usize>,
    total_size: u64,
    record_count: u64,
    did: Option<String>,
    rev: Option<String>,
    warnings: Vec<LabelCollision>,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_commit(commit: &Commit) -> Self {
        Self {
            did: Some(commit.did.clone()),
            rev: commit.rev.clone(),
            ..Self::default()
        }
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    fn children(&self, parent: Option<usize>) -> &[usize] {
        match parent {
            None => &self.root,
            Some(idx) => match &self.slots[idx] {
                Slot::Folder { children, .. } => children,
                Slot::File(_) => &[],
            },
        }
    }

    fn find(&self, parent: Option<usize>, label: &str) -> Option<usize> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&idx| self.slots[idx].label() == label)
    }

    fn push(&mut self, parent: Option<usize>, slot: Slot) -> usize {
        let idx = self.slots.len();
        self.slots.push(slot);
        match parent {
            None => self.root.push(idx),
            Some(p) => {
                if let Slot::Folder { children, .. } = &mut self.slots[p] {
                    children.push(idx);
                }
            }
        }
        idx
    }

    pub fn insert(&mut self, record: DecodedRecord) {
        self.record_count += 1;
        self.total_size += record.byte_size;

        let segments = folder_segments(&record.collection);

        // Follow the folders that already exist.
        let mut parent = None;
        let mut depth = 0;
        while depth < segments.len() {
            match self.find(parent, &segments[depth]) {
                Some(idx) if self.slots[idx].kind() == NodeKind::Folder => {
                    parent = Some(idx);
                    depth += 1;
                }
                Some(idx) => {
                    let existing = self.slots[idx].kind();
                    return self.collide(record, segments[depth].clone(), existing);
                }
                None => break,
            }
        }

        if depth == segments.len() {
            if let Some(idx) = self.find(parent, &record.key) {
                let existing = self.slots[idx].kind();
                let label = record.key.clone();
                return self.collide(record, label, existing);
            }
        }

        for segment in &segments[depth..] {
            let folder = Slot::Folder {
                label: segment.clone(),
                children: vec![],
                size: 0,
            };
            parent = Some(self.push(parent, folder));
        }

        self.push(parent, Slot::File(record));
    }

    fn collide(&mut self, record: DecodedRecord, label: String, existing: NodeKind) {
        let collision = LabelCollision {
            collection: record.collection,
            key: record.key,
            label,
            existing,
        };
        warn!("{}", collision);
        self.warnings.push(collision);
    }

    /// Post-order over the arena, children in insertion order.
    fn aggregate(&mut self) {
        let mut stack: Vec<(usize, bool)> = self.root.iter().rev().map(|&idx| (idx, false)).collect();

        while let Some((idx, visited)) = stack.pop() {
            let children = match &self.slots[idx] {
                Slot::Folder { children, .. } => children,
                Slot::File(_) => continue,
            };

            if visited {
                let total = children.iter().map(|&c| self.slots[c].size()).sum();
                if let Slot::Folder { size, .. } = &mut self.slots[idx] {
                    *size = total;
                }
            } else {
                let pending: Vec<_> = children.iter().rev().map(|&c| (c, false)).collect();
                stack.push((idx, true));
                stack.extend(pending);
            }
        }
    }

    pub fn finish(mut self) -> RepositoryIndex {
        self.aggregate();

        let mut built: Vec<Option<TreeNode>> = Vec::with_capacity(self.slots.len());
        built.resize_with(self.slots.len(), || None);

        // Children are built before their parents since they sit later in the arena.
        for (idx, slot) in self.slots.into_iter().enumerate().rev() {
            let node = match slot {
                Slot::Folder {
                    label,
                    children,
                    size,
                } => TreeNode::Folder {
                    label,
                    children: children.iter().filter_map(|&c| built[c].take()).collect(),
                    aggregate_size: size,
                },
                Slot::File(record) => TreeNode::File {
                    label: record.key,
                    collection: record.collection,
                    byte_size: record.byte_size,
                    created_at: record.created_at,
                },
            };
            built[idx] = Some(node);
        }

        let root: Vec<TreeNode> = self.root.iter().filter_map(|&idx| built[idx].take()).collect();

        debug!(
            "projected {} records into {} top-level folders",
            self.record_count,
            root.len()
        );

        RepositoryIndex {
            root,
            total_size: self.total_size,
            record_count: self.record_count,
            did: self.did,
            rev: self.rev,
            warnings: self.warnings,
        }
    }
}

/// Project a whole record stream. The first decode error abandons the projection.
pub fn project<I>(records: I) -> Result<RepositoryIndex>
where
    I: IntoIterator<Item = Result<DecodedRecord>>,
{
    let mut projector = Projector::new();
    for record in records {
        projector.insert(record?);
    }
    Ok(projector.finish())
}
