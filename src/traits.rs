//! Declaration of traits reused across the code.
//!
//! [`Explorer`] is the contract both filesystem engines expose to callers:
//! path resolution, directory listing, content reading and tree traversal.
//! Callers never learn whether the hierarchy came from following FAT chains
//! forward or from MFT parent references backward.

use std::collections::HashSet;

/// Implementation of the LayoutDisplay trait.
/// It is used to display the on-disk layout of a given structure such as a volume.
pub trait LayoutDisplay {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error>;
}

/// Read-only view of a directory entry, whatever filesystem produced it.
pub trait FsEntry {
    /// The decoded entry name. Empty for the root.
    fn name(&self) -> &str;

    fn is_dir(&self) -> bool;

    /// Size in bytes as recorded in the filesystem metadata.
    fn size(&self) -> u64;

    /// Stable on-disk identity: first cluster (FAT32) or record number (NTFS).
    fn id(&self) -> u64;
}

/// How path segments are compared against entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameMatch {
    /// Byte-for-byte comparison.
    #[default]
    Exact,
    /// ASCII letters compare equal regardless of case.
    IgnoreAsciiCase,
}

impl NameMatch {
    pub fn matches(&self, segment: &str, name: &str) -> bool {
        match self {
            NameMatch::Exact => segment == name,
            NameMatch::IgnoreAsciiCase => segment.eq_ignore_ascii_case(name),
        }
    }
}

/// Splits a path on `/` and `\`, dropping empty segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty())
}

/// Result of reading an entry's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// The entry's bytes, truncated to its declared size.
    Data(Vec<u8>),
    /// The engine does not read this kind of entry; the reason says why.
    Unsupported(String),
}

/// Uniform browsing contract implemented by every filesystem engine.
pub trait Explorer {
    type Entry: FsEntry + Clone;
    type Error: std::error::Error;

    /// The root directory entry.
    fn root(&self) -> Self::Entry;

    /// Resolves a `/` or `\` separated path from the root.
    ///
    /// A missing segment is not an error: `Ok(None)` is the not-found result.
    fn resolve_path(&mut self, path: &str) -> Result<Option<Self::Entry>, Self::Error>;

    /// Lists the entries of a directory, excluding deleted entries.
    fn list_directory(&mut self, entry: &Self::Entry) -> Result<Vec<Self::Entry>, Self::Error>;

    /// Reads a file's content.
    fn read_file_content(&mut self, entry: &Self::Entry) -> Result<FileContent, Self::Error>;

    /// Walks the hierarchy below `root` lazily, one directory level at a time.
    fn build_tree(&mut self, root: Self::Entry) -> TreeWalker<'_, Self>
    where
        Self: Sized,
    {
        let path = if root.name().is_empty() {
            String::from("/")
        } else {
            root.name().to_string()
        };
        TreeWalker::new(self, path, root)
    }
}

/// A node yielded while walking a directory tree.
#[derive(Debug, Clone)]
pub struct TreeNode<E> {
    pub path: String,
    pub depth: usize,
    pub entry: E,
}

/// Depth-first, pre-order walk over an [`Explorer`].
///
/// A directory is only listed when its node is reached, so the walk can be
/// stopped at any point without having decoded the rest of the volume. A
/// directory that fails to list yields its error once and the walk goes on
/// with its siblings. Directories already expanded are not expanded again,
/// which keeps corrupt self-referencing directories from looping.
pub struct TreeWalker<'a, X: Explorer> {
    explorer: &'a mut X,
    stack: Vec<TreeNode<X::Entry>>,
    expanded: HashSet<u64>,
    pending_error: Option<X::Error>,
}

impl<'a, X: Explorer> TreeWalker<'a, X> {
    pub fn new(explorer: &'a mut X, path: String, root: X::Entry) -> Self {
        Self {
            explorer,
            stack: vec![TreeNode {
                path,
                depth: 0,
                entry: root,
            }],
            expanded: HashSet::new(),
            pending_error: None,
        }
    }

    fn child_path(parent: &str, name: &str) -> String {
        if parent.ends_with('/') {
            format!("{parent}{name}")
        } else {
            format!("{parent}/{name}")
        }
    }
}

impl<X: Explorer> Iterator for TreeWalker<'_, X> {
    type Item = Result<TreeNode<X::Entry>, X::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            return Some(Err(err));
        }

        let node = self.stack.pop()?;

        if node.entry.is_dir() && self.expanded.insert(node.entry.id()) {
            match self.explorer.list_directory(&node.entry) {
                Ok(children) => {
                    for child in children.into_iter().rev() {
                        self.stack.push(TreeNode {
                            path: Self::child_path(&node.path, child.name()),
                            depth: node.depth + 1,
                            entry: child,
                        });
                    }
                }
                Err(err) => self.pending_error = Some(err),
            }
        }

        Some(Ok(node))
    }
}
