//! Record indexing over delimited text files.
//!
//! The indexer maps the first `;`-separated field of each line to the
//! line's starting byte offset, stored as a [`NameKey`] in a bramble
//! tree. Lookups search the tree for every key matching a name, then
//! seek the source file to each stored offset and read the line back.

use crate::key::{NameComparator, NameKey, RECORD_SIZE};
use bramble_common::{BrambleError, Result, TreeConfig, TreeKind};
use bramble_storage::Tree;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A name-to-offset index over one source file, backed by a tree file.
#[derive(Default)]
pub struct Indexer {
    tree: Option<Tree>,
    last_indexed: Option<PathBuf>,
}

impl Indexer {
    /// Creates an indexer with no backing tree yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh tree file for this index, overwriting any existing
    /// file at `tree_path`.
    pub fn create(
        &mut self,
        kind: TreeKind,
        order: u16,
        tree_path: impl AsRef<Path>,
    ) -> Result<()> {
        let config = TreeConfig::new(kind, order, RECORD_SIZE as u16)?;
        self.tree = Some(Tree::create(tree_path, config, Box::new(NameComparator))?);
        self.last_indexed = None;
        Ok(())
    }

    /// Opens an existing tree file.
    pub fn open(&mut self, kind: TreeKind, tree_path: impl AsRef<Path>) -> Result<()> {
        self.tree = Some(Tree::open(tree_path, kind, Box::new(NameComparator))?);
        self.last_indexed = None;
        Ok(())
    }

    /// Closes the backing tree. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut tree) = self.tree.take() {
            tree.close();
        }
        self.last_indexed = None;
    }

    /// The maximum tree depth reached by the most recent search.
    pub fn max_search_depth(&self) -> u32 {
        self.tree.as_ref().map_or(0, Tree::max_search_depth)
    }

    fn tree_mut(&mut self) -> Result<&mut Tree> {
        self.tree
            .as_mut()
            .ok_or_else(|| BrambleError::invalid("create or open a tree first"))
    }

    /// Indexes `source_path` line by line: each line's starting byte
    /// offset is recorded under the line's first `;`-separated field.
    /// Returns the number of records indexed.
    pub fn index_file(&mut self, source_path: impl AsRef<Path>) -> Result<usize> {
        let source_path = source_path.as_ref();
        self.tree_mut()?;

        let file = File::open(source_path)?;
        let mut reader = BufReader::new(file);
        let mut offset: u64 = 0;
        let mut line = String::new();
        let mut indexed = 0;

        loop {
            line.clear();
            let consumed = reader.read_line(&mut line)?;
            if consumed == 0 {
                break;
            }
            let record = line.trim_end_matches(['\n', '\r']);
            let name = record.split(';').next().unwrap_or("");
            let key = NameKey::new(name, offset);
            self.tree_mut()?.insert(&key.to_bytes())?;
            indexed += 1;
            offset += consumed as u64;
        }

        self.last_indexed = Some(source_path.to_path_buf());
        Ok(indexed)
    }

    /// Returns every source line whose name field matches `name`. The
    /// file must be the one most recently indexed.
    pub fn find_all_occurrences(
        &mut self,
        name: &str,
        source_path: impl AsRef<Path>,
    ) -> Result<Vec<String>> {
        let source_path = source_path.as_ref();
        if self.last_indexed.as_deref() != Some(source_path) {
            return Err(BrambleError::NotIndexed(
                source_path.display().to_string(),
            ));
        }

        let probe = NameKey::new(name, 0);
        let matches = self.tree_mut()?.search_all(&probe.to_bytes())?;

        let mut file = File::open(source_path)?;
        let mut lines = Vec::with_capacity(matches.len());
        for record in &matches {
            let key = NameKey::from_bytes(record);
            file.seek(SeekFrom::Start(key.offset))?;
            let mut line = String::new();
            BufReader::new(&mut file).read_line(&mut line)?;
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        Ok(lines)
    }
}
