//! Page allocation and metadata persistence for one tree file.
//!
//! The pager owns the stream and the three persistent counters: the page
//! counter (pages ever allocated in the dense array, monotonic), the root
//! page number, and the free-page stack counter. Freed pages are recorded
//! in a LIFO stack stored immediately after the last page slot:
//!
//! ```text
//! | ... page slots ... | counter f | num_1 | num_2 | ... | num_f |
//!                                                          ^ top
//! ```
//!
//! Appending a page overwrites the footer's old position; the counter is
//! rewritten at its shifted position right after the new slot, so the
//! footer effectively moves with the file end.

use crate::node::NodePage;
use crate::stream::PageStream;
use bramble_common::layout::{
    FileHeader, FIRST_PAGE_OFS, FREE_PAGES_COUNTER_SZ, FREE_PAGE_NUM_SZ, HEADER_OFS, HEADER_SIZE,
    PAGE_COUNTER_OFS, ROOT_PAGE_NUM_OFS,
};
use bramble_common::{BrambleError, Result};

/// Paged allocator with free-page reuse over one stream.
pub struct Pager {
    stream: PageStream,
    page_size: u64,
    page_counter: u32,
    root_page_num: u32,
    free_pages: u32,
}

impl Pager {
    /// Initializes a brand-new tree file: header, zeroed counters and an
    /// empty free stack.
    pub fn create(stream: PageStream, header: FileHeader, page_size: usize) -> Result<Self> {
        let pager = Self {
            stream,
            page_size: page_size as u64,
            page_counter: 0,
            root_page_num: 0,
            free_pages: 0,
        };
        pager.stream.write_at(HEADER_OFS, &header.to_bytes())?;
        pager.write_page_counter()?;
        pager.write_root_page_num()?;
        pager.write_free_pages_counter()?;
        Ok(pager)
    }

    /// Reads and validates the header of an existing tree file without
    /// constructing a pager; the caller derives the page size from it.
    pub fn read_header(stream: &PageStream) -> Result<FileHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        stream
            .read_at(HEADER_OFS, &mut buf)
            .map_err(|e| match e {
                BrambleError::Io(_) => BrambleError::corrupt("can't read header"),
                other => other,
            })?;
        let header = FileHeader::from_bytes(&buf);
        header.check_integrity()?;
        Ok(header)
    }

    /// Loads the counters of an existing tree file.
    pub fn load(stream: PageStream, page_size: usize) -> Result<Self> {
        let mut pager = Self {
            stream,
            page_size: page_size as u64,
            page_counter: 0,
            root_page_num: 0,
            free_pages: 0,
        };
        let mut buf = [0u8; 4];
        pager
            .stream
            .read_at(PAGE_COUNTER_OFS, &mut buf)
            .map_err(|_| BrambleError::corrupt("can't read page counter"))?;
        pager.page_counter = u32::from_le_bytes(buf);
        pager
            .stream
            .read_at(ROOT_PAGE_NUM_OFS, &mut buf)
            .map_err(|_| BrambleError::corrupt("can't read root page number"))?;
        pager.root_page_num = u32::from_le_bytes(buf);
        pager
            .stream
            .read_at(pager.free_area_ofs(), &mut buf)
            .map_err(|_| BrambleError::corrupt("can't read free stack counter"))?;
        pager.free_pages = u32::from_le_bytes(buf);
        Ok(pager)
    }

    /// Pages ever allocated in the dense array. Never decreases.
    pub fn page_counter(&self) -> u32 {
        self.page_counter
    }

    /// Current root page number; 0 means no root yet.
    pub fn root_page_num(&self) -> u32 {
        self.root_page_num
    }

    /// Number of entries on the free-page stack.
    pub fn free_pages(&self) -> u32 {
        self.free_pages
    }

    /// True while the underlying stream is open.
    pub fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    /// Closes the underlying stream. Idempotent.
    pub fn close(&self) {
        self.stream.close();
    }

    fn page_ofs(&self, page_num: u32) -> u64 {
        FIRST_PAGE_OFS + (page_num as u64 - 1) * self.page_size
    }

    fn free_area_ofs(&self) -> u64 {
        self.page_ofs(self.page_counter + 1)
    }

    fn check_page_num(&self, page_num: u32) -> Result<()> {
        if page_num == 0 || page_num > self.page_counter {
            return Err(BrambleError::PageOutOfRange {
                page_num,
                last: self.page_counter,
            });
        }
        Ok(())
    }

    /// Reads page `page_num` into the node buffer.
    pub fn read_page(&self, page_num: u32, node: &mut NodePage) -> Result<()> {
        self.check_page_num(page_num)?;
        self.stream.read_at(self.page_ofs(page_num), node.bytes_mut())?;
        node.set_page_num(page_num);
        Ok(())
    }

    /// Writes the node buffer back to its page slot.
    pub fn write_page(&self, node: &NodePage) -> Result<()> {
        if node.page_num() == 0 {
            return Err(BrambleError::invalid("page number not set, can't write"));
        }
        self.check_page_num(node.page_num())?;
        self.stream.write_at(self.page_ofs(node.page_num()), node.bytes())
    }

    /// Allocates a page, reusing the top of the free stack when one is
    /// available and appending to the dense array otherwise. The buffer is
    /// zeroed, its info word set, and the slot written immediately.
    pub fn allocate(&mut self, node: &mut NodePage, key_count: u16, is_leaf: bool) -> Result<u32> {
        node.clear();
        node.set_info(key_count, is_leaf);

        if self.free_pages == 0 {
            // Append at the footer's old position, then rewrite the
            // counter at its shifted position after the new slot.
            let ofs = self.free_area_ofs();
            self.stream.write_at(ofs, node.bytes())?;
            self.page_counter += 1;
            self.write_page_counter()?;
            self.write_free_pages_counter()?;
            node.set_page_num(self.page_counter);
            Ok(self.page_counter)
        } else {
            let recycled = self.top_free_page()?;
            self.stream.write_at(self.page_ofs(recycled), node.bytes())?;
            self.free_pages -= 1;
            self.write_free_pages_counter()?;
            node.set_page_num(recycled);
            Ok(recycled)
        }
    }

    /// Allocates the page for a new tree root (empty, non-leaf). The
    /// caller links the old root as child 0 and splits it.
    pub fn allocate_new_root(&mut self, node: &mut NodePage) -> Result<u32> {
        self.allocate(node, 0, false)
    }

    /// Pushes `page_num` onto the free stack for later reuse.
    pub fn mark_free(&mut self, page_num: u32) -> Result<()> {
        if page_num == 0 || page_num > self.page_counter {
            return Err(BrambleError::PageOutOfRange {
                page_num,
                last: self.page_counter,
            });
        }
        let entry_ofs = self.free_area_ofs()
            + FREE_PAGES_COUNTER_SZ as u64
            + self.free_pages as u64 * FREE_PAGE_NUM_SZ as u64;
        self.stream.write_at(entry_ofs, &page_num.to_le_bytes())?;
        self.free_pages += 1;
        self.write_free_pages_counter()
    }

    /// Records a new root page number and persists it.
    pub fn set_root_page_num(&mut self, page_num: u32) -> Result<()> {
        self.root_page_num = page_num;
        self.write_root_page_num()
    }

    fn top_free_page(&self) -> Result<u32> {
        let ofs = self.free_area_ofs()
            + FREE_PAGES_COUNTER_SZ as u64
            + (self.free_pages as u64 - 1) * FREE_PAGE_NUM_SZ as u64;
        let mut buf = [0u8; 4];
        self.stream.read_at(ofs, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_page_counter(&self) -> Result<()> {
        self.stream
            .write_at(PAGE_COUNTER_OFS, &self.page_counter.to_le_bytes())
    }

    fn write_root_page_num(&self) -> Result<()> {
        self.stream
            .write_at(ROOT_PAGE_NUM_OFS, &self.root_page_num.to_le_bytes())
    }

    fn write_free_pages_counter(&self) -> Result<()> {
        self.stream
            .write_at(self.free_area_ofs(), &self.free_pages.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PageGeometry;
    use tempfile::tempdir;

    fn new_pager(dir: &tempfile::TempDir) -> (Pager, PageGeometry) {
        let geometry = PageGeometry::new(3, 1);
        let stream = PageStream::create(dir.path().join("t.xibt")).unwrap();
        let header = FileHeader::new(2, 1);
        let pager = Pager::create(stream, header, geometry.page_size).unwrap();
        (pager, geometry)
    }

    #[test]
    fn test_create_writes_metadata() {
        let dir = tempdir().unwrap();
        let (pager, _) = new_pager(&dir);
        assert_eq!(pager.page_counter(), 0);
        assert_eq!(pager.root_page_num(), 0);
        assert_eq!(pager.free_pages(), 0);
        // header + page counter + root + free counter
        assert_eq!(pager.stream.len().unwrap(), 20);
    }

    #[test]
    fn test_allocate_appends() {
        let dir = tempdir().unwrap();
        let (mut pager, geometry) = new_pager(&dir);
        let mut node = NodePage::new(geometry);

        assert_eq!(pager.allocate(&mut node, 0, true).unwrap(), 1);
        assert_eq!(node.page_num(), 1);
        assert!(node.is_leaf());
        assert_eq!(pager.allocate(&mut node, 2, false).unwrap(), 2);
        assert_eq!(node.key_count(), 2);
        assert_eq!(pager.page_counter(), 2);
    }

    #[test]
    fn test_allocate_reuses_freed_page() {
        let dir = tempdir().unwrap();
        let (mut pager, geometry) = new_pager(&dir);
        let mut node = NodePage::new(geometry);

        pager.allocate(&mut node, 0, true).unwrap();
        assert_eq!(pager.allocate(&mut node, 3, false).unwrap(), 2);

        pager.mark_free(2).unwrap();
        assert_eq!(pager.free_pages(), 1);

        // pops the freed slot instead of extending the array
        assert_eq!(pager.allocate(&mut node, 3, false).unwrap(), 2);
        assert_eq!(pager.free_pages(), 0);
        assert_eq!(pager.page_counter(), 2);

        // stack empty again: next two extend
        assert_eq!(pager.allocate(&mut node, 3, false).unwrap(), 3);
        assert_eq!(pager.allocate(&mut node, 3, false).unwrap(), 4);
    }

    #[test]
    fn test_free_stack_is_lifo() {
        let dir = tempdir().unwrap();
        let (mut pager, geometry) = new_pager(&dir);
        let mut node = NodePage::new(geometry);

        for _ in 0..4 {
            pager.allocate(&mut node, 0, true).unwrap();
        }
        pager.mark_free(2).unwrap();
        pager.mark_free(4).unwrap();

        assert_eq!(pager.allocate(&mut node, 0, true).unwrap(), 4);
        assert_eq!(pager.allocate(&mut node, 0, true).unwrap(), 2);
    }

    #[test]
    fn test_mark_free_out_of_range() {
        let dir = tempdir().unwrap();
        let (mut pager, geometry) = new_pager(&dir);
        let mut node = NodePage::new(geometry);
        pager.allocate(&mut node, 0, true).unwrap();

        assert!(matches!(
            pager.mark_free(5).unwrap_err(),
            BrambleError::PageOutOfRange { page_num: 5, last: 1 }
        ));
        assert!(pager.mark_free(0).is_err());
    }

    #[test]
    fn test_read_write_page_roundtrip() {
        let dir = tempdir().unwrap();
        let (mut pager, geometry) = new_pager(&dir);
        let mut node = NodePage::new(geometry);

        pager.allocate(&mut node, 0, true).unwrap();
        node.set_info(2, true);
        node.set_key(0, &[0x05]);
        node.set_key(1, &[0x09]);
        pager.write_page(&node).unwrap();

        let mut reread = NodePage::new(geometry);
        pager.read_page(1, &mut reread).unwrap();
        assert_eq!(reread.key_count(), 2);
        assert!(reread.is_leaf());
        assert_eq!(reread.key(0), &[0x05]);
        assert_eq!(reread.key(1), &[0x09]);
    }

    #[test]
    fn test_read_nonexistent_page() {
        let dir = tempdir().unwrap();
        let (pager, geometry) = new_pager(&dir);
        let mut node = NodePage::new(geometry);
        assert!(matches!(
            pager.read_page(1, &mut node).unwrap_err(),
            BrambleError::PageOutOfRange { .. }
        ));
        assert!(pager.read_page(0, &mut node).is_err());
    }

    #[test]
    fn test_load_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xibt");
        let geometry = PageGeometry::new(3, 1);
        {
            let stream = PageStream::create(&path).unwrap();
            let mut pager = Pager::create(stream, FileHeader::new(2, 1), geometry.page_size).unwrap();
            let mut node = NodePage::new(geometry);
            pager.allocate(&mut node, 0, true).unwrap();
            pager.allocate(&mut node, 0, true).unwrap();
            pager.set_root_page_num(1).unwrap();
            pager.mark_free(2).unwrap();
        }

        let stream = PageStream::open(&path).unwrap();
        let header = Pager::read_header(&stream).unwrap();
        assert_eq!(header.order, 2);
        assert_eq!(header.record_size, 1);

        let pager = Pager::load(stream, geometry.page_size).unwrap();
        assert_eq!(pager.page_counter(), 2);
        assert_eq!(pager.root_page_num(), 1);
        assert_eq!(pager.free_pages(), 1);
    }

    #[test]
    fn test_read_header_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.xibt");
        {
            let stream = PageStream::create(&path).unwrap();
            stream.write_at(0, &[0u8; 32]).unwrap();
        }
        let stream = PageStream::open(&path).unwrap();
        assert!(matches!(
            Pager::read_header(&stream).unwrap_err(),
            BrambleError::CorruptHeader { .. }
        ));
    }

    #[test]
    fn test_closed_stream_errors() {
        let dir = tempdir().unwrap();
        let (mut pager, geometry) = new_pager(&dir);
        let mut node = NodePage::new(geometry);
        pager.allocate(&mut node, 0, true).unwrap();

        pager.close();
        assert!(!pager.is_open());
        assert!(matches!(
            pager.read_page(1, &mut node).unwrap_err(),
            BrambleError::StreamClosed
        ));
        assert!(matches!(
            pager.allocate(&mut node, 0, true).unwrap_err(),
            BrambleError::StreamClosed
        ));
    }

    #[test]
    fn test_page_counter_monotonic_across_free() {
        let dir = tempdir().unwrap();
        let (mut pager, geometry) = new_pager(&dir);
        let mut node = NodePage::new(geometry);

        for _ in 0..3 {
            pager.allocate(&mut node, 0, true).unwrap();
        }
        let counter = pager.page_counter();
        pager.mark_free(3).unwrap();
        pager.mark_free(2).unwrap();
        assert_eq!(pager.page_counter(), counter);
    }
}
