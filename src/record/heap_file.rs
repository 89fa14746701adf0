use crate::file::{BufferManager, FileHandle, PageId};

use super::error::{RecordError, RecordResult};
use super::heap_page::HeapPage;
use super::rid::Rid;
use super::schema::TableSchema;

/// Heap file header, stored in page 0 as four little-endian i32s
#[derive(Debug, Clone, Copy)]
pub struct HeapFileHeader {
    pub record_size: i32,
    pub records_per_page: i32,
    /// Total pages in the file, header page included
    pub num_pages: i32,
    /// Head of the ascending free-page list, -1 when empty
    pub first_free_page_no: i32,
}

impl HeapFileHeader {
    const SIZE: usize = 16;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.record_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.records_per_page.to_le_bytes());
        buf[8..12].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[12..16].copy_from_slice(&self.first_free_page_no.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let read = |at: usize| i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Self {
            record_size: read(0),
            records_per_page: read(4),
            num_pages: read(8),
            first_free_page_no: read(12),
        }
    }
}

/// Paged record heap for one table.
///
/// This is a cheap handle: all mutable file state (page counts, free list)
/// lives in the page-0 header and is read through the buffer pool, so clones
/// of the handle stay coherent.
#[derive(Clone)]
pub struct HeapFile {
    file: FileHandle,
    schema: TableSchema,
    record_size: usize,
    records_per_page: usize,
}

impl HeapFile {
    /// Create a table file, sizing pages for as many slots as fit
    pub fn create(
        buffer_mgr: &mut BufferManager,
        path: &str,
        schema: TableSchema,
    ) -> RecordResult<Self> {
        let records_per_page = HeapPage::max_slots(schema.record_size());
        Self::create_with_capacity(buffer_mgr, path, schema, records_per_page)
    }

    /// Create a table file with an explicit per-page slot count
    pub fn create_with_capacity(
        buffer_mgr: &mut BufferManager,
        path: &str,
        schema: TableSchema,
        records_per_page: usize,
    ) -> RecordResult<Self> {
        let record_size = schema.record_size();
        if records_per_page == 0 || records_per_page > HeapPage::max_slots(record_size) {
            return Err(RecordError::Internal(format!(
                "records_per_page {} out of range for record size {}",
                records_per_page, record_size
            )));
        }

        buffer_mgr.file_manager_mut().create_file(path)?;
        let file = buffer_mgr.file_manager_mut().open_file(path)?;

        let header = HeapFileHeader {
            record_size: record_size as i32,
            records_per_page: records_per_page as i32,
            num_pages: 1,
            first_free_page_no: -1,
        };
        let (page_no, frame) = buffer_mgr.new_page(file)?;
        debug_assert_eq!(page_no, 0);
        frame[..HeapFileHeader::SIZE].copy_from_slice(&header.to_bytes());
        buffer_mgr.unpin_page(file, page_no, true)?;

        Ok(Self {
            file,
            schema,
            record_size,
            records_per_page,
        })
    }

    /// Open an existing table file
    pub fn open(
        buffer_mgr: &mut BufferManager,
        path: &str,
        schema: TableSchema,
    ) -> RecordResult<Self> {
        let file = buffer_mgr.file_manager_mut().open_file(path)?;
        let header = buffer_mgr.with_page(file, 0, |buf| HeapFileHeader::from_bytes(buf))?;

        if header.record_size as usize != schema.record_size() {
            return Err(RecordError::SchemaMismatch(format!(
                "file record size {} does not match schema record size {}",
                header.record_size,
                schema.record_size()
            )));
        }

        Ok(Self {
            file,
            schema,
            record_size: header.record_size as usize,
            records_per_page: header.records_per_page as usize,
        })
    }

    pub fn file_handle(&self) -> FileHandle {
        self.file
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn records_per_page(&self) -> usize {
        self.records_per_page
    }

    pub fn read_header(&self, buffer_mgr: &mut BufferManager) -> RecordResult<HeapFileHeader> {
        Ok(buffer_mgr.with_page(self.file, 0, |buf| HeapFileHeader::from_bytes(buf))?)
    }

    fn write_header(
        &self,
        buffer_mgr: &mut BufferManager,
        header: &HeapFileHeader,
    ) -> RecordResult<()> {
        let bytes = header.to_bytes();
        buffer_mgr.with_page_mut(self.file, 0, |buf| {
            buf[..HeapFileHeader::SIZE].copy_from_slice(&bytes)
        })?;
        Ok(())
    }

    fn page_next_free(&self, buffer_mgr: &mut BufferManager, page_no: i32) -> RecordResult<i32> {
        Ok(buffer_mgr.with_page(self.file, page_no as PageId, |buf| {
            i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
        })?)
    }

    fn set_page_next_free(
        &self,
        buffer_mgr: &mut BufferManager,
        page_no: i32,
        next: i32,
    ) -> RecordResult<()> {
        buffer_mgr.with_page_mut(self.file, page_no as PageId, |buf| {
            buf[0..4].copy_from_slice(&next.to_le_bytes())
        })?;
        Ok(())
    }

    /// Insert a record wherever a free slot exists; returns its new Rid.
    ///
    /// Takes the free-list head, or allocates and prepends a fresh page when
    /// the list is empty. A page that fills up is unlinked from the list.
    pub fn insert(&self, buffer_mgr: &mut BufferManager, row: &[u8]) -> RecordResult<Rid> {
        if row.len() != self.record_size {
            return Err(RecordError::RecordSizeMismatch {
                expected: self.record_size,
                actual: row.len(),
            });
        }

        let mut header = self.read_header(buffer_mgr)?;
        loop {
            let page_no = if header.first_free_page_no == -1
                || header.first_free_page_no >= header.num_pages
            {
                // No free page: allocate one and prepend it to the list
                let (page_no, frame) = buffer_mgr.new_page(self.file)?;
                let mut page = HeapPage::new(frame, self.record_size, self.records_per_page)?;
                page.init();
                page.set_next_free_page_no(header.first_free_page_no);
                buffer_mgr.unpin_page(self.file, page_no, true)?;

                header.num_pages += 1;
                header.first_free_page_no = page_no as i32;
                page_no as i32
            } else {
                header.first_free_page_no
            };

            let frame = buffer_mgr.fetch_page(self.file, page_no as PageId)?;
            let mut page = HeapPage::new(frame, self.record_size, self.records_per_page)?;

            let Some(slot_no) = page.first_free_slot() else {
                // Stale head (a resurrected row refilled it); unlink and retry
                header.first_free_page_no = page.next_free_page_no();
                buffer_mgr.unpin_page(self.file, page_no as PageId, false)?;
                continue;
            };

            page.write_slot(slot_no, row)?;
            page.set_slot_bit(slot_no);
            page.set_num_records(page.num_records() + 1);
            if page.is_full() {
                header.first_free_page_no = page.next_free_page_no();
            }
            buffer_mgr.unpin_page(self.file, page_no as PageId, true)?;

            self.write_header(buffer_mgr, &header)?;
            return Ok(Rid::new(page_no, slot_no as i32));
        }
    }

    /// Write a record at an exact slot, bypassing free-list and record-count
    /// bookkeeping. Only used to resurrect a previously deleted row during
    /// transaction abort; the caller guarantees the slot is unoccupied.
    pub fn insert_at(
        &self,
        buffer_mgr: &mut BufferManager,
        rid: Rid,
        row: &[u8],
    ) -> RecordResult<()> {
        let frame = buffer_mgr.fetch_page(self.file, rid.page_no as PageId)?;
        let mut page = HeapPage::new(frame, self.record_size, self.records_per_page)?;
        let result = page.write_slot(rid.slot_no as usize, row);
        if result.is_ok() {
            page.set_slot_bit(rid.slot_no as usize);
        }
        buffer_mgr.unpin_page(self.file, rid.page_no as PageId, result.is_ok())?;
        result
    }

    /// Read a record's bytes
    pub fn get(&self, buffer_mgr: &mut BufferManager, rid: Rid) -> RecordResult<Vec<u8>> {
        let frame = buffer_mgr.fetch_page(self.file, rid.page_no as PageId)?;
        let page = HeapPage::new(frame, self.record_size, self.records_per_page)?;

        let result = if page.is_slot_used(rid.slot_no as usize) {
            Ok(page.slot(rid.slot_no as usize).to_vec())
        } else {
            Err(RecordError::RecordNotFound(rid.page_no, rid.slot_no))
        };
        buffer_mgr.unpin_page(self.file, rid.page_no as PageId, false)?;
        result
    }

    /// Overwrite a record in place; bitmap and free list are untouched
    pub fn update(&self, buffer_mgr: &mut BufferManager, rid: Rid, row: &[u8]) -> RecordResult<()> {
        let frame = buffer_mgr.fetch_page(self.file, rid.page_no as PageId)?;
        let mut page = HeapPage::new(frame, self.record_size, self.records_per_page)?;

        let result = if page.is_slot_used(rid.slot_no as usize) {
            page.write_slot(rid.slot_no as usize, row)
        } else {
            Err(RecordError::RecordNotFound(rid.page_no, rid.slot_no))
        };
        buffer_mgr.unpin_page(self.file, rid.page_no as PageId, result.is_ok())?;
        result
    }

    /// Delete a record. A page that was full rejoins the free list at its
    /// ascending page-number position.
    pub fn delete(&self, buffer_mgr: &mut BufferManager, rid: Rid) -> RecordResult<()> {
        let frame = buffer_mgr.fetch_page(self.file, rid.page_no as PageId)?;
        let mut page = HeapPage::new(frame, self.record_size, self.records_per_page)?;

        if !page.is_slot_used(rid.slot_no as usize) {
            buffer_mgr.unpin_page(self.file, rid.page_no as PageId, false)?;
            return Err(RecordError::RecordNotFound(rid.page_no, rid.slot_no));
        }

        let was_full = page.is_full();
        page.clear_slot_bit(rid.slot_no as usize);
        page.set_num_records(page.num_records() - 1);
        buffer_mgr.unpin_page(self.file, rid.page_no as PageId, true)?;

        if was_full {
            self.link_free_page(buffer_mgr, rid.page_no)?;
        }
        Ok(())
    }

    /// Splice a newly non-full page into the ascending free list
    fn link_free_page(&self, buffer_mgr: &mut BufferManager, page_no: i32) -> RecordResult<()> {
        let mut header = self.read_header(buffer_mgr)?;
        debug_assert_ne!(header.first_free_page_no, page_no);

        if header.first_free_page_no == -1 || page_no < header.first_free_page_no {
            self.set_page_next_free(buffer_mgr, page_no, header.first_free_page_no)?;
            header.first_free_page_no = page_no;
            self.write_header(buffer_mgr, &header)?;
            return Ok(());
        }

        // Walk to the last node whose successor is still below page_no
        let mut prev = header.first_free_page_no;
        loop {
            let next = self.page_next_free(buffer_mgr, prev)?;
            debug_assert_ne!(next, page_no);
            if next == -1 || next > page_no {
                self.set_page_next_free(buffer_mgr, page_no, next)?;
                self.set_page_next_free(buffer_mgr, prev, page_no)?;
                return Ok(());
            }
            prev = next;
        }
    }

    /// Collect the free list in order (testing and introspection)
    pub fn free_pages(&self, buffer_mgr: &mut BufferManager) -> RecordResult<Vec<i32>> {
        let header = self.read_header(buffer_mgr)?;
        let mut pages = Vec::new();
        let mut page_no = header.first_free_page_no;
        while page_no != -1 {
            pages.push(page_no);
            page_no = self.page_next_free(buffer_mgr, page_no)?;
        }
        Ok(pages)
    }

    /// Open a forward scan positioned at the first record
    pub fn scan(&self, buffer_mgr: &mut BufferManager) -> RecordResult<HeapScan> {
        HeapScan::begin(self, buffer_mgr)
    }
}

/// Forward cursor over every occupied slot, in (page_no, slot_no) order.
///
/// `Rid::INVALID` marks the end position.
pub struct HeapScan {
    file: FileHandle,
    record_size: usize,
    records_per_page: usize,
    num_pages: i32,
    rid: Rid,
}

impl HeapScan {
    fn begin(heap: &HeapFile, buffer_mgr: &mut BufferManager) -> RecordResult<Self> {
        let header = heap.read_header(buffer_mgr)?;
        let mut scan = Self {
            file: heap.file,
            record_size: heap.record_size,
            records_per_page: heap.records_per_page,
            num_pages: header.num_pages,
            rid: Rid::INVALID,
        };
        scan.rid = scan.seek(buffer_mgr, 1, 0)?;
        Ok(scan)
    }

    /// First occupied slot at or after (page_no, slot_no)
    fn seek(
        &self,
        buffer_mgr: &mut BufferManager,
        first_page: i32,
        first_slot: usize,
    ) -> RecordResult<Rid> {
        let mut slot = first_slot;
        for page_no in first_page..self.num_pages {
            let frame = buffer_mgr.fetch_page(self.file, page_no as PageId)?;
            let page = HeapPage::new(frame, self.record_size, self.records_per_page)?;
            let found = page.next_used_slot(slot);
            buffer_mgr.unpin_page(self.file, page_no as PageId, false)?;

            if let Some(slot_no) = found {
                return Ok(Rid::new(page_no, slot_no as i32));
            }
            slot = 0;
        }
        Ok(Rid::INVALID)
    }

    /// Advance to the next occupied slot
    pub fn next(&mut self, buffer_mgr: &mut BufferManager) -> RecordResult<()> {
        if self.is_end() {
            return Err(RecordError::Internal(
                "advancing a finished heap scan".to_string(),
            ));
        }
        self.rid = self.seek(buffer_mgr, self.rid.page_no, self.rid.slot_no as usize + 1)?;
        Ok(())
    }

    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn is_end(&self) -> bool {
        self.rid.is_invalid()
    }
}
