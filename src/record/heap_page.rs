use crate::file::PAGE_SIZE;

use super::error::{RecordError, RecordResult};

/// Size of the per-page header: next_free_page_no (i32) + num_records (i32)
const PAGE_HEADER_SIZE: usize = 8;

/// Zero-copy view over a heap data page.
///
/// Layout: `{next_free_page_no:i32, num_records:i32, bitmap, slot_array}`.
/// One bitmap bit per slot; bit set means the slot holds a record. The
/// record size and slot count come from the file header and are passed in
/// by the owning heap file.
pub struct HeapPage<'a> {
    buffer: &'a mut [u8],
    record_size: usize,
    records_per_page: usize,
}

impl<'a> HeapPage<'a> {
    /// Maximum slots that fit a page for a given record size
    pub fn max_slots(record_size: usize) -> usize {
        if record_size == 0 || record_size > PAGE_SIZE - PAGE_HEADER_SIZE - 1 {
            return 0;
        }
        // bitmap (1 bit/slot) + slots must fit the space after the header
        let available = PAGE_SIZE - PAGE_HEADER_SIZE;
        (available * 8) / (1 + record_size * 8)
    }

    pub fn new(
        buffer: &'a mut [u8],
        record_size: usize,
        records_per_page: usize,
    ) -> RecordResult<Self> {
        if buffer.len() != PAGE_SIZE {
            return Err(RecordError::Internal(format!(
                "heap page buffer must be {} bytes, got {}",
                PAGE_SIZE,
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            record_size,
            records_per_page,
        })
    }

    /// Initialize a fresh page: empty bitmap, free-list terminator
    pub fn init(&mut self) {
        self.buffer.fill(0);
        self.set_next_free_page_no(-1);
        self.set_num_records(0);
    }

    pub fn next_free_page_no(&self) -> i32 {
        i32::from_le_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
    }

    pub fn set_next_free_page_no(&mut self, page_no: i32) {
        self.buffer[0..4].copy_from_slice(&page_no.to_le_bytes());
    }

    pub fn num_records(&self) -> i32 {
        i32::from_le_bytes([self.buffer[4], self.buffer[5], self.buffer[6], self.buffer[7]])
    }

    pub fn set_num_records(&mut self, n: i32) {
        self.buffer[4..8].copy_from_slice(&n.to_le_bytes());
    }

    fn bitmap_len(&self) -> usize {
        self.records_per_page.div_ceil(8)
    }

    fn bitmap(&self) -> &[u8] {
        &self.buffer[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + self.bitmap_len()]
    }

    fn slot_offset(&self, slot_no: usize) -> usize {
        PAGE_HEADER_SIZE + self.bitmap_len() + slot_no * self.record_size
    }

    pub fn is_slot_used(&self, slot_no: usize) -> bool {
        if slot_no >= self.records_per_page {
            return false;
        }
        (self.bitmap()[slot_no / 8] & (1 << (slot_no % 8))) != 0
    }

    pub fn set_slot_bit(&mut self, slot_no: usize) {
        let idx = PAGE_HEADER_SIZE + slot_no / 8;
        self.buffer[idx] |= 1 << (slot_no % 8);
    }

    pub fn clear_slot_bit(&mut self, slot_no: usize) {
        let idx = PAGE_HEADER_SIZE + slot_no / 8;
        self.buffer[idx] &= !(1 << (slot_no % 8));
    }

    /// First zero bit in the bitmap, None when the page is full
    pub fn first_free_slot(&self) -> Option<usize> {
        (0..self.records_per_page).find(|&slot| !self.is_slot_used(slot))
    }

    /// First set bit at or after `from`, None when the rest of the page is empty
    pub fn next_used_slot(&self, from: usize) -> Option<usize> {
        (from..self.records_per_page).find(|&slot| self.is_slot_used(slot))
    }

    pub fn is_full(&self) -> bool {
        self.first_free_slot().is_none()
    }

    pub fn slot(&self, slot_no: usize) -> &[u8] {
        let start = self.slot_offset(slot_no);
        &self.buffer[start..start + self.record_size]
    }

    pub fn write_slot(&mut self, slot_no: usize, data: &[u8]) -> RecordResult<()> {
        if data.len() != self.record_size {
            return Err(RecordError::RecordSizeMismatch {
                expected: self.record_size,
                actual: data.len(),
            });
        }
        let start = self.slot_offset(slot_no);
        self.buffer[start..start + self.record_size].copy_from_slice(data);
        Ok(())
    }

    /// Number of set bits in the bitmap; must equal `num_records`
    pub fn popcount(&self) -> usize {
        (0..self.records_per_page)
            .filter(|&slot| self.is_slot_used(slot))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_slots() {
        // 16-byte records: 8 + ceil(n/8) + 16n <= 4096
        let slots = HeapPage::max_slots(16);
        assert!(slots > 250 && slots < 256);

        assert_eq!(HeapPage::max_slots(0), 0);
        assert_eq!(HeapPage::max_slots(PAGE_SIZE), 0);
    }

    #[test]
    fn test_init_and_header() {
        let mut buffer = vec![0xFFu8; PAGE_SIZE];
        let mut page = HeapPage::new(&mut buffer, 16, 4).unwrap();
        page.init();

        assert_eq!(page.next_free_page_no(), -1);
        assert_eq!(page.num_records(), 0);
        assert!(!page.is_slot_used(0));
    }

    #[test]
    fn test_slot_bits() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut page = HeapPage::new(&mut buffer, 16, 10).unwrap();
        page.init();

        page.set_slot_bit(0);
        page.set_slot_bit(9);
        assert!(page.is_slot_used(0));
        assert!(!page.is_slot_used(1));
        assert!(page.is_slot_used(9));
        assert_eq!(page.popcount(), 2);

        page.clear_slot_bit(0);
        assert!(!page.is_slot_used(0));
        assert_eq!(page.first_free_slot(), Some(0));
        assert_eq!(page.next_used_slot(0), Some(9));
        assert_eq!(page.next_used_slot(10), None);
    }

    #[test]
    fn test_full_page() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut page = HeapPage::new(&mut buffer, 16, 4).unwrap();
        page.init();

        for slot in 0..4 {
            assert!(!page.is_full());
            page.set_slot_bit(slot);
        }
        assert!(page.is_full());
        assert_eq!(page.first_free_slot(), None);
    }

    #[test]
    fn test_slot_data() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut page = HeapPage::new(&mut buffer, 4, 8).unwrap();
        page.init();

        page.write_slot(3, &[1, 2, 3, 4]).unwrap();
        assert_eq!(page.slot(3), &[1, 2, 3, 4]);

        let result = page.write_slot(3, &[1, 2]);
        assert!(matches!(result, Err(RecordError::RecordSizeMismatch { .. })));
    }
}
