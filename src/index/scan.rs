use crate::file::BufferManager;
use crate::record::Rid;

use super::btree::BPlusTree;
use super::error::{IndexError, IndexResult};
use super::Iid;

/// Cursor over the index positions `[lower, upper)`, following the leaf
/// chain in key order.
pub struct IndexScanCursor {
    tree: BPlusTree,
    iid: Iid,
    end: Iid,
}

impl IndexScanCursor {
    pub fn new(tree: BPlusTree, lower: Iid, upper: Iid) -> Self {
        Self {
            tree,
            iid: lower,
            end: upper,
        }
    }

    /// Advance one position, hopping to the next leaf at a node boundary
    pub fn next(&mut self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        if self.is_end() {
            return Err(IndexError::Internal(
                "advancing a finished index scan".to_string(),
            ));
        }

        self.iid.slot_no += 1;
        let (size, next_leaf) = self.tree.node_size_and_next(buffer_mgr, self.iid.page_no)?;
        if self.iid.slot_no as usize >= size && self.iid.page_no != self.end.page_no {
            self.iid = Iid::new(next_leaf, 0);
        }
        Ok(())
    }

    pub fn is_end(&self) -> bool {
        self.iid == self.end
    }

    pub fn iid(&self) -> Iid {
        self.iid
    }

    /// Heap Rid at the cursor position
    pub fn rid(&self, buffer_mgr: &mut BufferManager) -> IndexResult<Rid> {
        self.tree.get_rid(buffer_mgr, self.iid)
    }
}
