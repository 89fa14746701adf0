use super::condition::{find_col, ColRef};
use super::error::{QueryError, QueryResult};
use super::{Executor, ExecutorKind, OutCol};

/// Copies a subset of the child's columns into a compact output tuple.
pub struct ProjectionExec {
    child: Box<dyn Executor>,
    /// (source offset, length) pairs into the child tuple
    sources: Vec<(usize, usize)>,
    cols: Vec<OutCol>,
    len: usize,
}

impl ProjectionExec {
    pub fn new(child: Box<dyn Executor>, select: &[ColRef]) -> QueryResult<Self> {
        let mut sources = Vec::with_capacity(select.len());
        let mut cols = Vec::with_capacity(select.len());
        let mut offset = 0;
        for col_ref in select {
            let src = find_col(child.cols(), col_ref)?;
            sources.push((src.offset, src.len));
            cols.push(OutCol {
                table: src.table.clone(),
                name: src.name.clone(),
                dtype: src.dtype,
                offset,
                len: src.len,
            });
            offset += src.len;
        }
        Ok(Self {
            child,
            sources,
            cols,
            len: offset,
        })
    }
}

impl Executor for ProjectionExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        self.child.begin_tuple()
    }

    fn next_tuple(&mut self) -> QueryResult<()> {
        self.child.next_tuple()
    }

    fn is_end(&self) -> bool {
        self.child.is_end()
    }

    fn current(&mut self) -> QueryResult<Vec<u8>> {
        let row = self.child.current()?;
        let mut out = Vec::with_capacity(self.len);
        for &(offset, len) in &self.sources {
            out.extend_from_slice(&row[offset..offset + len]);
        }
        Ok(out)
    }

    fn cols(&self) -> &[OutCol] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Projection
    }

    fn rid(&self) -> crate::record::Rid {
        self.child.rid()
    }
}
