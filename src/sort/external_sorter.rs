use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;

use super::error::{SortError, SortResult};

/// Leaf sentinel for an exhausted or padding run in the loser tree
const NO_RUN: i32 = -1;

type RecordCmp = Box<dyn Fn(&[u8], &[u8]) -> Ordering>;

/// Bounded-memory external merge sorter.
///
/// The write phase accumulates records into a memory block of at most
/// `memory_budget` bytes; each full block is sorted in place and spilled to
/// a temp-file run. The read phase merges all runs through a loser tree:
/// an array of `2 * next_pow2(runs)` slots whose leaves hold run indices
/// (padded with `NO_RUN`), whose internal nodes hold the loser of their
/// subtree's tournament, and whose slot 0 holds the overall winner.
///
/// Runs are `NamedTempFile`s: a run drained to EOF is dropped immediately
/// and dropping the sorter removes whatever was not consumed.
pub struct ExternalSorter {
    /// Run capacity in bytes, rounded down to a record multiple
    budget: usize,
    record_size: usize,
    cmp: RecordCmp,
    dir: PathBuf,

    /// In-memory block for the run currently being built
    buffer: Vec<u8>,
    /// Completed runs, spilled in sorted order
    runs: Vec<NamedTempFile>,
    /// Records written and not yet read back
    remaining: usize,

    // Merge state, populated by begin_read
    run_files: Vec<Option<NamedTempFile>>,
    readers: Vec<Option<BufReader<File>>>,
    heads: Vec<Vec<u8>>,
    tree: Vec<i32>,
    leaf_base: usize,
}

impl ExternalSorter {
    /// Sorter with runs placed in the system temp directory
    pub fn new(memory_budget: usize, record_size: usize, cmp: RecordCmp) -> Self {
        Self::new_in(std::env::temp_dir(), memory_budget, record_size, cmp)
    }

    /// Sorter with runs placed in a caller-chosen directory
    pub fn new_in(
        dir: impl Into<PathBuf>,
        memory_budget: usize,
        record_size: usize,
        cmp: RecordCmp,
    ) -> Self {
        // Each run holds a whole number of records, at least one
        let budget = (memory_budget - memory_budget % record_size).max(record_size);
        Self {
            budget,
            record_size,
            cmp,
            dir: dir.into(),
            buffer: Vec::with_capacity(budget),
            runs: Vec::new(),
            remaining: 0,
            run_files: Vec::new(),
            readers: Vec::new(),
            heads: Vec::new(),
            tree: Vec::new(),
            leaf_base: 0,
        }
    }

    /// Append one record to the current run, spilling when the block fills
    pub fn write(&mut self, record: &[u8]) -> SortResult<()> {
        if record.len() != self.record_size {
            return Err(SortError::RecordSizeMismatch {
                expected: self.record_size,
                actual: record.len(),
            });
        }
        if self.buffer.len() + self.record_size > self.budget {
            self.spill()?;
        }
        self.buffer.extend_from_slice(record);
        self.remaining += 1;
        Ok(())
    }

    /// Flush the final (possibly partial) block
    pub fn end_write(&mut self) -> SortResult<()> {
        self.spill()
    }

    /// Sort the in-memory block and write it out as one run
    fn spill(&mut self) -> SortResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut records: Vec<&[u8]> = self.buffer.chunks_exact(self.record_size).collect();
        records.sort_unstable_by(|a, b| (self.cmp)(a, b));

        let file = NamedTempFile::new_in(&self.dir)?;
        let mut writer = BufWriter::new(file.reopen()?);
        for record in records {
            writer.write_all(record)?;
        }
        writer.flush()?;

        self.runs.push(file);
        self.buffer.clear();
        Ok(())
    }

    /// Open every run and build the loser tree
    pub fn begin_read(&mut self) -> SortResult<()> {
        let run_count = self.runs.len();
        if run_count == 0 {
            return Ok(());
        }

        // Split the budget across the runs' read buffers
        let per_run = self.budget / run_count;
        let buf_size = (per_run - per_run % self.record_size).max(self.record_size);

        for file in self.runs.drain(..) {
            let mut reader = BufReader::with_capacity(buf_size, file.reopen()?);
            let mut head = vec![0u8; self.record_size];
            reader.read_exact(&mut head)?;
            self.readers.push(Some(reader));
            self.heads.push(head);
            self.run_files.push(Some(file));
        }

        // Leaves are the next power of two >= run count, padded with NO_RUN
        let leaves = run_count.next_power_of_two();
        self.leaf_base = leaves;
        self.tree = vec![NO_RUN; 2 * leaves];
        let mut winners = vec![NO_RUN; 2 * leaves];
        for run in 0..run_count {
            self.tree[leaves + run] = run as i32;
            winners[leaves + run] = run as i32;
        }

        // Bottom-up: each internal node keeps its subtree's loser, the
        // winner moves on to the next round
        for node in (1..leaves).rev() {
            let left = winners[2 * node];
            let right = winners[2 * node + 1];
            let left_wins = left != NO_RUN
                && (right == NO_RUN
                    || (self.cmp)(&self.heads[left as usize], &self.heads[right as usize])
                        != Ordering::Greater);
            if left_wins {
                winners[node] = left;
                self.tree[node] = right;
            } else {
                winners[node] = right;
                self.tree[node] = left;
            }
        }
        self.tree[0] = winners[1];
        Ok(())
    }

    /// Copy the smallest remaining record into `out` and advance its run
    pub fn read(&mut self, out: &mut [u8]) -> SortResult<()> {
        if out.len() != self.record_size {
            return Err(SortError::RecordSizeMismatch {
                expected: self.record_size,
                actual: out.len(),
            });
        }
        let winner = self.tree[0];
        if self.is_end() || winner == NO_RUN {
            return Err(SortError::Internal(
                "reading from an exhausted sorter".to_string(),
            ));
        }
        let run = winner as usize;
        out.copy_from_slice(&self.heads[run]);
        self.remaining -= 1;

        // Refill the winning run; EOF retires it and removes its file
        let mut challenger_slot = self.leaf_base + run;
        let mut new_winner = winner;
        let Some(reader) = self.readers[run].as_mut() else {
            return Err(SortError::Internal("winner run has no reader".to_string()));
        };
        match reader.read_exact(&mut self.heads[run]) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.readers[run] = None;
                self.run_files[run] = None;
                self.tree[challenger_slot] = NO_RUN;
                new_winner = NO_RUN;
            }
            Err(e) => return Err(e.into()),
        }

        // Replay the path to the root: the smaller record keeps climbing,
        // the loser stays behind
        while challenger_slot > 1 {
            let parent = challenger_slot / 2;
            let incumbent = self.tree[parent];
            let keep_climbing = new_winner != NO_RUN
                && (incumbent == NO_RUN
                    || (self.cmp)(
                        &self.heads[new_winner as usize],
                        &self.heads[incumbent as usize],
                    ) != Ordering::Greater);
            if !keep_climbing {
                std::mem::swap(&mut self.tree[parent], &mut new_winner);
            }
            challenger_slot = parent;
        }
        self.tree[0] = new_winner;
        Ok(())
    }

    /// True when every written record has been read back
    pub fn is_end(&self) -> bool {
        self.remaining == 0
    }

    /// Runs whose files are still alive on disk
    pub fn open_run_count(&self) -> usize {
        self.runs.len() + self.run_files.iter().flatten().count()
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }
}
