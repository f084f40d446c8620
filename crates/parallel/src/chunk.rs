//! Partitioning of an ordered zone sequence into fixed-size chunks

/// A contiguous slice of zones processed as one unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the schedule
    pub index: usize,
    /// Offset of the first zone in the job's zone sequence
    pub offset: usize,
    /// Identifiers of the zones in this chunk, in input order
    pub zone_ids: Vec<String>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.zone_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zone_ids.is_empty()
    }

    /// Range of this chunk within the job's zone sequence
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.zone_ids.len()
    }
}

/// Iterator over chunks covering a zone sequence
pub struct ChunkIterator<'a> {
    ids: &'a [String],
    chunk_size: usize,
    next_offset: usize,
    next_index: usize,
}

impl<'a> ChunkIterator<'a> {
    /// `chunk_size` of 0 is treated as 1
    pub fn new(ids: &'a [String], chunk_size: usize) -> Self {
        Self {
            ids,
            chunk_size: chunk_size.max(1),
            next_offset: 0,
            next_index: 0,
        }
    }
}

impl Iterator for ChunkIterator<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_offset >= self.ids.len() {
            return None;
        }
        let end = (self.next_offset + self.chunk_size).min(self.ids.len());
        let chunk = Chunk {
            index: self.next_index,
            offset: self.next_offset,
            zone_ids: self.ids[self.next_offset..end].to_vec(),
        };
        self.next_offset = end;
        self.next_index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.ids.len().saturating_sub(self.next_offset).div_ceil(self.chunk_size);
        (left, Some(left))
    }
}

/// Deterministic schedule: chunk `i` holds zones `[i * size, (i + 1) * size)`
pub fn schedule(zone_ids: &[String], chunk_size: usize) -> Vec<Chunk> {
    ChunkIterator::new(zone_ids, chunk_size).collect()
}
