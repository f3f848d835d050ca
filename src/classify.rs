//! Size-class classification.
//!
//! `classify(n)` returns a class index in `[0, C)`; `representative(k)`
//! returns the byte size of class `k`. The mapping is monotone
//! non-decreasing and satisfies `representative(classify(n)) >= n` and
//! `classify(representative(k)) == k`.
//!
//! The table is piecewise exactly as specified: sub-cache-line sizes step
//! by one machine word; beyond a cache line, classes double every four
//! linear sub-steps (bounding internal fragmentation per class to ~25%).

use std::sync::OnceLock;

pub const WORD_SIZE: usize = std::mem::size_of::<usize>();
const CACHE_LINE: usize = 64;
const SUBSTEPS_PER_OCTAVE: usize = 4;
pub const MAX_SIZE_CLASSES: usize = 256;

struct SizeClassTable {
    /// `representative[k]` is the byte size assigned to class `k`.
    representative: Vec<usize>,
}

impl SizeClassTable {
    fn build(max_size: usize) -> SizeClassTable {
        let mut representative = Vec::with_capacity(MAX_SIZE_CLASSES);

        // Phase 1: word-granular steps up to one cache line.
        let mut size = WORD_SIZE;
        while size <= CACHE_LINE {
            representative.push(size);
            size += WORD_SIZE;
        }

        // Phase 2: four linear substeps per power-of-two octave above a
        // cache line, until classes can represent `max_size`.
        let mut octave_base = CACHE_LINE;
        while *representative.last().unwrap() < max_size
            && representative.len() < MAX_SIZE_CLASSES
        {
            let step = octave_base / SUBSTEPS_PER_OCTAVE;
            let next_base = octave_base * 2;
            let mut s = octave_base + step;
            while s <= next_base && representative.len() < MAX_SIZE_CLASSES {
                representative.push(s);
                s += step;
            }
            octave_base = next_base;
        }

        SizeClassTable { representative }
    }

    fn classify(&self, n: usize) -> usize {
        // Branch-free on the hot path would require a perfect hash or a
        // division-based formula; a binary search over a ~256-entry table
        // is the practical equivalent of one division plus one table
        // lookup, and keeps the table data driven rather than
        // duplicating its construction logic here.
        match self.representative.binary_search(&n) {
            Ok(idx) => idx,
            Err(idx) => idx.min(self.representative.len() - 1),
        }
    }

    fn representative_of(&self, class: usize) -> usize {
        self.representative[class]
    }

    fn len(&self) -> usize {
        self.representative.len()
    }
}

static TABLE: OnceLock<SizeClassTable> = OnceLock::new();

fn table() -> &'static SizeClassTable {
    TABLE.get_or_init(|| SizeClassTable::build(crate::buddy::SUPERPAGE_SIZE))
}

/// Returns the size class index for a requested byte count. Only valid
/// for `n` within the small/medium range (`n <= representative(last)`);
/// large objects bypass classification entirely.
pub fn classify(n: usize) -> usize {
    table().classify(n.max(1))
}

/// Returns the representative (maximum servable) byte size for a class.
pub fn representative(class: usize) -> usize {
    table().representative_of(class)
}

/// Total number of size classes in the table.
pub fn class_count() -> usize {
    table().len()
}

/// Largest size representable by the classification table — everything
/// at or below this is small or medium; everything above is large.
pub fn max_classified_size() -> usize {
    table().representative_of(table().len() - 1)
}
