/// A contiguous slice of the work list handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<T> {
    /// Worker index, also the chunk's position in the plan.
    pub index: usize,
    /// Position of `items[0]` in the original sequence.
    pub offset: usize,
    pub items: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Splits `items` into at most `max_parallelism` contiguous chunks.
///
/// The window size is `len / workers` rounded to the nearest integer (halves
/// away from zero), so chunks are only roughly equal; the last chunk takes
/// whatever is left. Concatenating the chunks in order gives back `items`.
pub fn plan<T: Clone>(items: &[T], max_parallelism: usize) -> Vec<Chunk<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let workers = items.len().min(max_parallelism.max(1));
    let size = ((items.len() as f64 / workers as f64).round() as usize).max(1);

    let mut chunks = Vec::with_capacity(workers);
    let mut offset = 0;
    for index in 0..workers {
        if offset >= items.len() {
            break;
        }
        let end = if index + 1 == workers {
            items.len()
        } else {
            (offset + size).min(items.len())
        };
        chunks.push(Chunk {
            index,
            offset,
            items: items[offset..end].to_vec(),
        });
        offset = end;
    }
    chunks
}

/// Concatenates per-chunk results in chunk order.
pub fn flatten<T>(chunks: impl IntoIterator<Item = Vec<T>>) -> Vec<T> {
    chunks.into_iter().flatten().collect()
}
