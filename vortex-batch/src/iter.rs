//! Iterator helpers shared by the grid and pipeline code

use crate::error::{PipelineError, Result};

/// Zip that requires both sides to exhaust simultaneously.
///
/// Yields `Err(LengthMismatch)` once, then stops, if one side ends first.
pub fn zip_equal<A, B>(a: A, b: B) -> ZipEqual<A::IntoIter, B::IntoIter>
where
    A: IntoIterator,
    B: IntoIterator,
{
    ZipEqual {
        a: a.into_iter(),
        b: b.into_iter(),
        index: 0,
        done: false,
    }
}

/// Iterator returned by [`zip_equal`]
pub struct ZipEqual<A, B> {
    a: A,
    b: B,
    index: usize,
    done: bool,
}

impl<A: Iterator, B: Iterator> Iterator for ZipEqual<A, B> {
    type Item = Result<(A::Item, B::Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match (self.a.next(), self.b.next()) {
            (Some(a), Some(b)) => {
                self.index += 1;
                Some(Ok((a, b)))
            }
            (None, None) => {
                self.done = true;
                None
            }
            (left, _) => {
                self.done = true;
                let (short, long) = if left.is_none() { ("first", "second") } else { ("second", "first") };
                Some(Err(PipelineError::LengthMismatch {
                    reason: format!(
                        "the iterables did not exhaust simultaneously: the {} ended after {} items, the {} did not",
                        short, self.index, long
                    ),
                }))
            }
        }
    }
}

/// Group an iterator into chunks of `chunk_size`.
///
/// The last, smaller chunk is yielded only if `incomplete` is set.
pub fn make_chunks<I: IntoIterator>(
    iter: I,
    chunk_size: usize,
    incomplete: bool,
) -> Result<Chunks<I::IntoIter>> {
    if chunk_size == 0 {
        return Err(PipelineError::InvalidBatchSize { value: 0 });
    }
    Ok(Chunks {
        iter: iter.into_iter(),
        chunk_size,
        incomplete,
    })
}

/// Iterator returned by [`make_chunks`]
pub struct Chunks<I> {
    iter: I,
    chunk_size: usize,
    incomplete: bool,
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<I::Item> = self.iter.by_ref().take(self.chunk_size).collect();
        match chunk.len() {
            0 => None,
            len if len == self.chunk_size || self.incomplete => Some(chunk),
            _ => None,
        }
    }
}
