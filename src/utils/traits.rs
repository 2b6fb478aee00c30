use crate::utils::error::{VexelError, VexelResult};

pub(crate) trait SafeAccess<T> {
    fn get_safe(&self, index: usize) -> VexelResult<&T>;
    fn get_range_safe(&self, range: std::ops::Range<usize>) -> VexelResult<&[T]>;
}

impl<T> SafeAccess<T> for [T] {
    /// Safely retrieves a reference to an element at the specified index in a slice.
    ///
    /// # Errors
    ///
    /// Returns `VexelError::CorruptSegment` if the index is out of bounds, which for
    /// segment data means the segment is shorter than its contents claim.
    fn get_safe(&self, index: usize) -> VexelResult<&T> {
        self.get(index)
            .ok_or_else(|| VexelError::corrupt(format!("Index {} out of bounds (len {})", index, self.len())))
    }

    /// Safely retrieves a reference to a range of elements in a slice.
    ///
    /// # Errors
    ///
    /// Returns `VexelError::CorruptSegment` if the range is inverted or out of bounds.
    fn get_range_safe(&self, range: std::ops::Range<usize>) -> VexelResult<&[T]> {
        self.get(range.clone()).ok_or_else(|| {
            VexelError::corrupt(format!(
                "Range {}..{} out of bounds (len {})",
                range.start,
                range.end,
                self.len()
            ))
        })
    }
}
