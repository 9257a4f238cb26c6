use std::time::Duration;

use core_types::{PeripheralError, SerialStream};
use thiserror::Error;

use crate::buffer::RuntimeBuffer;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The driver reported a pattern but has no offset for it, which happens
    /// when its pattern queue overflowed.
    #[error("Pattern position unavailable: pattern queue too small to keep up")]
    ExtractionFailed,
    /// The terminated record does not fit the runtime buffer.
    #[error("Record of {len} bytes does not fit the runtime buffer ({capacity} bytes incl. NUL)")]
    RecordTooLong { len: usize, capacity: usize },
    #[error(transparent)]
    Read(#[from] PeripheralError),
}

/// Copy exactly one terminated record out of the driver into `buffer`.
///
/// The record runs from the read position up to and including the oldest
/// pattern match. Records longer than `buffer.max_record_len()` are refused
/// before anything is read, leaving both the driver and the buffer untouched;
/// the caller is expected to flush. A short read keeps whatever arrived
/// within `timeout`.
///
/// Returns the number of bytes copied, excluding the NUL terminator.
pub fn extract_line<S>(
    stream: &mut S,
    buffer: &mut RuntimeBuffer,
    timeout: Duration,
) -> Result<usize, ExtractError>
where
    S: SerialStream + ?Sized,
{
    let pos = stream.pop_pattern_pos().ok_or(ExtractError::ExtractionFailed)?;
    let len = pos.saturating_add(1);

    if len > buffer.max_record_len() {
        return Err(ExtractError::RecordTooLong {
            len,
            capacity: buffer.capacity(),
        });
    }

    let read = buffer.fill_with(len, |dst| stream.read_bytes(dst, timeout))?;
    Ok(read)
}
