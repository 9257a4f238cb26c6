use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Runtime buffer capacity must hold at least one byte plus terminator, got {0}")]
    TooSmall(usize),
    #[error("Failed to allocate {0} bytes for the runtime buffer")]
    Alloc(usize),
}

/// Fixed-capacity buffer holding one terminated record.
///
/// Contents are always a single NUL-terminated byte sequence of at most
/// `capacity - 1` bytes. Each fill replaces the previous record entirely.
pub struct RuntimeBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl RuntimeBuffer {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity < 2 {
            return Err(BufferError::TooSmall(capacity));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| BufferError::Alloc(capacity))?;
        data.resize(capacity, 0u8);

        Ok(Self {
            data: data.into_boxed_slice(),
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Longest record that fits alongside its NUL terminator.
    pub fn max_record_len(&self) -> usize {
        self.data.len().saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The current record, without the NUL terminator.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.get(..self.len).unwrap_or_default()
    }

    /// The current record including its NUL terminator.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        self.data.get(..=self.len).unwrap_or_default()
    }

    /// Replace the record with up to `n` bytes written by `fill`.
    ///
    /// `n` is clamped to [`max_record_len`](Self::max_record_len). `fill`
    /// returns how many bytes it wrote; the record is terminated right after
    /// them. If `fill` fails the buffer is left holding an empty record.
    pub fn fill_with<F, E>(&mut self, n: usize, fill: F) -> Result<usize, E>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, E>,
    {
        let n = n.min(self.max_record_len());
        let Some(dst) = self.data.get_mut(..n) else {
            self.clear();
            return Ok(0);
        };

        match fill(dst) {
            Ok(written) => {
                self.terminate(written.min(n));
                Ok(self.len)
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    pub fn clear(&mut self) {
        self.terminate(0);
    }

    fn terminate(&mut self, len: usize) {
        if let Some(slot) = self.data.get_mut(len) {
            *slot = 0;
            self.len = len;
        }
    }
}

impl std::fmt::Debug for RuntimeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuffer")
            .field("capacity", &self.capacity())
            .field("record", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}
