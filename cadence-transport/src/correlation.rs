use crate::error::TransportError;

/// Draws allowed before giving up on finding an unused id.
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Mints correlation ids for requests that expect a reply.
pub struct CorrelationIds {
    source: Box<dyn FnMut() -> String>,
}

impl CorrelationIds {
    /// 64 random bits rendered as 16 hex digits.
    pub fn random() -> Self {
        Self::from_fn(|| format!("{:016x}", rand::random::<u64>()))
    }

    /// Use a custom id source.
    pub fn from_fn<F>(source: F) -> Self
    where
        F: FnMut() -> String + 'static,
    {
        Self {
            source: Box::new(source),
        }
    }

    /// Draw ids until one is not `taken`, at most [`MAX_ID_ATTEMPTS`] times.
    pub fn mint<T>(&mut self, taken: T) -> Result<String, TransportError>
    where
        T: Fn(&str) -> bool,
    {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = (self.source)();
            if !taken(&id) {
                return Ok(id);
            }
            tracing::debug!(mid = %id, "correlation id collision, drawing again");
        }
        Err(TransportError::IdSpaceExhausted(MAX_ID_ATTEMPTS))
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::random()
    }
}
