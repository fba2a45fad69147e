use memtx_core::error::{Error, Result};
use memtx_core::ids::FormatId;
use memtx_core::traits::TupleFormat;

/// A minimal concrete `TupleFormat`: the tuple payload is treated as an
/// opaque byte string (decoding it is out of this kernel's scope), so the
/// only well-formedness check available is non-emptiness, and the field
/// map is always zero-sized.
#[derive(Debug, Clone)]
pub struct OpaqueFormat {
    id: FormatId,
    temporary: bool,
}

impl OpaqueFormat {
    pub fn new(id: FormatId) -> Self {
        Self {
            id,
            temporary: false,
        }
    }

    pub fn temporary(id: FormatId) -> Self {
        Self {
            id,
            temporary: true,
        }
    }
}

impl TupleFormat for OpaqueFormat {
    fn build_field_map(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(Error::FormatError("tuple data must not be empty".into()));
        }
        Ok(0)
    }

    fn is_temporary(&self) -> bool {
        self.temporary
    }

    fn id(&self) -> FormatId {
        self.id
    }
}
