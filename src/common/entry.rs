/// A stored value together with the full hash it was placed by.
///
/// Caching the hash lets displacement, relocation and resize compute the
/// alternate bucket of an entry without hashing the value again, and lets the
/// striped set refer to an entry by hash while it holds no lock on its bucket.
#[derive(Debug)]
pub(crate) struct Entry<T> {
    pub(crate) hash: u64,
    pub(crate) value: T,
}

impl<T> Entry<T> {
    pub(crate) fn new(hash: u64, value: T) -> Self {
        Self { hash, value }
    }

    #[inline]
    pub(crate) fn is<Q>(&self, hash: u64, value: &Q) -> bool
    where
        T: std::borrow::Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.hash == hash && self.value.borrow() == value
    }
}
