use crate::error::BoxError;

/// Persists cache mutations to an external system of record.
///
/// Both calls run synchronously on the mutating thread, before the in-memory
/// change commits. An error aborts the mutation and is returned to the
/// caller as a `WriterError`.
pub trait CacheWriter<K, V>: Send + Sync + 'static {
  /// Called before a value is stored, by `put` or by a successful load.
  fn write(&self, key: &K, value: &V) -> Result<(), BoxError>;

  /// Called before a key is removed by `remove`.
  fn delete(&self, key: &K) -> Result<(), BoxError> {
    let _ = key;
    Ok(())
  }
}

impl<K, V, F> CacheWriter<K, V> for F
where
  F: Fn(&K, &V) -> Result<(), BoxError> + Send + Sync + 'static,
{
  fn write(&self, key: &K, value: &V) -> Result<(), BoxError> {
    self(key, value)
  }
}
