//! Component-scoped views over a transaction.

use super::{StorageError, StoreTx};

/// One component type's private state for one hook, inside an open
/// transaction.
///
/// Scalar fields map to `"{hook}-{field}"` in the component's bucket.
/// Nested sets live in `"{bucket}/{set}"` under `"{hook}/{member}"`.
pub struct Partition<'a> {
    tx: &'a StoreTx,
    bucket: &'a str,
    hook_id: &'a str,
}

impl<'a> Partition<'a> {
    pub(super) fn new(tx: &'a StoreTx, bucket: &'a str, hook_id: &'a str) -> Self {
        Self {
            tx,
            bucket,
            hook_id,
        }
    }

    fn field_key(&self, name: &str) -> String {
        format!("{}-{}", self.hook_id, name)
    }

    /// Read a scalar field.
    pub async fn field(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.tx.get_string(self.bucket, &self.field_key(name)).await
    }

    /// Read a scalar field, treating absence (or a read failure) as empty.
    pub async fn field_or_empty(&self, name: &str) -> String {
        match self.field(name).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    target: "store",
                    bucket = self.bucket,
                    hook = self.hook_id,
                    field = name,
                    error = %e,
                    "failed to read component field"
                );
                String::new()
            }
        }
    }

    pub async fn set_field(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.tx
            .put(self.bucket, &self.field_key(name), value.as_bytes())
            .await
    }

    /// Open (lazily) a nested set belonging to this hook.
    pub fn set(&self, name: &str) -> NestedSet<'a> {
        NestedSet {
            tx: self.tx,
            bucket: format!("{}/{}", self.bucket, name),
            prefix: format!("{}/", self.hook_id),
        }
    }
}

/// A hook-scoped ordered set of string members.
pub struct NestedSet<'a> {
    tx: &'a StoreTx,
    bucket: String,
    prefix: String,
}

impl NestedSet<'_> {
    fn member_key(&self, member: &str) -> String {
        format!("{}{}", self.prefix, member)
    }

    pub async fn contains(&self, member: &str) -> Result<bool, StorageError> {
        self.tx.exists(&self.bucket, &self.member_key(member)).await
    }

    pub async fn insert(&self, member: &str) -> Result<(), StorageError> {
        self.tx.put(&self.bucket, &self.member_key(member), &[]).await
    }

    /// Number of members in the inclusive range `[low, high]`.
    pub async fn count_between(&self, low: &str, high: &str) -> Result<u64, StorageError> {
        self.tx
            .count_between(&self.bucket, &self.member_key(low), &self.member_key(high))
            .await
    }

    /// Remove every member strictly less than `bound`.
    pub async fn remove_below(&self, bound: &str) -> Result<u64, StorageError> {
        self.tx
            .delete_range(&self.bucket, &self.prefix, &self.member_key(bound))
            .await
    }

    /// All members in order.
    pub async fn members(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.tx.scan_prefix(&self.bucket, &self.prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}
