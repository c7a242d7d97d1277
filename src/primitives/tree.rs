use crate::error::Result;
use crate::machine::PrimitiveOp;
use crate::protocol::messages::ConsistencyLevel;

use super::{expect_bytes, expect_keys, PrimitiveHandle};

/// A replicated hierarchical document store keyed by `/`-separated paths.
///
/// Child ordering (lexicographic or insertion order) is fixed when the tree
/// is created.
#[derive(Clone)]
pub struct DocumentTree {
    handle: PrimitiveHandle,
}

impl DocumentTree {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Set the document at `path`, returning the previous document if any.
    pub async fn set(&self, path: &str, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        expect_bytes(
            self.handle
                .submit(PrimitiveOp::TreeSet {
                    path: path.to_string(),
                    value,
                })
                .await?,
        )
    }

    pub async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        expect_bytes(
            self.handle
                .read(
                    PrimitiveOp::TreeGet(path.to_string()),
                    ConsistencyLevel::Linearizable,
                )
                .await?,
        )
    }

    pub async fn remove(&self, path: &str) -> Result<Option<Vec<u8>>> {
        expect_bytes(
            self.handle
                .submit(PrimitiveOp::TreeRemove(path.to_string()))
                .await?,
        )
    }

    /// Direct child segment names under `path`, in the tree's ordering.
    pub async fn children(&self, path: &str) -> Result<Vec<String>> {
        expect_keys(
            self.handle
                .read(
                    PrimitiveOp::TreeChildren(path.to_string()),
                    ConsistencyLevel::Linearizable,
                )
                .await?,
        )
    }
}
