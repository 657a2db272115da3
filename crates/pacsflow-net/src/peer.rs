//! Remote peer contract
//!
//! The wire protocol lives behind this trait. Implementations report failures
//! as `NetError` values whose variant says whether a retry can help.

use crate::error::NetResult;
use pacsflow_core::{FindQuery, QueryLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub stored: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// One match returned by a find, keyed by attribute keyword.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMatch {
    pub attributes: BTreeMap<String, String>,
}

impl FindMatch {
    pub fn new<I, K, V>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.attributes.get(keyword).map(String::as_str)
    }

    /// The unique key attribute for `level`.
    pub fn unique_key(&self, level: QueryLevel) -> Option<&str> {
        let keyword = match level {
            QueryLevel::Patient => "PatientID",
            QueryLevel::Study => "StudyInstanceUID",
            QueryLevel::Series => "SeriesInstanceUID",
            QueryLevel::Instance => "SOPInstanceUID",
        };
        self.get(keyword)
    }
}

#[async_trait::async_trait]
pub trait DicomPeer: Send + Sync {
    /// Verify the peer answers (C-ECHO).
    async fn echo(&self, peer_id: &str) -> NetResult<()>;

    /// Send files to the peer (C-STORE).
    async fn store(&self, peer_id: &str, files: &[String]) -> NetResult<StoreReceipt>;

    /// Ask the peer what it holds (C-FIND).
    async fn find(&self, peer_id: &str, query: &FindQuery) -> NetResult<Vec<FindMatch>>;
}
