/// Collection-level configuration, supplied at creation time.
///
/// The settings are advisory sizing hints persisted in the database
/// catalog; they do not change the record format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct CollectionOptions {
    /// Expected number of records, an allocation hint.
    pub expected_records: u64,
    /// Whether the collection is expected to hold large values.
    pub large: bool,
    /// Whether record payloads should be treated as compressed blobs.
    pub compressed: bool,
}

impl CollectionOptions {
    pub fn new() -> CollectionOptions {
        CollectionOptions {
            expected_records: 0,
            large: false,
            compressed: false,
        }
    }

    pub fn expected_records(mut self, expected_records: u64) -> CollectionOptions {
        self.expected_records = expected_records;
        self
    }

    pub fn large(mut self, large: bool) -> CollectionOptions {
        self.large = large;
        self
    }

    pub fn compressed(mut self, compressed: bool) -> CollectionOptions {
        self.compressed = compressed;
        self
    }
}

impl Default for CollectionOptions {
    fn default() -> Self {
        CollectionOptions::new()
    }
}
