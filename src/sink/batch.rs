/// One serialized record: an optional routing key and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
}

impl EncodedRecord {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { key: None, payload }
    }

    pub fn keyed(key: Vec<u8>, payload: Vec<u8>) -> Self {
        Self { key: Some(key), payload }
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_parts(self) -> (Option<Vec<u8>>, Vec<u8>) {
        (self.key, self.payload)
    }
}

/// Ordered records handed to a write target in one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    records: Vec<EncodedRecord>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { records: Vec::with_capacity(capacity) }
    }

    pub fn push(&mut self, record: EncodedRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EncodedRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[EncodedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<EncodedRecord> {
        self.records
    }
}

impl From<Vec<EncodedRecord>> for Batch {
    fn from(records: Vec<EncodedRecord>) -> Self {
        Self { records }
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a EncodedRecord;
    type IntoIter = std::slice::Iter<'a, EncodedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for Batch {
    type Item = EncodedRecord;
    type IntoIter = std::vec::IntoIter<EncodedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
