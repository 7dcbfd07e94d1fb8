//! The data unit flowing through a pipeline.
//!
//! A [`Batch`] is an ordered list of [`Part`]s. Index order is meaningful: downstream stages
//! correlate results by position, so no operation here ever reorders parts.
//!
//! Batches are copy-on-write. [`Batch::duplicate`] (and `Clone`) only bumps a reference count,
//! the part list is copied the first time the duplicate is mutated, and a part's payload and
//! metadata are copied only when that particular part is mutated.

use std::collections::HashMap;
use std::sync::Arc;

use crate::shared::FAILED_FLAG_KEY;

/// A single payload plus its string metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    payload: Vec<u8>,
    metadata: HashMap<String, String>,
}

impl Part {
    /// Creates a part with the given payload and no metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowstage::message::Part;
    /// let part = Part::new("hello");
    /// assert_eq!(part.payload(), b"hello");
    /// ```
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    /// Sets a metadata entry, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    /// A part carrying `payload` and a copy of this part's metadata. The current payload is
    /// not copied.
    pub fn with_new_payload(&self, payload: impl Into<Vec<u8>>) -> Part {
        Part {
            payload: payload.into(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns the metadata value for `key`, if any.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<String> {
        self.metadata.remove(key)
    }

    pub fn metadata_map(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Flags this part as failed, recording the error message in its metadata.
    pub fn flag_error(&mut self, err: impl std::fmt::Display) {
        self.metadata
            .insert(FAILED_FLAG_KEY.to_string(), err.to_string());
    }

    /// The recorded processing failure, if this part was flagged.
    pub fn failure(&self) -> Option<&str> {
        self.metadata(FAILED_FLAG_KEY)
    }

    pub fn has_failed(&self) -> bool {
        self.metadata.contains_key(FAILED_FLAG_KEY)
    }

    pub fn clear_error(&mut self) {
        self.metadata.remove(FAILED_FLAG_KEY);
    }
}

/// An ordered, copy-on-write collection of parts.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    parts: Arc<Vec<Arc<Part>>>,
}

impl Batch {
    /// Creates a batch with one metadata-free part per payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowstage::message::Batch;
    /// let batch = Batch::new(vec!["first", "second"]);
    /// assert_eq!(batch.len(), 2);
    /// assert_eq!(batch.payload(1), b"second");
    /// ```
    pub fn new<P: Into<Vec<u8>>>(payloads: impl IntoIterator<Item = P>) -> Self {
        payloads.into_iter().map(Part::new).collect()
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        parts.into_iter().collect()
    }

    /// Returns a batch that shares every part with `self`. Mutating either batch afterwards
    /// never affects the other.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Number of parts in the batch.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns the part at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range. Indices are always derived from [`Batch::len`].
    pub fn get(&self, index: usize) -> &Part {
        &self.parts[index]
    }

    /// Returns a shared handle to the part at `index` without copying it.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get_shared(&self, index: usize) -> Arc<Part> {
        Arc::clone(&self.parts[index])
    }

    /// Returns a mutable reference to the part at `index`, copying it first if it is shared
    /// with another batch.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get_mut(&mut self, index: usize) -> &mut Part {
        let parts = Arc::make_mut(&mut self.parts);
        Arc::make_mut(&mut parts[index])
    }

    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn payload(&self, index: usize) -> &[u8] {
        self.get(index).payload()
    }

    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set_payload(&mut self, index: usize, payload: impl Into<Vec<u8>>) {
        self.get_mut(index).set_payload(payload);
    }

    /// Replaces the part at `index` wholesale.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn replace(&mut self, index: usize, part: Part) {
        Arc::make_mut(&mut self.parts)[index] = Arc::new(part);
    }

    pub fn push(&mut self, part: Part) {
        Arc::make_mut(&mut self.parts).push(Arc::new(part));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().map(Arc::as_ref)
    }

    /// Whether both batches share the same part list, i.e. neither has been mutated since one
    /// was duplicated from the other.
    pub fn shares_parts_with(&self, other: &Batch) -> bool {
        Arc::ptr_eq(&self.parts, &other.parts)
    }

    /// Consumes the batch, cloning only the parts that are still shared.
    pub fn into_parts(self) -> Vec<Part> {
        let parts = Arc::unwrap_or_clone(self.parts);
        parts.into_iter().map(Arc::unwrap_or_clone).collect()
    }
}

impl FromIterator<Part> for Batch {
    fn from_iter<I: IntoIterator<Item = Part>>(iter: I) -> Self {
        Self {
            parts: Arc::new(iter.into_iter().map(Arc::new).collect()),
        }
    }
}
