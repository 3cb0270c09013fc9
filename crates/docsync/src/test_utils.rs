//! Helpers shared by unit tests.

use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, Text, TextRef, Transact, Update};

use crate::replica::DEFAULT_TEXT_ROOT;

/// Client-side doc that returns the update produced by each edit.
pub(crate) struct Editor {
    pub(crate) doc: Doc,
    pub(crate) text: TextRef,
}

impl Editor {
    pub(crate) fn new(client_id: u64) -> Self {
        let doc = Doc::with_client_id(client_id);
        let text = doc.get_or_insert_text(DEFAULT_TEXT_ROOT);
        Self { doc, text }
    }

    pub(crate) fn insert(&self, index: u32, chunk: &str) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            self.text.insert(&mut txn, index, chunk);
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    pub(crate) fn delete(&self, index: u32, len: u32) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            self.text.remove_range(&mut txn, index, len);
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    pub(crate) fn apply(&self, update: &[u8]) {
        let mut txn = self.doc.transact_mut();
        txn.apply_update(Update::decode_v1(update).unwrap()).unwrap();
    }
}
