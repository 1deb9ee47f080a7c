//! Core domain types: knowledge entries and canonical transcripts.

mod entry;
mod transcript;

pub use entry::{
    EMBEDDING_DIMENSIONS, Entry, EntrySource, EntryType, Expiry, Scope, hash_bytes,
    hash_normalized,
};
pub use transcript::{Message, Role, Transcript, TranscriptChunk};
